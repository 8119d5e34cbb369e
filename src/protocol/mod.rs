//! The client wire protocol.
//!
//! Clients talk to the compositor over loopback TCP with fixed-size framed
//! packets. Every packet occupies exactly [`PACKET_SIZE`] bytes, the C
//! layout size of the largest variant, and starts with a `u32` type tag. A `DRAW_BUFFER` packet is a bare header; the cell payload
//! follows as a second framed read of `cell_count × CELL_SIZE` bytes.
//!
//! All integers are host-endian, matching the C peers this protocol was
//! built for.

mod reader;

pub use self::reader::{PacketReader, ReadError, ReadResult};

use std::fmt;

use bitflags::bitflags;
use thiserror::Error;

/// On-wire size of every packet.
///
/// This is the size of the C union over all variants: the `INPUT` layout
/// (tag + two `i16` + two `u32` + one `u8`) rounded up to 4-byte alignment.
pub const PACKET_SIZE: usize = 20;

/// On-wire size of a single cell: 4 UTF-8 bytes, an RGB foreground, one
/// padding byte and a packed RGBA background.
pub const CELL_SIZE: usize = 12;

const TYPE_NOTIFY: u32 = 1;
const TYPE_DRAW_BUFFER: u32 = 2;
const TYPE_INPUT: u32 = 3;
const TYPE_RESIZE: u32 = 4;

/// A foreground colour.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Rgb { r, g, b }
    }
}

/// One character position of a client grid.
///
/// `utf` holds the base codepoint as up to four UTF-8 bytes, zero-padded.
/// `bg` is packed RGBA in byte order r, g, b, a from the low byte up.
/// Equality over the whole value is what the rasterizer's cell-pixel cache
/// keys on.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Cell {
    pub utf: [u8; 4],
    pub fg: Rgb,
    pub bg: u32,
}

impl Cell {
    pub fn new(utf: &[u8], fg: Rgb, bg: u32) -> Self {
        let mut bytes = [0u8; 4];
        let len = utf.len().min(4);
        bytes[..len].copy_from_slice(&utf[..len]);
        Cell { utf: bytes, fg, bg }
    }

    /// Decodes the UTF-8 prefix into a codepoint. Returns `None` for an
    /// empty or malformed sequence.
    pub fn codepoint(&self) -> Option<char> {
        let len = self.utf.iter().position(|&b| b == 0).unwrap_or(4);
        if len == 0 {
            return None;
        }
        std::str::from_utf8(&self.utf[..len])
            .ok()
            .and_then(|s| s.chars().next())
    }

    pub fn to_bytes(&self) -> [u8; CELL_SIZE] {
        let mut out = [0u8; CELL_SIZE];
        out[0..4].copy_from_slice(&self.utf);
        out[4] = self.fg.r;
        out[5] = self.fg.g;
        out[6] = self.fg.b;
        out[8..12].copy_from_slice(&self.bg.to_ne_bytes());
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < CELL_SIZE {
            return None;
        }
        let mut utf = [0u8; 4];
        utf.copy_from_slice(&bytes[0..4]);
        Some(Cell {
            utf,
            fg: Rgb::new(bytes[4], bytes[5], bytes[6]),
            bg: u32::from_ne_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]),
        })
    }
}

/// Packs an RGBA colour for the wire: r in the low byte, a in the high
/// byte.
pub const fn pack_rgba(r: u8, g: u8, b: u8, a: u8) -> u32 {
    (r as u32) | ((g as u32) << 8) | ((b as u32) << 16) | ((a as u32) << 24)
}

/// Sub-kind of a `NOTIFY` packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyKind {
    /// The client has nothing to draw this frame.
    EmptyBuffer,
    /// The client has shut down.
    Closed,
}

impl NotifyKind {
    fn to_wire(self) -> u32 {
        match self {
            NotifyKind::EmptyBuffer => 1,
            NotifyKind::Closed => 2,
        }
    }

    fn from_wire(raw: u32) -> Option<Self> {
        match raw {
            1 => Some(NotifyKind::EmptyBuffer),
            2 => Some(NotifyKind::Closed),
            _ => None,
        }
    }
}

bitflags! {
    /// Modifier state carried by `INPUT` packets.
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
    pub struct Modifiers: u32 {
        const SHIFT        = 1 << 0;
        const CTRL         = 1 << 1;
        const SUPER        = 1 << 2;
        const ALT          = 1 << 3;
        const ALTGR        = 1 << 4;
        const FN           = 1 << 5;
        /// Set while the key is held, cleared on release.
        const PRESSED_DOWN = 1 << 6;
    }
}

/// Non-printable keys and pointer buttons carried by `INPUT` packets.
///
/// Scroll directions ride in this field for compatibility with existing
/// clients; a dedicated delta field would grow the packet union and break
/// the fixed framing.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum AdditionalKey {
    #[default]
    Unknown = 0,
    F1 = 1,
    F2 = 2,
    F3 = 3,
    F4 = 4,
    F5 = 5,
    F6 = 6,
    F7 = 7,
    F8 = 8,
    F9 = 9,
    F10 = 10,
    F11 = 11,
    F12 = 12,
    ArrowUp = 13,
    ArrowDown = 14,
    ArrowLeft = 15,
    ArrowRight = 16,
    Home = 17,
    End = 18,
    PageUp = 19,
    PageDown = 20,
    Insert = 21,
    Delete = 22,
    LeftClick = 23,
    MiddleClick = 24,
    RightClick = 25,
    ScrollUp = 26,
    ScrollDown = 27,
}

impl AdditionalKey {
    fn from_wire(raw: u32) -> Self {
        use AdditionalKey::*;
        match raw {
            1 => F1,
            2 => F2,
            3 => F3,
            4 => F4,
            5 => F5,
            6 => F6,
            7 => F7,
            8 => F8,
            9 => F9,
            10 => F10,
            11 => F11,
            12 => F12,
            13 => ArrowUp,
            14 => ArrowDown,
            15 => ArrowLeft,
            16 => ArrowRight,
            17 => Home,
            18 => End,
            19 => PageUp,
            20 => PageDown,
            21 => Insert,
            22 => Delete,
            23 => LeftClick,
            24 => MiddleClick,
            25 => RightClick,
            26 => ScrollUp,
            27 => ScrollDown,
            _ => Unknown,
        }
    }
}

/// Payload of an `INPUT` packet.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct InputEvent {
    pub mouse_x: i16,
    pub mouse_y: i16,
    pub modifiers: Modifiers,
    pub additional: AdditionalKey,
    /// Printable byte, 0 when `additional` carries the key.
    pub key: u8,
}

/// A decoded packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Packet {
    Notify(NotifyKind),
    /// Header only; `cell_count × CELL_SIZE` payload bytes follow as a
    /// separate framed read.
    DrawBuffer,
    Input(InputEvent),
    /// Window size in cells, compositor → client.
    Resize { width: i16, height: i16 },
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("packet shorter than {PACKET_SIZE} bytes")]
    Truncated,
    #[error("unknown packet type {0}")]
    UnknownType(u32),
    #[error("unknown notify kind {0}")]
    UnknownNotify(u32),
}

impl Packet {
    pub fn encode(&self) -> [u8; PACKET_SIZE] {
        let mut out = [0u8; PACKET_SIZE];
        match *self {
            Packet::Notify(kind) => {
                out[0..4].copy_from_slice(&TYPE_NOTIFY.to_ne_bytes());
                out[4..8].copy_from_slice(&kind.to_wire().to_ne_bytes());
            }
            Packet::DrawBuffer => {
                out[0..4].copy_from_slice(&TYPE_DRAW_BUFFER.to_ne_bytes());
            }
            Packet::Input(ev) => {
                out[0..4].copy_from_slice(&TYPE_INPUT.to_ne_bytes());
                out[4..6].copy_from_slice(&ev.mouse_x.to_ne_bytes());
                out[6..8].copy_from_slice(&ev.mouse_y.to_ne_bytes());
                out[8..12].copy_from_slice(&ev.modifiers.bits().to_ne_bytes());
                out[12..16].copy_from_slice(&(ev.additional as u32).to_ne_bytes());
                out[16] = ev.key;
            }
            Packet::Resize { width, height } => {
                out[0..4].copy_from_slice(&TYPE_RESIZE.to_ne_bytes());
                out[4..6].copy_from_slice(&width.to_ne_bytes());
                out[6..8].copy_from_slice(&height.to_ne_bytes());
            }
        }
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Packet, DecodeError> {
        if bytes.len() < PACKET_SIZE {
            return Err(DecodeError::Truncated);
        }
        let tag = u32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        let word = |at: usize| u32::from_ne_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]]);
        let half = |at: usize| i16::from_ne_bytes([bytes[at], bytes[at + 1]]);
        match tag {
            TYPE_NOTIFY => NotifyKind::from_wire(word(4))
                .map(Packet::Notify)
                .ok_or_else(|| DecodeError::UnknownNotify(word(4))),
            TYPE_DRAW_BUFFER => Ok(Packet::DrawBuffer),
            TYPE_INPUT => Ok(Packet::Input(InputEvent {
                mouse_x: half(4),
                mouse_y: half(6),
                modifiers: Modifiers::from_bits_truncate(word(8)),
                additional: AdditionalKey::from_wire(word(12)),
                key: bytes[16],
            })),
            TYPE_RESIZE => Ok(Packet::Resize {
                width: half(4),
                height: half(6),
            }),
            other => Err(DecodeError::UnknownType(other)),
        }
    }
}

/// Decodes a raw `DRAW_BUFFER` payload into cells. The caller has already
/// length-checked the payload against its grid.
pub fn decode_cells(bytes: &[u8], out: &mut Vec<Cell>) {
    out.clear();
    for chunk in bytes.chunks_exact(CELL_SIZE) {
        if let Some(cell) = Cell::from_bytes(chunk) {
            out.push(cell);
        }
    }
}

/// Encodes cells into a `DRAW_BUFFER` payload. Used by tests and client
/// tooling.
pub fn encode_cells(cells: &[Cell]) -> Vec<u8> {
    let mut out = Vec::with_capacity(cells.len() * CELL_SIZE);
    for cell in cells {
        out.extend_from_slice(&cell.to_bytes());
    }
    out
}

impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Packet::Notify(kind) => write!(f, "NOTIFY({kind:?})"),
            Packet::DrawBuffer => write!(f, "DRAW_BUFFER"),
            Packet::Input(_) => write!(f, "INPUT"),
            Packet::Resize { width, height } => write!(f, "RESIZE({width}x{height})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packet_round_trips() {
        let packets = [
            Packet::Notify(NotifyKind::EmptyBuffer),
            Packet::Notify(NotifyKind::Closed),
            Packet::DrawBuffer,
            Packet::Input(InputEvent {
                mouse_x: -3,
                mouse_y: 120,
                modifiers: Modifiers::CTRL | Modifiers::PRESSED_DOWN,
                additional: AdditionalKey::ScrollDown,
                key: 0,
            }),
            Packet::Resize {
                width: 80,
                height: 24,
            },
        ];
        for packet in packets {
            let bytes = packet.encode();
            assert_eq!(Packet::decode(&bytes).unwrap(), packet);
        }
    }

    #[test]
    fn unknown_tags_are_rejected() {
        let mut bytes = [0u8; PACKET_SIZE];
        bytes[0..4].copy_from_slice(&99u32.to_ne_bytes());
        assert!(matches!(
            Packet::decode(&bytes),
            Err(DecodeError::UnknownType(99))
        ));

        let mut bytes = Packet::Notify(NotifyKind::Closed).encode();
        bytes[4..8].copy_from_slice(&7u32.to_ne_bytes());
        assert!(matches!(
            Packet::decode(&bytes),
            Err(DecodeError::UnknownNotify(7))
        ));
    }

    #[test]
    fn cell_round_trips() {
        let cell = Cell::new("Ä".as_bytes(), Rgb::new(255, 128, 0), pack_rgba(0, 0, 0, 255));
        let restored = Cell::from_bytes(&cell.to_bytes()).unwrap();
        assert_eq!(restored, cell);
        assert_eq!(restored.codepoint(), Some('Ä'));
    }

    #[test]
    fn cell_payloads_round_trip() {
        let cells: Vec<Cell> = (0u8..10)
            .map(|i| Cell::new(&[b'a' + i], Rgb::new(i, i, i), pack_rgba(i, 0, 0, 255)))
            .collect();
        let bytes = encode_cells(&cells);
        assert_eq!(bytes.len(), cells.len() * CELL_SIZE);
        let mut restored = Vec::new();
        decode_cells(&bytes, &mut restored);
        assert_eq!(restored, cells);
    }

    #[test]
    fn empty_cell_has_no_codepoint() {
        assert_eq!(Cell::default().codepoint(), None);
        assert_eq!(Cell::new(b"A", Rgb::default(), 0).codepoint(), Some('A'));
    }
}
