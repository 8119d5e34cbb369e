//! Per-client session state and the per-frame poll.

use bitflags::bitflags;
use tracing::{debug, trace, warn};

use super::{zoomed_cell_size, Displays, Preset};
use crate::font::{CellMetrics, FontEngine};
use crate::net::Connection;
use crate::protocol::{
    decode_cells, Cell, NotifyKind, Packet, ReadError, ReadResult, CELL_SIZE, PACKET_SIZE,
};
use crate::utils::{Rectangle, Size};

/// Stable identity of a session; never reused within a process.
pub type SessionId = u32;

/// Consecutive protocol failures after which a session is retired.
pub const MAX_ERROR_COUNT: u32 = 100;

pub const MIN_ZOOM: f32 = 0.5;
pub const MAX_ZOOM: f32 = 3.0;

bitflags! {
    /// Dirty markers.
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
    pub struct Stain: u32 {
        /// Geometry changed since the last frame.
        const RESIZE = 1 << 0;
        /// The client announced shutdown.
        const CLOSED = 1 << 1;
    }
}

/// Receive progress of the framed protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecvState {
    /// Waiting for the next fixed-size header packet.
    Header,
    /// A `DRAW_BUFFER` header arrived; accumulating its payload. The cell
    /// count was fixed at header time so a stale-sized draw can be drained
    /// and dropped after a resize.
    Payload { cells: usize },
}

/// One connected client: its reverse connection, cell grid, preset, zoom
/// and failure accounting.
#[derive(Debug)]
pub struct Session {
    pub id: SessionId,
    pub connection: Connection,
    pub cells: Vec<Cell>,
    pub grid: Size,
    pub preset: Preset,
    pub previous_preset: Preset,
    pub display_id: u32,
    pub zoom: f32,
    pub error_count: u32,
    pub stains: Stain,
    pub custom_font: Option<FontEngine>,
    recv: RecvState,
}

impl Session {
    pub fn new(id: SessionId, connection: Connection, display_id: u32) -> Self {
        Session {
            id,
            connection,
            cells: Vec::new(),
            grid: Size::default(),
            preset: Preset::Fullscreen,
            previous_preset: Preset::Fullscreen,
            display_id,
            zoom: 1.0,
            error_count: 0,
            stains: Stain::empty(),
            custom_font: None,
            recv: RecvState::Header,
        }
    }

    /// A retired session is removed by the render loop's cleanup pass.
    pub fn retired(&self) -> bool {
        self.connection.is_closed()
            || self.stains.contains(Stain::CLOSED)
            || self.error_count > MAX_ERROR_COUNT
    }

    pub fn close(&mut self) {
        self.connection.close();
    }

    /// Changes the preset; returns whether it actually moved.
    pub fn set_preset(&mut self, preset: Preset) -> bool {
        if preset == self.preset {
            return false;
        }
        self.previous_preset = self.preset;
        self.preset = preset;
        self.stains |= Stain::RESIZE;
        true
    }

    pub fn set_zoom(&mut self, zoom: f32) {
        let clamped = zoom.clamp(MIN_ZOOM, MAX_ZOOM);
        if (clamped - self.zoom).abs() > f32::EPSILON {
            self.zoom = clamped;
            self.stains |= Stain::RESIZE;
        }
    }

    pub fn adjust_zoom(&mut self, delta: f32) {
        self.set_zoom(self.zoom + delta);
    }

    /// Flips between 1.0 and 1.5 regardless of the current value.
    pub fn toggle_zoom(&mut self) {
        let target = if (self.zoom - 1.0).abs() < 0.01 { 1.5 } else { 1.0 };
        self.set_zoom(target);
    }

    /// Pixel size of one of this session's cells.
    pub fn cell_pixel_size(&self, metrics: CellMetrics) -> Size {
        zoomed_cell_size(metrics, self.zoom)
    }

    /// The pixel rectangle the session occupies on its display.
    pub fn pixel_rect(&self, displays: &Displays) -> Rectangle {
        self.preset.pixel_rect(displays.resolution(self.display_id))
    }

    /// The grid the session should have right now, in cells.
    pub fn desired_grid(&self, displays: &Displays, metrics: CellMetrics) -> Size {
        let res = displays.resolution(self.display_id);
        self.preset.cell_rect(res, self.cell_pixel_size(metrics)).size
    }

    /// Tells the client its current size in cells.
    pub fn send_resize(&mut self, grid: Size) {
        let packet = Packet::Resize {
            width: grid.w as i16,
            height: grid.h as i16,
        };
        if let Err(err) = self.connection.send(&packet.encode()) {
            warn!(session = self.id, ?err, "failed to send resize");
            self.error_count += 1;
        }
    }

    fn on_read_error(&mut self, err: ReadError) {
        match err {
            ReadError::Closed => {
                // An observed close retires the session before the next
                // frame.
                debug!(session = self.id, "peer closed connection");
                self.error_count = MAX_ERROR_COUNT + 1;
                self.connection.close();
            }
            ReadError::Io(err) => {
                debug!(session = self.id, ?err, "receive error");
                self.error_count += 1;
            }
        }
    }

    /// Non-blocking per-frame poll: keeps the grid sized to the preset and
    /// consumes at most one packet (plus its payload).
    pub fn poll(&mut self, displays: &Displays, metrics: CellMetrics) {
        if self.connection.is_closed() {
            return;
        }
        if !self.connection.has_data() {
            return;
        }

        // Grid bookkeeping precedes the read: the expected payload size of
        // this frame's DRAW_BUFFER depends on it.
        let desired = self.desired_grid(displays, metrics);
        if desired != self.grid || self.cells.len() != desired.area() {
            trace!(
                session = self.id,
                from = ?self.grid,
                to = ?desired,
                "grid resized"
            );
            self.grid = desired;
            self.cells.clear();
            self.cells.resize(desired.area(), Cell::default());
            self.stains |= Stain::RESIZE;
            self.send_resize(desired);
        }

        if self.recv == RecvState::Header {
            let bytes = match self.connection.recv_frame(PACKET_SIZE) {
                ReadResult::Pending => return,
                ReadResult::Error(err) => return self.on_read_error(err),
                ReadResult::Complete(bytes) => bytes,
            };
            match Packet::decode(&bytes) {
                Err(err) => {
                    debug!(session = self.id, %err, "undecodable packet");
                    self.error_count += 1;
                    return;
                }
                Ok(Packet::Notify(NotifyKind::EmptyBuffer)) => {
                    self.error_count = 0;
                    return;
                }
                Ok(Packet::Notify(NotifyKind::Closed)) => {
                    debug!(session = self.id, "client announced shutdown");
                    self.stains |= Stain::CLOSED;
                    self.connection.close();
                    return;
                }
                Ok(Packet::DrawBuffer) => {
                    self.recv = RecvState::Payload {
                        cells: self.grid.area(),
                    };
                }
                Ok(Packet::Input(_)) | Ok(Packet::Resize { .. }) => {
                    // Out of channel in this direction; tolerated.
                    self.error_count = 0;
                    return;
                }
            }
        }

        if let RecvState::Payload { cells } = self.recv {
            match self.connection.recv_frame(cells * CELL_SIZE) {
                ReadResult::Pending => {}
                ReadResult::Error(err) => {
                    self.recv = RecvState::Header;
                    self.on_read_error(err);
                }
                ReadResult::Complete(bytes) => {
                    self.recv = RecvState::Header;
                    if cells == self.grid.area() {
                        decode_cells(&bytes, &mut self.cells);
                        self.error_count = 0;
                    } else {
                        // The grid moved between header and payload; the
                        // stale draw is drained and dropped.
                        debug!(session = self.id, "dropping stale-sized draw buffer");
                    }
                }
            }
        }
    }
}
