//! The adapter's view of kernel display resources.
//!
//! Objects are referenced by their raw kernel id; typed handles are
//! reconstructed at call sites. Every object carries a uniform property map
//! resolved at load time, so atomic requests can be validated by name before
//! submission.

use std::collections::HashMap;

use crate::utils::{Point, Size};

/// A display mode. Two modes are equal when width, height and refresh rate
/// match; name and flags are informational.
#[derive(Debug, Clone, Eq)]
pub struct Mode {
    pub width: u32,
    pub height: u32,
    pub refresh: u32,
    pub flags: u32,
    pub name: String,
    pub preferred: bool,
}

impl PartialEq for Mode {
    fn eq(&self, other: &Self) -> bool {
        self.width == other.width && self.height == other.height && self.refresh == other.refresh
    }
}

impl Mode {
    pub fn new(width: u32, height: u32, refresh: u32) -> Self {
        Mode {
            width,
            height,
            refresh,
            flags: 0,
            name: format!("{width}x{height}"),
            preferred: false,
        }
    }

    /// The synthetic substitute used when a connector offers no modes at
    /// all.
    pub fn fallback() -> Self {
        let mut mode = Mode::new(1920, 1080, 60);
        mode.preferred = true;
        mode
    }

    pub fn resolution(&self) -> Size {
        Size::new(self.width as i32, self.height as i32)
    }
}

/// Kind of a property value, mirroring the kernel's classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyKind {
    Range,
    Enum,
    Bitmask,
    Blob,
    Object,
}

/// A property attached to a connector, controller or plane.
#[derive(Debug, Clone)]
pub struct Property {
    pub id: u32,
    pub kind: PropertyKind,
    pub value: u64,
}

pub type PropertyMap = HashMap<String, Property>;

/// Physical connector type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectorKind {
    Unknown,
    Vga,
    DviI,
    DviD,
    DviA,
    Composite,
    SVideo,
    Lvds,
    Component,
    DisplayPort,
    HdmiA,
    HdmiB,
    Tv,
    Edp,
    Virtual,
    Dsi,
    Dpi,
    Writeback,
    Spi,
    Usb,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectorStatus {
    Connected,
    Disconnected,
    Unknown,
}

/// A physical display output port.
#[derive(Debug, Clone)]
pub struct Connector {
    pub id: u32,
    pub kind: ConnectorKind,
    pub status: ConnectorStatus,
    pub name: String,
    pub modes: Vec<Mode>,
    /// Index into `modes` of the kernel-preferred mode.
    pub preferred: Option<usize>,
    /// Encoders able to drive this connector.
    pub encoder_ids: Vec<u32>,
    /// The encoder currently bound, if any.
    pub current_encoder: Option<u32>,
    pub properties: PropertyMap,
}

impl Connector {
    pub fn is_connected(&self) -> bool {
        self.status == ConnectorStatus::Connected
    }

    /// The preferred mode, falling back to the first mode, falling back to
    /// the synthetic default for an empty list.
    pub fn preferred_mode(&self) -> Mode {
        self.preferred
            .and_then(|idx| self.modes.get(idx))
            .or_else(|| self.modes.first())
            .cloned()
            .unwrap_or_else(Mode::fallback)
    }

    /// A connector is usable when connected and its preferred mode resolves
    /// to a non-empty resolution.
    pub fn is_usable(&self) -> bool {
        self.is_connected() && !self.preferred_mode().resolution().is_empty()
    }
}

/// A display pipeline head.
#[derive(Debug, Clone)]
pub struct Crtc {
    pub id: u32,
    pub mode: Option<Mode>,
    /// Raw id of the currently bound framebuffer, a weak observation that
    /// does not extend the framebuffer's life.
    pub framebuffer: Option<u32>,
    pub plane_ids: Vec<u32>,
    pub properties: PropertyMap,
}

impl Crtc {
    pub fn in_use(&self) -> bool {
        self.mode.is_some()
    }
}

/// The pipeline stage between a controller and a connector.
#[derive(Debug, Clone)]
pub struct Encoder {
    pub id: u32,
    pub kind: String,
    /// Bitmask over the crtc index space of compatible controllers.
    pub possible_crtcs: u32,
    pub current_crtc: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaneKind {
    Primary,
    Cursor,
    Overlay,
}

/// A hardware composition layer.
#[derive(Debug, Clone)]
pub struct Plane {
    pub id: u32,
    pub kind: PlaneKind,
    pub crtc_id: Option<u32>,
    pub position: Point,
    pub size: Size,
    /// Supported pixel formats as fourcc codes.
    pub formats: Vec<u32>,
    pub framebuffer: Option<u32>,
    pub properties: PropertyMap,
}

/// Everything enumerated from the device, refreshable on hotplug.
#[derive(Debug, Default, Clone)]
pub struct Resources {
    pub connectors: Vec<Connector>,
    pub crtcs: Vec<Crtc>,
    pub encoders: Vec<Encoder>,
    pub planes: Vec<Plane>,
}

impl Resources {
    pub fn connector(&self, id: u32) -> Option<&Connector> {
        self.connectors.iter().find(|c| c.id == id)
    }

    pub fn connector_mut(&mut self, id: u32) -> Option<&mut Connector> {
        self.connectors.iter_mut().find(|c| c.id == id)
    }

    pub fn crtc(&self, id: u32) -> Option<&Crtc> {
        self.crtcs.iter().find(|c| c.id == id)
    }

    pub fn crtc_mut(&mut self, id: u32) -> Option<&mut Crtc> {
        self.crtcs.iter_mut().find(|c| c.id == id)
    }

    pub fn encoder(&self, id: u32) -> Option<&Encoder> {
        self.encoders.iter().find(|e| e.id == id)
    }

    pub fn encoder_mut(&mut self, id: u32) -> Option<&mut Encoder> {
        self.encoders.iter_mut().find(|e| e.id == id)
    }

    pub fn plane(&self, id: u32) -> Option<&Plane> {
        self.planes.iter().find(|p| p.id == id)
    }

    /// Connected connectors with a usable preferred mode.
    pub fn usable_connectors(&self) -> impl Iterator<Item = &Connector> {
        self.connectors.iter().filter(|c| c.is_usable())
    }

    /// First controller not currently driving a display.
    pub fn free_crtc(&self) -> Option<&Crtc> {
        self.crtcs.iter().find(|c| !c.in_use())
    }

    /// Looks up a property by name across the object id space; used to
    /// validate atomic requests.
    pub fn property_of(&self, object_id: u32, name: &str) -> Option<&Property> {
        if let Some(conn) = self.connector(object_id) {
            return conn.properties.get(name);
        }
        if let Some(crtc) = self.crtc(object_id) {
            return crtc.properties.get(name);
        }
        if let Some(plane) = self.plane(object_id) {
            return plane.properties.get(name);
        }
        None
    }

    /// Synthesizes the virtual single-output topology used when no device
    /// node exists.
    pub fn headless() -> Self {
        const LADDER: [(u32, u32); 8] = [
            (1920, 1080),
            (1680, 1050),
            (1600, 900),
            (1366, 768),
            (1280, 720),
            (1024, 768),
            (800, 600),
            (640, 480),
        ];
        let modes: Vec<Mode> = LADDER
            .iter()
            .enumerate()
            .map(|(i, &(w, h))| {
                let mut mode = Mode::new(w, h, 60);
                mode.preferred = i == 0;
                mode
            })
            .collect();

        Resources {
            connectors: vec![Connector {
                id: 1,
                kind: ConnectorKind::Virtual,
                status: ConnectorStatus::Connected,
                name: "Virtual-1".into(),
                modes,
                preferred: Some(0),
                encoder_ids: vec![1],
                current_encoder: None,
                properties: PropertyMap::new(),
            }],
            crtcs: vec![Crtc {
                id: 1,
                mode: None,
                framebuffer: None,
                plane_ids: vec![1],
                properties: PropertyMap::new(),
            }],
            encoders: vec![Encoder {
                id: 1,
                kind: "VIRTUAL".into(),
                possible_crtcs: 0x1,
                current_crtc: None,
            }],
            planes: vec![Plane {
                id: 1,
                kind: PlaneKind::Primary,
                crtc_id: Some(1),
                position: Point::new(0, 0),
                size: Size::new(1920, 1080),
                formats: vec![drm_fourcc::DrmFourcc::Xrgb8888 as u32],
                framebuffer: None,
                properties: PropertyMap::new(),
            }],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn modes_compare_by_geometry_and_refresh() {
        let mut named = Mode::new(1280, 720, 60);
        named.name = "720p".into();
        named.preferred = true;
        assert_eq!(named, Mode::new(1280, 720, 60));
        assert_ne!(named, Mode::new(1280, 720, 50));
        assert_ne!(named, Mode::new(1280, 800, 60));
    }

    #[test]
    fn preferred_mode_fallback_ladder() {
        let mut conn = Resources::headless().connectors.remove(0);
        assert_eq!(conn.preferred_mode(), Mode::new(1920, 1080, 60));

        // No preferred flag: first mode wins.
        conn.preferred = None;
        assert_eq!(conn.preferred_mode(), Mode::new(1920, 1080, 60));
        conn.modes.remove(0);
        assert_eq!(conn.preferred_mode(), Mode::new(1680, 1050, 60));

        // Empty list: synthetic 1920x1080@60.
        conn.modes.clear();
        let substitute = conn.preferred_mode();
        assert_eq!(substitute, Mode::new(1920, 1080, 60));
        assert_eq!(substitute.refresh, 60);
    }

    #[test]
    fn headless_topology_is_usable() {
        let res = Resources::headless();
        assert_eq!(res.usable_connectors().count(), 1);
        assert_eq!(res.crtcs.len(), 1);
        assert_eq!(res.encoders.len(), 1);
        assert_eq!(res.planes[0].kind, PlaneKind::Primary);
        assert!(res.free_crtc().is_some());
        let ladder = &res.connectors[0].modes;
        assert_eq!(ladder.first().map(|m| (m.width, m.height)), Some((1920, 1080)));
        assert_eq!(ladder.last().map(|m| (m.width, m.height)), Some((640, 480)));
    }
}
