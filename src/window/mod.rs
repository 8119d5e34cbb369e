//! Client windows: position presets, per-client sessions and the session
//! manager.
//!
//! Windows have no free-form geometry. Each session occupies one of five
//! presets of its display, fullscreen or a half anchored to an edge, and
//! the preset together with the display resolution and the zoomed cell size
//! fully determines both the pixel rectangle and the cell grid.

mod manager;
mod session;

pub use self::manager::SessionManager;
pub use self::session::{Session, SessionId, Stain, MAX_ERROR_COUNT};

use std::collections::HashMap;

use crate::font::CellMetrics;
use crate::utils::{Guard, Rectangle, Size};

/// The allowed window geometries.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum Preset {
    #[default]
    Fullscreen,
    Left,
    Right,
    Top,
    Bottom,
}

impl Preset {
    /// Draw order; higher draws later. Halves stack above fullscreen
    /// windows.
    pub fn z(self) -> i32 {
        match self {
            Preset::Fullscreen => 0,
            _ => 1,
        }
    }

    /// The pixel rectangle this preset occupies on a display of `res`.
    pub fn pixel_rect(self, res: Size) -> Rectangle {
        let (w, h) = (res.w, res.h);
        match self {
            Preset::Fullscreen => Rectangle::new(0, 0, w, h),
            Preset::Left => Rectangle::new(0, 0, w / 2, h),
            Preset::Right => Rectangle::new(w / 2, 0, w / 2, h),
            Preset::Top => Rectangle::new(0, 0, w, h / 2),
            Preset::Bottom => Rectangle::new(0, h / 2, w, h / 2),
        }
    }

    /// The same rectangle in cells, for a given per-cell pixel size.
    pub fn cell_rect(self, res: Size, cell: Size) -> Rectangle {
        let pixels = self.pixel_rect(res);
        if cell.is_empty() {
            return Rectangle::new(0, 0, 80, 24);
        }
        Rectangle {
            pos: crate::utils::Point::new(pixels.pos.x / cell.w, pixels.pos.y / cell.h),
            size: Size::new(pixels.size.w / cell.w, pixels.size.h / cell.h),
        }
    }
}

/// Pixel size of one cell at `zoom`, never degenerate.
pub fn zoomed_cell_size(metrics: CellMetrics, zoom: f32) -> Size {
    Size::new(
        ((metrics.width as f32 * zoom) as i32).max(1),
        ((metrics.height as f32 * zoom) as i32).max(1),
    )
}

/// One display the compositor can place windows on.
#[derive(Debug, Clone)]
pub struct DisplayInfo {
    pub id: u32,
    pub resolution: Size,
}

#[derive(Debug, Default)]
struct DisplayState {
    map: HashMap<u32, DisplayInfo>,
    primary: u32,
}

/// The cross-thread view of active displays, keyed by connector identity.
/// Populated at startup from the adapter and updated on hotplug.
#[derive(Debug, Default)]
pub struct Displays {
    inner: Guard<DisplayState>,
}

impl Displays {
    pub fn new(primary: u32, infos: impl IntoIterator<Item = DisplayInfo>) -> Self {
        let mut map = HashMap::new();
        for info in infos {
            map.insert(info.id, info);
        }
        Displays {
            inner: Guard::new(DisplayState { map, primary }),
        }
    }

    pub fn primary_id(&self) -> u32 {
        self.inner.with(|s| s.primary)
    }

    pub fn contains(&self, id: u32) -> bool {
        self.inner.with(|s| s.map.contains_key(&id))
    }

    /// Display ids in stable ascending order.
    pub fn ids(&self) -> Vec<u32> {
        self.inner.with(|s| {
            let mut ids: Vec<u32> = s.map.keys().copied().collect();
            ids.sort_unstable();
            ids
        })
    }

    /// Resolution of `id`, falling back to the primary display, falling
    /// back to a small default when no display is active at all.
    pub fn resolution(&self, id: u32) -> Size {
        self.inner.with(|s| {
            s.map
                .get(&id)
                .or_else(|| s.map.get(&s.primary))
                .map(|info| info.resolution)
                .unwrap_or(Size::new(800, 600))
        })
    }

    pub fn insert(&self, info: DisplayInfo) {
        self.inner.with(|s| {
            s.map.insert(info.id, info.clone());
        });
    }

    pub fn remove(&self, id: u32) {
        self.inner.with(|s| {
            s.map.remove(&id);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preset_rect_math() {
        let res = Size::new(1920, 1080);
        assert_eq!(Preset::Fullscreen.pixel_rect(res), Rectangle::new(0, 0, 1920, 1080));
        assert_eq!(Preset::Left.pixel_rect(res), Rectangle::new(0, 0, 960, 1080));
        assert_eq!(Preset::Right.pixel_rect(res), Rectangle::new(960, 0, 960, 1080));
        assert_eq!(Preset::Top.pixel_rect(res), Rectangle::new(0, 0, 1920, 540));
        assert_eq!(Preset::Bottom.pixel_rect(res), Rectangle::new(0, 540, 1920, 540));
    }

    #[test]
    fn cell_rect_scales_with_zoom() {
        let res = Size::new(1920, 1080);
        let metrics = CellMetrics {
            width: 8,
            height: 16,
        };
        let base = Preset::Fullscreen.cell_rect(res, zoomed_cell_size(metrics, 1.0));
        assert_eq!(base.size, Size::new(240, 67));

        let zoomed = Preset::Fullscreen.cell_rect(res, zoomed_cell_size(metrics, 2.0));
        assert_eq!(zoomed.size, Size::new(120, 33));

        let half = Preset::Left.cell_rect(res, zoomed_cell_size(metrics, 1.0));
        assert_eq!(half.size, Size::new(120, 67));
    }

    #[test]
    fn halves_draw_above_fullscreen() {
        assert!(Preset::Left.z() > Preset::Fullscreen.z());
        assert_eq!(Preset::Left.z(), Preset::Bottom.z());
    }

    #[test]
    fn displays_fall_back_to_primary() {
        let displays = Displays::new(
            7,
            [DisplayInfo {
                id: 7,
                resolution: Size::new(1280, 720),
            }],
        );
        assert_eq!(displays.resolution(7), Size::new(1280, 720));
        assert_eq!(displays.resolution(99), Size::new(1280, 720));
        assert_eq!(Displays::default().resolution(0), Size::new(800, 600));
    }
}
