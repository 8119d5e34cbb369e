//! Per-cell rasterization: foreground glyph coverage blended over the cell
//! background.

use crate::font::GlyphSource;
use crate::protocol::Cell;
use crate::utils::Size;

/// Converts the wire background (packed RGBA, r in the low byte) to the
/// scanout XRGB layout.
pub fn rgba_to_xrgb(bg: u32) -> u32 {
    let r = bg & 0xff;
    let g = (bg >> 8) & 0xff;
    let b = (bg >> 16) & 0xff;
    (r << 16) | (g << 8) | b
}

fn blend(dst: u32, fg: (u8, u8, u8), alpha: u8) -> u32 {
    let a = alpha as f32 / 255.0;
    let inv = 1.0 - a;
    let channel = |fg: u8, dst: u32| -> u32 {
        (fg as f32 * a + ((dst & 0xff) as f32) * inv) as u32 & 0xff
    };
    let r = channel(fg.0, dst >> 16);
    let g = channel(fg.1, dst >> 8);
    let b = channel(fg.2, dst);
    (r << 16) | (g << 8) | b
}

/// Rasterizes one cell into `out` (`cell.w × cell.h` XRGB pixels).
///
/// The glyph is horizontally centered; its baseline sits at 0.8 of the cell
/// height, clamped so the scaled bitmap stays inside the cell. Scaling is
/// nearest-neighbour.
pub fn render_cell(
    cell: &Cell,
    font: Option<&mut dyn GlyphSource>,
    out: &mut [u32],
    size: Size,
    zoom: f32,
) {
    out.fill(rgba_to_xrgb(cell.bg));

    let Some(codepoint) = cell.codepoint() else {
        return;
    };
    if codepoint == ' ' {
        return;
    }
    let Some(font) = font else {
        return;
    };
    let glyph = font.glyph(codepoint);
    if glyph.is_empty() {
        return;
    }

    let cell_w = size.w;
    let cell_h = size.h;
    let scaled_w = (glyph.width as f32 * zoom) as i32;
    let scaled_h = (glyph.height as f32 * zoom) as i32;
    if scaled_w <= 0 || scaled_h <= 0 {
        return;
    }

    let mut start_x = (cell_w - scaled_w) / 2;
    let mut start_y = (cell_h as f32 * 0.8 - glyph.bearing_y as f32 * zoom) as i32;
    start_x = start_x.clamp(0, (cell_w - scaled_w).max(0));
    start_y = start_y.clamp(0, (cell_h - scaled_h).max(0));

    let fg = (cell.fg.r, cell.fg.g, cell.fg.b);
    for y in 0..scaled_h {
        let dst_y = start_y + y;
        if dst_y >= cell_h {
            break;
        }
        let src_y = (y as f32 / zoom) as i32;
        if src_y >= glyph.height {
            continue;
        }
        for x in 0..scaled_w {
            let dst_x = start_x + x;
            if dst_x >= cell_w {
                break;
            }
            let src_x = (x as f32 / zoom) as i32;
            if src_x >= glyph.width {
                continue;
            }
            let alpha = glyph.bitmap[(src_y * glyph.width + src_x) as usize];
            if alpha == 0 {
                continue;
            }
            let index = (dst_y * cell_w + dst_x) as usize;
            out[index] = blend(out[index], fg, alpha);
        }
    }
}

/// Single-slot cache of the most recently rasterized cell, keyed by value
/// equality. Text grids are dominated by runs of identical cells, so each
/// run rasterizes once per frame.
#[derive(Debug, Default)]
pub struct CellCache {
    key: Option<Cell>,
    size: Size,
    pub pixels: Vec<u32>,
}

impl CellCache {
    pub fn new() -> Self {
        CellCache::default()
    }

    /// Returns pixels for `cell`, rasterizing only when the key or the
    /// geometry changed.
    pub fn pixels_for(
        &mut self,
        cell: &Cell,
        font: Option<&mut dyn GlyphSource>,
        size: Size,
        zoom: f32,
    ) -> &[u32] {
        if self.key.as_ref() != Some(cell) || self.size != size {
            self.pixels.resize(size.area(), 0);
            render_cell(cell, font, &mut self.pixels, size, zoom);
            self.key = Some(*cell);
            self.size = size;
        }
        &self.pixels
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::font::{CellMetrics, Glyph};
    use crate::protocol::{pack_rgba, Rgb};

    /// A deterministic glyph source: every codepoint renders as a fully
    /// covered 4x4 square sitting on the baseline.
    struct BlockSource {
        glyph: Glyph,
    }

    impl BlockSource {
        fn new() -> Self {
            BlockSource {
                glyph: Glyph {
                    width: 4,
                    height: 4,
                    bearing_x: 0,
                    bearing_y: 4,
                    advance: 4,
                    bitmap: vec![255; 16],
                },
            }
        }
    }

    impl GlyphSource for BlockSource {
        fn glyph(&mut self, _codepoint: char) -> &Glyph {
            &self.glyph
        }

        fn metrics(&self) -> CellMetrics {
            CellMetrics {
                width: 6,
                height: 8,
            }
        }
    }

    const SIZE: Size = Size { w: 6, h: 8 };

    fn white_on_black() -> Cell {
        Cell::new(b"A", Rgb::new(255, 255, 255), pack_rgba(0, 0, 0, 255))
    }

    #[test]
    fn background_conversion_swaps_red_and_blue() {
        assert_eq!(rgba_to_xrgb(pack_rgba(0x11, 0x22, 0x33, 0xff)), 0x0011_2233);
        assert_eq!(rgba_to_xrgb(pack_rgba(255, 0, 0, 255)), 0x00ff_0000);
    }

    #[test]
    fn empty_and_space_cells_are_background_only() {
        let mut source = BlockSource::new();
        let mut out = vec![0u32; SIZE.area()];
        let bg = pack_rgba(10, 20, 30, 255);

        render_cell(
            &Cell::new(b" ", Rgb::new(255, 255, 255), bg),
            Some(&mut source),
            &mut out,
            SIZE,
            1.0,
        );
        assert!(out.iter().all(|&p| p == 0x000a_141e));

        render_cell(
            &Cell::new(b"", Rgb::new(255, 255, 255), bg),
            Some(&mut source),
            &mut out,
            SIZE,
            1.0,
        );
        assert!(out.iter().all(|&p| p == 0x000a_141e));
    }

    #[test]
    fn full_coverage_paints_pure_foreground() {
        let mut source = BlockSource::new();
        let mut out = vec![0u32; SIZE.area()];
        render_cell(&white_on_black(), Some(&mut source), &mut out, SIZE, 1.0);

        // The 4x4 block is centered: start_x = (6-4)/2 = 1; baseline math
        // puts start_y at 8*0.8-4 = 2 (within bounds).
        let white = 0x00ff_ffff;
        assert_eq!(out[2 * 6 + 1], white);
        assert_eq!(out[5 * 6 + 4], white);
        // Corners outside the block stay background.
        assert_eq!(out[0], 0);
        assert_eq!(out[7 * 6 + 5], 0);
        assert_eq!(out.iter().filter(|&&p| p == white).count(), 16);
    }

    #[test]
    fn partial_coverage_blends_linearly() {
        struct HalfSource(Glyph);
        impl GlyphSource for HalfSource {
            fn glyph(&mut self, _c: char) -> &Glyph {
                &self.0
            }
            fn metrics(&self) -> CellMetrics {
                CellMetrics {
                    width: 6,
                    height: 8,
                }
            }
        }
        let mut source = HalfSource(Glyph {
            width: 1,
            height: 1,
            bearing_x: 0,
            bearing_y: 1,
            advance: 1,
            bitmap: vec![128],
        });

        let mut out = vec![0u32; SIZE.area()];
        let cell = Cell::new(b"x", Rgb::new(255, 255, 255), pack_rgba(0, 0, 0, 255));
        render_cell(&cell, Some(&mut source), &mut out, SIZE, 1.0);

        let blended = out.iter().find(|&&p| p != 0).copied().unwrap();
        // 255 * 128/255 = 128 on every channel.
        assert_eq!(blended, 0x0080_8080);
    }

    #[test]
    fn zoom_scales_by_nearest_neighbour() {
        let mut source = BlockSource::new();
        let size = Size::new(12, 16);
        let mut out = vec![0u32; size.area()];
        render_cell(&white_on_black(), Some(&mut source), &mut out, size, 2.0);

        // The block is 8x8 at zoom 2.
        let white = 0x00ff_ffff;
        assert_eq!(out.iter().filter(|&&p| p == white).count(), 64);
    }

    #[test]
    fn cache_rerenders_only_on_key_change(){
        let mut source = BlockSource::new();
        let mut cache = CellCache::new();
        let cell = white_on_black();

        let first = cache.pixels_for(&cell, Some(&mut source), SIZE, 1.0).to_vec();
        let second = cache.pixels_for(&cell, Some(&mut source), SIZE, 1.0).to_vec();
        assert_eq!(first, second);

        let other = Cell::new(b"A", Rgb::new(255, 0, 0), pack_rgba(0, 0, 0, 255));
        let third = cache.pixels_for(&other, Some(&mut source), SIZE, 1.0).to_vec();
        assert_ne!(first, third);
    }

    #[test]
    fn without_a_font_only_background_renders() {
        let mut out = vec![0u32; SIZE.area()];
        render_cell(&white_on_black(), None, &mut out, SIZE, 1.0);
        assert!(out.iter().all(|&p| p == 0));
    }
}
