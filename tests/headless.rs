//! Headless startup: with no display hardware the adapter synthesizes a
//! virtual output and the whole frame lifecycle still runs, including glyph
//! rasterization and flip accounting.

use ggdirect::backend::drm::DrmDevice;
use ggdirect::backend::gpu::GpuContext;
use ggdirect::font::{CellMetrics, Glyph, GlyphSource};
use ggdirect::protocol::{pack_rgba, Cell, Rgb};
use ggdirect::render::render_cell;
use ggdirect::utils::Size;

/// A stand-in glyph source: every codepoint is a solid 4x4 block.
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
            width: 8,
            height: 16,
        }
    }
}

#[test]
fn headless_adapter_presents_frames() {
    let mut device = DrmDevice::open_headless();
    assert!(device.is_headless());

    let connector = &device.resources().connectors[0];
    assert!(connector.is_usable());
    let connector_id = connector.id;
    let mode = connector.preferred_mode();
    assert_eq!((mode.width, mode.height), (1920, 1080));

    let crtc_id = device.set_mode(connector_id, &mode).unwrap();
    let mut gpu = GpuContext::initialize(&device, &mode).unwrap();
    assert_eq!(gpu.size(), Size::new(1920, 1080));

    // Three frames with the one-flip-in-flight discipline.
    for frame_index in 0..3u32 {
        gpu.begin_frame(0x0000_0000).unwrap();

        // Rasterize a white-on-black cell and splat it into the corner of
        // the back buffer, proving the CPU path runs end to end.
        let mut source = BlockSource::new();
        let cell = Cell::new(b"A", Rgb::new(255, 255, 255), pack_rgba(0, 0, 0, 255));
        let cell_size = Size::new(8, 16);
        let mut pixels = vec![0u32; cell_size.area()];
        render_cell(&cell, Some(&mut source), &mut pixels, cell_size, 1.0);
        assert_eq!(pixels.iter().filter(|&&p| p == 0x00ff_ffff).count(), 16);

        let back = gpu.back_pixels_mut().unwrap();
        for y in 0..cell_size.h {
            for x in 0..cell_size.w {
                back[(y * 1920 + x) as usize] = pixels[(y * cell_size.w + x) as usize];
            }
        }

        assert_eq!(gpu.pending_len(), 0);
        let frame = gpu.swap_buffers().unwrap();
        device
            .page_flip(crtc_id, frame.framebuffer.id(), u64::from(frame_index))
            .unwrap();
        assert_eq!(gpu.pending_len(), 1);

        let events = device.handle_events(0).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].user_data, u64::from(frame_index));
        for _ in &events {
            gpu.on_page_flip_complete();
        }
        assert_eq!(gpu.pending_len(), 0);
    }

    gpu.cleanup();
    assert_eq!(gpu.framebuffers_created(), 3);
    assert_eq!(gpu.framebuffers_destroyed(), 3);
}
