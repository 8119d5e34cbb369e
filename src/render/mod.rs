//! The render loop.
//!
//! A single thread owns every GPU and mode-setting call. Each iteration
//! polls the sessions, composites their rasterized grids over the wallpaper
//! into the swapchain's back slot, and presents with a page flip. Flip
//! completions are drained non-blocking from the same thread, so only
//! explicit state crosses threads.

mod cell;
mod wallpaper;

pub use self::cell::{render_cell, rgba_to_xrgb, CellCache};
pub use self::wallpaper::Wallpaper;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tracing::{debug, info, info_span, warn};

use crate::backend::drm::{DrmDevice, Mode};
use crate::backend::gpu::{GpuContext, PendingFrame};
use crate::config::ConfigStore;
use crate::font::{CellMetrics, FontEngine, GlyphSource};
use crate::utils::{Point, Size};
use crate::window::{Session, SessionId, SessionManager, Stain};

/// How long an idle iteration sleeps.
const IDLE_FRAME: Duration = Duration::from_millis(16);

/// Interval of the throughput log line.
const THROUGHPUT_LOG: Duration = Duration::from_secs(5);

/// Pixel buffer a session's grid is rasterized into before it is blitted to
/// the back buffer.
#[derive(Debug, Default)]
struct SessionSurface {
    pixels: Vec<u32>,
    size: Size,
}

/// Rasterizes the session's cell grid into its surface, cell by cell, with
/// the single-slot cell cache.
fn rasterize_session(
    surface: &mut SessionSurface,
    session: &mut Session,
    global_font: Option<&mut FontEngine>,
    metrics: CellMetrics,
) {
    let cellpx = session.cell_pixel_size(metrics);
    let grid = session.grid;
    let window = Size::new(grid.w * cellpx.w, grid.h * cellpx.h);
    if surface.size != window {
        surface.size = window;
        surface.pixels.clear();
        surface.pixels.resize(window.area(), 0);
    }

    let zoom = session.zoom;
    let cells = &session.cells;
    let mut font: Option<&mut dyn GlyphSource> = match session.custom_font.as_mut() {
        Some(custom) => Some(custom),
        None => match global_font {
            Some(global) => Some(global),
            None => None,
        },
    };

    let mut cache = CellCache::new();
    for cy in 0..grid.h {
        for cx in 0..grid.w {
            let Some(cell) = cells.get((cy * grid.w + cx) as usize) else {
                continue;
            };
            let pixels = cache.pixels_for(
                cell,
                font.as_mut().map(|f| &mut **f as &mut dyn GlyphSource),
                cellpx,
                zoom,
            );
            blit(
                &mut surface.pixels,
                window,
                pixels,
                cellpx,
                Point::new(cx * cellpx.w, cy * cellpx.h),
            );
        }
    }
    session.stains.remove(Stain::RESIZE);
}

/// Copies `src` into `dst` at `origin`, clipped to the destination bounds.
fn blit(dst: &mut [u32], dst_size: Size, src: &[u32], src_size: Size, origin: Point) {
    if src_size.is_empty() || dst_size.is_empty() {
        return;
    }
    for sy in 0..src_size.h {
        let dy = origin.y + sy;
        if dy < 0 || dy >= dst_size.h {
            continue;
        }
        for sx in 0..src_size.w {
            let dx = origin.x + sx;
            if dx < 0 || dx >= dst_size.w {
                continue;
            }
            dst[(dy * dst_size.w + dx) as usize] = src[(sy * src_size.w + sx) as usize];
        }
    }
}

/// Owner of the display device, the swapchain and all per-session GPU
/// resources.
pub struct Renderer {
    device: DrmDevice,
    gpu: GpuContext,
    crtc_id: u32,
    resolution: Size,
    font: Option<FontEngine>,
    metrics: CellMetrics,
    surfaces: HashMap<SessionId, SessionSurface>,
    wallpaper: Wallpaper,
    /// Set after a failed flip submission; later frames use direct
    /// framebuffer updates on this controller.
    flip_broken: bool,
    /// Keeps the directly-bound framebuffer alive until replaced.
    direct_frame: Option<PendingFrame>,
    manager: Arc<SessionManager>,
    config: Arc<ConfigStore>,
}

impl Renderer {
    fn present(&mut self, frame: PendingFrame, presented: &mut u64) {
        if !self.flip_broken {
            match self
                .device
                .page_flip(self.crtc_id, frame.framebuffer.id(), u64::from(frame.framebuffer.id()))
            {
                Ok(()) => {
                    *presented += 1;
                    return;
                }
                Err(err) => {
                    warn!(?err, "page flip failed, falling back to direct updates");
                    self.flip_broken = true;
                }
            }
        }

        // Direct update path: bind, then release the frame slot right away
        // since no completion event will arrive. The previous direct frame
        // keeps its framebuffer alive until this one is bound.
        match self.device.set_framebuffer(self.crtc_id, frame.framebuffer.id()) {
            Ok(()) => {
                *presented += 1;
                self.gpu.release_frame(&frame);
                self.direct_frame = Some(frame);
            }
            Err(err) => {
                warn!(?err, "direct framebuffer update failed");
                self.gpu.release_frame(&frame);
            }
        }
    }

    /// One frame of the cycle described in the module docs. Returns whether
    /// anything was composited.
    fn frame(&mut self, presented: &mut u64) {
        let resolution = self.resolution;
        let wallpaper_changed = self
            .wallpaper
            .refresh(self.config.wallpaper_path(), resolution);

        let background = self.config.background_color();
        if let Err(err) = self.gpu.begin_frame(background) {
            warn!(?err, "no render target this frame");
            std::thread::sleep(IDLE_FRAME);
            return;
        }

        let mut frame_drawn = false;
        {
            let back = match self.gpu.back_pixels_mut() {
                Ok(back) => back,
                Err(err) => {
                    warn!(?err, "back buffer unavailable");
                    return;
                }
            };
            self.wallpaper.draw(back);

            let font = &mut self.font;
            let surfaces = &mut self.surfaces;
            let metrics = self.metrics;
            let displays = self.manager.displays();
            self.manager.with_sessions(|sessions| {
                sessions.sort_by_key(|session| session.preset.z());
                for session in sessions.iter_mut() {
                    session.poll(displays, metrics);
                    if session.retired() || session.cells.is_empty() {
                        continue;
                    }
                    let surface = surfaces.entry(session.id).or_default();
                    rasterize_session(surface, session, font.as_mut(), metrics);
                    let rect = session.pixel_rect(displays);
                    blit(back, resolution, &surface.pixels, surface.size, rect.pos);
                    frame_drawn = true;
                }
            });
        }

        // Collect retired sessions and the GPU resources they held.
        self.manager.cleanup_dead();
        let live: Vec<SessionId> = self
            .manager
            .with_sessions(|sessions| sessions.iter().map(|s| s.id).collect());
        self.surfaces.retain(|id, _| live.contains(id));

        // Sessions guard is released before touching the device, so the
        // listener and input threads can progress during the drain.
        match self.device.handle_events(0) {
            Ok(events) => {
                for _event in events {
                    self.gpu.on_page_flip_complete();
                }
            }
            Err(err) => warn!(?err, "event drain failed"),
        }

        if frame_drawn || wallpaper_changed || self.wallpaper.ready() {
            // One flip in flight at most: skip the swap entirely while the
            // previous frame awaits its completion.
            if self.gpu.pending_len() == 0 {
                match self.gpu.swap_buffers() {
                    Ok(frame) => self.present(frame, presented),
                    Err(err) => warn!(?err, "swap failed"),
                }
            }
        } else {
            std::thread::sleep(IDLE_FRAME);
        }
    }

    fn run(mut self, shutdown: Arc<AtomicBool>) {
        let span = info_span!("render");
        let _guard = span.enter();

        let mut presented: u64 = 0;
        let mut last_log = Instant::now();
        while !shutdown.load(Ordering::Relaxed) {
            self.frame(&mut presented);

            let elapsed = last_log.elapsed();
            if elapsed >= THROUGHPUT_LOG {
                debug!(
                    frames = presented,
                    seconds = elapsed.as_secs(),
                    "render throughput"
                );
                presented = 0;
                last_log = Instant::now();
            }
        }

        self.direct_frame.take();
        self.gpu.cleanup();
        debug!("render thread exiting");
    }

    /// Spawns the render thread: programs the mode, binds the swapchain and
    /// reports readiness through the returned channel before entering the
    /// loop.
    #[allow(clippy::too_many_arguments)]
    pub fn spawn(
        mut device: DrmDevice,
        connector_id: u32,
        mode: Mode,
        font: Option<FontEngine>,
        metrics: CellMetrics,
        manager: Arc<SessionManager>,
        config: Arc<ConfigStore>,
        shutdown: Arc<AtomicBool>,
    ) -> std::io::Result<(JoinHandle<()>, mpsc::Receiver<Result<(), String>>)> {
        let (ready_tx, ready_rx) = mpsc::channel();
        let handle = std::thread::Builder::new()
            .name("ggdirect-render".into())
            .spawn(move || {
                let crtc_id = match device.set_mode(connector_id, &mode) {
                    Ok(crtc_id) => crtc_id,
                    Err(err) => {
                        let _ = ready_tx.send(Err(format!("mode set failed: {err}")));
                        return;
                    }
                };
                let gpu = match GpuContext::initialize(&device, &mode) {
                    Ok(gpu) => gpu,
                    Err(err) => {
                        let _ = ready_tx.send(Err(format!("gpu init failed: {err}")));
                        return;
                    }
                };
                info!(
                    connector = connector_id,
                    crtc = crtc_id,
                    "render pipeline ready"
                );
                let renderer = Renderer {
                    resolution: mode.resolution(),
                    device,
                    gpu,
                    crtc_id,
                    font,
                    metrics,
                    surfaces: HashMap::new(),
                    wallpaper: Wallpaper::new(),
                    flip_broken: false,
                    direct_frame: None,
                    manager,
                    config,
                };
                let _ = ready_tx.send(Ok(()));
                renderer.run(shutdown);
            })?;
        Ok((handle, ready_rx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blit_clips_to_destination() {
        let dst_size = Size::new(4, 4);
        let mut dst = vec![0u32; dst_size.area()];
        let src = vec![9u32; 4];

        blit(&mut dst, dst_size, &src, Size::new(2, 2), Point::new(3, 3));
        // Only the top-left source pixel lands inside.
        assert_eq!(dst[15], 9);
        assert_eq!(dst.iter().filter(|&&p| p == 9).count(), 1);

        blit(&mut dst, dst_size, &src, Size::new(2, 2), Point::new(-1, -1));
        assert_eq!(dst[0], 9);
    }

    #[test]
    fn rasterized_sessions_land_at_their_preset_rect() {
        use crate::net::Connection;
        use crate::protocol::{pack_rgba, Cell, Rgb};
        use crate::utils::Rectangle;
        use crate::window::{DisplayInfo, Displays, Preset};
        use std::net::{Ipv4Addr, TcpListener, TcpStream};

        let metrics = CellMetrics { width: 2, height: 2 };
        let displays = Displays::new(
            0,
            [DisplayInfo {
                id: 0,
                resolution: Size::new(8, 4),
            }],
        );

        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let _client = TcpStream::connect((Ipv4Addr::LOCALHOST, listener.local_addr().unwrap().port()))
            .unwrap();
        let (stream, _) = listener.accept().unwrap();
        let mut session = Session::new(1, Connection::from_stream(stream).unwrap(), 0);

        // A LEFT session on an 8x4 display with 2x2 cells: 2x2 cells of
        // solid red background.
        session.set_preset(Preset::Left);
        session.grid = Size::new(2, 2);
        session.cells = vec![Cell::new(b" ", Rgb::default(), pack_rgba(255, 0, 0, 255)); 4];

        let mut surface = SessionSurface::default();
        rasterize_session(&mut surface, &mut session, None, metrics);
        assert_eq!(surface.size, Size::new(4, 4));
        assert!(surface.pixels.iter().all(|&p| p == 0x00ff_0000));

        let screen = Size::new(8, 4);
        let mut back = vec![0u32; screen.area()];
        let rect = session.pixel_rect(&displays);
        assert_eq!(rect, Rectangle::new(0, 0, 4, 4));
        blit(&mut back, screen, &surface.pixels, surface.size, rect.pos);

        // Left half painted, right half untouched.
        assert!(back
            .iter()
            .enumerate()
            .all(|(i, &p)| if (i % 8) < 4 { p == 0x00ff_0000 } else { p == 0 }));
    }
}
