//! The GPU context: a double-buffered swapchain bound to the primary
//! controller's mode.
//!
//! Slots are GBM buffer objects with scanout usage, written by the CPU
//! compositor through a staging buffer and wrapped as kernel framebuffers at
//! swap time. In headless mode the slots are plain memory and framebuffer
//! ids are synthesized, so the whole frame lifecycle still runs.
//!
//! The pending-frame FIFO tracks flips in flight: its length always equals
//! frames presented minus completions received, and the render loop keeps it
//! at most 1 by skipping the swap while a flip is pending.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use drm::control::{Device as ControlDevice, FbCmd2Flags};
use gbm::{BufferObject, BufferObjectFlags, Format as GbmFormat};
use thiserror::Error;
use tracing::{debug, info, trace, warn};

use super::drm::{DrmDevice, DrmDeviceFd, Mode};
use crate::utils::Size;

#[derive(Debug, Error)]
pub enum Error {
    #[error("no back buffer; begin_frame was not called")]
    NoBackBuffer,
    #[error("all slots are busy; a flip must retire first")]
    NoFreeSlot,
    #[error("failed to create gbm device: {0}")]
    GbmDevice(std::io::Error),
    #[error("failed to allocate buffer object: {0}")]
    Allocate(std::io::Error),
    #[error("failed to map buffer object: {0}")]
    Map(String),
    #[error("failed to register framebuffer: {0}")]
    AddFramebuffer(std::io::Error),
}

#[derive(Debug)]
struct FramebufferInner {
    id: u32,
    fd: Option<DrmDeviceFd>,
    destroyed: Arc<AtomicUsize>,
}

impl Drop for FramebufferInner {
    fn drop(&mut self) {
        trace!(fb = self.id, "releasing scanout framebuffer");
        if let Some(fd) = &self.fd {
            if let Ok(handle) = super::drm::fb_handle(self.id) {
                if let Err(err) = fd.destroy_framebuffer(handle) {
                    warn!(fb = self.id, ?err, "failed to destroy framebuffer");
                }
            }
        }
        self.destroyed.fetch_add(1, Ordering::Relaxed);
    }
}

/// A scanout framebuffer jointly held by the pending queue and the
/// controller binding; the kernel object is removed when the last clone
/// drops.
#[derive(Debug, Clone)]
pub struct ScanoutFramebuffer(Arc<FramebufferInner>);

impl ScanoutFramebuffer {
    pub fn id(&self) -> u32 {
        self.0.id
    }
}

/// A frame handed to presentation: the slot it was composited into and the
/// framebuffer wrapping it.
#[derive(Debug, Clone)]
pub struct PendingFrame {
    slot: usize,
    pub framebuffer: ScanoutFramebuffer,
}

struct Slot {
    /// CPU-side pixels in XRGB8888, tightly packed at `width` stride.
    staging: Vec<u32>,
    bo: Option<BufferObject<()>>,
}

impl std::fmt::Debug for Slot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Slot")
            .field("staging_len", &self.staging.len())
            .field("has_bo", &self.bo.is_some())
            .finish()
    }
}

enum Backing {
    Gbm {
        device: gbm::Device<DrmDeviceFd>,
        drm: DrmDeviceFd,
    },
    Memory {
        next_fake_fb: u32,
    },
}

impl std::fmt::Debug for Backing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Backing::Gbm { .. } => f.write_str("Backing::Gbm"),
            Backing::Memory { .. } => f.write_str("Backing::Memory"),
        }
    }
}

/// See the module documentation.
#[derive(Debug)]
pub struct GpuContext {
    backing: Backing,
    size: Size,
    slots: Vec<Slot>,
    free: Vec<usize>,
    back: Option<usize>,
    pending: VecDeque<PendingFrame>,
    fb_created: usize,
    fb_destroyed: Arc<AtomicUsize>,
}

impl GpuContext {
    /// Binds a swapchain to `mode`. On hardware the slots are GBM buffer
    /// objects with scanout usage; headless devices get memory slots.
    pub fn initialize(device: &DrmDevice, mode: &Mode) -> Result<Self, Error> {
        let size = mode.resolution();
        let pixels = size.area();

        let (backing, slots) = match device.device_fd() {
            Some(drm) => {
                let gbm = gbm::Device::new(drm.clone()).map_err(Error::GbmDevice)?;
                let mut slots = Vec::with_capacity(2);
                for _ in 0..2 {
                    let bo = gbm
                        .create_buffer_object::<()>(
                            mode.width,
                            mode.height,
                            GbmFormat::Xrgb8888,
                            BufferObjectFlags::SCANOUT | BufferObjectFlags::LINEAR,
                        )
                        .map_err(Error::Allocate)?;
                    slots.push(Slot {
                        staging: vec![0u32; pixels],
                        bo: Some(bo),
                    });
                }
                info!(width = mode.width, height = mode.height, "gbm swapchain created");
                (Backing::Gbm { device: gbm, drm }, slots)
            }
            None => {
                debug!("headless swapchain: memory slots");
                let slots = (0..2)
                    .map(|_| Slot {
                        staging: vec![0u32; pixels],
                        bo: None,
                    })
                    .collect();
                (Backing::Memory { next_fake_fb: 0 }, slots)
            }
        };

        Ok(GpuContext {
            backing,
            size,
            slots,
            free: vec![0, 1],
            back: None,
            pending: VecDeque::new(),
            fb_created: 0,
            fb_destroyed: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub fn size(&self) -> Size {
        self.size
    }

    /// Frames presented but not yet retired by a flip completion.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Framebuffers wrapped so far; for lifecycle accounting.
    pub fn framebuffers_created(&self) -> usize {
        self.fb_created
    }

    /// Framebuffers released so far; for lifecycle accounting.
    pub fn framebuffers_destroyed(&self) -> usize {
        self.fb_destroyed.load(Ordering::Relaxed)
    }

    /// Picks a free slot as the frame's render target and clears it.
    pub fn begin_frame(&mut self, clear_color: u32) -> Result<(), Error> {
        let slot = match self.back {
            Some(slot) => slot,
            None => {
                let slot = self.free.pop().ok_or(Error::NoFreeSlot)?;
                self.back = Some(slot);
                slot
            }
        };
        self.slots[slot].staging.fill(clear_color);
        Ok(())
    }

    /// The back buffer pixels, XRGB8888 at a `width` stride.
    pub fn back_pixels_mut(&mut self) -> Result<&mut [u32], Error> {
        let slot = self.back.ok_or(Error::NoBackBuffer)?;
        Ok(&mut self.slots[slot].staging)
    }

    /// Seals the back buffer: uploads it to its buffer object, wraps that as
    /// a kernel framebuffer and pushes the frame onto the pending queue.
    pub fn swap_buffers(&mut self) -> Result<PendingFrame, Error> {
        let slot_index = self.back.take().ok_or(Error::NoBackBuffer)?;
        let size = self.size;

        let fb_id = match &mut self.backing {
            Backing::Memory { next_fake_fb } => {
                *next_fake_fb += 1;
                *next_fake_fb
            }
            Backing::Gbm { device, drm } => {
                let slot = &mut self.slots[slot_index];
                let staging = &slot.staging;
                let bo = slot.bo.as_mut().ok_or(Error::NoBackBuffer)?;
                upload_staging(bo, device, staging, size)?;
                let fb = add_framebuffer(drm, bo)?;
                fb
            }
        };

        let framebuffer = ScanoutFramebuffer(Arc::new(FramebufferInner {
            id: fb_id,
            fd: match &self.backing {
                Backing::Gbm { drm, .. } => Some(drm.clone()),
                Backing::Memory { .. } => None,
            },
            destroyed: self.fb_destroyed.clone(),
        }));
        self.fb_created += 1;

        let frame = PendingFrame {
            slot: slot_index,
            framebuffer,
        };
        self.pending.push_back(frame.clone());
        trace!(fb = frame.framebuffer.id(), slot = slot_index, "frame sealed");
        Ok(frame)
    }

    /// Retires the oldest pending frame after its flip completed.
    pub fn on_page_flip_complete(&mut self) {
        if let Some(frame) = self.pending.pop_front() {
            trace!(fb = frame.framebuffer.id(), "flip retired");
            self.free.push(frame.slot);
        }
    }

    /// Releases a frame early, e.g. when flip submission failed.
    pub fn release_frame(&mut self, frame: &PendingFrame) {
        if let Some(pos) = self
            .pending
            .iter()
            .position(|p| p.framebuffer.id() == frame.framebuffer.id())
        {
            let released = self.pending.remove(pos);
            if let Some(released) = released {
                self.free.push(released.slot);
            }
        }
    }

    /// Drains the pending queue and drops the slots.
    pub fn cleanup(&mut self) {
        while let Some(frame) = self.pending.pop_front() {
            self.free.push(frame.slot);
        }
        self.back = None;
    }
}

fn upload_staging(
    bo: &mut BufferObject<()>,
    device: &gbm::Device<DrmDeviceFd>,
    staging: &[u32],
    size: Size,
) -> Result<(), Error> {
    let width = size.w as usize;
    let height = size.h as usize;
    let result = bo.map_mut(device, 0, 0, size.w as u32, size.h as u32, |mapping| {
        let stride = mapping.stride() as usize;
        let buffer = mapping.buffer_mut();
        for y in 0..height {
            let src = &staging[y * width..(y + 1) * width];
            let dst = &mut buffer[y * stride..y * stride + width * 4];
            for (x, pixel) in src.iter().enumerate() {
                dst[x * 4..x * 4 + 4].copy_from_slice(&pixel.to_ne_bytes());
            }
        }
    });
    match result {
        Ok(Ok(())) => Ok(()),
        Ok(Err(err)) => Err(Error::Map(err.to_string())),
        Err(err) => Err(Error::Map(err.to_string())),
    }
}

fn add_framebuffer(drm: &DrmDeviceFd, bo: &BufferObject<()>) -> Result<u32, Error> {
    // Prefer the planar API; older drivers only speak the legacy call.
    let handle = match drm.add_planar_framebuffer(bo, FbCmd2Flags::empty()) {
        Ok(handle) => handle,
        Err(_) => drm
            .add_framebuffer(bo, 24, 32)
            .map_err(Error::AddFramebuffer)?,
    };
    Ok(super::drm::raw_fb_id(handle))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::drm::DrmDevice;

    fn headless_context() -> (DrmDevice, GpuContext) {
        let device = DrmDevice::open_headless();
        let mode = device.resources().connectors[0].preferred_mode();
        let gpu = GpuContext::initialize(&device, &mode).unwrap();
        (device, gpu)
    }

    #[test]
    fn pending_queue_never_exceeds_one_under_flip_discipline() {
        let (mut device, mut gpu) = headless_context();

        for _ in 0..8 {
            gpu.begin_frame(0).unwrap();
            // The render loop only swaps when no flip is pending.
            if gpu.pending_len() == 0 {
                let frame = gpu.swap_buffers().unwrap();
                device.page_flip(1, frame.framebuffer.id(), 0).unwrap();
                drop(frame);
            }
            assert!(gpu.pending_len() <= 1);

            for _ in device.handle_events(0).unwrap() {
                gpu.on_page_flip_complete();
            }
            assert_eq!(gpu.pending_len(), 0);
        }
    }

    #[test]
    fn framebuffers_are_destroyed_exactly_once() {
        let (mut device, mut gpu) = headless_context();

        for _ in 0..5 {
            gpu.begin_frame(0).unwrap();
            let frame = gpu.swap_buffers().unwrap();
            device.page_flip(1, frame.framebuffer.id(), 0).unwrap();
            drop(frame);
            for _ in device.handle_events(0).unwrap() {
                gpu.on_page_flip_complete();
            }
        }
        gpu.cleanup();

        assert_eq!(gpu.framebuffers_created(), 5);
        assert_eq!(gpu.framebuffers_destroyed(), 5);
        assert!(gpu.framebuffers_created() >= gpu.framebuffers_destroyed());
    }

    #[test]
    fn release_frame_returns_slot_on_present_failure() {
        let (_device, mut gpu) = headless_context();

        gpu.begin_frame(0).unwrap();
        let frame = gpu.swap_buffers().unwrap();
        assert_eq!(gpu.pending_len(), 1);
        gpu.release_frame(&frame);
        drop(frame);
        assert_eq!(gpu.pending_len(), 0);

        // Both slots are usable again.
        gpu.begin_frame(0).unwrap();
        let first = gpu.swap_buffers().unwrap();
        gpu.begin_frame(0).unwrap();
        let second = gpu.swap_buffers().unwrap();
        assert_ne!(first.framebuffer.id(), second.framebuffer.id());
    }

    #[test]
    fn back_buffer_is_cleared_to_the_requested_color() {
        let (_device, mut gpu) = headless_context();
        gpu.begin_frame(0x0011_2233).unwrap();
        let pixels = gpu.back_pixels_mut().unwrap();
        assert!(pixels.iter().all(|&p| p == 0x0011_2233));
    }
}
