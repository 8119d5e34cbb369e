//! CPU-mapped dumb buffers wrapped as scanout framebuffers.

use drm::buffer::{Buffer, DrmFourcc};
use drm::control::dumbbuffer::DumbBuffer;
use drm::control::{framebuffer, Device as ControlDevice};
use tracing::{trace, warn};

use super::device::{access_error, DrmDeviceFd};
use super::error::Error;
use crate::utils::{Point, Size};

/// A dumb buffer with an attached kernel framebuffer.
///
/// Created for mode-setting: the buffer is mapped, cleared and handed to the
/// controller. Move-only; both kernel objects are destroyed exactly once on
/// drop.
#[derive(Debug)]
pub struct DumbFrame {
    fd: DrmDeviceFd,
    buffer: Option<DumbBuffer>,
    fb: framebuffer::Handle,
    size: Size,
    pitch: u32,
}

impl DumbFrame {
    /// Allocates a `width × height` XRGB8888 buffer and registers it as a
    /// framebuffer (32 bpp, 24-bit depth).
    pub fn new(fd: &DrmDeviceFd, width: u32, height: u32) -> Result<Self, Error> {
        let buffer = fd
            .create_dumb_buffer((width, height), DrmFourcc::Xrgb8888, 32)
            .map_err(|source| access_error(fd, "Failed to create dumb buffer", source))?;
        let pitch = buffer.pitch();
        let fb = match fd.add_framebuffer(&buffer, 24, 32) {
            Ok(fb) => fb,
            Err(source) => {
                let _ = fd.destroy_dumb_buffer(buffer);
                return Err(access_error(fd, "Failed to add framebuffer", source));
            }
        };
        trace!(?fb, width, height, "dumb frame created");
        Ok(DumbFrame {
            fd: fd.clone(),
            buffer: Some(buffer),
            fb,
            size: Size::new(width as i32, height as i32),
            pitch,
        })
    }

    pub fn fb(&self) -> framebuffer::Handle {
        self.fb
    }

    pub fn size(&self) -> Size {
        self.size
    }

    /// Fills the whole buffer with an XRGB pixel value.
    pub fn clear(&mut self, color: u32) -> Result<(), Error> {
        let size = self.size;
        self.fill_rect(Point::new(0, 0), size, color)
    }

    /// Fills a pixel rectangle, clamped to the buffer bounds.
    pub fn fill_rect(&mut self, pos: Point, area: Size, color: u32) -> Result<(), Error> {
        let fd = self.fd.clone();
        let pitch = self.pitch as usize;
        let (width, height) = (self.size.w, self.size.h);
        let Some(buffer) = self.buffer.as_mut() else {
            return Ok(());
        };
        let mut mapping = fd
            .map_dumb_buffer(buffer)
            .map_err(|source| access_error(&fd, "Failed to map dumb buffer", source))?;
        let bytes = mapping.as_mut();

        let x0 = pos.x.clamp(0, width) as usize;
        let y0 = pos.y.clamp(0, height) as usize;
        let x1 = (pos.x + area.w).clamp(0, width) as usize;
        let y1 = (pos.y + area.h).clamp(0, height) as usize;
        let pixel = color.to_ne_bytes();
        for y in y0..y1 {
            let row = &mut bytes[y * pitch..];
            for x in x0..x1 {
                row[x * 4..x * 4 + 4].copy_from_slice(&pixel);
            }
        }
        Ok(())
    }
}

impl Drop for DumbFrame {
    fn drop(&mut self) {
        trace!(fb = ?self.fb, "destroying dumb frame");
        if let Err(err) = self.fd.destroy_framebuffer(self.fb) {
            warn!(fb = ?self.fb, ?err, "failed to destroy framebuffer");
        }
        if let Some(buffer) = self.buffer.take() {
            if let Err(err) = self.fd.destroy_dumb_buffer(buffer) {
                warn!(?err, "failed to destroy dumb buffer");
            }
        }
    }
}
