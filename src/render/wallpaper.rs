//! Wallpaper decoding and caching.

use std::path::PathBuf;

use tracing::{debug, warn};

use crate::utils::Size;

/// The decoded wallpaper, pre-scaled to the display resolution with
/// nearest-neighbour sampling so the per-frame draw is a straight copy.
#[derive(Debug, Default)]
pub struct Wallpaper {
    configured: Option<PathBuf>,
    pixels: Vec<u32>,
    size: Size,
    ready: bool,
}

impl Wallpaper {
    pub fn new() -> Self {
        Wallpaper::default()
    }

    pub fn ready(&self) -> bool {
        self.ready
    }

    /// Re-decodes when the configured path changed since the last upload.
    /// Returns whether the cached image changed.
    pub fn refresh(&mut self, path: Option<PathBuf>, target: Size) -> bool {
        if path == self.configured && self.size == target {
            return false;
        }
        self.configured = path.clone();
        self.size = target;
        self.ready = false;
        self.pixels.clear();

        let Some(path) = path else {
            return true;
        };
        let image = match image::open(&path) {
            Ok(image) => image.to_rgba8(),
            Err(err) => {
                warn!(?path, %err, "failed to decode wallpaper");
                return true;
            }
        };
        let (src_w, src_h) = image.dimensions();
        if src_w == 0 || src_h == 0 || target.is_empty() {
            return true;
        }

        let (dst_w, dst_h) = (target.w as u32, target.h as u32);
        self.pixels = Vec::with_capacity(target.area());
        for y in 0..dst_h {
            let src_y = y * src_h / dst_h;
            for x in 0..dst_w {
                let src_x = x * src_w / dst_w;
                let pixel = image.get_pixel(src_x, src_y).0;
                self.pixels
                    .push(((pixel[0] as u32) << 16) | ((pixel[1] as u32) << 8) | pixel[2] as u32);
            }
        }
        self.ready = true;
        debug!(?path, "wallpaper uploaded");
        true
    }

    /// Copies the cached image over the whole back buffer.
    pub fn draw(&self, back: &mut [u32]) {
        if self.ready && back.len() == self.pixels.len() {
            back.copy_from_slice(&self.pixels);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refresh_without_path_clears_state() {
        let mut wallpaper = Wallpaper::new();
        assert!(wallpaper.refresh(None, Size::new(4, 4)));
        assert!(!wallpaper.ready());
        // Unchanged inputs are a no-op.
        assert!(!wallpaper.refresh(None, Size::new(4, 4)));
    }

    #[test]
    fn decodes_and_stretches_an_image() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wall.png");
        // A 2x1 image: red then blue.
        let mut image = image::RgbaImage::new(2, 1);
        image.put_pixel(0, 0, image::Rgba([255, 0, 0, 255]));
        image.put_pixel(1, 0, image::Rgba([0, 0, 255, 255]));
        image.save(&path).unwrap();

        let mut wallpaper = Wallpaper::new();
        let target = Size::new(4, 2);
        assert!(wallpaper.refresh(Some(path), target));
        assert!(wallpaper.ready());

        let mut back = vec![0u32; target.area()];
        wallpaper.draw(&mut back);
        // Left half red, right half blue, stretched by nearest neighbour.
        assert_eq!(back[0], 0x00ff_0000);
        assert_eq!(back[1], 0x00ff_0000);
        assert_eq!(back[2], 0x0000_00ff);
        assert_eq!(back[3], 0x0000_00ff);
        assert_eq!(back[4], 0x00ff_0000);
    }

    #[test]
    fn missing_file_fails_soft() {
        let mut wallpaper = Wallpaper::new();
        assert!(wallpaper.refresh(Some(PathBuf::from("/nonexistent.png")), Size::new(4, 4)));
        assert!(!wallpaper.ready());
        let mut back = vec![7u32; 16];
        wallpaper.draw(&mut back);
        assert!(back.iter().all(|&p| p == 7));
    }
}
