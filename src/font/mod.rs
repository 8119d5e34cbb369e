//! Scalable glyph rendering.
//!
//! The rasterizer only needs a [`GlyphSource`]: grayscale coverage bitmaps
//! with bearings and advances, cached per codepoint for the life of the
//! font. The concrete engine renders TrueType/OpenType outlines through
//! `ab_glyph`; discovery walks the usual system font directories with a
//! monospace-first preference ladder.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use ab_glyph::{Font as _, FontVec, PxScale, ScaleFont as _};
use thiserror::Error;
use tracing::{info, warn};

/// Default pixel size glyphs are rendered at.
pub const DEFAULT_FONT_SIZE: u32 = 16;

/// Cell geometry used when no font could be loaded at all.
pub const FALLBACK_CELL: CellMetrics = CellMetrics {
    width: 6,
    height: 12,
};

/// Pixel size of one character cell at zoom 1.0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellMetrics {
    pub width: i32,
    pub height: i32,
}

/// A rendered glyph: 8-bit coverage, row-major `width × height`.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Glyph {
    pub width: i32,
    pub height: i32,
    /// Horizontal offset from the pen position to the bitmap's left edge.
    pub bearing_x: i32,
    /// Vertical offset from the baseline up to the bitmap's top edge.
    pub bearing_y: i32,
    pub advance: i32,
    pub bitmap: Vec<u8>,
}

impl Glyph {
    pub fn is_empty(&self) -> bool {
        self.bitmap.is_empty()
    }
}

/// Anything that can hand out coverage bitmaps for codepoints.
///
/// Implementations substitute something renderable (usually the space
/// glyph's empty bitmap) for codepoints the font does not cover, and must be
/// deterministic for a given instance.
pub trait GlyphSource {
    fn glyph(&mut self, codepoint: char) -> &Glyph;
    fn metrics(&self) -> CellMetrics;
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to read font file {path:?}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("font file {0:?} could not be parsed")]
    Parse(PathBuf),
    #[error("no usable font found on this system")]
    NoFont,
}

/// An `ab_glyph` backed glyph source with an unbounded per-codepoint cache.
#[derive(Debug)]
pub struct FontEngine {
    font: FontVec,
    size: u32,
    metrics: CellMetrics,
    cache: HashMap<char, Glyph>,
    path: PathBuf,
}

impl FontEngine {
    /// Loads a font file and computes the cell geometry at `size` pixels.
    pub fn load(path: &Path, size: u32) -> Result<Self, Error> {
        let bytes = std::fs::read(path).map_err(|source| Error::Read {
            path: path.to_owned(),
            source,
        })?;
        let font = FontVec::try_from_vec(bytes).map_err(|_| Error::Parse(path.to_owned()))?;

        let scale = PxScale::from(size as f32);
        let scaled = font.as_scaled(scale);
        let height = (scaled.ascent() - scaled.descent() + scaled.line_gap()).ceil() as i32;
        // Monospace faces advance every printable by the same amount; for
        // anything else the widest printable keeps cells from overlapping.
        let width = (0x20u8..0x7f)
            .map(|b| scaled.h_advance(font.glyph_id(b as char)))
            .fold(0.0f32, f32::max)
            .ceil() as i32;

        let metrics = CellMetrics {
            width: width.max(1),
            height: height.max(1),
        };
        info!(?path, size, ?metrics, "font loaded");
        Ok(FontEngine {
            font,
            size,
            metrics,
            cache: HashMap::new(),
            path: path.to_owned(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    fn render(&self, codepoint: char) -> Glyph {
        let scale = PxScale::from(self.size as f32);
        let scaled = self.font.as_scaled(scale);

        // Missing codepoints fall back to the space glyph: empty coverage,
        // plain advance.
        let mut id = self.font.glyph_id(codepoint);
        if id.0 == 0 {
            id = self.font.glyph_id(' ');
        }
        let advance = scaled.h_advance(id).ceil() as i32;

        let glyph = id.with_scale_and_position(scale, ab_glyph::point(0.0, 0.0));
        let Some(outline) = self.font.outline_glyph(glyph) else {
            // Whitespace and blank glyphs have no outline.
            return Glyph {
                advance,
                ..Glyph::default()
            };
        };

        let bounds = outline.px_bounds();
        let width = (bounds.max.x - bounds.min.x).ceil() as i32;
        let height = (bounds.max.y - bounds.min.y).ceil() as i32;
        if width <= 0 || height <= 0 {
            return Glyph {
                advance,
                ..Glyph::default()
            };
        }

        let mut bitmap = vec![0u8; (width * height) as usize];
        outline.draw(|x, y, coverage| {
            let index = y as usize * width as usize + x as usize;
            if index < bitmap.len() {
                bitmap[index] = (coverage.clamp(0.0, 1.0) * 255.0) as u8;
            }
        });

        Glyph {
            width,
            height,
            bearing_x: bounds.min.x.floor() as i32,
            // px_bounds is in screen coordinates relative to the baseline
            // position, so the top edge sits at -bearing_y.
            bearing_y: (-bounds.min.y).ceil() as i32,
            advance,
            bitmap,
        }
    }
}

impl GlyphSource for FontEngine {
    fn glyph(&mut self, codepoint: char) -> &Glyph {
        if !self.cache.contains_key(&codepoint) {
            let glyph = self.render(codepoint);
            self.cache.insert(codepoint, glyph);
        }
        &self.cache[&codepoint]
    }

    fn metrics(&self) -> CellMetrics {
        self.metrics
    }
}

const FONT_DIRS: &[&str] = &["/usr/share/fonts", "/usr/local/share/fonts"];

const PREFERRED_NAMES: &[&str] = &[
    "DejaVuSansMono",
    "LiberationMono",
    "Liberation Mono",
    "UbuntuMono",
    "Ubuntu Mono",
    "FiraCode",
    "Fira Code",
    "SourceCodePro",
    "Source Code Pro",
    "Consolas",
    "Menlo",
    "Monaco",
];

fn collect_fonts(dir: &Path, out: &mut Vec<PathBuf>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_fonts(&path, out);
        } else if matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("ttf") | Some("otf")
        ) {
            out.push(path);
        }
    }
}

/// All candidate font files on this system, including per-user directories.
fn system_font_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();
    for dir in FONT_DIRS {
        collect_fonts(Path::new(dir), &mut paths);
    }
    if let Ok(home) = std::env::var("HOME") {
        collect_fonts(&Path::new(&home).join(".fonts"), &mut paths);
        collect_fonts(&Path::new(&home).join(".local/share/fonts"), &mut paths);
    }
    paths
}

/// Picks a font file: preferred monospace names, then anything that looks
/// monospaced, then any font at all.
pub fn find_system_font() -> Option<PathBuf> {
    let paths = system_font_paths();

    for preferred in PREFERRED_NAMES {
        let needle = preferred.replace(' ', "").to_lowercase();
        if let Some(path) = paths.iter().find(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.replace(' ', "").to_lowercase().contains(&needle))
                .unwrap_or(false)
        }) {
            return Some(path.clone());
        }
    }

    if let Some(path) = paths.iter().find(|p| {
        p.file_name()
            .and_then(|n| n.to_str())
            .map(|n| {
                let lower = n.to_lowercase();
                lower.contains("mono") || lower.contains("courier") || lower.contains("console")
            })
            .unwrap_or(false)
    }) {
        return Some(path.clone());
    }

    paths.first().cloned()
}

/// Loads the default engine: an explicit path wins, otherwise discovery.
/// Returns `None` when no font exists anywhere; the compositor then renders
/// backgrounds only.
pub fn load_default(explicit: Option<&Path>, size: u32) -> Option<FontEngine> {
    let path = match explicit {
        Some(path) => Some(path.to_owned()),
        None => find_system_font(),
    };
    let Some(path) = path else {
        warn!("no font found, text rendering disabled");
        return None;
    };
    match FontEngine::load(&path, size) {
        Ok(engine) => Some(engine),
        Err(err) => {
            warn!(?err, "failed to load font, text rendering disabled");
            None
        }
    }
}

/// Cell metrics of `engine`, or the fallback geometry without one.
pub fn metrics_or_fallback(engine: Option<&FontEngine>) -> CellMetrics {
    engine.map(|e| e.metrics()).unwrap_or(FALLBACK_CELL)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_engine() -> Option<FontEngine> {
        let path = find_system_font()?;
        FontEngine::load(&path, DEFAULT_FONT_SIZE).ok()
    }

    #[test]
    fn glyphs_are_deterministic_per_instance() {
        let Some(mut engine) = test_engine() else {
            eprintln!("no system font available, skipping");
            return;
        };
        let first = engine.glyph('A').clone();
        let second = engine.glyph('A').clone();
        assert_eq!(first, second);
        assert!(!first.is_empty());
        assert!(first.width > 0 && first.height > 0);
    }

    #[test]
    fn missing_codepoints_fall_back_to_space() {
        let Some(mut engine) = test_engine() else {
            return;
        };
        // A private-use codepoint no common font covers.
        let glyph = engine.glyph('\u{e9c4}').clone();
        assert!(glyph.is_empty());
        assert!(glyph.advance >= 0);
    }

    #[test]
    fn metrics_are_positive() {
        let Some(engine) = test_engine() else {
            return;
        };
        let metrics = engine.metrics();
        assert!(metrics.width > 0);
        assert!(metrics.height > 0);
    }

    #[test]
    fn fallback_metrics_without_font() {
        assert_eq!(metrics_or_fallback(None), FALLBACK_CELL);
    }
}
