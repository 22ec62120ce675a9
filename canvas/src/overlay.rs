//! Guidance overlay: a client-local reference image drawn above the board.
//!
//! The overlay is never synchronized. It carries its own placement (board
//! units), scale, and opacity, and an optional pixelation step that turns the
//! source into a block image closer to what the board can reproduce.
//!
//! Pixelation is the pure function [`pixelate`]. The overlay memoizes its
//! most recent result keyed on `(image generation, factor)`, so the image is
//! reprocessed at most once per change no matter how many frames draw it.

#[cfg(test)]
#[path = "overlay_test.rs"]
mod overlay_test;

use image::RgbaImage;
use image::imageops::{self, FilterType};

use crate::camera::{Point, Rect};
use crate::consts::{OVERLAY_DEFAULT_OPACITY, OVERLAY_MAX_SCALE, OVERLAY_MIN_SCALE};
use crate::palette::Color;

/// Errors returned when loading an overlay image.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OverlayError {
    #[error("failed to decode overlay image: {0}")]
    Decode(String),
    #[error("overlay image has no pixels")]
    Empty,
}

/// Nearest-neighbor downsample by `factor`, then upsample back to the
/// original size. Factors of 0 and 1 return an unchanged copy.
#[must_use]
pub fn pixelate(source: &RgbaImage, factor: u32) -> RgbaImage {
    let (w, h) = source.dimensions();
    if factor <= 1 || w == 0 || h == 0 {
        return source.clone();
    }
    let small = imageops::resize(source, w.div_ceil(factor), h.div_ceil(factor), FilterType::Nearest);
    imageops::resize(&small, w, h, FilterType::Nearest)
}

#[derive(Debug, Clone)]
struct Pixelated {
    generation: u64,
    factor: u32,
    image: RgbaImage,
}

/// Read-only view handed to the renderer.
#[derive(Debug, Clone, Copy)]
pub struct OverlayLayer<'a> {
    pub image: &'a RgbaImage,
    /// Changes whenever `image` does, so surfaces can cache their upload.
    pub revision: (u64, u32),
    pub bounds: Rect,
    pub opacity: f64,
    pub highlight: bool,
}

#[derive(Debug, Clone)]
pub struct GuidanceOverlay {
    board_width: u32,
    board_height: u32,
    image: Option<RgbaImage>,
    generation: u64,
    pixelation: u32,
    memo: Option<Pixelated>,
    pixelate_count: u64,
    x: f64,
    y: f64,
    scale: f64,
    opacity: f64,
    editing: bool,
}

impl GuidanceOverlay {
    #[must_use]
    pub fn new(board_width: u32, board_height: u32) -> Self {
        Self {
            board_width,
            board_height,
            image: None,
            generation: 0,
            pixelation: 1,
            memo: None,
            pixelate_count: 0,
            x: 0.0,
            y: 0.0,
            scale: 1.0,
            opacity: OVERLAY_DEFAULT_OPACITY,
            editing: false,
        }
    }

    /// Decode an encoded image (PNG, JPEG) and place it.
    ///
    /// # Errors
    ///
    /// [`OverlayError::Decode`] when the bytes are not a supported image,
    /// [`OverlayError::Empty`] for a zero-sized one. The previous image is
    /// kept on error.
    pub fn set_image(&mut self, bytes: &[u8]) -> Result<(), OverlayError> {
        let decoded = image::load_from_memory(bytes).map_err(|err| OverlayError::Decode(err.to_string()))?;
        self.set_image_rgba(decoded.to_rgba8())
    }

    /// Place already-decoded pixels: centered on the board, one cell per
    /// source pixel, default opacity.
    ///
    /// # Errors
    ///
    /// [`OverlayError::Empty`] for a zero-sized image.
    pub fn set_image_rgba(&mut self, image: RgbaImage) -> Result<(), OverlayError> {
        let (w, h) = image.dimensions();
        if w == 0 || h == 0 {
            return Err(OverlayError::Empty);
        }
        self.x = (f64::from(self.board_width) - f64::from(w)) * 0.5;
        self.y = (f64::from(self.board_height) - f64::from(h)) * 0.5;
        self.scale = 1.0;
        self.opacity = OVERLAY_DEFAULT_OPACITY;
        self.image = Some(image);
        self.generation += 1;
        self.memo = None;
        log::debug!("overlay image set: {w}x{h}");
        Ok(())
    }

    /// Destroy the image and its processed copy.
    pub fn clear(&mut self) {
        self.image = None;
        self.memo = None;
        self.editing = false;
        self.generation += 1;
    }

    #[must_use]
    pub fn has_image(&self) -> bool {
        self.image.is_some()
    }

    /// The unprocessed source.
    #[must_use]
    pub fn source(&self) -> Option<&RgbaImage> {
        self.image.as_ref()
    }

    // --- Pixelation ---

    /// Block size for pixelation. 0 and 1 both mean "raw image".
    pub fn set_pixelation(&mut self, factor: u32) {
        self.pixelation = factor.max(1);
    }

    #[must_use]
    pub fn pixelation(&self) -> u32 {
        self.pixelation
    }

    /// The image to composite, recomputing the pixelated copy only if the
    /// image or factor changed since the last call.
    pub fn processed(&mut self) -> Option<&RgbaImage> {
        self.refresh();
        self.cached()
    }

    /// Whatever [`processed`](Self::processed) last produced, without
    /// recomputing. Falls back to the raw image if the memo is stale.
    #[must_use]
    pub fn cached(&self) -> Option<&RgbaImage> {
        let image = self.image.as_ref()?;
        if self.pixelation <= 1 {
            return Some(image);
        }
        match &self.memo {
            Some(m) if m.generation == self.generation && m.factor == self.pixelation => Some(&m.image),
            _ => Some(image),
        }
    }

    /// How many times [`pixelate`] has actually run.
    #[must_use]
    pub fn pixelate_count(&self) -> u64 {
        self.pixelate_count
    }

    fn refresh(&mut self) {
        let Some(image) = &self.image else {
            return;
        };
        if self.pixelation <= 1 {
            return;
        }
        if self.memo.as_ref().is_some_and(|m| m.generation == self.generation && m.factor == self.pixelation) {
            return;
        }
        let processed = pixelate(image, self.pixelation);
        self.pixelate_count += 1;
        self.memo = Some(Pixelated { generation: self.generation, factor: self.pixelation, image: processed });
    }

    // --- Placement ---

    /// Board-space rectangle the overlay covers.
    #[must_use]
    pub fn bounds(&self) -> Option<Rect> {
        let (w, h) = self.image.as_ref()?.dimensions();
        Some(Rect { x: self.x, y: self.y, width: f64::from(w) * self.scale, height: f64::from(h) * self.scale })
    }

    #[must_use]
    pub fn contains(&self, p: Point) -> bool {
        self.bounds().is_some_and(|b| b.contains(p))
    }

    #[must_use]
    pub fn position(&self) -> Point {
        Point::new(self.x, self.y)
    }

    pub fn set_position(&mut self, x: f64, y: f64) {
        if x.is_finite() && y.is_finite() {
            self.x = x;
            self.y = y;
        }
    }

    /// Translate by a board-space delta.
    pub fn move_by(&mut self, dx: f64, dy: f64) {
        self.set_position(self.x + dx, self.y + dy);
    }

    #[must_use]
    pub fn scale(&self) -> f64 {
        self.scale
    }

    /// Multiply the overlay scale, clamped. With an anchor (board space), the
    /// image point under it stays put.
    pub fn scale_by(&mut self, factor: f64, anchor: Option<Point>) {
        if !factor.is_finite() || factor <= 0.0 {
            return;
        }
        let new_scale = (self.scale * factor).clamp(OVERLAY_MIN_SCALE, OVERLAY_MAX_SCALE);
        if let Some(a) = anchor {
            let ratio = new_scale / self.scale;
            self.x = a.x - (a.x - self.x) * ratio;
            self.y = a.y - (a.y - self.y) * ratio;
        }
        self.scale = new_scale;
    }

    #[must_use]
    pub fn opacity(&self) -> f64 {
        self.opacity
    }

    /// Clamped to `[0, 1]`; NaN is ignored.
    pub fn set_opacity(&mut self, opacity: f64) {
        if !opacity.is_nan() {
            self.opacity = opacity.clamp(0.0, 1.0);
        }
    }

    // --- Editing ---

    /// In editing mode the pointer moves and scales the overlay instead of
    /// painting. Needs an image.
    pub fn set_editing(&mut self, editing: bool) {
        self.editing = editing && self.image.is_some();
    }

    #[must_use]
    pub fn is_editing(&self) -> bool {
        self.editing
    }

    // --- Sampling ---

    /// Color of the processed overlay at a board-space point. `None` off the
    /// image or where the pixel is fully transparent.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn sample_color_at(&mut self, bx: f64, by: f64) -> Option<Color> {
        let bounds = self.bounds()?;
        if !bounds.contains(Point::new(bx, by)) {
            return None;
        }
        let scale = self.scale;
        let image = self.processed()?;
        let (w, h) = image.dimensions();
        let px = (((bx - bounds.x) / scale).floor() as u32).min(w - 1);
        let py = (((by - bounds.y) / scale).floor() as u32).min(h - 1);
        let rgba = image.get_pixel(px, py).0;
        if rgba[3] == 0 {
            return None;
        }
        Some(Color::from_rgba(rgba))
    }

    /// Snapshot for the renderer, using the memoized processed image.
    #[must_use]
    pub fn layer(&self) -> Option<OverlayLayer<'_>> {
        let image = self.cached()?;
        let factor = match &self.memo {
            Some(m) if std::ptr::eq(&m.image, image) => m.factor,
            _ => 1,
        };
        Some(OverlayLayer {
            image,
            revision: (self.generation, factor),
            bounds: self.bounds()?,
            opacity: self.opacity,
            highlight: self.editing,
        })
    }
}
