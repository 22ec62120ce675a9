//! Software surface: a viewport-sized RGBA8 framebuffer.
//!
//! Used by tests and by headless hosts that want a rendered frame without a
//! browser. Every layer is resolved per screen pixel through the camera, so
//! the result matches what the browser surface draws up to filtering.

#[cfg(test)]
#[path = "soft_test.rs"]
mod soft_test;

use crate::camera::{Camera, CellRect, Point};
use crate::consts::{BACKDROP_RGBA, GRID_LINE_RGBA, OVERLAY_HIGHLIGHT_RGBA};
use crate::overlay::OverlayLayer;
use crate::raster::{BYTES_PER_PIXEL, DamageRect, Rasterizer};
use crate::render::{RenderError, Surface};

#[derive(Debug, Clone)]
pub struct Framebuffer {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
    camera: Option<Camera>,
}

impl Framebuffer {
    #[must_use]
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height, pixels: vec![0; width as usize * height as usize * BYTES_PER_PIXEL], camera: None }
    }

    #[must_use]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[must_use]
    pub fn height(&self) -> u32 {
        self.height
    }

    /// RGBA at a screen pixel.
    #[must_use]
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let i = self.offset(x, y);
        Some([self.pixels[i], self.pixels[i + 1], self.pixels[i + 2], self.pixels[i + 3]])
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.pixels
    }

    /// Whether a camera transform is currently applied.
    #[must_use]
    pub fn is_transformed(&self) -> bool {
        self.camera.is_some()
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
        self.pixels = vec![0; width as usize * height as usize * BYTES_PER_PIXEL];
    }

    fn offset(&self, x: u32, y: u32) -> usize {
        (y as usize * self.width as usize + x as usize) * BYTES_PER_PIXEL
    }

    fn put(&mut self, x: u32, y: u32, rgba: [u8; 4]) {
        let i = self.offset(x, y);
        self.pixels[i..i + BYTES_PER_PIXEL].copy_from_slice(&rgba);
    }

    fn blend(&mut self, x: u32, y: u32, rgba: [u8; 4], opacity: f64) {
        let alpha = f64::from(rgba[3]) / 255.0 * opacity;
        if alpha <= 0.0 {
            return;
        }
        let i = self.offset(x, y);
        for c in 0..3 {
            let dst = f64::from(self.pixels[i + c]);
            self.pixels[i + c] = to_channel(f64::from(rgba[c]) * alpha + dst * (1.0 - alpha));
        }
        self.pixels[i + 3] = 0xff;
    }

    fn camera(&self) -> Camera {
        self.camera.unwrap_or_default()
    }

    /// Board point under the center of screen pixel `(sx, sy)`.
    fn world_at(&self, sx: u32, sy: u32) -> Point {
        self.camera().screen_to_world(Point::new(f64::from(sx) + 0.5, f64::from(sy) + 0.5))
    }

    /// Screen-pixel span `[from, to)` covering the board-space range `[a, b)`
    /// along one axis, clipped to `len`.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn span(a: f64, b: f64, len: u32) -> (u32, u32) {
        let clip = |v: f64| if v.is_nan() || v <= 0.0 { 0 } else { (v as u64).min(u64::from(len)) as u32 };
        (clip(a.floor()), clip(b.ceil()))
    }
}

impl Surface for Framebuffer {
    fn clear(&mut self) -> Result<(), RenderError> {
        for px in self.pixels.chunks_exact_mut(BYTES_PER_PIXEL) {
            px.copy_from_slice(&BACKDROP_RGBA);
        }
        Ok(())
    }

    fn apply_transform(&mut self, camera: &Camera) -> Result<(), RenderError> {
        self.camera = Some(*camera);
        Ok(())
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn blit_board(&mut self, raster: &Rasterizer, _damage: Option<DamageRect>) -> Result<(), RenderError> {
        let camera = self.camera();
        let top_left = camera.world_to_screen(Point::new(0.0, 0.0));
        let bottom_right = camera.world_to_screen(Point::new(f64::from(raster.width()), f64::from(raster.height())));
        let (x0, x1) = Self::span(top_left.x, bottom_right.x, self.width);
        let (y0, y1) = Self::span(top_left.y, bottom_right.y, self.height);
        for sy in y0..y1 {
            for sx in x0..x1 {
                let world = self.world_at(sx, sy);
                if world.x < 0.0 || world.y < 0.0 {
                    continue;
                }
                if let Some(rgba) = raster.pixel(world.x as u32, world.y as u32) {
                    self.put(sx, sy, rgba);
                }
            }
        }
        Ok(())
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn draw_overlay(&mut self, layer: &OverlayLayer<'_>) -> Result<(), RenderError> {
        let camera = self.camera();
        let b = layer.bounds;
        let (iw, ih) = layer.image.dimensions();
        if iw == 0 || ih == 0 || b.width <= 0.0 || b.height <= 0.0 {
            return Ok(());
        }
        let top_left = camera.world_to_screen(Point::new(b.x, b.y));
        let bottom_right = camera.world_to_screen(Point::new(b.x + b.width, b.y + b.height));
        let (x0, x1) = Self::span(top_left.x, bottom_right.x, self.width);
        let (y0, y1) = Self::span(top_left.y, bottom_right.y, self.height);
        let sx_per_px = b.width / f64::from(iw);
        let sy_per_px = b.height / f64::from(ih);

        for sy in y0..y1 {
            for sx in x0..x1 {
                let world = self.world_at(sx, sy);
                if !b.contains(world) {
                    continue;
                }
                let ix = (((world.x - b.x) / sx_per_px) as u32).min(iw - 1);
                let iy = (((world.y - b.y) / sy_per_px) as u32).min(ih - 1);
                let rgba = layer.image.get_pixel(ix, iy).0;
                self.blend(sx, sy, rgba, layer.opacity);
            }
        }

        if layer.highlight && x0 < x1 && y0 < y1 {
            for sx in x0..x1 {
                self.put(sx, y0, OVERLAY_HIGHLIGHT_RGBA);
                self.put(sx, y1 - 1, OVERLAY_HIGHLIGHT_RGBA);
            }
            for sy in y0..y1 {
                self.put(x0, sy, OVERLAY_HIGHLIGHT_RGBA);
                self.put(x1 - 1, sy, OVERLAY_HIGHLIGHT_RGBA);
            }
        }
        Ok(())
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn draw_grid(&mut self, cells: CellRect) -> Result<(), RenderError> {
        let camera = self.camera();
        let top_left = camera.world_to_screen(Point::new(f64::from(cells.x0), f64::from(cells.y0)));
        let bottom_right = camera.world_to_screen(Point::new(f64::from(cells.x1), f64::from(cells.y1)));
        let (x0, x1) = Self::span(top_left.x, bottom_right.x, self.width);
        let (y0, y1) = Self::span(top_left.y, bottom_right.y, self.height);

        for cx in cells.x0..=cells.x1 {
            let sx = camera.world_to_screen(Point::new(f64::from(cx), 0.0)).x.floor();
            if sx < 0.0 || sx >= f64::from(self.width) {
                continue;
            }
            for sy in y0..y1 {
                self.blend(sx as u32, sy, GRID_LINE_RGBA, 1.0);
            }
        }
        for cy in cells.y0..=cells.y1 {
            let sy = camera.world_to_screen(Point::new(0.0, f64::from(cy))).y.floor();
            if sy < 0.0 || sy >= f64::from(self.height) {
                continue;
            }
            for sx in x0..x1 {
                self.blend(sx, sy as u32, GRID_LINE_RGBA, 1.0);
            }
        }
        Ok(())
    }

    fn restore(&mut self) -> Result<(), RenderError> {
        self.camera = None;
        Ok(())
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn to_channel(v: f64) -> u8 {
    v.round().clamp(0.0, 255.0) as u8
}
