//! Offscreen rasterizer: an RGBA8 bitmap mirroring the [`PixelStore`].
//!
//! The store holds palette indices; the bitmap holds the packed colors those
//! indices resolve to, so a frame is a straight blit with no per-pixel
//! lookup. Full repaints happen only on snapshot load; every later edit goes
//! through [`Rasterizer::repaint_cell`], which also grows a damage rectangle
//! the host uses to upload just the changed region.

#[cfg(test)]
#[path = "raster_test.rs"]
mod raster_test;

use crate::palette::{ColorIndex, Palette};
use crate::store::{PixelStore, cell_count, cell_index};

/// Bytes per bitmap pixel.
pub const BYTES_PER_PIXEL: usize = 4;

/// Inclusive-exclusive rectangle of board cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DamageRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl DamageRect {
    /// A single cell.
    #[must_use]
    pub fn cell(x: u32, y: u32) -> Self {
        Self { x, y, width: 1, height: 1 }
    }

    /// Smallest rectangle covering both.
    #[must_use]
    pub fn union(self, other: Self) -> Self {
        let x0 = self.x.min(other.x);
        let y0 = self.y.min(other.y);
        let x1 = self.right().max(other.right());
        let y1 = self.bottom().max(other.bottom());
        Self { x: x0, y: y0, width: x1 - x0, height: y1 - y0 }
    }

    #[must_use]
    pub fn right(self) -> u32 {
        self.x + self.width
    }

    #[must_use]
    pub fn bottom(self) -> u32 {
        self.y + self.height
    }

    #[must_use]
    pub fn contains(self, x: u32, y: u32) -> bool {
        x >= self.x && x < self.right() && y >= self.y && y < self.bottom()
    }
}

/// Renderable color bitmap for one board.
#[derive(Debug, Clone)]
pub struct Rasterizer {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
    damage: Option<DamageRect>,
}

impl Rasterizer {
    /// An empty rasterizer. The bitmap is allocated by the first
    /// [`repaint_all`](Self::repaint_all).
    #[must_use]
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height, pixels: Vec::new(), damage: None }
    }

    #[must_use]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[must_use]
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Whether a full repaint has populated the bitmap.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        !self.pixels.is_empty()
    }

    /// Rewrite every pixel from `store`. Marks the whole board damaged.
    pub fn repaint_all(&mut self, store: &PixelStore, palette: &Palette) {
        let len = cell_count(self.width, self.height) * BYTES_PER_PIXEL;
        if self.pixels.len() != len {
            self.pixels = vec![0; len];
        }
        let table = palette.packed_table();
        for (dst, &index) in self.pixels.chunks_exact_mut(BYTES_PER_PIXEL).zip(store.as_bytes()) {
            let rgba = table.get(usize::from(index)).copied().unwrap_or([0; 4]);
            dst.copy_from_slice(&rgba);
        }
        self.damage = Some(DamageRect { x: 0, y: 0, width: self.width, height: self.height });
    }

    /// Rewrite a single pixel. Returns false when the bitmap has not been
    /// populated yet or `(x, y)` is off the board; nothing is written then.
    pub fn repaint_cell(&mut self, x: u32, y: u32, color: ColorIndex, palette: &Palette) -> bool {
        let Some(offset) = self.byte_offset(x, y) else {
            return false;
        };
        self.pixels[offset..offset + BYTES_PER_PIXEL].copy_from_slice(&palette.packed(color));
        let cell = DamageRect::cell(x, y);
        self.damage = Some(self.damage.map_or(cell, |d| d.union(cell)));
        true
    }

    /// RGBA of one pixel, if the bitmap is ready and `(x, y)` is on the board.
    #[must_use]
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        let offset = self.byte_offset(x, y)?;
        let px = self.pixels.get(offset..offset + BYTES_PER_PIXEL)?;
        Some([px[0], px[1], px[2], px[3]])
    }

    /// The whole bitmap, row-major RGBA8. Empty until ready.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.pixels
    }

    /// Rows `rect.y .. rect.bottom()` restricted to columns
    /// `rect.x .. rect.right()`, packed tightly. Used for partial uploads.
    #[must_use]
    pub fn region(&self, rect: DamageRect) -> Vec<u8> {
        let mut out = Vec::with_capacity(rect.width as usize * rect.height as usize * BYTES_PER_PIXEL);
        if !self.is_ready() {
            return out;
        }
        let x1 = rect.right().min(self.width);
        let y1 = rect.bottom().min(self.height);
        for y in rect.y..y1 {
            let start = cell_index(self.width, rect.x, y) * BYTES_PER_PIXEL;
            let end = cell_index(self.width, x1, y) * BYTES_PER_PIXEL;
            if let Some(row) = self.pixels.get(start..end) {
                out.extend_from_slice(row);
            }
        }
        out
    }

    /// Cells repainted since the last call, or `None` if nothing changed.
    pub fn take_damage(&mut self) -> Option<DamageRect> {
        self.damage.take()
    }

    /// Peek at pending damage without clearing it.
    #[must_use]
    pub fn damage(&self) -> Option<DamageRect> {
        self.damage
    }

    /// Free the bitmap. The rasterizer reports not-ready afterwards.
    pub fn release(&mut self) {
        self.pixels = Vec::new();
        self.damage = None;
    }

    fn byte_offset(&self, x: u32, y: u32) -> Option<usize> {
        if !self.is_ready() || x >= self.width || y >= self.height {
            return None;
        }
        Some(cell_index(self.width, x, y) * BYTES_PER_PIXEL)
    }
}
