//! Pixel store: the local replica of the board's cell buffer.
//!
//! One byte per cell, row-major, so the in-memory layout is identical to the
//! snapshot wire format: byte `i` is cell `(i mod W, i div W)`. Loading a
//! snapshot is a length check, a palette check, and one `memcpy`.
//!
//! Coordinates are signed so callers can pass unclamped values straight from
//! the camera; anything outside the board is reported as
//! [`StoreError::OutOfBounds`] rather than wrapping.

#[cfg(test)]
#[path = "store_test.rs"]
mod store_test;

use crate::palette::ColorIndex;

/// Errors returned by [`PixelStore`] operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// Snapshot length does not match `width * height`.
    #[error("malformed snapshot: expected {expected} bytes, got {actual}")]
    MalformedSnapshot { expected: usize, actual: usize },
    /// Cell coordinates fall outside the board.
    #[error("cell ({x}, {y}) is outside the {width}x{height} board")]
    OutOfBounds { x: i64, y: i64, width: u32, height: u32 },
    /// Color index is not an entry of the palette.
    #[error("color index {index} is not in a palette of {palette_len} colors")]
    InvalidColorIndex { index: ColorIndex, palette_len: usize },
}

/// Dense W×H buffer of palette indices.
#[derive(Debug, Clone)]
pub struct PixelStore {
    width: u32,
    height: u32,
    palette_len: usize,
    cells: Vec<ColorIndex>,
}

impl PixelStore {
    /// A blank board: every cell holds index 0.
    #[must_use]
    pub fn new(width: u32, height: u32, palette_len: usize) -> Self {
        let len = cell_count(width, height);
        Self { width, height, palette_len, cells: vec![0; len] }
    }

    #[must_use]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[must_use]
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Number of cells (`width * height`).
    #[must_use]
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Whether `(x, y)` names a cell on the board.
    #[must_use]
    pub fn contains(&self, x: i64, y: i64) -> bool {
        self.offset(x, y).is_ok()
    }

    /// Replace the entire content with a snapshot.
    ///
    /// The store is left untouched on error.
    ///
    /// # Errors
    ///
    /// [`StoreError::MalformedSnapshot`] when `bytes.len() != width * height`;
    /// [`StoreError::InvalidColorIndex`] when any byte is not a palette entry.
    pub fn load(&mut self, bytes: &[u8]) -> Result<(), StoreError> {
        if bytes.len() != self.cells.len() {
            return Err(StoreError::MalformedSnapshot { expected: self.cells.len(), actual: bytes.len() });
        }
        if let Some(&index) = bytes.iter().find(|&&b| usize::from(b) >= self.palette_len) {
            return Err(StoreError::InvalidColorIndex { index, palette_len: self.palette_len });
        }
        self.cells.copy_from_slice(bytes);
        Ok(())
    }

    /// Read one cell.
    ///
    /// # Errors
    ///
    /// [`StoreError::OutOfBounds`] outside `[0, width) × [0, height)`.
    pub fn get(&self, x: i64, y: i64) -> Result<ColorIndex, StoreError> {
        let offset = self.offset(x, y)?;
        Ok(self.cells[offset])
    }

    /// Write one cell. Returns whether the stored value changed; writing the
    /// value a cell already holds is a no-op.
    ///
    /// # Errors
    ///
    /// [`StoreError::OutOfBounds`] for coordinates off the board and
    /// [`StoreError::InvalidColorIndex`] for indices past the palette.
    pub fn set(&mut self, x: i64, y: i64, color: ColorIndex) -> Result<bool, StoreError> {
        let offset = self.offset(x, y)?;
        if usize::from(color) >= self.palette_len {
            return Err(StoreError::InvalidColorIndex { index: color, palette_len: self.palette_len });
        }
        let cell = &mut self.cells[offset];
        if *cell == color {
            return Ok(false);
        }
        *cell = color;
        Ok(true)
    }

    /// Dense copy in snapshot wire format.
    #[must_use]
    pub fn serialize(&self) -> Vec<u8> {
        self.cells.clone()
    }

    /// Borrow the raw cell buffer.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.cells
    }

    fn offset(&self, x: i64, y: i64) -> Result<usize, StoreError> {
        let (Ok(cx), Ok(cy)) = (u32::try_from(x), u32::try_from(y)) else {
            return Err(StoreError::OutOfBounds { x, y, width: self.width, height: self.height });
        };
        if cx >= self.width || cy >= self.height {
            return Err(StoreError::OutOfBounds { x, y, width: self.width, height: self.height });
        }
        Ok(cell_index(self.width, cx, cy))
    }
}

/// Total cells on a `width × height` board.
#[must_use]
pub fn cell_count(width: u32, height: u32) -> usize {
    width as usize * height as usize
}

/// Row-major offset of cell `(x, y)`.
#[must_use]
pub fn cell_index(width: u32, x: u32, y: u32) -> usize {
    y as usize * width as usize + x as usize
}
