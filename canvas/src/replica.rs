//! Board replica: the pixel store and its rasterized bitmap kept in lockstep.
//!
//! Local paints and remote events share one apply path, so the bitmap is
//! repainted exactly when a cell actually changes, whoever changed it.
//!
//! Conflict policy is last-applied-wins per cell. Two people painting the
//! same cell at once will each see whichever event reached them last; the
//! cell settles once the stream goes quiet.

#[cfg(test)]
#[path = "replica_test.rs"]
mod replica_test;

use serde::{Deserialize, Serialize};

use crate::palette::{ColorIndex, Palette};
use crate::raster::Rasterizer;
use crate::store::{PixelStore, StoreError};

/// One "set this cell to this color" fact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaintEvent {
    pub x: i64,
    pub y: i64,
    pub color: ColorIndex,
    /// Milliseconds since the Unix epoch, as stamped by the producer.
    pub ts: i64,
    /// Producer identity, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor: Option<String>,
}

impl PaintEvent {
    #[must_use]
    pub fn new(x: i64, y: i64, color: ColorIndex, ts: i64) -> Self {
        Self { x, y, color, ts, actor: None }
    }

    #[must_use]
    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }
}

/// Store, bitmap, and palette for one board.
#[derive(Debug, Clone)]
pub struct BoardReplica {
    palette: Palette,
    store: PixelStore,
    raster: Rasterizer,
    loaded: bool,
}

impl BoardReplica {
    #[must_use]
    pub fn new(width: u32, height: u32, palette: Palette) -> Self {
        Self {
            store: PixelStore::new(width, height, palette.len()),
            raster: Rasterizer::new(width, height),
            palette,
            loaded: false,
        }
    }

    /// Apply one cell write. Returns whether the cell changed; the bitmap is
    /// repainted only then.
    ///
    /// # Errors
    ///
    /// Propagates [`StoreError::OutOfBounds`] and
    /// [`StoreError::InvalidColorIndex`] from the store.
    pub fn apply(&mut self, x: i64, y: i64, color: ColorIndex) -> Result<bool, StoreError> {
        let changed = self.store.set(x, y, color)?;
        if changed {
            if let (Ok(cx), Ok(cy)) = (u32::try_from(x), u32::try_from(y)) {
                self.raster.repaint_cell(cx, cy, color, &self.palette);
            }
        }
        Ok(changed)
    }

    /// Apply a paint event from the stream.
    ///
    /// # Errors
    ///
    /// Same as [`apply`](Self::apply).
    pub fn apply_event(&mut self, event: &PaintEvent) -> Result<bool, StoreError> {
        self.apply(event.x, event.y, event.color)
    }

    /// Replace the board with a snapshot and repaint the whole bitmap.
    ///
    /// # Errors
    ///
    /// [`StoreError::MalformedSnapshot`] or [`StoreError::InvalidColorIndex`];
    /// the replica keeps its previous content in that case.
    pub fn load_snapshot(&mut self, bytes: &[u8]) -> Result<(), StoreError> {
        self.store.load(bytes)?;
        self.raster.repaint_all(&self.store, &self.palette);
        self.loaded = true;
        Ok(())
    }

    /// Whether a snapshot has been applied since construction or release.
    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    #[must_use]
    pub fn palette(&self) -> &Palette {
        &self.palette
    }

    #[must_use]
    pub fn store(&self) -> &PixelStore {
        &self.store
    }

    #[must_use]
    pub fn raster(&self) -> &Rasterizer {
        &self.raster
    }

    pub fn raster_mut(&mut self) -> &mut Rasterizer {
        &mut self.raster
    }

    #[must_use]
    pub fn width(&self) -> u32 {
        self.store.width()
    }

    #[must_use]
    pub fn height(&self) -> u32 {
        self.store.height()
    }

    /// Drop the bitmap and forget the loaded state. The store keeps its last
    /// content so a later snapshot replaces it wholesale.
    pub fn release(&mut self) {
        self.raster.release();
        self.loaded = false;
    }
}
