//! Snapshot export: raw cell bytes or a rendered PNG.

use std::path::Path;

use canvas::config::CanvasConfig;
use canvas::palette::Palette;
use canvas::replica::BoardReplica;
use canvas::store::StoreError;
use image::RgbaImage;

use crate::error::CliError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// One palette index per cell, exactly as served.
    Raw,
    /// The board rendered one pixel per cell.
    Png,
}

impl OutputFormat {
    /// Pick the format from the file extension.
    ///
    /// # Errors
    ///
    /// [`CliError::UnsupportedOutput`] for anything but `.png` and `.bin`.
    pub fn from_path(path: &Path) -> Result<Self, CliError> {
        match path.extension().and_then(|e| e.to_str()).map(str::to_ascii_lowercase).as_deref() {
            Some("png") => Ok(Self::Png),
            Some("bin") => Ok(Self::Raw),
            _ => Err(CliError::UnsupportedOutput(path.display().to_string())),
        }
    }
}

/// Render snapshot bytes through the same palette and rasterizer the
/// browser uses.
///
/// # Errors
///
/// Store errors when the bytes are not a snapshot of a default-sized board.
pub fn render_snapshot(bytes: &[u8]) -> Result<RgbaImage, CliError> {
    let config = CanvasConfig::default();
    let mut replica = BoardReplica::new(config.board_width, config.board_height, Palette::default());
    replica.load_snapshot(bytes)?;
    let pixels = replica.raster().as_bytes().to_vec();
    let actual = pixels.len();
    RgbaImage::from_raw(replica.width(), replica.height(), pixels).ok_or_else(|| {
        CliError::Store(StoreError::MalformedSnapshot { expected: replica.store().len() * 4, actual })
    })
}

#[cfg(test)]
#[path = "export_test.rs"]
mod tests;
