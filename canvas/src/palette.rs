//! Palette: the ordered color table shared by every client of a board.
//!
//! Cells and paint events carry a [`ColorIndex`] instead of a full color. The
//! palette maps indices back to colors and keeps a precomputed RGBA byte
//! quad per entry so the rasterizer can write pixels without any conversion.

#[cfg(test)]
#[path = "palette_test.rs"]
mod palette_test;

use serde::{Deserialize, Serialize};

use crate::consts::MAX_PALETTE_LEN;

/// Index into a [`Palette`]. This is the wire representation of a color.
pub type ColorIndex = u8;

/// An 8-bit-per-channel RGBA color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    /// An opaque color.
    #[must_use]
    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 0xff }
    }

    /// Parse `#RRGGBB` or `#RRGGBBAA` (leading `#` optional).
    #[must_use]
    pub fn from_hex(hex: &str) -> Option<Self> {
        let digits = hex.strip_prefix('#').unwrap_or(hex);
        if !digits.is_ascii() {
            return None;
        }
        let channel = |i: usize| match u8::from_str_radix(digits.get(i..i + 2)?, 16) {
            Ok(v) => Some(v),
            Err(_) => None,
        };
        match digits.len() {
            6 => Some(Self::rgb(channel(0)?, channel(2)?, channel(4)?)),
            8 => Some(Self { r: channel(0)?, g: channel(2)?, b: channel(4)?, a: channel(6)? }),
            _ => None,
        }
    }

    /// Format as `#rrggbb`, dropping alpha.
    #[must_use]
    pub fn to_hex(self) -> String {
        format!("#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }

    /// Channels in memory order for an RGBA8 bitmap.
    #[must_use]
    pub const fn to_rgba(self) -> [u8; 4] {
        [self.r, self.g, self.b, self.a]
    }

    #[must_use]
    pub const fn from_rgba([r, g, b, a]: [u8; 4]) -> Self {
        Self { r, g, b, a }
    }

    /// Squared euclidean distance in RGB space. Alpha is ignored.
    #[must_use]
    pub fn distance_sq(self, other: Self) -> u32 {
        let d = |a: u8, b: u8| {
            let d = u32::from(a.abs_diff(b));
            d * d
        };
        d(self.r, other.r) + d(self.g, other.g) + d(self.b, other.b)
    }
}

/// Error returned by [`Palette::new`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PaletteError {
    #[error("palette must contain at least one color")]
    Empty,
    #[error("palette has {len} colors; at most {max} are supported")]
    TooLarge { len: usize, max: usize },
}

/// The board color table, shared for the lifetime of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Palette {
    colors: Vec<Color>,
    packed: Vec<[u8; 4]>,
}

/// Default board colors. Index 0 is the white background every blank board
/// starts from.
const DEFAULT_COLORS: [Color; 16] = [
    Color::rgb(0xff, 0xff, 0xff),
    Color::rgb(0xe4, 0xe4, 0xe4),
    Color::rgb(0x88, 0x88, 0x88),
    Color::rgb(0x22, 0x22, 0x22),
    Color::rgb(0xff, 0xa7, 0xd1),
    Color::rgb(0xe5, 0x00, 0x00),
    Color::rgb(0xe5, 0x95, 0x00),
    Color::rgb(0xa0, 0x6a, 0x42),
    Color::rgb(0xe5, 0xd9, 0x00),
    Color::rgb(0x94, 0xe0, 0x44),
    Color::rgb(0x02, 0xbe, 0x01),
    Color::rgb(0x00, 0xd3, 0xdd),
    Color::rgb(0x00, 0x83, 0xc7),
    Color::rgb(0x00, 0x00, 0xea),
    Color::rgb(0xcf, 0x6e, 0xe4),
    Color::rgb(0x82, 0x00, 0x80),
];

impl Palette {
    /// Build a palette from an ordered list of colors.
    ///
    /// # Errors
    ///
    /// Returns [`PaletteError::Empty`] for an empty list and
    /// [`PaletteError::TooLarge`] past [`MAX_PALETTE_LEN`] entries.
    pub fn new(colors: Vec<Color>) -> Result<Self, PaletteError> {
        if colors.is_empty() {
            return Err(PaletteError::Empty);
        }
        if colors.len() > MAX_PALETTE_LEN {
            return Err(PaletteError::TooLarge { len: colors.len(), max: MAX_PALETTE_LEN });
        }
        let packed = colors.iter().map(|c| c.to_rgba()).collect();
        Ok(Self { colors, packed })
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.colors.len()
    }

    /// Always false; a palette holds at least one color.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.colors.is_empty()
    }

    /// Whether `index` refers to an entry.
    #[must_use]
    pub fn contains(&self, index: ColorIndex) -> bool {
        usize::from(index) < self.colors.len()
    }

    #[must_use]
    pub fn color(&self, index: ColorIndex) -> Option<Color> {
        self.colors.get(usize::from(index)).copied()
    }

    /// All colors in index order.
    #[must_use]
    pub fn colors(&self) -> &[Color] {
        &self.colors
    }

    /// Exact reverse lookup.
    #[must_use]
    pub fn index_of(&self, color: Color) -> Option<ColorIndex> {
        self.colors
            .iter()
            .position(|c| *c == color)
            .and_then(to_index)
    }

    /// Closest entry by RGB distance. Ties go to the lower index.
    #[must_use]
    pub fn nearest(&self, color: Color) -> ColorIndex {
        self.colors
            .iter()
            .enumerate()
            .min_by_key(|(_, c)| c.distance_sq(color))
            .and_then(|(i, _)| to_index(i))
            .unwrap_or(0)
    }

    /// Precomputed RGBA bytes for `index`; transparent for unknown indices.
    #[must_use]
    pub fn packed(&self, index: ColorIndex) -> [u8; 4] {
        self.packed.get(usize::from(index)).copied().unwrap_or([0; 4])
    }

    /// The whole packed table, indexed by [`ColorIndex`].
    #[must_use]
    pub fn packed_table(&self) -> &[[u8; 4]] {
        &self.packed
    }
}

fn to_index(i: usize) -> Option<ColorIndex> {
    match ColorIndex::try_from(i) {
        Ok(index) => Some(index),
        Err(_) => None,
    }
}

impl Default for Palette {
    fn default() -> Self {
        let colors = DEFAULT_COLORS.to_vec();
        let packed = colors.iter().map(|c| c.to_rgba()).collect();
        Self { colors, packed }
    }
}
