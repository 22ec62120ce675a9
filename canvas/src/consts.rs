//! Shared numeric constants for the canvas crate.

// ── Board ───────────────────────────────────────────────────────

/// Board width in cells.
pub const BOARD_WIDTH: u32 = 1000;

/// Board height in cells.
pub const BOARD_HEIGHT: u32 = 1000;

/// Upper bound on palette length. Color indices travel as a single byte.
pub const MAX_PALETTE_LEN: usize = 32;

// ── Camera ──────────────────────────────────────────────────────

/// Smallest allowed camera scale (screen pixels per cell).
pub const MIN_SCALE: f64 = 0.25;

/// Largest allowed camera scale (screen pixels per cell).
pub const MAX_SCALE: f64 = 64.0;

/// Scale at and above which cell grid lines are drawn.
pub const GRID_MIN_SCALE: f64 = 8.0;

/// Zoom multiplier per 100 pixels of vertical wheel travel.
pub const WHEEL_ZOOM_STEP: f64 = 1.2;

/// Zoom multiplier applied by the zoom-in / zoom-out controls.
pub const BUTTON_ZOOM_FACTOR: f64 = 1.5;

// ── Guidance overlay ────────────────────────────────────────────

/// Smallest overlay scale (board cells per source pixel).
pub const OVERLAY_MIN_SCALE: f64 = 0.05;

/// Largest overlay scale (board cells per source pixel).
pub const OVERLAY_MAX_SCALE: f64 = 20.0;

/// Default overlay opacity when an image is first placed.
pub const OVERLAY_DEFAULT_OPACITY: f64 = 0.5;

// ── Colors (RGBA) ───────────────────────────────────────────────

/// Fill for screen area outside the board.
pub const BACKDROP_RGBA: [u8; 4] = [0x2b, 0x2b, 0x2b, 0xff];

/// Grid line color, blended over the board.
pub const GRID_LINE_RGBA: [u8; 4] = [0x00, 0x00, 0x00, 0x40];

/// Outline drawn around the overlay while it is in editing mode.
pub const OVERLAY_HIGHLIGHT_RGBA: [u8; 4] = [0x29, 0x8f, 0xff, 0xff];

// ── Sync ────────────────────────────────────────────────────────

/// First resubscribe delay after the event stream drops, in milliseconds.
pub const RECONNECT_BACKOFF_MIN_MS: f64 = 1_000.0;

/// Resubscribe delay ceiling, in milliseconds.
pub const RECONNECT_BACKOFF_MAX_MS: f64 = 10_000.0;

/// Remote paints buffered while a snapshot is in flight. Older entries are
/// dropped past this; the snapshot that lands afterwards covers them.
pub const MAX_PENDING_PAINTS: usize = 65_536;
