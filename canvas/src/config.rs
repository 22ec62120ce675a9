//! Engine configuration. Defaults come from [`crate::consts`]; hosts override
//! individual fields.

use crate::camera::Camera;
use crate::consts::{
    BOARD_HEIGHT, BOARD_WIDTH, GRID_MIN_SCALE, MAX_SCALE, MIN_SCALE, RECONNECT_BACKOFF_MAX_MS, RECONNECT_BACKOFF_MIN_MS,
};
use crate::sync::Backoff;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CanvasConfig {
    pub board_width: u32,
    pub board_height: u32,
    pub min_scale: f64,
    pub max_scale: f64,
    pub grid_min_scale: f64,
    pub backoff_min_ms: f64,
    pub backoff_max_ms: f64,
}

impl Default for CanvasConfig {
    fn default() -> Self {
        Self {
            board_width: BOARD_WIDTH,
            board_height: BOARD_HEIGHT,
            min_scale: MIN_SCALE,
            max_scale: MAX_SCALE,
            grid_min_scale: GRID_MIN_SCALE,
            backoff_min_ms: RECONNECT_BACKOFF_MIN_MS,
            backoff_max_ms: RECONNECT_BACKOFF_MAX_MS,
        }
    }
}

impl CanvasConfig {
    #[must_use]
    pub fn camera(&self) -> Camera {
        Camera::with_bounds(self.min_scale, self.max_scale, self.grid_min_scale)
    }

    #[must_use]
    pub fn backoff(&self) -> Backoff {
        Backoff::new(self.backoff_min_ms, self.backoff_max_ms)
    }
}
