//! Viewport camera: pan/zoom over the board and the screen ↔ board mapping.
//!
//! `offset_x` / `offset_y` are in board units and `scale` is screen pixels
//! per cell, so `screen = (board + offset) * scale`. Every input is clamped
//! or ignored; nothing here fails.

#[cfg(test)]
#[path = "camera_test.rs"]
mod camera_test;

use crate::consts::{GRID_MIN_SCALE, MAX_SCALE, MIN_SCALE};

/// A point in either screen or board space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    #[must_use]
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Axis-aligned rectangle in board space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    #[must_use]
    pub fn contains(&self, p: Point) -> bool {
        p.x >= self.x && p.x < self.x + self.width && p.y >= self.y && p.y < self.y + self.height
    }
}

/// Whole-cell range `[x0, x1) × [y0, y1)`, already clipped to the board.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellRect {
    pub x0: u32,
    pub y0: u32,
    pub x1: u32,
    pub y1: u32,
}

impl CellRect {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.x0 >= self.x1 || self.y0 >= self.y1
    }
}

/// Camera state for pan/zoom on the board.
#[derive(Debug, Clone, Copy)]
pub struct Camera {
    pub scale: f64,
    pub offset_x: f64,
    pub offset_y: f64,
    pub min_scale: f64,
    pub max_scale: f64,
    pub grid_min_scale: f64,
}

impl Default for Camera {
    fn default() -> Self {
        Self::with_bounds(MIN_SCALE, MAX_SCALE, GRID_MIN_SCALE)
    }
}

impl Camera {
    /// Identity camera with custom zoom bounds. Swapped bounds are reordered.
    #[must_use]
    pub fn with_bounds(min_scale: f64, max_scale: f64, grid_min_scale: f64) -> Self {
        let (min_scale, max_scale) = if min_scale <= max_scale { (min_scale, max_scale) } else { (max_scale, min_scale) };
        Self {
            scale: 1.0_f64.clamp(min_scale, max_scale),
            offset_x: 0.0,
            offset_y: 0.0,
            min_scale,
            max_scale,
            grid_min_scale,
        }
    }

    /// Convert a screen-space point (CSS pixels) to board coordinates.
    #[must_use]
    pub fn screen_to_world(&self, screen: Point) -> Point {
        Point { x: screen.x / self.scale - self.offset_x, y: screen.y / self.scale - self.offset_y }
    }

    /// Convert a board-space point to screen coordinates (CSS pixels).
    #[must_use]
    pub fn world_to_screen(&self, world: Point) -> Point {
        Point { x: (world.x + self.offset_x) * self.scale, y: (world.y + self.offset_y) * self.scale }
    }

    /// The cell under a screen point, floored. Not bounds-checked.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn screen_to_board(&self, screen: Point) -> (i64, i64) {
        let world = self.screen_to_world(screen);
        (world.x.floor() as i64, world.y.floor() as i64)
    }

    /// Convert a screen-space distance (pixels) to board-space distance.
    #[must_use]
    pub fn screen_dist_to_world(&self, screen_dist: f64) -> f64 {
        screen_dist / self.scale
    }

    /// Multiply the scale by `factor`, clamped to the camera's bounds. With an
    /// anchor, the board point under it stays under it. Non-finite and
    /// non-positive factors are ignored.
    pub fn zoom(&mut self, factor: f64, anchor: Option<Point>) {
        if !factor.is_finite() || factor <= 0.0 {
            return;
        }
        let new_scale = (self.scale * factor).clamp(self.min_scale, self.max_scale);
        if let Some(a) = anchor {
            let world = self.screen_to_world(a);
            self.offset_x = a.x / new_scale - world.x;
            self.offset_y = a.y / new_scale - world.y;
        }
        self.scale = new_scale;
    }

    /// Shift the view by a screen-pixel delta. Content follows the pointer at
    /// the same speed at every zoom level.
    pub fn pan(&mut self, dx: f64, dy: f64) {
        if !dx.is_finite() || !dy.is_finite() {
            return;
        }
        self.offset_x += dx / self.scale;
        self.offset_y += dy / self.scale;
    }

    /// Whether cells are large enough for grid lines.
    #[must_use]
    pub fn shows_grid(&self) -> bool {
        self.scale >= self.grid_min_scale
    }

    /// Fit the whole board in the viewport and center it.
    pub fn reset(&mut self, viewport_w: f64, viewport_h: f64, board_w: u32, board_h: u32) {
        let bw = f64::from(board_w.max(1));
        let bh = f64::from(board_h.max(1));
        let fit = (viewport_w / bw).min(viewport_h / bh);
        let scale = if fit.is_finite() && fit > 0.0 { fit } else { 1.0 };
        self.scale = scale.clamp(self.min_scale, self.max_scale);
        self.offset_x = (viewport_w / self.scale - bw) * 0.5;
        self.offset_y = (viewport_h / self.scale - bh) * 0.5;
    }

    /// Board-space rectangle covered by a `viewport_w × viewport_h` screen.
    #[must_use]
    pub fn visible_rect(&self, viewport_w: f64, viewport_h: f64) -> Rect {
        let top_left = self.screen_to_world(Point::new(0.0, 0.0));
        Rect {
            x: top_left.x,
            y: top_left.y,
            width: self.screen_dist_to_world(viewport_w),
            height: self.screen_dist_to_world(viewport_h),
        }
    }

    /// Cells at least partly on screen, clipped to the board.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn visible_cells(&self, viewport_w: f64, viewport_h: f64, board_w: u32, board_h: u32) -> CellRect {
        let r = self.visible_rect(viewport_w, viewport_h);
        let clip = |v: f64, max: u32| -> u32 {
            if v.is_nan() || v <= 0.0 {
                0
            } else {
                (v as u64).min(u64::from(max)) as u32
            }
        };
        CellRect {
            x0: clip(r.x.floor(), board_w),
            y0: clip(r.y.floor(), board_h),
            x1: clip((r.x + r.width).ceil(), board_w),
            y1: clip((r.y + r.height).ceil(), board_h),
        }
    }
}
