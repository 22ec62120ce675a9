//! Rendering: frame composition and the continuous render loop.
//!
//! A frame is composed from a read-only [`Scene`] onto a [`Surface`]: clear,
//! apply the camera transform, blit the board bitmap, draw the guidance
//! overlay, draw the cell grid when zoomed in, restore. Nothing here mutates
//! application state.
//!
//! The loop redraws every frame regardless of what changed, so camera pans,
//! overlay drags, and remote paints all show up on the next tick without any
//! call site asking for a redraw. Frame timing comes from a
//! [`FrameScheduler`] (`requestAnimationFrame` in the browser, a tokio
//! interval or a test double elsewhere).
//!
//! Render failures are logged and the loop keeps going; a bad frame is never
//! fatal.

#[cfg(test)]
#[path = "render_test.rs"]
mod render_test;

use crate::camera::{Camera, CellRect};
use crate::overlay::OverlayLayer;
use crate::raster::{DamageRect, Rasterizer};

/// Error raised by a drawing backend.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RenderError {
    #[error("surface error: {0}")]
    Surface(String),
    #[error("frame scheduling failed: {0}")]
    Schedule(String),
}

/// Drawing backend for one viewport.
///
/// Board-space drawing calls (`blit_board`, `draw_overlay`, `draw_grid`) are
/// made between `apply_transform` and `restore`.
pub trait Surface {
    /// Fill the whole viewport with the backdrop.
    ///
    /// # Errors
    ///
    /// Backend failure.
    fn clear(&mut self) -> Result<(), RenderError>;

    /// Map board space onto the viewport using `camera`.
    ///
    /// # Errors
    ///
    /// Backend failure.
    fn apply_transform(&mut self, camera: &Camera) -> Result<(), RenderError>;

    /// Draw the board bitmap. `damage` names the cells repainted since the
    /// last frame, for backends that keep their own copy of the bitmap.
    ///
    /// # Errors
    ///
    /// Backend failure.
    fn blit_board(&mut self, raster: &Rasterizer, damage: Option<DamageRect>) -> Result<(), RenderError>;

    /// Draw the overlay image at its placement and opacity, outlined when
    /// `highlight` is set.
    ///
    /// # Errors
    ///
    /// Backend failure.
    fn draw_overlay(&mut self, layer: &OverlayLayer<'_>) -> Result<(), RenderError>;

    /// Draw cell boundaries over `cells`.
    ///
    /// # Errors
    ///
    /// Backend failure.
    fn draw_grid(&mut self, cells: CellRect) -> Result<(), RenderError>;

    /// Drop the camera transform.
    ///
    /// # Errors
    ///
    /// Backend failure.
    fn restore(&mut self) -> Result<(), RenderError>;
}

/// Everything one frame needs, borrowed from the engine.
#[derive(Debug, Clone, Copy)]
pub struct Scene<'a> {
    pub camera: Camera,
    pub viewport_width: f64,
    pub viewport_height: f64,
    pub raster: &'a Rasterizer,
    pub damage: Option<DamageRect>,
    pub overlay: Option<OverlayLayer<'a>>,
}

/// What a composed frame contained.
#[allow(clippy::struct_excessive_bools)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameReport {
    pub board: bool,
    pub overlay: bool,
    pub grid: bool,
}

/// Compose one frame. The transform is restored even when a layer fails.
///
/// # Errors
///
/// The first backend error encountered.
pub fn compose_frame<S: Surface + ?Sized>(surface: &mut S, scene: &Scene<'_>) -> Result<FrameReport, RenderError> {
    surface.clear()?;
    surface.apply_transform(&scene.camera)?;
    let drawn = draw_layers(surface, scene);
    let restored = surface.restore();
    let report = drawn?;
    restored?;
    Ok(report)
}

fn draw_layers<S: Surface + ?Sized>(surface: &mut S, scene: &Scene<'_>) -> Result<FrameReport, RenderError> {
    let mut report = FrameReport::default();

    // Layer 1: board bitmap. Nothing to show until the first snapshot lands.
    if scene.raster.is_ready() {
        surface.blit_board(scene.raster, scene.damage)?;
        report.board = true;
    }

    // Layer 2: guidance overlay.
    if let Some(layer) = &scene.overlay {
        surface.draw_overlay(layer)?;
        report.overlay = true;
    }

    // Layer 3: grid, only where cells are big enough to read.
    if scene.camera.shows_grid() {
        let cells = scene.camera.visible_cells(
            scene.viewport_width,
            scene.viewport_height,
            scene.raster.width(),
            scene.raster.height(),
        );
        if !cells.is_empty() {
            surface.draw_grid(cells)?;
            report.grid = true;
        }
    }

    Ok(report)
}

// =============================================================
// Render loop
// =============================================================

/// Opaque id of a pending frame request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameHandle(pub i32);

/// Source of frame callbacks.
pub trait FrameScheduler {
    /// Ask for one callback on the next frame.
    ///
    /// # Errors
    ///
    /// [`RenderError::Schedule`] when the host refuses.
    fn request_frame(&mut self) -> Result<FrameHandle, RenderError>;

    /// Withdraw a pending request.
    fn cancel_frame(&mut self, handle: FrameHandle);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Stopped,
    Running { pending: Option<FrameHandle> },
}

/// Frame counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopStats {
    /// Frames composed without error.
    pub rendered: u64,
    /// Of those, frames drawn before the board bitmap existed.
    pub without_board: u64,
    /// Ticks ignored because the loop was stopped.
    pub skipped: u64,
    /// Frames whose composition failed.
    pub failed: u64,
}

/// `Stopped ⇄ Running` loop driving [`compose_frame`] once per scheduled frame.
#[derive(Debug)]
pub struct RenderLoop<F: FrameScheduler> {
    scheduler: F,
    state: LoopState,
    stats: LoopStats,
}

impl<F: FrameScheduler> RenderLoop<F> {
    #[must_use]
    pub fn new(scheduler: F) -> Self {
        Self { scheduler, state: LoopState::Stopped, stats: LoopStats::default() }
    }

    /// Begin requesting frames. No-op while already running.
    ///
    /// # Errors
    ///
    /// The scheduler's error; the loop stays stopped.
    pub fn start(&mut self) -> Result<(), RenderError> {
        if self.is_running() {
            return Ok(());
        }
        let handle = self.scheduler.request_frame()?;
        self.state = LoopState::Running { pending: Some(handle) };
        log::debug!("render loop started");
        Ok(())
    }

    /// Stop and cancel the pending frame, if any.
    pub fn stop(&mut self) {
        if let LoopState::Running { pending: Some(handle) } = self.state {
            self.scheduler.cancel_frame(handle);
        }
        if self.is_running() {
            log::debug!("render loop stopped");
        }
        self.state = LoopState::Stopped;
    }

    /// Frame callback: compose, then request the next frame. Returns whether
    /// a frame was composed. Errors are logged and swallowed.
    pub fn tick<S: Surface + ?Sized>(&mut self, surface: &mut S, scene: &Scene<'_>) -> bool {
        if !self.is_running() {
            self.stats.skipped += 1;
            return false;
        }
        self.state = LoopState::Running { pending: None };

        let composed = match compose_frame(surface, scene) {
            Ok(report) => {
                self.stats.rendered += 1;
                if !report.board {
                    self.stats.without_board += 1;
                }
                true
            }
            Err(err) => {
                self.stats.failed += 1;
                log::warn!("render: frame failed: {err}");
                false
            }
        };

        match self.scheduler.request_frame() {
            Ok(handle) => self.state = LoopState::Running { pending: Some(handle) },
            Err(err) => {
                log::warn!("render: could not schedule next frame, stopping: {err}");
                self.state = LoopState::Stopped;
            }
        }
        composed
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        matches!(self.state, LoopState::Running { .. })
    }

    #[must_use]
    pub fn state(&self) -> LoopState {
        self.state
    }

    #[must_use]
    pub fn stats(&self) -> LoopStats {
        self.stats
    }

    #[must_use]
    pub fn scheduler(&self) -> &F {
        &self.scheduler
    }

    pub fn scheduler_mut(&mut self) -> &mut F {
        &mut self.scheduler
    }
}

impl<F: FrameScheduler> Drop for RenderLoop<F> {
    fn drop(&mut self) {
        self.stop();
    }
}
