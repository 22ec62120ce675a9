use crate::camera::{Camera, Point};
use crate::config::CanvasConfig;
use crate::consts::{BUTTON_ZOOM_FACTOR, WHEEL_ZOOM_STEP};
use crate::input::{Button, InputState, Modifiers, Tool, UiState, WheelDelta};
use crate::overlay::{GuidanceOverlay, OverlayError};
use crate::palette::{ColorIndex, Palette};
use crate::render::Scene;
use crate::replica::{BoardReplica, PaintEvent};
use crate::sync::{BackendGateway, BoardId, SyncClient, SyncStatus};

#[cfg(test)]
#[path = "engine_test.rs"]
mod engine_test;

/// Actions returned from input handlers for the host to process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    None,
    /// A local paint landed and was handed to the backend.
    Painted(PaintEvent),
    /// The eyedropper selected a palette entry.
    ColorPicked(ColorIndex),
    SetCursor(String),
}

/// Core engine state: everything that doesn't depend on the browser.
///
/// Generic over the gateway so tests drive it through the in-process hub.
pub struct EngineCore<G: BackendGateway> {
    pub replica: BoardReplica,
    pub sync: SyncClient<G>,
    pub camera: Camera,
    pub overlay: GuidanceOverlay,
    pub ui: UiState,
    pub input: InputState,
    pub viewport_width: f64,
    pub viewport_height: f64,
    pub dpr: f64,
    now_ms: f64,
    fitted: bool,
}

impl<G: BackendGateway> EngineCore<G> {
    #[must_use]
    pub fn new(gateway: G, board_id: BoardId, palette: Palette, config: CanvasConfig) -> Self {
        Self {
            replica: BoardReplica::new(config.board_width, config.board_height, palette),
            sync: SyncClient::new(gateway, board_id).with_backoff(config.backoff()),
            camera: config.camera(),
            overlay: GuidanceOverlay::new(config.board_width, config.board_height),
            ui: UiState::default(),
            input: InputState::default(),
            viewport_width: 0.0,
            viewport_height: 0.0,
            dpr: 1.0,
            now_ms: 0.0,
            fitted: false,
        }
    }

    // --- Lifecycle ---
    //
    // Every `now_ms` below must come from the same clock, milliseconds since
    // the Unix epoch: it schedules reconnects and stamps `PaintEvent::ts`.

    /// Subscribe to the board and request its snapshot.
    pub fn connect(&mut self, now_ms: f64) {
        self.now_ms = now_ms;
        self.sync.connect(now_ms);
    }

    /// Retry a failed initial load.
    pub fn retry(&mut self, now_ms: f64) {
        self.now_ms = now_ms;
        self.sync.retry(now_ms);
    }

    /// Advance the clock and fold pending backend events into the board.
    pub fn update(&mut self, now_ms: f64) {
        self.now_ms = now_ms;
        self.sync.pump(now_ms, &mut self.replica);
        self.overlay.processed();
    }

    /// Borrow everything the next frame needs. Consumes pending damage.
    pub fn scene(&mut self) -> Scene<'_> {
        let damage = self.replica.raster_mut().take_damage();
        Scene {
            camera: self.camera,
            viewport_width: self.viewport_width,
            viewport_height: self.viewport_height,
            raster: self.replica.raster(),
            damage,
            overlay: self.overlay.layer(),
        }
    }

    /// Tear down: close the stream, free the bitmap, drop the overlay.
    pub fn close(&mut self) {
        self.sync.close();
        self.replica.release();
        self.overlay.clear();
        self.input = InputState::Idle;
    }

    // --- Viewport ---

    /// Update viewport dimensions (CSS pixels) and device pixel ratio. The
    /// first call fits the board to the viewport.
    pub fn set_viewport(&mut self, width_css: f64, height_css: f64, dpr: f64) {
        self.viewport_width = width_css.max(0.0);
        self.viewport_height = height_css.max(0.0);
        self.dpr = if dpr.is_finite() && dpr > 0.0 { dpr } else { 1.0 };
        if !self.fitted && self.viewport_width > 0.0 && self.viewport_height > 0.0 {
            self.reset_view();
            self.fitted = true;
        }
    }

    /// Fit the whole board in the viewport.
    pub fn reset_view(&mut self) {
        self.camera
            .reset(self.viewport_width, self.viewport_height, self.replica.width(), self.replica.height());
    }

    pub fn zoom_in(&mut self) {
        self.camera.zoom(BUTTON_ZOOM_FACTOR, Some(self.viewport_center()));
    }

    pub fn zoom_out(&mut self) {
        self.camera.zoom(1.0 / BUTTON_ZOOM_FACTOR, Some(self.viewport_center()));
    }

    fn viewport_center(&self) -> Point {
        Point::new(self.viewport_width * 0.5, self.viewport_height * 0.5)
    }

    // --- Tool / color ---

    pub fn set_tool(&mut self, tool: Tool) {
        self.ui.tool = tool;
    }

    /// Select the paint color. Returns false for an index off the palette.
    pub fn select_color(&mut self, index: ColorIndex) -> bool {
        if !self.replica.palette().contains(index) {
            return false;
        }
        self.ui.selected_color = index;
        true
    }

    // --- Overlay ---

    /// Decode and place a guidance image.
    ///
    /// # Errors
    ///
    /// [`OverlayError`] when the bytes do not decode.
    pub fn set_overlay_image(&mut self, bytes: &[u8]) -> Result<(), OverlayError> {
        self.overlay.set_image(bytes)
    }

    pub fn set_overlay_editing(&mut self, editing: bool) {
        self.overlay.set_editing(editing);
        if !self.overlay.is_editing() && matches!(self.input, InputState::DraggingOverlay { .. }) {
            self.input = InputState::Idle;
        }
    }

    pub fn clear_overlay(&mut self) {
        self.set_overlay_editing(false);
        self.overlay.clear();
    }

    // --- Input events ---

    pub fn on_pointer_down(&mut self, screen_pt: Point, button: Button, modifiers: Modifiers) -> Vec<Action> {
        if button != Button::Primary || self.ui.tool == Tool::Pan || modifiers.shift {
            self.input = InputState::Panning { last_screen: screen_pt };
            return vec![Action::SetCursor("grabbing".into())];
        }

        let world = self.camera.screen_to_world(screen_pt);
        if self.overlay.is_editing() {
            if self.overlay.contains(world) {
                self.input = InputState::DraggingOverlay { last_world: world };
                return vec![Action::SetCursor("move".into())];
            }
            return vec![Action::None];
        }

        if self.ui.tool == Tool::Eyedropper || modifiers.alt {
            return vec![self.pick_color(world)];
        }

        self.input = InputState::Painting { last_cell: None };
        vec![self.paint_at(screen_pt)]
    }

    pub fn on_pointer_move(&mut self, screen_pt: Point, _modifiers: Modifiers) -> Vec<Action> {
        match self.input {
            InputState::Idle => vec![Action::None],
            InputState::Painting { .. } => vec![self.paint_at(screen_pt)],
            InputState::Panning { last_screen } => {
                self.camera.pan(screen_pt.x - last_screen.x, screen_pt.y - last_screen.y);
                self.input = InputState::Panning { last_screen: screen_pt };
                vec![Action::None]
            }
            InputState::DraggingOverlay { last_world } => {
                let world = self.camera.screen_to_world(screen_pt);
                self.overlay.move_by(world.x - last_world.x, world.y - last_world.y);
                self.input = InputState::DraggingOverlay { last_world: world };
                vec![Action::None]
            }
        }
    }

    pub fn on_pointer_up(&mut self, _screen_pt: Point, _button: Button, _modifiers: Modifiers) -> Vec<Action> {
        let was_idle = matches!(self.input, InputState::Idle);
        self.input = InputState::Idle;
        if was_idle {
            return vec![Action::None];
        }
        vec![Action::SetCursor(self.idle_cursor().into())]
    }

    /// Wheel zooms the camera around the pointer, or scales the overlay
    /// around the pointer while editing it.
    pub fn on_wheel(&mut self, screen_pt: Point, delta: WheelDelta, _modifiers: Modifiers) -> Vec<Action> {
        if !delta.dy.is_finite() || delta.dy == 0.0 {
            return vec![Action::None];
        }
        let factor = WHEEL_ZOOM_STEP.powf(-delta.dy / 100.0);
        if self.overlay.is_editing() {
            let world = self.camera.screen_to_world(screen_pt);
            self.overlay.scale_by(factor, Some(world));
        } else {
            self.camera.zoom(factor, Some(screen_pt));
        }
        vec![Action::None]
    }

    // --- Queries ---

    #[must_use]
    pub fn camera(&self) -> Camera {
        self.camera
    }

    #[must_use]
    pub fn status(&self) -> &SyncStatus {
        self.sync.status()
    }

    #[must_use]
    pub fn can_edit(&self) -> bool {
        self.sync.can_edit()
    }

    #[must_use]
    pub fn online_peers(&self) -> usize {
        self.sync.online_peers()
    }

    /// The cell under a screen point, if it is on the board.
    #[must_use]
    pub fn cell_at(&self, screen_pt: Point) -> Option<(i64, i64)> {
        let (x, y) = self.camera.screen_to_board(screen_pt);
        self.replica.store().contains(x, y).then_some((x, y))
    }

    #[must_use]
    pub fn now_ms(&self) -> f64 {
        self.now_ms
    }

    // --- Internals ---

    fn idle_cursor(&self) -> &'static str {
        match self.ui.tool {
            Tool::Pan => "grab",
            Tool::Paint | Tool::Eyedropper => "crosshair",
        }
    }

    fn paint_at(&mut self, screen_pt: Point) -> Action {
        if !self.sync.can_edit() {
            return Action::None;
        }
        let Some((x, y)) = self.cell_at(screen_pt) else {
            return Action::None;
        };
        if let InputState::Painting { last_cell } = &mut self.input {
            if *last_cell == Some((x, y)) {
                return Action::None;
            }
            *last_cell = Some((x, y));
        }
        match self.sync.paint(&mut self.replica, x, y, self.ui.selected_color, self.now_ms) {
            Ok(Some(event)) => Action::Painted(event),
            Ok(None) => Action::None,
            Err(err) => {
                log::warn!("engine: paint at ({x}, {y}) rejected: {err}");
                Action::None
            }
        }
    }

    /// Overlay color under the pointer mapped to the nearest palette entry,
    /// falling back to the board cell itself.
    fn pick_color(&mut self, world: Point) -> Action {
        let picked = match self.overlay.sample_color_at(world.x, world.y) {
            Some(color) => Some(self.replica.palette().nearest(color)),
            None => {
                let (x, y) = (world.x.floor(), world.y.floor());
                #[allow(clippy::cast_possible_truncation)]
                let cell = self.replica.store().get(x as i64, y as i64);
                match cell {
                    Ok(index) if self.replica.is_loaded() => Some(index),
                    _ => None,
                }
            }
        };
        match picked {
            Some(index) => {
                self.ui.selected_color = index;
                Action::ColorPicked(index)
            }
            None => Action::None,
        }
    }
}
