//! Browser host: a `CanvasRenderingContext2d` surface, a
//! `requestAnimationFrame` scheduler, a gateway that forwards to host
//! JavaScript, and the exported [`CanvasApp`] that wires them to
//! [`EngineCore`].
//!
//! The host page owns networking. It implements [`HostGateway`] and pushes
//! results back through the `deliver_*` methods on [`CanvasApp`]; those only
//! enqueue, and the next animation frame folds them into the board.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use js_sys::{Array, Date, Object, Reflect};
use uuid::Uuid;
use wasm_bindgen::closure::Closure;
use wasm_bindgen::prelude::*;
use wasm_bindgen::{Clamped, JsCast};
use web_sys::{CanvasRenderingContext2d, HtmlCanvasElement, ImageData, Window};

use crate::camera::{Camera, CellRect, Point};
use crate::config::CanvasConfig;
use crate::consts::{BACKDROP_RGBA, GRID_LINE_RGBA, OVERLAY_HIGHLIGHT_RGBA};
use crate::engine::{Action, EngineCore};
use crate::input::{Button, Modifiers, Tool, WheelDelta};
use crate::overlay::OverlayLayer;
use crate::palette::Palette;
use crate::raster::{DamageRect, Rasterizer};
use crate::render::{FrameHandle, FrameScheduler, RenderError, RenderLoop, Surface};
use crate::replica::PaintEvent;
use crate::sync::{BackendGateway, BoardId, EventSink, GatewayError, Subscription, SyncEvent, SyncStatus};

fn surface_err(e: JsValue) -> RenderError {
    RenderError::Surface(format!("{e:?}"))
}

fn css_rgba([r, g, b, a]: [u8; 4]) -> String {
    format!("rgba({r}, {g}, {b}, {})", f64::from(a) / 255.0)
}

fn context_2d(canvas: &HtmlCanvasElement) -> Result<CanvasRenderingContext2d, JsValue> {
    canvas
        .get_context("2d")?
        .ok_or_else(|| JsValue::from_str("2d context unavailable"))?
        .dyn_into::<CanvasRenderingContext2d>()
        .map_err(JsValue::from)
}

fn offscreen_canvas(window: &Window) -> Result<HtmlCanvasElement, JsValue> {
    let document = window.document().ok_or_else(|| JsValue::from_str("no document"))?;
    document.create_element("canvas")?.dyn_into::<HtmlCanvasElement>().map_err(JsValue::from)
}

// =============================================================
// Surface
// =============================================================

/// A detached canvas holding a copy of some pixel buffer.
struct Offscreen {
    canvas: HtmlCanvasElement,
    ctx: CanvasRenderingContext2d,
}

impl Offscreen {
    fn new(window: &Window) -> Result<Self, JsValue> {
        let canvas = offscreen_canvas(window)?;
        let ctx = context_2d(&canvas)?;
        Ok(Self { canvas, ctx })
    }

    fn ensure_size(&self, width: u32, height: u32) -> bool {
        if self.canvas.width() == width && self.canvas.height() == height {
            return false;
        }
        self.canvas.set_width(width);
        self.canvas.set_height(height);
        true
    }

    fn put(&self, bytes: &[u8], x: u32, y: u32, width: u32, height: u32) -> Result<(), RenderError> {
        let data = ImageData::new_with_u8_clamped_array_and_sh(Clamped(bytes), width, height).map_err(surface_err)?;
        self.ctx.put_image_data(&data, f64::from(x), f64::from(y)).map_err(surface_err)
    }
}

/// Draws onto the visible canvas. The board bitmap lives on an offscreen
/// canvas that receives only damaged regions each frame.
pub struct WebSurface {
    ctx: CanvasRenderingContext2d,
    board: Offscreen,
    board_synced: bool,
    overlay: Offscreen,
    overlay_revision: Option<(u64, u32)>,
    camera: Camera,
    viewport_width: f64,
    viewport_height: f64,
    dpr: f64,
}

impl WebSurface {
    /// # Errors
    ///
    /// Fails when a 2D context or offscreen canvas cannot be created.
    pub fn new(window: &Window, canvas: &HtmlCanvasElement) -> Result<Self, JsValue> {
        Ok(Self {
            ctx: context_2d(canvas)?,
            board: Offscreen::new(window)?,
            board_synced: false,
            overlay: Offscreen::new(window)?,
            overlay_revision: None,
            camera: Camera::default(),
            viewport_width: 0.0,
            viewport_height: 0.0,
            dpr: 1.0,
        })
    }

    pub fn set_viewport(&mut self, width_css: f64, height_css: f64, dpr: f64) {
        self.viewport_width = width_css;
        self.viewport_height = height_css;
        self.dpr = dpr;
    }

    /// Force a full upload on the next blit, e.g. after the bitmap was
    /// released and rebuilt.
    pub fn invalidate(&mut self) {
        self.board_synced = false;
        self.overlay_revision = None;
    }

    fn line_width(&self) -> f64 {
        1.0 / self.camera.scale
    }
}

impl Surface for WebSurface {
    fn clear(&mut self) -> Result<(), RenderError> {
        self.ctx.set_transform(self.dpr, 0.0, 0.0, self.dpr, 0.0, 0.0).map_err(surface_err)?;
        self.ctx.set_fill_style_str(&css_rgba(BACKDROP_RGBA));
        self.ctx.fill_rect(0.0, 0.0, self.viewport_width, self.viewport_height);
        Ok(())
    }

    fn apply_transform(&mut self, camera: &Camera) -> Result<(), RenderError> {
        self.camera = *camera;
        let s = self.dpr * camera.scale;
        self.ctx.set_transform(s, 0.0, 0.0, s, s * camera.offset_x, s * camera.offset_y).map_err(surface_err)?;
        self.ctx.set_image_smoothing_enabled(false);
        Ok(())
    }

    fn blit_board(&mut self, raster: &Rasterizer, damage: Option<DamageRect>) -> Result<(), RenderError> {
        let (w, h) = (raster.width(), raster.height());
        if self.board.ensure_size(w, h) || !self.board_synced {
            self.board.put(raster.as_bytes(), 0, 0, w, h)?;
            self.board_synced = true;
        } else if let Some(rect) = damage {
            let bytes = raster.region(rect);
            self.board.put(&bytes, rect.x, rect.y, rect.width, rect.height)?;
        }
        self.ctx.draw_image_with_html_canvas_element(&self.board.canvas, 0.0, 0.0).map_err(surface_err)
    }

    fn draw_overlay(&mut self, layer: &OverlayLayer<'_>) -> Result<(), RenderError> {
        if self.overlay_revision != Some(layer.revision) {
            let (w, h) = layer.image.dimensions();
            self.overlay.ensure_size(w, h);
            self.overlay.put(layer.image.as_raw(), 0, 0, w, h)?;
            self.overlay_revision = Some(layer.revision);
        }
        let b = layer.bounds;
        self.ctx.set_global_alpha(layer.opacity);
        let drawn = self
            .ctx
            .draw_image_with_html_canvas_element_and_dw_and_dh(&self.overlay.canvas, b.x, b.y, b.width, b.height)
            .map_err(surface_err);
        self.ctx.set_global_alpha(1.0);
        drawn?;
        if layer.highlight {
            self.ctx.set_stroke_style_str(&css_rgba(OVERLAY_HIGHLIGHT_RGBA));
            self.ctx.set_line_width(2.0 * self.line_width());
            self.ctx.stroke_rect(b.x, b.y, b.width, b.height);
        }
        Ok(())
    }

    fn draw_grid(&mut self, cells: CellRect) -> Result<(), RenderError> {
        let (x0, y0, x1, y1) = (f64::from(cells.x0), f64::from(cells.y0), f64::from(cells.x1), f64::from(cells.y1));
        self.ctx.begin_path();
        for x in cells.x0..=cells.x1 {
            self.ctx.move_to(f64::from(x), y0);
            self.ctx.line_to(f64::from(x), y1);
        }
        for y in cells.y0..=cells.y1 {
            self.ctx.move_to(x0, f64::from(y));
            self.ctx.line_to(x1, f64::from(y));
        }
        self.ctx.set_stroke_style_str(&css_rgba(GRID_LINE_RGBA));
        self.ctx.set_line_width(self.line_width());
        self.ctx.stroke();
        Ok(())
    }

    fn restore(&mut self) -> Result<(), RenderError> {
        self.ctx.set_transform(1.0, 0.0, 0.0, 1.0, 0.0, 0.0).map_err(surface_err)
    }
}

// =============================================================
// Scheduler
// =============================================================

/// Schedules frames with `requestAnimationFrame`. The callback is installed
/// after construction because it needs a handle back to the app.
pub struct RafScheduler {
    window: Window,
    callback: Option<Closure<dyn FnMut(f64)>>,
}

impl RafScheduler {
    #[must_use]
    pub fn new(window: Window) -> Self {
        Self { window, callback: None }
    }

    pub fn set_callback(&mut self, callback: Closure<dyn FnMut(f64)>) {
        self.callback = Some(callback);
    }
}

impl FrameScheduler for RafScheduler {
    fn request_frame(&mut self) -> Result<FrameHandle, RenderError> {
        let Some(callback) = &self.callback else {
            return Err(RenderError::Schedule("no frame callback installed".into()));
        };
        self.window
            .request_animation_frame(callback.as_ref().unchecked_ref())
            .map(FrameHandle)
            .map_err(|e| RenderError::Schedule(format!("{e:?}")))
    }

    fn cancel_frame(&mut self, handle: FrameHandle) {
        if let Err(e) = self.window.cancel_animation_frame(handle.0) {
            log::warn!("render: cancel frame {} failed: {e:?}", handle.0);
        }
    }
}

// =============================================================
// Gateway
// =============================================================

#[wasm_bindgen]
extern "C" {
    /// Host object that talks to the backend. Results come back through
    /// the `deliver_*` methods on [`CanvasApp`].
    pub type HostGateway;

    #[wasm_bindgen(method, js_name = requestSnapshot)]
    fn request_snapshot(this: &HostGateway, board_id: &str);

    #[wasm_bindgen(method, catch, js_name = publishPaint)]
    fn publish_paint(this: &HostGateway, board_id: &str, x: f64, y: f64, color: u8, ts: f64) -> Result<(), JsValue>;

    #[wasm_bindgen(method, catch)]
    fn subscribe(this: &HostGateway, board_id: &str) -> Result<(), JsValue>;

    #[wasm_bindgen(method)]
    fn unsubscribe(this: &HostGateway, board_id: &str);
}

/// Where host callbacks land: the sinks of the newest request and stream.
#[derive(Default)]
struct SinkSlots {
    snapshot: Option<EventSink>,
    stream: Option<EventSink>,
}

impl SinkSlots {
    fn to_snapshot(&mut self, event: SyncEvent) {
        if let Some(sink) = self.snapshot.take() {
            sink.send(event);
        }
    }

    fn to_stream(&self, event: SyncEvent) {
        if let Some(sink) = &self.stream {
            sink.send(event);
        }
    }
}

fn js_gateway_error(e: JsValue) -> GatewayError {
    GatewayError::Transport(e.as_string().unwrap_or_else(|| format!("{e:?}")))
}

pub struct JsGateway {
    host: Rc<HostGateway>,
    slots: Rc<RefCell<SinkSlots>>,
}

pub struct JsSubscription {
    host: Rc<HostGateway>,
    slots: Rc<RefCell<SinkSlots>>,
    board_id: String,
    active: bool,
}

impl Subscription for JsSubscription {
    fn unsubscribe(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;
        self.slots.borrow_mut().stream = None;
        self.host.unsubscribe(&self.board_id);
    }
}

impl Drop for JsSubscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl BackendGateway for JsGateway {
    type Subscription = JsSubscription;

    fn request_snapshot(&mut self, board: BoardId, sink: EventSink) {
        self.slots.borrow_mut().snapshot = Some(sink);
        self.host.request_snapshot(&board.to_string());
    }

    #[allow(clippy::cast_precision_loss)]
    fn append_paint_event(&mut self, board: BoardId, event: &PaintEvent) -> Result<(), GatewayError> {
        self.host
            .publish_paint(&board.to_string(), event.x as f64, event.y as f64, event.color, event.ts as f64)
            .map_err(|e| GatewayError::PublishFailure(e.as_string().unwrap_or_else(|| format!("{e:?}"))))
    }

    fn subscribe(&mut self, board: BoardId, sink: EventSink) -> Result<JsSubscription, GatewayError> {
        let board_id = board.to_string();
        self.slots.borrow_mut().stream = Some(sink);
        if let Err(e) = self.host.subscribe(&board_id) {
            self.slots.borrow_mut().stream = None;
            return Err(js_gateway_error(e));
        }
        Ok(JsSubscription { host: Rc::clone(&self.host), slots: Rc::clone(&self.slots), board_id, active: true })
    }
}

// =============================================================
// App
// =============================================================

struct AppInner {
    core: EngineCore<JsGateway>,
    surface: WebSurface,
    render: RenderLoop<RafScheduler>,
}

/// The engine's only clock: milliseconds since the Unix epoch. The
/// page-relative `requestAnimationFrame` timestamp never reaches the engine.
fn wall_clock_ms() -> f64 {
    Date::now()
}

impl AppInner {
    fn frame(&mut self) {
        let was_ready = self.core.replica.raster().is_ready();
        self.core.update(wall_clock_ms());
        if !was_ready && self.core.replica.raster().is_ready() {
            self.surface.invalidate();
        }
        let AppInner { core, surface, render } = self;
        let scene = core.scene();
        render.tick(surface, &scene);
    }
}

fn modifiers(shift: bool, ctrl: bool, alt: bool, meta: bool) -> Modifiers {
    Modifiers { shift, ctrl, alt, meta }
}

fn set(obj: &Object, key: &str, value: &JsValue) -> Result<(), JsValue> {
    Reflect::set(obj, &JsValue::from_str(key), value).map(|_| ())
}

#[allow(clippy::cast_precision_loss)]
fn actions_to_js(actions: Vec<Action>) -> Result<Array, JsValue> {
    let out = Array::new();
    for action in actions {
        let obj = Object::new();
        match action {
            Action::None => continue,
            Action::Painted(event) => {
                set(&obj, "kind", &"painted".into())?;
                set(&obj, "x", &(event.x as f64).into())?;
                set(&obj, "y", &(event.y as f64).into())?;
                set(&obj, "color", &event.color.into())?;
                set(&obj, "ts", &(event.ts as f64).into())?;
            }
            Action::ColorPicked(color) => {
                set(&obj, "kind", &"colorPicked".into())?;
                set(&obj, "color", &color.into())?;
            }
            Action::SetCursor(cursor) => {
                set(&obj, "kind", &"cursor".into())?;
                set(&obj, "cursor", &cursor.into())?;
            }
        }
        out.push(&obj);
    }
    Ok(out)
}

fn status_name(status: &SyncStatus) -> &'static str {
    match status {
        SyncStatus::Idle => "idle",
        SyncStatus::Loading => "loading",
        SyncStatus::Live => "live",
        SyncStatus::Reconnecting => "reconnecting",
        SyncStatus::Failed(_) => "failed",
        SyncStatus::Closed => "closed",
    }
}

/// The canvas engine as seen from JavaScript.
#[wasm_bindgen]
pub struct CanvasApp {
    inner: Rc<RefCell<AppInner>>,
    slots: Rc<RefCell<SinkSlots>>,
}

#[wasm_bindgen]
impl CanvasApp {
    /// Mount on `canvas` for `board_id`, talking to the backend via `host`.
    ///
    /// # Errors
    ///
    /// Throws on a malformed board id or when the canvas has no 2D context.
    #[wasm_bindgen(constructor)]
    pub fn new(canvas: HtmlCanvasElement, host: HostGateway, board_id: &str) -> Result<CanvasApp, JsValue> {
        console_error_panic_hook::set_once();
        if console_log::init_with_level(log::Level::Info).is_err() {
            log::debug!("canvas: logger already installed");
        }

        let board_id = Uuid::parse_str(board_id).map_err(|e| JsValue::from_str(&e.to_string()))?;
        let window = web_sys::window().ok_or_else(|| JsValue::from_str("no window"))?;
        let slots = Rc::new(RefCell::new(SinkSlots::default()));
        let gateway = JsGateway { host: Rc::new(host), slots: Rc::clone(&slots) };

        let inner = Rc::new(RefCell::new(AppInner {
            core: EngineCore::new(gateway, board_id, Palette::default(), CanvasConfig::default()),
            surface: WebSurface::new(&window, &canvas)?,
            render: RenderLoop::new(RafScheduler::new(window)),
        }));

        let weak: Weak<RefCell<AppInner>> = Rc::downgrade(&inner);
        let callback = Closure::wrap(Box::new(move |_page_ts: f64| {
            if let Some(inner) = weak.upgrade() {
                inner.borrow_mut().frame();
            }
        }) as Box<dyn FnMut(f64)>);
        inner.borrow_mut().render.scheduler_mut().set_callback(callback);

        Ok(CanvasApp { inner, slots })
    }

    /// Connect to the board and start rendering.
    ///
    /// # Errors
    ///
    /// Throws when the first animation frame cannot be requested.
    pub fn start(&self) -> Result<(), JsValue> {
        let mut inner = self.inner.borrow_mut();
        inner.core.connect(wall_clock_ms());
        inner.render.start().map_err(|e| JsValue::from_str(&e.to_string()))
    }

    /// Stop rendering, close the stream, and free the bitmap.
    pub fn destroy(&self) {
        let mut inner = self.inner.borrow_mut();
        inner.render.stop();
        inner.core.close();
        inner.surface.invalidate();
    }

    pub fn retry(&self) {
        self.inner.borrow_mut().core.retry(wall_clock_ms());
    }

    pub fn resize(&self, width_css: f64, height_css: f64, dpr: f64) {
        let mut inner = self.inner.borrow_mut();
        inner.core.set_viewport(width_css, height_css, dpr);
        inner.surface.set_viewport(width_css, height_css, dpr);
    }

    // --- Input ---

    /// # Errors
    ///
    /// Throws if the action list cannot be built.
    #[allow(clippy::too_many_arguments, clippy::fn_params_excessive_bools)]
    pub fn pointer_down(&self, x: f64, y: f64, button: i16, shift: bool, ctrl: bool, alt: bool, meta: bool) -> Result<Array, JsValue> {
        let Some(button) = Button::from_dom(button) else {
            return Ok(Array::new());
        };
        let actions = self.inner.borrow_mut().core.on_pointer_down(Point::new(x, y), button, modifiers(shift, ctrl, alt, meta));
        actions_to_js(actions)
    }

    /// # Errors
    ///
    /// Throws if the action list cannot be built.
    #[allow(clippy::fn_params_excessive_bools)]
    pub fn pointer_move(&self, x: f64, y: f64, shift: bool, ctrl: bool, alt: bool, meta: bool) -> Result<Array, JsValue> {
        let actions = self.inner.borrow_mut().core.on_pointer_move(Point::new(x, y), modifiers(shift, ctrl, alt, meta));
        actions_to_js(actions)
    }

    /// # Errors
    ///
    /// Throws if the action list cannot be built.
    pub fn pointer_up(&self, x: f64, y: f64, button: i16) -> Result<Array, JsValue> {
        let button = Button::from_dom(button).unwrap_or(Button::Primary);
        let actions = self.inner.borrow_mut().core.on_pointer_up(Point::new(x, y), button, Modifiers::default());
        actions_to_js(actions)
    }

    pub fn wheel(&self, x: f64, y: f64, dx: f64, dy: f64) {
        self.inner.borrow_mut().core.on_wheel(Point::new(x, y), WheelDelta { dx, dy }, Modifiers::default());
    }

    // --- Controls ---

    pub fn select_color(&self, index: u8) -> bool {
        self.inner.borrow_mut().core.select_color(index)
    }

    pub fn set_tool(&self, name: &str) -> bool {
        let Some(tool) = Tool::from_name(name) else {
            return false;
        };
        self.inner.borrow_mut().core.set_tool(tool);
        true
    }

    pub fn zoom_in(&self) {
        self.inner.borrow_mut().core.zoom_in();
    }

    pub fn zoom_out(&self) {
        self.inner.borrow_mut().core.zoom_out();
    }

    pub fn reset_view(&self) {
        self.inner.borrow_mut().core.reset_view();
    }

    // --- Overlay ---

    /// # Errors
    ///
    /// Throws when the bytes are not a supported image.
    pub fn set_overlay_image(&self, bytes: &[u8]) -> Result<(), JsValue> {
        self.inner.borrow_mut().core.set_overlay_image(bytes).map_err(|e| JsValue::from_str(&e.to_string()))
    }

    pub fn set_overlay_pixelation(&self, factor: u32) {
        self.inner.borrow_mut().core.overlay.set_pixelation(factor);
    }

    pub fn set_overlay_opacity(&self, opacity: f64) {
        self.inner.borrow_mut().core.overlay.set_opacity(opacity);
    }

    pub fn set_overlay_editing(&self, editing: bool) {
        self.inner.borrow_mut().core.set_overlay_editing(editing);
    }

    pub fn clear_overlay(&self) {
        self.inner.borrow_mut().core.clear_overlay();
    }

    // --- Queries ---

    pub fn status(&self) -> String {
        status_name(self.inner.borrow().core.status()).to_owned()
    }

    pub fn can_edit(&self) -> bool {
        self.inner.borrow().core.can_edit()
    }

    #[allow(clippy::cast_possible_truncation)]
    pub fn online_peers(&self) -> u32 {
        self.inner.borrow().core.online_peers() as u32
    }

    // --- Backend callbacks ---

    pub fn deliver_snapshot(&self, bytes: &[u8]) {
        self.slots.borrow_mut().to_snapshot(SyncEvent::Snapshot(Ok(bytes.to_vec())));
    }

    /// `not_found` maps to a missing board; anything else is a transport
    /// failure.
    pub fn deliver_snapshot_error(&self, code: &str, message: &str) {
        let error = if code == "not_found" { GatewayError::NotFound } else { GatewayError::Transport(message.to_owned()) };
        self.slots.borrow_mut().to_snapshot(SyncEvent::Snapshot(Err(error)));
    }

    #[allow(clippy::cast_possible_truncation)]
    pub fn deliver_paint(&self, x: f64, y: f64, color: u8, ts: f64) {
        let event = PaintEvent::new(x as i64, y as i64, color, ts as i64);
        self.slots.borrow().to_stream(SyncEvent::Paint(event));
    }

    pub fn deliver_presence(&self, count: u32) {
        self.slots.borrow().to_stream(SyncEvent::Presence(count as usize));
    }

    #[allow(clippy::cast_possible_truncation)]
    pub fn deliver_publish_failed(&self, x: f64, y: f64, color: u8, ts: f64, reason: &str) {
        let event = PaintEvent::new(x as i64, y as i64, color, ts as i64);
        let error = GatewayError::PublishFailure(reason.to_owned());
        self.slots.borrow().to_stream(SyncEvent::PublishFailed { event, error });
    }

    pub fn deliver_disconnected(&self) {
        let mut slots = self.slots.borrow_mut();
        slots.to_stream(SyncEvent::Disconnected);
        slots.stream = None;
    }
}
