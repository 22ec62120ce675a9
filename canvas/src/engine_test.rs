#![allow(clippy::float_cmp)]

use image::{Rgba, RgbaImage};

use super::*;
use crate::hub::{LocalGateway, LocalHub};
use crate::sync::SyncStatus;

const SIDE: u32 = 10;

fn config() -> CanvasConfig {
    CanvasConfig { board_width: SIDE, board_height: SIDE, ..CanvasConfig::default() }
}

/// A 10×10 board shown in a 100×100 viewport: one cell is 10 screen pixels
/// and the board sits at the origin.
fn engine(hub: &LocalHub, board: BoardId) -> EngineCore<LocalGateway> {
    let mut core = EngineCore::new(hub.gateway(), board, Palette::default(), config());
    core.set_viewport(100.0, 100.0, 1.0);
    core
}

fn live_engine(hub: &LocalHub, board: BoardId) -> EngineCore<LocalGateway> {
    let mut core = engine(hub, board);
    core.connect(0.0);
    core.update(0.0);
    assert_eq!(core.status(), &SyncStatus::Live);
    core
}

fn cell_center(x: u32, y: u32) -> Point {
    Point::new(f64::from(x) * 10.0 + 5.0, f64::from(y) * 10.0 + 5.0)
}

fn primary() -> (Button, Modifiers) {
    (Button::Primary, Modifiers::default())
}

fn painted(actions: &[Action]) -> Vec<(i64, i64, ColorIndex)> {
    actions
        .iter()
        .filter_map(|a| match a {
            Action::Painted(ev) => Some((ev.x, ev.y, ev.color)),
            _ => None,
        })
        .collect()
}

// =============================================================
// Viewport
// =============================================================

#[test]
fn first_viewport_fits_board() {
    let hub = LocalHub::new();
    let board = hub.create_board(SIDE, SIDE);
    let core = engine(&hub, board);
    assert_eq!(core.camera.scale, 10.0);
    assert_eq!(core.cell_at(cell_center(0, 0)), Some((0, 0)));
    assert_eq!(core.cell_at(cell_center(9, 9)), Some((9, 9)));
}

#[test]
fn later_viewport_changes_keep_camera() {
    let hub = LocalHub::new();
    let board = hub.create_board(SIDE, SIDE);
    let mut core = engine(&hub, board);
    core.camera.pan(7.0, 0.0);
    let before = core.camera();
    core.set_viewport(300.0, 200.0, 2.0);
    assert_eq!(core.camera().offset_x, before.offset_x);
    assert_eq!(core.dpr, 2.0);
}

#[test]
fn invalid_dpr_falls_back_to_one() {
    let hub = LocalHub::new();
    let board = hub.create_board(SIDE, SIDE);
    let mut core = engine(&hub, board);
    core.set_viewport(100.0, 100.0, f64::NAN);
    assert_eq!(core.dpr, 1.0);
}

#[test]
fn zoom_buttons_keep_center_fixed() {
    let hub = LocalHub::new();
    let board = hub.create_board(SIDE, SIDE);
    let mut core = engine(&hub, board);
    let center = Point::new(50.0, 50.0);
    let world = core.camera.screen_to_world(center);
    core.zoom_in();
    assert_eq!(core.camera.scale, 15.0);
    let after = core.camera.screen_to_world(center);
    assert!((after.x - world.x).abs() < 1e-9);
    core.zoom_out();
    assert!((core.camera.scale - 10.0).abs() < 1e-9);
}

#[test]
fn reset_view_restores_fit() {
    let hub = LocalHub::new();
    let board = hub.create_board(SIDE, SIDE);
    let mut core = engine(&hub, board);
    core.zoom_in();
    core.camera.pan(33.0, -12.0);
    core.reset_view();
    assert_eq!(core.camera.scale, 10.0);
    assert_eq!(core.cell_at(cell_center(4, 4)), Some((4, 4)));
}

// =============================================================
// Painting
// =============================================================

#[test]
fn paint_before_snapshot_is_refused() {
    let hub = LocalHub::new();
    let board = hub.create_board(SIDE, SIDE);
    let mut core = engine(&hub, board);
    let (button, mods) = primary();
    let actions = core.on_pointer_down(cell_center(1, 1), button, mods);
    assert_eq!(actions, vec![Action::None]);
    assert!(hub.log(board).is_empty());
}

#[test]
fn click_paints_selected_color() {
    let hub = LocalHub::new();
    let board = hub.create_board(SIDE, SIDE);
    let mut core = live_engine(&hub, board);
    assert!(core.select_color(5));

    let (button, mods) = primary();
    let actions = core.on_pointer_down(cell_center(3, 4), button, mods);
    assert_eq!(painted(&actions), vec![(3, 4, 5)]);
    assert_eq!(core.replica.store().get(3, 4), Ok(5));
    assert_eq!(hub.log(board).len(), 1);
}

#[test]
fn stroke_paints_each_cell_once() {
    let hub = LocalHub::new();
    let board = hub.create_board(SIDE, SIDE);
    let mut core = live_engine(&hub, board);
    core.select_color(2);

    let (button, mods) = primary();
    let mut all = core.on_pointer_down(cell_center(0, 0), button, mods);
    all.extend(core.on_pointer_move(Point::new(7.0, 7.0), mods));
    all.extend(core.on_pointer_move(cell_center(1, 0), mods));
    all.extend(core.on_pointer_move(Point::new(12.0, 3.0), mods));
    all.extend(core.on_pointer_move(cell_center(2, 0), mods));
    core.on_pointer_up(cell_center(2, 0), button, mods);

    assert_eq!(painted(&all), vec![(0, 0, 2), (1, 0, 2), (2, 0, 2)]);
    assert_eq!(hub.log(board).len(), 3);
}

#[test]
fn repainting_same_color_publishes_nothing() {
    let hub = LocalHub::new();
    let board = hub.create_board(SIDE, SIDE);
    let mut core = live_engine(&hub, board);
    core.select_color(3);
    let (button, mods) = primary();
    core.on_pointer_down(cell_center(1, 1), button, mods);
    core.on_pointer_up(cell_center(1, 1), button, mods);
    let again = core.on_pointer_down(cell_center(1, 1), button, mods);
    assert!(painted(&again).is_empty());
    assert_eq!(hub.log(board).len(), 1);
}

#[test]
fn paint_off_board_is_ignored() {
    let hub = LocalHub::new();
    let board = hub.create_board(SIDE, SIDE);
    let mut core = live_engine(&hub, board);
    core.camera.pan(50.0, 0.0);
    let (button, mods) = primary();
    let actions = core.on_pointer_down(Point::new(10.0, 10.0), button, mods);
    assert_eq!(actions, vec![Action::None]);
    assert!(hub.log(board).is_empty());
}

#[test]
fn move_without_press_does_nothing() {
    let hub = LocalHub::new();
    let board = hub.create_board(SIDE, SIDE);
    let mut core = live_engine(&hub, board);
    let actions = core.on_pointer_move(cell_center(2, 2), Modifiers::default());
    assert_eq!(actions, vec![Action::None]);
    assert!(hub.log(board).is_empty());
}

#[test]
fn select_color_rejects_off_palette_index() {
    let hub = LocalHub::new();
    let board = hub.create_board(SIDE, SIDE);
    let mut core = engine(&hub, board);
    core.select_color(4);
    assert!(!core.select_color(200));
    assert_eq!(core.ui.selected_color, 4);
}

#[test]
fn remote_paint_shows_after_update() {
    let hub = LocalHub::new();
    let board = hub.create_board(SIDE, SIDE);
    let mut a = live_engine(&hub, board);
    let mut b = live_engine(&hub, board);
    b.scene();

    a.select_color(7);
    let (button, mods) = primary();
    a.on_pointer_down(cell_center(6, 2), button, mods);

    b.update(16.0);
    assert_eq!(b.replica.store().get(6, 2), Ok(7));
    let scene = b.scene();
    assert_eq!(scene.damage, Some(crate::raster::DamageRect::cell(6, 2)));
    assert_eq!(scene.raster.pixel(6, 2), Some(b.replica.palette().packed(7)));
}

#[test]
fn reconnect_after_refused_subscribe_follows_the_update_clock() {
    const START_MS: f64 = 1.7e12;
    let hub = LocalHub::new();
    let board = hub.create_board(SIDE, SIDE);
    hub.set_refuse_subscribe(true);
    let mut core = engine(&hub, board);
    core.connect(START_MS);
    assert_eq!(core.status(), &SyncStatus::Reconnecting);
    hub.set_refuse_subscribe(false);

    // One minute of 60 fps frames on the same epoch clock.
    let mut now = START_MS;
    for frame in 1..=3600 {
        now = START_MS + f64::from(frame) * 16.7;
        core.update(now);
        if core.status() == &SyncStatus::Live {
            break;
        }
    }
    assert_eq!(core.status(), &SyncStatus::Live);

    core.select_color(7);
    let (button, mods) = primary();
    let actions = core.on_pointer_down(cell_center(1, 1), button, mods);
    let Some(Action::Painted(event)) = actions.iter().find(|a| matches!(a, Action::Painted(_))) else {
        panic!("expected a paint");
    };
    #[allow(clippy::cast_possible_truncation)]
    let expected_ts = now as i64;
    assert_eq!(event.ts, expected_ts);
}

#[test]
fn presence_is_exposed() {
    let hub = LocalHub::new();
    let board = hub.create_board(SIDE, SIDE);
    let mut a = live_engine(&hub, board);
    let _b = live_engine(&hub, board);
    a.update(1.0);
    assert_eq!(a.online_peers(), 2);
}

// =============================================================
// Panning
// =============================================================

#[test]
fn secondary_button_pans() {
    let hub = LocalHub::new();
    let board = hub.create_board(SIDE, SIDE);
    let mut core = live_engine(&hub, board);
    let mods = Modifiers::default();
    let down = core.on_pointer_down(Point::new(50.0, 50.0), Button::Secondary, mods);
    assert_eq!(down, vec![Action::SetCursor("grabbing".into())]);
    core.on_pointer_move(Point::new(70.0, 40.0), mods);
    assert_eq!(core.camera.offset_x, 2.0);
    assert_eq!(core.camera.offset_y, -1.0);
    assert!(hub.log(board).is_empty());
}

#[test]
fn pan_tool_pans_with_primary() {
    let hub = LocalHub::new();
    let board = hub.create_board(SIDE, SIDE);
    let mut core = live_engine(&hub, board);
    core.set_tool(Tool::Pan);
    let (button, mods) = primary();
    core.on_pointer_down(Point::new(0.0, 0.0), button, mods);
    core.on_pointer_move(Point::new(-10.0, 0.0), mods);
    assert_eq!(core.camera.offset_x, -1.0);
    let up = core.on_pointer_up(Point::new(-10.0, 0.0), button, mods);
    assert_eq!(up, vec![Action::SetCursor("grab".into())]);
    assert!(matches!(core.input, InputState::Idle));
}

#[test]
fn shift_drag_pans_with_paint_tool() {
    let hub = LocalHub::new();
    let board = hub.create_board(SIDE, SIDE);
    let mut core = live_engine(&hub, board);
    let mods = Modifiers { shift: true, ..Modifiers::default() };
    core.on_pointer_down(cell_center(1, 1), Button::Primary, mods);
    assert!(matches!(core.input, InputState::Panning { .. }));
    assert!(hub.log(board).is_empty());
}

// =============================================================
// Wheel
// =============================================================

#[test]
fn wheel_zooms_around_pointer() {
    let hub = LocalHub::new();
    let board = hub.create_board(SIDE, SIDE);
    let mut core = engine(&hub, board);
    let pointer = Point::new(30.0, 70.0);
    let world = core.camera.screen_to_world(pointer);
    core.on_wheel(pointer, WheelDelta { dx: 0.0, dy: -100.0 }, Modifiers::default());
    assert!((core.camera.scale - 12.0).abs() < 1e-9);
    let after = core.camera.screen_to_world(pointer);
    assert!((after.x - world.x).abs() < 1e-9);
    assert!((after.y - world.y).abs() < 1e-9);
}

#[test]
fn wheel_zero_or_nan_is_ignored() {
    let hub = LocalHub::new();
    let board = hub.create_board(SIDE, SIDE);
    let mut core = engine(&hub, board);
    let mods = Modifiers::default();
    core.on_wheel(Point::new(0.0, 0.0), WheelDelta { dx: 5.0, dy: 0.0 }, mods);
    core.on_wheel(Point::new(0.0, 0.0), WheelDelta { dx: 0.0, dy: f64::NAN }, mods);
    assert_eq!(core.camera.scale, 10.0);
}

#[test]
fn wheel_respects_zoom_limits() {
    let hub = LocalHub::new();
    let board = hub.create_board(SIDE, SIDE);
    let mut core = engine(&hub, board);
    for _ in 0..100 {
        core.on_wheel(Point::new(50.0, 50.0), WheelDelta { dx: 0.0, dy: -500.0 }, Modifiers::default());
    }
    assert_eq!(core.camera.scale, core.camera.max_scale);
}

// =============================================================
// Overlay
// =============================================================

fn red_overlay(core: &mut EngineCore<LocalGateway>) {
    let image = RgbaImage::from_pixel(SIDE, SIDE, Rgba([229, 0, 0, 255]));
    core.overlay.set_image_rgba(image).expect("overlay");
}

#[test]
fn eyedropper_picks_nearest_palette_color_from_overlay() {
    let hub = LocalHub::new();
    let board = hub.create_board(SIDE, SIDE);
    let mut core = live_engine(&hub, board);
    red_overlay(&mut core);
    core.set_tool(Tool::Eyedropper);
    let (button, mods) = primary();
    let actions = core.on_pointer_down(cell_center(2, 2), button, mods);
    assert_eq!(actions, vec![Action::ColorPicked(5)]);
    assert_eq!(core.ui.selected_color, 5);
    assert!(hub.log(board).is_empty());
}

#[test]
fn eyedropper_without_overlay_reads_board() {
    let hub = LocalHub::new();
    let board = hub.create_board(SIDE, SIDE);
    let mut core = live_engine(&hub, board);
    core.select_color(9);
    let (button, mods) = primary();
    core.on_pointer_down(cell_center(4, 4), button, mods);
    core.on_pointer_up(cell_center(4, 4), button, mods);
    core.select_color(0);

    let alt = Modifiers { alt: true, ..Modifiers::default() };
    let actions = core.on_pointer_down(cell_center(4, 4), button, alt);
    assert_eq!(actions, vec![Action::ColorPicked(9)]);
}

#[test]
fn eyedropper_off_board_picks_nothing() {
    let hub = LocalHub::new();
    let board = hub.create_board(SIDE, SIDE);
    let mut core = live_engine(&hub, board);
    core.set_tool(Tool::Eyedropper);
    core.camera.pan(500.0, 0.0);
    let (button, mods) = primary();
    assert_eq!(core.on_pointer_down(Point::new(1.0, 1.0), button, mods), vec![Action::None]);
}

#[test]
fn editing_overlay_drags_it_instead_of_painting() {
    let hub = LocalHub::new();
    let board = hub.create_board(SIDE, SIDE);
    let mut core = live_engine(&hub, board);
    red_overlay(&mut core);
    core.set_overlay_editing(true);

    let (button, mods) = primary();
    let down = core.on_pointer_down(cell_center(5, 5), button, mods);
    assert_eq!(down, vec![Action::SetCursor("move".into())]);
    core.on_pointer_move(Point::new(75.0, 35.0), mods);
    core.on_pointer_up(Point::new(75.0, 35.0), button, mods);

    let pos = core.overlay.position();
    assert!((pos.x - 2.0).abs() < 1e-9);
    assert!((pos.y + 2.0).abs() < 1e-9);
    assert!(hub.log(board).is_empty());
}

#[test]
fn wheel_scales_overlay_while_editing() {
    let hub = LocalHub::new();
    let board = hub.create_board(SIDE, SIDE);
    let mut core = live_engine(&hub, board);
    red_overlay(&mut core);
    core.set_overlay_editing(true);
    core.on_wheel(Point::new(50.0, 50.0), WheelDelta { dx: 0.0, dy: -100.0 }, Modifiers::default());
    assert!((core.overlay.scale() - 1.2).abs() < 1e-9);
    assert_eq!(core.camera.scale, 10.0);
}

#[test]
fn editing_requires_an_image() {
    let hub = LocalHub::new();
    let board = hub.create_board(SIDE, SIDE);
    let mut core = engine(&hub, board);
    core.set_overlay_editing(true);
    assert!(!core.overlay.is_editing());
}

#[test]
fn clear_overlay_ends_drag() {
    let hub = LocalHub::new();
    let board = hub.create_board(SIDE, SIDE);
    let mut core = live_engine(&hub, board);
    red_overlay(&mut core);
    core.set_overlay_editing(true);
    let (button, mods) = primary();
    core.on_pointer_down(cell_center(5, 5), button, mods);
    core.clear_overlay();
    assert!(matches!(core.input, InputState::Idle));
    assert!(!core.overlay.has_image());
}

#[test]
fn bad_overlay_bytes_are_an_error() {
    let hub = LocalHub::new();
    let board = hub.create_board(SIDE, SIDE);
    let mut core = engine(&hub, board);
    assert!(matches!(core.set_overlay_image(b"not an image"), Err(OverlayError::Decode(_))));
    assert!(!core.overlay.has_image());
}

// =============================================================
// Frames
// =============================================================

#[test]
fn scene_carries_overlay_and_consumes_damage() {
    let hub = LocalHub::new();
    let board = hub.create_board(SIDE, SIDE);
    let mut core = live_engine(&hub, board);
    red_overlay(&mut core);
    core.update(1.0);

    let first = core.scene();
    assert!(first.damage.is_some());
    assert!(first.overlay.is_some());
    assert_eq!(first.viewport_width, 100.0);

    let second = core.scene();
    assert_eq!(second.damage, None);
}

#[test]
fn update_memoizes_pixelation() {
    let hub = LocalHub::new();
    let board = hub.create_board(SIDE, SIDE);
    let mut core = live_engine(&hub, board);
    red_overlay(&mut core);
    core.overlay.set_pixelation(2);
    core.update(1.0);
    core.update(2.0);
    core.update(3.0);
    assert_eq!(core.overlay.pixelate_count(), 1);
}

#[test]
fn close_releases_everything() {
    let hub = LocalHub::new();
    let board = hub.create_board(SIDE, SIDE);
    let mut core = live_engine(&hub, board);
    red_overlay(&mut core);
    core.close();
    assert_eq!(core.status(), &SyncStatus::Closed);
    assert!(!core.replica.raster().is_ready());
    assert!(!core.overlay.has_image());
    assert_eq!(hub.presence(board), 0);
    assert!(!core.can_edit());
}

#[test]
fn retry_recovers_from_missing_board() {
    let hub = LocalHub::new();
    let board = uuid::Uuid::new_v4();
    let mut core = engine(&hub, board);
    core.connect(0.0);
    core.update(0.0);
    assert!(matches!(core.status(), SyncStatus::Failed(_)));

    hub.insert_board(board, SIDE, SIDE, vec![0; 100]);
    core.retry(10.0);
    core.update(10.0);
    assert_eq!(core.status(), &SyncStatus::Live);
    assert!(core.can_edit());
}
