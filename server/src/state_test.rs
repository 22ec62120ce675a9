use super::*;

fn paint(x: i64) -> PaintEvent {
    PaintEvent::new(x, 0, 1, 0)
}

#[test]
fn new_board_is_blank_and_clean() {
    let bs = BoardState::new(&test_helpers::test_config());
    assert_eq!(bs.store.as_bytes(), &[0; 64][..]);
    assert!(bs.log.is_empty());
    assert!(bs.clients.is_empty());
    assert!(!bs.is_dirty());
    assert_eq!(bs.first_retained_seq(), 1);
}

#[test]
fn push_log_numbers_sequentially_and_marks_dirty() {
    let mut bs = BoardState::new(&test_helpers::test_config());
    let a = bs.push_log(paint(0), 10);
    let b = bs.push_log(paint(1), 10);
    assert_eq!((a.seq, b.seq), (1, 2));
    assert!(bs.is_dirty());
    bs.flushed_version = bs.version;
    assert!(!bs.is_dirty());
}

#[test]
fn push_log_drops_oldest_past_retain() {
    let mut bs = BoardState::new(&test_helpers::test_config());
    for x in 0..6 {
        bs.push_log(paint(x), 4);
    }
    assert_eq!(bs.log.len(), 4);
    assert_eq!(bs.first_retained_seq(), 3);
    assert_eq!(bs.last_seq, 6);
}

#[test]
fn hydrated_board_continues_sequence() {
    let config = test_helpers::test_config();
    let mut bs = BoardState::from_store(PixelStore::new(config.width, config.height, config.palette_len), 41);
    assert_eq!(bs.first_retained_seq(), 42);
    assert_eq!(bs.push_log(paint(0), 4).seq, 42);
}

#[test]
fn logged_paint_serializes_flat() {
    let logged = LoggedPaint { seq: 7, event: PaintEvent::new(1, 2, 3, 4).with_actor("a") };
    let json = serde_json::to_value(&logged).expect("serialize");
    assert_eq!(json, serde_json::json!({"seq": 7, "x": 1, "y": 2, "color": 3, "ts": 4, "actor": "a"}));
}

#[test]
fn default_config_matches_canvas_board() {
    let config = BoardConfig::default();
    assert_eq!((config.width, config.height), (1000, 1000));
    assert_eq!(config.palette_len, 16);
}
