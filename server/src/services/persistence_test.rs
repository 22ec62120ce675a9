use super::*;
use crate::state::test_helpers;

fn record(board_id: Uuid, seq: i64) -> PaintRecord {
    PaintRecord { board_id, seq, event: PaintEvent::new(0, 0, 1, 0) }
}

// =============================================================================
// env_parse
// =============================================================================

#[test]
fn env_parse_missing_returns_default() {
    let val: usize = env_parse("__TEST_NONEXISTENT_KEY_12345__", 42);
    assert_eq!(val, 42);
}

#[test]
fn env_parse_present_valid() {
    unsafe { std::env::set_var("__TEST_EP_VALID__", "99") };
    let val: usize = env_parse("__TEST_EP_VALID__", 0);
    assert_eq!(val, 99);
    unsafe { std::env::remove_var("__TEST_EP_VALID__") };
}

#[test]
fn env_parse_present_invalid_returns_default() {
    unsafe { std::env::set_var("__TEST_EP_INVALID__", "notanumber") };
    let val: usize = env_parse("__TEST_EP_INVALID__", 7);
    assert_eq!(val, 7);
    unsafe { std::env::remove_var("__TEST_EP_INVALID__") };
}

// =============================================================================
// PaintPersistConfig defaults
// =============================================================================

#[test]
fn paint_persist_config_defaults_match_constants() {
    unsafe {
        std::env::remove_var("PAINT_PERSIST_QUEUE_CAPACITY");
        std::env::remove_var("PAINT_PERSIST_BATCH_SIZE");
        std::env::remove_var("PAINT_PERSIST_FLUSH_MS");
        std::env::remove_var("PAINT_PERSIST_RETRIES");
        std::env::remove_var("PAINT_PERSIST_RETRY_BASE_MS");
    }
    let config = PaintPersistConfig::from_env();
    assert_eq!(config.queue_capacity, DEFAULT_PAINT_PERSIST_QUEUE_CAPACITY);
    assert_eq!(config.batch_size, DEFAULT_PAINT_PERSIST_BATCH_SIZE);
    assert_eq!(config.flush_ms, DEFAULT_PAINT_PERSIST_FLUSH_MS);
    assert_eq!(config.retries, DEFAULT_PAINT_PERSIST_RETRIES);
    assert_eq!(config.retry_base_ms, DEFAULT_PAINT_PERSIST_RETRY_BASE_MS);
}

// =============================================================================
// enqueue_paint
// =============================================================================

#[tokio::test]
async fn enqueue_paint_no_sender_is_noop() {
    let state = test_helpers::test_app_state();
    assert!(state.paint_persist_tx.is_none());
    assert!(!enqueue_paint(&state, record(Uuid::new_v4(), 1)));
}

#[tokio::test]
async fn enqueue_paint_sends_to_channel() {
    let (tx, mut rx) = mpsc::channel(4);
    let state = test_helpers::test_app_state().with_paint_persistence(tx);
    let board_id = Uuid::new_v4();

    assert!(enqueue_paint(&state, record(board_id, 1)));
    assert_eq!(rx.try_recv().expect("queued"), record(board_id, 1));
}

#[tokio::test]
async fn enqueue_paint_full_channel_drops() {
    let (tx, _rx) = mpsc::channel(1);
    let state = test_helpers::test_app_state().with_paint_persistence(tx);
    let board_id = Uuid::new_v4();

    assert!(enqueue_paint(&state, record(board_id, 1)));
    assert!(!enqueue_paint(&state, record(board_id, 2)));
}

#[tokio::test]
async fn enqueue_paint_closed_channel_drops() {
    let (tx, rx) = mpsc::channel(1);
    drop(rx);
    let state = test_helpers::test_app_state().with_paint_persistence(tx);
    assert!(!enqueue_paint(&state, record(Uuid::new_v4(), 1)));
}

// =============================================================================
// snapshot flush bookkeeping
// =============================================================================

#[tokio::test]
async fn flush_without_database_leaves_boards_dirty() {
    let state = test_helpers::test_app_state();
    let board_id = test_helpers::seed_board(&state).await;
    {
        let mut boards = state.boards.write().await;
        let bs = boards.get_mut(&board_id).expect("board");
        bs.push_log(PaintEvent::new(0, 0, 1, 0), 4);
    }

    flush_dirty_snapshots(&state).await;
    assert!(state.boards.read().await.get(&board_id).expect("board").is_dirty());
}

#[tokio::test]
async fn ack_flushed_keeps_newer_paints_dirty() {
    let state = test_helpers::test_app_state();
    let board_id = test_helpers::seed_board(&state).await;
    {
        let mut boards = state.boards.write().await;
        let bs = boards.get_mut(&board_id).expect("board");
        bs.push_log(PaintEvent::new(0, 0, 1, 0), 4);
        bs.push_log(PaintEvent::new(1, 0, 1, 0), 4);
    }

    ack_flushed(&state, board_id, 1).await;
    assert!(state.boards.read().await.get(&board_id).expect("board").is_dirty());

    ack_flushed(&state, board_id, 2).await;
    assert!(!state.boards.read().await.get(&board_id).expect("board").is_dirty());

    // A stale ack never moves the marker backwards.
    ack_flushed(&state, board_id, 1).await;
    assert!(!state.boards.read().await.get(&board_id).expect("board").is_dirty());
}

#[tokio::test]
async fn ack_flushed_unknown_board_is_noop() {
    let state = test_helpers::test_app_state();
    ack_flushed(&state, Uuid::new_v4(), 3).await;
    assert!(state.boards.read().await.is_empty());
}
