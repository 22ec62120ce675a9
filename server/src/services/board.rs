//! Board service: creation, hydration, join/part, snapshots and the paint log.
//!
//! DESIGN
//! ======
//! Board state is hydrated from Postgres on first use and kept in memory
//! while any client is connected. Without a database, boards live in memory
//! for the life of the process and are never evicted.
//!
//! ERROR HANDLING
//! ==============
//! On last-client part a dirty board's snapshot is flushed before eviction.
//! If that flush fails, the board is kept in memory and stays dirty so the
//! snapshot flush task can retry instead of losing paints.

use canvas::store::{PixelStore, StoreError};
use frames::{ErrorCode, Frame, PresencePayload, syscall};
use sqlx::PgPool;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::services::persistence::{ack_flushed, write_snapshot};
use crate::state::{AppState, BoardConfig, BoardState, LoggedPaint};

/// Upper bound on one `/events` page.
pub const MAX_EVENTS_PAGE: usize = 1000;

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum BoardError {
    #[error("board not found: {0}")]
    NotFound(Uuid),
    #[error("stored snapshot is unusable: {0}")]
    Corrupt(#[from] StoreError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl ErrorCode for BoardError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "E_BOARD_NOT_FOUND",
            Self::Corrupt(_) => "E_BOARD_CORRUPT",
            Self::Database(_) => "E_DATABASE",
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::Database(_))
    }
}

// =============================================================================
// CREATE / LOAD
// =============================================================================

/// Create a blank board.
///
/// With a database the board row is written and hydrated on first use;
/// otherwise it goes straight into memory.
///
/// # Errors
///
/// Returns a database error if the insert fails.
pub async fn create_board(state: &AppState) -> Result<Uuid, BoardError> {
    let id = Uuid::new_v4();
    let blank = BoardState::new(&state.config);

    if let Some(pool) = &state.pool {
        sqlx::query("INSERT INTO boards (id, width, height, snapshot) VALUES ($1, $2, $3, $4)")
            .bind(id)
            .bind(i64::from(state.config.width))
            .bind(i64::from(state.config.height))
            .bind(blank.store.as_bytes())
            .execute(pool)
            .await?;
    } else {
        state.boards.write().await.insert(id, blank);
    }

    info!(board_id = %id, "board created");
    Ok(id)
}

/// Make sure a board is resident in memory, hydrating it if needed.
///
/// # Errors
///
/// [`BoardError::NotFound`] for unknown boards; database and snapshot
/// errors from hydration.
pub async fn ensure_loaded(state: &AppState, board_id: Uuid) -> Result<(), BoardError> {
    if state.boards.read().await.contains_key(&board_id) {
        return Ok(());
    }
    let Some(pool) = &state.pool else {
        return Err(BoardError::NotFound(board_id));
    };

    // Hydrate outside the lock; a concurrent loader may win the insert.
    let hydrated = load_board(pool, &state.config, board_id).await?;
    let mut boards = state.boards.write().await;
    boards.entry(board_id).or_insert_with(|| {
        info!(%board_id, last_seq = hydrated.last_seq, "hydrated board from database");
        hydrated
    });
    Ok(())
}

async fn load_board(pool: &PgPool, config: &BoardConfig, board_id: Uuid) -> Result<BoardState, BoardError> {
    let row = sqlx::query_as::<_, (Vec<u8>, i64, i64)>(
        "SELECT b.snapshot, b.last_seq, COALESCE((SELECT MAX(seq) FROM paint_events p WHERE p.board_id = b.id), 0) \
         FROM boards b WHERE b.id = $1",
    )
    .bind(board_id)
    .fetch_optional(pool)
    .await?;

    let Some((snapshot, last_seq, logged_seq)) = row else {
        return Err(BoardError::NotFound(board_id));
    };

    let mut store = PixelStore::new(config.width, config.height, config.palette_len);
    store.load(&snapshot)?;
    Ok(BoardState::from_store(store, last_seq.max(logged_seq)))
}

/// Current snapshot bytes for a board.
///
/// Resident boards answer from memory; others are read from the database
/// without being hydrated.
///
/// # Errors
///
/// [`BoardError::NotFound`] for unknown boards; database errors otherwise.
pub async fn snapshot(state: &AppState, board_id: Uuid) -> Result<Vec<u8>, BoardError> {
    if let Some(bs) = state.boards.read().await.get(&board_id) {
        return Ok(bs.store.serialize());
    }
    let Some(pool) = &state.pool else {
        return Err(BoardError::NotFound(board_id));
    };
    let board = load_board(pool, &state.config, board_id).await?;
    Ok(board.store.serialize())
}

// =============================================================================
// JOIN / PART
// =============================================================================

/// Join a board. Hydrates from Postgres if not already in memory.
/// Returns the number of connected clients including the joiner.
///
/// # Errors
///
/// [`BoardError::NotFound`] for unknown boards; hydration errors otherwise.
pub async fn join_board(
    state: &AppState,
    board_id: Uuid,
    client_id: Uuid,
    tx: mpsc::Sender<Frame>,
) -> Result<usize, BoardError> {
    ensure_loaded(state, board_id).await?;

    let mut boards = state.boards.write().await;
    // Evicted between load and lock: the next join hydrates again.
    let Some(board_state) = boards.get_mut(&board_id) else {
        return Err(BoardError::NotFound(board_id));
    };
    board_state.clients.insert(client_id, tx);
    let online = board_state.clients.len();

    info!(%board_id, %client_id, clients = online, "client joined board");
    Ok(online)
}

/// Leave a board. Removes the client sender and returns how many remain.
/// With a database, the last part flushes a dirty snapshot and evicts the
/// board from memory.
pub async fn part_board(state: &AppState, board_id: Uuid, client_id: Uuid) -> usize {
    let mut boards = state.boards.write().await;
    let Some(board_state) = boards.get_mut(&board_id) else {
        return 0;
    };

    board_state.clients.remove(&client_id);
    let remaining = board_state.clients.len();
    info!(%board_id, %client_id, remaining, "client left board");

    let Some(pool) = &state.pool else {
        return remaining;
    };
    if remaining > 0 {
        return remaining;
    }

    if !board_state.is_dirty() {
        boards.remove(&board_id);
        info!(%board_id, "evicted board from memory");
        return 0;
    }

    let bytes = board_state.store.serialize();
    let last_seq = board_state.last_seq;
    let version = board_state.version;

    // Release lock before writing to Postgres.
    drop(boards);
    let flush_result = write_snapshot(pool, board_id, &bytes, last_seq).await;

    match flush_result {
        Ok(()) => {
            ack_flushed(state, board_id, version).await;
            let mut boards = state.boards.write().await;
            let Some(bs) = boards.get(&board_id) else {
                return 0;
            };
            let remaining = bs.clients.len();
            if remaining == 0 && !bs.is_dirty() {
                boards.remove(&board_id);
                info!(%board_id, "evicted board from memory");
            } else if remaining == 0 {
                warn!(%board_id, "retaining board after final flush because newer paints exist");
            }
            remaining
        }
        Err(e) => {
            error!(error = %e, %board_id, "final flush failed; board retained for retry");
            online_count(state, board_id).await
        }
    }
}

/// Number of clients currently connected to a board.
pub async fn online_count(state: &AppState, board_id: Uuid) -> usize {
    state.boards.read().await.get(&board_id).map_or(0, |bs| bs.clients.len())
}

// =============================================================================
// BROADCAST
// =============================================================================

/// Broadcast a frame to all clients in a board, optionally excluding one.
/// Returns how many clients accepted the frame.
///
/// A client whose queue is full has fallen behind the board. It is removed
/// and its sender dropped, which ends its session; on resubscribe it reloads
/// the snapshot. Whoever remains is told the new presence count.
pub async fn broadcast(state: &AppState, board_id: Uuid, frame: &Frame, exclude: Option<Uuid>) -> usize {
    let (delivered, lagging) = {
        let boards = state.boards.read().await;
        let Some(board_state) = boards.get(&board_id) else {
            return 0;
        };
        fan_out(board_state, board_id, frame, exclude)
    };
    if !lagging.is_empty() {
        evict_lagging(state, board_id, lagging).await;
    }
    delivered
}

/// Try every client once. Returns the delivered count and the clients whose
/// queues were full.
fn fan_out(board_state: &BoardState, board_id: Uuid, frame: &Frame, exclude: Option<Uuid>) -> (usize, Vec<Uuid>) {
    let mut delivered = 0;
    let mut lagging = Vec::new();
    for (client_id, tx) in &board_state.clients {
        if exclude == Some(*client_id) {
            continue;
        }
        match tx.try_send(frame.clone()) {
            Ok(()) => delivered += 1,
            Err(TrySendError::Full(_)) => lagging.push(*client_id),
            // Session is already gone and parts itself.
            Err(TrySendError::Closed(_)) => debug!(%board_id, %client_id, "client queue closed; frame skipped"),
        }
    }
    (delivered, lagging)
}

async fn evict_lagging(state: &AppState, board_id: Uuid, mut lagging: Vec<Uuid>) {
    let mut boards = state.boards.write().await;
    let Some(board_state) = boards.get_mut(&board_id) else {
        return;
    };
    while !lagging.is_empty() {
        for client_id in lagging.drain(..) {
            if board_state.clients.remove(&client_id).is_some() {
                warn!(%board_id, %client_id, "client queue full; evicted from board");
            }
        }
        let online = board_state.clients.len();
        let presence = Frame::push(syscall::BOARD_PRESENCE, PresencePayload { count: online }.to_data())
            .with_board_id(board_id);
        lagging = fan_out(board_state, board_id, &presence, None).1;
    }
}

// =============================================================================
// PAINT LOG
// =============================================================================

/// Page through a board's paint log: up to `limit` paints with `seq > after`,
/// oldest first.
///
/// Resident boards answer from memory while `after` is inside the retained
/// tail; older pages come from the database when one is configured.
///
/// # Errors
///
/// [`BoardError::NotFound`] for unknown boards; database errors otherwise.
pub async fn events(state: &AppState, board_id: Uuid, after: i64, limit: usize) -> Result<Vec<LoggedPaint>, BoardError> {
    let limit = limit.clamp(1, MAX_EVENTS_PAGE);
    {
        let boards = state.boards.read().await;
        if let Some(bs) = boards.get(&board_id)
            && (after.saturating_add(1) >= bs.first_retained_seq() || state.pool.is_none())
        {
            return Ok(bs.log.iter().filter(|p| p.seq > after).take(limit).cloned().collect());
        }
    }

    let Some(pool) = &state.pool else {
        return Err(BoardError::NotFound(board_id));
    };
    load_events(pool, board_id, after, limit).await
}

async fn load_events(pool: &PgPool, board_id: Uuid, after: i64, limit: usize) -> Result<Vec<LoggedPaint>, BoardError> {
    let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM boards WHERE id = $1)")
        .bind(board_id)
        .fetch_one(pool)
        .await?;
    if !exists {
        return Err(BoardError::NotFound(board_id));
    }

    let rows = sqlx::query_as::<_, (i64, i64, i64, i16, Option<String>, i64)>(
        "SELECT seq, x, y, color, actor, ts FROM paint_events \
         WHERE board_id = $1 AND seq > $2 ORDER BY seq ASC LIMIT $3",
    )
    .bind(board_id)
    .bind(after)
    .bind(i64::try_from(limit).unwrap_or(i64::MAX))
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .filter_map(|(seq, x, y, color, actor, ts)| {
            let color = u8::try_from(color).ok()?;
            let mut event = canvas::replica::PaintEvent::new(x, y, color, ts);
            event.actor = actor;
            Some(LoggedPaint { seq, event })
        })
        .collect())
}

#[cfg(test)]
#[path = "board_test.rs"]
mod tests;
