//! Persistence service: snapshot flushes and the paint-log writer.
//!
//! DESIGN
//! ======
//! A background task flushes dirty board snapshots on a fixed interval.
//! Accepted paints go through a bounded queue into a batched async writer so
//! websocket handling never blocks on Postgres I/O.
//!
//! ERROR HANDLING
//! ==============
//! A board's flushed version is acknowledged only after a successful write.
//! Repeated snapshot upserts are acceptable, silent data loss is not. Paint
//! batches that still fail after retries are dropped with a warning; the
//! snapshot remains the source of truth for board content.

use std::time::Duration;

use canvas::replica::PaintEvent;
use sqlx::{PgPool, QueryBuilder};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::state::AppState;

const DEFAULT_PAINT_PERSIST_QUEUE_CAPACITY: usize = 8192;
const DEFAULT_PAINT_PERSIST_BATCH_SIZE: usize = 256;
const DEFAULT_PAINT_PERSIST_FLUSH_MS: u64 = 10;
const DEFAULT_PAINT_PERSIST_RETRIES: usize = 3;
const DEFAULT_PAINT_PERSIST_RETRY_BASE_MS: u64 = 20;
const DEFAULT_SNAPSHOT_FLUSH_INTERVAL_MS: u64 = 1000;

/// Tuning knobs for the paint persistence worker, loaded from environment variables.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PaintPersistConfig {
    /// Bounded channel capacity for the paint persist queue.
    pub(crate) queue_capacity: usize,
    /// Maximum paints written per Postgres batch.
    pub(crate) batch_size: usize,
    /// How long to wait for the batch to fill before flushing, in milliseconds.
    pub(crate) flush_ms: u64,
    /// Attempts per batch before it is dropped.
    pub(crate) retries: usize,
    /// Base delay in milliseconds for linear retry back-off.
    pub(crate) retry_base_ms: u64,
}

impl PaintPersistConfig {
    pub(crate) fn from_env() -> Self {
        Self {
            queue_capacity: env_parse("PAINT_PERSIST_QUEUE_CAPACITY", DEFAULT_PAINT_PERSIST_QUEUE_CAPACITY).max(1),
            batch_size: env_parse("PAINT_PERSIST_BATCH_SIZE", DEFAULT_PAINT_PERSIST_BATCH_SIZE).max(1),
            flush_ms: env_parse("PAINT_PERSIST_FLUSH_MS", DEFAULT_PAINT_PERSIST_FLUSH_MS).max(1),
            retries: env_parse("PAINT_PERSIST_RETRIES", DEFAULT_PAINT_PERSIST_RETRIES).max(1),
            retry_base_ms: env_parse("PAINT_PERSIST_RETRY_BASE_MS", DEFAULT_PAINT_PERSIST_RETRY_BASE_MS),
        }
    }
}

pub(crate) fn env_parse<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

/// One accepted paint queued for the `paint_events` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaintRecord {
    pub board_id: Uuid,
    pub seq: i64,
    pub event: PaintEvent,
}

// =============================================================================
// SNAPSHOT FLUSH
// =============================================================================

/// Spawn the background snapshot flush task. Returns a handle for shutdown.
pub fn spawn_snapshot_flush_task(state: AppState) -> JoinHandle<()> {
    let flush_interval_ms = env_parse("SNAPSHOT_FLUSH_INTERVAL_MS", DEFAULT_SNAPSHOT_FLUSH_INTERVAL_MS).max(1);
    info!(flush_interval_ms, "snapshot flush configured");
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_millis(flush_interval_ms));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            flush_dirty_snapshots(&state).await;
        }
    })
}

#[derive(Debug)]
struct SnapshotFlush {
    board_id: Uuid,
    bytes: Vec<u8>,
    last_seq: i64,
    version: u64,
}

/// Write every dirty board's snapshot and acknowledge what was written.
pub(crate) async fn flush_dirty_snapshots(state: &AppState) {
    let Some(pool) = &state.pool else {
        return;
    };

    // Copy snapshots under the read lock, then write lock-free.
    let pending = {
        let boards = state.boards.read().await;
        boards
            .iter()
            .filter(|(_, bs)| bs.is_dirty())
            .map(|(board_id, bs)| SnapshotFlush {
                board_id: *board_id,
                bytes: bs.store.serialize(),
                last_seq: bs.last_seq,
                version: bs.version,
            })
            .collect::<Vec<_>>()
    };

    for flush in pending {
        match write_snapshot(pool, flush.board_id, &flush.bytes, flush.last_seq).await {
            Ok(()) => ack_flushed(state, flush.board_id, flush.version).await,
            Err(e) => error!(error = %e, board_id = %flush.board_id, "snapshot flush failed"),
        }
    }
}

/// Record that `version` is durable. Later paints keep the board dirty.
pub(crate) async fn ack_flushed(state: &AppState, board_id: Uuid, version: u64) {
    let mut boards = state.boards.write().await;
    if let Some(bs) = boards.get_mut(&board_id) {
        bs.flushed_version = bs.flushed_version.max(version);
    }
}

/// Overwrite a board's stored snapshot.
///
/// # Errors
///
/// Returns a database error if the update fails.
pub async fn write_snapshot(pool: &PgPool, board_id: Uuid, bytes: &[u8], last_seq: i64) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE boards SET snapshot = $2, last_seq = $3, updated_at = now() WHERE id = $1")
        .bind(board_id)
        .bind(bytes)
        .bind(last_seq)
        .execute(pool)
        .await?;
    Ok(())
}

// =============================================================================
// PAINT LOG WRITER
// =============================================================================

/// Spawn a bounded paint persistence worker and return its queue sender.
#[must_use]
pub fn spawn_paint_persistence_worker(pool: PgPool) -> mpsc::Sender<PaintRecord> {
    let config = PaintPersistConfig::from_env();
    let (tx, mut rx) = mpsc::channel::<PaintRecord>(config.queue_capacity);

    info!(
        queue_capacity = config.queue_capacity,
        batch_size = config.batch_size,
        flush_ms = config.flush_ms,
        retries = config.retries,
        retry_base_ms = config.retry_base_ms,
        "paint persistence worker configured"
    );

    tokio::spawn(async move {
        let mut batch: Vec<PaintRecord> = Vec::with_capacity(config.batch_size);
        let mut ticker = tokio::time::interval(Duration::from_millis(config.flush_ms));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                maybe_record = rx.recv() => {
                    if let Some(record) = maybe_record {
                        batch.push(record);
                        if batch.len() >= config.batch_size {
                            flush_paint_batch_with_retry(&pool, &mut batch, config).await;
                        }
                    } else {
                        flush_paint_batch_with_retry(&pool, &mut batch, config).await;
                        break;
                    }
                }
                _ = ticker.tick() => {
                    flush_paint_batch_with_retry(&pool, &mut batch, config).await;
                }
            }
        }
    });

    tx
}

/// Best-effort, non-blocking enqueue for paint persistence.
///
/// Returns whether the record was queued. Without a database this is a no-op.
pub fn enqueue_paint(state: &AppState, record: PaintRecord) -> bool {
    let Some(tx) = &state.paint_persist_tx else {
        return false;
    };

    match tx.try_send(record) {
        Ok(()) => true,
        Err(TrySendError::Full(r)) => {
            warn!(board_id = %r.board_id, seq = r.seq, "paint persist queue full; dropping paint");
            false
        }
        Err(TrySendError::Closed(r)) => {
            warn!(board_id = %r.board_id, seq = r.seq, "paint persist queue closed; dropping paint");
            false
        }
    }
}

async fn flush_paint_batch_with_retry(pool: &PgPool, batch: &mut Vec<PaintRecord>, config: PaintPersistConfig) {
    if batch.is_empty() {
        return;
    }

    let drained = std::mem::take(batch);
    for attempt in 1..=config.retries {
        match persist_paint_batch(pool, &drained).await {
            Ok(()) => return,
            Err(e) if attempt < config.retries => {
                warn!(
                    error = %e,
                    attempt,
                    total = config.retries,
                    count = drained.len(),
                    "paint batch persist failed; retrying"
                );
                tokio::time::sleep(Duration::from_millis((attempt as u64) * config.retry_base_ms)).await;
            }
            Err(e) => {
                warn!(error = %e, count = drained.len(), "paint batch persist failed after retries; dropping paints");
                return;
            }
        }
    }
}

/// Insert a batch of paints in one statement. Duplicate `(board_id, seq)`
/// rows from a retried batch are ignored.
///
/// # Errors
///
/// Returns a database error if the insert fails.
pub async fn persist_paint_batch(pool: &PgPool, records: &[PaintRecord]) -> Result<(), sqlx::Error> {
    if records.is_empty() {
        return Ok(());
    }
    let mut builder = QueryBuilder::new("INSERT INTO paint_events (board_id, seq, x, y, color, actor, ts) ");
    builder.push_values(records, |mut row, record| {
        row.push_bind(record.board_id)
            .push_bind(record.seq)
            .push_bind(record.event.x)
            .push_bind(record.event.y)
            .push_bind(i16::from(record.event.color))
            .push_bind(record.event.actor.clone())
            .push_bind(record.event.ts);
    });
    builder.push(" ON CONFLICT (board_id, seq) DO NOTHING");
    builder.build().execute(pool).await?;
    Ok(())
}

#[cfg(test)]
#[path = "persistence_test.rs"]
mod tests;
