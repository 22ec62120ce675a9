//! Shared application state.
//!
//! DESIGN
//! ======
//! `AppState` is injected into Axum handlers via the `State` extractor.
//! It holds the optional database pool and a map of live boards. Each board
//! keeps its authoritative pixel store, the tail of its paint log, its
//! connected clients, and a dirty marker for debounced snapshot flushes.

use std::collections::HashMap;
use std::sync::Arc;

use canvas::consts::{BOARD_HEIGHT, BOARD_WIDTH};
use canvas::palette::Palette;
use canvas::replica::PaintEvent;
use canvas::store::PixelStore;
use frames::Frame;
use serde::Serialize;
use sqlx::PgPool;
use tokio::sync::{RwLock, mpsc};
use uuid::Uuid;

use crate::services::persistence::{PaintRecord, env_parse};

const DEFAULT_PAINT_LOG_RETAIN: usize = 100_000;

// =============================================================================
// CONFIG
// =============================================================================

/// Board geometry and retention, fixed for the life of the process.
#[derive(Debug, Clone, Copy)]
pub struct BoardConfig {
    pub width: u32,
    pub height: u32,
    pub palette_len: usize,
    /// Paint events kept in memory per board for `/events` paging.
    pub log_retain: usize,
}

impl Default for BoardConfig {
    fn default() -> Self {
        Self {
            width: BOARD_WIDTH,
            height: BOARD_HEIGHT,
            palette_len: Palette::default().len(),
            log_retain: DEFAULT_PAINT_LOG_RETAIN,
        }
    }
}

impl BoardConfig {
    #[must_use]
    pub fn from_env() -> Self {
        Self { log_retain: env_parse("PAINT_LOG_RETAIN", DEFAULT_PAINT_LOG_RETAIN), ..Self::default() }
    }
}

// =============================================================================
// BOARD STATE
// =============================================================================

/// One accepted paint with its position in the board's log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoggedPaint {
    pub seq: i64,
    #[serde(flatten)]
    pub event: PaintEvent,
}

/// Per-board live state. Kept in memory for real-time performance.
/// Snapshots are flushed to Postgres by the persistence task.
pub struct BoardState {
    pub store: PixelStore,
    /// Most recent paints, oldest first, capped at `BoardConfig::log_retain`.
    pub log: Vec<LoggedPaint>,
    /// Sequence number of the last accepted paint.
    pub last_seq: i64,
    /// Connected clients: `client_id` -> sender for outgoing frames.
    pub clients: HashMap<Uuid, mpsc::Sender<Frame>>,
    /// Bumped on every accepted paint.
    pub version: u64,
    /// `version` as of the last successful snapshot flush.
    pub flushed_version: u64,
}

impl BoardState {
    /// A blank board: every cell is the background color.
    #[must_use]
    pub fn new(config: &BoardConfig) -> Self {
        Self::from_store(PixelStore::new(config.width, config.height, config.palette_len), 0)
    }

    #[must_use]
    pub fn from_store(store: PixelStore, last_seq: i64) -> Self {
        Self { store, log: Vec::new(), last_seq, clients: HashMap::new(), version: 0, flushed_version: 0 }
    }

    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.version != self.flushed_version
    }

    /// Append one paint, dropping the oldest entries past `retain`.
    pub fn push_log(&mut self, event: PaintEvent, retain: usize) -> LoggedPaint {
        self.last_seq += 1;
        self.version += 1;
        let logged = LoggedPaint { seq: self.last_seq, event };
        self.log.push(logged.clone());
        if self.log.len() > retain {
            let excess = self.log.len() - retain;
            self.log.drain(..excess);
        }
        logged
    }

    /// Sequence number of the oldest paint still in memory.
    #[must_use]
    pub fn first_retained_seq(&self) -> i64 {
        self.log.first().map_or(self.last_seq + 1, |p| p.seq)
    }
}

// =============================================================================
// APP STATE
// =============================================================================

/// Shared application state, injected into Axum handlers via State extractor.
/// Clone is required by Axum; all inner fields are Arc-wrapped or Clone.
#[derive(Clone)]
pub struct AppState {
    /// `None` runs the server in memory only.
    pub pool: Option<PgPool>,
    pub boards: Arc<RwLock<HashMap<Uuid, BoardState>>>,
    pub config: BoardConfig,
    /// Queue into the batched paint-log writer. `None` without a database.
    pub paint_persist_tx: Option<mpsc::Sender<PaintRecord>>,
}

impl AppState {
    #[must_use]
    pub fn new(pool: Option<PgPool>, config: BoardConfig) -> Self {
        Self { pool, boards: Arc::new(RwLock::new(HashMap::new())), config, paint_persist_tx: None }
    }

    #[must_use]
    pub fn with_paint_persistence(mut self, tx: mpsc::Sender<PaintRecord>) -> Self {
        self.paint_persist_tx = Some(tx);
        self
    }
}

// =============================================================================
// TEST HELPERS
// =============================================================================

#[cfg(test)]
pub mod test_helpers {
    use super::*;

    /// Small boards keep test snapshots readable.
    pub const TEST_SIDE: u32 = 8;

    #[must_use]
    pub fn test_config() -> BoardConfig {
        BoardConfig { width: TEST_SIDE, height: TEST_SIDE, palette_len: 16, log_retain: 4 }
    }

    /// In-memory `AppState` with 8×8 boards.
    #[must_use]
    pub fn test_app_state() -> AppState {
        AppState::new(None, test_config())
    }

    /// Seed a blank board into the app state and return its ID.
    pub async fn seed_board(state: &AppState) -> Uuid {
        let board_id = Uuid::new_v4();
        let mut boards = state.boards.write().await;
        boards.insert(board_id, BoardState::new(&state.config));
        board_id
    }
}

#[cfg(test)]
#[path = "state_test.rs"]
mod tests;
