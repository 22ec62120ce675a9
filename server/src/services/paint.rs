//! Paint service: validate and fold one cell write into a board.
//!
//! The in-memory store is authoritative. An accepted paint bumps the board's
//! version (marking it dirty for the snapshot flush), is appended to the
//! retained log tail, and is queued for the `paint_events` table.

use canvas::replica::PaintEvent;
use canvas::store::StoreError;
use frames::{ErrorCode, PaintPayload, now_ms};
use uuid::Uuid;

use crate::services::board::{self, BoardError};
use crate::services::persistence::{PaintRecord, enqueue_paint};
use crate::state::{AppState, LoggedPaint};

#[derive(Debug, thiserror::Error)]
pub enum PaintError {
    #[error(transparent)]
    Board(#[from] BoardError),
    #[error("paint rejected: {0}")]
    Rejected(#[from] StoreError),
}

impl ErrorCode for PaintError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Board(e) => e.error_code(),
            Self::Rejected(StoreError::OutOfBounds { .. }) => "E_OUT_OF_BOUNDS",
            Self::Rejected(StoreError::InvalidColorIndex { .. }) => "E_INVALID_COLOR",
            Self::Rejected(StoreError::MalformedSnapshot { .. }) => "E_BAD_PAINT",
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::Board(e) if e.retryable())
    }
}

/// Apply one paint to a board.
///
/// Returns the logged paint when the cell changed, `None` when it already
/// held that color. Unchanged cells are neither logged nor broadcast.
///
/// # Errors
///
/// [`PaintError::Rejected`] for coordinates off the board or colors outside
/// the palette; [`PaintError::Board`] when the board cannot be loaded.
pub async fn apply_paint(
    state: &AppState,
    board_id: Uuid,
    paint: PaintPayload,
    actor: Option<&str>,
) -> Result<Option<LoggedPaint>, PaintError> {
    board::ensure_loaded(state, board_id).await?;

    let logged = {
        let mut boards = state.boards.write().await;
        let Some(bs) = boards.get_mut(&board_id) else {
            return Err(BoardError::NotFound(board_id).into());
        };
        if !bs.store.set(paint.x, paint.y, paint.color)? {
            return Ok(None);
        }
        let mut event = PaintEvent::new(paint.x, paint.y, paint.color, now_ms());
        event.actor = actor.map(str::to_owned);
        bs.push_log(event, state.config.log_retain)
    };

    enqueue_paint(state, PaintRecord { board_id, seq: logged.seq, event: logged.event.clone() });
    Ok(Some(logged))
}

#[cfg(test)]
#[path = "paint_test.rs"]
mod tests;
