//! Board REST routes: creation, snapshot download, and paint log paging.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::http::header::CONTENT_TYPE;
use axum::response::{IntoResponse, Json, Response};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::services::board::{self, BoardError};
use crate::state::{AppState, LoggedPaint};

const DEFAULT_EVENTS_LIMIT: usize = 500;

#[derive(Debug, Serialize)]
pub struct CreateBoardResponse {
    pub id: Uuid,
}

#[derive(Debug, Default, Deserialize)]
pub struct EventsQuery {
    pub after: Option<i64>,
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct EventsResponse {
    pub events: Vec<LoggedPaint>,
    /// Pass as `after` to fetch the next page.
    pub next_after: i64,
}

/// `POST /api/boards`: create a blank board.
pub async fn create_board(State(state): State<AppState>) -> Result<(StatusCode, Json<CreateBoardResponse>), StatusCode> {
    let id = board::create_board(&state).await.map_err(board_error_to_status)?;
    Ok((StatusCode::CREATED, Json(CreateBoardResponse { id })))
}

/// `GET /api/boards/:id/snapshot`: dense W×H palette indices, row-major.
pub async fn get_snapshot(State(state): State<AppState>, Path(board_id): Path<Uuid>) -> Result<Response, StatusCode> {
    let bytes = board::snapshot(&state, board_id).await.map_err(board_error_to_status)?;
    Ok(([(CONTENT_TYPE, "application/octet-stream")], bytes).into_response())
}

/// `GET /api/boards/:id/events?after=N&limit=M`: paint log page, oldest first.
pub async fn list_events(
    State(state): State<AppState>,
    Path(board_id): Path<Uuid>,
    Query(query): Query<EventsQuery>,
) -> Result<Json<EventsResponse>, StatusCode> {
    let after = query.after.unwrap_or(0);
    let limit = query.limit.unwrap_or(DEFAULT_EVENTS_LIMIT);
    let events = board::events(&state, board_id, after, limit)
        .await
        .map_err(board_error_to_status)?;
    let next_after = events.last().map_or(after, |p| p.seq);
    Ok(Json(EventsResponse { events, next_after }))
}

pub(crate) fn board_error_to_status(err: BoardError) -> StatusCode {
    match err {
        BoardError::NotFound(_) => StatusCode::NOT_FOUND,
        BoardError::Corrupt(e) => {
            tracing::error!(error = %e, "stored board snapshot is unusable");
            StatusCode::INTERNAL_SERVER_ERROR
        }
        BoardError::Database(e) => {
            tracing::error!(error = %e, "board query failed");
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

#[cfg(test)]
#[path = "boards_test.rs"]
mod tests;
