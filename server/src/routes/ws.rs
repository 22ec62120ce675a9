//! WebSocket handler: bidirectional frame relay for board subscribers.
//!
//! DESIGN
//! ======
//! On upgrade, generates a client ID and enters a `select!` loop:
//! - Incoming client frames → decode + dispatch by syscall prefix
//! - Pushed frames from board peers → forward to client
//!
//! Handler functions are pure business logic: they validate, mutate state,
//! and return an `Outcome`. The dispatch layer owns all outbound concerns,
//! the reply to the sender and the push to peers.
//!
//! Binary messages carry protobuf frames, text messages carry JSON frames.
//! Outbound frames use the connection's `encoding` query parameter
//! (`proto` by default, or `json`).
//!
//! LIFECYCLE
//! =========
//! 1. Upgrade → send `session:connected` with `client_id`
//! 2. `board:join` → done with `online`, `board:presence` pushed to the board
//! 3. `paint:put` → done with `seq`, `paint:put` pushed to peers
//! 4. Close → part → `board:presence` pushed to whoever remains
//!
//! Each join opens a fresh push queue and hands its only sender to the
//! board. A client that lets the queue fill is dropped by the board, the
//! queue closes, and the connection ends so the client resubscribes.

use std::collections::HashMap;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use frames::{Data, FRAME_MESSAGE, Frame, PaintPayload, PresencePayload, Status, syscall};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::services;
use crate::state::AppState;

/// Per-connection outbound queue depth.
const CLIENT_QUEUE_CAPACITY: usize = 256;

// =============================================================================
// OUTCOME
// =============================================================================

/// Result returned by handler functions. The dispatch layer uses this to
/// decide who receives what; handlers never send frames directly.
#[derive(Debug)]
enum Outcome {
    /// Send done+data to sender only.
    Reply(Data),
    /// Send empty done to sender only.
    Done,
    /// Reply to the sender and push a separate frame to the board.
    ReplyAndPush { board_id: Uuid, reply: Data, push: Frame, exclude_sender: bool },
}

// =============================================================================
// SESSION
// =============================================================================

/// Outbound encoding negotiated at upgrade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WireEncoding {
    #[default]
    Proto,
    Json,
}

impl WireEncoding {
    fn from_query(params: &HashMap<String, String>) -> Self {
        match params.get("encoding").map(String::as_str) {
            Some("json") => Self::Json,
            _ => Self::Proto,
        }
    }
}

/// Connection-scoped state threaded through dispatch.
struct Session {
    client_id: Uuid,
    current_board: Option<Uuid>,
    /// Pushes from the joined board; closes if the board drops this client.
    pushes: Option<mpsc::Receiver<Frame>>,
}

impl Session {
    fn new(client_id: Uuid) -> Self {
        Self { client_id, current_board: None, pushes: None }
    }
}

/// Next frame pushed by board peers. Pending while no board is joined.
async fn next_push(pushes: &mut Option<mpsc::Receiver<Frame>>) -> Option<Frame> {
    match pushes {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

// =============================================================================
// UPGRADE
// =============================================================================

pub async fn handle_ws(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
    ws: WebSocketUpgrade,
) -> Response {
    let encoding = WireEncoding::from_query(&params);
    ws.on_upgrade(move |socket| run_ws(socket, state, encoding))
}

// =============================================================================
// CONNECTION
// =============================================================================

async fn run_ws(mut socket: WebSocket, state: AppState, encoding: WireEncoding) {
    let client_id = Uuid::new_v4();

    let mut session = Session::new(client_id);

    let welcome = Frame::push(syscall::SESSION_CONNECTED, Data::new()).with_data("client_id", client_id.to_string());
    if send_frame(&mut socket, encoding, &welcome).await.is_err() {
        return;
    }

    info!(%client_id, ?encoding, "ws: client connected");

    loop {
        tokio::select! {
            msg = socket.recv() => {
                let Some(Ok(msg)) = msg else { break };
                let replies = match msg {
                    Message::Binary(bytes) => process_inbound_bytes(&state, &mut session, &bytes).await,
                    Message::Text(text) => process_inbound_text(&state, &mut session, text.as_str()).await,
                    Message::Close(_) => break,
                    _ => continue,
                };
                for frame in replies {
                    if send_frame(&mut socket, encoding, &frame).await.is_err() {
                        break;
                    }
                }
            }
            push = next_push(&mut session.pushes) => {
                let Some(frame) = push else {
                    warn!(%client_id, "ws: dropped by board for falling behind; closing");
                    break;
                };
                if send_frame(&mut socket, encoding, &frame).await.is_err() {
                    break;
                }
            }
        }
    }

    if let Some(board_id) = session.current_board.take() {
        leave_board(&state, board_id, client_id).await;
    }
    info!(%client_id, "ws: client disconnected");
}

// =============================================================================
// FRAME DISPATCH
// =============================================================================

async fn process_inbound_bytes(state: &AppState, session: &mut Session, bytes: &[u8]) -> Vec<Frame> {
    match frames::decode_frame(bytes) {
        Ok(req) => process_inbound_frame(state, session, req).await,
        Err(e) => {
            warn!(client_id = %session.client_id, error = %e, "ws: invalid inbound frame");
            vec![gateway_error(format!("invalid frame: {e}"))]
        }
    }
}

async fn process_inbound_text(state: &AppState, session: &mut Session, text: &str) -> Vec<Frame> {
    match serde_json::from_str::<Frame>(text) {
        Ok(req) => process_inbound_frame(state, session, req).await,
        Err(e) => {
            warn!(client_id = %session.client_id, error = %e, "ws: invalid inbound frame");
            vec![gateway_error(format!("invalid json: {e}"))]
        }
    }
}

/// Process one decoded inbound frame and return frames for the sender.
///
/// Keeps the websocket transport separate from frame handling so tests can
/// exercise dispatch and fan-out end-to-end.
async fn process_inbound_frame(state: &AppState, session: &mut Session, mut req: Frame) -> Vec<Frame> {
    // Stamp the connection identity as `from`.
    req.from = Some(session.client_id.to_string());
    debug!(client_id = %session.client_id, id = %req.id, syscall = %req.syscall, "ws: recv frame");

    let result = match req.prefix() {
        syscall::PREFIX_BOARD => handle_board(state, session, &req).await,
        syscall::PREFIX_PAINT => handle_paint(state, session, &req).await,
        prefix => Err(req.error(format!("unknown prefix: {prefix}"))),
    };

    match result {
        Ok(Outcome::Reply(data)) => vec![req.done_with(data)],
        Ok(Outcome::Done) => vec![req.done()],
        Ok(Outcome::ReplyAndPush { board_id, reply, push, exclude_sender }) => {
            let exclude = exclude_sender.then_some(session.client_id);
            services::board::broadcast(state, board_id, &push, exclude).await;
            vec![req.done_with(reply)]
        }
        Err(err_frame) => vec![err_frame],
    }
}

// =============================================================================
// BOARD HANDLERS
// =============================================================================

async fn handle_board(state: &AppState, session: &mut Session, req: &Frame) -> Result<Outcome, Frame> {
    let op = req.syscall.split_once(':').map_or("", |(_, op)| op);

    match op {
        "join" => {
            let Some(board_id) = req.board_uuid().or_else(|| {
                req.field("board_id")
                    .and_then(|v| v.as_str())
                    .and_then(|s| s.parse().ok())
            }) else {
                return Err(req.error("board_id required"));
            };

            // Part the current board if already joined elsewhere.
            let previous = session.current_board.take();
            if let Some(old_board) = previous
                && old_board != board_id
            {
                leave_board(state, old_board, session.client_id).await;
                session.pushes = None;
            }

            let (tx, rx) = mpsc::channel(CLIENT_QUEUE_CAPACITY);
            match services::board::join_board(state, board_id, session.client_id, tx).await {
                Ok(online) => {
                    session.current_board = Some(board_id);
                    session.pushes = Some(rx);
                    let presence = PresencePayload { count: online };
                    Ok(Outcome::ReplyAndPush {
                        board_id,
                        reply: presence.to_data(),
                        push: presence_frame(board_id, online),
                        exclude_sender: false,
                    })
                }
                Err(e) => {
                    if previous == Some(board_id) {
                        leave_board(state, board_id, session.client_id).await;
                    }
                    session.pushes = None;
                    Err(req.error_from(&e))
                }
            }
        }
        "part" => {
            let Some(board_id) = session.current_board.take() else {
                return Ok(Outcome::Done);
            };
            let remaining = leave_board(state, board_id, session.client_id).await;
            session.pushes = None;
            Ok(Outcome::Reply(PresencePayload { count: remaining }.to_data()))
        }
        _ => Err(req.error(format!("unknown board op: {op}"))),
    }
}

/// Part a board and tell whoever remains. Returns the remaining count.
async fn leave_board(state: &AppState, board_id: Uuid, client_id: Uuid) -> usize {
    let remaining = services::board::part_board(state, board_id, client_id).await;
    if remaining > 0 {
        services::board::broadcast(state, board_id, &presence_frame(board_id, remaining), None).await;
    }
    remaining
}

fn presence_frame(board_id: Uuid, online: usize) -> Frame {
    Frame::push(syscall::BOARD_PRESENCE, PresencePayload { count: online }.to_data()).with_board_id(board_id)
}

// =============================================================================
// PAINT HANDLER
// =============================================================================

async fn handle_paint(state: &AppState, session: &Session, req: &Frame) -> Result<Outcome, Frame> {
    let Some(board_id) = session.current_board else {
        return Err(req.error("must join a board first"));
    };
    if req.syscall != syscall::PAINT_PUT {
        return Err(req.error(format!("unknown paint op: {}", req.syscall)));
    }

    let paint = PaintPayload::from_frame(req).map_err(|e| req.error_from(&e))?;
    let actor = session.client_id.to_string();

    match services::paint::apply_paint(state, board_id, paint, Some(&actor)).await {
        Ok(Some(logged)) => {
            let mut reply = Data::new();
            reply.insert("seq".into(), logged.seq.into());
            let push = Frame::push(syscall::PAINT_PUT, paint.to_data())
                .with_board_id(board_id)
                .with_from(actor)
                .with_data("seq", logged.seq)
                .with_data("ts", logged.event.ts);
            Ok(Outcome::ReplyAndPush { board_id, reply, push, exclude_sender: true })
        }
        // Unchanged cells are acknowledged but never published.
        Ok(None) => Ok(Outcome::Done),
        Err(e) => Err(req.error_from(&e)),
    }
}

// =============================================================================
// HELPERS
// =============================================================================

fn gateway_error(message: String) -> Frame {
    let mut frame = Frame::push(syscall::GATEWAY_ERROR, Data::new()).with_data(FRAME_MESSAGE, message);
    frame.status = Status::Error;
    frame
}

async fn send_frame(socket: &mut WebSocket, encoding: WireEncoding, frame: &Frame) -> Result<(), axum::Error> {
    if frame.status == Status::Error {
        let code = frame.error_code().unwrap_or("-");
        let message = frame.error_message().unwrap_or("-");
        warn!(id = %frame.id, syscall = %frame.syscall, code, message, "ws: send frame status=Error");
    } else {
        debug!(id = %frame.id, syscall = %frame.syscall, status = ?frame.status, "ws: send frame");
    }

    let msg = match encoding {
        WireEncoding::Proto => Message::Binary(frames::encode_frame(frame).into()),
        WireEncoding::Json => match serde_json::to_string(frame) {
            Ok(json) => Message::Text(json.into()),
            Err(e) => {
                warn!(error = %e, "ws: failed to serialize frame");
                return Ok(());
            }
        },
    };
    socket.send(msg).await
}

#[cfg(test)]
#[path = "ws_test.rs"]
mod tests;
