//! `BackendGateway` over the pixelboard server.
//!
//! DESIGN
//! ======
//! Snapshots are fetched over HTTP and paints flow over one websocket per
//! subscription. Every gateway call returns immediately: work runs on the
//! tokio runtime and completions go back through the client's `EventSink`,
//! which the host drains with `SyncClient::pump` on its own ticker.
//!
//! Paints published before the join completes wait in the outbound queue.
//! Error replies to a published paint surface as `PublishFailed`.

use std::collections::HashMap;

use canvas::replica::PaintEvent;
use canvas::sync::{BackendGateway, BoardId, EventSink, GatewayError, Subscription, SyncEvent};
use frames::{Frame, PaintPayload, PresencePayload, Status, syscall};
use futures_util::StreamExt;
use reqwest::StatusCode;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::error::CliError;
use crate::wire;

/// One paint on its way to the server.
#[derive(Debug)]
struct Outbound {
    frame: Frame,
    event: PaintEvent,
}

pub struct WsGateway {
    http: reqwest::Client,
    base_url: String,
    runtime: Handle,
    outbound: Option<mpsc::UnboundedSender<Outbound>>,
}

impl WsGateway {
    /// Must be called from inside a tokio runtime.
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self { http: reqwest::Client::new(), base_url: base_url.into(), runtime: Handle::current(), outbound: None }
    }
}

impl BackendGateway for WsGateway {
    type Subscription = WsSubscription;

    fn request_snapshot(&mut self, board: BoardId, sink: EventSink) {
        let http = self.http.clone();
        let url = wire::api_url(&self.base_url, &format!("/api/boards/{board}/snapshot"));
        self.runtime.spawn(async move {
            let result = fetch_snapshot(&http, &url).await;
            if let Err(e) = &result {
                debug!(%board, error = %e, "snapshot request failed");
            }
            sink.send(SyncEvent::Snapshot(result));
        });
    }

    fn append_paint_event(&mut self, board: BoardId, event: &PaintEvent) -> Result<(), GatewayError> {
        let Some(tx) = &self.outbound else {
            return Err(GatewayError::StreamDisconnected);
        };
        let payload = PaintPayload { x: event.x, y: event.y, color: event.color };
        let frame = Frame::request(syscall::PAINT_PUT, payload.to_data()).with_board_id(board);
        tx.send(Outbound { frame, event: event.clone() })
            .map_err(|_| GatewayError::StreamDisconnected)
    }

    fn subscribe(&mut self, board: BoardId, sink: EventSink) -> Result<WsSubscription, GatewayError> {
        wire::ws_url(&self.base_url).map_err(|e| GatewayError::Transport(e.to_string()))?;
        let (tx, rx) = mpsc::unbounded_channel();
        self.outbound = Some(tx);
        let base_url = self.base_url.clone();
        let task = self.runtime.spawn(run_stream(base_url, board, sink, rx));
        Ok(WsSubscription { task: Some(task) })
    }
}

/// Handle to one websocket stream task. Unsubscribing aborts it.
#[derive(Debug)]
pub struct WsSubscription {
    task: Option<JoinHandle<()>>,
}

impl Subscription for WsSubscription {
    fn unsubscribe(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for WsSubscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

async fn fetch_snapshot(http: &reqwest::Client, url: &str) -> Result<Vec<u8>, GatewayError> {
    let response = http
        .get(url)
        .send()
        .await
        .map_err(|e| GatewayError::Transport(e.to_string()))?;
    match response.status() {
        StatusCode::NOT_FOUND => Err(GatewayError::NotFound),
        status if !status.is_success() => Err(GatewayError::Transport(format!("HTTP {}", status.as_u16()))),
        _ => response
            .bytes()
            .await
            .map(|b| b.to_vec())
            .map_err(|e| GatewayError::Transport(e.to_string())),
    }
}

// =============================================================================
// STREAM TASK
// =============================================================================

async fn run_stream(base_url: String, board: BoardId, sink: EventSink, mut outbound: mpsc::UnboundedReceiver<Outbound>) {
    match stream_loop(&base_url, board, sink.clone(), &mut outbound).await {
        Ok(()) => debug!(%board, "event stream finished"),
        Err(e) => warn!(%board, error = %e, "event stream ended"),
    }
    sink.send(SyncEvent::Disconnected);
}

async fn stream_loop(
    base_url: &str,
    board: BoardId,
    sink: EventSink,
    outbound: &mut mpsc::UnboundedReceiver<Outbound>,
) -> Result<(), CliError> {
    let (mut stream, joined) = wire::connect_and_join(base_url, board).await?;
    info!(%board, "subscribed");
    if let Ok(presence) = PresencePayload::from_frame(&joined) {
        sink.send(SyncEvent::Presence(presence.count));
    }

    let mut pending: HashMap<String, PaintEvent> = HashMap::new();
    loop {
        tokio::select! {
            maybe = outbound.recv() => {
                // Gateway dropped: nobody can publish any more.
                let Some(out) = maybe else { return Ok(()) };
                wire::send_frame(&mut stream, &out.frame).await?;
                pending.insert(out.frame.id, out.event);
            }
            msg = stream.next() => {
                let frame = match msg {
                    None | Some(Ok(Message::Close(_))) => return Err(CliError::WsClosed),
                    Some(Err(e)) => return Err(e.into()),
                    Some(Ok(Message::Binary(bytes))) => frames::decode_frame(&bytes)?,
                    Some(Ok(_)) => continue,
                };
                if let Some(event) = route_frame(&frame, &mut pending) {
                    if !sink.send(event) {
                        return Ok(());
                    }
                }
            }
        }
    }
}

/// Translate one server frame into a sync event, settling replies to
/// published paints along the way.
pub(crate) fn route_frame(frame: &Frame, pending: &mut HashMap<String, PaintEvent>) -> Option<SyncEvent> {
    if let Some(parent) = &frame.parent_id {
        if !frame.status.is_terminal() {
            return None;
        }
        let event = pending.remove(parent)?;
        if frame.status != Status::Error {
            return None;
        }
        let message = frame.error_message().unwrap_or("paint rejected").to_owned();
        return Some(SyncEvent::PublishFailed { event, error: GatewayError::PublishFailure(message) });
    }

    match frame.syscall.as_str() {
        syscall::PAINT_PUT => {
            let paint = PaintPayload::from_frame(frame).ok()?;
            let ts = frame.field("ts").and_then(serde_json::Value::as_f64).map_or(frame.ts, |ts| ts as i64);
            let mut event = PaintEvent::new(paint.x, paint.y, paint.color, ts);
            event.actor.clone_from(&frame.from);
            Some(SyncEvent::Paint(event))
        }
        syscall::BOARD_PRESENCE => PresencePayload::from_frame(frame).ok().map(|p| SyncEvent::Presence(p.count)),
        _ => None,
    }
}

#[cfg(test)]
#[path = "gateway_test.rs"]
mod tests;
