//! Sync client: keeps a [`BoardReplica`] converged with the shared board.
//!
//! DESIGN
//! ======
//! The backend is reached through an injected [`BackendGateway`], never a
//! global. Gateways are completion-queue style: calls return immediately and
//! results (snapshot bytes, remote paints, presence, disconnects) are pushed
//! into the client's inbox through an [`EventSink`]. The host drains the
//! inbox with [`SyncClient::pump`] once per frame or timer tick, so every
//! replica mutation happens on the caller's thread and nothing needs a lock.
//!
//! Each subscribe attempt opens a new epoch. Sinks are stamped with the epoch
//! they were created for, and anything arriving from an older epoch is
//! dropped, so a late disconnect or snapshot from a dead stream cannot undo
//! the state of the live one.
//!
//! Local paints are optimistic: the replica is written first, then the event
//! is published. A rejected publish is logged and left in place; the next
//! snapshot reconciles it.
//!
//! ERROR HANDLING
//! ==============
//! - Malformed or missing snapshot before the board ever loaded: status
//!   `Failed`, editing blocked until [`SyncClient::retry`].
//! - Same after the board loaded: logged, the stale replica stays usable.
//! - Stream drop: status `Reconnecting`, resubscribe with exponential
//!   backoff, then refetch the snapshot. Local painting keeps working.
//! - Publish failure: logged and counted, never surfaced.

#[cfg(test)]
#[path = "sync_test.rs"]
mod sync_test;

use std::collections::VecDeque;

use futures::FutureExt;
use futures::StreamExt;
use futures::channel::mpsc;
use uuid::Uuid;

use crate::consts::{MAX_PENDING_PAINTS, RECONNECT_BACKOFF_MAX_MS, RECONNECT_BACKOFF_MIN_MS};
use crate::palette::ColorIndex;
use crate::replica::{BoardReplica, PaintEvent};
use crate::store::StoreError;

/// Boards are addressed by UUID.
pub type BoardId = Uuid;

/// Failures reported by a [`BackendGateway`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    #[error("board not found")]
    NotFound,
    #[error("publish failed: {0}")]
    PublishFailure(String),
    #[error("event stream disconnected")]
    StreamDisconnected,
    #[error("transport error: {0}")]
    Transport(String),
}

/// Something the backend tells the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// Completion of [`BackendGateway::request_snapshot`].
    Snapshot(Result<Vec<u8>, GatewayError>),
    /// A paint from another client.
    Paint(PaintEvent),
    /// Number of clients subscribed to the board.
    Presence(usize),
    /// The backend rejected a paint published earlier.
    PublishFailed { event: PaintEvent, error: GatewayError },
    /// The event stream is gone.
    Disconnected,
}

#[derive(Debug)]
pub(crate) struct Envelope {
    pub(crate) epoch: u64,
    pub(crate) event: SyncEvent,
}

/// Cloneable handle gateways use to deliver [`SyncEvent`]s.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<Envelope>,
    epoch: u64,
}

impl EventSink {
    /// Deliver one event. Returns false once the client is gone.
    pub fn send(&self, event: SyncEvent) -> bool {
        self.tx.unbounded_send(Envelope { epoch: self.epoch, event }).is_ok()
    }

    /// Whether the receiving client has closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// A sink not attached to any client, with its receiving end.
#[cfg(test)]
pub(crate) fn test_sink() -> (EventSink, mpsc::UnboundedReceiver<Envelope>) {
    let (tx, rx) = mpsc::unbounded();
    (EventSink { tx, epoch: 0 }, rx)
}

/// A live event-stream subscription.
pub trait Subscription {
    /// Stop delivery. Idempotent.
    fn unsubscribe(&mut self);
}

/// Everything the client needs from the backend.
pub trait BackendGateway {
    type Subscription: Subscription;

    /// Fetch the board snapshot; completes with [`SyncEvent::Snapshot`].
    fn request_snapshot(&mut self, board: BoardId, sink: EventSink);

    /// Publish a paint. `Ok` means accepted for delivery, not durable;
    /// later rejections arrive as [`SyncEvent::PublishFailed`].
    ///
    /// # Errors
    ///
    /// Immediate rejection, typically [`GatewayError::StreamDisconnected`].
    fn append_paint_event(&mut self, board: BoardId, event: &PaintEvent) -> Result<(), GatewayError>;

    /// Start receiving paints and presence for `board`.
    ///
    /// # Errors
    ///
    /// [`GatewayError::NotFound`] for an unknown board, transport errors
    /// otherwise.
    fn subscribe(&mut self, board: BoardId, sink: EventSink) -> Result<Self::Subscription, GatewayError>;
}

/// A paint waiting for the snapshot in flight.
#[derive(Debug, Clone)]
struct Buffered {
    origin: Origin,
    event: PaintEvent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    /// Painted by this client; survives a stream drop.
    Local,
    /// Delivered by the stream; stale once that stream is gone.
    Remote,
}

/// Why the client stopped.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyncError {
    #[error(transparent)]
    Snapshot(#[from] StoreError),
    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncStatus {
    /// Not connected yet.
    Idle,
    /// Subscribed, first snapshot in flight.
    Loading,
    /// Subscribed and converging.
    Live,
    /// Stream lost; waiting to resubscribe.
    Reconnecting,
    /// Initial load failed; needs [`SyncClient::retry`].
    Failed(SyncError),
    /// Closed by the host.
    Closed,
}

/// Exponential reconnect delay: `min`, doubling, capped at `max`.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    min_ms: f64,
    max_ms: f64,
    next_ms: f64,
}

impl Backoff {
    #[must_use]
    pub fn new(min_ms: f64, max_ms: f64) -> Self {
        Self { min_ms, max_ms, next_ms: min_ms }
    }

    /// The delay to wait now; the following one doubles.
    pub fn next_delay(&mut self) -> f64 {
        let delay = self.next_ms;
        self.next_ms = (self.next_ms * 2.0).min(self.max_ms);
        delay
    }

    pub fn reset(&mut self) {
        self.next_ms = self.min_ms;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(RECONNECT_BACKOFF_MIN_MS, RECONNECT_BACKOFF_MAX_MS)
    }
}

/// Counters for diagnostics and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncStats {
    pub snapshots_loaded: u64,
    pub snapshot_failures: u64,
    pub remote_paints: u64,
    pub published: u64,
    pub publish_failures: u64,
    pub reconnects: u64,
    pub stale_events: u64,
}

pub struct SyncClient<G: BackendGateway> {
    gateway: G,
    board_id: BoardId,
    actor: Option<String>,
    tx: mpsc::UnboundedSender<Envelope>,
    inbox: mpsc::UnboundedReceiver<Envelope>,
    epoch: u64,
    snapshot_epoch: Option<u64>,
    subscription: Option<G::Subscription>,
    status: SyncStatus,
    has_snapshot: bool,
    online_peers: usize,
    pending: VecDeque<Buffered>,
    backoff: Backoff,
    retry_at: Option<f64>,
    stats: SyncStats,
}

impl<G: BackendGateway> SyncClient<G> {
    #[must_use]
    pub fn new(gateway: G, board_id: BoardId) -> Self {
        let (tx, inbox) = mpsc::unbounded();
        Self {
            gateway,
            board_id,
            actor: None,
            tx,
            inbox,
            epoch: 0,
            snapshot_epoch: None,
            subscription: None,
            status: SyncStatus::Idle,
            has_snapshot: false,
            online_peers: 0,
            pending: VecDeque::new(),
            backoff: Backoff::default(),
            retry_at: None,
            stats: SyncStats::default(),
        }
    }

    /// Identity stamped on published paints.
    #[must_use]
    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    #[must_use]
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    // --- Lifecycle ---

    /// Subscribe and request the first snapshot. No-op unless idle.
    pub fn connect(&mut self, now_ms: f64) {
        if self.status != SyncStatus::Idle {
            return;
        }
        log::info!("sync: connecting to board {}", self.board_id);
        self.open(now_ms);
    }

    /// Start over after a failed initial load.
    pub fn retry(&mut self, now_ms: f64) {
        if !matches!(self.status, SyncStatus::Failed(_)) {
            return;
        }
        log::info!("sync: retrying board {}", self.board_id);
        self.drop_subscription();
        self.backoff.reset();
        self.status = SyncStatus::Idle;
        self.open(now_ms);
    }

    /// Unsubscribe and stop accepting events.
    pub fn close(&mut self) {
        if self.status == SyncStatus::Closed {
            return;
        }
        self.drop_subscription();
        self.inbox.close();
        self.pending.clear();
        self.retry_at = None;
        self.snapshot_epoch = None;
        self.online_peers = 0;
        self.status = SyncStatus::Closed;
        log::info!("sync: closed board {}", self.board_id);
    }

    /// Drain the inbox into `replica` and run a due reconnect. Never blocks.
    /// Returns the number of events handled.
    pub fn pump(&mut self, now_ms: f64, replica: &mut BoardReplica) -> usize {
        let mut handled = 0;
        while let Some(Some(envelope)) = self.inbox.next().now_or_never() {
            handled += 1;
            self.handle(envelope, now_ms, replica);
        }
        if self.status == SyncStatus::Reconnecting && self.retry_at.is_some_and(|at| now_ms >= at) {
            self.retry_at = None;
            self.stats.reconnects += 1;
            self.open(now_ms);
        }
        handled
    }

    /// Optimistic local paint: write the replica, then publish. Returns the
    /// published event, or `None` when the cell already held `color`.
    ///
    /// # Errors
    ///
    /// Store errors for coordinates off the board or colors off the palette;
    /// nothing is published then.
    pub fn paint(
        &mut self,
        replica: &mut BoardReplica,
        x: i64,
        y: i64,
        color: ColorIndex,
        now_ms: f64,
    ) -> Result<Option<PaintEvent>, StoreError> {
        if !replica.apply(x, y, color)? {
            return Ok(None);
        }
        #[allow(clippy::cast_possible_truncation)]
        let event = PaintEvent { x, y, color, ts: now_ms as i64, actor: self.actor.clone() };
        // A snapshot already in flight may predate this write.
        self.buffer_if_loading(Origin::Local, &event);
        match self.gateway.append_paint_event(self.board_id, &event) {
            Ok(()) => self.stats.published += 1,
            Err(err) => {
                self.stats.publish_failures += 1;
                log::warn!("sync: publish of ({x}, {y}) failed, keeping local paint: {err}");
            }
        }
        Ok(Some(event))
    }

    // --- Queries ---

    #[must_use]
    pub fn status(&self) -> &SyncStatus {
        &self.status
    }

    /// Clients on the board, as last reported by the backend.
    #[must_use]
    pub fn online_peers(&self) -> usize {
        self.online_peers
    }

    /// Whether local painting is allowed: a snapshot has loaded and the
    /// client has not been closed.
    #[must_use]
    pub fn can_edit(&self) -> bool {
        self.has_snapshot && !matches!(self.status, SyncStatus::Failed(_) | SyncStatus::Closed)
    }

    #[must_use]
    pub fn board_id(&self) -> BoardId {
        self.board_id
    }

    #[must_use]
    pub fn stats(&self) -> SyncStats {
        self.stats
    }

    /// When the next resubscribe attempt is due, if one is scheduled.
    #[must_use]
    pub fn retry_at(&self) -> Option<f64> {
        self.retry_at
    }

    #[must_use]
    pub fn gateway(&self) -> &G {
        &self.gateway
    }

    pub fn gateway_mut(&mut self) -> &mut G {
        &mut self.gateway
    }

    // --- Internals ---

    fn sink(&self) -> EventSink {
        EventSink { tx: self.tx.clone(), epoch: self.epoch }
    }

    fn open(&mut self, now_ms: f64) {
        self.epoch += 1;
        match self.gateway.subscribe(self.board_id, self.sink()) {
            Ok(subscription) => {
                self.subscription = Some(subscription);
                self.backoff.reset();
                self.snapshot_epoch = Some(self.epoch);
                self.gateway.request_snapshot(self.board_id, self.sink());
                self.status = if self.has_snapshot { SyncStatus::Live } else { SyncStatus::Loading };
            }
            Err(GatewayError::NotFound) if !self.has_snapshot => {
                log::warn!("sync: board {} not found", self.board_id);
                self.status = SyncStatus::Failed(SyncError::Gateway(GatewayError::NotFound));
            }
            Err(err) => {
                log::warn!("sync: subscribe to board {} failed: {err}", self.board_id);
                self.schedule_reconnect(now_ms);
            }
        }
    }

    fn schedule_reconnect(&mut self, now_ms: f64) {
        let delay = self.backoff.next_delay();
        self.retry_at = Some(now_ms + delay);
        self.status = SyncStatus::Reconnecting;
        log::info!("sync: resubscribing to board {} in {delay}ms", self.board_id);
    }

    fn drop_subscription(&mut self) {
        if let Some(mut subscription) = self.subscription.take() {
            subscription.unsubscribe();
        }
    }

    fn handle(&mut self, envelope: Envelope, now_ms: f64, replica: &mut BoardReplica) {
        if self.status == SyncStatus::Closed {
            return;
        }
        let Envelope { epoch, event } = envelope;
        match event {
            SyncEvent::PublishFailed { event, error } => {
                self.stats.publish_failures += 1;
                log::warn!("sync: backend rejected paint ({}, {}): {error}", event.x, event.y);
            }
            _ if epoch != self.epoch => {
                self.stats.stale_events += 1;
            }
            SyncEvent::Snapshot(result) => self.on_snapshot(epoch, result, replica),
            SyncEvent::Paint(event) => self.on_remote_paint(event, replica),
            SyncEvent::Presence(count) => self.online_peers = count,
            SyncEvent::Disconnected => {
                log::warn!("sync: event stream for board {} dropped", self.board_id);
                self.drop_subscription();
                self.snapshot_epoch = None;
                // The next snapshot postdates anything the dead stream sent.
                self.pending.retain(|b| b.origin == Origin::Local);
                self.online_peers = 0;
                self.schedule_reconnect(now_ms);
            }
        }
    }

    fn on_snapshot(&mut self, epoch: u64, result: Result<Vec<u8>, GatewayError>, replica: &mut BoardReplica) {
        if self.snapshot_epoch != Some(epoch) {
            self.stats.stale_events += 1;
            return;
        }
        self.snapshot_epoch = None;

        let loaded = result.map_err(SyncError::from).and_then(|bytes| replica.load_snapshot(&bytes).map_err(SyncError::from));
        match loaded {
            Ok(()) => {
                self.stats.snapshots_loaded += 1;
                self.has_snapshot = true;
                if matches!(self.status, SyncStatus::Loading | SyncStatus::Live) {
                    self.status = SyncStatus::Live;
                }
                log::info!("sync: snapshot loaded for board {}", self.board_id);
                self.replay_pending(replica);
            }
            Err(err) if self.has_snapshot => {
                self.stats.snapshot_failures += 1;
                log::warn!("sync: snapshot refresh failed, keeping current board: {err}");
                self.replay_pending(replica);
            }
            Err(err) => {
                self.stats.snapshot_failures += 1;
                log::warn!("sync: initial snapshot failed: {err}");
                self.pending.clear();
                self.status = SyncStatus::Failed(err);
            }
        }
    }

    fn on_remote_paint(&mut self, event: PaintEvent, replica: &mut BoardReplica) {
        if !self.buffer_if_loading(Origin::Remote, &event) {
            self.apply_remote(&event, replica);
        }
    }

    /// Queue `event` for replay over the snapshot in flight, if there is one.
    fn buffer_if_loading(&mut self, origin: Origin, event: &PaintEvent) -> bool {
        if self.snapshot_epoch.is_none() {
            return false;
        }
        if self.pending.len() >= MAX_PENDING_PAINTS {
            self.pending.pop_front();
        }
        self.pending.push_back(Buffered { origin, event: event.clone() });
        true
    }

    fn replay_pending(&mut self, replica: &mut BoardReplica) {
        while let Some(Buffered { origin, event }) = self.pending.pop_front() {
            match origin {
                Origin::Remote => self.apply_remote(&event, replica),
                Origin::Local => {
                    if let Err(err) = replica.apply_event(&event) {
                        log::warn!("sync: dropping local paint on replay: {err}");
                    }
                }
            }
        }
    }

    fn apply_remote(&mut self, event: &PaintEvent, replica: &mut BoardReplica) {
        match replica.apply_event(event) {
            Ok(_) => self.stats.remote_paints += 1,
            Err(err) => log::warn!("sync: dropping remote paint: {err}"),
        }
    }
}

impl<G: BackendGateway> Drop for SyncClient<G> {
    fn drop(&mut self) {
        self.drop_subscription();
    }
}
