//! In-process backend: a [`BackendGateway`] with no network underneath.
//!
//! A [`LocalHub`] holds snapshots, paint logs, and subscriber lists for any
//! number of boards. Each client gets its own [`LocalGateway`] (one peer id
//! per gateway), so fan-out can skip the publishing peer the same way the
//! websocket server skips the sender.
//!
//! Deliveries are pushed straight into the subscriber's inbox; clients still
//! see them only on their next `pump`, which is the same ordering a real
//! network gives. Fault switches let tests reject publishes, refuse
//! subscriptions, drop one peer or every connection, or delete a board
//! outright.

#[cfg(test)]
#[path = "hub_test.rs"]
mod hub_test;

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use uuid::Uuid;

use crate::replica::PaintEvent;
use crate::store::{cell_count, cell_index};
use crate::sync::{BackendGateway, BoardId, EventSink, GatewayError, Subscription, SyncEvent};

struct Subscriber {
    id: u64,
    peer: u64,
    sink: EventSink,
}

struct HubBoard {
    width: u32,
    height: u32,
    snapshot: Vec<u8>,
    log: Vec<PaintEvent>,
    subscribers: Vec<Subscriber>,
}

impl HubBoard {
    fn broadcast_presence(&mut self) {
        let count = self.subscribers.len();
        self.subscribers.retain(|s| s.sink.send(SyncEvent::Presence(count)));
    }

    /// Remove the subscribers matching `cut`, tell them they were dropped,
    /// and push the new count to everyone left.
    fn disconnect_where(&mut self, cut: impl Fn(&Subscriber) -> bool) -> usize {
        let (dropped, kept): (Vec<_>, Vec<_>) = self.subscribers.drain(..).partition(|s| cut(s));
        self.subscribers = kept;
        for s in &dropped {
            s.sink.send(SyncEvent::Disconnected);
        }
        if !dropped.is_empty() {
            self.broadcast_presence();
        }
        dropped.len()
    }
}

#[derive(Default)]
struct HubState {
    boards: HashMap<BoardId, HubBoard>,
    next_id: u64,
    reject_publishes: Option<String>,
    refuse_subscribe: bool,
}

impl HubState {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

/// Shared in-memory backend.
#[derive(Clone, Default)]
pub struct LocalHub {
    state: Rc<RefCell<HubState>>,
}

impl LocalHub {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a blank board (every cell index 0).
    #[must_use]
    pub fn create_board(&self, width: u32, height: u32) -> BoardId {
        let id = Uuid::new_v4();
        self.insert_board(id, width, height, vec![0; cell_count(width, height)]);
        id
    }

    /// Install a board with the given snapshot bytes. The bytes are served
    /// as-is, so a wrong length is how tests exercise malformed snapshots.
    pub fn insert_board(&self, id: BoardId, width: u32, height: u32, snapshot: Vec<u8>) {
        let board = HubBoard { width, height, snapshot, log: Vec::new(), subscribers: Vec::new() };
        self.state.borrow_mut().boards.insert(id, board);
    }

    /// A gateway for one more client.
    #[must_use]
    pub fn gateway(&self) -> LocalGateway {
        let peer = self.state.borrow_mut().next_id();
        LocalGateway { state: Rc::clone(&self.state), peer }
    }

    #[must_use]
    pub fn snapshot(&self, board: BoardId) -> Option<Vec<u8>> {
        self.state.borrow().boards.get(&board).map(|b| b.snapshot.clone())
    }

    /// Every paint accepted for `board`, in arrival order.
    #[must_use]
    pub fn log(&self, board: BoardId) -> Vec<PaintEvent> {
        self.state.borrow().boards.get(&board).map(|b| b.log.clone()).unwrap_or_default()
    }

    #[must_use]
    pub fn presence(&self, board: BoardId) -> usize {
        self.state.borrow().boards.get(&board).map_or(0, |b| b.subscribers.len())
    }

    /// Reject every publish with `reason` until cleared with `None`.
    pub fn set_reject_publishes(&self, reason: Option<&str>) {
        self.state.borrow_mut().reject_publishes = reason.map(str::to_owned);
    }

    /// Refuse new subscriptions with a transport error.
    pub fn set_refuse_subscribe(&self, refuse: bool) {
        self.state.borrow_mut().refuse_subscribe = refuse;
    }

    /// Cut every subscriber of `board` off with [`SyncEvent::Disconnected`].
    pub fn drop_connections(&self, board: BoardId) {
        if let Some(b) = self.state.borrow_mut().boards.get_mut(&board) {
            b.disconnect_where(|_| true);
        }
    }

    /// Cut off one peer's subscriptions to `board`; the rest see the new
    /// presence count. Returns how many subscriptions were dropped.
    pub fn drop_peer(&self, board: BoardId, peer: u64) -> usize {
        self.state
            .borrow_mut()
            .boards
            .get_mut(&board)
            .map_or(0, |b| b.disconnect_where(|s| s.peer == peer))
    }

    /// Forget `board` entirely; later snapshot requests answer `NotFound`.
    pub fn remove_board(&self, board: BoardId) {
        if let Some(mut b) = self.state.borrow_mut().boards.remove(&board) {
            b.disconnect_where(|_| true);
        }
    }
}

/// One client's handle onto a [`LocalHub`].
#[derive(Clone)]
pub struct LocalGateway {
    state: Rc<RefCell<HubState>>,
    peer: u64,
}

impl LocalGateway {
    #[must_use]
    pub fn peer(&self) -> u64 {
        self.peer
    }
}

impl BackendGateway for LocalGateway {
    type Subscription = LocalSubscription;

    fn request_snapshot(&mut self, board: BoardId, sink: EventSink) {
        let result = self.state.borrow().boards.get(&board).map(|b| b.snapshot.clone()).ok_or(GatewayError::NotFound);
        sink.send(SyncEvent::Snapshot(result));
    }

    fn append_paint_event(&mut self, board: BoardId, event: &PaintEvent) -> Result<(), GatewayError> {
        let mut state = self.state.borrow_mut();
        if let Some(reason) = &state.reject_publishes {
            return Err(GatewayError::PublishFailure(reason.clone()));
        }
        let b = state.boards.get_mut(&board).ok_or(GatewayError::NotFound)?;
        let (Ok(x), Ok(y)) = (u32::try_from(event.x), u32::try_from(event.y)) else {
            return Err(GatewayError::PublishFailure(format!("cell ({}, {}) is off the board", event.x, event.y)));
        };
        if x >= b.width || y >= b.height {
            return Err(GatewayError::PublishFailure(format!("cell ({x}, {y}) is off the board")));
        }
        if let Some(cell) = b.snapshot.get_mut(cell_index(b.width, x, y)) {
            *cell = event.color;
        }
        b.log.push(event.clone());
        let peer = self.peer;
        b.subscribers.retain(|s| s.peer == peer || s.sink.send(SyncEvent::Paint(event.clone())));
        Ok(())
    }

    fn subscribe(&mut self, board: BoardId, sink: EventSink) -> Result<LocalSubscription, GatewayError> {
        let mut state = self.state.borrow_mut();
        if state.refuse_subscribe {
            return Err(GatewayError::Transport("connection refused".into()));
        }
        let id = state.next_id();
        let b = state.boards.get_mut(&board).ok_or(GatewayError::NotFound)?;
        b.subscribers.push(Subscriber { id, peer: self.peer, sink });
        b.broadcast_presence();
        Ok(LocalSubscription { state: Rc::clone(&self.state), board, id, active: true })
    }
}

/// Subscription handle; unsubscribes on drop.
pub struct LocalSubscription {
    state: Rc<RefCell<HubState>>,
    board: BoardId,
    id: u64,
    active: bool,
}

impl Subscription for LocalSubscription {
    fn unsubscribe(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;
        let mut state = self.state.borrow_mut();
        if let Some(b) = state.boards.get_mut(&self.board) {
            let before = b.subscribers.len();
            b.subscribers.retain(|s| s.id != self.id);
            if b.subscribers.len() != before {
                b.broadcast_presence();
            }
        }
    }
}

impl Drop for LocalSubscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}
