use super::*;
use crate::hub::{LocalGateway, LocalHub};
use crate::palette::Palette;

const W: u32 = 16;
const H: u32 = 16;

fn replica() -> BoardReplica {
    BoardReplica::new(W, H, Palette::default())
}

fn blank() -> Vec<u8> {
    vec![0; (W * H) as usize]
}

// =============================================================
// Manual gateway: records sinks so tests control delivery
// =============================================================

#[derive(Default)]
struct ManualGateway {
    snapshot_sinks: Vec<EventSink>,
    stream_sinks: Vec<EventSink>,
    published: Vec<PaintEvent>,
    unsubscribed: std::rc::Rc<std::cell::Cell<u32>>,
    fail_subscribe: Option<GatewayError>,
    fail_publish: Option<GatewayError>,
}

struct ManualSubscription {
    counter: std::rc::Rc<std::cell::Cell<u32>>,
    active: bool,
}

impl Subscription for ManualSubscription {
    fn unsubscribe(&mut self) {
        if self.active {
            self.active = false;
            self.counter.set(self.counter.get() + 1);
        }
    }
}

impl BackendGateway for ManualGateway {
    type Subscription = ManualSubscription;

    fn request_snapshot(&mut self, _board: BoardId, sink: EventSink) {
        self.snapshot_sinks.push(sink);
    }

    fn append_paint_event(&mut self, _board: BoardId, event: &PaintEvent) -> Result<(), GatewayError> {
        if let Some(err) = &self.fail_publish {
            return Err(err.clone());
        }
        self.published.push(event.clone());
        Ok(())
    }

    fn subscribe(&mut self, _board: BoardId, sink: EventSink) -> Result<ManualSubscription, GatewayError> {
        if let Some(err) = &self.fail_subscribe {
            return Err(err.clone());
        }
        self.stream_sinks.push(sink);
        Ok(ManualSubscription { counter: std::rc::Rc::clone(&self.unsubscribed), active: true })
    }
}

impl ManualGateway {
    fn last_snapshot_sink(&self) -> &EventSink {
        self.snapshot_sinks.last().expect("snapshot requested")
    }

    fn last_stream_sink(&self) -> &EventSink {
        self.stream_sinks.last().expect("subscribed")
    }
}

fn manual_client() -> SyncClient<ManualGateway> {
    SyncClient::new(ManualGateway::default(), Uuid::new_v4())
}

fn live_manual_client(r: &mut BoardReplica) -> SyncClient<ManualGateway> {
    let mut client = manual_client();
    client.connect(0.0);
    client.gateway().last_snapshot_sink().send(SyncEvent::Snapshot(Ok(blank())));
    client.pump(0.0, r);
    assert_eq!(client.status(), &SyncStatus::Live);
    client
}

// =============================================================
// Backoff
// =============================================================

#[test]
fn backoff_doubles_to_cap() {
    let mut b = Backoff::default();
    let delays: Vec<f64> = (0..6).map(|_| b.next_delay()).collect();
    assert_eq!(delays, vec![1_000.0, 2_000.0, 4_000.0, 8_000.0, 10_000.0, 10_000.0]);
    b.reset();
    assert!((b.next_delay() - 1_000.0).abs() < f64::EPSILON);
}

// =============================================================
// Connect / load
// =============================================================

#[test]
fn connect_subscribes_and_requests_snapshot() {
    let mut client = manual_client();
    client.connect(0.0);
    assert_eq!(client.status(), &SyncStatus::Loading);
    assert_eq!(client.gateway().stream_sinks.len(), 1);
    assert_eq!(client.gateway().snapshot_sinks.len(), 1);
    assert!(!client.can_edit());
}

#[test]
fn connect_twice_is_noop() {
    let mut client = manual_client();
    client.connect(0.0);
    client.connect(0.0);
    assert_eq!(client.gateway().stream_sinks.len(), 1);
}

#[test]
fn snapshot_loads_replica_and_enables_editing() {
    let mut r = replica();
    let client = live_manual_client(&mut r);
    assert!(r.is_loaded());
    assert!(client.can_edit());
    assert_eq!(client.stats().snapshots_loaded, 1);
}

#[test]
fn malformed_initial_snapshot_fails_and_blocks_editing() {
    let mut r = replica();
    let mut client = manual_client();
    client.connect(0.0);
    client.gateway().last_snapshot_sink().send(SyncEvent::Snapshot(Ok(vec![0; 10])));
    client.pump(0.0, &mut r);

    assert_eq!(
        client.status(),
        &SyncStatus::Failed(SyncError::Snapshot(StoreError::MalformedSnapshot { expected: 256, actual: 10 }))
    );
    assert!(!client.can_edit());
    assert!(!r.is_loaded());
}

#[test]
fn retry_after_failure_reconnects() {
    let mut r = replica();
    let mut client = manual_client();
    client.connect(0.0);
    client.gateway().last_snapshot_sink().send(SyncEvent::Snapshot(Err(GatewayError::NotFound)));
    client.pump(0.0, &mut r);
    assert!(matches!(client.status(), SyncStatus::Failed(SyncError::Gateway(GatewayError::NotFound))));

    client.retry(5.0);
    assert_eq!(client.status(), &SyncStatus::Loading);
    assert_eq!(client.gateway().unsubscribed.get(), 1);
    client.gateway().last_snapshot_sink().send(SyncEvent::Snapshot(Ok(blank())));
    client.pump(5.0, &mut r);
    assert!(client.can_edit());
}

#[test]
fn retry_when_not_failed_does_nothing() {
    let mut r = replica();
    let mut client = live_manual_client(&mut r);
    client.retry(0.0);
    assert_eq!(client.gateway().stream_sinks.len(), 1);
}

#[test]
fn subscribe_not_found_fails_immediately() {
    let mut client = manual_client();
    client.gateway_mut().fail_subscribe = Some(GatewayError::NotFound);
    client.connect(0.0);
    assert!(matches!(client.status(), SyncStatus::Failed(_)));
    assert_eq!(client.retry_at(), None);
}

#[test]
fn subscribe_transport_error_schedules_reconnect() {
    let mut client = manual_client();
    client.gateway_mut().fail_subscribe = Some(GatewayError::Transport("refused".into()));
    client.connect(100.0);
    assert_eq!(client.status(), &SyncStatus::Reconnecting);
    assert_eq!(client.retry_at(), Some(1_100.0));
}

// =============================================================
// Remote events
// =============================================================

#[test]
fn remote_paint_applies_to_replica() {
    let mut r = replica();
    let mut client = live_manual_client(&mut r);
    client.gateway().last_stream_sink().send(SyncEvent::Paint(PaintEvent::new(3, 4, 5, 1)));
    assert_eq!(client.pump(1.0, &mut r), 1);
    assert_eq!(r.store().get(3, 4), Ok(5));
    assert_eq!(client.stats().remote_paints, 1);
}

#[test]
fn invalid_remote_paint_is_dropped() {
    let mut r = replica();
    let mut client = live_manual_client(&mut r);
    client.gateway().last_stream_sink().send(SyncEvent::Paint(PaintEvent::new(99, 0, 5, 1)));
    client.gateway().last_stream_sink().send(SyncEvent::Paint(PaintEvent::new(0, 0, 200, 1)));
    client.pump(1.0, &mut r);
    assert_eq!(client.stats().remote_paints, 0);
    assert_eq!(r.store().serialize(), blank());
}

#[test]
fn paints_before_snapshot_are_replayed_over_it() {
    let mut r = replica();
    let mut client = manual_client();
    client.connect(0.0);
    client.gateway().last_stream_sink().send(SyncEvent::Paint(PaintEvent::new(1, 1, 7, 1)));
    client.pump(0.0, &mut r);
    assert_eq!(r.store().get(1, 1), Ok(0));

    let mut snapshot = blank();
    snapshot[0] = 3;
    client.gateway().last_snapshot_sink().send(SyncEvent::Snapshot(Ok(snapshot)));
    client.pump(0.0, &mut r);

    assert_eq!(r.store().get(0, 0), Ok(3));
    assert_eq!(r.store().get(1, 1), Ok(7));
}

#[test]
fn presence_updates_online_peers() {
    let mut r = replica();
    let mut client = live_manual_client(&mut r);
    client.gateway().last_stream_sink().send(SyncEvent::Presence(4));
    client.pump(0.0, &mut r);
    assert_eq!(client.online_peers(), 4);
}

#[test]
fn async_publish_rejection_is_counted_only() {
    let mut r = replica();
    let mut client = live_manual_client(&mut r);
    client.paint(&mut r, 2, 2, 9, 10.0).expect("valid");
    client.gateway().last_stream_sink().send(SyncEvent::PublishFailed {
        event: PaintEvent::new(2, 2, 9, 10),
        error: GatewayError::PublishFailure("rate limited".into()),
    });
    client.pump(11.0, &mut r);
    assert_eq!(client.stats().publish_failures, 1);
    assert_eq!(r.store().get(2, 2), Ok(9));
    assert_eq!(client.status(), &SyncStatus::Live);
}

// =============================================================
// Local paint
// =============================================================

#[test]
fn paint_is_optimistic_and_published() {
    let mut r = replica();
    let mut client = live_manual_client(&mut r).with_actor("me");
    let event = client.paint(&mut r, 5, 6, 2, 1234.0).expect("valid").expect("changed");
    assert_eq!(event, PaintEvent::new(5, 6, 2, 1234).with_actor("me"));
    assert_eq!(r.store().get(5, 6), Ok(2));
    assert_eq!(client.gateway().published, vec![event]);
}

#[test]
fn paint_unchanged_cell_publishes_nothing() {
    let mut r = replica();
    let mut client = live_manual_client(&mut r);
    assert_eq!(client.paint(&mut r, 5, 6, 0, 1.0), Ok(None));
    assert!(client.gateway().published.is_empty());
}

#[test]
fn paint_out_of_bounds_is_rejected_before_publish() {
    let mut r = replica();
    let mut client = live_manual_client(&mut r);
    assert!(client.paint(&mut r, -1, 0, 2, 1.0).is_err());
    assert!(client.gateway().published.is_empty());
}

#[test]
fn publish_failure_keeps_optimistic_write() {
    let mut r = replica();
    let mut client = live_manual_client(&mut r);
    client.gateway_mut().fail_publish = Some(GatewayError::PublishFailure("down".into()));
    let event = client.paint(&mut r, 1, 1, 4, 1.0).expect("valid");
    assert!(event.is_some());
    assert_eq!(r.store().get(1, 1), Ok(4));
    assert_eq!(client.stats().publish_failures, 1);
    assert!(client.can_edit());
}

// =============================================================
// Disconnect / reconnect
// =============================================================

#[test]
fn disconnect_schedules_backoff_and_keeps_editing() {
    let mut r = replica();
    let mut client = live_manual_client(&mut r);
    client.gateway().last_stream_sink().send(SyncEvent::Disconnected);
    client.pump(50.0, &mut r);

    assert_eq!(client.status(), &SyncStatus::Reconnecting);
    assert_eq!(client.retry_at(), Some(1_050.0));
    assert_eq!(client.gateway().unsubscribed.get(), 1);
    assert!(client.can_edit());
    assert!(client.paint(&mut r, 0, 0, 1, 60.0).expect("valid").is_some());
}

#[test]
fn reconnect_waits_for_backoff() {
    let mut r = replica();
    let mut client = live_manual_client(&mut r);
    client.gateway().last_stream_sink().send(SyncEvent::Disconnected);
    client.pump(0.0, &mut r);
    client.pump(999.0, &mut r);
    assert_eq!(client.gateway().stream_sinks.len(), 1);
    client.pump(1_000.0, &mut r);
    assert_eq!(client.gateway().stream_sinks.len(), 2);
    assert_eq!(client.stats().reconnects, 1);
}

#[test]
fn reconnect_refetches_snapshot() {
    let mut r = replica();
    let mut client = live_manual_client(&mut r);
    client.gateway().last_stream_sink().send(SyncEvent::Disconnected);
    client.pump(0.0, &mut r);
    client.pump(1_000.0, &mut r);

    assert_eq!(client.gateway().snapshot_sinks.len(), 2);
    assert_eq!(client.status(), &SyncStatus::Live);

    // The fresh snapshot replaces whatever was missed while offline.
    let mut fresh = blank();
    fresh[5] = 6;
    client.gateway().last_snapshot_sink().send(SyncEvent::Snapshot(Ok(fresh)));
    client.pump(1_001.0, &mut r);
    assert_eq!(r.store().get(5, 0), Ok(6));
    assert_eq!(client.stats().snapshots_loaded, 2);
}

#[test]
fn failed_refresh_keeps_stale_board() {
    let mut r = replica();
    let mut client = live_manual_client(&mut r);
    r.apply(1, 1, 3).expect("valid");
    client.gateway().last_stream_sink().send(SyncEvent::Disconnected);
    client.pump(0.0, &mut r);
    client.pump(1_000.0, &mut r);
    client.gateway().last_snapshot_sink().send(SyncEvent::Snapshot(Ok(vec![1, 2, 3])));
    client.pump(1_001.0, &mut r);

    assert_eq!(client.status(), &SyncStatus::Live);
    assert!(client.can_edit());
    assert_eq!(r.store().get(1, 1), Ok(3));
    assert_eq!(client.stats().snapshot_failures, 1);
}

#[test]
fn disconnect_while_loading_discards_buffered_stream_paints() {
    let mut r = replica();
    let mut client = manual_client();
    client.connect(0.0);
    client.gateway().last_stream_sink().send(SyncEvent::Paint(PaintEvent::new(1, 1, 2, 1)));
    client.pump(0.0, &mut r);
    client.paint(&mut r, 2, 2, 4, 0.0).expect("valid");

    client.gateway().last_stream_sink().send(SyncEvent::Disconnected);
    client.pump(0.0, &mut r);
    client.pump(1_000.0, &mut r);

    // The cell was repainted while the stream was down.
    let mut fresh = blank();
    fresh[(W + 1) as usize] = 3;
    client.gateway().last_snapshot_sink().send(SyncEvent::Snapshot(Ok(fresh)));
    client.pump(1_001.0, &mut r);

    assert_eq!(client.status(), &SyncStatus::Live);
    assert_eq!(r.store().get(1, 1), Ok(3));
    assert_eq!(r.store().get(2, 2), Ok(4));
    assert_eq!(client.stats().remote_paints, 0);
}

#[test]
fn disconnect_during_refresh_discards_buffered_stream_paints() {
    let mut r = replica();
    let mut client = live_manual_client(&mut r);
    client.gateway().last_stream_sink().send(SyncEvent::Disconnected);
    client.pump(0.0, &mut r);
    client.pump(1_000.0, &mut r);

    // Second stream delivers a paint, then dies before its snapshot lands.
    client.gateway().last_stream_sink().send(SyncEvent::Paint(PaintEvent::new(1, 1, 2, 1)));
    client.pump(1_000.0, &mut r);
    assert_eq!(r.store().get(1, 1), Ok(0));
    client.gateway().last_stream_sink().send(SyncEvent::Disconnected);
    client.pump(1_001.0, &mut r);
    client.pump(2_001.0, &mut r);
    assert_eq!(client.gateway().stream_sinks.len(), 3);

    let mut fresh = blank();
    fresh[(W + 1) as usize] = 3;
    client.gateway().last_snapshot_sink().send(SyncEvent::Snapshot(Ok(fresh)));
    client.pump(2_002.0, &mut r);

    assert_eq!(r.store().get(1, 1), Ok(3));
}

#[test]
fn repeated_failures_back_off_exponentially() {
    let mut r = replica();
    let mut client = live_manual_client(&mut r);
    client.gateway_mut().fail_subscribe = Some(GatewayError::Transport("down".into()));
    client.gateway().last_stream_sink().send(SyncEvent::Disconnected);
    client.pump(0.0, &mut r);
    assert_eq!(client.retry_at(), Some(1_000.0));
    client.pump(1_000.0, &mut r);
    assert_eq!(client.retry_at(), Some(3_000.0));
    client.pump(3_000.0, &mut r);
    assert_eq!(client.retry_at(), Some(7_000.0));

    client.gateway_mut().fail_subscribe = None;
    client.pump(7_000.0, &mut r);
    assert_eq!(client.status(), &SyncStatus::Live);
    assert_eq!(client.retry_at(), None);
}

#[test]
fn events_from_old_stream_are_ignored() {
    let mut r = replica();
    let mut client = live_manual_client(&mut r);
    let old = client.gateway().last_stream_sink().clone();
    old.send(SyncEvent::Disconnected);
    client.pump(0.0, &mut r);
    client.pump(1_000.0, &mut r);

    old.send(SyncEvent::Paint(PaintEvent::new(0, 0, 9, 1)));
    old.send(SyncEvent::Disconnected);
    client.pump(1_001.0, &mut r);

    assert_eq!(r.store().get(0, 0), Ok(0));
    assert_eq!(client.status(), &SyncStatus::Live);
    assert_eq!(client.stats().stale_events, 2);
}

// =============================================================
// Close
// =============================================================

#[test]
fn close_unsubscribes_and_ignores_later_events() {
    let mut r = replica();
    let mut client = live_manual_client(&mut r);
    let sink = client.gateway().last_stream_sink().clone();
    client.close();

    assert_eq!(client.status(), &SyncStatus::Closed);
    assert_eq!(client.gateway().unsubscribed.get(), 1);
    assert!(!client.can_edit());
    assert!(!sink.send(SyncEvent::Presence(3)));
    assert!(sink.is_closed());
    client.pump(0.0, &mut r);
    assert_eq!(client.online_peers(), 0);
}

#[test]
fn drop_unsubscribes() {
    let mut r = replica();
    let client = live_manual_client(&mut r);
    let counter = std::rc::Rc::clone(&client.gateway().unsubscribed);
    drop(client);
    assert_eq!(counter.get(), 1);
}

// =============================================================
// End to end through LocalHub
// =============================================================

fn hub_client(hub: &LocalHub, board: BoardId) -> (SyncClient<LocalGateway>, BoardReplica) {
    let mut client = SyncClient::new(hub.gateway(), board);
    let mut r = BoardReplica::new(1000, 1000, Palette::default());
    client.connect(0.0);
    client.pump(0.0, &mut r);
    (client, r)
}

#[test]
fn paint_from_a_reaches_b() {
    let hub = LocalHub::new();
    let board = hub.create_board(1000, 1000);
    let (mut a, mut ra) = hub_client(&hub, board);
    let (mut b, mut rb) = hub_client(&hub, board);
    assert!(a.can_edit() && b.can_edit());

    a.paint(&mut ra, 10, 10, 2, 1.0).expect("valid");
    b.pump(2.0, &mut rb);

    assert_eq!(rb.store().get(10, 10), Ok(2));
    let mut expected = vec![0; 1_000_000];
    expected[10 * 1000 + 10] = 2;
    assert_eq!(rb.store().as_bytes(), expected.as_slice());
    assert_eq!(rb.raster().pixel(10, 10), Some(Palette::default().packed(2)));
}

#[test]
fn presence_counts_subscribers() {
    let hub = LocalHub::new();
    let board = hub.create_board(4, 4);
    let mut ra = BoardReplica::new(4, 4, Palette::default());
    let mut rb = BoardReplica::new(4, 4, Palette::default());
    let mut a = SyncClient::new(hub.gateway(), board);
    let mut b = SyncClient::new(hub.gateway(), board);
    a.connect(0.0);
    b.connect(0.0);
    a.pump(0.0, &mut ra);
    b.pump(0.0, &mut rb);
    assert_eq!(a.online_peers(), 2);
    assert_eq!(b.online_peers(), 2);

    b.close();
    a.pump(1.0, &mut ra);
    assert_eq!(a.online_peers(), 1);
}

#[test]
fn hub_publish_rejection_keeps_local_paint() {
    let hub = LocalHub::new();
    let board = hub.create_board(8, 8);
    let mut r = BoardReplica::new(8, 8, Palette::default());
    let mut client = SyncClient::new(hub.gateway(), board);
    client.connect(0.0);
    client.pump(0.0, &mut r);

    hub.set_reject_publishes(Some("maintenance"));
    client.paint(&mut r, 3, 3, 5, 1.0).expect("valid");
    assert_eq!(r.store().get(3, 3), Ok(5));
    assert!(hub.log(board).is_empty());
    assert_eq!(client.stats().publish_failures, 1);
}

#[test]
fn hub_reconnect_catches_up_missed_paints() {
    let hub = LocalHub::new();
    let board = hub.create_board(8, 8);
    let mut ra = BoardReplica::new(8, 8, Palette::default());
    let mut rb = BoardReplica::new(8, 8, Palette::default());
    let mut a = SyncClient::new(hub.gateway(), board);
    let mut b = SyncClient::new(hub.gateway(), board);
    a.connect(0.0);
    b.connect(0.0);
    a.pump(0.0, &mut ra);
    b.pump(0.0, &mut rb);

    hub.drop_connections(board);
    a.pump(10.0, &mut ra);
    b.pump(10.0, &mut rb);
    assert_eq!(b.status(), &SyncStatus::Reconnecting);

    // A resubscribes first and paints while B is still offline.
    a.pump(1_010.0, &mut ra);
    a.paint(&mut ra, 4, 4, 8, 1_011.0).expect("valid");
    assert_eq!(rb.store().get(4, 4), Ok(0));

    b.pump(1_010.0, &mut rb);
    b.pump(1_011.0, &mut rb);
    assert_eq!(b.status(), &SyncStatus::Live);
    assert_eq!(rb.store().get(4, 4), Ok(8));

    // A's own snapshot was taken before its paint; the paint survives it.
    a.pump(1_012.0, &mut ra);
    assert_eq!(ra.store().get(4, 4), Ok(8));
}

#[test]
fn hub_dropping_one_peer_keeps_presence_in_step() {
    let hub = LocalHub::new();
    let board = hub.create_board(8, 8);
    let mut ra = BoardReplica::new(8, 8, Palette::default());
    let mut rb = BoardReplica::new(8, 8, Palette::default());
    let mut a = SyncClient::new(hub.gateway(), board);
    let mut b = SyncClient::new(hub.gateway(), board);
    a.connect(0.0);
    b.connect(0.0);
    a.pump(0.0, &mut ra);
    b.pump(0.0, &mut rb);
    assert_eq!(a.online_peers(), 2);

    let peer_b = b.gateway().peer();
    assert_eq!(hub.drop_peer(board, peer_b), 1);
    a.pump(10.0, &mut ra);
    b.pump(10.0, &mut rb);
    assert_eq!(a.online_peers(), 1);
    assert_eq!(b.status(), &SyncStatus::Reconnecting);
    assert_eq!(hub.presence(board), 1);

    b.pump(1_010.0, &mut rb);
    b.pump(1_011.0, &mut rb);
    a.pump(1_011.0, &mut ra);
    assert_eq!(b.status(), &SyncStatus::Live);
    assert_eq!(a.online_peers(), 2);
    assert_eq!(b.online_peers(), 2);
}

#[test]
fn local_paint_during_refresh_survives_snapshot() {
    let mut r = replica();
    let mut client = manual_client();
    client.connect(0.0);
    client.gateway().last_snapshot_sink().send(SyncEvent::Snapshot(Ok(blank())));
    client.pump(0.0, &mut r);
    client.gateway().last_stream_sink().send(SyncEvent::Disconnected);
    client.pump(0.0, &mut r);
    client.pump(1_000.0, &mut r);

    client.paint(&mut r, 2, 3, 11, 1_000.0).expect("valid");
    client.gateway().last_snapshot_sink().send(SyncEvent::Snapshot(Ok(blank())));
    client.pump(1_001.0, &mut r);
    assert_eq!(r.store().get(2, 3), Ok(11));
}

#[test]
fn hub_malformed_snapshot_blocks_editing() {
    let hub = LocalHub::new();
    let board = Uuid::new_v4();
    hub.insert_board(board, 8, 8, vec![0; 63]);
    let mut r = BoardReplica::new(8, 8, Palette::default());
    let mut client = SyncClient::new(hub.gateway(), board);
    client.connect(0.0);
    client.pump(0.0, &mut r);
    assert!(matches!(client.status(), SyncStatus::Failed(SyncError::Snapshot(StoreError::MalformedSnapshot { .. }))));
    assert!(!client.can_edit());
}
