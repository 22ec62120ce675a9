use super::*;
use frames::Data;

fn paint_push(x: i64, y: i64, color: u8) -> Frame {
    Frame::push(syscall::PAINT_PUT, PaintPayload { x, y, color }.to_data())
}

#[test]
fn remote_paint_push_becomes_paint_event() {
    let frame = paint_push(3, 4, 7).with_from("peer-1").with_data("ts", 1234);
    let mut pending = HashMap::new();

    let event = route_frame(&frame, &mut pending);

    let expected = PaintEvent::new(3, 4, 7, 1234).with_actor("peer-1");
    assert_eq!(event, Some(SyncEvent::Paint(expected)));
}

#[test]
fn paint_push_without_ts_uses_frame_time() {
    let frame = paint_push(0, 0, 1);
    let mut pending = HashMap::new();

    let Some(SyncEvent::Paint(event)) = route_frame(&frame, &mut pending) else {
        panic!("expected a paint event");
    };
    assert_eq!(event.ts, frame.ts);
    assert_eq!(event.actor, None);
}

#[test]
fn malformed_paint_push_is_ignored() {
    let frame = Frame::push(syscall::PAINT_PUT, Data::new());
    assert_eq!(route_frame(&frame, &mut HashMap::new()), None);
}

#[test]
fn presence_push_becomes_presence_event() {
    let frame = Frame::push(syscall::BOARD_PRESENCE, PresencePayload { count: 5 }.to_data());
    assert_eq!(route_frame(&frame, &mut HashMap::new()), Some(SyncEvent::Presence(5)));
}

#[test]
fn unknown_push_is_ignored() {
    let frame = Frame::push("board:renamed", Data::new());
    assert_eq!(route_frame(&frame, &mut HashMap::new()), None);
}

#[test]
fn done_reply_settles_pending_paint_silently() {
    let request = Frame::request(syscall::PAINT_PUT, PaintPayload { x: 1, y: 1, color: 2 }.to_data());
    let mut pending = HashMap::new();
    pending.insert(request.id.clone(), PaintEvent::new(1, 1, 2, 0));

    assert_eq!(route_frame(&request.done(), &mut pending), None);
    assert!(pending.is_empty());
}

#[test]
fn error_reply_surfaces_publish_failure() {
    let request = Frame::request(syscall::PAINT_PUT, PaintPayload { x: 1, y: 1, color: 99 }.to_data());
    let event = PaintEvent::new(1, 1, 99, 0);
    let mut pending = HashMap::new();
    pending.insert(request.id.clone(), event.clone());

    let routed = route_frame(&request.error("invalid color"), &mut pending);

    assert_eq!(
        routed,
        Some(SyncEvent::PublishFailed { event, error: GatewayError::PublishFailure("invalid color".into()) })
    );
    assert!(pending.is_empty());
}

#[test]
fn reply_to_unknown_request_is_ignored() {
    let request = Frame::request(syscall::PAINT_PUT, Data::new());
    let mut pending = HashMap::new();
    pending.insert("someone-else".to_owned(), PaintEvent::new(0, 0, 0, 0));

    assert_eq!(route_frame(&request.error("nope"), &mut pending), None);
    assert_eq!(pending.len(), 1);
}

#[test]
fn non_terminal_reply_keeps_request_pending() {
    let request = Frame::request(syscall::PAINT_PUT, Data::new());
    let mut pending = HashMap::new();
    pending.insert(request.id.clone(), PaintEvent::new(0, 0, 0, 0));

    assert_eq!(route_frame(&request.item(Data::new()), &mut pending), None);
    assert_eq!(pending.len(), 1);
}

#[tokio::test]
async fn publish_before_subscribe_is_rejected() {
    let mut gateway = WsGateway::new("http://127.0.0.1:9");
    let result = gateway.append_paint_event(uuid::Uuid::new_v4(), &PaintEvent::new(0, 0, 0, 0));
    assert_eq!(result, Err(GatewayError::StreamDisconnected));
}
