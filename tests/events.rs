// tests/events.rs

use provisor::events::{EventKind, EventSink, ProvisionEvent};

#[tokio::test]
async fn test_events_are_delivered_in_order() {
    let (sink, mut rx) = EventSink::channel(8);

    sink.emit("base", EventKind::Status, "running");
    sink.clone().emit("base", EventKind::Status, "succeeded");
    drop(sink);

    let first = rx.recv().await.unwrap();
    let second = rx.recv().await.unwrap();
    assert_eq!(first.detail, "running");
    assert_eq!(second.detail, "succeeded");
    assert!(first.timestamp <= second.timestamp);
    assert!(rx.recv().await.is_none());
}

#[tokio::test]
async fn test_full_channel_drops_instead_of_blocking() {
    let (sink, mut rx) = EventSink::channel(2);

    for i in 0..5 {
        sink.emit("m", EventKind::Breaker, format!("event {i}"));
    }
    drop(sink);

    let mut received = Vec::new();
    while let Some(event) = rx.recv().await {
        received.push(event.detail);
    }
    assert_eq!(received, vec!["event 0", "event 1"]);
}

#[test]
fn test_disabled_sink_discards_everything() {
    EventSink::disabled().emit("m", EventKind::Rollback, "ignored");
    EventSink::default().emit("m", EventKind::Rollback, "ignored");
}

#[test]
fn test_events_serialize_as_json_lines() {
    let (sink, mut rx) = EventSink::channel(1);
    sink.emit("rust", EventKind::LineClassified, "network: connection reset");

    let event = rx.try_recv().unwrap();
    let json = serde_json::to_string(&event).unwrap();
    assert!(json.contains("\"kind\":\"line_classified\""));
    assert!(json.contains("\"module\":\"rust\""));

    let back: ProvisionEvent = serde_json::from_str(&json).unwrap();
    assert_eq!(back, event);
}
