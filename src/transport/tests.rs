use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::Message;
use bytes::Bytes;
use futures_util::{sink, stream};
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::message::*;
use super::websocket::{CloseReason, PumpSettings, run_connection, to_message};
use crate::broker::{Broker, BrokerHandle, BrokerStats, NoopHook, PublishMessage};
use crate::config::Settings;

#[test]
fn decodes_subscribe_and_unsubscribe() {
    let sub = ClientMessage::decode(br#"{"type":"subscribe","topic":"general"}"#).unwrap();
    assert_eq!(sub, ClientMessage::Subscribe { topic: "general".into() });

    let unsub = ClientMessage::decode(br#"{"type":"unsubscribe","topic":"general"}"#).unwrap();
    assert_eq!(unsub.topic(), "general");
}

#[test]
fn rejects_malformed_frames() {
    let frames: [&[u8]; 4] = [
        b"not json",
        br#"{"type":"publish","topic":"general"}"#,
        br#"{"type":"subscribe"}"#,
        br#"{"topic":"general"}"#,
    ];
    for frame in frames {
        assert!(matches!(ClientMessage::decode(frame), Err(FrameError::Malformed(_))));
    }
}

#[test]
fn validates_topic_shape() {
    assert!(validate_topic("general", 16).is_ok());
    assert!(validate_topic("conversation/17", 16).is_ok());
    assert_eq!(validate_topic("", 16), Err(FrameError::InvalidTopic("empty")));
    assert_eq!(validate_topic("a".repeat(17).as_str(), 16), Err(FrameError::InvalidTopic("too long")));
    assert!(validate_topic("with space", 16).is_err());
    assert!(validate_topic("tab\there", 16).is_err());
}

#[test]
fn notification_topics_belong_to_their_principal() {
    let own = ClientMessage::Subscribe { topic: "notifications/42".into() };
    assert!(own.validate("42", 256).is_ok());

    let other = ClientMessage::Subscribe { topic: "notifications/43".into() };
    assert_eq!(
        other.validate("42", 256),
        Err(FrameError::Forbidden("notifications/43".into()))
    );

    let plain = ClientMessage::Subscribe { topic: "general".into() };
    assert!(plain.validate("42", 256).is_ok());
}

#[test]
fn extracts_notification_principal() {
    assert_eq!(notification_principal("notifications/42"), Some("42"));
    assert_eq!(notification_principal("notifications/"), None);
    assert_eq!(notification_principal("general"), None);
    assert_eq!(notification_topic("42"), "notifications/42");
}

#[test]
fn notification_envelope_shape() {
    let empty = serde_json::to_value(NotificationEnvelope::new(NotificationKind::FearLadder, vec![])).unwrap();
    assert_eq!(empty, json!({"type": "notification", "subType": "FL", "payload": []}));

    let be = serde_json::to_value(NotificationEnvelope::new(
        NotificationKind::BehaviouralExperiment,
        vec![1, 2],
    ))
    .unwrap();
    assert_eq!(be["subType"], "BE");
    assert_eq!(be["payload"], json!([1, 2]));
}

#[test]
fn message_deleted_envelope_shape() {
    let value = serde_json::to_value(MessageDeletedEnvelope::new("general", 7)).unwrap();
    assert_eq!(
        value,
        json!({"channel": "general", "type": "message", "subType": "message_deleted", "id": 7})
    );
}

#[test]
fn message_created_envelope_uses_camel_case() {
    let created_at = chrono::Utc::now();
    let envelope = MessageCreatedEnvelope {
        channel: "conversation/3".into(),
        kind: "message".into(),
        sub_type: "message_created".into(),
        message: ChatMessage {
            id: 11,
            created_at,
            message: "hi".into(),
            read_by: vec![5],
            user: "alice".into(),
        },
    };
    let value = serde_json::to_value(&envelope).unwrap();
    assert_eq!(value["subType"], "message_created");
    assert_eq!(value["message"]["readBy"], json!([5]));
    assert!(value["message"]["createdAt"].is_string());
}

#[test]
fn frames_are_text_when_utf8() {
    assert!(matches!(to_message(Bytes::from_static(b"{\"a\":1}")), Message::Text(_)));
    assert!(matches!(to_message(Bytes::from_static(&[0xff, 0xfe])), Message::Binary(_)));
}

struct Harness {
    inbound: mpsc::UnboundedSender<Result<Message, String>>,
    outbound: mpsc::UnboundedReceiver<Message>,
    pump: JoinHandle<CloseReason>,
    broker: BrokerHandle,
}

fn start(principal: &str) -> Harness {
    let (out_tx, out_rx) = mpsc::unbounded_channel::<Message>();
    let writer = Box::pin(sink::unfold(
        out_tx,
        |tx: mpsc::UnboundedSender<Message>, msg: Message| async move {
            tx.send(msg).map_err(|_| "peer gone".to_string())?;
            Ok::<_, String>(tx)
        },
    ));
    start_with(
        principal,
        writer,
        out_rx,
        PumpSettings::from_settings(&Settings::default()),
    )
}

fn start_with<W>(
    principal: &str,
    writer: W,
    outbound: mpsc::UnboundedReceiver<Message>,
    pump: PumpSettings,
) -> Harness
where
    W: futures_util::Sink<Message, Error = String> + Unpin + Send + 'static,
{
    let settings = Settings::default();
    let (broker, handle) = Broker::new(Arc::new(NoopHook), &settings.broker);
    tokio::spawn(broker.run());

    let (in_tx, in_rx) = mpsc::unbounded_channel::<Result<Message, String>>();
    let reader = Box::pin(stream::unfold(in_rx, |mut rx| async move {
        rx.recv().await.map(|item| (item, rx))
    }));

    let pump = tokio::spawn(run_connection(
        writer,
        reader,
        principal.to_string(),
        handle.clone(),
        pump,
    ));

    Harness {
        inbound: in_tx,
        outbound,
        pump,
        broker: handle,
    }
}

impl Harness {
    fn send(&self, frame: Value) {
        self.inbound
            .send(Ok(Message::Text(frame.to_string().into())))
            .unwrap();
    }

    async fn wait_for(&self, check: impl Fn(&BrokerStats) -> bool) {
        for _ in 0..200 {
            if check(&self.broker.stats().await.unwrap()) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("broker never reached the expected state");
    }

    async fn next_text(&mut self) -> String {
        let msg = tokio::time::timeout(Duration::from_secs(2), self.outbound.recv())
            .await
            .expect("timed out waiting for a frame")
            .expect("socket closed");
        match msg {
            Message::Text(text) => text.as_str().to_string(),
            other => panic!("expected text frame, got {other:?}"),
        }
    }

    async fn finish(self) -> CloseReason {
        tokio::time::timeout(Duration::from_secs(2), self.pump)
            .await
            .expect("pump did not stop")
            .unwrap()
    }
}

#[tokio::test]
async fn delivers_published_frames_in_order() {
    let mut h = start("42");
    h.send(json!({"type": "subscribe", "topic": "general"}));
    h.wait_for(|s| s.subscriptions == 1).await;

    for n in 1..=3 {
        let delivered = h
            .broker
            .publish(PublishMessage::new("general", format!("{{\"n\":{n}}}")))
            .await
            .unwrap();
        assert_eq!(delivered, 1);
    }

    assert_eq!(h.next_text().await, r#"{"n":1}"#);
    assert_eq!(h.next_text().await, r#"{"n":2}"#);
    assert_eq!(h.next_text().await, r#"{"n":3}"#);

    h.inbound.send(Ok(Message::Close(None))).unwrap();
    let broker = h.broker.clone();
    assert_eq!(h.finish().await, CloseReason::ClientClosed);
    assert_eq!(broker.stats().await.unwrap(), BrokerStats::default());
}

#[tokio::test]
async fn unsubscribe_stops_delivery() {
    let mut h = start("42");
    h.send(json!({"type": "subscribe", "topic": "general"}));
    h.wait_for(|s| s.subscriptions == 1).await;
    h.send(json!({"type": "unsubscribe", "topic": "general"}));
    h.wait_for(|s| s.subscriptions == 0).await;

    let delivered = h
        .broker
        .publish(PublishMessage::new("general", "ignored"))
        .await
        .unwrap();
    assert_eq!(delivered, 0);
    assert!(h.outbound.try_recv().is_err());
}

#[tokio::test]
async fn ping_frames_are_ignored() {
    let mut h = start("42");
    h.inbound.send(Ok(Message::Ping(Bytes::from_static(b"hi")))).unwrap();
    h.send(json!({"type": "subscribe", "topic": "general"}));
    h.wait_for(|s| s.subscriptions == 1).await;

    h.broker
        .publish(PublishMessage::new("general", "after-ping"))
        .await
        .unwrap();
    assert_eq!(h.next_text().await, "after-ping");
}

#[tokio::test]
async fn malformed_frame_closes_connection() {
    let mut h = start("42");
    h.inbound
        .send(Ok(Message::Text("{not json".to_string().into())))
        .unwrap();

    let broker = h.broker.clone();
    let close = tokio::time::timeout(Duration::from_secs(2), h.outbound.recv())
        .await
        .unwrap();
    assert!(matches!(close, Some(Message::Close(_))));
    assert!(matches!(h.finish().await, CloseReason::Protocol(FrameError::Malformed(_))));
    assert_eq!(broker.stats().await.unwrap().connections, 0);
}

#[tokio::test]
async fn foreign_notification_topic_closes_connection() {
    let h = start("42");
    h.send(json!({"type": "subscribe", "topic": "notifications/43"}));
    assert_eq!(
        h.finish().await,
        CloseReason::Protocol(FrameError::Forbidden("notifications/43".into()))
    );
}

#[tokio::test]
async fn read_error_closes_connection() {
    let h = start("42");
    h.send(json!({"type": "subscribe", "topic": "general"}));
    h.wait_for(|s| s.subscriptions == 1).await;
    h.inbound.send(Err("connection reset".to_string())).unwrap();

    let broker = h.broker.clone();
    assert_eq!(h.finish().await, CloseReason::StreamError);
    assert_eq!(broker.stats().await.unwrap(), BrokerStats::default());
}

#[tokio::test]
async fn broker_shutdown_ends_the_writer() {
    let mut h = start("42");
    h.send(json!({"type": "subscribe", "topic": "general"}));
    h.wait_for(|s| s.subscriptions == 1).await;

    h.broker.shutdown().await.unwrap();
    let close = tokio::time::timeout(Duration::from_secs(2), h.outbound.recv())
        .await
        .unwrap();
    assert!(matches!(close, Some(Message::Close(_))));

    // the client hangs up after the close frame
    let _ = h.inbound.send(Ok(Message::Close(None)));
    let reason = h.finish().await;
    assert!(matches!(reason, CloseReason::WriterStopped | CloseReason::ClientClosed));
}

#[tokio::test]
async fn stalled_writer_times_out_and_disconnects() {
    // a peer that never drains: every write stays pending
    let writer = Box::pin(sink::unfold((), |(), _msg: Message| async move {
        std::future::pending::<Result<(), String>>().await
    }));
    let pump = PumpSettings {
        write_timeout: Duration::from_millis(50),
        ..PumpSettings::from_settings(&Settings::default())
    };
    let (_unused, outbound) = mpsc::unbounded_channel::<Message>();
    let h = start_with("42", writer, outbound, pump);

    h.send(json!({"type": "subscribe", "topic": "general"}));
    h.wait_for(|s| s.subscriptions == 1).await;
    let delivered = h
        .broker
        .publish(PublishMessage::new("general", "stuck"))
        .await
        .unwrap();
    assert_eq!(delivered, 1);

    let broker = h.broker.clone();
    let inbound = h.inbound.clone();
    assert_eq!(h.finish().await, CloseReason::WriterStopped);
    assert_eq!(broker.stats().await.unwrap(), BrokerStats::default());
    drop(inbound);
}

#[test]
fn binary_frames_keep_their_bytes() {
    let frame = Bytes::from_static(&[0x00, 0xff, 0x10]);
    match to_message(frame.clone()) {
        Message::Binary(data) => assert_eq!(data, frame),
        other => panic!("expected binary frame, got {other:?}"),
    }
}
