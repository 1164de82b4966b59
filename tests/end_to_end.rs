use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use topicrelay::config::Settings;
use topicrelay::persistence::{Conversation, SledStore, User};
use topicrelay::server::{self, JwtKeys};

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

const SECRET: &str = "e2e-secret";

struct Relay {
    addr: SocketAddr,
    keys: JwtKeys,
    http: reqwest::Client,
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

async fn start_relay() -> Relay {
    let mut settings = Settings::default();
    settings.server.jwt_secret = SECRET.to_string();

    let store = SledStore::temporary().expect("store");
    store
        .put_user(&User {
            id: 5,
            principal: "42".to_string(),
            name: "alice".to_string(),
        })
        .unwrap();
    store.add_behavioural_experiment(5, 31).unwrap();
    store.add_evidence_collection(5, 32).unwrap();
    store
        .put_conversation(&Conversation {
            id: 3,
            source_user_id: 5,
            source_user: "alice".to_string(),
            destination_user_id: 6,
        })
        .unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().unwrap();
    let (stop, stopped) = oneshot::channel::<()>();

    let task = tokio::spawn(async move {
        let shutdown = async move {
            let _ = stopped.await;
        };
        server::serve(listener, &settings, Arc::new(store), shutdown)
            .await
            .expect("relay failed");
    });

    Relay {
        addr,
        keys: JwtKeys::from_secret(SECRET),
        http: reqwest::Client::new(),
        stop: Some(stop),
        task,
    }
}

impl Relay {
    fn token(&self, sub: &str) -> String {
        self.keys.issue(sub, Duration::from_secs(300)).unwrap()
    }

    async fn connect(&self, sub: &str) -> Ws {
        let url = format!("ws://{}/ws?access_token={}", self.addr, self.token(sub));
        let (ws, _) = connect_async(url).await.expect("ws connect");
        ws
    }

    async fn stats(&self) -> Value {
        self.http
            .get(format!("http://{}/healthcheck", self.addr))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap()
    }

    async fn wait_for_subscriptions(&self, expected: u64) {
        for _ in 0..200 {
            if self.stats().await["subscriptions"] == expected {
                return;
            }
            time::sleep(Duration::from_millis(10)).await;
        }
        panic!("relay never reached {expected} subscriptions");
    }

    fn post(&self, path: &str) -> reqwest::RequestBuilder {
        self.http
            .post(format!("http://{}{path}", self.addr))
            .bearer_auth(self.token("auth0|publisher"))
    }

    fn delete(&self, path: &str) -> reqwest::RequestBuilder {
        self.http
            .delete(format!("http://{}{path}", self.addr))
            .bearer_auth(self.token("auth0|publisher"))
    }

    async fn stop(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        time::timeout(Duration::from_secs(5), self.task)
            .await
            .expect("relay did not stop")
            .unwrap();
    }
}

async fn subscribe(ws: &mut Ws, topic: &str) {
    let frame = json!({"type": "subscribe", "topic": topic}).to_string();
    ws.send(Message::Text(frame.into())).await.expect("send subscribe");
}

async fn next_json(ws: &mut Ws) -> Value {
    loop {
        let msg = time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("stream ended")
            .expect("ws read error");
        match msg {
            Message::Text(text) => return serde_json::from_str(text.as_str()).unwrap(),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("unexpected frame {other:?}"),
        }
    }
}

/// True once the server closes the socket.
async fn closed_by_server(ws: &mut Ws) -> bool {
    loop {
        match time::timeout(Duration::from_secs(5), ws.next()).await {
            Err(_) => return false,
            Ok(None) | Ok(Some(Err(_))) | Ok(Some(Ok(Message::Close(_)))) => return true,
            Ok(Some(Ok(_))) => continue,
        }
    }
}

#[tokio::test]
async fn publish_reaches_subscribers() {
    let relay = start_relay().await;
    let mut first = relay.connect("auth0|42").await;
    let mut second = relay.connect("auth0|43").await;
    subscribe(&mut first, "general").await;
    subscribe(&mut second, "general").await;
    relay.wait_for_subscriptions(2).await;

    for n in 1..=3 {
        let response = relay
            .post("/publish?topic=general")
            .body(json!({"n": n}).to_string())
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
    }

    for ws in [&mut first, &mut second] {
        for n in 1..=3 {
            assert_eq!(next_json(ws).await, json!({"n": n}));
        }
    }

    relay.stop().await;
}

#[tokio::test]
async fn deletion_is_broadcast_only_on_its_channel() {
    let relay = start_relay().await;
    let mut general = relay.connect("auth0|42").await;
    let mut other = relay.connect("auth0|43").await;
    subscribe(&mut general, "general").await;
    subscribe(&mut other, "other").await;
    relay.wait_for_subscriptions(2).await;

    let created: Value = relay
        .post("/message")
        .json(&json!({
            "channel": "general",
            "type": "message",
            "subType": "message_created",
            "user": "alice",
            "connectionID": 3,
            "text": "hello"
        }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let id = created["message"]["id"].as_u64().unwrap();
    assert_eq!(next_json(&mut general).await["message"]["message"], "hello");

    let response = relay
        .delete(&format!("/message/{id}"))
        .json(&json!({"channel": "general"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    assert_eq!(
        next_json(&mut general).await,
        json!({"channel": "general", "type": "message", "subType": "message_deleted", "id": id})
    );
    assert!(
        time::timeout(Duration::from_millis(200), other.next())
            .await
            .is_err()
    );

    relay.stop().await;
}

#[tokio::test]
async fn notification_subscription_pushes_outstanding_items() {
    let relay = start_relay().await;
    let mut ws = relay.connect("auth0|42").await;
    subscribe(&mut ws, "notifications/42").await;

    let mut by_kind = std::collections::HashMap::new();
    for _ in 0..3 {
        let frame = next_json(&mut ws).await;
        assert_eq!(frame["type"], "notification");
        by_kind.insert(frame["subType"].as_str().unwrap().to_string(), frame["payload"].clone());
    }
    assert_eq!(by_kind["BE"], json!([31]));
    assert_eq!(by_kind["FL"], json!([]));
    assert_eq!(by_kind["EC"], json!([32]));

    relay.stop().await;
}

#[tokio::test]
async fn another_users_notifications_are_refused() {
    let relay = start_relay().await;
    let mut ws = relay.connect("auth0|43").await;
    subscribe(&mut ws, "notifications/42").await;

    assert!(closed_by_server(&mut ws).await);
    relay.stop().await;
}

#[tokio::test]
async fn malformed_frame_disconnects() {
    let relay = start_relay().await;
    let mut ws = relay.connect("auth0|42").await;
    ws.send(Message::Text("{\"type\":\"publish\"}".into())).await.unwrap();

    assert!(closed_by_server(&mut ws).await);
    relay.stop().await;
}

#[tokio::test]
async fn bad_token_is_rejected_before_upgrade() {
    let relay = start_relay().await;
    let url = format!("ws://{}/ws?access_token=not-a-jwt", relay.addr);

    match connect_async(url).await {
        Err(tungstenite::Error::Http(response)) => assert_eq!(response.status(), 401),
        Err(e) => panic!("unexpected error {e}"),
        Ok(_) => panic!("upgrade should have been refused"),
    }
    relay.stop().await;
}

#[tokio::test]
async fn shutdown_closes_open_sockets() {
    let relay = start_relay().await;
    let mut ws = relay.connect("auth0|42").await;
    subscribe(&mut ws, "general").await;
    relay.wait_for_subscriptions(1).await;

    relay.stop().await;
    assert!(closed_by_server(&mut ws).await);
}
