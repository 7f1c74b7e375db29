//! End-to-end tests against the real axum server with WebSocket clients.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use plate_event::DetectionEvent;
use plate_relay::api::{AppState, RelayServer};
use plate_relay::config::ServerConfig;
use plate_relay::detector::Detection;
use plate_relay::hub::BroadcastHub;
use plate_relay::publisher::{EventPublisher, PublisherConfig};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct Relay {
    addr: SocketAddr,
    hub: Arc<BroadcastHub>,
    publisher: EventPublisher,
    server: Arc<RelayServer>,
}

async fn start_relay() -> Relay {
    let hub = Arc::new(BroadcastHub::default());
    let (publisher, _dispatcher) = EventPublisher::spawn(
        hub.clone(),
        PublisherConfig {
            debounce_window: Duration::ZERO,
            ..Default::default()
        },
        CancellationToken::new(),
    );

    let server = Arc::new(RelayServer::new(
        ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
        },
        AppState::new(hub.clone(), publisher.clone()),
    ));
    let listener = server.bind().await.unwrap();
    let addr = listener.local_addr().unwrap();

    let serving = server.clone();
    tokio::spawn(async move { serving.serve(listener).await });

    Relay {
        addr,
        hub,
        publisher,
        server,
    }
}

async fn connect(relay: &Relay, path: &str) -> Client {
    let before = relay.hub.listener_count();
    let (client, _) = connect_async(format!("ws://{}{}", relay.addr, path))
        .await
        .unwrap();
    wait_for_listeners(&relay.hub, before + 1).await;
    client
}

async fn wait_for_listeners(hub: &BroadcastHub, expected: usize) {
    for _ in 0..200 {
        if hub.listener_count() == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!(
        "expected {expected} listeners, hub has {}",
        hub.listener_count()
    );
}

async fn next_text(client: &mut Client) -> String {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(2), client.next())
            .await
            .expect("timed out waiting for a message")
            .expect("stream ended")
            .expect("socket error");
        match msg {
            Message::Text(text) => return text.as_str().to_string(),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("unexpected message {other:?}"),
        }
    }
}

async fn assert_silent(client: &mut Client) {
    let result = tokio::time::timeout(Duration::from_millis(200), client.next()).await;
    assert!(result.is_err(), "expected no message, got {result:?}");
}

#[tokio::test]
async fn listeners_receive_identical_event() {
    let relay = start_relay().await;
    let mut a = connect(&relay, "/ws").await;
    let mut b = connect(&relay, "/").await;

    let outcome = relay
        .publisher
        .publish(&Detection::new("ABC1234", 0.92), 1);
    assert!(outcome.is_queued());

    let text_a = next_text(&mut a).await;
    let text_b = next_text(&mut b).await;
    assert_eq!(text_a, text_b);

    let value: serde_json::Value = serde_json::from_str(&text_a).unwrap();
    let object = value.as_object().unwrap();
    assert_eq!(object.len(), 4);
    assert_eq!(object["plate"], "ABC1234");
    assert_eq!(object["camera_id"], 1);
    assert_eq!(object["confidence"], 0.92);
    assert!(object["timestamp"].as_str().unwrap().ends_with('Z'));
}

#[tokio::test]
async fn below_threshold_not_delivered() {
    let relay = start_relay().await;
    let mut client = connect(&relay, "/ws").await;

    relay.publisher.publish(&Detection::new("LOW0001", 0.3), 1);
    relay.publisher.publish(&Detection::new("HIGH001", 0.8), 1);

    let event = DetectionEvent::from_json(&next_text(&mut client).await).unwrap();
    assert_eq!(event.label(), "HIGH001");
}

#[tokio::test]
async fn inbound_events_relayed_to_others_only() {
    let relay = start_relay().await;
    let mut sender = connect(&relay, "/ws").await;
    let mut receiver = connect(&relay, "/ws").await;

    for malformed in [
        "not json",
        r#"{"plate":"ABC1234"}"#,
        r#"{"timestamp":"2026-01-01T00:00:00","plate":"ABC1234","camera_id":1,"confidence":7}"#,
    ] {
        sender.send(Message::text(malformed.to_string())).await.unwrap();
    }

    let valid = r#"{"timestamp":"2026-01-01T12:00:00.000Z","plate":"XYZ5678","camera_id":2,"confidence":0.87}"#;
    sender.send(Message::text(valid.to_string())).await.unwrap();

    let relayed = DetectionEvent::from_json(&next_text(&mut receiver).await).unwrap();
    assert_eq!(relayed.label(), "XYZ5678");
    assert_eq!(relayed.source_id(), 2);
    assert_eq!(relayed.confidence(), 0.87);

    assert_silent(&mut sender).await;
    assert_eq!(relay.hub.stats().published, 1);
}

#[tokio::test]
async fn late_listener_misses_earlier_events() {
    let relay = start_relay().await;
    let mut early = connect(&relay, "/ws").await;

    relay.publisher.publish(&Detection::new("ABC1234", 0.9), 1);
    next_text(&mut early).await;

    let mut late = connect(&relay, "/ws").await;
    assert_silent(&mut late).await;

    relay.publisher.publish(&Detection::new("DEF9012", 0.9), 3);
    let event = DetectionEvent::from_json(&next_text(&mut late).await).unwrap();
    assert_eq!(event.label(), "DEF9012");
}

#[tokio::test]
async fn client_close_unregisters() {
    let relay = start_relay().await;
    let mut client = connect(&relay, "/ws").await;
    let _other = connect(&relay, "/ws").await;

    client.close(None).await.unwrap();
    wait_for_listeners(&relay.hub, 1).await;
}

#[tokio::test]
async fn close_all_sends_going_away() {
    let relay = start_relay().await;
    let mut client = connect(&relay, "/ws").await;

    assert_eq!(relay.hub.close_all(), 1);

    let msg = tokio::time::timeout(Duration::from_secs(2), client.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    match msg {
        Message::Close(Some(frame)) => assert_eq!(frame.code, CloseCode::Away),
        other => panic!("expected close frame, got {other:?}"),
    }

    relay.server.shutdown();
}

#[tokio::test]
async fn listener_joining_after_close_all_is_closed() {
    let relay = start_relay().await;
    relay.hub.close_all();

    let (mut client, _) = connect_async(format!("ws://{}/ws", relay.addr))
        .await
        .unwrap();
    let msg = tokio::time::timeout(Duration::from_secs(2), client.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    match msg {
        Message::Close(Some(frame)) => assert_eq!(frame.code, CloseCode::Away),
        other => panic!("expected close frame, got {other:?}"),
    }
    assert_eq!(relay.hub.listener_count(), 0);
    assert_eq!(relay.hub.stats().registered, 0);

    relay.server.shutdown();
}

#[tokio::test]
async fn health_reports_listeners() {
    let relay = start_relay().await;
    let _client = connect(&relay, "/ws").await;

    let body: serde_json::Value = reqwest::get(format!("http://{}/health", relay.addr))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["listeners"], 1);
    assert_eq!(body["hub"]["registered"], 1);

    let live = reqwest::get(format!("http://{}/health/live", relay.addr))
        .await
        .unwrap();
    assert!(live.status().is_success());
}
