//! WebSocket endpoint for detection listeners.
//!
//! Each upgraded connection becomes one hub registration. Outbound events are
//! written as text frames in publish order. Inbound text frames are treated as
//! events from an external producer: valid ones are relayed to every other
//! listener, anything else is logged and dropped.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    extract::{
        State,
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade, close_code},
    },
    response::IntoResponse,
    routing::get,
};
use chrono::Utc;
use futures::{SinkExt, StreamExt};
use plate_event::DetectionEvent;
use tracing::{debug, info, warn};

use crate::api::server::AppState;
use crate::hub::{BroadcastHub, ListenerConnection, ListenerId, ListenerState};
use crate::publisher::{EventPublisher, PublishOutcome};

/// Interval between keep-alive pings.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(listen_ws))
        .route("/ws", get(listen_ws))
}

async fn listen_ws(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| {
        state
            .sessions
            .track_future(handle_socket(socket, state.hub, state.publisher))
    })
}

/// Why a session loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionEnd {
    /// Client sent a close frame or the stream ended cleanly.
    ClientClosed,
    /// Write or read failure on the socket.
    Lost,
    /// The hub let go of the listener (shutdown or eviction).
    Released,
}

async fn handle_socket(socket: WebSocket, hub: Arc<BroadcastHub>, publisher: EventPublisher) {
    let mut conn = hub.register();
    let id = conn.id();
    let cancel = conn.cancel_token();
    let (mut sender, mut receiver) = socket.split();

    let mut heartbeat = tokio::time::interval_at(
        tokio::time::Instant::now() + HEARTBEAT_INTERVAL,
        HEARTBEAT_INTERVAL,
    );
    heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    let end = loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => break SessionEnd::Released,

            payload = conn.recv() => match payload {
                Some(payload) => {
                    if sender.send(Message::Text(payload)).await.is_err() {
                        break SessionEnd::Lost;
                    }
                }
                None => break SessionEnd::Released,
            },

            msg = receiver.next() => match msg {
                Some(Ok(Message::Text(text))) => handle_inbound(&publisher, id, text.as_str()),
                Some(Ok(Message::Binary(data))) => {
                    warn!(listener = %id, bytes = data.len(), "Dropping binary message");
                }
                Some(Ok(Message::Close(_))) | None => break SessionEnd::ClientClosed,
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    debug!(listener = %id, error = %e, "Socket read failed");
                    break SessionEnd::Lost;
                }
            },

            _ = heartbeat.tick() => {
                if sender.send(Message::Ping(Default::default())).await.is_err() {
                    break SessionEnd::Lost;
                }
            }
        }
    };

    match end {
        SessionEnd::ClientClosed => {
            hub.unregister(id);
            finish(&conn);
            info!(listener = %id, connected_secs = connected_secs(&conn), "Listener disconnected");
        }
        SessionEnd::Lost => {
            hub.evict(id);
            info!(listener = %id, connected_secs = connected_secs(&conn), "Listener connection lost");
        }
        SessionEnd::Released if conn.state() == ListenerState::Closing => {
            flush(&mut conn, &mut sender).await;
            let frame = CloseFrame {
                code: close_code::AWAY,
                reason: "server shutting down".into(),
            };
            if let Err(e) = sender.send(Message::Close(Some(frame))).await {
                debug!(listener = %id, error = %e, "Failed to send close frame");
            }
            finish(&conn);
            info!(listener = %id, "Listener closed by server");
        }
        SessionEnd::Released => {
            debug!(listener = %id, state = %conn.state(), "Listener evicted");
        }
    }
}

/// Write out whatever the hub queued before releasing the listener.
async fn flush<S>(conn: &mut ListenerConnection, sender: &mut S)
where
    S: SinkExt<Message> + Unpin,
{
    while let Some(payload) = conn.try_recv() {
        if sender.send(Message::Text(payload)).await.is_err() {
            return;
        }
    }
}

fn connected_secs(conn: &ListenerConnection) -> i64 {
    (Utc::now() - conn.registered_at()).num_seconds()
}

fn finish(conn: &ListenerConnection) {
    if let Err(e) = conn.finish() {
        debug!(listener = %conn.id(), error = %e, "Listener already closed");
    }
}

fn handle_inbound(publisher: &EventPublisher, origin: ListenerId, text: &str) {
    let event = match DetectionEvent::from_json(text) {
        Ok(event) => event,
        Err(e) => {
            warn!(listener = %origin, error = %e, "Dropping malformed message");
            return;
        }
    };

    match publisher.relay(event, origin) {
        PublishOutcome::Queued => debug!(listener = %origin, "Inbound event queued for relay"),
        outcome => debug!(listener = %origin, ?outcome, "Inbound event not relayed"),
    }
}
