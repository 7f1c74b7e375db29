//! HTTP/WebSocket server setup.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Router;
use axum::extract::Request;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tower_http::trace::TraceLayer;
use tracing::Span;

use crate::api::routes;
use crate::config::ServerConfig;
use crate::error::{Error, Result};
use crate::hub::BroadcastHub;
use crate::publisher::EventPublisher;
use crate::scheduler::SchedulerMetrics;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Server start time for uptime calculation
    pub start_time: Instant,
    pub hub: Arc<BroadcastHub>,
    /// Inbound events from listeners are relayed through the publisher
    pub publisher: EventPublisher,
    pub scheduler_metrics: Option<Arc<SchedulerMetrics>>,
    /// Live WebSocket sessions, awaited on shutdown
    pub sessions: TaskTracker,
}

impl AppState {
    pub fn new(hub: Arc<BroadcastHub>, publisher: EventPublisher) -> Self {
        Self {
            start_time: Instant::now(),
            hub,
            publisher,
            scheduler_metrics: None,
            sessions: TaskTracker::new(),
        }
    }

    pub fn with_scheduler_metrics(mut self, metrics: Arc<SchedulerMetrics>) -> Self {
        self.scheduler_metrics = Some(metrics);
        self
    }
}

/// Listener-facing server.
pub struct RelayServer {
    config: ServerConfig,
    state: AppState,
    cancel_token: CancellationToken,
}

impl RelayServer {
    pub fn new(config: ServerConfig, state: AppState) -> Self {
        Self {
            config,
            state,
            cancel_token: CancellationToken::new(),
        }
    }

    /// Get the cancellation token for graceful shutdown.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Build the router with all middleware and routes.
    fn build_router(&self) -> Router {
        routes::create_router(self.state.clone()).layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &Request| {
                    if req.uri().path().starts_with("/health") {
                        Span::none()
                    } else {
                        let mut make_span =
                            tower_http::trace::DefaultMakeSpan::new().level(tracing::Level::INFO);
                        use tower_http::trace::MakeSpan;
                        make_span.make_span(req)
                    }
                })
                .on_response(
                    |res: &axum::http::Response<_>, latency: Duration, span: &Span| {
                        if span.is_disabled() {
                            return;
                        }
                        let on_response =
                            tower_http::trace::DefaultOnResponse::new().level(tracing::Level::INFO);
                        use tower_http::trace::OnResponse;
                        on_response.on_response(res, latency, span);
                    },
                ),
        )
    }

    /// Bind the configured address. Failure here is a fatal startup error.
    pub async fn bind(&self) -> Result<TcpListener> {
        let address = self.config.address();
        TcpListener::bind(&address)
            .await
            .map_err(|e| Error::startup(format!("cannot listen on {address}: {e}")))
    }

    /// Serve on an already bound listener until the cancel token fires.
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        let router = self.build_router();

        if let Ok(addr) = listener.local_addr() {
            tracing::info!("Relay listening on ws://{}", addr);
        }

        let cancel_token = self.cancel_token.clone();
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                cancel_token.cancelled().await;
                tracing::info!("Relay server shutting down...");
            })
            .await
            .map_err(|e| Error::Server(format!("Server error: {e}")))
    }

    /// Bind and serve.
    pub async fn run(&self) -> Result<()> {
        let listener = self.bind().await?;
        self.serve(listener).await
    }

    /// Shutdown the server.
    pub fn shutdown(&self) {
        self.cancel_token.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::publisher::PublisherConfig;

    #[tokio::test]
    async fn test_server_creation() {
        let hub = Arc::new(BroadcastHub::default());
        let (publisher, _dispatcher) = EventPublisher::channel(PublisherConfig::default());
        let server = RelayServer::new(ServerConfig::default(), AppState::new(hub, publisher));

        let token = server.cancel_token();
        assert!(!token.is_cancelled());
        server.shutdown();
        assert!(token.is_cancelled());
        assert!(server.state().scheduler_metrics.is_none());
    }

    #[tokio::test]
    async fn test_bind_failure_is_startup_error() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = taken.local_addr().unwrap().port();

        let hub = Arc::new(BroadcastHub::default());
        let (publisher, _dispatcher) = EventPublisher::channel(PublisherConfig::default());
        let server = RelayServer::new(
            ServerConfig {
                host: "127.0.0.1".to_string(),
                port,
            },
            AppState::new(hub, publisher),
        );

        let err = server.bind().await.unwrap_err();
        assert!(err.is_fatal_startup());
    }
}
