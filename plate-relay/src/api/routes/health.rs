//! Health check routes.

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use serde::Serialize;

use crate::api::server::AppState;
use crate::hub::HubStatsSnapshot;
use crate::publisher::PublisherStatsSnapshot;
use crate::scheduler::SchedulerMetricsSnapshot;

/// Create the health router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(health_check))
        .route("/live", get(liveness_check))
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    uptime_secs: u64,
    listeners: usize,
    hub: HubStatsSnapshot,
    publisher: PublisherStatsSnapshot,
    #[serde(skip_serializing_if = "Option::is_none")]
    scheduler: Option<SchedulerMetricsSnapshot>,
}

/// Health check endpoint.
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let hub = state.hub.stats();

    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: state.start_time.elapsed().as_secs(),
        listeners: hub.listeners,
        hub,
        publisher: state.publisher.stats(),
        scheduler: state.scheduler_metrics.as_ref().map(|m| m.snapshot()),
    })
}

/// Liveness check - is the service alive?
async fn liveness_check(State(state): State<AppState>) -> impl IntoResponse {
    let uptime = state.start_time.elapsed().as_secs();
    (
        StatusCode::OK,
        Json(serde_json::json!({
            "status": "alive",
            "uptime_secs": uptime
        })),
    )
}
