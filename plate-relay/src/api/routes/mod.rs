//! Route modules.

pub mod health;
pub mod listen;

use axum::Router;

use crate::api::server::AppState;

/// Create the router: WebSocket listeners at `/` and `/ws`, health under
/// `/health`.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .merge(listen::router())
        .nest("/health", health::router())
        .with_state(state)
}
