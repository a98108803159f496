//! Router configuration for the queue API.

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use super::handlers;
use super::AppState;

/// Create the router: `/health` plus the token-gated queue routes.
pub fn create_router(state: AppState) -> Router {
    let queue_api = Router::new()
        .route("/v1/queue/:queue", post(handlers::publish))
        .route("/v1/queue/:queue/lease", post(handlers::lease))
        .route("/v1/queue/:queue/ack", post(handlers::ack))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            handlers::require_token,
        ));

    Router::new()
        .route("/health", get(handlers::health))
        .merge(queue_api)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
