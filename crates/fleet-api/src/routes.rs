//! API route definitions

use crate::handlers;
use crate::state::AppState;

use axum::{
    Router,
    http::HeaderValue,
    routing::{get, put},
};
use std::time::Duration;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::warn;

/// Create the main application router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health & Status
        .route("/health", get(handlers::health_check))
        .route("/status", get(handlers::system_status))
        // Metrics (Prometheus format)
        .route("/metrics", get(handlers::metrics))
        // Snapshot & entities
        .route("/api/v1/snapshot", get(handlers::get_snapshot))
        .route("/api/v1/entities", get(handlers::list_entities))
        .route(
            "/api/v1/entities/{id}",
            get(handlers::get_entity).delete(handlers::remove_entity),
        )
        .route("/api/v1/entities/{id}/history", get(handlers::get_entity_history))
        // Viewer controls
        .route(
            "/api/v1/selection",
            get(handlers::get_selection).put(handlers::set_selection),
        )
        .route("/api/v1/view", put(handlers::set_view))
        // Apply middleware
        .layer(cors_layer(&state))
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .with_state(state)
}

fn cors_layer(state: &AppState) -> CorsLayer {
    let permissive = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
        .max_age(Duration::from_secs(3600));

    if state.config.cors_permissive {
        return permissive;
    }

    match state.config.allowed_origin.parse::<HeaderValue>() {
        Ok(origin) => CorsLayer::new()
            .allow_origin(origin)
            .allow_methods(Any)
            .allow_headers(Any),
        Err(e) => {
            warn!(origin = %state.config.allowed_origin, error = %e, "Invalid CORS origin, allowing any");
            permissive
        }
    }
}
