//! Telemetry ingestion service
//!
//! Exposes the router for in-process testing; `main.rs` only wires config,
//! logging and the listener.

pub mod auth;
pub mod config;
pub mod error;
pub mod export;
pub mod handlers;
pub mod health;
pub mod logging;
pub mod query;

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use sphere_core::EventStore;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

pub use config::ServerConfig;
pub use error::ApiError;

// ============================================================================
// Application State
// ============================================================================

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<EventStore>,
    pub config: Arc<ServerConfig>,
}

impl AppState {
    pub fn new(store: Arc<EventStore>, config: ServerConfig) -> Self {
        Self {
            store,
            config: Arc::new(config),
        }
    }
}

// ============================================================================
// Router
// ============================================================================

pub fn build_router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/log", post(handlers::submit_event))
        .route("/logs/batch", post(handlers::submit_batch))
        .route("/logs/recent", get(handlers::recent_events))
        .route("/logs/query", get(handlers::query_events))
        .route("/logs/:id", get(handlers::get_event))
        .route("/categories", get(handlers::categories))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_api_key,
        ));

    let public = Router::new()
        .route("/health", get(health::health))
        .route("/health/full", get(health::health_full));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let timeout = state.config.request_timeout;

    public
        .merge(protected)
        .with_state(state)
        .layer(TimeoutLayer::new(timeout))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}
