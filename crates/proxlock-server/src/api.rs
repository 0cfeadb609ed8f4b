//! HTTP API routes and handlers.
//!
//! This module contains all HTTP endpoint implementations organized by domain:
//! - `health` - Service health checks
//! - `presence` - NEAR/AWAY state and lock bookkeeping
//! - `config` - Monitor settings
//! - `monitor` - Start and stop scanning
//! - `detections` - Sighting injection for builds without BlueZ
//! - `error` - API error types
//! - `openapi` - OpenAPI specification generation

use axum::routing::get;
use axum::Router;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub mod config;
pub mod detections;
pub mod error;
pub mod health;
pub mod monitor;
pub mod openapi;
pub mod presence;

pub use error::{ApiError, ApiResult, ErrorResponse};
pub use openapi::get_openapi_json;

/// Creates the combined API router with all endpoints.
///
/// # Route Structure
///
/// ```text
/// /health                 - Health check
/// /api
/// ├── /presence           - NEAR/AWAY state and counters
/// ├── /config             - Read and update settings
/// ├── /monitor/start      - Start scanning
/// ├── /monitor/stop       - Stop scanning
/// ├── /detections         - Inject a sighting (no BlueZ)
/// └── /openapi.json       - OpenAPI specification
/// ```
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .merge(health::router())
        .nest(
            "/api",
            Router::new()
                .route("/openapi.json", get(openapi::get_openapi_spec))
                .merge(presence::router())
                .merge(config::router())
                .merge(monitor::router())
                .merge(detections::router()),
        )
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}
