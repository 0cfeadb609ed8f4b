//! OpenAPI specification for the proxlock daemon API.

use axum::Json;
use utoipa::OpenApi;

use super::config::{ConfigResponse, UpdateConfigRequest};
use super::detections::{DetectionRequest, DetectionResponse};
use super::error::ErrorResponse;
use super::health::HealthResponse;
use super::monitor::MonitorStatusResponse;
use super::presence::PresenceResponse;
use crate::dispatch::{LockDecision, Presence};

/// Serve the OpenAPI specification as JSON at `/api/openapi.json`.
pub async fn get_openapi_spec() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

/// The OpenAPI specification as pretty-printed JSON.
///
/// # Errors
///
/// Returns an error if the document cannot be serialized.
pub fn get_openapi_json() -> Result<String, serde_json::Error> {
    ApiDoc::openapi().to_pretty_json()
}

/// Main OpenAPI document structure for proxlock.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "proxlock API",
        version = "0.1.0",
        description = r#"
# proxlock API

proxlock watches the Bluetooth signal of one personal device (usually a
phone) and requests a screen lock when it walks away.

## Overview

- **Presence**: NEAR / AWAY state of the tracked device, with live RSSI
- **Configuration**: Target device, RSSI threshold, hysteresis and timers
- **Monitor**: Start and stop BLE scanning

Lock requests are reported through `/api/presence` and the daemon log.
"#,
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    ),
    servers(
        (url = "/", description = "Local proxlock daemon")
    ),
    tags(
        (name = "system", description = "Health checks"),
        (name = "presence", description = "Presence of the tracked device"),
        (name = "config", description = "Monitor settings"),
        (name = "monitor", description = "Start and stop BLE scanning")
    ),
    paths(
        super::health::health_check,
        super::presence::get_presence,
        super::config::get_config,
        super::config::update_config,
        super::monitor::start_monitor,
        super::monitor::stop_monitor,
        super::detections::inject_detection,
    ),
    components(
        schemas(
            ErrorResponse,
            HealthResponse,
            PresenceResponse,
            Presence,
            LockDecision,
            ConfigResponse,
            UpdateConfigRequest,
            MonitorStatusResponse,
            DetectionRequest,
            DetectionResponse,
        )
    )
)]
pub struct ApiDoc;
