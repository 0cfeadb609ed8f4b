//! Sighting injection for builds without BlueZ.
//!
//! When the daemon runs on the in-process advertisement source, this is the
//! only way sightings reach the monitor. BlueZ builds answer 503.

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use proxlock_core::is_valid_mac_address;
use serde::{Deserialize, Serialize};
use tracing::debug;
use utoipa::ToSchema;

use crate::api::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Creates the detections router.
pub fn router() -> Router<AppState> {
    Router::new().route("/detections", post(inject_detection))
}

/// A BLE sighting to feed to the monitor.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "address": "AA:BB:CC:DD:EE:FF",
    "name": "Pixel 8",
    "rssi": -58
}))]
pub struct DetectionRequest {
    /// Bluetooth address of the advertiser.
    #[schema(example = "AA:BB:CC:DD:EE:FF")]
    pub address: String,

    /// Advertised local name.
    #[serde(default)]
    pub name: Option<String>,

    /// Signal strength in dBm.
    #[schema(example = -58)]
    pub rssi: i16,
}

/// Acknowledgement of an injected sighting.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DetectionResponse {
    /// Whether the sighting was queued for the monitor.
    pub accepted: bool,
}

/// Inject a sighting.
#[utoipa::path(
    post,
    path = "/api/detections",
    tag = "monitor",
    operation_id = "injectDetection",
    summary = "Inject a BLE sighting",
    description = "Queues a sighting for the monitor. Only available when the \
        daemon runs without BlueZ.",
    request_body = DetectionRequest,
    responses(
        (status = 202, description = "Sighting queued", body = DetectionResponse),
        (status = 400, description = "Invalid Bluetooth address", body = crate::api::error::ErrorResponse),
        (status = 503, description = "Daemon uses BlueZ", body = crate::api::error::ErrorResponse)
    )
)]
pub async fn inject_detection(
    State(state): State<AppState>,
    Json(request): Json<DetectionRequest>,
) -> ApiResult<(StatusCode, Json<DetectionResponse>)> {
    if !is_valid_mac_address(&request.address) {
        return Err(ApiError::bad_request(
            "invalid_bluetooth_address",
            "Bluetooth address must be in format XX:XX:XX:XX:XX:XX",
        ));
    }

    let Some(injector) = state.injector() else {
        return Err(ApiError::ServiceUnavailable {
            error_code: "injection_unavailable".to_string(),
            message: "Sightings come from BlueZ in this build".to_string(),
            details: None,
        });
    };

    let address = request.address.to_uppercase();
    if !injector
        .detect(&address, request.name.as_deref(), request.rssi)
        .await
    {
        return Err(ApiError::ServiceUnavailable {
            error_code: "source_closed".to_string(),
            message: "The advertisement source is closed".to_string(),
            details: None,
        });
    }

    debug!(rssi_dbm = request.rssi, "Sighting injected");
    Ok((StatusCode::ACCEPTED, Json(DetectionResponse { accepted: true })))
}
