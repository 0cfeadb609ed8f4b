//! Monitor control endpoints.

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tracing::info;
use utoipa::ToSchema;

use crate::api::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Creates the monitor router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/monitor/start", post(start_monitor))
        .route("/monitor/stop", post(stop_monitor))
}

/// Monitor run state.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({ "running": true }))]
pub struct MonitorStatusResponse {
    /// Whether the scan loop is running.
    #[schema(example = true)]
    pub running: bool,
}

/// Start the proximity monitor.
#[utoipa::path(
    post,
    path = "/api/monitor/start",
    tag = "monitor",
    operation_id = "startMonitor",
    summary = "Start the proximity monitor",
    description = "Starts scanning for the configured device. Starting a \
        running monitor does nothing.",
    responses(
        (status = 200, description = "Monitor running", body = MonitorStatusResponse),
        (status = 424, description = "No device configured", body = crate::api::error::ErrorResponse)
    )
)]
pub async fn start_monitor(
    State(state): State<AppState>,
) -> ApiResult<Json<MonitorStatusResponse>> {
    if !state.settings().await.has_target() {
        return Err(ApiError::FailedDependency {
            error_code: "device_not_configured".to_string(),
            message: "Configure device_mac or device_name before starting the monitor"
                .to_string(),
            details: None,
        });
    }

    state.monitor().start();
    info!("Monitor started via API");
    Ok(Json(MonitorStatusResponse {
        running: state.monitor().is_running(),
    }))
}

/// Stop the proximity monitor.
#[utoipa::path(
    post,
    path = "/api/monitor/stop",
    tag = "monitor",
    operation_id = "stopMonitor",
    summary = "Stop the proximity monitor",
    description = "Stops scanning and waits for the scan loop to exit. \
        Stopping an idle monitor does nothing.",
    responses(
        (status = 200, description = "Monitor stopped", body = MonitorStatusResponse),
        (status = 500, description = "Scan loop did not stop cleanly", body = crate::api::error::ErrorResponse)
    )
)]
pub async fn stop_monitor(
    State(state): State<AppState>,
) -> ApiResult<Json<MonitorStatusResponse>> {
    state.monitor().stop().await?;
    info!("Monitor stopped via API");
    Ok(Json(MonitorStatusResponse { running: false }))
}
