//! Configuration API endpoints.
//!
//! Reads and updates the monitor settings. Updates take effect on the
//! running monitor at its next tick; they are not written to disk.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use proxlock_core::is_valid_mac_address;
use serde::{Deserialize, Serialize};
use tracing::info;
use utoipa::ToSchema;

use crate::api::error::{ApiError, ApiResult};
use crate::settings::Settings;
use crate::state::AppState;

/// Creates the config router with all endpoints.
pub fn router() -> Router<AppState> {
    Router::new().route("/config", get(get_config).put(update_config))
}

// ============================================================================
// Request/Response Types
// ============================================================================

/// Settings currently in effect, after clamping.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "device_mac": "AA:BB:CC:DD:EE:FF",
    "device_name": null,
    "rssi_threshold": -75,
    "hysteresis_db": 5,
    "grace_period_sec": 15,
    "stale_after_sec": 6,
    "unseen_grace_sec": 8,
    "scan_interval_sec": 2.0,
    "near_consecutive_scans": 2,
    "locking_enabled": true,
    "re_lock_delay_sec": 0,
    "is_configured": true
}))]
pub struct ConfigResponse {
    /// MAC address of the tracked device.
    #[schema(example = "AA:BB:CC:DD:EE:FF", nullable)]
    pub device_mac: Option<String>,

    /// Advertised name used when no MAC is set.
    #[schema(nullable)]
    pub device_name: Option<String>,

    /// RSSI threshold in dBm (-120 to -20).
    #[schema(example = -75)]
    pub rssi_threshold: i16,

    /// Margin above the threshold required for NEAR, in dB.
    #[schema(example = 5)]
    pub hysteresis_db: u8,

    /// Seconds a weak signal must persist before AWAY (at most 600).
    #[schema(example = 15)]
    pub grace_period_sec: u64,

    /// Seconds after which the last RSSI reading goes stale.
    #[schema(example = 6)]
    pub stale_after_sec: u64,

    /// Extra silence in seconds before AWAY.
    #[schema(example = 8)]
    pub unseen_grace_sec: u64,

    /// Seconds between evaluations (at least 1).
    #[schema(example = 2.0)]
    pub scan_interval_sec: f64,

    /// Consecutive strong evaluations before NEAR.
    #[schema(example = 2)]
    pub near_consecutive_scans: u32,

    /// Whether AWAY requests a screen lock.
    #[schema(example = true)]
    pub locking_enabled: bool,

    /// Seconds after an arrival during which locks are suppressed.
    #[schema(example = 0)]
    pub re_lock_delay_sec: u64,

    /// Whether a device to follow is configured.
    #[schema(example = true)]
    pub is_configured: bool,
}

impl From<&Settings> for ConfigResponse {
    fn from(settings: &Settings) -> Self {
        let config = settings.monitor_config();
        Self {
            is_configured: !config.matcher().is_inert(),
            device_mac: config.target_address,
            device_name: config.target_name,
            rssi_threshold: config.rssi_threshold,
            hysteresis_db: config.hysteresis_db,
            grace_period_sec: config.grace_period.as_secs(),
            stale_after_sec: config.stale_after.as_secs(),
            unseen_grace_sec: config.unseen_grace.as_secs(),
            scan_interval_sec: config.scan_interval.as_secs_f64(),
            near_consecutive_scans: config.near_consecutive_required,
            locking_enabled: settings.locking_enabled,
            re_lock_delay_sec: settings.re_lock_delay_sec,
        }
    }
}

/// Request to update settings. Omitted fields keep their current value.
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
#[schema(example = json!({
    "device_mac": "AA:BB:CC:DD:EE:FF",
    "rssi_threshold": -70,
    "grace_period_sec": 20
}))]
pub struct UpdateConfigRequest {
    /// MAC address (XX:XX:XX:XX:XX:XX). An empty string clears it.
    #[schema(example = "AA:BB:CC:DD:EE:FF")]
    pub device_mac: Option<String>,

    /// Advertised name. An empty string clears it.
    pub device_name: Option<String>,

    /// RSSI threshold in dBm; clamped to -120..=-20.
    pub rssi_threshold: Option<i16>,

    /// Hysteresis margin in dB.
    pub hysteresis_db: Option<u8>,

    /// Weak-signal grace period in seconds; clamped to 600.
    pub grace_period_sec: Option<u64>,

    /// Staleness window in seconds.
    pub stale_after_sec: Option<u64>,

    /// Extra silence before AWAY, in seconds.
    pub unseen_grace_sec: Option<u64>,

    /// Seconds between evaluations; raised to at least 1.
    pub scan_interval_sec: Option<f64>,

    /// Consecutive strong evaluations before NEAR; raised to at least 1.
    pub near_consecutive_scans: Option<u32>,

    /// Whether AWAY requests a screen lock.
    pub locking_enabled: Option<bool>,

    /// Seconds after an arrival during which locks are suppressed.
    pub re_lock_delay_sec: Option<u64>,
}

impl UpdateConfigRequest {
    /// Apply this request on top of `settings`.
    fn merge_into(self, settings: &mut Settings) -> ApiResult<()> {
        if let Some(mac) = self.device_mac {
            let mac = mac.trim();
            if mac.is_empty() {
                settings.device_mac = None;
            } else if is_valid_mac_address(mac) {
                settings.device_mac = Some(mac.to_uppercase());
            } else {
                return Err(ApiError::bad_request(
                    "invalid_bluetooth_address",
                    "Bluetooth address must be in format XX:XX:XX:XX:XX:XX",
                ));
            }
        }
        if let Some(name) = self.device_name {
            let name = name.trim();
            settings.device_name = (!name.is_empty()).then(|| name.to_string());
        }
        if let Some(interval) = self.scan_interval_sec {
            if !interval.is_finite() || interval <= 0.0 {
                return Err(ApiError::bad_request(
                    "invalid_scan_interval",
                    "Scan interval must be a positive number of seconds",
                ));
            }
            settings.scan_interval_sec = interval;
        }

        if let Some(threshold) = self.rssi_threshold {
            settings.rssi_threshold = threshold;
        }
        if let Some(hysteresis) = self.hysteresis_db {
            settings.hysteresis_db = hysteresis;
        }
        if let Some(grace) = self.grace_period_sec {
            settings.grace_period_sec = grace;
        }
        if let Some(stale_after) = self.stale_after_sec {
            settings.stale_after_sec = stale_after;
        }
        if let Some(unseen_grace) = self.unseen_grace_sec {
            settings.unseen_grace_sec = unseen_grace;
        }
        if let Some(scans) = self.near_consecutive_scans {
            settings.near_consecutive_scans = scans;
        }
        if let Some(enabled) = self.locking_enabled {
            settings.locking_enabled = enabled;
        }
        if let Some(delay) = self.re_lock_delay_sec {
            settings.re_lock_delay_sec = delay;
        }
        Ok(())
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// Get current configuration.
#[utoipa::path(
    get,
    path = "/api/config",
    tag = "config",
    operation_id = "getConfig",
    summary = "Get current configuration",
    description = "Returns the monitor settings in effect, after clamping to \
        their safe ranges.",
    responses(
        (status = 200, description = "Configuration retrieved", body = ConfigResponse)
    )
)]
pub async fn get_config(State(state): State<AppState>) -> Json<ConfigResponse> {
    Json(ConfigResponse::from(&*state.settings().await))
}

/// Update configuration.
#[utoipa::path(
    put,
    path = "/api/config",
    tag = "config",
    operation_id = "updateConfig",
    summary = "Update configuration",
    description = "Updates the monitor settings. The running monitor applies \
        them at its next evaluation and resets its tracking state. If a device \
        becomes configured and the monitor is idle, it is started.",
    request_body = UpdateConfigRequest,
    responses(
        (status = 200, description = "Configuration updated", body = ConfigResponse),
        (status = 400, description = "Invalid Bluetooth address or scan interval", body = crate::api::error::ErrorResponse)
    )
)]
pub async fn update_config(
    State(state): State<AppState>,
    Json(request): Json<UpdateConfigRequest>,
) -> ApiResult<Json<ConfigResponse>> {
    let settings = state
        .update_settings(|settings| request.merge_into(settings))
        .await?;

    let response = ConfigResponse::from(&settings);
    info!(configured = response.is_configured, "Settings updated via API");

    if response.is_configured && !state.monitor().is_running() {
        state.monitor().start();
    }

    Ok(Json(response))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_keeps_omitted_fields() {
        let mut settings = Settings {
            rssi_threshold: -80,
            ..Settings::default()
        };
        UpdateConfigRequest {
            grace_period_sec: Some(30),
            ..UpdateConfigRequest::default()
        }
        .merge_into(&mut settings)
        .unwrap();

        assert_eq!(settings.rssi_threshold, -80);
        assert_eq!(settings.grace_period_sec, 30);
    }

    #[test]
    fn test_merge_rejects_bad_mac() {
        let mut settings = Settings::default();
        let err = UpdateConfigRequest {
            device_mac: Some("AA:BB:CC".to_string()),
            ..UpdateConfigRequest::default()
        }
        .merge_into(&mut settings)
        .unwrap_err();

        assert!(matches!(
            err,
            ApiError::BadRequest { ref error_code, .. } if error_code == "invalid_bluetooth_address"
        ));
        assert_eq!(settings.device_mac, None);
    }

    #[test]
    fn test_merge_clears_with_empty_string() {
        let mut settings = Settings {
            device_mac: Some("AA:BB:CC:DD:EE:FF".to_string()),
            ..Settings::default()
        };
        UpdateConfigRequest {
            device_mac: Some(String::new()),
            ..UpdateConfigRequest::default()
        }
        .merge_into(&mut settings)
        .unwrap();

        assert_eq!(settings.device_mac, None);
    }

    #[test]
    fn test_response_reports_clamped_values() {
        let settings = Settings {
            device_name: Some("Pixel".to_string()),
            rssi_threshold: -200,
            grace_period_sec: 9_999,
            ..Settings::default()
        };
        let response = ConfigResponse::from(&settings);
        assert!(response.is_configured);
        assert_eq!(response.rssi_threshold, -120);
        assert_eq!(response.grace_period_sec, 600);
    }
}
