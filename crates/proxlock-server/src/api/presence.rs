//! Presence API endpoint.
//!
//! Reports what the presence board has seen: NEAR/AWAY state, live RSSI and
//! how many lock requests and arrivals have happened.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::dispatch::{BoardSnapshot, LockDecision, Presence};
use crate::state::AppState;

/// Creates the presence router.
pub fn router() -> Router<AppState> {
    Router::new().route("/presence", get(get_presence))
}

/// Current presence of the tracked device.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "presence": "near",
    "rssi_dbm": -62,
    "monitoring": true,
    "last_event": "near",
    "last_event_at_utc": "2024-01-15T08:30:00Z",
    "lock_requests": 4,
    "arrivals": 3,
    "last_lock_decision": "requested"
}))]
pub struct PresenceResponse {
    /// NEAR/AWAY state, `unknown` until the first event.
    pub presence: Presence,

    /// Latest signal strength in dBm; null when unknown or stale.
    #[schema(example = -62, nullable)]
    pub rssi_dbm: Option<i16>,

    /// Whether the proximity monitor is running.
    #[schema(example = true)]
    pub monitoring: bool,

    /// The last NEAR or AWAY event (`near` or `away`).
    #[schema(example = "near", nullable)]
    pub last_event: Option<String>,

    /// When the last NEAR or AWAY event happened.
    #[schema(nullable)]
    pub last_event_at_utc: Option<DateTime<Utc>>,

    /// Number of screen lock requests issued.
    #[schema(example = 4)]
    pub lock_requests: u64,

    /// Number of arrivals (NEAR after AWAY).
    #[schema(example = 3)]
    pub arrivals: u64,

    /// What happened to the most recent AWAY.
    #[schema(nullable)]
    pub last_lock_decision: Option<LockDecision>,
}

impl PresenceResponse {
    fn from_snapshot(snapshot: BoardSnapshot, monitoring: bool) -> Self {
        Self {
            presence: snapshot.presence,
            rssi_dbm: snapshot.rssi,
            monitoring,
            last_event: snapshot.last_event,
            last_event_at_utc: snapshot.last_event_at,
            lock_requests: snapshot.lock_requests,
            arrivals: snapshot.arrivals,
            last_lock_decision: snapshot.last_lock_decision,
        }
    }
}

/// Get the current presence.
#[utoipa::path(
    get,
    path = "/api/presence",
    tag = "presence",
    operation_id = "getPresence",
    summary = "Get device presence",
    description = "Returns whether the tracked device is near or away, the \
        latest RSSI reading and lock/arrival counters.",
    responses(
        (status = 200, description = "Current presence", body = PresenceResponse)
    )
)]
pub async fn get_presence(State(state): State<AppState>) -> Json<PresenceResponse> {
    Json(PresenceResponse::from_snapshot(
        state.board().snapshot(),
        state.monitor().is_running(),
    ))
}
