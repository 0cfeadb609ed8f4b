//! Presence board: the daemon's side of the monitor callbacks.
//!
//! The board turns NEAR, AWAY and RSSI callbacks into host decisions. It
//! keeps the state shown by `/api/presence` and decides whether an AWAY
//! should become a lock request. Lock requests are recorded and logged;
//! running a screen locker is left to whatever consumes the API or the
//! log.
//!
//! An arrival only counts after an AWAY has been seen ("arming"), so the
//! first NEAR after startup does not look like the user walking back in.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use proxlock_core::{PresenceCallbacks, PresenceEvent};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use utoipa::ToSchema;

/// Coarse presence of the tracked device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Presence {
    /// No NEAR or AWAY seen yet.
    #[default]
    Unknown,
    /// The device is close.
    Near,
    /// The device left.
    Away,
}

/// What the board did with an AWAY event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum LockDecision {
    /// A lock was requested.
    Requested,
    /// The device was already away and a lock was already requested.
    AlreadyRequested,
    /// An arrival happened within the re-lock delay.
    SuppressedCooldown,
    /// Locking is switched off.
    LockingDisabled,
}

/// Host policy applied to AWAY events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockPolicy {
    /// When false, AWAY never requests a lock.
    pub locking_enabled: bool,
    /// Suppress lock requests for this long after an arrival.
    pub re_lock_delay: Duration,
}

impl Default for LockPolicy {
    fn default() -> Self {
        Self {
            locking_enabled: true,
            re_lock_delay: Duration::ZERO,
        }
    }
}

/// Point-in-time copy of the board.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BoardSnapshot {
    /// Current presence.
    pub presence: Presence,
    /// Latest RSSI, `None` when unknown or stale.
    pub rssi: Option<i16>,
    /// Name of the last NEAR or AWAY event.
    pub last_event: Option<String>,
    /// When the last NEAR or AWAY event arrived.
    pub last_event_at: Option<DateTime<Utc>>,
    /// Whether the next NEAR counts as an arrival.
    pub armed: bool,
    /// Lock requests issued so far.
    pub lock_requests: u64,
    /// Arrivals seen so far.
    pub arrivals: u64,
    /// Outcome of the most recent AWAY.
    pub last_lock_decision: Option<LockDecision>,
}

#[derive(Debug, Default)]
struct BoardState {
    snapshot: BoardSnapshot,
    policy: LockPolicy,
    last_arrival: Option<Instant>,
    lock_pending: bool,
}

/// Shared presence state fed by monitor callbacks.
#[derive(Debug, Default)]
pub struct PresenceBoard {
    state: Mutex<BoardState>,
}

impl PresenceBoard {
    /// Create a board with the given lock policy.
    #[must_use]
    pub fn new(policy: LockPolicy) -> Self {
        Self {
            state: Mutex::new(BoardState {
                policy,
                ..BoardState::default()
            }),
        }
    }

    /// Callbacks that feed this board.
    #[must_use]
    pub fn callbacks(self: &Arc<Self>) -> PresenceCallbacks {
        let near = Arc::clone(self);
        let away = Arc::clone(self);
        let rssi = Arc::clone(self);
        PresenceCallbacks::new()
            .on_near(move |value| near.apply(PresenceEvent::Near(value)))
            .on_away(move || away.apply(PresenceEvent::Away))
            .on_rssi(move |value| rssi.apply(PresenceEvent::RssiUpdate(value)))
    }

    /// Record one monitor event.
    pub fn apply(&self, event: PresenceEvent) {
        match event {
            PresenceEvent::Near(rssi) => self.on_near(rssi),
            PresenceEvent::Away => {
                self.on_away();
            }
            PresenceEvent::RssiUpdate(rssi) => self.lock().snapshot.rssi = rssi,
        }
    }

    /// Replace the lock policy.
    pub fn set_policy(&self, policy: LockPolicy) {
        self.lock().policy = policy;
    }

    /// The current lock policy.
    #[must_use]
    pub fn policy(&self) -> LockPolicy {
        self.lock().policy
    }

    /// Copy of the current state.
    #[must_use]
    pub fn snapshot(&self) -> BoardSnapshot {
        self.lock().snapshot.clone()
    }

    /// Forget presence after the target changes. Counters are kept.
    pub fn reset_presence(&self) {
        let mut state = self.lock();
        state.snapshot.presence = Presence::Unknown;
        state.snapshot.rssi = None;
        state.snapshot.armed = false;
        state.lock_pending = false;
    }

    fn on_near(&self, rssi: i16) {
        let mut state = self.lock();
        let was_near = state.snapshot.presence == Presence::Near;
        state.snapshot.presence = Presence::Near;
        state.lock_pending = false;
        mark_event(&mut state.snapshot, "near");

        if was_near {
            return;
        }
        if state.snapshot.armed {
            state.snapshot.armed = false;
            state.snapshot.arrivals += 1;
            state.last_arrival = Some(Instant::now());
            info!(rssi_dbm = rssi, "Device arrived");
        } else {
            debug!(rssi_dbm = rssi, "Device near (not armed)");
        }
    }

    fn on_away(&self) -> LockDecision {
        let mut state = self.lock();
        state.snapshot.presence = Presence::Away;
        state.snapshot.armed = true;
        mark_event(&mut state.snapshot, "away");

        let decision = if !state.policy.locking_enabled {
            LockDecision::LockingDisabled
        } else if state.lock_pending {
            LockDecision::AlreadyRequested
        } else if within_cooldown(state.last_arrival, state.policy.re_lock_delay) {
            LockDecision::SuppressedCooldown
        } else {
            state.lock_pending = true;
            state.snapshot.lock_requests += 1;
            LockDecision::Requested
        };
        state.snapshot.last_lock_decision = Some(decision);
        drop(state);

        match decision {
            LockDecision::Requested => warn!("Device away; screen lock requested"),
            LockDecision::SuppressedCooldown => {
                info!("Device away; lock suppressed by re-lock delay");
            }
            LockDecision::LockingDisabled => info!("Device away; locking disabled"),
            LockDecision::AlreadyRequested => debug!("Device still away"),
        }
        decision
    }

    fn lock(&self) -> MutexGuard<'_, BoardState> {
        // Callbacks run on the monitor task; a poisoned lock only means an
        // earlier callback panicked mid-update.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn mark_event(snapshot: &mut BoardSnapshot, name: &str) {
    snapshot.last_event = Some(name.to_string());
    snapshot.last_event_at = Some(Utc::now());
}

fn within_cooldown(last_arrival: Option<Instant>, delay: Duration) -> bool {
    if delay.is_zero() {
        return false;
    }
    last_arrival.is_some_and(|at| at.elapsed() < delay)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_near_is_not_an_arrival() {
        let board = PresenceBoard::default();
        board.apply(PresenceEvent::Near(-60));

        let snapshot = board.snapshot();
        assert_eq!(snapshot.presence, Presence::Near);
        assert_eq!(snapshot.arrivals, 0);
        assert_eq!(snapshot.last_event.as_deref(), Some("near"));
        assert!(snapshot.last_event_at.is_some());
    }

    #[test]
    fn test_away_requests_lock_once() {
        let board = PresenceBoard::default();
        board.apply(PresenceEvent::Near(-60));
        board.apply(PresenceEvent::Away);
        board.apply(PresenceEvent::Away);

        let snapshot = board.snapshot();
        assert_eq!(snapshot.presence, Presence::Away);
        assert!(snapshot.armed);
        assert_eq!(snapshot.lock_requests, 1);
        assert_eq!(
            snapshot.last_lock_decision,
            Some(LockDecision::AlreadyRequested)
        );
    }

    #[test]
    fn test_near_after_away_is_an_arrival() {
        let board = PresenceBoard::default();
        board.apply(PresenceEvent::Away);
        board.apply(PresenceEvent::Near(-55));
        // Level-triggered NEAR repeats; only the transition counts
        board.apply(PresenceEvent::Near(-55));

        let snapshot = board.snapshot();
        assert_eq!(snapshot.arrivals, 1);
        assert!(!snapshot.armed);

        // A new departure requests a new lock
        board.apply(PresenceEvent::Away);
        assert_eq!(board.snapshot().lock_requests, 2);
    }

    #[test]
    fn test_locking_disabled() {
        let board = PresenceBoard::new(LockPolicy {
            locking_enabled: false,
            re_lock_delay: Duration::ZERO,
        });
        board.apply(PresenceEvent::Away);

        let snapshot = board.snapshot();
        assert_eq!(snapshot.lock_requests, 0);
        assert_eq!(
            snapshot.last_lock_decision,
            Some(LockDecision::LockingDisabled)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_re_lock_delay_suppresses_lock_after_arrival() {
        let board = PresenceBoard::new(LockPolicy {
            locking_enabled: true,
            re_lock_delay: Duration::from_secs(60),
        });
        board.apply(PresenceEvent::Away);
        board.apply(PresenceEvent::Near(-50));

        tokio::time::advance(Duration::from_secs(30)).await;
        board.apply(PresenceEvent::Away);
        assert_eq!(
            board.snapshot().last_lock_decision,
            Some(LockDecision::SuppressedCooldown)
        );
        assert_eq!(board.snapshot().lock_requests, 1);

        tokio::time::advance(Duration::from_secs(31)).await;
        board.apply(PresenceEvent::Away);
        assert_eq!(board.snapshot().lock_requests, 2);
    }

    #[test]
    fn test_rssi_updates_do_not_change_presence() {
        let board = PresenceBoard::default();
        board.apply(PresenceEvent::RssiUpdate(Some(-70)));
        assert_eq!(board.snapshot().rssi, Some(-70));
        assert_eq!(board.snapshot().presence, Presence::Unknown);

        board.apply(PresenceEvent::RssiUpdate(None));
        assert_eq!(board.snapshot().rssi, None);
    }

    #[test]
    fn test_callbacks_feed_the_board() {
        let board = Arc::new(PresenceBoard::default());
        let callbacks = board.callbacks();

        callbacks.dispatch(PresenceEvent::Near(-58));
        callbacks.dispatch(PresenceEvent::RssiUpdate(Some(-58)));

        let snapshot = board.snapshot();
        assert_eq!(snapshot.presence, Presence::Near);
        assert_eq!(snapshot.rssi, Some(-58));
    }

    #[test]
    fn test_reset_presence_keeps_counters() {
        let board = PresenceBoard::default();
        board.apply(PresenceEvent::Away);
        board.reset_presence();

        let snapshot = board.snapshot();
        assert_eq!(snapshot.presence, Presence::Unknown);
        assert!(!snapshot.armed);
        assert_eq!(snapshot.lock_requests, 1);
    }
}
