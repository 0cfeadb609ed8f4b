//! Presence evaluation.
//!
//! The presence decision is not stored; it is recomputed on every tick from
//! the [`TrackerState`] and the current [`MonitorConfig`]. One tick runs these
//! steps in order:
//!
//! 1. Never seen: no decision at all.
//! 2. NEAR debounce: count consecutive readings strictly above
//!    `threshold + hysteresis`; emit [`PresenceEvent::Near`] once the count
//!    reaches the requirement, then hold the count there.
//! 3. Weak timer: start on a reading at or below the threshold, clear on a
//!    reading above the NEAR trigger. Readings in between leave it alone.
//! 4. AWAY (weak): the timer has run for at least the grace period.
//! 5. AWAY (silence): no fresh reading; reset the debounce and fire once the
//!    device has been unseen for `stale_after + unseen_grace`.
//! 6. Always emit [`PresenceEvent::RssiUpdate`].
//!
//! NEAR is level triggered: it is emitted on every tick while the signal
//! stays strong. Consumers must treat it as idempotent.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::config::MonitorConfig;
use crate::source::Detection;
use crate::tracker::{SignalSample, SignalTracker, TrackerState};

/// Event emitted by the evaluator for the host to act on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "event", content = "rssi", rename_all = "snake_case")]
pub enum PresenceEvent {
    /// The device is confidently close.
    Near(i16),
    /// The device is confidently gone or too weak.
    Away,
    /// Live reading for display; `None` while unseen or stale.
    RssiUpdate(Option<i16>),
}

/// Result of a single tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evaluation {
    /// Events in emission order.
    pub events: Vec<PresenceEvent>,
    /// The sample the tick was computed from.
    pub sample: SignalSample,
}

impl Evaluation {
    /// Returns `true` if this tick fired AWAY.
    #[must_use]
    pub fn fired_away(&self) -> bool {
        self.events.contains(&PresenceEvent::Away)
    }

    /// Returns the RSSI of the NEAR event, if one fired.
    #[must_use]
    pub fn fired_near(&self) -> Option<i16> {
        self.events.iter().find_map(|event| match event {
            PresenceEvent::Near(rssi) => Some(*rssi),
            _ => None,
        })
    }
}

/// Why AWAY fired on a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AwayCause {
    Weak(Duration),
    Unseen(Duration),
}

/// The presence state machine for one monitored device.
#[derive(Debug, Clone)]
pub struct PresenceEvaluator {
    config: Arc<MonitorConfig>,
    tracker: SignalTracker,
    state: TrackerState,
}

impl PresenceEvaluator {
    /// Create an evaluator with empty tracking state.
    #[must_use]
    pub fn new(config: Arc<MonitorConfig>) -> Self {
        let tracker = SignalTracker::new(&config);
        Self {
            config,
            tracker,
            state: TrackerState::default(),
        }
    }

    /// The configuration currently in effect.
    #[must_use]
    pub fn config(&self) -> &Arc<MonitorConfig> {
        &self.config
    }

    /// Accumulated tracking state.
    #[must_use]
    pub const fn state(&self) -> &TrackerState {
        &self.state
    }

    /// Swap in a new configuration and forget everything tracked so far.
    ///
    /// Timers measured against the old thresholds must not leak into
    /// decisions made with the new ones.
    pub fn replace_config(&mut self, config: Arc<MonitorConfig>) {
        self.tracker = SignalTracker::new(&config);
        self.config = config;
        self.state.reset();
    }

    /// Feed a sighting from the advertisement source.
    pub fn on_detect(&mut self, detection: &Detection) -> bool {
        self.tracker.on_detect(&mut self.state, detection)
    }

    /// Run one evaluation tick at `now`.
    pub fn tick(&mut self, now: Instant) -> Evaluation {
        let sample = self.tracker.sample(&mut self.state, now);
        let mut events = Vec::with_capacity(2);
        let mut away = None;

        if let Some(since_last_seen) = sample.since_last_seen {
            match sample.rssi {
                Some(rssi) => {
                    if let Some(near) = self.update_near_debounce(rssi) {
                        events.push(PresenceEvent::Near(near));
                    }
                    away = self.update_weak_timer(rssi, now).map(AwayCause::Weak);
                }
                None => {
                    self.state.near_consecutive_count = 0;
                    if since_last_seen >= self.config.unseen_deadline() {
                        away = Some(AwayCause::Unseen(since_last_seen));
                    }
                }
            }
        }

        if let Some(cause) = away {
            self.log_away(cause);
            self.state.below_threshold_since = None;
            events.push(PresenceEvent::Away);
        }
        events.push(PresenceEvent::RssiUpdate(sample.rssi));

        Evaluation {
            events,
            sample,
        }
    }

    fn update_near_debounce(&mut self, rssi: i16) -> Option<i16> {
        let required = self.config.near_required();
        if rssi > self.config.near_trigger() {
            self.state.near_consecutive_count = self.state.near_consecutive_count.saturating_add(1);
        } else {
            self.state.near_consecutive_count = 0;
        }
        if self.state.near_consecutive_count >= required {
            self.state.near_consecutive_count = required;
            debug!(rssi, required, "Near condition met");
            return Some(rssi);
        }
        None
    }

    /// Returns how long the signal has been weak once that reaches the grace
    /// period.
    fn update_weak_timer(&mut self, rssi: i16, now: Instant) -> Option<Duration> {
        if rssi <= self.config.rssi_threshold {
            self.state.below_threshold_since.get_or_insert(now);
        } else if rssi > self.config.near_trigger() {
            self.state.below_threshold_since = None;
        }

        let since = self.state.below_threshold_since?;
        let weak_for = now.saturating_duration_since(since);
        (weak_for >= self.config.grace_period).then_some(weak_for)
    }

    fn log_away(&self, cause: AwayCause) {
        match cause {
            AwayCause::Weak(weak_for) => info!(
                threshold_dbm = self.config.rssi_threshold,
                weak_secs = weak_for.as_secs_f64(),
                grace_secs = self.config.grace_period.as_secs(),
                "Away condition met: RSSI stayed at or below threshold"
            ),
            AwayCause::Unseen(unseen_for) => info!(
                unseen_secs = unseen_for.as_secs_f64(),
                stale_after_secs = self.config.stale_after.as_secs(),
                unseen_grace_secs = self.config.unseen_grace.as_secs(),
                "Away condition met: device unseen"
            ),
        }
    }
}
