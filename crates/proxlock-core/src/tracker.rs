//! Signal tracking for the configured target device.
//!
//! The tracker keeps a live gauge, not an event log: sightings that arrive
//! between two ticks collapse into the most recent `(rssi, last_seen)` pair.

use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use crate::config::{MonitorConfig, TargetMatcher};
use crate::source::Detection;

/// Mutable state accumulated between ticks.
///
/// Owned by exactly one evaluator; reset whenever the configuration changes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackerState {
    /// When the target was last detected.
    pub last_seen: Option<Instant>,
    /// RSSI of the last detection, `None` once the reading went stale.
    pub last_rssi: Option<i16>,
    /// Start of the current run of weak readings while still detected.
    pub below_threshold_since: Option<Instant>,
    /// Consecutive ticks above the NEAR trigger.
    pub near_consecutive_count: u32,
}

impl TrackerState {
    /// Clear everything back to the never-seen state.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Current reading handed to the evaluator once per tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignalSample {
    /// Last RSSI, or `None` when unseen or stale.
    pub rssi: Option<i16>,
    /// Time since the last detection, `None` if never seen.
    pub since_last_seen: Option<Duration>,
}

impl SignalSample {
    /// Sample for a device that has never been detected.
    pub const NEVER_SEEN: Self = Self {
        rssi: None,
        since_last_seen: None,
    };
}

/// Attributes detections to the target and tracks their freshness.
#[derive(Debug, Clone)]
pub struct SignalTracker {
    matcher: TargetMatcher,
    stale_after: Duration,
}

impl SignalTracker {
    /// Build a tracker for the given configuration.
    #[must_use]
    pub fn new(config: &MonitorConfig) -> Self {
        Self {
            matcher: config.matcher(),
            stale_after: config.effective_stale_after(),
        }
    }

    /// Record a sighting if it belongs to the target.
    ///
    /// Returns `true` when the detection matched. Non-matching detections are
    /// ignored.
    pub fn on_detect(&self, state: &mut TrackerState, detection: &Detection) -> bool {
        if !self
            .matcher
            .matches(&detection.address, detection.name.as_deref())
        {
            return false;
        }
        state.last_seen = Some(detection.seen_at);
        state.last_rssi = Some(detection.rssi);
        debug!(
            address = %detection.address,
            name = detection.name.as_deref().unwrap_or(""),
            rssi = detection.rssi,
            "Detected target"
        );
        true
    }

    /// Read the current signal, invalidating it if it went stale.
    ///
    /// Invalidation is persistent: once nulled, the RSSI stays unknown until
    /// the device is detected again.
    pub fn sample(&self, state: &mut TrackerState, now: Instant) -> SignalSample {
        let Some(last_seen) = state.last_seen else {
            return SignalSample::NEVER_SEEN;
        };
        let since = now.saturating_duration_since(last_seen);
        if since > self.stale_after {
            if state.last_rssi.take().is_some() {
                debug!(
                    since_secs = since.as_secs_f64(),
                    "Target reading went stale"
                );
            }
            return SignalSample {
                rssi: None,
                since_last_seen: Some(since),
            };
        }
        SignalSample {
            rssi: state.last_rssi,
            since_last_seen: Some(since),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PHONE: &str = "AA:BB:CC:DD:EE:FF";

    fn detection(address: &str, name: Option<&str>, rssi: i16, seen_at: Instant) -> Detection {
        Detection {
            address: address.to_string(),
            name: name.map(str::to_string),
            rssi,
            seen_at,
        }
    }

    #[test]
    fn test_never_seen_sample_is_empty() {
        let tracker = SignalTracker::new(&MonitorConfig::for_address(PHONE));
        let mut state = TrackerState::default();
        assert_eq!(
            tracker.sample(&mut state, Instant::now()),
            SignalSample::NEVER_SEEN
        );
    }

    #[test]
    fn test_matching_detection_updates_state() {
        let tracker = SignalTracker::new(&MonitorConfig::for_address("aa:bb:cc:dd:ee:ff"));
        let mut state = TrackerState::default();
        let t0 = Instant::now();

        assert!(tracker.on_detect(&mut state, &detection(PHONE, None, -60, t0)));
        assert_eq!(state.last_seen, Some(t0));
        assert_eq!(state.last_rssi, Some(-60));

        assert!(!tracker.on_detect(
            &mut state,
            &detection("11:22:33:44:55:66", None, -40, t0)
        ));
        assert_eq!(state.last_rssi, Some(-60));
    }

    #[test]
    fn test_latest_detection_wins() {
        let tracker = SignalTracker::new(&MonitorConfig::for_address(PHONE));
        let mut state = TrackerState::default();
        let t0 = Instant::now();

        tracker.on_detect(&mut state, &detection(PHONE, None, -60, t0));
        tracker.on_detect(
            &mut state,
            &detection(PHONE, None, -80, t0 + Duration::from_millis(500)),
        );

        let sample = tracker.sample(&mut state, t0 + Duration::from_secs(1));
        assert_eq!(sample.rssi, Some(-80));
        assert_eq!(sample.since_last_seen, Some(Duration::from_millis(500)));
    }

    #[test]
    fn test_name_fallback_only_without_address() {
        let by_name = SignalTracker::new(&MonitorConfig::for_name("Pixel 8"));
        let mut state = TrackerState::default();
        let t0 = Instant::now();
        assert!(by_name.on_detect(
            &mut state,
            &detection("11:22:33:44:55:66", Some("pixel 8"), -50, t0)
        ));

        let config = MonitorConfig {
            target_name: Some("Pixel 8".into()),
            ..MonitorConfig::for_address(PHONE)
        };
        let by_address = SignalTracker::new(&config);
        let mut state = TrackerState::default();
        assert!(!by_address.on_detect(
            &mut state,
            &detection("11:22:33:44:55:66", Some("Pixel 8"), -50, t0)
        ));
    }

    #[test]
    fn test_inert_tracker_never_matches() {
        let tracker = SignalTracker::new(&MonitorConfig::default());
        let mut state = TrackerState::default();
        assert!(!tracker.on_detect(
            &mut state,
            &detection(PHONE, Some("Phone"), -40, Instant::now())
        ));
        assert_eq!(state, TrackerState::default());
    }

    #[test]
    fn test_stale_reading_is_invalidated() {
        let config = MonitorConfig {
            stale_after: Duration::from_secs(6),
            ..MonitorConfig::for_address(PHONE)
        };
        let tracker = SignalTracker::new(&config);
        let mut state = TrackerState::default();
        let t0 = Instant::now();
        tracker.on_detect(&mut state, &detection(PHONE, None, -60, t0));

        let fresh = tracker.sample(&mut state, t0 + Duration::from_secs(6));
        assert_eq!(fresh.rssi, Some(-60));

        let stale = tracker.sample(&mut state, t0 + Duration::from_secs(7));
        assert_eq!(stale.rssi, None);
        assert_eq!(stale.since_last_seen, Some(Duration::from_secs(7)));
        assert_eq!(state.last_rssi, None);
    }

    #[test]
    fn test_invalidation_persists_until_redetected() {
        let config = MonitorConfig {
            stale_after: Duration::from_secs(6),
            ..MonitorConfig::for_address(PHONE)
        };
        let tracker = SignalTracker::new(&config);
        let mut state = TrackerState::default();
        let t0 = Instant::now();
        tracker.on_detect(&mut state, &detection(PHONE, None, -60, t0));
        tracker.sample(&mut state, t0 + Duration::from_secs(7));

        // Even a sample that would be in range again keeps the reading unknown.
        state.last_seen = Some(t0 + Duration::from_secs(5));
        let sample = tracker.sample(&mut state, t0 + Duration::from_secs(8));
        assert_eq!(sample.rssi, None);

        tracker.on_detect(
            &mut state,
            &detection(PHONE, None, -65, t0 + Duration::from_secs(9)),
        );
        let sample = tracker.sample(&mut state, t0 + Duration::from_secs(9));
        assert_eq!(sample.rssi, Some(-65));
    }

    #[test]
    fn test_stale_after_has_one_second_floor() {
        let config = MonitorConfig {
            stale_after: Duration::ZERO,
            ..MonitorConfig::for_address(PHONE)
        };
        let tracker = SignalTracker::new(&config);
        let mut state = TrackerState::default();
        let t0 = Instant::now();
        tracker.on_detect(&mut state, &detection(PHONE, None, -60, t0));

        let sample = tracker.sample(&mut state, t0 + Duration::from_millis(900));
        assert_eq!(sample.rssi, Some(-60));
    }
}
