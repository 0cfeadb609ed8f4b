//! Monitor configuration.
//!
//! [`MonitorConfig`] is the single, fully populated value the presence logic
//! runs against. Hosts load and default their own settings and hand over a
//! finished value; the core only clamps out-of-range numbers via
//! [`MonitorConfig::sanitized`] so that a bad value never crashes a
//! background monitor.

use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;

/// Lowest accepted RSSI threshold in dBm.
pub const MIN_RSSI_THRESHOLD: i16 = -120;

/// Highest accepted RSSI threshold in dBm.
pub const MAX_RSSI_THRESHOLD: i16 = -20;

/// Longest accepted grace period.
pub const MAX_GRACE_PERIOD: Duration = Duration::from_secs(600);

/// Shortest scan interval the supervisor will run at.
pub const MIN_SCAN_INTERVAL: Duration = Duration::from_secs(1);

/// Floor applied to `stale_after` when sampling the tracker.
pub const MIN_STALE_AFTER: Duration = Duration::from_secs(1);

static MAC_ADDRESS_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[0-9A-Fa-f]{2}(:[0-9A-Fa-f]{2}){5}$").expect("MAC address regex is valid")
});

/// Runtime configuration for the proximity monitor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorConfig {
    /// Bluetooth MAC address of the tracked device. Preferred matcher.
    pub target_address: Option<String>,

    /// Advertised device name. Only consulted when no address is set.
    pub target_name: Option<String>,

    /// RSSI boundary in dBm. Readings at or below it count as weak.
    pub rssi_threshold: i16,

    /// Extra margin above the threshold required to call NEAR.
    pub hysteresis_db: u8,

    /// How long the signal must stay weak (while detected) before AWAY.
    pub grace_period: Duration,

    /// Time since the last sighting after which the RSSI is unknown.
    pub stale_after: Duration,

    /// Additional silence after staleness before AWAY fires.
    pub unseen_grace: Duration,

    /// Delay between evaluator ticks.
    pub scan_interval: Duration,

    /// Consecutive qualifying ticks before a NEAR event fires.
    pub near_consecutive_required: u32,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            target_address: None,
            target_name: None,
            rssi_threshold: -75,
            hysteresis_db: 5,
            grace_period: Duration::from_secs(15),
            stale_after: Duration::from_secs(6),
            unseen_grace: Duration::from_secs(8),
            scan_interval: Duration::from_secs(2),
            near_consecutive_required: 2,
        }
    }
}

impl MonitorConfig {
    /// Create a configuration tracking `address` with default timings.
    #[must_use]
    pub fn for_address(address: impl Into<String>) -> Self {
        Self {
            target_address: Some(address.into()),
            ..Self::default()
        }
    }

    /// Create a configuration tracking a device by advertised name.
    #[must_use]
    pub fn for_name(name: impl Into<String>) -> Self {
        Self {
            target_name: Some(name.into()),
            ..Self::default()
        }
    }

    /// Clamp every field into its documented safe range.
    ///
    /// Blank target strings become `None`.
    #[must_use]
    pub fn sanitized(mut self) -> Self {
        self.target_address = non_blank(self.target_address);
        self.target_name = non_blank(self.target_name);
        self.rssi_threshold = self
            .rssi_threshold
            .clamp(MIN_RSSI_THRESHOLD, MAX_RSSI_THRESHOLD);
        self.grace_period = self.grace_period.min(MAX_GRACE_PERIOD);
        self.scan_interval = self.scan_interval.max(MIN_SCAN_INTERVAL);
        self.near_consecutive_required = self.near_consecutive_required.max(1);
        self
    }

    /// The active matching strategy.
    #[must_use]
    pub fn matcher(&self) -> TargetMatcher {
        let address = self.target_address.as_deref().map(str::trim).unwrap_or("");
        if !address.is_empty() {
            return TargetMatcher::Address(address.to_ascii_uppercase());
        }
        let name = self.target_name.as_deref().map(str::trim).unwrap_or("");
        if !name.is_empty() {
            return TargetMatcher::Name(name.to_lowercase());
        }
        TargetMatcher::Inert
    }

    /// RSSI that must be strictly exceeded to count towards NEAR.
    #[inline]
    #[must_use]
    pub fn near_trigger(&self) -> i16 {
        self.rssi_threshold.saturating_add(i16::from(self.hysteresis_db))
    }

    /// `stale_after` with its one second floor applied.
    #[inline]
    #[must_use]
    pub fn effective_stale_after(&self) -> Duration {
        self.stale_after.max(MIN_STALE_AFTER)
    }

    /// Silence after the last sighting that triggers AWAY.
    #[inline]
    #[must_use]
    pub fn unseen_deadline(&self) -> Duration {
        self.stale_after.saturating_add(self.unseen_grace)
    }

    /// Scan interval with its one second floor applied.
    #[inline]
    #[must_use]
    pub fn effective_scan_interval(&self) -> Duration {
        self.scan_interval.max(MIN_SCAN_INTERVAL)
    }

    /// Debounce requirement, never below one.
    #[inline]
    #[must_use]
    pub fn near_required(&self) -> u32 {
        self.near_consecutive_required.max(1)
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// How detections are attributed to the tracked device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetMatcher {
    /// Match on the Bluetooth address (stored upper-case).
    Address(String),
    /// Match on the advertised name (stored lower-case).
    Name(String),
    /// Nothing configured; never matches.
    Inert,
}

impl TargetMatcher {
    /// Returns `true` if the sighting belongs to the tracked device.
    ///
    /// Both comparisons are exact and case-insensitive. The name is only
    /// used when no address is configured.
    #[must_use]
    pub fn matches(&self, address: &str, name: Option<&str>) -> bool {
        match self {
            Self::Address(target) => address.trim().eq_ignore_ascii_case(target),
            Self::Name(target) => name
                .map(str::trim)
                .filter(|n| !n.is_empty())
                .is_some_and(|n| n.to_lowercase() == *target),
            Self::Inert => false,
        }
    }

    /// Returns `true` if no target is configured.
    #[must_use]
    pub const fn is_inert(&self) -> bool {
        matches!(self, Self::Inert)
    }
}

/// Validate a colon separated Bluetooth MAC address (`AA:BB:CC:DD:EE:FF`).
#[must_use]
pub fn is_valid_mac_address(address: &str) -> bool {
    MAC_ADDRESS_RE.is_match(address)
}

/// Partially redact an address for INFO level logs, e.g. `AA:BB:..:..:EE:FF`.
///
/// Returns `<none>` for a missing or empty address and `<redacted>` when the
/// input does not contain at least twelve hex digits.
#[must_use]
pub fn redact_address(address: Option<&str>) -> String {
    let Some(address) = address.filter(|a| !a.trim().is_empty()) else {
        return "<none>".to_string();
    };
    let digits: String = address
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_uppercase())
        .collect();
    if digits.len() < 12 {
        return "<redacted>".to_string();
    }
    let tail = &digits[digits.len() - 4..];
    format!(
        "{}:{}:..:..:{}:{}",
        &digits[0..2],
        &digits[2..4],
        &tail[0..2],
        &tail[2..4]
    )
}
