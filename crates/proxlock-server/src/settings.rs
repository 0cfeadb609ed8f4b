//! Daemon settings.
//!
//! Settings are layered with the `config` crate:
//!
//! 1. Built-in defaults ([`Settings::default`])
//! 2. A TOML file, either the path in `PROXLOCK_CONFIG` or
//!    `config.toml` in the platform config directory
//! 3. Environment variables prefixed with `PROXLOCK__`, for example
//!    `PROXLOCK__RSSI_THRESHOLD=-70`
//!
//! The daemon never writes the file back. Changes made over the API live
//! until the process exits.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use proxlock_core::{is_valid_mac_address, redact_address, MonitorConfig};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

/// Environment variable that points at the settings file.
pub const CONFIG_PATH_ENV: &str = "PROXLOCK_CONFIG";

/// Prefix for per-field environment overrides.
pub const ENV_PREFIX: &str = "PROXLOCK";

/// Fallback when the configured scan interval cannot be represented.
const DEFAULT_SCAN_INTERVAL: Duration = Duration::from_secs(2);

/// Errors raised while loading settings.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// The file or environment could not be read or parsed.
    #[error("Failed to load settings: {0}")]
    Load(#[from] config::ConfigError),

    /// `listen_addr` is not a socket address.
    #[error("Invalid listen address: {0}")]
    InvalidListenAddr(String),
}

/// Settings for the proxlock daemon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// MAC address of the device to follow.
    pub device_mac: Option<String>,

    /// Advertised name to match when no usable MAC is set.
    pub device_name: Option<String>,

    /// RSSI at or below which the device counts as far away, in dBm.
    pub rssi_threshold: i16,

    /// How long a weak signal must persist before AWAY, in seconds.
    pub grace_period_sec: u64,

    /// Extra silence tolerated on top of `stale_after_sec` before AWAY.
    pub unseen_grace_sec: u64,

    /// Margin above the threshold needed to count as NEAR, in dB.
    pub hysteresis_db: u8,

    /// Age after which the last RSSI reading is discarded, in seconds.
    pub stale_after_sec: u64,

    /// Seconds between evaluations.
    pub scan_interval_sec: f64,

    /// Consecutive strong evaluations needed before NEAR.
    pub near_consecutive_scans: u32,

    /// When false, AWAY never requests a lock.
    pub locking_enabled: bool,

    /// Seconds after an arrival during which lock requests are suppressed.
    pub re_lock_delay_sec: u64,

    /// Address the HTTP API binds to.
    pub listen_addr: String,

    /// BlueZ adapter name, for example `hci1`. Default adapter when unset.
    pub adapter: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            device_mac: None,
            device_name: None,
            rssi_threshold: -75,
            grace_period_sec: 15,
            unseen_grace_sec: 8,
            hysteresis_db: 5,
            stale_after_sec: 6,
            scan_interval_sec: 2.0,
            near_consecutive_scans: 2,
            locking_enabled: true,
            re_lock_delay_sec: 0,
            listen_addr: "127.0.0.1:7878".to_string(),
            adapter: None,
        }
    }
}

impl Settings {
    /// Load settings from `path`, or from the default location if `None`.
    ///
    /// A missing file is not an error; defaults and environment overrides
    /// still apply.
    ///
    /// # Errors
    ///
    /// Returns [`SettingsError::Load`] if the file exists but cannot be
    /// parsed, or an override has the wrong type.
    pub fn load(path: Option<&Path>) -> Result<Self, SettingsError> {
        let path = path.map(Path::to_path_buf).or_else(default_config_path);

        let mut builder = config::Config::builder();
        if let Some(path) = &path {
            debug!(path = %path.display(), "Reading settings file");
            builder = builder.add_source(config::File::from(path.as_path()).required(false));
        }

        let settings: Self = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        Ok(settings)
    }

    /// Load settings from the file named by `PROXLOCK_CONFIG`, if set.
    ///
    /// # Errors
    ///
    /// See [`Settings::load`].
    pub fn from_env() -> Result<Self, SettingsError> {
        let path = std::env::var_os(CONFIG_PATH_ENV).map(PathBuf::from);
        Self::load(path.as_deref())
    }

    /// Parsed `listen_addr`.
    ///
    /// # Errors
    ///
    /// Returns [`SettingsError::InvalidListenAddr`] if it does not parse.
    pub fn listen_addr(&self) -> Result<SocketAddr, SettingsError> {
        self.listen_addr
            .parse()
            .map_err(|_| SettingsError::InvalidListenAddr(self.listen_addr.clone()))
    }

    /// The device MAC, if it is set and well formed.
    ///
    /// A malformed MAC is logged and ignored so that name matching still
    /// works.
    #[must_use]
    pub fn valid_device_mac(&self) -> Option<String> {
        let mac = self.device_mac.as_deref().map(str::trim)?;
        if mac.is_empty() {
            return None;
        }
        if is_valid_mac_address(mac) {
            Some(mac.to_uppercase())
        } else {
            warn!(
                device = %redact_address(Some(mac)),
                "Ignoring malformed device MAC; falling back to name matching"
            );
            None
        }
    }

    /// Whether the settings name a device to follow.
    #[must_use]
    pub fn has_target(&self) -> bool {
        !self.monitor_config().matcher().is_inert()
    }

    /// Build the monitor configuration, clamped to safe ranges.
    #[must_use]
    pub fn monitor_config(&self) -> MonitorConfig {
        let scan_interval = Duration::try_from_secs_f64(self.scan_interval_sec.max(0.0))
            .unwrap_or(DEFAULT_SCAN_INTERVAL);

        MonitorConfig {
            target_address: self.valid_device_mac(),
            target_name: self
                .device_name
                .as_deref()
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(ToString::to_string),
            rssi_threshold: self.rssi_threshold,
            hysteresis_db: self.hysteresis_db,
            grace_period: Duration::from_secs(self.grace_period_sec),
            stale_after: Duration::from_secs(self.stale_after_sec),
            unseen_grace: Duration::from_secs(self.unseen_grace_sec),
            scan_interval,
            near_consecutive_required: self.near_consecutive_scans,
        }
        .sanitized()
    }

    /// Lock suppression window after an arrival.
    #[must_use]
    pub const fn re_lock_delay(&self) -> Duration {
        Duration::from_secs(self.re_lock_delay_sec)
    }
}

/// `config.toml` in the platform config directory.
fn default_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "proxlock")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    fn write_settings(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.rssi_threshold, -75);
        assert_eq!(settings.grace_period_sec, 15);
        assert_eq!(settings.hysteresis_db, 5);
        assert!(settings.locking_enabled);
        assert!(!settings.has_target());
    }

    #[test]
    fn test_load_from_file() {
        let file = write_settings(
            r#"
device_mac = "aa:bb:cc:dd:ee:ff"
rssi_threshold = -68
grace_period_sec = 30
scan_interval_sec = 1.5
locking_enabled = false
"#,
        );

        let settings = Settings::load(Some(file.path())).unwrap();
        assert_eq!(settings.device_mac.as_deref(), Some("aa:bb:cc:dd:ee:ff"));
        assert_eq!(settings.rssi_threshold, -68);
        assert_eq!(settings.grace_period_sec, 30);
        assert!(!settings.locking_enabled);
        // Unset fields keep their defaults
        assert_eq!(settings.stale_after_sec, 6);

        let config = settings.monitor_config();
        assert_eq!(config.target_address.as_deref(), Some("AA:BB:CC:DD:EE:FF"));
        assert_eq!(config.scan_interval, Duration::from_millis(1500));
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::load(Some(&dir.path().join("absent.toml"))).unwrap();
        assert_eq!(settings.listen_addr, Settings::default().listen_addr);
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let file = write_settings("rssi_threshold = \"loud\"\n");
        assert!(matches!(
            Settings::load(Some(file.path())),
            Err(SettingsError::Load(_))
        ));
    }

    #[test]
    fn test_environment_overrides_file() {
        let file = write_settings("re_lock_delay_sec = 5\n");
        std::env::set_var("PROXLOCK__RE_LOCK_DELAY_SEC", "42");
        let settings = Settings::load(Some(file.path()));
        std::env::remove_var("PROXLOCK__RE_LOCK_DELAY_SEC");

        assert_eq!(settings.unwrap().re_lock_delay(), Duration::from_secs(42));
    }

    #[test]
    fn test_invalid_mac_falls_back_to_name() {
        let settings = Settings {
            device_mac: Some("not-a-mac".to_string()),
            device_name: Some("  Pixel 8 ".to_string()),
            ..Settings::default()
        };

        let config = settings.monitor_config();
        assert_eq!(config.target_address, None);
        assert_eq!(config.target_name.as_deref(), Some("Pixel 8"));
        assert!(settings.has_target());
    }

    #[test]
    fn test_monitor_config_is_clamped() {
        let settings = Settings {
            device_mac: Some("AA:BB:CC:DD:EE:FF".to_string()),
            rssi_threshold: 10,
            grace_period_sec: 10_000,
            scan_interval_sec: 0.1,
            near_consecutive_scans: 0,
            ..Settings::default()
        };

        let config = settings.monitor_config();
        assert_eq!(config.rssi_threshold, -20);
        assert_eq!(config.grace_period, Duration::from_secs(600));
        assert_eq!(config.effective_scan_interval(), Duration::from_secs(1));
        assert_eq!(config.near_required(), 1);
    }

    #[test]
    fn test_non_finite_scan_interval_uses_fallback() {
        let settings = Settings {
            scan_interval_sec: f64::INFINITY,
            ..Settings::default()
        };
        assert_eq!(settings.monitor_config().scan_interval, DEFAULT_SCAN_INTERVAL);
    }

    #[test]
    fn test_listen_addr() {
        let mut settings = Settings::default();
        assert_eq!(settings.listen_addr().unwrap().port(), 7878);

        settings.listen_addr = "localhost".to_string();
        assert!(matches!(
            settings.listen_addr(),
            Err(SettingsError::InvalidListenAddr(_))
        ));
    }
}
