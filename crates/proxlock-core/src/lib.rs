//! # proxlock-core
//!
//! Presence detection for the proxlock workstation locker.
//!
//! This crate turns noisy, intermittent BLE RSSI readings of one device into
//! a stable NEAR / AWAY signal and tells the host when to lock or unlock.
//!
//! ## Architecture
//!
//! The crate is organized into the following modules, leaves first:
//!
//! - [`source`] - Advertisement sources (BlueZ scanner, in-process channel)
//! - [`tracker`] - Last sighting of the target device and staleness
//! - [`evaluator`] - The presence state machine: hysteresis, debounce, AWAY timers
//! - [`supervisor`] - Scan loop with reconnect backoff and log rate limiting
//! - [`monitor`] - The handle hosts use: start, stop, update configuration
//! - [`config`] - Monitor configuration and target matching
//! - [`error`] - Error types for the crate
//!
//! Data flows `source → tracker → evaluator → callbacks`; the host maps the
//! callbacks onto actual lock and unlock actions.

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod evaluator;
pub mod monitor;
pub mod source;
pub mod supervisor;
pub mod tracker;

// Re-export primary types for convenience
pub use config::{is_valid_mac_address, redact_address, MonitorConfig, TargetMatcher};
pub use error::{MonitorError, Result, SourceError};
pub use evaluator::{Evaluation, PresenceEvaluator, PresenceEvent};
pub use monitor::{PresenceCallbacks, ProximityMonitor, DEFAULT_STOP_TIMEOUT};
#[cfg(feature = "bluetooth")]
pub use source::BluezSource;
pub use source::{AdvertisementSource, ChannelSource, Detection, DetectionSender, DetectionStream};
pub use supervisor::{Backoff, ErrorLogLimiter};
pub use tracker::{SignalSample, SignalTracker, TrackerState};
