//! Error types for the proxlock core library.
//!
//! Two families of failure exist inside the core:
//!
//! - [`SourceError`]: the advertisement source (BLE adapter, BlueZ, D-Bus)
//!   failed to open or broke while streaming. These are always retryable and
//!   never leave the scan supervisor; they only show up in logs.
//! - [`MonitorError`]: failures of the monitor handle itself, reported to the
//!   host that called [`stop`](crate::ProximityMonitor::stop).
//!
//! # Example
//!
//! ```rust
//! use proxlock_core::error::SourceError;
//!
//! let err = SourceError::AdapterPoweredOff;
//! assert!(err.is_retryable());
//! assert_eq!(err.error_code(), "ADAPTER_POWERED_OFF");
//! ```

use std::time::Duration;

use thiserror::Error;

/// Failure of an [`AdvertisementSource`](crate::AdvertisementSource).
#[derive(Debug, Error)]
pub enum SourceError {
    // =========================================================================
    // ADAPTER ERRORS
    // =========================================================================
    /// No Bluetooth adapter was found on this system.
    #[error(
        "No Bluetooth adapter found. Ensure Bluetooth hardware is present and drivers are loaded."
    )]
    AdapterNotFound,

    /// The Bluetooth adapter exists but is powered off.
    #[error("Bluetooth adapter is powered off. Run 'bluetoothctl power on' to enable.")]
    AdapterPoweredOff,

    /// The process is not allowed to talk to the Bluetooth daemon.
    #[error("Permission denied while accessing Bluetooth: {0}")]
    PermissionDenied(String),

    // =========================================================================
    // TRANSPORT ERRORS
    // =========================================================================
    /// A D-Bus or OS level error from the Bluetooth stack.
    #[error("Bluetooth transport error: {0}")]
    Transport(String),

    /// The detection stream ended while the scanner was expected to run.
    #[error("Advertisement stream closed unexpectedly")]
    StreamClosed,

    /// A scripted failure from a test or channel-backed source.
    #[error("Advertisement source failure: {0}")]
    Injected(String),
}

impl SourceError {
    /// Returns `true` if the supervisor should retry after this error.
    ///
    /// Adapter-off, permission and bus errors all clear up on their own
    /// (the user toggles Bluetooth, bluetoothd restarts), so every variant
    /// is retryable. Only an explicit stop ends the scan loop.
    #[inline]
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        true
    }

    /// Returns `true` if the adapter itself is missing or disabled.
    #[inline]
    #[must_use]
    pub const fn is_adapter_error(&self) -> bool {
        matches!(self, Self::AdapterNotFound | Self::AdapterPoweredOff)
    }

    /// Returns a machine-readable error code for logs and API responses.
    #[inline]
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::AdapterNotFound => "ADAPTER_NOT_FOUND",
            Self::AdapterPoweredOff => "ADAPTER_POWERED_OFF",
            Self::PermissionDenied(_) => "PERMISSION_DENIED",
            Self::Transport(_) => "TRANSPORT_ERROR",
            Self::StreamClosed => "STREAM_CLOSED",
            Self::Injected(_) => "INJECTED_FAILURE",
        }
    }
}

#[cfg(feature = "bluetooth")]
impl From<bluer::Error> for SourceError {
    fn from(err: bluer::Error) -> Self {
        use bluer::ErrorKind;
        match err.kind {
            ErrorKind::NotReady => Self::AdapterPoweredOff,
            ErrorKind::NotAuthorized | ErrorKind::NotPermitted => {
                Self::PermissionDenied(err.message)
            }
            ErrorKind::NotFound => Self::AdapterNotFound,
            _ => Self::Transport(err.to_string()),
        }
    }
}

/// Failure of the [`ProximityMonitor`](crate::ProximityMonitor) handle.
#[derive(Debug, Error)]
pub enum MonitorError {
    /// The scan loop did not confirm shutdown in time and was aborted.
    #[error("Monitor did not stop within {}s; scan task aborted", .0.as_secs())]
    StopTimeout(Duration),

    /// The scan task panicked or was cancelled before it could confirm.
    #[error("Monitor task failed: {0}")]
    TaskFailed(String),
}

impl MonitorError {
    /// Returns a machine-readable error code for API responses.
    #[inline]
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::StopTimeout(_) => "STOP_TIMEOUT",
            Self::TaskFailed(_) => "TASK_FAILED",
        }
    }
}

/// A specialized [`Result`] type for monitor operations.
pub type Result<T> = std::result::Result<T, MonitorError>;
