//! Scan supervision.
//!
//! The supervisor is the single long-lived task behind a running monitor. It
//! keeps the advertisement source open, feeds sightings to the evaluator,
//! ticks the evaluator every scan interval and reopens the source with
//! exponential backoff whenever it fails. Detections and ticks are handled on
//! this one task, so the tracker state never needs a lock.
//!
//! ```text
//!            start ok                      stop requested
//!  Opening ───────────► Streaming ──────────────────────────► Stopped
//!     ▲                    │
//!     │   backoff sleep    │ open/read error
//!     └────────────────────┘
//! ```

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt as _;
use tokio::sync::watch;
use tokio::time::{sleep, sleep_until, Instant};
use tracing::{debug, info, warn};

use crate::config::{redact_address, MonitorConfig};
use crate::error::SourceError;
use crate::evaluator::PresenceEvaluator;
use crate::monitor::PresenceCallbacks;
use crate::source::AdvertisementSource;

/// First reconnect delay after a failure.
pub const INITIAL_BACKOFF: Duration = Duration::from_secs(1);

/// Longest reconnect delay.
pub const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Consecutive failures logged at WARN before dropping to DEBUG.
pub const WARN_LIMIT: u32 = 3;

/// Doubling reconnect delay between [`INITIAL_BACKOFF`] and [`MAX_BACKOFF`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    current: Duration,
    floor: Duration,
    ceiling: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(INITIAL_BACKOFF, MAX_BACKOFF)
    }
}

impl Backoff {
    /// Create a backoff that starts at `floor` and never exceeds `ceiling`.
    #[must_use]
    pub const fn new(floor: Duration, ceiling: Duration) -> Self {
        Self {
            current: floor,
            floor,
            ceiling,
        }
    }

    /// Delay the next failure will wait.
    #[must_use]
    pub const fn current(&self) -> Duration {
        self.current
    }

    /// Return the delay to wait now and double it for next time.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.current.saturating_mul(2).min(self.ceiling);
        delay
    }

    /// Go back to the floor after a successful open.
    pub fn reset(&mut self) {
        self.current = self.floor;
    }
}

/// Keeps repeated adapter errors from flooding the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorLogLimiter {
    consecutive: u32,
    limit: u32,
}

impl Default for ErrorLogLimiter {
    fn default() -> Self {
        Self::new(WARN_LIMIT)
    }
}

impl ErrorLogLimiter {
    /// Allow `limit` warnings per run of consecutive failures.
    #[must_use]
    pub const fn new(limit: u32) -> Self {
        Self {
            consecutive: 0,
            limit,
        }
    }

    /// Count a failure. Returns `true` if it should be logged as a warning.
    pub fn record(&mut self) -> bool {
        self.consecutive = self.consecutive.saturating_add(1);
        self.consecutive <= self.limit
    }

    /// Consecutive failures seen so far.
    #[must_use]
    pub const fn consecutive(&self) -> u32 {
        self.consecutive
    }

    /// Forget earlier failures after the source opened successfully.
    pub fn reset(&mut self) {
        self.consecutive = 0;
    }
}

/// Why a streaming session ended without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionEnd {
    StopRequested,
}

/// Drives one monitor's scan loop.
pub(crate) struct Supervisor {
    evaluator: PresenceEvaluator,
    config_rx: watch::Receiver<Arc<MonitorConfig>>,
    shutdown: watch::Receiver<bool>,
    callbacks: Arc<PresenceCallbacks>,
    backoff: Backoff,
    errors: ErrorLogLimiter,
}

impl Supervisor {
    pub(crate) fn new(
        mut config_rx: watch::Receiver<Arc<MonitorConfig>>,
        shutdown: watch::Receiver<bool>,
        callbacks: Arc<PresenceCallbacks>,
    ) -> Self {
        let config = Arc::clone(&config_rx.borrow_and_update());
        Self {
            evaluator: PresenceEvaluator::new(config),
            config_rx,
            shutdown,
            callbacks,
            backoff: Backoff::default(),
            errors: ErrorLogLimiter::default(),
        }
    }

    /// Run until a stop is requested. Never returns an error: every source
    /// failure is logged and retried.
    pub(crate) async fn run<S: AdvertisementSource + ?Sized>(mut self, source: &mut S) {
        {
            let config = self.evaluator.config();
            info!(
                device = %redact_address(config.target_address.as_deref()),
                name = config.target_name.as_deref().unwrap_or(""),
                threshold_dbm = config.rssi_threshold,
                "BLE scan loop starting"
            );
            debug!(
                device = config.target_address.as_deref().unwrap_or(""),
                "BLE scan loop starting (full address)"
            );
        }

        while !self.stop_requested() {
            let outcome = self.run_session(source).await;

            debug!(source = source.describe(), "Stopping BLE scanner");
            if let Err(err) = source.stop().await {
                warn!(error = %err, "Error while stopping BLE scanner");
            }

            match outcome {
                Ok(SessionEnd::StopRequested) => break,
                Err(err) => {
                    let delay = self.backoff.next_delay();
                    if self.errors.record() {
                        if err.is_adapter_error() {
                            warn!(
                                error = %err,
                                code = err.error_code(),
                                retry_in_secs = delay.as_secs_f64(),
                                "Bluetooth adapter unavailable; waiting for it to return"
                            );
                        } else {
                            warn!(
                                error = %err,
                                code = err.error_code(),
                                retry_in_secs = delay.as_secs_f64(),
                                "BLE scanner error; retrying"
                            );
                        }
                    } else {
                        debug!(
                            error = ?err,
                            consecutive = self.errors.consecutive(),
                            retry_in_secs = delay.as_secs_f64(),
                            "BLE scanner error (suppressed to DEBUG); retrying"
                        );
                    }
                    if !self.sleep_unless_stopped(delay).await {
                        break;
                    }
                }
            }
        }
        info!("BLE scan loop stopped");
    }

    async fn run_session<S: AdvertisementSource + ?Sized>(
        &mut self,
        source: &mut S,
    ) -> Result<SessionEnd, SourceError> {
        let mut stream = source.start().await?;
        self.backoff.reset();
        self.errors.reset();
        debug!(source = source.describe(), "BLE scanner started");

        let mut shutdown = self.shutdown.clone();
        let mut next_tick = Instant::now();

        loop {
            if self.stop_requested() {
                return Ok(SessionEnd::StopRequested);
            }

            tokio::select! {
                biased;

                _ = shutdown.changed() => {
                    return Ok(SessionEnd::StopRequested);
                }
                item = stream.next() => match item {
                    Some(Ok(detection)) => {
                        self.apply_config_change();
                        self.evaluator.on_detect(&detection);
                    }
                    Some(Err(err)) => return Err(err),
                    None => return Err(SourceError::StreamClosed),
                },
                () = sleep_until(next_tick) => {
                    next_tick = self.tick();
                }
            }
        }
    }

    /// Evaluate once and return when the next tick is due.
    ///
    /// After AWAY the next tick waits an extra grace period so the weak
    /// signal does not fire AWAY again on every tick. Sightings are still
    /// consumed during that time.
    fn tick(&mut self) -> Instant {
        self.apply_config_change();
        let now = Instant::now();
        let evaluation = self.evaluator.tick(now);
        for event in &evaluation.events {
            self.callbacks.dispatch(*event);
        }

        let config = self.evaluator.config();
        let interval = config.effective_scan_interval();
        if evaluation.fired_away() {
            debug!(
                cooldown_secs = config.grace_period.as_secs(),
                "Away fired; cooling down"
            );
            now + config.grace_period + interval
        } else {
            now + interval
        }
    }

    /// Pick up a replaced configuration at a tick boundary.
    fn apply_config_change(&mut self) {
        if !self.config_rx.has_changed().unwrap_or(false) {
            return;
        }
        let config = Arc::clone(&self.config_rx.borrow_and_update());
        debug!(
            device = config.target_address.as_deref().unwrap_or(""),
            "Applying new monitor configuration; tracker reset"
        );
        self.evaluator.replace_config(config);
    }

    fn stop_requested(&self) -> bool {
        *self.shutdown.borrow() || self.shutdown.has_changed().is_err()
    }

    /// Sleep for `duration`. Returns `false` if a stop arrived meanwhile.
    async fn sleep_unless_stopped(&mut self, duration: Duration) -> bool {
        let mut shutdown = self.shutdown.clone();
        tokio::select! {
            biased;
            _ = shutdown.changed() => false,
            () = sleep(duration) => !self.stop_requested(),
        }
    }
}
