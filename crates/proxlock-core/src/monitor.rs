//! The proximity monitor handle.
//!
//! [`ProximityMonitor`] owns an advertisement source, a replaceable
//! configuration and the host's callbacks. Starting it spawns the scan
//! supervisor on the current tokio runtime; stopping it is a request followed
//! by a bounded wait for the supervisor to confirm that the source has been
//! released.
//!
//! # Example
//!
//! ```rust,no_run
//! use proxlock_core::{ChannelSource, MonitorConfig, PresenceCallbacks, ProximityMonitor};
//!
//! # async fn run() -> proxlock_core::error::Result<()> {
//! let (source, _sender) = ChannelSource::new();
//! let callbacks = PresenceCallbacks::new()
//!     .on_away(|| println!("locking"))
//!     .on_near(|rssi| println!("near at {rssi} dBm"));
//! let monitor = ProximityMonitor::new(
//!     source,
//!     MonitorConfig::for_address("AA:BB:CC:DD:EE:FF"),
//!     callbacks,
//! );
//! monitor.start();
//! // ...
//! monitor.stop().await?;
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::{watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::{redact_address, MonitorConfig};
use crate::error::{MonitorError, Result};
use crate::evaluator::PresenceEvent;
use crate::source::AdvertisementSource;
use crate::supervisor::Supervisor;

/// How long [`ProximityMonitor::stop`] waits for the scan loop to exit.
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(5);

type NearFn = dyn Fn(i16) + Send + Sync;
type AwayFn = dyn Fn() + Send + Sync;
type RssiFn = dyn Fn(Option<i16>) + Send + Sync;

/// Host callbacks invoked by the scan loop.
///
/// Every callback is optional. A panicking callback is logged and skipped;
/// it never stops the scan loop.
#[derive(Clone, Default)]
pub struct PresenceCallbacks {
    on_near: Option<Arc<NearFn>>,
    on_away: Option<Arc<AwayFn>>,
    on_rssi: Option<Arc<RssiFn>>,
}

impl PresenceCallbacks {
    /// Callbacks that ignore every event.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Called with the current RSSI on every tick that satisfies NEAR.
    #[must_use]
    pub fn on_near(mut self, f: impl Fn(i16) + Send + Sync + 'static) -> Self {
        self.on_near = Some(Arc::new(f));
        self
    }

    /// Called when the device is judged to be away.
    #[must_use]
    pub fn on_away(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_away = Some(Arc::new(f));
        self
    }

    /// Called on every tick with the live RSSI, `None` when unknown.
    #[must_use]
    pub fn on_rssi(mut self, f: impl Fn(Option<i16>) + Send + Sync + 'static) -> Self {
        self.on_rssi = Some(Arc::new(f));
        self
    }

    /// Deliver one event to its callback, isolating panics.
    pub fn dispatch(&self, event: PresenceEvent) {
        let (name, outcome) = match event {
            PresenceEvent::Near(rssi) => (
                "on_near",
                self.on_near
                    .as_ref()
                    .map(|f| catch_unwind(AssertUnwindSafe(|| f(rssi)))),
            ),
            PresenceEvent::Away => (
                "on_away",
                self.on_away
                    .as_ref()
                    .map(|f| catch_unwind(AssertUnwindSafe(|| f()))),
            ),
            PresenceEvent::RssiUpdate(rssi) => (
                "on_rssi",
                self.on_rssi
                    .as_ref()
                    .map(|f| catch_unwind(AssertUnwindSafe(|| f(rssi)))),
            ),
        };
        if let Some(Err(panic)) = outcome {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| (*s).to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            error!(callback = name, %message, "{name} callback failed");
        }
    }
}

impl fmt::Debug for PresenceCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PresenceCallbacks")
            .field("on_near", &self.on_near.is_some())
            .field("on_away", &self.on_away.is_some())
            .field("on_rssi", &self.on_rssi.is_some())
            .finish()
    }
}

struct RunningTask {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// BLE proximity monitor for a single target device.
pub struct ProximityMonitor<S: AdvertisementSource + 'static> {
    source: Arc<AsyncMutex<S>>,
    config_tx: watch::Sender<Arc<MonitorConfig>>,
    callbacks: Arc<PresenceCallbacks>,
    task: Mutex<Option<RunningTask>>,
    stop_timeout: Duration,
}

impl<S: AdvertisementSource + 'static> ProximityMonitor<S> {
    /// Create a stopped monitor.
    pub fn new(source: S, config: MonitorConfig, callbacks: PresenceCallbacks) -> Self {
        let config = Arc::new(config.sanitized());
        debug!(
            device = config.target_address.as_deref().unwrap_or(""),
            threshold_dbm = config.rssi_threshold,
            grace_secs = config.grace_period.as_secs(),
            interval_secs = config.scan_interval.as_secs_f64(),
            "ProximityMonitor created"
        );
        let (config_tx, _) = watch::channel(config);
        Self {
            source: Arc::new(AsyncMutex::new(source)),
            config_tx,
            callbacks: Arc::new(callbacks),
            task: Mutex::new(None),
            stop_timeout: DEFAULT_STOP_TIMEOUT,
        }
    }

    /// Override how long [`stop`](Self::stop) waits for confirmation.
    #[must_use]
    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    /// Start scanning. Does nothing if already running.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a tokio runtime.
    pub fn start(&self) {
        let mut task = self.task.lock().unwrap_or_else(PoisonError::into_inner);
        if task.as_ref().is_some_and(|t| !t.handle.is_finished()) {
            debug!("ProximityMonitor already running");
            return;
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let supervisor = Supervisor::new(
            self.config_tx.subscribe(),
            shutdown_rx,
            Arc::clone(&self.callbacks),
        );
        let source = Arc::clone(&self.source);
        let handle = tokio::spawn(async move {
            let mut source = source.lock().await;
            supervisor.run(&mut *source).await;
        });

        *task = Some(RunningTask {
            shutdown: shutdown_tx,
            handle,
        });
        info!("ProximityMonitor started");
    }

    /// Request the scan loop to exit and wait for it to confirm.
    ///
    /// Does nothing if the monitor is not running.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::StopTimeout`] if the loop did not exit in time
    /// (the task is then aborted), or [`MonitorError::TaskFailed`] if it
    /// panicked.
    pub async fn stop(&self) -> Result<()> {
        let task = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(RunningTask {
            shutdown,
            mut handle,
        }) = task
        else {
            return Ok(());
        };

        let _ = shutdown.send(true);
        match tokio::time::timeout(self.stop_timeout, &mut handle).await {
            Ok(Ok(())) => {
                info!("ProximityMonitor stopped");
                Ok(())
            }
            Ok(Err(err)) => {
                error!(error = %err, "ProximityMonitor task failed");
                Err(MonitorError::TaskFailed(err.to_string()))
            }
            Err(_) => {
                handle.abort();
                warn!(
                    timeout_secs = self.stop_timeout.as_secs(),
                    "ProximityMonitor did not stop in time; aborted"
                );
                Err(MonitorError::StopTimeout(self.stop_timeout))
            }
        }
    }

    /// Replace the configuration.
    ///
    /// The running loop picks it up at the next tick boundary and starts over
    /// with empty tracking state.
    pub fn update_config(&self, config: MonitorConfig) {
        let config = Arc::new(config.sanitized());
        info!(
            device = %redact_address(config.target_address.as_deref()),
            threshold_dbm = config.rssi_threshold,
            grace_secs = config.grace_period.as_secs(),
            "Monitor config updated"
        );
        debug!(
            device = config.target_address.as_deref().unwrap_or(""),
            "Monitor config updated (full address)"
        );
        self.config_tx.send_replace(config);
    }

    /// The configuration currently in effect.
    #[must_use]
    pub fn config(&self) -> Arc<MonitorConfig> {
        Arc::clone(&self.config_tx.borrow())
    }

    /// Returns `true` while the scan loop is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|t| !t.handle.is_finished())
    }
}

impl<S: AdvertisementSource + 'static> fmt::Debug for ProximityMonitor<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProximityMonitor")
            .field("config", &*self.config_tx.borrow())
            .field("callbacks", &self.callbacks)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tokio::time::sleep;
    use tokio_test::{assert_err, assert_ok};

    use super::*;
    use crate::error::SourceError;
    use crate::source::ChannelSource;

    const PHONE: &str = "AA:BB:CC:DD:EE:FF";

    #[derive(Default)]
    struct Counters {
        near: AtomicUsize,
        away: AtomicUsize,
        rssi: AtomicUsize,
    }

    fn counting_callbacks(counters: &Arc<Counters>) -> PresenceCallbacks {
        let near = Arc::clone(counters);
        let away = Arc::clone(counters);
        let rssi = Arc::clone(counters);
        PresenceCallbacks::new()
            .on_near(move |_| {
                near.near.fetch_add(1, Ordering::SeqCst);
            })
            .on_away(move || {
                away.away.fetch_add(1, Ordering::SeqCst);
            })
            .on_rssi(move |_| {
                rssi.rssi.fetch_add(1, Ordering::SeqCst);
            })
    }

    fn config() -> MonitorConfig {
        MonitorConfig {
            scan_interval: Duration::from_secs(2),
            near_consecutive_required: 1,
            ..MonitorConfig::for_address(PHONE)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_is_idempotent() {
        let (source, sender) = ChannelSource::new();
        let monitor = ProximityMonitor::new(source, config(), PresenceCallbacks::new());

        monitor.start();
        monitor.start();
        sleep(Duration::from_millis(100)).await;

        assert!(monitor.is_running());
        assert_eq!(sender.start_count(), 1);
        assert_ok!(monitor.stop().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_releases_source_and_is_idempotent() {
        let (source, sender) = ChannelSource::new();
        let monitor = ProximityMonitor::new(source, config(), PresenceCallbacks::new());

        assert_ok!(monitor.stop().await);
        assert_eq!(sender.stop_count(), 0);

        monitor.start();
        sleep(Duration::from_millis(100)).await;
        assert_ok!(monitor.stop().await);
        assert!(!monitor.is_running());
        assert_eq!(sender.stop_count(), 1);

        assert_ok!(monitor.stop().await);

        // Restarting reuses the same source.
        monitor.start();
        sleep(Duration::from_millis(100)).await;
        assert_eq!(sender.start_count(), 2);
        assert_ok!(monitor.stop().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_near_and_rssi_callbacks_fire() {
        let (source, sender) = ChannelSource::new();
        let counters = Arc::new(Counters::default());
        let monitor = ProximityMonitor::new(source, config(), counting_callbacks(&counters));

        monitor.start();
        assert!(sender.detect(PHONE, None, -50).await);
        sleep(Duration::from_millis(500)).await;

        assert_eq!(counters.near.load(Ordering::SeqCst), 1);
        assert_eq!(counters.rssi.load(Ordering::SeqCst), 1);
        assert_eq!(counters.away.load(Ordering::SeqCst), 0);
        assert_ok!(monitor.stop().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_silence_fires_away_then_cools_down() {
        let (source, sender) = ChannelSource::new();
        let counters = Arc::new(Counters::default());
        let monitor = ProximityMonitor::new(source, config(), counting_callbacks(&counters));

        monitor.start();
        assert!(sender.detect(PHONE, None, -60).await);

        // Ticks run every 2s; unseen deadline is 6s + 8s.
        sleep(Duration::from_secs(13)).await;
        assert_eq!(counters.away.load(Ordering::SeqCst), 0);
        sleep(Duration::from_secs(2)).await;
        assert_eq!(counters.away.load(Ordering::SeqCst), 1);

        // Next tick waits grace (15s) plus the interval.
        sleep(Duration::from_secs(15)).await;
        assert_eq!(counters.away.load(Ordering::SeqCst), 1);
        sleep(Duration::from_secs(2)).await;
        assert_eq!(counters.away.load(Ordering::SeqCst), 2);

        assert_ok!(monitor.stop().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_seen_device_never_fires_away() {
        let (source, _sender) = ChannelSource::new();
        let counters = Arc::new(Counters::default());
        let monitor = ProximityMonitor::new(source, config(), counting_callbacks(&counters));

        monitor.start();
        sleep(Duration::from_secs(600)).await;

        assert_eq!(counters.away.load(Ordering::SeqCst), 0);
        assert!(counters.rssi.load(Ordering::SeqCst) > 100);
        assert_ok!(monitor.stop().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_failures_back_off_exponentially() {
        let (source, sender) = ChannelSource::new();
        for _ in 0..3 {
            sender.fail_next_start(SourceError::AdapterPoweredOff);
        }
        let monitor = ProximityMonitor::new(source, config(), PresenceCallbacks::new());

        monitor.start();
        sleep(Duration::from_millis(100)).await;
        assert_eq!(sender.start_count(), 1);

        // Retries at 1s, 1+2s and 1+2+4s.
        sleep(Duration::from_secs(1)).await;
        assert_eq!(sender.start_count(), 2);
        sleep(Duration::from_secs(2)).await;
        assert_eq!(sender.start_count(), 3);
        sleep(Duration::from_millis(3_800)).await;
        assert_eq!(sender.start_count(), 3);
        sleep(Duration::from_millis(200)).await;
        assert_eq!(sender.start_count(), 4);

        // Every failed start was followed by a cleanup stop.
        assert_eq!(sender.stop_count(), 3);
        assert!(monitor.is_running());
        assert_ok!(monitor.stop().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_failure_reopens_source() {
        let (source, sender) = ChannelSource::new();
        let monitor = ProximityMonitor::new(source, config(), PresenceCallbacks::new());

        monitor.start();
        sleep(Duration::from_millis(100)).await;
        assert!(sender.fail(SourceError::Transport("org.bluez.Error.Failed".into())).await);
        sleep(Duration::from_millis(1_200)).await;

        assert_eq!(sender.start_count(), 2);
        assert_eq!(sender.stop_count(), 1);
        assert_ok!(monitor.stop().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_during_backoff_is_prompt() {
        let (source, sender) = ChannelSource::new();
        for _ in 0..10 {
            sender.fail_next_start(SourceError::AdapterNotFound);
        }
        let monitor = ProximityMonitor::new(source, config(), PresenceCallbacks::new());

        monitor.start();
        sleep(Duration::from_secs(20)).await;
        let started = tokio::time::Instant::now();
        assert_ok!(monitor.stop().await);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_callback_does_not_stop_loop() {
        let (source, sender) = ChannelSource::new();
        let near = Arc::new(AtomicUsize::new(0));
        let near_count = Arc::clone(&near);
        let callbacks = PresenceCallbacks::new()
            .on_rssi(|_| panic!("display went away"))
            .on_near(move |_| {
                near_count.fetch_add(1, Ordering::SeqCst);
            });
        let monitor = ProximityMonitor::new(source, config(), callbacks);

        monitor.start();
        assert!(sender.detect(PHONE, None, -50).await);
        sleep(Duration::from_secs(5)).await;

        assert!(monitor.is_running());
        assert_eq!(near.load(Ordering::SeqCst), 3);
        assert_ok!(monitor.stop().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_config_switches_target() {
        let (source, sender) = ChannelSource::new();
        let counters = Arc::new(Counters::default());
        let monitor = ProximityMonitor::new(source, config(), counting_callbacks(&counters));

        monitor.start();
        sleep(Duration::from_millis(100)).await;
        monitor.update_config(MonitorConfig {
            target_address: Some("11:22:33:44:55:66".into()),
            ..config()
        });
        assert_eq!(
            monitor.config().target_address.as_deref(),
            Some("11:22:33:44:55:66")
        );

        assert!(sender.detect(PHONE, None, -50).await);
        sleep(Duration::from_secs(3)).await;
        assert_eq!(counters.near.load(Ordering::SeqCst), 0);

        assert!(sender.detect("11:22:33:44:55:66", None, -50).await);
        sleep(Duration::from_secs(2)).await;
        assert!(counters.near.load(Ordering::SeqCst) >= 1);
        assert_ok!(monitor.stop().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_timeout_aborts_stuck_task() {
        struct StuckSource;

        #[async_trait::async_trait]
        impl AdvertisementSource for StuckSource {
            async fn start(&mut self) -> std::result::Result<crate::DetectionStream, SourceError> {
                Err(SourceError::StreamClosed)
            }

            async fn stop(&mut self) -> std::result::Result<(), SourceError> {
                std::future::pending::<()>().await;
                Ok(())
            }
        }

        let monitor = ProximityMonitor::new(StuckSource, config(), PresenceCallbacks::new())
            .with_stop_timeout(Duration::from_secs(1));
        monitor.start();
        sleep(Duration::from_millis(100)).await;

        let err = assert_err!(monitor.stop().await);
        assert!(matches!(err, MonitorError::StopTimeout(_)));
        assert!(!monitor.is_running());
    }

    #[test]
    fn test_dispatch_isolates_panics() {
        let callbacks = PresenceCallbacks::new().on_away(|| panic!("lock command missing"));
        callbacks.dispatch(PresenceEvent::Away);
        callbacks.dispatch(PresenceEvent::Near(-40));
    }
}
