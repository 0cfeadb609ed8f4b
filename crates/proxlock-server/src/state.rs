//! Application state shared across handlers.

use std::sync::Arc;
use std::time::Instant;

use proxlock_core::{AdvertisementSource, DetectionSender, ProximityMonitor};
use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::info;

use crate::dispatch::{LockPolicy, PresenceBoard};
use crate::settings::Settings;

/// Monitor over whichever advertisement source the daemon was built with.
pub type Monitor = ProximityMonitor<Box<dyn AdvertisementSource>>;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    settings: RwLock<Settings>,
    monitor: Monitor,
    board: Arc<PresenceBoard>,
    started_at: Instant,
    // Keeps the in-process source open when built without BlueZ.
    injector: Option<DetectionSender>,
}

impl AppState {
    /// Create application state with the build's default source.
    #[must_use]
    pub fn new(settings: Settings) -> Self {
        let (source, injector) = default_source(&settings);
        Self::with_source(settings, source, injector)
    }

    /// Create application state around an explicit source.
    #[must_use]
    pub fn with_source(
        settings: Settings,
        source: Box<dyn AdvertisementSource>,
        injector: Option<DetectionSender>,
    ) -> Self {
        let board = Arc::new(PresenceBoard::new(lock_policy(&settings)));
        let monitor = ProximityMonitor::new(source, settings.monitor_config(), board.callbacks());

        Self {
            inner: Arc::new(AppStateInner {
                settings: RwLock::new(settings),
                monitor,
                board,
                started_at: Instant::now(),
                injector,
            }),
        }
    }

    /// Get read access to settings.
    pub async fn settings(&self) -> RwLockReadGuard<'_, Settings> {
        self.inner.settings.read().await
    }

    /// Get write access to settings.
    pub async fn settings_mut(&self) -> RwLockWriteGuard<'_, Settings> {
        self.inner.settings.write().await
    }

    /// The proximity monitor.
    #[must_use]
    pub fn monitor(&self) -> &Monitor {
        &self.inner.monitor
    }

    /// The presence board fed by the monitor.
    #[must_use]
    pub fn board(&self) -> &PresenceBoard {
        &self.inner.board
    }

    /// Sender for the in-process source, when the daemon runs without BlueZ.
    #[must_use]
    pub fn injector(&self) -> Option<&DetectionSender> {
        self.inner.injector.as_ref()
    }

    /// Seconds since the state was created.
    #[must_use]
    pub fn uptime_secs(&self) -> u64 {
        self.inner.started_at.elapsed().as_secs()
    }

    /// Start the monitor if the settings name a target.
    ///
    /// Returns whether the monitor is running afterwards.
    pub async fn start_if_configured(&self) -> bool {
        if self.settings().await.has_target() {
            self.monitor().start();
        } else {
            info!("No target device configured; monitor idle");
        }
        self.monitor().is_running()
    }

    /// Edit the settings and push the result to the monitor and the board.
    ///
    /// The write lock is held from reading the current settings until the
    /// result is stored, so concurrent updates apply one after another. If
    /// `update` fails nothing changes.
    ///
    /// # Errors
    ///
    /// Returns whatever `update` returns.
    pub async fn update_settings<E>(
        &self,
        update: impl FnOnce(&mut Settings) -> Result<(), E>,
    ) -> Result<Settings, E> {
        let mut current = self.settings_mut().await;
        let mut updated = current.clone();
        update(&mut updated)?;
        self.push_settings(&updated);
        *current = updated.clone();
        Ok(updated)
    }

    /// Hand `settings` to the monitor and the board. Callers hold the
    /// settings write lock.
    fn push_settings(&self, settings: &Settings) {
        let config = settings.monitor_config();
        if config.matcher() != self.monitor().config().matcher() {
            self.board().reset_presence();
        }
        self.monitor().update_config(config);
        self.board().set_policy(lock_policy(settings));
    }
}

/// Lock policy derived from settings.
#[must_use]
pub fn lock_policy(settings: &Settings) -> LockPolicy {
    LockPolicy {
        locking_enabled: settings.locking_enabled,
        re_lock_delay: settings.re_lock_delay(),
    }
}

#[cfg(all(feature = "bluetooth", not(feature = "mock-bluetooth")))]
fn default_source(settings: &Settings) -> (Box<dyn AdvertisementSource>, Option<DetectionSender>) {
    use proxlock_core::BluezSource;

    let source = match settings.adapter.as_deref() {
        Some(adapter) => BluezSource::with_adapter(adapter),
        None => BluezSource::new(),
    };
    (Box::new(source), None)
}

#[cfg(any(not(feature = "bluetooth"), feature = "mock-bluetooth"))]
fn default_source(_settings: &Settings) -> (Box<dyn AdvertisementSource>, Option<DetectionSender>) {
    use proxlock_core::ChannelSource;

    info!("Built without BlueZ; using the in-process advertisement source");
    let (source, sender) = ChannelSource::new();
    (Box::new(source), Some(sender))
}
