//! Advertisement sources.
//!
//! An [`AdvertisementSource`] yields BLE sightings as a push-style stream of
//! [`Detection`]s. The scan supervisor owns the source, opens it with
//! [`start`](AdvertisementSource::start), drains the returned stream on the
//! same task that runs the evaluator ticks, and always calls
//! [`stop`](AdvertisementSource::stop) afterwards, even when `start` failed.
//!
//! - [`BluezSource`] scans through BlueZ (feature `bluetooth`)
//! - [`ChannelSource`] forwards detections pushed through a channel

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use tokio::time::Instant;

use crate::error::SourceError;

#[cfg(feature = "bluetooth")]
mod bluez;
mod channel;

#[cfg(feature = "bluetooth")]
pub use bluez::BluezSource;
pub use channel::{ChannelSource, DetectionSender};

/// A single advertisement sighting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Detection {
    /// Bluetooth address as reported by the stack (`AA:BB:CC:DD:EE:FF`).
    pub address: String,
    /// Advertised local name, if any.
    pub name: Option<String>,
    /// Signal strength in dBm.
    pub rssi: i16,
    /// When the sighting was received.
    pub seen_at: Instant,
}

impl Detection {
    /// Create a detection stamped with the current time.
    #[must_use]
    pub fn now(address: impl Into<String>, name: Option<String>, rssi: i16) -> Self {
        Self {
            address: address.into(),
            name,
            rssi,
            seen_at: Instant::now(),
        }
    }
}

/// Stream of sightings produced by an open source.
///
/// An `Err` item or the end of the stream means the source broke and must be
/// torn down and reopened.
pub type DetectionStream = Pin<Box<dyn Stream<Item = Result<Detection, SourceError>> + Send>>;

/// A BLE scanning capability.
#[async_trait]
pub trait AdvertisementSource: Send {
    /// Open the source and begin scanning.
    ///
    /// # Errors
    ///
    /// Returns an error if the adapter is missing, powered off or the
    /// Bluetooth stack refuses to start discovery.
    async fn start(&mut self) -> Result<DetectionStream, SourceError>;

    /// Stop scanning and release adapter resources.
    ///
    /// Must be safe to call on a source that never started successfully.
    ///
    /// # Errors
    ///
    /// Returns an error if the stack reports a failure while stopping.
    async fn stop(&mut self) -> Result<(), SourceError>;

    /// Short label used in log messages.
    fn describe(&self) -> &'static str {
        "advertisement source"
    }
}

#[async_trait]
impl<S: AdvertisementSource + ?Sized> AdvertisementSource for Box<S> {
    async fn start(&mut self) -> Result<DetectionStream, SourceError> {
        (**self).start().await
    }

    async fn stop(&mut self) -> Result<(), SourceError> {
        (**self).stop().await
    }

    fn describe(&self) -> &'static str {
        (**self).describe()
    }
}
