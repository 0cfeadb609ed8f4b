//! Channel-backed advertisement source.
//!
//! Detections are pushed from elsewhere (a test, or a host that already runs
//! its own scanner) through a [`DetectionSender`]. Open failures can be queued
//! up front to exercise the supervisor's retry path.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::StreamExt as _;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::time::Instant;

use super::{AdvertisementSource, Detection, DetectionStream};
use crate::error::SourceError;

const CHANNEL_CAPACITY: usize = 64;

type Item = Result<Detection, SourceError>;

#[derive(Debug)]
struct Shared {
    receiver: Arc<AsyncMutex<mpsc::Receiver<Item>>>,
    open_failures: Mutex<VecDeque<SourceError>>,
    starts: AtomicUsize,
    stops: AtomicUsize,
}

/// Source whose sightings arrive through an in-process channel.
///
/// The channel outlives individual `start`/`stop` cycles, so a sender keeps
/// working across reconnects. Items sent while the source is stopped are
/// delivered after the next `start`.
#[derive(Debug)]
pub struct ChannelSource {
    shared: Arc<Shared>,
}

/// Handle used to feed a [`ChannelSource`].
#[derive(Debug, Clone)]
pub struct DetectionSender {
    shared: Arc<Shared>,
    sender: mpsc::Sender<Item>,
}

impl ChannelSource {
    /// Create a source together with the sender that feeds it.
    #[must_use]
    pub fn new() -> (Self, DetectionSender) {
        let (sender, receiver) = mpsc::channel(CHANNEL_CAPACITY);
        let shared = Arc::new(Shared {
            receiver: Arc::new(AsyncMutex::new(receiver)),
            open_failures: Mutex::new(VecDeque::new()),
            starts: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
        });
        let source = Self {
            shared: Arc::clone(&shared),
        };
        (source, DetectionSender { shared, sender })
    }
}

#[async_trait]
impl AdvertisementSource for ChannelSource {
    async fn start(&mut self) -> Result<DetectionStream, SourceError> {
        self.shared.starts.fetch_add(1, Ordering::SeqCst);

        let queued_failure = self
            .shared
            .open_failures
            .lock()
            .map_err(|_| SourceError::Injected("failure queue poisoned".into()))?
            .pop_front();
        if let Some(err) = queued_failure {
            return Err(err);
        }

        let receiver = Arc::clone(&self.shared.receiver);
        Ok(futures::stream::unfold(receiver, |receiver| async move {
            let item = receiver.lock().await.recv().await;
            item.map(|item| (item, receiver))
        })
        .boxed())
    }

    async fn stop(&mut self) -> Result<(), SourceError> {
        self.shared.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn describe(&self) -> &'static str {
        "channel source"
    }
}

impl DetectionSender {
    /// Push a sighting stamped with the current time.
    ///
    /// Returns `false` if the source has been dropped.
    pub async fn detect(&self, address: &str, name: Option<&str>, rssi: i16) -> bool {
        let detection = Detection::now(address, name.map(str::to_string), rssi);
        self.sender.send(Ok(detection)).await.is_ok()
    }

    /// Push a sighting with an explicit timestamp.
    pub async fn detect_at(
        &self,
        address: &str,
        name: Option<&str>,
        rssi: i16,
        seen_at: Instant,
    ) -> bool {
        let detection = Detection {
            address: address.to_string(),
            name: name.map(str::to_string),
            rssi,
            seen_at,
        };
        self.sender.send(Ok(detection)).await.is_ok()
    }

    /// Break the running stream with a read error.
    pub async fn fail(&self, err: SourceError) -> bool {
        self.sender.send(Err(err)).await.is_ok()
    }

    /// Make the next `start` call fail with `err`.
    pub fn fail_next_start(&self, err: SourceError) {
        if let Ok(mut queue) = self.shared.open_failures.lock() {
            queue.push_back(err);
        }
    }

    /// Number of `start` attempts so far, successful or not.
    #[must_use]
    pub fn start_count(&self) -> usize {
        self.shared.starts.load(Ordering::SeqCst)
    }

    /// Number of `stop` calls so far.
    #[must_use]
    pub fn stop_count(&self) -> usize {
        self.shared.stops.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use futures::StreamExt as _;

    use super::*;

    #[tokio::test]
    async fn test_detections_flow_through_stream() {
        let (mut source, sender) = ChannelSource::new();
        let mut stream = source.start().await.unwrap();

        assert!(sender.detect("AA:BB:CC:DD:EE:FF", Some("Phone"), -60).await);
        let detection = stream.next().await.unwrap().unwrap();
        assert_eq!(detection.address, "AA:BB:CC:DD:EE:FF");
        assert_eq!(detection.name.as_deref(), Some("Phone"));
        assert_eq!(detection.rssi, -60);
    }

    #[tokio::test]
    async fn test_sender_survives_restart() {
        let (mut source, sender) = ChannelSource::new();
        let stream = source.start().await.unwrap();
        drop(stream);
        source.stop().await.unwrap();

        let mut stream = source.start().await.unwrap();
        assert!(sender.detect("AA:BB:CC:DD:EE:FF", None, -70).await);
        assert_eq!(stream.next().await.unwrap().unwrap().rssi, -70);
    }

    #[tokio::test]
    async fn test_queued_open_failure() {
        let (mut source, sender) = ChannelSource::new();
        sender.fail_next_start(SourceError::AdapterPoweredOff);

        assert!(matches!(
            source.start().await,
            Err(SourceError::AdapterPoweredOff)
        ));
        assert!(source.start().await.is_ok());
        assert_eq!(sender.start_count(), 2);
    }

    #[tokio::test]
    async fn test_stop_without_start_is_harmless() {
        let (mut source, sender) = ChannelSource::new();
        assert!(source.stop().await.is_ok());
        assert_eq!(sender.stop_count(), 1);
    }
}
