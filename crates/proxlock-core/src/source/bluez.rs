//! BlueZ advertisement source.
//!
//! Runs LE discovery on the default adapter through `bluer` and turns every
//! device addition or property change that carries an RSSI into a
//! [`Detection`]. A pump task owns the discovery session and forwards
//! sightings over a channel; stopping the source aborts the pump, which ends
//! discovery.

use async_trait::async_trait;
use bluer::{AdapterEvent, AdapterProperty, Address, DiscoveryFilter, DiscoveryTransport};
use futures::StreamExt as _;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

use super::{AdvertisementSource, Detection, DetectionStream};
use crate::error::SourceError;

const PUMP_CAPACITY: usize = 128;

/// Scans for BLE advertisements via BlueZ.
#[derive(Default)]
pub struct BluezSource {
    adapter_name: Option<String>,
    pump: Option<JoinHandle<()>>,
}

impl BluezSource {
    /// Create a source that uses the system's default adapter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a source bound to a named adapter such as `hci1`.
    #[must_use]
    pub fn with_adapter(name: impl Into<String>) -> Self {
        Self {
            adapter_name: Some(name.into()),
            ..Self::default()
        }
    }
}

async fn open_adapter(
    session: &bluer::Session,
    adapter_name: Option<&str>,
) -> Result<bluer::Adapter, SourceError> {
    let adapter = match adapter_name {
        Some(name) => session.adapter(name)?,
        None => session.default_adapter().await?,
    };
    if !adapter.is_powered().await? {
        return Err(SourceError::AdapterPoweredOff);
    }
    adapter
        .set_discovery_filter(DiscoveryFilter {
            transport: DiscoveryTransport::Le,
            duplicate_data: true,
            ..DiscoveryFilter::default()
        })
        .await?;
    Ok(adapter)
}

async fn read_detection(
    adapter: &bluer::Adapter,
    address: Address,
) -> Result<Option<Detection>, SourceError> {
    let device = adapter.device(address)?;
    // Cached devices that are not currently advertising have no RSSI.
    let Some(rssi) = device.rssi().await? else {
        return Ok(None);
    };
    let name = device.name().await?;
    Ok(Some(Detection {
        address: address.to_string(),
        name,
        rssi,
        seen_at: Instant::now(),
    }))
}

async fn pump(
    _session: bluer::Session,
    adapter: bluer::Adapter,
    tx: mpsc::Sender<Result<Detection, SourceError>>,
) {
    let events = match adapter.discover_devices_with_changes().await {
        Ok(events) => events,
        Err(err) => {
            let _ = tx.send(Err(err.into())).await;
            return;
        }
    };
    futures::pin_mut!(events);
    info!(adapter = %adapter.name(), "BLE discovery started");

    while let Some(event) = events.next().await {
        let item = match event {
            AdapterEvent::DeviceAdded(address) => match read_detection(&adapter, address).await {
                Ok(Some(detection)) => Ok(detection),
                Ok(None) => continue,
                Err(err) => {
                    // The device may vanish between the event and the property
                    // read; that is not a scanner failure.
                    debug!(%address, error = %err, "Skipping unreadable device");
                    continue;
                }
            },
            AdapterEvent::PropertyChanged(AdapterProperty::Powered(false)) => {
                Err(SourceError::AdapterPoweredOff)
            }
            _ => continue,
        };
        if tx.send(item).await.is_err() {
            break;
        }
    }
    debug!(adapter = %adapter.name(), "BLE discovery ended");
}

#[async_trait]
impl AdvertisementSource for BluezSource {
    async fn start(&mut self) -> Result<DetectionStream, SourceError> {
        self.stop().await?;

        let session = bluer::Session::new().await?;
        let adapter = open_adapter(&session, self.adapter_name.as_deref()).await?;

        let (tx, mut rx) = mpsc::channel(PUMP_CAPACITY);
        self.pump = Some(tokio::spawn(pump(session, adapter, tx)));

        Ok(futures::stream::poll_fn(move |cx| rx.poll_recv(cx)).boxed())
    }

    async fn stop(&mut self) -> Result<(), SourceError> {
        if let Some(pump) = self.pump.take() {
            pump.abort();
            debug!("BLE discovery pump stopped");
        }
        Ok(())
    }

    fn describe(&self) -> &'static str {
        "BlueZ scanner"
    }
}
