//! BLE scanning functionality.
//!
//! Pumps btleplug adapter events into the central event queue. Advertisements
//! are only forwarded while a scan is active; disconnects always are.

use btleplug::api::{Central, CentralEvent as BtleEvent, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use futures::stream::StreamExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, error, info, trace};

use crate::ble::transport::{CentralEvent, DiscoveredPeer};
use crate::error::{Error, Result};

/// BLE scanner backed by the first available adapter.
pub struct BleScanner {
    /// The BLE adapter to use for scanning.
    adapter: Adapter,
    /// Whether scanning is currently active.
    is_scanning: Arc<AtomicBool>,
    /// Handle to the adapter event pump.
    pump_handle: tokio::task::JoinHandle<()>,
}

impl BleScanner {
    /// Create a new scanner on the first Bluetooth adapter.
    ///
    /// # Errors
    ///
    /// Returns an error if Bluetooth is not available.
    pub async fn new(event_tx: broadcast::Sender<CentralEvent<Peripheral>>) -> Result<Self> {
        let manager = Manager::new()
            .await
            .map_err(|_e| Error::BluetoothUnavailable)?;

        let adapters = manager.adapters().await.map_err(Error::Bluetooth)?;

        let adapter = adapters
            .into_iter()
            .next()
            .ok_or(Error::BluetoothUnavailable)?;

        info!(
            "Using Bluetooth adapter: {:?}",
            adapter.adapter_info().await.ok()
        );

        Self::with_adapter(adapter, event_tx).await
    }

    /// Create a new scanner with a specific adapter.
    pub async fn with_adapter(
        adapter: Adapter,
        event_tx: broadcast::Sender<CentralEvent<Peripheral>>,
    ) -> Result<Self> {
        let events = adapter.events().await.map_err(Error::Bluetooth)?;
        let is_scanning = Arc::new(AtomicBool::new(false));

        let pump_adapter = adapter.clone();
        let pump_scanning = is_scanning.clone();
        let pump_tx = event_tx;

        let pump_handle = tokio::spawn(async move {
            let mut events = events;
            while let Some(event) = events.next().await {
                Self::handle_event(event, &pump_adapter, &pump_scanning, &pump_tx).await;
            }
            debug!("Adapter event stream ended");
        });

        Ok(Self {
            adapter,
            is_scanning,
            pump_handle,
        })
    }

    /// Start scanning for advertisements.
    ///
    /// # Errors
    ///
    /// Returns an error if scanning cannot be started.
    pub async fn start_scanning(&self) -> Result<()> {
        if self.is_scanning.load(Ordering::SeqCst) {
            debug!("Already scanning, ignoring start request");
            return Ok(());
        }

        info!("Starting BLE scan");

        self.adapter
            .start_scan(ScanFilter::default())
            .await
            .map_err(Error::Bluetooth)?;

        self.is_scanning.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Stop scanning.
    pub async fn stop_scanning(&self) -> Result<()> {
        if !self.is_scanning.swap(false, Ordering::SeqCst) {
            debug!("Not scanning, ignoring stop request");
            return Ok(());
        }

        info!("Stopping BLE scan");
        self.adapter.stop_scan().await.map_err(Error::Bluetooth)
    }

    /// Check if currently scanning.
    pub fn is_scanning(&self) -> bool {
        self.is_scanning.load(Ordering::SeqCst)
    }

    /// Handle a BLE central event.
    async fn handle_event(
        event: BtleEvent,
        adapter: &Adapter,
        is_scanning: &AtomicBool,
        event_tx: &broadcast::Sender<CentralEvent<Peripheral>>,
    ) {
        match event {
            BtleEvent::DeviceDiscovered(id)
            | BtleEvent::DeviceUpdated(id)
            | BtleEvent::ServicesAdvertisement { id, .. } => {
                if is_scanning.load(Ordering::SeqCst) {
                    trace!("Advertisement from {:?}", id);
                    Self::process_peripheral(adapter, id, event_tx).await;
                }
            }
            BtleEvent::DeviceConnected(id) => {
                debug!("Device connected: {:?}", id);
            }
            BtleEvent::DeviceDisconnected(id) => {
                debug!("Device disconnected: {:?}", id);
                let _ = event_tx.send(CentralEvent::Disconnected { id: id.to_string() });
            }
            BtleEvent::ManufacturerDataAdvertisement { .. } => {}
            BtleEvent::ServiceDataAdvertisement { .. } => {}
            BtleEvent::StateUpdate(_) => {}
        }
    }

    /// Process a discovered peripheral.
    async fn process_peripheral(
        adapter: &Adapter,
        id: PeripheralId,
        event_tx: &broadcast::Sender<CentralEvent<Peripheral>>,
    ) {
        let peripheral = match adapter.peripheral(&id).await {
            Ok(p) => p,
            Err(e) => {
                trace!("Failed to get peripheral: {}", e);
                return;
            }
        };

        let properties = match peripheral.properties().await {
            Ok(Some(p)) => p,
            Ok(None) => return,
            Err(e) => {
                error!("Failed to read properties of {:?}: {}", id, e);
                return;
            }
        };

        let event = CentralEvent::Advertisement(DiscoveredPeer {
            id: id.to_string(),
            handle: peripheral,
            services: properties.services,
            local_name: properties.local_name,
            rssi: properties.rssi,
        });

        let _ = event_tx.send(event);
    }
}

impl Drop for BleScanner {
    fn drop(&mut self) {
        self.is_scanning.store(false, Ordering::SeqCst);
        self.pump_handle.abort();
    }
}
