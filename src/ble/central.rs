//! btleplug-backed central transport.
//!
//! Used by the client node on real hardware. Connect is a single attempt;
//! the session state machine decides what happens after a failure.
//!
//! At most one characteristic handler is cached, bound to the peer it was
//! created for. It is replaced when another peer is used and dropped when
//! that peer disconnects.

use async_trait::async_trait;
use btleplug::api::Peripheral as _;
use btleplug::platform::Peripheral;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, info, warn};

use crate::ble::characteristics::CharacteristicHandler;
use crate::ble::scanner::BleScanner;
use crate::ble::transport::{CentralEvent, CentralTransport, ChannelHandle, ServiceHandle};
use crate::error::{Error, Result};

/// Capacity of the central event queue.
const EVENT_QUEUE_CAPACITY: usize = 256;

/// Handler cache keyed by peer id.
#[derive(Debug)]
struct HandlerSlot<H> {
    entry: Option<(String, Arc<H>)>,
}

impl<H> HandlerSlot<H> {
    fn new() -> Self {
        Self { entry: None }
    }

    /// Return the handler for `id`, creating it if the slot is empty or
    /// holds another peer's. The evicted handler, if any, is returned too.
    fn get_or_insert_with(
        &mut self,
        id: &str,
        make: impl FnOnce() -> H,
    ) -> (Arc<H>, Option<Arc<H>>) {
        if let Some((cached_id, handler)) = &self.entry {
            if cached_id == id {
                return (handler.clone(), None);
            }
        }

        let handler = Arc::new(make());
        let evicted = self
            .entry
            .replace((id.to_string(), handler.clone()))
            .map(|(_, old)| old);
        (handler, evicted)
    }

    /// Remove the handler if it belongs to `id`.
    fn take_if(&mut self, id: &str) -> Option<Arc<H>> {
        match &self.entry {
            Some((cached_id, _)) if cached_id == id => self.entry.take().map(|(_, h)| h),
            _ => None,
        }
    }
}

/// Central transport on the host's Bluetooth adapter.
pub struct BtleCentral {
    /// Adapter scanner and event pump.
    scanner: BleScanner,
    /// Characteristic handler of the current link.
    handler: Arc<Mutex<HandlerSlot<CharacteristicHandler>>>,
    /// Central event queue.
    event_tx: broadcast::Sender<CentralEvent<Peripheral>>,
    /// Task dropping the handler when its peer disconnects.
    watcher_handle: tokio::task::JoinHandle<()>,
}

impl BtleCentral {
    /// Open the first Bluetooth adapter.
    ///
    /// # Errors
    ///
    /// Returns an error if Bluetooth is not available.
    pub async fn new() -> Result<Self> {
        let (event_tx, _) = broadcast::channel(EVENT_QUEUE_CAPACITY);
        let scanner = BleScanner::new(event_tx.clone()).await?;
        let handler = Arc::new(Mutex::new(HandlerSlot::<CharacteristicHandler>::new()));

        let mut events = event_tx.subscribe();
        let slot = handler.clone();
        let watcher_handle = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(CentralEvent::Disconnected { id }) => {
                        let evicted = slot.lock().take_if(&id);
                        if let Some(handler) = evicted {
                            debug!("Dropping characteristic handler of {}", id);
                            handler.stop_notifications();
                        }
                    }
                    Ok(_) | Err(RecvError::Lagged(_)) => {}
                    Err(RecvError::Closed) => break,
                }
            }
        });

        Ok(Self {
            scanner,
            handler,
            event_tx,
            watcher_handle,
        })
    }

    /// Check if currently scanning.
    pub fn is_scanning(&self) -> bool {
        self.scanner.is_scanning()
    }

    /// Get or create the characteristic handler for a peer.
    fn handler_for(&self, peer: &Peripheral) -> Arc<CharacteristicHandler> {
        let id = peer.id().to_string();
        let (handler, evicted) = self.handler.lock().get_or_insert_with(&id, || {
            CharacteristicHandler::new(peer.clone(), self.event_tx.clone())
        });

        if let Some(old) = evicted {
            debug!("Replacing characteristic handler for {}", id);
            old.stop_notifications();
        }
        handler
    }
}

impl Drop for BtleCentral {
    fn drop(&mut self) {
        self.watcher_handle.abort();
    }
}

#[async_trait]
impl CentralTransport for BtleCentral {
    type Peer = Peripheral;

    async fn start_scan(&self) -> Result<()> {
        self.scanner.start_scanning().await
    }

    async fn stop_scan(&self) -> Result<()> {
        self.scanner.stop_scanning().await
    }

    async fn connect(&self, peer: &Peripheral) -> Result<()> {
        if peer.is_connected().await.unwrap_or(false) {
            info!("Peripheral already connected at BLE level");
            return Ok(());
        }

        peer.connect().await.map_err(|e| Error::ConnectionFailed {
            reason: e.to_string(),
        })?;

        info!("Connected to {:?}", peer.id());
        Ok(())
    }

    async fn discover_services(&self, peer: &Peripheral) -> Result<Vec<ServiceHandle>> {
        peer.discover_services().await.map_err(Error::Bluetooth)?;

        let services: Vec<ServiceHandle> = peer.services().iter().map(ServiceHandle::from).collect();
        debug!("Discovered {} services", services.len());

        Ok(services)
    }

    async fn read(&self, peer: &Peripheral, channel: &ChannelHandle) -> Result<Vec<u8>> {
        self.handler_for(peer).read(&channel.uuid).await
    }

    async fn subscribe(&self, peer: &Peripheral, channel: &ChannelHandle) -> Result<()> {
        let handler = self.handler_for(peer);
        handler.subscribe(&channel.uuid).await?;
        handler.start_notifications().await
    }

    async fn disconnect(&self, peer: &Peripheral) -> Result<()> {
        let evicted = self.handler.lock().take_if(&peer.id().to_string());
        if let Some(handler) = evicted {
            handler.stop_notifications();
        }

        match peer.disconnect().await {
            Ok(()) => {
                info!("Disconnected from {:?}", peer.id());
                Ok(())
            }
            Err(e) => {
                warn!("Failed to disconnect: {}", e);
                Err(Error::Bluetooth(e))
            }
        }
    }

    fn events(&self) -> broadcast::Receiver<CentralEvent<Peripheral>> {
        self.event_tx.subscribe()
    }
}
