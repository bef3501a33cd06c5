//! In-process link pairing a peripheral and a central.
//!
//! Mirrors the radio behaviour both nodes rely on: an advertising peripheral
//! is visible only while the central scans, accepting a connection stops
//! advertising, notifications only reach a connected and subscribed central,
//! and a lost link is reported to both ends.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, trace};
use uuid::Uuid;

use crate::ble::transport::{
    CentralEvent, CentralTransport, ChannelHandle, DiscoveredPeer, PeripheralEvent,
    PeripheralTransport, ServiceHandle,
};
use crate::ble::uuids::DEFAULT_DEVICE_NAME;
use crate::error::{Error, Result};

/// Capacity of each event queue.
const EVENT_QUEUE_CAPACITY: usize = 64;

/// Identifier the loopback peripheral is reported under.
pub const LOOPBACK_PEER_ID: &str = "loopback-peripheral";

/// Peer handle of the loopback peripheral.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopbackPeer {
    /// Peer identifier.
    pub id: String,
}

#[derive(Debug)]
struct LinkState {
    device_name: String,
    advertising: Option<Uuid>,
    scanning: bool,
    connected: bool,
    subscribed: Option<Uuid>,
    services: Vec<ServiceHandle>,
    values: HashMap<Uuid, Bytes>,
    refuse_connections: bool,
    refuse_reads: bool,
    notifications_sent: u64,
}

impl LinkState {
    fn advertisement(&self) -> Option<CentralEvent<LoopbackPeer>> {
        let service = self.advertising?;
        if !self.scanning || self.connected {
            return None;
        }
        Some(CentralEvent::Advertisement(DiscoveredPeer {
            id: LOOPBACK_PEER_ID.to_string(),
            handle: LoopbackPeer {
                id: LOOPBACK_PEER_ID.to_string(),
            },
            services: vec![service],
            local_name: Some(self.device_name.clone()),
            rssi: Some(-50),
        }))
    }
}

struct Shared {
    state: Mutex<LinkState>,
    central_tx: broadcast::Sender<CentralEvent<LoopbackPeer>>,
    peripheral_tx: broadcast::Sender<PeripheralEvent>,
}

impl Shared {
    fn announce(&self, state: &LinkState) {
        if let Some(event) = state.advertisement() {
            trace!("Loopback advertisement delivered");
            let _ = self.central_tx.send(event);
        }
    }

    fn drop_link(&self) -> bool {
        let mut state = self.state.lock();
        if !state.connected {
            return false;
        }
        state.connected = false;
        state.subscribed = None;
        drop(state);

        let _ = self.central_tx.send(CentralEvent::Disconnected {
            id: LOOPBACK_PEER_ID.to_string(),
        });
        let _ = self.peripheral_tx.send(PeripheralEvent::SubscriberDisconnected);
        true
    }
}

/// A simulated radio link between one peripheral and one central.
#[derive(Clone)]
pub struct LoopbackLink {
    shared: Arc<Shared>,
}

impl LoopbackLink {
    /// Create a link whose peripheral serves the distance service.
    pub fn new() -> Self {
        Self::with_services(vec![ServiceHandle::distance_service()])
    }

    /// Create a link whose peripheral serves the given GATT table.
    pub fn with_services(services: Vec<ServiceHandle>) -> Self {
        let (central_tx, _) = broadcast::channel(EVENT_QUEUE_CAPACITY);
        let (peripheral_tx, _) = broadcast::channel(EVENT_QUEUE_CAPACITY);

        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(LinkState {
                    device_name: DEFAULT_DEVICE_NAME.to_string(),
                    advertising: None,
                    scanning: false,
                    connected: false,
                    subscribed: None,
                    services,
                    values: HashMap::new(),
                    refuse_connections: false,
                    refuse_reads: false,
                    notifications_sent: 0,
                }),
                central_tx,
                peripheral_tx,
            }),
        }
    }

    /// The advertising end of the link.
    pub fn peripheral(&self) -> LoopbackPeripheral {
        LoopbackPeripheral {
            shared: self.shared.clone(),
        }
    }

    /// The scanning end of the link.
    pub fn central(&self) -> LoopbackCentral {
        LoopbackCentral {
            shared: self.shared.clone(),
        }
    }

    /// Simulate a radio drop. Returns `false` if nothing was connected.
    pub fn drop_connection(&self) -> bool {
        debug!("Loopback link dropped");
        self.shared.drop_link()
    }

    /// Make subsequent connection attempts fail.
    pub fn refuse_connections(&self, refuse: bool) {
        self.shared.state.lock().refuse_connections = refuse;
    }

    /// Make subsequent characteristic reads fail.
    pub fn refuse_reads(&self, refuse: bool) {
        self.shared.state.lock().refuse_reads = refuse;
    }

    /// Whether the peripheral is currently advertising.
    pub fn is_advertising(&self) -> bool {
        self.shared.state.lock().advertising.is_some()
    }

    /// Whether the central is currently scanning.
    pub fn is_scanning(&self) -> bool {
        self.shared.state.lock().scanning
    }

    /// Whether a central is connected.
    pub fn is_connected(&self) -> bool {
        self.shared.state.lock().connected
    }

    /// Number of notifications delivered to the central.
    pub fn notifications_sent(&self) -> u64 {
        self.shared.state.lock().notifications_sent
    }
}

impl Default for LoopbackLink {
    fn default() -> Self {
        Self::new()
    }
}

/// Peripheral end of a [`LoopbackLink`].
#[derive(Clone)]
pub struct LoopbackPeripheral {
    shared: Arc<Shared>,
}

#[async_trait]
impl PeripheralTransport for LoopbackPeripheral {
    async fn start_advertising(&self, service: Uuid, local_name: &str) -> Result<()> {
        let mut state = self.shared.state.lock();
        state.advertising = Some(service);
        state.device_name = local_name.to_string();
        self.shared.announce(&state);
        Ok(())
    }

    async fn stop_advertising(&self) -> Result<()> {
        self.shared.state.lock().advertising = None;
        Ok(())
    }

    async fn set_value(&self, characteristic: Uuid, value: &[u8]) -> Result<()> {
        self.shared
            .state
            .lock()
            .values
            .insert(characteristic, Bytes::copy_from_slice(value));
        Ok(())
    }

    async fn notify(&self, characteristic: Uuid, value: &[u8]) -> Result<()> {
        let mut state = self.shared.state.lock();
        if !state.connected {
            return Err(Error::NotConnected);
        }
        if state.subscribed != Some(characteristic) {
            trace!("Notify on {} with no subscriber, dropped", characteristic);
            return Ok(());
        }
        state.notifications_sent += 1;
        drop(state);

        let _ = self.shared.central_tx.send(CentralEvent::Notification {
            characteristic,
            value: Bytes::copy_from_slice(value),
        });
        Ok(())
    }

    fn events(&self) -> broadcast::Receiver<PeripheralEvent> {
        self.shared.peripheral_tx.subscribe()
    }
}

/// Central end of a [`LoopbackLink`].
#[derive(Clone)]
pub struct LoopbackCentral {
    shared: Arc<Shared>,
}

impl LoopbackCentral {
    fn ensure_connected(&self, peer: &LoopbackPeer) -> Result<()> {
        if peer.id != LOOPBACK_PEER_ID || !self.shared.state.lock().connected {
            return Err(Error::NotConnected);
        }
        Ok(())
    }
}

#[async_trait]
impl CentralTransport for LoopbackCentral {
    type Peer = LoopbackPeer;

    async fn start_scan(&self) -> Result<()> {
        let mut state = self.shared.state.lock();
        state.scanning = true;
        self.shared.announce(&state);
        Ok(())
    }

    async fn stop_scan(&self) -> Result<()> {
        self.shared.state.lock().scanning = false;
        Ok(())
    }

    async fn connect(&self, peer: &LoopbackPeer) -> Result<()> {
        let mut state = self.shared.state.lock();
        if peer.id != LOOPBACK_PEER_ID || state.refuse_connections {
            return Err(Error::ConnectionFailed {
                reason: format!("{} rejected the connection", peer.id),
            });
        }
        if state.connected {
            return Err(Error::ConnectionFailed {
                reason: "subscriber slot already taken".to_string(),
            });
        }
        if state.advertising.is_none() {
            return Err(Error::ConnectionFailed {
                reason: "peer is not advertising".to_string(),
            });
        }

        state.connected = true;
        state.advertising = None;
        drop(state);

        let _ = self
            .shared
            .peripheral_tx
            .send(PeripheralEvent::SubscriberConnected);
        Ok(())
    }

    async fn discover_services(&self, peer: &LoopbackPeer) -> Result<Vec<ServiceHandle>> {
        self.ensure_connected(peer)?;
        Ok(self.shared.state.lock().services.clone())
    }

    async fn read(&self, peer: &LoopbackPeer, channel: &ChannelHandle) -> Result<Vec<u8>> {
        self.ensure_connected(peer)?;
        let state = self.shared.state.lock();
        if state.refuse_reads {
            return Err(Error::Bluetooth(btleplug::Error::RuntimeError(
                "read not permitted".to_string(),
            )));
        }
        Ok(state
            .values
            .get(&channel.uuid)
            .map(|v| v.to_vec())
            .unwrap_or_default())
    }

    async fn subscribe(&self, peer: &LoopbackPeer, channel: &ChannelHandle) -> Result<()> {
        self.ensure_connected(peer)?;
        self.shared.state.lock().subscribed = Some(channel.uuid);
        Ok(())
    }

    async fn disconnect(&self, peer: &LoopbackPeer) -> Result<()> {
        if peer.id != LOOPBACK_PEER_ID {
            return Err(Error::NotConnected);
        }
        self.shared.drop_link();
        Ok(())
    }

    fn events(&self) -> broadcast::Receiver<CentralEvent<LoopbackPeer>> {
        self.shared.central_tx.subscribe()
    }
}
