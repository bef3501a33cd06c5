//! Transport abstractions for both ends of the link.
//!
//! The session state machines only see these traits. Radio callbacks are
//! turned into events on a broadcast queue which the node loops drain between
//! iterations, so no state is mutated from a callback context.

use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::ble::uuids::{advertises_service, DISTANCE_CHARACTERISTIC_UUID, DISTANCE_SERVICE_UUID};
use crate::error::{Error, Result};

/// Capabilities of a GATT characteristic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ChannelProperties {
    /// Supports synchronous reads.
    pub read: bool,
    /// Supports writes.
    pub write: bool,
    /// Supports push notifications.
    pub notify: bool,
}

impl ChannelProperties {
    /// Read, write and notify, as served by the sensing node.
    pub const fn read_write_notify() -> Self {
        Self {
            read: true,
            write: true,
            notify: true,
        }
    }
}

/// A data channel (characteristic) within a service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelHandle {
    /// Characteristic UUID.
    pub uuid: Uuid,
    /// UUID of the owning service.
    pub service_uuid: Uuid,
    /// Supported operations.
    pub properties: ChannelProperties,
}

/// A discovered GATT service and its characteristics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceHandle {
    /// Service UUID.
    pub uuid: Uuid,
    /// Characteristics exposed by the service.
    pub characteristics: Vec<ChannelHandle>,
}

impl ServiceHandle {
    /// The service table the sensing node serves.
    pub fn distance_service() -> Self {
        Self {
            uuid: DISTANCE_SERVICE_UUID,
            characteristics: vec![ChannelHandle {
                uuid: DISTANCE_CHARACTERISTIC_UUID,
                service_uuid: DISTANCE_SERVICE_UUID,
                properties: ChannelProperties::read_write_notify(),
            }],
        }
    }

    /// Look up a characteristic in this service.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CharacteristicNotFound`] if the service does not expose it.
    pub fn characteristic(&self, uuid: &Uuid) -> Result<&ChannelHandle> {
        self.characteristics
            .iter()
            .find(|c| c.uuid == *uuid)
            .ok_or_else(|| Error::CharacteristicNotFound {
                uuid: uuid.to_string(),
            })
    }
}

/// Look up a service among the ones discovered on a peer.
///
/// # Errors
///
/// Returns [`Error::ServiceNotFound`] if the peer does not expose it.
pub fn find_service<'a>(services: &'a [ServiceHandle], uuid: &Uuid) -> Result<&'a ServiceHandle> {
    services
        .iter()
        .find(|s| s.uuid == *uuid)
        .ok_or_else(|| Error::ServiceNotFound {
            uuid: uuid.to_string(),
        })
}

/// A peer seen while scanning.
#[derive(Debug, Clone)]
pub struct DiscoveredPeer<P> {
    /// Stable transport identifier of the peer.
    pub id: String,
    /// Transport handle used to connect.
    pub handle: P,
    /// Advertised service UUIDs.
    pub services: Vec<Uuid>,
    /// Advertised local name.
    pub local_name: Option<String>,
    /// Signal strength in dBm.
    pub rssi: Option<i16>,
}

impl<P> DiscoveredPeer<P> {
    /// Whether the advertisement carries the given service.
    pub fn advertises(&self, service: &Uuid) -> bool {
        advertises_service(&self.services, service)
    }
}

/// Events delivered by a central (scanning) transport.
#[derive(Debug, Clone)]
pub enum CentralEvent<P> {
    /// An advertisement was received while scanning.
    Advertisement(DiscoveredPeer<P>),
    /// A notification arrived on a subscribed characteristic.
    Notification {
        /// Characteristic that produced the value.
        characteristic: Uuid,
        /// Raw payload.
        value: Bytes,
    },
    /// The link to a peer was lost.
    Disconnected {
        /// Identifier of the peer.
        id: String,
    },
}

/// Events delivered by a peripheral (advertising) transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeripheralEvent {
    /// A subscriber connected.
    SubscriberConnected,
    /// The subscriber went away.
    SubscriberDisconnected,
}

/// The scanning side of the radio stack.
#[async_trait]
pub trait CentralTransport: Send + Sync {
    /// Handle identifying a connectable peer.
    type Peer: Clone + fmt::Debug + Send + Sync + 'static;

    /// Start observing advertisements.
    async fn start_scan(&self) -> Result<()>;

    /// Stop observing advertisements.
    async fn stop_scan(&self) -> Result<()>;

    /// Connect to a peer. Blocks until the transport gives up or succeeds.
    async fn connect(&self, peer: &Self::Peer) -> Result<()>;

    /// List the services of a connected peer.
    async fn discover_services(&self, peer: &Self::Peer) -> Result<Vec<ServiceHandle>>;

    /// Synchronously read a characteristic value.
    async fn read(&self, peer: &Self::Peer, channel: &ChannelHandle) -> Result<Vec<u8>>;

    /// Register for push notifications on a characteristic.
    async fn subscribe(&self, peer: &Self::Peer, channel: &ChannelHandle) -> Result<()>;

    /// Tear down the link to a peer.
    async fn disconnect(&self, peer: &Self::Peer) -> Result<()>;

    /// Subscribe to transport events.
    fn events(&self) -> broadcast::Receiver<CentralEvent<Self::Peer>>;
}

/// The advertising side of the radio stack.
#[async_trait]
pub trait PeripheralTransport: Send + Sync {
    /// Start broadcasting the given service under a local name.
    async fn start_advertising(&self, service: Uuid, local_name: &str) -> Result<()>;

    /// Stop broadcasting.
    async fn stop_advertising(&self) -> Result<()>;

    /// Set the readable value of a characteristic.
    async fn set_value(&self, characteristic: Uuid, value: &[u8]) -> Result<()>;

    /// Push a value to the subscriber.
    async fn notify(&self, characteristic: Uuid, value: &[u8]) -> Result<()>;

    /// Subscribe to transport events.
    fn events(&self) -> broadcast::Receiver<PeripheralEvent>;
}
