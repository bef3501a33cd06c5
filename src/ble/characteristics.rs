//! GATT characteristic handling.
//!
//! Reads and subscribes to characteristics on a connected btleplug
//! peripheral and forwards notifications into the central event queue.

use btleplug::api::{CharPropFlags, Characteristic, Peripheral as _, Service};
use btleplug::platform::Peripheral;
use bytes::Bytes;
use futures::stream::StreamExt;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, error, trace};
use uuid::Uuid;

use crate::ble::transport::{CentralEvent, ChannelHandle, ChannelProperties, ServiceHandle};
use crate::error::{Error, Result};

impl From<CharPropFlags> for ChannelProperties {
    fn from(flags: CharPropFlags) -> Self {
        Self {
            read: flags.contains(CharPropFlags::READ),
            write: flags.contains(CharPropFlags::WRITE)
                || flags.contains(CharPropFlags::WRITE_WITHOUT_RESPONSE),
            notify: flags.contains(CharPropFlags::NOTIFY)
                || flags.contains(CharPropFlags::INDICATE),
        }
    }
}

impl From<&Characteristic> for ChannelHandle {
    fn from(characteristic: &Characteristic) -> Self {
        Self {
            uuid: characteristic.uuid,
            service_uuid: characteristic.service_uuid,
            properties: characteristic.properties.into(),
        }
    }
}

impl From<&Service> for ServiceHandle {
    fn from(service: &Service) -> Self {
        Self {
            uuid: service.uuid,
            characteristics: service.characteristics.iter().map(ChannelHandle::from).collect(),
        }
    }
}

/// Handler for GATT characteristics on a connected peripheral.
pub struct CharacteristicHandler {
    /// The peripheral to communicate with.
    peripheral: Peripheral,
    /// Central event queue notifications are forwarded to.
    event_tx: broadcast::Sender<CentralEvent<Peripheral>>,
    /// Whether we're currently listening for notifications.
    is_listening: Arc<AtomicBool>,
    /// Handle to the notification listener task.
    listener_handle: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl CharacteristicHandler {
    /// Create a new characteristic handler for a peripheral.
    ///
    /// Note: Services must be discovered before using this handler.
    pub fn new(
        peripheral: Peripheral,
        event_tx: broadcast::Sender<CentralEvent<Peripheral>>,
    ) -> Self {
        Self {
            peripheral,
            event_tx,
            is_listening: Arc::new(AtomicBool::new(false)),
            listener_handle: Mutex::new(None),
        }
    }

    /// Find the btleplug characteristic behind a channel handle.
    fn characteristic(&self, uuid: &Uuid) -> Result<Characteristic> {
        self.peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == *uuid)
            .ok_or_else(|| Error::CharacteristicNotFound {
                uuid: uuid.to_string(),
            })
    }

    /// Read a characteristic value.
    pub async fn read(&self, uuid: &Uuid) -> Result<Vec<u8>> {
        let characteristic = self.characteristic(uuid)?;

        let data = self
            .peripheral
            .read(&characteristic)
            .await
            .map_err(Error::Bluetooth)?;

        trace!("Read {} bytes from characteristic {}", data.len(), uuid);

        Ok(data)
    }

    /// Subscribe to notifications from a characteristic.
    pub async fn subscribe(&self, uuid: &Uuid) -> Result<()> {
        let characteristic = self.characteristic(uuid)?;

        debug!(
            "Found characteristic {}, properties: {:?}",
            uuid, characteristic.properties
        );

        self.peripheral
            .subscribe(&characteristic)
            .await
            .map_err(|e| {
                debug!("Failed to subscribe to {}: {:?}", uuid, e);
                Error::Bluetooth(e)
            })?;

        debug!("Successfully subscribed to notifications from {}", uuid);

        Ok(())
    }

    /// Start forwarding notifications into the central event queue.
    pub async fn start_notifications(&self) -> Result<()> {
        if self.is_listening.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let mut notifications = match self.peripheral.notifications().await {
            Ok(n) => n,
            Err(e) => {
                self.is_listening.store(false, Ordering::SeqCst);
                return Err(Error::Bluetooth(e));
            }
        };

        let is_listening = self.is_listening.clone();
        let event_tx = self.event_tx.clone();

        let handle = tokio::spawn(async move {
            debug!("Notification listener started");

            while is_listening.load(Ordering::SeqCst) {
                match notifications.next().await {
                    Some(notification) => {
                        trace!(
                            "Notification received from {}: {} bytes",
                            notification.uuid,
                            notification.value.len()
                        );

                        let _ = event_tx.send(CentralEvent::Notification {
                            characteristic: notification.uuid,
                            value: Bytes::from(notification.value),
                        });
                    }
                    None => {
                        error!("Notification stream closed");
                        break;
                    }
                }
            }

            is_listening.store(false, Ordering::SeqCst);
            debug!("Notification listener stopped");
        });

        *self.listener_handle.lock() = Some(handle);

        Ok(())
    }

    /// Stop forwarding notifications.
    pub fn stop_notifications(&self) {
        self.is_listening.store(false, Ordering::SeqCst);

        if let Some(handle) = self.listener_handle.lock().take() {
            handle.abort();
        }
    }
}

impl Drop for CharacteristicHandler {
    fn drop(&mut self) {
        self.stop_notifications();
    }
}
