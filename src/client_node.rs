//! Client node: finds the sensing node, subscribes to its distance
//! characteristic and keeps running statistics of what it receives.

use std::future::Future;
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::TryRecvError};
use tracing::{debug, info, warn};

use crate::ble::transport::{find_service, CentralEvent, CentralTransport, ChannelHandle};
use crate::config::ClientNodeConfig;
use crate::data::stats::StatsAccumulator;
use crate::error::Result;
use crate::protocol::frame::decode_bytes;
use crate::session::consumer::{ConsumerEvent, ConsumerSession, ConsumerState};

/// A decoded distance together with the statistics after applying it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SampleUpdate {
    /// Decoded distance in centimetres.
    pub value: f64,
    /// Statistics including this value.
    pub stats: StatsAccumulator,
}

/// The consuming end of the link.
pub struct ClientNode<T: CentralTransport> {
    transport: Arc<T>,
    config: ClientNodeConfig,
    session: ConsumerSession<T::Peer>,
    stats: StatsAccumulator,
    events: broadcast::Receiver<CentralEvent<T::Peer>>,
    scanning: bool,
    channel: Option<ChannelHandle>,
    sample_tx: broadcast::Sender<SampleUpdate>,
}

impl<T: CentralTransport> ClientNode<T> {
    /// Create a client node over the given transport.
    pub fn new(transport: Arc<T>, config: ClientNodeConfig) -> Self {
        let events = transport.events();
        let (sample_tx, _) = broadcast::channel(32);

        Self {
            transport,
            session: ConsumerSession::new(config.service_uuid),
            config,
            stats: StatsAccumulator::new(),
            events,
            scanning: false,
            channel: None,
            sample_tx,
        }
    }

    /// Current session state.
    pub fn state(&self) -> ConsumerState {
        self.session.state()
    }

    /// Statistics of every value received so far.
    pub fn stats(&self) -> &StatsAccumulator {
        &self.stats
    }

    /// The subscribed channel, while a session is up.
    pub fn channel(&self) -> Option<&ChannelHandle> {
        self.channel.as_ref()
    }

    /// Subscribe to decoded samples.
    pub fn subscribe_samples(&self) -> broadcast::Receiver<SampleUpdate> {
        self.sample_tx.subscribe()
    }

    /// Run one iteration of the client loop.
    ///
    /// Queued transport events are applied first. A latched candidate is then
    /// connected to, and scanning is (re)started whenever the session is back
    /// to looking for a peer.
    pub async fn step(&mut self) -> Result<()> {
        self.drain_events().await;

        match self.session.state() {
            ConsumerState::CandidateFound => self.connect_candidate().await,
            ConsumerState::Disconnected => {
                self.session.handle(ConsumerEvent::ScanResumed);
            }
            _ => {}
        }

        if self.session.state() == ConsumerState::Scanning && !self.scanning {
            self.transport.start_scan().await?;
            self.scanning = true;
            info!("Scanning for {}", self.config.service_uuid);
        }
        Ok(())
    }

    /// Step until `shutdown` resolves, then tear the session down.
    pub async fn run<F>(&mut self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        loop {
            if let Err(e) = self.step().await {
                warn!("Client step failed: {}", e);
            }

            tokio::select! {
                _ = &mut shutdown => break,
                _ = tokio::time::sleep(self.config.loop_interval) => {}
            }
        }

        self.shutdown().await
    }

    /// Stop scanning and disconnect from the current peer, if any.
    ///
    /// A subscribed session ends in [`ConsumerState::Disconnected`]; a
    /// latched candidate is released back to [`ConsumerState::Scanning`].
    pub async fn shutdown(&mut self) -> Result<()> {
        info!("Shutting down client node");

        if self.scanning {
            self.transport.stop_scan().await?;
            self.scanning = false;
        }

        if let Some(peer) = self.session.candidate().cloned() {
            if let Err(e) = self.transport.disconnect(&peer.handle).await {
                warn!("Error disconnecting {}: {}", peer.id, e);
            }

            let event = if self.session.state().is_subscribed() {
                ConsumerEvent::Disconnected { id: peer.id }
            } else {
                ConsumerEvent::ConnectFailed {
                    reason: "client shut down".to_string(),
                }
            };
            self.session.handle(event);
        }
        self.channel = None;
        Ok(())
    }

    async fn drain_events(&mut self) {
        loop {
            let event = match self.events.try_recv() {
                Ok(event) => event,
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
                Err(TryRecvError::Lagged(skipped)) => {
                    warn!("Dropped {} transport events", skipped);
                    continue;
                }
            };

            match event {
                CentralEvent::Advertisement(peer) => {
                    let latched = self
                        .session
                        .handle(ConsumerEvent::Advertisement(peer))
                        .is_some();
                    if latched && self.scanning {
                        if let Err(e) = self.transport.stop_scan().await {
                            warn!("Failed to stop scanning: {}", e);
                        }
                        self.scanning = false;
                    }
                }
                CentralEvent::Notification {
                    characteristic,
                    value,
                } => self.on_notification(characteristic, &value),
                CentralEvent::Disconnected { id } => {
                    let peer = self.session.candidate().cloned();
                    if self
                        .session
                        .handle(ConsumerEvent::Disconnected { id })
                        .is_some()
                    {
                        info!("Disconnected from server");
                        self.channel = None;
                        if let Some(peer) = peer {
                            self.release(&peer.handle).await;
                        }
                    }
                }
            }
        }
    }

    fn on_notification(&mut self, characteristic: uuid::Uuid, payload: &[u8]) {
        if characteristic != self.config.characteristic_uuid || !self.session.state().is_subscribed()
        {
            debug!("Ignoring notification from {}", characteristic);
            return;
        }

        let value = decode_bytes(payload);
        self.stats.observe(value);
        info!("{}", self.stats);

        let _ = self.sample_tx.send(SampleUpdate {
            value,
            stats: self.stats,
        });
    }

    async fn connect_candidate(&mut self) {
        let Some(peer) = self.session.candidate().cloned() else {
            return;
        };

        info!("Forming a connection to {}", peer.id);
        self.session.handle(ConsumerEvent::ConnectStarted);

        match self.establish(&peer.handle).await {
            Ok(channel) => {
                info!("Connected to the BLE server");
                self.channel = Some(channel);
                self.session.handle(ConsumerEvent::Subscribed);
            }
            Err(e) => {
                if e.is_lookup_failure() {
                    warn!("Distance channel missing on {}: {}", peer.id, e);
                } else {
                    warn!("Could not connect to {}: {}", peer.id, e);
                }
                self.release(&peer.handle).await;
                self.session.handle(ConsumerEvent::ConnectFailed {
                    reason: e.to_string(),
                });
            }
        }
    }

    /// Best-effort teardown of transport state left by a peer.
    async fn release(&self, peer: &T::Peer) {
        if let Err(e) = self.transport.disconnect(peer).await {
            debug!("Disconnect after losing the session: {}", e);
        }
    }

    /// Connect, look up the distance channel, read it once and subscribe.
    async fn establish(&self, peer: &T::Peer) -> Result<ChannelHandle> {
        self.transport.connect(peer).await?;

        let services = self.transport.discover_services(peer).await?;
        let service = find_service(&services, &self.config.service_uuid)?;
        let channel = service
            .characteristic(&self.config.characteristic_uuid)?
            .clone();

        if channel.properties.read {
            match self.transport.read(peer, &channel).await {
                Ok(value) => info!(
                    "The characteristic value was: {}",
                    String::from_utf8_lossy(&value)
                ),
                Err(e) => warn!("Initial read of {} failed: {}", channel.uuid, e),
            }
        }

        if channel.properties.notify {
            self.transport.subscribe(peer, &channel).await?;
        }

        Ok(channel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::loopback::LoopbackLink;
    use crate::ble::transport::{PeripheralTransport, ServiceHandle};
    use crate::ble::uuids::{
        DEFAULT_DEVICE_NAME, DISTANCE_CHARACTERISTIC_UUID, DISTANCE_SERVICE_UUID,
    };
    use pretty_assertions::assert_eq;

    async fn advertise(link: &LoopbackLink) {
        link.peripheral()
            .start_advertising(DISTANCE_SERVICE_UUID, DEFAULT_DEVICE_NAME)
            .await
            .unwrap();
    }

    fn client(link: &LoopbackLink) -> ClientNode<crate::ble::loopback::LoopbackCentral> {
        ClientNode::new(Arc::new(link.central()), ClientNodeConfig::new())
    }

    #[tokio::test]
    async fn test_first_step_starts_scanning() {
        let link = LoopbackLink::new();
        let mut node = client(&link);

        node.step().await.unwrap();
        assert_eq!(node.state(), ConsumerState::Scanning);
        assert!(link.is_scanning());
    }

    #[tokio::test]
    async fn test_discovers_and_subscribes() {
        let link = LoopbackLink::new();
        let mut node = client(&link);
        advertise(&link).await;

        node.step().await.unwrap();
        node.step().await.unwrap();

        assert_eq!(node.state(), ConsumerState::Subscribed);
        assert!(!link.is_scanning());
        assert!(link.is_connected());
        assert_eq!(
            node.channel().map(|c| c.uuid),
            Some(DISTANCE_CHARACTERISTIC_UUID)
        );
    }

    #[tokio::test]
    async fn test_notifications_update_stats() {
        let link = LoopbackLink::new();
        let mut node = client(&link);
        let mut samples = node.subscribe_samples();
        advertise(&link).await;
        node.step().await.unwrap();
        node.step().await.unwrap();

        let peripheral = link.peripheral();
        for frame in ["Distance: 12.00", "Distance: 4.50", "Distance: 20.25"] {
            peripheral
                .notify(DISTANCE_CHARACTERISTIC_UUID, frame.as_bytes())
                .await
                .unwrap();
        }
        node.step().await.unwrap();

        assert_eq!(node.stats().samples(), 3);
        assert_eq!(node.stats().current(), 20.25);
        assert_eq!(node.stats().max(), 20.25);
        assert_eq!(node.stats().min(), 4.5);
        assert_eq!(samples.try_recv().unwrap().value, 12.0);
    }

    #[tokio::test]
    async fn test_malformed_frame_counts_as_zero() {
        let link = LoopbackLink::new();
        let mut node = client(&link);
        advertise(&link).await;
        node.step().await.unwrap();
        node.step().await.unwrap();

        link.peripheral()
            .notify(DISTANCE_CHARACTERISTIC_UUID, b"garbage")
            .await
            .unwrap();
        node.step().await.unwrap();

        assert_eq!(node.stats().current(), 0.0);
        assert_eq!(node.stats().min(), 0.0);
    }

    #[tokio::test]
    async fn test_lookup_failure_returns_to_scanning() {
        let link = LoopbackLink::with_services(vec![ServiceHandle {
            uuid: DISTANCE_SERVICE_UUID,
            characteristics: Vec::new(),
        }]);
        let mut node = client(&link);
        advertise(&link).await;

        node.step().await.unwrap();
        node.step().await.unwrap();

        assert_eq!(node.state(), ConsumerState::Scanning);
        assert!(node.channel().is_none());
        assert!(!link.is_connected());
        assert!(link.is_scanning());
    }

    #[tokio::test]
    async fn test_refused_connection_returns_to_scanning() {
        let link = LoopbackLink::new();
        link.refuse_connections(true);
        let mut node = client(&link);
        advertise(&link).await;

        node.step().await.unwrap();
        node.step().await.unwrap();

        assert_eq!(node.state(), ConsumerState::Scanning);
        assert!(node.session.candidate().is_none());
    }

    #[tokio::test]
    async fn test_session_loss_rescans() {
        let link = LoopbackLink::new();
        let mut node = client(&link);
        advertise(&link).await;
        node.step().await.unwrap();
        node.step().await.unwrap();
        assert_eq!(node.state(), ConsumerState::Subscribed);

        link.drop_connection();
        node.step().await.unwrap();

        assert_eq!(node.state(), ConsumerState::Scanning);
        assert!(link.is_scanning());
        assert!(node.channel().is_none());
    }

    #[tokio::test]
    async fn test_shutdown_disconnects() {
        let link = LoopbackLink::new();
        let mut node = client(&link);
        advertise(&link).await;
        node.step().await.unwrap();
        node.step().await.unwrap();

        node.shutdown().await.unwrap();
        assert!(!link.is_connected());
        assert!(!link.is_scanning());
        assert_eq!(node.state(), ConsumerState::Disconnected);
        assert!(node.session.candidate().is_none());
        assert!(node.channel().is_none());
    }

    #[tokio::test]
    async fn test_shutdown_releases_unconnected_candidate() {
        let link = LoopbackLink::new();
        let mut node = client(&link);
        advertise(&link).await;
        node.step().await.unwrap();

        // Latch a candidate without giving the step a chance to connect.
        node.drain_events().await;
        assert_eq!(node.state(), ConsumerState::CandidateFound);

        node.shutdown().await.unwrap();
        assert_eq!(node.state(), ConsumerState::Scanning);
        assert!(node.session.candidate().is_none());
        assert!(!link.is_connected());
    }

    #[tokio::test]
    async fn test_failed_initial_read_still_subscribes() {
        let link = LoopbackLink::new();
        link.refuse_reads(true);
        let mut node = client(&link);
        advertise(&link).await;

        node.step().await.unwrap();
        node.step().await.unwrap();

        assert_eq!(node.state(), ConsumerState::Subscribed);
        assert!(link.is_connected());

        link.peripheral()
            .notify(DISTANCE_CHARACTERISTIC_UUID, b"Distance: 7.00")
            .await
            .unwrap();
        node.step().await.unwrap();
        assert_eq!(node.stats().current(), 7.0);
    }

    #[tokio::test]
    async fn test_session_loss_releases_transport() {
        let link = LoopbackLink::new();
        let mut node = client(&link);
        advertise(&link).await;
        node.step().await.unwrap();
        node.step().await.unwrap();

        link.drop_connection();
        node.step().await.unwrap();

        // Tearing down an already dropped link must not block the rescan.
        assert!(!link.is_connected());
        assert_eq!(node.state(), ConsumerState::Scanning);
        advertise(&link).await;
        node.step().await.unwrap();
        node.step().await.unwrap();
        assert_eq!(node.state(), ConsumerState::Subscribed);
    }
}
