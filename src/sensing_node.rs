//! Sensing node: polls the rangefinder, smooths the signal and publishes
//! nearby readings to the subscriber.
//!
//! Runs as a single cooperative loop. Transport events are queued by the
//! radio and drained at the start of every poll. Advertising is (re)started
//! from the poll as well: once due, every poll retries it until the radio
//! accepts.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::broadcast::{self, error::TryRecvError};
use tracing::{debug, info, trace, warn};

use crate::ble::transport::{PeripheralEvent, PeripheralTransport};
use crate::config::SensingNodeConfig;
use crate::data::filter::MovingAverage;
use crate::error::Result;
use crate::publisher::{PublishDecision, Publisher, SkipReason};
use crate::sensor::{measure_distance, RangeSensor};
use crate::session::producer::{ProducerAction, ProducerEvent, ProducerSession, ProducerState};

/// Result of one poll.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    /// Distance computed from the echo, in centimetres.
    pub raw_cm: f64,
    /// Moving average after this sample.
    pub filtered_cm: f64,
    /// Whether a frame was sent for this reading.
    pub published: bool,
}

/// The producing end of the link.
pub struct SensingNode<T, S> {
    transport: Arc<T>,
    sensor: S,
    config: SensingNodeConfig,
    filter: MovingAverage,
    publisher: Publisher,
    session: ProducerSession,
    events: broadcast::Receiver<PeripheralEvent>,
    /// When advertising should (re)start; `None` when nothing is owed.
    advertise_at: Option<tokio::time::Instant>,
}

impl<T, S> SensingNode<T, S>
where
    T: PeripheralTransport,
    S: RangeSensor,
{
    /// Create a sensing node.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn new(transport: Arc<T>, sensor: S, config: SensingNodeConfig) -> Result<Self> {
        config.validate()?;

        let filter = MovingAverage::new(config.filter_window)?;
        let publisher = Publisher::new(config.proximity_threshold_cm, config.publish_interval);
        let events = transport.events();

        Ok(Self {
            transport,
            sensor,
            config,
            filter,
            publisher,
            session: ProducerSession::new(),
            events,
            advertise_at: None,
        })
    }

    /// Current session state.
    pub fn state(&self) -> ProducerState {
        self.session.state()
    }

    /// The node configuration.
    pub fn config(&self) -> &SensingNodeConfig {
        &self.config
    }

    /// Current output of the moving average.
    pub fn filtered_distance(&self) -> f64 {
        self.filter.average()
    }

    /// Whether advertising is due or waiting out the settle delay.
    pub fn is_advertise_pending(&self) -> bool {
        self.advertise_at.is_some()
    }

    /// Bring up the characteristic and start advertising.
    ///
    /// # Errors
    ///
    /// Returns the transport error if advertising could not be started. The
    /// attempt stays pending: calling `start` again, or polling, retries it.
    pub async fn start(&mut self) -> Result<()> {
        info!("Starting sensing node {}", self.config.device_name);

        self.transport
            .set_value(self.config.characteristic_uuid, &[])
            .await?;

        self.apply(ProducerEvent::Started);
        self.advertise_if_due().await
    }

    /// Run one poll: apply queued transport events, measure, filter and
    /// publish if the gates allow it.
    pub async fn poll(&mut self, now: Instant) -> Result<Reading> {
        self.drain_events();
        if let Err(e) = self.advertise_if_due().await {
            warn!("Failed to start advertising, retrying next poll: {}", e);
        }

        let raw_cm = measure_distance(&mut self.sensor).await?;
        let filtered_cm = self.filter.update(raw_cm);
        debug!(
            "Raw Distance: {:.2} cm\tFiltered Distance: {:.2} cm",
            raw_cm, filtered_cm
        );

        let published = match self
            .publisher
            .evaluate(filtered_cm, self.session.state(), now)
        {
            PublishDecision::Publish(frame) => self.transmit(&frame, now).await,
            PublishDecision::Skip(SkipReason::RateLimited) => {
                debug!("Publish skipped, interval not elapsed");
                false
            }
            PublishDecision::Skip(_) => false,
        };

        Ok(Reading {
            raw_cm,
            filtered_cm,
            published,
        })
    }

    /// Poll until `shutdown` resolves.
    ///
    /// Errors from a single poll are logged and the loop carries on.
    pub async fn run<F>(&mut self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        self.start().await?;
        tokio::pin!(shutdown);

        loop {
            if let Err(e) = self.poll(Instant::now()).await {
                warn!("Poll failed: {}", e);
            }

            tokio::select! {
                _ = &mut shutdown => break,
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }

        info!("Sensing node stopped");
        self.transport.stop_advertising().await
    }

    /// Send a frame and record it; failures leave the rate gate untouched.
    async fn transmit(&mut self, frame: &str, now: Instant) -> bool {
        let uuid = self.config.characteristic_uuid;

        let sent = match self.transport.set_value(uuid, frame.as_bytes()).await {
            Ok(()) => self.transport.notify(uuid, frame.as_bytes()).await,
            Err(e) => Err(e),
        };

        match sent {
            Ok(()) => {
                info!("Notify value: {}", frame);
                self.publisher.record_transmission(now);
                true
            }
            Err(e) => {
                warn!("Failed to notify subscriber: {}", e);
                false
            }
        }
    }

    /// Apply every queued transport event to the session.
    fn drain_events(&mut self) {
        loop {
            let event = match self.events.try_recv() {
                Ok(event) => event,
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
                Err(TryRecvError::Lagged(skipped)) => {
                    warn!("Dropped {} transport events", skipped);
                    continue;
                }
            };

            let event = match event {
                PeripheralEvent::SubscriberConnected => ProducerEvent::SubscriberConnected,
                PeripheralEvent::SubscriberDisconnected => ProducerEvent::SubscriberDisconnected,
            };

            self.apply(event);
        }
    }

    /// Feed an event to the session and schedule the advertising it asks for.
    fn apply(&mut self, event: ProducerEvent) {
        let action = self.session.handle(event);
        let now = tokio::time::Instant::now();

        match action {
            Some(ProducerAction::StartAdvertising) => self.advertise_at = Some(now),
            Some(ProducerAction::ResumeAdvertising) => {
                // The radio stack needs time to settle before broadcasting again.
                self.advertise_at = Some(now + self.config.settle_delay);
            }
            None if self.session.state().is_connected() => self.advertise_at = None,
            None => {}
        }
    }

    /// Start advertising if it is owed and the settle delay has passed.
    async fn advertise_if_due(&mut self) -> Result<()> {
        let Some(due) = self.advertise_at else {
            return Ok(());
        };
        if tokio::time::Instant::now() < due {
            trace!("Advertising deferred until the radio settles");
            return Ok(());
        }

        self.transport
            .start_advertising(self.config.service_uuid, &self.config.device_name)
            .await?;

        self.advertise_at = None;
        info!("Advertising {}", self.config.service_uuid);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::loopback::{LoopbackLink, LoopbackPeer, LoopbackPeripheral, LOOPBACK_PEER_ID};
    use crate::ble::transport::{CentralTransport, ServiceHandle};
    use crate::ble::uuids::DISTANCE_SERVICE_UUID;
    use crate::error::Error;
    use crate::sensor::{MockRangeSensor, ScriptedSensor};
    use crate::utils::centimeters_to_ticks;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use uuid::Uuid;

    /// Loopback peripheral whose radio rejects a set number of calls.
    struct FlakyPeripheral {
        inner: LoopbackPeripheral,
        advertise_failures: AtomicUsize,
        notify_failures: AtomicUsize,
    }

    impl FlakyPeripheral {
        fn new(link: &LoopbackLink) -> Arc<Self> {
            Arc::new(Self {
                inner: link.peripheral(),
                advertise_failures: AtomicUsize::new(0),
                notify_failures: AtomicUsize::new(0),
            })
        }

        fn fail_advertising(&self, times: usize) {
            self.advertise_failures.store(times, Ordering::SeqCst);
        }

        fn fail_notify(&self, times: usize) {
            self.notify_failures.store(times, Ordering::SeqCst);
        }
    }

    fn take_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn radio_error() -> Error {
        Error::Bluetooth(btleplug::Error::RuntimeError("radio busy".to_string()))
    }

    #[async_trait]
    impl PeripheralTransport for FlakyPeripheral {
        async fn start_advertising(&self, service: Uuid, local_name: &str) -> Result<()> {
            if take_failure(&self.advertise_failures) {
                return Err(radio_error());
            }
            self.inner.start_advertising(service, local_name).await
        }

        async fn stop_advertising(&self) -> Result<()> {
            self.inner.stop_advertising().await
        }

        async fn set_value(&self, characteristic: Uuid, value: &[u8]) -> Result<()> {
            self.inner.set_value(characteristic, value).await
        }

        async fn notify(&self, characteristic: Uuid, value: &[u8]) -> Result<()> {
            if take_failure(&self.notify_failures) {
                return Err(radio_error());
            }
            self.inner.notify(characteristic, value).await
        }

        fn events(&self) -> broadcast::Receiver<PeripheralEvent> {
            self.inner.events()
        }
    }

    fn test_config() -> SensingNodeConfig {
        SensingNodeConfig::new().with_settle_delay(Duration::ZERO)
    }

    fn peer() -> LoopbackPeer {
        LoopbackPeer {
            id: LOOPBACK_PEER_ID.to_string(),
        }
    }

    async fn subscribe_central(link: &LoopbackLink) {
        let central = link.central();
        central.connect(&peer()).await.unwrap();
        let channel = ServiceHandle::distance_service().characteristics[0].clone();
        central.subscribe(&peer(), &channel).await.unwrap();
    }

    #[tokio::test]
    async fn test_start_advertises() {
        let link = LoopbackLink::new();
        let sensor = ScriptedSensor::new(&[10.0]).unwrap();
        let mut node = SensingNode::new(Arc::new(link.peripheral()), sensor, test_config()).unwrap();

        assert_eq!(node.state(), ProducerState::Idle);
        node.start().await.unwrap();
        assert_eq!(node.state(), ProducerState::Advertising);
        assert!(link.is_advertising());
    }

    #[tokio::test]
    async fn test_rejects_invalid_config() {
        let link = LoopbackLink::new();
        let sensor = ScriptedSensor::new(&[10.0]).unwrap();
        let result = SensingNode::new(
            Arc::new(link.peripheral()),
            sensor,
            test_config().with_filter_window(0),
        );
        assert!(matches!(result, Err(Error::InvalidParameter { .. })));
    }

    #[tokio::test]
    async fn test_no_publish_without_subscriber() {
        let link = LoopbackLink::new();
        let sensor = ScriptedSensor::new(&[5.0]).unwrap();
        let mut node = SensingNode::new(Arc::new(link.peripheral()), sensor, test_config()).unwrap();
        node.start().await.unwrap();

        let reading = node.poll(Instant::now()).await.unwrap();
        assert!(!reading.published);
        assert!((reading.filtered_cm - 0.5).abs() < 0.01);
    }

    #[tokio::test]
    async fn test_publishes_to_subscriber_with_rate_limit() {
        let link = LoopbackLink::new();
        let sensor = ScriptedSensor::new(&[20.0]).unwrap();
        let mut node = SensingNode::new(Arc::new(link.peripheral()), sensor, test_config()).unwrap();
        node.start().await.unwrap();
        subscribe_central(&link).await;

        let start = Instant::now();
        let first = node.poll(start).await.unwrap();
        assert_eq!(node.state(), ProducerState::Connected);
        assert!(first.published);

        let second = node.poll(start + Duration::from_millis(800)).await.unwrap();
        assert!(!second.published);

        let third = node.poll(start + Duration::from_millis(1600)).await.unwrap();
        assert!(third.published);
        assert_eq!(link.notifications_sent(), 2);
    }

    #[tokio::test]
    async fn test_readvertises_after_subscriber_leaves() {
        let link = LoopbackLink::new();
        let sensor = ScriptedSensor::new(&[50.0]).unwrap();
        let mut node = SensingNode::new(Arc::new(link.peripheral()), sensor, test_config()).unwrap();
        node.start().await.unwrap();
        subscribe_central(&link).await;

        node.poll(Instant::now()).await.unwrap();
        assert_eq!(node.state(), ProducerState::Connected);
        assert!(!link.is_advertising());

        link.drop_connection();
        node.poll(Instant::now()).await.unwrap();
        assert_eq!(node.state(), ProducerState::Advertising);
        assert!(link.is_advertising());
    }

    #[tokio::test]
    async fn test_filter_survives_reconnect() {
        let link = LoopbackLink::new();
        let sensor = ScriptedSensor::new(&[40.0]).unwrap();
        let mut node = SensingNode::new(Arc::new(link.peripheral()), sensor, test_config()).unwrap();
        node.start().await.unwrap();

        for _ in 0..5 {
            node.poll(Instant::now()).await.unwrap();
        }
        subscribe_central(&link).await;
        link.drop_connection();

        let reading = node.poll(Instant::now()).await.unwrap();
        assert!((reading.filtered_cm - 24.0).abs() < 0.01);
    }

    #[tokio::test]
    async fn test_sensor_fault_propagates() {
        let link = LoopbackLink::new();
        let mut sensor = MockRangeSensor::new();
        let mut script = vec![
            Err(Error::SensorFault {
                reason: "no echo".to_string(),
            }),
            Ok(centimeters_to_ticks(10.0)),
        ]
        .into_iter();
        sensor
            .expect_trigger_and_measure()
            .times(2)
            .returning(move || script.next().unwrap_or(Ok(0)));

        let mut node = SensingNode::new(Arc::new(link.peripheral()), sensor, test_config()).unwrap();
        node.start().await.unwrap();

        assert!(node.poll(Instant::now()).await.is_err());
        let reading = node.poll(Instant::now()).await.unwrap();
        assert!((reading.raw_cm - 10.0).abs() < 0.02);
    }

    #[tokio::test]
    async fn test_advertises_configured_service() {
        let link = LoopbackLink::new();
        let central = link.central();
        let mut events = central.events();
        central.start_scan().await.unwrap();

        let sensor = ScriptedSensor::new(&[10.0]).unwrap();
        let mut node = SensingNode::new(Arc::new(link.peripheral()), sensor, test_config()).unwrap();
        node.start().await.unwrap();

        match events.try_recv() {
            Ok(crate::ble::transport::CentralEvent::Advertisement(peer)) => {
                assert!(peer.advertises(&DISTANCE_SERVICE_UUID));
            }
            other => panic!("expected advertisement, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_start_retries_after_advertise_failure() {
        let link = LoopbackLink::new();
        let radio = FlakyPeripheral::new(&link);
        radio.fail_advertising(1);
        let sensor = ScriptedSensor::new(&[10.0]).unwrap();
        let mut node = SensingNode::new(radio.clone(), sensor, test_config()).unwrap();

        assert!(node.start().await.is_err());
        assert_eq!(node.state(), ProducerState::Advertising);
        assert!(node.is_advertise_pending());
        assert!(!link.is_advertising());

        node.start().await.unwrap();
        assert!(!node.is_advertise_pending());
        assert!(link.is_advertising());
    }

    #[tokio::test]
    async fn test_poll_retries_failed_readvertise() {
        let link = LoopbackLink::new();
        let radio = FlakyPeripheral::new(&link);
        let sensor = ScriptedSensor::new(&[50.0]).unwrap();
        let mut node = SensingNode::new(radio.clone(), sensor, test_config()).unwrap();
        node.start().await.unwrap();
        subscribe_central(&link).await;
        node.poll(Instant::now()).await.unwrap();
        assert_eq!(node.state(), ProducerState::Connected);

        radio.fail_advertising(1);
        link.drop_connection();

        node.poll(Instant::now()).await.unwrap();
        assert_eq!(node.state(), ProducerState::Advertising);
        assert!(!link.is_advertising());

        node.poll(Instant::now()).await.unwrap();
        assert!(link.is_advertising());
        assert!(!node.is_advertise_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn test_readvertise_waits_for_settle_delay() {
        let link = LoopbackLink::new();
        let sensor = ScriptedSensor::new(&[50.0]).unwrap();
        let config = SensingNodeConfig::new().with_settle_delay(Duration::from_millis(500));
        let mut node = SensingNode::new(Arc::new(link.peripheral()), sensor, config).unwrap();
        node.start().await.unwrap();
        subscribe_central(&link).await;
        node.poll(Instant::now()).await.unwrap();

        link.drop_connection();
        node.poll(Instant::now()).await.unwrap();
        assert_eq!(node.state(), ProducerState::Advertising);
        assert!(!link.is_advertising());

        tokio::time::advance(Duration::from_millis(499)).await;
        node.poll(Instant::now()).await.unwrap();
        assert!(!link.is_advertising());

        tokio::time::advance(Duration::from_millis(1)).await;
        node.poll(Instant::now()).await.unwrap();
        assert!(link.is_advertising());
    }

    #[tokio::test]
    async fn test_failed_notify_leaves_rate_gate_open() {
        let link = LoopbackLink::new();
        let radio = FlakyPeripheral::new(&link);
        let sensor = ScriptedSensor::new(&[20.0]).unwrap();
        let mut node = SensingNode::new(radio.clone(), sensor, test_config()).unwrap();
        node.start().await.unwrap();
        subscribe_central(&link).await;

        let start = Instant::now();
        assert!(node.poll(start).await.unwrap().published);

        radio.fail_notify(1);
        let failed = node.poll(start + Duration::from_millis(1000)).await.unwrap();
        assert!(!failed.published);

        // Within a second of the failed attempt, but the gate still dates from `start`.
        let retried = node.poll(start + Duration::from_millis(1400)).await.unwrap();
        assert!(retried.published);
        assert_eq!(link.notifications_sent(), 2);
    }
}
