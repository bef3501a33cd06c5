//! Node configuration.

use std::time::Duration;
use uuid::Uuid;

use crate::ble::uuids::{DEFAULT_DEVICE_NAME, DISTANCE_CHARACTERISTIC_UUID, DISTANCE_SERVICE_UUID};
use crate::data::filter::DEFAULT_WINDOW;
use crate::error::{Error, Result};
use crate::publisher::{DEFAULT_PUBLISH_INTERVAL, DEFAULT_THRESHOLD_CM};

/// Configuration of the sensing node.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SensingNodeConfig {
    /// Local name advertised alongside the service.
    pub device_name: String,
    /// Service UUID to advertise.
    pub service_uuid: Uuid,
    /// Characteristic UUID carrying distance frames.
    pub characteristic_uuid: Uuid,
    /// Delay between sensor polls.
    pub poll_interval: Duration,
    /// Minimum spacing between notifications.
    pub publish_interval: Duration,
    /// Only distances below this are published.
    pub proximity_threshold_cm: f64,
    /// Number of samples in the moving average.
    pub filter_window: usize,
    /// Pause before advertising again after the subscriber leaves.
    pub settle_delay: Duration,
}

impl Default for SensingNodeConfig {
    fn default() -> Self {
        Self {
            device_name: DEFAULT_DEVICE_NAME.to_string(),
            service_uuid: DISTANCE_SERVICE_UUID,
            characteristic_uuid: DISTANCE_CHARACTERISTIC_UUID,
            poll_interval: Duration::from_millis(800),
            publish_interval: DEFAULT_PUBLISH_INTERVAL,
            proximity_threshold_cm: DEFAULT_THRESHOLD_CM,
            filter_window: DEFAULT_WINDOW,
            settle_delay: Duration::from_millis(500),
        }
    }
}

impl SensingNodeConfig {
    /// Create a configuration with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the advertised device name.
    pub fn with_device_name(mut self, name: impl Into<String>) -> Self {
        self.device_name = name.into();
        self
    }

    /// Set the poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the minimum spacing between notifications.
    pub fn with_publish_interval(mut self, interval: Duration) -> Self {
        self.publish_interval = interval;
        self
    }

    /// Set the proximity threshold.
    pub fn with_proximity_threshold(mut self, threshold_cm: f64) -> Self {
        self.proximity_threshold_cm = threshold_cm;
        self
    }

    /// Set the moving-average window.
    pub fn with_filter_window(mut self, window: usize) -> Self {
        self.filter_window = window;
        self
    }

    /// Set the settle delay before re-advertising.
    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    /// Check the configuration for values the node cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.filter_window == 0 {
            return Err(Error::InvalidParameter {
                name: "filter_window".to_string(),
                value: self.filter_window.to_string(),
            });
        }
        if !self.proximity_threshold_cm.is_finite() {
            return Err(Error::InvalidParameter {
                name: "proximity_threshold_cm".to_string(),
                value: self.proximity_threshold_cm.to_string(),
            });
        }
        Ok(())
    }
}

/// Configuration of the client node.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ClientNodeConfig {
    /// Service UUID to look for.
    pub service_uuid: Uuid,
    /// Characteristic UUID to subscribe to.
    pub characteristic_uuid: Uuid,
    /// Delay between loop iterations.
    pub loop_interval: Duration,
}

impl Default for ClientNodeConfig {
    fn default() -> Self {
        Self {
            service_uuid: DISTANCE_SERVICE_UUID,
            characteristic_uuid: DISTANCE_CHARACTERISTIC_UUID,
            loop_interval: Duration::from_millis(1000),
        }
    }
}

impl ClientNodeConfig {
    /// Create a configuration with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the service UUID to look for.
    pub fn with_service_uuid(mut self, uuid: Uuid) -> Self {
        self.service_uuid = uuid;
        self
    }

    /// Set the characteristic UUID to subscribe to.
    pub fn with_characteristic_uuid(mut self, uuid: Uuid) -> Self {
        self.characteristic_uuid = uuid;
        self
    }

    /// Set the loop interval.
    pub fn with_loop_interval(mut self, interval: Duration) -> Self {
        self.loop_interval = interval;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sensing_defaults() {
        let config = SensingNodeConfig::default();
        assert_eq!(config.poll_interval, Duration::from_millis(800));
        assert_eq!(config.publish_interval, Duration::from_millis(1000));
        assert_eq!(config.proximity_threshold_cm, 30.0);
        assert_eq!(config.filter_window, 10);
        assert_eq!(config.settle_delay, Duration::from_millis(500));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_sensing_validation() {
        assert!(SensingNodeConfig::new()
            .with_filter_window(0)
            .validate()
            .is_err());
        assert!(SensingNodeConfig::new()
            .with_proximity_threshold(f64::NAN)
            .validate()
            .is_err());
    }

    #[test]
    fn test_client_builder() {
        let config = ClientNodeConfig::new().with_loop_interval(Duration::from_millis(250));
        assert_eq!(config.loop_interval, Duration::from_millis(250));
        assert_eq!(config.service_uuid, DISTANCE_SERVICE_UUID);
    }
}
