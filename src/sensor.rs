//! Rangefinder abstraction.
//!
//! The sensing node only needs the echo round-trip time; pin wiring and
//! pulse timing stay behind [`RangeSensor`].

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::utils::{centimeters_to_ticks, ticks_to_centimeters};

/// An ultrasonic rangefinder.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RangeSensor: Send {
    /// Fire a ping and return the echo round-trip time in microseconds.
    async fn trigger_and_measure(&mut self) -> Result<u64>;
}

/// Measure once and convert to centimetres.
pub async fn measure_distance<S: RangeSensor + ?Sized>(sensor: &mut S) -> Result<f64> {
    let ticks = sensor.trigger_and_measure().await?;
    Ok(ticks_to_centimeters(ticks))
}

/// Replays a fixed list of distances, cycling forever.
#[derive(Debug, Clone)]
pub struct ScriptedSensor {
    ticks: Vec<u64>,
    cursor: usize,
}

impl ScriptedSensor {
    /// Create a sensor replaying `distances_cm`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidParameter`] if the script is empty.
    pub fn new(distances_cm: &[f64]) -> Result<Self> {
        if distances_cm.is_empty() {
            return Err(Error::InvalidParameter {
                name: "distances_cm".to_string(),
                value: "[]".to_string(),
            });
        }

        Ok(Self {
            ticks: distances_cm.iter().map(|d| centimeters_to_ticks(*d)).collect(),
            cursor: 0,
        })
    }
}

#[async_trait]
impl RangeSensor for ScriptedSensor {
    async fn trigger_and_measure(&mut self) -> Result<u64> {
        let ticks = self.ticks[self.cursor];
        self.cursor = (self.cursor + 1) % self.ticks.len();
        Ok(ticks)
    }
}
