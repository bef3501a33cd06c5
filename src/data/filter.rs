//! Moving-average smoothing of raw rangefinder samples.

use crate::error::{Error, Result};

/// Default number of samples averaged.
pub const DEFAULT_WINDOW: usize = 10;

/// Fixed-window moving average over a ring buffer.
///
/// The buffer starts out all-zero, so until `window` samples have been seen
/// the output is the sum of the samples divided by the full window (biased
/// low). Every sample is accepted, including the zeros and huge values a
/// failed echo produces.
#[derive(Debug, Clone, PartialEq)]
pub struct MovingAverage {
    /// Last `window` samples.
    buffer: Vec<f64>,
    /// Slot the next sample overwrites.
    cursor: usize,
    /// Sum of every slot in `buffer`.
    sum: f64,
}

impl MovingAverage {
    /// Create a filter averaging the last `window` samples.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidParameter`] if `window` is zero.
    pub fn new(window: usize) -> Result<Self> {
        if window == 0 {
            return Err(Error::InvalidParameter {
                name: "window".to_string(),
                value: window.to_string(),
            });
        }

        Ok(Self {
            buffer: vec![0.0; window],
            cursor: 0,
            sum: 0.0,
        })
    }

    /// Feed a raw sample and return the updated average.
    pub fn update(&mut self, raw: f64) -> f64 {
        self.sum -= self.buffer[self.cursor];
        self.buffer[self.cursor] = raw;
        self.sum += raw;
        self.cursor = (self.cursor + 1) % self.buffer.len();

        self.average()
    }

    /// Current average without adding a sample.
    pub fn average(&self) -> f64 {
        self.sum / self.buffer.len() as f64
    }

    /// Number of samples averaged.
    pub fn window(&self) -> usize {
        self.buffer.len()
    }

    /// Slot the next sample will overwrite.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Running sum of the buffer.
    pub fn sum(&self) -> f64 {
        self.sum
    }
}

impl Default for MovingAverage {
    fn default() -> Self {
        Self {
            buffer: vec![0.0; DEFAULT_WINDOW],
            cursor: 0,
            sum: 0.0,
        }
    }
}
