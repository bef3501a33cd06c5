//! Running statistics of received distances.

use chrono::{DateTime, Utc};
use std::fmt;

/// All-time current/min/max of decoded distances.
///
/// Owned by the client node and never reset: the extremes carry over from
/// one session to the next for the lifetime of the process.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct StatsAccumulator {
    /// Most recent value.
    current: f64,
    /// Largest value seen, `-inf` until the first observation.
    max: f64,
    /// Smallest value seen, `+inf` until the first observation.
    min: f64,
    /// Number of observations.
    samples: u64,
    /// Time of the first observation.
    first_observed_at: Option<DateTime<Utc>>,
    /// Time of the most recent observation.
    last_observed_at: Option<DateTime<Utc>>,
}

impl StatsAccumulator {
    /// Create an empty accumulator.
    pub fn new() -> Self {
        Self {
            current: 0.0,
            max: f64::NEG_INFINITY,
            min: f64::INFINITY,
            samples: 0,
            first_observed_at: None,
            last_observed_at: None,
        }
    }

    /// Record a decoded value.
    pub fn observe(&mut self, value: f64) {
        self.observe_at(value, Utc::now());
    }

    /// Record a decoded value observed at `at`.
    pub fn observe_at(&mut self, value: f64, at: DateTime<Utc>) {
        self.current = value;
        if value > self.max {
            self.max = value;
        }
        if value < self.min {
            self.min = value;
        }
        self.samples += 1;
        self.first_observed_at.get_or_insert(at);
        self.last_observed_at = Some(at);
    }

    /// Most recent value (`0.0` before the first observation).
    pub fn current(&self) -> f64 {
        self.current
    }

    /// Largest value seen.
    pub fn max(&self) -> f64 {
        self.max
    }

    /// Smallest value seen.
    pub fn min(&self) -> f64 {
        self.min
    }

    /// Number of values observed.
    pub fn samples(&self) -> u64 {
        self.samples
    }

    /// Whether anything has been observed yet.
    pub fn is_empty(&self) -> bool {
        self.samples == 0
    }

    /// Time of the first observation.
    pub fn first_observed_at(&self) -> Option<DateTime<Utc>> {
        self.first_observed_at
    }

    /// Time of the most recent observation.
    pub fn last_observed_at(&self) -> Option<DateTime<Utc>> {
        self.last_observed_at
    }
}

impl Default for StatsAccumulator {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for StatsAccumulator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Current Value: {:.2} | Max Value: {:.2} | Min Value: {:.2}",
            self.current, self.max, self.min
        )
    }
}
