//! Threshold and rate gating of outbound notifications.
//!
//! The poll cadence and the publish interval are independent: with an 800 ms
//! poll and a 1000 ms interval some eligible polls are skipped, so a
//! notification per poll must not be assumed.

use std::fmt;
use std::time::{Duration, Instant};
use tracing::trace;

use crate::protocol::frame;
use crate::session::producer::ProducerState;

/// Default proximity threshold in centimetres.
pub const DEFAULT_THRESHOLD_CM: f64 = 30.0;

/// Default minimum spacing between notifications.
pub const DEFAULT_PUBLISH_INTERVAL: Duration = Duration::from_millis(1000);

/// Why a poll did not produce a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// No subscriber is connected.
    NotConnected,
    /// The value is not below the proximity threshold.
    AboveThreshold,
    /// The last notification was too recent.
    RateLimited,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotConnected => write!(f, "not connected"),
            Self::AboveThreshold => write!(f, "above threshold"),
            Self::RateLimited => write!(f, "rate limited"),
        }
    }
}

/// Outcome of evaluating one filtered value.
#[derive(Debug, Clone, PartialEq)]
pub enum PublishDecision {
    /// Send this frame.
    Publish(String),
    /// Do not send.
    Skip(SkipReason),
}

/// Decides which filtered values are sent to the subscriber.
#[derive(Debug, Clone)]
pub struct Publisher {
    threshold_cm: f64,
    interval: Duration,
    last_sent: Option<Instant>,
}

impl Publisher {
    /// Create a publisher with a threshold and minimum interval.
    pub fn new(threshold_cm: f64, interval: Duration) -> Self {
        Self {
            threshold_cm,
            interval,
            last_sent: None,
        }
    }

    /// Evaluate a filtered value polled at `now`.
    ///
    /// Does not update any state; call [`Publisher::record_transmission`]
    /// once the frame has actually been sent.
    pub fn evaluate(&self, value: f64, state: ProducerState, now: Instant) -> PublishDecision {
        if !state.is_connected() {
            return PublishDecision::Skip(SkipReason::NotConnected);
        }

        // NaN never compares below the threshold.
        let below = value < self.threshold_cm;
        if !below {
            trace!("{:.2} cm is not below {:.2} cm", value, self.threshold_cm);
            return PublishDecision::Skip(SkipReason::AboveThreshold);
        }

        if let Some(last) = self.last_sent {
            if now.saturating_duration_since(last) < self.interval {
                return PublishDecision::Skip(SkipReason::RateLimited);
            }
        }

        PublishDecision::Publish(frame::encode(value))
    }

    /// Record that a frame was sent at `now`.
    pub fn record_transmission(&mut self, now: Instant) {
        self.last_sent = Some(now);
    }

    /// Time of the last transmission.
    pub fn last_sent(&self) -> Option<Instant> {
        self.last_sent
    }

    /// Proximity threshold in centimetres.
    pub fn threshold_cm(&self) -> f64 {
        self.threshold_cm
    }

    /// Minimum spacing between notifications.
    pub fn interval(&self) -> Duration {
        self.interval
    }
}

impl Default for Publisher {
    fn default() -> Self {
        Self::new(DEFAULT_THRESHOLD_CM, DEFAULT_PUBLISH_INTERVAL)
    }
}
