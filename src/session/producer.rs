//! Sensing-node session state machine.
//!
//! The producer is purely reactive: it advertises, accepts one subscriber
//! and goes back to advertising when that subscriber leaves. It never tries
//! to reconnect on its own.

use std::fmt;
use tracing::{debug, info};

/// Producer session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ProducerState {
    /// Not yet broadcasting.
    #[default]
    Idle,
    /// Broadcasting the service and waiting for a subscriber.
    Advertising,
    /// A subscriber is connected.
    Connected,
}

impl ProducerState {
    /// Check if a subscriber is connected.
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }
}

impl fmt::Display for ProducerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Advertising => write!(f, "Advertising"),
            Self::Connected => write!(f, "Connected"),
        }
    }
}

/// Inputs to the producer state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProducerEvent {
    /// The node finished bringing up the transport.
    Started,
    /// A subscriber connected.
    SubscriberConnected,
    /// The subscriber disconnected.
    SubscriberDisconnected,
}

/// Side effect the node must perform after a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProducerAction {
    /// Begin broadcasting the service.
    StartAdvertising,
    /// Wait for the settle delay, then broadcast again.
    ResumeAdvertising,
}

/// Producer session state machine.
#[derive(Debug, Clone, Default)]
pub struct ProducerSession {
    state: ProducerState,
}

impl ProducerSession {
    /// Create a session in [`ProducerState::Idle`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state.
    pub fn state(&self) -> ProducerState {
        self.state
    }

    /// Apply an event. Events that do not apply to the current state are
    /// ignored, so repeated delivery is harmless.
    pub fn handle(&mut self, event: ProducerEvent) -> Option<ProducerAction> {
        use ProducerEvent::*;
        use ProducerState::*;

        let (next, action) = match (self.state, event) {
            (Idle, Started) => (Advertising, Some(ProducerAction::StartAdvertising)),
            (Idle, SubscriberConnected) | (Advertising, SubscriberConnected) => (Connected, None),
            (Connected, SubscriberDisconnected) => {
                (Advertising, Some(ProducerAction::ResumeAdvertising))
            }
            (state, event) => {
                debug!("Ignoring {:?} while {}", event, state);
                return None;
            }
        };

        info!("Producer session: {} -> {}", self.state, next);
        self.state = next;
        action
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_lifecycle() {
        let mut session = ProducerSession::new();
        assert_eq!(session.state(), ProducerState::Idle);

        assert_eq!(
            session.handle(ProducerEvent::Started),
            Some(ProducerAction::StartAdvertising)
        );
        assert_eq!(session.state(), ProducerState::Advertising);

        assert_eq!(session.handle(ProducerEvent::SubscriberConnected), None);
        assert!(session.state().is_connected());

        assert_eq!(
            session.handle(ProducerEvent::SubscriberDisconnected),
            Some(ProducerAction::ResumeAdvertising)
        );
        assert_eq!(session.state(), ProducerState::Advertising);
    }

    #[test]
    fn test_repeated_events_are_idempotent() {
        let mut session = ProducerSession::new();
        session.handle(ProducerEvent::Started);
        session.handle(ProducerEvent::SubscriberConnected);

        assert_eq!(session.handle(ProducerEvent::SubscriberConnected), None);
        assert_eq!(session.state(), ProducerState::Connected);

        session.handle(ProducerEvent::SubscriberDisconnected);
        assert_eq!(session.handle(ProducerEvent::SubscriberDisconnected), None);
        assert_eq!(session.handle(ProducerEvent::Started), None);
        assert_eq!(session.state(), ProducerState::Advertising);
    }

    #[test]
    fn test_state_display() {
        assert_eq!(ProducerState::Advertising.to_string(), "Advertising");
    }
}
