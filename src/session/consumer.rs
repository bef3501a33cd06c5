//! Client-node session state machine.
//!
//! Transition table:
//!
//! | From             | Event                 | To               |
//! |------------------|-----------------------|------------------|
//! | `Scanning`       | matching advertisement| `CandidateFound` |
//! | `CandidateFound` | `ConnectStarted`      | `Connecting`     |
//! | `Connecting`     | `Subscribed`          | `Subscribed`     |
//! | `CandidateFound` | `ConnectFailed`       | `Scanning`       |
//! | `Connecting`     | `ConnectFailed`       | `Scanning`       |
//! | `Subscribed`     | `Disconnected`        | `Disconnected`   |
//! | `Disconnected`   | `ScanResumed`         | `Scanning`       |
//!
//! Anything else is ignored. The first matching advertisement wins; later
//! ones are dropped until the session is back to scanning.

use std::fmt;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::ble::transport::DiscoveredPeer;

/// Client session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConsumerState {
    /// Looking for an advertisement of the target service.
    #[default]
    Scanning,
    /// A candidate is latched and scanning is suspended.
    CandidateFound,
    /// Connection and service lookup in progress.
    Connecting,
    /// Receiving notifications.
    Subscribed,
    /// The session was lost; scanning resumes on the next cycle.
    Disconnected,
}

impl ConsumerState {
    /// Check if notifications are flowing.
    pub fn is_subscribed(&self) -> bool {
        matches!(self, Self::Subscribed)
    }

    /// Check if a candidate is held.
    pub fn holds_candidate(&self) -> bool {
        matches!(self, Self::CandidateFound | Self::Connecting | Self::Subscribed)
    }
}

impl fmt::Display for ConsumerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scanning => write!(f, "Scanning"),
            Self::CandidateFound => write!(f, "CandidateFound"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Subscribed => write!(f, "Subscribed"),
            Self::Disconnected => write!(f, "Disconnected"),
        }
    }
}

/// Inputs to the client state machine.
#[derive(Debug, Clone)]
pub enum ConsumerEvent<P> {
    /// An advertisement was observed.
    Advertisement(DiscoveredPeer<P>),
    /// The node began connecting to the candidate.
    ConnectStarted,
    /// Lookup and subscription succeeded.
    Subscribed,
    /// Connecting, lookup or subscription failed.
    ConnectFailed {
        /// Why the attempt failed.
        reason: String,
    },
    /// The transport reported the link to `id` as lost.
    Disconnected {
        /// Identifier of the peer that went away.
        id: String,
    },
    /// The node restarted scanning.
    ScanResumed,
}

/// State change produced by [`ConsumerSession::handle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    /// State before the event.
    pub from: ConsumerState,
    /// State after the event.
    pub to: ConsumerState,
}

/// Client session state machine with its latched candidate.
#[derive(Debug, Clone)]
pub struct ConsumerSession<P> {
    state: ConsumerState,
    target_service: Uuid,
    candidate: Option<DiscoveredPeer<P>>,
}

impl<P: Clone> ConsumerSession<P> {
    /// Create a session looking for peers advertising `target_service`.
    pub fn new(target_service: Uuid) -> Self {
        Self {
            state: ConsumerState::Scanning,
            target_service,
            candidate: None,
        }
    }

    /// Current state.
    pub fn state(&self) -> ConsumerState {
        self.state
    }

    /// Service an advertisement must carry to be accepted.
    pub fn target_service(&self) -> Uuid {
        self.target_service
    }

    /// The latched candidate, if any.
    pub fn candidate(&self) -> Option<&DiscoveredPeer<P>> {
        self.candidate.as_ref()
    }

    /// Apply an event. Returns the transition, or `None` if the event did not
    /// apply to the current state.
    pub fn handle(&mut self, event: ConsumerEvent<P>) -> Option<Transition> {
        use ConsumerState as S;

        let next = match (self.state, event) {
            (S::Scanning, ConsumerEvent::Advertisement(peer)) => {
                if !peer.advertises(&self.target_service) {
                    return None;
                }
                info!(
                    "Found peer {} ({:?}) advertising {}",
                    peer.id, peer.local_name, self.target_service
                );
                self.candidate = Some(peer);
                S::CandidateFound
            }
            (S::CandidateFound, ConsumerEvent::ConnectStarted) => S::Connecting,
            (S::Connecting, ConsumerEvent::Subscribed) => S::Subscribed,
            (S::CandidateFound | S::Connecting, ConsumerEvent::ConnectFailed { reason }) => {
                // The candidate is dropped; only a fresh advertisement brings it back.
                warn!("Failed to connect to the server: {}", reason);
                self.candidate = None;
                S::Scanning
            }
            (S::Subscribed, ConsumerEvent::Disconnected { id }) => {
                if self.candidate.as_ref().map(|c| c.id != id).unwrap_or(true) {
                    debug!("Ignoring disconnect of unrelated peer {}", id);
                    return None;
                }
                self.candidate = None;
                S::Disconnected
            }
            (S::Disconnected, ConsumerEvent::ScanResumed) => S::Scanning,
            (state, event) => {
                debug!("Ignoring {} while {}", event_name(&event), state);
                return None;
            }
        };

        let transition = Transition {
            from: self.state,
            to: next,
        };
        info!("Client session: {} -> {}", transition.from, transition.to);
        self.state = next;
        Some(transition)
    }
}

fn event_name<P>(event: &ConsumerEvent<P>) -> &'static str {
    match event {
        ConsumerEvent::Advertisement(_) => "advertisement",
        ConsumerEvent::ConnectStarted => "connect start",
        ConsumerEvent::Subscribed => "subscription",
        ConsumerEvent::ConnectFailed { .. } => "connect failure",
        ConsumerEvent::Disconnected { .. } => "disconnect",
        ConsumerEvent::ScanResumed => "scan resume",
    }
}
