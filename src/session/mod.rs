//! Connection lifecycle state machines for both nodes.
//!
//! Both machines are driven by queued events and ignore anything that does
//! not apply to their current state, so repeated delivery is harmless.

pub mod consumer;
pub mod producer;

pub use consumer::{ConsumerEvent, ConsumerSession, ConsumerState, Transition};
pub use producer::{ProducerAction, ProducerEvent, ProducerSession, ProducerState};
