// Allow unusual byte groupings for UUIDs which have standard format
#![allow(clippy::unusual_byte_groupings)]

//! # rangelink-ble
//!
//! A two-node Bluetooth Low Energy distance telemetry link.
//!
//! A **sensing node** polls an ultrasonic rangefinder, smooths the readings
//! with a moving average and, while a subscriber is connected, notifies
//! nearby distances at a bounded rate. A **client node** scans for the
//! sensing node's service, subscribes to its distance characteristic and
//! keeps running statistics of every value it receives. Both nodes recover
//! from a lost link on their own: the sensing node advertises again, the
//! client scans again.
//!
//! ## Features
//!
//! - **Moving-average filter**: fixed window over the last raw samples
//! - **Text frames**: `"Distance: 12.34"` payloads with a lenient decoder
//! - **Rate-limited publishing**: proximity threshold plus minimum spacing
//! - **Session state machines**: explicit transition tables on both ends
//! - **Running statistics**: current, minimum and maximum received distance
//! - **Transports**: btleplug-backed central and an in-process loopback link
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use rangelink_ble::{BtleCentral, ClientNode, ClientNodeConfig, Result};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let central = Arc::new(BtleCentral::new().await?);
//!     let mut client = ClientNode::new(central, ClientNodeConfig::default());
//!
//!     let mut samples = client.subscribe_samples();
//!     tokio::spawn(async move {
//!         while let Ok(update) = samples.recv().await {
//!             println!("{:.2} cm ({})", update.value, update.stats);
//!         }
//!     });
//!
//!     client
//!         .run(async {
//!             let _ = tokio::signal::ctrl_c().await;
//!         })
//!         .await
//! }
//! ```
//!
//! ## Platform Notes
//!
//! btleplug only supports the central role, so [`BtleCentral`] covers the
//! client side. The sensing node runs over any [`PeripheralTransport`];
//! [`LoopbackLink`] provides one for running both nodes in one process.
//!
//! ### Linux
//! Requires BlueZ. User may need to be in the `bluetooth` group.
//!
//! ### macOS
//! Requires Bluetooth permission. Add `NSBluetoothAlwaysUsageDescription`
//! to your Info.plist for bundled apps.
//!
//! ## Feature Flags
//!
//! - `serde`: Enable serialization/deserialization for configuration and statistics

// Public modules
pub mod ble;
pub mod client_node;
pub mod config;
pub mod data;
pub mod error;
pub mod protocol;
pub mod publisher;
pub mod sensing_node;
pub mod sensor;
pub mod session;
pub mod utils;

// Re-exports for convenience
pub use client_node::{ClientNode, SampleUpdate};
pub use config::{ClientNodeConfig, SensingNodeConfig};
pub use error::{Error, Result};
pub use sensing_node::{Reading, SensingNode};
pub use utils::{centimeters_to_ticks, ticks_to_centimeters};

// Re-export commonly used types from submodules
pub use ble::{
    BtleCentral, CentralTransport, LoopbackLink, PeripheralTransport,
    DISTANCE_CHARACTERISTIC_UUID, DISTANCE_SERVICE_UUID,
};
pub use data::{MovingAverage, StatsAccumulator};
pub use publisher::{PublishDecision, Publisher, SkipReason};
pub use sensor::{RangeSensor, ScriptedSensor};
pub use session::{ConsumerState, ProducerState};
