//! BLE transport layer.
//!
//! The node loops talk to the radio through [`CentralTransport`] and
//! [`PeripheralTransport`]. [`BtleCentral`] drives a real adapter through
//! btleplug; [`LoopbackLink`] pairs both ends in-process.

pub mod central;
pub mod characteristics;
pub mod loopback;
pub mod scanner;
pub mod transport;
pub mod uuids;

pub use central::BtleCentral;
pub use characteristics::CharacteristicHandler;
pub use loopback::{LoopbackCentral, LoopbackLink, LoopbackPeer, LoopbackPeripheral};
pub use scanner::BleScanner;
pub use transport::{
    find_service, CentralEvent, CentralTransport, ChannelHandle, ChannelProperties,
    DiscoveredPeer, PeripheralEvent, PeripheralTransport, ServiceHandle,
};
pub use uuids::*;
