//! Error types for the rangelink-ble crate.

use thiserror::Error;

/// The main error type for this crate.
///
/// Frame decoding never produces an error: malformed frames decode to `0.0`
/// (see [`crate::protocol::frame::decode`]).
#[derive(Error, Debug)]
pub enum Error {
    /// Bluetooth-related error from the underlying BLE library.
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),

    /// Bluetooth is not available or is disabled on this system.
    #[error("Bluetooth not available or disabled")]
    BluetoothUnavailable,

    /// Operation requires a connection but there is no connected peer.
    #[error("Not connected")]
    NotConnected,

    /// Failed to establish a connection to the peer.
    #[error("Connection failed: {reason}")]
    ConnectionFailed {
        /// Description of why the connection failed.
        reason: String,
    },

    /// Service not found on the remote node.
    #[error("Service not found: {uuid}")]
    ServiceNotFound {
        /// The UUID of the service that was not found.
        uuid: String,
    },

    /// Characteristic not found within the service.
    #[error("Characteristic not found: {uuid}")]
    CharacteristicNotFound {
        /// The UUID of the characteristic that was not found.
        uuid: String,
    },

    /// The rangefinder failed to produce a measurement.
    #[error("Sensor fault: {reason}")]
    SensorFault {
        /// Description of the fault.
        reason: String,
    },

    /// An invalid parameter was provided.
    #[error("Invalid parameter: {name} = {value}")]
    InvalidParameter {
        /// The name of the parameter.
        name: String,
        /// The invalid value that was provided.
        value: String,
    },
}

impl Error {
    /// Whether this is a service or characteristic lookup failure.
    pub fn is_lookup_failure(&self) -> bool {
        matches!(
            self,
            Self::ServiceNotFound { .. } | Self::CharacteristicNotFound { .. }
        )
    }
}

/// A specialized Result type for this crate.
pub type Result<T> = std::result::Result<T, Error>;
