//! Wire format of the distance characteristic.

pub mod frame;

pub use frame::{decode, decode_bytes, encode, FRAME_PREFIX};
