//! Utility functions for the rangelink-ble crate.

/// Speed of sound in centimetres per microsecond.
pub const SPEED_OF_SOUND_CM_PER_US: f64 = 0.034;

/// Convert an echo round-trip time to a distance.
///
/// # Arguments
///
/// * `ticks` - Echo pulse width in microseconds (there and back)
///
/// # Returns
///
/// Distance to the target in centimetres
///
/// # Example
///
/// ```
/// use rangelink_ble::ticks_to_centimeters;
///
/// let distance = ticks_to_centimeters(1000);
/// assert!((distance - 17.0).abs() < 0.001);
/// ```
#[inline]
pub fn ticks_to_centimeters(ticks: u64) -> f64 {
    ticks as f64 * SPEED_OF_SOUND_CM_PER_US / 2.0
}

/// Convert a distance to the echo round-trip time that would produce it.
///
/// Negative distances clamp to zero ticks.
///
/// # Example
///
/// ```
/// use rangelink_ble::centimeters_to_ticks;
///
/// assert_eq!(centimeters_to_ticks(17.0), 1000);
/// ```
#[inline]
pub fn centimeters_to_ticks(centimeters: f64) -> u64 {
    (centimeters * 2.0 / SPEED_OF_SOUND_CM_PER_US).round().max(0.0) as u64
}
