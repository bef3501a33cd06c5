//! Distance frame codec.
//!
//! A frame is a single text payload `"Distance: <value>"` with the value
//! printed to two decimal places. There is no length prefix or checksum:
//! one notification carries exactly one frame.
//!
//! Decoding never fails. Anything that cannot be read as a number decodes to
//! `0.0`, which makes a truncated or garbled frame indistinguishable from a
//! genuine zero reading.

/// Prefix of every frame.
pub const FRAME_PREFIX: &str = "Distance: ";

/// Encode a filtered distance into a frame.
///
/// # Example
///
/// ```
/// use rangelink_ble::protocol::frame::encode;
///
/// assert_eq!(encode(23.5), "Distance: 23.50");
/// ```
pub fn encode(value: f64) -> String {
    format!("{}{:.2}", FRAME_PREFIX, value)
}

/// Decode a frame into a distance.
///
/// The number starts two characters after the first `:` (the colon and one
/// separator) and runs to the end of the text. Its longest leading numeric
/// prefix is used, so trailing junk is ignored. Returns `0.0` when there is no
/// colon, nothing after it, or no number.
///
/// # Example
///
/// ```
/// use rangelink_ble::protocol::frame::decode;
///
/// assert_eq!(decode("Distance: 23.50"), 23.5);
/// assert_eq!(decode("garbage"), 0.0);
/// ```
pub fn decode(text: &str) -> f64 {
    let Some(colon) = text.find(':') else {
        return 0.0;
    };

    text.get(colon + 2..)
        .and_then(parse_leading_float)
        .unwrap_or(0.0)
}

/// Decode a raw notification payload.
///
/// The payload is treated as a C string: it ends at the first NUL byte.
/// Invalid UTF-8 is replaced rather than rejected.
pub fn decode_bytes(payload: &[u8]) -> f64 {
    let end = payload.iter().position(|b| *b == 0).unwrap_or(payload.len());
    decode(&String::from_utf8_lossy(&payload[..end]))
}

/// Parse the longest leading decimal number of a string.
fn parse_leading_float(text: &str) -> Option<f64> {
    let text = text.trim_start();
    let bytes = text.as_bytes();
    let mut end = 0;

    if matches!(bytes.first(), Some(b'+') | Some(b'-')) {
        end += 1;
    }

    let int_digits = count_digits(&bytes[end..]);
    end += int_digits;

    let mut frac_digits = 0;
    if bytes.get(end) == Some(&b'.') {
        frac_digits = count_digits(&bytes[end + 1..]);
        if int_digits > 0 || frac_digits > 0 {
            end += 1 + frac_digits;
        }
    }

    if int_digits == 0 && frac_digits == 0 {
        return None;
    }

    // Exponent only counts when at least one digit follows it.
    if matches!(bytes.get(end), Some(b'e') | Some(b'E')) {
        let mut exp_end = end + 1;
        if matches!(bytes.get(exp_end), Some(b'+') | Some(b'-')) {
            exp_end += 1;
        }
        let exp_digits = count_digits(&bytes[exp_end.min(bytes.len())..]);
        if exp_digits > 0 {
            end = exp_end + exp_digits;
        }
    }

    text[..end].parse().ok()
}

fn count_digits(bytes: &[u8]) -> usize {
    bytes.iter().take_while(|b| b.is_ascii_digit()).count()
}
