//! # Register Codec
//!
//! Conversion between raw 16-bit bus words and engineering values.
//!
//! ## Decoding
//!
//! 1. `int16` registers reinterpret the word as two's-complement
//! 2. the optional `offset` is added to the (signed) raw value
//! 3. the result is divided by `scaling`
//!
//! ## Encoding
//!
//! The engineering value is multiplied by `scaling` and rounded to the nearest
//! integer. Negative raw values of `int16` registers are sent as
//! `raw + 0x10000`. The offset is not applied on the write path.
//!
//! | Encoding | Raw range | Aliases |
//! |----------|-----------|---------|
//! | uint16 | 0..=65535 | u16, word |
//! | int16 | -32768..=32767 | i16, short |

use crate::register::{Encoding, RegisterDescriptor};

/// Reinterpret a raw word according to `encoding`.
#[inline]
pub fn raw_to_signed(raw: u16, encoding: Encoding) -> i32 {
    match encoding {
        Encoding::Uint16 => i32::from(raw),
        Encoding::Int16 => i32::from(raw as i16),
    }
}

/// Map a signed raw value onto the wire word, if it fits the encoding.
#[inline]
pub fn signed_to_raw(value: i64, encoding: Encoding) -> Option<u16> {
    match encoding {
        Encoding::Uint16 => u16::try_from(value).ok(),
        Encoding::Int16 => {
            let value = i16::try_from(value).ok()?;
            let wire = if value < 0 {
                i32::from(value) + 0x10000
            } else {
                i32::from(value)
            };
            u16::try_from(wire).ok()
        }
    }
}

/// Decode a raw bus word into an engineering value.
///
/// # Example
///
/// ```rust
/// use thermobus::codec::decode_raw;
/// use thermobus::register::{Encoding, RegisterDescriptor, RegisterKind};
///
/// let outdoor = RegisterDescriptor::new(RegisterKind::Input, 41, "Outdoor")
///     .with_encoding(Encoding::Int16)
///     .with_scaling(10.0);
/// assert_eq!(decode_raw(&outdoor, 0xFFF6), -1.0);
/// ```
pub fn decode_raw(descriptor: &RegisterDescriptor, raw: u16) -> f64 {
    let mut value = f64::from(raw_to_signed(raw, descriptor.encoding));
    if let Some(offset) = descriptor.offset {
        value += offset;
    }
    value / descriptor.scaling
}

/// Encode an engineering value into the raw bus word.
///
/// Returns `None` when the scaled value does not fit the register encoding.
pub fn encode_engineering(descriptor: &RegisterDescriptor, value: f64) -> Option<u16> {
    let raw = (value * descriptor.scaling).round();
    if !raw.is_finite() || raw < i64::MIN as f64 || raw > i64::MAX as f64 {
        return None;
    }
    signed_to_raw(raw as i64, descriptor.encoding)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::register::RegisterKind;

    fn holding(encoding: Encoding, scaling: f64) -> RegisterDescriptor {
        RegisterDescriptor::new(RegisterKind::Holding, 1, "test")
            .with_encoding(encoding)
            .with_scaling(scaling)
    }

    #[test]
    fn test_int16_sign_extension() {
        assert_eq!(raw_to_signed(0xFFFF, Encoding::Int16), -1);
        assert_eq!(raw_to_signed(0x8000, Encoding::Int16), -32768);
        assert_eq!(raw_to_signed(0x7FFF, Encoding::Int16), 32767);
        assert_eq!(raw_to_signed(0xFFFF, Encoding::Uint16), 65535);
    }

    #[test]
    fn test_decode_applies_offset_before_scaling() {
        let descriptor = holding(Encoding::Int16, 10.0).with_offset(5.0);
        // (-1 + 5) / 10
        assert!((decode_raw(&descriptor, 0xFFFF) - 0.4).abs() < 1e-9);
    }

    #[test]
    fn test_decode_fractional_scaling() {
        let descriptor = holding(Encoding::Uint16, 0.5);
        assert_eq!(decode_raw(&descriptor, 21), 42.0);
    }

    #[test]
    fn test_encode_negative_int16() {
        let descriptor = holding(Encoding::Int16, 10.0);
        assert_eq!(encode_engineering(&descriptor, -0.1), Some(0xFFFF));
        assert_eq!(encode_engineering(&descriptor, -3276.8), Some(0x8000));
        assert_eq!(encode_engineering(&descriptor, -3276.9), None);
    }

    #[test]
    fn test_encode_uint16_bounds() {
        let descriptor = holding(Encoding::Uint16, 1.0);
        assert_eq!(encode_engineering(&descriptor, 65535.0), Some(65535));
        assert_eq!(encode_engineering(&descriptor, 65536.0), None);
        assert_eq!(encode_engineering(&descriptor, -1.0), None);
        assert_eq!(encode_engineering(&descriptor, f64::NAN), None);
    }

    #[test]
    fn test_write_then_read_reproduces_value() {
        for (encoding, scaling, value) in [
            (Encoding::Uint16, 10.0, 21.5),
            (Encoding::Int16, 10.0, -12.3),
            (Encoding::Uint16, 1.0, 3.0),
            (Encoding::Int16, 2.0, -4.5),
        ] {
            let descriptor = holding(encoding, scaling);
            let raw = encode_engineering(&descriptor, value).unwrap();
            assert!(
                (decode_raw(&descriptor, raw) - value).abs() < 1e-9,
                "value {} via {:?}/{}",
                value,
                encoding,
                scaling
            );
        }
    }
}
