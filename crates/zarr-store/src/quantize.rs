//! Precision reduction by mantissa bit rounding.
//!
//! Keeping only `keepbits` explicit mantissa bits of an `f32` zeroes the
//! trailing bits, which makes the byte stream far more compressible while
//! bounding the relative error by `2^-(keepbits + 1)`. Rounding is
//! round-half-to-even on the retained bits. NaN and infinities pass through.

/// Number of explicit mantissa bits in an `f32`.
pub const F32_MANTISSA_BITS: u32 = 23;

/// Round every finite value in place to `keepbits` mantissa bits.
pub fn round_to_bits(values: &mut [f32], keepbits: u32) {
    if keepbits >= F32_MANTISSA_BITS {
        return;
    }

    let drop = F32_MANTISSA_BITS - keepbits;
    let mask: u32 = !((1u32 << drop) - 1);
    let half: u32 = 1u32 << (drop - 1);

    for v in values.iter_mut() {
        if !v.is_finite() {
            continue;
        }
        let bits = v.to_bits();
        let lsb = (bits >> drop) & 1;
        let rounded = bits.wrapping_add(half - 1 + lsb) & mask;
        *v = f32::from_bits(rounded);
    }
}

/// Spacing between representable values near `value` after rounding.
///
/// The reconstruction error of [`round_to_bits`] is at most half of this.
pub fn quantization_step(value: f32, keepbits: u32) -> f32 {
    if value == 0.0 || !value.is_finite() {
        return 0.0;
    }
    let exponent = value.abs().log2().floor() as i32;
    2f32.powi(exponent - keepbits.min(F32_MANTISSA_BITS) as i32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_temperature_within_half_step() {
        // 12 bits near 300 K: step is 2^(8-12) = 0.0625 K
        let original: Vec<f32> = (0..2000).map(|i| 220.0 + i as f32 * 0.0371).collect();
        let mut rounded = original.clone();
        round_to_bits(&mut rounded, 12);

        for (o, r) in original.iter().zip(&rounded) {
            let tolerance = quantization_step(*o, 12) / 2.0;
            assert!(
                (o - r).abs() <= tolerance,
                "{} rounded to {} exceeds tolerance {}",
                o,
                r,
                tolerance
            );
        }
        assert!((quantization_step(300.0, 12) - 0.0625).abs() < f32::EPSILON);
    }

    #[test]
    fn test_trailing_bits_are_zero() {
        let mut values = vec![287.3456_f32, -12.987, 0.000123, 1.0e6];
        round_to_bits(&mut values, 10);
        for v in values {
            assert_eq!(v.to_bits() & ((1 << 13) - 1), 0, "trailing bits set in {}", v);
        }
    }

    #[test]
    fn test_special_values_untouched() {
        let mut values = vec![f32::NAN, f32::INFINITY, f32::NEG_INFINITY, 0.0, -0.0];
        round_to_bits(&mut values, 8);
        assert!(values[0].is_nan());
        assert_eq!(values[1], f32::INFINITY);
        assert_eq!(values[2], f32::NEG_INFINITY);
        assert_eq!(values[3], 0.0);
        assert_eq!(values[4].to_bits(), (-0.0f32).to_bits());
    }

    #[test]
    fn test_full_precision_is_identity() {
        let original = vec![1.234_567_f32, 9.876_543];
        let mut values = original.clone();
        round_to_bits(&mut values, 23);
        assert_eq!(values, original);
    }

    #[test]
    fn test_rounding_is_idempotent() {
        let mut once: Vec<f32> = (0..500).map(|i| (i as f32).sin() * 40.0).collect();
        round_to_bits(&mut once, 10);
        let mut twice = once.clone();
        round_to_bits(&mut twice, 10);
        assert_eq!(once, twice);
    }
}
