//! Base-2 exponential bucket index arithmetic.
//!
//! At scale `s` bucket `i` covers `(base^i, base^(i+1)]` where
//! `base = 2^(2^-s)`. Higher scales give finer buckets.

use std::f64::consts::{LN_2, LOG2_E};

/// The maximum resolution scale.
pub const EXPO_MAX_SCALE: i8 = 20;
/// The minimum resolution scale, at which two buckets cover every positive `f64`.
pub const EXPO_MIN_SCALE: i8 = -11;

const SIGNIFICAND_WIDTH: u32 = 52;
const SIGNIFICAND_MASK: u64 = (1 << SIGNIFICAND_WIDTH) - 1;
const EXPONENT_MASK: u64 = 0x7FF << SIGNIFICAND_WIDTH;
const EXPONENT_BIAS: i32 = 1023;
const MIN_NORMAL_EXPONENT: i32 = -1022;
const MAX_NORMAL_EXPONENT: i32 = 1023;
/// Exponent of the smallest positive subnormal, `2^-1074`.
const MIN_SUBNORMAL_EXPONENT: i32 = MIN_NORMAL_EXPONENT - SIGNIFICAND_WIDTH as i32;

/// Maps a positive, finite `value` to its bucket index at `scale`.
///
/// Exact powers of two fall in the bucket they close, so
/// `map_to_index(1.0, 0) == -1` and `map_to_index(2.0, 0) == 0`.
pub fn map_to_index(value: f64, scale: i8) -> i32 {
    debug_assert!(value > 0.0 && value.is_finite());
    debug_assert!((EXPO_MIN_SCALE..=EXPO_MAX_SCALE).contains(&scale));

    let bits = value.to_bits();
    let raw_exponent = ((bits & EXPONENT_MASK) >> SIGNIFICAND_WIDTH) as i32;
    let significand = bits & SIGNIFICAND_MASK;

    if scale > 0 {
        // floor(log2(value)), which is exact for every positive float
        let exponent = if raw_exponent == 0 {
            (63 - significand.leading_zeros() as i32) + MIN_SUBNORMAL_EXPONENT
        } else {
            raw_exponent - EXPONENT_BIAS
        };

        let is_power_of_two = if raw_exponent == 0 {
            significand.is_power_of_two()
        } else {
            significand == 0
        };
        if is_power_of_two {
            return (exponent << scale) - 1;
        }

        let index = (value.ln() * scaling_factor(scale)).ceil() as i32 - 1;
        // rounding in ln() must not move the value out of its own binade
        return index.clamp(exponent << scale, ((exponent + 1) << scale) - 1);
    }

    let exponent = if raw_exponent == 0 {
        // subnormal: ceil(log2(significand)) - 1075
        MIN_SUBNORMAL_EXPONENT - 1 + (64 - (significand - 1).leading_zeros() as i32)
    } else if significand == 0 {
        raw_exponent - EXPONENT_BIAS - 1
    } else {
        raw_exponent - EXPONENT_BIAS
    };

    exponent >> -scale
}

/// Returns the lower boundary of bucket `index` at `scale`.
///
/// The boundary is exclusive: `map_to_index(lower_boundary(i, s), s)` is
/// `i - 1`, except for the lowest bucket, which is inclusive of the smallest
/// positive subnormal value. At positive scales the result is approximate
/// unless `index` is a multiple of `2^scale`, so indexes may round trip to
/// `i` instead.
pub fn lower_boundary(index: i32, scale: i8) -> f64 {
    debug_assert!((EXPO_MIN_SCALE..=EXPO_MAX_SCALE).contains(&scale));

    if scale > 0 {
        if index <= map_to_index(f64::from_bits(1), scale) {
            return f64::from_bits(1);
        }

        let exponent = index >> scale;
        let remainder = index & ((1 << scale) - 1);
        let significand = if remainder == 0 {
            1.0
        } else {
            (f64::from(remainder) * LN_2 / f64::from(1u32 << scale)).exp()
        };
        return scale_by_power_of_two(significand, exponent).min(f64::MAX);
    }

    let exponent = i64::from(index) << -scale;
    if exponent < i64::from(MIN_SUBNORMAL_EXPONENT) {
        f64::from_bits(1)
    } else if exponent > i64::from(MAX_NORMAL_EXPONENT) {
        f64::MAX
    } else {
        power_of_two(exponent as i32)
    }
}

/// The smallest and largest index reachable at `scale`.
pub fn index_range(scale: i8) -> (i32, i32) {
    (
        map_to_index(f64::from_bits(1), scale),
        map_to_index(f64::MAX, scale),
    )
}

/// `log2(e) * 2^scale`, used to turn a natural logarithm into an index.
fn scaling_factor(scale: i8) -> f64 {
    LOG2_E * f64::from(1u32 << scale)
}

/// Exact `2^exponent` for `exponent` in `[-1074, 1023]`.
fn power_of_two(exponent: i32) -> f64 {
    if exponent < MIN_NORMAL_EXPONENT {
        f64::from_bits(1 << (exponent - MIN_SUBNORMAL_EXPONENT))
    } else {
        f64::from_bits(((exponent + EXPONENT_BIAS) as u64) << SIGNIFICAND_WIDTH)
    }
}

/// `value * 2^exponent` with a single rounding when the result is subnormal.
fn scale_by_power_of_two(value: f64, exponent: i32) -> f64 {
    if exponent > MAX_NORMAL_EXPONENT {
        f64::INFINITY
    } else if exponent >= MIN_NORMAL_EXPONENT {
        value * power_of_two(exponent)
    } else if exponent >= MIN_SUBNORMAL_EXPONENT - 1 {
        (value * power_of_two(exponent - MIN_NORMAL_EXPONENT)) * f64::MIN_POSITIVE
    } else {
        0.0
    }
}
