// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Range mapping and order statistics used by the scoring engine

use alloy_primitives::U256;

/// Shape applied to a normalized input before rescaling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CurveType {
    /// Identity
    #[default]
    Linear,
    /// Square of the normalized input
    Quadratic,
    /// Cube of the normalized input
    Cubic,
}

impl CurveType {
    /// Power the normalized input is raised to
    pub const fn exponent(self) -> i32 {
        match self {
            Self::Linear => 1,
            Self::Quadratic => 2,
            Self::Cubic => 3,
        }
    }
}

/// Map `input` from `input_range` onto `output_range` through `curve`
///
/// Inputs outside the range clamp to the nearest output bound. A degenerate
/// input range (min equal to max) maps every in-range input to the upper
/// output bound.
#[allow(clippy::float_cmp)]
pub fn score_map(
    input: f64,
    input_range: (f64, f64),
    output_range: (f64, f64),
    curve: CurveType,
) -> f64 {
    let (input_min, input_max) = input_range;
    let (output_min, output_max) = output_range;

    if input < input_min {
        return output_min;
    }
    if input > input_max {
        return output_max;
    }

    let normalized = if input_max == input_min {
        1.0
    } else {
        (input - input_min) / (input_max - input_min)
    };

    normalized.powi(curve.exponent()) * (output_max - output_min) + output_min
}

/// Median of the samples, averaging the two middle values for even counts
pub fn median(samples: &[f64]) -> Option<f64> {
    if samples.is_empty() {
        return None;
    }

    let mut sorted = samples.to_vec();
    sorted.sort_by(f64::total_cmp);

    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 1 {
        Some(sorted[mid])
    } else {
        Some(f64::midpoint(sorted[mid - 1], sorted[mid]))
    }
}

/// Nearest-rank percentile of arbitrary precision samples
///
/// Sorts ascending and picks index `floor(p / 100 * (n - 1) + 0.5)`; no
/// interpolation. Returns zero for an empty batch.
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn percentile(samples: &[U256], percentile: f64) -> U256 {
    if samples.is_empty() {
        return U256::ZERO;
    }

    let mut sorted = samples.to_vec();
    sorted.sort_unstable();

    let last = sorted.len() - 1;
    let rank = (percentile / 100.0 * last as f64 + 0.5).floor().max(0.0) as usize;
    sorted[rank.min(last)]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn u256s(values: &[u64]) -> Vec<U256> {
        values.iter().copied().map(U256::from).collect()
    }

    #[test]
    fn linear_map_hits_bounds_and_clamps() {
        let range = (10.0, 20.0);
        assert!(score_map(10.0, range, (0.0, 1.0), CurveType::Linear).abs() < f64::EPSILON);
        assert!((score_map(20.0, range, (0.0, 1.0), CurveType::Linear) - 1.0).abs() < f64::EPSILON);
        assert!((score_map(15.0, range, (0.0, 1.0), CurveType::Linear) - 0.5).abs() < f64::EPSILON);

        assert!(score_map(-100.0, range, (0.0, 1.0), CurveType::Linear).abs() < f64::EPSILON);
        assert!((score_map(1e9, range, (0.0, 1.0), CurveType::Linear) - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn linear_map_is_monotonic() {
        let mut previous = f64::MIN;
        for step in 0..=100 {
            let x = f64::from(step);
            let y = score_map(x, (0.0, 100.0), (0.0, 1.0), CurveType::Linear);
            assert!(y >= previous);
            previous = y;
        }
    }

    #[test]
    fn steeper_curves_stay_below_linear() {
        for step in 1..100 {
            let x = f64::from(step);
            let linear = score_map(x, (0.0, 100.0), (0.0, 1.0), CurveType::Linear);
            let quadratic = score_map(x, (0.0, 100.0), (0.0, 1.0), CurveType::Quadratic);
            let cubic = score_map(x, (0.0, 100.0), (0.0, 1.0), CurveType::Cubic);
            assert!(quadratic < linear);
            assert!(cubic < quadratic);
        }
    }

    #[test]
    fn degenerate_range_maps_to_upper_bound() {
        let weight = score_map(7.0, (7.0, 7.0), (0.2, 1.0), CurveType::Quadratic);
        assert!((weight - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn median_of_odd_and_even_batches() {
        assert_eq!(median(&[]), None);
        assert_eq!(median(&[300.0, 100.0, 200.0]), Some(200.0));
        assert_eq!(median(&[400.0, 100.0, 300.0, 200.0]), Some(250.0));
    }

    #[test]
    fn percentile_uses_nearest_rank() {
        assert_eq!(
            percentile(&u256s(&[50, 10, 40, 20, 30]), 50.0),
            U256::from(30)
        );
        // floor(0.5 * 3 + 0.5) = 2
        assert_eq!(percentile(&u256s(&[1, 2, 3, 4]), 50.0), U256::from(3));
        assert_eq!(percentile(&u256s(&[1, 2, 3, 4]), 0.0), U256::from(1));
        assert_eq!(percentile(&u256s(&[1, 2, 3, 4]), 100.0), U256::from(4));
    }

    #[test]
    fn percentile_of_empty_batch_is_zero() {
        assert_eq!(percentile(&[], 90.0), U256::ZERO);
    }

    #[test]
    fn percentile_handles_values_beyond_u64() {
        let big = U256::from(u64::MAX) * U256::from(1_000u64);
        let samples = vec![U256::from(1u64), big, U256::from(2u64)];
        assert_eq!(percentile(&samples, 100.0), big);
    }
}
