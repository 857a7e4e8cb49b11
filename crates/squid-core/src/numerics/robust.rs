//! Robust estimators fixed by the published Squid reduction model: Tukey's
//! biweight location/scale and the low-count Poisson outlier finder.

use super::median;

/// Biweight tuning constant for peak and ratio data. Fixed domain constant,
/// not a tunable default.
pub const PEAK_TUNING_CONSTANT: f64 = 9.0;

/// Biweight tuning constant for SBM data.
pub const SBM_TUNING_CONSTANT: f64 = 6.0;

/// Two-sided tail probability of the low-count Poisson acceptance interval.
const POISSON_OUTLIER_ALPHA: f64 = 0.05;

const MAX_ITERATIONS: usize = 100;
const CONVERGENCE_EPSILON: f64 = 1.0e-12;
const MINIMUM_SCALE: f64 = 1.0e-10;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BiweightEstimate {
    pub location: f64,
    pub scale: f64,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RobustEstimateError {
    #[error("biweight estimation requires at least one value")]
    Empty,
    #[error("biweight tuning constant must be finite and > 0, got {value}")]
    InvalidTuningConstant { value: f64 },
    #[error("biweight input must be finite, index {index} got {value}")]
    NonFiniteValue { index: usize, value: f64 },
}

/// Iteratively-reweighted biweight location and scale. Deterministic for a
/// fixed input: the iteration runs to a fixed relative tolerance with a hard
/// cap, so no iteration-count nondeterminism is visible to the caller.
pub fn tukeys_biweight(
    values: &[f64],
    tuning_constant: f64,
) -> Result<BiweightEstimate, RobustEstimateError> {
    if values.is_empty() {
        return Err(RobustEstimateError::Empty);
    }
    if !tuning_constant.is_finite() || tuning_constant <= 0.0 {
        return Err(RobustEstimateError::InvalidTuningConstant {
            value: tuning_constant,
        });
    }
    for (index, value) in values.iter().copied().enumerate() {
        if !value.is_finite() {
            return Err(RobustEstimateError::NonFiniteValue { index, value });
        }
    }

    let mut location = median(values).unwrap_or(values[0]);
    if values.len() == 1 || values.iter().all(|value| *value == location) {
        return Ok(BiweightEstimate {
            location,
            scale: 0.0,
        });
    }

    let deviations: Vec<f64> = values
        .iter()
        .map(|value| (value - location).abs())
        .collect();
    let mut scale = median(&deviations).unwrap_or(0.0).max(MINIMUM_SCALE);

    for _ in 0..MAX_ITERATIONS {
        let (next_location, next_scale) =
            reweighted_step(values, location, scale, tuning_constant);
        let location_delta = (next_location - location).abs();
        let scale_delta = (next_scale - scale).abs();
        let converged = location_delta <= CONVERGENCE_EPSILON * (location.abs() + MINIMUM_SCALE)
            && scale_delta <= CONVERGENCE_EPSILON * (scale.abs() + MINIMUM_SCALE);

        location = next_location;
        scale = next_scale;
        if converged {
            break;
        }
    }

    Ok(BiweightEstimate { location, scale })
}

fn reweighted_step(values: &[f64], location: f64, scale: f64, tuning: f64) -> (f64, f64) {
    let n = values.len() as f64;
    let mut weighted_sum = 0.0;
    let mut weight_total = 0.0;

    for &value in values {
        let u = (value - location) / (tuning * scale);
        if u.abs() < 1.0 {
            let weight = (1.0 - u * u) * (1.0 - u * u);
            weighted_sum += weight * value;
            weight_total += weight;
        }
    }

    let next_location = if weight_total > 0.0 {
        weighted_sum / weight_total
    } else {
        location
    };

    let mut scale_numerator = 0.0;
    let mut scale_denominator = 0.0;
    for &value in values {
        let u = (value - location) / (tuning * scale);
        if u.abs() < 1.0 {
            let one_minus = 1.0 - u * u;
            let deviation = value - next_location;
            scale_numerator += deviation * deviation * one_minus.powi(4);
            scale_denominator += one_minus * (1.0 - 5.0 * u * u);
        }
    }

    let next_scale = if scale_denominator.abs() > 0.0 {
        (n * scale_numerator).sqrt() / scale_denominator.abs()
    } else {
        scale
    };

    (next_location, next_scale.max(MINIMUM_SCALE))
}

/// Central `1 - alpha` acceptance interval of the Poisson distribution with
/// mean `lambda`, as integer count bounds. Walks the exact pmf via the
/// multiplicative recurrence; valid for the low-count branch (`lambda` up to
/// a few hundred).
pub fn poisson_acceptance_interval(lambda: f64) -> (f64, f64) {
    let lower_tail = POISSON_OUTLIER_ALPHA / 2.0;
    let upper_tail = 1.0 - lower_tail;

    let mut pmf = (-lambda).exp();
    let mut cumulative = pmf;
    let mut k = 0_u64;
    let mut lower: Option<u64> = None;
    // Generous cap: the upper quantile of Poisson(100) is well under 200.
    let cap = (lambda + 20.0 * lambda.sqrt() + 20.0) as u64;

    loop {
        if lower.is_none() && cumulative > lower_tail {
            lower = Some(k);
        }
        if cumulative >= upper_tail || k >= cap {
            break;
        }
        k += 1;
        pmf *= lambda / k as f64;
        cumulative += pmf;
    }

    (lower.unwrap_or(0) as f64, k as f64)
}

/// Index of the single raw integration (if any) whose Poisson-normalized
/// residual falls outside the published low-count acceptance interval.
/// Only consulted when `0 < median <= 100`; at most one observation is ever
/// excluded per scan.
pub fn index_of_largest_poisson_residual(median_counts: f64, values: &[f64]) -> Option<usize> {
    if !(median_counts > 0.0 && median_counts <= 100.0) {
        return None;
    }

    let (lower, upper) = poisson_acceptance_interval(median_counts);
    let normalizer = median_counts.sqrt();
    let mut flagged: Option<(usize, f64)> = None;

    for (index, value) in values.iter().copied().enumerate() {
        if value >= lower && value <= upper {
            continue;
        }
        let residual = (value - median_counts).abs() / normalizer;
        match flagged {
            Some((_, largest)) if residual <= largest => {}
            _ => flagged = Some((index, residual)),
        }
    }

    flagged.map(|(index, _)| index)
}
