pub mod regression;
pub mod robust;

pub use regression::{
    FitModel, RegressionError, WtdLinCorrInput, WtdLinCorrResult, chi_squared_upper_tail,
    wtd_lin_corr,
};
pub use robust::{
    BiweightEstimate, PEAK_TUNING_CONSTANT, RobustEstimateError, SBM_TUNING_CONSTANT,
    index_of_largest_poisson_residual, poisson_acceptance_interval, tukeys_biweight,
};

fn kahan_add(sum: &mut f64, correction: &mut f64, value: f64) {
    let corrected = value - *correction;
    let next = *sum + corrected;
    *correction = (next - *sum) - corrected;
    *sum = next;
}

pub fn stable_sum(values: &[f64]) -> f64 {
    let mut sum = 0.0;
    let mut correction = 0.0;

    for &value in values {
        kahan_add(&mut sum, &mut correction, value);
    }

    sum
}

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(stable_sum(values) / values.len() as f64)
}

/// Median with deterministic NaN-free ordering; the caller guarantees
/// finite inputs (enforced by `RunFractionRaw::validate`).
pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_unstable_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 1 {
        Some(sorted[mid])
    } else {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    }
}

/// Round to `digits` significant decimal digits for report determinism.
/// Zero and non-finite values pass through unchanged.
pub fn round_significant(value: f64, digits: u32) -> f64 {
    if value == 0.0 || !value.is_finite() || digits == 0 {
        return value;
    }
    let magnitude = value.abs().log10().floor() as i32;
    let shift = digits as i32 - 1 - magnitude;
    let factor = 10.0_f64.powi(shift);
    (value * factor).round() / factor
}
