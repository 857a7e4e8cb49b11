//! Isotopic ratio calculation per configured numerator/denominator pair.
//!
//! Each ratio runs through an explicit state machine: `Inactive` when a
//! species index is out of range, `Direct` spot averaging when the counting
//! statistics are too poor for interpolation, and Dodson (1978) double
//! interpolation otherwise, optionally refined by a weighted correlated
//! linear regression.

use crate::domain::sentinel;
use crate::domain::{RatioBranch, RatioDefinition, RatioResult, ReducedGrid, ScanSpeciesMatrix};
use crate::numerics::regression::{FitModel, WtdLinCorrInput, wtd_lin_corr};

/// Below this many total counts on either side the Direct branch applies.
const DIRECT_COUNT_THRESHOLD: f64 = 32.0;

/// Linear-to-midtime fitting needs at least this many interpolation points.
const MIN_POINTS_FOR_LINE_FIT: usize = 4;

/// Everything one fraction's ratio pass reads; all slices are per-species
/// or scan x species and share the fraction's dimensions.
#[derive(Debug, Clone, Copy)]
pub struct RatioContext<'a> {
    pub reduced: &'a ReducedGrid,
    pub net_peak_cps: &'a ScanSpeciesMatrix,
    pub peak_fractional_error: &'a ScanSpeciesMatrix,
    pub sbm_cps: &'a ScanSpeciesMatrix,
    pub count_time_sec: &'a [f64],
    pub mid_time_sec: f64,
    pub use_sbm: bool,
    pub use_linear_fits: bool,
}

pub fn calculate_ratios(
    definitions: &[RatioDefinition],
    context: &RatioContext<'_>,
) -> Vec<RatioResult> {
    definitions
        .iter()
        .map(|definition| calculate_ratio(*definition, context))
        .collect()
}

pub fn calculate_ratio(definition: RatioDefinition, context: &RatioContext<'_>) -> RatioResult {
    let species_count = context.count_time_sec.len();
    if definition.numerator >= species_count || definition.denominator >= species_count {
        return RatioResult::inactive(definition);
    }

    let numerator_total = valid_total_counts(context.reduced, definition.numerator);
    let denominator_total = valid_total_counts(context.reduced, definition.denominator);
    let scan_count = context.reduced.len();

    if scan_count == 1
        || numerator_total.abs() < DIRECT_COUNT_THRESHOLD
        || denominator_total.abs() < DIRECT_COUNT_THRESHOLD
    {
        return direct_ratio(definition, context, numerator_total, denominator_total);
    }

    interpolated_ratio(definition, context)
}

fn valid_total_counts(reduced: &ReducedGrid, species: usize) -> f64 {
    reduced
        .iter()
        .filter(|row| row[species].is_valid())
        .map(|row| row[species].total_counts)
        .sum()
}

/// Spot-average ratio from the fraction's raw totals. Zero-count sides map
/// to the tiny/huge floor sentinels so the ratio stays finite and sortable.
fn direct_ratio(
    definition: RatioDefinition,
    context: &RatioContext<'_>,
    numerator_total: f64,
    denominator_total: f64,
) -> RatioResult {
    let (value, fractional_error) = if denominator_total == 0.0 {
        (sentinel::HUGE_RATIO, 1.0)
    } else if numerator_total == 0.0 {
        (sentinel::TINY_RATIO, 1.0)
    } else {
        let numerator_cps = numerator_total / context.count_time_sec[definition.numerator];
        let denominator_cps = denominator_total / context.count_time_sec[definition.denominator];
        let value = numerator_cps / denominator_cps;
        let fractional_error =
            (1.0 / numerator_total.abs() + 1.0 / denominator_total.abs()).sqrt();
        (value, fractional_error)
    };

    RatioResult {
        definition,
        active: true,
        branch: RatioBranch::Direct,
        value,
        fractional_error,
        min_index: -1,
        eq_time: vec![context.mid_time_sec],
        eq_value: vec![value],
        eq_error: vec![value.abs() * fractional_error],
    }
}

/// One Dodson-interpolated ratio estimate at the common mean time of an
/// adjacent scan pair.
#[derive(Debug, Clone, Copy)]
struct InterpolationPoint {
    time_sec: f64,
    value: f64,
    one_sigma_abs: f64,
    /// Index of the earlier scan in the pair, used to detect points that
    /// share a scan and therefore correlate.
    first_scan: usize,
}

fn interpolated_ratio(definition: RatioDefinition, context: &RatioContext<'_>) -> RatioResult {
    let points = collect_interpolation_points(definition, context);

    let branch = RatioBranch::Interpolated {
        points: points.len(),
    };
    let eq_time: Vec<f64> = points.iter().map(|p| p.time_sec).collect();
    let eq_value: Vec<f64> = points.iter().map(|p| p.value).collect();
    let eq_error: Vec<f64> = points.iter().map(|p| p.one_sigma_abs).collect();

    let mut result = RatioResult {
        definition,
        active: true,
        branch,
        value: sentinel::ERROR_VALUE,
        fractional_error: sentinel::ERROR_VALUE,
        min_index: -1,
        eq_time,
        eq_value,
        eq_error,
    };

    match points.len() {
        0 => result,
        1 => {
            result.value = points[0].value;
            result.fractional_error = fractional_from_absolute(points[0].value, points[0].one_sigma_abs);
            result
        }
        _ => {
            summarize_points(&points, context, &mut result);
            result
        }
    }
}

fn collect_interpolation_points(
    definition: RatioDefinition,
    context: &RatioContext<'_>,
) -> Vec<InterpolationPoint> {
    let scan_count = context.reduced.len();
    let mut points = Vec::with_capacity(scan_count.saturating_sub(1));

    for scan in 0..scan_count.saturating_sub(1) {
        if let Some(point) = interpolate_pair(definition, context, scan) {
            points.push(point);
        }
    }
    points
}

/// Dodson double interpolation across scans `scan` and `scan + 1`: both
/// species are linearly interpolated to the common mean time of the four
/// measurements, with weights derived from the fractional time offset
/// between the numerator and denominator peak-hop positions.
fn interpolate_pair(
    definition: RatioDefinition,
    context: &RatioContext<'_>,
    scan: usize,
) -> Option<InterpolationPoint> {
    let num = definition.numerator;
    let den = definition.denominator;

    for species in [num, den] {
        for s in [scan, scan + 1] {
            if !context.reduced[s][species].is_valid() {
                return None;
            }
            if context.use_sbm && context.sbm_cps.get(s, species) <= 0.0 {
                return None;
            }
        }
    }

    let t1n = context.reduced[scan][num].time_stamp_sec;
    let t2n = context.reduced[scan + 1][num].time_stamp_sec;
    let t1d = context.reduced[scan][den].time_stamp_sec;
    let t2d = context.reduced[scan + 1][den].time_stamp_sec;
    let span = t2n - t1n;
    if span == 0.0 {
        return None;
    }

    // Fractional offset of the denominator peak-hop relative to the
    // numerator's scan interval.
    let pk_f = (t1d - t1n) / span;
    let w_early = (1.0 - pk_f) / 2.0;
    let w_late = (1.0 + pk_f) / 2.0;

    let a1 = context.net_peak_cps.get(scan, num);
    let a2 = context.net_peak_cps.get(scan + 1, num);
    let b1 = context.net_peak_cps.get(scan, den);
    let b2 = context.net_peak_cps.get(scan + 1, den);

    let numerator_interp = w_early * a1 + w_late * a2;
    let denominator_interp = w_late * b1 + w_early * b2;
    if denominator_interp == 0.0 {
        return None;
    }
    let value = numerator_interp / denominator_interp;

    // Variance propagation: the four measurements are independent of each
    // other (within one point), so the interpolated values accumulate the
    // weighted absolute variances, then combine as a quotient.
    let numerator_variance = w_early * w_early * absolute_variance(context, scan, num)
        + w_late * w_late * absolute_variance(context, scan + 1, num);
    let denominator_variance = w_late * w_late * absolute_variance(context, scan, den)
        + w_early * w_early * absolute_variance(context, scan + 1, den);

    let fractional_variance = safe_ratio(numerator_variance, numerator_interp)
        + safe_ratio(denominator_variance, denominator_interp);
    let one_sigma_abs = value.abs() * fractional_variance.max(0.0).sqrt();

    Some(InterpolationPoint {
        time_sec: (t1n + t2n + t1d + t2d) / 4.0,
        value,
        one_sigma_abs,
        first_scan: scan,
    })
}

/// Absolute variance of one measured net cps, with the SBM Poisson term
/// folded into the fractional variance when SBM normalization is active.
fn absolute_variance(context: &RatioContext<'_>, scan: usize, species: usize) -> f64 {
    let value = context.net_peak_cps.get(scan, species);
    let mut fractional_variance = {
        let f = context.peak_fractional_error.get(scan, species);
        f * f
    };
    if context.use_sbm {
        let sbm = context.sbm_cps.get(scan, species);
        if sbm > 0.0 {
            fractional_variance += 1.0 / (sbm * context.count_time_sec[species]);
        }
    }
    value * value * fractional_variance
}

fn safe_ratio(variance: f64, interpolated: f64) -> f64 {
    if interpolated == 0.0 {
        0.0
    } else {
        variance / (interpolated * interpolated)
    }
}

/// Summarizes >= 2 interpolation points by weighted correlated regression:
/// a weighted average in spot-average mode, or a line evaluated at the
/// fraction midtime when linear fitting is enabled and enough points exist.
fn summarize_points(
    points: &[InterpolationPoint],
    context: &RatioContext<'_>,
    result: &mut RatioResult,
) {
    let values: Vec<f64> = points.iter().map(|p| p.value).collect();
    let sigmas: Vec<f64> = points.iter().map(|p| p.one_sigma_abs).collect();
    let times: Vec<f64> = points.iter().map(|p| p.time_sec).collect();
    // Consecutive points that share a scan correlate; a gap from a skipped
    // pair breaks adjacency.
    let adjacency: Vec<bool> = points
        .iter()
        .enumerate()
        .map(|(i, p)| i > 0 && p.first_scan == points[i - 1].first_scan + 1)
        .collect();

    let use_line = context.use_linear_fits && points.len() >= MIN_POINTS_FOR_LINE_FIT;
    let (model, abscissa) = if use_line {
        (FitModel::Line, Some(times.as_slice()))
    } else {
        (FitModel::WeightedAverage, None)
    };

    let fit = match wtd_lin_corr(
        model,
        WtdLinCorrInput {
            values: &values,
            one_sigma_abs: &sigmas,
            adjacent_to_previous: &adjacency,
            abscissa,
        },
    ) {
        Ok(fit) => fit,
        // Degenerate inputs (zero sigmas, singular covariance) surface as
        // the error sentinel rather than aborting the fraction.
        Err(_) => return,
    };

    let (value, one_sigma) = if use_line {
        fit.predict(context.mid_time_sec)
    } else if points.len() == 2 {
        // With two points the external error says nothing about agreement;
        // report the observed scatter instead, so an identical pair reads
        // as a near-zero error.
        (fit.intercept, fit.sigma_intercept * fit.mswd.max(0.0).sqrt())
    } else {
        (fit.intercept, fit.sigma_intercept)
    };

    result.value = value;
    result.fractional_error = fractional_from_absolute(value, one_sigma);
    result.min_index = fit.min_index;
}

fn fractional_from_absolute(value: f64, one_sigma_abs: f64) -> f64 {
    if value.abs() <= sentinel::TINY_RATIO {
        1.0
    } else {
        one_sigma_abs / value.abs()
    }
}
