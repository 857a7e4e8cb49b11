//! Per-fraction reduction pipeline: validates the raw fraction, runs the
//! four pipeline stages in order, and applies boundary rounding to the
//! reported values. Internal computation keeps full precision throughout;
//! only the returned result is rounded.

use crate::domain::sentinel;
use crate::domain::{
    FractionReductionResult, RatioResult, ReductionResult, ReductionSettings, RunFractionRaw,
    ScanSpeciesMatrix,
};
use crate::modules::{
    RatioContext, aggregate_cps, calculate_ratios, normalize_peak_heights, reduce_scan_species,
};
use crate::numerics::round_significant;

/// Reduces one run fraction. Pure and synchronous; safe to call
/// concurrently across fractions since nothing is shared between calls.
pub fn reduce_run_fraction(
    fraction: &RunFractionRaw,
    settings: &ReductionSettings,
) -> ReductionResult<FractionReductionResult> {
    fraction.validate()?;

    let reduced: Vec<Vec<_>> = fraction
        .scans
        .iter()
        .map(|row| {
            row.iter()
                .enumerate()
                .map(|(species, measurement)| {
                    reduce_scan_species(
                        measurement,
                        fraction.count_time_sec[species],
                        fraction.dead_time_ns,
                    )
                })
                .collect()
        })
        .collect();

    let aggregation = aggregate_cps(
        &reduced,
        &fraction.count_time_sec,
        fraction.sbm_zero_cps,
        settings.background_species_index,
        settings.output_significant_digits,
    );

    let context = RatioContext {
        reduced: &reduced,
        net_peak_cps: &aggregation.net_peak_cps,
        peak_fractional_error: &aggregation.peak_fractional_error,
        sbm_cps: &aggregation.sbm_cps,
        count_time_sec: &fraction.count_time_sec,
        mid_time_sec: fraction.mid_time_sec(),
        use_sbm: settings.use_sbm,
        use_linear_fits: settings.use_linear_fits,
    };
    let mut ratios = calculate_ratios(&settings.ratios, &context);

    let normalization = normalize_peak_heights(
        &reduced,
        &aggregation.net_peak_cps,
        &aggregation.peak_fractional_error,
        &aggregation.sbm_cps,
        &fraction.count_time_sec,
        settings.use_sbm,
    );

    let digits = settings.output_significant_digits;
    let mut net_peak_cps = aggregation.net_peak_cps;
    let mut peak_fractional_error = aggregation.peak_fractional_error;
    let mut reduced_peak_height = normalization.reduced_peak_height;
    let mut reduced_peak_height_fractional_error =
        normalization.reduced_peak_height_fractional_error;
    round_matrix(&mut net_peak_cps, digits);
    round_matrix(&mut peak_fractional_error, digits);
    round_matrix(&mut reduced_peak_height, digits);
    round_matrix(&mut reduced_peak_height_fractional_error, digits);
    for ratio in &mut ratios {
        round_ratio(ratio, digits);
    }

    Ok(FractionReductionResult {
        fraction_id: fraction.fraction_id.clone(),
        acquired_at: fraction.acquired_at.clone(),
        total_cps: aggregation.total_cps,
        net_peak_cps,
        peak_fractional_error,
        reduced_peak_height,
        reduced_peak_height_fractional_error,
        non_positive_sbm_count: normalization.non_positive_sbm_count,
        ratios,
    })
}

/// Sentinel cells keep their exact designated value so downstream equality
/// checks still recognize them.
fn round_cell(value: f64, digits: u32) -> f64 {
    if value == sentinel::ERROR_VALUE || value == sentinel::INVALID_COUNTS {
        value
    } else {
        round_significant(value, digits)
    }
}

fn round_matrix(matrix: &mut ScanSpeciesMatrix, digits: u32) {
    for scan in 0..matrix.scan_count() {
        for species in 0..matrix.species_count() {
            let rounded = round_cell(matrix.get(scan, species), digits);
            matrix.set(scan, species, rounded);
        }
    }
}

fn round_ratio(ratio: &mut RatioResult, digits: u32) {
    ratio.value = round_cell(ratio.value, digits);
    ratio.fractional_error = round_cell(ratio.fractional_error, digits);
    for value in ratio
        .eq_time
        .iter_mut()
        .chain(ratio.eq_value.iter_mut())
        .chain(ratio.eq_error.iter_mut())
    {
        *value = round_cell(*value, digits);
    }
}
