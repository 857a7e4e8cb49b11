//! Per scan x species reduction of raw integration arrays into total-count
//! estimates with one-sigma uncertainty, including dead-time correction.

use crate::domain::sentinel;
use crate::domain::{CountFault, ReducedScan, SpeciesMeasurement};
use crate::numerics::robust::{
    PEAK_TUNING_CONSTANT, SBM_TUNING_CONSTANT, index_of_largest_poisson_residual, tukeys_biweight,
};
use crate::numerics::median;

/// Median above which the robust biweight branch takes over from the
/// low-count Poisson branch.
const BIWEIGHT_MEDIAN_THRESHOLD: f64 = 100.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PeakReduction {
    pub total_counts: f64,
    pub one_sigma_abs: f64,
    pub fault: Option<CountFault>,
}

impl PeakReduction {
    fn faulted(fault: CountFault) -> Self {
        Self {
            total_counts: sentinel::INVALID_COUNTS,
            one_sigma_abs: sentinel::INVALID_COUNTS,
            fault: Some(fault),
        }
    }
}

/// Reduces one scan's raw peak integrations for one species.
pub fn reduce_peak_integrations(
    peak_integrations: &[f64],
    count_time_sec: f64,
    dead_time_ns: f64,
) -> PeakReduction {
    // Legacy OP-format encoding: a single negative value is an
    // already-reduced total.
    if peak_integrations.len() == 1 && peak_integrations[0] < 0.0 {
        let total_counts = peak_integrations[0].abs();
        return PeakReduction {
            total_counts,
            one_sigma_abs: total_counts.sqrt(),
            fault: None,
        };
    }

    let Some(median_counts) = median(peak_integrations) else {
        return PeakReduction::faulted(CountFault::MalformedIntegrations);
    };

    if median_counts < 0.0 {
        // Impossible for count data; degrade, never crash.
        return PeakReduction::faulted(CountFault::NegativeMedian);
    }

    if median_counts > BIWEIGHT_MEDIAN_THRESHOLD {
        reduce_high_count_peak(peak_integrations, count_time_sec, dead_time_ns)
    } else {
        reduce_low_count_peak(
            median_counts,
            peak_integrations,
            count_time_sec,
            dead_time_ns,
        )
    }
}

fn reduce_high_count_peak(
    peak_integrations: &[f64],
    count_time_sec: f64,
    dead_time_ns: f64,
) -> PeakReduction {
    let Ok(estimate) = tukeys_biweight(peak_integrations, PEAK_TUNING_CONSTANT) else {
        return PeakReduction::faulted(CountFault::MalformedIntegrations);
    };

    let n = peak_integrations.len() as f64;
    let counts_per_second = estimate.location * n / count_time_sec;
    let Some(corrected_cps) = dead_time_corrected_cps(counts_per_second, dead_time_ns) else {
        return PeakReduction::faulted(CountFault::DeadTimeSaturated);
    };

    let sigma_per_integration = estimate.scale.max(estimate.location.max(0.0).sqrt());
    PeakReduction {
        total_counts: corrected_cps * count_time_sec,
        one_sigma_abs: sigma_per_integration / n.sqrt() * n,
        fault: None,
    }
}

fn reduce_low_count_peak(
    median_counts: f64,
    peak_integrations: &[f64],
    count_time_sec: f64,
    dead_time_ns: f64,
) -> PeakReduction {
    let excluded = index_of_largest_poisson_residual(median_counts, peak_integrations);

    let mut kept_sum = 0.0;
    let mut kept_sum_squared = 0.0;
    let mut kept_count = 0_usize;
    for (index, value) in peak_integrations.iter().copied().enumerate() {
        if Some(index) == excluded {
            continue;
        }
        kept_sum += value;
        kept_sum_squared += value * value;
        kept_count += 1;
    }

    if kept_count == 0 {
        return PeakReduction::faulted(CountFault::MalformedIntegrations);
    }

    let n = kept_count as f64;
    let mean_counts = kept_sum / n;
    let counts_per_second = mean_counts * n / count_time_sec;
    let Some(corrected_cps) = dead_time_corrected_cps(counts_per_second, dead_time_ns) else {
        return PeakReduction::faulted(CountFault::DeadTimeSaturated);
    };

    let sample_variance = if kept_count > 1 {
        ((kept_sum_squared - n * mean_counts * mean_counts) / (n - 1.0)).max(0.0)
    } else {
        0.0
    };
    let sigma_per_integration = sample_variance.sqrt().max(mean_counts.max(0.0).sqrt());

    PeakReduction {
        total_counts: corrected_cps * count_time_sec,
        one_sigma_abs: sigma_per_integration / n.sqrt() * n,
        fault: None,
    }
}

/// Reduces one scan's raw SBM integrations: biweight location scaled by the
/// sample size. The SBM channel has no dead time and no outlier removal.
pub fn reduce_sbm_integrations(sbm_integrations: &[f64]) -> f64 {
    if sbm_integrations.len() == 1 && sbm_integrations[0] < 0.0 {
        return sbm_integrations[0].abs();
    }

    match tukeys_biweight(sbm_integrations, SBM_TUNING_CONSTANT) {
        Ok(estimate) => estimate.location * sbm_integrations.len() as f64,
        Err(_) => sentinel::INVALID_COUNTS,
    }
}

/// Full per-cell reduction used by the pipeline.
pub fn reduce_scan_species(
    measurement: &SpeciesMeasurement,
    count_time_sec: f64,
    dead_time_ns: f64,
) -> ReducedScan {
    let peak = reduce_peak_integrations(
        &measurement.peak_integrations,
        count_time_sec,
        dead_time_ns,
    );
    ReducedScan {
        total_counts: peak.total_counts,
        one_sigma_abs: peak.one_sigma_abs,
        total_sbm_counts: reduce_sbm_integrations(&measurement.sbm_integrations),
        time_stamp_sec: measurement.time_stamp_sec,
        trim_mass_amu: measurement.trim_mass_amu,
        fault: peak.fault,
    }
}

fn dead_time_corrected_cps(counts_per_second: f64, dead_time_ns: f64) -> Option<f64> {
    let denominator = 1.0 - counts_per_second * dead_time_ns / 1.0e9;
    // Physically valid inputs keep cps * dead-time well below 1; a collapsed
    // denominator is a data fault, not a panic.
    if denominator <= 0.0 {
        return None;
    }
    Some(counts_per_second / denominator)
}
