//! Background determination and per-species counts-per-second aggregation
//! for one run fraction.

use crate::domain::sentinel;
use crate::domain::{ReducedGrid, ScanSpeciesMatrix};
use crate::numerics::robust::{PEAK_TUNING_CONSTANT, tukeys_biweight};
use crate::numerics::{mean, round_significant};

/// Arithmetic-mean background at or above this level is replaced by the
/// robust biweight location; below it the plain mean stands.
const ROBUST_BACKGROUND_THRESHOLD_CPS: f64 = 10.0;

/// Net cps magnitudes at or below this floor get a 100% fractional error.
const NET_CPS_FLOOR: f64 = 1.0e-6;

#[derive(Debug, Clone, PartialEq)]
pub struct CpsAggregation {
    pub peak_cps: ScanSpeciesMatrix,
    pub sbm_cps: ScanSpeciesMatrix,
    /// Background-subtracted peak cps; faulted cells carry
    /// `sentinel::ERROR_VALUE`.
    pub net_peak_cps: ScanSpeciesMatrix,
    pub peak_fractional_error: ScanSpeciesMatrix,
    pub background_cps: f64,
    /// Per-species mean net cps across scans, background restored for the
    /// background species itself, boundary-rounded.
    pub total_cps: Vec<f64>,
}

pub fn aggregate_cps(
    reduced: &ReducedGrid,
    count_time_sec: &[f64],
    sbm_zero_cps: f64,
    background_species_index: Option<usize>,
    significant_digits: u32,
) -> CpsAggregation {
    let scan_count = reduced.len();
    let species_count = count_time_sec.len();

    let mut peak_cps = ScanSpeciesMatrix::filled(scan_count, species_count, 0.0);
    let mut sbm_cps = ScanSpeciesMatrix::filled(scan_count, species_count, 0.0);
    for (scan, row) in reduced.iter().enumerate() {
        for (species, cell) in row.iter().enumerate() {
            let count_time = count_time_sec[species];
            let peak_value = if cell.is_valid() {
                cell.total_counts / count_time
            } else {
                sentinel::ERROR_VALUE
            };
            peak_cps.set(scan, species, peak_value);
            sbm_cps.set(
                scan,
                species,
                cell.total_sbm_counts / count_time - sbm_zero_cps,
            );
        }
    }

    let background_species =
        background_species_index.filter(|species| *species < species_count);
    let background_cps = determine_background_cps(reduced, &peak_cps, background_species);
    let background_count_time = background_species.map(|species| count_time_sec[species]);

    let mut net_peak_cps = ScanSpeciesMatrix::filled(scan_count, species_count, 0.0);
    let mut peak_fractional_error = ScanSpeciesMatrix::filled(scan_count, species_count, 1.0);
    for (scan, row) in reduced.iter().enumerate() {
        for (species, cell) in row.iter().enumerate() {
            if !cell.is_valid() {
                net_peak_cps.set(scan, species, sentinel::ERROR_VALUE);
                continue;
            }
            let count_time = count_time_sec[species];
            let net = peak_cps.get(scan, species) - background_cps;
            net_peak_cps.set(scan, species, net);

            if net.abs() > NET_CPS_FLOOR {
                // Poisson propagation: the species' own counts plus the
                // background variance scaled by the squared count-time
                // ratio. Without a background species the ratio collapses
                // to 1 (the subject's own count time substitutes).
                let bkg_count_time = background_count_time.unwrap_or(count_time);
                let variance = cell.total_counts
                    + background_cps.abs() * count_time * count_time / bkg_count_time;
                peak_fractional_error
                    .set(scan, species, variance.max(0.0).sqrt() / net.abs() / count_time);
            }
        }
    }

    let total_cps = (0..species_count)
        .map(|species| {
            let valid_net: Vec<f64> = (0..scan_count)
                .filter(|scan| reduced[*scan][species].is_valid())
                .map(|scan| net_peak_cps.get(scan, species))
                .collect();
            match mean(&valid_net) {
                Some(net_mean) => {
                    let restored = if background_species == Some(species) {
                        net_mean + background_cps
                    } else {
                        net_mean
                    };
                    round_significant(restored, significant_digits)
                }
                None => sentinel::ERROR_VALUE,
            }
        })
        .collect();

    CpsAggregation {
        peak_cps,
        sbm_cps,
        net_peak_cps,
        peak_fractional_error,
        background_cps,
        total_cps,
    }
}

fn determine_background_cps(
    reduced: &ReducedGrid,
    peak_cps: &ScanSpeciesMatrix,
    background_species: Option<usize>,
) -> f64 {
    let Some(species) = background_species else {
        return 0.0;
    };

    let background_readings: Vec<f64> = (0..reduced.len())
        .filter(|scan| reduced[*scan][species].is_valid())
        .map(|scan| peak_cps.get(scan, species))
        .collect();
    let Some(background_mean) = mean(&background_readings) else {
        return 0.0;
    };

    if background_mean >= ROBUST_BACKGROUND_THRESHOLD_CPS {
        // Robustness only kicks in once the background is statistically
        // significant.
        match tukeys_biweight(&background_readings, PEAK_TUNING_CONSTANT) {
            Ok(estimate) => estimate.location,
            Err(_) => background_mean,
        }
    } else {
        background_mean
    }
}

#[cfg(test)]
mod tests {
    use super::{CpsAggregation, aggregate_cps};
    use crate::domain::{CountFault, ReducedGrid, ReducedScan, sentinel};

    fn cell(total_counts: f64, total_sbm: f64, time: f64) -> ReducedScan {
        ReducedScan {
            total_counts,
            one_sigma_abs: total_counts.abs().sqrt(),
            total_sbm_counts: total_sbm,
            time_stamp_sec: time,
            trim_mass_amu: 204.0,
            fault: None,
        }
    }

    /// Two species: species 0 is background, species 1 is the subject.
    fn grid_with_background(background_counts: f64) -> ReducedGrid {
        vec![
            vec![cell(background_counts, 800.0, 0.0), cell(9000.0, 820.0, 10.0)],
            vec![cell(background_counts, 810.0, 60.0), cell(9100.0, 830.0, 70.0)],
            vec![cell(background_counts, 805.0, 120.0), cell(8900.0, 825.0, 130.0)],
        ]
    }

    fn aggregate(background_counts: f64, background: Option<usize>) -> CpsAggregation {
        aggregate_cps(
            &grid_with_background(background_counts),
            &[2.0, 2.0],
            0.0,
            background,
            12,
        )
    }

    #[test]
    fn constant_background_survives_both_threshold_branches() {
        // 4 counts / 2 s = 2 cps keeps the plain-mean branch.
        let low = aggregate(4.0, Some(0));
        assert!((low.background_cps - 2.0).abs() < 1.0e-12);

        // 40 counts / 2 s = 20 cps crosses into the biweight branch; a
        // constant background must come back unchanged either way.
        let high = aggregate(40.0, Some(0));
        assert!((high.background_cps - 20.0).abs() < 1.0e-12);
    }

    #[test]
    fn net_cps_subtracts_background_and_totals_restore_it() {
        let aggregation = aggregate(40.0, Some(0));
        // Subject scan 0: 9000 / 2 - 20 = 4480 cps.
        assert!((aggregation.net_peak_cps.get(0, 1) - 4480.0).abs() < 1.0e-9);
        // Background species nets to ~0 and its total restores the
        // background level.
        assert!(aggregation.net_peak_cps.get(0, 0).abs() < 1.0e-9);
        assert!((aggregation.total_cps[0] - 20.0).abs() < 1.0e-9);

        let subject_mean = (4480.0 + 4530.0 + 4430.0) / 3.0;
        assert!((aggregation.total_cps[1] - subject_mean).abs() < 1.0e-6);
    }

    #[test]
    fn missing_background_species_collapses_the_count_time_ratio() {
        let aggregation = aggregate(40.0, None);
        assert_eq!(aggregation.background_cps, 0.0);
        // Net equals raw cps and the fractional error is pure Poisson:
        // sqrt(N) / N/ct / ct = 1/sqrt(N).
        let net = aggregation.net_peak_cps.get(0, 1);
        assert!((net - 4500.0).abs() < 1.0e-9);
        let expected_fractional = 1.0 / 9000.0_f64.sqrt();
        assert!(
            (aggregation.peak_fractional_error.get(0, 1) - expected_fractional).abs() < 1.0e-12
        );
    }

    #[test]
    fn out_of_range_background_index_means_no_background() {
        let aggregation = aggregate(40.0, Some(7));
        assert_eq!(aggregation.background_cps, 0.0);
    }

    #[test]
    fn faulted_cells_project_the_error_sentinel_and_skip_totals() {
        let mut grid = grid_with_background(4.0);
        grid[1][1].fault = Some(CountFault::NegativeMedian);
        grid[1][1].total_counts = sentinel::INVALID_COUNTS;
        let aggregation = aggregate_cps(&grid, &[2.0, 2.0], 0.0, Some(0), 12);

        assert_eq!(aggregation.net_peak_cps.get(1, 1), sentinel::ERROR_VALUE);
        assert_eq!(aggregation.peak_fractional_error.get(1, 1), 1.0);

        // Total for the subject averages only the two valid scans.
        let expected = ((9000.0 / 2.0 - 2.0) + (8900.0 / 2.0 - 2.0)) / 2.0;
        assert!((aggregation.total_cps[1] - expected).abs() < 1.0e-6);
    }

    #[test]
    fn tiny_net_cps_floors_the_fractional_error_at_one() {
        let grid: ReducedGrid = vec![vec![cell(0.0, 800.0, 0.0)]];
        let aggregation = aggregate_cps(&grid, &[2.0], 0.0, None, 12);
        assert_eq!(aggregation.peak_fractional_error.get(0, 0), 1.0);
        assert_eq!(aggregation.net_peak_cps.get(0, 0), 0.0);
    }

    #[test]
    fn sbm_cps_subtracts_the_sbm_zero_level() {
        let grid = grid_with_background(4.0);
        let aggregation = aggregate_cps(&grid, &[2.0, 2.0], 15.0, None, 12);
        assert!((aggregation.sbm_cps.get(0, 0) - (800.0 / 2.0 - 15.0)).abs() < 1.0e-12);
    }
}
