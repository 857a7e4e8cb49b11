//! SBM normalization of net peak heights.
//!
//! The secondary-beam monitor (SBM) tracks primary-beam intensity; dividing
//! each net peak cps by the simultaneous SBM cps removes beam drift. Scans
//! where the SBM signal is not positive cannot be normalized and are
//! counted as a data-quality output.

use crate::domain::sentinel;
use crate::domain::{ReducedGrid, ScanSpeciesMatrix};

#[derive(Debug, Clone, PartialEq)]
pub struct PeakHeightNormalization {
    pub reduced_peak_height: ScanSpeciesMatrix,
    pub reduced_peak_height_fractional_error: ScanSpeciesMatrix,
    /// Scans x species cells where SBM cps was <= 0 and normalization was
    /// skipped. A required quality counter, not a log message.
    pub non_positive_sbm_count: usize,
}

pub fn normalize_peak_heights(
    reduced: &ReducedGrid,
    net_peak_cps: &ScanSpeciesMatrix,
    peak_fractional_error: &ScanSpeciesMatrix,
    sbm_cps: &ScanSpeciesMatrix,
    count_time_sec: &[f64],
    use_sbm: bool,
) -> PeakHeightNormalization {
    let scan_count = net_peak_cps.scan_count();
    let species_count = net_peak_cps.species_count();

    let mut heights = ScanSpeciesMatrix::filled(scan_count, species_count, 0.0);
    let mut fractional_errors = ScanSpeciesMatrix::filled(scan_count, species_count, 1.0);
    let mut non_positive_sbm_count = 0;

    for scan in 0..scan_count {
        for species in 0..species_count {
            if !reduced[scan][species].is_valid() {
                heights.set(scan, species, sentinel::ERROR_VALUE);
                continue;
            }

            let net = net_peak_cps.get(scan, species);
            let fractional_error = peak_fractional_error.get(scan, species);
            if !use_sbm {
                heights.set(scan, species, net);
                fractional_errors.set(scan, species, fractional_error);
                continue;
            }

            let sbm = sbm_cps.get(scan, species);
            if sbm <= 0.0 {
                non_positive_sbm_count += 1;
                heights.set(scan, species, sentinel::ERROR_VALUE);
                continue;
            }

            heights.set(scan, species, net / sbm);
            // SBM counting adds its own Poisson term in quadrature.
            let sbm_variance = 1.0 / (sbm * count_time_sec[species]);
            fractional_errors.set(
                scan,
                species,
                (fractional_error * fractional_error + sbm_variance).sqrt(),
            );
        }
    }

    PeakHeightNormalization {
        reduced_peak_height: heights,
        reduced_peak_height_fractional_error: fractional_errors,
        non_positive_sbm_count,
    }
}
