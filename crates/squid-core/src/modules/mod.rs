//! The reduction pipeline stages, in execution order: raw integrations to
//! counts, counts to background-corrected cps, cps to isotopic ratios and
//! SBM-normalized peak heights.

pub mod aggregate;
pub mod integrations;
pub mod peak_heights;
pub mod ratios;

pub use aggregate::{CpsAggregation, aggregate_cps};
pub use integrations::{PeakReduction, reduce_peak_integrations, reduce_scan_species};
pub use peak_heights::{PeakHeightNormalization, normalize_peak_heights};
pub use ratios::{RatioContext, calculate_ratio, calculate_ratios};
