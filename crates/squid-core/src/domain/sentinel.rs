//! Legacy numeric projections of reduction faults.
//!
//! Downstream report layers expect the historical Squid sentinel magnitudes,
//! so faulted fields carry these values in the output. Internal code never
//! branches on them; it branches on `CountFault` / `RatioBranch` tags.

/// Projection of a faulted total-count estimate and its sigma.
pub const INVALID_COUNTS: f64 = -1.0;

/// Projection of a faulted net cps, reduced peak height, or ratio field.
pub const ERROR_VALUE: f64 = -9.876_543_210_123_46;

/// Direct-mode ratio floor when the numerator totals are zero.
pub const TINY_RATIO: f64 = 1.0e-32;

/// Direct-mode ratio ceiling when the denominator totals are zero.
pub const HUGE_RATIO: f64 = 1.0e16;
