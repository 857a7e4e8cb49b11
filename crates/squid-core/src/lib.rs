//! Run-fraction reduction for SHRIMP ion-microprobe analyses.
//!
//! Implements the published Squid/Dodson reduction model: robust per-scan
//! peak totals (Tukey biweight, Poisson outlier rejection, dead-time
//! correction), background-corrected counts per second, Dodson (1978)
//! double-interpolated isotopic ratios with a weighted correlated linear
//! regression refinement, and SBM-normalized peak heights.
//!
//! The crate is pure computation: no I/O beyond [`session`] document
//! loading, no logging, no shared state. Data quality is communicated
//! through tagged faults, sentinel values, and counters rather than errors;
//! see [`domain::sentinel`].

pub mod domain;
pub mod modules;
pub mod numerics;
pub mod reduction;
pub mod session;

pub use domain::{
    FractionReductionResult, RatioBranch, RatioDefinition, RatioResult, ReductionError,
    ReductionResult, ReductionSettings, RunFractionRaw, SessionError, SpeciesMeasurement,
};
pub use reduction::reduce_run_fraction;
pub use session::SessionDocument;
