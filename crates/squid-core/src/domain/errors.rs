use std::path::PathBuf;

/// Whole-fraction failures. Everything else in the reduction degrades to
/// per-cell or per-ratio sentinels (see `domain::sentinel`).
#[derive(Debug, thiserror::Error)]
pub enum ReductionError {
    #[error("run fraction '{fraction_id}' must contain at least one scan and one species")]
    EmptyFraction { fraction_id: String },
    #[error("run fraction '{fraction_id}' declares {declared} scans but carries {actual}")]
    ScanCountMismatch {
        fraction_id: String,
        declared: usize,
        actual: usize,
    },
    #[error(
        "run fraction '{fraction_id}' scan {scan} declares {declared} species but carries {actual}"
    )]
    SpeciesCountMismatch {
        fraction_id: String,
        scan: usize,
        declared: usize,
        actual: usize,
    },
    #[error(
        "run fraction '{fraction_id}' count-time table has {actual} entries, expected {expected}"
    )]
    CountTimeLengthMismatch {
        fraction_id: String,
        expected: usize,
        actual: usize,
    },
    #[error(
        "run fraction '{fraction_id}' count time for species {species} must be finite and > 0, got {value}"
    )]
    NonPositiveCountTime {
        fraction_id: String,
        species: usize,
        value: f64,
    },
    #[error("run fraction '{fraction_id}' scan {scan}, species {species} carries an empty {channel} integration array")]
    EmptyIntegrations {
        fraction_id: String,
        scan: usize,
        species: usize,
        channel: &'static str,
    },
    #[error(
        "run fraction '{fraction_id}' scan {scan}, species {species} has a non-finite {channel} integration at index {index}: {value}"
    )]
    NonFiniteIntegration {
        fraction_id: String,
        scan: usize,
        species: usize,
        channel: &'static str,
        index: usize,
        value: f64,
    },
    #[error("run fraction '{fraction_id}' dead time must be finite and >= 0, got {value} ns")]
    InvalidDeadTime { fraction_id: String, value: f64 },
}

pub type ReductionResult<T> = Result<T, ReductionError>;

/// Session-document failures (reading, parsing, fraction-id filtering).
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("failed to read session document '{}': {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse session document '{}': {source}", path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("invalid reference-material filter '{pattern}': {source}")]
    InvalidFilter {
        pattern: String,
        source: globset::Error,
    },
}
