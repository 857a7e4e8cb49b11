pub mod errors;
pub mod sentinel;

pub use errors::{ReductionError, ReductionResult, SessionError};

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// One species measured during one scan: its timestamp, trim mass, and the
/// raw peak / SBM integration arrays delivered by the file-parsing layer.
///
/// A single-element integration array holding a negative value is the legacy
/// OP-format encoding for "already reduced, take the absolute value".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeciesMeasurement {
    pub time_stamp_sec: f64,
    pub trim_mass_amu: f64,
    pub peak_integrations: Vec<f64>,
    pub sbm_integrations: Vec<f64>,
}

/// One complete multi-scan analysis of a single sample spot, as parsed from
/// the acquisition file. Immutable input to the reduction; validated once up
/// front so the numeric modules can index freely.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunFractionRaw {
    pub fraction_id: String,
    pub acquired_at: String,
    pub species_count: usize,
    pub scan_count: usize,
    pub dead_time_ns: f64,
    pub sbm_zero_cps: f64,
    /// Per-species count time, seconds.
    pub count_time_sec: Vec<f64>,
    /// Scan-major measurement grid: `scans[scan][species]`.
    pub scans: Vec<Vec<SpeciesMeasurement>>,
}

impl RunFractionRaw {
    pub fn validate(&self) -> ReductionResult<()> {
        if self.scan_count == 0 || self.species_count == 0 {
            return Err(ReductionError::EmptyFraction {
                fraction_id: self.fraction_id.clone(),
            });
        }
        if self.scans.len() != self.scan_count {
            return Err(ReductionError::ScanCountMismatch {
                fraction_id: self.fraction_id.clone(),
                declared: self.scan_count,
                actual: self.scans.len(),
            });
        }
        if self.count_time_sec.len() != self.species_count {
            return Err(ReductionError::CountTimeLengthMismatch {
                fraction_id: self.fraction_id.clone(),
                expected: self.species_count,
                actual: self.count_time_sec.len(),
            });
        }
        for (species, count_time) in self.count_time_sec.iter().copied().enumerate() {
            if !count_time.is_finite() || count_time <= 0.0 {
                return Err(ReductionError::NonPositiveCountTime {
                    fraction_id: self.fraction_id.clone(),
                    species,
                    value: count_time,
                });
            }
        }
        if !self.dead_time_ns.is_finite() || self.dead_time_ns < 0.0 {
            return Err(ReductionError::InvalidDeadTime {
                fraction_id: self.fraction_id.clone(),
                value: self.dead_time_ns,
            });
        }

        for (scan, row) in self.scans.iter().enumerate() {
            if row.len() != self.species_count {
                return Err(ReductionError::SpeciesCountMismatch {
                    fraction_id: self.fraction_id.clone(),
                    scan,
                    declared: self.species_count,
                    actual: row.len(),
                });
            }
            for (species, measurement) in row.iter().enumerate() {
                self.validate_integrations(scan, species, "peak", &measurement.peak_integrations)?;
                self.validate_integrations(scan, species, "sbm", &measurement.sbm_integrations)?;
            }
        }

        Ok(())
    }

    fn validate_integrations(
        &self,
        scan: usize,
        species: usize,
        channel: &'static str,
        integrations: &[f64],
    ) -> ReductionResult<()> {
        if integrations.is_empty() {
            return Err(ReductionError::EmptyIntegrations {
                fraction_id: self.fraction_id.clone(),
                scan,
                species,
                channel,
            });
        }
        for (index, value) in integrations.iter().copied().enumerate() {
            if !value.is_finite() {
                return Err(ReductionError::NonFiniteIntegration {
                    fraction_id: self.fraction_id.clone(),
                    scan,
                    species,
                    channel,
                    index,
                    value,
                });
            }
        }
        Ok(())
    }

    pub fn measurement(&self, scan: usize, species: usize) -> &SpeciesMeasurement {
        &self.scans[scan][species]
    }

    /// Acquisition midtime: halfway between the first measurement of the
    /// first scan and the last measurement of the last scan.
    pub fn mid_time_sec(&self) -> f64 {
        let first = self.scans[0][0].time_stamp_sec;
        let last = self.scans[self.scan_count - 1][self.species_count - 1].time_stamp_sec;
        (first + last) / 2.0
    }
}

/// Numerator/denominator species indices for one configured isotopic ratio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RatioDefinition {
    pub numerator: usize,
    pub denominator: usize,
}

/// Immutable per-session configuration, passed into every reduction call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReductionSettings {
    #[serde(default)]
    pub use_sbm: bool,
    #[serde(default)]
    pub use_linear_fits: bool,
    /// `None` means no background species is measured.
    #[serde(default)]
    pub background_species_index: Option<usize>,
    #[serde(default)]
    pub ratios: Vec<RatioDefinition>,
    /// Boundary rounding applied to reported values; internal computation
    /// retains full precision.
    #[serde(default = "default_significant_digits")]
    pub output_significant_digits: u32,
}

const fn default_significant_digits() -> u32 {
    12
}

impl Default for ReductionSettings {
    fn default() -> Self {
        Self {
            use_sbm: false,
            use_linear_fits: false,
            background_species_index: None,
            ratios: Vec::new(),
            output_significant_digits: default_significant_digits(),
        }
    }
}

/// Tagged data-quality faults for one scan x species cell. The legacy
/// numeric projection (`sentinel::INVALID_COUNTS`) rides alongside so the
/// report layer keeps its historical magnitudes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CountFault {
    /// Median of the raw integrations was negative, impossible for counts.
    NegativeMedian,
    /// Dead-time correction denominator collapsed to <= 0.
    DeadTimeSaturated,
    /// Raw integrations were unusable for robust estimation.
    MalformedIntegrations,
}

/// Reduced totals for one scan x species cell.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReducedScan {
    pub total_counts: f64,
    pub one_sigma_abs: f64,
    pub total_sbm_counts: f64,
    pub time_stamp_sec: f64,
    pub trim_mass_amu: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fault: Option<CountFault>,
}

impl ReducedScan {
    pub fn is_valid(&self) -> bool {
        self.fault.is_none()
    }
}

/// Scan-major reduced grid, `grid[scan][species]`.
pub type ReducedGrid = Vec<Vec<ReducedScan>>;

/// Arena-style (scan, species) matrix; dimensions are known before any
/// computation begins so every consumer writes into preallocated storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanSpeciesMatrix {
    scan_count: usize,
    species_count: usize,
    values: Vec<f64>,
}

impl ScanSpeciesMatrix {
    pub fn filled(scan_count: usize, species_count: usize, fill: f64) -> Self {
        Self {
            scan_count,
            species_count,
            values: vec![fill; scan_count * species_count],
        }
    }

    pub fn scan_count(&self) -> usize {
        self.scan_count
    }

    pub fn species_count(&self) -> usize {
        self.species_count
    }

    pub fn get(&self, scan: usize, species: usize) -> f64 {
        self.values[scan * self.species_count + species]
    }

    pub fn set(&mut self, scan: usize, species: usize, value: f64) {
        self.values[scan * self.species_count + species] = value;
    }

    pub fn scan_row(&self, scan: usize) -> &[f64] {
        let start = scan * self.species_count;
        &self.values[start..start + self.species_count]
    }

    pub fn species_column(&self, species: usize) -> Vec<f64> {
        (0..self.scan_count)
            .map(|scan| self.get(scan, species))
            .collect()
    }
}

/// Branch taken by the ratio state machine for one configured ratio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RatioBranch {
    Inactive,
    Direct,
    Interpolated { points: usize },
}

impl RatioBranch {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Inactive => "INACTIVE",
            Self::Direct => "DIRECT",
            Self::Interpolated { .. } => "INTERPOLATED",
        }
    }
}

impl Display for RatioBranch {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str((*self).as_str())
    }
}

/// Computed ratio plus the full per-interpolation-point series. The series
/// is a reporting artifact in its own right and is populated on every
/// branch, degenerating to one or zero elements for direct or faulted
/// ratios.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RatioResult {
    pub definition: RatioDefinition,
    pub active: bool,
    pub branch: RatioBranch,
    pub value: f64,
    pub fractional_error: f64,
    /// Excluded-outlier diagnostic from the regression, -1 when unused.
    pub min_index: i32,
    pub eq_time: Vec<f64>,
    pub eq_value: Vec<f64>,
    /// Absolute one-sigma error per interpolation point.
    pub eq_error: Vec<f64>,
}

impl RatioResult {
    pub fn inactive(definition: RatioDefinition) -> Self {
        Self {
            definition,
            active: false,
            branch: RatioBranch::Inactive,
            value: sentinel::ERROR_VALUE,
            fractional_error: sentinel::ERROR_VALUE,
            min_index: -1,
            eq_time: Vec::new(),
            eq_value: Vec::new(),
            eq_error: Vec::new(),
        }
    }
}

/// Output of `reduce_run_fraction`, owned by the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FractionReductionResult {
    pub fraction_id: String,
    pub acquired_at: String,
    /// Per-species total counts per second, background-restored for the
    /// background species itself.
    pub total_cps: Vec<f64>,
    pub net_peak_cps: ScanSpeciesMatrix,
    pub peak_fractional_error: ScanSpeciesMatrix,
    pub reduced_peak_height: ScanSpeciesMatrix,
    pub reduced_peak_height_fractional_error: ScanSpeciesMatrix,
    /// Data-quality counter: scan x species cells whose SBM normalization
    /// was skipped because the SBM cps was not positive.
    pub non_positive_sbm_count: usize,
    pub ratios: Vec<RatioResult>,
}
