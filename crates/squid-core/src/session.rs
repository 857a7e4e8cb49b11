//! Session documents: the JSON bundle of reduction settings plus the parsed
//! run fractions, as handed over by the acquisition-file parsing layer.

use std::fs;
use std::path::Path;

use globset::Glob;
use serde::{Deserialize, Serialize};

use crate::domain::{ReductionSettings, RunFractionRaw, SessionError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionDocument {
    #[serde(default)]
    pub settings: ReductionSettings,
    /// Glob over fraction ids selecting the reference-material subset, e.g.
    /// `"GJ1.*"`. `None` selects every fraction.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_material_filter: Option<String>,
    pub fractions: Vec<RunFractionRaw>,
}

impl SessionDocument {
    pub fn load(path: &Path) -> Result<Self, SessionError> {
        let text = fs::read_to_string(path).map_err(|source| SessionError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| SessionError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Fractions selected for reduction. A filter passed by the caller
    /// overrides the document's own; no filter selects everything.
    pub fn selected_fractions(
        &self,
        filter_override: Option<&str>,
    ) -> Result<Vec<&RunFractionRaw>, SessionError> {
        let pattern = filter_override.or(self.reference_material_filter.as_deref());
        let Some(pattern) = pattern else {
            return Ok(self.fractions.iter().collect());
        };

        let matcher = Glob::new(pattern)
            .map_err(|source| SessionError::InvalidFilter {
                pattern: pattern.to_string(),
                source,
            })?
            .compile_matcher();

        Ok(self
            .fractions
            .iter()
            .filter(|fraction| matcher.is_match(&fraction.fraction_id))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::SessionDocument;
    use crate::domain::{RunFractionRaw, SessionError, SpeciesMeasurement};
    use std::io::Write;

    fn fraction(id: &str) -> RunFractionRaw {
        RunFractionRaw {
            fraction_id: id.to_string(),
            acquired_at: "2024-06-05T08:30:00Z".to_string(),
            species_count: 1,
            scan_count: 1,
            dead_time_ns: 0.0,
            sbm_zero_cps: 0.0,
            count_time_sec: vec![2.0],
            scans: vec![vec![SpeciesMeasurement {
                time_stamp_sec: 0.0,
                trim_mass_amu: 206.0,
                peak_integrations: vec![100.0],
                sbm_integrations: vec![300.0],
            }]],
        }
    }

    fn session() -> SessionDocument {
        SessionDocument {
            settings: Default::default(),
            reference_material_filter: Some("GJ1.*".to_string()),
            fractions: vec![fraction("GJ1.1.1"), fraction("GJ1.2.1"), fraction("Z6266.1.1")],
        }
    }

    #[test]
    fn document_filter_selects_reference_material_fractions() {
        let document = session();
        let selected = document.selected_fractions(None).expect("valid filter");
        let ids: Vec<&str> = selected.iter().map(|f| f.fraction_id.as_str()).collect();
        assert_eq!(ids, vec!["GJ1.1.1", "GJ1.2.1"]);
    }

    #[test]
    fn caller_filter_overrides_the_document_filter() {
        let document = session();
        let selected = document
            .selected_fractions(Some("Z6266.*"))
            .expect("valid filter");
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].fraction_id, "Z6266.1.1");
    }

    #[test]
    fn absent_filters_select_every_fraction() {
        let mut document = session();
        document.reference_material_filter = None;
        let selected = document.selected_fractions(None).expect("no filter");
        assert_eq!(selected.len(), 3);
    }

    #[test]
    fn malformed_filter_pattern_is_reported() {
        let error = session()
            .selected_fractions(Some("GJ1.[unclosed"))
            .expect_err("bad glob");
        assert!(matches!(error, SessionError::InvalidFilter { .. }));
    }

    #[test]
    fn load_round_trips_through_json() {
        let document = session();
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        let json = serde_json::to_string_pretty(&document).expect("serializes");
        file.write_all(json.as_bytes()).expect("writes");

        let loaded = SessionDocument::load(file.path()).expect("loads");
        assert_eq!(loaded, document);
    }

    #[test]
    fn load_reports_missing_files_with_the_path() {
        let error = SessionDocument::load(std::path::Path::new("/nonexistent/session.json"))
            .expect_err("missing file");
        assert!(matches!(error, SessionError::Read { .. }));
        assert!(error.to_string().contains("/nonexistent/session.json"));
    }
}
