use serde_json::Value;
use std::path::Path;
use std::process::Command;
use tempfile::TempDir;

use squid_core::{
    RatioDefinition, ReductionSettings, RunFractionRaw, SessionDocument, SpeciesMeasurement,
};

fn measurement(time: f64) -> SpeciesMeasurement {
    SpeciesMeasurement {
        time_stamp_sec: time,
        trim_mass_amu: 206.0,
        peak_integrations: vec![2000.0, 2010.0, 1990.0],
        sbm_integrations: vec![300.0, 300.0, 300.0],
    }
}

fn fraction(id: &str) -> RunFractionRaw {
    RunFractionRaw {
        fraction_id: id.to_string(),
        acquired_at: "2024-06-05T08:30:00Z".to_string(),
        species_count: 2,
        scan_count: 3,
        dead_time_ns: 0.0,
        sbm_zero_cps: 0.0,
        count_time_sec: vec![2.0, 2.0],
        scans: (0..3)
            .map(|scan| {
                let base = scan as f64 * 30.0;
                vec![measurement(base), measurement(base + 2.0)]
            })
            .collect(),
    }
}

fn session() -> SessionDocument {
    SessionDocument {
        settings: ReductionSettings {
            ratios: vec![RatioDefinition {
                numerator: 0,
                denominator: 1,
            }],
            ..ReductionSettings::default()
        },
        reference_material_filter: None,
        fractions: vec![fraction("GJ1.1.1"), fraction("Z6266.1.1")],
    }
}

fn write_session(path: &Path, document: &SessionDocument) {
    let json = serde_json::to_string_pretty(document).expect("session serializes");
    std::fs::write(path, json).expect("session file is written");
}

fn squid_command() -> Command {
    Command::new(env!("CARGO_BIN_EXE_squid-rs"))
}

#[test]
fn reduce_writes_one_report_per_selected_fraction() {
    let temp = TempDir::new().expect("tempdir should be created");
    let session_path = temp.path().join("session.json");
    let out_dir = temp.path().join("reports");
    write_session(&session_path, &session());

    let output = squid_command()
        .arg("reduce")
        .arg(&session_path)
        .arg("--reference-material")
        .arg("GJ1.*")
        .arg("--out-dir")
        .arg(&out_dir)
        .output()
        .expect("binary runs");
    assert!(
        output.status.success(),
        "reduce should succeed, stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    assert!(out_dir.join("GJ1.1.1.json").exists());
    assert!(!out_dir.join("Z6266.1.1.json").exists());

    let report: Value = serde_json::from_str(
        &std::fs::read_to_string(out_dir.join("GJ1.1.1.json")).expect("report is readable"),
    )
    .expect("report parses");
    assert_eq!(report["fractionId"], "GJ1.1.1");
    let ratio_value = report["ratios"][0]["value"].as_f64().expect("ratio value");
    assert!((ratio_value - 1.0).abs() < 1.0e-6);
}

#[test]
fn reduce_without_out_dir_prints_reports_to_stdout() {
    let temp = TempDir::new().expect("tempdir should be created");
    let session_path = temp.path().join("session.json");
    write_session(&session_path, &session());

    let output = squid_command()
        .arg("reduce")
        .arg(&session_path)
        .output()
        .expect("binary runs");
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    let mut reports = stdout.lines().filter(|line| !line.trim().is_empty());
    let first: Value = serde_json::from_str(reports.next().expect("first report")).expect("json");
    let second: Value =
        serde_json::from_str(reports.next().expect("second report")).expect("json");
    assert_eq!(first["fractionId"], "GJ1.1.1");
    assert_eq!(second["fractionId"], "Z6266.1.1");
}

#[test]
fn validate_accepts_a_well_formed_session() {
    let temp = TempDir::new().expect("tempdir should be created");
    let session_path = temp.path().join("session.json");
    write_session(&session_path, &session());

    let output = squid_command()
        .arg("validate")
        .arg(&session_path)
        .output()
        .expect("binary runs");
    assert!(
        output.status.success(),
        "validate should succeed, stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
}

#[test]
fn validate_flags_malformed_fractions_with_exit_code_one() {
    let temp = TempDir::new().expect("tempdir should be created");
    let session_path = temp.path().join("session.json");
    let mut document = session();
    document.fractions[1].scans[0][0].peak_integrations.clear();
    write_session(&session_path, &document);

    let output = squid_command()
        .arg("validate")
        .arg(&session_path)
        .output()
        .expect("binary runs");
    assert_eq!(output.status.code(), Some(1));
    assert!(
        String::from_utf8_lossy(&output.stderr).contains("Z6266.1.1"),
        "stderr should name the bad fraction"
    );
}

#[test]
fn missing_session_file_fails_with_a_readable_error() {
    let output = squid_command()
        .arg("reduce")
        .arg("/nonexistent/session.json")
        .output()
        .expect("binary runs");
    assert_eq!(output.status.code(), Some(1));
    assert!(
        String::from_utf8_lossy(&output.stderr).contains("session"),
        "stderr should mention the session document"
    );
}
