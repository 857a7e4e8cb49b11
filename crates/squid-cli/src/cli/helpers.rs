use std::path::{Path, PathBuf};

use squid_core::FractionReductionResult;

pub(super) fn render_report(
    result: &FractionReductionResult,
    pretty: bool,
) -> anyhow::Result<String> {
    let report = if pretty {
        serde_json::to_string_pretty(result)?
    } else {
        serde_json::to_string(result)?
    };
    Ok(report)
}

/// Report file per fraction. Fraction ids carry dots and spot numbers but
/// may also contain separators that must not escape the output directory.
pub(super) fn report_path(out_dir: &Path, fraction_id: &str) -> PathBuf {
    let safe: String = fraction_id
        .chars()
        .map(|c| if c == '/' || c == '\\' { '_' } else { c })
        .collect();
    out_dir.join(format!("{safe}.json"))
}

#[cfg(test)]
mod tests {
    use super::report_path;
    use std::path::Path;

    #[test]
    fn report_path_keeps_dotted_fraction_ids() {
        let path = report_path(Path::new("out"), "GJ1.5.1");
        assert_eq!(path, Path::new("out/GJ1.5.1.json"));
    }

    #[test]
    fn report_path_neutralizes_path_separators() {
        let path = report_path(Path::new("out"), "bad/../id");
        assert_eq!(path, Path::new("out/bad_.._id.json"));
    }
}
