use std::path::PathBuf;

#[derive(clap::Args)]
pub(super) struct ReduceArgs {
    /// Session document (settings + parsed run fractions), JSON
    pub(super) session: PathBuf,

    /// Glob over fraction ids selecting the reference-material subset;
    /// overrides the session document's own filter
    #[arg(long, value_name = "GLOB")]
    pub(super) reference_material: Option<String>,

    /// Directory for per-fraction JSON reports; stdout when omitted
    #[arg(long, value_name = "DIR")]
    pub(super) out_dir: Option<PathBuf>,

    /// Pretty-print the JSON reports
    #[arg(long)]
    pub(super) pretty: bool,
}

#[derive(clap::Args)]
pub(super) struct ValidateArgs {
    /// Session document to validate, JSON
    pub(super) session: PathBuf,

    /// Restrict validation to fraction ids matching this glob
    #[arg(long, value_name = "GLOB")]
    pub(super) reference_material: Option<String>,
}
