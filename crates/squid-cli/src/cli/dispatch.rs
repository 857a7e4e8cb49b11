use anyhow::Context;
use squid_core::{SessionDocument, reduce_run_fraction};

use super::CliCommand;
use super::commands::{ReduceArgs, ValidateArgs};
use super::helpers::{render_report, report_path};

pub(super) fn dispatch_parsed(command: CliCommand) -> anyhow::Result<i32> {
    match command {
        CliCommand::Reduce(args) => run_reduce(args),
        CliCommand::Validate(args) => run_validate(args),
    }
}

fn run_reduce(args: ReduceArgs) -> anyhow::Result<i32> {
    let session = SessionDocument::load(&args.session)?;
    let fractions = session.selected_fractions(args.reference_material.as_deref())?;
    tracing::info!(
        session = %args.session.display(),
        selected = fractions.len(),
        total = session.fractions.len(),
        "session loaded"
    );

    if let Some(out_dir) = &args.out_dir {
        std::fs::create_dir_all(out_dir)
            .with_context(|| format!("failed to create output directory '{}'", out_dir.display()))?;
    }

    let mut failures = 0usize;
    for fraction in fractions {
        let span = tracing::info_span!("reduce", fraction = %fraction.fraction_id);
        let _guard = span.enter();

        let result = match reduce_run_fraction(fraction, &session.settings) {
            Ok(result) => result,
            // One malformed fraction must not abort the rest of the session.
            Err(error) => {
                tracing::warn!(%error, "fraction rejected");
                failures += 1;
                continue;
            }
        };
        tracing::info!(
            ratios = result.ratios.len(),
            non_positive_sbm = result.non_positive_sbm_count,
            "fraction reduced"
        );

        let report = render_report(&result, args.pretty)?;
        match &args.out_dir {
            Some(out_dir) => {
                let path = report_path(out_dir, &result.fraction_id);
                std::fs::write(&path, report)
                    .with_context(|| format!("failed to write report '{}'", path.display()))?;
            }
            None => println!("{report}"),
        }
    }

    Ok(if failures == 0 { 0 } else { 1 })
}

fn run_validate(args: ValidateArgs) -> anyhow::Result<i32> {
    let session = SessionDocument::load(&args.session)?;
    let fractions = session.selected_fractions(args.reference_material.as_deref())?;

    let mut failures = 0usize;
    for fraction in &fractions {
        if let Err(error) = fraction.validate() {
            tracing::warn!(fraction = %fraction.fraction_id, %error, "validation failed");
            eprintln!("{error}");
            failures += 1;
        }
    }

    tracing::info!(
        checked = fractions.len(),
        failures,
        "session validated"
    );
    Ok(if failures == 0 { 0 } else { 1 })
}
