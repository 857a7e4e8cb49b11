mod commands;
mod dispatch;
mod helpers;

use clap::Parser;
use tracing_subscriber::EnvFilter;

pub fn run_from_env() -> i32 {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    match run(std::env::args().skip(1)) {
        Ok(code) => code,
        Err(error) => {
            eprintln!("error: {error:#}");
            1
        }
    }
}

pub fn run<I, S>(args: I) -> anyhow::Result<i32>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let full_args: Vec<String> = std::iter::once("squid-rs".to_string())
        .chain(args.into_iter().map(Into::into))
        .collect();

    match Cli::try_parse_from(&full_args) {
        Ok(cli) => dispatch::dispatch_parsed(cli.command),
        Err(err) => match err.kind() {
            clap::error::ErrorKind::DisplayHelp | clap::error::ErrorKind::DisplayVersion => {
                print!("{err}");
                Ok(0)
            }
            _ => {
                eprint!("{err}");
                Ok(2)
            }
        },
    }
}

#[derive(Parser)]
#[command(name = "squid-rs", version, about = "SHRIMP run-fraction reduction engine")]
struct Cli {
    #[command(subcommand)]
    command: CliCommand,
}

#[derive(clap::Subcommand)]
enum CliCommand {
    /// Reduce the fractions of a session document and write JSON reports
    Reduce(commands::ReduceArgs),
    /// Validate a session document without reducing it
    Validate(commands::ValidateArgs),
}
