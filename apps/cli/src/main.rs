//! cowshare command-line entry point.

mod app;
mod config;

use std::io::BufRead;
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<ExitCode> {
    let cli = config::Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let file = config::FileConfig::load(cli.config.as_deref())?;
    let settings = config::Settings::resolve(cli, file);
    let keep = settings.keep;

    let rt = tokio::runtime::Runtime::new()?;
    let outcome = rt.block_on(app::run(settings));

    if keep {
        eprint!("Press the enter key to exit...");
        let mut line = String::new();
        let _ = std::io::stdin().lock().read_line(&mut line);
    }

    Ok(if outcome? {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
