mod cli;
mod commands;
mod error;

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tickfx_core::{EngineConfig, NormalizationEngine, YahooChartSource};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use crate::cli::Cli;
use crate::error::CliError;

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("error: {error}");
            ExitCode::from(error.exit_code())
        }
    }
}

/// Logs go to stderr so stdout carries only JSON.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

async fn run() -> Result<(), CliError> {
    let cli = Cli::parse();

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                debug!("interrupt received, cancelling");
                cancel.cancel();
            }
        }
    });

    let mut config = EngineConfig::from_env();
    if let Some(days) = commands::requested_days(&cli.command) {
        config = config.with_history_days(days)?;
    }
    let engine = NormalizationEngine::new(Arc::new(YahooChartSource::default()), &config);

    let output = commands::run(&cli.command, &engine, &cancel).await?;
    let payload = if cli.pretty {
        serde_json::to_string_pretty(&output.data)?
    } else {
        serde_json::to_string(&output.data)?
    };
    println!("{payload}");

    if cli.strict && output.failed > 0 {
        return Err(CliError::StrictModeViolation {
            failed: output.failed,
        });
    }
    Ok(())
}
