mod history;
mod normalize;

use serde_json::Value;
use tickfx_core::NormalizationEngine;
use tokio_util::sync::CancellationToken;

use crate::cli::Command;
use crate::error::CliError;

/// JSON payload of a command plus how many symbols failed.
pub struct CommandOutput {
    pub data: Value,
    pub failed: usize,
}

pub async fn run(
    command: &Command,
    engine: &NormalizationEngine,
    cancel: &CancellationToken,
) -> Result<CommandOutput, CliError> {
    match command {
        Command::Normalize(args) => normalize::run(args, engine, cancel).await,
        Command::History(args) => history::run(args, engine, cancel).await,
    }
}

pub fn requested_days(command: &Command) -> Option<u32> {
    match command {
        Command::Normalize(args) => args.days,
        Command::History(args) => args.days,
    }
}
