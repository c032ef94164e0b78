use std::collections::BTreeMap;

use serde::Serialize;
use tickfx_core::{NormalizationEngine, NormalizeRequest, Outcome, Series};
use tokio_util::sync::CancellationToken;

use crate::cli::NormalizeArgs;
use crate::error::CliError;

use super::CommandOutput;

#[derive(Debug, Serialize)]
struct NormalizeResponseData<'a> {
    base: Option<&'a str>,
    symbols: BTreeMap<&'a str, &'a Outcome<Series>>,
}

pub async fn run(
    args: &NormalizeArgs,
    engine: &NormalizationEngine,
    cancel: &CancellationToken,
) -> Result<CommandOutput, CliError> {
    let request = NormalizeRequest::parse(&args.symbols, args.base.as_deref())?;
    let batch = engine.normalize(&request, cancel).await?;

    let failed = batch.values().filter(|outcome| outcome.is_error()).count();
    let data = serde_json::to_value(NormalizeResponseData {
        base: request.base().map(|base| base.as_str()),
        symbols: batch
            .iter()
            .map(|(symbol, outcome)| (symbol.as_str(), outcome))
            .collect(),
    })?;

    Ok(CommandOutput { data, failed })
}
