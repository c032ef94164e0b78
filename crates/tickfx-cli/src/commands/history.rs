use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use tickfx_core::{NormalizationEngine, Outcome, SecurityHistory, Series, Symbol, UtcDateTime};
use tokio_util::sync::CancellationToken;

use crate::cli::HistoryArgs;
use crate::error::CliError;

use super::CommandOutput;

#[derive(Debug, Serialize)]
struct HistoryView<'a> {
    name: Option<&'a str>,
    currency: Option<&'a str>,
    exchange_timezone: Option<&'a str>,
    last_price: Option<f64>,
    last_price_time: Option<UtcDateTime>,
    closes: &'a Series,
}

impl<'a> From<&'a SecurityHistory> for HistoryView<'a> {
    fn from(history: &'a SecurityHistory) -> Self {
        let snapshot = &history.snapshot;
        Self {
            name: snapshot.name.as_deref(),
            currency: snapshot.currency.as_ref().map(|currency| currency.as_str()),
            exchange_timezone: snapshot.exchange_timezone.as_deref(),
            last_price: snapshot.last_price,
            last_price_time: snapshot.last_price_time,
            closes: &history.closes,
        }
    }
}

pub async fn run(
    args: &HistoryArgs,
    engine: &NormalizationEngine,
    cancel: &CancellationToken,
) -> Result<CommandOutput, CliError> {
    let symbols = args
        .symbols
        .iter()
        .map(|raw| Symbol::parse(raw))
        .collect::<Result<BTreeSet<_>, _>>()?;

    let histories = engine.history(&symbols, cancel).await?;

    let failed = histories.values().filter(|outcome| outcome.is_error()).count();
    let views: BTreeMap<&str, Outcome<HistoryView<'_>>> = histories
        .iter()
        .map(|(symbol, outcome)| (symbol.as_str(), outcome.as_ref().map(HistoryView::from)))
        .collect();

    Ok(CommandOutput {
        data: serde_json::to_value(views)?,
        failed,
    })
}
