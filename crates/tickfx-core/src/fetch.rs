use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures::{stream, StreamExt, TryStreamExt};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::cache::{BatchProducer, KeyProducer};
use crate::source::{HistorySource, HistoryWindow, SourceError, SourceErrorKind, SourceFuture};
use crate::throttle::FetchThrottle;
use crate::{EngineConfig, Outcome, SecurityHistory, Symbol, UtcDateTime};

/// Cache producer backed by a [`HistorySource`].
///
/// Symbols the source has no data for become [`Outcome::Error`] entries so a
/// single unknown ticker does not fail the batch it was requested with.
/// Transport failures still fail the whole production.
pub struct HistoryFetcher {
    source: Arc<dyn HistorySource>,
    throttle: FetchThrottle,
    max_concurrency: usize,
    history_days: u32,
}

impl HistoryFetcher {
    pub fn new(source: Arc<dyn HistorySource>, config: &EngineConfig) -> Self {
        Self {
            source,
            throttle: FetchThrottle::new(config.quota_window, config.quota_limit),
            max_concurrency: config.max_concurrency.max(1),
            history_days: config.history_days,
        }
    }

    async fn fetch(
        &self,
        symbol: Symbol,
        cancel: CancellationToken,
    ) -> Result<Outcome<SecurityHistory>, SourceError> {
        self.throttle.acquire(&cancel).await?;

        let window = HistoryWindow::trailing_days(UtcDateTime::now(), self.history_days)?;
        match self.source.history(&symbol, window, cancel).await {
            Ok(history) => Ok(Outcome::Value(history)),
            Err(error)
                if matches!(
                    error.kind(),
                    SourceErrorKind::NotFound | SourceErrorKind::InvalidRequest
                ) =>
            {
                debug!(source = self.source.name(), %symbol, %error, "no history for symbol");
                Ok(Outcome::error(error.message()))
            }
            Err(error) => Err(error),
        }
    }
}

impl BatchProducer<Symbol, Outcome<SecurityHistory>> for HistoryFetcher {
    fn produce<'a>(
        &'a self,
        keys: HashSet<Symbol>,
        cancel: CancellationToken,
    ) -> SourceFuture<'a, HashMap<Symbol, Outcome<SecurityHistory>>> {
        Box::pin(async move {
            stream::iter(keys)
                .map(|symbol| {
                    let cancel = cancel.clone();
                    async move {
                        let history = self.fetch(symbol.clone(), cancel).await?;
                        Ok::<_, SourceError>((symbol, history))
                    }
                })
                .buffer_unordered(self.max_concurrency)
                .try_collect()
                .await
        })
    }
}

impl KeyProducer<Symbol, Outcome<SecurityHistory>> for HistoryFetcher {
    fn produce_one<'a>(
        &'a self,
        key: Symbol,
        cancel: CancellationToken,
    ) -> SourceFuture<'a, Outcome<SecurityHistory>> {
        Box::pin(self.fetch(key, cancel))
    }
}
