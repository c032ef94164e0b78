use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::source::{HistorySource, HistoryWindow, SourceError, SourceFuture};
use crate::{SecurityHistory, Symbol};

/// In-memory history source.
///
/// Returns every stored close regardless of the requested window, counts
/// calls per symbol and can simulate latency and transport failures.
#[derive(Debug, Default)]
pub struct StaticHistorySource {
    histories: HashMap<Symbol, SecurityHistory>,
    failures: HashMap<Symbol, SourceError>,
    failure: Mutex<Option<SourceError>>,
    latency: Option<Duration>,
    requested: Mutex<Vec<Symbol>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl StaticHistorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_history(mut self, history: SecurityHistory) -> Self {
        self.histories
            .insert(history.snapshot.symbol.clone(), history);
        self
    }

    /// Fails every request for `symbol` with `error`.
    pub fn with_failure_for(mut self, symbol: Symbol, error: SourceError) -> Self {
        self.failures.insert(symbol, error);
        self
    }

    /// Fails every request with `error` until [`recover`](Self::recover) is called.
    pub fn failing_with(self, error: SourceError) -> Self {
        self.fail_all(error);
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn fail_all(&self, error: SourceError) {
        *self.failure.lock().expect("fixture lock") = Some(error);
    }

    pub fn recover(&self) {
        *self.failure.lock().expect("fixture lock") = None;
    }

    pub fn calls(&self) -> usize {
        self.requested.lock().expect("fixture lock").len()
    }

    pub fn calls_for(&self, symbol: &Symbol) -> usize {
        self.requested
            .lock()
            .expect("fixture lock")
            .iter()
            .filter(|requested| *requested == symbol)
            .count()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    async fn lookup(&self, symbol: &Symbol, cancel: CancellationToken) -> Result<SecurityHistory, SourceError> {
        self.requested
            .lock()
            .expect("fixture lock")
            .push(symbol.clone());
        let _running = InFlight::enter(&self.in_flight, &self.max_in_flight);
        self.respond(symbol, cancel).await
    }

    async fn respond(&self, symbol: &Symbol, cancel: CancellationToken) -> Result<SecurityHistory, SourceError> {
        if let Some(latency) = self.latency {
            tokio::select! {
                _ = cancel.cancelled() => return Err(SourceError::cancelled("fixture fetch cancelled")),
                _ = tokio::time::sleep(latency) => {}
            }
        }

        if let Some(error) = self.failure.lock().expect("fixture lock").clone() {
            return Err(error);
        }
        if let Some(error) = self.failures.get(symbol) {
            return Err(error.clone());
        }
        self.histories
            .get(symbol)
            .cloned()
            .ok_or_else(|| SourceError::not_found(symbol))
    }
}

/// Counts one running fetch until dropped, including when the fetch future
/// is dropped mid-await.
struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(in_flight: &'a AtomicUsize, max_in_flight: &AtomicUsize) -> Self {
        let running = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        max_in_flight.fetch_max(running, Ordering::SeqCst);
        Self(in_flight)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl HistorySource for StaticHistorySource {
    fn name(&self) -> &'static str {
        "static"
    }

    fn history<'a>(
        &'a self,
        symbol: &'a Symbol,
        _window: HistoryWindow,
        cancel: CancellationToken,
    ) -> SourceFuture<'a, SecurityHistory> {
        Box::pin(self.lookup(symbol, cancel))
    }
}
