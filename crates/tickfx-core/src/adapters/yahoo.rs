//! Yahoo Finance chart adapter.
//!
//! Fetches `/v8/finance/chart/{symbol}` with daily bars. The `meta` object of
//! the response becomes the [`SecuritySnapshot`]; each daily close is stamped
//! at the exchange close instant of its trading date.

use std::sync::{Arc, Mutex};

use serde::Deserialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::http_client::{HttpClient, HttpRequest, ReqwestHttpClient};
use crate::source::{HistorySource, HistoryWindow, SourceError, SourceFuture};
use crate::{PricePoint, SecurityHistory, SecuritySnapshot, Series, Symbol, UtcDateTime};

const CHART_ENDPOINT: &str = "https://query1.finance.yahoo.com/v8/finance/chart";
const COOKIE_ENDPOINT: &str = "https://fc.yahoo.com";
const CRUMB_ENDPOINTS: [&str; 2] = [
    "https://query1.finance.yahoo.com/v1/test/getcrumb",
    "https://query2.finance.yahoo.com/v1/test/getcrumb",
];
const REFERER: &str = "https://finance.yahoo.com/";

/// Yahoo chart history source.
///
/// The session crumb is fetched lazily and reused until Yahoo rejects it.
pub struct YahooChartSource {
    http_client: Arc<dyn HttpClient>,
    crumb: Mutex<Option<String>>,
}

impl Default for YahooChartSource {
    fn default() -> Self {
        Self::new(Arc::new(ReqwestHttpClient::new()))
    }
}

impl YahooChartSource {
    pub fn new(http_client: Arc<dyn HttpClient>) -> Self {
        Self {
            http_client,
            crumb: Mutex::new(None),
        }
    }

    fn cached_crumb(&self) -> Option<String> {
        self.crumb.lock().expect("crumb lock should not be poisoned").clone()
    }

    fn invalidate_crumb(&self) {
        *self.crumb.lock().expect("crumb lock should not be poisoned") = None;
    }

    async fn crumb(&self) -> Result<String, SourceError> {
        if let Some(crumb) = self.cached_crumb() {
            return Ok(crumb);
        }

        // The cookie response only matters for the session cookie it sets.
        let cookie_request = HttpRequest::get(COOKIE_ENDPOINT).with_header("referer", REFERER);
        self.http_client
            .execute(cookie_request)
            .await
            .map_err(|error| SourceError::unavailable(format!("failed to fetch yahoo cookie: {error}")))?;

        for endpoint in CRUMB_ENDPOINTS {
            let request = HttpRequest::get(endpoint).with_header("referer", REFERER);
            let Ok(response) = self.http_client.execute(request).await else {
                continue;
            };
            if response.status == 429 {
                return Err(SourceError::rate_limited("yahoo rate limited the crumb request"));
            }
            let body = response.body.trim();
            if response.is_success() && is_plausible_crumb(body) {
                *self.crumb.lock().expect("crumb lock should not be poisoned") = Some(body.to_owned());
                return Ok(body.to_owned());
            }
        }

        Err(SourceError::unavailable("failed to fetch yahoo crumb from all endpoints"))
    }

    async fn fetch(
        &self,
        symbol: &Symbol,
        window: HistoryWindow,
        cancel: CancellationToken,
    ) -> Result<SecurityHistory, SourceError> {
        let crumb = self.crumb().await?;
        let url = chart_url(symbol, window, &crumb);
        debug!(%symbol, %url, "requesting yahoo chart");

        let request = HttpRequest::get(url).with_header("referer", REFERER);
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(SourceError::cancelled("yahoo chart request cancelled")),
            response = self.http_client.execute(request) => response
                .map_err(|error| SourceError::unavailable(format!("yahoo transport error: {error}")))?,
        };

        match response.status {
            401 | 403 => {
                self.invalidate_crumb();
                return Err(SourceError::unavailable("yahoo rejected the session crumb"));
            }
            429 => {
                self.invalidate_crumb();
                return Err(SourceError::rate_limited("yahoo rate limited the chart request"));
            }
            404 => return Err(SourceError::not_found(symbol)),
            _ if !response.is_success() => {
                return Err(SourceError::unavailable(format!(
                    "yahoo returned status {}",
                    response.status
                )));
            }
            _ => {}
        }

        parse_chart(symbol, &response.body)
    }
}

impl HistorySource for YahooChartSource {
    fn name(&self) -> &'static str {
        "yahoo"
    }

    fn history<'a>(
        &'a self,
        symbol: &'a Symbol,
        window: HistoryWindow,
        cancel: CancellationToken,
    ) -> SourceFuture<'a, SecurityHistory> {
        Box::pin(self.fetch(symbol, window, cancel))
    }
}

fn is_plausible_crumb(body: &str) -> bool {
    !body.is_empty() && body.len() < 100 && !body.contains(' ') && !body.contains('<')
}

fn chart_url(symbol: &Symbol, window: HistoryWindow, crumb: &str) -> String {
    format!(
        "{CHART_ENDPOINT}/{}?period1={}&period2={}&interval=1d&includePrePost=false&crumb={}",
        urlencoding::encode(symbol.as_str()),
        window.start().unix_timestamp(),
        window.end().unix_timestamp(),
        urlencoding::encode(crumb)
    )
}

#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: ChartBody,
}

#[derive(Debug, Deserialize)]
struct ChartBody {
    #[serde(default)]
    result: Option<Vec<ChartResult>>,
    #[serde(default)]
    error: Option<ChartError>,
}

#[derive(Debug, Deserialize)]
struct ChartError {
    #[serde(default)]
    code: String,
    #[serde(default)]
    description: String,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    meta: Value,
    #[serde(default)]
    timestamp: Vec<i64>,
    indicators: ChartIndicators,
}

#[derive(Debug, Deserialize)]
struct ChartIndicators {
    #[serde(default)]
    quote: Vec<ChartQuote>,
}

#[derive(Debug, Default, Deserialize)]
struct ChartQuote {
    #[serde(default)]
    close: Vec<Option<f64>>,
    #[serde(default)]
    volume: Vec<Option<i64>>,
}

/// Parses a chart response body into a history for `symbol`.
pub fn parse_chart(symbol: &Symbol, body: &str) -> Result<SecurityHistory, SourceError> {
    let response: ChartResponse = serde_json::from_str(body)
        .map_err(|error| SourceError::internal(format!("failed to parse yahoo chart: {error}")))?;

    if let Some(error) = response.chart.error {
        if error.code.eq_ignore_ascii_case("not found") {
            return Err(SourceError::not_found(symbol));
        }
        return Err(SourceError::unavailable(format!(
            "yahoo chart error {}: {}",
            error.code, error.description
        )));
    }

    let result = response
        .chart
        .result
        .and_then(|results| results.into_iter().next())
        .ok_or_else(|| SourceError::not_found(symbol))?;

    let snapshot = SecuritySnapshot::from_json(&result.meta)
        .map_err(|error| SourceError::internal(format!("invalid yahoo chart meta: {error}")))?;
    let quote = result.indicators.quote.into_iter().next().unwrap_or_default();

    let mut points = Vec::with_capacity(result.timestamp.len());
    for (index, &seconds) in result.timestamp.iter().enumerate() {
        let Some(close) = quote.close.get(index).copied().flatten() else {
            continue;
        };
        if !close.is_finite() {
            continue;
        }
        let opened = UtcDateTime::from_unix_timestamp(seconds)
            .map_err(|error| SourceError::internal(format!("invalid yahoo timestamp: {error}")))?;
        let closed = snapshot.close_instant(snapshot.trading_date(opened));
        let volume = quote.volume.get(index).copied().flatten().unwrap_or(0);
        points.push(PricePoint::new(closed, close / snapshot.quote_divisor, volume));
    }

    Ok(SecurityHistory::new(snapshot, Series::from_unordered(points)))
}
