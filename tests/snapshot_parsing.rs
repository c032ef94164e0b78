//! Behavior-driven tests for reading provider metadata and chart payloads.

use std::sync::Arc;

use serde_json::json;
use time::macros::{date, datetime, time};
use tickfx_core::adapters::yahoo::parse_chart;
use tickfx_core::{
    EngineConfig, NormalizationEngine, NormalizeRequest, SecuritySnapshot, SnapshotError,
    SourceErrorKind, StaticHistorySource, Symbol, UtcDateTime,
};
use tokio_util::sync::CancellationToken;

fn utc(value: time::OffsetDateTime) -> UtcDateTime {
    UtcDateTime::from_offset_datetime(value).expect("utc instant")
}

const TOYOTA_CHART: &str = r#"{
  "chart": {
    "result": [{
      "meta": {
        "symbol": "7203.T",
        "shortName": "TOYOTA MOTOR CORP",
        "currency": "JPY",
        "exchangeName": "JPX",
        "exchangeTimezoneName": "Asia/Tokyo",
        "gmtoffset": 32400,
        "currentTradingPeriod": {
          "regular": { "start": 1709251200, "end": 1709272800 }
        },
        "regularMarketPrice": 2520.0,
        "regularMarketTime": 1709697600
      },
      "timestamp": [1709596800, 1709510400, 1709683200],
      "indicators": {
        "quote": [{
          "close": [2510.0, 2500.0, null],
          "volume": [900, 1000, null]
        }]
      }
    }],
    "error": null
  }
}"#;

// =============================================================================
// Snapshot metadata
// =============================================================================

#[test]
fn when_close_time_is_absent_it_is_derived_from_the_trading_period() {
    // Given: Tokyo metadata whose regular session ends at 06:00 UTC
    let meta = json!({
        "symbol": "7203.T",
        "currency": "JPY",
        "gmtoffset": 32400,
        "currentTradingPeriod": { "regular": { "end": 1709272800 } }
    });

    // When: the snapshot is parsed
    let snapshot = SecuritySnapshot::from_json(&meta).expect("valid meta");

    // Then: the close is 15:00 local time on any trading day
    assert_eq!(snapshot.exchange_close_time, Some(time!(15:00)));
    assert_eq!(
        snapshot.close_instant(date!(2024 - 03 - 04)),
        utc(datetime!(2024-03-04 06:00 UTC))
    );
}

#[test]
fn when_metadata_has_unknown_fields_they_are_ignored() {
    let meta = json!({
        "symbol": "sap.de",
        "shortName": "SAP SE",
        "currency": "EUR",
        "instrumentType": "EQUITY",
        "priceHint": 2,
        "validRanges": ["1d", "5d"]
    });

    let snapshot = SecuritySnapshot::from_json(&meta).expect("valid meta");

    assert_eq!(snapshot.symbol.as_str(), "SAP.DE");
    assert_eq!(snapshot.name.as_deref(), Some("SAP SE"));
    assert_eq!(snapshot.currency.as_ref().map(|c| c.as_str()), Some("EUR"));
    assert_eq!(snapshot.live_quote(), None);
}

#[test]
fn when_close_time_is_malformed_parsing_fails_naming_the_field() {
    let meta = json!({ "symbol": "AAPL", "exchangeCloseTime": "4pm" });

    let error = SecuritySnapshot::from_json(&meta).expect_err("malformed close time");

    assert!(
        matches!(error, SnapshotError::InvalidValue { field: "exchangeCloseTime", .. }),
        "{error:?}"
    );
}

#[test]
fn when_payload_is_not_an_object_parsing_fails() {
    assert_eq!(
        SecuritySnapshot::from_json(&json!(["AAPL"])),
        Err(SnapshotError::NotAnObject)
    );
    assert_eq!(
        SecuritySnapshot::from_json(&json!({ "currency": "USD" })),
        Err(SnapshotError::MissingField { field: "symbol" })
    );
}

// =============================================================================
// Chart payloads
// =============================================================================

#[test]
fn when_chart_is_parsed_closes_are_stamped_at_exchange_close() {
    // Given: a chart with unordered days and a trailing day without a close
    let symbol = Symbol::parse("7203.T").expect("valid");

    // When: it is parsed
    let history = parse_chart(&symbol, TOYOTA_CHART).expect("valid chart");

    // Then: closes are ordered and stamped at 15:00 Tokyo time
    let closes = history.closes.points();
    assert_eq!(closes.len(), 2);
    assert_eq!(closes[0].ts, utc(datetime!(2024-03-04 06:00 UTC)));
    assert_eq!(closes[0].value, 2500.0);
    assert_eq!(closes[0].volume, 1000);
    assert_eq!(closes[1].ts, utc(datetime!(2024-03-05 06:00 UTC)));
    assert_eq!(
        history.snapshot.live_quote(),
        Some((utc(datetime!(2024-03-06 04:00 UTC)), 2520.0))
    );
}

#[test]
fn when_chart_reports_not_found_the_error_is_not_found() {
    let body = r#"{"chart":{"result":null,"error":{"code":"Not Found","description":"No data found, symbol may be delisted"}}}"#;

    let error = parse_chart(&Symbol::parse("GONE").expect("valid"), body).expect_err("not found");

    assert_eq!(error.kind(), SourceErrorKind::NotFound);
}

#[test]
fn when_chart_body_is_not_json_the_error_is_internal() {
    let error = parse_chart(&Symbol::parse("AAPL").expect("valid"), "<html>").expect_err("garbage");

    assert_eq!(error.kind(), SourceErrorKind::Internal);
}

#[tokio::test]
async fn when_parsed_chart_is_served_its_live_quote_extends_the_closes() {
    // Given: an engine serving the parsed chart
    let symbol = Symbol::parse("7203.T").expect("valid");
    let history = parse_chart(&symbol, TOYOTA_CHART).expect("valid chart");
    let source = Arc::new(StaticHistorySource::new().with_history(history));
    let engine = NormalizationEngine::new(source, &EngineConfig::default());

    // When: the symbol is requested without a base
    let request = NormalizeRequest::parse(["7203.T"], None).expect("valid");
    let batch = engine
        .normalize(&request, &CancellationToken::new())
        .await
        .expect("batch");

    // Then: the intraday quote is appended after the last close
    let series = batch[&symbol].value().expect("history");
    let values: Vec<f64> = series.points().iter().map(|point| point.value).collect();
    assert_eq!(values, vec![2500.0, 2510.0, 2520.0]);
    assert_eq!(series.last().map(|point| point.volume), Some(0));
}

#[test]
fn when_chart_spans_a_daylight_saving_change_each_close_uses_its_own_offset() {
    // Given: a New York chart fetched in winter with one bar on each side of the clock change
    let body = r#"{"chart":{"result":[{
      "meta": {
        "symbol": "AAPL",
        "currency": "USD",
        "exchangeTimezoneName": "America/New_York",
        "gmtoffset": -18000,
        "currentTradingPeriod": { "regular": { "start": 1730730600, "end": 1730754000 } }
      },
      "timestamp": [1730381400, 1730730600],
      "indicators": { "quote": [{ "close": [225.91, 222.01], "volume": [100, 200] }] }
    }],"error":null}}"#;

    // When: it is parsed
    let history = parse_chart(&Symbol::parse("AAPL").expect("valid"), body).expect("valid chart");

    // Then: both closes are 16:00 New York time, one in EDT and one in EST
    let stamps: Vec<UtcDateTime> = history.closes.points().iter().map(|point| point.ts).collect();
    assert_eq!(
        stamps,
        vec![
            utc(datetime!(2024-10-31 20:00 UTC)),
            utc(datetime!(2024-11-04 21:00 UTC)),
        ]
    );
}

#[test]
fn when_chart_is_quoted_in_pence_closes_are_in_pounds() {
    // Given: a London chart quoted in GBp
    let body = r#"{"chart":{"result":[{
      "meta": {
        "symbol": "BARC.L",
        "currency": "GBp",
        "exchangeTimezoneName": "Europe/London",
        "gmtoffset": 0,
        "regularMarketPrice": 160.0,
        "regularMarketTime": 1704304800
      },
      "timestamp": [1704186000, 1704272400],
      "indicators": { "quote": [{ "close": [150.0, 155.0], "volume": [10, 20] }] }
    }],"error":null}}"#;

    // When: it is parsed
    let history = parse_chart(&Symbol::parse("BARC.L").expect("valid"), body).expect("valid chart");

    // Then: the currency is GBP and every price is divided by 100
    assert_eq!(history.snapshot.currency.as_ref().map(|c| c.as_str()), Some("GBP"));
    let closes: Vec<f64> = history.closes.points().iter().map(|point| point.value).collect();
    assert_eq!(closes, vec![1.5, 1.55]);
    assert_eq!(
        history.snapshot.live_quote(),
        Some((utc(datetime!(2024-01-03 18:00 UTC)), 1.6))
    );
}
