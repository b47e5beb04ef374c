//! Chart endpoint decoder.
//!
//! `GET /v8/finance/chart/{symbol}` serves every bar cadence plus the
//! metadata block we synthesize quotes and company/market records from.

use serde::Deserialize;

use crate::errors::FeedError;
use crate::models::Interval;

/// Query parameters for one chart fetch.
#[derive(Debug, Clone)]
pub struct ChartQuery {
    pub symbol: String,
    /// Epoch seconds, inclusive range start.
    pub period1: i64,
    /// Epoch seconds, exclusive range end.
    pub period2: i64,
    pub interval: Interval,
}

pub fn chart_url(base_url: &str, query: &ChartQuery) -> String {
    format!(
        "{}/v8/finance/chart/{}?period1={}&period2={}&interval={}&includePrePost=false&events=div%2Csplit",
        base_url.trim_end_matches('/'),
        query.symbol,
        query.period1,
        query.period2,
        query.interval.as_str(),
    )
}

/// Error object the upstream embeds instead of data.
#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamError {
    pub code: Option<String>,
    pub description: Option<String>,
}

impl UpstreamError {
    pub fn message(&self) -> String {
        format!(
            "{}: {}",
            self.code.as_deref().unwrap_or("unknown"),
            self.description.as_deref().unwrap_or("no description")
        )
    }
}

#[derive(Debug, Deserialize)]
pub struct ChartEnvelope {
    pub chart: ChartNode,
}

#[derive(Debug, Deserialize)]
pub struct ChartNode {
    pub result: Option<Vec<ChartResult>>,
    pub error: Option<UpstreamError>,
}

/// One decoded chart: metadata plus parallel arrays of timestamps and
/// OHLCV. Transient, owned by the fetching call stack.
#[derive(Debug, Deserialize)]
pub struct ChartResult {
    pub meta: ChartMeta,
    #[serde(default)]
    pub timestamp: Vec<i64>,
    pub indicators: Indicators,
    pub events: Option<ChartEvents>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartMeta {
    pub currency: Option<String>,
    pub symbol: String,
    pub exchange_name: Option<String>,
    pub full_exchange_name: Option<String>,
    pub instrument_type: Option<String>,
    pub long_name: Option<String>,
    pub short_name: Option<String>,
    pub exchange_timezone_name: Option<String>,
    pub timezone: Option<String>,
    pub gmtoffset: Option<i64>,
    pub market_state: Option<String>,
    pub regular_market_price: Option<f64>,
    pub regular_market_day_high: Option<f64>,
    pub regular_market_day_low: Option<f64>,
    pub regular_market_volume: Option<i64>,
    pub regular_market_time: Option<i64>,
    pub previous_close: Option<f64>,
    pub chart_previous_close: Option<f64>,
    pub bid: Option<f64>,
    pub bid_size: Option<i64>,
    pub ask: Option<f64>,
    pub ask_size: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct Indicators {
    #[serde(default)]
    pub quote: Vec<QuoteBlock>,
    pub adjclose: Option<Vec<AdjCloseBlock>>,
}

/// Parallel OHLCV arrays; rows the venue had no trade for come back null.
#[derive(Debug, Default, Deserialize)]
pub struct QuoteBlock {
    #[serde(default)]
    pub open: Vec<Option<f64>>,
    #[serde(default)]
    pub high: Vec<Option<f64>>,
    #[serde(default)]
    pub low: Vec<Option<f64>>,
    #[serde(default)]
    pub close: Vec<Option<f64>>,
    #[serde(default)]
    pub volume: Vec<Option<i64>>,
}

#[derive(Debug, Deserialize)]
pub struct AdjCloseBlock {
    #[serde(default)]
    pub adjclose: Vec<Option<f64>>,
}

#[derive(Debug, Deserialize)]
pub struct ChartEvents {
    pub dividends: Option<std::collections::HashMap<String, RawDividend>>,
    pub splits: Option<std::collections::HashMap<String, RawSplit>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawDividend {
    pub amount: f64,
    pub date: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawSplit {
    pub date: i64,
    pub numerator: Option<f64>,
    pub denominator: Option<f64>,
    #[serde(rename = "splitRatio")]
    pub split_ratio: Option<String>,
}

/// Unwrap the envelope: upstream-reported errors and empty result arrays
/// are classified failures, not data.
pub fn decode_chart(envelope: ChartEnvelope, endpoint: &str) -> Result<ChartResult, FeedError> {
    if let Some(err) = envelope.chart.error {
        return Err(FeedError::Malformed {
            endpoint: endpoint.to_string(),
            message: format!("upstream error: {}", err.message()),
        });
    }
    let mut results = envelope.chart.result.ok_or_else(|| FeedError::Malformed {
        endpoint: endpoint.to_string(),
        message: "missing chart result".to_string(),
    })?;
    if results.is_empty() {
        return Err(FeedError::Malformed {
            endpoint: endpoint.to_string(),
            message: "empty chart result".to_string(),
        });
    }
    Ok(results.remove(0))
}

#[cfg(test)]
pub(crate) const CHART_FIXTURE: &str = r#"{
  "chart": {
    "result": [{
      "meta": {
        "currency": "USD",
        "symbol": "AAPL",
        "exchangeName": "NMS",
        "fullExchangeName": "NasdaqGS",
        "instrumentType": "EQUITY",
        "longName": "Apple Inc.",
        "shortName": "Apple Inc.",
        "exchangeTimezoneName": "America/New_York",
        "timezone": "EST",
        "gmtoffset": -18000,
        "regularMarketPrice": 185.64,
        "regularMarketDayHigh": 186.5,
        "regularMarketDayLow": 184.7,
        "regularMarketVolume": 58414500,
        "regularMarketTime": 1704240000,
        "previousClose": 185.1,
        "chartPreviousClose": 184.25
      },
      "timestamp": [1704240000],
      "indicators": {
        "quote": [{
          "open": [185.1],
          "high": [186.5],
          "low": [184.7],
          "close": [185.64],
          "volume": [58414500]
        }],
        "adjclose": [{ "adjclose": [185.64] }]
      },
      "events": {
        "dividends": {
          "1704202200": { "amount": 0.24, "date": 1704202200 }
        }
      }
    }],
    "error": null
  }
}"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chart_url() {
        let query = ChartQuery {
            symbol: "AAPL".to_string(),
            period1: 1_704_153_600,
            period2: 1_704_240_000,
            interval: Interval::OneDay,
        };
        let url = chart_url("https://query1.finance.yahoo.com", &query);
        assert_eq!(
            url,
            "https://query1.finance.yahoo.com/v8/finance/chart/AAPL?period1=1704153600&period2=1704240000&interval=1d&includePrePost=false&events=div%2Csplit"
        );
    }

    #[test]
    fn test_decode_fixture() {
        let envelope: ChartEnvelope = serde_json::from_str(CHART_FIXTURE).unwrap();
        let result = decode_chart(envelope, "/v8/finance/chart/AAPL").unwrap();
        assert_eq!(result.meta.symbol, "AAPL");
        assert_eq!(result.meta.currency.as_deref(), Some("USD"));
        assert_eq!(result.timestamp, vec![1_704_240_000]);
        assert_eq!(result.indicators.quote[0].close[0], Some(185.64));
        let events = result.events.unwrap();
        assert_eq!(events.dividends.unwrap().len(), 1);
    }

    #[test]
    fn test_upstream_error_rejected() {
        let body = r#"{"chart":{"result":null,"error":{"code":"Not Found","description":"No data found, symbol may be delisted"}}}"#;
        let envelope: ChartEnvelope = serde_json::from_str(body).unwrap();
        let err = decode_chart(envelope, "/v8/finance/chart/NOPE").unwrap_err();
        match err {
            FeedError::Malformed { message, .. } => {
                assert!(message.contains("Not Found"));
            }
            other => panic!("wrong classification: {other:?}"),
        }
    }

    #[test]
    fn test_empty_result_rejected() {
        let body = r#"{"chart":{"result":[],"error":null}}"#;
        let envelope: ChartEnvelope = serde_json::from_str(body).unwrap();
        assert!(decode_chart(envelope, "/v8/finance/chart/AAPL").is_err());
    }
}
