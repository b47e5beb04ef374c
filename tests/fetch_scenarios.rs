//! Per-endpoint fetch scenarios against a mock upstream: fundamentals,
//! company info, market data, non-default interval profiles, malformed
//! upstream responses, and session rotation under repeated refusals.

use std::time::Duration;

use chrono::{Datelike, TimeZone, Utc};
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use equifeed::{Ctx, FeedClient, FeedConfig, FeedError, Interval};

fn test_config(base_url: &str) -> FeedConfig {
    let mut config = FeedConfig::default();
    config.http.base_url = base_url.to_string();
    config.http.qps = 1000.0;
    config.http.burst = 100;
    config.http.backoff_base_ms = 1;
    config.http.max_delay_ms = 10;
    config
}

fn quote_summary_body() -> serde_json::Value {
    json!({
        "quoteSummary": {
            "result": [{
                "incomeStatementHistoryQuarterly": {
                    "incomeStatementHistory": [{
                        "endDate": { "raw": 1703980800, "fmt": "2023-12-31" },
                        "totalRevenue": { "raw": 119575000000.0 },
                        "netIncome": { "raw": 33916000000.0 }
                    }]
                },
                "cashflowStatementHistoryQuarterly": {
                    "cashflowStatements": [{
                        "endDate": { "raw": 1703980800 },
                        "totalCashFromOperatingActivities": { "raw": 39895000000.0 }
                    }]
                }
            }],
            "error": null
        }
    })
}

fn weekly_chart_body() -> serde_json::Value {
    // Two weekly bars, Mondays 2024-01-01 and 2024-01-08.
    json!({
        "chart": {
            "result": [{
                "meta": { "currency": "USD", "symbol": "AAPL", "exchangeName": "NMS" },
                "timestamp": [1704067200, 1704672000],
                "indicators": {
                    "quote": [{
                        "open": [185.1, 181.5],
                        "high": [186.5, 186.0],
                        "low": [181.0, 180.9],
                        "close": [181.18, 185.92],
                        "volume": [300000000, 280000000]
                    }]
                }
            }],
            "error": null
        }
    })
}

#[tokio::test]
async fn test_fundamentals_success() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v10/finance/quoteSummary/AAPL"))
        .respond_with(ResponseTemplate::new(200).set_body_json(quote_summary_body()))
        .mount(&server)
        .await;

    let client = FeedClient::new(test_config(&server.uri())).unwrap();
    let ctx = Ctx::with_timeout(Duration::from_secs(10));
    let snapshot = client.fundamentals(&ctx, "AAPL", "run-f").await.unwrap();

    assert_eq!(snapshot.security.symbol, "AAPL");
    assert_eq!(snapshot.lines.len(), 3);
    for line in &snapshot.lines {
        assert!(line.period_start < line.period_end);
        assert_eq!(line.currency_code, "USD");
    }
    let revenue = snapshot
        .lines
        .iter()
        .find(|l| l.key == "income.total_revenue")
        .unwrap();
    // 119,575,000,000.00 at scale 2.
    assert_eq!(revenue.value.scaled, 11_957_500_000_000);
    assert_eq!(revenue.value.scale, 2);
    assert_eq!(snapshot.meta.run_id, "run-f");
}

#[tokio::test]
async fn test_company_info_and_market_data() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v8/finance/chart/AAPL"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
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
                        "marketState": "CLOSED",
                        "regularMarketPrice": 185.64,
                        "regularMarketTime": 1704240000,
                        "previousClose": 185.1
                    },
                    "timestamp": [],
                    "indicators": { "quote": [{}] }
                }],
                "error": null
            }
        })))
        .mount(&server)
        .await;

    let client = FeedClient::new(test_config(&server.uri())).unwrap();
    let ctx = Ctx::with_timeout(Duration::from_secs(10));

    let company = client.company_info(&ctx, "AAPL", "run-c").await.unwrap();
    assert_eq!(company.long_name.as_deref(), Some("Apple Inc."));
    assert_eq!(company.exchange.as_deref(), Some("NasdaqGS"));
    assert_eq!(company.instrument_type.as_deref(), Some("EQUITY"));
    assert_eq!(company.timezone.as_deref(), Some("America/New_York"));
    assert_eq!(company.security.mic.as_deref(), Some("XNAS"));

    let market = client.market_data(&ctx, "AAPL", "run-m").await.unwrap();
    // Meta carries a real market state here; the REGULAR default is not
    // applied.
    assert_eq!(market.market_state, "CLOSED");
    assert_eq!(market.regular_market_price.unwrap().scaled, 18564);
    assert_eq!(market.previous_close.unwrap().scaled, 18510);
}

#[tokio::test]
async fn test_weekly_bars_with_widened_profile() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v8/finance/chart/AAPL"))
        .respond_with(ResponseTemplate::new(200).set_body_json(weekly_chart_body()))
        .mount(&server)
        .await;

    let mut config = test_config(&server.uri());
    config.markets.allowed_intervals = vec![Interval::OneDay, Interval::OneWeek];
    let client = FeedClient::new(config).unwrap();
    let ctx = Ctx::with_timeout(Duration::from_secs(10));
    let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let end = Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap();

    let batch = client
        .weekly_bars(&ctx, "AAPL", start, end, false, "run-w")
        .await
        .unwrap();

    assert_eq!(batch.bars.len(), 2);
    for bar in &batch.bars {
        assert_eq!((bar.end - bar.start).num_days(), 7);
        assert_eq!(bar.event_time, bar.end);
        assert!(!bar.adjusted);
    }
    // Strictly increasing starts.
    assert!(batch.bars[0].start < batch.bars[1].start);
    assert_eq!(batch.bars[0].start.weekday().to_string(), "Mon");
}

#[tokio::test]
async fn test_upstream_error_body_is_malformed() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v8/finance/chart/NOPE"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "chart": {
                "result": null,
                "error": {
                    "code": "Not Found",
                    "description": "No data found, symbol may be delisted"
                }
            }
        })))
        .mount(&server)
        .await;

    let client = FeedClient::new(test_config(&server.uri())).unwrap();
    let ctx = Ctx::with_timeout(Duration::from_secs(10));
    let err = client.quote(&ctx, "NOPE", "run-x").await.unwrap_err();
    match err {
        FeedError::Malformed { message, .. } => {
            assert!(message.contains("delisted"));
        }
        other => panic!("wrong classification: {other:?}"),
    }
}

#[tokio::test]
async fn test_non_json_body_is_malformed_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v8/finance/chart/AAPL"))
        .respond_with(ResponseTemplate::new(200).set_body_raw("<html>rate limited</html>", "text/html"))
        .mount(&server)
        .await;

    let client = FeedClient::new(test_config(&server.uri())).unwrap();
    let ctx = Ctx::with_timeout(Duration::from_secs(10));
    let err = client.quote(&ctx, "AAPL", "run-x").await.unwrap_err();
    assert!(matches!(err, FeedError::Malformed { .. }));
    // Decode failures are terminal; exactly one request was made.
    assert_eq!(client.engine().metrics().snapshot().attempts, 1);
}

#[tokio::test]
async fn test_session_rotation_after_repeated_refusals() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v10/finance/quoteSummary/AAPL"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let mut config = test_config(&server.uri());
    // Single session so every refusal lands on the same identity.
    config.http.enable_session_rotation = true;
    config.http.num_sessions = 1;
    let client = FeedClient::new(config).unwrap();
    let ctx = Ctx::with_timeout(Duration::from_secs(10));

    for _ in 0..3 {
        let err = client.fundamentals(&ctx, "AAPL", "run-r").await.unwrap_err();
        assert!(matches!(err, FeedError::UpstreamRefused { .. }));
    }
    // Three consecutive terminal refusals recycle the session.
    assert_eq!(client.engine().sessions().metrics().snapshot().rotations, 1);
}

#[tokio::test]
async fn test_concurrent_fetches_share_one_client() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v8/finance/chart/AAPL"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "chart": {
                "result": [{
                    "meta": {
                        "currency": "USD",
                        "symbol": "AAPL",
                        "regularMarketPrice": 185.64,
                        "regularMarketTime": 1704240000
                    },
                    "timestamp": [],
                    "indicators": { "quote": [{}] }
                }],
                "error": null
            }
        })))
        .mount(&server)
        .await;

    let client = std::sync::Arc::new(FeedClient::new(test_config(&server.uri())).unwrap());
    let mut handles = Vec::new();
    for i in 0..8 {
        let client = client.clone();
        handles.push(tokio::spawn(async move {
            let ctx = Ctx::with_timeout(Duration::from_secs(10));
            client.quote(&ctx, "AAPL", &format!("run-{i}")).await
        }));
    }
    for handle in handles {
        let quote = handle.await.unwrap().unwrap();
        assert_eq!(quote.regular_market_price.unwrap().scaled, 18564);
    }
    assert_eq!(client.engine().metrics().snapshot().attempts, 8);
}
