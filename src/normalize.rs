//! Raw upstream structures to canonical entities.
//!
//! Numeric policy: currency amounts are scaled decimals at the
//! per-currency scale (2 fractional digits for every currency, JPY
//! included), converted from upstream floats with half-up rounding.
//! Volumes stay integral and are never converted.

use chrono::{DateTime, Months, TimeZone, Utc};

use crate::decimal::Decimal;
use crate::errors::FeedError;
use crate::models::{
    AdjustmentPolicy, Bar, BarBatch, CompanyInfo, DividendEvent, FundamentalsLine,
    FundamentalsSnapshot, Interval, MarketData, Meta, QuoteSnapshot, Security, SplitEvent,
};
use crate::timewin;
use crate::yahoo::chart::{ChartMeta, ChartResult};
use crate::yahoo::fundamentals::RawStatement;
use crate::yahoo::quote::RawQuote;

/// Uniform scale for currency amounts.
pub fn scale_for_currency(_currency_code: &str) -> u32 {
    2
}

/// Upstream exchange code to ISO 10383 MIC, for the venues the feed
/// actually serves. Unknown codes yield no MIC and a bare-symbol
/// partition key.
pub fn mic_for_exchange(exchange_code: &str) -> Option<&'static str> {
    match exchange_code {
        "NYQ" => Some("XNYS"),
        "NMS" | "NGM" | "NCM" => Some("XNAS"),
        "PCX" => Some("ARCX"),
        "ASE" => Some("XASE"),
        "TOR" => Some("XTSE"),
        "LSE" => Some("XLON"),
        "GER" => Some("XETR"),
        "FRA" => Some("XFRA"),
        "PAR" => Some("XPAR"),
        "AMS" => Some("XAMS"),
        "JPX" | "TYO" => Some("XJPX"),
        "HKG" => Some("XHKG"),
        _ => None,
    }
}

fn security_from_meta(meta: &ChartMeta) -> Security {
    let security = Security::new(meta.symbol.clone());
    match meta.exchange_name.as_deref().and_then(mic_for_exchange) {
        // The table only emits valid MICs, so attach cannot fail.
        Some(mic) => security.with_mic(mic).expect("static MIC table is valid"),
        None => security,
    }
}

fn currency_of(meta: &ChartMeta, endpoint: &str) -> Result<String, FeedError> {
    meta.currency.clone().ok_or_else(|| FeedError::Malformed {
        endpoint: endpoint.to_string(),
        message: "chart meta missing currency".to_string(),
    })
}

fn decimal_opt(value: Option<f64>, scale: u32) -> Result<Option<Decimal>, FeedError> {
    value.map(|v| Decimal::from_f64(v, scale)).transpose()
}

fn utc_of(epoch: i64) -> Result<DateTime<Utc>, FeedError> {
    Utc.timestamp_opt(epoch, 0)
        .single()
        .ok_or_else(|| FeedError::Validation {
            message: format!("epoch {epoch} is not a valid UTC timestamp"),
        })
}

/// Build a canonical bar batch from a decoded chart.
pub fn bars_from_chart(
    result: &ChartResult,
    interval: Interval,
    policy: AdjustmentPolicy,
    meta: Meta,
    now: DateTime<Utc>,
) -> Result<BarBatch, FeedError> {
    let endpoint = "/v8/finance/chart";
    let currency = currency_of(&result.meta, endpoint)?;
    let scale = scale_for_currency(&currency);
    let security = security_from_meta(&result.meta);

    let quote = result
        .indicators
        .quote
        .first()
        .ok_or_else(|| FeedError::Malformed {
            endpoint: endpoint.to_string(),
            message: "missing quote indicator block".to_string(),
        })?;
    let n = result.timestamp.len();
    if n == 0 {
        return Err(FeedError::Malformed {
            endpoint: endpoint.to_string(),
            message: "chart has no timestamps".to_string(),
        });
    }
    if [
        quote.open.len(),
        quote.high.len(),
        quote.low.len(),
        quote.close.len(),
        quote.volume.len(),
    ]
    .iter()
    .any(|&len| len != n)
    {
        return Err(FeedError::Malformed {
            endpoint: endpoint.to_string(),
            message: "OHLCV arrays disagree with timestamp count".to_string(),
        });
    }

    let adjclose = result
        .indicators
        .adjclose
        .as_ref()
        .and_then(|blocks| blocks.first())
        .map(|b| b.adjclose.as_slice());
    let adjusted = policy != AdjustmentPolicy::Raw;

    let mut bars = Vec::with_capacity(n);
    for i in 0..n {
        // Sessions with no trade come back as nulls; skip the row.
        let (open, high, low, close, volume) = match (
            quote.open[i],
            quote.high[i],
            quote.low[i],
            quote.close[i],
            quote.volume[i],
        ) {
            (Some(o), Some(h), Some(l), Some(c), Some(v)) => (o, h, l, c, v),
            _ => continue,
        };
        let close = if adjusted {
            adjclose.and_then(|series| series.get(i).copied().flatten()).unwrap_or(close)
        } else {
            close
        };
        let window = timewin::window_for(interval, result.timestamp[i])?;
        bars.push(Bar {
            start: window.start,
            end: window.end,
            event_time: window.event_time,
            open: Decimal::from_f64(open, scale)?,
            high: Decimal::from_f64(high, scale)?,
            low: Decimal::from_f64(low, scale)?,
            close: Decimal::from_f64(close, scale)?,
            volume,
            adjusted,
            adjustment_policy: policy,
            currency_code: currency.clone(),
            ingested_at: now,
        });
    }

    let mut dividends = Vec::new();
    let mut splits = Vec::new();
    if let Some(events) = &result.events {
        if let Some(map) = &events.dividends {
            for dividend in map.values() {
                dividends.push(DividendEvent {
                    ex_date: utc_of(dividend.date)?,
                    amount: Decimal::from_f64(dividend.amount, scale)?,
                    currency_code: currency.clone(),
                });
            }
        }
        if let Some(map) = &events.splits {
            for split in map.values() {
                splits.push(SplitEvent {
                    date: utc_of(split.date)?,
                    numerator: split.numerator.unwrap_or(1.0).round() as u32,
                    denominator: split.denominator.unwrap_or(1.0).round() as u32,
                });
            }
        }
    }
    dividends.sort_by_key(|d| d.ex_date);
    splits.sort_by_key(|s| s.date);

    let batch = BarBatch {
        security,
        interval,
        adjustment_policy: policy,
        bars,
        dividends,
        splits,
        meta,
    };
    timewin::validate_batch(&batch)?;
    Ok(batch)
}

/// Canonical quote from chart-synthesized metadata.
pub fn quote_from_chart(
    raw: &RawQuote,
    meta: Meta,
    now: DateTime<Utc>,
) -> Result<QuoteSnapshot, FeedError> {
    let endpoint = "/v8/finance/chart";
    let currency = currency_of(&raw.meta, endpoint)?;
    let scale = scale_for_currency(&currency);
    let security = security_from_meta(&raw.meta);
    let event_time = match raw.meta.regular_market_time {
        Some(epoch) => utc_of(epoch)?,
        None => now,
    };

    Ok(QuoteSnapshot {
        security,
        bid: decimal_opt(raw.meta.bid, scale)?,
        bid_size: raw.meta.bid_size,
        ask: decimal_opt(raw.meta.ask, scale)?,
        ask_size: raw.meta.ask_size,
        regular_market_price: decimal_opt(raw.meta.regular_market_price, scale)?,
        regular_market_high: decimal_opt(raw.meta.regular_market_day_high, scale)?,
        regular_market_low: decimal_opt(raw.meta.regular_market_day_low, scale)?,
        regular_market_volume: raw.meta.regular_market_volume,
        venue: raw
            .meta
            .full_exchange_name
            .clone()
            .or_else(|| raw.meta.exchange_name.clone()),
        market_state: raw.market_state.clone(),
        quote_type: raw.quote_type.clone(),
        currency_code: currency,
        event_time,
        ingested_at: now,
        meta,
    })
}

/// Quarterly statements to fundamentals lines. The upstream only reports
/// the period end; quarterly period starts are derived as end minus three
/// months.
pub fn fundamentals_from_statements(
    symbol: &str,
    statements: &[RawStatement],
    currency_code: &str,
    meta: Meta,
    now: DateTime<Utc>,
) -> Result<FundamentalsSnapshot, FeedError> {
    let scale = scale_for_currency(currency_code);
    let mut lines = Vec::new();
    for statement in statements {
        let period_end = utc_of(statement.period_end_epoch)?;
        let period_start = period_end
            .checked_sub_months(Months::new(3))
            .ok_or_else(|| FeedError::Validation {
                message: format!("period start underflows for end {period_end}"),
            })?;
        for (key, value) in &statement.fields {
            let line = FundamentalsLine {
                key: key.clone(),
                value: Decimal::from_f64(*value, scale)?,
                currency_code: currency_code.to_string(),
                period_start,
                period_end,
            };
            line.validate()?;
            lines.push(line);
        }
    }
    lines.sort_by(|a, b| (a.period_end, &a.key).cmp(&(b.period_end, &b.key)));

    Ok(FundamentalsSnapshot {
        security: Security::new(symbol),
        lines,
        as_of: now,
        meta,
    })
}

/// Static company metadata out of the chart meta block.
pub fn company_from_chart(result: &ChartResult, meta: Meta) -> CompanyInfo {
    let m = &result.meta;
    CompanyInfo {
        security: security_from_meta(m),
        long_name: m.long_name.clone(),
        short_name: m.short_name.clone(),
        exchange: m.full_exchange_name.clone().or_else(|| m.exchange_name.clone()),
        instrument_type: m.instrument_type.clone(),
        timezone: m.exchange_timezone_name.clone().or_else(|| m.timezone.clone()),
        currency_code: m.currency.clone(),
        meta,
    }
}

/// Venue session snapshot out of the chart meta block.
pub fn market_from_chart(
    result: &ChartResult,
    meta: Meta,
    now: DateTime<Utc>,
) -> Result<MarketData, FeedError> {
    let m = &result.meta;
    let scale = m
        .currency
        .as_deref()
        .map(scale_for_currency)
        .unwrap_or(2);
    let event_time = match m.regular_market_time {
        Some(epoch) => utc_of(epoch)?,
        None => now,
    };
    Ok(MarketData {
        security: security_from_meta(m),
        exchange: m.full_exchange_name.clone().or_else(|| m.exchange_name.clone()),
        exchange_timezone: m.exchange_timezone_name.clone(),
        market_state: m.market_state.clone().unwrap_or_else(|| "REGULAR".to_string()),
        regular_market_price: decimal_opt(m.regular_market_price, scale)?,
        previous_close: decimal_opt(
            m.previous_close.or(m.chart_previous_close),
            scale,
        )?,
        currency_code: m.currency.clone(),
        event_time,
        meta,
    })
}
