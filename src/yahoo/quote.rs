//! Quote synthesis via the chart endpoint.
//!
//! The dedicated quote endpoint answers 401 without credentials the free
//! tier does not grant, so snapshots are synthesized from a single-day
//! chart's metadata block instead. Market state defaults to REGULAR and
//! quote type to EQUITY unless the metadata says otherwise.

use chrono::{DateTime, Utc};

use crate::models::Interval;
use crate::yahoo::chart::{ChartMeta, ChartQuery, ChartResult};

/// Window (seconds) the single-day chart request reaches back; wide enough
/// to cover weekends and holidays so the latest session is always inside.
const QUOTE_LOOKBACK_SECS: i64 = 5 * 86_400;

/// Chart query whose metadata carries the freshest quote fields.
pub fn quote_query(symbol: &str, now: DateTime<Utc>) -> ChartQuery {
    let period2 = now.timestamp();
    ChartQuery {
        symbol: symbol.to_string(),
        period1: period2 - QUOTE_LOOKBACK_SECS,
        period2,
        interval: Interval::OneDay,
    }
}

/// Quote-relevant fields pulled out of the chart metadata.
#[derive(Debug, Clone)]
pub struct RawQuote {
    pub meta: ChartMeta,
    pub market_state: String,
    pub quote_type: String,
}

pub fn synthesize(result: &ChartResult) -> RawQuote {
    let meta = result.meta.clone();
    let market_state = meta
        .market_state
        .clone()
        .unwrap_or_else(|| "REGULAR".to_string());
    let quote_type = meta
        .instrument_type
        .clone()
        .unwrap_or_else(|| "EQUITY".to_string());
    RawQuote {
        meta,
        market_state,
        quote_type,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::yahoo::chart::{decode_chart, ChartEnvelope, CHART_FIXTURE};

    #[test]
    fn test_quote_query_window() {
        let now = Utc::now();
        let query = quote_query("AAPL", now);
        assert_eq!(query.period2 - query.period1, QUOTE_LOOKBACK_SECS);
        assert_eq!(query.interval, Interval::OneDay);
    }

    #[test]
    fn test_synthesize_defaults() {
        let envelope: ChartEnvelope = serde_json::from_str(CHART_FIXTURE).unwrap();
        let result = decode_chart(envelope, "/chart").unwrap();
        let quote = synthesize(&result);
        // Fixture has no marketState; defaults apply, instrumentType wins
        // for the quote type.
        assert_eq!(quote.market_state, "REGULAR");
        assert_eq!(quote.quote_type, "EQUITY");
        assert_eq!(quote.meta.regular_market_price, Some(185.64));
    }
}
