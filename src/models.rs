//! Canonical market-data entities handed to callers and to the emit layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::decimal::Decimal;
use crate::errors::FeedError;

/// Supported bar cadences.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Interval {
    OneMinute,
    FiveMinutes,
    FifteenMinutes,
    ThirtyMinutes,
    OneHour,
    OneDay,
    OneWeek,
    OneMonth,
}

impl Interval {
    /// Upstream query token.
    pub fn as_str(&self) -> &'static str {
        match self {
            Interval::OneMinute => "1m",
            Interval::FiveMinutes => "5m",
            Interval::FifteenMinutes => "15m",
            Interval::ThirtyMinutes => "30m",
            Interval::OneHour => "1h",
            Interval::OneDay => "1d",
            Interval::OneWeek => "1wk",
            Interval::OneMonth => "1mo",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "1m" => Some(Interval::OneMinute),
            "5m" => Some(Interval::FiveMinutes),
            "15m" => Some(Interval::FifteenMinutes),
            "30m" => Some(Interval::ThirtyMinutes),
            "1h" => Some(Interval::OneHour),
            "1d" => Some(Interval::OneDay),
            "1wk" => Some(Interval::OneWeek),
            "1mo" => Some(Interval::OneMonth),
            _ => None,
        }
    }

    pub fn is_intraday(&self) -> bool {
        matches!(
            self,
            Interval::OneMinute
                | Interval::FiveMinutes
                | Interval::FifteenMinutes
                | Interval::ThirtyMinutes
                | Interval::OneHour
        )
    }

    /// Fixed span for intraday cadences; calendar cadences return None.
    pub fn fixed_duration(&self) -> Option<std::time::Duration> {
        let secs = match self {
            Interval::OneMinute => 60,
            Interval::FiveMinutes => 300,
            Interval::FifteenMinutes => 900,
            Interval::ThirtyMinutes => 1800,
            Interval::OneHour => 3600,
            _ => return None,
        };
        Some(std::time::Duration::from_secs(secs))
    }
}

/// How corporate actions are reflected in historical prices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdjustmentPolicy {
    Raw,
    SplitOnly,
    SplitDividend,
}

impl AdjustmentPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            AdjustmentPolicy::Raw => "raw",
            AdjustmentPolicy::SplitOnly => "split_only",
            AdjustmentPolicy::SplitDividend => "split_dividend",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "raw" => Some(AdjustmentPolicy::Raw),
            "split_only" => Some(AdjustmentPolicy::SplitOnly),
            "split_dividend" => Some(AdjustmentPolicy::SplitDividend),
            _ => None,
        }
    }
}

/// A tradable instrument: ticker symbol plus optional venue MIC.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Security {
    pub symbol: String,
    pub mic: Option<String>,
}

impl Security {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            mic: None,
        }
    }

    /// Attach a market identifier code. MICs are exactly four uppercase
    /// ASCII letters.
    pub fn with_mic(mut self, mic: impl Into<String>) -> Result<Self, FeedError> {
        let mic = mic.into();
        if mic.len() != 4 || !mic.bytes().all(|b| b.is_ascii_uppercase()) {
            return Err(FeedError::Validation {
                message: format!("MIC {mic:?} must be exactly four uppercase letters"),
            });
        }
        self.mic = Some(mic);
        Ok(self)
    }

    /// Transport partition key: `MIC.SYMBOL` when the venue is known,
    /// otherwise the bare symbol.
    pub fn partition_key(&self) -> String {
        match &self.mic {
            Some(mic) => format!("{mic}.{}", self.symbol),
            None => self.symbol.clone(),
        }
    }
}

/// Provenance stamped onto every emitted entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Meta {
    pub run_id: String,
    pub source: String,
    pub producer: String,
    pub schema_version: String,
}

/// One fixed-duration OHLCV observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub event_time: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: i64,
    pub adjusted: bool,
    pub adjustment_policy: AdjustmentPolicy,
    pub currency_code: String,
    pub ingested_at: DateTime<Utc>,
}

/// Cash dividend event, per share, in the batch currency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DividendEvent {
    pub ex_date: DateTime<Utc>,
    pub amount: Decimal,
    pub currency_code: String,
}

/// Share split event (numerator-for-denominator).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitEvent {
    pub date: DateTime<Utc>,
    pub numerator: u32,
    pub denominator: u32,
}

/// Ordered bars for one security at one cadence, plus corporate actions
/// reported for the requested range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BarBatch {
    pub security: Security,
    pub interval: Interval,
    pub adjustment_policy: AdjustmentPolicy,
    pub bars: Vec<Bar>,
    pub dividends: Vec<DividendEvent>,
    pub splits: Vec<SplitEvent>,
    pub meta: Meta,
}

/// Point-in-time quote. Optional fields reflect what the upstream actually
/// served; absence is not zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuoteSnapshot {
    pub security: Security,
    pub bid: Option<Decimal>,
    pub bid_size: Option<i64>,
    pub ask: Option<Decimal>,
    pub ask_size: Option<i64>,
    pub regular_market_price: Option<Decimal>,
    pub regular_market_high: Option<Decimal>,
    pub regular_market_low: Option<Decimal>,
    pub regular_market_volume: Option<i64>,
    pub venue: Option<String>,
    pub market_state: String,
    pub quote_type: String,
    pub currency_code: String,
    pub event_time: DateTime<Utc>,
    pub ingested_at: DateTime<Utc>,
    pub meta: Meta,
}

/// One reported fundamentals figure for a period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FundamentalsLine {
    pub key: String,
    pub value: Decimal,
    pub currency_code: String,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
}

impl FundamentalsLine {
    pub fn validate(&self) -> Result<(), FeedError> {
        if self.period_start >= self.period_end {
            return Err(FeedError::Validation {
                message: format!(
                    "fundamentals line {:?}: period_start {} must precede period_end {}",
                    self.key, self.period_start, self.period_end
                ),
            });
        }
        Ok(())
    }
}

/// Ordered fundamentals lines under one security.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FundamentalsSnapshot {
    pub security: Security,
    pub lines: Vec<FundamentalsLine>,
    pub as_of: DateTime<Utc>,
    pub meta: Meta,
}

/// Static company metadata the free endpoint exposes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompanyInfo {
    pub security: Security,
    pub long_name: Option<String>,
    pub short_name: Option<String>,
    pub exchange: Option<String>,
    pub instrument_type: Option<String>,
    pub timezone: Option<String>,
    pub currency_code: Option<String>,
    pub meta: Meta,
}

/// Venue-level session snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketData {
    pub security: Security,
    pub exchange: Option<String>,
    pub exchange_timezone: Option<String>,
    pub market_state: String,
    pub regular_market_price: Option<Decimal>,
    pub previous_close: Option<Decimal>,
    pub currency_code: Option<String>,
    pub event_time: DateTime<Utc>,
    pub meta: Meta,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mic_validation() {
        assert!(Security::new("AAPL").with_mic("XNAS").is_ok());
        assert!(Security::new("AAPL").with_mic("xnas").is_err());
        assert!(Security::new("AAPL").with_mic("XNA").is_err());
        assert!(Security::new("AAPL").with_mic("XNAS1").is_err());
        assert!(Security::new("AAPL").with_mic("XN4S").is_err());
    }

    #[test]
    fn test_partition_key() {
        let bare = Security::new("AAPL");
        assert_eq!(bare.partition_key(), "AAPL");
        let with_mic = Security::new("AAPL").with_mic("XNAS").unwrap();
        assert_eq!(with_mic.partition_key(), "XNAS.AAPL");
        // Deterministic for the same security.
        assert_eq!(with_mic.partition_key(), with_mic.partition_key());
    }

    #[test]
    fn test_interval_tokens_roundtrip() {
        for i in [
            Interval::OneMinute,
            Interval::FiveMinutes,
            Interval::FifteenMinutes,
            Interval::ThirtyMinutes,
            Interval::OneHour,
            Interval::OneDay,
            Interval::OneWeek,
            Interval::OneMonth,
        ] {
            assert_eq!(Interval::parse(i.as_str()), Some(i));
        }
        assert_eq!(Interval::parse("2d"), None);
    }

    #[test]
    fn test_fundamentals_period_ordering() {
        use chrono::TimeZone;
        let line = FundamentalsLine {
            key: "income.total_revenue".into(),
            value: Decimal::new(1, 2).unwrap(),
            currency_code: "USD".into(),
            period_start: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            period_end: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        };
        assert!(line.validate().is_err());
    }
}
