//! Canonical entity to framed wire message.
//!
//! Payload bytes are JSON of the canonical structs. Struct fields
//! serialize in declaration order and envelope extensions are a sorted
//! map, so byte output is deterministic for a given entity. Cross-language
//! round-trip checks compare bytes.

pub mod chunk;
pub mod envelope;

use serde::Serialize;

use crate::errors::FeedError;
use crate::models::{BarBatch, FundamentalsSnapshot, QuoteSnapshot};

pub use chunk::{chunk_payload, Chunk};
pub use envelope::{topic, Envelope, PayloadKind};

fn encode<T: Serialize>(entity: &T, what: &str) -> Result<Vec<u8>, FeedError> {
    serde_json::to_vec(entity).map_err(|e| FeedError::Validation {
        message: format!("{what} failed to serialize: {e}"),
    })
}

pub fn encode_bars(batch: &BarBatch) -> Result<Vec<u8>, FeedError> {
    encode(batch, "bar batch")
}

pub fn encode_quote(quote: &QuoteSnapshot) -> Result<Vec<u8>, FeedError> {
    encode(quote, "quote snapshot")
}

pub fn encode_fundamentals(snapshot: &FundamentalsSnapshot) -> Result<Vec<u8>, FeedError> {
    encode(snapshot, "fundamentals snapshot")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decimal::Decimal;
    use crate::models::{AdjustmentPolicy, Bar, Interval, Meta, Security};
    use chrono::{TimeZone, Utc};

    fn sample_batch() -> BarBatch {
        let start = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 1, 3, 0, 0, 0).unwrap();
        BarBatch {
            security: Security::new("AAPL").with_mic("XNAS").unwrap(),
            interval: Interval::OneDay,
            adjustment_policy: AdjustmentPolicy::SplitDividend,
            bars: vec![Bar {
                start,
                end,
                event_time: end,
                open: Decimal::new(18510, 2).unwrap(),
                high: Decimal::new(18650, 2).unwrap(),
                low: Decimal::new(18470, 2).unwrap(),
                close: Decimal::new(18564, 2).unwrap(),
                volume: 58_414_500,
                adjusted: true,
                adjustment_policy: AdjustmentPolicy::SplitDividend,
                currency_code: "USD".to_string(),
                ingested_at: end,
            }],
            dividends: Vec::new(),
            splits: Vec::new(),
            meta: Meta {
                run_id: "run-1".to_string(),
                source: "yahoo-finance".to_string(),
                producer: "equifeed".to_string(),
                schema_version: "1.0.0".to_string(),
            },
        }
    }

    #[test]
    fn test_encoding_is_deterministic() {
        let batch = sample_batch();
        let a = encode_bars(&batch).unwrap();
        let b = encode_bars(&batch).unwrap();
        assert_eq!(a, b);
        assert!(!a.is_empty());
    }

    #[test]
    fn test_encoded_bytes_roundtrip() {
        let batch = sample_batch();
        let bytes = encode_bars(&batch).unwrap();
        let decoded: BarBatch = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(decoded, batch);
    }
}
