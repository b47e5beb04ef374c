//! Message envelope and topic naming.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Meta, Security};

/// Payload families the feed publishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadKind {
    Bars,
    Quotes,
    Fundamentals,
}

impl PayloadKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PayloadKind::Bars => "bars",
            PayloadKind::Quotes => "quotes",
            PayloadKind::Fundamentals => "fundamentals",
        }
    }

    /// Fully-qualified schema name of the payload type.
    pub fn schema_fqn(&self) -> &'static str {
        match self {
            PayloadKind::Bars => "equifeed.v1.BarBatch",
            PayloadKind::Quotes => "equifeed.v1.QuoteSnapshot",
            PayloadKind::Fundamentals => "equifeed.v1.FundamentalsSnapshot",
        }
    }
}

/// `{prefix}.{kind}.v{major}.{env}`
pub fn topic(prefix: &str, kind: PayloadKind, schema_major: u32, env: &str) -> String {
    format!("{prefix}.{}.v{schema_major}.{env}", kind.as_str())
}

/// Framing metadata wrapping one payload (or one chunk of it) on the bus.
/// Extensions are a sorted map so serialized bytes are deterministic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub message_id: String,
    pub schema_fqn: String,
    pub schema_version: String,
    pub content_type: String,
    pub produced_at: DateTime<Utc>,
    pub producer: String,
    pub source: String,
    pub run_id: String,
    pub partition_key: String,
    pub dedupe_key: Option<String>,
    pub trace_id: Option<String>,
    pub span_id: Option<String>,
    pub extensions: BTreeMap<String, String>,
}

impl Envelope {
    pub fn new(
        kind: PayloadKind,
        security: &Security,
        meta: &Meta,
        produced_at: DateTime<Utc>,
    ) -> Self {
        Self {
            message_id: Uuid::new_v4().to_string(),
            schema_fqn: kind.schema_fqn().to_string(),
            schema_version: meta.schema_version.clone(),
            content_type: "application/json".to_string(),
            produced_at,
            producer: meta.producer.clone(),
            source: meta.source.clone(),
            run_id: meta.run_id.clone(),
            partition_key: security.partition_key(),
            dedupe_key: None,
            trace_id: None,
            span_id: None,
            extensions: BTreeMap::new(),
        }
    }

    pub fn with_trace(mut self, trace_id: impl Into<String>, span_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self.span_id = Some(span_id.into());
        self
    }

    pub fn with_dedupe_key(mut self, key: impl Into<String>) -> Self {
        self.dedupe_key = Some(key.into());
        self
    }

    /// Chunk-specific copy: same message id, chunk position in the
    /// extensions.
    pub fn for_chunk(&self, index: u32, is_last: bool) -> Self {
        let mut envelope = self.clone();
        envelope
            .extensions
            .insert("chunk_index".to_string(), index.to_string());
        envelope
            .extensions
            .insert("chunk_is_last".to_string(), is_last.to_string());
        envelope
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta() -> Meta {
        Meta {
            run_id: "run-1".to_string(),
            source: "yahoo-finance".to_string(),
            producer: "equifeed".to_string(),
            schema_version: "1.0.0".to_string(),
        }
    }

    #[test]
    fn test_topic_format() {
        assert_eq!(
            topic("equifeed", PayloadKind::Bars, 1, "prod"),
            "equifeed.bars.v1.prod"
        );
        assert_eq!(
            topic("md", PayloadKind::Fundamentals, 2, "dev"),
            "md.fundamentals.v2.dev"
        );
    }

    #[test]
    fn test_partition_key_determinism() {
        let security = Security::new("AAPL").with_mic("XNAS").unwrap();
        let a = Envelope::new(PayloadKind::Bars, &security, &meta(), Utc::now());
        let b = Envelope::new(PayloadKind::Quotes, &security, &meta(), Utc::now());
        assert_eq!(a.partition_key, "XNAS.AAPL");
        // Same security always yields the same key, across kinds.
        assert_eq!(a.partition_key, b.partition_key);
        // Message ids stay distinct.
        assert_ne!(a.message_id, b.message_id);
    }

    #[test]
    fn test_chunk_envelope_shares_message_id() {
        let security = Security::new("AAPL");
        let envelope = Envelope::new(PayloadKind::Bars, &security, &meta(), Utc::now());
        let first = envelope.for_chunk(0, false);
        let last = envelope.for_chunk(1, true);
        assert_eq!(first.message_id, last.message_id);
        assert_eq!(first.extensions["chunk_index"], "0");
        assert_eq!(last.extensions["chunk_is_last"], "true");
    }
}
