//! Upstream endpoint decoders: chart (all bar cadences and the
//! quote-synthesis fallback) and quoteSummary (quarterly fundamentals).

pub mod chart;
pub mod fundamentals;
pub mod quote;

pub use chart::{chart_url, decode_chart, ChartEnvelope, ChartMeta, ChartQuery, ChartResult};
pub use fundamentals::{decode_fundamentals, fundamentals_url, QuoteSummaryEnvelope, RawStatement};
pub use quote::{quote_query, synthesize, RawQuote};
