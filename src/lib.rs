//! Equifeed Library
//!
//! Fetch-and-emit pipeline for public equity market data: a hardened
//! outbound HTTP engine (rate limiting, retries, circuit breakers,
//! session rotation), per-endpoint decoders and a normalizer producing
//! canonical scaled-decimal entities, an FX sub-pipeline with caching,
//! and a publish layer with envelopes, partition keys and chunking.

pub mod client;
pub mod config;
pub mod ctx;
pub mod decimal;
pub mod emit;
pub mod errors;
pub mod fx;
pub mod httpx;
pub mod models;
pub mod normalize;
pub mod publish;
pub mod timewin;
pub mod yahoo;

// Re-export the surface most embedders need
pub use client::FeedClient;
pub use config::{FeedConfig, FxConfig, FxProviderKind, HttpConfig, MarketConfig, PublishConfig};
pub use ctx::{CancelHandle, Ctx};
pub use decimal::Decimal;
pub use errors::FeedError;
pub use fx::{FxMeta, FxProvider, FxService};
pub use models::{
    AdjustmentPolicy, Bar, BarBatch, CompanyInfo, DividendEvent, FundamentalsLine,
    FundamentalsSnapshot, Interval, MarketData, Meta, QuoteSnapshot, Security, SplitEvent,
};
pub use publish::{
    MemorySink, PublishBackend, PublishPlan, PublishReceipt, PublishedChunk, Publisher,
};
