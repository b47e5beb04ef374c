//! Pipeline configuration.
//!
//! Plain structs with production-tuned defaults plus environment-variable
//! overrides. File-based configuration is a front-end concern and stays out
//! of this crate.

use crate::decimal::MAX_SCALE;
use crate::errors::FeedError;
use crate::models::{AdjustmentPolicy, Interval};

/// Outbound HTTP policy knobs, shared by the market-data engine and (as a
/// scoped copy) by the web FX provider.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub base_url: String,
    pub timeout_ms: u64,
    pub idle_timeout_ms: u64,
    pub max_conns_per_host: usize,

    // Retry parameters
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_jitter: f64,
    pub max_delay_ms: u64,

    // Token bucket
    pub qps: f64,
    pub burst: u32,

    // Circuit breaker
    pub circuit_window: usize,
    pub failure_threshold: f64,
    pub reset_timeout_ms: u64,
    pub half_open_probes: u32,

    // Session identity
    pub user_agent: String,
    pub enable_session_rotation: bool,
    pub num_sessions: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            base_url: "https://query1.finance.yahoo.com".to_string(),
            timeout_ms: 10_000,
            idle_timeout_ms: 90_000,
            max_conns_per_host: 10,

            // Retry: 250ms base, 2x growth, 30s cap, ±25% jitter
            max_attempts: 5,
            backoff_base_ms: 250,
            backoff_jitter: 0.25,
            max_delay_ms: 30_000,

            qps: 5.0,
            burst: 10,

            circuit_window: 20,
            failure_threshold: 0.5,
            reset_timeout_ms: 30_000,
            half_open_probes: 2,

            user_agent: "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 \
                         (KHTML, like Gecko) Chrome/120.0 Safari/537.36"
                .to_string(),
            enable_session_rotation: true,
            num_sessions: 4,
        }
    }
}

impl HttpConfig {
    /// Load from environment with defaults. Unparseable values fall back.
    pub fn from_env(prefix: &str) -> Self {
        let mut config = Self::default();

        if let Ok(v) = std::env::var(format!("{prefix}_BASE_URL")) {
            config.base_url = v;
        }
        if let Ok(v) = std::env::var(format!("{prefix}_TIMEOUT_MS")) {
            config.timeout_ms = v.parse().unwrap_or(config.timeout_ms);
        }
        if let Ok(v) = std::env::var(format!("{prefix}_MAX_ATTEMPTS")) {
            config.max_attempts = v.parse().unwrap_or(config.max_attempts);
        }
        if let Ok(v) = std::env::var(format!("{prefix}_BACKOFF_BASE_MS")) {
            config.backoff_base_ms = v.parse().unwrap_or(config.backoff_base_ms);
        }
        if let Ok(v) = std::env::var(format!("{prefix}_MAX_DELAY_MS")) {
            config.max_delay_ms = v.parse().unwrap_or(config.max_delay_ms);
        }
        if let Ok(v) = std::env::var(format!("{prefix}_QPS")) {
            config.qps = v.parse().unwrap_or(config.qps);
        }
        if let Ok(v) = std::env::var(format!("{prefix}_BURST")) {
            config.burst = v.parse().unwrap_or(config.burst);
        }
        if let Ok(v) = std::env::var(format!("{prefix}_NUM_SESSIONS")) {
            config.num_sessions = v.parse().unwrap_or(config.num_sessions);
        }
        if let Ok(v) = std::env::var(format!("{prefix}_SESSION_ROTATION")) {
            config.enable_session_rotation = v == "1" || v.eq_ignore_ascii_case("true");
        }

        config
    }

    pub fn validate(&self) -> Result<(), FeedError> {
        if self.base_url.is_empty() || !self.base_url.starts_with("http") {
            return Err(FeedError::Config {
                message: format!("base_url {:?} is not an http(s) URL", self.base_url),
            });
        }
        if self.max_attempts == 0 {
            return Err(FeedError::Config {
                message: "max_attempts must be at least 1".to_string(),
            });
        }
        if self.qps <= 0.0 || !self.qps.is_finite() {
            return Err(FeedError::Config {
                message: format!("qps {} must be positive", self.qps),
            });
        }
        if self.burst == 0 {
            return Err(FeedError::Config {
                message: "burst must be at least 1".to_string(),
            });
        }
        if !(0.0..=1.0).contains(&self.failure_threshold) || self.failure_threshold == 0.0 {
            return Err(FeedError::Config {
                message: format!(
                    "failure_threshold {} must be in (0, 1]",
                    self.failure_threshold
                ),
            });
        }
        if self.circuit_window == 0 {
            return Err(FeedError::Config {
                message: "circuit_window must be at least 1".to_string(),
            });
        }
        if self.half_open_probes == 0 {
            return Err(FeedError::Config {
                message: "half_open_probes must be at least 1".to_string(),
            });
        }
        if self.enable_session_rotation && self.num_sessions == 0 {
            return Err(FeedError::Config {
                message: "num_sessions must be at least 1 when rotation is enabled"
                    .to_string(),
            });
        }
        if !(0.0..1.0).contains(&self.backoff_jitter) {
            return Err(FeedError::Config {
                message: format!("backoff_jitter {} must be in [0, 1)", self.backoff_jitter),
            });
        }
        Ok(())
    }
}

/// FX provider selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FxProviderKind {
    None,
    Web,
}

impl FxProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FxProviderKind::None => "none",
            FxProviderKind::Web => "web",
        }
    }
}

#[derive(Debug, Clone)]
pub struct FxConfig {
    pub provider: FxProviderKind,
    /// Default conversion target, e.g. "USD".
    pub target: Option<String>,
    pub cache_ttl_ms: u64,
    pub rate_scale: u32,
    /// Per-call budget including retries.
    pub timeout_ms: u64,
    /// HTTP knobs scoped to the FX provider.
    pub http: HttpConfig,
}

impl Default for FxConfig {
    fn default() -> Self {
        Self {
            provider: FxProviderKind::None,
            target: None,
            cache_ttl_ms: 60_000,
            rate_scale: 8,
            timeout_ms: 5_000,
            http: HttpConfig::default(),
        }
    }
}

impl FxConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.http = HttpConfig::from_env("EQUIFEED_FX");

        if let Ok(v) = std::env::var("EQUIFEED_FX_PROVIDER") {
            config.provider = match v.as_str() {
                "web" => FxProviderKind::Web,
                _ => FxProviderKind::None,
            };
        }
        if let Ok(v) = std::env::var("EQUIFEED_FX_TARGET") {
            config.target = Some(v);
        }
        if let Ok(v) = std::env::var("EQUIFEED_FX_CACHE_TTL_MS") {
            config.cache_ttl_ms = v.parse().unwrap_or(config.cache_ttl_ms);
        }
        if let Ok(v) = std::env::var("EQUIFEED_FX_RATE_SCALE") {
            config.rate_scale = v.parse().unwrap_or(config.rate_scale);
        }

        config
    }

    pub fn validate(&self) -> Result<(), FeedError> {
        if self.rate_scale > MAX_SCALE {
            return Err(FeedError::Config {
                message: format!("fx rate_scale {} exceeds {MAX_SCALE}", self.rate_scale),
            });
        }
        if self.provider == FxProviderKind::Web {
            self.http.validate()?;
        }
        Ok(())
    }
}

/// Publish-side knobs; retry and breaker blocks mirror [`HttpConfig`] with
/// an independent budget.
#[derive(Debug, Clone)]
pub struct PublishConfig {
    pub enabled: bool,
    pub env: String,
    pub topic_prefix: String,
    pub max_payload_bytes: usize,

    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_jitter: f64,
    pub max_delay_ms: u64,

    pub circuit_window: usize,
    pub failure_threshold: f64,
    pub reset_timeout_ms: u64,
    pub half_open_probes: u32,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            env: "dev".to_string(),
            topic_prefix: "equifeed".to_string(),
            max_payload_bytes: 512 * 1024,

            max_attempts: 5,
            backoff_base_ms: 100,
            backoff_jitter: 0.25,
            max_delay_ms: 10_000,

            circuit_window: 20,
            failure_threshold: 0.5,
            reset_timeout_ms: 15_000,
            half_open_probes: 2,
        }
    }
}

impl PublishConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(v) = std::env::var("EQUIFEED_PUBLISH_ENABLED") {
            config.enabled = v == "1" || v.eq_ignore_ascii_case("true");
        }
        if let Ok(v) = std::env::var("EQUIFEED_PUBLISH_ENV") {
            config.env = v;
        }
        if let Ok(v) = std::env::var("EQUIFEED_PUBLISH_TOPIC_PREFIX") {
            config.topic_prefix = v;
        }
        if let Ok(v) = std::env::var("EQUIFEED_PUBLISH_MAX_PAYLOAD_BYTES") {
            config.max_payload_bytes = v.parse().unwrap_or(config.max_payload_bytes);
        }

        config
    }

    pub fn validate(&self) -> Result<(), FeedError> {
        if self.max_payload_bytes == 0 {
            return Err(FeedError::Config {
                message: "max_payload_bytes must be positive".to_string(),
            });
        }
        if self.topic_prefix.is_empty() || self.env.is_empty() {
            return Err(FeedError::Config {
                message: "topic_prefix and env must be non-empty".to_string(),
            });
        }
        if self.max_attempts == 0 {
            return Err(FeedError::Config {
                message: "publish max_attempts must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

/// Market-profile guardrails.
#[derive(Debug, Clone)]
pub struct MarketConfig {
    pub allowed_intervals: Vec<Interval>,
    pub default_adjustment_policy: AdjustmentPolicy,
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            allowed_intervals: vec![Interval::OneDay],
            default_adjustment_policy: AdjustmentPolicy::SplitDividend,
        }
    }
}

impl MarketConfig {
    pub fn validate(&self) -> Result<(), FeedError> {
        if self.allowed_intervals.is_empty() {
            return Err(FeedError::Config {
                message: "allowed_intervals must not be empty".to_string(),
            });
        }
        if self.default_adjustment_policy == AdjustmentPolicy::SplitOnly {
            return Err(FeedError::Config {
                message: "default_adjustment_policy must be raw or split_dividend"
                    .to_string(),
            });
        }
        Ok(())
    }
}

/// Top-level configuration composed at the client facade.
#[derive(Debug, Clone)]
pub struct FeedConfig {
    pub http: HttpConfig,
    pub fx: FxConfig,
    pub publish: PublishConfig,
    pub markets: MarketConfig,
    pub producer: String,
    pub source: String,
    pub schema_version: String,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            http: HttpConfig::default(),
            fx: FxConfig::default(),
            publish: PublishConfig::default(),
            markets: MarketConfig::default(),
            producer: "equifeed".to_string(),
            source: "yahoo-finance".to_string(),
            schema_version: "1.0.0".to_string(),
        }
    }
}

impl FeedConfig {
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();

        let mut config = Self::default();
        config.http = HttpConfig::from_env("EQUIFEED_HTTP");
        config.fx = FxConfig::from_env();
        config.publish = PublishConfig::from_env();

        if let Ok(v) = std::env::var("EQUIFEED_PRODUCER") {
            config.producer = v;
        }
        if let Ok(v) = std::env::var("EQUIFEED_ALLOWED_INTERVALS") {
            let intervals: Vec<Interval> =
                v.split(',').filter_map(|t| Interval::parse(t.trim())).collect();
            if !intervals.is_empty() {
                config.markets.allowed_intervals = intervals;
            }
        }
        if let Ok(v) = std::env::var("EQUIFEED_DEFAULT_ADJUSTMENT") {
            if let Some(p) = AdjustmentPolicy::parse(&v) {
                config.markets.default_adjustment_policy = p;
            }
        }

        config
    }

    /// Reject bad configuration at startup, before any network activity.
    pub fn validate(&self) -> Result<(), FeedError> {
        self.http.validate()?;
        self.fx.validate()?;
        self.publish.validate()?;
        self.markets.validate()?;
        if self.producer.is_empty() {
            return Err(FeedError::Config {
                message: "producer must be non-empty".to_string(),
            });
        }
        Ok(())
    }

    /// Schema major version, used in topic names.
    pub fn schema_major(&self) -> u32 {
        self.schema_version
            .split('.')
            .next()
            .and_then(|s| s.parse().ok())
            .unwrap_or(1)
    }
}
