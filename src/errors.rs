//! Classified error type for the fetch-and-emit pipeline.
//!
//! Every failure a caller can observe maps to exactly one variant, so retry
//! policy and logging can branch on kind instead of string matching.

use std::time::Duration;

/// Pipeline error, one variant per failure class.
#[derive(Debug, Clone)]
pub enum FeedError {
    /// Bad configuration, rejected at startup.
    Config { message: String },
    /// Network-level failure: unreachable, TLS, reset, request timeout.
    Transport { endpoint: String, message: String },
    /// 429 or 503, optionally with an upstream-provided retry delay.
    Throttled {
        endpoint: String,
        status: u16,
        retry_after: Option<Duration>,
    },
    /// 500/502/504.
    UpstreamServer { endpoint: String, status: u16 },
    /// 401/403. Never retried.
    UpstreamRefused {
        endpoint: String,
        symbol: String,
        status: u16,
    },
    /// Parse failure, missing required fields, empty result set.
    Malformed { endpoint: String, message: String },
    /// Circuit breaker refused the call before it reached the wire.
    BreakerOpen {
        host: String,
        retry_in: Option<Duration>,
    },
    /// Conversion requested with the `none` FX provider.
    FxUnavailable { message: String },
    /// Caller-supplied input violates an invariant.
    Validation { message: String },
    /// Context deadline exceeded or cancelled.
    Cancelled,
    /// Retry budget exhausted; wraps the last underlying error.
    Exhausted {
        endpoint: String,
        attempts: u32,
        last: Box<FeedError>,
    },
}

impl FeedError {
    /// Whether the HTTP engine may retry after this error.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FeedError::Transport { .. }
                | FeedError::Throttled { .. }
                | FeedError::UpstreamServer { .. }
        )
    }

    /// Retry delay the upstream asked for, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            FeedError::Throttled { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Short snake_case tag for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            FeedError::Config { .. } => "config",
            FeedError::Transport { .. } => "transport",
            FeedError::Throttled { .. } => "throttled",
            FeedError::UpstreamServer { .. } => "upstream_server",
            FeedError::UpstreamRefused { .. } => "upstream_refused",
            FeedError::Malformed { .. } => "malformed",
            FeedError::BreakerOpen { .. } => "breaker_open",
            FeedError::FxUnavailable { .. } => "fx_unavailable",
            FeedError::Validation { .. } => "validation",
            FeedError::Cancelled => "cancelled",
            FeedError::Exhausted { .. } => "exhausted",
        }
    }

    /// Classify a non-success HTTP status. Statuses outside the known retry
    /// and refusal sets are treated as malformed upstream behavior.
    pub fn from_status(
        endpoint: &str,
        symbol: &str,
        status: u16,
        retry_after: Option<Duration>,
    ) -> Self {
        match status {
            408 => FeedError::Transport {
                endpoint: endpoint.to_string(),
                message: "request timeout (408)".to_string(),
            },
            429 | 503 => FeedError::Throttled {
                endpoint: endpoint.to_string(),
                status,
                retry_after,
            },
            500 | 502 | 504 => FeedError::UpstreamServer {
                endpoint: endpoint.to_string(),
                status,
            },
            401 | 403 => FeedError::UpstreamRefused {
                endpoint: endpoint.to_string(),
                symbol: symbol.to_string(),
                status,
            },
            _ => FeedError::Malformed {
                endpoint: endpoint.to_string(),
                message: format!("unexpected status {status}"),
            },
        }
    }
}

impl std::fmt::Display for FeedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config { message } => write!(f, "invalid configuration: {message}"),
            Self::Transport { endpoint, message } => {
                write!(f, "transport failure for {endpoint}: {message}")
            }
            Self::Throttled {
                endpoint,
                status,
                retry_after,
            } => match retry_after {
                Some(d) => write!(
                    f,
                    "throttled by {endpoint} (status {status}, retry after {}ms)",
                    d.as_millis()
                ),
                None => write!(f, "throttled by {endpoint} (status {status})"),
            },
            Self::UpstreamServer { endpoint, status } => {
                write!(f, "upstream server error from {endpoint} (status {status})")
            }
            Self::UpstreamRefused {
                endpoint,
                symbol,
                status,
            } => write!(
                f,
                "upstream refused {symbol} at {endpoint} (status {status}); \
                 this endpoint requires authorization the free tier does not grant"
            ),
            Self::Malformed { endpoint, message } => {
                write!(f, "malformed response from {endpoint}: {message}")
            }
            Self::BreakerOpen { host, retry_in } => match retry_in {
                Some(d) => write!(
                    f,
                    "circuit open for {host}, retry in {}ms",
                    d.as_millis()
                ),
                None => write!(f, "circuit open for {host}"),
            },
            Self::FxUnavailable { message } => write!(f, "fx unavailable: {message}"),
            Self::Validation { message } => write!(f, "validation failed: {message}"),
            Self::Cancelled => write!(f, "cancelled or deadline exceeded"),
            Self::Exhausted {
                endpoint,
                attempts,
                last,
            } => write!(
                f,
                "gave up on {endpoint} after {attempts} attempts: {last}"
            ),
        }
    }
}

impl std::error::Error for FeedError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Exhausted { last, .. } => Some(last.as_ref()),
            _ => None,
        }
    }
}
