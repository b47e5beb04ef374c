//! Robust outbound HTTP: token-bucket rate limit, bounded retries with
//! jittered backoff, per-host circuit breaker, session rotation.

pub mod backoff;
pub mod breaker;
pub mod engine;
pub mod limiter;
pub mod session;

pub use backoff::{parse_retry_after, BackoffPolicy};
pub use breaker::{BreakerConfig, BreakerMap, BreakerState, CircuitBreaker};
pub use engine::{EngineMetrics, EngineSnapshot, HttpEngine};
pub use limiter::TokenBucket;
pub use session::{SessionPool, SessionPoolMetrics, SessionPoolSnapshot};
