//! Layered outbound HTTP engine.
//!
//! Order per call: circuit breaker admission (fail fast, no token spent),
//! rate-limit token, session pick, send, classify, then bounded retries
//! with exponential backoff. Retry-After hints from 429/503 replace the
//! computed delay. Cancellation aborts in-flight work immediately and is
//! never retried.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::config::HttpConfig;
use crate::ctx::Ctx;
use crate::errors::FeedError;
use crate::httpx::backoff::{retry_after_hint, BackoffPolicy};
use crate::httpx::breaker::{BreakerConfig, BreakerMap};
use crate::httpx::limiter::TokenBucket;
use crate::httpx::session::SessionPool;

/// Engine counters, atomics so the hot path never locks.
#[derive(Debug, Default)]
pub struct EngineMetrics {
    pub attempts: AtomicU64,
    pub retries: AtomicU64,
    pub throttled: AtomicU64,
    pub breaker_fast_fails: AtomicU64,
    pub exhausted: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineSnapshot {
    pub attempts: u64,
    pub retries: u64,
    pub throttled: u64,
    pub breaker_fast_fails: u64,
    pub exhausted: u64,
}

impl EngineMetrics {
    pub fn snapshot(&self) -> EngineSnapshot {
        EngineSnapshot {
            attempts: self.attempts.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            throttled: self.throttled.load(Ordering::Relaxed),
            breaker_fast_fails: self.breaker_fast_fails.load(Ordering::Relaxed),
            exhausted: self.exhausted.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug)]
pub struct HttpEngine {
    config: HttpConfig,
    limiter: TokenBucket,
    breakers: BreakerMap,
    sessions: SessionPool,
    backoff: BackoffPolicy,
    metrics: EngineMetrics,
}

/// Path portion of a URL, for error context without query noise.
fn endpoint_of(url: &str) -> String {
    match reqwest::Url::parse(url) {
        Ok(u) => u.path().to_string(),
        Err(_) => url.to_string(),
    }
}

fn host_of(url: &str) -> String {
    reqwest::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_else(|| "unknown".to_string())
}

impl HttpEngine {
    pub fn new(config: HttpConfig) -> Result<Self, FeedError> {
        config.validate()?;
        let sessions = SessionPool::new(&config).map_err(|e| FeedError::Config {
            message: format!("session pool: {e:#}"),
        })?;
        let limiter = TokenBucket::new(config.qps, config.burst);
        let breakers = BreakerMap::new(BreakerConfig {
            window: config.circuit_window,
            failure_threshold: config.failure_threshold,
            reset_timeout: std::time::Duration::from_millis(config.reset_timeout_ms),
            half_open_probes: config.half_open_probes,
        });
        let backoff = BackoffPolicy::new(
            config.backoff_base_ms,
            config.max_delay_ms,
            config.backoff_jitter,
        );
        Ok(Self {
            config,
            limiter,
            breakers,
            sessions,
            backoff,
            metrics: EngineMetrics::default(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    pub fn metrics(&self) -> &EngineMetrics {
        &self.metrics
    }

    pub fn sessions(&self) -> &SessionPool {
        &self.sessions
    }

    /// GET `url` and decode the JSON body. Idempotent, so retryable up to
    /// the configured attempt budget.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        ctx: &Ctx,
        url: &str,
        symbol: &str,
    ) -> Result<T, FeedError> {
        let endpoint = endpoint_of(url);
        let host = host_of(url);
        let breaker = self.breakers.for_host(&host);

        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            ctx.checked()?;

            if let Err(err) = breaker.try_admit() {
                self.metrics.breaker_fast_fails.fetch_add(1, Ordering::Relaxed);
                warn!(host = %host, endpoint = %endpoint, "breaker_fast_fail");
                return Err(err);
            }

            self.limiter.acquire(ctx).await?;
            let (session_idx, client) = self.sessions.pick();
            self.metrics.attempts.fetch_add(1, Ordering::Relaxed);

            let err = match ctx.run(client.get(url).send()).await {
                // Cancellation aborts in flight; the breaker saw no outcome.
                Err(cancelled) => return Err(cancelled),
                Ok(Err(net)) => {
                    breaker.record_failure();
                    FeedError::Transport {
                        endpoint: endpoint.clone(),
                        message: net.to_string(),
                    }
                }
                Ok(Ok(response)) => {
                    let status = response.status();
                    if status.is_success() {
                        breaker.record_success();
                        self.sessions.report_ok(session_idx);
                        let bytes = match ctx.run(response.bytes()).await {
                            Err(cancelled) => return Err(cancelled),
                            Ok(Err(net)) => {
                                return Err(FeedError::Transport {
                                    endpoint,
                                    message: format!("body read failed: {net}"),
                                })
                            }
                            Ok(Ok(bytes)) => bytes,
                        };
                        return serde_json::from_slice(&bytes).map_err(|e| {
                            FeedError::Malformed {
                                endpoint,
                                message: format!("json decode failed: {e}"),
                            }
                        });
                    }

                    let hint = retry_after_hint(response.headers());
                    let classified = FeedError::from_status(
                        &endpoint,
                        symbol,
                        status.as_u16(),
                        hint,
                    );
                    match &classified {
                        FeedError::UpstreamRefused { .. } => {
                            // Policy refusal: the host is healthy but this
                            // session identity is burned.
                            self.sessions.report_terminal(session_idx);
                        }
                        FeedError::Malformed { .. } => {}
                        _ => breaker.record_failure(),
                    }
                    classified
                }
            };

            if !err.is_retryable() {
                return Err(err);
            }
            if attempt >= self.config.max_attempts {
                self.metrics.exhausted.fetch_add(1, Ordering::Relaxed);
                return Err(FeedError::Exhausted {
                    endpoint,
                    attempts: attempt,
                    last: Box::new(err),
                });
            }

            if matches!(err, FeedError::Throttled { .. }) {
                self.metrics.throttled.fetch_add(1, Ordering::Relaxed);
            }
            let delay = err
                .retry_after()
                .unwrap_or_else(|| self.backoff.delay_for_retry(attempt));
            self.metrics.retries.fetch_add(1, Ordering::Relaxed);
            debug!(
                endpoint = %endpoint,
                symbol,
                attempt,
                delay_ms = delay.as_millis() as u64,
                kind = err.kind(),
                "retrying"
            );
            ctx.sleep(delay).await?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_and_host_extraction() {
        let url = "https://query1.finance.yahoo.com/v8/finance/chart/AAPL?interval=1d";
        assert_eq!(endpoint_of(url), "/v8/finance/chart/AAPL");
        assert_eq!(host_of(url), "query1.finance.yahoo.com");
    }

    #[test]
    fn test_engine_rejects_invalid_config() {
        let mut config = HttpConfig::default();
        config.max_attempts = 0;
        assert!(matches!(
            HttpEngine::new(config),
            Err(FeedError::Config { .. })
        ));
    }
}
