//! Per-host circuit breaker.
//!
//! State machine: closed -> open when the failure fraction over a full
//! rolling window meets the threshold; open -> half-open after the reset
//! timeout; half-open -> closed after N consecutive probe successes,
//! half-open -> open on any probe failure. While open, calls fail fast
//! without touching the wire or consuming a rate-limit token.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::errors::FeedError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BreakerState::Closed => "closed",
            BreakerState::Open => "open",
            BreakerState::HalfOpen => "half_open",
        }
    }
}

#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Rolling window length in requests.
    pub window: usize,
    /// Failure fraction over a full window that opens the circuit.
    pub failure_threshold: f64,
    /// Time in open before probing resumes.
    pub reset_timeout: Duration,
    /// Consecutive probe successes required to close.
    pub half_open_probes: u32,
}

#[derive(Debug)]
struct BreakerInner {
    state: BreakerState,
    /// Outcome ring, true = failure.
    outcomes: VecDeque<bool>,
    failures: usize,
    opened_at: Option<Instant>,
    last_failure: Option<Instant>,
    half_open_successes: u32,
    half_open_inflight: u32,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    host: String,
    config: BreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(host: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            host: host.into(),
            config,
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                outcomes: VecDeque::new(),
                failures: 0,
                opened_at: None,
                last_failure: None,
                half_open_successes: 0,
                half_open_inflight: 0,
            }),
        }
    }

    pub fn state(&self) -> BreakerState {
        self.inner.lock().state
    }

    pub fn last_failure(&self) -> Option<Instant> {
        self.inner.lock().last_failure
    }

    /// Admit a call or fail fast. In half-open, at most
    /// `half_open_probes` calls are in flight at once.
    pub fn try_admit(&self) -> Result<(), FeedError> {
        let mut inner = self.inner.lock();
        match inner.state {
            BreakerState::Closed => Ok(()),
            BreakerState::Open => {
                let elapsed = inner
                    .opened_at
                    .map(|t| t.elapsed())
                    .unwrap_or(Duration::ZERO);
                if elapsed >= self.config.reset_timeout {
                    inner.state = BreakerState::HalfOpen;
                    inner.half_open_successes = 0;
                    inner.half_open_inflight = 1;
                    debug!(host = %self.host, "circuit_half_open");
                    Ok(())
                } else {
                    Err(FeedError::BreakerOpen {
                        host: self.host.clone(),
                        retry_in: Some(self.config.reset_timeout - elapsed),
                    })
                }
            }
            BreakerState::HalfOpen => {
                if inner.half_open_inflight < self.config.half_open_probes {
                    inner.half_open_inflight += 1;
                    Ok(())
                } else {
                    Err(FeedError::BreakerOpen {
                        host: self.host.clone(),
                        retry_in: None,
                    })
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            BreakerState::Closed => self.push_outcome(&mut inner, false),
            BreakerState::HalfOpen => {
                inner.half_open_inflight = inner.half_open_inflight.saturating_sub(1);
                inner.half_open_successes += 1;
                if inner.half_open_successes >= self.config.half_open_probes {
                    inner.state = BreakerState::Closed;
                    inner.outcomes.clear();
                    inner.failures = 0;
                    inner.opened_at = None;
                    debug!(host = %self.host, "circuit_closed");
                }
            }
            // Late success from a call admitted before the circuit opened.
            BreakerState::Open => {}
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        inner.last_failure = Some(Instant::now());
        match inner.state {
            BreakerState::Closed => {
                self.push_outcome(&mut inner, true);
                let window_full = inner.outcomes.len() == self.config.window;
                let fraction = inner.failures as f64 / self.config.window as f64;
                if window_full && fraction >= self.config.failure_threshold {
                    inner.state = BreakerState::Open;
                    inner.opened_at = Some(Instant::now());
                    inner.outcomes.clear();
                    inner.failures = 0;
                    warn!(
                        host = %self.host,
                        failure_fraction = fraction,
                        "circuit_opened"
                    );
                }
            }
            BreakerState::HalfOpen => {
                inner.state = BreakerState::Open;
                inner.opened_at = Some(Instant::now());
                inner.half_open_inflight = 0;
                inner.half_open_successes = 0;
                warn!(host = %self.host, "circuit_reopened_on_probe_failure");
            }
            BreakerState::Open => {}
        }
    }

    fn push_outcome(&self, inner: &mut BreakerInner, failed: bool) {
        if inner.outcomes.len() == self.config.window {
            if let Some(evicted) = inner.outcomes.pop_front() {
                if evicted {
                    inner.failures -= 1;
                }
            }
        }
        inner.outcomes.push_back(failed);
        if failed {
            inner.failures += 1;
        }
    }
}

/// Process-wide breaker registry keyed by upstream host.
#[derive(Debug)]
pub struct BreakerMap {
    config: BreakerConfig,
    breakers: Mutex<HashMap<String, Arc<CircuitBreaker>>>,
}

impl BreakerMap {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            breakers: Mutex::new(HashMap::new()),
        }
    }

    pub fn for_host(&self, host: &str) -> Arc<CircuitBreaker> {
        let mut map = self.breakers.lock();
        map.entry(host.to_string())
            .or_insert_with(|| {
                Arc::new(CircuitBreaker::new(host.to_string(), self.config.clone()))
            })
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> BreakerConfig {
        BreakerConfig {
            window: 5,
            failure_threshold: 0.8,
            reset_timeout: Duration::from_secs(1),
            half_open_probes: 2,
        }
    }

    #[test]
    fn test_opens_after_full_window_of_failures() {
        let breaker = CircuitBreaker::new("query1.finance.yahoo.com", config());
        for _ in 0..5 {
            assert!(breaker.try_admit().is_ok());
            breaker.record_failure();
        }
        assert_eq!(breaker.state(), BreakerState::Open);
        assert!(matches!(
            breaker.try_admit(),
            Err(FeedError::BreakerOpen { .. })
        ));
    }

    #[test]
    fn test_partial_window_never_opens() {
        let breaker = CircuitBreaker::new("h", config());
        for _ in 0..4 {
            breaker.record_failure();
        }
        // Window not full yet.
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[test]
    fn test_below_threshold_stays_closed() {
        let breaker = CircuitBreaker::new("h", config());
        for i in 0..10 {
            if i % 2 == 0 {
                breaker.record_failure();
            } else {
                breaker.record_success();
            }
        }
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_probe_close_cycle() {
        let breaker = CircuitBreaker::new("h", config());
        for _ in 0..5 {
            breaker.record_failure();
        }
        assert_eq!(breaker.state(), BreakerState::Open);
        assert!(breaker.try_admit().is_err());

        tokio::time::advance(Duration::from_secs(1)).await;

        // Two probes admitted, a third refused while they are in flight.
        assert!(breaker.try_admit().is_ok());
        assert!(breaker.try_admit().is_ok());
        assert!(breaker.try_admit().is_err());

        breaker.record_success();
        breaker.record_success();
        assert_eq!(breaker.state(), BreakerState::Closed);
        assert!(breaker.try_admit().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_failure_reopens() {
        let breaker = CircuitBreaker::new("h", config());
        for _ in 0..5 {
            breaker.record_failure();
        }
        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(breaker.try_admit().is_ok());
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Open);
        assert!(breaker.try_admit().is_err());
    }

    #[test]
    fn test_breaker_map_shares_instances() {
        let map = BreakerMap::new(config());
        let a = map.for_host("query1.finance.yahoo.com");
        let b = map.for_host("query1.finance.yahoo.com");
        assert!(Arc::ptr_eq(&a, &b));
        let c = map.for_host("other.example.com");
        assert!(!Arc::ptr_eq(&a, &c));
    }
}
