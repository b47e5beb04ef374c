//! Exponential backoff with jitter, and Retry-After extraction.

use std::time::Duration;

use rand::Rng;

/// Delay schedule for bounded retries: `min(base * 2^(k-1), max) * (1 + j)`
/// with `j` drawn uniformly from `[-jitter, +jitter]` per attempt.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub max_delay: Duration,
    pub jitter: f64,
}

impl BackoffPolicy {
    pub fn new(base_ms: u64, max_delay_ms: u64, jitter: f64) -> Self {
        Self {
            base: Duration::from_millis(base_ms),
            max_delay: Duration::from_millis(max_delay_ms),
            jitter,
        }
    }

    /// Delay before retry `k` (1-indexed: k=1 precedes the second attempt).
    pub fn delay_for_retry(&self, k: u32) -> Duration {
        let exp = k.saturating_sub(1).min(32);
        let raw = self.base.as_millis() as f64 * 2f64.powi(exp as i32);
        let capped = raw.min(self.max_delay.as_millis() as f64);
        let factor = if self.jitter > 0.0 {
            1.0 + rand::thread_rng().gen_range(-self.jitter..=self.jitter)
        } else {
            1.0
        };
        Duration::from_millis((capped * factor).max(0.0) as u64)
    }
}

/// Parse a Retry-After header value: either delta-seconds or an HTTP date.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let when = chrono::DateTime::parse_from_rfc2822(value).ok()?;
    let delta = when.with_timezone(&chrono::Utc) - chrono::Utc::now();
    delta.to_std().ok()
}

/// Retry-After from a response header map, if present and parseable.
pub fn retry_after_hint(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_retry_after)
}
