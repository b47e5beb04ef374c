//! Lock-free token bucket.
//!
//! Implemented as a virtual-scheduling (GCRA) limiter: a single atomic
//! holds the theoretical arrival time of the next request in nanoseconds
//! since construction. Refill rate is `qps` tokens per second with `burst`
//! depth of headroom.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::time::Instant;

use crate::ctx::Ctx;
use crate::errors::FeedError;

#[derive(Debug)]
pub struct TokenBucket {
    /// Nanoseconds between token emissions.
    interval_ns: u64,
    /// Burst tolerance in nanoseconds: (burst - 1) * interval.
    tau_ns: u64,
    /// Theoretical arrival time of the next conforming request.
    tat_ns: AtomicU64,
    epoch: Instant,
}

impl TokenBucket {
    pub fn new(qps: f64, burst: u32) -> Self {
        let interval_ns = (1_000_000_000f64 / qps).round().max(1.0) as u64;
        Self {
            interval_ns,
            tau_ns: interval_ns * (burst.saturating_sub(1)) as u64,
            tat_ns: AtomicU64::new(0),
            epoch: Instant::now(),
        }
    }

    fn now_ns(&self) -> u64 {
        self.epoch.elapsed().as_nanos() as u64
    }

    /// Consume a token if one is available right now.
    pub fn try_acquire(&self) -> bool {
        self.reserve().is_none()
    }

    /// Attempt to take a token; on success returns None, otherwise the
    /// duration until the next token frees up.
    fn reserve(&self) -> Option<Duration> {
        loop {
            let now = self.now_ns();
            let tat = self.tat_ns.load(Ordering::Acquire);
            let allow_at = tat.saturating_sub(self.tau_ns);
            if now < allow_at {
                return Some(Duration::from_nanos(allow_at - now));
            }
            let new_tat = tat.max(now) + self.interval_ns;
            if self
                .tat_ns
                .compare_exchange_weak(tat, new_tat, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return None;
            }
        }
    }

    /// Consume a token, blocking until one is available. Honors context
    /// cancellation while waiting.
    pub async fn acquire(&self, ctx: &Ctx) -> Result<(), FeedError> {
        loop {
            match self.reserve() {
                None => return Ok(()),
                Some(wait) => ctx.sleep(wait).await?,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_burst_then_deny() {
        let bucket = TokenBucket::new(1.0, 3);
        assert!(bucket.try_acquire());
        assert!(bucket.try_acquire());
        assert!(bucket.try_acquire());
        // Burst spent; a fourth token needs a full second of refill.
        assert!(!bucket.try_acquire());
    }

    #[test]
    fn test_single_token_bucket() {
        let bucket = TokenBucket::new(10.0, 1);
        assert!(bucket.try_acquire());
        assert!(!bucket.try_acquire());
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_blocks_until_refill() {
        let bucket = TokenBucket::new(1000.0, 1);
        let ctx = Ctx::background();
        bucket.acquire(&ctx).await.unwrap();
        // Second acquire must wait ~1ms for the refill; paused clock
        // auto-advances, so this completes without real sleeping.
        bucket.acquire(&ctx).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_cancellable() {
        let bucket = TokenBucket::new(0.001, 1);
        let ctx = Ctx::background();
        bucket.acquire(&ctx).await.unwrap();
        // Next token is ~1000s away; a short deadline must cut the wait.
        let short = Ctx::with_timeout(Duration::from_millis(50));
        let err = bucket.acquire(&short).await.unwrap_err();
        assert!(matches!(err, FeedError::Cancelled));
    }
}
