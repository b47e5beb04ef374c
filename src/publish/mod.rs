//! Publish layer: sealed transport backends wrapped in the same
//! retry/backoff and circuit-breaker discipline as the HTTP engine, with
//! an independent budget. Preview mode computes the full plan (topic,
//! envelope, chunking) without touching the wire.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::config::PublishConfig;
use crate::ctx::Ctx;
use crate::emit::{chunk_payload, topic, Chunk, Envelope, PayloadKind};
use crate::errors::FeedError;
use crate::httpx::{BackoffPolicy, BreakerConfig, BreakerMap};
use crate::models::{Meta, Security};

/// One frame delivered to a backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedChunk {
    pub topic: String,
    pub envelope: Envelope,
    pub payload: Vec<u8>,
}

/// In-process sink capturing published frames; the test and dry-run
/// transport. Optionally fails the first N sends to exercise the retry
/// path.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    records: Arc<Mutex<Vec<PublishedChunk>>>,
    fail_remaining: Arc<Mutex<u32>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sink that rejects the first `failures` sends with a transport error.
    pub fn with_failures(failures: u32) -> Self {
        let sink = Self::new();
        *sink.fail_remaining.lock() = failures;
        sink
    }

    pub fn records(&self) -> Vec<PublishedChunk> {
        self.records.lock().clone()
    }

    pub fn take(&self) -> Vec<PublishedChunk> {
        std::mem::take(&mut self.records.lock())
    }

    fn send(&self, record: PublishedChunk) -> Result<(), FeedError> {
        {
            let mut remaining = self.fail_remaining.lock();
            if *remaining > 0 {
                *remaining -= 1;
                return Err(FeedError::Transport {
                    endpoint: "memory".to_string(),
                    message: "injected sink failure".to_string(),
                });
            }
        }
        self.records.lock().push(record);
        Ok(())
    }
}

/// Sealed transport dispatch. A broker-backed variant slots in beside
/// these without touching the publisher.
#[derive(Debug, Clone)]
pub enum PublishBackend {
    Memory(MemorySink),
    Log,
}

impl PublishBackend {
    /// Destination label; the breaker key for this backend.
    pub fn label(&self) -> &'static str {
        match self {
            PublishBackend::Memory(_) => "memory",
            PublishBackend::Log => "log",
        }
    }

    async fn send(
        &self,
        topic: &str,
        envelope: &Envelope,
        payload: &[u8],
    ) -> Result<(), FeedError> {
        match self {
            PublishBackend::Memory(sink) => sink.send(PublishedChunk {
                topic: topic.to_string(),
                envelope: envelope.clone(),
                payload: payload.to_vec(),
            }),
            PublishBackend::Log => {
                debug!(
                    topic,
                    partition_key = %envelope.partition_key,
                    message_id = %envelope.message_id,
                    bytes = payload.len(),
                    "publish_log"
                );
                Ok(())
            }
        }
    }
}

/// Dry-run result: everything publish would do, minus the send.
#[derive(Debug, Clone)]
pub struct PublishPlan {
    pub topic: String,
    pub partition_key: String,
    pub envelope: Envelope,
    pub chunk_sizes: Vec<usize>,
    pub payload_bytes: usize,
}

#[derive(Debug, Clone)]
pub struct PublishReceipt {
    pub message_id: String,
    pub topic: String,
    pub partition_key: String,
    pub chunks: usize,
}

#[derive(Debug, Default)]
pub struct PublishMetrics {
    pub chunks_sent: AtomicU64,
    pub retries: AtomicU64,
    pub failures: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishSnapshot {
    pub chunks_sent: u64,
    pub retries: u64,
    pub failures: u64,
}

impl PublishMetrics {
    pub fn snapshot(&self) -> PublishSnapshot {
        PublishSnapshot {
            chunks_sent: self.chunks_sent.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug)]
pub struct Publisher {
    config: PublishConfig,
    schema_major: u32,
    backend: PublishBackend,
    breakers: BreakerMap,
    backoff: BackoffPolicy,
    metrics: PublishMetrics,
}

impl Publisher {
    pub fn new(
        config: PublishConfig,
        schema_major: u32,
        backend: PublishBackend,
    ) -> Result<Self, FeedError> {
        config.validate()?;
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
            schema_major,
            backend,
            breakers,
            backoff,
            metrics: PublishMetrics::default(),
        })
    }

    pub fn metrics(&self) -> &PublishMetrics {
        &self.metrics
    }

    fn make_plan(
        &self,
        kind: PayloadKind,
        security: &Security,
        meta: &Meta,
        payload: &[u8],
    ) -> (String, Envelope, Vec<Chunk>) {
        let topic = topic(
            &self.config.topic_prefix,
            kind,
            self.schema_major,
            &self.config.env,
        );
        let envelope = Envelope::new(kind, security, meta, Utc::now());
        let chunks = chunk_payload(payload, self.config.max_payload_bytes);
        (topic, envelope, chunks)
    }

    /// Compute the publish plan without sending anything.
    pub fn preview(
        &self,
        kind: PayloadKind,
        security: &Security,
        meta: &Meta,
        payload: &[u8],
    ) -> PublishPlan {
        let (topic, envelope, chunks) = self.make_plan(kind, security, meta, payload);
        PublishPlan {
            topic,
            partition_key: envelope.partition_key.clone(),
            envelope,
            chunk_sizes: chunks.iter().map(|c| c.payload.len()).collect(),
            payload_bytes: payload.len(),
        }
    }

    /// Send the payload, chunked, in partition order. Each chunk gets the
    /// full retry budget; the breaker is keyed by the backend destination.
    pub async fn publish(
        &self,
        ctx: &Ctx,
        kind: PayloadKind,
        security: &Security,
        meta: &Meta,
        payload: &[u8],
    ) -> Result<PublishReceipt, FeedError> {
        let (topic, envelope, chunks) = self.make_plan(kind, security, meta, payload);
        let breaker = self.breakers.for_host(self.backend.label());
        let total = chunks.len();

        for chunk in chunks {
            let chunk_envelope = envelope.for_chunk(chunk.index, chunk.is_last);
            let mut attempt: u32 = 0;
            loop {
                attempt += 1;
                ctx.checked()?;
                breaker.try_admit()?;

                match ctx
                    .run(self.backend.send(&topic, &chunk_envelope, &chunk.payload))
                    .await
                {
                    Err(cancelled) => return Err(cancelled),
                    Ok(Ok(())) => {
                        breaker.record_success();
                        self.metrics.chunks_sent.fetch_add(1, Ordering::Relaxed);
                        break;
                    }
                    Ok(Err(err)) => {
                        breaker.record_failure();
                        if !err.is_retryable() {
                            self.metrics.failures.fetch_add(1, Ordering::Relaxed);
                            return Err(err);
                        }
                        if attempt >= self.config.max_attempts {
                            self.metrics.failures.fetch_add(1, Ordering::Relaxed);
                            return Err(FeedError::Exhausted {
                                endpoint: self.backend.label().to_string(),
                                attempts: attempt,
                                last: Box::new(err),
                            });
                        }
                        let delay = self.backoff.delay_for_retry(attempt);
                        self.metrics.retries.fetch_add(1, Ordering::Relaxed);
                        warn!(
                            topic = %topic,
                            chunk = chunk.index,
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            "publish_retry"
                        );
                        ctx.sleep(delay).await?;
                    }
                }
            }
        }

        Ok(PublishReceipt {
            message_id: envelope.message_id,
            topic,
            partition_key: envelope.partition_key,
            chunks: total,
        })
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

    fn config(max_payload_bytes: usize) -> PublishConfig {
        PublishConfig {
            enabled: true,
            max_payload_bytes,
            backoff_base_ms: 1,
            max_delay_ms: 5,
            backoff_jitter: 0.0,
            ..PublishConfig::default()
        }
    }

    #[test]
    fn test_preview_chunk_plan() {
        let publisher =
            Publisher::new(config(16), 1, PublishBackend::Memory(MemorySink::new())).unwrap();
        let security = Security::new("AAPL").with_mic("XNAS").unwrap();
        let payload = vec![0u8; 40];
        let plan = publisher.preview(PayloadKind::Bars, &security, &meta(), &payload);
        assert_eq!(plan.topic, "equifeed.bars.v1.dev");
        assert_eq!(plan.partition_key, "XNAS.AAPL");
        assert_eq!(plan.chunk_sizes, vec![16, 16, 8]);
        assert_eq!(plan.payload_bytes, 40);
    }

    #[tokio::test]
    async fn test_publish_chunks_share_message_id() {
        let sink = MemorySink::new();
        let publisher =
            Publisher::new(config(16), 1, PublishBackend::Memory(sink.clone())).unwrap();
        let security = Security::new("AAPL");
        let payload = vec![7u8; 40];
        let ctx = Ctx::background();
        let receipt = publisher
            .publish(&ctx, PayloadKind::Bars, &security, &meta(), &payload)
            .await
            .unwrap();
        assert_eq!(receipt.chunks, 3);

        let records = sink.records();
        assert_eq!(records.len(), 3);
        for record in &records {
            assert_eq!(record.envelope.message_id, receipt.message_id);
        }
        assert_eq!(records[2].envelope.extensions["chunk_is_last"], "true");
        let rebuilt: Vec<u8> = records.iter().flat_map(|r| r.payload.clone()).collect();
        assert_eq!(rebuilt, payload);
    }

    #[tokio::test]
    async fn test_publish_retries_transient_sink_failures() {
        let sink = MemorySink::with_failures(2);
        let publisher =
            Publisher::new(config(1024), 1, PublishBackend::Memory(sink.clone())).unwrap();
        let ctx = Ctx::background();
        let receipt = publisher
            .publish(&ctx, PayloadKind::Quotes, &Security::new("AAPL"), &meta(), b"x")
            .await
            .unwrap();
        assert_eq!(receipt.chunks, 1);
        assert_eq!(sink.records().len(), 1);
        assert_eq!(publisher.metrics().snapshot().retries, 2);
    }

    #[tokio::test]
    async fn test_publish_exhausts_retry_budget() {
        let sink = MemorySink::with_failures(100);
        let publisher =
            Publisher::new(config(1024), 1, PublishBackend::Memory(sink)).unwrap();
        let ctx = Ctx::background();
        let err = publisher
            .publish(&ctx, PayloadKind::Quotes, &Security::new("AAPL"), &meta(), b"x")
            .await
            .unwrap_err();
        match err {
            FeedError::Exhausted { attempts, .. } => assert_eq!(attempts, 5),
            other => panic!("wrong error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_empty_payload_single_empty_chunk() {
        let sink = MemorySink::new();
        let publisher =
            Publisher::new(config(1024), 1, PublishBackend::Memory(sink.clone())).unwrap();
        let ctx = Ctx::background();
        let receipt = publisher
            .publish(&ctx, PayloadKind::Bars, &Security::new("AAPL"), &meta(), &[])
            .await
            .unwrap();
        assert_eq!(receipt.chunks, 1);
        assert!(sink.records()[0].payload.is_empty());
    }
}
