//! Outbound session pool.
//!
//! Each session owns a reqwest client with its own cookie jar and
//! client-identifying header block. A round-robin selector spreads calls
//! across sessions so the upstream's per-session quota is not concentrated
//! on one identity. Sessions hit by repeated terminal refusals are torn
//! down and rebuilt with a fresh jar.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use parking_lot::RwLock;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE};
use tracing::{debug, info};

use crate::config::HttpConfig;

/// Consecutive terminal failures before a session is recycled.
const EVICT_AFTER_TERMINAL: u32 = 3;

/// Alternate browser identities used when rotation is enabled.
const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) \
     Chrome/120.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/119.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/121.0 Safari/537.36",
    "Mozilla/5.0 (X11; Ubuntu; Linux x86_64; rv:122.0) Gecko/20100101 \
     Firefox/122.0",
];

struct SessionSlot {
    client: reqwest::Client,
    user_agent: String,
    consecutive_terminal: u32,
}

/// Pool counters, snapshotted for observability.
#[derive(Debug, Default)]
pub struct SessionPoolMetrics {
    pub picks: AtomicU64,
    pub rotations: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionPoolSnapshot {
    pub picks: u64,
    pub rotations: u64,
}

impl SessionPoolMetrics {
    pub fn snapshot(&self) -> SessionPoolSnapshot {
        SessionPoolSnapshot {
            picks: self.picks.load(Ordering::Relaxed),
            rotations: self.rotations.load(Ordering::Relaxed),
        }
    }
}

pub struct SessionPool {
    config: HttpConfig,
    slots: Vec<RwLock<SessionSlot>>,
    cursor: AtomicUsize,
    metrics: SessionPoolMetrics,
}

fn build_client(config: &HttpConfig, user_agent: &str) -> Result<reqwest::Client> {
    let mut headers = HeaderMap::new();
    headers.insert(
        ACCEPT,
        HeaderValue::from_static("application/json, text/plain, */*"),
    );
    headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));

    reqwest::Client::builder()
        .timeout(Duration::from_millis(config.timeout_ms))
        .pool_max_idle_per_host(config.max_conns_per_host)
        .pool_idle_timeout(Duration::from_millis(config.idle_timeout_ms))
        .tcp_keepalive(Duration::from_secs(60))
        .cookie_store(true)
        .user_agent(user_agent)
        .default_headers(headers)
        .build()
        .context("failed to build session client")
}

impl SessionPool {
    pub fn new(config: &HttpConfig) -> Result<Self> {
        let count = if config.enable_session_rotation {
            config.num_sessions.max(1)
        } else {
            1
        };
        let mut slots = Vec::with_capacity(count);
        for i in 0..count {
            let user_agent = if config.enable_session_rotation {
                USER_AGENTS[i % USER_AGENTS.len()].to_string()
            } else {
                config.user_agent.clone()
            };
            let client = build_client(config, &user_agent)?;
            slots.push(RwLock::new(SessionSlot {
                client,
                user_agent,
                consecutive_terminal: 0,
            }));
        }
        info!(sessions = count, "session_pool_ready");
        Ok(Self {
            config: config.clone(),
            slots,
            cursor: AtomicUsize::new(0),
            metrics: SessionPoolMetrics::default(),
        })
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn metrics(&self) -> &SessionPoolMetrics {
        &self.metrics
    }

    /// Round-robin pick. The reqwest client is handle-cloned; sessions stay
    /// immutable between rebuilds so picks never block on each other.
    pub fn pick(&self) -> (usize, reqwest::Client) {
        self.metrics.picks.fetch_add(1, Ordering::Relaxed);
        let idx = self.cursor.fetch_add(1, Ordering::Relaxed) % self.slots.len();
        let slot = self.slots[idx].read();
        (idx, slot.client.clone())
    }

    /// Mark a successful exchange on the session.
    pub fn report_ok(&self, idx: usize) {
        let mut slot = self.slots[idx].write();
        slot.consecutive_terminal = 0;
    }

    /// Mark a terminal refusal. After enough in a row the session is
    /// rebuilt with a fresh cookie jar and the next identity.
    pub fn report_terminal(&self, idx: usize) {
        let mut slot = self.slots[idx].write();
        slot.consecutive_terminal += 1;
        if slot.consecutive_terminal < EVICT_AFTER_TERMINAL {
            return;
        }
        let rotation = self.metrics.rotations.fetch_add(1, Ordering::Relaxed) + 1;
        let next_ua = USER_AGENTS[(idx + rotation as usize) % USER_AGENTS.len()];
        match build_client(&self.config, next_ua) {
            Ok(client) => {
                slot.client = client;
                slot.user_agent = next_ua.to_string();
                slot.consecutive_terminal = 0;
                debug!(session = idx, rotation, "session_rotated");
            }
            Err(err) => {
                // Keep the old client; better degraded than dead.
                debug!(session = idx, error = %err, "session_rebuild_failed");
            }
        }
    }
}

impl std::fmt::Debug for SessionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionPool")
            .field("sessions", &self.slots.len())
            .finish()
    }
}
