//! Fixed-window quota gate keyed by client address.
//!
//! Counters live in process memory only. Several relay instances behind a
//! load balancer each keep their own windows, so the effective quota is
//! multiplied by the instance count.

use axum::http::HeaderMap;
use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::interval;
use tracing::debug;

// Rate limit entry - tracks admitted requests per client
pub struct RateLimitEntry {
    pub count: u32,
    pub window_start: Instant,
}

/// Quota figures reported back to the client in `RateLimit-*` headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaStatus {
    pub limit: u32,
    pub remaining: u32,
    /// Time until the current window closes.
    pub reset_after: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Admit(QuotaStatus),
    Reject(QuotaStatus),
}

impl Decision {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Decision::Admit(_))
    }

    pub fn status(&self) -> QuotaStatus {
        match self {
            Decision::Admit(status) | Decision::Reject(status) => *status,
        }
    }
}

pub struct RateLimiter {
    entries: DashMap<String, RateLimitEntry>,
    limit: u32,
    window: Duration,
}

impl RateLimiter {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            limit,
            window,
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn check(&self, key: &str) -> Decision {
        self.check_at(key, Instant::now())
    }

    /// Admission check against an explicit clock reading.
    ///
    /// The entry guard holds the shard lock for the whole read-check-increment,
    /// so concurrent requests from one client cannot both take the last slot.
    pub fn check_at(&self, key: &str, now: Instant) -> Decision {
        let mut entry = self
            .entries
            .entry(key.to_string())
            .or_insert(RateLimitEntry {
                count: 0,
                window_start: now,
            });

        // window expired..? start a fresh one
        if now >= entry.window_start + self.window {
            entry.count = 0;
            entry.window_start = now;
        }

        let reset_after = (entry.window_start + self.window).saturating_duration_since(now);

        if entry.count < self.limit {
            entry.count += 1;
            return Decision::Admit(QuotaStatus {
                limit: self.limit,
                remaining: self.limit - entry.count,
                reset_after,
            });
        }

        Decision::Reject(QuotaStatus {
            limit: self.limit,
            remaining: 0,
            reset_after,
        })
    }

    pub fn cleanup(&self) -> usize {
        self.cleanup_at(Instant::now())
    }

    // Drop windows that have already expired, returns how many were removed
    pub fn cleanup_at(&self, now: Instant) -> usize {
        let before = self.entries.len();
        let window = self.window;
        self.entries
            .retain(|_, entry| now < entry.window_start + window);
        before.saturating_sub(self.entries.len())
    }

    pub fn tracked_clients(&self) -> usize {
        self.entries.len()
    }
}

// Eviction loop - runs every `every` until the process exits
pub async fn cleanup_task(limiter: Arc<RateLimiter>, every: Duration) {
    let mut interval = interval(every);
    debug!(interval = ?every, "Rate window cleanup started");

    loop {
        interval.tick().await;
        let removed = limiter.cleanup();
        if removed > 0 {
            debug!(removed, tracked = limiter.tracked_clients(), "Evicted expired rate windows");
        }
    }
}

/// Resolves the identifier a request is counted against.
///
/// With `trusted_hops` proxies in front of the relay, the address list is
/// read right to left starting at the socket peer, and the entry
/// `trusted_hops` steps in is used. Unparseable or short chains fall back to
/// the furthest address available.
pub fn client_key(peer: SocketAddr, headers: &HeaderMap, trusted_hops: usize) -> String {
    let peer_ip = peer.ip().to_string();
    if trusted_hops == 0 {
        return peer_ip;
    }

    let forwarded: Vec<String> = headers
        .get_all("x-forwarded-for")
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .map(|part| part.trim().to_string())
        .filter(|part| !part.is_empty())
        .collect();

    // [peer, closest proxy's client, ..., original client]
    let chain: Vec<String> = std::iter::once(peer_ip)
        .chain(forwarded.into_iter().rev())
        .collect();

    let idx = trusted_hops.min(chain.len() - 1);
    chain[idx].clone()
}
