//! Sliding-window rate limiter keyed by route + identity.
//!
//! Each rate-limited route carries a fixed `(limit, window_seconds)` policy
//! known at startup; requests to unmapped routes are always allowed and
//! untracked. Timestamps older than the window are pruned lazily on each
//! check, never swept eagerly.
//!
//! The window store is injected behind the [`WindowStore`] trait so a
//! shared external store can replace the in-process map without changing
//! the calling contract. The in-process store keeps per-key linearization
//! (prune, count, compare, append as one unit) while checks on distinct
//! keys proceed in parallel.
//!
//! State is process-local and unbounded; a restart resets all counters.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use serde::Deserialize;

/// Per-route policy: at most `limit` requests per `window_seconds`.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct RatePolicy {
    pub limit: usize,
    pub window_seconds: u64,
}

impl RatePolicy {
    /// Human-readable window label used in 429 response bodies.
    pub fn window_label(&self) -> String {
        match self.window_seconds {
            3600 => "hour".to_string(),
            86400 => "day".to_string(),
            secs => format!("{}s", secs),
        }
    }
}

/// Outcome of a rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    pub allowed: bool,
    pub retry_after_seconds: Option<u64>,
}

impl RateDecision {
    fn allow() -> Self {
        Self {
            allowed: true,
            retry_after_seconds: None,
        }
    }

    fn reject(retry_after_seconds: u64) -> Self {
        Self {
            allowed: false,
            retry_after_seconds: Some(retry_after_seconds),
        }
    }
}

/// The principal a rate-limit check is scoped to.
///
/// An explicit user id takes priority over the network address, so two
/// users behind one address get independent quotas and one user keeps a
/// single quota across addresses.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Identity {
    User(String),
    Ip(String),
}

impl Identity {
    pub fn new(user_id: Option<String>, ip: String) -> Self {
        match user_id {
            Some(id) if !id.is_empty() => Identity::User(id),
            _ => Identity::Ip(ip),
        }
    }

    fn as_str(&self) -> &str {
        match self {
            Identity::User(id) => id,
            Identity::Ip(ip) => ip,
        }
    }
}

/// Backing store for request-timestamp windows.
///
/// `check_and_update` must execute prune, count, compare, and append as one
/// atomic unit per key; checks on different keys must not block each other.
pub trait WindowStore: Send + Sync {
    fn check_and_update(&self, key: &str, now: f64, policy: &RatePolicy) -> RateDecision;
}

/// In-process window store over a concurrent map.
///
/// The map's entry guard holds a shard lock for the duration of one check,
/// which linearizes concurrent checks on the same key.
#[derive(Default)]
pub struct InMemoryWindowStore {
    windows: DashMap<String, Vec<f64>>,
}

impl InMemoryWindowStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl WindowStore for InMemoryWindowStore {
    fn check_and_update(&self, key: &str, now: f64, policy: &RatePolicy) -> RateDecision {
        let mut window = self.windows.entry(key.to_string()).or_default();

        let cutoff = now - policy.window_seconds as f64;
        window.retain(|&t| t > cutoff);

        if window.len() >= policy.limit {
            // Insertion order is chronological, so the head is the oldest.
            let oldest = window.first().copied().unwrap_or(now);
            let retry_after = (policy.window_seconds as f64 - (now - oldest)) as i64;
            return RateDecision::reject(retry_after.max(1) as u64);
        }

        window.push(now);
        RateDecision::allow()
    }
}

/// Route-aware rate limiter.
///
/// Constructed once per process with the route policy table and an injected
/// [`WindowStore`], then shared across request handlers.
pub struct RateLimiter {
    policies: HashMap<String, RatePolicy>,
    store: Arc<dyn WindowStore>,
}

impl RateLimiter {
    pub fn new(policies: HashMap<String, RatePolicy>, store: Arc<dyn WindowStore>) -> Self {
        Self { policies, store }
    }

    pub fn in_memory(policies: HashMap<String, RatePolicy>) -> Self {
        Self::new(policies, Arc::new(InMemoryWindowStore::new()))
    }

    pub fn policy(&self, route: &str) -> Option<&RatePolicy> {
        self.policies.get(route)
    }

    /// Check whether a request is within its route's limit, recording it if
    /// admitted. Routes without a policy are always allowed and untracked.
    pub fn check(&self, identity: &Identity, route: &str) -> RateDecision {
        self.check_at(identity, route, epoch_now())
    }

    /// [`check`](Self::check) with an explicit clock value, for tests.
    pub fn check_at(&self, identity: &Identity, route: &str, now: f64) -> RateDecision {
        let Some(policy) = self.policies.get(route) else {
            return RateDecision::allow();
        };
        let key = format!("{}:{}", identity.as_str(), route);
        self.store.check_and_update(&key, now, policy)
    }
}

fn epoch_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Map a normalized request path to its rate-limit route key.
pub fn route_for_path(path: &str) -> Option<&'static str> {
    let trimmed = path.trim_end_matches('/');
    let path = if trimmed.is_empty() { "/" } else { trimmed };
    match path {
        "/ask" => Some("ask"),
        "/documents/ingest" => Some("documents/ingest"),
        "/documents/presign" => Some("documents/presign"),
        "/documents/confirm" => Some("documents/confirm"),
        _ => None,
    }
}
