// SPDX-FileCopyrightText: 2026 Deskbridge Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! TTL-keyed map used both as a per-key lock (`try_acquire` / `release`)
//! and as a sliding-window dedup set (`mark` / `exists`).
//!
//! TTL is per cache, not per entry. A single mutex guards each instance;
//! expired entries are swept on `try_acquire` and `mark` only.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::time::Instant;
use tracing::trace;

pub struct TtlCache {
    name: &'static str,
    ttl: Duration,
    entries: Mutex<HashMap<String, Instant>>,
}

impl TtlCache {
    pub fn new(name: &'static str, ttl: Duration) -> Self {
        Self {
            name,
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    // A panic while holding the guard leaves the map consistent (single
    // insert/remove per critical section), so poisoning is ignored.
    fn entries(&self) -> MutexGuard<'_, HashMap<String, Instant>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn live(&self, stamped: Instant, now: Instant) -> bool {
        now.saturating_duration_since(stamped) < self.ttl
    }

    fn sweep(&self, entries: &mut HashMap<String, Instant>, now: Instant) {
        let before = entries.len();
        entries.retain(|_, stamped| self.live(*stamped, now));
        let swept = before - entries.len();
        if swept > 0 {
            trace!(cache = self.name, swept, "expired entries swept");
        }
    }

    /// Claim `key`. Returns false while another holder's claim is live.
    pub fn try_acquire(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut entries = self.entries();
        self.sweep(&mut entries, now);
        if entries.contains_key(key) {
            return false;
        }
        entries.insert(key.to_string(), now);
        true
    }

    pub fn release(&self, key: &str) {
        self.entries().remove(key);
    }

    /// Stamp `key` with the current time, restarting its window.
    pub fn mark(&self, key: &str) {
        let now = Instant::now();
        let mut entries = self.entries();
        self.sweep(&mut entries, now);
        entries.insert(key.to_string(), now);
    }

    /// True iff `key` was stamped within the TTL.
    pub fn exists(&self, key: &str) -> bool {
        let now = Instant::now();
        self.entries()
            .get(key)
            .is_some_and(|stamped| self.live(*stamped, now))
    }

    pub fn clear(&self, key: &str) {
        self.entries().remove(key);
    }

    /// True iff any live key starts with `prefix`.
    pub(crate) fn any_live_with_prefix(&self, prefix: &str) -> bool {
        let now = Instant::now();
        self.entries()
            .iter()
            .any(|(key, stamped)| key.starts_with(prefix) && self.live(*stamped, now))
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries()
            .values()
            .filter(|stamped| self.live(**stamped, now))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Acquire `key` as a guard that releases it when dropped.
    pub fn lease(self: &Arc<Self>, key: impl Into<String>) -> Option<KeyLease> {
        let key = key.into();
        self.try_acquire(&key).then(|| KeyLease {
            cache: Arc::clone(self),
            key,
            armed: true,
        })
    }
}

impl std::fmt::Debug for TtlCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TtlCache")
            .field("name", &self.name)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

/// A held key. Dropping it releases the key unless [`KeyLease::keep`] was called.
#[must_use = "dropping a lease releases the key immediately"]
pub struct KeyLease {
    cache: Arc<TtlCache>,
    key: String,
    armed: bool,
}

impl KeyLease {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Leave the key claimed until its TTL runs out.
    pub fn keep(mut self) {
        self.armed = false;
    }
}

impl Drop for KeyLease {
    fn drop(&mut self) {
        if self.armed {
            self.cache.release(&self.key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache(ttl_secs: u64) -> Arc<TtlCache> {
        Arc::new(TtlCache::new("test", Duration::from_secs(ttl_secs)))
    }

    #[tokio::test(start_paused = true)]
    async fn acquire_is_exclusive_until_release() {
        let c = cache(30);
        assert!(c.try_acquire("k"));
        assert!(!c.try_acquire("k"));
        c.release("k");
        assert!(c.try_acquire("k"));
    }

    #[tokio::test(start_paused = true)]
    async fn stale_claims_expire() {
        let c = cache(30);
        assert!(c.try_acquire("k"));
        tokio::time::advance(Duration::from_secs(29)).await;
        assert!(!c.try_acquire("k"));
        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(c.try_acquire("k"));
    }

    #[tokio::test(start_paused = true)]
    async fn mark_restarts_the_window() {
        let c = cache(10);
        c.mark("k");
        tokio::time::advance(Duration::from_secs(8)).await;
        c.mark("k");
        tokio::time::advance(Duration::from_secs(8)).await;
        assert!(c.exists("k"));
        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(!c.exists("k"));
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_keeps_len_bounded() {
        let c = cache(5);
        for i in 0..100 {
            c.mark(&format!("k{i}"));
        }
        assert_eq!(c.len(), 100);
        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(c.is_empty());
        c.mark("fresh");
        assert_eq!(c.entries().len(), 1, "marking sweeps expired entries");
    }

    #[tokio::test(start_paused = true)]
    async fn lease_releases_on_drop_unless_kept() {
        let c = cache(60);
        {
            let lease = c.lease("k").expect("free key");
            assert_eq!(lease.key(), "k");
            assert!(c.lease("k").is_none());
        }
        assert!(c.try_acquire("k"));
        c.release("k");

        c.lease("k").expect("free key").keep();
        assert!(!c.try_acquire("k"));
    }

    #[tokio::test(start_paused = true)]
    async fn prefix_lookup_ignores_expired() {
        let c = cache(10);
        c.mark("s:chat:inflight:1");
        assert!(c.any_live_with_prefix("s:chat:inflight:"));
        assert!(!c.any_live_with_prefix("s:other:"));
        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(!c.any_live_with_prefix("s:chat:inflight:"));
    }
}
