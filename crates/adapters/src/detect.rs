// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Detection Cache (C6): an in-memory inbox for the external
//! language-detection sidecar, exposed over a loopback-only RPC endpoint.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use oca_core::Clock;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

const TTL_MS: u64 = 5 * 60 * 1000;
const JANITOR_INTERVAL: Duration = Duration::from_secs(90);

/// One detected workload, keyed by `pod/namespace/container` in the cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectionEntry {
    pub pod: String,
    pub namespace: String,
    pub container: String,
    pub language: String,
    pub kind: String,
    pub enabled: bool,
    #[serde(skip)]
    detected_at_ms: u64,
}

impl DetectionEntry {
    pub fn new(
        pod: impl Into<String>,
        namespace: impl Into<String>,
        container: impl Into<String>,
        language: impl Into<String>,
        kind: impl Into<String>,
        enabled: bool,
    ) -> Self {
        Self {
            pod: pod.into(),
            namespace: namespace.into(),
            container: container.into(),
            language: language.into(),
            kind: kind.into(),
            enabled,
            detected_at_ms: 0,
        }
    }

    fn key(&self) -> String {
        format!("{}/{}/{}", self.pod, self.namespace, self.container)
    }
}

struct Inner<C: Clock> {
    entries: HashMap<String, DetectionEntry>,
    clock: C,
}

/// Mutex-guarded detection-result store, independent of the collector
/// supervisor's own lock — the two are never held at once.
#[derive(Clone)]
pub struct DetectionCache<C: Clock> {
    inner: Arc<Mutex<Inner<C>>>,
}

impl<C: Clock> DetectionCache<C> {
    pub fn new(clock: C) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                entries: HashMap::new(),
                clock,
            })),
        }
    }

    /// Upserts a batch of entries, stamping each with the current time.
    /// Returns the number of entries accepted.
    pub fn push(&self, entries: Vec<DetectionEntry>) -> usize {
        let mut inner = self.inner.lock();
        let now = inner.clock.epoch_ms();
        let count = entries.len();
        for mut entry in entries {
            entry.detected_at_ms = now;
            inner.entries.insert(entry.key(), entry);
        }
        count
    }

    /// Point-in-time copy of everything currently cached.
    pub fn snapshot(&self) -> Vec<DetectionEntry> {
        self.inner.lock().entries.values().cloned().collect()
    }

    /// Evicts entries older than the TTL. Returns the number evicted.
    pub fn evict_expired(&self) -> usize {
        let mut inner = self.inner.lock();
        let now = inner.clock.epoch_ms();
        let before = inner.entries.len();
        inner
            .entries
            .retain(|_, e| now.saturating_sub(e.detected_at_ms) < TTL_MS);
        before - inner.entries.len()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Runs forever, evicting stale entries every [`JANITOR_INTERVAL`]. Intended
/// to be spawned as its own task and aborted (or cancelled) on agent
/// shutdown.
pub async fn run_janitor<C: Clock>(cache: DetectionCache<C>, cancel: tokio_util::sync::CancellationToken) {
    let mut ticker = tokio::time::interval(JANITOR_INTERVAL);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let evicted = cache.evict_expired();
                if evicted > 0 {
                    debug!(evicted, "detection cache janitor evicted expired entries");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oca_core::FakeClock;

    #[test]
    fn push_then_snapshot_round_trips() {
        let cache = DetectionCache::new(FakeClock::new(0));
        cache.push(vec![DetectionEntry::new("web-1", "default", "app", "python", "POD", true)]);
        let snap = cache.snapshot();
        assert_eq!(snap.len(), 1);
        assert_eq!(snap[0].pod, "web-1");
    }

    #[test]
    fn push_preserves_kind_and_enabled() {
        let cache = DetectionCache::new(FakeClock::new(0));
        cache.push(vec![DetectionEntry::new("web-1", "default", "app", "java", "DEPLOYMENT", false)]);
        let snap = cache.snapshot();
        assert_eq!(snap[0].kind, "DEPLOYMENT");
        assert!(!snap[0].enabled);
    }

    #[test]
    fn push_upserts_on_same_key() {
        let cache = DetectionCache::new(FakeClock::new(0));
        cache.push(vec![DetectionEntry::new("web-1", "default", "app", "python", "POD", true)]);
        cache.push(vec![DetectionEntry::new("web-1", "default", "app", "java", "POD", true)]);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.snapshot()[0].language, "java");
    }

    #[test]
    fn entries_older_than_ttl_are_evicted() {
        let clock = FakeClock::new(0);
        let cache = DetectionCache::new(clock.clone());
        cache.push(vec![DetectionEntry::new("web-1", "default", "app", "python", "POD", true)]);

        clock.advance(Duration::from_secs(4 * 60));
        assert_eq!(cache.evict_expired(), 0);
        assert_eq!(cache.len(), 1);

        clock.advance(Duration::from_secs(2 * 60));
        assert_eq!(cache.evict_expired(), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn fresh_entries_survive_a_sweep_that_evicts_stale_ones() {
        let clock = FakeClock::new(0);
        let cache = DetectionCache::new(clock.clone());
        cache.push(vec![DetectionEntry::new("old", "default", "app", "python", "POD", true)]);

        clock.advance(Duration::from_secs(6 * 60));
        cache.push(vec![DetectionEntry::new("new", "default", "app", "java", "POD", true)]);

        assert_eq!(cache.evict_expired(), 1);
        let snap = cache.snapshot();
        assert_eq!(snap.len(), 1);
        assert_eq!(snap[0].pod, "new");
    }
}
