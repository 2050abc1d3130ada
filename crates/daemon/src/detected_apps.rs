// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Bridges the detection-result inbox (C6) into the workload list a tick
//! report sends upstream.

use async_trait::async_trait;
use oca_adapters::DetectionCache;
use oca_core::{Clock, DetectedApp};
use oca_engine::DetectedAppSource;

/// Forwards whatever `kind`/`enabled` the detection sidecar reported for each
/// entry — this cache does no resolution of its own.
pub struct CacheDetectedAppSource<C: Clock> {
    cache: DetectionCache<C>,
}

impl<C: Clock> CacheDetectedAppSource<C> {
    pub fn new(cache: DetectionCache<C>) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl<C: Clock> DetectedAppSource for CacheDetectedAppSource<C> {
    async fn detected_apps(&self) -> Vec<DetectedApp> {
        self.cache
            .snapshot()
            .into_iter()
            .map(|entry| DetectedApp {
                namespace: entry.namespace,
                workload_name: entry.pod,
                kind: entry.kind,
                language: entry.language,
                enabled: entry.enabled,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oca_adapters::DetectionEntry;
    use oca_core::FakeClock;

    #[tokio::test]
    async fn forwards_real_kind_and_enabled_instead_of_hardcoding() {
        let cache = DetectionCache::new(FakeClock::new(0));
        cache.push(vec![DetectionEntry::new(
            "web-1",
            "default",
            "app",
            "java",
            "DEPLOYMENT",
            false,
        )]);
        let source = CacheDetectedAppSource::new(cache);

        let apps = source.detected_apps().await;
        assert_eq!(apps.len(), 1);
        assert_eq!(apps[0].kind, "DEPLOYMENT");
        assert!(!apps[0].enabled);
    }
}
