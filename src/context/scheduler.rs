//! Refresh Scheduler
//!
//! Drives `refresh_due` on every refresh decorator the context created.
//! Caches are held weakly so removing one from the registry lets it go.

use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::{Cache, RefreshCache};

/// Periodic refresh driver
#[derive(Default)]
pub struct RefreshScheduler {
    caches: RwLock<Vec<Weak<RefreshCache>>>,
}

impl RefreshScheduler {
    /// Create an empty scheduler
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a cache; caches without a refresh policy are ignored
    pub fn register(&self, cache: &Arc<RefreshCache>) {
        if cache.config().refresh_policy.is_some() {
            self.caches.write().push(Arc::downgrade(cache));
        }
    }

    /// Live tracked caches
    pub fn len(&self) -> usize {
        self.caches
            .read()
            .iter()
            .filter(|c| c.strong_count() > 0)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// One synchronous pass over every tracked cache
    pub fn refresh_all_due(&self) -> usize {
        let live: Vec<Arc<RefreshCache>> = {
            let mut caches = self.caches.write();
            caches.retain(|c| c.strong_count() > 0);
            caches.iter().filter_map(Weak::upgrade).collect()
        };
        live.iter().map(|cache| cache.refresh_due()).sum()
    }

    /// Run passes every `interval` until `token` is cancelled
    pub async fn run(self: Arc<Self>, interval: Duration, token: CancellationToken) {
        info!(interval_ms = interval.as_millis() as u64, "Refresh scheduler started");
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {
                    let this = Arc::clone(&self);
                    match tokio::task::spawn_blocking(move || this.refresh_all_due()).await {
                        Ok(0) => {}
                        Ok(refreshed) => debug!(refreshed, "Refresh pass complete"),
                        Err(e) => warn!(error = %e, "Refresh pass aborted"),
                    }
                }
            }
        }
        info!("Refresh scheduler stopped");
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{loader, CachePolicy, EmbeddedCacheBuilder};
    use crate::config::RefreshPolicy;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn refreshing(interval: Duration) -> Arc<RefreshCache> {
        let inner = EmbeddedCacheBuilder::new().build_cache().unwrap();
        Arc::new(RefreshCache::new(
            inner,
            CachePolicy {
                refresh_policy: Some(RefreshPolicy::every(interval)),
                ..Default::default()
            },
        ))
    }

    #[test]
    fn test_register_skips_caches_without_policy() {
        let scheduler = RefreshScheduler::new();
        let inner = EmbeddedCacheBuilder::new().build_cache().unwrap();
        let plain = Arc::new(RefreshCache::new(inner, CachePolicy::default()));

        scheduler.register(&plain);
        assert!(scheduler.is_empty());

        let cache = refreshing(Duration::from_secs(1));
        scheduler.register(&cache);
        assert_eq!(scheduler.len(), 1);

        drop(cache);
        assert!(scheduler.is_empty());
        assert_eq!(scheduler.refresh_all_due(), 0);
    }

    #[tokio::test]
    async fn test_run_refreshes_until_cancelled() {
        let scheduler = Arc::new(RefreshScheduler::new());
        let cache = refreshing(Duration::from_millis(10));
        scheduler.register(&cache);

        let calls = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&calls);
        cache
            .compute_if_absent(
                &json!("k"),
                loader(move |_| Ok(json!(c.fetch_add(1, Ordering::SeqCst)))),
            )
            .unwrap();

        let token = CancellationToken::new();
        let handle = tokio::spawn(Arc::clone(&scheduler).run(Duration::from_millis(5), token.clone()));

        tokio::time::sleep(Duration::from_millis(100)).await;
        token.cancel();
        handle.await.unwrap();

        assert!(calls.load(Ordering::SeqCst) >= 2);
        assert!(cache.stats().unwrap().refreshes >= 1);
    }
}
