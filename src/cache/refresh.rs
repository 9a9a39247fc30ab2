//! Refresh Decorator
//!
//! Outermost layer of every cache built by the context. It keeps the
//! statistics, serializes concurrent misses for one key when penetration
//! protection is on, and re-runs loaders for keys registered for refresh.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, warn};

use super::entry::{now_millis, CacheEntry};
use super::stats::{CacheStats, StatsSnapshot};
use super::{Cache, CacheConfig, CacheKind, Loader};
use crate::config::RefreshPolicy;
use crate::error::Result;

/// Cross-cutting policy applied by the decorator
#[derive(Debug, Clone, Default)]
pub struct CachePolicy {
    pub refresh_policy: Option<RefreshPolicy>,
    pub penetration_protect: bool,
    /// `None` waits for the concurrent load without bound
    pub penetration_protect_timeout: Option<Duration>,
}

/// A key registered for refresh
struct RefreshTask {
    key: Value,
    loader: Loader,
    last_access: AtomicU64,
    last_refresh: AtomicU64,
}

/// Refresh-capable decorator around any cache
pub struct RefreshCache {
    inner: Arc<dyn Cache>,
    config: CacheConfig,
    stats: CacheStats,
    tasks: DashMap<String, Arc<RefreshTask>>,
    load_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl RefreshCache {
    /// Wrap a cache; its settings are copied and the policy layered on top
    pub fn new(inner: Arc<dyn Cache>, policy: CachePolicy) -> Self {
        let mut config = inner.config().clone();
        config.refresh_policy = policy.refresh_policy;
        config.penetration_protect = policy.penetration_protect;
        config.penetration_protect_timeout = policy.penetration_protect_timeout;
        Self {
            inner,
            config,
            stats: CacheStats::new(),
            tasks: DashMap::new(),
            load_locks: DashMap::new(),
        }
    }

    /// Wrapped cache
    pub fn inner(&self) -> &Arc<dyn Cache> {
        &self.inner
    }

    /// Live counters
    pub fn cache_stats(&self) -> &CacheStats {
        &self.stats
    }

    /// Keys currently registered for refresh
    pub fn refresh_task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Reload every registered key whose refresh interval elapsed
    ///
    /// Keys idle for longer than `stop_refresh_after_last_access` are
    /// dropped instead. Loader failures are logged and retried next pass.
    pub fn refresh_due(&self) -> usize {
        let Some(policy) = &self.config.refresh_policy else {
            return 0;
        };
        let now = now_millis();
        let interval = policy.refresh.as_millis() as u64;

        let mut due = Vec::new();
        let mut idle = Vec::new();
        for task in self.tasks.iter() {
            if let Some(stop) = policy.stop_refresh_after_last_access {
                let since_access = now.saturating_sub(task.last_access.load(Ordering::Relaxed));
                if since_access >= stop.as_millis() as u64 {
                    idle.push(task.key().clone());
                    continue;
                }
            }
            let since_refresh = now.saturating_sub(task.last_refresh.load(Ordering::Relaxed));
            if since_refresh >= interval {
                due.push(Arc::clone(task.value()));
            }
        }

        for key in idle {
            debug!(key = %key, "Stopping refresh of idle key");
            self.tasks.remove(&key);
        }

        let mut refreshed = 0;
        for task in due {
            match (task.loader)(&task.key) {
                Ok(value) => {
                    task.last_refresh.store(now_millis(), Ordering::Relaxed);
                    if self.config.should_store(&value) {
                        if let Err(e) = self.inner.put(&task.key, value) {
                            warn!(key = %task.key, error = %e, "Refresh write failed");
                            continue;
                        }
                    }
                    self.stats.record_refresh();
                    refreshed += 1;
                }
                Err(e) => {
                    self.stats.record_load_failure();
                    warn!(key = %task.key, error = %e, "Refresh load failed");
                }
            }
        }
        refreshed
    }

    fn register_refresh(&self, converted: &str, key: &Value, loader: &Loader) {
        let now = now_millis();
        self.tasks
            .entry(converted.to_string())
            .or_insert_with(|| {
                Arc::new(RefreshTask {
                    key: key.clone(),
                    loader: Arc::clone(loader),
                    last_access: AtomicU64::new(now),
                    last_refresh: AtomicU64::new(now),
                })
            })
            .last_access
            .store(now, Ordering::Relaxed);
    }

    fn touch(&self, key: &Value) {
        if self.config.refresh_policy.is_none() || self.tasks.is_empty() {
            return;
        }
        if let Ok(converted) = self.config.convert_key(key) {
            if let Some(task) = self.tasks.get(&converted) {
                task.last_access.store(now_millis(), Ordering::Relaxed);
            }
        }
    }

    fn load_and_store(&self, key: &Value, loader: &Loader) -> Result<Value> {
        self.stats.record_load();
        let value = match loader(key) {
            Ok(value) => value,
            Err(e) => {
                self.stats.record_load_failure();
                return Err(e);
            }
        };
        if self.config.should_store(&value) {
            self.put(key, value.clone())?;
        }
        Ok(value)
    }

    fn synchronized_load(&self, converted: &str, key: &Value, loader: &Loader) -> Result<Value> {
        let lock = Arc::clone(
            self.load_locks
                .entry(converted.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .value(),
        );

        let result = {
            let guard = match self.config.penetration_protect_timeout {
                Some(timeout) => lock.try_lock_for(timeout),
                None => Some(lock.lock()),
            };
            match guard {
                Some(_guard) => match self.inner.get(key) {
                    // Loaded by the holder we waited on
                    Ok(Some(value)) => Ok(value),
                    Ok(None) => self.load_and_store(key, loader),
                    Err(e) => Err(e),
                },
                None => {
                    debug!(key = %converted, "Penetration protect wait timed out, loading directly");
                    self.load_and_store(key, loader)
                }
            }
        };

        drop(lock);
        self.load_locks
            .remove_if(converted, |_, l| Arc::strong_count(l) == 1);
        result
    }
}

impl Cache for RefreshCache {
    fn kind(&self) -> CacheKind {
        CacheKind::Refresh
    }

    fn config(&self) -> &CacheConfig {
        &self.config
    }

    fn get_entry(&self, key: &Value) -> Result<Option<CacheEntry>> {
        let entry = self.inner.get_entry(key)?;
        match entry {
            Some(_) => self.stats.record_hit(),
            None => self.stats.record_miss(),
        }
        self.touch(key);
        Ok(entry)
    }

    fn put_with_expire(&self, key: &Value, value: Value, expire: Option<Duration>) -> Result<()> {
        self.stats.record_put();
        self.inner.put_with_expire(key, value, expire)
    }

    fn invalidate(&self, key: &Value) -> Result<bool> {
        self.stats.record_invalidate();
        self.inner.invalidate(key)
    }

    fn put(&self, key: &Value, value: Value) -> Result<()> {
        self.stats.record_put();
        self.inner.put(key, value)
    }

    fn compute_if_absent(&self, key: &Value, loader: Loader) -> Result<Value> {
        let converted = self.config.convert_key(key)?;
        if self.config.refresh_policy.is_some() {
            self.register_refresh(&converted, key, &loader);
        }

        if let Some(value) = self.get(key)? {
            return Ok(value);
        }

        if self.config.penetration_protect {
            self.synchronized_load(&converted, key, &loader)
        } else {
            self.load_and_store(key, &loader)
        }
    }

    fn children(&self) -> Vec<Arc<dyn Cache>> {
        vec![Arc::clone(&self.inner)]
    }

    fn stats(&self) -> Option<StatsSnapshot> {
        Some(self.stats.snapshot())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{loader, EmbeddedCacheBuilder};
    use crate::error::Error;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Barrier;
    use std::thread;

    fn wrap(policy: CachePolicy) -> Arc<RefreshCache> {
        let inner = EmbeddedCacheBuilder::new().build_cache().unwrap();
        Arc::new(RefreshCache::new(inner, policy))
    }

    fn counting_loader(calls: Arc<AtomicUsize>, delay: Duration) -> Loader {
        loader(move |key| {
            calls.fetch_add(1, Ordering::SeqCst);
            thread::sleep(delay);
            Ok(json!({ "key": key.clone(), "n": calls.load(Ordering::SeqCst) }))
        })
    }

    #[test]
    fn test_policy_is_layered_on_inner_config() {
        let inner = EmbeddedCacheBuilder::new()
            .limit(3)
            .build_cache()
            .unwrap();
        let cache = RefreshCache::new(
            inner,
            CachePolicy {
                penetration_protect: true,
                penetration_protect_timeout: Some(Duration::from_millis(50)),
                ..Default::default()
            },
        );

        assert_eq!(cache.config().limit, Some(3));
        assert!(cache.config().penetration_protect);
        assert!(cache.config().refresh_policy.is_none());
        assert_eq!(cache.children().len(), 1);
    }

    #[test]
    fn test_stats_track_operations() {
        let cache = wrap(CachePolicy::default());
        cache.get(&json!("a")).unwrap();
        cache.put(&json!("a"), json!(1)).unwrap();
        cache.get(&json!("a")).unwrap();
        cache.invalidate(&json!("a")).unwrap();

        let stats = cache.stats().unwrap();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.puts, 1);
        assert_eq!(stats.invalidations, 1);
    }

    #[test]
    fn test_null_not_cached_by_default() {
        let cache = wrap(CachePolicy::default());
        let calls = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&calls);
        let load = loader(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(Value::Null)
        });

        cache.compute_if_absent(&json!(1), Arc::clone(&load)).unwrap();
        cache.compute_if_absent(&json!(1), load).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_loader_error_propagates() {
        let cache = wrap(CachePolicy::default());
        let load = loader(|key| {
            Err(Error::Loader {
                key: key.to_string(),
                reason: "backend down".into(),
            })
        });

        let err = cache.compute_if_absent(&json!(1), load).unwrap_err();
        assert!(matches!(err, Error::Loader { .. }));
        assert_eq!(cache.stats().unwrap().load_failures, 1);
        assert!(cache.get(&json!(1)).unwrap().is_none());
    }

    #[test]
    fn test_penetration_protect_loads_once() {
        let cache = wrap(CachePolicy {
            penetration_protect: true,
            ..Default::default()
        });
        let calls = Arc::new(AtomicUsize::new(0));
        let load = counting_loader(Arc::clone(&calls), Duration::from_millis(50));
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let load = Arc::clone(&load);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    cache.compute_if_absent(&json!("hot"), load).unwrap()
                })
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(results.iter().all(|v| v == &results[0]));
        assert!(cache.load_locks.is_empty());
    }

    #[test]
    fn test_penetration_timeout_loads_directly() {
        let cache = wrap(CachePolicy {
            penetration_protect: true,
            penetration_protect_timeout: Some(Duration::from_millis(10)),
            ..Default::default()
        });
        let calls = Arc::new(AtomicUsize::new(0));
        let slow = counting_loader(Arc::clone(&calls), Duration::from_millis(200));
        let fast = counting_loader(Arc::clone(&calls), Duration::ZERO);

        let holder = {
            let cache = Arc::clone(&cache);
            thread::spawn(move || cache.compute_if_absent(&json!("k"), slow).unwrap())
        };
        thread::sleep(Duration::from_millis(50));
        cache.compute_if_absent(&json!("k"), fast).unwrap();
        holder.join().unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_refresh_due_reloads_after_interval() {
        let cache = wrap(CachePolicy {
            refresh_policy: Some(RefreshPolicy {
                refresh: Duration::from_millis(20),
                stop_refresh_after_last_access: None,
            }),
            ..Default::default()
        });
        let version = Arc::new(AtomicUsize::new(0));
        let v = Arc::clone(&version);
        let load = loader(move |_| Ok(json!(v.fetch_add(1, Ordering::SeqCst))));

        assert_eq!(cache.compute_if_absent(&json!("k"), load).unwrap(), json!(0));
        assert_eq!(cache.refresh_task_count(), 1);
        assert_eq!(cache.refresh_due(), 0);

        thread::sleep(Duration::from_millis(40));
        assert_eq!(cache.refresh_due(), 1);
        assert_eq!(cache.get(&json!("k")).unwrap(), Some(json!(1)));
        assert_eq!(cache.stats().unwrap().refreshes, 1);
    }

    #[test]
    fn test_idle_keys_stop_refreshing() {
        let cache = wrap(CachePolicy {
            refresh_policy: Some(RefreshPolicy {
                refresh: Duration::from_millis(10),
                stop_refresh_after_last_access: Some(Duration::from_millis(20)),
            }),
            ..Default::default()
        });
        cache
            .compute_if_absent(&json!("k"), loader(|_| Ok(json!(1))))
            .unwrap();

        thread::sleep(Duration::from_millis(40));
        assert_eq!(cache.refresh_due(), 0);
        assert_eq!(cache.refresh_task_count(), 0);
    }

    #[test]
    fn test_refresh_without_policy_is_noop() {
        let cache = wrap(CachePolicy::default());
        cache
            .compute_if_absent(&json!("k"), loader(|_| Ok(json!(1))))
            .unwrap();
        assert_eq!(cache.refresh_task_count(), 0);
        assert_eq!(cache.refresh_due(), 0);
    }
}
