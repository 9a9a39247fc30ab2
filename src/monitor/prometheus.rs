//! Prometheus Monitor Manager
//!
//! Exposes the counters of every registered cache as gauges labelled by
//! `area` and `name`. Values are copied from the cache statistics on each
//! scrape. Caches are held weakly; a dropped cache loses its series and a
//! rebuilt one takes over its labels.

use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use prometheus::{Encoder, IntGaugeVec, Opts, Registry, TextEncoder};
use tracing::{debug, info};

use super::CacheMonitorManager;
use crate::cache::{Cache, StatsSnapshot};
use crate::error::{Error, Result};

const LABELS: &[&str] = &["area", "name"];

struct MonitoredCache {
    area: String,
    name: String,
    cache: Weak<dyn Cache>,
}

/// Prometheus-backed monitor manager
pub struct PrometheusMonitorManager {
    registry: Registry,
    caches: RwLock<Vec<MonitoredCache>>,
    hits: IntGaugeVec,
    misses: IntGaugeVec,
    puts: IntGaugeVec,
    invalidations: IntGaugeVec,
    loads: IntGaugeVec,
    load_failures: IntGaugeVec,
    refreshes: IntGaugeVec,
    sync_local: IntGaugeVec,
}

impl PrometheusMonitorManager {
    /// Create a manager with its own registry
    pub fn new() -> Result<Self> {
        Self::with_registry(Registry::new())
    }

    /// Create a manager registering its gauges in `registry`
    pub fn with_registry(registry: Registry) -> Result<Self> {
        let gauge = |name: &str, help: &str| -> Result<IntGaugeVec> {
            let vec = IntGaugeVec::new(Opts::new(name, help), LABELS)?;
            registry.register(Box::new(vec.clone()))?;
            Ok(vec)
        };

        Ok(Self {
            hits: gauge("cachewright_cache_hits", "Cache reads that found a value")?,
            misses: gauge("cachewright_cache_misses", "Cache reads that found nothing")?,
            puts: gauge("cachewright_cache_puts", "Cache writes")?,
            invalidations: gauge("cachewright_cache_invalidations", "Cache invalidations")?,
            loads: gauge("cachewright_cache_loads", "Loader invocations on a miss")?,
            load_failures: gauge("cachewright_cache_load_failures", "Failed loader invocations")?,
            refreshes: gauge("cachewright_cache_refreshes", "Successful background refreshes")?,
            sync_local: gauge(
                "cachewright_cache_sync_local",
                "1 if the cache requested embedded-tier synchronization",
            )?,
            caches: RwLock::new(Vec::new()),
            registry,
        })
    }

    /// Registered `(area, name)` pairs whose cache is still alive
    pub fn monitored(&self) -> Vec<(String, String)> {
        self.caches
            .read()
            .iter()
            .filter(|m| m.cache.strong_count() > 0)
            .map(|m| (m.area.clone(), m.name.clone()))
            .collect()
    }

    /// Copy current statistics into the gauges
    pub fn collect(&self) {
        let live: Vec<(String, String, Arc<dyn Cache>)> = {
            let mut caches = self.caches.write();
            caches.retain(|m| {
                let alive = m.cache.strong_count() > 0;
                if !alive {
                    self.forget(&m.area, &m.name);
                    debug!(area = %m.area, name = %m.name, "Dropped cache unmonitored");
                }
                alive
            });
            caches
                .iter()
                .filter_map(|m| Some((m.area.clone(), m.name.clone(), m.cache.upgrade()?)))
                .collect()
        };

        for (area, name, cache) in live {
            if let Some(stats) = cache.stats() {
                self.publish(&area, &name, &stats);
            }
        }
    }

    fn forget(&self, area: &str, name: &str) {
        let labels = [area, name];
        for gauge in [
            &self.hits,
            &self.misses,
            &self.puts,
            &self.invalidations,
            &self.loads,
            &self.load_failures,
            &self.refreshes,
            &self.sync_local,
        ] {
            // Series may not exist yet if no scrape happened
            let _ = gauge.remove_label_values(&labels);
        }
    }

    fn publish(&self, area: &str, name: &str, stats: &StatsSnapshot) {
        let labels = [area, name];
        self.hits.with_label_values(&labels).set(stats.hits as i64);
        self.misses.with_label_values(&labels).set(stats.misses as i64);
        self.puts.with_label_values(&labels).set(stats.puts as i64);
        self.invalidations
            .with_label_values(&labels)
            .set(stats.invalidations as i64);
        self.loads.with_label_values(&labels).set(stats.loads as i64);
        self.load_failures
            .with_label_values(&labels)
            .set(stats.load_failures as i64);
        self.refreshes
            .with_label_values(&labels)
            .set(stats.refreshes as i64);
    }

    /// Collect and render in the Prometheus text format
    pub fn encode_text(&self) -> Result<String> {
        self.collect();
        let encoder = TextEncoder::new();
        let families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&families, &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| Error::Internal(format!("Metrics are not UTF-8: {}", e)))
    }

    /// Underlying registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

impl CacheMonitorManager for PrometheusMonitorManager {
    fn add_monitors(&self, area: &str, name: &str, cache: &Arc<dyn Cache>, sync_local: bool) -> Result<()> {
        if cache.stats().is_none() {
            return Err(Error::MonitorRegistration {
                area: area.to_string(),
                name: name.to_string(),
                reason: format!("{} cache keeps no statistics", cache.kind()),
            });
        }

        let mut caches = self.caches.write();
        match caches.iter_mut().find(|m| m.area == area && m.name == name) {
            Some(existing) => {
                existing.cache = Arc::downgrade(cache);
                debug!(area, name, "Replaced monitored cache");
            }
            None => caches.push(MonitoredCache {
                area: area.to_string(),
                name: name.to_string(),
                cache: Arc::downgrade(cache),
            }),
        }
        self.sync_local
            .with_label_values(&[area, name])
            .set(i64::from(sync_local));

        if sync_local {
            debug!(area, name, "Embedded-tier synchronization requested");
        }
        info!(area, name, "Cache monitor registered");
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
