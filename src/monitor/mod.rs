//! Cache Monitoring
//!
//! Finished caches are handed to a [`CacheMonitorManager`] together with
//! their `(area, name)`. Registration failures never fail a build; the
//! context logs them and carries on.

mod prometheus;

pub use self::prometheus::PrometheusMonitorManager;

use std::sync::Arc;

use crate::cache::Cache;
use crate::error::Result;

/// Receives every cache built by the context
pub trait CacheMonitorManager: Send + Sync {
    /// Start monitoring a cache
    ///
    /// `sync_local` tells whether the site asked for cross-instance
    /// embedded-tier synchronization.
    fn add_monitors(&self, area: &str, name: &str, cache: &Arc<dyn Cache>, sync_local: bool) -> Result<()>;
}
