//! Cache Entry Types
//!
//! Values carried between tiers keep their absolute expiry so a multi-level
//! cache can back-fill an upper tier with the remaining lifetime.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use serde_json::Value;

/// Milliseconds since the Unix epoch
#[inline]
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Absolute expiry for a relative duration starting now
#[inline]
pub fn expire_at(expire: Option<Duration>) -> Option<u64> {
    expire.map(|d| now_millis().saturating_add(d.as_millis() as u64))
}

/// A value read from a cache together with its absolute expiry
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    value: Value,
    /// Expiry (epoch millis), `None` = never
    expire_at: Option<u64>,
}

impl CacheEntry {
    /// Create a new entry
    pub fn new(value: Value, expire_at: Option<u64>) -> Self {
        Self { value, expire_at }
    }

    /// Cached value
    #[inline]
    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Take the value
    #[inline]
    pub fn into_value(self) -> Value {
        self.value
    }

    /// Absolute expiry in epoch millis
    #[inline]
    pub fn expire_at(&self) -> Option<u64> {
        self.expire_at
    }

    /// Remaining lifetime; `None` when the entry never expires
    pub fn remaining(&self) -> Option<Duration> {
        self.expire_at
            .map(|at| Duration::from_millis(at.saturating_sub(now_millis())))
    }

    /// Check if entry has expired
    #[inline]
    pub fn is_expired(&self) -> bool {
        matches!(self.expire_at, Some(at) if now_millis() >= at)
    }
}

/// Entry as held by the embedded tier, with access tracking
#[derive(Debug)]
pub struct StoredEntry {
    value: Value,
    /// Write-expiry (epoch millis)
    expire_at: Option<u64>,
    /// Last access timestamp (epoch millis)
    last_access: AtomicU64,
    /// Access count
    access_count: AtomicU32,
}

impl StoredEntry {
    /// Create a new stored entry
    pub fn new(value: Value, expire_at: Option<u64>) -> Self {
        Self {
            value,
            expire_at,
            last_access: AtomicU64::new(now_millis()),
            access_count: AtomicU32::new(0),
        }
    }

    /// Record an access and return the new count
    #[inline]
    pub fn record_access(&self) -> u32 {
        self.last_access.store(now_millis(), Ordering::Relaxed);
        self.access_count.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Get access count
    #[inline]
    pub fn access_count(&self) -> u32 {
        self.access_count.load(Ordering::Relaxed)
    }

    /// Get last access time (epoch millis)
    #[inline]
    pub fn last_access(&self) -> u64 {
        self.last_access.load(Ordering::Relaxed)
    }

    /// Expired by write time, or idle longer than `expire_after_access`
    pub fn is_expired(&self, expire_after_access: Option<Duration>) -> bool {
        let now = now_millis();
        if matches!(self.expire_at, Some(at) if now >= at) {
            return true;
        }
        match expire_after_access {
            Some(idle) => now.saturating_sub(self.last_access()) >= idle.as_millis() as u64,
            None => false,
        }
    }

    /// Snapshot as a transferable entry
    pub fn to_entry(&self) -> CacheEntry {
        CacheEntry::new(self.value.clone(), self.expire_at)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_entry_without_expiry() {
        let entry = CacheEntry::new(json!(1), None);
        assert!(!entry.is_expired());
        assert_eq!(entry.remaining(), None);
    }

    #[test]
    fn test_entry_remaining_lifetime() {
        let entry = CacheEntry::new(json!("v"), expire_at(Some(Duration::from_secs(60))));
        let remaining = entry.remaining().unwrap();
        assert!(remaining <= Duration::from_secs(60));
        assert!(remaining > Duration::from_secs(55));
        assert!(!entry.is_expired());
    }

    #[test]
    fn test_entry_in_the_past_is_expired() {
        let entry = CacheEntry::new(json!("v"), Some(now_millis() - 1));
        assert!(entry.is_expired());
        assert_eq!(entry.remaining(), Some(Duration::ZERO));
    }

    #[test]
    fn test_stored_entry_access_tracking() {
        let stored = StoredEntry::new(json!({"a": 1}), None);
        assert_eq!(stored.access_count(), 0);
        assert_eq!(stored.record_access(), 1);
        assert_eq!(stored.record_access(), 2);
        assert_eq!(stored.to_entry().value(), &json!({"a": 1}));
    }

    #[test]
    fn test_stored_entry_idle_expiry() {
        let stored = StoredEntry::new(json!(1), None);
        assert!(!stored.is_expired(Some(Duration::from_secs(60))));
        assert!(stored.is_expired(Some(Duration::ZERO)));
        assert!(!stored.is_expired(None));
    }
}
