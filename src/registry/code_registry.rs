//! Code Registry
//!
//! In-memory directory mapping rendezvous codes to the addresses a peer
//! registered under them. A single reader/writer lock guards the whole map:
//! registration volume is low, so per-key locking would buy nothing.
//!
//! Entries are never removed on read. Expiry is enforced by the sweeper
//! calling [`CodeRegistry::evict_expired`]; callers that need read-time
//! freshness use [`CodeRegistry::get_fresh`].

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::borrow::Borrow;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

// =============================================================================
// Constants
// =============================================================================

/// Maximum age of a registration before it is considered expired (30 minutes)
pub const DEFAULT_CODE_TTL: Duration = Duration::from_secs(30 * 60);

/// How often the sweeper scans for expired registrations (5 minutes)
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);

// =============================================================================
// Registry Configuration
// =============================================================================

/// Expiry settings shared by the sweeper and the lookup path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryConfig {
    /// Maximum age of an entry
    pub ttl: Duration,
    /// Interval between sweeps
    pub sweep_interval: Duration,
    /// Hide logically expired entries on lookup instead of waiting for the
    /// next sweep
    pub strict_freshness: bool,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_CODE_TTL,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            strict_freshness: false,
        }
    }
}

impl RegistryConfig {
    /// Reject settings the sweeper cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.ttl.is_zero() {
            return Err(Error::Configuration("code TTL must be greater than zero".into()));
        }
        if self.sweep_interval.is_zero() {
            return Err(Error::Configuration(
                "sweep interval must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Code
// =============================================================================

/// Opaque rendezvous code exchanged out-of-band between peers
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Code(String);

impl Code {
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Code {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// Lets the map be queried with a plain `&str`.
impl Borrow<str> for Code {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<String> for Code {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for Code {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<&String> for Code {
    fn from(s: &String) -> Self {
        Self(s.clone())
    }
}

// =============================================================================
// Entry
// =============================================================================

/// A registered peer: the addresses published under one code
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// Code the entry is stored under
    pub code: Code,
    /// Address on the peers' overlay network
    pub virtual_address: String,
    /// Address reachable over the public internet
    pub public_address: String,
    /// Time of the last registration under this code
    pub registered_at: DateTime<Utc>,
}

impl Entry {
    /// Age of the entry at `now`. Zero if `registered_at` lies in the future.
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now.signed_duration_since(self.registered_at)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }

    /// True once the entry is strictly older than `ttl`
    pub fn is_expired(&self, ttl: Duration, now: DateTime<Utc>) -> bool {
        self.age(now) > ttl
    }
}

// =============================================================================
// Registry Statistics
// =============================================================================

/// Lifetime counters for the registry
#[derive(Debug, Default)]
pub struct RegistryStats {
    /// Successful registrations, including overwrites
    pub registrations: AtomicU64,
    /// Registrations that replaced an existing entry
    pub overwrites: AtomicU64,
    /// Lookups served
    pub lookups: AtomicU64,
    /// Lookups that found an entry
    pub lookup_hits: AtomicU64,
    /// Entries removed by expiry sweeps
    pub evictions: AtomicU64,
    /// Sweeps performed
    pub sweeps: AtomicU64,
}

impl RegistryStats {
    /// Create a snapshot of current stats
    pub fn snapshot(&self) -> RegistryStatsSnapshot {
        RegistryStatsSnapshot {
            registrations: self.registrations.load(Ordering::Relaxed),
            overwrites: self.overwrites.load(Ordering::Relaxed),
            lookups: self.lookups.load(Ordering::Relaxed),
            lookup_hits: self.lookup_hits.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            sweeps: self.sweeps.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of registry statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryStatsSnapshot {
    pub registrations: u64,
    pub overwrites: u64,
    pub lookups: u64,
    pub lookup_hits: u64,
    pub evictions: u64,
    pub sweeps: u64,
}

impl RegistryStatsSnapshot {
    /// Lookups that found nothing
    pub fn lookup_misses(&self) -> u64 {
        self.lookups.saturating_sub(self.lookup_hits)
    }
}

// =============================================================================
// Code Registry
// =============================================================================

/// Thread-safe store of [`Entry`] records keyed by [`Code`]
#[derive(Debug, Default)]
pub struct CodeRegistry {
    entries: RwLock<HashMap<Code, Entry>>,
    stats: RegistryStats,
}

impl CodeRegistry {
    /// Create a new, empty registry
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Insert or overwrite the entry for `code`, stamped with the current time.
    ///
    /// Returns `true` when an existing entry was replaced.
    pub fn put(
        &self,
        code: impl Into<Code>,
        virtual_address: impl Into<String>,
        public_address: impl Into<String>,
    ) -> bool {
        self.put_at(code, virtual_address, public_address, Utc::now())
    }

    /// Insert or overwrite the entry for `code` with an explicit timestamp
    pub fn put_at(
        &self,
        code: impl Into<Code>,
        virtual_address: impl Into<String>,
        public_address: impl Into<String>,
        registered_at: DateTime<Utc>,
    ) -> bool {
        let code = code.into();
        let entry = Entry {
            code: code.clone(),
            virtual_address: virtual_address.into(),
            public_address: public_address.into(),
            registered_at,
        };

        let replaced = self.entries.write().insert(code, entry).is_some();

        self.stats.registrations.fetch_add(1, Ordering::Relaxed);
        if replaced {
            self.stats.overwrites.fetch_add(1, Ordering::Relaxed);
        }
        replaced
    }

    /// Current entry for `code`, whether or not it is logically expired
    pub fn get(&self, code: &str) -> Option<Entry> {
        let entry = self.entries.read().get(code).cloned();
        self.record_lookup(entry.is_some());
        entry
    }

    /// Current entry for `code`, or `None` if it is older than `ttl`.
    ///
    /// An expired entry is left in place for the sweeper to remove.
    pub fn get_fresh(&self, code: &str, ttl: Duration, now: DateTime<Utc>) -> Option<Entry> {
        let entry = self
            .entries
            .read()
            .get(code)
            .filter(|entry| !entry.is_expired(ttl, now))
            .cloned();
        self.record_lookup(entry.is_some());
        entry
    }

    /// Remove every entry older than `ttl` at `now`; returns how many went
    pub fn evict_expired(&self, ttl: Duration, now: DateTime<Utc>) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();

        entries.retain(|code, entry| {
            let expired = entry.is_expired(ttl, now);
            if expired {
                debug!("Code expired: {} (age {:?})", code, entry.age(now));
            }
            !expired
        });

        let evicted = before - entries.len();
        drop(entries);

        self.stats.sweeps.fetch_add(1, Ordering::Relaxed);
        self.stats
            .evictions
            .fetch_add(evicted as u64, Ordering::Relaxed);
        evicted
    }

    /// Number of entries currently held
    pub fn size(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Check if a code is present, without counting as a lookup
    pub fn contains(&self, code: &str) -> bool {
        self.entries.read().contains_key(code)
    }

    /// Get lifetime statistics
    pub fn stats(&self) -> RegistryStatsSnapshot {
        self.stats.snapshot()
    }

    fn record_lookup(&self, hit: bool) {
        self.stats.lookups.fetch_add(1, Ordering::Relaxed);
        if hit {
            self.stats.lookup_hits.fetch_add(1, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn minutes(n: i64) -> chrono::Duration {
        chrono::Duration::minutes(n)
    }

    #[test]
    fn test_put_then_get() {
        let registry = CodeRegistry::new();

        let replaced = registry.put("ABC123", "10.0.0.5", "203.0.113.9");
        assert!(!replaced);

        let entry = registry.get("ABC123").unwrap();
        assert_eq!(entry.code.as_str(), "ABC123");
        assert_eq!(entry.virtual_address, "10.0.0.5");
        assert_eq!(entry.public_address, "203.0.113.9");
        assert_eq!(registry.size(), 1);
    }

    #[test]
    fn test_reregistration_overwrites() {
        let registry = CodeRegistry::new();
        let earlier = Utc::now() - minutes(10);

        registry.put_at("ABC123", "10.0.0.5", "203.0.113.9", earlier);
        let replaced = registry.put("ABC123", "10.0.0.7", "198.51.100.1");
        assert!(replaced);

        let entry = registry.get("ABC123").unwrap();
        assert_eq!(entry.virtual_address, "10.0.0.7");
        assert_eq!(entry.public_address, "198.51.100.1");
        assert!(entry.registered_at > earlier);
        assert_eq!(registry.size(), 1);

        let stats = registry.stats();
        assert_eq!(stats.registrations, 2);
        assert_eq!(stats.overwrites, 1);
    }

    #[test]
    fn test_get_unknown_code() {
        let registry = CodeRegistry::new();
        registry.put("ABC123", "10.0.0.5", "203.0.113.9");

        assert_matches!(registry.get("ZZZ"), None);

        let stats = registry.stats();
        assert_eq!(stats.lookups, 1);
        assert_eq!(stats.lookup_hits, 0);
        assert_eq!(stats.lookup_misses(), 1);
    }

    #[test]
    fn test_get_serves_stale_entries() {
        let registry = CodeRegistry::new();
        registry.put_at("OLD", "10.0.0.1", "203.0.113.1", Utc::now() - minutes(32));

        // Expired but not yet swept: still visible through `get`.
        assert!(registry.get("OLD").is_some());
    }

    #[test]
    fn test_get_fresh_hides_expired_entries() {
        let registry = CodeRegistry::new();
        let now = Utc::now();
        registry.put_at("OLD", "10.0.0.1", "203.0.113.1", now - minutes(32));
        registry.put_at("NEW", "10.0.0.2", "203.0.113.2", now - minutes(5));

        assert!(registry.get_fresh("OLD", DEFAULT_CODE_TTL, now).is_none());
        assert!(registry.get_fresh("NEW", DEFAULT_CODE_TTL, now).is_some());

        // Left in place for the sweeper.
        assert!(registry.contains("OLD"));
        assert_eq!(registry.size(), 2);
    }

    #[test]
    fn test_evict_expired() {
        let registry = CodeRegistry::new();
        let now = Utc::now();
        registry.put_at("OLD-1", "10.0.0.1", "203.0.113.1", now - minutes(31));
        registry.put_at("OLD-2", "10.0.0.2", "203.0.113.2", now - minutes(90));
        registry.put_at("NEW", "10.0.0.3", "203.0.113.3", now - minutes(29));

        let evicted = registry.evict_expired(DEFAULT_CODE_TTL, now);
        assert_eq!(evicted, 2);
        assert_eq!(registry.size(), 1);
        assert!(registry.get("OLD-1").is_none());
        assert!(registry.get("NEW").is_some());

        // Idempotent
        assert_eq!(registry.evict_expired(DEFAULT_CODE_TTL, now), 0);

        let stats = registry.stats();
        assert_eq!(stats.evictions, 2);
        assert_eq!(stats.sweeps, 2);
    }

    #[test]
    fn test_entry_exactly_at_ttl_survives() {
        let registry = CodeRegistry::new();
        let now = Utc::now();
        registry.put_at("EDGE", "10.0.0.1", "203.0.113.1", now - minutes(30));

        assert_eq!(registry.evict_expired(DEFAULT_CODE_TTL, now), 0);
        assert!(registry
            .get_fresh("EDGE", DEFAULT_CODE_TTL, now)
            .is_some());
    }

    #[test]
    fn test_future_timestamp_is_not_expired() {
        let now = Utc::now();
        let entry = Entry {
            code: Code::new("SKEW"),
            virtual_address: "10.0.0.1".into(),
            public_address: "203.0.113.1".into(),
            registered_at: now + minutes(5),
        };
        assert_eq!(entry.age(now), Duration::ZERO);
        assert!(!entry.is_expired(DEFAULT_CODE_TTL, now));
    }

    #[test]
    fn test_size_counts_distinct_codes() {
        let registry = CodeRegistry::new();
        assert!(registry.is_empty());

        registry.put("A", "10.0.0.1", "203.0.113.1");
        registry.put("B", "10.0.0.2", "203.0.113.2");
        registry.put("A", "10.0.0.3", "203.0.113.3");

        assert_eq!(registry.size(), 2);
    }

    #[test]
    fn test_concurrent_put_and_get() {
        let registry = CodeRegistry::new();

        let handles: Vec<_> = (0..8)
            .map(|worker| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    for i in 0..100 {
                        let code = format!("code-{}-{}", worker, i);
                        registry.put(code.as_str(), format!("10.0.{}.{}", worker, i), "203.0.113.9");
                        let entry = registry.get(&code).unwrap();
                        assert_eq!(entry.virtual_address, format!("10.0.{}.{}", worker, i));
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(registry.size(), 800);
        assert_eq!(registry.stats().lookup_hits, 800);
    }

    #[test]
    fn test_config_validation() {
        assert!(RegistryConfig::default().validate().is_ok());

        let config = RegistryConfig {
            ttl: Duration::ZERO,
            ..Default::default()
        };
        assert_matches!(config.validate(), Err(Error::Configuration(_)));

        let config = RegistryConfig {
            sweep_interval: Duration::ZERO,
            ..Default::default()
        };
        assert_matches!(config.validate(), Err(Error::Configuration(_)));
    }
}
