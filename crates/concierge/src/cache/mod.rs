//! Tiered embedding cache
//!
//! Vectors are keyed by a fingerprint of the normalized text. Lookups try a
//! local `DashMap` first, then an optional shared tier; shared hits are
//! promoted into the local tier with whatever TTL they have left. The local
//! tier is trimmed by a periodic sweep rather than by LRU.
//!
//! Shared tier failures are logged and reported to the performance monitor.
//! They never fail a `get` or `set`.

pub mod fingerprint;
pub mod shared;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::CacheConfig;
use crate::monitor::PerformanceMonitor;

pub use shared::{CacheError, InMemorySharedCache, SharedCacheStore, SharedValue};

/// Minimum sweep period accepted by `spawn_sweeper`
const MIN_SWEEP_INTERVAL: Duration = Duration::from_millis(10);

/// A cached vector in the local tier
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub fingerprint: String,
    pub vector: Vec<f32>,
    pub created_at: Instant,
    pub ttl: Duration,
}

impl CacheEntry {
    pub fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.created_at) > self.ttl
    }

    fn size_bytes(&self) -> u64 {
        (self.vector.len() * std::mem::size_of::<f32>() + self.fingerprint.len()) as u64
    }
}

/// Cache counters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub local_entries: usize,
    pub estimated_bytes: u64,
    /// Hits served by the shared tier and promoted locally
    pub shared_hits: u64,
    pub shared_errors: u64,
    /// Entries removed by expiry checks or sweeps
    pub evictions: u64,
}

/// Two-tier cache of embedding vectors
pub struct TieredCache {
    namespace: String,
    local: DashMap<String, CacheEntry>,
    shared: Option<Arc<dyn SharedCacheStore>>,
    monitor: Option<Arc<PerformanceMonitor>>,
    default_ttl: Duration,
    eviction_window: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
    shared_hits: AtomicU64,
    shared_errors: AtomicU64,
    evictions: AtomicU64,
    estimated_bytes: AtomicU64,
}

impl std::fmt::Debug for TieredCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TieredCache")
            .field("namespace", &self.namespace)
            .field("local_entries", &self.local.len())
            .field("shared", &self.shared.as_ref().map(|s| s.name()))
            .finish()
    }
}

impl TieredCache {
    /// Create a local-only cache. `namespace` is usually the embedding model id.
    pub fn new(namespace: impl Into<String>, config: &CacheConfig) -> Self {
        Self {
            namespace: namespace.into(),
            local: DashMap::new(),
            shared: None,
            monitor: None,
            default_ttl: config.ttl(),
            eviction_window: config.eviction_window(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            shared_hits: AtomicU64::new(0),
            shared_errors: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            estimated_bytes: AtomicU64::new(0),
        }
    }

    /// Attach a shared tier
    pub fn with_shared(mut self, shared: Arc<dyn SharedCacheStore>) -> Self {
        self.shared = Some(shared);
        self
    }

    /// Report hits, misses and shared tier outages to `monitor`
    pub fn with_monitor(mut self, monitor: Arc<PerformanceMonitor>) -> Self {
        self.monitor = Some(monitor);
        self
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Key for `text` in this cache's namespace
    pub fn fingerprint(&self, text: &str) -> String {
        fingerprint::fingerprint(&self.namespace, text)
    }

    pub async fn get(&self, text: &str) -> Option<Vec<f32>> {
        let key = self.fingerprint(text);
        self.lookup(&key).await
    }

    pub async fn set(&self, text: &str, vector: Vec<f32>, ttl: Duration) {
        let key = self.fingerprint(text);
        self.store(key, vector, ttl).await;
    }

    /// Look up a precomputed fingerprint
    pub async fn lookup(&self, key: &str) -> Option<Vec<f32>> {
        if let Some(vector) = self.local_get(key, Instant::now()) {
            self.record_outcome(true);
            return Some(vector);
        }

        if let Some(shared) = &self.shared {
            match shared.get(key).await {
                Ok(Some(value)) => {
                    self.shared_hits.fetch_add(1, Ordering::Relaxed);
                    self.local_insert(key.to_string(), value.vector.clone(), value.ttl_remaining);
                    self.record_outcome(true);
                    return Some(value.vector);
                }
                Ok(None) => {}
                Err(e) => self.shared_failed(shared.name(), &e),
            }
        }

        self.record_outcome(false);
        None
    }

    /// Store under a precomputed fingerprint in both tiers
    pub async fn store(&self, key: String, vector: Vec<f32>, ttl: Duration) {
        if let Some(shared) = &self.shared {
            if let Err(e) = shared.set(&key, &vector, ttl).await {
                self.shared_failed(shared.name(), &e);
            }
        }
        self.local_insert(key, vector, ttl);
    }

    /// Drop `text` from both tiers
    pub async fn evict(&self, text: &str) {
        let key = self.fingerprint(text);
        if let Some((_, entry)) = self.local.remove(&key) {
            self.estimated_bytes.fetch_sub(entry.size_bytes(), Ordering::Relaxed);
        }
        if let Some(shared) = &self.shared {
            if let Err(e) = shared.remove(&key).await {
                self.shared_failed(shared.name(), &e);
            }
        }
    }

    /// Remove local entries past their TTL or older than the eviction window.
    /// Returns the number removed.
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let window = self.eviction_window;
        let mut removed = 0usize;

        self.local.retain(|_, entry| {
            let keep = !entry.is_expired(now)
                && now.saturating_duration_since(entry.created_at) <= window;
            if !keep {
                self.estimated_bytes.fetch_sub(entry.size_bytes(), Ordering::Relaxed);
                removed += 1;
            }
            keep
        });

        self.evictions.fetch_add(removed as u64, Ordering::Relaxed);
        removed
    }

    /// Run `sweep_expired` every `every` until the cache is dropped
    pub fn spawn_sweeper(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let cache: Weak<Self> = Arc::downgrade(self);
        let every = every.max(MIN_SWEEP_INTERVAL);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            // First tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(cache) = cache.upgrade() else {
                    break;
                };
                let removed = cache.sweep_expired();
                if removed > 0 {
                    debug!("Cache sweep removed {} entries", removed);
                }
            }
        })
    }

    pub fn len(&self) -> usize {
        self.local.len()
    }

    pub fn is_empty(&self) -> bool {
        self.local.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        CacheStats {
            hits,
            misses,
            hit_rate: if total == 0 {
                0.0
            } else {
                hits as f64 / total as f64
            },
            local_entries: self.local.len(),
            estimated_bytes: self.estimated_bytes.load(Ordering::Relaxed),
            shared_hits: self.shared_hits.load(Ordering::Relaxed),
            shared_errors: self.shared_errors.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }

    fn local_get(&self, key: &str, now: Instant) -> Option<Vec<f32>> {
        let entry = self.local.get(key)?;
        if entry.is_expired(now) {
            drop(entry);
            if let Some((_, old)) = self.local.remove_if(key, |_, e| e.is_expired(now)) {
                self.estimated_bytes.fetch_sub(old.size_bytes(), Ordering::Relaxed);
                self.evictions.fetch_add(1, Ordering::Relaxed);
            }
            return None;
        }
        Some(entry.vector.clone())
    }

    fn local_insert(&self, key: String, vector: Vec<f32>, ttl: Duration) {
        let entry = CacheEntry {
            fingerprint: key.clone(),
            vector,
            created_at: Instant::now(),
            ttl,
        };
        self.estimated_bytes.fetch_add(entry.size_bytes(), Ordering::Relaxed);
        if let Some(old) = self.local.insert(key, entry) {
            self.estimated_bytes.fetch_sub(old.size_bytes(), Ordering::Relaxed);
        }
    }

    fn record_outcome(&self, hit: bool) {
        if hit {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        if let Some(monitor) = &self.monitor {
            monitor.record_cache_outcome(hit);
        }
    }

    fn shared_failed(&self, store: &str, error: &CacheError) {
        self.shared_errors.fetch_add(1, Ordering::Relaxed);
        warn!("Shared cache '{}' failed, using local tier only: {}", store, error);
        if let Some(monitor) = &self.monitor {
            monitor.record_cache_unavailable();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache() -> TieredCache {
        TieredCache::new("test-model", &CacheConfig::default())
    }

    #[tokio::test]
    async fn test_set_then_get() {
        let cache = cache();
        cache.set("hello", vec![0.1, 0.2], Duration::from_secs(60)).await;

        assert_eq!(cache.get("hello").await, Some(vec![0.1, 0.2]));
        assert_eq!(cache.get("  HELLO ").await, Some(vec![0.1, 0.2]));
        assert_eq!(cache.stats().hits, 2);
    }

    #[tokio::test]
    async fn test_miss_counts() {
        let cache = cache();
        assert!(cache.get("unknown").await.is_none());
        let stats = cache.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hit_rate, 0.0);
    }

    #[tokio::test]
    async fn test_estimated_bytes_tracks_inserts_and_replacements() {
        let cache = cache();
        cache.set("a", vec![0.0; 4], Duration::from_secs(60)).await;
        let one = cache.stats().estimated_bytes;
        assert_eq!(one, 16 + 64);

        cache.set("a", vec![0.0; 8], Duration::from_secs(60)).await;
        assert_eq!(cache.stats().estimated_bytes, 32 + 64);

        cache.evict("a").await;
        assert_eq!(cache.stats().estimated_bytes, 0);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_entry_expiry_is_strict() {
        let now = Instant::now();
        let entry = CacheEntry {
            fingerprint: "k".into(),
            vector: vec![],
            created_at: now,
            ttl: Duration::from_secs(1),
        };
        assert!(!entry.is_expired(now));
        assert!(!entry.is_expired(now + Duration::from_secs(1)));
        assert!(entry.is_expired(now + Duration::from_millis(1001)));
    }

    #[tokio::test]
    async fn test_sweep_removes_expired_entries() {
        let cache = cache();
        cache.set("short", vec![1.0], Duration::from_millis(5)).await;
        cache.set("long", vec![1.0], Duration::from_secs(60)).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(cache.sweep_expired(), 1);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.stats().evictions, 1);
    }

    #[tokio::test]
    async fn test_sweep_applies_eviction_window() {
        let config = CacheConfig {
            eviction_window_secs: 0,
            ..Default::default()
        };
        let cache = TieredCache::new("m", &config);
        cache.set("a", vec![1.0], Duration::from_secs(3600)).await;
        tokio::time::sleep(Duration::from_millis(5)).await;

        assert_eq!(cache.sweep_expired(), 1);
        assert!(cache.is_empty());
    }
}
