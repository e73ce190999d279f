//! Shared (cross-process) cache tier contract
//!
//! A deployment backs this with whatever key/value service it runs; the
//! in-memory implementation serves single-node setups and tests.

use async_trait::async_trait;
use dashmap::DashMap;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Shared tier failures. Never surfaced past `TieredCache`.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CacheError {
    #[error("Shared cache unavailable: {0}")]
    Unavailable(String),
}

/// A vector read from the shared tier and how long it remains valid
#[derive(Debug, Clone, PartialEq)]
pub struct SharedValue {
    pub vector: Vec<f32>,
    pub ttl_remaining: Duration,
}

/// Key/value store shared between cache instances
#[async_trait]
pub trait SharedCacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<SharedValue>, CacheError>;

    async fn set(&self, key: &str, vector: &[f32], ttl: Duration) -> Result<(), CacheError>;

    async fn remove(&self, key: &str) -> Result<(), CacheError>;

    /// Store name for logging
    fn name(&self) -> &'static str;
}

#[derive(Debug)]
struct StoredVector {
    vector: Vec<f32>,
    expires_at: Instant,
}

/// Shared tier kept in process memory
#[derive(Debug, Default)]
pub struct InMemorySharedCache {
    map: DashMap<String, StoredVector>,
}

impl InMemorySharedCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

#[async_trait]
impl SharedCacheStore for InMemorySharedCache {
    async fn get(&self, key: &str) -> Result<Option<SharedValue>, CacheError> {
        let now = Instant::now();
        let Some(entry) = self.map.get(key) else {
            return Ok(None);
        };
        if now >= entry.expires_at {
            drop(entry);
            self.map.remove_if(key, |_, e| now >= e.expires_at);
            return Ok(None);
        }
        Ok(Some(SharedValue {
            vector: entry.vector.clone(),
            ttl_remaining: entry.expires_at - now,
        }))
    }

    async fn set(&self, key: &str, vector: &[f32], ttl: Duration) -> Result<(), CacheError> {
        self.map.insert(
            key.to_string(),
            StoredVector {
                vector: vector.to_vec(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), CacheError> {
        self.map.remove(key);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "in-memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_get_remove() {
        let store = InMemorySharedCache::new();
        store.set("k", &[1.0, 2.0], Duration::from_secs(60)).await.unwrap();

        let value = store.get("k").await.unwrap().unwrap();
        assert_eq!(value.vector, vec![1.0, 2.0]);
        assert!(value.ttl_remaining <= Duration::from_secs(60));

        store.remove("k").await.unwrap();
        assert!(store.get("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_expired_values_are_dropped() {
        let store = InMemorySharedCache::new();
        store.set("k", &[1.0], Duration::from_millis(10)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert!(store.get("k").await.unwrap().is_none());
        assert!(store.is_empty());
    }
}
