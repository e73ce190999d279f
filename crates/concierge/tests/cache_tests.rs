//! Integration tests for the tiered embedding cache

use std::sync::Arc;
use std::time::Duration;

use concierge::cache::{InMemorySharedCache, SharedCacheStore, TieredCache};
use concierge::config::{CacheConfig, MonitorConfig};
use concierge::monitor::{AlertLevel, PerformanceMonitor};
use concierge::testing::FailingSharedCache;

fn config() -> CacheConfig {
    CacheConfig::default()
}

// =============================================================================
// Expiry
// =============================================================================

#[tokio::test]
async fn test_hit_before_ttl_and_miss_after() {
    let cache = TieredCache::new("model-E", &config());
    cache.set("how do I reset my password", vec![0.1, 0.2], Duration::from_millis(40)).await;

    assert_eq!(cache.get("how do I reset my password").await, Some(vec![0.1, 0.2]));

    tokio::time::sleep(Duration::from_millis(80)).await;
    assert_eq!(cache.get("how do I reset my password").await, None);

    let stats = cache.stats();
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.evictions, 1);
    assert!(cache.is_empty());
}

#[tokio::test]
async fn test_sweeper_removes_expired_entries() {
    let cache = Arc::new(TieredCache::new("model-E", &config()));
    cache.set("short lived", vec![1.0], Duration::from_millis(10)).await;
    cache.set("long lived", vec![2.0], Duration::from_secs(60)).await;

    let sweeper = cache.spawn_sweeper(Duration::from_millis(20));
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(cache.len(), 1);
    assert_eq!(cache.get("long lived").await, Some(vec![2.0]));
    sweeper.abort();
}

#[tokio::test]
async fn test_sweeper_stops_when_cache_dropped() {
    let cache = Arc::new(TieredCache::new("model-E", &config()));
    let sweeper = cache.spawn_sweeper(Duration::from_millis(10));
    drop(cache);

    tokio::time::timeout(Duration::from_secs(1), sweeper)
        .await
        .expect("sweeper kept running after the cache was dropped")
        .unwrap();
}

// =============================================================================
// Shared tier
// =============================================================================

#[tokio::test]
async fn test_shared_hit_is_promoted_to_local_tier() {
    let shared = Arc::new(InMemorySharedCache::new());
    let writer = TieredCache::new("model-E", &config()).with_shared(shared.clone());
    let reader = TieredCache::new("model-E", &config()).with_shared(shared.clone());

    writer.set("report status", vec![0.3, 0.4], Duration::from_secs(60)).await;
    assert_eq!(shared.len(), 1);
    assert!(reader.is_empty());

    assert_eq!(reader.get("Report  status").await, Some(vec![0.3, 0.4]));
    assert_eq!(reader.len(), 1);
    assert_eq!(reader.stats().shared_hits, 1);

    // Second read is local
    reader.get("report status").await;
    assert_eq!(reader.stats().shared_hits, 1);
    assert_eq!(reader.stats().hits, 2);
}

#[tokio::test]
async fn test_namespaces_do_not_share_keys() {
    let shared = Arc::new(InMemorySharedCache::new());
    let a = TieredCache::new("model-A", &config()).with_shared(shared.clone());
    let b = TieredCache::new("model-B", &config()).with_shared(shared);

    a.set("hello", vec![1.0], Duration::from_secs(60)).await;
    assert_eq!(b.get("hello").await, None);
}

#[tokio::test]
async fn test_evict_removes_from_both_tiers() {
    let shared = Arc::new(InMemorySharedCache::new());
    let cache = TieredCache::new("model-E", &config()).with_shared(shared.clone());

    cache.set("forget me", vec![1.0], Duration::from_secs(60)).await;
    cache.evict("forget me").await;

    assert!(cache.is_empty());
    assert!(shared.is_empty());
    let key = cache.fingerprint("forget me");
    assert_eq!(shared.get(&key).await.unwrap(), None);
}

#[tokio::test]
async fn test_failing_shared_tier_falls_back_to_local() {
    let shared = Arc::new(FailingSharedCache::new());
    let monitor = Arc::new(PerformanceMonitor::new(MonitorConfig::default()));
    let cache = TieredCache::new("model-E", &config())
        .with_shared(shared.clone())
        .with_monitor(monitor.clone());

    assert_eq!(cache.get("login problem").await, None);
    cache.set("login problem", vec![0.5], Duration::from_secs(60)).await;
    assert_eq!(cache.get("login problem").await, Some(vec![0.5]));

    let stats = cache.stats();
    assert_eq!(stats.shared_errors, 2);
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 1);
    assert_eq!(shared.attempts(), 2);

    let snapshot = monitor.snapshot(None);
    assert_eq!(snapshot.cache_unavailable, 2);
    assert_eq!(snapshot.cache_hits, 1);
    assert!(snapshot
        .alerts
        .iter()
        .any(|a| a.level == AlertLevel::Warning && a.message.contains("Shared cache")));
}

#[tokio::test]
async fn test_estimated_bytes_tracks_entries() {
    let cache = TieredCache::new("model-E", &config());
    cache.set("a", vec![0.0; 8], Duration::from_secs(60)).await;
    let with_one = cache.stats().estimated_bytes;
    assert_eq!(with_one, 8 * 4 + 64);

    cache.evict("a").await;
    assert_eq!(cache.stats().estimated_bytes, 0);
}
