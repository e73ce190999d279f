//! Integration tests for the embedding batch dispatcher

use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;

use concierge::cache::TieredCache;
use concierge::config::{BatchConfig, CacheConfig, CostConfig};
use concierge::dispatch::{BatchDispatcher, DispatchError};
use concierge::ledger::{Operation, UsageLedger};
use concierge::provider::ProviderError;
use concierge::testing::{MockEmbeddingProvider, mock_vector};

fn batch_config(batch_size: usize, max_wait_ms: u64) -> BatchConfig {
    BatchConfig {
        batch_size,
        max_wait_ms,
        max_retries: 3,
        retry_base_delay_ms: 1,
        ..Default::default()
    }
}

fn new_cache() -> Arc<TieredCache> {
    Arc::new(TieredCache::new("mock-embedding", &CacheConfig::default()))
}

fn texts(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("question number {i}")).collect()
}

// =============================================================================
// Batching
// =============================================================================

#[tokio::test]
async fn test_batches_never_exceed_batch_size() {
    let provider = Arc::new(MockEmbeddingProvider::new());
    let dispatcher = BatchDispatcher::builder(provider.clone(), new_cache())
        .config(batch_config(4, 200))
        .spawn();

    let inputs = texts(10);
    let results = join_all(inputs.iter().map(|t| dispatcher.submit(t.clone()))).await;

    for (text, result) in inputs.iter().zip(results) {
        assert_eq!(result.unwrap(), mock_vector(text));
    }
    let sizes = provider.batch_sizes();
    assert!(sizes.iter().all(|&n| n <= 4), "batch sizes: {sizes:?}");
    assert_eq!(sizes.iter().sum::<usize>(), 10);
    assert_eq!(dispatcher.stats().largest_provider_batch, 4);
}

#[tokio::test]
async fn test_partial_batch_flushes_after_max_wait() {
    let provider = Arc::new(MockEmbeddingProvider::new());
    let dispatcher = BatchDispatcher::builder(provider.clone(), new_cache())
        .config(batch_config(10, 30))
        .spawn();

    let inputs = texts(3);
    let results = tokio::time::timeout(
        Duration::from_secs(2),
        join_all(inputs.iter().map(|t| dispatcher.submit(t.clone()))),
    )
    .await
    .expect("partial batch was never flushed");

    assert!(results.iter().all(|r| r.is_ok()));
    assert_eq!(provider.batch_sizes(), vec![3]);
}

#[tokio::test]
async fn test_items_queued_during_flush_are_not_dropped() {
    let provider = Arc::new(MockEmbeddingProvider::new().with_delay(Duration::from_millis(50)));
    let dispatcher = Arc::new(
        BatchDispatcher::builder(provider.clone(), new_cache())
            .config(batch_config(2, 10))
            .spawn(),
    );

    let first: Vec<_> = texts(2)
        .into_iter()
        .map(|t| {
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move { dispatcher.submit(t).await })
        })
        .collect();

    // Let the first batch reach the provider, then queue more behind it
    tokio::time::sleep(Duration::from_millis(15)).await;
    let late: Vec<String> = (0..3).map(|i| format!("late question {i}")).collect();
    let second = join_all(late.iter().map(|t| dispatcher.submit(t.clone()))).await;

    for handle in first {
        assert!(handle.await.unwrap().is_ok());
    }
    for (text, result) in late.iter().zip(second) {
        assert_eq!(result.unwrap(), mock_vector(text));
    }

    let sizes = provider.batch_sizes();
    assert_eq!(sizes.iter().sum::<usize>(), 5);
    assert!(sizes.iter().all(|&n| n <= 2));
}

#[tokio::test]
async fn test_duplicate_texts_share_one_provider_slot() {
    let provider = Arc::new(MockEmbeddingProvider::new());
    let dispatcher = BatchDispatcher::builder(provider.clone(), new_cache())
        .config(batch_config(10, 20))
        .spawn();

    let (a, b) = tokio::join!(
        dispatcher.submit("Reset my password"),
        dispatcher.submit("  reset MY password ")
    );

    assert_eq!(a.unwrap(), b.unwrap());
    assert_eq!(provider.batch_sizes(), vec![1]);
}

// =============================================================================
// Cache interaction
// =============================================================================

#[tokio::test]
async fn test_cache_hit_skips_provider() {
    let provider = Arc::new(MockEmbeddingProvider::new());
    let cache = new_cache();
    let dispatcher = BatchDispatcher::builder(provider.clone(), cache.clone())
        .config(batch_config(10, 5))
        .spawn();

    let first = dispatcher.submit("where is my report").await.unwrap();
    let second = dispatcher.submit("where is my report").await.unwrap();

    assert_eq!(first, second);
    assert_eq!(provider.calls(), 1);
    assert_eq!(dispatcher.stats().cache_hits, 1);
    assert_eq!(cache.len(), 1);
}

// =============================================================================
// Retries and failures
// =============================================================================

#[tokio::test]
async fn test_transient_failures_are_retried() {
    let provider = Arc::new(MockEmbeddingProvider::new().fail_times(2));
    let dispatcher = BatchDispatcher::builder(provider.clone(), new_cache())
        .config(batch_config(10, 5))
        .spawn();

    let vector = dispatcher.submit("login help").await.unwrap();

    assert_eq!(vector, mock_vector("login help"));
    assert_eq!(provider.calls(), 3);
    assert_eq!(dispatcher.stats().provider_calls, 3);
}

#[tokio::test]
async fn test_exhausted_retries_fail_every_item() {
    let provider = Arc::new(MockEmbeddingProvider::new().fail_times(10));
    let cache = new_cache();
    let dispatcher = BatchDispatcher::builder(provider.clone(), cache.clone())
        .config(batch_config(10, 10))
        .spawn();

    let inputs = texts(3);
    let results = join_all(inputs.iter().map(|t| dispatcher.submit(t.clone()))).await;

    for result in results {
        assert!(matches!(
            result,
            Err(DispatchError::Provider(ProviderError::Transient(_)))
        ));
    }
    assert_eq!(provider.calls(), 3);
    assert_eq!(dispatcher.stats().failed_batches, 1);
    assert!(cache.is_empty());
}

#[tokio::test]
async fn test_permanent_failure_is_not_retried() {
    let provider = Arc::new(MockEmbeddingProvider::new());
    provider.fail_permanently();
    let dispatcher = BatchDispatcher::builder(provider.clone(), new_cache())
        .config(batch_config(10, 5))
        .spawn();

    let result = dispatcher.submit("anything").await;

    assert!(matches!(
        result,
        Err(DispatchError::Provider(ProviderError::Rejected(_)))
    ));
    assert_eq!(provider.calls(), 1);
}

#[tokio::test]
async fn test_abandoned_waiter_does_not_cancel_batch() {
    let provider = Arc::new(MockEmbeddingProvider::new().with_delay(Duration::from_millis(80)));
    let cache = new_cache();
    let dispatcher = BatchDispatcher::builder(provider.clone(), cache.clone())
        .config(batch_config(10, 5))
        .spawn();

    let (abandoned, patient) = tokio::join!(
        dispatcher.submit_with_timeout("slow question", Duration::from_millis(10)),
        dispatcher.submit("other question")
    );

    assert!(matches!(abandoned, Err(DispatchError::TimedOut(_))));
    assert_eq!(patient.unwrap(), mock_vector("other question"));
    assert_eq!(cache.get("slow question").await, Some(mock_vector("slow question")));
    assert_eq!(dispatcher.stats().texts_sent, 2);
}

// =============================================================================
// Ledger and shutdown
// =============================================================================

#[tokio::test]
async fn test_successful_batch_is_recorded_in_ledger() {
    let provider = Arc::new(MockEmbeddingProvider::new());
    let ledger = Arc::new(UsageLedger::new(&CostConfig::default()));
    let dispatcher = BatchDispatcher::builder(provider, new_cache())
        .config(batch_config(10, 5))
        .ledger(ledger.clone())
        .spawn();

    dispatcher.submit("abcdefgh").await.unwrap();

    let records = ledger.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].operation, Operation::Embedding);
    assert_eq!(records[0].model, "mock-embedding");
    assert_eq!(records[0].tokens_used, 2);
}

#[tokio::test]
async fn test_shutdown_closes_dispatcher() {
    let provider = Arc::new(MockEmbeddingProvider::new());
    let dispatcher = BatchDispatcher::builder(provider.clone(), new_cache())
        .config(batch_config(10, 5))
        .spawn();

    dispatcher.submit("one").await.unwrap();
    dispatcher.shutdown().await;
    assert_eq!(provider.calls(), 1);
}
