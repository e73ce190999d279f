//! Embedding batch dispatcher
//!
//! Concurrent `submit` calls are queued on a channel owned by a single
//! worker task. The worker flushes a batch when it holds `batch_size` texts
//! or when the oldest pending text has waited `max_wait`, whichever comes
//! first. Flushes run one at a time. Whatever queued up while a flush was in
//! flight is flushed straight after it, without waiting for the deadline.
//!
//! Inside a flush every text is checked against the cache first; only misses
//! reach the provider, and identical misses share one provider slot. A batch
//! either resolves all of its misses or fails all of them.

pub mod retry;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cache::TieredCache;
use crate::config::BatchConfig;
use crate::ledger::{Operation, UsageLedger};
use crate::monitor::{LatencyKind, PerformanceMonitor};
use crate::provider::{EmbeddingProvider, ProviderError};

pub use retry::{RetryPolicy, with_backoff};

/// Failures seen by `submit` callers
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DispatchError {
    /// The provider failed for the whole batch
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// The dispatcher worker is gone
    #[error("Dispatcher is shut down")]
    Closed,

    /// The caller stopped waiting
    #[error("Timed out waiting for embedding after {0:?}")]
    TimedOut(Duration),
}

type SlotResult = Result<Vec<f32>, DispatchError>;

/// A queued text and the channel its result goes back on
struct PendingBatchItem {
    text: String,
    request_id: Uuid,
    arrived: Instant,
    result_slot: oneshot::Sender<SlotResult>,
}

impl PendingBatchItem {
    fn resolve(self, result: SlotResult) {
        // A dropped receiver means the caller gave up; nothing to do.
        if self.result_slot.send(result).is_err() {
            debug!(request_id = %self.request_id, "Embedding waiter gone, discarding result");
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    submitted: AtomicU64,
    batches: AtomicU64,
    provider_calls: AtomicU64,
    texts_sent: AtomicU64,
    cache_hits: AtomicU64,
    failed_batches: AtomicU64,
    largest_provider_batch: AtomicU64,
}

/// Dispatcher counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatcherStats {
    pub submitted: u64,
    pub batches: u64,
    /// Provider requests, retries included
    pub provider_calls: u64,
    pub texts_sent: u64,
    pub cache_hits: u64,
    pub failed_batches: u64,
    /// Most texts sent in a single provider request
    pub largest_provider_batch: u64,
}

/// Builder for `BatchDispatcher`
pub struct DispatcherBuilder {
    provider: Arc<dyn EmbeddingProvider>,
    cache: Arc<TieredCache>,
    config: BatchConfig,
    ledger: Option<Arc<UsageLedger>>,
    monitor: Option<Arc<PerformanceMonitor>>,
}

impl DispatcherBuilder {
    pub fn config(mut self, config: BatchConfig) -> Self {
        self.config = config;
        self
    }

    /// Record each successful provider call
    pub fn ledger(mut self, ledger: Arc<UsageLedger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    /// Record provider latency
    pub fn monitor(mut self, monitor: Arc<PerformanceMonitor>) -> Self {
        self.monitor = Some(monitor);
        self
    }

    /// Start the worker task. Must be called inside a Tokio runtime.
    pub fn spawn(self) -> BatchDispatcher {
        let (tx, rx) = mpsc::channel(self.config.queue_capacity.max(1));
        let counters = Arc::new(Counters::default());

        info!(
            "BatchDispatcher started: model={}, batch_size={}, max_wait={:?}, max_retries={}",
            self.provider.model(),
            self.config.batch_size,
            self.config.max_wait(),
            self.config.max_retries
        );

        let worker = Worker {
            retry: RetryPolicy::from_config(&self.config),
            batch_size: self.config.batch_size.max(1),
            max_wait: self.config.max_wait(),
            provider: self.provider.clone(),
            cache: self.cache,
            ledger: self.ledger,
            monitor: self.monitor,
            counters: counters.clone(),
        };
        let handle = tokio::spawn(worker.run(rx));

        BatchDispatcher {
            tx,
            counters,
            model: self.provider.model().to_string(),
            handle,
        }
    }
}

/// Handle for submitting texts to the batching worker
pub struct BatchDispatcher {
    tx: mpsc::Sender<PendingBatchItem>,
    counters: Arc<Counters>,
    model: String,
    handle: JoinHandle<()>,
}

impl std::fmt::Debug for BatchDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchDispatcher")
            .field("model", &self.model)
            .field("stats", &self.stats())
            .finish()
    }
}

impl BatchDispatcher {
    pub fn builder(provider: Arc<dyn EmbeddingProvider>, cache: Arc<TieredCache>) -> DispatcherBuilder {
        DispatcherBuilder {
            provider,
            cache,
            config: BatchConfig::default(),
            ledger: None,
            monitor: None,
        }
    }

    /// Embedding model behind this dispatcher
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Queue `text` and wait for its vector
    pub async fn submit(&self, text: impl Into<String>) -> SlotResult {
        let (slot, result) = oneshot::channel();
        let item = PendingBatchItem {
            text: text.into(),
            request_id: Uuid::new_v4(),
            arrived: Instant::now(),
            result_slot: slot,
        };
        debug!(request_id = %item.request_id, "Queueing embedding request");

        self.tx.send(item).await.map_err(|_| DispatchError::Closed)?;
        self.counters.submitted.fetch_add(1, Ordering::Relaxed);

        result.await.map_err(|_| DispatchError::Closed)?
    }

    /// Like `submit`, but stop waiting after `timeout`. The batch itself
    /// still completes for everyone else.
    pub async fn submit_with_timeout(&self, text: impl Into<String>, timeout: Duration) -> SlotResult {
        tokio::time::timeout(timeout, self.submit(text))
            .await
            .map_err(|_| DispatchError::TimedOut(timeout))?
    }

    pub fn stats(&self) -> DispatcherStats {
        let c = &self.counters;
        DispatcherStats {
            submitted: c.submitted.load(Ordering::Relaxed),
            batches: c.batches.load(Ordering::Relaxed),
            provider_calls: c.provider_calls.load(Ordering::Relaxed),
            texts_sent: c.texts_sent.load(Ordering::Relaxed),
            cache_hits: c.cache_hits.load(Ordering::Relaxed),
            failed_batches: c.failed_batches.load(Ordering::Relaxed),
            largest_provider_batch: c.largest_provider_batch.load(Ordering::Relaxed),
        }
    }

    /// Stop accepting work, flush what is queued and wait for the worker
    pub async fn shutdown(self) {
        let BatchDispatcher { tx, handle, .. } = self;
        drop(tx);
        if let Err(e) = handle.await {
            warn!("Dispatcher worker ended abnormally: {}", e);
        }
    }
}

/// Misses that share a fingerprint
struct MissGroup {
    key: String,
    text: String,
    items: Vec<PendingBatchItem>,
}

struct Worker {
    retry: RetryPolicy,
    batch_size: usize,
    max_wait: Duration,
    provider: Arc<dyn EmbeddingProvider>,
    cache: Arc<TieredCache>,
    ledger: Option<Arc<UsageLedger>>,
    monitor: Option<Arc<PerformanceMonitor>>,
    counters: Arc<Counters>,
}

impl Worker {
    async fn run(self, mut rx: mpsc::Receiver<PendingBatchItem>) {
        let mut pending: Vec<PendingBatchItem> = Vec::new();
        let mut flush_now = false;

        loop {
            if pending.is_empty() {
                match rx.recv().await {
                    Some(item) => pending.push(item),
                    None => break,
                }
            }

            if !flush_now {
                let deadline = pending[0].arrived + self.max_wait;
                while pending.len() < self.batch_size {
                    match tokio::time::timeout_at(deadline, rx.recv()).await {
                        Ok(Some(item)) => pending.push(item),
                        // Closed or deadline reached: flush what we have
                        Ok(None) | Err(_) => break,
                    }
                }
            }

            let take = pending.len().min(self.batch_size);
            let batch: Vec<PendingBatchItem> = pending.drain(..take).collect();
            self.flush(batch).await;

            while let Ok(item) = rx.try_recv() {
                pending.push(item);
            }
            flush_now = !pending.is_empty();
        }

        debug!("BatchDispatcher worker stopped");
    }

    async fn flush(&self, batch: Vec<PendingBatchItem>) {
        self.counters.batches.fetch_add(1, Ordering::Relaxed);
        let batch_len = batch.len();

        let mut groups: Vec<MissGroup> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();

        for item in batch {
            let key = self.cache.fingerprint(&item.text);
            if let Some(&i) = index.get(&key) {
                groups[i].items.push(item);
                continue;
            }
            if let Some(vector) = self.cache.lookup(&key).await {
                self.counters.cache_hits.fetch_add(1, Ordering::Relaxed);
                item.resolve(Ok(vector));
                continue;
            }
            index.insert(key.clone(), groups.len());
            groups.push(MissGroup {
                key,
                text: item.text.clone(),
                items: vec![item],
            });
        }

        if groups.is_empty() {
            debug!("Batch of {} served entirely from cache", batch_len);
            return;
        }

        let texts: Vec<String> = groups.iter().map(|g| g.text.clone()).collect();
        debug!(
            "Flushing batch: {} queued, {} sent to provider",
            batch_len,
            texts.len()
        );

        let started = Instant::now();
        let provider = &self.provider;
        let counters = &self.counters;
        let texts_ref = &texts;
        let result = with_backoff(&self.retry, "Embedding batch", move |_| {
            counters.provider_calls.fetch_add(1, Ordering::Relaxed);
            counters
                .largest_provider_batch
                .fetch_max(texts_ref.len() as u64, Ordering::Relaxed);
            provider.embed_batch(texts_ref)
        })
        .await
        .and_then(|embeddings| {
            if embeddings.len() == texts.len() {
                Ok(embeddings)
            } else {
                Err(ProviderError::InvalidResponse(format!(
                    "Expected {} embeddings, got {}",
                    texts.len(),
                    embeddings.len()
                )))
            }
        });

        if let Some(monitor) = &self.monitor {
            monitor.record_latency(LatencyKind::Embedding, started.elapsed());
        }

        match result {
            Ok(embeddings) => {
                self.counters
                    .texts_sent
                    .fetch_add(texts.len() as u64, Ordering::Relaxed);
                let tokens: u64 = embeddings.iter().map(|e| u64::from(e.tokens_used)).sum();
                if let Some(ledger) = &self.ledger {
                    ledger.record(Operation::Embedding, tokens, self.provider.model());
                }

                let ttl = self.cache.default_ttl();
                for (group, embedding) in groups.into_iter().zip(embeddings) {
                    self.cache
                        .store(group.key, embedding.vector.clone(), ttl)
                        .await;
                    for item in group.items {
                        item.resolve(Ok(embedding.vector.clone()));
                    }
                }
            }
            Err(e) => {
                self.counters.failed_batches.fetch_add(1, Ordering::Relaxed);
                warn!("Embedding batch of {} texts failed: {}", texts.len(), e);
                for group in groups {
                    for item in group.items {
                        item.resolve(Err(DispatchError::Provider(e.clone())));
                    }
                }
            }
        }
    }
}
