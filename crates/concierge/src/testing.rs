//! Test utilities for concierge - mock providers
//!
//! Deterministic stand-ins for the remote services so the request path can
//! be exercised without network access:
//! - `MockEmbeddingProvider`: hash-based vectors, scripted transient failures
//! - `ScriptedGenerationProvider`: canned intent, sentiment and reply text
//! - `StaticRetrievalProvider`: fixed passages, optionally failing
//! - `FailingSharedCache`: a shared cache tier that is always down

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use crate::cache::{CacheError, SharedCacheStore, SharedValue};
use crate::conversation::prompts;
use crate::provider::{
    Embedding, EmbeddingProvider, Generation, GenerationProvider, GenerationRequest,
    ProviderError, RetrievalProvider, RetrievedPassage, estimate_tokens,
};

/// Dimensions of mock vectors
pub const MOCK_DIMENSIONS: usize = 32;

/// Generate a deterministic "embedding" from text using hashing.
/// Values are in [-1, 1].
pub fn mock_vector(text: &str) -> Vec<f32> {
    let mut hasher = DefaultHasher::new();
    text.hash(&mut hasher);
    let seed = hasher.finish();

    (0..MOCK_DIMENSIONS)
        .map(|i| {
            let x = seed
                .wrapping_mul(i as u64 + 1)
                .wrapping_add(0x9e3779b97f4a7c15);
            let normalized = (x as f32) / (u64::MAX as f32);
            (normalized * 2.0) - 1.0
        })
        .collect()
}

/// Embedding provider backed by `mock_vector`
#[derive(Debug)]
pub struct MockEmbeddingProvider {
    model: String,
    delay: Option<Duration>,
    transient_failures: AtomicU32,
    permanent_failure: AtomicBool,
    calls: AtomicU64,
    batch_sizes: Mutex<Vec<usize>>,
}

impl Default for MockEmbeddingProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MockEmbeddingProvider {
    pub fn new() -> Self {
        Self {
            model: "mock-embedding".to_string(),
            delay: None,
            transient_failures: AtomicU32::new(0),
            permanent_failure: AtomicBool::new(false),
            calls: AtomicU64::new(0),
            batch_sizes: Mutex::new(Vec::new()),
        }
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.model = model.to_string();
        self
    }

    /// Sleep this long inside every call
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Fail the next `n` calls with a transient error
    pub fn fail_times(self, n: u32) -> Self {
        self.transient_failures.store(n, Ordering::SeqCst);
        self
    }

    /// Reject every call from now on
    pub fn fail_permanently(&self) {
        self.permanent_failure.store(true, Ordering::SeqCst);
    }

    /// Calls made, failed ones included
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Number of texts in each call, in call order
    pub fn batch_sizes(&self) -> Vec<usize> {
        self.batch_sizes.lock().clone()
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbeddingProvider {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Embedding>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.batch_sizes.lock().push(texts.len());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        if self.permanent_failure.load(Ordering::SeqCst) {
            return Err(ProviderError::Rejected("mock embedding rejected".to_string()));
        }
        let remaining = self.transient_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.transient_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(ProviderError::Transient("mock embedding unavailable".to_string()));
        }

        Ok(texts
            .iter()
            .map(|t| Embedding {
                vector: mock_vector(t),
                tokens_used: estimate_tokens(t),
            })
            .collect())
    }

    fn model(&self) -> &str {
        &self.model
    }
}

#[derive(Debug)]
struct Script {
    intent: String,
    sentiment: String,
    reply: String,
}

/// Generation provider that answers classification prompts and reply
/// prompts with scripted text
#[derive(Debug)]
pub struct ScriptedGenerationProvider {
    model: String,
    script: Mutex<Script>,
    reply_failures: AtomicU32,
    fail_all: AtomicBool,
    prompts: Mutex<Vec<String>>,
}

impl Default for ScriptedGenerationProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedGenerationProvider {
    pub fn new() -> Self {
        Self {
            model: "mock-generation".to_string(),
            script: Mutex::new(Script {
                intent: "general_inquiry".to_string(),
                sentiment: "0.0".to_string(),
                reply: "Happy to help with that.".to_string(),
            }),
            reply_failures: AtomicU32::new(0),
            fail_all: AtomicBool::new(false),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.model = model.to_string();
        self
    }

    /// Raw text returned for intent prompts
    pub fn set_intent(&self, raw: &str) {
        self.script.lock().intent = raw.to_string();
    }

    /// Raw text returned for sentiment prompts
    pub fn set_sentiment(&self, raw: &str) {
        self.script.lock().sentiment = raw.to_string();
    }

    pub fn set_reply(&self, reply: &str) {
        self.script.lock().reply = reply.to_string();
    }

    /// Fail the next `n` reply prompts with a transient error
    pub fn fail_replies(&self, n: u32) {
        self.reply_failures.store(n, Ordering::SeqCst);
    }

    /// Fail every prompt with a transient error
    pub fn set_unavailable(&self, unavailable: bool) {
        self.fail_all.store(unavailable, Ordering::SeqCst);
    }

    /// Every prompt received, in order
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().clone()
    }

    /// Prompts that asked for a reply rather than a classification
    pub fn reply_prompts(&self) -> Vec<String> {
        self.prompts()
            .into_iter()
            .filter(|p| !is_intent_prompt(p) && !is_sentiment_prompt(p))
            .collect()
    }
}

fn is_intent_prompt(prompt: &str) -> bool {
    prompt.starts_with(prompts::INTENT_PROMPT_PREFIX)
}

fn is_sentiment_prompt(prompt: &str) -> bool {
    prompt.starts_with(prompts::SENTIMENT_PROMPT_PREFIX)
}

#[async_trait]
impl GenerationProvider for ScriptedGenerationProvider {
    async fn generate(&self, request: &GenerationRequest) -> Result<Generation, ProviderError> {
        self.prompts.lock().push(request.prompt.clone());

        if self.fail_all.load(Ordering::SeqCst) {
            return Err(ProviderError::Transient("mock generation unavailable".to_string()));
        }

        let text = if is_intent_prompt(&request.prompt) {
            self.script.lock().intent.clone()
        } else if is_sentiment_prompt(&request.prompt) {
            self.script.lock().sentiment.clone()
        } else {
            let remaining = self.reply_failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.reply_failures.store(remaining - 1, Ordering::SeqCst);
                return Err(ProviderError::Transient("mock reply unavailable".to_string()));
            }
            self.script.lock().reply.clone()
        };

        Ok(Generation {
            tokens_used: estimate_tokens(&request.prompt) + estimate_tokens(&text),
            text,
        })
    }

    fn model(&self) -> &str {
        &self.model
    }
}

/// Retrieval provider that returns the same passages for every query
#[derive(Debug, Default)]
pub struct StaticRetrievalProvider {
    passages: Vec<RetrievedPassage>,
    failing: AtomicBool,
    calls: AtomicU64,
}

impl StaticRetrievalProvider {
    pub fn new(passages: Vec<RetrievedPassage>) -> Self {
        Self {
            passages,
            failing: AtomicBool::new(false),
            calls: AtomicU64::new(0),
        }
    }

    /// Build passages from `(text, similarity)` pairs
    pub fn from_pairs(pairs: &[(&str, f32)]) -> Self {
        Self::new(
            pairs
                .iter()
                .map(|(text, similarity)| RetrievedPassage {
                    document_text: text.to_string(),
                    metadata: Default::default(),
                    similarity: *similarity,
                })
                .collect(),
        )
    }

    /// Reject every search while set
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RetrievalProvider for StaticRetrievalProvider {
    async fn search_similar(
        &self,
        _query_vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<RetrievedPassage>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(ProviderError::Rejected("mock index offline".to_string()));
        }
        Ok(self.passages.iter().take(top_k).cloned().collect())
    }
}

/// Shared cache tier that fails every operation
#[derive(Debug, Default)]
pub struct FailingSharedCache {
    attempts: AtomicU64,
}

impl FailingSharedCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::SeqCst)
    }

    fn fail(&self) -> CacheError {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        CacheError::Unavailable("connection refused".to_string())
    }
}

#[async_trait]
impl SharedCacheStore for FailingSharedCache {
    async fn get(&self, _key: &str) -> Result<Option<SharedValue>, CacheError> {
        Err(self.fail())
    }

    async fn set(&self, _key: &str, _vector: &[f32], _ttl: Duration) -> Result<(), CacheError> {
        Err(self.fail())
    }

    async fn remove(&self, _key: &str) -> Result<(), CacheError> {
        Err(self.fail())
    }

    fn name(&self) -> &'static str {
        "failing"
    }
}
