//! Collaborator contracts for embedding, retrieval and generation
//!
//! The conversation engine only talks to these traits. `remote` implements
//! the embedding and generation contracts for OpenAI-compatible HTTP APIs;
//! `index` is an in-process cosine-similarity retrieval provider.

pub mod index;
pub mod remote;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

pub use index::InMemoryIndex;
pub use remote::{RemoteEmbeddingProvider, RemoteGenerationProvider};

/// Errors reported by a provider call
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProviderError {
    /// Network failure, timeout, rate limit or 5xx. Safe to retry.
    #[error("Transient provider error: {0}")]
    Transient(String),

    /// The provider refused the request (bad key, bad model, 4xx)
    #[error("Provider rejected request: {0}")]
    Rejected(String),

    /// The provider answered with something we cannot use
    #[error("Invalid provider response: {0}")]
    InvalidResponse(String),
}

impl ProviderError {
    /// Whether a retry may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, ProviderError::Transient(_))
    }
}

/// An embedding vector and the tokens billed for it
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding {
    pub vector: Vec<f32>,
    pub tokens_used: u32,
}

/// Trait for embedding backends
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a single text
    async fn embed(&self, text: &str) -> Result<Embedding, ProviderError> {
        self.embed_batch(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::InvalidResponse("Empty embedding response".to_string()))
    }

    /// Embed several texts in one call. The result is in input order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Embedding>, ProviderError>;

    /// Model identifier, used for cache namespacing and cost lookup
    fn model(&self) -> &str;
}

/// A knowledge-base passage returned by a similarity search
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedPassage {
    pub document_text: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    pub similarity: f32,
}

/// Trait for similarity-search backends
#[async_trait]
pub trait RetrievalProvider: Send + Sync {
    /// Return up to `top_k` passages ordered closest-first
    async fn search_similar(
        &self,
        query_vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<RetrievedPassage>, ProviderError>;
}

/// Parameters for a single completion
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub prompt: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

/// Completion text and the tokens billed for it
#[derive(Debug, Clone, PartialEq)]
pub struct Generation {
    pub text: String,
    pub tokens_used: u32,
}

/// Trait for text-generation backends
#[async_trait]
pub trait GenerationProvider: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> Result<Generation, ProviderError>;

    /// Model identifier for cost lookup
    fn model(&self) -> &str;
}

/// Rough token estimate for providers that do not report usage
pub fn estimate_tokens(text: &str) -> u32 {
    (text.chars().count() as u32).div_ceil(4)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_transient_errors_retry() {
        assert!(ProviderError::Transient("timeout".into()).is_transient());
        assert!(!ProviderError::Rejected("401".into()).is_transient());
        assert!(!ProviderError::InvalidResponse("bad json".into()).is_transient());
    }

    #[test]
    fn test_estimate_tokens_rounds_up() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abc"), 1);
        assert_eq!(estimate_tokens("abcdefgh"), 2);
        assert_eq!(estimate_tokens("abcdefghi"), 3);
    }
}
