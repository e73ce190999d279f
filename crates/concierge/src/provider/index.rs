//! In-process knowledge-base index
//!
//! Brute-force cosine search over stored passages. Suitable for small
//! knowledge bases and tests; larger deployments plug their own
//! `RetrievalProvider` into the engine.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::cmp::Ordering;
use std::collections::HashMap;

use crate::provider::{ProviderError, RetrievalProvider, RetrievedPassage};

#[derive(Debug, Clone)]
struct IndexedPassage {
    text: String,
    metadata: HashMap<String, String>,
    vector: Vec<f32>,
}

/// Vector index held in memory
#[derive(Debug, Default)]
pub struct InMemoryIndex {
    passages: RwLock<Vec<IndexedPassage>>,
}

impl InMemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a passage with its precomputed embedding
    pub fn insert(&self, text: impl Into<String>, metadata: HashMap<String, String>, vector: Vec<f32>) {
        self.passages.write().push(IndexedPassage {
            text: text.into(),
            metadata,
            vector,
        });
    }

    pub fn len(&self) -> usize {
        self.passages.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl RetrievalProvider for InMemoryIndex {
    async fn search_similar(
        &self,
        query_vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<RetrievedPassage>, ProviderError> {
        let passages = self.passages.read();
        let mut scored: Vec<RetrievedPassage> = passages
            .iter()
            .map(|p| RetrievedPassage {
                document_text: p.text.clone(),
                metadata: p.metadata.clone(),
                similarity: cosine_similarity(query_vector, &p.vector),
            })
            .collect();

        scored.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(Ordering::Equal)
        });
        scored.truncate(top_k);
        Ok(scored)
    }
}

/// Cosine similarity clamped to [-1, 1]; mismatched or zero vectors score 0
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    (dot / (norm_a * norm_b)).clamp(-1.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity_identical_and_orthogonal() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![0.0, 1.0, 0.0];
        assert!((cosine_similarity(&a, &a) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_mismatched_lengths() {
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }

    #[tokio::test]
    async fn test_search_orders_closest_first_and_truncates() {
        let index = InMemoryIndex::new();
        index.insert("far", HashMap::new(), vec![0.0, 1.0]);
        index.insert("exact", HashMap::new(), vec![1.0, 0.0]);
        index.insert("near", HashMap::new(), vec![0.9, 0.1]);

        let results = index.search_similar(&[1.0, 0.0], 2).await.unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].document_text, "exact");
        assert_eq!(results[1].document_text, "near");
        assert!(results[0].similarity >= results[1].similarity);
    }

    #[tokio::test]
    async fn test_search_empty_index() {
        let index = InMemoryIndex::new();
        assert!(index.is_empty());
        let results = index.search_similar(&[1.0], 5).await.unwrap();
        assert!(results.is_empty());
    }
}
