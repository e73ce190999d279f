//! End-to-end test: index a knowledge file, then answer from it

use std::sync::Arc;

use concierge::config::Config;
use concierge::conversation::{ConversationEngine, EngineServices};
use concierge::knowledge::{index_knowledge, read_knowledge_file};
use concierge::provider::InMemoryIndex;
use concierge::testing::{MockEmbeddingProvider, ScriptedGenerationProvider};

#[tokio::test]
async fn test_indexed_knowledge_is_used_in_replies() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("kb.json");
    std::fs::write(
        &path,
        r#"[
            {"text": "How do I download my monthly report?", "metadata": {"topic": "reports"}},
            {"text": "Documents can be uploaded as PDF files up to 10MB."},
            {"text": "Support is available on weekdays."}
        ]"#,
    )
    .unwrap();

    let mut config = Config::default();
    config.batch.max_wait_ms = 5;
    config.batch.retry_base_delay_ms = 1;

    let embedder = Arc::new(MockEmbeddingProvider::new());
    let generator = Arc::new(ScriptedGenerationProvider::new());
    let index = Arc::new(InMemoryIndex::new());
    let services = EngineServices::build(&config, embedder.clone(), index.clone(), generator.clone());

    let entries = read_knowledge_file(&path).unwrap();
    let indexed = index_knowledge(entries, &services.dispatcher, &index).await.unwrap();
    assert_eq!(indexed, 3);
    assert_eq!(index.len(), 3);
    // All three entries fit in one provider batch
    assert_eq!(embedder.batch_sizes(), vec![3]);

    let engine = ConversationEngine::new(config, services);
    let result = engine
        .process_message("How do I download my monthly report?", "user-1")
        .await
        .unwrap();

    // Identical text: served from cache and matched with similarity 1.0
    assert_eq!(embedder.calls(), 1);
    assert!(result.context_used);
    assert!(generator.reply_prompts()[0].contains("How do I download my monthly report?"));
}
