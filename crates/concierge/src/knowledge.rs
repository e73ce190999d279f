//! Knowledge-base loading
//!
//! A knowledge file is a JSON array of `{"text": ..., "metadata": {...}}`
//! objects. Entries are embedded through the batch dispatcher, so a large
//! file is sent to the provider in batches rather than one text at a time.

use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::info;

use crate::dispatch::BatchDispatcher;
use crate::error::{ConciergeError, Result};
use crate::provider::InMemoryIndex;

/// One passage of the knowledge base
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeEntry {
    pub text: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// Parse a knowledge file
pub fn read_knowledge_file(path: &Path) -> Result<Vec<KnowledgeEntry>> {
    let content = std::fs::read_to_string(path)?;
    let entries: Vec<KnowledgeEntry> = serde_json::from_str(&content)?;
    Ok(entries
        .into_iter()
        .filter(|e| !e.text.trim().is_empty())
        .collect())
}

/// Embed `entries` and add them to `index`. Returns the number indexed.
pub async fn index_knowledge(
    entries: Vec<KnowledgeEntry>,
    dispatcher: &BatchDispatcher,
    index: &InMemoryIndex,
) -> Result<usize> {
    let vectors = try_join_all(entries.iter().map(|e| dispatcher.submit(e.text.clone())))
        .await
        .map_err(ConciergeError::from)?;

    let count = entries.len();
    for (entry, vector) in entries.into_iter().zip(vectors) {
        index.insert(entry.text, entry.metadata, vector);
    }
    info!("Indexed {} knowledge-base passages", count);
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_knowledge_file_skips_blank_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kb.json");
        std::fs::write(
            &path,
            r#"[
                {"text": "Reset your password from the login page.", "metadata": {"topic": "login"}},
                {"text": "   "},
                {"text": "Reports are generated nightly."}
            ]"#,
        )
        .unwrap();

        let entries = read_knowledge_file(&path).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].metadata.get("topic").map(String::as_str), Some("login"));
        assert!(entries[1].metadata.is_empty());
    }

    #[test]
    fn test_read_knowledge_file_rejects_bad_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kb.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(
            read_knowledge_file(&path),
            Err(ConciergeError::Serialization(_))
        ));
    }
}
