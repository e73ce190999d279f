//! Retrieved-context assembly

use crate::provider::RetrievedPassage;

/// Separator between passages; counts against the budget
pub const CONTEXT_SEPARATOR: &str = "\n\n---\n\n";

/// Context handed to the reply prompt
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssembledContext {
    pub text: String,
    /// Passages that contributed, in order
    pub passages_used: usize,
    pub truncated: bool,
}

impl AssembledContext {
    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

/// Join passages at or above `threshold` closest-first, keeping at most
/// `top_k` of them and at most `max_chars` characters in total. The passage
/// that crosses the budget is cut to fit; later ones are dropped.
pub fn assemble_context(
    passages: &[RetrievedPassage],
    threshold: f32,
    top_k: usize,
    max_chars: usize,
) -> AssembledContext {
    let mut accepted: Vec<&RetrievedPassage> = passages
        .iter()
        .filter(|p| p.similarity >= threshold)
        .collect();
    // Stable: ties keep provider order
    accepted.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    accepted.truncate(top_k);

    let separator_len = CONTEXT_SEPARATOR.chars().count();
    let mut context = AssembledContext::default();
    let mut used = 0usize;

    for passage in accepted {
        let text = passage.document_text.trim();
        if text.is_empty() {
            continue;
        }

        let needed = if context.passages_used == 0 { 0 } else { separator_len };
        if used + needed >= max_chars {
            context.truncated = true;
            break;
        }

        let room = max_chars - used - needed;
        let len = text.chars().count();
        if context.passages_used > 0 {
            context.text.push_str(CONTEXT_SEPARATOR);
        }
        if len <= room {
            context.text.push_str(text);
            used += needed + len;
            context.passages_used += 1;
        } else {
            context.text.extend(text.chars().take(room));
            context.passages_used += 1;
            context.truncated = true;
            break;
        }
    }

    context
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn passage(text: &str, similarity: f32) -> RetrievedPassage {
        RetrievedPassage {
            document_text: text.to_string(),
            metadata: HashMap::new(),
            similarity,
        }
    }

    #[test]
    fn test_threshold_filters_passages() {
        let passages = vec![passage("good", 0.9), passage("weak", 0.5)];
        let context = assemble_context(&passages, 0.7, 5, 2000);
        assert_eq!(context.text, "good");
        assert_eq!(context.passages_used, 1);
        assert!(!context.truncated);
    }

    #[test]
    fn test_closest_first_and_top_k() {
        let passages = vec![passage("b", 0.8), passage("a", 0.95), passage("c", 0.75)];
        let context = assemble_context(&passages, 0.7, 2, 2000);
        assert_eq!(context.text, format!("a{CONTEXT_SEPARATOR}b"));
    }

    #[test]
    fn test_budget_truncates_last_passage() {
        let passages = vec![passage("0123456789", 0.9), passage("abcdefghij", 0.8)];
        let budget = 10 + CONTEXT_SEPARATOR.chars().count() + 4;
        let context = assemble_context(&passages, 0.0, 5, budget);

        assert_eq!(context.text, format!("0123456789{CONTEXT_SEPARATOR}abcd"));
        assert_eq!(context.text.chars().count(), budget);
        assert!(context.truncated);
        assert_eq!(context.passages_used, 2);
    }

    #[test]
    fn test_first_passage_longer_than_budget() {
        let passages = vec![passage("abcdefghij", 0.9)];
        let context = assemble_context(&passages, 0.0, 5, 3);
        assert_eq!(context.text, "abc");
        assert!(context.truncated);
    }

    #[test]
    fn test_no_room_for_separator_drops_remaining() {
        let passages = vec![passage("abc", 0.9), passage("def", 0.8)];
        let context = assemble_context(&passages, 0.0, 5, 4);
        assert_eq!(context.text, "abc");
        assert_eq!(context.passages_used, 1);
        assert!(context.truncated);
    }

    #[test]
    fn test_nothing_above_threshold() {
        let passages = vec![passage("x", 0.1)];
        assert!(assemble_context(&passages, 0.7, 5, 100).is_empty());
        assert!(assemble_context(&[], 0.7, 5, 100).is_empty());
    }
}
