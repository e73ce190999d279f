//! Prompt templates for classification and replies
//!
//! Placeholders in braces are filled in a single left-to-right pass, so
//! braces inside inserted text are kept as written.

use crate::conversation::intent::Intent;
use crate::conversation::session::Turn;

/// Intent classification prompt
///
/// Placeholders: {intents}, {message}
pub const INTENT_PROMPT: &str = r#"Classify the intent of this customer support message.

Valid intents:
{intents}

Message: {message}

Reply with exactly one intent label from the list and nothing else.
Intent:"#;

/// Sentiment scoring prompt
///
/// Placeholders: {message}
pub const SENTIMENT_PROMPT: &str = r#"Rate the sentiment of this customer support message on a scale from -1.0 (very negative) to 1.0 (very positive).

Message: {message}

Reply with a single number and nothing else.
Sentiment:"#;

/// Leading text of every intent prompt
pub const INTENT_PROMPT_PREFIX: &str = "Classify the intent";

/// Leading text of every sentiment prompt
pub const SENTIMENT_PROMPT_PREFIX: &str = "Rate the sentiment";

/// Standing instructions for replies
pub const SYSTEM_PROMPT: &str = r#"You are a customer support assistant.
Answer accurately, in a friendly and professional tone, using the knowledge base excerpts when they are relevant.
Give step-by-step instructions when the user has a problem to solve.
If the knowledge base does not cover the question, say so and offer to connect the user with a human agent."#;

/// Reply prompt
///
/// Placeholders: {system}, {context}, {history}, {intent}, {sentiment}, {message}
pub const RESPONSE_PROMPT: &str = r#"{system}

Knowledge base:
{context}

Recent conversation:
{history}

Detected intent: {intent}
Detected sentiment: {sentiment}

User: {message}
Assistant:"#;

/// Shown in place of an empty knowledge-base section
const NO_CONTEXT: &str = "(no relevant knowledge base entries)";

/// Shown in place of an empty history section
const NO_HISTORY: &str = "(new conversation)";

pub fn intent_prompt(message: &str) -> String {
    let intents = Intent::ALL
        .iter()
        .map(|i| format!("- {}: {}", i.as_str(), i.description()))
        .collect::<Vec<_>>()
        .join("\n");
    fill(INTENT_PROMPT, &[("intents", intents.as_str()), ("message", message)])
}

pub fn sentiment_prompt(message: &str) -> String {
    fill(SENTIMENT_PROMPT, &[("message", message)])
}

/// Build the reply prompt from context, the most recent turns and the message
pub fn response_prompt(
    context: &str,
    recent_turns: &[&Turn],
    intent: Intent,
    sentiment: f32,
    message: &str,
) -> String {
    let context = if context.is_empty() { NO_CONTEXT } else { context };
    let history = if recent_turns.is_empty() {
        NO_HISTORY.to_string()
    } else {
        recent_turns
            .iter()
            .map(|t| format!("User: {}\nAssistant: {}", t.user_text, t.assistant_text))
            .collect::<Vec<_>>()
            .join("\n")
    };

    let sentiment = format!("{sentiment:.2}");
    fill(
        RESPONSE_PROMPT,
        &[
            ("system", SYSTEM_PROMPT),
            ("context", context),
            ("history", history.as_str()),
            ("intent", intent.as_str()),
            ("sentiment", sentiment.as_str()),
            ("message", message),
        ],
    )
}

/// Substitute `{name}` placeholders in one pass over the template.
///
/// Unknown names are left untouched.
fn fill(template: &str, values: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let value = after.find('}').and_then(|close| {
            let name = &after[..close];
            values
                .iter()
                .find(|(key, _)| *key == name)
                .map(|(_, value)| (*value, close))
        });
        match value {
            Some((value, close)) => {
                out.push_str(value);
                rest = &after[close + 1..];
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}
