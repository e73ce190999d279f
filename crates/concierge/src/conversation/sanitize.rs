//! Input normalization and sensitive-data masking

use regex::Regex;
use std::sync::LazyLock;

/// Pattern and replacement, applied in order
static MASKS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    [
        (r"(?i)\b(password|passwd|pwd)(\s*[:=]\s*)\S+", "${1}${2}[MASKED]"),
        (r"\b[\w.+-]+@[\w-]+(?:\.[\w-]+)+\b", "[EMAIL MASKED]"),
        (r"\b(?:\d{4}[ -]){3}\d{4}\b", "[CARD MASKED]"),
        (r"\b\d{16}\b", "[ID MASKED]"),
        (r"(?:\+62|\b62|\b0)\d{9,12}\b", "[PHONE MASKED]"),
    ]
    .into_iter()
    .filter_map(|(pattern, replacement)| Regex::new(pattern).ok().map(|re| (re, replacement)))
    .collect()
});

/// Collapse whitespace runs to single spaces and trim
pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Replace passwords, 16-digit ids, e-mail addresses, card and phone numbers
pub fn mask_sensitive_data(text: &str) -> String {
    MASKS.iter().fold(text.to_string(), |acc, (re, replacement)| {
        re.replace_all(&acc, *replacement).into_owned()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_whitespace() {
        assert_eq!(normalize_whitespace("  a \n\t b  "), "a b");
    }

    #[test]
    fn test_masks_password_keeping_label() {
        assert_eq!(
            mask_sensitive_data("my password: hunter2 is not working"),
            "my password: [MASKED] is not working"
        );
        assert_eq!(mask_sensitive_data("PWD=abc123"), "PWD=[MASKED]");
    }

    #[test]
    fn test_masks_identifiers() {
        assert_eq!(mask_sensitive_data("id 3201234567890123"), "id [ID MASKED]");
        assert_eq!(
            mask_sensitive_data("card 4111 1111 1111 1111"),
            "card [CARD MASKED]"
        );
        assert_eq!(
            mask_sensitive_data("mail jane.doe@example.co.id please"),
            "mail [EMAIL MASKED] please"
        );
        assert_eq!(mask_sensitive_data("call 081234567890"), "call [PHONE MASKED]");
        assert_eq!(mask_sensitive_data("call +6281234567890"), "call [PHONE MASKED]");
    }

    #[test]
    fn test_plain_text_untouched() {
        let text = "I cannot export the 2024 report";
        assert_eq!(mask_sensitive_data(text), text);
    }
}
