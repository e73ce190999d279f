//! Parsing of classifier output

use regex::Regex;
use std::sync::LazyLock;

static NUMBER: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"[-+]?(?:\d+\.?\d*|\.\d+)").ok());

/// Read a sentiment score from model output.
///
/// Takes the first number in the text and clamps it to [-1, 1]. Output with
/// no usable number scores 0.0.
pub fn parse_sentiment(raw: &str) -> f32 {
    let Some(number) = NUMBER.as_ref() else {
        return 0.0;
    };
    number
        .find(raw)
        .and_then(|m| m.as_str().parse::<f32>().ok())
        .filter(|v| v.is_finite())
        .map(|v| v.clamp(-1.0, 1.0))
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_numbers() {
        assert_eq!(parse_sentiment("0.5"), 0.5);
        assert_eq!(parse_sentiment("-0.8"), -0.8);
        assert_eq!(parse_sentiment("+1"), 1.0);
        assert_eq!(parse_sentiment(".25"), 0.25);
    }

    #[test]
    fn test_number_inside_text() {
        assert_eq!(parse_sentiment("Sentiment: -0.7 (frustrated)"), -0.7);
    }

    #[test]
    fn test_out_of_range_is_clamped() {
        assert_eq!(parse_sentiment("-3"), -1.0);
        assert_eq!(parse_sentiment("42.0"), 1.0);
    }

    #[test]
    fn test_malformed_output_is_neutral() {
        assert_eq!(parse_sentiment(""), 0.0);
        assert_eq!(parse_sentiment("negative"), 0.0);
        assert_eq!(parse_sentiment("NaN"), 0.0);
    }
}
