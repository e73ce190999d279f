//! Intent labels, suggestions and fallback replies

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// What the user is trying to do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    LoginIssue,
    DocumentIssue,
    ReportIssue,
    TechnicalIssue,
    GeneralInquiry,
    Complaint,
    Praise,
    FeatureRequest,
    HelpRequest,
}

#[derive(Error, Debug, Clone, PartialEq)]
#[error("Unknown intent label: {0}")]
pub struct UnknownIntent(pub String);

impl Intent {
    pub const ALL: [Intent; 9] = [
        Intent::LoginIssue,
        Intent::DocumentIssue,
        Intent::ReportIssue,
        Intent::TechnicalIssue,
        Intent::GeneralInquiry,
        Intent::Complaint,
        Intent::Praise,
        Intent::FeatureRequest,
        Intent::HelpRequest,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::LoginIssue => "login_issue",
            Intent::DocumentIssue => "document_issue",
            Intent::ReportIssue => "report_issue",
            Intent::TechnicalIssue => "technical_issue",
            Intent::GeneralInquiry => "general_inquiry",
            Intent::Complaint => "complaint",
            Intent::Praise => "praise",
            Intent::FeatureRequest => "feature_request",
            Intent::HelpRequest => "help_request",
        }
    }

    /// One-line description used in the classification prompt
    pub fn description(&self) -> &'static str {
        match self {
            Intent::LoginIssue => "cannot sign in or access an account",
            Intent::DocumentIssue => "problems uploading, filling in or validating documents",
            Intent::ReportIssue => "problems generating, exporting or submitting reports",
            Intent::TechnicalIssue => "errors, slowness or other technical faults",
            Intent::GeneralInquiry => "general questions about the service",
            Intent::Complaint => "dissatisfaction with the service",
            Intent::Praise => "thanks or positive feedback",
            Intent::FeatureRequest => "asking for new functionality",
            Intent::HelpRequest => "asking how to do something",
        }
    }

    /// Whether this intent describes a problem that still needs solving
    pub fn is_issue(&self) -> bool {
        match self {
            Intent::LoginIssue
            | Intent::DocumentIssue
            | Intent::ReportIssue
            | Intent::TechnicalIssue
            | Intent::Complaint
            | Intent::HelpRequest => true,
            Intent::GeneralInquiry | Intent::Praise | Intent::FeatureRequest => false,
        }
    }

    /// Follow-up actions offered to the user
    pub fn suggestions(&self) -> &'static [&'static str] {
        match self {
            Intent::LoginIssue => &[
                "Reset password",
                "Login guide",
                "Contact an administrator",
                "Check system status",
            ],
            Intent::DocumentIssue => &[
                "Download the document template",
                "Upload guide",
                "Validate document data",
                "Contact the documents team",
            ],
            Intent::ReportIssue => &[
                "Report format",
                "Reporting schedule",
                "Validate a report",
                "Contact the reporting team",
            ],
            Intent::TechnicalIssue => &[
                "Clear browser cache",
                "Try another browser",
                "Check system status",
                "Contact technical support",
            ],
            Intent::Complaint => &[
                "Talk to a support agent",
                "Submit a formal complaint",
                "Check ticket status",
            ],
            Intent::Praise => &["Rate this conversation", "Explore more features"],
            Intent::FeatureRequest => &[
                "Submit a feature request",
                "View the product roadmap",
            ],
            Intent::HelpRequest => &["User guide", "Video tutorials", "Contact support"],
            Intent::GeneralInquiry => &["FAQ", "User guide", "Video tutorials", "Contact support"],
        }
    }

    /// Reply used when generation fails
    pub fn fallback_response(&self) -> &'static str {
        match self {
            Intent::LoginIssue => {
                "For sign-in problems, please check that your username and password are correct, \
                 confirm your internet connection, clear your browser cache and try another browser. \
                 If it still fails, an administrator can reset your account."
            }
            Intent::DocumentIssue => {
                "Document uploads usually fail because of a wrong file format, a file that is too \
                 large or a template that does not match. Please check these and try again."
            }
            Intent::ReportIssue => {
                "For report problems, please check the reporting period and reduce the amount of \
                 data in a single export. The reporting team can help if the issue persists."
            }
            Intent::TechnicalIssue => {
                "Please try refreshing the page, clearing your browser cache, restarting the browser \
                 and checking your internet connection."
            }
            Intent::Complaint => {
                "I'm sorry about this experience. I'm passing your conversation to our support team \
                 so a person can follow up with you."
            }
            Intent::Praise => "Thank you for the kind words! Is there anything else I can help with?",
            Intent::FeatureRequest => {
                "Thanks for the suggestion. I've noted it for the product team."
            }
            Intent::HelpRequest | Intent::GeneralInquiry => {
                "I'm sorry, I couldn't find a precise answer right now. Please contact our support \
                 team for further help."
            }
        }
    }

    /// Map free-form classifier output onto an intent.
    ///
    /// Tries the whole text, then its first line and first word as exact
    /// labels. Failing that, the earliest label mentioned without a
    /// negation in front of it wins, else `GeneralInquiry`.
    pub fn from_model_output(raw: &str) -> Intent {
        let first_line = raw.trim().lines().next().unwrap_or("");
        let first_word = first_line
            .split(|c: char| c.is_whitespace() || matches!(c, ',' | ';' | ':'))
            .next()
            .unwrap_or("");

        for candidate in [raw, first_line, first_word] {
            if let Ok(intent) = normalize_label(candidate).parse::<Intent>() {
                return intent;
            }
        }

        let normalized = normalize_label(raw);
        Intent::ALL
            .iter()
            .filter_map(|intent| {
                normalized
                    .match_indices(intent.as_str())
                    .map(|(pos, _)| pos)
                    .find(|pos| !is_negated(&normalized[..*pos]))
                    .map(|pos| (pos, *intent))
            })
            .min_by_key(|(pos, _)| *pos)
            .map(|(_, intent)| intent)
            .unwrap_or(Intent::GeneralInquiry)
    }
}

const NEGATIONS: [&str; 5] = ["not", "no", "never", "isn't", "isnt"];

/// Whether one of the two words before a mention negates it
fn is_negated(prefix: &str) -> bool {
    prefix
        .split(|c: char| !(c.is_alphanumeric() || c == '\''))
        .filter(|w| !w.is_empty())
        .rev()
        .take(2)
        .any(|w| NEGATIONS.contains(&w))
}

fn normalize_label(raw: &str) -> String {
    raw.trim()
        .trim_matches(|c: char| c == '"' || c == '\'' || c == '`' || c == '.')
        .to_lowercase()
        .chars()
        .map(|c| if c.is_whitespace() || c == '-' { '_' } else { c })
        .collect()
}

impl FromStr for Intent {
    type Err = UnknownIntent;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Intent::ALL
            .iter()
            .find(|intent| intent.as_str() == s)
            .copied()
            .ok_or_else(|| UnknownIntent(s.to_string()))
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
