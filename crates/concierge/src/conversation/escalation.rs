//! Human handoff decision
//!
//! `decide` is a pure function of the current turn and the prior history.
//! Each rule is checked independently; any one of them escalates.

use serde::{Deserialize, Serialize};

use crate::config::EscalationConfig;
use crate::conversation::intent::Intent;
use crate::conversation::sanitize::normalize_whitespace;
use crate::conversation::session::Turn;

/// Why a conversation was escalated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationReason {
    NegativeSentiment,
    RepeatedComplaints,
    UnresolvedAttempts,
    ExplicitRequest,
    Urgent,
    RepeatedMessage,
    /// The reply could not be produced normally
    Degraded,
    /// The session was already handed over and is held there
    Sticky,
}

/// The current turn as seen by the rules
#[derive(Debug, Clone, Copy)]
pub struct EscalationInput<'a> {
    pub message: &'a str,
    pub intent: Intent,
    pub sentiment: f32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EscalationDecision {
    pub should_escalate: bool,
    pub reasons: Vec<EscalationReason>,
}

impl EscalationDecision {
    fn from_reasons(reasons: Vec<EscalationReason>) -> Self {
        Self {
            should_escalate: !reasons.is_empty(),
            reasons,
        }
    }

    /// Add a reason found outside the rule set
    pub fn add(&mut self, reason: EscalationReason) {
        if !self.reasons.contains(&reason) {
            self.reasons.push(reason);
        }
        self.should_escalate = true;
    }
}

/// Evaluate every rule against the current turn and `history` (prior turns,
/// oldest first, not including the current one)
pub fn decide(config: &EscalationConfig, input: EscalationInput<'_>, history: &[&Turn]) -> EscalationDecision {
    let mut reasons = Vec::new();

    if input.sentiment < config.sentiment_threshold {
        reasons.push(EscalationReason::NegativeSentiment);
    }

    if input.intent == Intent::Complaint
        && config.complaint_streak > 0
        && history.len() >= config.complaint_streak
        && history
            .iter()
            .rev()
            .take(config.complaint_streak)
            .all(|t| t.intent == Intent::Complaint)
    {
        reasons.push(EscalationReason::RepeatedComplaints);
    }

    if config.max_failed_attempts > 0 {
        let current_unresolved = is_unresolved(input.intent, input.sentiment, config);
        if current_unresolved {
            let prior = history
                .iter()
                .rev()
                .take_while(|t| is_unresolved(t.intent, t.sentiment, config))
                .count();
            if prior + 1 >= config.max_failed_attempts {
                reasons.push(EscalationReason::UnresolvedAttempts);
            }
        }
    }

    let lowered = input.message.to_lowercase();
    if contains_any_word(&lowered, &config.handoff_keywords) {
        reasons.push(EscalationReason::ExplicitRequest);
    }
    if contains_any_word(&lowered, &config.urgent_keywords) {
        reasons.push(EscalationReason::Urgent);
    }

    if config.repeat_limit > 0 && history.len() >= config.repeat_limit {
        let current = normalize_whitespace(&lowered);
        let repeated = history
            .iter()
            .rev()
            .take(config.repeat_limit)
            .all(|t| normalize_whitespace(&t.user_text.to_lowercase()) == current);
        if repeated {
            reasons.push(EscalationReason::RepeatedMessage);
        }
    }

    EscalationDecision::from_reasons(reasons)
}

/// A turn that raised a problem and did not end on a satisfied note
fn is_unresolved(intent: Intent, sentiment: f32, config: &EscalationConfig) -> bool {
    intent.is_issue() && sentiment < config.resolution_sentiment
}

/// Whole-word keyword match; `lowered` must already be lowercase
fn contains_any_word(lowered: &str, keywords: &[String]) -> bool {
    keywords.iter().any(|keyword| {
        let keyword = keyword.to_lowercase();
        !keyword.is_empty()
            && lowered.match_indices(keyword.as_str()).any(|(start, _)| {
                let end = start + keyword.len();
                let before = lowered[..start].chars().next_back();
                let after = lowered[end..].chars().next();
                !before.is_some_and(char::is_alphanumeric) && !after.is_some_and(char::is_alphanumeric)
            })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn turn(intent: Intent, sentiment: f32) -> Turn {
        turn_with_text("something", intent, sentiment)
    }

    fn turn_with_text(text: &str, intent: Intent, sentiment: f32) -> Turn {
        Turn {
            user_text: text.to_string(),
            assistant_text: "reply".to_string(),
            intent,
            sentiment,
            timestamp: Utc::now(),
        }
    }

    fn input(intent: Intent, sentiment: f32) -> EscalationInput<'static> {
        EscalationInput {
            message: "hello there",
            intent,
            sentiment,
        }
    }

    #[test]
    fn test_negative_complaint_escalates() {
        let decision = decide(&EscalationConfig::default(), input(Intent::Complaint, -0.8), &[]);
        assert!(decision.should_escalate);
        assert_eq!(decision.reasons, vec![EscalationReason::NegativeSentiment]);
    }

    #[test]
    fn test_threshold_is_strict() {
        let decision = decide(&EscalationConfig::default(), input(Intent::Praise, -0.5), &[]);
        assert!(!decision.should_escalate);
    }

    #[test]
    fn test_third_complaint_escalates_regardless_of_sentiment() {
        let config = EscalationConfig {
            max_failed_attempts: 0,
            ..Default::default()
        };
        let prior = [turn(Intent::Complaint, 0.9), turn(Intent::Complaint, 0.9)];
        let history: Vec<&Turn> = prior.iter().collect();

        let decision = decide(&config, input(Intent::Complaint, 0.9), &history);
        assert!(decision.should_escalate);
        assert_eq!(decision.reasons, vec![EscalationReason::RepeatedComplaints]);
    }

    #[test]
    fn test_complaint_streak_must_be_consecutive() {
        let config = EscalationConfig {
            max_failed_attempts: 0,
            ..Default::default()
        };
        let prior = [turn(Intent::Complaint, 0.0), turn(Intent::Praise, 0.0)];
        let history: Vec<&Turn> = prior.iter().collect();

        let decision = decide(&config, input(Intent::Complaint, 0.0), &history);
        assert!(!decision.should_escalate);
    }

    #[test]
    fn test_unresolved_attempts() {
        let prior = [turn(Intent::LoginIssue, 0.0), turn(Intent::LoginIssue, -0.2)];
        let history: Vec<&Turn> = prior.iter().collect();

        let decision = decide(&EscalationConfig::default(), input(Intent::LoginIssue, 0.0), &history);
        assert_eq!(decision.reasons, vec![EscalationReason::UnresolvedAttempts]);

        // Only two unresolved turns in a row
        let decision = decide(&EscalationConfig::default(), input(Intent::LoginIssue, 0.0), &history[1..]);
        assert!(!decision.should_escalate);
    }

    #[test]
    fn test_resolution_breaks_unresolved_run() {
        let prior = [
            turn(Intent::LoginIssue, 0.0),
            turn(Intent::Praise, 0.9),
            turn(Intent::TechnicalIssue, 0.0),
        ];
        let history: Vec<&Turn> = prior.iter().collect();

        let decision = decide(&EscalationConfig::default(), input(Intent::TechnicalIssue, 0.0), &history);
        assert!(!decision.should_escalate);
    }

    #[test]
    fn test_current_turn_resolved_does_not_escalate() {
        let prior = [turn(Intent::LoginIssue, 0.0), turn(Intent::LoginIssue, 0.0)];
        let history: Vec<&Turn> = prior.iter().collect();
        let decision = decide(&EscalationConfig::default(), input(Intent::Praise, 0.8), &history);
        assert!(!decision.should_escalate);
    }

    #[test]
    fn test_explicit_request_and_urgency_keywords() {
        let config = EscalationConfig::default();
        let decision = decide(
            &config,
            EscalationInput {
                message: "URGENT: let me talk to a human",
                intent: Intent::GeneralInquiry,
                sentiment: 0.0,
            },
            &[],
        );
        assert_eq!(
            decision.reasons,
            vec![EscalationReason::ExplicitRequest, EscalationReason::Urgent]
        );

        let decision = decide(
            &config,
            EscalationInput {
                message: "the reagent list is inhuman",
                intent: Intent::GeneralInquiry,
                sentiment: 0.0,
            },
            &[],
        );
        assert!(!decision.should_escalate);
    }

    #[test]
    fn test_indonesian_keywords() {
        let config = EscalationConfig::default();
        let decision = decide(
            &config,
            EscalationInput {
                message: "Tolong segera hubungkan saya dengan admin",
                intent: Intent::GeneralInquiry,
                sentiment: 0.0,
            },
            &[],
        );
        assert_eq!(
            decision.reasons,
            vec![EscalationReason::ExplicitRequest, EscalationReason::Urgent]
        );

        let decision = decide(
            &config,
            EscalationInput {
                message: "saya ingin bicara dengan manusia",
                intent: Intent::GeneralInquiry,
                sentiment: 0.0,
            },
            &[],
        );
        assert_eq!(decision.reasons, vec![EscalationReason::ExplicitRequest]);
    }

    #[test]
    fn test_repeated_message() {
        let prior = [
            turn_with_text("Where is my report?", Intent::GeneralInquiry, 0.0),
            turn_with_text("where is my  report?", Intent::GeneralInquiry, 0.0),
            turn_with_text("WHERE is my report?", Intent::GeneralInquiry, 0.0),
        ];
        let history: Vec<&Turn> = prior.iter().collect();
        let decision = decide(
            &EscalationConfig::default(),
            EscalationInput {
                message: "where is my report?",
                intent: Intent::GeneralInquiry,
                sentiment: 0.0,
            },
            &history,
        );
        assert_eq!(decision.reasons, vec![EscalationReason::RepeatedMessage]);
    }

    #[test]
    fn test_add_marks_escalation_once() {
        let mut decision = EscalationDecision::default();
        decision.add(EscalationReason::Degraded);
        decision.add(EscalationReason::Degraded);
        assert!(decision.should_escalate);
        assert_eq!(decision.reasons, vec![EscalationReason::Degraded]);
    }
}
