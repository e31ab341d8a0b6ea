//! Dealer routing decision.
//!
//! Rules are checked in priority order and the first match wins:
//! 1. Explicit human-handoff request → routed, "User decided"
//! 2. All target fields captured → routed, "call completed"
//! 3. Comprehension failure → routed, "Unable to understand answers"
//! 4. Some fields captured → not routed, "Partial information collected"
//! 5. Nothing captured → not routed, "No information collected"

use crate::config::AnalysisConfig;
use crate::outcome::attempts::FieldAttempts;
use crate::records::model::{ConversationTurn, LeadField, LeadFields};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::OnceLock;

pub const REASON_USER_DECIDED: &str = "User decided";
pub const REASON_COMPLETED: &str = "call completed";
pub const REASON_NOT_UNDERSTOOD: &str = "Unable to understand answers";
pub const REASON_PARTIAL: &str = "Partial information collected";
pub const REASON_NOTHING: &str = "No information collected";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingDecision {
    pub routed: bool,
    pub reason: String,
}

impl RoutingDecision {
    fn new(routed: bool, reason: &str) -> Self {
        Self {
            routed,
            reason: reason.to_string(),
        }
    }
}

fn handoff_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            r"(?i)\bagent\b",
            r"(?i)\bhuman\b",
            r"(?i)\b(real|live|actual) person\b",
            r"(?i)\btalk to (someone|somebody|a person)\b",
            r"(?i)\bspeak (to|with)\b",
            r"(?i)\bconnect me\b",
            r"(?i)\brepresentative\b",
            r"(?i)\bexecutive\b",
            r"(?i)\btransfer (me|the call|my call)\b",
        ]
        .into_iter()
        .filter_map(|p| Regex::new(p).ok())
        .collect()
    })
}

fn apology_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            r"(?i)\bsorry\b",
            r"(?i)\bdidn'?t (catch|get|understand)\b",
            r"(?i)\brepeat\b",
            r"(?i)\bsay that again\b",
            r"(?i)\bpardon\b",
        ]
        .into_iter()
        .filter_map(|p| Regex::new(p).ok())
        .collect()
    })
}

/// Number of distinct handoff patterns matched by one utterance.
pub fn handoff_matches(text: &str) -> usize {
    handoff_patterns().iter().filter(|re| re.is_match(text)).count()
}

/// True when some user utterance matches at least `threshold` handoff patterns.
pub fn requested_handoff(conversation: &[ConversationTurn], threshold: usize) -> bool {
    conversation
        .iter()
        .filter(|t| t.is_user())
        .any(|t| handoff_matches(&t.content) >= threshold)
}

/// Assistant utterances that apologise or ask the caller to repeat.
pub fn apology_count(conversation: &[ConversationTurn]) -> usize {
    conversation
        .iter()
        .filter(|t| t.is_assistant())
        .filter(|t| apology_patterns().iter().any(|re| re.is_match(&t.content)))
        .count()
}

/// Mean re-asks per asked field (attempts beyond the first).
pub fn average_reattempts(attempts: &BTreeMap<LeadField, FieldAttempts>) -> f64 {
    if attempts.is_empty() {
        return 0.0;
    }
    let extra: u32 = attempts.values().map(|a| a.count().saturating_sub(1)).sum();
    extra as f64 / attempts.len() as f64
}

pub fn decide_routing(
    conversation: &[ConversationTurn],
    fields: &LeadFields,
    attempts: &BTreeMap<LeadField, FieldAttempts>,
    config: &AnalysisConfig,
) -> RoutingDecision {
    if requested_handoff(conversation, config.handoff_match_threshold) {
        return RoutingDecision::new(true, REASON_USER_DECIDED);
    }

    if fields.all_captured() {
        return RoutingDecision::new(true, REASON_COMPLETED);
    }

    if average_reattempts(attempts) > config.reattempt_limit
        || apology_count(conversation) >= config.apology_threshold
    {
        return RoutingDecision::new(true, REASON_NOT_UNDERSTOOD);
    }

    if !fields.none_captured() {
        return RoutingDecision::new(false, REASON_PARTIAL);
    }

    RoutingDecision::new(false, REASON_NOTHING)
}
