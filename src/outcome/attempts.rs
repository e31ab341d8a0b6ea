//! Per-field question attempts reconstructed from the conversation log.
//!
//! An attempt is an assistant utterance immediately followed by a user utterance.
//! The assistant utterance's topic decides which field the attempt belongs to.

use crate::outcome::format_timestamp;
use crate::records::model::{ConversationTurn, LeadField};
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::OnceLock;

/// Timing of one question/answer exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptDetail {
    pub start_time: String,
    pub end_time: String,
    pub sequence: u32,
}

/// All attempts made for one field.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldAttempts {
    /// Text of the most recent question asked for the field
    pub question: String,
    pub attempts: Vec<AttemptDetail>,
    /// Timestamp of the last answer
    pub last_answer_at: DateTime<Utc>,
}

impl FieldAttempts {
    pub fn count(&self) -> u32 {
        self.attempts.len() as u32
    }
}

/// Adjacent assistant question and user answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QaPair {
    pub question: String,
    pub answer: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<LeadField>,
}

fn topic_patterns() -> &'static [(LeadField, Regex)] {
    static PATTERNS: OnceLock<Vec<(LeadField, Regex)>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            (LeadField::FullName, r"(?i)\bname\b"),
            (LeadField::CarModel, r"(?i)\b(model|car|vehicle)\b"),
            (LeadField::EmailId, r"(?i)\b(e-?mail|mail id)\b"),
        ]
        .into_iter()
        .filter_map(|(field, pattern)| Regex::new(pattern).ok().map(|re| (field, re)))
        .collect()
    })
}

/// Field an assistant utterance asks about.
///
/// When several fields are mentioned ("Thanks for your name. What's your email?")
/// the one mentioned last wins, since the question usually closes the utterance.
pub fn classify_topic(text: &str) -> Option<LeadField> {
    topic_patterns()
        .iter()
        .filter_map(|(field, re)| re.find_iter(text).last().map(|m| (m.start(), *field)))
        .max_by_key(|(position, _)| *position)
        .map(|(_, field)| field)
}

/// Assistant→user pairs in conversation order.
pub fn question_answer_pairs(conversation: &[ConversationTurn]) -> Vec<QaPair> {
    conversation
        .windows(2)
        .filter(|pair| pair[0].is_assistant() && pair[1].is_user())
        .map(|pair| QaPair {
            question: pair[0].content.clone(),
            answer: pair[1].content.clone(),
            topic: classify_topic(&pair[0].content),
        })
        .collect()
}

/// Attempts per field, sequence numbers starting at 1 in encounter order.
pub fn collect_attempts(conversation: &[ConversationTurn]) -> BTreeMap<LeadField, FieldAttempts> {
    let mut by_field: BTreeMap<LeadField, FieldAttempts> = BTreeMap::new();

    for pair in conversation.windows(2) {
        let (question, answer) = (&pair[0], &pair[1]);
        if !question.is_assistant() || !answer.is_user() {
            continue;
        }
        let Some(field) = classify_topic(&question.content) else {
            continue;
        };

        let entry = by_field.entry(field).or_insert_with(|| FieldAttempts {
            question: question.content.clone(),
            attempts: Vec::new(),
            last_answer_at: answer.timestamp,
        });
        let sequence = entry.count() + 1;
        entry.attempts.push(AttemptDetail {
            start_time: format_timestamp(&question.timestamp),
            end_time: format_timestamp(&answer.timestamp),
            sequence,
        });
        entry.question = question.content.clone();
        entry.last_answer_at = answer.timestamp;
    }

    by_field
}
