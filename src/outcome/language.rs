//! Conversational language detection by pattern scoring over user utterances.

use crate::records::model::ConversationTurn;
use regex::Regex;
use std::sync::OnceLock;

pub const HINDI: &str = "hindi";
pub const HINGLISH: &str = "hinglish";
pub const ENGLISH: &str = "english";

fn candidates() -> &'static [(&'static str, Regex)] {
    static CANDIDATES: OnceLock<Vec<(&'static str, Regex)>> = OnceLock::new();
    CANDIDATES.get_or_init(|| {
        [
            (HINDI, r"\p{Devanagari}+"),
            (
                HINGLISH,
                r"(?i)\b(haan|han|nahi|nahin|mera|meri|naam|hai|kya|ji|theek|thik|acha|accha|bhai|aap)\b",
            ),
            (
                ENGLISH,
                r"(?i)\b(the|is|my|yes|no|and|what|want|please|name|this|it|i|you|okay|ok)\b",
            ),
        ]
        .into_iter()
        .filter_map(|(name, pattern)| Regex::new(pattern).ok().map(|re| (name, re)))
        .collect()
    })
}

/// Score each candidate by total matches across user utterances.
pub fn language_scores(conversation: &[ConversationTurn]) -> Vec<(&'static str, usize)> {
    candidates()
        .iter()
        .map(|(name, re)| {
            let score = conversation
                .iter()
                .filter(|t| t.is_user())
                .map(|t| re.find_iter(&t.content).count())
                .sum();
            (*name, score)
        })
        .collect()
}

/// Highest-scoring language; ties at the top or no matches give `fallback`.
pub fn detect_language(conversation: &[ConversationTurn], fallback: &str) -> String {
    let scores = language_scores(conversation);
    let best = scores.iter().map(|(_, s)| *s).max().unwrap_or(0);
    if best == 0 {
        return fallback.to_string();
    }

    let mut leaders = scores.iter().filter(|(_, s)| *s == best);
    match (leaders.next(), leaders.next()) {
        (Some((name, _)), None) => name.to_string(),
        _ => fallback.to_string(),
    }
}
