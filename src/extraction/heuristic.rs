//! Rule-based field extraction.
//!
//! Each user answer is attributed to the topic of the assistant question right
//! before it. Answers are cleaned of lead-in phrases ("my name is", "it's", ...)
//! and trailing punctuation, then validated per field. Later valid answers
//! replace earlier ones, so corrections win.

use crate::extraction::{ExtractedData, ExtractedField};
use crate::outcome::attempts::{classify_topic, collect_attempts};
use crate::records::model::{ConversationTurn, LeadField};
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::OnceLock;

/// Leading phrases removed before validating an answer. Longest first.
const LEAD_INS: &[&str] = &[
    "my email id is",
    "my email is",
    "email id is",
    "email is",
    "my name is",
    "name is",
    "i am interested in",
    "i'm interested in",
    "interested in",
    "i would like",
    "i'd like",
    "i want",
    "it is",
    "it's",
    "its",
    "this is",
    "i am",
    "i'm",
    "sure",
    "yeah",
    "yes",
    "okay",
    "ok",
    "well",
];

/// Single words dropped from non-name answers only; they also start real names
/// ("An Nguyen", "So Yeon Kim").
const ARTICLE_LEAD_INS: &[&str] = &["so", "the", "an", "a"];

/// Whole answers that carry no field value.
const FILLERS: &[&str] = &[
    "uh", "um", "hmm", "mmm", "huh", "what", "sorry", "pardon", "hello", "hi", "no", "yes",
    "ok", "okay", "wait", "sure",
];

const MAX_NAME_WORDS: usize = 4;
const MAX_MODEL_WORDS: usize = 5;

fn email_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"(?i)[a-z0-9._%+-]+@[a-z0-9.-]+\.[a-z]{2,}").ok())
        .as_ref()
}

/// Remove lead-in phrases, fillers and surrounding punctuation.
pub fn clean_answer(text: &str) -> String {
    strip_lead_ins(text, true)
}

/// [`clean_answer`] without the article lead-ins, for name answers.
fn clean_name_answer(text: &str) -> String {
    strip_lead_ins(text, false)
}

fn strip_lead_ins(text: &str, articles: bool) -> String {
    let extra: &[&str] = if articles { ARTICLE_LEAD_INS } else { &[] };
    let mut rest = text.trim();

    loop {
        rest = rest.trim_start_matches(|c: char| c.is_whitespace() || matches!(c, ',' | '-' | ':'));
        let stripped = LEAD_INS
            .iter()
            .chain(extra)
            .find_map(|prefix| strip_prefix_word(rest, prefix));
        match stripped {
            Some(next) => rest = next,
            None => break,
        }
    }

    rest.trim_end_matches(|c: char| c.is_whitespace() || matches!(c, '.' | ',' | '!' | '?' | ';' | ':'))
        .to_string()
}

/// Case-insensitive prefix strip that only matches whole words.
fn strip_prefix_word<'a>(text: &'a str, prefix: &str) -> Option<&'a str> {
    let head = text.get(..prefix.len())?;
    if !head.eq_ignore_ascii_case(prefix) {
        return None;
    }
    let tail = &text[prefix.len()..];
    match tail.chars().next() {
        None => Some(tail),
        Some(c) if !c.is_alphanumeric() && c != '\'' && c != '@' => Some(tail),
        _ => None,
    }
}

fn is_filler(cleaned: &str) -> bool {
    let lowered = cleaned.to_lowercase();
    lowered
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .all(|w| FILLERS.contains(&w))
}

/// Email written directly, or spoken as "name at domain dot com".
pub fn find_email(text: &str) -> Option<(String, f64)> {
    let pattern = email_pattern()?;
    if let Some(m) = pattern.find(text) {
        return Some((m.as_str().to_lowercase(), 0.95));
    }

    let spoken: String = clean_answer(text)
        .to_lowercase()
        .split_whitespace()
        .map(|word| match word {
            "at" | "at-the-rate" => "@",
            "dot" | "period" => ".",
            "underscore" => "_",
            "dash" | "hyphen" => "-",
            other => other,
        })
        .collect::<Vec<_>>()
        .join("")
        .replace("attherate", "@");

    pattern
        .find(&spoken)
        .map(|m| (m.as_str().trim_end_matches('.').to_string(), 0.8))
}

fn parse_name(text: &str) -> Option<String> {
    let cleaned = clean_name_answer(text);
    if cleaned.is_empty() || is_filler(&cleaned) {
        return None;
    }
    let words: Vec<&str> = cleaned.split_whitespace().collect();
    let plausible = words.len() <= MAX_NAME_WORDS
        && words
            .iter()
            .all(|w| w.chars().all(|c| c.is_alphabetic() || matches!(c, '.' | '-' | '\'')));
    plausible.then_some(cleaned)
}

fn parse_model(text: &str) -> Option<String> {
    let cleaned = clean_answer(text);
    if cleaned.is_empty() || is_filler(&cleaned) {
        return None;
    }
    (cleaned.split_whitespace().count() <= MAX_MODEL_WORDS).then_some(cleaned)
}

/// Value and base confidence for an answer to a question about `field`.
pub fn parse_answer(field: LeadField, text: &str) -> Option<(String, f64)> {
    match field {
        LeadField::FullName => parse_name(text).map(|v| (v, 0.9)),
        LeadField::CarModel => parse_model(text).map(|v| (v, 0.85)),
        LeadField::EmailId => find_email(text),
    }
}

/// Confidence drops by 0.1 for every re-ask before the answer, floored at 0.5.
fn adjusted_confidence(base: f64, attempt: u32) -> f64 {
    let penalty = 0.1 * attempt.saturating_sub(1) as f64;
    (base - penalty).max(0.5)
}

/// Extract the three target fields from a conversation log.
pub fn extract(conversation: &[ConversationTurn]) -> ExtractedData {
    let attempts = collect_attempts(conversation);
    let mut data = ExtractedData::default();
    for field in LeadField::ALL {
        let asked = attempts.get(&field).map(|a| a.count()).unwrap_or(0);
        *data.field_mut(field) = ExtractedField::missing(asked);
    }

    let mut seen: BTreeMap<LeadField, u32> = BTreeMap::new();
    for pair in conversation.windows(2) {
        let (question, answer) = (&pair[0], &pair[1]);
        if !question.is_assistant() || !answer.is_user() {
            continue;
        }
        let Some(field) = classify_topic(&question.content) else {
            continue;
        };
        let attempt = seen.entry(field).and_modify(|n| *n += 1).or_insert(1);

        if let Some((value, base)) = parse_answer(field, &answer.content) {
            let asked = data.field(field).attempts;
            *data.field_mut(field) =
                ExtractedField::captured(value, adjusted_confidence(base, *attempt), asked);
        }
    }

    // An email volunteered outside its question still counts
    if data.email_id.captured_value().is_none() {
        let volunteered = conversation
            .iter()
            .filter(|t| t.is_user())
            .find_map(|t| email_pattern().and_then(|re| re.find(&t.content)));
        if let Some(m) = volunteered {
            let asked = data.email_id.attempts;
            data.email_id = ExtractedField::captured(m.as_str().to_lowercase(), 0.7, asked);
        }
    }

    data
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extraction::FieldStatus;
    use crate::records::model::Role;
    use chrono::Utc;

    fn log(lines: &[(Role, &str)]) -> Vec<ConversationTurn> {
        lines
            .iter()
            .map(|(role, text)| ConversationTurn::new(*role, *text, Utc::now()))
            .collect()
    }

    #[test]
    fn test_clean_answer_strips_lead_ins() {
        assert_eq!(clean_answer("My name is Gulshan Mehta."), "Gulshan Mehta");
        assert_eq!(clean_answer("it's Priya!"), "Priya");
        assert_eq!(clean_answer("Yes, I am interested in the Scorpio"), "Scorpio");
        assert_eq!(clean_answer("Itsuki"), "Itsuki");
        assert_eq!(clean_answer("Anand"), "Anand");
    }

    #[test]
    fn test_names_keep_article_like_first_words() {
        assert_eq!(parse_name("An Nguyen").as_deref(), Some("An Nguyen"));
        assert_eq!(parse_name("So Yeon Kim.").as_deref(), Some("So Yeon Kim"));
        assert_eq!(parse_name("My name is A Kumar").as_deref(), Some("A Kumar"));
        assert_eq!(parse_model("The Nexon").as_deref(), Some("Nexon"));
    }

    #[test]
    fn test_find_email_direct_and_spoken() {
        assert_eq!(
            find_email("sure, it's Rahul.K@Example.com").map(|(e, _)| e),
            Some("rahul.k@example.com".to_string())
        );
        assert_eq!(
            find_email("my email is rahul at gmail dot com").map(|(e, _)| e),
            Some("rahul@gmail.com".to_string())
        );
        assert_eq!(find_email("I don't have one"), None);
    }

    #[test]
    fn test_extract_full_call() {
        let conversation = log(&[
            (Role::Assistant, "May I know your name?"),
            (Role::User, "This is Farhan Ali."),
            (Role::Assistant, "Which car model would you like?"),
            (Role::User, "The Nexon EV"),
            (Role::Assistant, "And your email id?"),
            (Role::User, "farhan at outlook dot com"),
        ]);
        let data = extract(&conversation);
        assert_eq!(data.full_name.captured_value(), Some("Farhan Ali"));
        assert_eq!(data.car_model.captured_value(), Some("Nexon EV"));
        assert_eq!(data.email_id.captured_value(), Some("farhan@outlook.com"));
        assert_eq!(data.full_name.attempts, 1);
        assert_eq!(data.captured_count(), 3);
    }

    #[test]
    fn test_fillers_are_not_values_and_reasks_lower_confidence() {
        let conversation = log(&[
            (Role::Assistant, "What's your name?"),
            (Role::User, "Hmm?"),
            (Role::Assistant, "Sorry, your name please?"),
            (Role::User, "Deepa"),
        ]);
        let data = extract(&conversation);
        assert_eq!(data.full_name.captured_value(), Some("Deepa"));
        assert_eq!(data.full_name.attempts, 2);
        assert!((data.full_name.confidence - 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_unanswered_fields_are_missing() {
        let conversation = log(&[
            (Role::Assistant, "Could you share your email?"),
            (Role::User, "I'd rather not say that"),
        ]);
        let data = extract(&conversation);
        assert_eq!(data.email_id.status, FieldStatus::Missing);
        assert_eq!(data.email_id.attempts, 1);
        assert_eq!(data.full_name.attempts, 0);
        assert_eq!(data.captured_count(), 0);
    }

    #[test]
    fn test_name_answer_with_digits_is_rejected() {
        assert_eq!(parse_answer(LeadField::FullName, "my name is 12345"), None);
        assert_eq!(
            parse_answer(LeadField::CarModel, "XUV700").map(|(v, _)| v),
            Some("XUV700".to_string())
        );
    }
}
