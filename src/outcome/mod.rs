//! # Call-Outcome Transformer
//!
//! Deterministic, rule-based derivations over a finished call's record and
//! conversation log. Everything here is a pure function; delivery lives in
//! [`crate::webhook`].
//!
//! ## Derivations:
//! - **routing**: Whether the lead goes to a dealer, and why
//! - **dropoff**: Where in the collection flow the caller left
//! - **language**: Conversational language from user utterances
//! - **attempts**: Per-field question attempts with timings
//! - **payload**: The vendor and business webhook payloads

pub mod attempts;
pub mod dropoff;
pub mod language;
pub mod payload;
pub mod routing;

use crate::config::AnalysisConfig;
use crate::records::model::{CallRecord, ConversationTurn, LeadField};
use attempts::FieldAttempts;
use chrono::{DateTime, Utc};
use routing::RoutingDecision;
use std::collections::BTreeMap;

/// Payload timestamp format (`YYYY-MM-DD HH:mm:ss`).
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

/// Every derivation for one call.
#[derive(Debug, Clone)]
pub struct CallOutcome {
    pub routing: RoutingDecision,
    pub dropoff: Option<String>,
    pub language: String,
    pub attempts: BTreeMap<LeadField, FieldAttempts>,
}

pub fn analyze(
    record: &CallRecord,
    conversation: &[ConversationTurn],
    config: &AnalysisConfig,
) -> CallOutcome {
    let attempts = attempts::collect_attempts(conversation);
    let routing = routing::decide_routing(conversation, &record.fields, &attempts, config);
    let dropoff = dropoff::determine_dropoff(conversation, &record.fields, record.status);
    let language = language::detect_language(conversation, &config.fallback_language);

    CallOutcome {
        routing,
        dropoff,
        language,
        attempts,
    }
}
