//! # Call Record Data Model
//!
//! Types persisted under the data directory: the raw transcript written when a
//! call ends and the canonical call record that the extraction queue later enriches.
//!
//! ## Key Types:
//! - **ConversationTurn**: One timestamped utterance from the caller or the assistant
//! - **TranscriptFile**: Raw conversation plus telephony metadata
//! - **CallRecord**: Canonical per-call entity (fields, status, analytics)
//! - **LeadField**: The three target fields collected on every call

use crate::extraction::ExtractedData;
use crate::outcome::attempts::{collect_attempts, question_answer_pairs, QaPair};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Who spoke a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One utterance in the conversation log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl ConversationTurn {
    pub fn new(role: Role, content: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp,
        }
    }

    pub fn is_user(&self) -> bool {
        self.role == Role::User
    }

    pub fn is_assistant(&self) -> bool {
        self.role == Role::Assistant
    }
}

/// Target lead fields, in collection order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeadField {
    FullName,
    CarModel,
    EmailId,
}

impl LeadField {
    /// Collection order: name, then model, then email.
    pub const ALL: [LeadField; 3] = [LeadField::FullName, LeadField::CarModel, LeadField::EmailId];

    /// Storage key (`full_name`, `car_model`, `email_id`).
    pub fn key(&self) -> &'static str {
        match self {
            LeadField::FullName => "full_name",
            LeadField::CarModel => "car_model",
            LeadField::EmailId => "email_id",
        }
    }

    /// Short label used in business payloads and dropoff actions.
    pub fn label(&self) -> &'static str {
        match self {
            LeadField::FullName => "name",
            LeadField::CarModel => "model",
            LeadField::EmailId => "email",
        }
    }

    /// Accepts either the storage key or the short label.
    pub fn parse(name: &str) -> Option<LeadField> {
        match name.trim().to_lowercase().as_str() {
            "full_name" | "name" => Some(LeadField::FullName),
            "car_model" | "model" => Some(LeadField::CarModel),
            "email_id" | "email" => Some(LeadField::EmailId),
            _ => None,
        }
    }
}

impl fmt::Display for LeadField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key())
    }
}

/// Optional metadata supplied by the telephony vendor on `start`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CallMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recording_url: Option<String>,
}

/// Raw transcript persisted at call end; the extraction worker's input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptFile {
    pub call_id: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    #[serde(flatten)]
    pub metadata: CallMetadata,
    #[serde(default)]
    pub conversation: Vec<ConversationTurn>,
}

/// Overall record status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallStatus {
    Complete,
    Partial,
    Failed,
}

impl CallStatus {
    /// Lowercase form used by the vendor webhook (`complete`, `partial`, `failed`).
    pub fn as_overall_status(&self) -> &'static str {
        match self {
            CallStatus::Complete => "complete",
            CallStatus::Partial => "partial",
            CallStatus::Failed => "failed",
        }
    }
}

/// Values of the three target fields; `None` means not captured.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LeadFields {
    pub full_name: Option<String>,
    pub car_model: Option<String>,
    pub email_id: Option<String>,
}

impl LeadFields {
    pub fn get(&self, field: LeadField) -> Option<&str> {
        match field {
            LeadField::FullName => self.full_name.as_deref(),
            LeadField::CarModel => self.car_model.as_deref(),
            LeadField::EmailId => self.email_id.as_deref(),
        }
    }

    /// Store a value; blank values are ignored.
    pub fn set(&mut self, field: LeadField, value: impl Into<String>) {
        let value = value.into();
        let value = value.trim();
        if value.is_empty() {
            return;
        }
        let slot = match field {
            LeadField::FullName => &mut self.full_name,
            LeadField::CarModel => &mut self.car_model,
            LeadField::EmailId => &mut self.email_id,
        };
        *slot = Some(value.to_string());
    }

    pub fn is_captured(&self, field: LeadField) -> bool {
        self.get(field).is_some()
    }

    pub fn all_captured(&self) -> bool {
        LeadField::ALL.iter().all(|f| self.is_captured(*f))
    }

    pub fn none_captured(&self) -> bool {
        LeadField::ALL.iter().all(|f| !self.is_captured(*f))
    }

    pub fn first_missing(&self) -> Option<LeadField> {
        LeadField::ALL.iter().copied().find(|f| !self.is_captured(*f))
    }
}

/// Conversation analytics stored on the record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CallAnalytics {
    pub total_turns: usize,
    pub user_turns: usize,
    pub assistant_turns: usize,
    /// Times each target field was asked, keyed by storage key
    pub attempts: BTreeMap<String, u32>,
    /// Values captured live through the engine's capture tool
    pub captured_parameters: BTreeMap<String, String>,
    pub question_answer_pairs: Vec<QaPair>,
}

impl CallAnalytics {
    pub fn from_conversation(
        conversation: &[ConversationTurn],
        captured: &BTreeMap<String, String>,
    ) -> Self {
        let attempts = collect_attempts(conversation)
            .into_iter()
            .map(|(field, detail)| (field.key().to_string(), detail.attempts.len() as u32))
            .collect();

        Self {
            total_turns: conversation.len(),
            user_turns: conversation.iter().filter(|t| t.is_user()).count(),
            assistant_turns: conversation.iter().filter(|t| t.is_assistant()).count(),
            attempts,
            captured_parameters: captured.clone(),
            question_answer_pairs: question_answer_pairs(conversation),
        }
    }
}

/// Canonical per-call entity.
///
/// ## Lifecycle:
/// 1. Written by the call record writer when the session closes
/// 2. Enriched by the extraction queue (fields merged, status recomputed)
/// 3. Read at delivery time to build the webhook payloads
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallRecord {
    pub call_id: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub duration_seconds: i64,
    #[serde(flatten)]
    pub metadata: CallMetadata,
    pub status: CallStatus,
    pub fields: LeadFields,
    pub analytics: CallAnalytics,
    pub transcript_file: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extraction_result_file: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl CallRecord {
    /// Status from field completeness: all three present is Complete, anything else Partial.
    pub fn recompute_status(&mut self) {
        self.status = if self.fields.all_captured() {
            CallStatus::Complete
        } else {
            CallStatus::Partial
        };
    }

    /// Merge captured extraction values over the record's fields and recompute status.
    ///
    /// Missing extracted fields never erase a value the live session captured.
    pub fn merge_extraction(&mut self, data: &ExtractedData, result_file: Option<String>) {
        for field in LeadField::ALL {
            if let Some(value) = data.field(field).captured_value() {
                self.fields.set(field, value);
            }
        }
        if result_file.is_some() {
            self.extraction_result_file = result_file;
        }
        self.recompute_status();
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extraction::{ExtractedField, FieldStatus};
    use chrono::TimeZone;

    fn record_with(fields: LeadFields) -> CallRecord {
        let t = Utc.with_ymd_and_hms(2026, 1, 5, 10, 0, 0).unwrap();
        CallRecord {
            call_id: "call-1".to_string(),
            started_at: t,
            ended_at: t,
            duration_seconds: 0,
            metadata: CallMetadata::default(),
            status: CallStatus::Partial,
            fields,
            analytics: CallAnalytics::default(),
            transcript_file: "transcripts/call-1.json".to_string(),
            extraction_result_file: None,
            updated_at: t,
        }
    }

    #[test]
    fn test_lead_field_parsing() {
        assert_eq!(LeadField::parse("name"), Some(LeadField::FullName));
        assert_eq!(LeadField::parse("CAR_MODEL"), Some(LeadField::CarModel));
        assert_eq!(LeadField::parse("email"), Some(LeadField::EmailId));
        assert_eq!(LeadField::parse("phone"), None);
    }

    #[test]
    fn test_recompute_status() {
        let mut record = record_with(LeadFields::default());
        record.status = CallStatus::Failed;
        record.recompute_status();
        assert_eq!(record.status, CallStatus::Partial);

        record.fields.set(LeadField::FullName, "Asha Rao");
        record.fields.set(LeadField::CarModel, "Nexon");
        record.fields.set(LeadField::EmailId, "asha@example.com");
        record.recompute_status();
        assert_eq!(record.status, CallStatus::Complete);
    }

    #[test]
    fn test_merge_keeps_live_captures() {
        let mut fields = LeadFields::default();
        fields.set(LeadField::CarModel, "Thar");
        let mut record = record_with(fields);

        let mut data = ExtractedData::default();
        data.full_name = ExtractedField::captured("Gulshan Mehta", 0.9, 1);
        data.car_model = ExtractedField::missing(1);
        record.merge_extraction(&data, Some("results/call-1_result.json".to_string()));

        assert_eq!(record.fields.get(LeadField::FullName), Some("Gulshan Mehta"));
        assert_eq!(record.fields.get(LeadField::CarModel), Some("Thar"));
        assert_eq!(data.car_model.status, FieldStatus::Missing);
        assert_eq!(record.status, CallStatus::Partial);
        assert!(record.extraction_result_file.is_some());
    }

    #[test]
    fn test_blank_values_are_ignored() {
        let mut fields = LeadFields::default();
        fields.set(LeadField::EmailId, "   ");
        assert!(fields.none_captured());
        assert_eq!(fields.first_missing(), Some(LeadField::FullName));
    }

    #[test]
    fn test_transcript_metadata_is_flattened() {
        let t = Utc.with_ymd_and_hms(2026, 1, 5, 10, 0, 0).unwrap();
        let transcript = TranscriptFile {
            call_id: "c".to_string(),
            started_at: t,
            ended_at: t,
            metadata: CallMetadata {
                customer_number: Some("9876543210".to_string()),
                ..Default::default()
            },
            conversation: vec![],
        };
        let json = serde_json::to_value(&transcript).unwrap();
        assert_eq!(json["customer_number"], "9876543210");
        assert!(json.get("store_code").is_none());
    }
}
