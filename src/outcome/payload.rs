//! Webhook payload shapes.
//!
//! ## Variants:
//! - **VendorPayload**: Minimal status notification for the telephony vendor
//! - **BusinessPayload**: Full lead record with routing, dropoff, language and
//!   per-field responses for the dealer system

use crate::config::{AnalysisConfig, WebhookConfig};
use crate::outcome::attempts::AttemptDetail;
use crate::outcome::{analyze, format_timestamp};
use crate::records::model::{CallRecord, ConversationTurn, LeadField};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VendorPayload {
    pub call_id: String,
    pub processed_at: String,
    pub success: bool,
    pub overall_status: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LanguageInfo {
    pub welcome: String,
    pub conversational: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DealerRouting {
    pub status: bool,
    pub reason: String,
    pub time: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dropoff {
    pub time: String,
    pub action: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEntry {
    pub key_label: String,
    pub key_value: String,
    pub key_response: String,
    pub attempts: u32,
    pub attempts_details: Vec<AttemptDetail>,
    pub remarks: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusinessPayload {
    pub id: String,
    pub call_ref_id: String,
    pub call_vendor: String,
    pub recording_url: String,
    pub start_time: String,
    pub end_time: String,
    #[serde(rename = "Duration")]
    pub duration: i64,
    #[serde(rename = "Store_code")]
    pub store_code: String,
    #[serde(rename = "Customer_number")]
    pub customer_number: String,
    pub language: LanguageInfo,
    pub dealer_routing: DealerRouting,
    pub dropoff: Dropoff,
    pub response_data: Vec<ResponseEntry>,
}

pub fn build_vendor_payload(
    record: &CallRecord,
    success: bool,
    processed_at: DateTime<Utc>,
) -> VendorPayload {
    VendorPayload {
        call_id: record.call_id.clone(),
        processed_at: format_timestamp(&processed_at),
        success,
        overall_status: record.status.as_overall_status().to_string(),
    }
}

/// Build the business payload from the record and its conversation log.
///
/// `response_data` only carries fields that were asked about or captured,
/// in collection order.
pub fn build_business_payload(
    record: &CallRecord,
    conversation: &[ConversationTurn],
    webhook: &WebhookConfig,
    analysis: &AnalysisConfig,
) -> BusinessPayload {
    let outcome = analyze(record, conversation, analysis);
    let end_time = format_timestamp(&record.ended_at);

    let mut response_data = Vec::new();
    for field in LeadField::ALL {
        let asked = outcome.attempts.get(&field);
        let captured = record.fields.get(field);
        if asked.is_none() && captured.is_none() {
            continue;
        }

        response_data.push(ResponseEntry {
            key_label: field.label().to_string(),
            key_value: asked.map(|a| a.question.clone()).unwrap_or_default(),
            key_response: captured.unwrap_or_default().to_string(),
            attempts: asked.map(|a| a.count()).unwrap_or(0),
            attempts_details: asked.map(|a| a.attempts.clone()).unwrap_or_default(),
            remarks: if captured.is_some() {
                "captured".to_string()
            } else {
                "not captured".to_string()
            },
        });
    }

    let (dropoff_time, dropoff_action) = match outcome.dropoff {
        Some(action) => (end_time.clone(), action),
        None => (String::new(), String::new()),
    };

    BusinessPayload {
        id: Uuid::new_v4().to_string(),
        call_ref_id: record.call_id.clone(),
        call_vendor: webhook.call_vendor.clone(),
        recording_url: record.metadata.recording_url.clone().unwrap_or_default(),
        start_time: format_timestamp(&record.started_at),
        end_time: end_time.clone(),
        duration: record.duration_seconds,
        store_code: record.metadata.store_code.clone().unwrap_or_default(),
        customer_number: record.metadata.customer_number.clone().unwrap_or_default(),
        language: LanguageInfo {
            welcome: analysis.welcome_language.clone(),
            conversational: outcome.language,
        },
        dealer_routing: DealerRouting {
            status: outcome.routing.routed,
            reason: outcome.routing.reason,
            time: if outcome.routing.routed {
                end_time
            } else {
                String::new()
            },
        },
        dropoff: Dropoff {
            time: dropoff_time,
            action: dropoff_action,
        },
        response_data,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extraction::heuristic;
    use crate::records::model::{
        CallAnalytics, CallMetadata, CallStatus, LeadFields, Role,
    };
    use chrono::{Duration, TimeZone};

    fn conversation(lines: &[(Role, &str)]) -> Vec<ConversationTurn> {
        let base = Utc.with_ymd_and_hms(2026, 2, 10, 11, 0, 0).unwrap();
        lines
            .iter()
            .enumerate()
            .map(|(i, (role, text))| {
                ConversationTurn::new(*role, *text, base + Duration::seconds(i as i64 * 6))
            })
            .collect()
    }

    fn record_for(conversation: &[ConversationTurn], fields: LeadFields) -> CallRecord {
        let started = conversation.first().map(|t| t.timestamp).unwrap_or_else(Utc::now);
        let ended = conversation.last().map(|t| t.timestamp).unwrap_or(started);
        let mut record = CallRecord {
            call_id: "CA-1001".to_string(),
            started_at: started,
            ended_at: ended,
            duration_seconds: (ended - started).num_seconds(),
            metadata: CallMetadata {
                customer_number: Some("9812345678".to_string()),
                store_code: Some("DL-07".to_string()),
                recording_url: None,
            },
            status: CallStatus::Partial,
            fields,
            analytics: CallAnalytics::default(),
            transcript_file: "transcripts/CA-1001.json".to_string(),
            extraction_result_file: None,
            updated_at: ended,
        };
        record.recompute_status();
        record
    }

    #[test]
    fn test_end_to_end_name_and_model() {
        let log = conversation(&[
            (Role::Assistant, "Welcome to Sunrise Motors. May I know your name?"),
            (Role::User, "My name is Gulshan Mehta."),
            (Role::Assistant, "Thank you Gulshan. Which car model are you interested in?"),
            (Role::User, "Scorpio"),
            (Role::Assistant, "Great choice. Could you share your email id?"),
        ]);

        let extracted = heuristic::extract(&log);
        let mut record = record_for(&log, LeadFields::default());
        record.merge_extraction(&extracted, None);
        assert_eq!(record.status, CallStatus::Partial);

        let payload = build_business_payload(
            &record,
            &log,
            &WebhookConfig::default(),
            &AnalysisConfig::default(),
        );

        assert_eq!(payload.dropoff.action, "email");
        assert_eq!(payload.dropoff.time, payload.end_time);
        assert!(!payload.dealer_routing.status);
        assert_eq!(payload.dealer_routing.time, "");

        let name = payload.response_data.iter().find(|r| r.key_label == "name").unwrap();
        assert_eq!(name.key_response, "Gulshan Mehta");
        assert_eq!(name.remarks, "captured");
        let model = payload.response_data.iter().find(|r| r.key_label == "model").unwrap();
        assert_eq!(model.key_response, "Scorpio");
        assert_eq!(model.attempts, 1);
        assert!(payload
            .response_data
            .iter()
            .filter(|r| r.key_label == "email")
            .all(|r| r.key_response.is_empty()));

        assert_eq!(payload.store_code, "DL-07");
        assert_eq!(payload.recording_url, "");
    }

    #[test]
    fn test_email_never_asked_drops_off_at_email() {
        let log = conversation(&[
            (Role::Assistant, "What's your name?"),
            (Role::User, "It is Gulshan Mehta"),
            (Role::Assistant, "What car model?"),
            (Role::User, "Scorpio"),
        ]);

        let extracted = heuristic::extract(&log);
        let mut record = record_for(&log, LeadFields::default());
        record.merge_extraction(&extracted, None);
        assert_eq!(record.status, CallStatus::Partial);

        let payload = build_business_payload(
            &record,
            &log,
            &WebhookConfig::default(),
            &AnalysisConfig::default(),
        );
        assert_eq!(payload.dropoff.action, "email");

        let name = payload.response_data.iter().find(|r| r.key_label == "name").unwrap();
        assert_eq!(name.key_response, "Gulshan Mehta");
        let model = payload.response_data.iter().find(|r| r.key_label == "model").unwrap();
        assert_eq!(model.key_response, "Scorpio");
        assert!(payload
            .response_data
            .iter()
            .filter(|r| r.key_label == "email")
            .all(|r| r.key_response.is_empty()));
    }

    #[test]
    fn test_complete_call_routes_without_dropoff() {
        let log = conversation(&[
            (Role::Assistant, "May I know your name?"),
            (Role::User, "Neha Verma"),
        ]);
        let mut fields = LeadFields::default();
        fields.set(LeadField::FullName, "Neha Verma");
        fields.set(LeadField::CarModel, "Seltos");
        fields.set(LeadField::EmailId, "neha@example.com");
        let record = record_for(&log, fields);
        assert_eq!(record.status.as_overall_status(), "complete");

        let payload = build_business_payload(
            &record,
            &log,
            &WebhookConfig::default(),
            &AnalysisConfig::default(),
        );
        assert!(payload.dealer_routing.status);
        assert_eq!(payload.dealer_routing.reason, "call completed");
        assert_eq!(payload.dealer_routing.time, payload.end_time);
        assert_eq!(
            payload.dropoff,
            Dropoff {
                time: String::new(),
                action: String::new()
            }
        );
        // Model and email were captured without being asked
        let email = payload.response_data.iter().find(|r| r.key_label == "email").unwrap();
        assert_eq!(email.key_value, "");
        assert_eq!(email.attempts, 0);
    }

    #[test]
    fn test_business_payload_field_names() {
        let log = conversation(&[(Role::Assistant, "Hello!")]);
        let record = record_for(&log, LeadFields::default());
        let payload = build_business_payload(
            &record,
            &log,
            &WebhookConfig::default(),
            &AnalysisConfig::default(),
        );
        let json = serde_json::to_value(&payload).unwrap();
        assert!(json.get("Duration").is_some());
        assert_eq!(json["Store_code"], "DL-07");
        assert_eq!(json["Customer_number"], "9812345678");
        assert_eq!(json["language"]["welcome"], "english");
        assert_eq!(json["dropoff"]["action"], "greeting");
        assert!(json["response_data"].as_array().unwrap().is_empty());
    }

    #[test]
    fn test_vendor_payload() {
        let log = conversation(&[(Role::Assistant, "Hello!")]);
        let record = record_for(&log, LeadFields::default());
        let processed = Utc.with_ymd_and_hms(2026, 2, 10, 11, 5, 0).unwrap();
        let payload = build_vendor_payload(&record, true, processed);
        assert_eq!(payload.call_id, "CA-1001");
        assert_eq!(payload.processed_at, "2026-02-10 11:05:00");
        assert_eq!(payload.overall_status, "partial");
    }
}
