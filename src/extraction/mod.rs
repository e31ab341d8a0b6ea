//! # Transcript Extraction
//!
//! Structured-field extraction from a finished call's transcript.
//!
//! ## Worker Contract:
//! The extraction worker is a separate process. Given a transcript path it prints
//! exactly one JSON object on stdout:
//! ```json
//! {"success": true, "call_id": "...", "extracted_data": {...}, "processing_metadata": {...}}
//! ```
//! or `{"success": false, "error": "..."}` with a non-zero exit code. Diagnostics
//! go to stderr. The types here describe that object; [`heuristic`] is the
//! built-in rule-based implementation run by `call-bridge-backend extract`.

pub mod heuristic;

use crate::records::model::{LeadField, TranscriptFile};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Instant;

/// Whether a field was found in the transcript.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FieldStatus {
    Captured,
    #[default]
    Missing,
}

/// One extracted field with its confidence and how many times it was asked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ExtractedField {
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub attempts: u32,
    #[serde(default)]
    pub status: FieldStatus,
}

impl ExtractedField {
    pub fn captured(value: impl Into<String>, confidence: f64, attempts: u32) -> Self {
        Self {
            value: Some(value.into()),
            confidence,
            attempts,
            status: FieldStatus::Captured,
        }
    }

    pub fn missing(attempts: u32) -> Self {
        Self {
            value: None,
            confidence: 0.0,
            attempts,
            status: FieldStatus::Missing,
        }
    }

    /// The value, only when the field is marked captured and non-blank.
    pub fn captured_value(&self) -> Option<&str> {
        match (&self.status, &self.value) {
            (FieldStatus::Captured, Some(v)) if !v.trim().is_empty() => Some(v.as_str()),
            _ => None,
        }
    }
}

/// The three target fields as extracted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ExtractedData {
    #[serde(default)]
    pub full_name: ExtractedField,
    #[serde(default)]
    pub car_model: ExtractedField,
    #[serde(default)]
    pub email_id: ExtractedField,
}

impl ExtractedData {
    pub fn field(&self, field: LeadField) -> &ExtractedField {
        match field {
            LeadField::FullName => &self.full_name,
            LeadField::CarModel => &self.car_model,
            LeadField::EmailId => &self.email_id,
        }
    }

    pub fn field_mut(&mut self, field: LeadField) -> &mut ExtractedField {
        match field {
            LeadField::FullName => &mut self.full_name,
            LeadField::CarModel => &mut self.car_model,
            LeadField::EmailId => &mut self.email_id,
        }
    }

    pub fn captured_count(&self) -> usize {
        LeadField::ALL
            .iter()
            .filter(|f| self.field(**f).captured_value().is_some())
            .count()
    }
}

/// Worker bookkeeping reported alongside the fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ProcessingMetadata {
    #[serde(default)]
    pub processor: String,
    #[serde(default)]
    pub processed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub processing_time_ms: u64,
    #[serde(default)]
    pub user_turns: usize,
}

/// The single JSON object a worker prints on stdout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerOutput {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extracted_data: Option<ExtractedData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing_metadata: Option<ProcessingMetadata>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl WorkerOutput {
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            call_id: None,
            extracted_data: None,
            processing_metadata: None,
            error: Some(error.into()),
        }
    }
}

/// Persisted extraction outcome (`results/{call_id}_result.json`). Never rewritten.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub call_id: String,
    pub success: bool,
    pub extracted_data: ExtractedData,
    #[serde(default)]
    pub processing_metadata: ProcessingMetadata,
    pub transcript_file: String,
    pub written_at: DateTime<Utc>,
}

/// Run the built-in extractor over a transcript file.
///
/// ## Returns:
/// - **Ok(WorkerOutput)**: `success: true` with fields and metadata
/// - **Err**: unreadable or malformed transcript
pub fn run_extraction(path: &Path) -> Result<WorkerOutput> {
    let started = Instant::now();
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read transcript {}", path.display()))?;
    let transcript: TranscriptFile = serde_json::from_str(&raw)
        .with_context(|| format!("malformed transcript {}", path.display()))?;

    let extracted = heuristic::extract(&transcript.conversation);
    let user_turns = transcript.conversation.iter().filter(|t| t.is_user()).count();

    Ok(WorkerOutput {
        success: true,
        call_id: Some(transcript.call_id),
        extracted_data: Some(extracted),
        processing_metadata: Some(ProcessingMetadata {
            processor: format!("heuristic/{}", env!("CARGO_PKG_VERSION")),
            processed_at: Some(Utc::now()),
            processing_time_ms: started.elapsed().as_millis() as u64,
            user_turns,
        }),
        error: None,
    })
}
