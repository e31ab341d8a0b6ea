//! # Flat-File Storage
//!
//! Paths and JSON persistence under `storage.data_dir`, plus the call record
//! writer that runs when a telephony session closes.
//!
//! ## Layout:
//! - `transcripts/{call_id}_{ts}.json`: raw transcript
//! - `call_records/{call_id}_{ts}.json`: canonical call record
//! - `queue/{call_id}.json`: extraction queue entry
//! - `results/{call_id}_result.json`: extraction result
//!
//! Every write goes through a temp file in the same directory followed by a
//! rename, so readers never see half-written JSON.

use crate::queue::entry::QueueEntry;
use crate::records::model::{
    CallAnalytics, CallMetadata, CallRecord, CallStatus, ConversationTurn, LeadField, LeadFields,
    TranscriptFile,
};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("atomic rename failed: {0}")]
    Persist(#[from] tempfile::PersistError),

    #[error("no parent directory for {0}")]
    NoParent(PathBuf),
}

/// Root of the data directory with its fixed subdirectories.
#[derive(Debug, Clone)]
pub struct DataDir {
    root: PathBuf,
}

impl DataDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn transcripts_dir(&self) -> PathBuf {
        self.root.join("transcripts")
    }

    pub fn call_records_dir(&self) -> PathBuf {
        self.root.join("call_records")
    }

    pub fn queue_dir(&self) -> PathBuf {
        self.root.join("queue")
    }

    pub fn results_dir(&self) -> PathBuf {
        self.root.join("results")
    }

    pub fn ensure_layout(&self) -> Result<(), StoreError> {
        for dir in [
            self.transcripts_dir(),
            self.call_records_dir(),
            self.queue_dir(),
            self.results_dir(),
        ] {
            fs::create_dir_all(dir)?;
        }
        Ok(())
    }

    pub fn queue_entry_path(&self, call_id: &str) -> PathBuf {
        self.queue_dir().join(format!("{}.json", safe_stem(call_id)))
    }

    pub fn result_path(&self, call_id: &str) -> PathBuf {
        self.results_dir().join(format!("{}_result.json", safe_stem(call_id)))
    }

    pub fn transcript_path(&self, call_id: &str, ts: &DateTime<Utc>) -> PathBuf {
        self.transcripts_dir()
            .join(format!("{}_{}.json", safe_stem(call_id), file_timestamp(ts)))
    }

    pub fn call_record_path(&self, call_id: &str, ts: &DateTime<Utc>) -> PathBuf {
        self.call_records_dir()
            .join(format!("{}_{}.json", safe_stem(call_id), file_timestamp(ts)))
    }

    /// Most recent call record for a call id, matched by `{call_id}_` file prefix.
    ///
    /// Timestamps in file names sort lexically, so the greatest name is the newest.
    pub fn latest_call_record(
        &self,
        call_id: &str,
    ) -> Result<Option<(PathBuf, CallRecord)>, StoreError> {
        let dir = self.call_records_dir();
        if !dir.exists() {
            return Ok(None);
        }

        let prefix = format!("{}_", safe_stem(call_id));
        let mut newest: Option<(String, PathBuf)> = None;
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let Some(suffix) = name.strip_prefix(&prefix).and_then(|s| s.strip_suffix(".json"))
            else {
                continue;
            };
            if !is_file_timestamp(suffix) {
                continue;
            }
            if newest.as_ref().map_or(true, |(best, _)| name > best.as_str()) {
                newest = Some((name.to_string(), path.clone()));
            }
        }

        match newest {
            Some((_, path)) => {
                let record = read_json(&path)?;
                Ok(Some((path, record)))
            }
            None => Ok(None),
        }
    }
}

/// Call ids come from the vendor; keep only characters safe in a file name.
pub fn safe_stem(call_id: &str) -> String {
    call_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Sortable, file-name safe timestamp (`20260105T100000123`).
pub fn file_timestamp(ts: &DateTime<Utc>) -> String {
    ts.format("%Y%m%dT%H%M%S%3f").to_string()
}

fn is_file_timestamp(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_digit() || c == 'T')
}

/// Atomic write: temp file in the same directory, then rename over `path`.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    let parent = path
        .parent()
        .ok_or_else(|| StoreError::NoParent(path.to_path_buf()))?;
    fs::create_dir_all(parent)?;

    let data = serde_json::to_vec_pretty(value)?;
    let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
    tmp.write_all(&data)?;
    tmp.flush()?;
    tmp.persist(path)?;
    Ok(())
}

pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, StoreError> {
    let raw = fs::read(path)?;
    Ok(serde_json::from_slice(&raw)?)
}

/// Everything the live session knows when it closes.
#[derive(Debug, Clone)]
pub struct CallSummary {
    pub call_id: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub metadata: CallMetadata,
    pub conversation: Vec<ConversationTurn>,
    /// Values captured through the engine's capture tool, keyed by field key
    pub captures: BTreeMap<String, String>,
    /// Whether the engine session ever became active
    pub bridged: bool,
}

/// Files written for one finished call.
#[derive(Debug, Clone)]
pub struct PersistedCall {
    pub transcript_path: PathBuf,
    pub record_path: PathBuf,
    pub queue_path: PathBuf,
}

/// Build the initial call record for a finished session.
///
/// A call whose engine never became active is `Failed`; otherwise status
/// follows field completeness.
pub fn initial_record(summary: &CallSummary, transcript_file: &Path) -> CallRecord {
    let mut fields = LeadFields::default();
    for (key, value) in &summary.captures {
        if let Some(field) = LeadField::parse(key) {
            fields.set(field, value.as_str());
        }
    }

    let mut record = CallRecord {
        call_id: summary.call_id.clone(),
        started_at: summary.started_at,
        ended_at: summary.ended_at,
        duration_seconds: (summary.ended_at - summary.started_at).num_seconds().max(0),
        metadata: summary.metadata.clone(),
        status: CallStatus::Failed,
        fields,
        analytics: CallAnalytics::from_conversation(&summary.conversation, &summary.captures),
        transcript_file: transcript_file.to_string_lossy().into_owned(),
        extraction_result_file: None,
        updated_at: Utc::now(),
    };
    if summary.bridged {
        record.recompute_status();
    }
    record
}

/// Call record writer: transcript, initial record, then a pending queue entry.
///
/// ## Order:
/// The queue entry is written last, so the poller never sees an entry whose
/// transcript or record is missing.
pub fn persist_call(data: &DataDir, summary: &CallSummary) -> Result<PersistedCall, StoreError> {
    data.ensure_layout()?;

    let transcript_path = data.transcript_path(&summary.call_id, &summary.ended_at);
    let transcript = TranscriptFile {
        call_id: summary.call_id.clone(),
        started_at: summary.started_at,
        ended_at: summary.ended_at,
        metadata: summary.metadata.clone(),
        conversation: summary.conversation.clone(),
    };
    write_json_atomic(&transcript_path, &transcript)?;
    debug!(call_id = %summary.call_id, path = %transcript_path.display(), "Transcript written");

    let record_path = data.call_record_path(&summary.call_id, &summary.ended_at);
    let record = initial_record(summary, &transcript_path);
    write_json_atomic(&record_path, &record)?;

    let queue_path = data.queue_entry_path(&summary.call_id);
    let entry = QueueEntry::pending(&summary.call_id, &transcript_path.to_string_lossy());
    write_json_atomic(&queue_path, &entry)?;

    info!(
        call_id = %summary.call_id,
        status = ?record.status,
        turns = summary.conversation.len(),
        "Call persisted and queued for extraction"
    );

    Ok(PersistedCall {
        transcript_path,
        record_path,
        queue_path,
    })
}
