//! Queue entries and their file-backed store.
//!
//! ## State Machine:
//! `pending → processing → completed | failed`. Transitions never go backward
//! and both end states are terminal.

use crate::queue::QueueError;
use crate::records::store::{read_json, write_json_atomic, DataDir};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl QueueStatus {
    pub fn can_transition_to(&self, next: QueueStatus) -> bool {
        matches!(
            (self, next),
            (QueueStatus::Pending, QueueStatus::Processing)
                | (QueueStatus::Processing, QueueStatus::Completed)
                | (QueueStatus::Processing, QueueStatus::Failed)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, QueueStatus::Completed | QueueStatus::Failed)
    }
}

impl fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            QueueStatus::Pending => "pending",
            QueueStatus::Processing => "processing",
            QueueStatus::Completed => "completed",
            QueueStatus::Failed => "failed",
        };
        write!(f, "{}", name)
    }
}

/// One transcript waiting for (or done with) extraction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub call_id: String,
    pub transcript_file: String,
    pub status: QueueStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing_started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_file: Option<String>,
}

impl QueueEntry {
    pub fn pending(call_id: &str, transcript_file: &str) -> Self {
        Self {
            call_id: call_id.to_string(),
            transcript_file: transcript_file.to_string(),
            status: QueueStatus::Pending,
            created_at: Utc::now(),
            processing_started_at: None,
            completed_at: None,
            failed_at: None,
            error: None,
            result_file: None,
        }
    }

    fn transition(&mut self, next: QueueStatus) -> Result<(), QueueError> {
        if !self.status.can_transition_to(next) {
            return Err(QueueError::InvalidTransition {
                call_id: self.call_id.clone(),
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    pub fn mark_processing(&mut self) -> Result<(), QueueError> {
        self.transition(QueueStatus::Processing)?;
        self.processing_started_at = Some(Utc::now());
        Ok(())
    }

    pub fn mark_completed(&mut self, result_file: &str) -> Result<(), QueueError> {
        self.transition(QueueStatus::Completed)?;
        self.completed_at = Some(Utc::now());
        self.result_file = Some(result_file.to_string());
        Ok(())
    }

    pub fn mark_failed(&mut self, error: &str) -> Result<(), QueueError> {
        self.transition(QueueStatus::Failed)?;
        self.failed_at = Some(Utc::now());
        self.error = Some(error.to_string());
        Ok(())
    }
}

/// File-backed view of `queue/`.
#[derive(Debug, Clone)]
pub struct QueueStore {
    data: DataDir,
}

impl QueueStore {
    pub fn new(data: DataDir) -> Self {
        Self { data }
    }

    pub fn data(&self) -> &DataDir {
        &self.data
    }

    pub fn path_for(&self, call_id: &str) -> PathBuf {
        self.data.queue_entry_path(call_id)
    }

    pub fn save(&self, path: &Path, entry: &QueueEntry) -> Result<(), QueueError> {
        write_json_atomic(path, entry)?;
        Ok(())
    }

    pub fn load(&self, path: &Path) -> Result<QueueEntry, QueueError> {
        Ok(read_json(path)?)
    }

    /// Every parseable entry, in file-name order. Unreadable files are logged and skipped.
    pub fn list(&self) -> Result<Vec<(PathBuf, QueueEntry)>, QueueError> {
        let dir = self.data.queue_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut paths: Vec<PathBuf> = fs::read_dir(&dir)
            .map_err(crate::records::StoreError::from)?
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("json"))
            .collect();
        paths.sort();

        let mut entries = Vec::with_capacity(paths.len());
        for path in paths {
            match self.load(&path) {
                Ok(entry) => entries.push((path, entry)),
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable queue entry"),
            }
        }
        Ok(entries)
    }

    pub fn counts(&self) -> Result<BTreeMap<QueueStatus, usize>, QueueError> {
        let mut counts = BTreeMap::new();
        for status in [
            QueueStatus::Pending,
            QueueStatus::Processing,
            QueueStatus::Completed,
            QueueStatus::Failed,
        ] {
            counts.insert(status, 0);
        }
        for (_, entry) in self.list()? {
            *counts.entry(entry.status).or_insert(0) += 1;
        }
        Ok(counts)
    }
}
