//! # Transcript Extraction Queue
//!
//! Durable, polling-based job queue that turns a persisted transcript into
//! structured fields without touching the live call path.
//!
//! ## Key Components:
//! - **entry**: Queue entry files and their forward-only state machine
//! - **worker**: The isolated extraction process with a hard timeout
//! - **processor**: Poll loop, concurrency bound, record merge and delivery hand-off

pub mod entry;
pub mod processor;
pub mod worker;

use crate::records::StoreError;
use crate::webhook::DeliveryError;
use entry::QueueStatus;
use std::path::PathBuf;
use thiserror::Error;

pub use entry::QueueStore;
pub use processor::QueueProcessor;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("queue entry {call_id}: invalid transition {from} -> {to}")]
    InvalidTransition {
        call_id: String,
        from: QueueStatus,
        to: QueueStatus,
    },

    #[error("another queue poller holds {0}")]
    PollerLocked(PathBuf),

    #[error("webhook client setup failed: {0}")]
    Delivery(#[from] DeliveryError),
}
