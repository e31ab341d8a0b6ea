//! Queue poller.
//!
//! ## Protocol:
//! 1. Scan `queue/` in file-name order at a fixed interval
//! 2. For each `pending` entry, take a concurrency permit, then mark it
//!    `processing` on disk before dispatch (the durability checkpoint)
//! 3. Run the worker; on success persist the result, merge it into the newest
//!    call record, mark `completed` and hand off to webhook delivery
//! 4. On any failure mark `failed` with the error text; the call record is untouched
//!
//! The record write is the last fallible step before the entry write. If the
//! entry write then fails, the previous record is written back before the
//! entry is marked `failed`.
//!
//! Failed entries are never retried automatically. Only one poller may own a
//! data directory; the `queue/.poller.lock` file enforces it.

use crate::config::{AnalysisConfig, AppConfig};
use crate::extraction::{ExtractionResult, WorkerOutput};
use crate::outcome::payload::{build_business_payload, build_vendor_payload};
use crate::queue::entry::{QueueEntry, QueueStatus, QueueStore};
use crate::queue::worker::WorkerCommand;
use crate::queue::QueueError;
use crate::records::model::{CallRecord, TranscriptFile};
use crate::records::store::{read_json, write_json_atomic};
use crate::records::DataDir;
use crate::state::SharedMetrics;
use crate::webhook::WebhookDispatcher;
use chrono::Utc;
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

const LOCK_FILE: &str = ".poller.lock";

/// Exclusive ownership of a queue directory. Released on drop.
pub struct PollerLock {
    _file: File,
}

impl PollerLock {
    pub fn acquire(queue_dir: &Path) -> Result<Self, QueueError> {
        std::fs::create_dir_all(queue_dir)?;
        let path = queue_dir.join(LOCK_FILE);
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&path)?;
        file.try_lock_exclusive()
            .map_err(|_| QueueError::PollerLocked(path.clone()))?;
        Ok(Self { _file: file })
    }
}

struct ProcessorContext {
    store: QueueStore,
    worker: WorkerCommand,
    dispatcher: Option<WebhookDispatcher>,
    analysis: AnalysisConfig,
    metrics: SharedMetrics,
}

pub struct QueueProcessor {
    ctx: Arc<ProcessorContext>,
    permits: Arc<Semaphore>,
    poll_interval: Duration,
    _lock: PollerLock,
}

impl QueueProcessor {
    /// Build the processor from application configuration and take the poller lock.
    pub fn new(config: &AppConfig, metrics: SharedMetrics) -> Result<Self, QueueError> {
        let worker = WorkerCommand::from_config(&config.queue)?;
        let dispatcher = WebhookDispatcher::new(config.webhook.clone())?;
        Self::from_parts(
            DataDir::new(config.storage.root()),
            worker,
            Some(dispatcher),
            config.analysis.clone(),
            config.queue.max_concurrent_extractions,
            config.queue.poll_interval(),
            metrics,
        )
    }

    pub fn from_parts(
        data: DataDir,
        worker: WorkerCommand,
        dispatcher: Option<WebhookDispatcher>,
        analysis: AnalysisConfig,
        max_concurrent: usize,
        poll_interval: Duration,
        metrics: SharedMetrics,
    ) -> Result<Self, QueueError> {
        data.ensure_layout()?;
        let lock = PollerLock::acquire(&data.queue_dir())?;

        Ok(Self {
            ctx: Arc::new(ProcessorContext {
                store: QueueStore::new(data),
                worker,
                dispatcher,
                analysis,
                metrics,
            }),
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
            poll_interval,
            _lock: lock,
        })
    }

    /// One scan. Returns the handles of the extractions it started.
    ///
    /// Entries are only marked `processing` once a permit is held; when the
    /// permits run out the scan stops and later entries wait for the next tick.
    pub fn poll_once(&self) -> Result<Vec<JoinHandle<QueueEntry>>, QueueError> {
        let mut started = Vec::new();

        for (path, mut entry) in self.ctx.store.list()? {
            if entry.status != QueueStatus::Pending {
                continue;
            }

            let Ok(permit) = self.permits.clone().try_acquire_owned() else {
                debug!("All extraction slots busy, deferring remaining entries");
                break;
            };

            entry.mark_processing()?;
            self.ctx.store.save(&path, &entry)?;
            info!(call_id = %entry.call_id, "Extraction started");

            let ctx = self.ctx.clone();
            started.push(tokio::spawn(process_entry(ctx, path, entry, permit)));
        }

        Ok(started)
    }

    /// Poll until `shutdown` resolves.
    pub async fn run<F: Future<Output = ()>>(self, shutdown: F) {
        tokio::pin!(shutdown);
        let mut ticker = tokio::time::interval(self.poll_interval);
        info!(interval_ms = self.poll_interval.as_millis() as u64, "Queue processor running");

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Queue processor stopping");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.poll_once() {
                        error!(error = %e, "Queue scan failed");
                    }
                }
            }
        }
    }
}

/// Run one extraction to its terminal state and return the final entry.
async fn process_entry(
    ctx: Arc<ProcessorContext>,
    path: PathBuf,
    mut entry: QueueEntry,
    _permit: OwnedSemaphorePermit,
) -> QueueEntry {
    let transcript = PathBuf::from(&entry.transcript_file);

    let failure = match ctx.worker.run(&transcript).await {
        Ok(output) => match complete_entry(&ctx, &path, &mut entry, output) {
            Ok(record) => {
                ctx.metrics.update(|m| m.extractions_completed += 1);
                info!(call_id = %entry.call_id, "Extraction completed");
                if let Some(record) = record {
                    spawn_delivery(ctx.clone(), record);
                }
                None
            }
            Err(e) => Some(e.to_string()),
        },
        Err(e) => Some(e.to_string()),
    };

    if let Some(message) = failure {
        ctx.metrics.update(|m| m.extractions_failed += 1);
        warn!(call_id = %entry.call_id, error = %message, "Extraction failed");
        if let Err(e) = entry.mark_failed(&message) {
            error!(call_id = %entry.call_id, error = %e, "Cannot mark entry failed");
        } else if let Err(e) = ctx.store.save(&path, &entry) {
            error!(call_id = %entry.call_id, error = %e, "Cannot persist failed entry");
        }
    }

    entry
}

/// Persist the result, merge it into the newest call record, and mark the entry completed.
///
/// `entry` is only updated once the completed entry is on disk, so on error the
/// caller can still move it from `processing` to `failed`.
fn complete_entry(
    ctx: &ProcessorContext,
    path: &Path,
    entry: &mut QueueEntry,
    output: WorkerOutput,
) -> Result<Option<CallRecord>, QueueError> {
    let data = ctx.store.data();
    let extracted = output.extracted_data.unwrap_or_default();

    let result_path = data.result_path(&entry.call_id);
    let result = ExtractionResult {
        call_id: entry.call_id.clone(),
        success: true,
        extracted_data: extracted,
        processing_metadata: output.processing_metadata.unwrap_or_default(),
        transcript_file: entry.transcript_file.clone(),
        written_at: Utc::now(),
    };
    write_json_atomic(&result_path, &result)?;
    let result_file = result_path.to_string_lossy().into_owned();

    let latest = data.latest_call_record(&entry.call_id)?;
    if latest.is_none() {
        warn!(call_id = %entry.call_id, "No call record to merge extraction into");
    }

    let mut completed = entry.clone();
    completed.mark_completed(&result_file)?;

    let Some((record_path, original)) = latest else {
        ctx.store.save(path, &completed)?;
        *entry = completed;
        return Ok(None);
    };

    let mut record = original.clone();
    record.merge_extraction(&result.extracted_data, Some(result_file));
    write_json_atomic(&record_path, &record)?;

    if let Err(e) = ctx.store.save(path, &completed) {
        if let Err(restore) = write_json_atomic(&record_path, &original) {
            error!(call_id = %entry.call_id, error = %restore, "Cannot restore call record");
        }
        return Err(e);
    }
    debug!(call_id = %entry.call_id, status = ?record.status, "Call record updated");
    *entry = completed;
    Ok(Some(record))
}

/// Fire-and-forget webhook delivery for a completed call.
fn spawn_delivery(ctx: Arc<ProcessorContext>, record: CallRecord) {
    let Some(dispatcher) = ctx.dispatcher.clone() else {
        return;
    };

    tokio::spawn(async move {
        let conversation = match read_json::<TranscriptFile>(Path::new(&record.transcript_file)) {
            Ok(transcript) => transcript.conversation,
            Err(e) => {
                warn!(call_id = %record.call_id, error = %e, "Transcript unreadable, delivering without conversation");
                Vec::new()
            }
        };

        let vendor = build_vendor_payload(&record, true, Utc::now());
        let business =
            build_business_payload(&record, &conversation, dispatcher.config(), &ctx.analysis);
        let summary = dispatcher.dispatch(&vendor, &business).await;

        ctx.metrics.update(|m| {
            m.webhooks_succeeded += summary.succeeded as u64;
            m.webhooks_failed += summary.failed as u64;
        });
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::model::{
        CallMetadata, CallStatus, ConversationTurn, LeadField, Role,
    };
    use crate::records::store::{persist_call, CallSummary};
    use chrono::Duration as ChronoDuration;
    use std::collections::BTreeMap;

    fn shell_worker(script: &str, timeout: Duration) -> WorkerCommand {
        WorkerCommand {
            program: PathBuf::from("sh"),
            args: vec!["-c".to_string(), script.to_string()],
            timeout,
        }
    }

    fn processor(data: &DataDir, worker: WorkerCommand, max_concurrent: usize) -> QueueProcessor {
        QueueProcessor::from_parts(
            data.clone(),
            worker,
            None,
            AnalysisConfig::default(),
            max_concurrent,
            Duration::from_millis(50),
            SharedMetrics::default(),
        )
        .unwrap()
    }

    fn seed_call(data: &DataDir, call_id: &str) -> crate::records::store::PersistedCall {
        let start = Utc::now();
        let summary = CallSummary {
            call_id: call_id.to_string(),
            started_at: start,
            ended_at: start + ChronoDuration::seconds(30),
            metadata: CallMetadata::default(),
            conversation: vec![
                ConversationTurn::new(Role::Assistant, "May I know your name?", start),
                ConversationTurn::new(Role::User, "Gulshan Mehta", start),
            ],
            captures: BTreeMap::new(),
            bridged: true,
        };
        persist_call(data, &summary).unwrap()
    }

    const SUCCESS_SCRIPT: &str = r#"echo '{"success": true, "call_id": "x", "extracted_data": {"full_name": {"value": "Gulshan Mehta", "confidence": 0.9, "attempts": 1, "status": "captured"}, "car_model": {"value": "Scorpio", "confidence": 0.85, "attempts": 1, "status": "captured"}}}'"#;

    #[tokio::test]
    async fn test_successful_extraction_merges_into_record() {
        let dir = tempfile::tempdir().unwrap();
        let data = DataDir::new(dir.path());
        let persisted = seed_call(&data, "e2e-1");
        let processor = processor(&data, shell_worker(SUCCESS_SCRIPT, Duration::from_secs(10)), 2);

        let handles = processor.poll_once().unwrap();
        assert_eq!(handles.len(), 1);
        let entry = handles.into_iter().next().unwrap().await.unwrap();
        assert_eq!(entry.status, QueueStatus::Completed);
        assert!(entry.completed_at.is_some());

        let on_disk: QueueEntry = read_json(&persisted.queue_path).unwrap();
        assert_eq!(on_disk.status, QueueStatus::Completed);
        let result_file = on_disk.result_file.unwrap();
        assert!(Path::new(&result_file).exists());

        let record: CallRecord = read_json(&persisted.record_path).unwrap();
        assert_eq!(record.fields.get(LeadField::FullName), Some("Gulshan Mehta"));
        assert_eq!(record.fields.get(LeadField::CarModel), Some("Scorpio"));
        assert_eq!(record.status, CallStatus::Partial);
        assert_eq!(record.extraction_result_file.as_deref(), Some(result_file.as_str()));
    }

    #[tokio::test]
    async fn test_repolling_terminal_entries_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let data = DataDir::new(dir.path());
        let persisted = seed_call(&data, "idem-1");
        let processor = processor(&data, shell_worker(SUCCESS_SCRIPT, Duration::from_secs(10)), 2);

        for handle in processor.poll_once().unwrap() {
            handle.await.unwrap();
        }
        let before = std::fs::read(&persisted.queue_path).unwrap();

        assert!(processor.poll_once().unwrap().is_empty());
        assert!(processor.poll_once().unwrap().is_empty());
        assert_eq!(std::fs::read(&persisted.queue_path).unwrap(), before);
    }

    #[tokio::test]
    async fn test_timeout_marks_failed_and_leaves_record() {
        let dir = tempfile::tempdir().unwrap();
        let data = DataDir::new(dir.path());
        let persisted = seed_call(&data, "slow-1");
        let record_before = std::fs::read(&persisted.record_path).unwrap();
        let processor = processor(&data, shell_worker("sleep 5", Duration::from_millis(200)), 2);

        let entry = processor.poll_once().unwrap().remove(0).await.unwrap();
        assert_eq!(entry.status, QueueStatus::Failed);
        assert!(entry.error.as_deref().unwrap().contains("timed out"));
        assert!(entry.failed_at.is_some());

        assert_eq!(std::fs::read(&persisted.record_path).unwrap(), record_before);
        assert!(!data.result_path("slow-1").exists());
    }

    #[tokio::test]
    async fn test_reported_failure_is_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let data = DataDir::new(dir.path());
        let persisted = seed_call(&data, "bad-1");
        let worker = shell_worker(
            r#"echo '{"success": false, "error": "empty conversation"}'"#,
            Duration::from_secs(10),
        );
        let processor = processor(&data, worker, 2);

        let entry = processor.poll_once().unwrap().remove(0).await.unwrap();
        assert_eq!(entry.status, QueueStatus::Failed);
        assert!(entry.error.unwrap().contains("empty conversation"));
        let on_disk: QueueEntry = read_json(&persisted.queue_path).unwrap();
        assert_eq!(on_disk.status, QueueStatus::Failed);
    }

    #[tokio::test]
    async fn test_concurrency_bound_leaves_rest_pending() {
        let dir = tempfile::tempdir().unwrap();
        let data = DataDir::new(dir.path());
        let first = seed_call(&data, "a-call");
        let second = seed_call(&data, "b-call");
        let processor = processor(&data, shell_worker(SUCCESS_SCRIPT, Duration::from_secs(10)), 1);

        let handles = processor.poll_once().unwrap();
        assert_eq!(handles.len(), 1);
        let waiting: QueueEntry = read_json(&second.queue_path).unwrap();
        assert_eq!(waiting.status, QueueStatus::Pending);

        for handle in handles {
            handle.await.unwrap();
        }
        let done: QueueEntry = read_json(&first.queue_path).unwrap();
        assert_eq!(done.status, QueueStatus::Completed);

        let handles = processor.poll_once().unwrap();
        assert_eq!(handles.len(), 1);
        for handle in handles {
            handle.await.unwrap();
        }
        let done: QueueEntry = read_json(&second.queue_path).unwrap();
        assert_eq!(done.status, QueueStatus::Completed);
    }

    #[tokio::test]
    async fn test_entry_write_failure_marks_failed_and_restores_record() {
        let dir = tempfile::tempdir().unwrap();
        let data = DataDir::new(dir.path());
        let persisted = seed_call(&data, "stuck-1");
        let processor = processor(&data, shell_worker(SUCCESS_SCRIPT, Duration::from_secs(10)), 1);

        let mut entry: QueueEntry = read_json(&persisted.queue_path).unwrap();
        entry.mark_processing().unwrap();
        // A directory in place of the entry file makes every entry write fail
        let blocked = data.queue_dir().join("blocked");
        std::fs::create_dir_all(&blocked).unwrap();
        let permit = Arc::new(Semaphore::new(1)).try_acquire_owned().unwrap();

        let entry = process_entry(processor.ctx.clone(), blocked, entry, permit).await;
        assert_eq!(entry.status, QueueStatus::Failed);
        assert!(entry.error.is_some());
        assert_eq!(processor.ctx.metrics.snapshot().extractions_failed, 1);

        let record: CallRecord = read_json(&persisted.record_path).unwrap();
        assert_eq!(record.fields.get(LeadField::CarModel), None);
        assert!(record.extraction_result_file.is_none());
    }

    #[tokio::test]
    async fn test_second_poller_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let data = DataDir::new(dir.path());
        let _first = processor(&data, shell_worker("true", Duration::from_secs(1)), 1);
        let second = QueueProcessor::from_parts(
            data.clone(),
            shell_worker("true", Duration::from_secs(1)),
            None,
            AnalysisConfig::default(),
            1,
            Duration::from_millis(50),
            SharedMetrics::default(),
        );
        assert!(matches!(second, Err(QueueError::PollerLocked(_))));
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let data = DataDir::new(dir.path());
        let processor = processor(&data, shell_worker("true", Duration::from_secs(1)), 1);
        tokio::time::timeout(
            Duration::from_secs(2),
            processor.run(tokio::time::sleep(Duration::from_millis(120))),
        )
        .await
        .unwrap();
    }
}
