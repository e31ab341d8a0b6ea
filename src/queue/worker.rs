//! Extraction worker process.
//!
//! The worker runs as a child process with the transcript path as its last
//! argument. Its stdout must hold one JSON [`WorkerOutput`]; stderr is kept for
//! diagnostics. A worker that outlives the timeout is killed.

use crate::config::QueueConfig;
use crate::extraction::WorkerOutput;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::debug;

/// Subcommand that runs the built-in extractor.
pub const EXTRACT_SUBCOMMAND: &str = "extract";

/// Longest stderr excerpt carried into an error message.
const STDERR_EXCERPT: usize = 500;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("failed to spawn extraction worker: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("extraction worker timed out after {0}s")]
    Timeout(u64),

    #[error("extraction worker exited with {code:?}: {stderr}")]
    NonZeroExit { code: Option<i32>, stderr: String },

    #[error("extraction worker produced malformed output: {0}")]
    MalformedOutput(String),

    #[error("extraction worker reported failure: {0}")]
    Reported(String),
}

/// Program, arguments and timeout for one worker run.
#[derive(Debug, Clone)]
pub struct WorkerCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub timeout: Duration,
}

impl WorkerCommand {
    /// Worker from configuration; an empty program means this binary in `extract` mode.
    pub fn from_config(config: &QueueConfig) -> std::io::Result<Self> {
        let (program, args) = if config.worker_program.is_empty() {
            (
                std::env::current_exe()?,
                vec![EXTRACT_SUBCOMMAND.to_string()],
            )
        } else {
            (
                PathBuf::from(&config.worker_program),
                config.worker_args.clone(),
            )
        };

        Ok(Self {
            program,
            args,
            timeout: config.worker_timeout(),
        })
    }

    /// Run the worker against one transcript.
    ///
    /// ## Returns:
    /// - **Ok(output)**: exit 0 and a parseable `success: true` object
    /// - **Err(WorkerError)**: every other outcome, typed by cause
    pub async fn run(&self, transcript: &Path) -> Result<WorkerOutput, WorkerError> {
        let mut child = tokio::process::Command::new(&self.program)
            .args(&self.args)
            .arg(transcript)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(WorkerError::Spawn)?;

        // Drain both pipes concurrently so a chatty worker never blocks on a full pipe
        let stdout_task = tokio::spawn(read_pipe(child.stdout.take()));
        let stderr_task = tokio::spawn(read_pipe(child.stderr.take()));

        let status = tokio::select! {
            status = child.wait() => status.map_err(WorkerError::Spawn)?,
            _ = tokio::time::sleep(self.timeout) => {
                child.kill().await.ok();
                stdout_task.abort();
                stderr_task.abort();
                return Err(WorkerError::Timeout(self.timeout.as_secs()));
            }
        };

        let out = stdout_task.await.unwrap_or_default();
        let err = stderr_task.await.unwrap_or_default();

        let stderr_text = excerpt(&String::from_utf8_lossy(&err));
        if !stderr_text.is_empty() {
            debug!(transcript = %transcript.display(), stderr = %stderr_text, "Worker diagnostics");
        }

        if !status.success() {
            return Err(WorkerError::NonZeroExit {
                code: status.code(),
                stderr: stderr_text,
            });
        }

        parse_output(&out)
    }
}

/// Interpret worker stdout.
pub fn parse_output(stdout: &[u8]) -> Result<WorkerOutput, WorkerError> {
    let text = String::from_utf8_lossy(stdout);
    let output: WorkerOutput = serde_json::from_str(text.trim())
        .map_err(|e| WorkerError::MalformedOutput(format!("{} (stdout: {})", e, excerpt(&text))))?;

    if !output.success {
        return Err(WorkerError::Reported(
            output.error.unwrap_or_else(|| "no error given".to_string()),
        ));
    }
    Ok(output)
}

async fn read_pipe<R: AsyncRead + Unpin>(pipe: Option<R>) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        let _ = pipe.read_to_end(&mut buf).await;
    }
    buf
}

fn excerpt(text: &str) -> String {
    let trimmed = text.trim();
    match trimmed.char_indices().nth(STDERR_EXCERPT) {
        Some((idx, _)) => format!("{}...", &trimmed[..idx]),
        None => trimmed.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shell(script: &str, timeout: Duration) -> WorkerCommand {
        // The transcript path lands in $0 of the script
        WorkerCommand {
            program: PathBuf::from("sh"),
            args: vec!["-c".to_string(), script.to_string()],
            timeout,
        }
    }

    #[test]
    fn test_parse_output() {
        let ok = parse_output(br#"{"success": true, "call_id": "c1"}"#).unwrap();
        assert_eq!(ok.call_id.as_deref(), Some("c1"));

        let reported = parse_output(br#"{"success": false, "error": "empty transcript"}"#);
        assert!(matches!(reported, Err(WorkerError::Reported(e)) if e == "empty transcript"));

        assert!(matches!(parse_output(b"Traceback..."), Err(WorkerError::MalformedOutput(_))));
    }

    #[test]
    fn test_stdout_must_be_a_single_object() {
        let padded = parse_output(b"\n  {\"success\": true, \"call_id\": \"c2\"}\n\n").unwrap();
        assert_eq!(padded.call_id.as_deref(), Some("c2"));

        let chatty = parse_output(b"loading model\n{\"success\": true}\n");
        assert!(matches!(chatty, Err(WorkerError::MalformedOutput(_))));
    }

    #[test]
    fn test_default_worker_is_this_binary() {
        let worker = WorkerCommand::from_config(&QueueConfig::default()).unwrap();
        assert_eq!(worker.args, vec![EXTRACT_SUBCOMMAND.to_string()]);
        assert_eq!(worker.timeout, Duration::from_secs(120));
    }

    #[tokio::test]
    async fn test_successful_run() {
        let worker = shell(
            r#"echo '{"success": true, "call_id": "from-sh"}'"#,
            Duration::from_secs(10),
        );
        let output = worker.run(Path::new("/tmp/t.json")).await.unwrap();
        assert_eq!(output.call_id.as_deref(), Some("from-sh"));
    }

    #[tokio::test]
    async fn test_non_zero_exit_keeps_stderr() {
        let worker = shell("echo boom >&2; exit 3", Duration::from_secs(10));
        match worker.run(Path::new("/tmp/t.json")).await {
            Err(WorkerError::NonZeroExit { code, stderr }) => {
                assert_eq!(code, Some(3));
                assert_eq!(stderr, "boom");
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_timeout_kills_worker() {
        let worker = shell("sleep 5", Duration::from_millis(200));
        let started = std::time::Instant::now();
        let err = worker.run(Path::new("/tmp/t.json")).await.unwrap_err();
        assert!(matches!(err, WorkerError::Timeout(_)));
        assert!(err.to_string().contains("timed out"));
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[tokio::test]
    async fn test_missing_program_is_spawn_error() {
        let worker = WorkerCommand {
            program: PathBuf::from("/nonexistent/worker-binary"),
            args: vec![],
            timeout: Duration::from_secs(1),
        };
        assert!(matches!(
            worker.run(Path::new("/tmp/t.json")).await,
            Err(WorkerError::Spawn(_))
        ));
    }
}
