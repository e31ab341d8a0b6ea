//! # Configuration Management
//!
//! This module handles loading and managing application configuration from multiple sources:
//! - TOML configuration files (config.toml)
//! - Environment variables (with APP_ prefix, `__` between nesting levels)
//! - Default values (built into the code)
//!
//! ## Configuration Priority (highest to lowest):
//! 1. `HOST` / `PORT` (deployment platforms)
//! 2. Environment variables (APP_SERVER__PORT, APP_WEBHOOK__VENDOR_URL, etc.)
//! 3. Configuration file (config.toml)
//! 4. Default values (defined in the Default impls)

use crate::audio::{NoiseSuppression, QualityTier};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Main application configuration that contains all settings.
///
/// ## Sections:
/// - **server**: HTTP/WebSocket listener
/// - **telephony**: Vendor media stream format and socket liveness
/// - **engine**: Voice conversation engine connection and agent resource
/// - **audio**: Resampling quality and noise suppression
/// - **storage**: Root of the flat-file data directory
/// - **queue**: Transcript extraction poller and worker
/// - **webhook**: Outcome delivery endpoints and retry policy
/// - **analysis**: Tunables for the call-outcome heuristics
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub telephony: TelephonyConfig,
    pub engine: EngineConfig,
    pub audio: AudioConfig,
    pub storage: StorageConfig,
    pub queue: QueueConfig,
    pub webhook: WebhookConfig,
    pub analysis: AnalysisConfig,
}

/// Server-specific configuration settings.
///
/// ## Common values:
/// - `host = "127.0.0.1"`: Only accept connections from localhost (development)
/// - `host = "0.0.0.0"`: Accept vendor connections from any address (production)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

/// Telephony media stream settings.
///
/// ## Fields:
/// - `sample_rate`: Rate of the vendor's PCM16 stream (narrowband 8kHz)
/// - `frame_ms`: Playback frame duration; outbound audio is padded to whole frames
/// - `heartbeat_interval_secs` / `client_timeout_secs`: Socket liveness checks
/// - `max_buffer_ms`: Inbound audio kept while the engine connects
/// - `max_active_calls`: Registry capacity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelephonyConfig {
    pub sample_rate: u32,
    pub frame_ms: u32,
    pub heartbeat_interval_secs: u64,
    pub client_timeout_secs: u64,
    pub max_buffer_ms: u32,
    pub max_active_calls: usize,
}

impl Default for TelephonyConfig {
    fn default() -> Self {
        Self {
            sample_rate: 8000,
            frame_ms: 20,
            heartbeat_interval_secs: 30,
            client_timeout_secs: 60,
            max_buffer_ms: 2000,
            max_active_calls: 100,
        }
    }
}

impl TelephonyConfig {
    /// Samples per playback frame (160 at 8kHz / 20ms).
    pub fn frame_samples(&self) -> usize {
        (self.sample_rate as usize * self.frame_ms as usize) / 1000
    }
}

/// Voice conversation engine settings.
///
/// ## Fields:
/// - `url`: Realtime WebSocket endpoint
/// - `api_key`: Bearer token; falls back to `OPENAI_API_KEY` when empty
/// - `sample_rate`: PCM16 rate negotiated with the engine (24kHz)
/// - `agent_file`: Opaque JSON agent resource (instructions, tools); empty uses the built-in agent
/// - `manual_turn_commit`: Send commit + response after each forwarded frame
/// - `blocked_patterns`: Guardrail regexes checked against assistant transcripts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub url: String,
    pub api_key: String,
    pub voice: String,
    pub sample_rate: u32,
    pub transcription_model: String,
    pub agent_file: String,
    pub connect_timeout_secs: u64,
    pub manual_turn_commit: bool,
    pub blocked_patterns: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            url: "wss://api.openai.com/v1/realtime?model=gpt-4o-realtime-preview-2024-12-17"
                .to_string(),
            api_key: String::new(),
            voice: "alloy".to_string(),
            sample_rate: 24000,
            transcription_model: "whisper-1".to_string(),
            agent_file: String::new(),
            connect_timeout_secs: 10,
            manual_turn_commit: true,
            blocked_patterns: vec![
                r"(?i)\b(credit card|cvv|otp)\b".to_string(),
                r"(?i)\bguaranteed (discount|price)\b".to_string(),
            ],
        }
    }
}

impl EngineConfig {
    /// API key from config, or from `OPENAI_API_KEY` when the config value is empty.
    pub fn resolved_api_key(&self) -> Option<String> {
        if !self.api_key.is_empty() {
            return Some(self.api_key.clone());
        }
        env::var("OPENAI_API_KEY").ok().filter(|k| !k.is_empty())
    }
}

/// Audio processing choices.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AudioConfig {
    pub resample_quality: QualityTier,
    pub noise_suppression: NoiseSuppression,
}

/// Flat-file storage root.
///
/// ## Layout:
/// - `{data_dir}/transcripts/`: raw transcripts written at call end
/// - `{data_dir}/call_records/`: canonical call records
/// - `{data_dir}/queue/`: extraction queue entries
/// - `{data_dir}/results/`: extraction results
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: "data".to_string(),
        }
    }
}

impl StorageConfig {
    pub fn root(&self) -> PathBuf {
        PathBuf::from(&self.data_dir)
    }
}

/// Transcript extraction queue settings.
///
/// ## Fields:
/// - `poll_interval_ms`: Delay between queue scans
/// - `worker_timeout_secs`: Hard limit per extraction; the worker is killed afterwards
/// - `max_concurrent_extractions`: Upper bound on simultaneous worker processes
/// - `worker_program` / `worker_args`: External worker; empty program runs this binary in `extract` mode
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    pub poll_interval_ms: u64,
    pub worker_timeout_secs: u64,
    pub max_concurrent_extractions: usize,
    pub worker_program: String,
    pub worker_args: Vec<String>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 5000,
            worker_timeout_secs: 120,
            max_concurrent_extractions: 2,
            worker_program: String::new(),
            worker_args: Vec::new(),
        }
    }
}

impl QueueConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn worker_timeout(&self) -> Duration {
        Duration::from_secs(self.worker_timeout_secs)
    }
}

/// Outcome webhook settings.
///
/// ## Retry Policy:
/// Each payload is attempted up to `max_attempts` times, sleeping
/// `attempt * base_delay_ms` between attempts. An empty URL disables that webhook.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    pub vendor_url: String,
    pub business_url: String,
    pub call_vendor: String,
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub request_timeout_secs: u64,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            vendor_url: String::new(),
            business_url: String::new(),
            call_vendor: "telephony".to_string(),
            max_attempts: 3,
            base_delay_ms: 1000,
            request_timeout_secs: 10,
        }
    }
}

/// Call-outcome heuristic tunables.
///
/// ## Fields:
/// - `handoff_match_threshold`: Independent keyword matches needed in one utterance for a human handoff
/// - `reattempt_limit`: Average re-asks per question above which comprehension failed
/// - `apology_threshold`: Apology/repeat assistant utterances that signal comprehension failure
/// - `fallback_language` / `welcome_language`: Language labels for the business payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisConfig {
    pub handoff_match_threshold: usize,
    pub reattempt_limit: f64,
    pub apology_threshold: usize,
    pub fallback_language: String,
    pub welcome_language: String,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            handoff_match_threshold: 2,
            reattempt_limit: 2.0,
            apology_threshold: 2,
            fallback_language: "english".to_string(),
            welcome_language: "english".to_string(),
        }
    }
}

impl AppConfig {
    /// Load configuration from multiple sources in priority order.
    ///
    /// ## Environment Variable Examples:
    /// - `APP_SERVER__PORT=3000`: Override server port
    /// - `APP_QUEUE__WORKER_TIMEOUT_SECS=60`: Override the worker timeout
    /// - `APP_WEBHOOK__BUSINESS_URL=https://crm.example/leads`: Enable the business webhook
    /// - `HOST=0.0.0.0` / `PORT=3000`: Special cases for deployment platforms
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            // 1. Start with defaults
            .add_source(config::Config::try_from(&AppConfig::default())?)
            // 2. config.toml if present
            .add_source(config::File::with_name("config").required(false))
            // 3. APP_ environment variables; `__` separates nesting so field names keep their underscores
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("engine.blocked_patterns")
                    .with_list_parse_key("queue.worker_args")
                    .try_parsing(true),
            );

        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    ///
    /// ## Why validate:
    /// A zero interval or concurrency would stall the queue silently, and a zero
    /// sample rate would make every resample fail; catching these at startup gives
    /// a clear message instead.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.telephony.sample_rate == 0 || self.engine.sample_rate == 0 {
            return Err(anyhow::anyhow!("Sample rates must be greater than 0"));
        }

        if self.telephony.frame_samples() == 0 {
            return Err(anyhow::anyhow!("Telephony frame duration must be greater than 0"));
        }

        if self.telephony.max_active_calls == 0 {
            return Err(anyhow::anyhow!("Max active calls must be greater than 0"));
        }

        if self.telephony.heartbeat_interval_secs == 0 || self.telephony.client_timeout_secs == 0 {
            return Err(anyhow::anyhow!("Heartbeat interval and client timeout must be greater than 0"));
        }

        if self.queue.poll_interval_ms == 0 {
            return Err(anyhow::anyhow!("Queue poll interval must be greater than 0"));
        }

        if self.queue.worker_timeout_secs == 0 {
            return Err(anyhow::anyhow!("Worker timeout must be greater than 0"));
        }

        if self.queue.max_concurrent_extractions == 0 {
            return Err(anyhow::anyhow!("Max concurrent extractions must be greater than 0"));
        }

        if self.webhook.request_timeout_secs == 0 {
            return Err(anyhow::anyhow!("Webhook request timeout must be greater than 0"));
        }

        if self.webhook.max_attempts == 0 {
            return Err(anyhow::anyhow!("Webhook max attempts must be greater than 0"));
        }

        if self.analysis.handoff_match_threshold == 0 {
            return Err(anyhow::anyhow!("Handoff match threshold must be greater than 0"));
        }

        Ok(())
    }
}
