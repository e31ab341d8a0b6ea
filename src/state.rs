//! # Application State Management
//!
//! Shared state handed to every HTTP handler and every telephony socket actor.
//!
//! ## Contents:
//! - **config**: Loaded configuration (read-only after startup)
//! - **metrics**: Pipeline counters behind `Arc<RwLock<..>>`
//! - **registry**: Address of the session registry actor (the only writer of the call map)
//! - **engine**: Voice engine used to open one conversation per call
//! - **data**: Flat-file data directory
//! - **guardrail**: Blocked-phrase patterns, compiled once for every call
//!
//! ## Arc<RwLock<T>> Pattern
//! Counters are bumped from many actors and background tasks while the metrics
//! endpoint reads them; a reader-writer lock lets reads proceed in parallel and
//! keeps each increment atomic.

use crate::config::AppConfig;
use crate::engine::{Guardrail, VoiceEngine};
use crate::records::DataDir;
use crate::telephony::registry::SessionRegistry;
use actix::Addr;
use serde::Serialize;
use std::sync::{Arc, RwLock};
use std::time::Instant;

/// Counters describing the call pipeline since startup.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct PipelineMetrics {
    /// Telephony sockets currently holding a registered call
    pub active_calls: u32,
    /// Calls whose engine session became active
    pub calls_bridged: u64,
    /// Calls that ended without an active engine session
    pub calls_unbridged: u64,
    pub frames_forwarded: u64,
    pub frames_dropped: u64,
    pub extractions_completed: u64,
    pub extractions_failed: u64,
    pub webhooks_succeeded: u64,
    pub webhooks_failed: u64,
}

/// Cloneable handle to the pipeline counters.
#[derive(Debug, Clone, Default)]
pub struct SharedMetrics(Arc<RwLock<PipelineMetrics>>);

impl SharedMetrics {
    /// Apply one change under the write lock.
    ///
    /// A poisoned lock still holds valid counters, so it is recovered rather than propagated.
    pub fn update(&self, change: impl FnOnce(&mut PipelineMetrics)) {
        let mut metrics = self.0.write().unwrap_or_else(|e| e.into_inner());
        change(&mut metrics);
    }

    /// Copy of the current counters; the lock is released before returning.
    pub fn snapshot(&self) -> PipelineMetrics {
        self.0.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn call_started(&self) {
        self.update(|m| m.active_calls += 1);
    }

    /// Underflow-safe decrement.
    pub fn call_ended(&self, bridged: bool) {
        self.update(|m| {
            m.active_calls = m.active_calls.saturating_sub(1);
            if bridged {
                m.calls_bridged += 1;
            } else {
                m.calls_unbridged += 1;
            }
        });
    }
}

/// State shared across handlers and actors.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub metrics: SharedMetrics,
    pub registry: Addr<SessionRegistry>,
    pub engine: Arc<dyn VoiceEngine>,
    pub data: DataDir,
    pub guardrail: Arc<Guardrail>,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        metrics: SharedMetrics,
        registry: Addr<SessionRegistry>,
        engine: Arc<dyn VoiceEngine>,
    ) -> Self {
        let data = DataDir::new(config.storage.root());
        let guardrail = Arc::new(Guardrail::new(&config.engine.blocked_patterns));
        Self {
            config: Arc::new(config),
            metrics,
            registry,
            engine,
            data,
            guardrail,
            start_time: Instant::now(),
        }
    }

    pub fn get_config(&self) -> &AppConfig {
        &self.config
    }

    pub fn get_metrics_snapshot(&self) -> PipelineMetrics {
        self.metrics.snapshot()
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_counters() {
        let metrics = SharedMetrics::default();
        metrics.call_started();
        metrics.call_started();
        metrics.call_ended(true);
        metrics.call_ended(false);
        metrics.call_ended(false);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.active_calls, 0);
        assert_eq!(snapshot.calls_bridged, 1);
        assert_eq!(snapshot.calls_unbridged, 2);
    }

    #[test]
    fn test_clones_share_counters() {
        let metrics = SharedMetrics::default();
        let other = metrics.clone();
        other.update(|m| m.frames_forwarded += 5);
        assert_eq!(metrics.snapshot().frames_forwarded, 5);
    }
}
