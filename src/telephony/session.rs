//! # Call Session State
//!
//! The per-call state owned by one telephony socket actor. Nothing here does
//! I/O; the actor drives it and performs the side effects.
//!
//! ## Lifecycle:
//! ```text
//! Idle ──start──▶ Starting ──engine ready──▶ Active
//!   │                 │                         │
//!   └─────────────────┴────────▶ Closing ◀──────┘
//!                                   │
//!                                   ▼
//!                                 Closed
//! ```
//!
//! ## Key Rules:
//! - The first inbound media frame of every call is discarded
//! - Frames arriving while `Starting` are buffered and flushed on `Active`
//! - A session is `bridged` once it has reached `Active`

use crate::audio::buffer::{InboundBuffer, InboundBufferConfig};
use crate::records::model::{CallMetadata, ConversationTurn, LeadField, Role};
use crate::records::store::CallSummary;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Bridge state for one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    Idle,
    Starting,
    Active,
    Closing,
    Closed,
}

impl BridgeState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BridgeState::Idle => "idle",
            BridgeState::Starting => "starting",
            BridgeState::Active => "active",
            BridgeState::Closing => "closing",
            BridgeState::Closed => "closed",
        }
    }

    /// Forward-only transitions; every live state may move to `Closing`.
    pub fn can_transition_to(&self, next: BridgeState) -> bool {
        use BridgeState::*;
        matches!(
            (self, next),
            (Idle, Starting)
                | (Idle, Closing)
                | (Starting, Active)
                | (Starting, Closing)
                | (Active, Closing)
                | (Closing, Closed)
        )
    }

    pub fn is_open(&self) -> bool {
        matches!(self, BridgeState::Starting | BridgeState::Active)
    }
}

impl fmt::Display for BridgeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("invalid bridge transition {from} -> {to}")]
    InvalidTransition { from: BridgeState, to: BridgeState },

    #[error("call already started as {0}")]
    AlreadyStarted(String),
}

/// What to do with an inbound media frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameDisposition {
    /// First frame of the call, dropped
    Discard,
    /// Engine still connecting, keep it in the inbound buffer
    Buffer,
    /// Engine ready, send it now
    Forward,
    /// No live engine session (idle or closing)
    Ignore,
}

/// Mutable per-call state.
#[derive(Debug)]
pub struct CallSession {
    call_id: Option<String>,
    state: BridgeState,
    first_frame_seen: bool,
    inbound: InboundBuffer,
    conversation: Vec<ConversationTurn>,
    captures: BTreeMap<String, String>,
    metadata: CallMetadata,
    started_at: DateTime<Utc>,
    bridged: bool,
}

impl CallSession {
    pub fn new(buffer: InboundBufferConfig) -> Self {
        Self {
            call_id: None,
            state: BridgeState::Idle,
            first_frame_seen: false,
            inbound: InboundBuffer::new(buffer),
            conversation: Vec::new(),
            captures: BTreeMap::new(),
            metadata: CallMetadata::default(),
            started_at: Utc::now(),
            bridged: false,
        }
    }

    pub fn call_id(&self) -> Option<&str> {
        self.call_id.as_deref()
    }

    pub fn state(&self) -> BridgeState {
        self.state
    }

    pub fn is_bridged(&self) -> bool {
        self.bridged
    }

    pub fn conversation(&self) -> &[ConversationTurn] {
        &self.conversation
    }

    pub fn captures(&self) -> &BTreeMap<String, String> {
        &self.captures
    }

    fn transition(&mut self, next: BridgeState) -> Result<(), SessionError> {
        if !self.state.can_transition_to(next) {
            return Err(SessionError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        Ok(())
    }

    /// `Idle → Starting` on the vendor's start event.
    pub fn begin(&mut self, call_id: &str, metadata: CallMetadata) -> Result<(), SessionError> {
        if let Some(existing) = &self.call_id {
            return Err(SessionError::AlreadyStarted(existing.clone()));
        }
        self.transition(BridgeState::Starting)?;
        self.call_id = Some(call_id.to_string());
        self.metadata = metadata;
        self.started_at = Utc::now();
        Ok(())
    }

    /// `Starting → Active`. Returns the audio buffered while connecting.
    pub fn activate(&mut self) -> Result<Vec<i16>, SessionError> {
        self.transition(BridgeState::Active)?;
        self.bridged = true;
        Ok(self.inbound.drain())
    }

    /// Move to `Closing`. Returns `false` when the session was already closing or closed.
    pub fn begin_closing(&mut self) -> bool {
        if self.transition(BridgeState::Closing).is_err() {
            return false;
        }
        self.inbound.clear();
        true
    }

    /// `Closing → Closed`. Yields the summary for started calls only.
    pub fn finish(&mut self, ended_at: DateTime<Utc>) -> Option<CallSummary> {
        if self.transition(BridgeState::Closed).is_err() {
            return None;
        }
        self.summary(ended_at)
    }

    /// Decide the fate of one inbound frame and advance the first-frame flag.
    pub fn classify_frame(&mut self) -> FrameDisposition {
        if !self.state.is_open() {
            return FrameDisposition::Ignore;
        }
        if !self.first_frame_seen {
            self.first_frame_seen = true;
            return FrameDisposition::Discard;
        }
        match self.state {
            BridgeState::Starting => FrameDisposition::Buffer,
            _ => FrameDisposition::Forward,
        }
    }

    pub fn buffer_frame(&mut self, samples: &[i16]) {
        self.inbound.push(samples);
    }

    pub fn buffered_samples(&self) -> usize {
        self.inbound.len()
    }

    pub fn has_buffered_audio(&self) -> bool {
        !self.inbound.is_empty()
    }

    pub fn buffered_seconds(&self) -> f64 {
        self.inbound.duration_seconds()
    }

    /// Samples lost because the caller spoke longer than the buffer holds.
    pub fn evicted_samples(&self) -> usize {
        self.inbound.evicted()
    }

    /// Drop audio buffered while connecting. Returns the number of samples dropped.
    pub fn clear_buffered(&mut self) -> usize {
        let dropped = self.inbound.len();
        self.inbound.clear();
        dropped
    }

    /// Append a transcript line; blank text is ignored.
    pub fn record_turn(&mut self, role: Role, text: &str) {
        let text = text.trim();
        if text.is_empty() {
            return;
        }
        self.conversation
            .push(ConversationTurn::new(role, text, Utc::now()));
    }

    /// Record a value captured by the engine's capture tool.
    ///
    /// ## Returns:
    /// The recognized field, or `None` for an unknown field name or blank value.
    pub fn capture(&mut self, field: &str, value: &str) -> Option<LeadField> {
        let field = LeadField::parse(field)?;
        let value = value.trim();
        if value.is_empty() {
            return None;
        }
        self.captures
            .insert(field.key().to_string(), value.to_string());
        Some(field)
    }

    pub fn summary(&self, ended_at: DateTime<Utc>) -> Option<CallSummary> {
        let call_id = self.call_id.clone()?;
        Some(CallSummary {
            call_id,
            started_at: self.started_at,
            ended_at,
            metadata: self.metadata.clone(),
            conversation: self.conversation.clone(),
            captures: self.captures.clone(),
            bridged: self.bridged,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> CallSession {
        CallSession::new(InboundBufferConfig {
            sample_rate: 8000,
            max_duration_ms: 100,
        })
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut s = session();
        assert_eq!(s.state(), BridgeState::Idle);
        s.begin("c1", CallMetadata::default()).unwrap();
        assert_eq!(s.state(), BridgeState::Starting);
        s.activate().unwrap();
        assert!(s.is_bridged());
        assert!(s.begin_closing());
        assert!(!s.begin_closing());
        let summary = s.finish(Utc::now()).unwrap();
        assert_eq!(summary.call_id, "c1");
        assert!(summary.bridged);
        assert_eq!(s.state(), BridgeState::Closed);
    }

    #[test]
    fn test_invalid_transitions_rejected() {
        let mut s = session();
        assert_eq!(
            s.activate().unwrap_err(),
            SessionError::InvalidTransition {
                from: BridgeState::Idle,
                to: BridgeState::Active
            }
        );
        assert!(s.finish(Utc::now()).is_none());
        assert!(!BridgeState::Closed.can_transition_to(BridgeState::Idle));
        assert!(!BridgeState::Active.can_transition_to(BridgeState::Starting));
    }

    #[test]
    fn test_second_start_rejected() {
        let mut s = session();
        s.begin("c1", CallMetadata::default()).unwrap();
        assert_eq!(
            s.begin("c2", CallMetadata::default()).unwrap_err(),
            SessionError::AlreadyStarted("c1".to_string())
        );
    }

    #[test]
    fn test_first_frame_discarded_then_buffered_then_forwarded() {
        let mut s = session();
        assert_eq!(s.classify_frame(), FrameDisposition::Ignore);

        s.begin("c1", CallMetadata::default()).unwrap();
        assert_eq!(s.classify_frame(), FrameDisposition::Discard);
        assert_eq!(s.classify_frame(), FrameDisposition::Buffer);
        s.buffer_frame(&[1, 2, 3]);
        s.buffer_frame(&[4]);

        let flushed = s.activate().unwrap();
        assert_eq!(flushed, vec![1, 2, 3, 4]);
        assert_eq!(s.buffered_samples(), 0);
        assert_eq!(s.classify_frame(), FrameDisposition::Forward);

        s.begin_closing();
        assert_eq!(s.classify_frame(), FrameDisposition::Ignore);
    }

    #[test]
    fn test_clear_buffered_drops_pending_audio() {
        let mut s = session();
        s.begin("c1", CallMetadata::default()).unwrap();
        s.buffer_frame(&[5; 40]);
        assert!(s.has_buffered_audio());
        assert!((s.buffered_seconds() - 0.005).abs() < 1e-9);

        assert_eq!(s.clear_buffered(), 40);
        assert!(!s.has_buffered_audio());
        assert!(s.activate().unwrap().is_empty());
    }

    #[test]
    fn test_first_frame_discarded_when_engine_already_active() {
        let mut s = session();
        s.begin("c1", CallMetadata::default()).unwrap();
        s.activate().unwrap();
        assert_eq!(s.classify_frame(), FrameDisposition::Discard);
        assert_eq!(s.classify_frame(), FrameDisposition::Forward);
    }

    #[test]
    fn test_unbridged_call_summary() {
        let mut s = session();
        s.begin("c1", CallMetadata::default()).unwrap();
        assert!(s.begin_closing());
        let summary = s.finish(Utc::now()).unwrap();
        assert!(!summary.bridged);
    }

    #[test]
    fn test_close_before_start_has_no_summary() {
        let mut s = session();
        assert!(s.begin_closing());
        assert!(s.finish(Utc::now()).is_none());
    }

    #[test]
    fn test_capture_and_turns() {
        let mut s = session();
        assert_eq!(s.capture("name", " Gulshan Mehta "), Some(LeadField::FullName));
        assert_eq!(s.capture("car_model", "Scorpio"), Some(LeadField::CarModel));
        assert_eq!(s.capture("phone", "123"), None);
        assert_eq!(s.capture("email", "  "), None);
        assert_eq!(s.captures().get("full_name").map(String::as_str), Some("Gulshan Mehta"));

        s.record_turn(Role::Assistant, "What is your name?");
        s.record_turn(Role::User, "   ");
        assert_eq!(s.conversation().len(), 1);
    }
}
