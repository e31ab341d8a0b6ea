//! # Voice Engine Client
//!
//! The bridge's view of the remote voice-conversation engine: a black box that
//! takes caller audio and produces assistant audio, transcripts and tool calls.
//!
//! ## Key Components:
//! - **VoiceEngine**: Trait seam; one `connect` per call
//! - **EngineHandle**: Fire-and-forget command sender for a connected session
//! - **EngineEvent**: Everything the engine reports back to the bridge
//! - **realtime**: WebSocket implementation of the realtime event protocol
//! - **agent**: Instructions and tools attached at session creation
//! - **guardrail**: Blocked-phrase check on assistant output
//!
//! ## Audio Format:
//! All audio crossing this seam is base64 PCM16 mono at the engine sample rate.

pub mod agent;
pub mod guardrail;
pub mod protocol;
pub mod realtime;

use futures_util::future::BoxFuture;
use thiserror::Error;
use tokio::sync::mpsc;

pub use agent::AgentResource;
pub use guardrail::Guardrail;
pub use realtime::RealtimeEngine;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("engine connection failed: {0}")]
    Connect(String),

    #[error("engine did not become ready within {0}s")]
    Timeout(u64),

    #[error("engine protocol error: {0}")]
    Protocol(String),

    #[error("no engine API key configured")]
    MissingApiKey,

    #[error("agent resource error: {0}")]
    Agent(String),

    #[error("engine session is closed")]
    Closed,
}

/// Events delivered to the bridge for one session.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// Assistant audio chunk, base64 PCM16 at the engine rate
    AudioDelta(String),
    UserTranscript(String),
    AssistantTranscript(String),
    ToolCall {
        call_id: String,
        name: String,
        arguments: String,
    },
    /// The assistant finished speaking for the current response
    AudioDone,
    /// The caller started talking over the assistant
    SpeechStarted,
    Error(String),
    /// The engine side of the session ended
    Closed,
}

/// Commands accepted by a connected session.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineCommand {
    AppendAudio(String),
    Commit,
    CreateResponse,
    CancelResponse,
    ClearInput,
    ToolOutput { call_id: String, output: String },
    Close,
}

/// Sender side of a connected session. Sending never blocks the caller.
#[derive(Debug, Clone)]
pub struct EngineHandle {
    commands: mpsc::UnboundedSender<EngineCommand>,
}

impl EngineHandle {
    pub fn new(commands: mpsc::UnboundedSender<EngineCommand>) -> Self {
        Self { commands }
    }

    pub fn send(&self, command: EngineCommand) -> Result<(), EngineError> {
        self.commands.send(command).map_err(|_| EngineError::Closed)
    }

    /// Append one chunk of caller audio, optionally followed by commit + response.
    pub fn forward_audio(&self, audio: String, commit_turn: bool) -> Result<(), EngineError> {
        self.send(EngineCommand::AppendAudio(audio))?;
        if commit_turn {
            self.send(EngineCommand::Commit)?;
            self.send(EngineCommand::CreateResponse)?;
        }
        Ok(())
    }
}

/// A voice-conversation engine able to open one session per call.
pub trait VoiceEngine: Send + Sync {
    /// Open a session for `call_id` with `agent` attached.
    ///
    /// ## Parameters:
    /// - `events`: Receives every [`EngineEvent`] of the session, ending with `Closed`
    ///
    /// ## Returns:
    /// A handle once the session is configured and ready for audio.
    fn connect(
        &self,
        call_id: String,
        agent: AgentResource,
        events: mpsc::UnboundedSender<EngineEvent>,
    ) -> BoxFuture<'static, Result<EngineHandle, EngineError>>;
}

#[cfg(test)]
pub mod mock {
    //! In-process engine for bridge tests.

    use super::*;
    use futures_util::FutureExt;
    use std::sync::{Arc, Mutex};

    /// Records every command and exposes the event sender of the last session.
    #[derive(Clone, Default)]
    pub struct MockEngine {
        pub commands: Arc<Mutex<Vec<EngineCommand>>>,
        pub events: Arc<Mutex<Option<mpsc::UnboundedSender<EngineEvent>>>>,
        pub fail: bool,
        /// Hold the session in connecting for this long
        pub connect_delay: Option<std::time::Duration>,
    }

    impl MockEngine {
        pub fn failing() -> Self {
            Self {
                fail: true,
                ..Default::default()
            }
        }

        pub fn slow(delay: std::time::Duration) -> Self {
            Self {
                connect_delay: Some(delay),
                ..Default::default()
            }
        }

        pub fn recorded(&self) -> Vec<EngineCommand> {
            self.commands.lock().unwrap().clone()
        }

        /// Push an event as if the engine had sent it.
        pub fn emit(&self, event: EngineEvent) {
            if let Some(tx) = self.events.lock().unwrap().as_ref() {
                let _ = tx.send(event);
            }
        }
    }

    impl VoiceEngine for MockEngine {
        fn connect(
            &self,
            _call_id: String,
            _agent: AgentResource,
            events: mpsc::UnboundedSender<EngineEvent>,
        ) -> BoxFuture<'static, Result<EngineHandle, EngineError>> {
            let fail = self.fail;
            let delay = self.connect_delay;
            let commands = self.commands.clone();
            let slot = self.events.clone();
            async move {
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                if fail {
                    return Err(EngineError::Connect("mock refused".to_string()));
                }
                *slot.lock().unwrap() = Some(events);
                let (tx, mut rx) = mpsc::unbounded_channel();
                tokio::spawn(async move {
                    while let Some(cmd) = rx.recv().await {
                        commands.lock().unwrap().push(cmd);
                    }
                });
                Ok(EngineHandle::new(tx))
            }
            .boxed()
        }
    }
}
