//! # Realtime WebSocket Engine
//!
//! [`VoiceEngine`] over the realtime JSON event protocol.
//!
//! ## Connection Flow:
//! 1. Open the WebSocket with bearer auth
//! 2. Wait for `session.created`
//! 3. Send `session.update` (pcm16 in/out, voice, instructions, tools, input transcription)
//! 4. Split into a writer task (commands → client events) and a reader task
//!    (server events → [`EngineEvent`])
//!
//! Steps 1-3 run under `engine.connect_timeout_secs`. Mid-call disconnects are
//! not retried; the bridge sees `EngineEvent::Closed` and closes the call.

use super::agent::AgentResource;
use super::protocol::{
    ClientEvent, FunctionCallOutputItem, ServerEvent, SessionConfig, TranscriptionConfig,
    TurnDetection,
};
use super::{EngineCommand, EngineError, EngineEvent, EngineHandle, VoiceEngine};
use crate::config::EngineConfig;
use futures_util::future::BoxFuture;
use futures_util::{FutureExt, Sink, SinkExt, Stream, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct RealtimeEngine {
    config: EngineConfig,
}

impl RealtimeEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }
}

impl VoiceEngine for RealtimeEngine {
    fn connect(
        &self,
        call_id: String,
        agent: AgentResource,
        events: mpsc::UnboundedSender<EngineEvent>,
    ) -> BoxFuture<'static, Result<EngineHandle, EngineError>> {
        let config = self.config.clone();
        async move {
            let limit = config.connect_timeout_secs;
            tokio::time::timeout(
                Duration::from_secs(limit),
                open_session(config, call_id, agent, events),
            )
            .await
            .map_err(|_| EngineError::Timeout(limit))?
        }
        .boxed()
    }
}

async fn open_session(
    config: EngineConfig,
    call_id: String,
    agent: AgentResource,
    events: mpsc::UnboundedSender<EngineEvent>,
) -> Result<EngineHandle, EngineError> {
    let api_key = config.resolved_api_key().ok_or(EngineError::MissingApiKey)?;

    let mut request = config
        .url
        .as_str()
        .into_client_request()
        .map_err(|e| EngineError::Connect(e.to_string()))?;
    let bearer = HeaderValue::from_str(&format!("Bearer {}", api_key))
        .map_err(|e| EngineError::Connect(e.to_string()))?;
    request.headers_mut().insert("Authorization", bearer);
    request
        .headers_mut()
        .insert("OpenAI-Beta", HeaderValue::from_static("realtime=v1"));

    debug!(call_id = %call_id, url = %config.url, "Connecting to voice engine");
    let (stream, _response) = connect_async(request)
        .await
        .map_err(|e| EngineError::Connect(e.to_string()))?;
    let (mut write, mut read) = stream.split();

    let session_id = wait_for_session(&mut read).await?;
    info!(call_id = %call_id, session_id = %session_id, "Engine session created");

    let update = ClientEvent::SessionUpdate {
        session: session_config(&config, &agent),
    };
    send_event(&mut write, &update).await?;

    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(write_loop(call_id.clone(), write, rx));
    tokio::spawn(read_loop(call_id, read, events));
    Ok(EngineHandle::new(tx))
}

/// `session.update` body for this engine config and agent.
pub fn session_config(config: &EngineConfig, agent: &AgentResource) -> SessionConfig {
    SessionConfig {
        modalities: vec!["audio".to_string(), "text".to_string()],
        instructions: agent.instructions.clone(),
        voice: agent.voice.clone().unwrap_or_else(|| config.voice.clone()),
        input_audio_format: "pcm16".to_string(),
        output_audio_format: "pcm16".to_string(),
        input_audio_transcription: TranscriptionConfig {
            model: config.transcription_model.clone(),
        },
        turn_detection: if config.manual_turn_commit {
            None
        } else {
            Some(TurnDetection::server_vad())
        },
        tools: agent.tools.clone(),
        tool_choice: "auto".to_string(),
    }
}

async fn wait_for_session<S>(read: &mut S) -> Result<String, EngineError>
where
    S: Stream<Item = Result<Message, WsError>> + Unpin,
{
    while let Some(message) = read.next().await {
        match message {
            Ok(Message::Text(text)) => match serde_json::from_str::<ServerEvent>(&text) {
                Ok(ServerEvent::SessionCreated { session }) => return Ok(session.id),
                Ok(ServerEvent::Error { error }) => {
                    return Err(EngineError::Connect(error.message));
                }
                Ok(_) => debug!("Ignoring event while waiting for session.created"),
                Err(e) => warn!(error = %e, "Unparseable engine event"),
            },
            Ok(Message::Close(_)) => {
                return Err(EngineError::Connect(
                    "closed before session.created".to_string(),
                ));
            }
            Ok(_) => {}
            Err(e) => return Err(EngineError::Protocol(e.to_string())),
        }
    }
    Err(EngineError::Connect("stream ended before session.created".to_string()))
}

async fn send_event<S>(write: &mut S, event: &ClientEvent) -> Result<(), EngineError>
where
    S: Sink<Message, Error = WsError> + Unpin,
{
    let json = serde_json::to_string(event).map_err(|e| EngineError::Protocol(e.to_string()))?;
    write
        .send(Message::Text(json))
        .await
        .map_err(|e| EngineError::Protocol(e.to_string()))
}

/// Wire event for a bridge command; `Close` has none.
pub fn client_event_for(command: EngineCommand) -> Option<ClientEvent> {
    match command {
        EngineCommand::AppendAudio(audio) => Some(ClientEvent::AudioAppend { audio }),
        EngineCommand::Commit => Some(ClientEvent::AudioCommit),
        EngineCommand::CreateResponse => Some(ClientEvent::ResponseCreate),
        EngineCommand::CancelResponse => Some(ClientEvent::ResponseCancel),
        EngineCommand::ClearInput => Some(ClientEvent::AudioClear),
        EngineCommand::ToolOutput { call_id, output } => Some(ClientEvent::ItemCreate {
            item: FunctionCallOutputItem::new(call_id, output),
        }),
        EngineCommand::Close => None,
    }
}

/// Bridge event for a server event; events the bridge ignores map to `None`.
pub fn engine_event_for(event: ServerEvent) -> Option<EngineEvent> {
    match event {
        ServerEvent::AudioDelta { delta } => Some(EngineEvent::AudioDelta(delta)),
        ServerEvent::AudioDone => Some(EngineEvent::AudioDone),
        ServerEvent::AssistantTranscriptDone { transcript } => {
            Some(EngineEvent::AssistantTranscript(transcript))
        }
        ServerEvent::UserTranscriptCompleted { transcript } => {
            Some(EngineEvent::UserTranscript(transcript))
        }
        ServerEvent::FunctionCallArgumentsDone {
            call_id,
            name,
            arguments,
        } => Some(EngineEvent::ToolCall {
            call_id,
            name,
            arguments,
        }),
        ServerEvent::SpeechStarted => Some(EngineEvent::SpeechStarted),
        ServerEvent::Error { error } => Some(EngineEvent::Error(error.message)),
        ServerEvent::SessionCreated { .. }
        | ServerEvent::SessionUpdated { .. }
        | ServerEvent::Unknown => None,
    }
}

async fn write_loop<S>(call_id: String, mut write: S, mut commands: mpsc::UnboundedReceiver<EngineCommand>)
where
    S: Sink<Message, Error = WsError> + Unpin,
{
    while let Some(command) = commands.recv().await {
        let Some(event) = client_event_for(command) else {
            break;
        };
        if let Err(e) = send_event(&mut write, &event).await {
            warn!(call_id = %call_id, error = %e, "Engine send failed");
            break;
        }
    }
    if let Err(e) = write.close().await {
        debug!(call_id = %call_id, error = %e, "Engine socket close failed");
    }
    debug!(call_id = %call_id, "Engine writer finished");
}

async fn read_loop<S>(call_id: String, mut read: S, events: mpsc::UnboundedSender<EngineEvent>)
where
    S: Stream<Item = Result<Message, WsError>> + Unpin,
{
    while let Some(message) = read.next().await {
        match message {
            Ok(Message::Text(text)) => match serde_json::from_str::<ServerEvent>(&text) {
                Ok(event) => {
                    if let Some(event) = engine_event_for(event) {
                        if events.send(event).is_err() {
                            break;
                        }
                    }
                }
                Err(e) => warn!(call_id = %call_id, error = %e, "Unparseable engine event"),
            },
            Ok(Message::Close(frame)) => {
                info!(call_id = %call_id, ?frame, "Engine closed the session");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                warn!(call_id = %call_id, error = %e, "Engine socket error");
                break;
            }
        }
    }
    let _ = events.send(EngineEvent::Closed);
}
