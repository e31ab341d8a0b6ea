//! # Telephony WebSocket Bridge
//!
//! One actor per vendor connection on `/ws/telephony`. The actor owns the
//! call's [`CallSession`], the voice engine handle and the audio converters, so
//! every frame of a call is handled in arrival order by a single mailbox.
//!
//! ## Flow:
//! 1. **start**: Register the call id, then connect the engine in the background
//! 2. **media**: Discard the first frame, buffer while connecting, then
//!    denoise → resample to the engine rate → append (+ commit/respond)
//! 3. **engine audio**: Decode → resample to the telephony rate → whole frames
//!    as media envelopes back to the vendor; a partial frame waits for the next
//!    chunk and is only padded with silence when the response ends
//! 4. **stop / callDisconnect / socket close / heartbeat timeout**: Close the
//!    engine session, unregister, write the call record
//!
//! ## Message Format:
//! - **Vendor → Server**: JSON text frames, see [`super::protocol`]
//! - **Server → Vendor**: media envelopes and `clearBuffer` / `callDisconnect` commands

use super::protocol::{
    command_envelope, media_envelope, parse_inbound, InboundMessage, MediaFrame, VendorCommand,
    VendorEvent,
};
use super::registry::{Register, Unregister};
use super::session::{BridgeState, CallSession, FrameDisposition};
use crate::audio::buffer::InboundBufferConfig;
use crate::audio::codec::{decode_frame, encode_frame, pad_to_frame};
use crate::audio::denoise::{suppressor_for, NoiseSuppressor};
use crate::audio::resample::resample;
use crate::audio::CodecError;
use crate::engine::agent::{CaptureArgs, CAPTURE_TOOL, END_CALL_TOOL};
use crate::engine::{AgentResource, EngineCommand, EngineError, EngineEvent, EngineHandle};
use crate::records::model::{CallMetadata, Role};
use crate::records::store::persist_call;
use crate::state::AppState;

use actix::prelude::*;
use actix_web::{web, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use chrono::Utc;
use serde_json::json;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Per-frame failures; the frame is dropped and the call continues.
#[derive(Debug, Error)]
enum FrameError {
    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("envelope encoding failed: {0}")]
    Envelope(#[from] serde_json::Error),

    #[error("no engine session")]
    NoEngine,
}

pub struct TelephonyWebSocket {
    /// Identifies this socket to the registry
    connection: Uuid,
    session: CallSession,
    app: AppState,
    engine: Option<EngineHandle>,
    suppressor: Box<dyn NoiseSuppressor>,
    /// Telephony-rate engine audio shorter than one vendor frame
    outbound: Vec<i16>,
    /// Set once the registry accepted this connection's call id
    registered: bool,
    last_heartbeat: Instant,
}

impl TelephonyWebSocket {
    pub fn new(app: AppState) -> Self {
        let config = app.get_config();
        let session = CallSession::new(InboundBufferConfig {
            sample_rate: config.telephony.sample_rate,
            max_duration_ms: config.telephony.max_buffer_ms,
        });
        let suppressor = suppressor_for(config.audio.noise_suppression);
        Self {
            connection: Uuid::new_v4(),
            session,
            app,
            engine: None,
            suppressor,
            outbound: Vec::new(),
            registered: false,
            last_heartbeat: Instant::now(),
        }
    }

    fn call_label(&self) -> String {
        self.session.call_id().unwrap_or("-").to_string()
    }

    fn handle_text(&mut self, text: &str, ctx: &mut ws::WebsocketContext<Self>) {
        match parse_inbound(text) {
            Ok(InboundMessage::Event(event)) => self.handle_event(event, ctx),
            Ok(InboundMessage::Command(command)) => self.handle_command(command, ctx),
            Err(e) => {
                warn!(call_id = %self.call_label(), error = %e, "Dropping unparseable vendor frame");
                self.app.metrics.update(|m| m.frames_dropped += 1);
            }
        }
    }

    fn handle_event(&mut self, event: VendorEvent, ctx: &mut ws::WebsocketContext<Self>) {
        match event {
            VendorEvent::Start {
                id,
                customer_number,
                store_code,
                recording_url,
            } => {
                let metadata = CallMetadata {
                    customer_number,
                    store_code,
                    recording_url,
                };
                self.handle_start(id, metadata, ctx);
            }
            VendorEvent::Media { data, .. } => self.handle_media(data),
            VendorEvent::Stop { id } => {
                if self.session.call_id() != Some(id.as_str()) {
                    warn!(call_id = %self.call_label(), stop_id = %id, "Ignoring stop for another call");
                    return;
                }
                self.close(ctx, "stop event");
            }
        }
    }

    fn handle_command(&mut self, command: VendorCommand, ctx: &mut ws::WebsocketContext<Self>) {
        match command {
            VendorCommand::ClearBuffer => {
                let dropped = self.session.clear_buffered();
                debug!(call_id = %self.call_label(), dropped, "Vendor cleared buffer");
                if let Some(engine) = &self.engine {
                    if let Err(e) = engine.send(EngineCommand::ClearInput) {
                        warn!(call_id = %self.call_label(), error = %e, "Engine clear failed");
                    }
                }
            }
            VendorCommand::CallDisconnect => self.close(ctx, "vendor disconnect"),
        }
    }

    /// `Idle → Starting`: claim the call id before anything else touches the mailbox.
    fn handle_start(&mut self, call_id: String, metadata: CallMetadata, ctx: &mut ws::WebsocketContext<Self>) {
        if let Err(e) = self.session.begin(&call_id, metadata) {
            warn!(call_id = %call_id, error = %e, "Rejecting start event");
            return;
        }
        info!(call_id = %call_id, connection = %self.connection, "Call starting");

        let register = self.app.registry.send(Register {
            call_id: call_id.clone(),
            connection: self.connection,
        });
        ctx.wait(register.into_actor(self).map(move |result, act, ctx| match result {
            Ok(Ok(())) => {
                act.registered = true;
                act.app.metrics.call_started();
                act.connect_engine(call_id, ctx);
            }
            Ok(Err(e)) => {
                warn!(call_id = %call_id, error = %e, "Registry refused call");
                act.close(ctx, "registration refused");
            }
            Err(e) => {
                error!(call_id = %call_id, error = %e, "Registry unavailable");
                act.close(ctx, "registry unavailable");
            }
        }));
    }

    fn connect_engine(&mut self, call_id: String, ctx: &mut ws::WebsocketContext<Self>) {
        let agent = match AgentResource::load(&self.app.config.engine.agent_file) {
            Ok(agent) => agent,
            Err(e) => {
                error!(call_id = %call_id, error = %e, "Cannot load agent resource");
                self.close(ctx, "agent unavailable");
                return;
            }
        };

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        ctx.add_stream(UnboundedReceiverStream::new(events_rx));

        let connect = self.app.engine.connect(call_id, agent, events_tx);
        ctx.spawn(
            connect
                .into_actor(self)
                .map(|result, act, ctx| act.on_engine_connected(result, ctx)),
        );
    }

    /// `Starting → Active` on success; on failure the call stays unbridged and is closed.
    fn on_engine_connected(
        &mut self,
        result: Result<EngineHandle, EngineError>,
        ctx: &mut ws::WebsocketContext<Self>,
    ) {
        let handle = match result {
            Ok(handle) => handle,
            Err(e) => {
                error!(call_id = %self.call_label(), error = %e, "Engine connect failed, call unbridged");
                self.close(ctx, "engine unavailable");
                return;
            }
        };

        if self.session.state() != BridgeState::Starting {
            let _ = handle.send(EngineCommand::Close);
            return;
        }

        if self.session.has_buffered_audio() {
            debug!(
                call_id = %self.call_label(),
                samples = self.session.buffered_samples(),
                seconds = self.session.buffered_seconds(),
                evicted = self.session.evicted_samples(),
                "Flushing audio buffered while connecting"
            );
        }
        let buffered = match self.session.activate() {
            Ok(buffered) => buffered,
            Err(e) => {
                warn!(call_id = %self.call_label(), error = %e, "Cannot activate session");
                let _ = handle.send(EngineCommand::Close);
                return;
            }
        };
        self.engine = Some(handle);
        info!(call_id = %self.call_label(), buffered = buffered.len(), "Engine session active");

        if !buffered.is_empty() {
            if let Err(e) = self.forward_samples(&buffered) {
                warn!(call_id = %self.call_label(), error = %e, "Dropping buffered audio");
            }
        }
    }

    fn handle_media(&mut self, frame: MediaFrame) {
        match self.session.classify_frame() {
            FrameDisposition::Discard => {
                debug!(call_id = %self.call_label(), "Discarding first inbound frame");
            }
            FrameDisposition::Ignore => {
                self.app.metrics.update(|m| m.frames_dropped += 1);
            }
            disposition => {
                if let Err(e) = frame.validate(self.app.config.telephony.sample_rate) {
                    warn!(call_id = %self.call_label(), error = %e, "Dropping malformed frame");
                    self.app.metrics.update(|m| m.frames_dropped += 1);
                    return;
                }
                let cleaned = self.suppressor.process(&frame.samples);
                if disposition == FrameDisposition::Buffer {
                    self.session.buffer_frame(&cleaned);
                } else if let Err(e) = self.forward_samples(&cleaned) {
                    warn!(call_id = %self.call_label(), error = %e, "Dropping inbound frame");
                    self.app.metrics.update(|m| m.frames_dropped += 1);
                }
            }
        }
    }

    /// Telephony-rate samples → engine append (+ commit/respond).
    fn forward_samples(&mut self, samples: &[i16]) -> Result<(), FrameError> {
        let engine = self.engine.as_ref().ok_or(FrameError::NoEngine)?;
        let config = &self.app.config;
        let upsampled = resample(
            samples,
            config.telephony.sample_rate,
            config.engine.sample_rate,
            config.audio.resample_quality,
        )?;
        engine.forward_audio(encode_frame(&upsampled), config.engine.manual_turn_commit)?;
        self.app.metrics.update(|m| m.frames_forwarded += 1);
        Ok(())
    }

    /// Engine audio → telephony rate → queued behind any partial frame left over.
    fn send_engine_audio(&mut self, audio: &str, ctx: &mut ws::WebsocketContext<Self>) -> Result<(), FrameError> {
        let config = &self.app.config;
        let samples = decode_frame(audio)?;
        let downsampled = resample(
            &samples,
            config.engine.sample_rate,
            config.telephony.sample_rate,
            config.audio.resample_quality,
        )?;
        self.outbound.extend_from_slice(&downsampled);
        self.send_outbound_frames(false, ctx)
    }

    /// Send every whole frame waiting in `outbound`.
    ///
    /// With `flush` the trailing partial frame is padded with silence and sent as well;
    /// otherwise it stays queued for the next engine chunk.
    fn send_outbound_frames(&mut self, flush: bool, ctx: &mut ws::WebsocketContext<Self>) -> Result<(), FrameError> {
        let frame_len = self.app.config.telephony.frame_samples().max(1);
        let sample_rate = self.app.config.telephony.sample_rate;
        if flush {
            let pending = std::mem::take(&mut self.outbound);
            self.outbound = pad_to_frame(pending, frame_len);
        }

        let ready = self.outbound.len() - self.outbound.len() % frame_len;
        if ready == 0 {
            return Ok(());
        }
        let call_id = self.call_label();
        let samples: Vec<i16> = self.outbound.drain(..ready).collect();
        for chunk in samples.chunks(frame_len) {
            let frame = MediaFrame::from_samples(chunk.to_vec(), sample_rate);
            ctx.text(media_envelope(&call_id, frame)?);
        }
        Ok(())
    }

    fn send_command(&self, command: VendorCommand, ctx: &mut ws::WebsocketContext<Self>) {
        match command_envelope(command) {
            Ok(text) => ctx.text(text),
            Err(e) => warn!(call_id = %self.call_label(), error = %e, "Command encoding failed"),
        }
    }

    fn handle_tool_call(
        &mut self,
        tool_call_id: String,
        name: &str,
        arguments: &str,
        ctx: &mut ws::WebsocketContext<Self>,
    ) {
        let output = match name {
            CAPTURE_TOOL => match CaptureArgs::parse(arguments) {
                Ok(args) => match self.session.capture(&args.field, &args.value) {
                    Some(field) => {
                        info!(call_id = %self.call_label(), field = %field, "Lead field captured");
                        json!({ "ok": true, "field": field.key() })
                    }
                    None => json!({ "ok": false, "error": format!("unknown field or empty value: {}", args.field) }),
                },
                Err(e) => json!({ "ok": false, "error": e.to_string() }),
            },
            END_CALL_TOOL => json!({ "ok": true }),
            other => {
                warn!(call_id = %self.call_label(), tool = %other, "Unknown tool call");
                json!({ "ok": false, "error": format!("unknown tool {}", other) })
            }
        };

        if let Some(engine) = &self.engine {
            let _ = engine.send(EngineCommand::ToolOutput {
                call_id: tool_call_id,
                output: output.to_string(),
            });
        }

        if name == END_CALL_TOOL {
            self.send_command(VendorCommand::CallDisconnect, ctx);
            self.close(ctx, "agent ended call");
        }
    }

    fn handle_assistant_transcript(&mut self, text: &str) {
        if let Some(pattern) = self.app.guardrail.check(text) {
            warn!(call_id = %self.call_label(), pattern = %pattern, "Guardrail tripped, cancelling response");
            if let Some(engine) = &self.engine {
                let _ = engine.send(EngineCommand::CancelResponse);
            }
        }
        self.session.record_turn(Role::Assistant, text);
    }

    /// Any live state → `Closing`, then stop the actor. Safe to call repeatedly.
    fn close(&mut self, ctx: &mut ws::WebsocketContext<Self>, reason: &str) {
        if !self.session.begin_closing() {
            return;
        }
        info!(call_id = %self.call_label(), reason = %reason, "Closing call");
        if let Err(e) = self.send_outbound_frames(true, ctx) {
            warn!(call_id = %self.call_label(), error = %e, "Dropping trailing engine audio");
        }
        if let Some(engine) = self.engine.take() {
            let _ = engine.send(EngineCommand::Close);
        }
        ctx.close(None);
        ctx.stop();
    }

    /// `Closing → Closed`: unregister, count, and hand the call to the record writer.
    fn finalize(&mut self) {
        self.session.begin_closing();
        if let Some(engine) = self.engine.take() {
            let _ = engine.send(EngineCommand::Close);
        }
        let summary = self.session.finish(Utc::now());
        if !self.registered {
            return;
        }

        let bridged = self.session.is_bridged();
        self.app.metrics.call_ended(bridged);
        if let Some(call_id) = self.session.call_id() {
            self.app.registry.do_send(Unregister {
                call_id: call_id.to_string(),
                connection: self.connection,
            });
        }

        if let Some(summary) = summary {
            let data = self.app.data.clone();
            tokio::task::spawn_blocking(move || {
                if let Err(e) = persist_call(&data, &summary) {
                    error!(call_id = %summary.call_id, error = %e, "Failed to persist call");
                }
            });
        }
    }
}

impl Actor for TelephonyWebSocket {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        debug!(connection = %self.connection, "Telephony socket connected");

        let interval = Duration::from_secs(self.app.config.telephony.heartbeat_interval_secs);
        let timeout = Duration::from_secs(self.app.config.telephony.client_timeout_secs);
        ctx.run_interval(interval, move |act, ctx| {
            if Instant::now().duration_since(act.last_heartbeat) > timeout {
                warn!(call_id = %act.call_label(), "Telephony heartbeat timeout");
                act.close(ctx, "heartbeat timeout");
            } else {
                ctx.ping(b"");
            }
        });
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        self.finalize();
        debug!(connection = %self.connection, "Telephony socket stopped");
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for TelephonyWebSocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Text(text)) => {
                self.last_heartbeat = Instant::now();
                self.handle_text(&text, ctx);
            }
            Ok(ws::Message::Binary(_)) => {
                warn!(call_id = %self.call_label(), "Ignoring binary frame");
            }
            Ok(ws::Message::Ping(data)) => {
                self.last_heartbeat = Instant::now();
                ctx.pong(&data);
            }
            Ok(ws::Message::Pong(_)) => {
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Close(reason)) => {
                debug!(call_id = %self.call_label(), ?reason, "Vendor closed socket");
                self.close(ctx, "socket closed");
            }
            Ok(ws::Message::Continuation(_)) => {
                warn!(call_id = %self.call_label(), "Ignoring continuation frame");
            }
            Ok(ws::Message::Nop) => {}
            Err(e) => {
                error!(call_id = %self.call_label(), error = %e, "Telephony protocol error");
                self.close(ctx, "protocol error");
            }
        }
    }
}

impl StreamHandler<EngineEvent> for TelephonyWebSocket {
    fn handle(&mut self, event: EngineEvent, ctx: &mut Self::Context) {
        match event {
            EngineEvent::AudioDelta(audio) => {
                if self.session.state() != BridgeState::Active {
                    return;
                }
                if let Err(e) = self.send_engine_audio(&audio, ctx) {
                    warn!(call_id = %self.call_label(), error = %e, "Dropping engine audio");
                }
            }
            EngineEvent::UserTranscript(text) => self.session.record_turn(Role::User, &text),
            EngineEvent::AssistantTranscript(text) => self.handle_assistant_transcript(&text),
            EngineEvent::ToolCall {
                call_id,
                name,
                arguments,
            } => self.handle_tool_call(call_id, &name, &arguments, ctx),
            EngineEvent::AudioDone => {
                if let Err(e) = self.send_outbound_frames(true, ctx) {
                    warn!(call_id = %self.call_label(), error = %e, "Dropping trailing engine audio");
                }
            }
            EngineEvent::SpeechStarted => {
                self.outbound.clear();
                self.send_command(VendorCommand::ClearBuffer, ctx);
            }
            EngineEvent::Error(message) => {
                warn!(call_id = %self.call_label(), error = %message, "Engine reported error");
            }
            EngineEvent::Closed => self.close(ctx, "engine closed"),
        }
    }

    /// The event channel ending must not stop the socket actor.
    fn finished(&mut self, _ctx: &mut Self::Context) {
        debug!(call_id = %self.call_label(), "Engine event stream ended");
    }
}

/// `GET /ws/telephony`: upgrade to a telephony bridge socket.
pub async fn telephony_websocket(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState>,
) -> Result<HttpResponse, actix_web::Error> {
    ws::start(TelephonyWebSocket::new(state.get_ref().clone()), &req, stream)
}
