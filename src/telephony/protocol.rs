//! Telephony vendor media protocol.
//!
//! ## Message Format (JSON text frames):
//! - `{"event": "start", "id": "..."}`: begin a call (optional `customer_number`,
//!   `store_code`, `recording_url`)
//! - `{"event": "media", "id": "...", "data": {...}}`: PCM16 audio, same envelope
//!   in both directions
//! - `{"event": "stop", "id": "..."}`: end the call
//! - `{"command": "clearBuffer"}` / `{"command": "callDisconnect"}`: control

use crate::audio::CodecError;
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("invalid JSON frame: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("frame has neither an event nor a command field")]
    Unrecognized,
}

/// One audio packet as the vendor frames it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaFrame {
    pub samples: Vec<i16>,
    pub bits_per_sample: u16,
    pub sample_rate: u32,
    pub channel_count: u16,
    pub number_of_frames: usize,
}

impl MediaFrame {
    /// Mono 16-bit frame around `samples`.
    pub fn from_samples(samples: Vec<i16>, sample_rate: u32) -> Self {
        let number_of_frames = samples.len();
        Self {
            samples,
            bits_per_sample: 16,
            sample_rate,
            channel_count: 1,
            number_of_frames,
        }
    }

    /// Reject anything other than a non-empty mono PCM16 frame at the expected rate.
    pub fn validate(&self, expected_rate: u32) -> Result<(), CodecError> {
        if self.samples.is_empty() {
            return Err(CodecError::UnsupportedFormat("empty frame".to_string()));
        }
        if self.number_of_frames != self.samples.len() {
            return Err(CodecError::UnsupportedFormat(format!(
                "numberOfFrames {} but {} samples",
                self.number_of_frames,
                self.samples.len()
            )));
        }
        if self.bits_per_sample != 16 {
            return Err(CodecError::UnsupportedFormat(format!(
                "{} bits per sample",
                self.bits_per_sample
            )));
        }
        if self.channel_count != 1 {
            return Err(CodecError::UnsupportedFormat(format!(
                "{} channels",
                self.channel_count
            )));
        }
        if self.sample_rate != expected_rate {
            return Err(CodecError::UnsupportedFormat(format!(
                "sample rate {} (expected {})",
                self.sample_rate, expected_rate
            )));
        }
        Ok(())
    }
}

/// Call lifecycle and media events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum VendorEvent {
    Start {
        #[serde(deserialize_with = "string_or_number")]
        id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        customer_number: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        store_code: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        recording_url: Option<String>,
    },
    Media {
        #[serde(deserialize_with = "string_or_number")]
        id: String,
        data: MediaFrame,
    },
    Stop {
        #[serde(deserialize_with = "string_or_number")]
        id: String,
    },
}

/// Control commands, sent in both directions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command")]
pub enum VendorCommand {
    #[serde(rename = "clearBuffer")]
    ClearBuffer,
    #[serde(rename = "callDisconnect")]
    CallDisconnect,
}

#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    Event(VendorEvent),
    Command(VendorCommand),
}

/// Parse one text frame from the vendor.
pub fn parse_inbound(text: &str) -> Result<InboundMessage, ProtocolError> {
    let value: serde_json::Value = serde_json::from_str(text)?;
    if value.get("event").is_some() {
        Ok(InboundMessage::Event(serde_json::from_value(value)?))
    } else if value.get("command").is_some() {
        Ok(InboundMessage::Command(serde_json::from_value(value)?))
    } else {
        Err(ProtocolError::Unrecognized)
    }
}

/// Serialize an outbound media envelope.
pub fn media_envelope(call_id: &str, frame: MediaFrame) -> Result<String, serde_json::Error> {
    serde_json::to_string(&VendorEvent::Media {
        id: call_id.to_string(),
        data: frame,
    })
}

pub fn command_envelope(command: VendorCommand) -> Result<String, serde_json::Error> {
    serde_json::to_string(&command)
}

/// Vendors send call ids as either strings or numbers.
fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "call id must be a string or number, got {}",
            other
        ))),
    }
}
