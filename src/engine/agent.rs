//! # Agent Resource
//!
//! Instructions and tool definitions handed to the voice engine at session
//! creation. The bridge treats the file as opaque: it only needs to know the
//! names of the two tools it reacts to.
//!
//! ## File Format (JSON):
//! ```json
//! { "instructions": "...", "voice": "alloy", "tools": [ { "type": "function", ... } ] }
//! ```

use super::EngineError;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fs;
use std::path::Path;

/// Tool the engine calls with `{field, value}` when the caller gives one of the lead fields.
pub const CAPTURE_TOOL: &str = "capture_lead_field";

/// Tool the engine calls to hang up.
pub const END_CALL_TOOL: &str = "end_call";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentResource {
    pub instructions: String,
    #[serde(default)]
    pub voice: Option<String>,
    #[serde(default)]
    pub tools: Vec<serde_json::Value>,
}

/// Arguments of a `capture_lead_field` call.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CaptureArgs {
    pub field: String,
    pub value: String,
}

impl AgentResource {
    /// Load from `path`, or the built-in agent when `path` is empty.
    pub fn load(path: &str) -> Result<Self, EngineError> {
        if path.trim().is_empty() {
            return Ok(Self::builtin());
        }
        Self::from_file(Path::new(path))
    }

    pub fn from_file(path: &Path) -> Result<Self, EngineError> {
        let raw = fs::read_to_string(path)
            .map_err(|e| EngineError::Agent(format!("{}: {}", path.display(), e)))?;
        serde_json::from_str(&raw)
            .map_err(|e| EngineError::Agent(format!("{}: {}", path.display(), e)))
    }

    /// Lead-collection agent for a car dealership callback.
    pub fn builtin() -> Self {
        Self {
            instructions: concat!(
                "You are a polite call assistant for a car dealership. ",
                "Collect the caller's full name, the car model they are interested in, ",
                "and their email address, in that order, one question at a time. ",
                "Whenever the caller gives one of these, call capture_lead_field. ",
                "If the caller asks for a human, say a dealer will call back. ",
                "When all details are collected or the caller wants to stop, thank them and call end_call."
            )
            .to_string(),
            voice: None,
            tools: vec![
                json!({
                    "type": "function",
                    "name": CAPTURE_TOOL,
                    "description": "Record one lead detail given by the caller.",
                    "parameters": {
                        "type": "object",
                        "properties": {
                            "field": {
                                "type": "string",
                                "enum": ["full_name", "car_model", "email_id"]
                            },
                            "value": { "type": "string" }
                        },
                        "required": ["field", "value"]
                    }
                }),
                json!({
                    "type": "function",
                    "name": END_CALL_TOOL,
                    "description": "End the phone call.",
                    "parameters": { "type": "object", "properties": {} }
                }),
            ],
        }
    }
}

impl CaptureArgs {
    pub fn parse(arguments: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(arguments)
    }
}
