//! # Telephony Session Bridge
//!
//! Per-call relay between the telephony vendor's media WebSocket and the voice engine.
//!
//! ## Key Components:
//! - **protocol**: Vendor JSON frames (start / media / stop, control commands)
//! - **session**: Per-call state machine, first-frame discard and inbound buffering
//! - **registry**: Single-writer actor mapping call ids to their owning connection
//! - **bridge**: The socket actor wiring the vendor, the engine and the record writer

pub mod bridge;
pub mod protocol;
pub mod registry;
pub mod session;

pub use bridge::telephony_websocket;
pub use registry::SessionRegistry;
