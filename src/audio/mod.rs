//! # Audio Codec Pipeline
//!
//! Everything the bridge needs to move audio between the telephony leg and the
//! voice engine, exposed as pure functions and small strategy objects.
//!
//! ## Key Components:
//! - **Codec**: PCM16 ⇄ base64 framing, float conversion, silence padding
//! - **Resample**: Pluggable sample-rate conversion (fast / medium / best)
//! - **Denoise**: Optional noise suppression strategies
//! - **Buffer**: Bounded inbound buffer used while the engine connects
//!
//! ## Audio Format:
//! - **Telephony leg**: 8 kHz, 16-bit signed, mono
//! - **Engine leg**: 24 kHz, 16-bit signed little-endian, mono, base64 framed

pub mod buffer;    // Inbound buffering while STARTING
pub mod codec;     // PCM16 framing and encoding
pub mod denoise;   // Noise suppression strategies
pub mod resample;  // Sample-rate conversion tiers

pub use codec::CodecError;
pub use denoise::NoiseSuppression;
pub use resample::QualityTier;
