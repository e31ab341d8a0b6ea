//! # PCM16 Framing and Encoding
//!
//! Pure conversion functions between the telephony vendor's integer sample arrays,
//! the voice engine's base64 transport, and the floating point domain used for
//! resampling.
//!
//! ## Wire Format:
//! - **Byte order**: Little-endian signed 16-bit samples
//! - **Transport**: Standard base64 (with padding) of the raw PCM bytes
//! - **Float domain**: [-1.0, 1.0], clipped symmetrically on the way back

use base64::{engine::general_purpose::STANDARD, Engine};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::Cursor;
use thiserror::Error;

/// Errors produced while converting a single audio frame.
///
/// ## Scope:
/// Every variant describes a problem with one frame only. Callers log it,
/// drop the frame and keep the session running.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("invalid base64 audio payload: {0}")]
    InvalidBase64(#[from] base64::DecodeError),

    #[error("PCM16 payload has odd byte length {0}")]
    OddByteLength(usize),

    #[error("unsupported audio format: {0}")]
    UnsupportedFormat(String),

    #[error("resampling failed: {0}")]
    Resample(String),
}

/// Encode PCM16 samples as base64 little-endian bytes.
///
/// ## Guarantees:
/// Exact inverse of [`decode_frame`]: sample count and bit pattern survive
/// the round trip unchanged.
pub fn encode_frame(samples: &[i16]) -> String {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        // Writing into a Vec cannot fail
        let _ = bytes.write_i16::<LittleEndian>(sample);
    }
    STANDARD.encode(&bytes)
}

/// Decode a base64 payload into PCM16 samples.
///
/// ## Returns:
/// - **Ok(samples)**: `bytes.len() / 2` samples, little-endian
/// - **Err(CodecError)**: malformed base64 or an odd number of bytes
pub fn decode_frame(payload: &str) -> Result<Vec<i16>, CodecError> {
    let bytes = STANDARD.decode(payload.trim())?;
    if bytes.len() % 2 != 0 {
        return Err(CodecError::OddByteLength(bytes.len()));
    }

    let mut cursor = Cursor::new(bytes.as_slice());
    let mut samples = Vec::with_capacity(bytes.len() / 2);
    while let Ok(sample) = cursor.read_i16::<LittleEndian>() {
        samples.push(sample);
    }
    Ok(samples)
}

/// Convert float samples in [-1.0, 1.0] to PCM16.
///
/// ## Clipping:
/// Positive values scale by 0x7FFF, negative values by 0x8000, so both
/// full-scale extremes map exactly onto `i16::MAX` and `i16::MIN`.
/// Out-of-range input is clamped first; NaN becomes silence.
pub fn float_to_int16(samples: &[f32]) -> Vec<i16> {
    samples
        .iter()
        .map(|&sample| {
            if sample.is_nan() {
                return 0;
            }
            let clamped = sample.clamp(-1.0, 1.0);
            if clamped < 0.0 {
                (clamped * 32768.0).round() as i16
            } else {
                (clamped * 32767.0).round() as i16
            }
        })
        .collect()
}

/// Convert PCM16 samples to floats in [-1.0, 1.0).
pub fn int16_to_float(samples: &[i16]) -> Vec<f32> {
    samples.iter().map(|&sample| sample as f32 / 32768.0).collect()
}

/// `n` samples of digital silence, used for jitter padding.
pub fn silence_frame(n: usize) -> Vec<i16> {
    vec![0; n]
}

/// Pad `samples` with silence up to a whole number of `frame_len` frames.
///
/// The vendor plays back fixed-size frames; a trailing partial frame would
/// otherwise be clipped or produce an audible click.
pub fn pad_to_frame(mut samples: Vec<i16>, frame_len: usize) -> Vec<i16> {
    if frame_len == 0 {
        return samples;
    }
    let remainder = samples.len() % frame_len;
    if remainder != 0 {
        samples.extend(silence_frame(frame_len - remainder));
    }
    samples
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_decode_preserves_bit_patterns() {
        let samples = vec![0i16, 1, -1, 255, -256, 12345, i16::MAX, i16::MIN];
        let encoded = encode_frame(&samples);
        let decoded = decode_frame(&encoded).unwrap();
        assert_eq!(decoded, samples);
    }

    #[test]
    fn test_encode_is_little_endian() {
        // 0x0102 → bytes [0x02, 0x01] → base64 "AgE="
        assert_eq!(encode_frame(&[0x0102]), "AgE=");
        assert_eq!(decode_frame("AgE=").unwrap(), vec![0x0102]);
    }

    #[test]
    fn test_decode_empty_payload() {
        assert_eq!(decode_frame("").unwrap(), Vec::<i16>::new());
        assert_eq!(encode_frame(&[]), "");
    }

    #[test]
    fn test_decode_rejects_odd_length() {
        // Three bytes of payload
        let payload = STANDARD.encode([1u8, 2, 3]);
        match decode_frame(&payload) {
            Err(CodecError::OddByteLength(3)) => {}
            other => panic!("expected odd length error, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_rejects_malformed_base64() {
        assert!(matches!(
            decode_frame("not base64!!"),
            Err(CodecError::InvalidBase64(_))
        ));
    }

    #[test]
    fn test_float_to_int16_symmetric_clipping() {
        let converted = float_to_int16(&[1.0, -1.0, 0.0, 2.5, -3.0, 0.5, f32::NAN]);
        assert_eq!(converted[0], i16::MAX);
        assert_eq!(converted[1], i16::MIN);
        assert_eq!(converted[2], 0);
        assert_eq!(converted[3], i16::MAX);
        assert_eq!(converted[4], i16::MIN);
        assert_eq!(converted[5], 16384);
        assert_eq!(converted[6], 0);
    }

    #[test]
    fn test_float_round_trip_is_close() {
        let pcm = vec![0i16, 16384, -16384, 32767, -32768];
        let back = float_to_int16(&int16_to_float(&pcm));
        for (original, converted) in pcm.iter().zip(back.iter()) {
            assert!((*original as i32 - *converted as i32).abs() <= 1);
        }
    }

    #[test]
    fn test_silence_and_padding() {
        assert_eq!(silence_frame(4), vec![0, 0, 0, 0]);
        assert_eq!(pad_to_frame(vec![1, 2, 3], 4), vec![1, 2, 3, 0]);
        assert_eq!(pad_to_frame(vec![1, 2, 3, 4], 4).len(), 4);
        assert_eq!(pad_to_frame(vec![1; 5], 160).len(), 160);
        assert_eq!(pad_to_frame(vec![1, 2], 0), vec![1, 2]);
    }
}
