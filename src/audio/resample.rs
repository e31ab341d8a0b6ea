//! # Sample-Rate Conversion
//!
//! The telephony leg runs at 8 kHz while the voice engine expects 24 kHz, so every
//! frame crosses a resampler in both directions. Several engines implement the same
//! [`Resampler`] contract; configuration picks one through [`QualityTier`].
//!
//! ## Quality Tiers:
//! - **fast**: Linear interpolation, no allocation beyond the output
//! - **medium**: Cubic polynomial interpolation (rubato `FastFixedIn`)
//! - **best**: Windowed-sinc interpolation (rubato `SincFixedIn`)
//!
//! ## Length Contract:
//! Every tier returns exactly `ceil(n * target / source)` samples, and equal rates
//! return the input untouched.

use crate::audio::codec::{float_to_int16, int16_to_float, CodecError};
use rubato::{
    FastFixedIn, PolynomialDegree, SincFixedIn, SincInterpolationParameters,
    SincInterpolationType, WindowFunction,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Resampling quality selected by configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum QualityTier {
    #[default]
    Fast,
    Medium,
    Best,
}

impl FromStr for QualityTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "fast" | "linear" => Ok(QualityTier::Fast),
            "medium" | "cubic" => Ok(QualityTier::Medium),
            "best" | "sinc" => Ok(QualityTier::Best),
            _ => Err(format!("Unknown resample quality: {}", s)),
        }
    }
}

impl fmt::Display for QualityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            QualityTier::Fast => "fast",
            QualityTier::Medium => "medium",
            QualityTier::Best => "best",
        };
        write!(f, "{}", name)
    }
}

/// One sample-rate conversion engine.
///
/// ## Contract:
/// - Mono float input in [-1.0, 1.0]
/// - Output length is [`expected_len`] for the given rates
/// - Implementations are stateless, so one instance serves every call
pub trait Resampler: Send + Sync {
    fn tier(&self) -> QualityTier;

    fn resample(
        &self,
        samples: &[f32],
        source_rate: u32,
        target_rate: u32,
    ) -> Result<Vec<f32>, CodecError>;
}

/// Build the resampler for a configured tier.
pub fn resampler_for(tier: QualityTier) -> Box<dyn Resampler> {
    match tier {
        QualityTier::Fast => Box::new(LinearResampler),
        QualityTier::Medium => Box::new(CubicResampler),
        QualityTier::Best => Box::new(SincResampler),
    }
}

/// Resample PCM16 samples with the given tier.
///
/// Converts to float, runs the selected engine, and clips back to PCM16.
pub fn resample(
    samples: &[i16],
    source_rate: u32,
    target_rate: u32,
    tier: QualityTier,
) -> Result<Vec<i16>, CodecError> {
    resample_with(resampler_for(tier).as_ref(), samples, source_rate, target_rate)
}

/// Same as [`resample`] but with an already-built engine. Engine failures name the tier.
pub fn resample_with(
    engine: &dyn Resampler,
    samples: &[i16],
    source_rate: u32,
    target_rate: u32,
) -> Result<Vec<i16>, CodecError> {
    if source_rate == target_rate {
        return Ok(samples.to_vec());
    }
    let floats = int16_to_float(samples);
    let converted = engine
        .resample(&floats, source_rate, target_rate)
        .map_err(|e| match e {
            CodecError::Resample(msg) => CodecError::Resample(format!("{} tier: {}", engine.tier(), msg)),
            other => other,
        })?;
    Ok(float_to_int16(&converted))
}

/// Output length for `n` input samples: `ceil(n * target / source)`.
pub fn expected_len(n: usize, source_rate: u32, target_rate: u32) -> usize {
    if source_rate == 0 {
        return 0;
    }
    let numerator = n as u64 * target_rate as u64;
    numerator.div_ceil(source_rate as u64) as usize
}

fn check_rates(source_rate: u32, target_rate: u32) -> Result<(), CodecError> {
    if source_rate == 0 || target_rate == 0 {
        return Err(CodecError::UnsupportedFormat(format!(
            "sample rates must be non-zero (got {} -> {})",
            source_rate, target_rate
        )));
    }
    Ok(())
}

/// Linear interpolation between neighbouring samples.
pub struct LinearResampler;

impl Resampler for LinearResampler {
    fn tier(&self) -> QualityTier {
        QualityTier::Fast
    }

    fn resample(
        &self,
        samples: &[f32],
        source_rate: u32,
        target_rate: u32,
    ) -> Result<Vec<f32>, CodecError> {
        check_rates(source_rate, target_rate)?;
        if source_rate == target_rate || samples.is_empty() {
            return Ok(samples.to_vec());
        }

        let ratio = target_rate as f64 / source_rate as f64;
        let output_len = expected_len(samples.len(), source_rate, target_rate);
        let last = samples.len() - 1;
        let mut output = Vec::with_capacity(output_len);

        for i in 0..output_len {
            let src_idx = i as f64 / ratio;
            let idx_floor = (src_idx.floor() as usize).min(last);
            let idx_ceil = (idx_floor + 1).min(last);
            let frac = (src_idx - idx_floor as f64).clamp(0.0, 1.0) as f32;

            output.push(samples[idx_floor] * (1.0 - frac) + samples[idx_ceil] * frac);
        }

        Ok(output)
    }
}

/// Cubic polynomial interpolation through rubato.
pub struct CubicResampler;

impl Resampler for CubicResampler {
    fn tier(&self) -> QualityTier {
        QualityTier::Medium
    }

    fn resample(
        &self,
        samples: &[f32],
        source_rate: u32,
        target_rate: u32,
    ) -> Result<Vec<f32>, CodecError> {
        check_rates(source_rate, target_rate)?;
        if source_rate == target_rate || samples.is_empty() {
            return Ok(samples.to_vec());
        }

        let ratio = target_rate as f64 / source_rate as f64;
        let mut engine = FastFixedIn::<f64>::new(
            ratio,
            1.0,
            PolynomialDegree::Cubic,
            samples.len(),
            1,
        )
        .map_err(|e| CodecError::Resample(e.to_string()))?;

        let expected = expected_len(samples.len(), source_rate, target_rate);
        drive_fixed_in(&mut engine, samples, expected)
    }
}

/// Band-limited windowed-sinc interpolation through rubato.
pub struct SincResampler;

impl SincResampler {
    fn parameters() -> SincInterpolationParameters {
        SincInterpolationParameters {
            sinc_len: 64,
            f_cutoff: 0.925,
            interpolation: SincInterpolationType::Linear,
            oversampling_factor: 64,
            window: WindowFunction::BlackmanHarris2,
        }
    }
}

impl Resampler for SincResampler {
    fn tier(&self) -> QualityTier {
        QualityTier::Best
    }

    fn resample(
        &self,
        samples: &[f32],
        source_rate: u32,
        target_rate: u32,
    ) -> Result<Vec<f32>, CodecError> {
        check_rates(source_rate, target_rate)?;
        if source_rate == target_rate || samples.is_empty() {
            return Ok(samples.to_vec());
        }

        let ratio = target_rate as f64 / source_rate as f64;
        let mut engine =
            SincFixedIn::<f64>::new(ratio, 1.0, Self::parameters(), samples.len(), 1)
                .map_err(|e| CodecError::Resample(e.to_string()))?;

        let expected = expected_len(samples.len(), source_rate, target_rate);
        drive_fixed_in(&mut engine, samples, expected)
    }
}

/// Feed a fixed-input rubato engine until `expected` samples past its
/// internal delay have been produced.
///
/// Input beyond the end of `samples` is zero padding, which flushes the
/// filter tail for this frame.
fn drive_fixed_in<R>(engine: &mut R, samples: &[f32], expected: usize) -> Result<Vec<f32>, CodecError>
where
    R: rubato::Resampler<f64>,
{
    let input: Vec<f64> = samples.iter().map(|&s| s as f64).collect();
    let delay = engine.output_delay();
    let needed = expected + delay;
    let mut produced: Vec<f64> = Vec::with_capacity(needed);
    let mut position = 0usize;

    while produced.len() < needed {
        let frames = engine.input_frames_next();
        let mut chunk = vec![0.0f64; frames];
        if position < input.len() {
            let end = (position + frames).min(input.len());
            chunk[..end - position].copy_from_slice(&input[position..end]);
        }
        position += frames;

        let waves_in = vec![chunk];
        let waves_out = engine
            .process(&waves_in, None)
            .map_err(|e| CodecError::Resample(e.to_string()))?;
        let channel = waves_out.into_iter().next().unwrap_or_default();
        if channel.is_empty() {
            break;
        }
        produced.extend(channel);
    }

    let mut output: Vec<f32> = produced
        .into_iter()
        .skip(delay)
        .take(expected)
        .map(|s| s as f32)
        .collect();
    output.resize(expected, 0.0);
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(len: usize, step: f32) -> Vec<f32> {
        (0..len).map(|i| (i as f32 * step).sin() * 0.5).collect()
    }

    #[test]
    fn test_quality_tier_parsing() {
        assert_eq!("fast".parse::<QualityTier>().unwrap(), QualityTier::Fast);
        assert_eq!("MEDIUM".parse::<QualityTier>().unwrap(), QualityTier::Medium);
        assert_eq!("sinc".parse::<QualityTier>().unwrap(), QualityTier::Best);
        assert!("ultra".parse::<QualityTier>().is_err());
    }

    #[test]
    fn test_expected_len() {
        assert_eq!(expected_len(160, 8000, 24000), 480);
        assert_eq!(expected_len(480, 24000, 8000), 160);
        assert_eq!(expected_len(481, 24000, 8000), 161);
        assert_eq!(expected_len(0, 8000, 24000), 0);
    }

    #[test]
    fn test_every_tier_honours_length_contract() {
        let input = sine(160, 0.1);
        for tier in [QualityTier::Fast, QualityTier::Medium, QualityTier::Best] {
            let engine = resampler_for(tier);
            assert_eq!(engine.tier(), tier);
            let up = engine.resample(&input, 8000, 24000).unwrap();
            assert_eq!(up.len(), 480, "tier {} upsample", tier);
            let down = engine.resample(&up, 24000, 8000).unwrap();
            assert_eq!(down.len(), 160, "tier {} downsample", tier);
        }
    }

    #[test]
    fn test_equal_rates_pass_through() {
        let samples = vec![1i16, -2, 3, -4];
        for tier in [QualityTier::Fast, QualityTier::Medium, QualityTier::Best] {
            assert_eq!(resample(&samples, 8000, 8000, tier).unwrap(), samples);
        }
    }

    #[test]
    fn test_linear_interpolates_midpoints() {
        let up = LinearResampler.resample(&[0.0, 0.5], 1, 2).unwrap();
        assert_eq!(up.len(), 4);
        assert!((up[0] - 0.0).abs() < 1e-6);
        assert!((up[1] - 0.25).abs() < 1e-6);
        assert!((up[2] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_zero_rate_is_rejected() {
        assert!(LinearResampler.resample(&[0.1], 0, 8000).is_err());
    }

    #[test]
    fn test_pcm_resample_keeps_silence_silent() {
        let silence = vec![0i16; 160];
        let up = resample(&silence, 8000, 24000, QualityTier::Best).unwrap();
        assert_eq!(up.len(), 480);
        assert!(up.iter().all(|&s| s == 0));
    }
}
