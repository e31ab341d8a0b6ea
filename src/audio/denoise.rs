//! # Noise Suppression
//!
//! Optional clean-up applied to caller audio before it reaches the voice engine.
//! Like the resamplers, the strategies share one trait and configuration picks
//! the active one.
//!
//! ## Strategies:
//! - **off**: Passthrough, the default for clean SIP trunks
//! - **smooth**: DC-offset removal followed by a 3-point moving average, which
//!   tames line hiss without touching the speech band much

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Configured noise suppression strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum NoiseSuppression {
    #[default]
    Off,
    Smooth,
}

impl FromStr for NoiseSuppression {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "off" | "none" => Ok(NoiseSuppression::Off),
            "smooth" | "on" => Ok(NoiseSuppression::Smooth),
            _ => Err(format!("Unknown noise suppression mode: {}", s)),
        }
    }
}

/// A noise suppression strategy over PCM16 frames.
pub trait NoiseSuppressor: Send + Sync {
    fn process(&self, samples: &[i16]) -> Vec<i16>;
}

/// Build the suppressor for a configured mode.
pub fn suppressor_for(mode: NoiseSuppression) -> Box<dyn NoiseSuppressor> {
    match mode {
        NoiseSuppression::Off => Box::new(Passthrough),
        NoiseSuppression::Smooth => Box::new(SmoothingSuppressor),
    }
}

pub struct Passthrough;

impl NoiseSuppressor for Passthrough {
    fn process(&self, samples: &[i16]) -> Vec<i16> {
        samples.to_vec()
    }
}

/// DC-offset removal plus a 3-point moving average.
pub struct SmoothingSuppressor;

impl SmoothingSuppressor {
    /// Average value of the frame, i.e. the constant bias to remove.
    fn dc_offset(samples: &[i16]) -> i16 {
        if samples.is_empty() {
            return 0;
        }
        let sum: i64 = samples.iter().map(|&s| s as i64).sum();
        (sum / samples.len() as i64) as i16
    }
}

impl NoiseSuppressor for SmoothingSuppressor {
    fn process(&self, samples: &[i16]) -> Vec<i16> {
        let offset = Self::dc_offset(samples);
        let centred: Vec<i16> = samples.iter().map(|s| s.saturating_sub(offset)).collect();

        if centred.len() < 3 {
            return centred;
        }

        // Endpoints keep their value, interior samples average with neighbours
        let mut smoothed = centred.clone();
        for i in 1..centred.len() - 1 {
            let avg = (centred[i - 1] as i32 + centred[i] as i32 + centred[i + 1] as i32) / 3;
            smoothed[i] = avg as i16;
        }
        smoothed
    }
}
