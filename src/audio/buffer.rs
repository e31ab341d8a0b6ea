//! # Inbound Audio Buffer
//!
//! Holds caller audio that arrives while the voice engine session is still
//! connecting. Once the engine is ready the buffer is drained in arrival order,
//! so the caller's first words are not lost to connection latency.
//!
//! ## Memory Management:
//! - Bounded by a maximum duration, oldest samples are evicted first
//! - Owned by a single session actor, so no internal locking is needed

use std::collections::VecDeque;

/// Configuration for inbound buffering.
#[derive(Debug, Clone)]
pub struct InboundBufferConfig {
    /// Sample rate of the buffered audio (telephony rate)
    pub sample_rate: u32,

    /// Maximum buffered duration in milliseconds
    pub max_duration_ms: u32,
}

impl Default for InboundBufferConfig {
    fn default() -> Self {
        Self {
            sample_rate: 8000,      // Telephony narrowband
            max_duration_ms: 2000,  // 2 seconds covers a slow engine connect
        }
    }
}

/// Bounded FIFO of PCM16 samples.
#[derive(Debug)]
pub struct InboundBuffer {
    samples: VecDeque<i16>,
    config: InboundBufferConfig,
    max_samples: usize,
    evicted: usize,
}

impl InboundBuffer {
    /// Create a buffer holding at most `max_duration_ms` of audio.
    ///
    /// ## Example:
    /// 2000ms at 8kHz: 2000 * 8000 / 1000 = 16,000 samples
    pub fn new(config: InboundBufferConfig) -> Self {
        let max_samples = (config.max_duration_ms as usize * config.sample_rate as usize) / 1000;
        Self {
            samples: VecDeque::with_capacity(max_samples),
            config,
            max_samples,
            evicted: 0,
        }
    }

    /// Append samples, evicting the oldest ones once the bound is reached.
    pub fn push(&mut self, samples: &[i16]) {
        for &sample in samples {
            if self.samples.len() >= self.max_samples {
                if self.samples.pop_front().is_none() {
                    // Zero-capacity buffer keeps nothing
                    self.evicted += 1;
                    continue;
                }
                self.evicted += 1;
            }
            self.samples.push_back(sample);
        }
    }

    /// Take every buffered sample in arrival order.
    pub fn drain(&mut self) -> Vec<i16> {
        self.samples.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Number of samples dropped because the buffer was full.
    pub fn evicted(&self) -> usize {
        self.evicted
    }

    /// Buffered audio duration in seconds.
    pub fn duration_seconds(&self) -> f64 {
        self.samples.len() as f64 / self.config.sample_rate as f64
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_buffer() -> InboundBuffer {
        // 1ms at 8kHz = 8 samples
        InboundBuffer::new(InboundBufferConfig {
            sample_rate: 8000,
            max_duration_ms: 1,
        })
    }

    #[test]
    fn test_push_and_drain_in_order() {
        let mut buffer = small_buffer();
        buffer.push(&[1, 2, 3]);
        buffer.push(&[4, 5]);
        assert_eq!(buffer.len(), 5);
        assert_eq!(buffer.drain(), vec![1, 2, 3, 4, 5]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_evicts_oldest_when_full() {
        let mut buffer = small_buffer();
        buffer.push(&(0..10).collect::<Vec<i16>>());
        assert_eq!(buffer.len(), 8);
        assert_eq!(buffer.evicted(), 2);
        assert_eq!(buffer.drain(), (2..10).collect::<Vec<i16>>());
    }

    #[test]
    fn test_duration() {
        let mut buffer = InboundBuffer::new(InboundBufferConfig::default());
        buffer.push(&vec![0; 4000]);
        assert!((buffer.duration_seconds() - 0.5).abs() < f64::EPSILON);
        buffer.clear();
        assert!(buffer.is_empty());
    }
}
