//! Synthetic capture sources for loopback devices.

use std::f32::consts::TAU;
use std::thread;
use std::time::{Duration, Instant};

use crate::error::CaptureError;
use crate::publisher::{CaptureSource, Chunk};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalFormat {
    Pcm16,
    Float,
}

/// Generates a sine per channel, paced to real time.
pub struct SignalGenerator {
    channels: usize,
    frames: usize,
    sample_rate: u32,
    frequency: f32,
    format: SignalFormat,
    frame_index: u64,
    paced: bool,
    next_deadline: Option<Instant>,
}

impl SignalGenerator {
    pub fn new(channels: usize, frames: usize, sample_rate: u32, format: SignalFormat) -> Self {
        Self {
            channels: channels.max(1),
            frames: frames.max(1),
            sample_rate: sample_rate.max(1),
            frequency: 440.0,
            format,
            frame_index: 0,
            paced: true,
            next_deadline: None,
        }
    }

    pub fn with_frequency(mut self, frequency: f32) -> Self {
        self.frequency = frequency;
        self
    }

    /// Produce chunks as fast as they are read.
    pub fn unpaced(mut self) -> Self {
        self.paced = false;
        self
    }

    pub fn chunk_duration(&self) -> Duration {
        Duration::from_secs_f64(self.frames as f64 / self.sample_rate as f64)
    }

    fn pace(&mut self) {
        if !self.paced {
            return;
        }
        let now = Instant::now();
        let deadline = *self.next_deadline.get_or_insert(now);
        if deadline > now {
            thread::sleep(deadline - now);
        }
        self.next_deadline = Some(deadline + self.chunk_duration());
    }
}

impl CaptureSource for SignalGenerator {
    fn read_chunk(&mut self) -> Result<Chunk, CaptureError> {
        self.pace();

        let mut values = Vec::with_capacity(self.frames * self.channels);
        for frame in 0..self.frames as u64 {
            let t = (self.frame_index + frame) as f32 / self.sample_rate as f32;
            for channel in 0..self.channels {
                let phase = channel as f32 * 0.25 * TAU;
                values.push((TAU * self.frequency * t + phase).sin() * 0.5);
            }
        }
        self.frame_index += self.frames as u64;

        Ok(match self.format {
            SignalFormat::Float => Chunk::Values(values),
            SignalFormat::Pcm16 => Chunk::Pcm16(
                values
                    .iter()
                    .flat_map(|v| ((v * i16::MAX as f32) as i16).to_le_bytes())
                    .collect(),
            ),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outlet::SampleData;

    #[test]
    fn test_chunk_shape() {
        let mut gen = SignalGenerator::new(2, 16, 1000, SignalFormat::Float).unpaced();
        let SampleData::Numeric(values) = gen.read_chunk().unwrap().decode() else {
            panic!("expected numeric");
        };
        assert_eq!(values.len(), 32);
        assert!(values.iter().all(|v| v.abs() <= 0.5));
    }

    #[test]
    fn test_pcm_chunk_bytes() {
        let mut gen = SignalGenerator::new(1, 8, 8000, SignalFormat::Pcm16).unpaced();
        match gen.read_chunk().unwrap() {
            Chunk::Pcm16(bytes) => assert_eq!(bytes.len(), 16),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_chunk_duration() {
        let gen = SignalGenerator::new(1, 22050, 44100, SignalFormat::Float);
        assert_eq!(gen.chunk_duration(), Duration::from_millis(500));
    }
}
