//! Bootstrap configuration - seeds session behaviour at startup.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Timing and presentation defaults for a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Pause after announcing a task start, so downstream consumers can align.
    #[serde(default = "SessionConfig::default_settle_ms")]
    pub settle_ms: u64,

    /// Pause between start-record and the task's run.
    #[serde(default = "SessionConfig::default_record_lead_ms")]
    pub record_lead_ms: u64,

    /// Presentation surface backend.
    #[serde(default = "SessionConfig::default_surface")]
    pub surface: String,
}

impl SessionConfig {
    fn default_settle_ms() -> u64 {
        1000
    }

    fn default_record_lead_ms() -> u64 {
        500
    }

    fn default_surface() -> String {
        "console".to_string()
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn record_lead(&self) -> Duration {
        Duration::from_millis(self.record_lead_ms)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            settle_ms: Self::default_settle_ms(),
            record_lead_ms: Self::default_record_lead_ms(),
            surface: Self::default_surface(),
        }
    }
}

/// Capture parameters for the built-in loopback device sources.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DevicesConfig {
    /// Frames per capture chunk.
    #[serde(default = "DevicesConfig::default_chunk_frames")]
    pub chunk_frames: usize,

    /// Nominal sample rate in Hz.
    #[serde(default = "DevicesConfig::default_sample_rate")]
    pub sample_rate: u32,
}

impl DevicesConfig {
    fn default_chunk_frames() -> usize {
        1024
    }

    fn default_sample_rate() -> u32 {
        44100
    }
}

impl Default for DevicesConfig {
    fn default() -> Self {
        Self {
            chunk_frames: Self::default_chunk_frames(),
            sample_rate: Self::default_sample_rate(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BootstrapConfig {
    #[serde(default)]
    pub session: SessionConfig,

    #[serde(default)]
    pub devices: DevicesConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_defaults() {
        let session = SessionConfig::default();
        assert_eq!(session.settle(), Duration::from_secs(1));
        assert_eq!(session.record_lead(), Duration::from_millis(500));
        assert_eq!(session.surface, "console");
    }

    #[test]
    fn test_devices_defaults() {
        let devices = DevicesConfig::default();
        assert_eq!(devices.chunk_frames, 1024);
        assert_eq!(devices.sample_rate, 44100);
    }
}
