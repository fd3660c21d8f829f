//! Infrastructure configuration - things that cannot change at runtime.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Filesystem paths for task output and local state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Directory task output files are written to (acquisition recordings,
    /// eye-tracker files). Default: ~/stimbooth/data
    #[serde(default = "PathsConfig::default_data_out")]
    pub data_out: PathBuf,

    /// Base directory for local state (the obslog database).
    /// Default: ~/.local/share/stimbooth
    #[serde(default = "PathsConfig::default_state_dir")]
    pub state_dir: PathBuf,
}

impl PathsConfig {
    fn default_data_out() -> PathBuf {
        directories::BaseDirs::new()
            .map(|dirs| dirs.home_dir().join("stimbooth/data"))
            .unwrap_or_else(|| PathBuf::from("stimbooth/data"))
    }

    fn default_state_dir() -> PathBuf {
        directories::BaseDirs::new()
            .map(|dirs| dirs.home_dir().join(".local/share/stimbooth"))
            .unwrap_or_else(|| PathBuf::from(".local/share/stimbooth"))
    }

    /// Location of the obslog SQLite database.
    pub fn obslog_db(&self) -> PathBuf {
        self.state_dir.join("obslog.db")
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            data_out: Self::default_data_out(),
            state_dir: Self::default_state_dir(),
        }
    }
}

/// Network bind addresses for this process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BindConfig {
    /// TCP address the operator command socket listens on.
    /// Default: 0.0.0.0:12347
    #[serde(default = "BindConfig::default_command")]
    pub command: String,
}

impl BindConfig {
    fn default_command() -> String {
        "0.0.0.0:12347".to_string()
    }
}

impl Default for BindConfig {
    fn default() -> Self {
        Self {
            command: Self::default_command(),
        }
    }
}

/// Where the acquisition service lives and how long we wait on it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcquisitionConfig {
    /// TCP address of the acquisition service.
    /// Default: 127.0.0.1:12346
    #[serde(default = "AcquisitionConfig::default_endpoint")]
    pub endpoint: String,

    /// Bound on every acquisition round trip, in milliseconds.
    /// Default: 3000
    #[serde(default = "AcquisitionConfig::default_timeout_ms")]
    pub timeout_ms: u64,
}

impl AcquisitionConfig {
    fn default_endpoint() -> String {
        "127.0.0.1:12346".to_string()
    }

    fn default_timeout_ms() -> u64 {
        3000
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            endpoint: Self::default_endpoint(),
            timeout_ms: Self::default_timeout_ms(),
        }
    }
}

/// Telemetry and observability configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// OTLP gRPC endpoint for OpenTelemetry. Empty disables export.
    /// Default: "" (disabled)
    #[serde(default)]
    pub otlp_endpoint: String,

    /// Log level (trace, debug, info, warn, error) or a full EnvFilter directive.
    /// Default: info
    #[serde(default = "TelemetryConfig::default_log_level")]
    pub log_level: String,
}

impl TelemetryConfig {
    fn default_log_level() -> String {
        "info".to_string()
    }

    pub fn otlp_enabled(&self) -> bool {
        !self.otlp_endpoint.trim().is_empty()
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            otlp_endpoint: String::new(),
            log_level: Self::default_log_level(),
        }
    }
}

/// Infrastructure configuration - cannot change at runtime.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InfraConfig {
    #[serde(default)]
    pub paths: PathsConfig,

    #[serde(default)]
    pub bind: BindConfig,

    #[serde(default)]
    pub acquisition: AcquisitionConfig,

    #[serde(default)]
    pub telemetry: TelemetryConfig,
}
