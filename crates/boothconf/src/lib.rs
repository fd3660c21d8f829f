//! Layered configuration for the stimbooth control node.
//!
//! Configuration is split into two categories:
//!
//! - **Infrastructure** (`InfraConfig`): paths, bind addresses, the
//!   acquisition endpoint and telemetry. Fixed for the life of the process.
//!
//! - **Bootstrap** (`BootstrapConfig`): session timing and device capture
//!   defaults that seed the engine at startup.
//!
//! # Config File Locations
//!
//! Files are loaded in order (later wins):
//! 1. `/etc/stimbooth/config.toml` (system)
//! 2. `~/.config/stimbooth/config.toml` (user)
//! 3. `./stimbooth.toml` (local override, replaced by `--config`)
//! 4. Environment variables (`STIMBOOTH_*`, `RUST_LOG`, `OTEL_EXPORTER_OTLP_ENDPOINT`)
//!
//! # Example Config
//!
//! ```toml
//! [paths]
//! data_out = "~/stimbooth/data"
//! state_dir = "~/.local/share/stimbooth"
//!
//! [bind]
//! command = "0.0.0.0:12347"
//!
//! [acquisition]
//! endpoint = "127.0.0.1:12346"
//! timeout_ms = 3000
//!
//! [session]
//! settle_ms = 1000
//! record_lead_ms = 500
//! ```

pub mod bootstrap;
pub mod infra;
pub mod loader;

pub use bootstrap::{BootstrapConfig, DevicesConfig, SessionConfig};
pub use infra::{AcquisitionConfig, BindConfig, InfraConfig, PathsConfig, TelemetryConfig};
pub use loader::{discover_config_files_with_override, ConfigSources};

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },
}

/// Complete stimbooth configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct BoothConfig {
    #[serde(flatten)]
    pub infra: InfraConfig,

    #[serde(flatten)]
    pub bootstrap: BootstrapConfig,
}

impl BoothConfig {
    /// Load configuration from all sources.
    pub fn load() -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(None)?;
        Ok(config)
    }

    /// Load configuration, letting `config_path` stand in for `./stimbooth.toml`.
    pub fn load_from(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(config_path)?;
        Ok(config)
    }

    /// Load configuration from optional path and return information about sources.
    pub fn load_with_sources_from(
        config_path: Option<&Path>,
    ) -> Result<(Self, ConfigSources), ConfigError> {
        let mut sources = ConfigSources::default();
        let mut config = BoothConfig::default();

        for path in loader::discover_config_files_with_override(config_path) {
            loader::overlay_file(&mut config, &path)?;
            sources.files.push(path);
        }

        loader::apply_env_overrides(&mut config, &mut sources);

        Ok((config, sources))
    }

    /// Render the effective configuration as TOML.
    pub fn to_toml(&self) -> String {
        let mut output = String::new();

        output.push_str("# stimbooth configuration\n\n");

        output.push_str("[paths]\n");
        output.push_str(&format!(
            "data_out = \"{}\"\n",
            self.infra.paths.data_out.display()
        ));
        output.push_str(&format!(
            "state_dir = \"{}\"\n",
            self.infra.paths.state_dir.display()
        ));

        output.push_str("\n[bind]\n");
        output.push_str(&format!("command = \"{}\"\n", self.infra.bind.command));

        output.push_str("\n[acquisition]\n");
        output.push_str(&format!(
            "endpoint = \"{}\"\n",
            self.infra.acquisition.endpoint
        ));
        output.push_str(&format!(
            "timeout_ms = {}\n",
            self.infra.acquisition.timeout_ms
        ));

        output.push_str("\n[telemetry]\n");
        output.push_str(&format!(
            "otlp_endpoint = \"{}\"\n",
            self.infra.telemetry.otlp_endpoint
        ));
        output.push_str(&format!(
            "log_level = \"{}\"\n",
            self.infra.telemetry.log_level
        ));

        output.push_str("\n[session]\n");
        output.push_str(&format!(
            "settle_ms = {}\n",
            self.bootstrap.session.settle_ms
        ));
        output.push_str(&format!(
            "record_lead_ms = {}\n",
            self.bootstrap.session.record_lead_ms
        ));
        output.push_str(&format!(
            "surface = \"{}\"\n",
            self.bootstrap.session.surface
        ));

        output.push_str("\n[devices]\n");
        output.push_str(&format!(
            "chunk_frames = {}\n",
            self.bootstrap.devices.chunk_frames
        ));
        output.push_str(&format!(
            "sample_rate = {}\n",
            self.bootstrap.devices.sample_rate
        ));

        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = BoothConfig::default();
        assert_eq!(config.infra.bind.command, "0.0.0.0:12347");
        assert_eq!(config.bootstrap.session.settle_ms, 1000);
    }

    #[test]
    fn test_to_toml_sections() {
        let toml = BoothConfig::default().to_toml();
        for section in ["[paths]", "[bind]", "[acquisition]", "[telemetry]", "[session]", "[devices]"] {
            assert!(toml.contains(section), "missing {section}");
        }
    }

    #[test]
    fn test_to_toml_reloads_to_same_config() {
        let mut original = BoothConfig::default();
        original.infra.acquisition.timeout_ms = 750;
        original.bootstrap.devices.chunk_frames = 64;

        let mut reloaded = BoothConfig::default();
        loader::overlay_toml(&mut reloaded, &original.to_toml(), Path::new("rendered.toml"))
            .unwrap();
        assert_eq!(reloaded, original);
    }

    #[test]
    fn test_load_from_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        std::fs::write(&path, "[session]\nsettle_ms = 5\n").unwrap();

        let (config, sources) = BoothConfig::load_with_sources_from(Some(&path)).unwrap();
        assert!(sources.files.contains(&path));
        assert_eq!(config.bootstrap.session.settle_ms, 5);
    }
}
