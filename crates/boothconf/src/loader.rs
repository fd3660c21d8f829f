//! Config file discovery, loading, and environment variable overlay.

use crate::{BoothConfig, ConfigError};
use std::env;
use std::path::{Path, PathBuf};

/// Information about where config values came from.
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    /// Config files that were loaded (in order)
    pub files: Vec<PathBuf>,
    /// Environment variables that overrode config values
    pub env_overrides: Vec<String>,
}

/// Discover config files in standard locations.
///
/// Returns paths in load order (system, user, local). Only returns files that exist.
pub fn discover_config_files() -> Vec<PathBuf> {
    discover_config_files_with_override(None)
}

/// Discover config files, optionally with a CLI override path.
///
/// If `cli_path` is provided and exists, it replaces the local override.
pub fn discover_config_files_with_override(cli_path: Option<&Path>) -> Vec<PathBuf> {
    let mut files = Vec::new();

    let system = PathBuf::from("/etc/stimbooth/config.toml");
    if system.exists() {
        files.push(system);
    }

    if let Some(config_dir) = directories::BaseDirs::new().map(|d| d.config_dir().to_path_buf()) {
        let user = config_dir.join("stimbooth/config.toml");
        if user.exists() {
            files.push(user);
        }
    }

    if let Some(path) = cli_path {
        if path.exists() {
            files.push(path.to_path_buf());
            return files;
        }
    }

    let local = PathBuf::from("stimbooth.toml");
    if local.exists() {
        files.push(local);
    }

    files
}

/// Read a TOML file and overlay it onto `config`.
pub fn overlay_file(config: &mut BoothConfig, path: &Path) -> Result<(), ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    overlay_toml(config, &contents, path)
}

/// Overlay the keys present in a TOML document onto `config`.
///
/// Keys absent from the document keep their current value, so layering
/// several files behaves like a field-by-field merge.
pub fn overlay_toml(config: &mut BoothConfig, contents: &str, path: &Path) -> Result<(), ConfigError> {
    let table: toml::Table = contents.parse().map_err(|e: toml::de::Error| ConfigError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;

    let invalid = |key: &str, expected: &str| ConfigError::Parse {
        path: path.to_path_buf(),
        message: format!("{} must be {}", key, expected),
    };

    if let Some(paths) = table.get("paths").and_then(|v| v.as_table()) {
        if let Some(v) = paths.get("data_out").and_then(|v| v.as_str()) {
            config.infra.paths.data_out = expand_path(v);
        }
        if let Some(v) = paths.get("state_dir").and_then(|v| v.as_str()) {
            config.infra.paths.state_dir = expand_path(v);
        }
    }

    if let Some(bind) = table.get("bind").and_then(|v| v.as_table()) {
        if let Some(v) = bind.get("command").and_then(|v| v.as_str()) {
            config.infra.bind.command = v.to_string();
        }
    }

    if let Some(acq) = table.get("acquisition").and_then(|v| v.as_table()) {
        if let Some(v) = acq.get("endpoint").and_then(|v| v.as_str()) {
            config.infra.acquisition.endpoint = v.to_string();
        }
        if let Some(v) = acq.get("timeout_ms") {
            let ms = v
                .as_integer()
                .filter(|ms| *ms >= 0)
                .ok_or_else(|| invalid("acquisition.timeout_ms", "a non-negative integer"))?;
            config.infra.acquisition.timeout_ms = ms as u64;
        }
    }

    if let Some(telemetry) = table.get("telemetry").and_then(|v| v.as_table()) {
        if let Some(v) = telemetry.get("otlp_endpoint").and_then(|v| v.as_str()) {
            config.infra.telemetry.otlp_endpoint = v.to_string();
        }
        if let Some(v) = telemetry.get("log_level").and_then(|v| v.as_str()) {
            config.infra.telemetry.log_level = v.to_string();
        }
    }

    if let Some(session) = table.get("session").and_then(|v| v.as_table()) {
        if let Some(v) = session.get("settle_ms") {
            let ms = v
                .as_integer()
                .filter(|ms| *ms >= 0)
                .ok_or_else(|| invalid("session.settle_ms", "a non-negative integer"))?;
            config.bootstrap.session.settle_ms = ms as u64;
        }
        if let Some(v) = session.get("record_lead_ms") {
            let ms = v
                .as_integer()
                .filter(|ms| *ms >= 0)
                .ok_or_else(|| invalid("session.record_lead_ms", "a non-negative integer"))?;
            config.bootstrap.session.record_lead_ms = ms as u64;
        }
        if let Some(v) = session.get("surface").and_then(|v| v.as_str()) {
            config.bootstrap.session.surface = v.to_string();
        }
    }

    if let Some(devices) = table.get("devices").and_then(|v| v.as_table()) {
        if let Some(v) = devices.get("chunk_frames") {
            let frames = v
                .as_integer()
                .filter(|n| *n > 0)
                .ok_or_else(|| invalid("devices.chunk_frames", "a positive integer"))?;
            config.bootstrap.devices.chunk_frames = frames as usize;
        }
        if let Some(v) = devices.get("sample_rate") {
            let rate = v
                .as_integer()
                .filter(|n| *n > 0 && *n <= u32::MAX as i64)
                .ok_or_else(|| invalid("devices.sample_rate", "a positive integer"))?;
            config.bootstrap.devices.sample_rate = rate as u32;
        }
    }

    Ok(())
}

/// Apply environment variable overrides to config.
pub fn apply_env_overrides(config: &mut BoothConfig, sources: &mut ConfigSources) {
    if let Ok(v) = env::var("STIMBOOTH_DATA_OUT") {
        config.infra.paths.data_out = expand_path(&v);
        sources.env_overrides.push("STIMBOOTH_DATA_OUT".to_string());
    }
    if let Ok(v) = env::var("STIMBOOTH_STATE_DIR") {
        config.infra.paths.state_dir = expand_path(&v);
        sources.env_overrides.push("STIMBOOTH_STATE_DIR".to_string());
    }

    if let Ok(v) = env::var("STIMBOOTH_BIND") {
        config.infra.bind.command = v;
        sources.env_overrides.push("STIMBOOTH_BIND".to_string());
    }

    if let Ok(v) = env::var("STIMBOOTH_ACQUISITION") {
        config.infra.acquisition.endpoint = v;
        sources.env_overrides.push("STIMBOOTH_ACQUISITION".to_string());
    }
    if let Ok(v) = env::var("STIMBOOTH_ACQUISITION_TIMEOUT_MS") {
        if let Ok(ms) = v.parse() {
            config.infra.acquisition.timeout_ms = ms;
            sources
                .env_overrides
                .push("STIMBOOTH_ACQUISITION_TIMEOUT_MS".to_string());
        }
    }

    if let Ok(v) = env::var("STIMBOOTH_OTLP_ENDPOINT") {
        config.infra.telemetry.otlp_endpoint = v;
        sources.env_overrides.push("STIMBOOTH_OTLP_ENDPOINT".to_string());
    }
    // Also support standard OTEL env var
    if let Ok(v) = env::var("OTEL_EXPORTER_OTLP_ENDPOINT") {
        config.infra.telemetry.otlp_endpoint = v;
        sources
            .env_overrides
            .push("OTEL_EXPORTER_OTLP_ENDPOINT".to_string());
    }
    if let Ok(v) = env::var("STIMBOOTH_LOG_LEVEL") {
        config.infra.telemetry.log_level = v;
        sources.env_overrides.push("STIMBOOTH_LOG_LEVEL".to_string());
    }
    if let Ok(v) = env::var("RUST_LOG") {
        config.infra.telemetry.log_level = v;
        sources.env_overrides.push("RUST_LOG".to_string());
    }
}

/// Expand ~ and environment variables in a path.
pub fn expand_path(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = directories::BaseDirs::new().map(|d| d.home_dir().to_path_buf()) {
            return home.join(stripped);
        }
        return PathBuf::from(path);
    }

    if let Some(stripped) = path.strip_prefix('$') {
        // $VAR/rest/of/path
        return match stripped.split_once('/') {
            Some((var_name, rest)) => env::var(var_name)
                .map(|value| PathBuf::from(value).join(rest))
                .unwrap_or_else(|_| PathBuf::from(path)),
            None => env::var(stripped)
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(path)),
        };
    }

    PathBuf::from(path)
}
