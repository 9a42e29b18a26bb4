//! Config file discovery, loading, and environment variable overlay.

use crate::{ConfigError, MediaConfig};
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

/// Application name used for every standard config path.
pub const APP_NAME: &str = "mediagraph";

/// Where an application looks for config files, in load order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigLocations {
    pub system: PathBuf,
    /// Under `XDG_CONFIG_HOME` (or `~/.config`) when a home exists.
    pub user: Option<PathBuf>,
    pub local: PathBuf,
}

impl ConfigLocations {
    pub fn for_app(app: &str) -> Self {
        Self {
            system: Path::new("/etc").join(app).join("config.toml"),
            user: directories::BaseDirs::new()
                .map(|d| d.config_dir().join(app).join("config.toml")),
            local: PathBuf::from(format!("{app}.toml")),
        }
    }

    /// Files that exist, in load order. An existing `explicit` path takes the
    /// local file's place.
    pub fn existing(&self, explicit: Option<&Path>) -> Vec<PathBuf> {
        let last = explicit
            .filter(|p| p.exists())
            .unwrap_or(self.local.as_path());
        [Some(self.system.as_path()), self.user.as_deref(), Some(last)]
            .into_iter()
            .flatten()
            .filter(|p| p.exists())
            .map(Path::to_path_buf)
            .collect()
    }
}

/// Discover config files in standard locations.
pub fn discover_config_files() -> Vec<PathBuf> {
    discover_config_files_with_override(None)
}

/// Discover config files, with `cli_path` replacing the local file when it
/// exists.
pub fn discover_config_files_with_override(cli_path: Option<&Path>) -> Vec<PathBuf> {
    ConfigLocations::for_app(APP_NAME).existing(cli_path)
}

/// Read a TOML file and layer the keys it sets over `config`.
pub fn apply_file(config: &mut MediaConfig, path: &Path) -> Result<(), ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    apply_toml(config, &contents, path)
}

/// Layer a TOML document over `config`. Keys absent from the document keep
/// whatever value `config` already had, so files merge field by field.
pub fn apply_toml(config: &mut MediaConfig, contents: &str, path: &Path) -> Result<(), ConfigError> {
    let table: toml::Table = contents.parse().map_err(|e: toml::de::Error| ConfigError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;

    let invalid = |key: &str, message: &str| ConfigError::InvalidValue {
        path: path.to_path_buf(),
        key: key.to_string(),
        message: message.to_string(),
    };

    if let Some(graph) = table.get("graph").and_then(|v| v.as_table()) {
        if let Some(v) = graph.get("quantum_size").and_then(|v| v.as_integer()) {
            config.graph.quantum_size =
                u32::try_from(v).map_err(|_| invalid("graph.quantum_size", "out of range"))?;
            if config.graph.quantum_size == 0 {
                return Err(invalid("graph.quantum_size", "must be greater than zero"));
            }
        }
        if let Some(v) = graph.get("rate").and_then(|v| v.as_integer()) {
            config.graph.rate = u32::try_from(v).map_err(|_| invalid("graph.rate", "out of range"))?;
        }
        if let Some(v) = graph.get("pause_on_idle").and_then(|v| v.as_bool()) {
            config.graph.pause_on_idle = v;
        }
    }

    if let Some(data_loop) = table.get("data_loop").and_then(|v| v.as_table()) {
        if let Some(v) = data_loop.get("queue_size").and_then(|v| v.as_integer()) {
            config.data_loop.queue_size = usize::try_from(v)
                .ok()
                .filter(|n| *n > 0)
                .ok_or_else(|| invalid("data_loop.queue_size", "must be a positive integer"))?;
        }
        if let Some(v) = data_loop.get("thread_name").and_then(|v| v.as_str()) {
            config.data_loop.thread_name = v.to_string();
        }
    }

    if let Some(telemetry) = table.get("telemetry").and_then(|v| v.as_table()) {
        if let Some(v) = telemetry.get("log_level").and_then(|v| v.as_str()) {
            config.telemetry.log_level = v.to_string();
        }
    }

    if let Some(codecs) = table.get("codecs").and_then(|v| v.as_table()) {
        if let Some(list) = codecs.get("factories").and_then(|v| v.as_array()) {
            config.codecs.factories = list
                .iter()
                .filter_map(|v| v.as_str())
                .map(str::to_string)
                .collect();
        }
    }

    Ok(())
}

/// Apply environment variable overrides to config.
pub fn apply_env_overrides(config: &mut MediaConfig, sources: &mut ConfigSources) {
    if let Ok(v) = env::var("MEDIAGRAPH_QUANTUM_SIZE") {
        if let Ok(n) = v.parse::<u32>() {
            if n > 0 {
                config.graph.quantum_size = n;
                sources.env_overrides.push("MEDIAGRAPH_QUANTUM_SIZE".to_string());
            }
        }
    }
    if let Ok(v) = env::var("MEDIAGRAPH_RATE") {
        if let Ok(n) = v.parse() {
            config.graph.rate = n;
            sources.env_overrides.push("MEDIAGRAPH_RATE".to_string());
        }
    }
    if let Ok(v) = env::var("MEDIAGRAPH_PAUSE_ON_IDLE") {
        if let Ok(b) = v.parse() {
            config.graph.pause_on_idle = b;
            sources.env_overrides.push("MEDIAGRAPH_PAUSE_ON_IDLE".to_string());
        }
    }
    if let Ok(v) = env::var("MEDIAGRAPH_QUEUE_SIZE") {
        if let Ok(n) = v.parse::<usize>() {
            if n > 0 {
                config.data_loop.queue_size = n;
                sources.env_overrides.push("MEDIAGRAPH_QUEUE_SIZE".to_string());
            }
        }
    }

    if let Ok(v) = env::var("MEDIAGRAPH_LOG_LEVEL") {
        config.telemetry.log_level = v;
        sources.env_overrides.push("MEDIAGRAPH_LOG_LEVEL".to_string());
    }
    // Also support RUST_LOG
    if let Ok(v) = env::var("RUST_LOG") {
        config.telemetry.log_level = v;
        sources.env_overrides.push("RUST_LOG".to_string());
    }
}
