//! Configuration loading for the media graph runtime.
//!
//! Kept small on purpose: the runtime crate imports it, and so does any
//! tool that wants to agree with the runtime about defaults.
//!
//! # Usage
//!
//! ```rust,no_run
//! use mediaconf::MediaConfig;
//!
//! let config = MediaConfig::load().expect("Failed to load config");
//! println!("quantum: {}", config.graph.quantum_size);
//! println!("log level: {}", config.telemetry.log_level);
//! ```
//!
//! # Config File Locations
//!
//! Files are loaded in order (later wins):
//! 1. `/etc/mediagraph/config.toml` (system)
//! 2. `~/.config/mediagraph/config.toml` (user)
//! 3. `./mediagraph.toml` (local override, or an explicit path)
//! 4. Environment variables (`MEDIAGRAPH_*`, `RUST_LOG`)
//!
//! # Example Config
//!
//! ```toml
//! [graph]
//! quantum_size = 256
//! rate = 48000
//! pause_on_idle = true
//!
//! [data_loop]
//! queue_size = 128
//! thread_name = "data-loop"
//!
//! [telemetry]
//! log_level = "debug"
//!
//! [codecs]
//! factories = ["codec.sbc", "codec.aac"]
//! ```

pub mod loader;
pub mod sections;

pub use loader::{discover_config_files_with_override, ConfigLocations, ConfigSources, APP_NAME};
pub use sections::{CodecsConfig, DataLoopConfig, GraphConfig, TelemetryConfig};

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
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

    #[error("Invalid value for {key} in {path}: {message}")]
    InvalidValue {
        path: PathBuf,
        key: String,
        message: String,
    },
}

/// Complete runtime configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct MediaConfig {
    #[serde(default)]
    pub graph: GraphConfig,

    #[serde(default)]
    pub data_loop: DataLoopConfig,

    #[serde(default)]
    pub telemetry: TelemetryConfig,

    #[serde(default)]
    pub codecs: CodecsConfig,
}

impl MediaConfig {
    /// Load configuration from all sources.
    ///
    /// Load order (later wins):
    /// 1. Compiled defaults
    /// 2. `/etc/mediagraph/config.toml`
    /// 3. `~/.config/mediagraph/config.toml`
    /// 4. `./mediagraph.toml`
    /// 5. Environment variables
    pub fn load() -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(None)?;
        Ok(config)
    }

    /// Load configuration with an explicit file replacing `./mediagraph.toml`.
    pub fn load_from(config_path: Option<&std::path::Path>) -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(config_path)?;
        Ok(config)
    }

    /// Load configuration from optional path and return information about sources.
    pub fn load_with_sources_from(
        config_path: Option<&std::path::Path>,
    ) -> Result<(Self, ConfigSources), ConfigError> {
        let mut sources = ConfigSources::default();
        let mut config = MediaConfig::default();

        for path in loader::discover_config_files_with_override(config_path) {
            loader::apply_file(&mut config, &path)?;
            sources.files.push(path);
        }

        loader::apply_env_overrides(&mut config, &mut sources);

        Ok((config, sources))
    }

    /// Serialize config to a TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Parse {
            path: PathBuf::from("<memory>"),
            message: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = MediaConfig::default();
        assert_eq!(config.graph.quantum_size, 1024);
        assert_eq!(config.graph.rate, 48_000);
        assert!(config.graph.pause_on_idle);
        assert_eq!(config.data_loop.thread_name, "data-loop");
        assert!(config.codecs.factories.contains(&"codec.sbc".to_string()));
    }

    #[test]
    fn test_to_toml_reparses() {
        let config = MediaConfig::default();
        let text = config.to_toml().unwrap();
        assert!(text.contains("[graph]"));
        assert!(text.contains("[data_loop]"));
        let parsed: MediaConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_load_from_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        std::fs::write(&path, "[graph]\nquantum_size = 128\n").unwrap();

        let (config, sources) = MediaConfig::load_with_sources_from(Some(&path)).unwrap();
        assert_eq!(config.graph.quantum_size, 128);
        assert!(sources.files.contains(&path));
    }
}
