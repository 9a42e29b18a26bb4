//! Configuration sections for the media graph runtime.

use serde::{Deserialize, Serialize};

/// Graph defaults applied to every new node and driver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphConfig {
    /// Frames per cycle for drivers without an attached clock.
    /// Default: 1024
    #[serde(default = "GraphConfig::default_quantum_size")]
    pub quantum_size: u32,

    /// Sample rate reported in computed quanta.
    /// Default: 48000
    #[serde(default = "GraphConfig::default_rate")]
    pub rate: u32,

    /// Value of `node.pause-on-idle` when a node does not set it.
    /// Default: true
    #[serde(default = "GraphConfig::default_pause_on_idle")]
    pub pause_on_idle: bool,
}

impl GraphConfig {
    fn default_quantum_size() -> u32 {
        1024
    }

    fn default_rate() -> u32 {
        48_000
    }

    fn default_pause_on_idle() -> bool {
        true
    }
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            quantum_size: Self::default_quantum_size(),
            rate: Self::default_rate(),
            pause_on_idle: Self::default_pause_on_idle(),
        }
    }
}

/// Real-time data loop settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataLoopConfig {
    /// Maximum queued invocations before callers get a queue-full error.
    /// Default: 128
    #[serde(default = "DataLoopConfig::default_queue_size")]
    pub queue_size: usize,

    /// Name given to the data loop thread.
    /// Default: data-loop
    #[serde(default = "DataLoopConfig::default_thread_name")]
    pub thread_name: String,
}

impl DataLoopConfig {
    fn default_queue_size() -> usize {
        128
    }

    fn default_thread_name() -> String {
        "data-loop".to_string()
    }
}

impl Default for DataLoopConfig {
    fn default() -> Self {
        Self {
            queue_size: Self::default_queue_size(),
            thread_name: Self::default_thread_name(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Log level or filter directive (trace, debug, info, warn, error).
    /// Default: info
    #[serde(default = "TelemetryConfig::default_log_level")]
    pub log_level: String,
}

impl TelemetryConfig {
    fn default_log_level() -> String {
        "info".to_string()
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Self::default_log_level(),
        }
    }
}

/// Codec plugin factories to try, in load order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodecsConfig {
    #[serde(default = "CodecsConfig::default_factories")]
    pub factories: Vec<String>,
}

impl CodecsConfig {
    fn default_factories() -> Vec<String> {
        vec![
            "codec.aac".to_string(),
            "codec.aptx".to_string(),
            "codec.faststream".to_string(),
            "codec.ldac".to_string(),
            "codec.sbc".to_string(),
        ]
    }
}

impl Default for CodecsConfig {
    fn default() -> Self {
        Self {
            factories: Self::default_factories(),
        }
    }
}
