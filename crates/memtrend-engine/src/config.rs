//! Engine configuration: per-node order count, lookback depth, loading.
//!
//! Supports TOML, YAML, and JSON configuration files with auto-detection of
//! the format from the file extension.

use config::{Config as Cfg, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Default lookback window depth, in samples.
pub const DEFAULT_LOOKBACK: usize = 8;

/// Default number of allocation-order classes (Linux `MAX_ORDER`).
pub const DEFAULT_ORDER_COUNT: usize = 11;

/// Configuration error for engine construction and file loading.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config parsing error: {0}")]
    Parse(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Invalid value for `{field}`: {reason}")]
    Invalid {
        field: &'static str,
        reason: &'static str,
    },
}

/// Result type for config operations
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Static shape of one node's prediction engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// NUMA node id, carried into log fields only.
    pub node: u32,
    /// Number of allocation-order classes tracked (index 0 = aggregate).
    pub order_count: usize,
    /// Samples per lookback window for the least-squares fit.
    pub lookback: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            node: 0,
            order_count: DEFAULT_ORDER_COUNT,
            lookback: DEFAULT_LOOKBACK,
        }
    }
}

impl EngineConfig {
    pub fn with_node(mut self, node: u32) -> Self {
        self.node = node;
        self
    }

    pub fn with_order_count(mut self, order_count: usize) -> Self {
        self.order_count = order_count;
        self
    }

    pub fn with_lookback(mut self, lookback: usize) -> Self {
        self.lookback = lookback;
        self
    }

    /// Validates structural constraints.
    ///
    /// A line needs at least two points, and a cross-order prediction needs
    /// at least the aggregate plus one higher order.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.lookback < 2 {
            return Err(ConfigError::Invalid {
                field: "lookback",
                reason: "at least 2 samples are required to fit a line",
            });
        }
        if self.order_count < 2 {
            return Err(ConfigError::Invalid {
                field: "order_count",
                reason: "at least the aggregate and one higher order are required",
            });
        }
        Ok(())
    }

    /// Loads and validates a configuration file.
    ///
    /// The format is detected from the file extension; missing keys fall
    /// back to their defaults.
    pub fn from_file(path: &str) -> ConfigResult<Self> {
        let format = detect_format(path)?;
        let content = std::fs::read_to_string(path)?;

        let parsed: Self = Cfg::builder()
            .add_source(File::from_str(&content, format))
            .build()
            .map_err(|e| ConfigError::Parse(e.to_string()))?
            .try_deserialize()
            .map_err(|e| ConfigError::Parse(e.to_string()))?;

        parsed.validate()?;
        Ok(parsed)
    }
}

/// Detect configuration format from file extension
///
/// Supported: `.toml`, `.yaml`/`.yml`, `.json`.
pub fn detect_format(path: &str) -> ConfigResult<FileFormat> {
    let ext = Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .ok_or_else(|| ConfigError::UnsupportedFormat("No file extension found".to_string()))?;

    match ext.to_lowercase().as_str() {
        "toml" => Ok(FileFormat::Toml),
        "yaml" | "yml" => Ok(FileFormat::Yaml),
        "json" => Ok(FileFormat::Json),
        _ => Err(ConfigError::UnsupportedFormat(ext.to_string())),
    }
}
