//! Engine configuration

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// File name attached to diagnostics when the caller supplies none.
pub const DEFAULT_FILE_NAME: &str = "?";

/// Resource limits and defaults applied when an interpreter is created.
///
/// Missing fields take their defaults, so `{}` is a valid config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Heap limit in bytes. `None` leaves the engine unbounded.
    pub memory_limit: Option<usize>,
    /// Native stack limit in bytes for script execution.
    pub max_stack_size: Option<usize>,
    /// Allocation volume in bytes that triggers a GC cycle.
    pub gc_threshold: Option<usize>,
    /// File name used by `evaluate` for error reporting.
    pub default_file_name: String,
}

impl EngineConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&json)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            memory_limit: None,
            max_stack_size: None,
            gc_threshold: None,
            default_file_name: DEFAULT_FILE_NAME.to_string(),
        }
    }
}
