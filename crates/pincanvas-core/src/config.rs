//! Session configuration.

use crate::storage::{StorageError, StorageResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Retry and history settings for the sync engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Total remote attempts for a mutation that keeps failing as unavailable.
    pub max_attempts: u32,
    /// Number of mutation records kept for inspection.
    pub history_limit: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            history_limit: 100,
        }
    }
}

/// Configuration for a [`Session`](crate::Session).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Directory for the file cache; the platform data directory when unset.
    pub cache_dir: Option<PathBuf>,
    /// Base of the links produced by `share_url`.
    pub share_base_url: String,
    pub sync: SyncConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cache_dir: None,
            share_base_url: "http://localhost:5173".to_string(),
            sync: SyncConfig::default(),
        }
    }
}

impl SessionConfig {
    /// Parse a JSON config; missing fields take their defaults.
    pub fn from_json(json: &str) -> StorageResult<Self> {
        serde_json::from_str(json)
            .map_err(|e| StorageError::Serialization(format!("Invalid session config: {}", e)))
    }

    /// Load a JSON config file.
    pub fn load(path: &Path) -> StorageResult<Self> {
        let json = std::fs::read_to_string(path).map_err(|e| {
            StorageError::Io(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_json(&json)
    }

    /// `cache_dir`, or the platform default.
    #[cfg(not(target_arch = "wasm32"))]
    pub fn resolved_cache_dir(&self) -> StorageResult<PathBuf> {
        match &self.cache_dir {
            Some(dir) => Ok(dir.clone()),
            None => crate::storage::default_cache_dir(),
        }
    }

    /// Share base URL without a trailing slash.
    pub(crate) fn share_base(&self) -> &str {
        self.share_base_url.trim_end_matches('/')
    }
}
