//! Client-side persistent cache.
//!
//! Backends store opaque JSON strings under string keys; [`LocalCache`] lays
//! the layer and pin collections of each canvas on top of them.

mod cache;
mod memory;

#[cfg(not(target_arch = "wasm32"))]
mod file;

pub use cache::{CachedCanvas, LocalCache};
pub use memory::MemoryStorage;

#[cfg(not(target_arch = "wasm32"))]
pub use file::FileStorage;
#[cfg(not(target_arch = "wasm32"))]
pub(crate) use file::default_cache_dir;

use thiserror::Error;

/// Storage errors.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Entry not found: {0}")]
    NotFound(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("IO error: {0}")]
    Io(String),
    #[error("Storage error: {0}")]
    Other(String),
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Trait for cache storage backends.
///
/// Calls are synchronous and each `save` replaces the entry as a whole, so a
/// reader never observes a partially written value.
pub trait CacheStorage {
    /// Replace the entry stored under `key`.
    fn save(&self, key: &str, value: &str) -> StorageResult<()>;

    /// Load the entry stored under `key`.
    fn load(&self, key: &str) -> StorageResult<String>;

    /// Delete an entry. Deleting a missing entry is not an error.
    fn delete(&self, key: &str) -> StorageResult<()>;

    /// List all keys.
    fn list(&self) -> StorageResult<Vec<String>>;

    /// Check if an entry exists.
    fn exists(&self, key: &str) -> StorageResult<bool>;
}
