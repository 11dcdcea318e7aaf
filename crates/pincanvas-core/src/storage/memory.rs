//! In-memory cache backend.

use super::{CacheStorage, StorageError, StorageResult};
use std::collections::HashMap;
use std::sync::RwLock;

/// In-memory storage for testing and ephemeral sessions.
#[derive(Default)]
pub struct MemoryStorage {
    entries: RwLock<HashMap<String, String>>,
    /// When set, every write fails with an IO error.
    read_only: RwLock<bool>,
}

impl MemoryStorage {
    /// Create a new empty memory storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent writes fail, simulating a full or locked disk.
    pub fn set_read_only(&self, read_only: bool) {
        if let Ok(mut flag) = self.read_only.write() {
            *flag = read_only;
        }
    }

    fn check_writable(&self) -> StorageResult<()> {
        let read_only = self
            .read_only
            .read()
            .map_err(|e| StorageError::Other(format!("Lock error: {}", e)))?;
        if *read_only {
            return Err(StorageError::Io("storage is read-only".to_string()));
        }
        Ok(())
    }
}

impl CacheStorage for MemoryStorage {
    fn save(&self, key: &str, value: &str) -> StorageResult<()> {
        self.check_writable()?;
        let mut entries = self
            .entries
            .write()
            .map_err(|e| StorageError::Other(format!("Lock error: {}", e)))?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn load(&self, key: &str) -> StorageResult<String> {
        let entries = self
            .entries
            .read()
            .map_err(|e| StorageError::Other(format!("Lock error: {}", e)))?;
        entries
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    fn delete(&self, key: &str) -> StorageResult<()> {
        self.check_writable()?;
        let mut entries = self
            .entries
            .write()
            .map_err(|e| StorageError::Other(format!("Lock error: {}", e)))?;
        entries.remove(key);
        Ok(())
    }

    fn list(&self) -> StorageResult<Vec<String>> {
        let entries = self
            .entries
            .read()
            .map_err(|e| StorageError::Other(format!("Lock error: {}", e)))?;
        Ok(entries.keys().cloned().collect())
    }

    fn exists(&self, key: &str) -> StorageResult<bool> {
        let entries = self
            .entries
            .read()
            .map_err(|e| StorageError::Other(format!("Lock error: {}", e)))?;
        Ok(entries.contains_key(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_save_and_load() {
        let storage = MemoryStorage::new();
        storage.save("canvas-1.layers", "[]").unwrap();
        assert_eq!(storage.load("canvas-1.layers").unwrap(), "[]");
    }

    #[test]
    fn test_not_found() {
        let storage = MemoryStorage::new();
        assert!(matches!(storage.load("missing"), Err(StorageError::NotFound(_))));
    }

    #[test]
    fn test_save_replaces_whole_entry() {
        let storage = MemoryStorage::new();
        storage.save("k", r#"[{"id":1},{"id":2}]"#).unwrap();
        storage.save("k", r#"[{"id":3}]"#).unwrap();
        assert_eq!(storage.load("k").unwrap(), r#"[{"id":3}]"#);
    }

    #[test]
    fn test_delete_and_list() {
        let storage = MemoryStorage::new();
        storage.save("a", "1").unwrap();
        storage.save("b", "2").unwrap();
        storage.delete("a").unwrap();
        storage.delete("never-existed").unwrap();

        assert!(!storage.exists("a").unwrap());
        assert_eq!(storage.list().unwrap(), vec!["b".to_string()]);
    }

    #[test]
    fn test_read_only_rejects_writes() {
        let storage = MemoryStorage::new();
        storage.save("a", "1").unwrap();
        storage.set_read_only(true);

        assert!(matches!(storage.save("a", "2"), Err(StorageError::Io(_))));
        assert_eq!(storage.load("a").unwrap(), "1");

        storage.set_read_only(false);
        storage.save("a", "2").unwrap();
        assert_eq!(storage.load("a").unwrap(), "2");
    }
}
