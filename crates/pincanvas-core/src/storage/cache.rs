//! Typed per-canvas cache on top of a [`CacheStorage`] backend.

use super::{CacheStorage, StorageError, StorageResult};
use crate::model::{CanvasId, Layer, PinRecord};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;

/// Layer and pin collections of one canvas as last persisted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CachedCanvas {
    pub layers: Vec<Layer>,
    pub pins: Vec<PinRecord>,
}

/// Client-side cache keyed by canvas id.
///
/// Each canvas owns two independent entries, its layer collection and its pin
/// collection (pins carry their media). Writers always replace a whole
/// collection.
#[derive(Clone)]
pub struct LocalCache {
    backend: Arc<dyn CacheStorage>,
}

impl LocalCache {
    pub fn new(backend: Arc<dyn CacheStorage>) -> Self {
        Self { backend }
    }

    fn layers_key(canvas_id: CanvasId) -> String {
        format!("{}.layers", canvas_id)
    }

    fn pins_key(canvas_id: CanvasId) -> String {
        format!("{}.pins", canvas_id)
    }

    /// Load both collections of a canvas.
    ///
    /// Returns `None` when neither entry exists; a missing half reads as empty.
    pub fn load(&self, canvas_id: CanvasId) -> StorageResult<Option<CachedCanvas>> {
        let layers: Option<Vec<Layer>> = self.read(&Self::layers_key(canvas_id))?;
        let pins: Option<Vec<PinRecord>> = self.read(&Self::pins_key(canvas_id))?;
        if layers.is_none() && pins.is_none() {
            return Ok(None);
        }
        Ok(Some(CachedCanvas {
            layers: layers.unwrap_or_default(),
            pins: pins.unwrap_or_default(),
        }))
    }

    /// Replace the layer collection of a canvas.
    pub fn store_layers(&self, canvas_id: CanvasId, layers: &[Layer]) -> StorageResult<()> {
        self.write(&Self::layers_key(canvas_id), layers)
    }

    /// Replace the pin collection of a canvas.
    pub fn store_pins(&self, canvas_id: CanvasId, pins: &[PinRecord]) -> StorageResult<()> {
        self.write(&Self::pins_key(canvas_id), pins)
    }

    /// Replace both collections of a canvas.
    pub fn store(&self, canvas_id: CanvasId, layers: &[Layer], pins: &[PinRecord]) -> StorageResult<()> {
        self.store_layers(canvas_id, layers)?;
        self.store_pins(canvas_id, pins)
    }

    /// Drop everything cached for a canvas.
    pub fn evict(&self, canvas_id: CanvasId) -> StorageResult<()> {
        self.backend.delete(&Self::layers_key(canvas_id))?;
        self.backend.delete(&Self::pins_key(canvas_id))
    }

    /// Canvases with at least one cached entry, in id order.
    pub fn cached_canvases(&self) -> StorageResult<Vec<CanvasId>> {
        let mut ids: Vec<CanvasId> = self
            .backend
            .list()?
            .iter()
            .filter_map(|key| {
                let (id, collection) = key.rsplit_once('.')?;
                matches!(collection, "layers" | "pins").then_some(())?;
                id.parse().ok()
            })
            .collect();
        ids.sort();
        ids.dedup();
        Ok(ids)
    }

    fn read<T: DeserializeOwned>(&self, key: &str) -> StorageResult<Option<T>> {
        match self.backend.load(key) {
            Ok(json) => serde_json::from_str(&json)
                .map(Some)
                .map_err(|e| StorageError::Serialization(format!("Failed to parse {}: {}", key, e))),
            Err(StorageError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn write<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> StorageResult<()> {
        let json = serde_json::to_string(value)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        self.backend.save(key, &json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{MediaKind, NewMedia, Pin};
    use crate::storage::MemoryStorage;
    use chrono::Utc;
    use uuid::Uuid;

    fn layer(canvas_id: CanvasId, name: &str, order: u32) -> Layer {
        Layer {
            id: Uuid::new_v4(),
            canvas_id,
            name: name.to_string(),
            color: "#3b82f6".parse().unwrap(),
            visible: true,
            order,
        }
    }

    fn pin(layer: &Layer) -> PinRecord {
        let now = Utc::now();
        let pin = Pin {
            id: Uuid::new_v4(),
            canvas_id: layer.canvas_id,
            layer_id: layer.id,
            x: 0.4,
            y: 0.6,
            title: "Myeongdong Kyoja".to_string(),
            description: "Dumplings".to_string(),
            created_by: Uuid::new_v4(),
            created_at: now,
            updated_at: now,
        };
        PinRecord {
            media: vec![NewMedia::new(MediaKind::Image, "https://img/1.png").attach(pin.id)],
            pin,
        }
    }

    #[test]
    fn test_missing_canvas_loads_none() {
        let cache = LocalCache::new(Arc::new(MemoryStorage::new()));
        assert_eq!(cache.load(Uuid::new_v4()).unwrap(), None);
    }

    #[test]
    fn test_store_and_load_roundtrip() {
        let cache = LocalCache::new(Arc::new(MemoryStorage::new()));
        let canvas_id = Uuid::new_v4();
        let layers = vec![layer(canvas_id, "Food", 0), layer(canvas_id, "Sights", 1)];
        let pins = vec![pin(&layers[0])];

        cache.store(canvas_id, &layers, &pins).unwrap();
        let loaded = cache.load(canvas_id).unwrap().expect("cached canvas");
        assert_eq!(loaded.layers, layers);
        assert_eq!(loaded.pins, pins);
    }

    #[test]
    fn test_entries_are_independent_per_canvas() {
        let cache = LocalCache::new(Arc::new(MemoryStorage::new()));
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        cache.store_layers(a, &[layer(a, "A", 0)]).unwrap();

        let loaded = cache.load(a).unwrap().unwrap();
        assert_eq!(loaded.layers.len(), 1);
        assert!(loaded.pins.is_empty());
        assert_eq!(cache.load(b).unwrap(), None);

        cache.evict(a).unwrap();
        assert_eq!(cache.load(a).unwrap(), None);
    }

    #[test]
    fn test_cached_canvases_ignores_foreign_keys() {
        let storage = Arc::new(MemoryStorage::new());
        let cache = LocalCache::new(storage.clone());
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        cache.store(a, &[layer(a, "A", 0)], &[]).unwrap();
        cache.store_pins(b, &[]).unwrap();
        storage.save("settings", "{}").unwrap();
        storage.save("not-a-uuid.layers", "[]").unwrap();

        let mut expected = vec![a, b];
        expected.sort();
        assert_eq!(cache.cached_canvases().unwrap(), expected);

        cache.evict(a).unwrap();
        assert_eq!(cache.cached_canvases().unwrap(), vec![b]);
    }

    #[test]
    fn test_corrupt_entry_is_serialization_error() {
        let storage = Arc::new(MemoryStorage::new());
        let canvas_id = Uuid::new_v4();
        storage.save(&format!("{}.layers", canvas_id), "{not json").unwrap();

        let cache = LocalCache::new(storage);
        assert!(matches!(cache.load(canvas_id), Err(StorageError::Serialization(_))));
    }
}
