//! In-process authoritative store.
//!
//! Behaves like the hosted relational store: row-level access control on every
//! call, cascading foreign keys, a unique (canvas, user) constraint on shares
//! and server-assigned timestamps. Availability can be switched off or a
//! number of calls made to fail, to exercise offline and rollback paths.

use super::{BoxFuture, CanvasListing, CanvasRows, RemoteError, RemoteResult, RemoteStore};
use crate::model::{
    Canvas, CanvasId, Layer, LayerId, MediaItem, Pin, PinId, PinRecord, Profile, Row, RowKey,
    Share, ShareId, UserId,
};
use crate::policy::{Permission, SharingPolicy};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Default)]
struct Tables {
    canvases: HashMap<CanvasId, Canvas>,
    layers: HashMap<LayerId, Layer>,
    /// Insertion order is creation order.
    pins: Vec<Pin>,
    media: Vec<MediaItem>,
    shares: HashMap<ShareId, Share>,
    profiles: HashMap<UserId, Profile>,
}

fn require(allowed: bool, what: &str) -> RemoteResult<()> {
    if allowed {
        Ok(())
    } else {
        Err(RemoteError::PermissionDenied(what.to_string()))
    }
}

/// An existing row keeps its canvas; `stored` is its current canvas, if any.
fn require_same_canvas(stored: Option<CanvasId>, incoming: CanvasId, what: &str) -> RemoteResult<()> {
    require(stored.is_none_or(|canvas_id| canvas_id == incoming), what)
}

impl Tables {
    fn permission(&self, canvas_id: CanvasId, actor: UserId) -> RemoteResult<Permission> {
        let canvas = self
            .canvases
            .get(&canvas_id)
            .ok_or_else(|| RemoteError::NotFound(format!("canvas {}", canvas_id)))?;
        Ok(SharingPolicy::effective(canvas, self.shares.values(), actor))
    }

    fn require_mutate(&self, canvas_id: CanvasId, actor: UserId, what: &str) -> RemoteResult<()> {
        require(SharingPolicy::can_mutate(self.permission(canvas_id, actor)?), what)
    }

    fn require_owner(&self, canvas_id: CanvasId, actor: UserId, what: &str) -> RemoteResult<()> {
        require(SharingPolicy::can_manage_sharing(self.permission(canvas_id, actor)?), what)
    }

    fn check_pin_layer(&self, pin: &Pin) -> RemoteResult<()> {
        match self.layers.get(&pin.layer_id) {
            Some(layer) if layer.canvas_id == pin.canvas_id => Ok(()),
            _ => Err(RemoteError::NotFound(format!("layer {}", pin.layer_id))),
        }
    }

    fn pin_index(&self, id: PinId) -> Option<usize> {
        self.pins.iter().position(|p| p.id == id)
    }

    fn pin_record(&self, pin: &Pin) -> PinRecord {
        PinRecord {
            pin: pin.clone(),
            media: self.media.iter().filter(|m| m.pin_id == pin.id).cloned().collect(),
        }
    }

    fn replace_media(&mut self, pin_id: PinId, media: Vec<MediaItem>) {
        self.media.retain(|m| m.pin_id != pin_id);
        self.media.extend(media.into_iter().map(|mut m| {
            m.pin_id = pin_id;
            m
        }));
    }

    fn remove_pins_where(&mut self, pred: impl Fn(&Pin) -> bool) {
        let doomed: Vec<PinId> = self.pins.iter().filter(|p| pred(p)).map(|p| p.id).collect();
        self.pins.retain(|p| !doomed.contains(&p.id));
        self.media.retain(|m| !doomed.contains(&m.pin_id));
    }

    fn insert(&mut self, actor: UserId, row: Row) -> RemoteResult<Row> {
        let now = Utc::now();
        match row {
            Row::Canvas(mut canvas) => {
                require(canvas.owner_id == actor, "create a canvas for another user")?;
                // Re-inserting an existing id only replays the owner's own insert.
                if let Some(stored) = self.canvases.get(&canvas.id) {
                    require(stored.owner_id == actor, "replace another user's canvas")?;
                    canvas.created_at = stored.created_at;
                } else {
                    canvas.created_at = now;
                }
                canvas.updated_at = now;
                self.canvases.insert(canvas.id, canvas.clone());
                Ok(Row::Canvas(canvas))
            }
            Row::Layer(layer) => {
                let stored = self.layers.get(&layer.id).map(|l| l.canvas_id);
                require_same_canvas(stored, layer.canvas_id, "move a layer between canvases")?;
                self.require_mutate(layer.canvas_id, actor, "add layers")?;
                self.layers.insert(layer.id, layer.clone());
                Ok(Row::Layer(layer))
            }
            Row::Pin(PinRecord { mut pin, media }) => {
                let stored = self.pin_index(pin.id).map(|i| self.pins[i].canvas_id);
                require_same_canvas(stored, pin.canvas_id, "move a pin between canvases")?;
                self.require_mutate(pin.canvas_id, actor, "add pins")?;
                self.check_pin_layer(&pin)?;
                pin.updated_at = now;
                match self.pin_index(pin.id) {
                    Some(index) => {
                        pin.created_at = self.pins[index].created_at;
                        self.pins[index] = pin.clone();
                    }
                    None => {
                        pin.created_at = now;
                        self.pins.push(pin.clone());
                    }
                }
                self.replace_media(pin.id, media);
                Ok(Row::Pin(self.pin_record(&pin)))
            }
            Row::Share(mut share) => {
                let stored = self.shares.get(&share.id).map(|s| s.canvas_id);
                require_same_canvas(stored, share.canvas_id, "move a share between canvases")?;
                self.require_owner(share.canvas_id, actor, "share this canvas")?;
                let owner = self.canvases.get(&share.canvas_id).map(|c| c.owner_id);
                require(owner != Some(share.user_id), "share a canvas with its owner")?;
                let duplicate = self.shares.values().any(|s| {
                    s.id != share.id && s.canvas_id == share.canvas_id && s.user_id == share.user_id
                });
                if duplicate {
                    return Err(RemoteError::DuplicateShare {
                        canvas: share.canvas_id,
                        user: share.user_id,
                    });
                }
                share.shared_by = actor;
                share.created_at = now;
                self.shares.insert(share.id, share.clone());
                Ok(Row::Share(share))
            }
        }
    }

    fn update(&mut self, actor: UserId, row: Row) -> RemoteResult<Row> {
        let now = Utc::now();
        let missing = |key: RowKey| RemoteError::NotFound(key.to_string());
        match row {
            Row::Canvas(canvas) => {
                let canvas_id = canvas.id;
                if !self.canvases.contains_key(&canvas_id) {
                    return Err(missing(RowKey::Canvas(canvas_id)));
                }
                self.require_mutate(canvas_id, actor, "edit this canvas")?;
                let stored = self
                    .canvases
                    .get_mut(&canvas_id)
                    .ok_or_else(|| missing(RowKey::Canvas(canvas_id)))?;
                stored.title = canvas.title;
                stored.background_image = canvas.background_image;
                stored.updated_at = now;
                Ok(Row::Canvas(stored.clone()))
            }
            Row::Layer(layer) => {
                let canvas_id = self
                    .layers
                    .get(&layer.id)
                    .map(|l| l.canvas_id)
                    .ok_or_else(|| missing(RowKey::Layer(layer.id)))?;
                self.require_mutate(canvas_id, actor, "edit layers")?;
                let stored = self
                    .layers
                    .get_mut(&layer.id)
                    .ok_or_else(|| missing(RowKey::Layer(layer.id)))?;
                stored.name = layer.name;
                stored.color = layer.color;
                stored.visible = layer.visible;
                stored.order = layer.order;
                Ok(Row::Layer(stored.clone()))
            }
            Row::Pin(PinRecord { pin, media }) => {
                let index = self.pin_index(pin.id).ok_or_else(|| missing(RowKey::Pin(pin.id)))?;
                let canvas_id = self.pins[index].canvas_id;
                self.require_mutate(canvas_id, actor, "edit pins")?;
                let updated = Pin {
                    canvas_id,
                    created_by: self.pins[index].created_by,
                    created_at: self.pins[index].created_at,
                    updated_at: now,
                    ..pin
                };
                self.check_pin_layer(&updated)?;
                self.pins[index] = updated.clone();
                self.replace_media(updated.id, media);
                Ok(Row::Pin(self.pin_record(&updated)))
            }
            Row::Share(share) => {
                let canvas_id = self
                    .shares
                    .get(&share.id)
                    .map(|s| s.canvas_id)
                    .ok_or_else(|| missing(RowKey::Share(share.id)))?;
                self.require_owner(canvas_id, actor, "change sharing")?;
                let stored = self
                    .shares
                    .get_mut(&share.id)
                    .ok_or_else(|| missing(RowKey::Share(share.id)))?;
                stored.permission = share.permission;
                Ok(Row::Share(stored.clone()))
            }
        }
    }

    fn delete(&mut self, actor: UserId, key: RowKey) -> RemoteResult<()> {
        let missing = || RemoteError::NotFound(key.to_string());
        match key {
            RowKey::Canvas(id) => {
                let permission = self.permission(id, actor)?;
                require(SharingPolicy::can_delete_canvas(permission), "delete this canvas")?;
                self.canvases.remove(&id);
                self.layers.retain(|_, l| l.canvas_id != id);
                self.remove_pins_where(|p| p.canvas_id == id);
                self.shares.retain(|_, s| s.canvas_id != id);
            }
            RowKey::Layer(id) => {
                let canvas_id = self.layers.get(&id).map(|l| l.canvas_id).ok_or_else(missing)?;
                self.require_mutate(canvas_id, actor, "delete layers")?;
                self.layers.remove(&id);
                self.remove_pins_where(|p| p.layer_id == id);
            }
            RowKey::Pin(id) => {
                let index = self.pin_index(id).ok_or_else(missing)?;
                self.require_mutate(self.pins[index].canvas_id, actor, "delete pins")?;
                self.remove_pins_where(|p| p.id == id);
            }
            RowKey::Share(id) => {
                let canvas_id = self.shares.get(&id).map(|s| s.canvas_id).ok_or_else(missing)?;
                self.require_owner(canvas_id, actor, "change sharing")?;
                self.shares.remove(&id);
            }
        }
        Ok(())
    }

    fn canvas_rows(&self, canvas_id: CanvasId, viewer: Option<UserId>) -> Option<CanvasRows> {
        let canvas = self.canvases.get(&canvas_id)?.clone();
        let mut layers: Vec<Layer> = self
            .layers
            .values()
            .filter(|l| l.canvas_id == canvas_id)
            .cloned()
            .collect();
        layers.sort_by_key(|l| (l.order, l.id));
        let pins = self
            .pins
            .iter()
            .filter(|p| p.canvas_id == canvas_id)
            .map(|p| self.pin_record(p))
            .collect();
        let shares = self
            .shares
            .values()
            .filter(|s| s.canvas_id == canvas_id)
            .filter(|s| match viewer {
                Some(user) => canvas.owner_id == user || s.user_id == user,
                None => true,
            })
            .cloned()
            .collect();
        Some(CanvasRows {
            canvas,
            layers,
            pins,
            shares,
        })
    }
}

/// In-memory implementation of [`RemoteStore`].
#[derive(Default)]
pub struct MemoryRemote {
    tables: RwLock<Tables>,
    offline: AtomicBool,
    failures: AtomicUsize,
    calls: AtomicUsize,
}

impl MemoryRemote {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Switch the store on or off; while off every call fails as unavailable.
    pub fn set_available(&self, available: bool) {
        self.offline.store(!available, Ordering::SeqCst);
    }

    /// Make the next `count` calls fail as unavailable.
    pub fn fail_next(&self, count: usize) {
        self.failures.store(count, Ordering::SeqCst);
    }

    /// Number of calls received so far, including failed ones.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Register a user profile.
    pub fn add_profile(&self, profile: Profile) {
        if let Ok(mut tables) = self.tables.write() {
            tables.profiles.insert(profile.user_id, profile);
        }
    }

    /// Every stored row of a canvas, bypassing access control.
    pub fn dump(&self, canvas_id: CanvasId) -> Option<CanvasRows> {
        self.tables.read().ok()?.canvas_rows(canvas_id, None)
    }

    /// Whether a row exists, bypassing access control.
    pub fn contains(&self, key: RowKey) -> bool {
        let Ok(tables) = self.tables.read() else {
            return false;
        };
        match key {
            RowKey::Canvas(id) => tables.canvases.contains_key(&id),
            RowKey::Layer(id) => tables.layers.contains_key(&id),
            RowKey::Pin(id) => tables.pin_index(id).is_some(),
            RowKey::Share(id) => tables.shares.contains_key(&id),
        }
    }

    /// Total number of canvas, layer, pin, media and share rows.
    pub fn row_count(&self) -> usize {
        self.tables
            .read()
            .map(|t| t.canvases.len() + t.layers.len() + t.pins.len() + t.media.len() + t.shares.len())
            .unwrap_or(0)
    }

    fn insert_now(&self, actor: UserId, row: Row) -> RemoteResult<Row> {
        self.gate()?;
        self.write()?.insert(actor, row)
    }

    fn update_now(&self, actor: UserId, row: Row) -> RemoteResult<Row> {
        self.gate()?;
        self.write()?.update(actor, row)
    }

    fn delete_now(&self, actor: UserId, key: RowKey) -> RemoteResult<()> {
        self.gate()?;
        self.write()?.delete(actor, key)
    }

    fn fetch_canvas_now(&self, actor: UserId, canvas_id: CanvasId) -> RemoteResult<CanvasRows> {
        self.gate()?;
        let tables = self.read()?;
        require(
            tables.permission(canvas_id, actor)? != Permission::None,
            "read this canvas",
        )?;
        tables
            .canvas_rows(canvas_id, Some(actor))
            .ok_or_else(|| RemoteError::NotFound(format!("canvas {}", canvas_id)))
    }

    fn list_canvases_now(&self, actor: UserId) -> RemoteResult<Vec<CanvasListing>> {
        self.gate()?;
        let tables = self.read()?;
        let listings = tables
            .canvases
            .values()
            .filter_map(|canvas| {
                let share = tables
                    .shares
                    .values()
                    .find(|s| s.canvas_id == canvas.id && s.user_id == actor)
                    .cloned();
                if canvas.owner_id != actor && share.is_none() {
                    return None;
                }
                Some(CanvasListing {
                    canvas: canvas.clone(),
                    share,
                    pin_count: tables.pins.iter().filter(|p| p.canvas_id == canvas.id).count(),
                    layer_count: tables.layers.values().filter(|l| l.canvas_id == canvas.id).count(),
                })
            })
            .collect();
        Ok(listings)
    }

    /// `email` is already trimmed and lowercased.
    fn find_profile_now(&self, email: &str) -> RemoteResult<Option<Profile>> {
        self.gate()?;
        let tables = self.read()?;
        Ok(tables
            .profiles
            .values()
            .find(|p| p.email.as_deref().map(str::to_lowercase).as_deref() == Some(email))
            .cloned())
    }

    fn profiles_now(&self, user_ids: &[UserId]) -> RemoteResult<Vec<Profile>> {
        self.gate()?;
        let tables = self.read()?;
        Ok(user_ids
            .iter()
            .filter_map(|id| tables.profiles.get(id).cloned())
            .collect())
    }

    fn gate(&self) -> RemoteResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.offline.load(Ordering::SeqCst) {
            return Err(RemoteError::Unavailable("store is offline".to_string()));
        }
        let injected = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(RemoteError::Unavailable("simulated network failure".to_string()));
        }
        Ok(())
    }

    fn read(&self) -> RemoteResult<RwLockReadGuard<'_, Tables>> {
        self.tables
            .read()
            .map_err(|e| RemoteError::Unavailable(format!("Lock error: {}", e)))
    }

    fn write(&self) -> RemoteResult<RwLockWriteGuard<'_, Tables>> {
        self.tables
            .write()
            .map_err(|e| RemoteError::Unavailable(format!("Lock error: {}", e)))
    }
}

impl RemoteStore for MemoryRemote {
    fn insert(&self, actor: UserId, row: Row) -> BoxFuture<'_, RemoteResult<Row>> {
        Box::pin(async move { self.insert_now(actor, row) })
    }

    fn update(&self, actor: UserId, row: Row) -> BoxFuture<'_, RemoteResult<Row>> {
        Box::pin(async move { self.update_now(actor, row) })
    }

    fn delete(&self, actor: UserId, key: RowKey) -> BoxFuture<'_, RemoteResult<()>> {
        Box::pin(async move { self.delete_now(actor, key) })
    }

    fn fetch_canvas(&self, actor: UserId, canvas_id: CanvasId) -> BoxFuture<'_, RemoteResult<CanvasRows>> {
        Box::pin(async move { self.fetch_canvas_now(actor, canvas_id) })
    }

    fn list_canvases(&self, actor: UserId) -> BoxFuture<'_, RemoteResult<Vec<CanvasListing>>> {
        Box::pin(async move { self.list_canvases_now(actor) })
    }

    fn find_profile_by_email(&self, email: &str) -> BoxFuture<'_, RemoteResult<Option<Profile>>> {
        let email = email.trim().to_lowercase();
        Box::pin(async move { self.find_profile_now(&email) })
    }

    fn profiles(&self, user_ids: &[UserId]) -> BoxFuture<'_, RemoteResult<Vec<Profile>>> {
        let user_ids = user_ids.to_vec();
        Box::pin(async move { self.profiles_now(&user_ids) })
    }
}
