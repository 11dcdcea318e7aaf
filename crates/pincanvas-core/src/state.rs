//! In-memory tables shared by all stores of a session.

use crate::model::{
    Canvas, CanvasId, Layer, LayerId, MediaItem, Pin, PinId, PinRecord, Row, RowKey, Share,
    ShareId, UserId,
};
use crate::policy::{Permission, SharingPolicy};
use crate::remote::CanvasRows;
use std::collections::{HashMap, HashSet};

/// Transient state: every row the session currently knows about.
#[derive(Debug, Clone, Default)]
pub struct ModelState {
    canvases: HashMap<CanvasId, Canvas>,
    layers: HashMap<LayerId, Layer>,
    pins: HashMap<PinId, Pin>,
    /// Pin ids in creation order.
    pin_order: Vec<PinId>,
    media: HashMap<PinId, Vec<MediaItem>>,
    shares: HashMap<ShareId, Share>,
    /// Canvases whose layers and pins are loaded.
    hydrated: HashSet<CanvasId>,
}

impl ModelState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn canvas(&self, id: CanvasId) -> Option<&Canvas> {
        self.canvases.get(&id)
    }

    pub fn canvases(&self) -> impl Iterator<Item = &Canvas> {
        self.canvases.values()
    }

    pub fn layer(&self, id: LayerId) -> Option<&Layer> {
        self.layers.get(&id)
    }

    pub fn pin(&self, id: PinId) -> Option<&Pin> {
        self.pins.get(&id)
    }

    pub fn share(&self, id: ShareId) -> Option<&Share> {
        self.shares.get(&id)
    }

    /// Whether the layers and pins of a canvas are loaded, so that its cache
    /// entries may be rewritten from this state.
    pub fn is_hydrated(&self, canvas_id: CanvasId) -> bool {
        self.hydrated.contains(&canvas_id)
    }

    pub fn mark_hydrated(&mut self, canvas_id: CanvasId) {
        self.hydrated.insert(canvas_id);
    }

    /// Media attached to a pin, in attachment order.
    pub fn media(&self, pin_id: PinId) -> &[MediaItem] {
        self.media.get(&pin_id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn pin_record(&self, id: PinId) -> Option<PinRecord> {
        self.pins.get(&id).map(|pin| PinRecord {
            pin: pin.clone(),
            media: self.media(id).to_vec(),
        })
    }

    /// Layers of a canvas sorted by `order`.
    pub fn layers_of(&self, canvas_id: CanvasId) -> Vec<&Layer> {
        let mut layers: Vec<&Layer> = self
            .layers
            .values()
            .filter(|l| l.canvas_id == canvas_id)
            .collect();
        layers.sort_by_key(|l| (l.order, l.id));
        layers
    }

    /// Pins of a canvas in creation order.
    pub fn pins_of(&self, canvas_id: CanvasId) -> impl Iterator<Item = &Pin> {
        self.pin_order
            .iter()
            .filter_map(|id| self.pins.get(id))
            .filter(move |p| p.canvas_id == canvas_id)
    }

    pub fn pin_records_of(&self, canvas_id: CanvasId) -> Vec<PinRecord> {
        self.pins_of(canvas_id)
            .map(|pin| PinRecord {
                pin: pin.clone(),
                media: self.media(pin.id).to_vec(),
            })
            .collect()
    }

    pub fn shares_of(&self, canvas_id: CanvasId) -> impl Iterator<Item = &Share> {
        self.shares.values().filter(move |s| s.canvas_id == canvas_id)
    }

    /// Effective permission of `user` on a known canvas.
    pub fn permission(&self, canvas_id: CanvasId, user: UserId) -> Option<Permission> {
        let canvas = self.canvases.get(&canvas_id)?;
        Some(SharingPolicy::effective(canvas, self.shares_of(canvas_id), user))
    }

    /// Current image of a row.
    pub fn row(&self, key: RowKey) -> Option<Row> {
        match key {
            RowKey::Canvas(id) => self.canvases.get(&id).cloned().map(Row::Canvas),
            RowKey::Layer(id) => self.layers.get(&id).cloned().map(Row::Layer),
            RowKey::Pin(id) => self.pin_record(id).map(Row::Pin),
            RowKey::Share(id) => self.shares.get(&id).cloned().map(Row::Share),
        }
    }

    /// Insert or replace a row.
    ///
    /// A replaced pin keeps its place; a new pin is placed by `created_at`
    /// after any pins with the same timestamp.
    pub fn put_row(&mut self, row: Row) {
        match row {
            Row::Canvas(canvas) => {
                self.canvases.insert(canvas.id, canvas);
            }
            Row::Layer(layer) => {
                self.layers.insert(layer.id, layer);
            }
            Row::Pin(PinRecord { pin, media }) => {
                let id = pin.id;
                if !self.pins.contains_key(&id) {
                    let index = self
                        .pin_order
                        .iter()
                        .position(|other| {
                            self.pins
                                .get(other)
                                .is_some_and(|p| p.created_at > pin.created_at)
                        })
                        .unwrap_or(self.pin_order.len());
                    self.pin_order.insert(index, id);
                }
                self.pins.insert(id, pin);
                self.media.insert(id, media);
            }
            Row::Share(share) => {
                self.shares.insert(share.id, share);
            }
        }
    }

    /// Remove a single row. Children are not touched; see
    /// [`cascade_keys`](Self::cascade_keys).
    pub fn remove_row(&mut self, key: RowKey) {
        match key {
            RowKey::Canvas(id) => {
                self.canvases.remove(&id);
            }
            RowKey::Layer(id) => {
                self.layers.remove(&id);
            }
            RowKey::Pin(id) => {
                self.pins.remove(&id);
                self.media.remove(&id);
                self.pin_order.retain(|p| *p != id);
            }
            RowKey::Share(id) => {
                self.shares.remove(&id);
            }
        }
    }

    /// `key` followed by every row that is deleted along with it, parents
    /// before children.
    pub fn cascade_keys(&self, key: RowKey) -> Vec<RowKey> {
        let mut keys = vec![key];
        match key {
            RowKey::Canvas(id) => {
                keys.extend(self.layers_of(id).into_iter().map(|l| RowKey::Layer(l.id)));
                keys.extend(self.pins_of(id).map(|p| RowKey::Pin(p.id)));
                keys.extend(self.shares_of(id).map(|s| RowKey::Share(s.id)));
            }
            RowKey::Layer(id) => {
                keys.extend(
                    self.pin_order
                        .iter()
                        .filter(|pin_id| self.pins.get(pin_id).is_some_and(|p| p.layer_id == id))
                        .map(|pin_id| RowKey::Pin(*pin_id)),
                );
            }
            RowKey::Pin(_) | RowKey::Share(_) => {}
        }
        keys
    }

    /// Remove a canvas with everything under it, loaded or not.
    pub fn remove_canvas(&mut self, canvas_id: CanvasId) {
        for key in self.cascade_keys(RowKey::Canvas(canvas_id)) {
            self.remove_row(key);
        }
        self.drop_children(canvas_id);
    }

    /// Replace a canvas and all of its children with what the remote returned.
    pub fn load_canvas_rows(&mut self, rows: CanvasRows) {
        let canvas_id = rows.canvas.id;
        self.drop_children(canvas_id);
        self.shares.retain(|_, s| s.canvas_id != canvas_id);
        self.canvases.insert(canvas_id, rows.canvas);
        self.replace_children(canvas_id, rows.layers, rows.pins);
        for share in rows.shares {
            self.shares.insert(share.id, share);
        }
    }

    /// Replace the layers and pins of a canvas, keeping `pins` in the given
    /// order.
    pub fn replace_children(&mut self, canvas_id: CanvasId, layers: Vec<Layer>, pins: Vec<PinRecord>) {
        self.drop_children(canvas_id);
        for layer in layers {
            self.layers.insert(layer.id, layer);
        }
        for PinRecord { pin, media } in pins {
            self.pin_order.push(pin.id);
            self.media.insert(pin.id, media);
            self.pins.insert(pin.id, pin);
        }
        self.hydrated.insert(canvas_id);
    }

    /// Forget the layers, pins and media of a canvas; the canvas row and its
    /// shares stay.
    pub fn drop_children(&mut self, canvas_id: CanvasId) {
        self.hydrated.remove(&canvas_id);
        self.layers.retain(|_, l| l.canvas_id != canvas_id);
        let pins = &mut self.pins;
        let media = &mut self.media;
        self.pin_order.retain(|id| {
            let keep = pins.get(id).is_some_and(|p| p.canvas_id != canvas_id);
            if !keep {
                pins.remove(id);
                media.remove(id);
            }
            keep
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use uuid::Uuid;

    fn layer(canvas_id: CanvasId, order: u32) -> Layer {
        Layer {
            id: Uuid::new_v4(),
            canvas_id,
            name: format!("Layer {order}"),
            color: "#000".parse().unwrap(),
            visible: true,
            order,
        }
    }

    fn pin(layer: &Layer, minutes: i64) -> PinRecord {
        let at = Utc::now() + Duration::minutes(minutes);
        PinRecord {
            pin: Pin {
                id: Uuid::new_v4(),
                canvas_id: layer.canvas_id,
                layer_id: layer.id,
                x: 0.0,
                y: 0.0,
                title: format!("pin@{minutes}"),
                description: String::new(),
                created_by: Uuid::new_v4(),
                created_at: at,
                updated_at: at,
            },
            media: vec![],
        }
    }

    #[test]
    fn test_layers_sorted_by_order() {
        let canvas = Canvas::new("c", None, Uuid::new_v4());
        let mut state = ModelState::new();
        let l2 = layer(canvas.id, 2);
        let l0 = layer(canvas.id, 0);
        state.put_row(Row::Layer(l2.clone()));
        state.put_row(Row::Layer(l0.clone()));

        let ids: Vec<_> = state.layers_of(canvas.id).iter().map(|l| l.id).collect();
        assert_eq!(ids, vec![l0.id, l2.id]);
    }

    #[test]
    fn test_restored_pin_returns_to_creation_slot() {
        let canvas = Canvas::new("c", None, Uuid::new_v4());
        let l = layer(canvas.id, 0);
        let mut state = ModelState::new();
        let (a, b, c) = (pin(&l, 0), pin(&l, 1), pin(&l, 2));
        for p in [&a, &b, &c] {
            state.put_row(Row::Pin(p.clone()));
        }

        state.remove_row(RowKey::Pin(b.pin.id));
        state.put_row(Row::Pin(b.clone()));

        let titles: Vec<_> = state.pins_of(canvas.id).map(|p| p.title.clone()).collect();
        assert_eq!(titles, vec!["pin@0", "pin@1", "pin@2"]);
    }

    #[test]
    fn test_cascade_keys() {
        let owner = Uuid::new_v4();
        let canvas = Canvas::new("c", None, owner);
        let (la, lb) = (layer(canvas.id, 0), layer(canvas.id, 1));
        let (pa, pb) = (pin(&la, 0), pin(&lb, 1));
        let mut state = ModelState::new();
        state.put_row(Row::Canvas(canvas.clone()));
        for row in [
            Row::Layer(la.clone()),
            Row::Layer(lb.clone()),
            Row::Pin(pa.clone()),
            Row::Pin(pb.clone()),
        ] {
            state.put_row(row);
        }

        assert_eq!(
            state.cascade_keys(RowKey::Layer(la.id)),
            vec![RowKey::Layer(la.id), RowKey::Pin(pa.pin.id)]
        );

        let all = state.cascade_keys(RowKey::Canvas(canvas.id));
        assert_eq!(all[0], RowKey::Canvas(canvas.id));
        assert_eq!(all.len(), 5);
    }

    #[test]
    fn test_drop_children_keeps_other_canvases() {
        let owner = Uuid::new_v4();
        let (c1, c2) = (Canvas::new("a", None, owner), Canvas::new("b", None, owner));
        let (l1, l2) = (layer(c1.id, 0), layer(c2.id, 0));
        let mut state = ModelState::new();
        state.replace_children(c1.id, vec![l1.clone()], vec![pin(&l1, 0)]);
        state.replace_children(c2.id, vec![l2.clone()], vec![pin(&l2, 0)]);

        state.drop_children(c1.id);
        assert!(state.layers_of(c1.id).is_empty());
        assert_eq!(state.pins_of(c1.id).count(), 0);
        assert_eq!(state.pins_of(c2.id).count(), 1);
        assert_eq!(state.layers_of(c2.id).len(), 1);
        assert!(!state.is_hydrated(c1.id));
        assert!(state.is_hydrated(c2.id));
    }
}
