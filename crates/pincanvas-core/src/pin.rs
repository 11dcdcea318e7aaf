//! Pins: positioned annotations bound to a layer.

use crate::error::{CanvasError, CanvasResult};
use crate::model::{
    CanvasId, LayerId, MediaItem, NewMedia, Pin, PinId, PinPatch, PinRecord, Row, RowKey,
};
use crate::remote::RemoteStore;
use crate::session::{Session, StoreEvent};
use crate::state::ModelState;
use crate::sync::Mutation;
use chrono::Utc;
use kurbo::Point;
use std::collections::HashSet;
use uuid::Uuid;

/// Pin operations of a [`Session`].
pub struct PinStore<'a, R: RemoteStore + ?Sized> {
    session: &'a Session<R>,
}

fn check_layer(state: &ModelState, canvas_id: CanvasId, layer_id: LayerId) -> CanvasResult<()> {
    match state.layer(layer_id) {
        Some(layer) if layer.canvas_id == canvas_id => Ok(()),
        _ => Err(CanvasError::InvalidLayerReference {
            canvas: canvas_id,
            layer: layer_id,
        }),
    }
}

impl<'a, R: RemoteStore + ?Sized> PinStore<'a, R> {
    pub(crate) fn new(session: &'a Session<R>) -> Self {
        Self { session }
    }

    /// Place a pin on a layer of the canvas.
    ///
    /// `position` is in canvas space (see [`CoordinateMapper`](crate::CoordinateMapper)).
    pub async fn create(
        &self,
        canvas_id: CanvasId,
        layer_id: LayerId,
        position: Point,
        title: &str,
        description: &str,
        media: Vec<NewMedia>,
    ) -> CanvasResult<Pin> {
        self.session.check_mutate(canvas_id, "add pins")?;
        self.session.check_loaded(canvas_id)?;
        check_layer(&self.session.state(), canvas_id, layer_id)?;

        let now = Utc::now();
        let pin = Pin {
            id: Uuid::new_v4(),
            canvas_id,
            layer_id,
            x: position.x,
            y: position.y,
            title: title.to_string(),
            description: description.to_string(),
            created_by: self.session.user(),
            created_at: now,
            updated_at: now,
        };
        let record = PinRecord {
            media: media.into_iter().map(|m| m.attach(pin.id)).collect(),
            pin,
        };
        self.write(Mutation::insert(Row::Pin(record.clone())), record)
            .await
    }

    /// Apply a partial update. Moving the pin to another layer is allowed
    /// within the same canvas; new media replaces the existing set.
    pub async fn update(&self, pin_id: PinId, patch: PinPatch) -> CanvasResult<Pin> {
        let mut record = self.require(pin_id)?;
        let canvas_id = record.pin.canvas_id;
        self.session.check_mutate(canvas_id, "edit pins")?;
        if let Some(layer_id) = patch.layer_id {
            check_layer(&self.session.state(), canvas_id, layer_id)?;
        }

        let PinPatch {
            title,
            description,
            x,
            y,
            layer_id,
            media,
        } = patch;
        let pin = &mut record.pin;
        if let Some(title) = title {
            pin.title = title;
        }
        if let Some(description) = description {
            pin.description = description;
        }
        if let Some(x) = x {
            pin.x = x;
        }
        if let Some(y) = y {
            pin.y = y;
        }
        if let Some(layer_id) = layer_id {
            pin.layer_id = layer_id;
        }
        pin.updated_at = Utc::now();
        if let Some(media) = media {
            let pin_id = record.pin.id;
            record.media = media.into_iter().map(|m| m.attach(pin_id)).collect();
        }

        self.write(Mutation::update(Row::Pin(record.clone())), record)
            .await
    }

    pub async fn delete(&self, pin_id: PinId) -> CanvasResult<()> {
        let canvas_id = self.require(pin_id)?.pin.canvas_id;
        self.session.check_mutate(canvas_id, "delete pins")?;
        let key = RowKey::Pin(pin_id);
        let Some(mutation) = Mutation::delete(canvas_id, vec![key]) else {
            return Ok(());
        };
        self.session
            .run(mutation, vec![StoreEvent::PinsChanged { canvas_id }], |state| {
                state.remove_row(key)
            })
            .await?;
        Ok(())
    }

    /// Pins of the canvas whose layer is in `visible_layers`, in creation order.
    pub fn list_visible(&self, canvas_id: CanvasId, visible_layers: &HashSet<LayerId>) -> Vec<Pin> {
        self.session
            .state()
            .pins_of(canvas_id)
            .filter(|p| visible_layers.contains(&p.layer_id))
            .cloned()
            .collect()
    }

    /// Pins on currently visible layers.
    pub fn visible(&self, canvas_id: CanvasId) -> Vec<Pin> {
        let visible = self.session.layers().visible_layer_ids(canvas_id);
        self.list_visible(canvas_id, &visible)
    }

    /// All pins of the canvas in creation order.
    pub fn list(&self, canvas_id: CanvasId) -> Vec<Pin> {
        self.session.state().pins_of(canvas_id).cloned().collect()
    }

    /// A pin with its media.
    pub fn get(&self, pin_id: PinId) -> Option<PinRecord> {
        self.session.state().pin_record(pin_id)
    }

    pub fn media(&self, pin_id: PinId) -> Vec<MediaItem> {
        self.session.state().media(pin_id).to_vec()
    }

    fn require(&self, pin_id: PinId) -> CanvasResult<PinRecord> {
        self.get(pin_id)
            .ok_or_else(|| CanvasError::NotFound(RowKey::Pin(pin_id).to_string()))
    }

    async fn write(&self, mutation: Mutation, record: PinRecord) -> CanvasResult<Pin> {
        let canvas_id = record.pin.canvas_id;
        let row = Row::Pin(record.clone());
        let ack = self
            .session
            .run(mutation, vec![StoreEvent::PinsChanged { canvas_id }], |state| {
                state.put_row(row)
            })
            .await?;
        Ok(ack
            .and_then(Row::into_pin)
            .map(|r| r.pin)
            .unwrap_or(record.pin))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Canvas, Layer, MediaKind};
    use crate::testing::{Fixture, block_on};
    use crate::Session;
    use crate::remote::MemoryRemote;

    fn add_pin(session: &Session<MemoryRemote>, canvas: &Canvas, layer: &Layer, title: &str) -> Pin {
        block_on(session.pins().create(canvas.id, layer.id, Point::new(0.5, 0.5), title, "", vec![])).unwrap()
    }

    #[test]
    fn test_create_with_media() {
        let fx = Fixture::new();
        let owner = fx.session(fx.owner);
        let (canvas, layer) = fx.canvas_with_layer(&owner);
        let media = vec![
            NewMedia::new(MediaKind::Image, "https://img/kyoja.jpg").named("front"),
            NewMedia::new(MediaKind::Url, "https://map/kyoja"),
        ];
        let pin = block_on(owner.pins().create(
            canvas.id,
            layer.id,
            Point::new(0.42, 0.61),
            "Myeongdong Kyoja",
            "Kalguksu",
            media,
        ))
        .unwrap();

        assert_eq!(pin.position(), Point::new(0.42, 0.61));
        assert_eq!(pin.created_by, fx.owner);
        let items = owner.pins().media(pin.id);
        assert_eq!(items.len(), 2);
        assert!(items.iter().all(|m| m.pin_id == pin.id));
        assert_eq!(items[0].name.as_deref(), Some("front"));
        assert_eq!(fx.remote.dump(canvas.id).unwrap().pins[0].media, items);
    }

    #[test]
    fn test_layer_of_other_canvas_is_rejected() {
        let fx = Fixture::new();
        let owner = fx.session(fx.owner);
        let (first, _) = fx.canvas_with_layer(&owner);
        let (second, foreign) = fx.canvas_with_layer(&owner);
        block_on(owner.enter_canvas(first.id)).unwrap();
        let calls = fx.remote.call_count();

        let result = block_on(owner.pins().create(first.id, foreign.id, Point::ZERO, "x", "", vec![]));
        assert!(matches!(
            result,
            Err(CanvasError::InvalidLayerReference { canvas, layer }) if canvas == first.id && layer == foreign.id
        ));
        assert_eq!(fx.remote.call_count(), calls);
        assert!(owner.pins().list(first.id).is_empty());
        assert!(fx.remote.dump(second.id).unwrap().pins.is_empty());
    }

    #[test]
    fn test_update_moves_between_layers_and_replaces_media() {
        let fx = Fixture::new();
        let owner = fx.session(fx.owner);
        let (canvas, food) = fx.canvas_with_layer(&owner);
        let sights = block_on(owner.layers().create(canvas.id, "Sights", "#3b82f6")).unwrap();
        let pin = block_on(owner.pins().create(
            canvas.id,
            food.id,
            Point::new(0.1, 0.1),
            "Tower",
            "",
            vec![NewMedia::new(MediaKind::Image, "https://img/old.png")],
        ))
        .unwrap();

        let patch = PinPatch::new()
            .title("N Seoul Tower")
            .position(Point::new(0.7, 0.2))
            .layer(sights.id)
            .media(vec![NewMedia::new(MediaKind::Video, "https://v/night.mp4")]);
        let updated = block_on(owner.pins().update(pin.id, patch)).unwrap();

        assert_eq!(updated.title, "N Seoul Tower");
        assert_eq!(updated.layer_id, sights.id);
        assert_eq!(updated.position(), Point::new(0.7, 0.2));
        assert_eq!(updated.created_at, pin.created_at);
        let media = owner.pins().media(pin.id);
        assert_eq!(media.len(), 1);
        assert_eq!(media[0].kind, MediaKind::Video);

        let bad = block_on(owner.pins().update(pin.id, PinPatch::new().layer(Uuid::new_v4())));
        assert!(matches!(bad, Err(CanvasError::InvalidLayerReference { .. })));
        assert_eq!(owner.pins().get(pin.id).unwrap().pin.layer_id, sights.id);
    }

    #[test]
    fn test_out_of_bounds_position_is_stored_as_is() {
        let fx = Fixture::new();
        let owner = fx.session(fx.owner);
        let (canvas, layer) = fx.canvas_with_layer(&owner);
        let pin = block_on(owner.pins().create(canvas.id, layer.id, Point::new(-0.25, 1.5), "edge", "", vec![])).unwrap();

        let stored = &fx.remote.dump(canvas.id).unwrap().pins[0].pin;
        assert_eq!((stored.x, stored.y), (-0.25, 1.5));
        assert_eq!(pin.position(), stored.position());
    }

    #[test]
    fn test_list_visible_filters_by_layer_set() {
        let fx = Fixture::new();
        let owner = fx.session(fx.owner);
        let (canvas, a) = fx.canvas_with_layer(&owner);
        let b = block_on(owner.layers().create(canvas.id, "B", "#000")).unwrap();
        let p1 = add_pin(&owner, &canvas, &a, "1");
        let p2 = add_pin(&owner, &canvas, &b, "2");
        let p3 = add_pin(&owner, &canvas, &a, "3");

        let pins = owner.pins();
        let ids = |v: Vec<Pin>| v.into_iter().map(|p| p.id).collect::<Vec<_>>();
        assert!(pins.list_visible(canvas.id, &HashSet::new()).is_empty());
        let only_a = HashSet::from([a.id]);
        assert_eq!(ids(pins.list_visible(canvas.id, &only_a)), vec![p1.id, p3.id]);
        assert_eq!(
            pins.list_visible(canvas.id, &only_a),
            pins.list_visible(canvas.id, &only_a)
        );
        let both = HashSet::from([a.id, b.id]);
        assert_eq!(ids(pins.list_visible(canvas.id, &both)), vec![p1.id, p2.id, p3.id]);
        let unknown = HashSet::from([Uuid::new_v4()]);
        assert!(pins.list_visible(canvas.id, &unknown).is_empty());
    }

    #[test]
    fn test_trip_plan_visibility_scenario() {
        let fx = Fixture::new();
        let owner = fx.session(fx.owner);
        let (canvas, a) = fx.canvas_with_layer(&owner);
        let b = block_on(owner.layers().create(canvas.id, "Sights", "#3b82f6")).unwrap();
        block_on(owner.layers().set_visible(b.id, false)).unwrap();
        let pin_a = add_pin(&owner, &canvas, &a, "Myeongdong Kyoja");
        let pin_b = add_pin(&owner, &canvas, &b, "Gyeongbokgung");

        let visible: Vec<_> = owner.pins().visible(canvas.id).into_iter().map(|p| p.id).collect();
        assert_eq!(visible, vec![pin_a.id]);

        block_on(owner.layers().toggle_visible(b.id)).unwrap();
        let visible: Vec<_> = owner.pins().visible(canvas.id).into_iter().map(|p| p.id).collect();
        assert_eq!(visible, vec![pin_a.id, pin_b.id]);
    }

    #[test]
    fn test_failed_delete_restores_pin() {
        let fx = Fixture::new();
        let owner = fx.session(fx.owner);
        let (canvas, layer) = fx.canvas_with_layer(&owner);
        let first = add_pin(&owner, &canvas, &layer, "first");
        let doomed = block_on(owner.pins().create(
            canvas.id,
            layer.id,
            Point::new(0.3, 0.4),
            "second",
            "",
            vec![NewMedia::new(MediaKind::Image, "https://img/2.png")],
        ))
        .unwrap();
        let last = add_pin(&owner, &canvas, &layer, "third");
        let before = owner.pins().get(doomed.id).unwrap();

        fx.remote.set_available(false);
        let result = block_on(owner.pins().delete(doomed.id));
        assert!(matches!(result, Err(CanvasError::RemoteUnavailable(_))));

        assert_eq!(owner.pins().get(doomed.id), Some(before));
        let visible = HashSet::from([layer.id]);
        let order: Vec<_> = owner
            .pins()
            .list_visible(canvas.id, &visible)
            .into_iter()
            .map(|p| p.id)
            .collect();
        assert_eq!(order, vec![first.id, doomed.id, last.id]);
        let cached = owner.cache().load(canvas.id).unwrap().unwrap();
        assert_eq!(cached.pins.len(), 3);
        assert_eq!(cached.pins[1].pin.id, doomed.id);
    }

    #[test]
    fn test_create_on_listed_but_unloaded_canvas_is_refused() {
        let fx = Fixture::new();
        let owner = fx.session(fx.owner);
        let (canvas, layer) = fx.canvas_with_layer(&owner);
        fx.share(&owner, canvas.id, fx.editor, "editor");

        let editor = fx.session(fx.editor);
        block_on(editor.canvases().list()).unwrap();
        let result = block_on(editor.pins().create(canvas.id, layer.id, Point::ZERO, "early", "", vec![]));
        assert!(matches!(result, Err(CanvasError::CanvasNotLoaded(_))));

        block_on(editor.enter_canvas(canvas.id)).unwrap();
        assert_eq!(add_pin(&editor, &canvas, &layer, "after entering").layer_id, layer.id);
    }

    #[test]
    fn test_update_of_concurrently_deleted_pin_drops_it() {
        let fx = Fixture::new();
        let owner = fx.session(fx.owner);
        let (canvas, layer) = fx.canvas_with_layer(&owner);
        let kept = add_pin(&owner, &canvas, &layer, "kept");
        let pin = add_pin(&owner, &canvas, &layer, "doomed");
        fx.share(&owner, canvas.id, fx.editor, "editor");

        let editor = fx.session(fx.editor);
        block_on(editor.enter_canvas(canvas.id)).unwrap();
        block_on(owner.pins().delete(pin.id)).unwrap();
        editor.poll_events();

        let result = block_on(editor.pins().update(pin.id, PinPatch::new().title("too late")));
        assert!(matches!(result, Err(CanvasError::NotFound(_))));
        assert!(editor.pins().get(pin.id).is_none());
        assert_eq!(editor.pins().list(canvas.id), vec![kept.clone()]);
        let cached = editor.cache().load(canvas.id).unwrap().unwrap();
        assert_eq!(cached.pins.len(), 1);
        assert_eq!(cached.pins[0].pin.id, kept.id);
        assert!(editor.poll_events().contains(&StoreEvent::PinsChanged { canvas_id: canvas.id }));
    }

    #[test]
    fn test_viewer_cannot_change_pins() {
        let fx = Fixture::new();
        let owner = fx.session(fx.owner);
        let (canvas, layer) = fx.canvas_with_layer(&owner);
        let pin = add_pin(&owner, &canvas, &layer, "a");
        fx.share(&owner, canvas.id, fx.viewer, "viewer");

        let viewer = fx.session(fx.viewer);
        block_on(viewer.enter_canvas(canvas.id)).unwrap();
        let calls = fx.remote.call_count();
        let denied = |r: CanvasResult<_>| matches!(r, Err(CanvasError::PermissionDenied(_)));

        assert!(denied(block_on(viewer.pins().create(canvas.id, layer.id, Point::ZERO, "b", "", vec![])).map(|_| ())));
        assert!(denied(block_on(viewer.pins().update(pin.id, PinPatch::new().title("c"))).map(|_| ())));
        assert!(denied(block_on(viewer.pins().delete(pin.id))));
        assert_eq!(fx.remote.call_count(), calls);
        assert_eq!(viewer.pins().list(canvas.id), vec![owner.pins().list(canvas.id)[0].clone()]);
        assert_eq!(fx.remote.dump(canvas.id).unwrap().pins.len(), 1);
    }

    #[test]
    fn test_editor_edits_are_seen_by_owner() {
        let fx = Fixture::new();
        let owner = fx.session(fx.owner);
        let (canvas, layer) = fx.canvas_with_layer(&owner);
        fx.share(&owner, canvas.id, fx.editor, "editor");

        let editor = fx.session(fx.editor);
        block_on(editor.enter_canvas(canvas.id)).unwrap();
        let pin = add_pin(&editor, &canvas, &layer, "from editor");

        block_on(owner.enter_canvas(canvas.id)).unwrap();
        let seen = owner.pins().list(canvas.id);
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].id, pin.id);
        assert_eq!(seen[0].created_by, fx.editor);
    }
}
