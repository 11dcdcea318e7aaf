//! Layers: named, colored, toggleable groups of pins.

use crate::error::{CanvasError, CanvasResult};
use crate::model::{CanvasId, Layer, LayerColor, LayerId, Row, RowKey};
use crate::remote::RemoteStore;
use crate::session::{Session, StoreEvent};
use crate::sync::Mutation;
use std::collections::HashSet;
use uuid::Uuid;

/// Layer operations of a [`Session`].
pub struct LayerStore<'a, R: RemoteStore + ?Sized> {
    session: &'a Session<R>,
}

impl<'a, R: RemoteStore + ?Sized> LayerStore<'a, R> {
    pub(crate) fn new(session: &'a Session<R>) -> Self {
        Self { session }
    }

    /// Add a visible layer after the existing ones.
    ///
    /// `color` is a CSS hex string (`#rgb`, `#rrggbb` or `#rrggbbaa`).
    pub async fn create(&self, canvas_id: CanvasId, name: &str, color: &str) -> CanvasResult<Layer> {
        self.session.check_mutate(canvas_id, "add layers")?;
        self.session.check_loaded(canvas_id)?;
        let color: LayerColor = color.parse()?;
        let order = self
            .session
            .state()
            .layers_of(canvas_id)
            .iter()
            .map(|l| l.order + 1)
            .max()
            .unwrap_or(0);
        let layer = Layer {
            id: Uuid::new_v4(),
            canvas_id,
            name: name.to_string(),
            color,
            visible: true,
            order,
        };
        let row = Row::Layer(layer.clone());
        let ack = self
            .session
            .run(
                Mutation::insert(row.clone()),
                vec![StoreEvent::LayersChanged { canvas_id }],
                |state| state.put_row(row),
            )
            .await?;
        Ok(ack.and_then(Row::into_layer).unwrap_or(layer))
    }

    /// Show or hide a layer. Pins are untouched.
    pub async fn set_visible(&self, layer_id: LayerId, visible: bool) -> CanvasResult<Layer> {
        self.update(layer_id, "change layer visibility", |l| l.visible = visible)
            .await
    }

    pub async fn toggle_visible(&self, layer_id: LayerId) -> CanvasResult<Layer> {
        self.update(layer_id, "change layer visibility", |l| l.visible = !l.visible)
            .await
    }

    pub async fn rename(&self, layer_id: LayerId, name: &str) -> CanvasResult<Layer> {
        let name = name.to_string();
        self.update(layer_id, "rename layers", |l| l.name = name).await
    }

    pub async fn set_color(&self, layer_id: LayerId, color: &str) -> CanvasResult<Layer> {
        let color: LayerColor = color.parse()?;
        self.update(layer_id, "recolor layers", |l| l.color = color).await
    }

    /// Delete a layer together with its pins.
    ///
    /// The only layer of a canvas that still has pins cannot be deleted.
    pub async fn delete(&self, layer_id: LayerId) -> CanvasResult<()> {
        let layer = self.get(layer_id)?;
        let canvas_id = layer.canvas_id;
        self.session.check_mutate(canvas_id, "delete layers")?;

        let keys = {
            let state = self.session.state();
            let only_layer = state.layers_of(canvas_id).len() == 1;
            if only_layer && state.pins_of(canvas_id).next().is_some() {
                return Err(CanvasError::LastLayerViolation(canvas_id));
            }
            state.cascade_keys(RowKey::Layer(layer_id))
        };
        let Some(mutation) = Mutation::delete(canvas_id, keys.clone()) else {
            return Ok(());
        };
        let changed = vec![
            StoreEvent::LayersChanged { canvas_id },
            StoreEvent::PinsChanged { canvas_id },
        ];
        self.session
            .run(mutation, changed, |state| {
                for key in keys {
                    state.remove_row(key);
                }
            })
            .await?;
        Ok(())
    }

    /// Layers of a canvas by `order`.
    pub fn list(&self, canvas_id: CanvasId) -> Vec<Layer> {
        self.session
            .state()
            .layers_of(canvas_id)
            .into_iter()
            .cloned()
            .collect()
    }

    /// Ids of the layers currently shown.
    pub fn visible_layer_ids(&self, canvas_id: CanvasId) -> HashSet<LayerId> {
        self.session
            .state()
            .layers_of(canvas_id)
            .into_iter()
            .filter(|l| l.visible)
            .map(|l| l.id)
            .collect()
    }

    /// Number of pins bound to a layer.
    pub fn pin_count(&self, layer_id: LayerId) -> usize {
        let state = self.session.state();
        let Some(layer) = state.layer(layer_id) else {
            return 0;
        };
        let count = state.pins_of(layer.canvas_id).filter(|p| p.layer_id == layer_id).count();
        count
    }

    fn get(&self, layer_id: LayerId) -> CanvasResult<Layer> {
        self.session
            .state()
            .layer(layer_id)
            .cloned()
            .ok_or_else(|| CanvasError::NotFound(RowKey::Layer(layer_id).to_string()))
    }

    async fn update(&self, layer_id: LayerId, what: &str, edit: impl FnOnce(&mut Layer)) -> CanvasResult<Layer> {
        let mut layer = self.get(layer_id)?;
        let canvas_id = layer.canvas_id;
        self.session.check_mutate(canvas_id, what)?;
        edit(&mut layer);
        let row = Row::Layer(layer.clone());
        let ack = self
            .session
            .run(
                Mutation::update(row.clone()),
                vec![StoreEvent::LayersChanged { canvas_id }],
                |state| state.put_row(row),
            )
            .await?;
        Ok(ack.and_then(Row::into_layer).unwrap_or(layer))
    }
}
