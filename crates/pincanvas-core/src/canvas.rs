//! Canvas metadata and lifecycle.

use crate::error::{CanvasError, CanvasResult};
use crate::model::{Canvas, CanvasId, Row, RowKey};
use crate::policy::{Permission, SharingPolicy};
use crate::remote::{CanvasListing, RemoteError, RemoteStore};
use crate::session::{Session, StoreEvent};
use crate::sync::Mutation;
use log::{debug, error, warn};
use std::collections::HashSet;

/// One entry of the canvas list.
#[derive(Debug, Clone, PartialEq)]
pub struct CanvasSummary {
    pub canvas: Canvas,
    pub permission: Permission,
    pub pin_count: usize,
    pub layer_count: usize,
}

impl CanvasSummary {
    /// Whether the session user owns the canvas.
    pub fn is_mine(&self) -> bool {
        self.permission == Permission::Owner
    }
}

/// Canvas operations of a [`Session`].
pub struct CanvasStore<'a, R: RemoteStore + ?Sized> {
    session: &'a Session<R>,
}

impl<'a, R: RemoteStore + ?Sized> CanvasStore<'a, R> {
    pub(crate) fn new(session: &'a Session<R>) -> Self {
        Self { session }
    }

    /// Create a canvas owned by the session user.
    pub async fn create(&self, title: &str, background_image: Option<String>) -> CanvasResult<Canvas> {
        let canvas = Canvas::new(title, background_image, self.session.user());
        let row = Row::Canvas(canvas.clone());
        let ack = self
            .session
            .run(Mutation::insert(row.clone()), vec![StoreEvent::CanvasesChanged], |state| {
                state.put_row(row);
                state.mark_hydrated(canvas.id);
            })
            .await?;
        Ok(ack.and_then(Row::into_canvas).unwrap_or(canvas))
    }

    pub async fn rename(&self, canvas_id: CanvasId, title: &str) -> CanvasResult<Canvas> {
        let title = title.to_string();
        self.update(canvas_id, "rename this canvas", |c| c.title = title)
            .await
    }

    pub async fn set_background_image(&self, canvas_id: CanvasId, image: Option<String>) -> CanvasResult<Canvas> {
        self.update(canvas_id, "change the background image", |c| c.background_image = image)
            .await
    }

    /// Delete a canvas with its layers, pins, media and shares. Owner only.
    pub async fn delete(&self, canvas_id: CanvasId) -> CanvasResult<()> {
        let permission = self.session.permission_on(canvas_id)?;
        SharingPolicy::check_delete_canvas(permission, "delete this canvas")?;

        let keys = self.session.state().cascade_keys(RowKey::Canvas(canvas_id));
        let Some(mutation) = Mutation::delete(canvas_id, keys.clone()) else {
            return Ok(());
        };
        let changed = vec![
            StoreEvent::CanvasesChanged,
            StoreEvent::LayersChanged { canvas_id },
            StoreEvent::PinsChanged { canvas_id },
            StoreEvent::SharesChanged { canvas_id },
        ];
        self.session
            .run(mutation, changed, |state| {
                for key in keys {
                    state.remove_row(key);
                }
            })
            .await?;
        self.session.state_mut().drop_children(canvas_id);
        if self.session.active_canvas() == Some(canvas_id) {
            self.session.leave_canvas();
        }
        Ok(())
    }

    /// Canvases the session user owns or has been shared, newest first.
    ///
    /// Refreshes the local canvas rows from the remote store; when it is
    /// unreachable the locally known canvases are listed instead.
    pub async fn list(&self) -> CanvasResult<Vec<CanvasSummary>> {
        let mut summaries = match self.session.remote().list_canvases(self.session.user()).await {
            Ok(listings) => self.merge(listings),
            Err(RemoteError::Unavailable(msg)) => {
                warn!("Remote unavailable, listing known canvases: {}", msg);
                self.known()
            }
            Err(err) => return Err(err.into()),
        };
        summaries.sort_by(|a, b| b.canvas.created_at.cmp(&a.canvas.created_at));
        Ok(summaries)
    }

    /// Canvases owned by the session user, newest first.
    pub async fn list_owned(&self) -> CanvasResult<Vec<CanvasSummary>> {
        let mut all = self.list().await?;
        all.retain(CanvasSummary::is_mine);
        Ok(all)
    }

    /// Canvases shared with the session user, newest first.
    pub async fn list_shared(&self) -> CanvasResult<Vec<CanvasSummary>> {
        let mut all = self.list().await?;
        all.retain(|s| !s.is_mine());
        Ok(all)
    }

    pub fn get(&self, canvas_id: CanvasId) -> Option<Canvas> {
        self.session.state().canvas(canvas_id).cloned()
    }

    async fn update(&self, canvas_id: CanvasId, what: &str, edit: impl FnOnce(&mut Canvas)) -> CanvasResult<Canvas> {
        self.session.check_mutate(canvas_id, what)?;
        let mut canvas = self
            .get(canvas_id)
            .ok_or_else(|| CanvasError::NotFound(format!("canvas {}", canvas_id)))?;
        edit(&mut canvas);
        let row = Row::Canvas(canvas.clone());
        let ack = self
            .session
            .run(Mutation::update(row.clone()), vec![StoreEvent::CanvasesChanged], |state| {
                state.put_row(row)
            })
            .await?;
        Ok(ack.and_then(Row::into_canvas).unwrap_or(canvas))
    }

    /// Adopt the remote listing: refresh canvas and share rows, forget
    /// canvases that are gone or no longer shared.
    fn merge(&self, listings: Vec<CanvasListing>) -> Vec<CanvasSummary> {
        let user = self.session.user();
        let listed: HashSet<CanvasId> = listings.iter().map(|l| l.canvas.id).collect();
        let stale: Vec<CanvasId> = self
            .session
            .state()
            .canvases()
            .map(|c| c.id)
            .filter(|id| !listed.contains(id) && self.session.active_canvas() != Some(*id))
            .collect();
        for canvas_id in stale {
            self.session.forget_canvas(canvas_id);
        }
        self.evict_orphaned_cache(&listed);

        let mut state = self.session.state_mut();
        let summaries = listings
            .into_iter()
            .map(|listing| {
                state.put_row(Row::Canvas(listing.canvas.clone()));
                if let Some(share) = listing.share.clone() {
                    state.put_row(Row::Share(share));
                }
                let permission = SharingPolicy::effective(&listing.canvas, listing.share.as_ref(), user);
                CanvasSummary {
                    canvas: listing.canvas,
                    permission,
                    pin_count: listing.pin_count,
                    layer_count: listing.layer_count,
                }
            })
            .collect();
        drop(state);
        self.session.emit(StoreEvent::CanvasesChanged);
        summaries
    }

    /// Drop cache entries of canvases the listing no longer contains, such as
    /// ones deleted or unshared while this client was closed.
    fn evict_orphaned_cache(&self, listed: &HashSet<CanvasId>) {
        let cache = self.session.cache();
        let cached = match cache.cached_canvases() {
            Ok(cached) => cached,
            Err(e) => {
                warn!("Failed to scan cache entries: {}", e);
                return;
            }
        };
        let active = self.session.active_canvas();
        for canvas_id in cached {
            if listed.contains(&canvas_id) || active == Some(canvas_id) {
                continue;
            }
            debug!("Evicting orphaned cache entries for canvas {}", canvas_id);
            if let Err(e) = cache.evict(canvas_id) {
                error!("Failed to evict cache for canvas {}: {}", canvas_id, e);
            }
        }
    }

    fn known(&self) -> Vec<CanvasSummary> {
        let user = self.session.user();
        let state = self.session.state();
        let summaries = state
            .canvases()
            .filter_map(|canvas| {
                let permission = state.permission(canvas.id, user)?;
                (permission != Permission::None).then(|| CanvasSummary {
                    canvas: canvas.clone(),
                    permission,
                    pin_count: state.pins_of(canvas.id).count(),
                    layer_count: state.layers_of(canvas.id).len(),
                })
            })
            .collect();
        summaries
    }
}
