//! The per-user session owning all client-side state.

use crate::canvas::CanvasStore;
use crate::config::SessionConfig;
use crate::error::{CanvasError, CanvasResult};
use crate::layer::LayerStore;
use crate::model::{CanvasId, Row, RowKey, UserId};
use crate::pin::PinStore;
use crate::policy::{Permission, SharingPolicy};
use crate::remote::{RemoteError, RemoteStore};
use crate::sharing::ShareStore;
use crate::state::ModelState;
use crate::storage::LocalCache;
use crate::sync::{Mutation, SyncContext, SyncEngine, persist};
use log::{error, info, warn};
use std::cell::{Cell, Ref, RefCell, RefMut};
use std::sync::Arc;

/// Where the data of an entered canvas came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hydration {
    /// Fetched from the remote store.
    Remote,
    /// Remote unreachable; served from the local cache.
    Cache,
    /// Remote unreachable and nothing cached.
    Empty,
}

/// Change notifications for the UI.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreEvent {
    /// The canvas list or a canvas's metadata changed
    CanvasesChanged,
    /// Layers of a canvas changed
    LayersChanged { canvas_id: CanvasId },
    /// Pins or their media changed
    PinsChanged { canvas_id: CanvasId },
    /// Shares of a canvas changed
    SharesChanged { canvas_id: CanvasId },
    /// A mutation failed and its local effects were undone
    MutationRolledBack {
        target: RowKey,
        retryable: bool,
        message: String,
    },
}

/// Client-side state of one authenticated user.
///
/// Owns the in-memory tables, the local cache and the sync engine. Stores are
/// cheap views borrowing the session: `session.pins().create(..)`.
///
/// Lifecycle: [`enter_canvas`](Self::enter_canvas) hydrates a canvas from the
/// cache and then the remote store; [`leave_canvas`](Self::leave_canvas)
/// releases its layers and pins. The in-memory state is never borrowed across
/// an await point.
pub struct Session<R: RemoteStore + ?Sized> {
    user: UserId,
    config: SessionConfig,
    remote: Arc<R>,
    cache: LocalCache,
    state: RefCell<ModelState>,
    engine: SyncEngine,
    events: RefCell<Vec<StoreEvent>>,
    active: Cell<Option<CanvasId>>,
}

impl<R: RemoteStore + ?Sized> Session<R> {
    pub fn new(user: UserId, remote: Arc<R>, cache: LocalCache, config: SessionConfig) -> Self {
        let engine = SyncEngine::new(config.sync.clone());
        Self {
            user,
            config,
            remote,
            cache,
            state: RefCell::new(ModelState::new()),
            engine,
            events: RefCell::new(Vec::new()),
            active: Cell::new(None),
        }
    }

    /// Create a session backed by a file cache in the configured directory.
    #[cfg(not(target_arch = "wasm32"))]
    pub fn open(user: UserId, remote: Arc<R>, config: SessionConfig) -> CanvasResult<Self> {
        let dir = config.resolved_cache_dir()?;
        let storage = crate::storage::FileStorage::new(dir)?;
        Ok(Self::new(user, remote, LocalCache::new(Arc::new(storage)), config))
    }

    /// The authenticated user all operations act as.
    pub fn user(&self) -> UserId {
        self.user
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn remote(&self) -> &R {
        &self.remote
    }

    pub fn cache(&self) -> &LocalCache {
        &self.cache
    }

    pub fn sync(&self) -> &SyncEngine {
        &self.engine
    }

    /// Canvas currently entered, if any.
    pub fn active_canvas(&self) -> Option<CanvasId> {
        self.active.get()
    }

    pub fn canvases(&self) -> CanvasStore<'_, R> {
        CanvasStore::new(self)
    }

    pub fn layers(&self) -> LayerStore<'_, R> {
        LayerStore::new(self)
    }

    pub fn pins(&self) -> PinStore<'_, R> {
        PinStore::new(self)
    }

    pub fn sharing(&self) -> ShareStore<'_, R> {
        ShareStore::new(self)
    }

    /// Drain pending change notifications.
    pub fn poll_events(&self) -> Vec<StoreEvent> {
        std::mem::take(&mut *self.events.borrow_mut())
    }

    /// Effective permission of the session user; `None` for unknown canvases.
    pub fn permission(&self, canvas_id: CanvasId) -> Permission {
        self.state
            .borrow()
            .permission(canvas_id, self.user)
            .unwrap_or(Permission::None)
    }

    /// Load a canvas for viewing and editing.
    ///
    /// Cached layers and pins are served first, then replaced by the remote
    /// copy. When the remote store is unreachable the cached data stays (or
    /// the canvas starts empty). A canvas that no longer exists or is no
    /// longer readable is forgotten locally and the error returned.
    pub async fn enter_canvas(&self, canvas_id: CanvasId) -> CanvasResult<Hydration> {
        if let Some(previous) = self.active.get() {
            if previous != canvas_id {
                self.leave_canvas();
            }
        }
        self.active.set(Some(canvas_id));

        let cached = self.cache.load(canvas_id).unwrap_or_else(|e| {
            warn!("Ignoring unreadable cache for canvas {}: {}", canvas_id, e);
            None
        });
        let mut source = Hydration::Empty;
        {
            let mut state = self.state.borrow_mut();
            match cached {
                Some(cached) => {
                    state.replace_children(canvas_id, cached.layers, cached.pins);
                    source = Hydration::Cache;
                }
                None => state.replace_children(canvas_id, Vec::new(), Vec::new()),
            }
        }
        self.emit_canvas_changed(canvas_id);

        match self.remote.fetch_canvas(self.user, canvas_id).await {
            Ok(rows) => {
                self.state.borrow_mut().load_canvas_rows(rows);
                if let Err(e) = persist(&self.state.borrow(), &self.cache, canvas_id) {
                    error!("Cache write failed for canvas {}: {}", canvas_id, e);
                }
                source = Hydration::Remote;
                self.emit(StoreEvent::CanvasesChanged);
                self.emit_canvas_changed(canvas_id);
                self.emit(StoreEvent::SharesChanged { canvas_id });
            }
            Err(RemoteError::Unavailable(msg)) => {
                warn!("Remote unavailable entering canvas {}, using {:?}: {}", canvas_id, source, msg);
            }
            Err(err) => {
                warn!("Canvas {} is no longer accessible: {}", canvas_id, err);
                self.forget_canvas(canvas_id);
                return Err(err.into());
            }
        }

        info!("Entered canvas {} from {:?}", canvas_id, source);
        Ok(source)
    }

    /// Release the active canvas's layers and pins.
    pub fn leave_canvas(&self) {
        if let Some(canvas_id) = self.active.take() {
            self.state.borrow_mut().drop_children(canvas_id);
            info!("Left canvas {}", canvas_id);
        }
    }

    pub(crate) fn state(&self) -> Ref<'_, ModelState> {
        self.state.borrow()
    }

    pub(crate) fn state_mut(&self) -> RefMut<'_, ModelState> {
        self.state.borrow_mut()
    }

    /// Permission of the session user on a canvas known to this session.
    pub(crate) fn permission_on(&self, canvas_id: CanvasId) -> CanvasResult<Permission> {
        self.state
            .borrow()
            .permission(canvas_id, self.user)
            .ok_or_else(|| CanvasError::NotFound(format!("canvas {}", canvas_id)))
    }

    pub(crate) fn check_mutate(&self, canvas_id: CanvasId, what: &str) -> CanvasResult<()> {
        SharingPolicy::check_mutate(self.permission_on(canvas_id)?, what)
    }

    /// Layers and pins of `canvas_id` must be in memory before they are
    /// extended, so new rows are ordered against the full collection.
    pub(crate) fn check_loaded(&self, canvas_id: CanvasId) -> CanvasResult<()> {
        if self.state.borrow().is_hydrated(canvas_id) {
            Ok(())
        } else {
            Err(CanvasError::CanvasNotLoaded(canvas_id))
        }
    }

    pub(crate) fn check_manage_sharing(&self, canvas_id: CanvasId, what: &str) -> CanvasResult<()> {
        SharingPolicy::check_manage_sharing(self.permission_on(canvas_id)?, what)
    }

    pub(crate) fn emit(&self, event: StoreEvent) {
        self.events.borrow_mut().push(event);
    }

    fn emit_canvas_changed(&self, canvas_id: CanvasId) {
        self.emit(StoreEvent::LayersChanged { canvas_id });
        self.emit(StoreEvent::PinsChanged { canvas_id });
    }

    /// Execute a mutation through the sync engine.
    ///
    /// `changed` is emitted when the optimistic change is applied and again
    /// if it is rolled back.
    pub(crate) async fn run(
        &self,
        mutation: Mutation,
        changed: Vec<StoreEvent>,
        apply: impl FnOnce(&mut ModelState),
    ) -> CanvasResult<Option<Row>> {
        let target = mutation.op.target();
        let canvas_id = mutation.canvas_id;
        let ctx = SyncContext {
            state: &self.state,
            cache: &self.cache,
            remote: &*self.remote,
            actor: self.user,
        };
        let events = &self.events;
        let applied = changed.clone();
        let result = self
            .engine
            .execute(ctx, mutation, |state| {
                apply(state);
                events.borrow_mut().extend(applied);
            })
            .await;

        if let Err(err) = &result {
            let reconciled = matches!(err, CanvasError::NotFound(_));
            {
                let mut events = self.events.borrow_mut();
                events.extend(changed);
                events.push(StoreEvent::MutationRolledBack {
                    target,
                    retryable: err.is_retryable(),
                    message: err.to_string(),
                });
            }
            if reconciled {
                if self.state.borrow().canvas(canvas_id).is_none() {
                    self.forget_canvas(canvas_id);
                } else {
                    self.emit_canvas_changed(canvas_id);
                    self.emit(StoreEvent::SharesChanged { canvas_id });
                }
            }
        }
        result
    }

    /// Drop a canvas and everything under it from state and cache.
    pub(crate) fn forget_canvas(&self, canvas_id: CanvasId) {
        self.state.borrow_mut().remove_canvas(canvas_id);
        if self.active.get() == Some(canvas_id) {
            self.active.set(None);
        }
        if let Err(e) = self.cache.evict(canvas_id) {
            error!("Failed to evict cache for canvas {}: {}", canvas_id, e);
        }
        self.emit(StoreEvent::CanvasesChanged);
    }
}
