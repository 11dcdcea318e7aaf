//! Optimistic mutation pipeline.
//!
//! Every mutation is applied to the in-memory state and the local cache first,
//! then pushed to the remote store. The remote outcome moves the mutation from
//! `Pending` to either `Committed` or `RolledBack`; a rollback restores the
//! rows the mutation touched and rewrites the cache from the restored state.
//! When the remote reports a row missing, the canvas is refetched after the
//! restore, since another client deleted something the pre-image still holds.

use crate::config::SyncConfig;
use crate::error::CanvasResult;
use crate::model::{CanvasId, Row, RowKey, UserId};
use crate::remote::{RemoteError, RemoteResult, RemoteStore};
use crate::state::ModelState;
use crate::storage::{LocalCache, StorageResult};
use log::{debug, error, warn};
use serde::Serialize;
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;

/// Identifier of a mutation within one engine.
pub type MutationId = u64;

/// Lifecycle of a single mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationState {
    /// Applied locally, remote call in flight.
    Pending,
    /// Acknowledged by the remote store.
    Committed,
    /// Remote call failed; local state and cache were reverted.
    RolledBack,
}

/// The remote half of a mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteOp {
    Insert(Row),
    Update(Row),
    Delete(RowKey),
}

impl RemoteOp {
    /// Row the operation is addressed to.
    pub fn target(&self) -> RowKey {
        match self {
            RemoteOp::Insert(row) | RemoteOp::Update(row) => row.key(),
            RemoteOp::Delete(key) => *key,
        }
    }
}

/// A mutation ready to be executed.
#[derive(Debug, Clone)]
pub struct Mutation {
    pub canvas_id: CanvasId,
    pub op: RemoteOp,
    /// Every row the local apply step may change; captured for rollback.
    pub touched: Vec<RowKey>,
}

impl Mutation {
    pub fn insert(row: Row) -> Self {
        Self {
            canvas_id: row.canvas_id(),
            touched: vec![row.key()],
            op: RemoteOp::Insert(row),
        }
    }

    pub fn update(row: Row) -> Self {
        Self {
            canvas_id: row.canvas_id(),
            touched: vec![row.key()],
            op: RemoteOp::Update(row),
        }
    }

    /// Delete `touched[0]` together with the rows it cascades to.
    pub fn delete(canvas_id: CanvasId, touched: Vec<RowKey>) -> Option<Self> {
        let target = *touched.first()?;
        Some(Self {
            canvas_id,
            op: RemoteOp::Delete(target),
            touched,
        })
    }
}

/// Inspection record kept for recent mutations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MutationRecord {
    pub id: MutationId,
    pub target: RowKey,
    pub state: MutationState,
    /// Remote attempts made so far.
    pub attempts: u32,
}

/// Pre-images of the rows a mutation touches.
#[derive(Debug, Clone)]
pub(crate) struct Snapshot {
    rows: Vec<(RowKey, Option<Row>)>,
}

impl Snapshot {
    pub fn capture(state: &ModelState, keys: &[RowKey]) -> Self {
        Self {
            rows: keys.iter().map(|key| (*key, state.row(*key))).collect(),
        }
    }

    /// Write every pre-image back in capture order; rows that did not exist
    /// are removed.
    pub fn restore(self, state: &mut ModelState) {
        for (key, row) in self.rows {
            match row {
                Some(row) => state.put_row(row),
                None => state.remove_row(key),
            }
        }
    }
}

/// Rewrite the cache entries of a canvas from the in-memory state.
///
/// A canvas missing from state is evicted. A canvas whose children were
/// never loaded keeps its cache entries untouched.
pub(crate) fn persist(state: &ModelState, cache: &LocalCache, canvas_id: CanvasId) -> StorageResult<()> {
    if state.canvas(canvas_id).is_none() {
        return cache.evict(canvas_id);
    }
    if !state.is_hydrated(canvas_id) {
        return Ok(());
    }
    let layers: Vec<_> = state.layers_of(canvas_id).into_iter().cloned().collect();
    cache.store(canvas_id, &layers, &state.pin_records_of(canvas_id))
}

/// Everything a mutation needs besides the engine itself.
pub(crate) struct SyncContext<'a, R: RemoteStore + ?Sized> {
    pub state: &'a RefCell<ModelState>,
    pub cache: &'a LocalCache,
    pub remote: &'a R,
    pub actor: UserId,
}

/// Drives mutations through `Pending → Committed | RolledBack`.
pub struct SyncEngine {
    config: SyncConfig,
    next_id: Cell<MutationId>,
    log: RefCell<VecDeque<MutationRecord>>,
}

impl SyncEngine {
    pub fn new(config: SyncConfig) -> Self {
        Self {
            config,
            next_id: Cell::new(1),
            log: RefCell::new(VecDeque::new()),
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Recent mutations, oldest first.
    pub fn records(&self) -> Vec<MutationRecord> {
        self.log.borrow().iter().cloned().collect()
    }

    pub fn state_of(&self, id: MutationId) -> Option<MutationState> {
        self.log.borrow().iter().find(|r| r.id == id).map(|r| r.state)
    }

    /// Mutations whose remote call has not resolved yet.
    pub fn pending_count(&self) -> usize {
        self.log
            .borrow()
            .iter()
            .filter(|r| r.state == MutationState::Pending)
            .count()
    }

    /// Run one mutation end to end.
    ///
    /// `apply` performs the optimistic local change. Returns the row the
    /// remote store acknowledged (`None` for deletes).
    pub(crate) async fn execute<R: RemoteStore + ?Sized>(
        &self,
        ctx: SyncContext<'_, R>,
        mutation: Mutation,
        apply: impl FnOnce(&mut ModelState),
    ) -> CanvasResult<Option<Row>> {
        let Mutation {
            canvas_id,
            op,
            touched,
        } = mutation;

        let snapshot = Snapshot::capture(&ctx.state.borrow(), &touched);
        apply(&mut ctx.state.borrow_mut());
        if let Err(e) = persist(&ctx.state.borrow(), ctx.cache, canvas_id) {
            error!("Cache write failed before push of {}: {}", op.target(), e);
            snapshot.restore(&mut ctx.state.borrow_mut());
            return Err(e.into());
        }

        let id = self.begin(op.target());
        debug!("Mutation {} pending: {}", id, op.target());

        let max_attempts = self.config.max_attempts.max(1);
        let mut attempts = 0;
        let outcome = loop {
            attempts += 1;
            self.update(id, |r| r.attempts = attempts);
            match push(ctx.remote, ctx.actor, &op).await {
                Err(RemoteError::Unavailable(msg)) if attempts < max_attempts => {
                    warn!(
                        "Mutation {} attempt {}/{} failed, retrying: {}",
                        id, attempts, max_attempts, msg
                    );
                }
                other => break other,
            }
        };

        match outcome {
            Ok(ack) => {
                if let Some(row) = &ack {
                    ctx.state.borrow_mut().put_row(row.clone());
                }
                if let Err(e) = persist(&ctx.state.borrow(), ctx.cache, canvas_id) {
                    error!("Cache write failed after commit of mutation {}: {}", id, e);
                }
                self.update(id, |r| r.state = MutationState::Committed);
                debug!("Mutation {} committed", id);
                Ok(ack)
            }
            Err(err) => {
                warn!("Mutation {} rolled back: {}", id, err);
                snapshot.restore(&mut ctx.state.borrow_mut());
                if matches!(err, RemoteError::NotFound(_)) {
                    reconcile(&ctx, canvas_id).await;
                }
                if let Err(e) = persist(&ctx.state.borrow(), ctx.cache, canvas_id) {
                    error!("Cache write failed after rollback of mutation {}: {}", id, e);
                }
                self.update(id, |r| r.state = MutationState::RolledBack);
                Err(err.into())
            }
        }
    }

    fn begin(&self, target: RowKey) -> MutationId {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        let mut log = self.log.borrow_mut();
        log.push_back(MutationRecord {
            id,
            target,
            state: MutationState::Pending,
            attempts: 0,
        });
        while log.len() > self.config.history_limit {
            log.pop_front();
        }
        id
    }

    fn update(&self, id: MutationId, f: impl FnOnce(&mut MutationRecord)) {
        if let Some(record) = self.log.borrow_mut().iter_mut().find(|r| r.id == id) {
            f(record);
        }
    }
}

/// Bring a canvas back in line with the remote store after a rollback.
///
/// Children are reloaded only for canvases whose children are in memory. A
/// canvas the actor can no longer read is removed. Any other failure keeps the
/// restored state.
async fn reconcile<R: RemoteStore + ?Sized>(ctx: &SyncContext<'_, R>, canvas_id: CanvasId) {
    match ctx.remote.fetch_canvas(ctx.actor, canvas_id).await {
        Ok(rows) => {
            let mut state = ctx.state.borrow_mut();
            if state.is_hydrated(canvas_id) {
                state.load_canvas_rows(rows);
            } else {
                state.put_row(Row::Canvas(rows.canvas));
            }
            debug!("Canvas {} refetched after rollback", canvas_id);
        }
        Err(RemoteError::NotFound(_) | RemoteError::PermissionDenied(_)) => {
            warn!("Canvas {} is gone from the remote store, removing it", canvas_id);
            ctx.state.borrow_mut().remove_canvas(canvas_id);
        }
        Err(e) => warn!("Could not refetch canvas {} after rollback: {}", canvas_id, e),
    }
}

async fn push<R: RemoteStore + ?Sized>(remote: &R, actor: UserId, op: &RemoteOp) -> RemoteResult<Option<Row>> {
    match op {
        RemoteOp::Insert(row) => remote.insert(actor, row.clone()).await.map(Some),
        RemoteOp::Update(row) => remote.update(actor, row.clone()).await.map(Some),
        RemoteOp::Delete(key) => remote.delete(actor, *key).await.map(|()| None),
    }
}
