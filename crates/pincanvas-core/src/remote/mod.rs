//! Authoritative multi-user store.
//!
//! The network transport is provided by the embedding application; the core
//! only sees the [`RemoteStore`] capability. The store re-checks every
//! permission the client checked and assigns `created_at`/`updated_at`.

mod memory;

pub use memory::MemoryRemote;

use crate::model::{Canvas, CanvasId, Layer, PinRecord, Profile, Row, RowKey, Share, UserId};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Remote store errors.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RemoteError {
    /// Network or store failure; the request may be retried.
    #[error("Remote unavailable: {0}")]
    Unavailable(String),
    /// The row, or a row it references, does not exist (possibly deleted by
    /// another user).
    #[error("Not found: {0}")]
    NotFound(String),
    /// Row-level access control rejected the request.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),
    /// Unique (canvas, user) constraint on shares.
    #[error("Canvas {canvas} already shared with {user}")]
    DuplicateShare { canvas: CanvasId, user: UserId },
}

/// Result type for remote operations.
pub type RemoteResult<T> = Result<T, RemoteError>;

/// Boxed future for remote calls.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + 'a>>;

/// Every row of one canvas the caller is allowed to read.
#[derive(Debug, Clone, PartialEq)]
pub struct CanvasRows {
    pub canvas: Canvas,
    pub layers: Vec<Layer>,
    /// Pins in creation order.
    pub pins: Vec<PinRecord>,
    /// All shares for the owner; only the caller's own share otherwise.
    pub shares: Vec<Share>,
}

/// One entry of the caller's canvas list.
#[derive(Debug, Clone, PartialEq)]
pub struct CanvasListing {
    pub canvas: Canvas,
    /// The caller's share, when the canvas is not theirs.
    pub share: Option<Share>,
    pub pin_count: usize,
    pub layer_count: usize,
}

/// Capability interface to the authoritative store.
///
/// `actor` is the authenticated user on whose behalf the call is made.
pub trait RemoteStore {
    /// Insert a row and return it as stored.
    fn insert(&self, actor: UserId, row: Row) -> BoxFuture<'_, RemoteResult<Row>>;

    /// Overwrite an existing row and return it as stored.
    fn update(&self, actor: UserId, row: Row) -> BoxFuture<'_, RemoteResult<Row>>;

    /// Delete a row; children go with it through the foreign keys.
    fn delete(&self, actor: UserId, key: RowKey) -> BoxFuture<'_, RemoteResult<()>>;

    /// Fetch one canvas with its children.
    fn fetch_canvas(&self, actor: UserId, canvas_id: CanvasId) -> BoxFuture<'_, RemoteResult<CanvasRows>>;

    /// Canvases the actor owns or has been shared.
    fn list_canvases(&self, actor: UserId) -> BoxFuture<'_, RemoteResult<Vec<CanvasListing>>>;

    /// Look up a profile by email address.
    fn find_profile_by_email(&self, email: &str) -> BoxFuture<'_, RemoteResult<Option<Profile>>>;

    /// Profiles for the given users; unknown users are skipped.
    fn profiles(&self, user_ids: &[UserId]) -> BoxFuture<'_, RemoteResult<Vec<Profile>>>;
}
