//! Error types surfaced by the stores.

use crate::model::{CanvasId, LayerId, UserId};
use crate::remote::RemoteError;
use crate::storage::StorageError;
use thiserror::Error;

/// Errors returned by canvas, layer, pin and share operations.
///
/// Validation errors are raised before anything is mutated. Remote failures
/// are raised only after the optimistic change has been rolled back.
#[derive(Debug, Error)]
pub enum CanvasError {
    #[error("Layer {layer} is not a layer of canvas {canvas}")]
    InvalidLayerReference { canvas: CanvasId, layer: LayerId },
    #[error("Canvas {0} must keep at least one layer while it has pins")]
    LastLayerViolation(CanvasId),
    #[error("Permission denied: {0}")]
    PermissionDenied(String),
    #[error("Canvas {canvas} is already shared with user {user}")]
    DuplicateShare { canvas: CanvasId, user: UserId },
    #[error("Invalid share permission: {0}")]
    InvalidPermission(String),
    #[error("Invalid layer color: {0}")]
    InvalidColor(String),
    #[error("Invalid media kind: {0}")]
    InvalidMediaKind(String),
    #[error("Canvas {0} cannot be shared with its owner")]
    InvalidShareTarget(CanvasId),
    #[error("No user found with email {0}")]
    UserNotFound(String),
    #[error("Canvas {0} is not loaded; enter it before adding layers or pins")]
    CanvasNotLoaded(CanvasId),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Remote store unavailable: {0}")]
    RemoteUnavailable(String),
    #[error("Local cache error: {0}")]
    Storage(#[from] StorageError),
}

impl CanvasError {
    /// Whether repeating the same operation later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CanvasError::RemoteUnavailable(_))
    }
}

impl From<RemoteError> for CanvasError {
    fn from(err: RemoteError) -> Self {
        match err {
            RemoteError::Unavailable(msg) => CanvasError::RemoteUnavailable(msg),
            RemoteError::NotFound(msg) => CanvasError::NotFound(msg),
            RemoteError::PermissionDenied(msg) => CanvasError::PermissionDenied(msg),
            RemoteError::DuplicateShare { canvas, user } => {
                CanvasError::DuplicateShare { canvas, user }
            }
        }
    }
}

/// Result type for store operations.
pub type CanvasResult<T> = Result<T, CanvasError>;
