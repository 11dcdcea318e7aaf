//! Effective permission resolution and mutation gates.

use crate::error::{CanvasError, CanvasResult};
use crate::model::{Canvas, Share, SharePermission, UserId};
use serde::{Deserialize, Serialize};

/// Access level of a user on a canvas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    None,
    Viewer,
    Editor,
    Owner,
}

impl From<SharePermission> for Permission {
    fn from(permission: SharePermission) -> Self {
        match permission {
            SharePermission::Editor => Permission::Editor,
            SharePermission::Viewer => Permission::Viewer,
        }
    }
}

/// Single place where canvas access is decided.
///
/// Checks here are advisory: the remote store applies the same rules to every
/// row it accepts.
pub struct SharingPolicy;

impl SharingPolicy {
    /// Resolve the permission `user` has on `canvas` given the canvas's shares.
    pub fn effective<'a>(
        canvas: &Canvas,
        shares: impl IntoIterator<Item = &'a Share>,
        user: UserId,
    ) -> Permission {
        if canvas.owner_id == user {
            return Permission::Owner;
        }
        shares
            .into_iter()
            .find(|share| share.canvas_id == canvas.id && share.user_id == user)
            .map(|share| Permission::from(share.permission))
            .unwrap_or(Permission::None)
    }

    /// Owners and editors may change layers, pins and canvas metadata.
    pub fn can_mutate(permission: Permission) -> bool {
        matches!(permission, Permission::Owner | Permission::Editor)
    }

    /// Only owners may grant, change or revoke shares.
    pub fn can_manage_sharing(permission: Permission) -> bool {
        permission == Permission::Owner
    }

    /// Only owners may delete a canvas.
    pub fn can_delete_canvas(permission: Permission) -> bool {
        permission == Permission::Owner
    }

    pub fn check_mutate(permission: Permission, what: &str) -> CanvasResult<()> {
        if Self::can_mutate(permission) {
            Ok(())
        } else {
            Err(denied(permission, what))
        }
    }

    pub fn check_manage_sharing(permission: Permission, what: &str) -> CanvasResult<()> {
        if Self::can_manage_sharing(permission) {
            Ok(())
        } else {
            Err(denied(permission, what))
        }
    }

    pub fn check_delete_canvas(permission: Permission, what: &str) -> CanvasResult<()> {
        if Self::can_delete_canvas(permission) {
            Ok(())
        } else {
            Err(denied(permission, what))
        }
    }
}

fn denied(permission: Permission, what: &str) -> CanvasError {
    CanvasError::PermissionDenied(format!("{:?} access cannot {}", permission, what))
}
