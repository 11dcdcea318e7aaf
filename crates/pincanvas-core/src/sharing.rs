//! Share management: granting other users access to a canvas.

use crate::error::{CanvasError, CanvasResult};
use crate::model::{CanvasId, Row, RowKey, Share, ShareId, UserId, parse_share_permission};
use crate::policy::Permission;
use crate::remote::RemoteStore;
use crate::session::{Session, StoreEvent};
use crate::sync::Mutation;
use chrono::Utc;
use uuid::Uuid;

const UNKNOWN: &str = "Unknown";

/// A share joined with the grantee's profile.
#[derive(Debug, Clone, PartialEq)]
pub struct ShareEntry {
    pub share: Share,
    /// "Unknown" when the user has no display name.
    pub display_name: String,
    /// "Unknown" when the user has no email on file.
    pub email: String,
}

/// Share operations of a [`Session`]. Every mutation is owner only.
pub struct ShareStore<'a, R: RemoteStore + ?Sized> {
    session: &'a Session<R>,
}

impl<'a, R: RemoteStore + ?Sized> ShareStore<'a, R> {
    pub(crate) fn new(session: &'a Session<R>) -> Self {
        Self { session }
    }

    /// Grant `user_id` `permission` ("editor" or "viewer") on a canvas.
    pub async fn create_share(&self, canvas_id: CanvasId, user_id: UserId, permission: &str) -> CanvasResult<Share> {
        self.session.check_manage_sharing(canvas_id, "share this canvas")?;
        let permission = parse_share_permission(permission)?;
        {
            let state = self.session.state();
            if state.canvas(canvas_id).is_some_and(|c| c.owner_id == user_id) {
                return Err(CanvasError::InvalidShareTarget(canvas_id));
            }
            if state.shares_of(canvas_id).any(|s| s.user_id == user_id) {
                return Err(CanvasError::DuplicateShare {
                    canvas: canvas_id,
                    user: user_id,
                });
            }
        }

        let share = Share {
            id: Uuid::new_v4(),
            canvas_id,
            user_id,
            permission,
            shared_by: self.session.user(),
            created_at: Utc::now(),
        };
        let row = Row::Share(share.clone());
        let ack = self
            .session
            .run(
                Mutation::insert(row.clone()),
                vec![StoreEvent::SharesChanged { canvas_id }],
                |state| state.put_row(row),
            )
            .await?;
        Ok(ack.and_then(Row::into_share).unwrap_or(share))
    }

    /// Share with the user registered under `email`.
    pub async fn share_by_email(&self, canvas_id: CanvasId, email: &str, permission: &str) -> CanvasResult<Share> {
        self.session.check_manage_sharing(canvas_id, "share this canvas")?;
        parse_share_permission(permission)?;
        let email = email.trim();
        let profile = self
            .session
            .remote()
            .find_profile_by_email(email)
            .await?
            .ok_or_else(|| CanvasError::UserNotFound(email.to_string()))?;
        self.create_share(canvas_id, profile.user_id, permission).await
    }

    pub async fn update_permission(&self, share_id: ShareId, permission: &str) -> CanvasResult<Share> {
        let mut share = self.require(share_id)?;
        let canvas_id = share.canvas_id;
        self.session.check_manage_sharing(canvas_id, "change sharing")?;
        share.permission = parse_share_permission(permission)?;

        let row = Row::Share(share.clone());
        let ack = self
            .session
            .run(
                Mutation::update(row.clone()),
                vec![StoreEvent::SharesChanged { canvas_id }],
                |state| state.put_row(row),
            )
            .await?;
        Ok(ack.and_then(Row::into_share).unwrap_or(share))
    }

    pub async fn remove_share(&self, share_id: ShareId) -> CanvasResult<()> {
        let canvas_id = self.require(share_id)?.canvas_id;
        self.session.check_manage_sharing(canvas_id, "change sharing")?;
        let key = RowKey::Share(share_id);
        let Some(mutation) = Mutation::delete(canvas_id, vec![key]) else {
            return Ok(());
        };
        self.session
            .run(mutation, vec![StoreEvent::SharesChanged { canvas_id }], |state| {
                state.remove_row(key)
            })
            .await?;
        Ok(())
    }

    /// Shares of a canvas known locally, oldest first. Owners see every
    /// share; other users only their own.
    pub fn list_local(&self, canvas_id: CanvasId) -> Vec<Share> {
        let mut shares: Vec<Share> = self.session.state().shares_of(canvas_id).cloned().collect();
        shares.sort_by_key(|s| (s.created_at, s.id));
        shares
    }

    /// Shares of a canvas with the grantees' names and emails.
    pub async fn list_shares(&self, canvas_id: CanvasId) -> CanvasResult<Vec<ShareEntry>> {
        let shares = self.list_local(canvas_id);
        if shares.is_empty() {
            return Ok(Vec::new());
        }
        let user_ids: Vec<UserId> = shares.iter().map(|s| s.user_id).collect();
        let profiles = self.session.remote().profiles(&user_ids).await?;

        Ok(shares
            .into_iter()
            .map(|share| {
                let profile = profiles.iter().find(|p| p.user_id == share.user_id);
                let display_name = profile
                    .and_then(|p| p.display_name.clone())
                    .unwrap_or_else(|| UNKNOWN.to_string());
                let email = profile
                    .and_then(|p| p.email.clone())
                    .unwrap_or_else(|| UNKNOWN.to_string());
                ShareEntry {
                    share,
                    display_name,
                    email,
                }
            })
            .collect())
    }

    /// Link to open a canvas in the app.
    pub fn share_url(&self, canvas_id: CanvasId) -> String {
        format!("{}/canvas/{}", self.session.config().share_base(), canvas_id)
    }

    /// Effective permission of any user on a locally known canvas.
    pub fn effective_permission(&self, canvas_id: CanvasId, user_id: UserId) -> Permission {
        self.session
            .state()
            .permission(canvas_id, user_id)
            .unwrap_or(Permission::None)
    }

    fn require(&self, share_id: ShareId) -> CanvasResult<Share> {
        self.session
            .state()
            .share(share_id)
            .cloned()
            .ok_or_else(|| CanvasError::NotFound(RowKey::Share(share_id).to_string()))
    }
}
