//! Relationship store: the follow graph around the current user.
//!
//! `following_ids` / `follower_ids` mirror the remote edge table for O(1)
//! `is_following` lookups; they may be stale until the next refresh.
//! Follow/unfollow end by re-running a full refresh of both lists rather
//! than patching incrementally.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use uuid::Uuid;

use lookym_gateway::rows::{NewNotificationRow, UserRow};
use lookym_gateway::RemoteGateway;
use lookym_shared::{NotificationKind, RelatedKind, User};

use crate::error::{Result, SyncError};
use crate::events::{EventBus, StoreEvent};
use crate::session::SessionManager;

/// Reactive relationship state handed to the presentation layer.
#[derive(Debug, Clone, Default)]
pub struct RelationState {
    /// Ids the current user follows.
    pub following_ids: HashSet<Uuid>,
    /// Ids following the current user.
    pub follower_ids: HashSet<Uuid>,
    /// Profiles behind `following_ids`, refreshed together with them.
    pub following: Vec<User>,
    /// Profiles behind `follower_ids`.
    pub followers: Vec<User>,
    pub is_loading: bool,
    pub error: Option<String>,
}

/// Not persisted: the graph is cheap to rebuild and goes stale fast.
pub struct RelationshipStore {
    gateway: Arc<dyn RemoteGateway>,
    session: Arc<SessionManager>,
    events: EventBus,
    state: Mutex<RelationState>,
}

impl RelationshipStore {
    pub fn new(
        gateway: Arc<dyn RemoteGateway>,
        session: Arc<SessionManager>,
        events: EventBus,
    ) -> Self {
        Self {
            gateway,
            session,
            events,
            state: Mutex::new(RelationState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RelationState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// A cheap clone of the current state.
    pub fn state(&self) -> RelationState {
        self.lock().clone()
    }

    /// Pure local lookup; may lag the remote edge table until the next
    /// refresh.
    pub fn is_following(&self, user_id: Uuid) -> bool {
        self.lock().following_ids.contains(&user_id)
    }

    fn fail(&self, err: &SyncError) {
        let mut state = self.lock();
        state.is_loading = false;
        state.error = Some(err.to_string());
    }

    /// Follow `target`. Self-follows are rejected; following an account
    /// twice is a no-op (checked against the local mirror before any
    /// remote write). A best-effort notification is created for the
    /// followed account; its failure never fails the follow.
    pub async fn follow_user(&self, target: Uuid) -> Result<()> {
        let user = self.session.require_user()?;
        if user.id == target {
            return Err(SyncError::InvalidInput("cannot follow yourself".to_string()));
        }
        if self.is_following(target) {
            tracing::debug!(%target, "already following, skipping");
            return Ok(());
        }

        {
            let mut state = self.lock();
            state.is_loading = true;
            state.error = None;
        }

        if let Err(e) = self.gateway.insert_follow(user.id, target).await {
            let err = SyncError::RemoteWrite(e);
            self.fail(&err);
            return Err(err);
        }

        let notification = NewNotificationRow {
            user_id: target,
            kind: NotificationKind::NewFollower,
            content: format!("{} started following you", user.username),
            related_id: Some(user.id),
            related_type: Some(RelatedKind::User),
            actor_id: Some(user.id),
        };
        if let Err(e) = self.gateway.insert_notification(&notification).await {
            tracing::warn!(%target, error = %e, "follow notification not delivered");
        }

        self.refresh_own_edges(user.id).await
    }

    /// Unfollow `target`; like [`Self::follow_user`] this finishes with a
    /// full refresh of both lists.
    pub async fn unfollow_user(&self, target: Uuid) -> Result<()> {
        let user = self.session.require_user()?;
        if user.id == target {
            return Err(SyncError::InvalidInput(
                "cannot unfollow yourself".to_string(),
            ));
        }

        {
            let mut state = self.lock();
            state.is_loading = true;
            state.error = None;
        }

        if let Err(e) = self.gateway.delete_follow(user.id, target).await {
            let err = SyncError::RemoteWrite(e);
            self.fail(&err);
            return Err(err);
        }

        self.refresh_own_edges(user.id).await
    }

    /// Reload the current user's follower/following lists wholesale.
    pub async fn refresh(&self) -> Result<()> {
        let user = self.session.require_user()?;
        self.refresh_own_edges(user.id).await
    }

    async fn refresh_own_edges(&self, user_id: Uuid) -> Result<()> {
        let result = self.fetch_edges(user_id).await;
        match result {
            Ok((follower_ids, following_ids, followers, following)) => {
                let (follower_count, following_count) = (followers.len(), following.len());
                {
                    let mut state = self.lock();
                    state.follower_ids = follower_ids;
                    state.following_ids = following_ids;
                    state.followers = followers;
                    state.following = following;
                    state.is_loading = false;
                }
                self.events.emit(StoreEvent::FollowsChanged {
                    followers: follower_count,
                    following: following_count,
                });
                Ok(())
            }
            Err(err) => {
                self.fail(&err);
                Err(err)
            }
        }
    }

    #[allow(clippy::type_complexity)]
    async fn fetch_edges(
        &self,
        user_id: Uuid,
    ) -> Result<(HashSet<Uuid>, HashSet<Uuid>, Vec<User>, Vec<User>)> {
        let follower_ids = self
            .gateway
            .fetch_follower_ids(user_id)
            .await
            .map_err(SyncError::RemoteRead)?;
        let following_ids = self
            .gateway
            .fetch_following_ids(user_id)
            .await
            .map_err(SyncError::RemoteRead)?;

        let followers = self.users_for(&follower_ids).await?;
        let following = self.users_for(&following_ids).await?;

        Ok((
            follower_ids.into_iter().collect(),
            following_ids.into_iter().collect(),
            followers,
            following,
        ))
    }

    /// Everyone following `user_id`. Two-step read: edge ids, then a batch
    /// profile lookup. No edges is an empty list, not an error.
    pub async fn fetch_followers_of(&self, user_id: Uuid) -> Result<Vec<User>> {
        let ids = self
            .gateway
            .fetch_follower_ids(user_id)
            .await
            .map_err(SyncError::RemoteRead)?;
        self.users_for(&ids).await
    }

    /// Everyone `user_id` follows.
    pub async fn fetch_following_of(&self, user_id: Uuid) -> Result<Vec<User>> {
        let ids = self
            .gateway
            .fetch_following_ids(user_id)
            .await
            .map_err(SyncError::RemoteRead)?;
        self.users_for(&ids).await
    }

    async fn users_for(&self, ids: &[Uuid]) -> Result<Vec<User>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = self
            .gateway
            .fetch_users_by_ids(ids)
            .await
            .map_err(SyncError::RemoteRead)?;
        Ok(rows.into_iter().map(UserRow::into_user).collect())
    }
}
