//! Notification store: the unread-notification feed.
//!
//! `unread_count` is always recomputed from the list rather than
//! decremented manually, so it cannot drift from the data it summarizes.

use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use lookym_gateway::RemoteGateway;
use lookym_shared::Notification;
use lookym_store::{keys, Database};

use crate::error::{Result, SyncError};
use crate::events::{EventBus, StoreEvent};
use crate::session::SessionManager;

/// Reactive notification state handed to the presentation layer.
#[derive(Debug, Clone, Default)]
pub struct NotificationState {
    /// Newest first.
    pub notifications: Vec<Notification>,
    /// Derived: `count(read == false)`.
    pub unread_count: u64,
    pub is_loading: bool,
    pub error: Option<String>,
}

/// The persisted subset of [`NotificationState`]; the unread count is
/// re-derived on load.
#[derive(Debug, Serialize, Deserialize)]
struct NotificationSnapshot {
    notifications: Vec<Notification>,
}

fn unread(notifications: &[Notification]) -> u64 {
    notifications.iter().filter(|n| !n.read).count() as u64
}

pub struct NotificationStore {
    gateway: Arc<dyn RemoteGateway>,
    session: Arc<SessionManager>,
    db: Arc<Database>,
    events: EventBus,
    state: Mutex<NotificationState>,
}

impl NotificationStore {
    pub fn new(
        gateway: Arc<dyn RemoteGateway>,
        session: Arc<SessionManager>,
        db: Arc<Database>,
        events: EventBus,
    ) -> Self {
        let mut state = NotificationState::default();
        match db.load_snapshot::<NotificationSnapshot>(keys::NOTIFICATION_STORAGE) {
            Ok(Some(snapshot)) => {
                state.unread_count = unread(&snapshot.notifications);
                state.notifications = snapshot.notifications;
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(error = %e, "discarding unreadable notification snapshot");
            }
        }

        Self {
            gateway,
            session,
            db,
            events,
            state: Mutex::new(state),
        }
    }

    fn lock(&self) -> MutexGuard<'_, NotificationState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// A cheap clone of the current state.
    pub fn state(&self) -> NotificationState {
        self.lock().clone()
    }

    pub fn unread_count(&self) -> u64 {
        self.lock().unread_count
    }

    fn persist(&self) {
        let snapshot = {
            let state = self.lock();
            NotificationSnapshot {
                notifications: state.notifications.clone(),
            }
        };
        if let Err(e) = self.db.save_snapshot(keys::NOTIFICATION_STORAGE, &snapshot) {
            tracing::warn!(error = %e, "failed to flush notification snapshot");
        }
    }

    fn apply(&self, notifications: Vec<Notification>) {
        let count = unread(&notifications);
        {
            let mut state = self.lock();
            state.notifications = notifications;
            state.unread_count = count;
            state.is_loading = false;
        }
        self.persist();
        self.events
            .emit(StoreEvent::NotificationsChanged { unread: count });
    }

    /// Replace the feed with the remote state and recompute the unread
    /// count.
    pub async fn fetch_notifications(&self) -> Result<Vec<Notification>> {
        let user = self.session.require_user()?;
        {
            let mut state = self.lock();
            state.is_loading = true;
            state.error = None;
        }

        let rows = match self.gateway.fetch_notifications(user.id).await {
            Ok(rows) => rows,
            Err(e) => {
                let err = SyncError::RemoteRead(e);
                let mut state = self.lock();
                state.is_loading = false;
                state.error = Some(err.to_string());
                drop(state);
                return Err(err);
            }
        };

        let notifications: Vec<Notification> =
            rows.into_iter().map(|r| r.into_notification()).collect();
        self.apply(notifications.clone());
        Ok(notifications)
    }

    /// Write-through single read flag.
    pub async fn mark_as_read(&self, notification_id: Uuid) -> Result<()> {
        self.session.require_user()?;

        self.gateway
            .mark_notification_read(notification_id)
            .await
            .map_err(SyncError::RemoteWrite)?;

        let notifications = {
            let mut state = self.lock();
            if let Some(n) = state
                .notifications
                .iter_mut()
                .find(|n| n.id == notification_id)
            {
                n.read = true;
            }
            state.notifications.clone()
        };
        self.apply(notifications);
        Ok(())
    }

    /// Write-through bulk read flag for the whole feed.
    pub async fn mark_all_as_read(&self) -> Result<()> {
        let user = self.session.require_user()?;

        self.gateway
            .mark_all_notifications_read(user.id)
            .await
            .map_err(SyncError::RemoteWrite)?;

        let notifications = {
            let mut state = self.lock();
            for n in state.notifications.iter_mut() {
                n.read = true;
            }
            state.notifications.clone()
        };
        self.apply(notifications);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lookym_gateway::rows::NewNotificationRow;
    use lookym_gateway::MemoryGateway;
    use lookym_shared::{NotificationKind, UserRole};

    struct Fixture {
        gateway: Arc<MemoryGateway>,
        store: NotificationStore,
        me: Uuid,
    }

    async fn fixture() -> Fixture {
        let gateway = Arc::new(MemoryGateway::new());
        let me = gateway.seed_account("me@lookym.app", "pw", "me", UserRole::User);

        let db = Arc::new(Database::open_in_memory().unwrap());
        let events = EventBus::default();
        let session = Arc::new(SessionManager::new(
            gateway.clone(),
            db.clone(),
            events.clone(),
            "avatars",
        ));
        session.login("me@lookym.app", "pw").await.unwrap();

        let store = NotificationStore::new(gateway.clone(), session, db, events);
        Fixture { gateway, store, me }
    }

    async fn seed_notification(fx: &Fixture, content: &str) -> Uuid {
        fx.gateway
            .insert_notification(&NewNotificationRow {
                user_id: fx.me,
                kind: NotificationKind::VideoLike,
                content: content.to_string(),
                related_id: None,
                related_type: None,
                actor_id: None,
            })
            .await
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn unread_count_matches_the_list_exactly() {
        let fx = fixture().await;
        seed_notification(&fx, "a").await;
        seed_notification(&fx, "b").await;

        let notifications = fx.store.fetch_notifications().await.unwrap();
        let expected = notifications.iter().filter(|n| !n.read).count() as u64;
        assert_eq!(fx.store.unread_count(), expected);
        assert_eq!(fx.store.unread_count(), 2);
    }

    #[tokio::test]
    async fn feed_is_newest_first() {
        let fx = fixture().await;
        seed_notification(&fx, "older").await;
        seed_notification(&fx, "newer").await;

        let notifications = fx.store.fetch_notifications().await.unwrap();
        assert_eq!(notifications[0].content, "newer");
        assert_eq!(notifications[1].content, "older");
    }

    #[tokio::test]
    async fn mark_as_read_recomputes_instead_of_decrementing() {
        let fx = fixture().await;
        let id = seed_notification(&fx, "a").await;
        seed_notification(&fx, "b").await;
        fx.store.fetch_notifications().await.unwrap();

        fx.store.mark_as_read(id).await.unwrap();
        assert_eq!(fx.store.unread_count(), 1);

        // Marking the same one again cannot drive the count below truth.
        fx.store.mark_as_read(id).await.unwrap();
        assert_eq!(fx.store.unread_count(), 1);
    }

    #[tokio::test]
    async fn mark_all_clears_the_count() {
        let fx = fixture().await;
        seed_notification(&fx, "a").await;
        seed_notification(&fx, "b").await;
        fx.store.fetch_notifications().await.unwrap();

        fx.store.mark_all_as_read().await.unwrap();
        assert_eq!(fx.store.unread_count(), 0);
        assert!(fx.store.state().notifications.iter().all(|n| n.read));

        // The remote rows were flipped too, not just the local mirror.
        let refetched = fx.store.fetch_notifications().await.unwrap();
        assert!(refetched.iter().all(|n| n.read));
    }

    #[tokio::test]
    async fn mark_as_read_failure_leaves_state_untouched() {
        let fx = fixture().await;
        let id = seed_notification(&fx, "a").await;
        fx.store.fetch_notifications().await.unwrap();

        fx.gateway.fail_next("mark_notification_read");
        assert!(fx.store.mark_as_read(id).await.is_err());
        assert_eq!(fx.store.unread_count(), 1);
    }
}
