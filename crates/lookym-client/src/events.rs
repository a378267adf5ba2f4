//! Store change events for the presentation layer.
//!
//! Stores emit a [`StoreEvent`] after every observable mutation so screens
//! can re-render without polling store state.  Delivery is best-effort: a
//! send with no subscribers is not an error, and a slow subscriber that
//! lags simply misses events (it re-reads store state when it catches up).

use tokio::sync::broadcast;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    /// The signed-in user changed (including to signed-out).
    SessionChanged { user_id: Option<Uuid> },
    /// One video's engagement data (likes, comments) changed.
    VideoUpdated { video_id: Uuid },
    /// The catalog was replaced or extended by a fetch.
    CatalogChanged,
    /// A message landed in a chat, sent or received.
    NewMessage { chat_id: Uuid, message_id: Uuid },
    /// The notification feed or its unread count changed.
    NotificationsChanged { unread: u64 },
    /// The current user's follower/following lists were refreshed.
    FollowsChanged { followers: usize, following: usize },
}

/// Broadcast bus shared by all stores.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<StoreEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: StoreEvent) {
        tracing::trace!(?event, "store event");
        // No subscribers is fine.
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(128)
    }
}
