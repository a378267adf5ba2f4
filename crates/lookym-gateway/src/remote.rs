//! The [`RemoteGateway`] contract consumed by every state container.
//!
//! Stores hold an `Arc<dyn RemoteGateway>` injected at construction, so
//! tests swap in [`MemoryGateway`] without touching store code.
//!
//! [`MemoryGateway`]: crate::MemoryGateway

use std::pin::Pin;
use std::task::{Context, Poll};

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use lookym_shared::UserRole;

use crate::error::Result;
use crate::rows::{
    ChatRow, CommentRow, MessageRow, NewMessageRow, NewNotificationRow, NewVideoRow,
    NotificationRow, ProfilePatch, UserRow, VideoRow,
};

/// An authenticated backend session.  Identity only; the profile row is a
/// separate record reconciled by a server-side provisioning trigger.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuthSession {
    pub user_id: Uuid,
    pub email: String,
    pub access_token: String,
}

/// Options for a binary object upload.
#[derive(Debug, Clone, Default)]
pub struct UploadOptions {
    pub content_type: Option<String>,
    pub cache_control: Option<String>,
    pub upsert: bool,
}

/// A live realtime subscription to message inserts on one chat.
///
/// Dropping the handle unsubscribes: the transport task backing the stream
/// is aborted and no further rows are delivered.
pub struct MessageSubscription {
    rx: mpsc::Receiver<MessageRow>,
    // Aborted on drop; None for transports without a backing task.
    task: Option<JoinHandle<()>>,
}

impl MessageSubscription {
    pub fn new(rx: mpsc::Receiver<MessageRow>, task: Option<JoinHandle<()>>) -> Self {
        Self { rx, task }
    }

    /// Receive the next inserted row, or `None` once the channel closes.
    pub async fn recv(&mut self) -> Option<MessageRow> {
        self.rx.recv().await
    }
}

impl Drop for MessageSubscription {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Stream for MessageSubscription {
    type Item = MessageRow;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<MessageRow>> {
        self.rx.poll_recv(cx)
    }
}

/// Query/mutation/subscription primitives against the hosted backend.
///
/// Rows are addressed by UUID string ids; joins (video with author and
/// nested comments-with-authors) are expressed by the implementation, not
/// by callers.
#[async_trait]
pub trait RemoteGateway: Send + Sync {
    // -- Auth ---------------------------------------------------------------

    /// Create the auth identity. The matching profile row is mirrored by a
    /// server-side trigger outside this client's control. Returns the new
    /// user id; no session is established (email confirmation gate).
    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        username: &str,
        role: UserRole,
    ) -> Result<Uuid>;

    async fn sign_in(&self, email: &str, password: &str) -> Result<AuthSession>;

    async fn sign_out(&self) -> Result<()>;

    /// The currently active session, if any.
    async fn current_session(&self) -> Result<Option<AuthSession>>;

    // -- Profiles -----------------------------------------------------------

    async fn fetch_profile(&self, user_id: Uuid) -> Result<Option<UserRow>>;

    /// Persist only the changed columns and return the updated row.
    async fn update_profile(&self, user_id: Uuid, patch: &ProfilePatch) -> Result<UserRow>;

    // -- Videos -------------------------------------------------------------

    /// Newest-first page of the catalog with author and comments joined.
    /// `page` is 1-based.
    async fn fetch_videos(&self, page: u32, limit: u32) -> Result<Vec<VideoRow>>;

    async fn fetch_videos_by_user(&self, user_id: Uuid) -> Result<Vec<VideoRow>>;

    async fn fetch_video(&self, id: Uuid) -> Result<Option<VideoRow>>;

    async fn insert_video(&self, new: &NewVideoRow) -> Result<VideoRow>;

    // -- Likes --------------------------------------------------------------

    /// Atomic server-side counter increment.
    async fn increment_likes(&self, video_id: Uuid) -> Result<()>;

    /// Atomic server-side counter decrement; the counter floors at zero.
    async fn decrement_likes(&self, video_id: Uuid) -> Result<()>;

    async fn insert_like(&self, video_id: Uuid, user_id: Uuid) -> Result<()>;

    async fn delete_like(&self, video_id: Uuid, user_id: Uuid) -> Result<()>;

    async fn fetch_liked_video_ids(&self, user_id: Uuid) -> Result<Vec<Uuid>>;

    // -- Saves --------------------------------------------------------------

    async fn insert_save(&self, video_id: Uuid, user_id: Uuid) -> Result<()>;

    async fn delete_save(&self, video_id: Uuid, user_id: Uuid) -> Result<()>;

    async fn fetch_saved_video_ids(&self, user_id: Uuid) -> Result<Vec<Uuid>>;

    // -- Comments -----------------------------------------------------------

    /// Insert a comment row and return it with the author snapshot joined.
    async fn insert_comment(&self, video_id: Uuid, user_id: Uuid, text: &str)
        -> Result<CommentRow>;

    // -- Follows ------------------------------------------------------------

    /// Idempotent edge insert (upsert on the pair).
    async fn insert_follow(&self, follower: Uuid, following: Uuid) -> Result<()>;

    async fn delete_follow(&self, follower: Uuid, following: Uuid) -> Result<()>;

    async fn fetch_follower_ids(&self, user_id: Uuid) -> Result<Vec<Uuid>>;

    async fn fetch_following_ids(&self, user_id: Uuid) -> Result<Vec<Uuid>>;

    /// Batch profile lookup by id list; order is unspecified.
    async fn fetch_users_by_ids(&self, ids: &[Uuid]) -> Result<Vec<UserRow>>;

    // -- Notifications ------------------------------------------------------

    async fn insert_notification(&self, new: &NewNotificationRow) -> Result<NotificationRow>;

    /// Newest-first feed for `user_id`.
    async fn fetch_notifications(&self, user_id: Uuid) -> Result<Vec<NotificationRow>>;

    async fn mark_notification_read(&self, id: Uuid) -> Result<()>;

    async fn mark_all_notifications_read(&self, user_id: Uuid) -> Result<()>;

    // -- Chats --------------------------------------------------------------

    /// Every chat `user_id` participates in, with participants and messages
    /// joined.
    async fn fetch_chats(&self, user_id: Uuid) -> Result<Vec<ChatRow>>;

    async fn insert_chat(&self, participant_ids: &[Uuid]) -> Result<ChatRow>;

    async fn insert_message(&self, new: &NewMessageRow) -> Result<MessageRow>;

    /// Flip `read` on `reader_id`'s inbound messages in `chat_id`; all of
    /// them, or only `ids` when given.
    async fn mark_messages_read(
        &self,
        chat_id: Uuid,
        reader_id: Uuid,
        ids: Option<&[Uuid]>,
    ) -> Result<()>;

    // -- Storage ------------------------------------------------------------

    /// Upload a binary object; returns the stored object path.
    async fn upload_object(
        &self,
        bucket: &str,
        path: &str,
        bytes: Bytes,
        opts: &UploadOptions,
    ) -> Result<String>;

    /// Public URL for an object path. Pure string construction, no network.
    fn public_url(&self, bucket: &str, path: &str) -> String;

    async fn remove_object(&self, bucket: &str, path: &str) -> Result<()>;

    // -- Realtime -----------------------------------------------------------

    /// Subscribe to insert events on the messages collection filtered by
    /// chat id. Drop the returned handle to unsubscribe.
    async fn subscribe_messages(&self, chat_id: Uuid) -> Result<MessageSubscription>;
}
