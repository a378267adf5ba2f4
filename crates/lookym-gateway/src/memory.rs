//! [`MemoryGateway`]: a complete in-process backend.
//!
//! Backs every trait operation with plain in-memory tables so the stores
//! can be exercised without a network.  Mirrors the hosted backend's
//! observable behavior where the contract depends on it: the profile
//! provisioning trigger on sign-up, atomic like counters with a zero
//! floor, idempotent follow-edge upserts, and per-chat realtime feeds.
//!
//! Failure injection: [`MemoryGateway::fail_next`] arms a one-shot error
//! for a named operation so error paths can be tested deterministically.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::{broadcast, mpsc};
use uuid::Uuid;

use lookym_shared::UserRole;

use crate::error::{GatewayError, Result};
use crate::remote::{AuthSession, MessageSubscription, RemoteGateway, UploadOptions};
use crate::rows::{
    AuthorRow, ChatRow, CommentRow, MessageRow, NewMessageRow, NewNotificationRow, NewVideoRow,
    NotificationRow, ProfilePatch, UserRow, VideoRow,
};

struct Identity {
    email: String,
    password: String,
}

struct StoredVideo {
    id: Uuid,
    author_id: Uuid,
    video_url: String,
    thumbnail_url: String,
    caption: String,
    hashtags: Vec<String>,
    likes: i64,
    mime_type: Option<String>,
    product_tags: Vec<String>,
    created_at: DateTime<Utc>,
}

struct StoredComment {
    id: Uuid,
    video_id: Uuid,
    author_id: Uuid,
    text: String,
    likes: i64,
    created_at: DateTime<Utc>,
}

struct StoredNotification {
    id: Uuid,
    user_id: Uuid,
    kind: lookym_shared::NotificationKind,
    content: String,
    related_id: Option<Uuid>,
    related_type: Option<lookym_shared::RelatedKind>,
    actor_id: Option<Uuid>,
    read: bool,
    created_at: DateTime<Utc>,
}

#[derive(Default)]
struct Tables {
    identities: HashMap<Uuid, Identity>,
    profiles: HashMap<Uuid, UserRow>,
    videos: HashMap<Uuid, StoredVideo>,
    comments: Vec<StoredComment>,
    video_likes: HashSet<(Uuid, Uuid)>,
    saved_videos: HashSet<(Uuid, Uuid)>,
    follows: HashSet<(Uuid, Uuid)>,
    notifications: Vec<StoredNotification>,
    chats: HashMap<Uuid, Vec<Uuid>>,
    messages: Vec<MessageRow>,
    objects: HashMap<(String, String), Bytes>,
    session: Option<AuthSession>,
    fail_ops: HashSet<String>,
    chat_feeds: HashMap<Uuid, broadcast::Sender<MessageRow>>,
    last_ts: Option<DateTime<Utc>>,
}

/// In-process backend for tests and offline development.
pub struct MemoryGateway {
    tables: Mutex<Tables>,
    provision_profiles: AtomicBool,
}

impl Default for MemoryGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryGateway {
    pub fn new() -> Self {
        Self {
            tables: Mutex::new(Tables::default()),
            provision_profiles: AtomicBool::new(true),
        }
    }

    /// A gateway whose sign-up trigger does NOT mirror the identity into a
    /// profile row, for exercising provisioning-defect paths.
    pub fn without_profile_provisioning() -> Self {
        let gateway = Self::new();
        gateway.provision_profiles.store(false, Ordering::SeqCst);
        gateway
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Arm a one-shot injected failure for the named operation (the trait
    /// method name, e.g. `"sign_out"`). The next call to that operation
    /// fails with a backend 500.
    pub fn fail_next(&self, op: &str) {
        self.tables().fail_ops.insert(op.to_string());
    }

    fn take_failure(&self, op: &str) -> Result<()> {
        if self.tables().fail_ops.remove(op) {
            return Err(GatewayError::Status {
                code: 500,
                message: format!("injected failure: {op}"),
            });
        }
        Ok(())
    }

    /// Register an identity and (when provisioning is on) its profile row,
    /// bypassing password/session plumbing. Returns the user id.
    pub fn seed_account(
        &self,
        email: &str,
        password: &str,
        username: &str,
        role: UserRole,
    ) -> Uuid {
        let mut tables = self.tables();
        let id = Uuid::new_v4();
        let created_at = next_timestamp(&mut tables);
        tables.identities.insert(
            id,
            Identity {
                email: email.to_string(),
                password: password.to_string(),
            },
        );
        if self.provision_profiles.load(Ordering::SeqCst) {
            tables.profiles.insert(
                id,
                UserRow {
                    id,
                    email: email.to_string(),
                    username: username.to_string(),
                    display_name: None,
                    avatar_url: None,
                    bio: None,
                    role,
                    verified: false,
                    category: None,
                    location: None,
                    created_at,
                },
            );
        }
        id
    }

    // -- Inspection helpers for tests --------------------------------------

    pub fn follow_edge_count(&self) -> usize {
        self.tables().follows.len()
    }

    pub fn notification_count(&self) -> usize {
        self.tables().notifications.len()
    }

    pub fn likes_counter(&self, video_id: Uuid) -> Option<i64> {
        self.tables().videos.get(&video_id).map(|v| v.likes)
    }

    pub fn save_edge_count(&self) -> usize {
        self.tables().saved_videos.len()
    }

    pub fn stored_object(&self, bucket: &str, path: &str) -> Option<Bytes> {
        self.tables()
            .objects
            .get(&(bucket.to_string(), path.to_string()))
            .cloned()
    }
}

/// Strictly monotonic timestamps so row ordering is deterministic even when
/// two inserts land within the clock's resolution.
fn next_timestamp(tables: &mut Tables) -> DateTime<Utc> {
    let mut now = Utc::now();
    if let Some(last) = tables.last_ts {
        if now <= last {
            now = last + Duration::microseconds(1);
        }
    }
    tables.last_ts = Some(now);
    now
}

fn author_row(tables: &Tables, user_id: Uuid) -> Result<AuthorRow> {
    let profile = tables.profiles.get(&user_id).ok_or(GatewayError::NotFound)?;
    Ok(AuthorRow {
        id: profile.id,
        username: profile.username.clone(),
        avatar_url: profile.avatar_url.clone(),
        verified: profile.verified,
        role: profile.role,
    })
}

fn video_row(tables: &Tables, video: &StoredVideo) -> Result<VideoRow> {
    let mut comments: Vec<CommentRow> = tables
        .comments
        .iter()
        .filter(|c| c.video_id == video.id)
        .map(|c| comment_row(tables, c))
        .collect::<Result<_>>()?;
    comments.sort_by_key(|c| c.created_at);

    Ok(VideoRow {
        id: video.id,
        author: author_row(tables, video.author_id)?,
        video_url: video.video_url.clone(),
        thumbnail_url: video.thumbnail_url.clone(),
        caption: video.caption.clone(),
        hashtags: video.hashtags.clone(),
        likes: video.likes,
        comments,
        created_at: video.created_at,
        mime_type: video.mime_type.clone(),
        product_tags: video.product_tags.clone(),
    })
}

fn comment_row(tables: &Tables, comment: &StoredComment) -> Result<CommentRow> {
    Ok(CommentRow {
        id: comment.id,
        video_id: comment.video_id,
        author: author_row(tables, comment.author_id)?,
        text: comment.text.clone(),
        likes: comment.likes,
        created_at: comment.created_at,
    })
}

fn notification_row(tables: &Tables, n: &StoredNotification) -> NotificationRow {
    NotificationRow {
        id: n.id,
        user_id: n.user_id,
        kind: n.kind,
        content: n.content.clone(),
        related_id: n.related_id,
        related_type: n.related_type,
        actor: n.actor_id.and_then(|id| author_row(tables, id).ok()),
        read: n.read,
        created_at: n.created_at,
    }
}

fn chat_row(tables: &Tables, chat_id: Uuid, participant_ids: &[Uuid]) -> Result<ChatRow> {
    let participants = participant_ids
        .iter()
        .map(|id| author_row(tables, *id))
        .collect::<Result<_>>()?;
    let mut messages: Vec<MessageRow> = tables
        .messages
        .iter()
        .filter(|m| m.chat_id == chat_id)
        .cloned()
        .collect();
    messages.sort_by_key(|m| m.created_at);

    Ok(ChatRow {
        id: chat_id,
        participants,
        messages,
    })
}

#[async_trait]
impl RemoteGateway for MemoryGateway {
    // -- Auth ---------------------------------------------------------------

    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        username: &str,
        role: UserRole,
    ) -> Result<Uuid> {
        self.take_failure("sign_up")?;

        let mut tables = self.tables();
        if tables.identities.values().any(|i| i.email == email) {
            return Err(GatewayError::Conflict(format!(
                "email already registered: {email}"
            )));
        }
        drop(tables);

        Ok(self.seed_account(email, password, username, role))
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<AuthSession> {
        self.take_failure("sign_in")?;

        let mut tables = self.tables();
        let found = tables
            .identities
            .iter()
            .find(|(_, i)| i.email == email && i.password == password)
            .map(|(id, i)| (*id, i.email.clone()));

        let Some((user_id, email)) = found else {
            return Err(GatewayError::AuthFailed("invalid credentials".to_string()));
        };

        let session = AuthSession {
            user_id,
            email,
            access_token: Uuid::new_v4().to_string(),
        };
        tables.session = Some(session.clone());
        Ok(session)
    }

    async fn sign_out(&self) -> Result<()> {
        // The token is dropped even when the remote half of the call fails.
        self.tables().session = None;
        self.take_failure("sign_out")?;
        Ok(())
    }

    async fn current_session(&self) -> Result<Option<AuthSession>> {
        self.take_failure("current_session")?;
        Ok(self.tables().session.clone())
    }

    // -- Profiles -----------------------------------------------------------

    async fn fetch_profile(&self, user_id: Uuid) -> Result<Option<UserRow>> {
        self.take_failure("fetch_profile")?;
        Ok(self.tables().profiles.get(&user_id).cloned())
    }

    async fn update_profile(&self, user_id: Uuid, patch: &ProfilePatch) -> Result<UserRow> {
        self.take_failure("update_profile")?;

        let mut tables = self.tables();
        let profile = tables
            .profiles
            .get_mut(&user_id)
            .ok_or(GatewayError::NotFound)?;

        if let Some(display_name) = &patch.display_name {
            profile.display_name = Some(display_name.clone());
        }
        if let Some(bio) = &patch.bio {
            profile.bio = Some(bio.clone());
        }
        if let Some(avatar_url) = &patch.avatar_url {
            profile.avatar_url = Some(avatar_url.clone());
        }
        Ok(profile.clone())
    }

    // -- Videos -------------------------------------------------------------

    async fn fetch_videos(&self, page: u32, limit: u32) -> Result<Vec<VideoRow>> {
        self.take_failure("fetch_videos")?;

        let tables = self.tables();
        let mut videos: Vec<&StoredVideo> = tables.videos.values().collect();
        videos.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let offset = page.saturating_sub(1) as usize * limit as usize;
        videos
            .into_iter()
            .skip(offset)
            .take(limit as usize)
            .map(|v| video_row(&tables, v))
            .collect()
    }

    async fn fetch_videos_by_user(&self, user_id: Uuid) -> Result<Vec<VideoRow>> {
        self.take_failure("fetch_videos_by_user")?;

        let tables = self.tables();
        let mut videos: Vec<&StoredVideo> = tables
            .videos
            .values()
            .filter(|v| v.author_id == user_id)
            .collect();
        videos.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        videos.into_iter().map(|v| video_row(&tables, v)).collect()
    }

    async fn fetch_video(&self, id: Uuid) -> Result<Option<VideoRow>> {
        self.take_failure("fetch_video")?;

        let tables = self.tables();
        tables
            .videos
            .get(&id)
            .map(|v| video_row(&tables, v))
            .transpose()
    }

    async fn insert_video(&self, new: &NewVideoRow) -> Result<VideoRow> {
        self.take_failure("insert_video")?;

        let mut tables = self.tables();
        let created_at = next_timestamp(&mut tables);
        let video = StoredVideo {
            id: Uuid::new_v4(),
            author_id: new.author_id,
            video_url: new.video_url.clone(),
            thumbnail_url: new.thumbnail_url.clone(),
            caption: new.caption.clone(),
            hashtags: new.hashtags.clone(),
            likes: 0,
            mime_type: new.mime_type.clone(),
            product_tags: new.product_tags.clone(),
            created_at,
        };
        let row = video_row(&tables, &video)?;
        tables.videos.insert(video.id, video);
        Ok(row)
    }

    // -- Likes --------------------------------------------------------------

    async fn increment_likes(&self, video_id: Uuid) -> Result<()> {
        self.take_failure("increment_likes")?;

        let mut tables = self.tables();
        let video = tables
            .videos
            .get_mut(&video_id)
            .ok_or(GatewayError::NotFound)?;
        video.likes += 1;
        Ok(())
    }

    async fn decrement_likes(&self, video_id: Uuid) -> Result<()> {
        self.take_failure("decrement_likes")?;

        let mut tables = self.tables();
        let video = tables
            .videos
            .get_mut(&video_id)
            .ok_or(GatewayError::NotFound)?;
        video.likes = (video.likes - 1).max(0);
        Ok(())
    }

    async fn insert_like(&self, video_id: Uuid, user_id: Uuid) -> Result<()> {
        self.take_failure("insert_like")?;
        self.tables().video_likes.insert((video_id, user_id));
        Ok(())
    }

    async fn delete_like(&self, video_id: Uuid, user_id: Uuid) -> Result<()> {
        self.take_failure("delete_like")?;
        self.tables().video_likes.remove(&(video_id, user_id));
        Ok(())
    }

    async fn fetch_liked_video_ids(&self, user_id: Uuid) -> Result<Vec<Uuid>> {
        self.take_failure("fetch_liked_video_ids")?;
        Ok(self
            .tables()
            .video_likes
            .iter()
            .filter(|(_, u)| *u == user_id)
            .map(|(v, _)| *v)
            .collect())
    }

    // -- Saves --------------------------------------------------------------

    async fn insert_save(&self, video_id: Uuid, user_id: Uuid) -> Result<()> {
        self.take_failure("insert_save")?;
        self.tables().saved_videos.insert((video_id, user_id));
        Ok(())
    }

    async fn delete_save(&self, video_id: Uuid, user_id: Uuid) -> Result<()> {
        self.take_failure("delete_save")?;
        self.tables().saved_videos.remove(&(video_id, user_id));
        Ok(())
    }

    async fn fetch_saved_video_ids(&self, user_id: Uuid) -> Result<Vec<Uuid>> {
        self.take_failure("fetch_saved_video_ids")?;
        Ok(self
            .tables()
            .saved_videos
            .iter()
            .filter(|(_, u)| *u == user_id)
            .map(|(v, _)| *v)
            .collect())
    }

    // -- Comments -----------------------------------------------------------

    async fn insert_comment(
        &self,
        video_id: Uuid,
        user_id: Uuid,
        text: &str,
    ) -> Result<CommentRow> {
        self.take_failure("insert_comment")?;

        let mut tables = self.tables();
        if !tables.videos.contains_key(&video_id) {
            return Err(GatewayError::NotFound);
        }
        let created_at = next_timestamp(&mut tables);
        let comment = StoredComment {
            id: Uuid::new_v4(),
            video_id,
            author_id: user_id,
            text: text.to_string(),
            likes: 0,
            created_at,
        };
        let row = comment_row(&tables, &comment)?;
        tables.comments.push(comment);
        Ok(row)
    }

    // -- Follows ------------------------------------------------------------

    async fn insert_follow(&self, follower: Uuid, following: Uuid) -> Result<()> {
        self.take_failure("insert_follow")?;
        self.tables().follows.insert((follower, following));
        Ok(())
    }

    async fn delete_follow(&self, follower: Uuid, following: Uuid) -> Result<()> {
        self.take_failure("delete_follow")?;
        self.tables().follows.remove(&(follower, following));
        Ok(())
    }

    async fn fetch_follower_ids(&self, user_id: Uuid) -> Result<Vec<Uuid>> {
        self.take_failure("fetch_follower_ids")?;
        Ok(self
            .tables()
            .follows
            .iter()
            .filter(|(_, following)| *following == user_id)
            .map(|(follower, _)| *follower)
            .collect())
    }

    async fn fetch_following_ids(&self, user_id: Uuid) -> Result<Vec<Uuid>> {
        self.take_failure("fetch_following_ids")?;
        Ok(self
            .tables()
            .follows
            .iter()
            .filter(|(follower, _)| *follower == user_id)
            .map(|(_, following)| *following)
            .collect())
    }

    async fn fetch_users_by_ids(&self, ids: &[Uuid]) -> Result<Vec<UserRow>> {
        self.take_failure("fetch_users_by_ids")?;
        let tables = self.tables();
        Ok(ids
            .iter()
            .filter_map(|id| tables.profiles.get(id).cloned())
            .collect())
    }

    // -- Notifications ------------------------------------------------------

    async fn insert_notification(&self, new: &NewNotificationRow) -> Result<NotificationRow> {
        self.take_failure("insert_notification")?;

        let mut tables = self.tables();
        let created_at = next_timestamp(&mut tables);
        let stored = StoredNotification {
            id: Uuid::new_v4(),
            user_id: new.user_id,
            kind: new.kind,
            content: new.content.clone(),
            related_id: new.related_id,
            related_type: new.related_type,
            actor_id: new.actor_id,
            read: false,
            created_at,
        };
        let row = notification_row(&tables, &stored);
        tables.notifications.push(stored);
        Ok(row)
    }

    async fn fetch_notifications(&self, user_id: Uuid) -> Result<Vec<NotificationRow>> {
        self.take_failure("fetch_notifications")?;

        let tables = self.tables();
        let mut rows: Vec<NotificationRow> = tables
            .notifications
            .iter()
            .filter(|n| n.user_id == user_id)
            .map(|n| notification_row(&tables, n))
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rows)
    }

    async fn mark_notification_read(&self, id: Uuid) -> Result<()> {
        self.take_failure("mark_notification_read")?;

        let mut tables = self.tables();
        let n = tables
            .notifications
            .iter_mut()
            .find(|n| n.id == id)
            .ok_or(GatewayError::NotFound)?;
        n.read = true;
        Ok(())
    }

    async fn mark_all_notifications_read(&self, user_id: Uuid) -> Result<()> {
        self.take_failure("mark_all_notifications_read")?;

        for n in self
            .tables()
            .notifications
            .iter_mut()
            .filter(|n| n.user_id == user_id)
        {
            n.read = true;
        }
        Ok(())
    }

    // -- Chats --------------------------------------------------------------

    async fn fetch_chats(&self, user_id: Uuid) -> Result<Vec<ChatRow>> {
        self.take_failure("fetch_chats")?;

        let tables = self.tables();
        let mut rows = Vec::new();
        for (chat_id, participants) in &tables.chats {
            if participants.contains(&user_id) {
                rows.push(chat_row(&tables, *chat_id, participants)?);
            }
        }
        Ok(rows)
    }

    async fn insert_chat(&self, participant_ids: &[Uuid]) -> Result<ChatRow> {
        self.take_failure("insert_chat")?;

        let mut tables = self.tables();
        let chat_id = Uuid::new_v4();
        tables.chats.insert(chat_id, participant_ids.to_vec());
        chat_row(&tables, chat_id, participant_ids)
    }

    async fn insert_message(&self, new: &NewMessageRow) -> Result<MessageRow> {
        self.take_failure("insert_message")?;

        let mut tables = self.tables();
        if !tables.chats.contains_key(&new.chat_id) {
            return Err(GatewayError::NotFound);
        }
        let created_at = next_timestamp(&mut tables);
        let row = MessageRow {
            id: Uuid::new_v4(),
            chat_id: new.chat_id,
            sender_id: new.sender_id,
            text: new.text.clone(),
            read: false,
            created_at,
        };
        tables.messages.push(row.clone());

        if let Some(feed) = tables.chat_feeds.get(&new.chat_id) {
            // No subscribers is fine.
            let _ = feed.send(row.clone());
        }
        Ok(row)
    }

    async fn mark_messages_read(
        &self,
        chat_id: Uuid,
        reader_id: Uuid,
        ids: Option<&[Uuid]>,
    ) -> Result<()> {
        self.take_failure("mark_messages_read")?;

        for m in self.tables().messages.iter_mut().filter(|m| {
            m.chat_id == chat_id
                && m.sender_id != reader_id
                && !m.read
                && ids.map_or(true, |ids| ids.contains(&m.id))
        }) {
            m.read = true;
        }
        Ok(())
    }

    // -- Storage ------------------------------------------------------------

    async fn upload_object(
        &self,
        bucket: &str,
        path: &str,
        bytes: Bytes,
        opts: &UploadOptions,
    ) -> Result<String> {
        self.take_failure("upload_object")?;

        let mut tables = self.tables();
        let key = (bucket.to_string(), path.to_string());
        if !opts.upsert && tables.objects.contains_key(&key) {
            return Err(GatewayError::Conflict(format!(
                "object exists: {bucket}/{path}"
            )));
        }
        tables.objects.insert(key, bytes);
        Ok(path.to_string())
    }

    fn public_url(&self, bucket: &str, path: &str) -> String {
        format!("memory://{bucket}/{path}")
    }

    async fn remove_object(&self, bucket: &str, path: &str) -> Result<()> {
        self.take_failure("remove_object")?;

        self.tables()
            .objects
            .remove(&(bucket.to_string(), path.to_string()))
            .map(|_| ())
            .ok_or(GatewayError::NotFound)
    }

    // -- Realtime -----------------------------------------------------------

    async fn subscribe_messages(&self, chat_id: Uuid) -> Result<MessageSubscription> {
        self.take_failure("subscribe_messages")?;

        let mut feed_rx = {
            let mut tables = self.tables();
            tables
                .chat_feeds
                .entry(chat_id)
                .or_insert_with(|| broadcast::channel(64).0)
                .subscribe()
        };

        let (tx, rx) = mpsc::channel(64);
        let task = tokio::spawn(async move {
            loop {
                match feed_rx.recv().await {
                    Ok(row) => {
                        if tx.send(row).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(chat = %chat_id, skipped, "realtime subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        Ok(MessageSubscription::new(rx, Some(task)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rows::NewMessageRow;

    fn business(gateway: &MemoryGateway) -> Uuid {
        gateway.seed_account("shop@lookym.app", "pw", "shop", UserRole::Business)
    }

    #[tokio::test]
    async fn sign_up_provisions_profile() {
        let gateway = MemoryGateway::new();
        let id = gateway
            .sign_up("a@b.c", "pw", "alice", UserRole::User)
            .await
            .unwrap();

        let profile = gateway.fetch_profile(id).await.unwrap().unwrap();
        assert_eq!(profile.username, "alice");
        // Sign-up never opens a session (email confirmation gate).
        assert!(gateway.current_session().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn sign_up_without_provisioning_leaves_no_profile() {
        let gateway = MemoryGateway::without_profile_provisioning();
        let id = gateway
            .sign_up("a@b.c", "pw", "alice", UserRole::User)
            .await
            .unwrap();
        assert!(gateway.fetch_profile(id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_email_conflicts() {
        let gateway = MemoryGateway::new();
        gateway
            .sign_up("a@b.c", "pw", "alice", UserRole::User)
            .await
            .unwrap();
        let err = gateway
            .sign_up("a@b.c", "pw2", "alice2", UserRole::User)
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Conflict(_)));
    }

    #[tokio::test]
    async fn like_counter_floors_at_zero() {
        let gateway = MemoryGateway::new();
        let author = business(&gateway);
        let video = gateway
            .insert_video(&NewVideoRow {
                author_id: author,
                video_url: "v".to_string(),
                thumbnail_url: "t".to_string(),
                caption: String::new(),
                hashtags: vec![],
                mime_type: None,
                product_tags: vec![],
            })
            .await
            .unwrap();

        gateway.decrement_likes(video.id).await.unwrap();
        assert_eq!(gateway.likes_counter(video.id), Some(0));

        gateway.increment_likes(video.id).await.unwrap();
        assert_eq!(gateway.likes_counter(video.id), Some(1));
    }

    #[tokio::test]
    async fn follow_edge_is_idempotent() {
        let gateway = MemoryGateway::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        gateway.insert_follow(a, b).await.unwrap();
        gateway.insert_follow(a, b).await.unwrap();
        assert_eq!(gateway.follow_edge_count(), 1);
    }

    #[tokio::test]
    async fn subscription_delivers_inserted_messages() {
        let gateway = MemoryGateway::new();
        let alice = gateway.seed_account("a@b.c", "pw", "alice", UserRole::User);
        let shop = business(&gateway);
        let chat = gateway.insert_chat(&[alice, shop]).await.unwrap();

        let mut sub = gateway.subscribe_messages(chat.id).await.unwrap();
        let sent = gateway
            .insert_message(&NewMessageRow {
                chat_id: chat.id,
                sender_id: alice,
                text: "any stock left?".to_string(),
            })
            .await
            .unwrap();

        let received = sub.recv().await.unwrap();
        assert_eq!(received.id, sent.id);
    }

    #[tokio::test]
    async fn injected_failure_fires_once() {
        let gateway = MemoryGateway::new();
        gateway.fail_next("insert_follow");

        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        assert!(gateway.insert_follow(a, b).await.is_err());
        assert!(gateway.insert_follow(a, b).await.is_ok());
    }

    #[tokio::test]
    async fn upload_without_upsert_conflicts() {
        let gateway = MemoryGateway::new();
        let opts = UploadOptions::default();
        gateway
            .upload_object("avatars", "u/a.png", Bytes::from_static(b"x"), &opts)
            .await
            .unwrap();
        let err = gateway
            .upload_object("avatars", "u/a.png", Bytes::from_static(b"y"), &opts)
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Conflict(_)));
    }
}
