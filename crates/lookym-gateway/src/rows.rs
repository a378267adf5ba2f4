//! Wire row shapes and their adapters into the domain models.
//!
//! The backend speaks snake_case column names that do not always match the
//! client-side field names (`avatar_url` vs `avatar`).  Every rename happens
//! exactly once, here; stores never touch raw rows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use lookym_shared::{
    Chat, Comment, Message, Notification, NotificationKind, RelatedEntity, RelatedKind, User,
    UserRole, UserSnapshot, Video,
};

// ---------------------------------------------------------------------------
// Users
// ---------------------------------------------------------------------------

/// A full row from the `users` collection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserRow {
    pub id: Uuid,
    pub email: String,
    pub username: String,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    pub bio: Option<String>,
    pub role: UserRole,
    #[serde(default)]
    pub verified: bool,
    pub category: Option<String>,
    pub location: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl UserRow {
    pub fn into_user(self) -> User {
        User {
            id: self.id,
            email: self.email,
            username: self.username,
            display_name: self.display_name,
            avatar: self.avatar_url,
            bio: self.bio,
            role: self.role,
            verified: self.verified,
            category: self.category,
            location: self.location,
            created_at: self.created_at,
        }
    }
}

/// The joined author subset embedded in video, comment and chat rows.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuthorRow {
    pub id: Uuid,
    pub username: String,
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub verified: bool,
    pub role: UserRole,
}

impl AuthorRow {
    pub fn into_snapshot(self) -> UserSnapshot {
        UserSnapshot {
            id: self.id,
            username: self.username,
            avatar: self.avatar_url,
            verified: self.verified,
            role: self.role,
        }
    }
}

/// Changed columns for a profile update.  `None` fields are left untouched
/// by the backend, so the patch carries only what the caller changed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProfilePatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

impl ProfilePatch {
    pub fn is_empty(&self) -> bool {
        self.display_name.is_none() && self.bio.is_none() && self.avatar_url.is_none()
    }
}

// ---------------------------------------------------------------------------
// Videos
// ---------------------------------------------------------------------------

/// A row from the `videos` collection with its author and comments joined.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VideoRow {
    pub id: Uuid,
    pub author: AuthorRow,
    pub video_url: String,
    pub thumbnail_url: String,
    pub caption: String,
    #[serde(default)]
    pub hashtags: Vec<String>,
    #[serde(default)]
    pub likes: i64,
    #[serde(default)]
    pub comments: Vec<CommentRow>,
    pub created_at: DateTime<Utc>,
    pub mime_type: Option<String>,
    #[serde(default)]
    pub product_tags: Vec<String>,
}

impl VideoRow {
    pub fn into_video(self) -> Video {
        let mut comments: Vec<Comment> = self
            .comments
            .into_iter()
            .map(CommentRow::into_comment)
            .collect();
        comments.sort_by_key(|c| c.created_at);

        Video {
            id: self.id,
            author: self.author.into_snapshot(),
            video_url: self.video_url,
            thumbnail_url: self.thumbnail_url,
            caption: self.caption,
            hashtags: self.hashtags,
            likes: self.likes.max(0) as u64,
            comments,
            created_at: self.created_at,
            mime_type: self.mime_type,
            product_tags: self.product_tags,
        }
    }
}

/// Insert payload for the `videos` collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewVideoRow {
    pub author_id: Uuid,
    pub video_url: String,
    pub thumbnail_url: String,
    pub caption: String,
    pub hashtags: Vec<String>,
    pub mime_type: Option<String>,
    pub product_tags: Vec<String>,
}

// ---------------------------------------------------------------------------
// Comments
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommentRow {
    pub id: Uuid,
    pub video_id: Uuid,
    pub author: AuthorRow,
    pub text: String,
    #[serde(default)]
    pub likes: i64,
    pub created_at: DateTime<Utc>,
}

impl CommentRow {
    pub fn into_comment(self) -> Comment {
        Comment {
            id: self.id,
            author: self.author.into_snapshot(),
            text: self.text,
            likes: self.likes.max(0) as u64,
            created_at: self.created_at,
        }
    }
}

// ---------------------------------------------------------------------------
// Chats
// ---------------------------------------------------------------------------

/// A row from the chat tables with participants and messages joined.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatRow {
    pub id: Uuid,
    pub participants: Vec<AuthorRow>,
    #[serde(default)]
    pub messages: Vec<MessageRow>,
}

impl ChatRow {
    /// Map into a [`Chat`] as seen by `viewer`: messages sorted by
    /// timestamp, `last_message` derived, `unread_count` counting inbound
    /// unread messages only.
    pub fn into_chat(self, viewer: Uuid) -> Chat {
        let mut messages: Vec<Message> = self
            .messages
            .into_iter()
            .map(MessageRow::into_message)
            .collect();
        messages.sort_by_key(|m| m.created_at);

        let unread_count = messages
            .iter()
            .filter(|m| m.sender_id != viewer && !m.read)
            .count() as u64;

        let mut chat = Chat {
            id: self.id,
            participants: self
                .participants
                .into_iter()
                .map(AuthorRow::into_snapshot)
                .collect(),
            messages,
            last_message: None,
            unread_count,
        };
        chat.touch_last_message();
        chat
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessageRow {
    pub id: Uuid,
    pub chat_id: Uuid,
    pub sender_id: Uuid,
    pub text: String,
    #[serde(default)]
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

impl MessageRow {
    pub fn into_message(self) -> Message {
        Message {
            id: self.id,
            chat_id: self.chat_id,
            sender_id: self.sender_id,
            text: self.text,
            created_at: self.created_at,
            read: self.read,
        }
    }
}

/// Insert payload for the `messages` collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewMessageRow {
    pub chat_id: Uuid,
    pub sender_id: Uuid,
    pub text: String,
}

// ---------------------------------------------------------------------------
// Notifications
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NotificationRow {
    pub id: Uuid,
    pub user_id: Uuid,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub content: String,
    pub related_id: Option<Uuid>,
    pub related_type: Option<RelatedKind>,
    pub actor: Option<AuthorRow>,
    #[serde(default)]
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

impl NotificationRow {
    pub fn into_notification(self) -> Notification {
        let related = match (self.related_id, self.related_type) {
            (Some(id), Some(kind)) => Some(RelatedEntity { id, kind }),
            _ => None,
        };
        Notification {
            id: self.id,
            user_id: self.user_id,
            kind: self.kind,
            content: self.content,
            related,
            actor: self.actor.map(AuthorRow::into_snapshot),
            read: self.read,
            created_at: self.created_at,
        }
    }
}

/// Insert payload for the `notifications` collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewNotificationRow {
    pub user_id: Uuid,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub content: String,
    pub related_id: Option<Uuid>,
    pub related_type: Option<RelatedKind>,
    pub actor_id: Option<Uuid>,
}
