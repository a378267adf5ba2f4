//! Domain model structs for the LOOKYM client.
//!
//! These are the client-side entities, already mapped out of their wire
//! shapes (see `lookym-gateway::rows` for the row adapters).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// User
// ---------------------------------------------------------------------------

/// Account role. Business accounts may upload videos and tag products.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    User,
    Business,
}

impl UserRole {
    pub fn is_business(self) -> bool {
        matches!(self, UserRole::Business)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            UserRole::User => "user",
            UserRole::Business => "business",
        }
    }
}

/// A full profile record for the signed-in user or a queried account.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub username: String,
    /// Optional human-readable display name shown above the username.
    pub display_name: Option<String>,
    /// Public URL of the avatar image, if one has been uploaded.
    pub avatar: Option<String>,
    pub bio: Option<String>,
    pub role: UserRole,
    pub verified: bool,
    /// Business-only: storefront category (e.g. "fashion").
    pub category: Option<String>,
    /// Business-only: free-form location string.
    pub location: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl User {
    /// The denormalized author snapshot embedded in videos, comments and
    /// chat participant lists.
    pub fn snapshot(&self) -> UserSnapshot {
        UserSnapshot {
            id: self.id,
            username: self.username.clone(),
            avatar: self.avatar.clone(),
            verified: self.verified,
            role: self.role,
        }
    }
}

/// Denormalized subset of a [`User`] carried inside other entities.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserSnapshot {
    pub id: Uuid,
    pub username: String,
    pub avatar: Option<String>,
    pub verified: bool,
    pub role: UserRole,
}

// ---------------------------------------------------------------------------
// Video
// ---------------------------------------------------------------------------

/// A catalog entry: one uploaded short video with its engagement data.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Video {
    pub id: Uuid,
    pub author: UserSnapshot,
    pub video_url: String,
    pub thumbnail_url: String,
    pub caption: String,
    /// Insertion order is display order.
    pub hashtags: Vec<String>,
    pub likes: u64,
    /// Ordered by creation time, append-only in this layer.
    pub comments: Vec<Comment>,
    pub created_at: DateTime<Utc>,
    pub mime_type: Option<String>,
    /// Product ids tagged on the video (business uploads).
    pub product_tags: Vec<String>,
}

/// A comment on a video. Append-only per video.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Comment {
    pub id: Uuid,
    pub author: UserSnapshot,
    pub text: String,
    pub likes: u64,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Chat
// ---------------------------------------------------------------------------

/// A two-party message thread.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Chat {
    pub id: Uuid,
    pub participants: Vec<UserSnapshot>,
    /// Ordered by timestamp ascending.
    pub messages: Vec<Message>,
    /// Always the maximum-timestamp element of `messages`.
    pub last_message: Option<Message>,
    /// Unread inbound messages for the current user.
    pub unread_count: u64,
}

impl Chat {
    /// Restore the `last_message` invariant after any message mutation.
    pub fn touch_last_message(&mut self) {
        self.last_message = self
            .messages
            .iter()
            .max_by_key(|m| m.created_at)
            .cloned();
    }

    /// Whether `user_id` is one of the chat participants.
    pub fn has_participant(&self, user_id: Uuid) -> bool {
        self.participants.iter().any(|p| p.id == user_id)
    }
}

/// A single chat message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub id: Uuid,
    pub chat_id: Uuid,
    pub sender_id: Uuid,
    pub text: String,
    pub created_at: DateTime<Utc>,
    pub read: bool,
}

// ---------------------------------------------------------------------------
// Notification
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    NewFollower,
    VideoLike,
    NewComment,
    NewMessage,
}

/// What a notification points at, when it points at anything.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RelatedKind {
    Video,
    Comment,
    Chat,
    User,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RelatedEntity {
    pub id: Uuid,
    pub kind: RelatedKind,
}

/// An entry in a user's notification feed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Notification {
    pub id: Uuid,
    /// The user this notification is addressed to.
    pub user_id: Uuid,
    pub kind: NotificationKind,
    /// Human-readable body, composed by whoever created the notification.
    pub content: String,
    pub related: Option<RelatedEntity>,
    /// The user whose action triggered the notification.
    pub actor: Option<UserSnapshot>,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn snapshot(name: &str) -> UserSnapshot {
        UserSnapshot {
            id: Uuid::new_v4(),
            username: name.to_string(),
            avatar: None,
            verified: false,
            role: UserRole::User,
        }
    }

    fn message(chat_id: Uuid, secs: i64) -> Message {
        Message {
            id: Uuid::new_v4(),
            chat_id,
            sender_id: Uuid::new_v4(),
            text: "hi".to_string(),
            created_at: Utc.timestamp_opt(secs, 0).unwrap(),
            read: false,
        }
    }

    #[test]
    fn last_message_tracks_max_timestamp() {
        let chat_id = Uuid::new_v4();
        let mut chat = Chat {
            id: chat_id,
            participants: vec![snapshot("a"), snapshot("b")],
            messages: vec![message(chat_id, 30), message(chat_id, 10)],
            last_message: None,
            unread_count: 0,
        };

        chat.touch_last_message();
        assert_eq!(
            chat.last_message.as_ref().unwrap().created_at,
            Utc.timestamp_opt(30, 0).unwrap()
        );

        chat.messages.push(message(chat_id, 50));
        chat.touch_last_message();
        assert_eq!(
            chat.last_message.as_ref().unwrap().created_at,
            Utc.timestamp_opt(50, 0).unwrap()
        );
    }

    #[test]
    fn last_message_empty_thread() {
        let mut chat = Chat {
            id: Uuid::new_v4(),
            participants: vec![],
            messages: vec![],
            last_message: None,
            unread_count: 0,
        };
        chat.touch_last_message();
        assert!(chat.last_message.is_none());
    }

    #[test]
    fn role_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&UserRole::Business).unwrap(),
            "\"business\""
        );
        assert_eq!(
            serde_json::from_str::<UserRole>("\"user\"").unwrap(),
            UserRole::User
        );
        assert!(UserRole::Business.is_business());
    }
}
