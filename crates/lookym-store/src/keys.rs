//! Named keys under which each state container persists its snapshot.
//!
//! Keys are stable across releases; renaming one orphans the previously
//! persisted snapshot.

pub const AUTH_STORAGE: &str = "auth-storage";
pub const VIDEO_STORE: &str = "video-store";
pub const CHAT_STORAGE: &str = "chat-storage";
pub const NOTIFICATION_STORAGE: &str = "notification-storage";
