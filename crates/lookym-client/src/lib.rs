//! # lookym-client
//!
//! The LOOKYM data synchronization layer: five state containers (session,
//! content, relations, conversations, notifications) that proxy CRUD
//! operations to the remote data gateway, apply local mutations on
//! success, and persist whitelisted partial snapshots of themselves to the
//! local store.
//!
//! The presentation layer constructs an [`App`] at startup, calls store
//! actions, renders store state, and observes [`events::StoreEvent`]s.
//! No store reads module-level globals; every dependency is injected at
//! construction so tests can swap in `MemoryGateway` and an in-memory
//! snapshot database.

pub mod app;
pub mod chat;
pub mod content;
pub mod events;
pub mod notifications;
pub mod relations;
pub mod session;

mod error;

pub use app::{App, AppConfig};
pub use chat::{merge_incoming, ChatState, ConversationStore};
pub use content::{ContentState, ContentStore};
pub use error::SyncError;
pub use events::{EventBus, StoreEvent};
pub use notifications::{NotificationState, NotificationStore};
pub use relations::{RelationState, RelationshipStore};
pub use session::{ProfileUpdate, SessionManager, SessionState};

use tracing_subscriber::{fmt, EnvFilter};

/// Install the global tracing subscriber with the client's default filter.
///
/// Call once at process start; subsequent calls are ignored.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("lookym_client=debug,lookym_gateway=debug,lookym_store=info,lookym_media=info,warn")
    });

    let _ = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .try_init();
}
