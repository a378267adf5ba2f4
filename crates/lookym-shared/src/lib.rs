//! # lookym-shared
//!
//! Domain entities shared by every layer of the LOOKYM client: users,
//! videos, comments, chats, notifications and the follow graph.
//!
//! Every struct derives `Serialize` and `Deserialize` so it can be handed
//! directly to the UI layer or flushed into the local snapshot store.

pub mod models;

pub use models::*;
