//! # lookym-store
//!
//! Local snapshot persistence for the LOOKYM client.
//!
//! Each state container persists a JSON-serializable partial snapshot of
//! itself under its own named key (`auth-storage`, `video-store`, ...).
//! The crate exposes a synchronous [`Database`] handle that wraps a
//! `rusqlite::Connection` and provides typed load/save helpers over a
//! single key-value snapshot table.

pub mod database;
pub mod keys;
pub mod migrations;
pub mod snapshots;

mod error;

pub use database::Database;
pub use error::StoreError;
