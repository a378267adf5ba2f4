//! # lookym-gateway
//!
//! The remote data gateway: everything the LOOKYM client knows about its
//! hosted backend lives behind the [`RemoteGateway`] trait -- auth
//! primitives, relational CRUD per collection, the atomic like-counter
//! RPCs, binary object storage and the realtime message subscription.
//!
//! Two implementations ship with the crate:
//!
//! - [`RestGateway`] talks to a PostgREST/GoTrue/Storage-style hosted
//!   backend over HTTPS.
//! - [`MemoryGateway`] is a complete in-process backend used by tests and
//!   offline development.
//!
//! Wire row shapes and their one-per-entity adapters into the domain
//! models live in [`rows`]; nothing outside that module renames backend
//! columns.

pub mod config;
pub mod memory;
pub mod remote;
pub mod rest;
pub mod rows;

mod error;

pub use config::GatewayConfig;
pub use error::GatewayError;
pub use memory::MemoryGateway;
pub use remote::{AuthSession, MessageSubscription, RemoteGateway, UploadOptions};
pub use rest::RestGateway;
