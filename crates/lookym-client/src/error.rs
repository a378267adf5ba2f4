use thiserror::Error;
use uuid::Uuid;

use lookym_gateway::GatewayError;
use lookym_media::MediaError;
use lookym_store::StoreError;

/// Errors surfaced by the state containers.
#[derive(Error, Debug)]
pub enum SyncError {
    /// The action requires a signed-in user and none is present.
    #[error("Not authenticated")]
    NotAuthenticated,

    /// The action requires a role the current user does not have.
    #[error("Action requires the {required} role")]
    RoleNotAuthorized { required: &'static str },

    /// Invalid credentials at sign-in or sign-up.
    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    /// A backend read failed (network, permission or constraint violation
    /// -- not distinguished further at this layer).
    #[error("Remote read failed: {0}")]
    RemoteRead(#[source] GatewayError),

    /// A backend write failed.
    #[error("Remote write failed: {0}")]
    RemoteWrite(#[source] GatewayError),

    /// An authenticated identity has no matching profile row. Fatal to the
    /// session.
    #[error("No profile row for authenticated user {0}")]
    ProfileInconsistency(Uuid),

    /// Binary transfer to the media gateway failed.
    #[error("Media upload failed: {0}")]
    Upload(#[from] MediaError),

    /// Local snapshot storage failed on a path where it matters (opening
    /// the database; routine flushes are best-effort instead).
    #[error("Snapshot storage failed: {0}")]
    Storage(#[from] StoreError),

    /// The caller handed us something unusable before any remote call.
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, SyncError>;
