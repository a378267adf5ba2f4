use thiserror::Error;

/// Errors produced by the remote data gateway.
#[derive(Error, Debug)]
pub enum GatewayError {
    /// Transport-level HTTP failure (connect, TLS, body read).
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The backend answered with a non-success status code.
    #[error("Backend returned {code}: {message}")]
    Status { code: u16, message: String },

    /// Credential rejection from the auth endpoint.
    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    /// A row addressed by id does not exist.
    #[error("Record not found")]
    NotFound,

    /// A response body could not be decoded into the expected row shape.
    #[error("Decode error: {0}")]
    Decode(#[from] serde_json::Error),

    /// A uniqueness or constraint violation reported by the backend.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// The realtime channel was torn down by the transport.
    #[error("Subscription closed")]
    SubscriptionClosed,
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, GatewayError>;
