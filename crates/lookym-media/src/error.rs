use thiserror::Error;

/// Errors produced by the media gateway.
#[derive(Error, Debug)]
pub enum MediaError {
    /// The URI scheme is not one this layer can read (only device-local
    /// `file://`, bare paths and `data:` URIs are uploadable).
    #[error("Unsupported media URI: {0}")]
    UnsupportedUri(String),

    /// Reading the local file failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A `data:` URI carried invalid base64.
    #[error("Invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),

    /// Transport-level HTTP failure.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The media backend answered with a non-success status code.
    #[error("Media backend returned {code}: {message}")]
    Status { code: u16, message: String },

    /// The upload response could not be decoded.
    #[error("Decode error: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, MediaError>;
