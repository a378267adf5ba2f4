//! Gateway configuration loaded from environment variables.
//!
//! All settings have development-friendly defaults so the client can start
//! with zero configuration against a local backend.

use std::time::Duration;

/// Remote backend configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Base URL of the hosted backend (REST, auth and storage live under it).
    /// Env: `LOOKYM_API_URL`
    /// Default: `http://localhost:54321`
    pub api_url: String,

    /// Public (anon) API key sent with every request.
    /// Env: `LOOKYM_API_KEY`
    /// Default: empty (local development backends accept it).
    pub api_key: String,

    /// Storage bucket for avatar uploads.
    /// Env: `LOOKYM_STORAGE_BUCKET`
    /// Default: `avatars`
    pub storage_bucket: String,

    /// Poll interval for the realtime message subscription.
    /// Env: `LOOKYM_REALTIME_POLL_MS`
    /// Default: 2000 ms
    pub realtime_poll: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:54321".to_string(),
            api_key: String::new(),
            storage_bucket: "avatars".to_string(),
            realtime_poll: Duration::from_millis(2000),
        }
    }
}

impl GatewayConfig {
    /// Load configuration from environment variables, falling back to
    /// defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(url) = std::env::var("LOOKYM_API_URL") {
            config.api_url = url.trim_end_matches('/').to_string();
        }

        if let Ok(key) = std::env::var("LOOKYM_API_KEY") {
            config.api_key = key;
        }

        if let Ok(bucket) = std::env::var("LOOKYM_STORAGE_BUCKET") {
            if !bucket.is_empty() {
                config.storage_bucket = bucket;
            }
        }

        if let Ok(ms) = std::env::var("LOOKYM_REALTIME_POLL_MS") {
            match ms.parse::<u64>() {
                Ok(ms) if ms > 0 => config.realtime_poll = Duration::from_millis(ms),
                _ => {
                    tracing::warn!(
                        value = %ms,
                        "Invalid LOOKYM_REALTIME_POLL_MS, using default"
                    );
                }
            }
        }

        config
    }
}
