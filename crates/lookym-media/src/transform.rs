//! Derived delivery-URL construction.
//!
//! A transformation is encoded as a comma-joined directive segment inserted
//! between `upload/` and the public id, e.g.
//! `.../video/upload/q_auto,w_720/abc123.mp4`.  Everything here is
//! deterministic string templating; no network calls.

/// Options for a transformed video variant URL.
#[derive(Debug, Clone, Default)]
pub struct VideoTransform {
    pub width: Option<u32>,
    pub height: Option<u32>,
    /// Quality directive, e.g. `auto` or `70`.
    pub quality: Option<String>,
    /// Target container/extension, e.g. `mp4`. Defaults to `mp4`.
    pub format: Option<String>,
}

/// Options for a thumbnail extracted from a video frame.
#[derive(Debug, Clone)]
pub struct ThumbnailTransform {
    pub width: Option<u32>,
    pub height: Option<u32>,
    /// Image extension, e.g. `jpg`. Defaults to `jpg`.
    pub format: Option<String>,
    /// Seek offset of the extracted frame, in seconds.
    pub seek_seconds: f32,
}

impl Default for ThumbnailTransform {
    fn default() -> Self {
        Self {
            width: None,
            height: None,
            format: None,
            seek_seconds: 0.0,
        }
    }
}

impl VideoTransform {
    pub(crate) fn directives(&self) -> String {
        let mut parts = Vec::new();
        if let Some(quality) = &self.quality {
            parts.push(format!("q_{quality}"));
        }
        if let Some(width) = self.width {
            parts.push(format!("w_{width}"));
        }
        if let Some(height) = self.height {
            parts.push(format!("h_{height}"));
        }
        parts.join(",")
    }

    pub(crate) fn extension(&self) -> &str {
        self.format.as_deref().unwrap_or("mp4")
    }
}

impl ThumbnailTransform {
    pub(crate) fn directives(&self) -> String {
        let mut parts = vec![format!("so_{}", trim_seconds(self.seek_seconds))];
        if let Some(width) = self.width {
            parts.push(format!("w_{width}"));
        }
        if let Some(height) = self.height {
            parts.push(format!("h_{height}"));
        }
        parts.push("c_fill".to_string());
        parts.join(",")
    }

    pub(crate) fn extension(&self) -> &str {
        self.format.as_deref().unwrap_or("jpg")
    }
}

/// `1.0` renders as `so_1`, `1.5` as `so_1.5`.
fn trim_seconds(seconds: f32) -> String {
    if seconds.fract() == 0.0 {
        format!("{}", seconds as u32)
    } else {
        format!("{seconds}")
    }
}
