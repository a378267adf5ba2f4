//! [`MemoryMedia`]: an in-process media backend for tests and offline
//! development.
//!
//! Uploads still read the local URI (so bad paths and unsupported schemes
//! fail exactly like the real gateway) but the bytes are kept in memory
//! and the returned URLs use a `memory-media://` CDN base.  Derived URLs
//! share the real gateway's templating.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use bytes::Bytes;
use uuid::Uuid;

use crate::error::{MediaError, Result};
use crate::gateway::{delivery_url, MediaAsset, MediaUpload, UploadRequest};
use crate::source::load_local_uri;
use crate::transform::{ThumbnailTransform, VideoTransform};

const MEMORY_CDN: &str = "memory-media://res";
const MEMORY_CLOUD: &str = "lookym";

#[derive(Default)]
struct Stored {
    assets: HashMap<String, Bytes>,
    fail_next: bool,
}

/// In-process stand-in for the hosted transcoder/CDN.
#[derive(Default)]
pub struct MemoryMedia {
    stored: Mutex<Stored>,
}

impl MemoryMedia {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Stored> {
        self.stored.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Arm a one-shot upload failure.
    pub fn fail_next_upload(&self) {
        self.lock().fail_next = true;
    }

    /// The uploaded bytes for a public id, if any.
    pub fn asset_bytes(&self, public_id: &str) -> Option<Bytes> {
        self.lock().assets.get(public_id).cloned()
    }

    pub fn asset_count(&self) -> usize {
        self.lock().assets.len()
    }
}

#[async_trait]
impl MediaUpload for MemoryMedia {
    async fn upload(&self, local_uri: &str, request: &UploadRequest) -> Result<MediaAsset> {
        let (bytes, _) = load_local_uri(local_uri).await?;

        let mut stored = self.lock();
        if stored.fail_next {
            stored.fail_next = false;
            return Err(MediaError::Status {
                code: 500,
                message: "injected upload failure".to_string(),
            });
        }

        let public_id = match &request.public_id {
            Some(id) => format!("{}/{id}", request.folder),
            None => format!("{}/{}", request.folder, Uuid::new_v4()),
        };
        let secure_url = delivery_url(
            MEMORY_CDN,
            MEMORY_CLOUD,
            request.resource_type.as_str(),
            "",
            &public_id,
            "mp4",
        );

        stored.assets.insert(public_id.clone(), bytes);
        Ok(MediaAsset {
            secure_url,
            public_id,
        })
    }

    fn video_variant_url(&self, public_id: &str, transform: &VideoTransform) -> String {
        delivery_url(
            MEMORY_CDN,
            MEMORY_CLOUD,
            "video",
            &transform.directives(),
            public_id,
            transform.extension(),
        )
    }

    fn thumbnail_url(&self, public_id: &str, transform: &ThumbnailTransform) -> String {
        delivery_url(
            MEMORY_CDN,
            MEMORY_CLOUD,
            "video",
            &transform.directives(),
            public_id,
            transform.extension(),
        )
    }
}
