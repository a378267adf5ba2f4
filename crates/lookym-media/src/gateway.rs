//! The media gateway: upload plus derived-URL construction.

use async_trait::async_trait;
use reqwest::multipart;
use serde::Deserialize;

use crate::error::{MediaError, Result};
use crate::source::load_local_uri;
use crate::transform::{ThumbnailTransform, VideoTransform};

/// Media backend configuration.
#[derive(Debug, Clone)]
pub struct MediaConfig {
    /// Upload API base URL.
    /// Env: `LOOKYM_MEDIA_BASE_URL`
    /// Default: `https://api.media.lookym.app`
    pub base_url: String,

    /// Delivery CDN base URL used for derived URLs.
    /// Env: `LOOKYM_MEDIA_CDN_URL`
    /// Default: `https://res.media.lookym.app`
    pub cdn_url: String,

    /// Tenant ("cloud") name segment.
    /// Env: `LOOKYM_MEDIA_CLOUD`
    /// Default: `lookym`
    pub cloud_name: String,

    /// Unsigned upload preset.
    /// Env: `LOOKYM_MEDIA_PRESET`
    /// Default: `lookym-mobile`
    pub upload_preset: String,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.media.lookym.app".to_string(),
            cdn_url: "https://res.media.lookym.app".to_string(),
            cloud_name: "lookym".to_string(),
            upload_preset: "lookym-mobile".to_string(),
        }
    }
}

impl MediaConfig {
    /// Load configuration from environment variables, falling back to
    /// defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(url) = std::env::var("LOOKYM_MEDIA_BASE_URL") {
            config.base_url = url.trim_end_matches('/').to_string();
        }
        if let Ok(url) = std::env::var("LOOKYM_MEDIA_CDN_URL") {
            config.cdn_url = url.trim_end_matches('/').to_string();
        }
        if let Ok(cloud) = std::env::var("LOOKYM_MEDIA_CLOUD") {
            if !cloud.is_empty() {
                config.cloud_name = cloud;
            }
        }
        if let Ok(preset) = std::env::var("LOOKYM_MEDIA_PRESET") {
            if !preset.is_empty() {
                config.upload_preset = preset;
            }
        }

        config
    }
}

/// What kind of binary is being uploaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceType {
    Video,
    Image,
}

impl ResourceType {
    pub fn as_str(self) -> &'static str {
        match self {
            ResourceType::Video => "video",
            ResourceType::Image => "image",
        }
    }
}

/// Parameters for one upload.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub resource_type: ResourceType,
    /// Remote folder, e.g. `videos/{user_id}`.
    pub folder: String,
    /// Explicit public id; the backend derives one when `None`.
    pub public_id: Option<String>,
}

/// The hosted asset an upload produces.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct MediaAsset {
    pub secure_url: String,
    pub public_id: String,
}

/// Upload plus derived-URL construction, behind a trait so tests can run
/// against [`MemoryMedia`] instead of the hosted transcoder.
///
/// [`MemoryMedia`]: crate::MemoryMedia
#[async_trait]
pub trait MediaUpload: Send + Sync {
    /// Upload a device-local URI and return the hosted asset.
    async fn upload(&self, local_uri: &str, request: &UploadRequest) -> Result<MediaAsset>;

    /// Delivery URL of a transformed video variant. Pure string
    /// construction, no network.
    fn video_variant_url(&self, public_id: &str, transform: &VideoTransform) -> String;

    /// Delivery URL of a thumbnail frame extracted from a video. Pure
    /// string construction, no network.
    fn thumbnail_url(&self, public_id: &str, transform: &ThumbnailTransform) -> String;
}

/// Client for the transcoding/CDN backend.
#[derive(Debug, Clone)]
pub struct MediaGateway {
    http: reqwest::Client,
    config: MediaConfig,
}

impl MediaGateway {
    pub fn new(config: MediaConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
        }
    }
}

#[async_trait]
impl MediaUpload for MediaGateway {
    /// The binary is transcoded server-side; the returned `secure_url` is
    /// the permanent delivery URL of the default rendition.
    async fn upload(&self, local_uri: &str, request: &UploadRequest) -> Result<MediaAsset> {
        let (bytes, content_type) = load_local_uri(local_uri).await?;
        let size = bytes.len();

        let mut part = multipart::Part::bytes(bytes.to_vec()).file_name("upload");
        if let Some(content_type) = &content_type {
            // A bad guess is not fatal; the backend sniffs the payload.
            if let Ok(typed) = part.mime_str(content_type) {
                part = typed;
            } else {
                part = multipart::Part::bytes(bytes.to_vec()).file_name("upload");
            }
        }

        let mut form = multipart::Form::new()
            .text("upload_preset", self.config.upload_preset.clone())
            .text("folder", request.folder.clone())
            .part("file", part);
        if let Some(public_id) = &request.public_id {
            form = form.text("public_id", public_id.clone());
        }

        let url = format!(
            "{}/v1/{}/{}/upload",
            self.config.base_url,
            self.config.cloud_name,
            request.resource_type.as_str()
        );

        let resp = self.http.post(&url).multipart(form).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(MediaError::Status {
                code: status.as_u16(),
                message: resp.text().await.unwrap_or_default(),
            });
        }

        let asset: MediaAsset = serde_json::from_slice(&resp.bytes().await?)?;
        tracing::info!(
            public_id = %asset.public_id,
            size,
            resource_type = request.resource_type.as_str(),
            "media uploaded"
        );
        Ok(asset)
    }

    fn video_variant_url(&self, public_id: &str, transform: &VideoTransform) -> String {
        delivery_url(
            &self.config.cdn_url,
            &self.config.cloud_name,
            "video",
            &transform.directives(),
            public_id,
            transform.extension(),
        )
    }

    fn thumbnail_url(&self, public_id: &str, transform: &ThumbnailTransform) -> String {
        delivery_url(
            &self.config.cdn_url,
            &self.config.cloud_name,
            "video",
            &transform.directives(),
            public_id,
            transform.extension(),
        )
    }
}

/// Assemble `{cdn}/{cloud}/{resource}/upload[/{directives}]/{id}.{ext}`.
pub(crate) fn delivery_url(
    cdn_url: &str,
    cloud_name: &str,
    resource_type: &str,
    directives: &str,
    public_id: &str,
    extension: &str,
) -> String {
    let base = format!("{cdn_url}/{cloud_name}/{resource_type}/upload");
    if directives.is_empty() {
        format!("{base}/{public_id}.{extension}")
    } else {
        format!("{base}/{directives}/{public_id}.{extension}")
    }
}
