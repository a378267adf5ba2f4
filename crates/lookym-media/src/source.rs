//! Reading device-local media URIs into bytes.
//!
//! The upload pipeline accepts the URI shapes a mobile shell hands us:
//! `file://` URLs, bare filesystem paths, and inline `data:` URIs.  Remote
//! `http(s)` URLs are NOT local -- an avatar that is already hosted needs
//! no re-upload.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::Bytes;

use crate::error::{MediaError, Result};

/// Whether `uri` points at device-local content that must be uploaded
/// before it can be referenced remotely.
pub fn is_local_uri(uri: &str) -> bool {
    uri.starts_with("file://") || uri.starts_with("data:") || uri.starts_with('/')
}

/// Read a local URI into bytes, with a content-type guess where one is
/// available (from the `data:` header or the file extension).
pub async fn load_local_uri(uri: &str) -> Result<(Bytes, Option<String>)> {
    if let Some(rest) = uri.strip_prefix("data:") {
        return decode_data_uri(rest);
    }

    let path = if let Some(path) = uri.strip_prefix("file://") {
        path
    } else if uri.starts_with('/') {
        uri
    } else {
        return Err(MediaError::UnsupportedUri(uri.to_string()));
    };

    let bytes = tokio::fs::read(path).await?;
    Ok((Bytes::from(bytes), content_type_for_path(path)))
}

fn decode_data_uri(rest: &str) -> Result<(Bytes, Option<String>)> {
    // data:[<mediatype>][;base64],<data>
    let (header, payload) = rest
        .split_once(',')
        .ok_or_else(|| MediaError::UnsupportedUri(format!("data:{rest}")))?;

    let (content_type, is_base64) = match header.strip_suffix(";base64") {
        Some(mediatype) => (mediatype, true),
        None => (header, false),
    };
    if !is_base64 {
        return Err(MediaError::UnsupportedUri(format!("data:{header},...")));
    }

    let bytes = BASE64.decode(payload)?;
    let content_type = if content_type.is_empty() {
        None
    } else {
        Some(content_type.to_string())
    };
    Ok((Bytes::from(bytes), content_type))
}

/// Best-effort content type from a path or URI extension.
pub fn content_type_for_path(path: &str) -> Option<String> {
    let ext = path.rsplit_once('.')?.1.to_ascii_lowercase();
    let content_type = match ext.as_str() {
        "mp4" => "video/mp4",
        "mov" => "video/quicktime",
        "webm" => "video/webm",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "webp" => "image/webp",
        _ => return None,
    };
    Some(content_type.to_string())
}
