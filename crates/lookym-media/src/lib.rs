//! # lookym-media
//!
//! External media gateway: uploads device-local video/image binaries to the
//! transcoding CDN and derives transformed delivery URLs.
//!
//! Uploading is the only networked operation.  Derived URLs (quality
//! variants, thumbnail frame extraction) are pure string construction and
//! never touch the network.

pub mod gateway;
pub mod memory;
pub mod source;
pub mod transform;

mod error;

pub use error::MediaError;
pub use gateway::{MediaAsset, MediaConfig, MediaGateway, MediaUpload, ResourceType, UploadRequest};
pub use memory::MemoryMedia;
pub use source::{content_type_for_path, is_local_uri, load_local_uri};
pub use transform::{ThumbnailTransform, VideoTransform};
