//! Blob storage contract: uploads, fetches and optional server-side
//! transforms of images.

use async_trait::async_trait;

use crate::error::BlobError;

mod fetch;
mod filesystem;

pub use fetch::{RemoteFetcher, DEFAULT_MAX_FETCH_BYTES};
pub use filesystem::FilesystemBlobStore;

/// Content handed to [`BlobStore::upload`].
#[derive(Debug, Clone)]
pub enum BlobSource {
    Bytes(Vec<u8>),
    /// Raw base64 or a `data:` URI.
    Base64(String),
    /// A URL the store fetches itself.
    Url(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ResourceType {
    #[default]
    Image,
    Raw,
}

#[derive(Debug, Clone, Default)]
pub struct UploadOptions {
    /// Slash-separated folder, e.g. `fusion/<job>/masks`.
    pub folder: String,
    pub resource_type: ResourceType,
}

impl UploadOptions {
    pub fn image(folder: impl Into<String>) -> Self {
        Self {
            folder: folder.into(),
            resource_type: ResourceType::Image,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBlob {
    pub url: String,
    /// `folder/destination_id`.
    pub id: String,
}

/// A store-side image effect.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Effect {
    /// Edge detection at the given strength (0-100).
    EdgeDetect(u8),
    Greyscale,
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Stores `source` under `options.folder/destination_id`, replacing any
    /// previous blob with that id.
    async fn upload(
        &self,
        source: BlobSource,
        destination_id: &str,
        options: &UploadOptions,
    ) -> Result<StoredBlob, BlobError>;

    async fn fetch(&self, url: &str) -> Result<Vec<u8>, BlobError>;

    /// Applies `effects` to the image at `url` and returns encoded PNG bytes.
    async fn transform(&self, _url: &str, _effects: &[Effect]) -> Result<Vec<u8>, BlobError> {
        Err(BlobError::TransformUnsupported)
    }
}

/// Rejects ids that could escape the store root.
pub(crate) fn validate_blob_path(path: &str) -> Result<(), BlobError> {
    let valid = !path.is_empty()
        && !path.starts_with('/')
        && path.split('/').all(|segment| {
            !segment.is_empty()
                && segment != "."
                && segment != ".."
                && segment
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        });

    if valid {
        Ok(())
    } else {
        Err(BlobError::InvalidDestination(path.to_string()))
    }
}
