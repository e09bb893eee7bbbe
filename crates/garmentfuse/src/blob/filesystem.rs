use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;

use super::{validate_blob_path, BlobSource, BlobStore, Effect, RemoteFetcher, StoredBlob, UploadOptions};
use crate::config::StorageConfig;
use crate::error::BlobError;
use crate::imaging;
use crate::inference::output::decode_inline_image;

/// Stores blobs as files under a root directory and hands out `file://`
/// URLs. Transforms run locally.
pub struct FilesystemBlobStore {
    root: PathBuf,
    remote: RemoteFetcher,
}

impl FilesystemBlobStore {
    /// Creates the root directory if needed.
    pub fn new<P: AsRef<Path>>(root: P, fetch_timeout: Duration) -> Result<Self, BlobError> {
        let root = root.as_ref();
        std::fs::create_dir_all(root).map_err(|e| BlobError::WriteFile {
            path: root.to_path_buf(),
            source: e,
        })?;
        let root = std::fs::canonicalize(root).map_err(|e| BlobError::ReadFile {
            path: root.to_path_buf(),
            source: e,
        })?;

        Ok(Self {
            root,
            remote: RemoteFetcher::new(fetch_timeout)?,
        })
    }

    pub fn from_config(config: &StorageConfig) -> Result<Self, BlobError> {
        Self::new(
            crate::secrets::expand_home(&config.blob_root),
            Duration::from_secs(config.fetch_timeout_secs),
        )
    }

    /// Caps the body size of remote fetches.
    pub fn with_max_fetch_bytes(mut self, max_bytes: usize) -> Self {
        self.remote = self.remote.with_max_bytes(max_bytes);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn url_for(path: &Path) -> String {
        format!("file://{}", path.display())
    }

    async fn write_atomically(&self, path: &Path, content: &[u8]) -> Result<(), BlobError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| BlobError::WriteFile {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
        }

        let tmp = path.with_extension(format!("tmp-{}", uuid::Uuid::new_v4().simple()));
        tokio::fs::write(&tmp, content)
            .await
            .map_err(|e| BlobError::WriteFile {
                path: tmp.clone(),
                source: e,
            })?;

        if let Err(e) = tokio::fs::rename(&tmp, path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(BlobError::WriteFile {
                path: path.to_path_buf(),
                source: e,
            });
        }
        Ok(())
    }
}

fn extension_for(bytes: &[u8]) -> &'static str {
    image::guess_format(bytes)
        .ok()
        .and_then(|format| format.extensions_str().first().copied())
        .unwrap_or("bin")
}

#[async_trait]
impl BlobStore for FilesystemBlobStore {
    async fn upload(
        &self,
        source: BlobSource,
        destination_id: &str,
        options: &UploadOptions,
    ) -> Result<StoredBlob, BlobError> {
        let id = if options.folder.is_empty() {
            destination_id.to_string()
        } else {
            format!("{}/{}", options.folder.trim_end_matches('/'), destination_id)
        };
        validate_blob_path(&id)?;

        let bytes = match source {
            BlobSource::Bytes(bytes) => bytes,
            BlobSource::Base64(encoded) => decode_inline_image(&encoded)
                .ok_or_else(|| BlobError::InvalidBase64(crate::sanitize::redact_url(&encoded)))?,
            BlobSource::Url(url) => self.fetch(&url).await?,
        };

        let path = self
            .root
            .join(format!("{}.{}", id, extension_for(&bytes)));
        self.write_atomically(&path, &bytes).await?;

        tracing::debug!(blob_id = %id, size = bytes.len(), "Stored blob");

        Ok(StoredBlob {
            url: Self::url_for(&path),
            id,
        })
    }

    async fn fetch(&self, url: &str) -> Result<Vec<u8>, BlobError> {
        if let Some(path) = url.strip_prefix("file://") {
            let path = PathBuf::from(path);
            return tokio::fs::read(&path)
                .await
                .map_err(|e| BlobError::ReadFile { path, source: e });
        }

        if url.starts_with("http://") || url.starts_with("https://") {
            return self.remote.fetch(url).await;
        }

        if url.starts_with("data:") {
            return decode_inline_image(url)
                .ok_or_else(|| BlobError::InvalidBase64(crate::sanitize::redact_url(url)));
        }

        let scheme = url.split_once(':').map(|(s, _)| s).unwrap_or(url);
        Err(BlobError::UnsupportedScheme(crate::sanitize::truncate_message(
            scheme, 32,
        )))
    }

    async fn transform(&self, url: &str, effects: &[Effect]) -> Result<Vec<u8>, BlobError> {
        let bytes = self.fetch(url).await?;
        let effects = effects.to_vec();
        tokio::task::spawn_blocking(move || imaging::filters::apply_effects(&bytes, &effects))
            .await
            .map_err(|e| BlobError::Transform(e.to_string()))?
            .map_err(|e| BlobError::Transform(e.to_string()))
    }
}
