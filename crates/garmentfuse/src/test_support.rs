//! Shared fixtures for unit tests.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use image::{DynamicImage, Rgb, RgbImage};
use serde_json::Value;

use crate::blob::{BlobSource, BlobStore, Effect, StoredBlob, UploadOptions};
use crate::error::BlobError;
use crate::imaging::{encode_png, filters};
use crate::inference::output::decode_inline_image;
use crate::inference::{CallPolicy, InferenceClient, InferenceError};

pub fn solid_image(width: u32, height: u32, rgb: [u8; 3]) -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb(rgb)))
}

pub fn png_bytes(image: &DynamicImage) -> Vec<u8> {
    encode_png(image).unwrap()
}

/// Single attempt, no backoff.
pub fn fast_policy() -> CallPolicy {
    CallPolicy {
        timeout: Duration::from_secs(5),
        attempts: 1,
        backoff: Duration::ZERO,
    }
}

type Handler = Box<dyn Fn(&str, &Value) -> Result<Value, InferenceError> + Send + Sync>;

/// Inference client answering from a closure and recording every call.
pub struct ScriptedInference {
    handler: Handler,
    pub calls: Mutex<Vec<(String, Value)>>,
}

impl ScriptedInference {
    pub fn new(
        handler: impl Fn(&str, &Value) -> Result<Value, InferenceError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            handler: Box::new(handler),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self::new(|model, _| {
            Err(InferenceError::Status {
                model: model.to_string(),
                status: 503,
            })
        })
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl InferenceClient for ScriptedInference {
    async fn invoke(&self, model_id: &str, payload: Value) -> Result<Value, InferenceError> {
        let result = (self.handler)(model_id, &payload);
        self.calls
            .lock()
            .unwrap()
            .push((model_id.to_string(), payload));
        result
    }
}

/// In-memory blob store with `mem://` URLs.
#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
    pub supports_transform: bool,
}

impl MemoryBlobStore {
    pub fn with_transform() -> Self {
        Self {
            supports_transform: true,
            ..Self::default()
        }
    }

    pub fn insert(&self, id: &str, bytes: Vec<u8>) -> String {
        self.blobs.lock().unwrap().insert(id.to_string(), bytes);
        format!("mem://{}", id)
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.blobs.lock().unwrap().keys().cloned().collect();
        ids.sort();
        ids
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn upload(
        &self,
        source: BlobSource,
        destination_id: &str,
        options: &UploadOptions,
    ) -> Result<StoredBlob, BlobError> {
        let id = format!("{}/{}", options.folder, destination_id);
        let bytes = match source {
            BlobSource::Bytes(bytes) => bytes,
            BlobSource::Base64(encoded) => decode_inline_image(&encoded)
                .ok_or_else(|| BlobError::InvalidBase64("test payload".to_string()))?,
            BlobSource::Url(url) => self.fetch(&url).await?,
        };
        let url = self.insert(&id, bytes);
        Ok(StoredBlob { url, id })
    }

    async fn fetch(&self, url: &str) -> Result<Vec<u8>, BlobError> {
        if url.starts_with("data:") {
            return decode_inline_image(url)
                .ok_or_else(|| BlobError::InvalidBase64("test payload".to_string()));
        }
        let id = url
            .strip_prefix("mem://")
            .ok_or_else(|| BlobError::UnsupportedScheme(url.to_string()))?;
        self.blobs
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| BlobError::Http {
                url: url.to_string(),
                reason: "HTTP 404".to_string(),
            })
    }

    async fn transform(&self, url: &str, effects: &[Effect]) -> Result<Vec<u8>, BlobError> {
        if !self.supports_transform {
            return Err(BlobError::TransformUnsupported);
        }
        let bytes = self.fetch(url).await?;
        filters::apply_effects(&bytes, effects).map_err(|e| BlobError::Transform(e.to_string()))
    }
}
