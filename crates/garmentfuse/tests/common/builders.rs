//! Builders for test images, uploads and inference fakes.

#![allow(dead_code)]

use std::io::Cursor;
use std::sync::Mutex;

use async_trait::async_trait;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use serde_json::Value;

use garmentfuse::api::{CreateJobRequest, UploadedFile};
use garmentfuse::inference::{InferenceClient, InferenceError};

/// Encodes a solid-colour image in `format`.
pub fn image_bytes(width: u32, height: u32, rgb: [u8; 3], format: ImageFormat) -> Vec<u8> {
    let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb(rgb)));
    let mut out = Cursor::new(Vec::new());
    image
        .write_to(&mut out, format)
        .expect("Failed to encode test image");
    out.into_inner()
}

pub fn png(width: u32, height: u32, rgb: [u8; 3]) -> Vec<u8> {
    image_bytes(width, height, rgb, ImageFormat::Png)
}

pub fn upload(filename: &str, bytes: Vec<u8>) -> UploadedFile {
    let content_type = mime_guess::from_path(filename).first().map(|m| m.to_string());
    UploadedFile::new(filename, content_type.as_deref(), bytes)
}

/// Builder for `CreateJobRequest`.
pub struct RequestBuilder {
    request: CreateJobRequest,
}

impl RequestBuilder {
    /// A model photo, a top fabric and category `lehenga`.
    pub fn new() -> Self {
        Self {
            request: CreateJobRequest {
                model_image: Some(upload("model.png", png(48, 72, [128, 110, 100]))),
                top_fabric: Some(upload("top.png", png(32, 32, [200, 40, 60]))),
                bottom_fabric: None,
                category: "lehenga".to_string(),
                mode: None,
                strength: None,
                user_consent: true,
            },
        }
    }

    pub fn model_image(mut self, file: Option<UploadedFile>) -> Self {
        self.request.model_image = file;
        self
    }

    pub fn top_fabric(mut self, file: Option<UploadedFile>) -> Self {
        self.request.top_fabric = file;
        self
    }

    pub fn bottom_fabric(mut self, file: Option<UploadedFile>) -> Self {
        self.request.bottom_fabric = file;
        self
    }

    pub fn category(mut self, category: &str) -> Self {
        self.request.category = category.to_string();
        self
    }

    pub fn mode(mut self, mode: &str) -> Self {
        self.request.mode = Some(mode.to_string());
        self
    }

    pub fn strength(mut self, strength: f32) -> Self {
        self.request.strength = Some(strength);
        self
    }

    pub fn build(self) -> CreateJobRequest {
        self.request
    }
}

impl Default for RequestBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Every model call returns HTTP 503.
pub struct FailingInference;

#[async_trait]
impl InferenceClient for FailingInference {
    async fn invoke(&self, model_id: &str, _payload: Value) -> Result<Value, InferenceError> {
        Err(InferenceError::Status {
            model: model_id.to_string(),
            status: 503,
        })
    }
}

/// Keeps every payload it is sent, then fails with HTTP 503.
#[derive(Default)]
pub struct RecordingInference {
    pub calls: Mutex<Vec<(String, Value)>>,
}

impl RecordingInference {
    pub fn models(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(model, _)| model.clone())
            .collect()
    }
}

#[async_trait]
impl InferenceClient for RecordingInference {
    async fn invoke(&self, model_id: &str, payload: Value) -> Result<Value, InferenceError> {
        self.calls
            .lock()
            .unwrap()
            .push((model_id.to_string(), payload));
        Err(InferenceError::Status {
            model: model_id.to_string(),
            status: 503,
        })
    }
}

/// Every string value in `value`, depth first.
pub fn json_strings(value: &Value) -> Vec<&str> {
    match value {
        Value::String(s) => vec![s.as_str()],
        Value::Array(items) => items.iter().flat_map(json_strings).collect(),
        Value::Object(fields) => fields.values().flat_map(json_strings).collect(),
        _ => Vec::new(),
    }
}

/// Never answers.
pub struct HangingInference;

#[async_trait]
impl InferenceClient for HangingInference {
    async fn invoke(&self, _model_id: &str, _payload: Value) -> Result<Value, InferenceError> {
        futures_util::future::pending().await
    }
}

/// Segmentation answers with an undecodable mask; everything else fails.
pub struct BrokenMaskInference;

#[async_trait]
impl InferenceClient for BrokenMaskInference {
    async fn invoke(&self, model_id: &str, _payload: Value) -> Result<Value, InferenceError> {
        if model_id.contains("sam") {
            // "foo" in base64: valid base64, not an image
            return Ok(serde_json::json!({ "masks": [{ "mask": "Zm9v", "score": 0.9 }] }));
        }
        Err(InferenceError::Upstream {
            model: model_id.to_string(),
            message: "model offline".to_string(),
        })
    }
}
