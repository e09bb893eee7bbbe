//! Client contract for the hosted model-inference service.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

mod http;
pub mod output;
mod policy;

pub use http::HttpInferenceClient;
pub use policy::CallPolicy;

#[derive(Error, Debug, Clone)]
pub enum InferenceError {
    #[error("Inference service is not configured")]
    NotConfigured,

    #[error("Request to model {model} failed: {reason}")]
    Http { model: String, reason: String },

    #[error("Model {model} returned HTTP {status}")]
    Status { model: String, status: u16 },

    #[error("Model {model} reported an error: {message}")]
    Upstream { model: String, message: String },

    #[error("Model {model} returned unusable output: {reason}")]
    InvalidOutput { model: String, reason: String },

    #[error("Model {model} timed out after {secs}s")]
    Timeout { model: String, secs: u64 },
}

impl InferenceError {
    /// Transient failures worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            InferenceError::Http { .. } | InferenceError::Timeout { .. } => true,
            InferenceError::Status { status, .. } => *status == 429 || *status >= 500,
            InferenceError::NotConfigured
            | InferenceError::Upstream { .. }
            | InferenceError::InvalidOutput { .. } => false,
        }
    }
}

impl crate::pipeline::fallback::FailureKind for InferenceError {
    fn kind(&self) -> &'static str {
        match self {
            InferenceError::NotConfigured => "not configured",
            InferenceError::Http { .. } => "request failed",
            InferenceError::Status { .. } => "bad status",
            InferenceError::Upstream { .. } => "model error",
            InferenceError::InvalidOutput { .. } => "invalid output",
            InferenceError::Timeout { .. } => "timed out",
        }
    }
}

#[async_trait]
pub trait InferenceClient: Send + Sync {
    /// Runs `model_id` on `payload` and returns the model's output value.
    async fn invoke(&self, model_id: &str, payload: Value) -> Result<Value, InferenceError>;
}
