//! The processing stages a fusion run is made of. Each stage degrades to a
//! fallback or default value instead of failing.

use std::sync::Arc;

use image::DynamicImage;
use serde_json::Value;
use thiserror::Error;

use crate::blob::BlobStore;
use crate::error::BlobError;
use crate::imaging::{decode, ImagingError};
use crate::inference::output::{
    decode_inline_image, image_data_uri, image_ref, is_network_reference,
};
use crate::inference::{CallPolicy, InferenceClient, InferenceError};
use crate::pipeline::fallback::FailureKind;

pub mod edges;
pub mod features;
pub mod generation;
pub mod postprocess;
pub mod segmentation;

pub use edges::EdgeStage;
pub use features::{FabricFeatures, FeatureStage};
pub use generation::{GenerationRequest, GenerationStage};
pub use postprocess::{PostProcessStage, UpscaleStage};
pub use segmentation::{SegmentationMasks, SegmentationStage};

/// Failure of a model-backed tier.
#[derive(Error, Debug)]
pub enum StageError {
    #[error("model input unavailable: {0}")]
    Input(#[from] BlobError),

    #[error(transparent)]
    Inference(#[from] InferenceError),

    #[error("model output unusable: {0}")]
    Output(String),

    #[error(transparent)]
    Imaging(#[from] ImagingError),
}

impl FailureKind for StageError {
    fn kind(&self) -> &'static str {
        match self {
            StageError::Input(e) => e.kind(),
            StageError::Inference(e) => e.kind(),
            StageError::Output(_) => "invalid output",
            StageError::Imaging(e) => e.kind(),
        }
    }
}

/// Collaborators shared by all stages of a run.
#[derive(Clone)]
pub struct StageContext {
    pub inference: Arc<dyn InferenceClient>,
    pub blobs: Arc<dyn BlobStore>,
    pub policy: CallPolicy,
}

impl StageContext {
    pub async fn call(&self, model_id: &str, payload: Value) -> Result<Value, InferenceError> {
        self.policy
            .invoke(self.inference.as_ref(), model_id, payload)
            .await
    }

    /// Like [`call`](Self::call) with a fixed number of attempts.
    pub async fn call_with_attempts(
        &self,
        model_id: &str,
        payload: Value,
        attempts: u32,
    ) -> Result<Value, InferenceError> {
        let policy = CallPolicy {
            attempts,
            ..self.policy
        };
        policy
            .invoke(self.inference.as_ref(), model_id, payload)
            .await
    }

    /// Decodes the image a model returned, inline or behind a URL.
    pub async fn output_image(&self, output: &Value) -> Result<DynamicImage, StageError> {
        let reference =
            image_ref(output).ok_or_else(|| StageError::Output("no image in output".to_string()))?;
        let bytes = self.resolve_image(&reference).await?;
        Ok(decode(&bytes)?)
    }

    /// Bytes behind an image reference: URLs are fetched, inline data is
    /// decoded.
    pub async fn resolve_image(&self, reference: &str) -> Result<Vec<u8>, BlobError> {
        if reference.contains("://") {
            return self.blobs.fetch(reference).await;
        }
        decode_inline_image(reference)
            .ok_or_else(|| BlobError::InvalidBase64(crate::sanitize::redact_url(reference)))
    }

    /// An image reference the inference service can read. Network URLs and
    /// data URIs are passed on; blob-store URLs such as `file://` and bare
    /// base64 are inlined as data URIs.
    pub async fn model_input(&self, reference: &str) -> Result<String, BlobError> {
        if is_network_reference(reference) {
            return Ok(reference.to_string());
        }
        let bytes = self.resolve_image(reference).await?;
        Ok(image_data_uri(&bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{
        fast_policy, png_bytes, solid_image, MemoryBlobStore, ScriptedInference,
    };

    #[tokio::test]
    async fn test_model_input_inlines_store_urls() {
        let blobs = Arc::new(MemoryBlobStore::default());
        let url = blobs.insert("uploads/model", png_bytes(&solid_image(4, 4, [9, 9, 9])));
        let ctx = StageContext {
            inference: Arc::new(ScriptedInference::failing()),
            blobs,
            policy: fast_policy(),
        };

        let inlined = ctx.model_input(&url).await.unwrap();
        assert!(inlined.starts_with("data:image/png;base64,"));
        assert_eq!(ctx.resolve_image(&inlined).await.unwrap(), ctx.resolve_image(&url).await.unwrap());

        assert_eq!(
            ctx.model_input("https://cdn.example.com/m.png").await.unwrap(),
            "https://cdn.example.com/m.png"
        );
        assert_eq!(
            ctx.model_input("AQID").await.unwrap(),
            "data:image/png;base64,AQID"
        );
        assert!(ctx.model_input("mem://missing").await.is_err());
    }
}
