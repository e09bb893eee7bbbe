use serde_json::json;

use super::{StageContext, StageError};
use crate::blob::Effect;
use crate::config::EdgeType;
use crate::inference::output::{image_ref, png_data_uri, to_data_uri};
use crate::inference::InferenceError;
use crate::pipeline::fallback::{cascade, Outcome, Tier};

/// Strength passed to the store-side edge transform.
const TRANSFORM_STRENGTH: u8 = 50;

pub struct EdgeStage {
    canny_model: String,
    hed_model: String,
}

impl EdgeStage {
    pub fn new(canny_model: impl Into<String>, hed_model: impl Into<String>) -> Self {
        Self {
            canny_model: canny_model.into(),
            hed_model: hed_model.into(),
        }
    }

    fn model_for(&self, edge_type: EdgeType) -> &str {
        match edge_type {
            EdgeType::Canny => &self.canny_model,
            EdgeType::Hed => &self.hed_model,
        }
    }

    async fn from_model(
        &self,
        ctx: &StageContext,
        image_url: &str,
        edge_type: EdgeType,
    ) -> Result<String, StageError> {
        let model = self.model_for(edge_type);
        let image = ctx.model_input(image_url).await?;
        let output = ctx
            .call(model, json!({ "image": image, "mode": "edge_detection" }))
            .await?;
        let edge_map = image_ref(&output)
            .map(|reference| to_data_uri(&reference))
            .ok_or_else(|| InferenceError::InvalidOutput {
                model: model.to_string(),
                reason: "no edge map in output".to_string(),
            })?;
        Ok(edge_map)
    }

    /// Edge map for `image_url`: the edge model, else the blob store's
    /// edge transform, else the original URL.
    pub async fn extract_edges(
        &self,
        ctx: &StageContext,
        image_url: &str,
        edge_type: EdgeType,
    ) -> Outcome<String> {
        let transform = async {
            ctx.blobs
                .transform(image_url, &[Effect::EdgeDetect(TRANSFORM_STRENGTH), Effect::Greyscale])
                .await
                .map(|bytes| png_data_uri(&bytes))
        };

        cascade(
            "edges",
            vec![
                Tier::new("model", self.from_model(ctx, image_url, edge_type)),
                Tier::new("transform", transform),
            ],
            || image_url.to_string(),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::pipeline::fallback::Source;
    use crate::test_support::{
        fast_policy, png_bytes, solid_image, MemoryBlobStore, ScriptedInference,
    };

    fn stage() -> EdgeStage {
        EdgeStage::new("canny-model", "hed-model")
    }

    fn ctx(inference: ScriptedInference, blobs: Arc<MemoryBlobStore>) -> StageContext {
        StageContext {
            inference: Arc::new(inference),
            blobs,
            policy: fast_policy(),
        }
    }

    fn stored_model() -> (Arc<MemoryBlobStore>, String) {
        let blobs = Arc::new(MemoryBlobStore::default());
        let url = blobs.insert("m", png_bytes(&solid_image(8, 8, [60, 60, 60])));
        (blobs, url)
    }

    #[tokio::test]
    async fn test_model_output_is_prefixed() {
        let inference = ScriptedInference::new(|model, payload| {
            assert_eq!(model, "hed-model");
            assert_eq!(payload["mode"], "edge_detection");
            assert!(payload["image"]
                .as_str()
                .unwrap()
                .starts_with("data:image/png;base64,"));
            Ok(json!({ "edge_map": "iVBORw0" }))
        });
        let (blobs, url) = stored_model();
        let outcome = stage()
            .extract_edges(&ctx(inference, blobs), &url, EdgeType::Hed)
            .await;
        assert_eq!(outcome.source, Source::Primary);
        assert_eq!(outcome.value, "data:image/png;base64,iVBORw0");
    }

    #[tokio::test]
    async fn test_url_output_passes_through() {
        let inference = ScriptedInference::new(|_, _| Ok(json!([{ "url": "https://cdn/e.png" }])));
        let (blobs, url) = stored_model();
        let outcome = stage()
            .extract_edges(&ctx(inference, blobs), &url, EdgeType::Canny)
            .await;
        assert_eq!(outcome.value, "https://cdn/e.png");
    }

    #[tokio::test]
    async fn test_falls_back_to_transform() {
        let blobs = Arc::new(MemoryBlobStore::with_transform());
        let url = blobs.insert("m", png_bytes(&solid_image(8, 8, [10, 200, 10])));
        let outcome = stage()
            .extract_edges(&ctx(ScriptedInference::failing(), blobs), &url, EdgeType::Canny)
            .await;

        assert_eq!(outcome.source, Source::Fallback("transform"));
        assert!(outcome.value.starts_with("data:image/png;base64,"));
        assert_eq!(outcome.failures[0].tier, "model");
    }

    #[tokio::test]
    async fn test_default_is_original_url() {
        let blobs = Arc::new(MemoryBlobStore::default());
        let url = blobs.insert("m", png_bytes(&solid_image(8, 8, [0, 0, 0])));
        let inference = ScriptedInference::new(|_, _| Ok(json!({ "nothing": true })));
        let outcome = stage()
            .extract_edges(&ctx(inference, blobs), &url, EdgeType::Canny)
            .await;

        assert_eq!(outcome.source, Source::Default);
        assert_eq!(outcome.value, url);
        assert_eq!(outcome.failures.len(), 2);
    }
}
