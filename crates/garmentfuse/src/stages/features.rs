use std::sync::Arc;

use image::DynamicImage;
use thiserror::Error;
use tracing::debug;

use super::StageContext;
use crate::error::BlobError;
use crate::imaging::palette::{self, PATCH_SIZE};
use crate::imaging::{decode, encode_png, ImagingError};
use crate::job::{FabricSummary, GarmentRegion};
use crate::pipeline::fallback::{cascade, FailureKind, Outcome, Tier};

pub const FALLBACK_COLORS: [&str; 3] = ["#ff6b6b", "#9b59ff", "#ff8fb1"];
pub const FALLBACK_TEXTURE: &str = "smooth";

#[derive(Error, Debug)]
enum FeatureError {
    #[error("fabric fetch failed: {0}")]
    Fetch(#[from] BlobError),

    #[error("{0}")]
    Imaging(#[from] ImagingError),

    #[error("feature task failed: {0}")]
    Task(String),
}

impl FailureKind for FeatureError {
    fn kind(&self) -> &'static str {
        match self {
            FeatureError::Fetch(e) => e.kind(),
            FeatureError::Imaging(e) => e.kind(),
            FeatureError::Task(_) => "task failed",
        }
    }
}

#[derive(Debug, Clone)]
pub struct FabricFeatures {
    pub region: GarmentRegion,
    pub url: String,
    /// Hex colours, at most six.
    pub colors: Vec<String>,
    pub dominant_color: String,
    pub texture: String,
    /// PNG-encoded motif crops.
    pub patches: Vec<Vec<u8>>,
    /// The decoded swatch, when it could be fetched.
    pub image: Option<Arc<DynamicImage>>,
}

impl FabricFeatures {
    pub fn fallback(region: GarmentRegion, url: &str) -> Self {
        Self {
            region,
            url: url.to_string(),
            colors: FALLBACK_COLORS.iter().map(|c| c.to_string()).collect(),
            dominant_color: FALLBACK_COLORS[0].to_string(),
            texture: FALLBACK_TEXTURE.to_string(),
            patches: Vec::new(),
            image: None,
        }
    }

    /// `"c1, c2, c3; texture: t"` for prompts.
    pub fn describe(&self) -> String {
        let colors: Vec<&str> = self.colors.iter().take(3).map(String::as_str).collect();
        format!("{}; texture: {}", colors.join(", "), self.texture)
    }

    pub fn summary(&self, motif_examples: Vec<String>) -> FabricSummary {
        FabricSummary {
            region: self.region,
            colors: self.colors.clone(),
            dominant_color: self.dominant_color.clone(),
            texture: self.texture.clone(),
            motif_examples,
        }
    }
}

pub struct FeatureStage {
    texture_label: String,
}

impl FeatureStage {
    pub fn new(texture_label: impl Into<String>) -> Self {
        Self {
            texture_label: texture_label.into(),
        }
    }

    async fn analyse(
        &self,
        ctx: &StageContext,
        fabric_url: &str,
        region: GarmentRegion,
    ) -> Result<FabricFeatures, FeatureError> {
        let bytes = ctx.blobs.fetch(fabric_url).await?;

        let (image, palette, patches) = tokio::task::spawn_blocking(move || {
            let image = decode(&bytes)?;
            let palette = palette::extract(&image);
            let patches = palette::motif_patches(&image, PATCH_SIZE)
                .iter()
                .map(encode_png)
                .collect::<Result<Vec<_>, _>>()?;
            Ok::<_, ImagingError>((image, palette, patches))
        })
        .await
        .map_err(|e| FeatureError::Task(e.to_string()))??;

        debug!(
            region = %region,
            colors = palette.swatches.len(),
            patches = patches.len(),
            "Fabric palette extracted"
        );

        Ok(FabricFeatures {
            region,
            url: fabric_url.to_string(),
            colors: palette.colors(),
            dominant_color: palette.dominant(),
            // Placeholder: no texture classifier runs.
            texture: self.texture_label.clone(),
            patches,
            image: Some(Arc::new(image)),
        })
    }

    /// Palette, dominant colour, texture label and motif patches of the
    /// swatch at `fabric_url`.
    pub async fn extract_palette_and_patches(
        &self,
        ctx: &StageContext,
        fabric_url: &str,
        region: GarmentRegion,
    ) -> Outcome<FabricFeatures> {
        cascade(
            "features",
            vec![Tier::new("palette", self.analyse(ctx, fabric_url, region))],
            || FabricFeatures::fallback(region, fabric_url),
        )
        .await
    }
}
