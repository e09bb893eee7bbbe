use serde_json::json;
use tracing::debug;

use super::{StageContext, StageError};
use crate::inference::output::{select_mask, to_data_uri};
use crate::inference::InferenceError;
use crate::job::GarmentRegion;
use crate::pipeline::fallback::{cascade, Outcome, Tier};

/// Canvas the canonical prompt points are expressed on.
pub const CANVAS: (u32, u32) = (1024, 1536);

pub const TOP_POINT: (u32, u32) = (512, 460);
pub const BOTTOM_POINT: (u32, u32) = (512, 920);
pub const FULL_POINT: (u32, u32) = (512, 768);

/// Mask references (data URIs or URLs) per region. `None` where the model
/// returned nothing usable.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SegmentationMasks {
    pub top: Option<String>,
    pub bottom: Option<String>,
    pub full: Option<String>,
}

impl SegmentationMasks {
    pub fn is_empty(&self) -> bool {
        self.top.is_none() && self.bottom.is_none() && self.full.is_none()
    }

    pub fn region(&self, region: GarmentRegion) -> Option<&str> {
        match region {
            GarmentRegion::Top => self.top.as_deref(),
            GarmentRegion::Bottom => self.bottom.as_deref(),
        }
    }

    /// The mask covering the fabrics present: top only, bottom only, or
    /// full for both.
    pub fn for_fabrics(&self, has_top: bool, has_bottom: bool) -> Option<&str> {
        match (has_top, has_bottom) {
            (true, false) => self.top.as_deref(),
            (false, true) => self.bottom.as_deref(),
            (true, true) => self.full.as_deref(),
            (false, false) => None,
        }
    }

    /// `(name, reference)` for each mask present.
    pub fn named(&self) -> Vec<(&'static str, &str)> {
        [
            ("top", self.top.as_deref()),
            ("bottom", self.bottom.as_deref()),
            ("full", self.full.as_deref()),
        ]
        .into_iter()
        .filter_map(|(name, mask)| mask.map(|m| (name, m)))
        .collect()
    }
}

pub struct SegmentationStage {
    model: String,
    scale_to_image: bool,
}

impl SegmentationStage {
    pub fn new(model: impl Into<String>, scale_to_image: bool) -> Self {
        Self {
            model: model.into(),
            scale_to_image,
        }
    }

    fn point(&self, canonical: (u32, u32), dims: (u32, u32)) -> (u32, u32) {
        if !self.scale_to_image || dims.0 == 0 || dims.1 == 0 {
            return canonical;
        }
        let scale = |v: u32, image: u32, canvas: u32| {
            ((u64::from(v) * u64::from(image) + u64::from(canvas) / 2) / u64::from(canvas)) as u32
        };
        (
            scale(canonical.0, dims.0, CANVAS.0),
            scale(canonical.1, dims.1, CANVAS.1),
        )
    }

    async fn mask_at(
        &self,
        ctx: &StageContext,
        image: &str,
        point: (u32, u32),
    ) -> Result<Option<String>, InferenceError> {
        let payload = json!({
            "image": image,
            "prompts": [{ "type": "point", "coordinates": [point.0, point.1] }],
        });
        let output = ctx.call(&self.model, payload).await?;
        Ok(select_mask(&output).map(|mask| to_data_uri(&mask)))
    }

    async fn run_model(
        &self,
        ctx: &StageContext,
        image_url: &str,
        dims: (u32, u32),
    ) -> Result<SegmentationMasks, StageError> {
        let image = ctx.model_input(image_url).await?;
        let top = self.mask_at(ctx, &image, self.point(TOP_POINT, dims)).await?;
        let bottom = self.mask_at(ctx, &image, self.point(BOTTOM_POINT, dims)).await?;
        let full = self.mask_at(ctx, &image, self.point(FULL_POINT, dims)).await?;
        debug!(
            top = top.is_some(),
            bottom = bottom.is_some(),
            full = full.is_some(),
            "Segmentation masks"
        );
        Ok(SegmentationMasks { top, bottom, full })
    }

    /// Top, bottom and full masks for the image at `image_url`. Any model
    /// error yields no masks at all.
    pub async fn segment(
        &self,
        ctx: &StageContext,
        image_url: &str,
        dims: (u32, u32),
    ) -> Outcome<SegmentationMasks> {
        cascade(
            "segmentation",
            vec![Tier::new("model", self.run_model(ctx, image_url, dims))],
            SegmentationMasks::default,
        )
        .await
    }
}
