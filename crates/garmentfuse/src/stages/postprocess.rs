use image::DynamicImage;
use serde_json::json;
use tracing::debug;

use super::{StageContext, StageError};
use crate::imaging::{composite, decode, encode_png, filters, ImagingError};
use crate::inference::output::png_data_uri;
use crate::pipeline::fallback::{cascade, Outcome, Tier};

/// Opacity of the overlay when no usable mask exists.
pub const FLAT_OPACITY: f32 = 0.7;

/// How the overlay was combined with the base.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlendMode {
    Masked,
    Flat,
}

#[derive(Debug, Clone)]
pub struct PostProcessStage {
    feather_radius: f32,
    harmonize_nudge: f32,
    denoise: bool,
}

impl PostProcessStage {
    pub fn new(feather_radius: f32, harmonize_nudge: f32, denoise: bool) -> Self {
        Self {
            feather_radius,
            harmonize_nudge,
            denoise,
        }
    }

    /// Blends `overlay` over `base` through the feathered mask, or flat at
    /// 0.7 when the mask is missing or undecodable, then harmonises tones
    /// toward `base`.
    pub fn blend_and_harmonize(
        &self,
        base: &DynamicImage,
        overlay: &DynamicImage,
        mask: Option<&[u8]>,
    ) -> (DynamicImage, BlendMode) {
        let base_rgba = base.to_rgba8();
        let overlay_rgba = overlay.to_rgba8();
        let (width, height) = base_rgba.dimensions();

        let mask = mask.filter(|m| !m.is_empty()).and_then(|m| decode(m).ok());
        let (blended, mode) = match mask {
            Some(mask) => {
                let alpha = filters::feather(
                    &filters::mask_alpha(&mask, width, height),
                    self.feather_radius,
                );
                (
                    composite::masked_blend(&base_rgba, &overlay_rgba, &alpha),
                    BlendMode::Masked,
                )
            }
            None => (
                composite::flat_blend(&base_rgba, &overlay_rgba, FLAT_OPACITY),
                BlendMode::Flat,
            ),
        };
        debug!(mode = ?mode, "Overlay blended");

        let harmonized = composite::harmonize(base, &blended, self.harmonize_nudge);
        (DynamicImage::ImageRgba8(harmonized), mode)
    }

    pub fn denoise(&self, image: DynamicImage) -> DynamicImage {
        DynamicImage::ImageRgba8(filters::denoise(&image.to_rgba8()))
    }

    /// Blend, then the configured denoise step.
    pub fn run(
        &self,
        base: &DynamicImage,
        overlay: &DynamicImage,
        mask: Option<&[u8]>,
    ) -> (DynamicImage, BlendMode) {
        let (mut image, mode) = self.blend_and_harmonize(base, overlay, mask);
        if self.denoise {
            image = self.denoise(image);
        }
        (image, mode)
    }
}

/// Enlarges the final image with the upscaler model, falling back to a
/// local Lanczos resize.
#[derive(Debug, Clone)]
pub struct UpscaleStage {
    model: String,
    factor: u32,
}

impl UpscaleStage {
    pub fn new(model: impl Into<String>, factor: u32) -> Self {
        Self {
            model: model.into(),
            factor,
        }
    }

    async fn from_model(
        &self,
        ctx: &StageContext,
        image: &DynamicImage,
    ) -> Result<DynamicImage, StageError> {
        let payload = json!({
            "image": png_data_uri(&encode_png(image)?),
            "scale": self.factor,
        });
        let output = ctx.call(&self.model, payload).await?;
        let upscaled = ctx.output_image(&output).await?;
        debug!(
            width = upscaled.width(),
            height = upscaled.height(),
            "Image upscaled by model"
        );
        Ok(upscaled)
    }

    async fn lanczos(&self, image: &DynamicImage) -> Result<DynamicImage, ImagingError> {
        let image = image.clone();
        let factor = self.factor;
        tokio::task::spawn_blocking(move || filters::upscale(&image, factor))
            .await
            .map_err(|e| ImagingError::Encode(format!("upscale task failed: {}", e)))?
    }

    /// The enlarged image; the input unchanged when every tier fails.
    pub async fn upscale(&self, ctx: &StageContext, image: DynamicImage) -> Outcome<DynamicImage> {
        cascade(
            "upscale",
            vec![
                Tier::new("model", self.from_model(ctx, &image)),
                Tier::new("lanczos", self.lanczos(&image)),
            ],
            || image.clone(),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::fallback::Source;
    use crate::test_support::{
        fast_policy, png_bytes, solid_image, MemoryBlobStore, ScriptedInference,
    };
    use image::{Rgba, RgbaImage};
    use std::sync::Arc;

    fn stage() -> PostProcessStage {
        PostProcessStage::new(8.0, 0.5, false)
    }

    fn ctx(inference: Arc<ScriptedInference>) -> StageContext {
        StageContext {
            inference,
            blobs: Arc::new(MemoryBlobStore::default()),
            policy: fast_policy(),
        }
    }

    #[test]
    fn test_empty_mask_uses_flat_blend() {
        let base = solid_image(16, 16, [0, 0, 0]);
        let overlay = solid_image(16, 16, [100, 100, 100]);

        let (out, mode) = stage().blend_and_harmonize(&base, &overlay, Some(&[]));
        assert_eq!(mode, BlendMode::Flat);
        assert_eq!(out.width(), 16);

        let (_, mode) = stage().blend_and_harmonize(&base, &overlay, Some(b"garbage"));
        assert_eq!(mode, BlendMode::Flat);

        let (_, mode) = stage().blend_and_harmonize(&base, &overlay, None);
        assert_eq!(mode, BlendMode::Flat);
    }

    #[test]
    fn test_mask_restricts_overlay() {
        let base = solid_image(32, 32, [0, 0, 0]);
        let overlay = solid_image(32, 32, [200, 200, 200]);
        let mask = DynamicImage::ImageRgba8(RgbaImage::from_fn(32, 32, |x, _| {
            if x < 16 {
                Rgba([0, 0, 0, 255])
            } else {
                Rgba([255, 255, 255, 255])
            }
        }));

        let stage = PostProcessStage::new(1.0, 0.0, false);
        let (out, mode) = stage.blend_and_harmonize(&base, &overlay, Some(&png_bytes(&mask)));
        assert_eq!(mode, BlendMode::Masked);
        let out = out.to_rgba8();
        assert!(out.get_pixel(1, 5).0[0] < 10);
        assert!(out.get_pixel(30, 5).0[0] > 190);
    }

    #[test]
    fn test_mask_is_resized_to_base() {
        let base = solid_image(20, 10, [0, 0, 0]);
        let overlay = solid_image(20, 10, [255, 255, 255]);
        let mask = png_bytes(&solid_image(5, 5, [255, 255, 255]));
        let (out, mode) = stage().blend_and_harmonize(&base, &overlay, Some(&mask));
        assert_eq!(mode, BlendMode::Masked);
        assert_eq!((out.width(), out.height()), (20, 10));
    }

    #[test]
    fn test_run_with_denoise_keeps_size() {
        let stage = PostProcessStage::new(8.0, 0.5, true);
        let base = solid_image(10, 10, [50, 50, 50]);
        let (out, _) = stage.run(&base, &base, None);
        assert_eq!((out.width(), out.height()), (10, 10));
    }

    #[tokio::test]
    async fn test_upscaler_model_output_is_used() {
        let upscaled = png_data_uri(&png_bytes(&solid_image(20, 20, [4, 5, 6])));
        let inference = Arc::new(ScriptedInference::new(move |_, _| Ok(json!(upscaled.clone()))));

        let outcome = UpscaleStage::new("xinntao/Real-ESRGAN", 2)
            .upscale(&ctx(inference.clone()), solid_image(10, 10, [50, 50, 50]))
            .await;

        assert_eq!(outcome.source, Source::Primary);
        assert_eq!(outcome.value.to_rgb8().get_pixel(3, 3).0, [4, 5, 6]);
        let calls = inference.calls.lock().unwrap();
        let (model, payload) = &calls[0];
        assert_eq!(model, "xinntao/Real-ESRGAN");
        assert_eq!(payload["scale"], 2);
        assert!(payload["image"]
            .as_str()
            .unwrap()
            .starts_with("data:image/png;base64,"));
    }

    #[tokio::test]
    async fn test_upscaler_failure_falls_back_to_lanczos() {
        let outcome = UpscaleStage::new("xinntao/Real-ESRGAN", 2)
            .upscale(
                &ctx(Arc::new(ScriptedInference::failing())),
                solid_image(10, 10, [50, 50, 50]),
            )
            .await;

        assert_eq!(outcome.source, Source::Fallback("lanczos"));
        assert_eq!((outcome.value.width(), outcome.value.height()), (20, 20));
        assert_eq!(outcome.failures[0].tier, "model");
    }
}
