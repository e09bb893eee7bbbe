use std::sync::Arc;

use image::DynamicImage;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::debug;

use super::features::FabricFeatures;
use super::segmentation::SegmentationMasks;
use super::{StageContext, StageError};
use crate::error::BlobError;
use crate::imaging::composite::{self, Band, CompositeParams};
use crate::imaging::{encode_png, parse_hex_color, ImagingError};
use crate::inference::output::png_data_uri;
use crate::inference::InferenceError;
use crate::job::{GarmentCategory, GarmentRegion, ProcessingMode};
use crate::pipeline::fallback::{cascade, FailureKind, Outcome, Tier};

pub const NEGATIVE_PROMPT: &str =
    "no faces, no logos, no text, no watermarks, no surreal distortions, avoid unnatural stretching";

const GUIDANCE_SCALE: f64 = 8.0;
const INFERENCE_STEPS: u32 = 28;
const CONTROLNET_WEIGHT: f64 = 1.0;
const IP_ADAPTER_SCALE: f64 = 0.8;
const OVERLAY_ALPHA: f32 = 0.6;

// Final full-image pass that smooths seams between regions.
const FINAL_PASS_STRENGTH: f64 = 0.45;
const FINAL_PASS_GUIDANCE_SCALE: f64 = 7.5;
const FINAL_PASS_STEPS: u32 = 20;
const FINAL_PASS_CONTROLNET_WEIGHT: f64 = 0.8;
const FINAL_PASS_ATTEMPTS: u32 = 2;

#[derive(Error, Debug)]
pub enum GenerationError {
    #[error("missing {what} for {region} region")]
    MissingConditioning {
        region: GarmentRegion,
        what: &'static str,
    },

    #[error(transparent)]
    Inference(#[from] InferenceError),

    #[error("model input unavailable: {0}")]
    Input(#[from] BlobError),

    #[error(transparent)]
    Stage(#[from] StageError),

    #[error(transparent)]
    Imaging(#[from] ImagingError),

    #[error("fabric image unavailable for {0} region")]
    FabricUnavailable(GarmentRegion),

    #[error("no fabric to apply")]
    NoFabric,

    #[error("compositing task failed: {0}")]
    Task(String),
}

impl FailureKind for GenerationError {
    fn kind(&self) -> &'static str {
        match self {
            GenerationError::MissingConditioning { .. } => "missing conditioning",
            GenerationError::Inference(e) => e.kind(),
            GenerationError::Input(e) => e.kind(),
            GenerationError::Stage(e) => e.kind(),
            GenerationError::Imaging(e) => e.kind(),
            GenerationError::FabricUnavailable(_) => "fabric unavailable",
            GenerationError::NoFabric => "no fabric",
            GenerationError::Task(_) => "task failed",
        }
    }
}

pub struct GenerationRequest<'a> {
    pub reference: &'a DynamicImage,
    pub reference_bytes: &'a [u8],
    pub reference_url: &'a str,
    pub masks: &'a SegmentationMasks,
    /// A structural edge map; `None` when edge extraction fell back to the
    /// source image.
    pub edge_map: Option<&'a str>,
    /// Present fabrics, top before bottom.
    pub fabrics: &'a [FabricFeatures],
    pub category: GarmentCategory,
    pub mode: ProcessingMode,
    pub strength: f32,
}

/// Mode-specific inpainting prompt for one fabric.
pub fn build_prompt(
    mode: ProcessingMode,
    category: GarmentCategory,
    fabric: &FabricFeatures,
) -> String {
    let region = fabric.region;
    let description = fabric.describe();
    match mode {
        ProcessingMode::Silhouette => format!(
            "Photorealistic inpainting. Preserve the model's exact pose, silhouette and body shape. \
             Apply the exact fabric texture and pattern from the reference fabric image to the {region} \
             region of the {category}. Use the fabric colors: {description}. Keep the garment's \
             silhouette, seams and folds. Do not change the model's pose, face, skin, hands or background."
        ),
        ProcessingMode::Texture => format!(
            "Photorealistic inpainting. Apply the exact fabric pattern and texture from the reference \
             fabric image to the {region} region of the {category}. Match the fabric's colors \
             ({description}), motifs and texture details precisely. Preserve the model's pose and \
             silhouette. Keep face and skin unmodified. Let the pattern follow the garment's folds and seams."
        ),
        ProcessingMode::Hybrid => format!(
            "Balanced fusion: apply the exact fabric texture from the reference image to the {region} \
             region of the {category} while preserving the model's pose and silhouette. Match fabric \
             colors ({description}) and patterns precisely. Keep natural drape, seams and folds. \
             Do not modify face, skin or background."
        ),
    }
}

/// Whole-garment prompt for the final pass, described by the first fabric.
pub fn final_pass_prompt(fabric: &FabricFeatures) -> String {
    format!(
        "Balanced fusion: apply the exact fabric texture from the reference image to the garment \
         while preserving the model's pose and silhouette. Match fabric colors ({}) and patterns \
         precisely. Keep natural garment drape, seams and folds. Do not modify face, skin or background.",
        fabric.describe()
    )
}

fn final_pass_payload(init_image: &str, prompt: String, edge_map: &str) -> Value {
    json!({
        "init_image": init_image,
        "prompt": prompt,
        "negative_prompt": NEGATIVE_PROMPT,
        "parameters": {
            "strength": FINAL_PASS_STRENGTH,
            "guidance_scale": FINAL_PASS_GUIDANCE_SCALE,
            "num_inference_steps": FINAL_PASS_STEPS,
            "controlnet": { "image": edge_map, "weight": FINAL_PASS_CONTROLNET_WEIGHT },
        },
    })
}

fn inpaint_payload(
    init_image: &str,
    mask: &str,
    prompt: String,
    strength: f32,
    edge_map: &str,
    fabric_url: &str,
) -> Value {
    json!({
        "init_image": init_image,
        "mask": mask,
        "prompt": prompt,
        "negative_prompt": NEGATIVE_PROMPT,
        "parameters": {
            "strength": strength,
            "guidance_scale": GUIDANCE_SCALE,
            "num_inference_steps": INFERENCE_STEPS,
            "controlnet": { "image": edge_map, "weight": CONTROLNET_WEIGHT },
        },
        "ip_adapter_image": fabric_url,
        "ip_adapter_scale": IP_ADAPTER_SCALE,
        "reference_image": fabric_url,
    })
}

/// The band each fabric covers: the whole frame for a single fabric,
/// region bands when both are present.
fn bands(fabrics: &[FabricFeatures]) -> Vec<(Band, &FabricFeatures)> {
    if fabrics.len() == 1 {
        return vec![(Band::FULL, &fabrics[0])];
    }
    fabrics
        .iter()
        .map(|fabric| {
            let band = match fabric.region {
                GarmentRegion::Top => Band::TOP,
                GarmentRegion::Bottom => Band::BOTTOM,
            };
            (band, fabric)
        })
        .collect()
}

pub struct GenerationStage {
    model: String,
}

impl GenerationStage {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
        }
    }

    async fn inpaint(
        &self,
        ctx: &StageContext,
        request: &GenerationRequest<'_>,
    ) -> Result<Vec<u8>, GenerationError> {
        if request.fabrics.is_empty() {
            return Err(GenerationError::NoFabric);
        }

        let mut init_image: Option<String> = None;
        let mut latest = None;
        for fabric in request.fabrics {
            let mask = request.masks.region(fabric.region).ok_or(
                GenerationError::MissingConditioning {
                    region: fabric.region,
                    what: "mask",
                },
            )?;
            let edge_map = request
                .edge_map
                .ok_or(GenerationError::MissingConditioning {
                    region: fabric.region,
                    what: "edge map",
                })?;

            let init = match init_image.take() {
                Some(init) => init,
                None => ctx.model_input(request.reference_url).await?,
            };
            let payload = inpaint_payload(
                &init,
                &ctx.model_input(mask).await?,
                build_prompt(request.mode, request.category, fabric),
                request.strength,
                &ctx.model_input(edge_map).await?,
                &ctx.model_input(&fabric.url).await?,
            );
            let output = ctx.call(&self.model, payload).await?;
            let png = encode_png(&ctx.output_image(&output).await?)?;

            debug!(region = %fabric.region, size = png.len(), "Region inpainted");
            init_image = Some(png_data_uri(&png));
            latest = Some(png);
        }

        latest.ok_or(GenerationError::NoFabric)
    }

    async fn composite(&self, request: &GenerationRequest<'_>) -> Result<Vec<u8>, GenerationError> {
        if request.fabrics.is_empty() {
            return Err(GenerationError::NoFabric);
        }
        let layers = bands(request.fabrics)
            .into_iter()
            .map(|(band, fabric)| {
                fabric
                    .image
                    .clone()
                    .map(|image| (band, image))
                    .ok_or(GenerationError::FabricUnavailable(fabric.region))
            })
            .collect::<Result<Vec<(Band, Arc<DynamicImage>)>, _>>()?;

        let base = request.reference.clone();
        let params = CompositeParams::from_strength(request.strength);
        tokio::task::spawn_blocking(move || {
            let layers: Vec<(Band, &DynamicImage)> =
                layers.iter().map(|(band, image)| (*band, image.as_ref())).collect();
            let out = composite::fabric_composite(&base, &layers, params);
            encode_png(&DynamicImage::ImageRgba8(out))
        })
        .await
        .map_err(|e| GenerationError::Task(e.to_string()))?
        .map_err(GenerationError::from)
    }

    fn color_overlay(&self, request: &GenerationRequest<'_>) -> Result<Vec<u8>, GenerationError> {
        if request.fabrics.is_empty() {
            return Err(GenerationError::NoFabric);
        }
        let mut out = request.reference.to_rgba8();
        for (band, fabric) in bands(request.fabrics) {
            let color = parse_hex_color(&fabric.dominant_color)?;
            composite::color_overlay(&mut out, color, band, OVERLAY_ALPHA);
        }
        Ok(encode_png(&DynamicImage::ImageRgba8(out))?)
    }

    async fn refine(
        &self,
        ctx: &StageContext,
        generated: &[u8],
        edge_map: Option<&str>,
        fabrics: &[FabricFeatures],
    ) -> Result<Vec<u8>, GenerationError> {
        let fabric = fabrics.first().ok_or(GenerationError::NoFabric)?;
        let edge_map = edge_map.ok_or(GenerationError::MissingConditioning {
            region: fabric.region,
            what: "edge map",
        })?;

        let payload = final_pass_payload(
            &png_data_uri(generated),
            final_pass_prompt(fabric),
            &ctx.model_input(edge_map).await?,
        );
        let output = ctx
            .call_with_attempts(&self.model, payload, FINAL_PASS_ATTEMPTS)
            .await?;
        let png = encode_png(&ctx.output_image(&output).await?)?;
        debug!(size = png.len(), "Final pass finished");
        Ok(png)
    }

    /// A full-image hybrid pass over `generated` that reconciles seams
    /// between regions. Yields an extra candidate; `None` when the model is
    /// unavailable or no structural edge map exists.
    pub async fn final_pass(
        &self,
        ctx: &StageContext,
        generated: &[u8],
        edge_map: Option<&str>,
        fabrics: &[FabricFeatures],
    ) -> Outcome<Option<Vec<u8>>> {
        let refined = async {
            self.refine(ctx, generated, edge_map, fabrics)
                .await
                .map(Some)
        };
        cascade("final_pass", vec![Tier::new("model", refined)], || None).await
    }

    /// Generated image bytes: model inpainting per region, else a fabric
    /// composite, else a colour overlay, else the reference unchanged.
    pub async fn generate(
        &self,
        ctx: &StageContext,
        request: &GenerationRequest<'_>,
    ) -> Outcome<Vec<u8>> {
        let overlay = async { self.color_overlay(request) };
        cascade(
            "generation",
            vec![
                Tier::new("model", self.inpaint(ctx, request)),
                Tier::new("composite", self.composite(request)),
                Tier::new("overlay", overlay),
            ],
            || request.reference_bytes.to_vec(),
        )
        .await
    }
}
