use crate::config::{EdgeType, FusionConfig, ModelsConfig};
use crate::inference::CallPolicy;

pub struct PipelineConfig {
    pub models: ModelsConfig,
    pub policy: CallPolicy,
    pub edge_type: EdgeType,
    pub scale_prompts_to_image: bool,
    pub texture_label: String,
    pub feather_radius: f32,
    pub harmonize_nudge: f32,
    pub denoise: bool,
    /// `Some(factor)` when upscaling is enabled.
    pub upscale_factor: Option<u32>,
    pub upload_motif_patches: bool,
}

impl PipelineConfig {
    pub fn from_config(config: &FusionConfig) -> Self {
        let settings = &config.pipeline;
        Self {
            models: config.models.clone(),
            policy: CallPolicy::from_config(&config.inference),
            edge_type: settings.edge_type,
            scale_prompts_to_image: settings.scale_prompts_to_image,
            texture_label: settings.texture_label.clone(),
            feather_radius: settings.feather_radius,
            harmonize_nudge: settings.harmonize_nudge,
            denoise: settings.denoise,
            upscale_factor: settings.upscale.then_some(settings.upscale_factor),
            upload_motif_patches: settings.upload_motif_patches,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::from_config(&FusionConfig::default())
    }
}
