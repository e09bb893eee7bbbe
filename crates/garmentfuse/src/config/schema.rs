use serde::{Deserialize, Serialize};

use crate::secrets::SecretSource;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FusionConfig {
    pub version: String,
    #[serde(default)]
    pub inference: InferenceConfig,
    #[serde(default)]
    pub models: ModelsConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub pipeline: PipelineSettings,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            inference: InferenceConfig::default(),
            models: ModelsConfig::default(),
            storage: StorageConfig::default(),
            database: DatabaseConfig::default(),
            pipeline: PipelineSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceConfig {
    /// Base URL of the inference service. Empty means "not configured":
    /// every model call fails and the stages fall back.
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub api_key: SecretSource,
    #[serde(default = "default_call_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_attempts")]
    pub attempts: u32,
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
}

fn default_call_timeout_secs() -> u64 {
    60
}

fn default_attempts() -> u32 {
    3
}

fn default_backoff_ms() -> u64 {
    400
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            api_key: SecretSource::from_env("GARMENTFUSE_INFERENCE_KEY"),
            timeout_secs: default_call_timeout_secs(),
            attempts: default_attempts(),
            backoff_ms: default_backoff_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsConfig {
    #[serde(default = "default_segmentation_model")]
    pub segmentation: String,
    #[serde(default = "default_canny_model")]
    pub edge_canny: String,
    #[serde(default = "default_hed_model")]
    pub edge_hed: String,
    #[serde(default = "default_generation_model")]
    pub generation: String,
    #[serde(default = "default_upscaler_model")]
    pub upscaler: String,
}

fn default_segmentation_model() -> String {
    "facebook/sam-vit-base".to_string()
}

fn default_canny_model() -> String {
    "lllyasviel/control_v11p_sd15_canny".to_string()
}

fn default_hed_model() -> String {
    "lllyasviel/control_v11p_sd15_hed".to_string()
}

fn default_generation_model() -> String {
    "stabilityai/stable-diffusion-xl-base-1.0".to_string()
}

fn default_upscaler_model() -> String {
    "xinntao/Real-ESRGAN".to_string()
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            segmentation: default_segmentation_model(),
            edge_canny: default_canny_model(),
            edge_hed: default_hed_model(),
            generation: default_generation_model(),
            upscaler: default_upscaler_model(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_blob_root")]
    pub blob_root: String,
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
}

fn default_blob_root() -> String {
    data_dir().join("blobs").to_string_lossy().to_string()
}

fn default_fetch_timeout_secs() -> u64 {
    30
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            blob_root: default_blob_root(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_path")]
    pub path: String,
}

fn default_database_path() -> String {
    data_dir().join("jobs.db").to_string_lossy().to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

/// Which structural map the edge stage asks for.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EdgeType {
    #[default]
    Canny,
    Hed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSettings {
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,
    #[serde(default = "default_job_timeout_secs")]
    pub job_timeout_secs: u64,
    /// Rescale the canonical 1024x1536 prompt points to the image size.
    #[serde(default)]
    pub scale_prompts_to_image: bool,
    #[serde(default)]
    pub edge_type: EdgeType,
    /// Placeholder label reported for every fabric; no classifier runs.
    #[serde(default = "default_texture_label")]
    pub texture_label: String,
    #[serde(default = "default_feather_radius")]
    pub feather_radius: f32,
    /// Fraction of the reference/composite tone gap closed by harmonisation.
    #[serde(default = "default_harmonize_nudge")]
    pub harmonize_nudge: f32,
    #[serde(default = "default_true")]
    pub denoise: bool,
    #[serde(default)]
    pub upscale: bool,
    #[serde(default = "default_upscale_factor")]
    pub upscale_factor: u32,
    #[serde(default = "default_true")]
    pub upload_motif_patches: bool,
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

fn default_max_concurrent_jobs() -> usize {
    num_cpus::get()
}

fn default_job_timeout_secs() -> u64 {
    600
}

fn default_texture_label() -> String {
    "woven".to_string()
}

fn default_feather_radius() -> f32 {
    8.0
}

fn default_harmonize_nudge() -> f32 {
    0.5
}

fn default_true() -> bool {
    true
}

fn default_upscale_factor() -> u32 {
    2
}

fn default_max_upload_bytes() -> usize {
    10 * 1024 * 1024
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: default_max_concurrent_jobs(),
            job_timeout_secs: default_job_timeout_secs(),
            scale_prompts_to_image: false,
            edge_type: EdgeType::default(),
            texture_label: default_texture_label(),
            feather_radius: default_feather_radius(),
            harmonize_nudge: default_harmonize_nudge(),
            denoise: true,
            upscale: false,
            upscale_factor: default_upscale_factor(),
            upload_motif_patches: true,
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

fn data_dir() -> std::path::PathBuf {
    dirs::data_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("garmentfuse")
}
