use std::path::{Path, PathBuf};

use crate::config::schema::FusionConfig;
use crate::error::ConfigError;

const SCHEMA_JSON: &str = include_str!("../../schema/config-v1.json");

/// `$XDG_CONFIG_HOME/garmentfuse/config.json` (or the platform equivalent).
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("garmentfuse")
        .join("config.json")
}

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<FusionConfig, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<FusionConfig, ConfigError> {
    let json_value: serde_json::Value = serde_json::from_str(content)?;

    validate_schema(&json_value)?;

    let config: FusionConfig = serde_json::from_value(json_value)?;

    validate_config(&config)?;

    Ok(config)
}

fn validate_schema(json_value: &serde_json::Value) -> Result<(), ConfigError> {
    let schema: serde_json::Value =
        serde_json::from_str(SCHEMA_JSON).map_err(|e| ConfigError::Validation {
            message: format!("Invalid embedded schema JSON: {}", e),
        })?;

    let validator = jsonschema::validator_for(&schema).map_err(|e| ConfigError::Validation {
        message: format!("Failed to compile JSON schema: {}", e),
    })?;

    let error_messages: Vec<String> = validator
        .iter_errors(json_value)
        .map(|e| e.to_string())
        .collect();
    if !error_messages.is_empty() {
        return Err(ConfigError::SchemaValidation {
            errors: error_messages.join("; "),
        });
    }

    Ok(())
}

pub(crate) fn validate_config(config: &FusionConfig) -> Result<(), ConfigError> {
    if config.version != "1.0" {
        return Err(ConfigError::Validation {
            message: format!("Unsupported config version: {}", config.version),
        });
    }

    let models = [
        ("segmentation", &config.models.segmentation),
        ("edge_canny", &config.models.edge_canny),
        ("edge_hed", &config.models.edge_hed),
        ("generation", &config.models.generation),
        ("upscaler", &config.models.upscaler),
    ];
    for (stage, model_id) in models {
        if model_id.trim().is_empty() {
            return Err(ConfigError::InvalidModel {
                stage: stage.to_string(),
                reason: "Model id must not be empty".to_string(),
            });
        }
        if model_id.contains(char::is_whitespace) {
            return Err(ConfigError::InvalidModel {
                stage: stage.to_string(),
                reason: format!("Model id '{}' contains whitespace", model_id),
            });
        }
    }

    let base_url = config.inference.base_url.trim();
    if !base_url.is_empty() && !base_url.starts_with("http://") && !base_url.starts_with("https://")
    {
        return Err(ConfigError::Validation {
            message: format!("inference.base_url must be an http(s) URL, got '{}'", base_url),
        });
    }

    if config.inference.attempts == 0 {
        return Err(ConfigError::Validation {
            message: "inference.attempts must be at least 1".to_string(),
        });
    }

    let pipeline = &config.pipeline;
    if pipeline.max_concurrent_jobs == 0 {
        return Err(ConfigError::Validation {
            message: "pipeline.max_concurrent_jobs must be at least 1".to_string(),
        });
    }
    if !(pipeline.feather_radius.is_finite() && pipeline.feather_radius > 0.0) {
        return Err(ConfigError::Validation {
            message: format!(
                "pipeline.feather_radius must be positive, got {}",
                pipeline.feather_radius
            ),
        });
    }
    if !(0.0..=1.0).contains(&pipeline.harmonize_nudge) {
        return Err(ConfigError::Validation {
            message: format!(
                "pipeline.harmonize_nudge must be within [0, 1], got {}",
                pipeline.harmonize_nudge
            ),
        });
    }
    if !(1..=4).contains(&pipeline.upscale_factor) {
        return Err(ConfigError::Validation {
            message: format!(
                "pipeline.upscale_factor must be within 1..=4, got {}",
                pipeline.upscale_factor
            ),
        });
    }
    if pipeline.texture_label.trim().is_empty() {
        return Err(ConfigError::Validation {
            message: "pipeline.texture_label must not be empty".to_string(),
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::EdgeType;

    #[test]
    fn test_load_minimal_config_uses_defaults() {
        let config = load_config_from_str(r#"{ "version": "1.0" }"#).unwrap();
        assert_eq!(config.version, "1.0");
        assert_eq!(config.models.segmentation, "facebook/sam-vit-base");
        assert_eq!(
            config.models.generation,
            "stabilityai/stable-diffusion-xl-base-1.0"
        );
        assert_eq!(config.models.upscaler, "xinntao/Real-ESRGAN");
        assert_eq!(config.inference.timeout_secs, 60);
        assert_eq!(config.inference.attempts, 3);
        assert_eq!(config.pipeline.job_timeout_secs, 600);
        assert_eq!(config.pipeline.texture_label, "woven");
        assert_eq!(config.pipeline.edge_type, EdgeType::Canny);
        assert!(!config.pipeline.scale_prompts_to_image);
        assert!(config.pipeline.max_concurrent_jobs >= 1);
    }

    #[test]
    fn test_load_full_config() {
        let config_json = r#"
        {
            "version": "1.0",
            "inference": {
                "base_url": "https://inference.example.com/v1",
                "api_key": { "env": "MY_KEY" },
                "timeout_secs": 20,
                "attempts": 2,
                "backoff_ms": 100
            },
            "models": {
                "segmentation": "org/seg",
                "generation": "org/gen"
            },
            "storage": { "blob_root": "/tmp/blobs" },
            "database": { "path": "/tmp/jobs.db" },
            "pipeline": {
                "max_concurrent_jobs": 2,
                "edge_type": "hed",
                "feather_radius": 4.5,
                "upscale": true,
                "upscale_factor": 3
            }
        }
        "#;

        let config = load_config_from_str(config_json).unwrap();
        assert_eq!(config.inference.base_url, "https://inference.example.com/v1");
        assert_eq!(config.inference.api_key.env.as_deref(), Some("MY_KEY"));
        assert_eq!(config.models.segmentation, "org/seg");
        assert_eq!(config.models.edge_canny, "lllyasviel/control_v11p_sd15_canny");
        assert_eq!(config.storage.blob_root, "/tmp/blobs");
        assert_eq!(config.pipeline.edge_type, EdgeType::Hed);
        assert_eq!(config.pipeline.upscale_factor, 3);
    }

    #[test]
    fn test_unknown_version_rejected_by_schema() {
        let err = load_config_from_str(r#"{ "version": "2.0" }"#).unwrap_err();
        assert!(matches!(err, ConfigError::SchemaValidation { .. }));
    }

    #[test]
    fn test_unknown_field_rejected() {
        let err = load_config_from_str(r#"{ "version": "1.0", "face_protection": true }"#)
            .unwrap_err();
        assert!(matches!(err, ConfigError::SchemaValidation { .. }));
    }

    #[test]
    fn test_out_of_range_values_rejected() {
        let err = load_config_from_str(
            r#"{ "version": "1.0", "pipeline": { "upscale_factor": 8 } }"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::SchemaValidation { .. }));

        let err = load_config_from_str(
            r#"{ "version": "1.0", "pipeline": { "harmonize_nudge": 1.5 } }"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::SchemaValidation { .. }));
    }

    #[test]
    fn test_model_id_with_whitespace_rejected() {
        let err = load_config_from_str(
            r#"{ "version": "1.0", "models": { "generation": "org/ gen" } }"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidModel { .. }));
    }

    #[test]
    fn test_non_http_base_url_rejected() {
        let err = load_config_from_str(
            r#"{ "version": "1.0", "inference": { "base_url": "ftp://host" } }"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Validation { .. }));
    }

    #[test]
    fn test_invalid_json() {
        let err = load_config_from_str("{ not json").unwrap_err();
        assert!(matches!(err, ConfigError::ParseJson(_)));
    }

    #[test]
    fn test_load_from_missing_file() {
        let err = load_config("/definitely/not/a/config.json").unwrap_err();
        assert!(matches!(err, ConfigError::ReadFile { .. }));
    }

    #[test]
    fn test_default_config_passes_validation() {
        validate_config(&FusionConfig::default()).unwrap();
    }
}
