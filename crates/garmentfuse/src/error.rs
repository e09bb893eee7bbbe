use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FusionError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Job store error: {0}")]
    Store(#[from] StoreError),

    #[error("Blob store error: {0}")]
    Blob(#[from] BlobError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] crate::pipeline::PipelineError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("Secret error: {0}")]
    Secret(#[from] crate::secrets::SecretError),

    #[error("Inference error: {0}")]
    Inference(#[from] crate::inference::InferenceError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Schema validation failed: {errors}")]
    SchemaValidation { errors: String },

    #[error("Invalid model id for '{stage}': {reason}")]
    InvalidModel { stage: String, reason: String },
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Job already exists: {0}")]
    AlreadyExists(String),

    #[error("Job not found: {0}")]
    NotFound(String),

    #[error("Job {job_id} is {status} and can no longer be modified")]
    Terminal { job_id: String, status: String },

    #[error("Invalid transition for job {job_id}: {from} -> {to}")]
    InvalidTransition {
        job_id: String,
        from: String,
        to: String,
    },

    #[error("Corrupt job record {job_id}: {reason}")]
    Corrupt { job_id: String, reason: String },

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("Job store lock poisoned")]
    LockPoisoned,
}

#[derive(Error, Debug)]
pub enum BlobError {
    #[error("Failed to write blob '{}': {source}", crate::sanitize::redact_path(.path))]
    WriteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read blob '{}': {source}", crate::sanitize::redact_path(.path))]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid destination id '{0}'")]
    InvalidDestination(String),

    #[error("Unsupported URL scheme: {0}")]
    UnsupportedScheme(String),

    #[error("Invalid base64 payload: {0}")]
    InvalidBase64(String),

    #[error("HTTP fetch failed for {url}: {reason}")]
    Http { url: String, reason: String },

    #[error("Blob at {url} exceeds the {limit} byte limit")]
    TooLarge { url: String, limit: usize },

    #[error("Transform not supported by this blob store")]
    TransformUnsupported,

    #[error("Transform failed: {0}")]
    Transform(String),
}

impl crate::pipeline::fallback::FailureKind for BlobError {
    fn kind(&self) -> &'static str {
        match self {
            BlobError::WriteFile { .. } => "write failed",
            BlobError::ReadFile { .. } | BlobError::Http { .. } => "fetch failed",
            BlobError::TooLarge { .. } => "too large",
            BlobError::InvalidDestination(_) => "invalid destination",
            BlobError::UnsupportedScheme(_) => "unsupported url",
            BlobError::InvalidBase64(_) => "invalid data",
            BlobError::TransformUnsupported => "transform unsupported",
            BlobError::Transform(_) => "transform failed",
        }
    }
}

pub type Result<T> = std::result::Result<T, FusionError>;
