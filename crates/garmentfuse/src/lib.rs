pub mod api;
pub mod blob;
pub mod broadcast;
pub mod config;
pub mod db;
pub mod error;
pub mod imaging;
pub mod inference;
pub mod job;
pub mod pipeline;
pub mod sanitize;
pub mod secrets;
pub mod stages;
pub mod store;
pub mod telemetry;
pub mod worker;

#[cfg(test)]
pub(crate) mod test_support;

pub use api::{ApiError, CreateJobRequest, FusionApi, ResultResponse, StatusResponse, UploadedFile};
pub use blob::{BlobStore, FilesystemBlobStore};
pub use broadcast::{JobProgressBroadcaster, JobProgressEvent};
pub use config::{load_config, FusionConfig};
pub use error::{BlobError, ConfigError, FusionError, Result, StoreError};
pub use inference::{HttpInferenceClient, InferenceClient, InferenceError};
pub use job::{FusionJob, JobStatus};
pub use pipeline::{Orchestrator, PipelineConfig, PipelineError, RunSummary};
pub use secrets::{resolve_secret, SecretError, SecretSource};
pub use store::{JobStore, MemoryJobStore, SqliteJobStore};
pub use worker::Dispatcher;
