//! Test harness wiring the fusion stack in an isolated temp directory.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use garmentfuse::api::{FusionApi, StatusResponse};
use garmentfuse::blob::FilesystemBlobStore;
use garmentfuse::broadcast::JobProgressBroadcaster;
use garmentfuse::inference::{CallPolicy, InferenceClient};
use garmentfuse::job::FusionJob;
use garmentfuse::pipeline::{Orchestrator, PipelineConfig};
use garmentfuse::store::{JobStore, MemoryJobStore};
use garmentfuse::worker::Dispatcher;

pub struct TestHarness {
    /// Holds the blob root alive.
    temp_dir: TempDir,
    pub store: Arc<MemoryJobStore>,
    pub blobs: Arc<FilesystemBlobStore>,
    pub progress: JobProgressBroadcaster,
    pub dispatcher: Arc<Dispatcher>,
    pub api: FusionApi,
}

impl TestHarness {
    pub fn new(inference: Arc<dyn InferenceClient>) -> Self {
        Self::with_job_timeout(inference, Duration::from_secs(60))
    }

    pub fn with_job_timeout(inference: Arc<dyn InferenceClient>, job_timeout: Duration) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let blobs = Arc::new(
            FilesystemBlobStore::new(temp_dir.path().join("blobs"), Duration::from_secs(5))
                .expect("Failed to create blob store"),
        );
        let store = Arc::new(MemoryJobStore::new());
        let progress = JobProgressBroadcaster::new(256);

        let config = PipelineConfig {
            policy: CallPolicy {
                timeout: Duration::from_secs(5),
                attempts: 1,
                backoff: Duration::ZERO,
            },
            ..PipelineConfig::default()
        };
        let orchestrator = Orchestrator::new(store.clone(), blobs.clone(), inference, config)
            .with_progress(progress.clone());
        let dispatcher = Arc::new(Dispatcher::new(Arc::new(orchestrator), 2, job_timeout));
        let api = FusionApi::new(store.clone(), blobs.clone(), dispatcher.clone());

        Self {
            temp_dir,
            store,
            blobs,
            progress,
            dispatcher,
            api,
        }
    }

    pub fn blob_root(&self) -> &std::path::Path {
        self.blobs.root()
    }

    pub async fn job(&self, job_id: &str) -> FusionJob {
        self.store.get(job_id).await.expect("job should exist")
    }

    /// Polls status until the job is completed or failed.
    pub async fn wait_for_terminal(&self, job_id: &str) -> StatusResponse {
        for _ in 0..400 {
            let status = self.api.status(job_id).await.expect("status query failed");
            if status.status.is_terminal() {
                return status;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        panic!("job {} did not finish in time", job_id);
    }
}
