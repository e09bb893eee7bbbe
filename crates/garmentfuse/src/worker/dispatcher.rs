use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

use crate::error::StoreError;
use crate::job::JobUpdate;
use crate::pipeline::{Orchestrator, RunSummary};

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Dispatcher is shutting down")]
    ShuttingDown,
}

/// Runs jobs in the background, at most `max_concurrent` at a time, each
/// bounded by `job_timeout` once it has a slot.
pub struct Dispatcher {
    orchestrator: Arc<Orchestrator>,
    semaphore: Arc<Semaphore>,
    max_concurrent: u32,
    job_timeout: Duration,
    shutdown: Arc<AtomicBool>,
}

impl Dispatcher {
    /// # Panics
    /// Panics if `max_concurrent` is 0.
    pub fn new(orchestrator: Arc<Orchestrator>, max_concurrent: usize, job_timeout: Duration) -> Self {
        assert!(max_concurrent > 0, "max_concurrent must be > 0");
        let max_concurrent = u32::try_from(max_concurrent).unwrap_or(u32::MAX);
        info!("Dispatcher accepting {} concurrent jobs", max_concurrent);

        Self {
            orchestrator,
            semaphore: Arc::new(Semaphore::new(max_concurrent as usize)),
            max_concurrent,
            job_timeout,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    /// Schedules `job_id` and returns immediately.
    pub fn dispatch(&self, job_id: &str) -> Result<JoinHandle<()>, DispatchError> {
        if self.shutdown.load(Ordering::Relaxed) {
            return Err(DispatchError::ShuttingDown);
        }

        let orchestrator = Arc::clone(&self.orchestrator);
        let semaphore = Arc::clone(&self.semaphore);
        let job_timeout = self.job_timeout;
        let job_id = job_id.to_string();

        Ok(tokio::spawn(async move {
            let _permit = match semaphore.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    fail_job(&orchestrator, &job_id, "dispatch failed").await;
                    return;
                }
            };
            debug!("Job {} started", job_id);

            match tokio::time::timeout(job_timeout, orchestrator.run(&job_id)).await {
                Ok(Ok(RunSummary::Completed { degraded, .. })) => {
                    info!("Job {} completed (degraded: {})", job_id, degraded);
                }
                Ok(Ok(RunSummary::Failed { error, .. })) => {
                    warn!("Job {} failed: {}", job_id, error);
                }
                Ok(Ok(RunSummary::Skipped { status, .. })) => {
                    debug!("Job {} skipped, already {}", job_id, status);
                }
                Ok(Err(e)) => {
                    error!("Job {} could not run: {}", job_id, e);
                    fail_job(&orchestrator, &job_id, &e.to_string()).await;
                }
                Err(_) => {
                    let message = format!("timed out after {} s", job_timeout.as_secs());
                    warn!("Job {} {}", job_id, message);
                    fail_job(&orchestrator, &job_id, &message).await;
                }
            }
        }))
    }

    /// Stops accepting jobs and waits for running and queued ones to finish.
    pub async fn drain(&self) {
        info!("Draining dispatcher...");
        self.shutdown.store(true, Ordering::Relaxed);
        match self.semaphore.acquire_many(self.max_concurrent).await {
            Ok(_permits) => info!("All jobs have finished"),
            Err(_) => warn!("Dispatcher semaphore closed while draining"),
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }
}

/// Marks a job failed after the run itself could not record it.
async fn fail_job(orchestrator: &Orchestrator, job_id: &str, message: &str) {
    match orchestrator
        .store()
        .update(job_id, JobUpdate::fail(message))
        .await
    {
        Ok(job) => {
            if let Some(progress) = orchestrator.progress() {
                progress.tracker(job_id).failed(job.progress, message);
            }
        }
        // Finished in the meantime or never existed
        Err(StoreError::Terminal { .. }) | Err(StoreError::NotFound(_)) => {}
        Err(e) => error!("Could not mark job {} failed: {}", job_id, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::{InferenceClient, InferenceError};
    use crate::job::{FusionJob, GarmentCategory, JobInputs, JobStatus, NewJob, ProcessingMode};
    use crate::pipeline::PipelineConfig;
    use crate::store::{JobStore, MemoryJobStore};
    use crate::test_support::{fast_policy, png_bytes, solid_image, MemoryBlobStore};
    use async_trait::async_trait;
    use serde_json::Value;

    /// Never answers.
    struct HangingInference;

    #[async_trait]
    impl InferenceClient for HangingInference {
        async fn invoke(&self, _model_id: &str, _payload: Value) -> Result<Value, InferenceError> {
            futures_util::future::pending().await
        }
    }

    async fn setup(
        inference: Arc<dyn InferenceClient>,
    ) -> (Arc<MemoryJobStore>, Arc<Orchestrator>, String) {
        let store = Arc::new(MemoryJobStore::new());
        let blobs = Arc::new(MemoryBlobStore::default());
        let reference = blobs.insert("model", png_bytes(&solid_image(16, 24, [90, 90, 90])));
        let fabric = blobs.insert("fabric", png_bytes(&solid_image(8, 8, [200, 0, 0])));

        let job = FusionJob::new(NewJob {
            category: GarmentCategory::Saree,
            inputs: JobInputs {
                reference_model: reference,
                fabric_top: Some(fabric),
                fabric_bottom: None,
            },
            mode: ProcessingMode::Hybrid,
            strength: 0.5,
            user_consent: true,
        });
        let job_id = job.job_id.clone();
        store.create(job).await.unwrap();

        let mut config = PipelineConfig {
            policy: fast_policy(),
            ..PipelineConfig::default()
        };
        config.policy.timeout = Duration::from_secs(30);
        let orchestrator = Arc::new(Orchestrator::new(store.clone(), blobs, inference, config));
        (store, orchestrator, job_id)
    }

    #[tokio::test]
    async fn test_job_timeout_fails_job() {
        let (store, orchestrator, job_id) = setup(Arc::new(HangingInference)).await;
        let dispatcher = Dispatcher::new(orchestrator, 1, Duration::from_millis(100));

        dispatcher.dispatch(&job_id).unwrap().await.unwrap();

        let job = store.get(&job_id).await.unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.error.unwrap().starts_with("timed out after"));
    }

    #[tokio::test]
    async fn test_drain_rejects_new_jobs() {
        let (store, orchestrator, job_id) =
            setup(Arc::new(crate::test_support::ScriptedInference::failing())).await;
        let dispatcher = Dispatcher::new(orchestrator, 2, Duration::from_secs(30));

        let handle = dispatcher.dispatch(&job_id).unwrap();
        dispatcher.drain().await;
        handle.await.unwrap();

        assert!(dispatcher.is_shutdown());
        assert!(matches!(
            dispatcher.dispatch(&job_id),
            Err(DispatchError::ShuttingDown)
        ));
        assert_eq!(store.get(&job_id).await.unwrap().status, JobStatus::Completed);
    }
}
