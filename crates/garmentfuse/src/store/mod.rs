//! Job persistence contract.
//!
//! Every mutation goes through [`JobStore::update`], which applies the
//! state-machine guard in [`FusionJob::apply`] atomically with the write.

use async_trait::async_trait;

use crate::error::StoreError;
use crate::job::{FusionJob, JobUpdate};

mod memory;
mod sqlite;

pub use memory::MemoryJobStore;
pub use sqlite::SqliteJobStore;

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Inserts a new job. Fails with `AlreadyExists` on id collision.
    async fn create(&self, job: FusionJob) -> Result<(), StoreError>;

    async fn find(&self, job_id: &str) -> Result<Option<FusionJob>, StoreError>;

    /// Applies a guarded update and returns the job as stored afterwards.
    async fn update(&self, job_id: &str, update: JobUpdate) -> Result<FusionJob, StoreError>;

    async fn get(&self, job_id: &str) -> Result<FusionJob, StoreError> {
        self.find(job_id)
            .await?
            .ok_or_else(|| StoreError::NotFound(job_id.to_string()))
    }
}
