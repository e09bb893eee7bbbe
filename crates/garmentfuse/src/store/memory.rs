use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::Utc;

use super::JobStore;
use crate::error::StoreError;
use crate::job::{FusionJob, JobUpdate};

/// In-process store. Jobs are lost when the process exits.
#[derive(Default)]
pub struct MemoryJobStore {
    jobs: RwLock<HashMap<String, FusionJob>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.jobs.read().map(|jobs| jobs.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create(&self, job: FusionJob) -> Result<(), StoreError> {
        let mut jobs = self.jobs.write().map_err(|_| StoreError::LockPoisoned)?;
        if jobs.contains_key(&job.job_id) {
            return Err(StoreError::AlreadyExists(job.job_id));
        }
        jobs.insert(job.job_id.clone(), job);
        Ok(())
    }

    async fn find(&self, job_id: &str) -> Result<Option<FusionJob>, StoreError> {
        let jobs = self.jobs.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(jobs.get(job_id).cloned())
    }

    async fn update(&self, job_id: &str, update: JobUpdate) -> Result<FusionJob, StoreError> {
        let mut jobs = self.jobs.write().map_err(|_| StoreError::LockPoisoned)?;
        let job = jobs
            .get_mut(job_id)
            .ok_or_else(|| StoreError::NotFound(job_id.to_string()))?;

        // Apply to a copy so a rejected update leaves the record untouched.
        let mut next = job.clone();
        next.apply(&update, Utc::now())?;
        *job = next.clone();
        Ok(next)
    }
}
