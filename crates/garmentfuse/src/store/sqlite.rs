use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::JobStore;
use crate::db::job_repo::{self, JobRow};
use crate::db::Database;
use crate::error::StoreError;
use crate::job::{
    FusionJob, GarmentCategory, JobInputs, JobStatus, JobUpdate, ProcessingMode, Transition,
};

/// Durable store backed by the `fusion_jobs` table.
///
/// The guard runs on a freshly loaded row and the write is conditional on
/// the status that row had, so two racing writers cannot both succeed.
#[derive(Clone)]
pub struct SqliteJobStore {
    db: Database,
}

impl SqliteJobStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Most recently created jobs first.
    pub fn recent(&self, limit: u32) -> Result<Vec<FusionJob>, StoreError> {
        job_repo::list_recent(&self.db, limit)?
            .into_iter()
            .map(job_from_row)
            .collect()
    }
}

#[async_trait]
impl JobStore for SqliteJobStore {
    async fn create(&self, job: FusionJob) -> Result<(), StoreError> {
        if job_repo::find_by_id(&self.db, &job.job_id)?.is_some() {
            return Err(StoreError::AlreadyExists(job.job_id));
        }
        let row = row_from_job(&job)?;
        job_repo::insert(&self.db, &row)?;
        log::debug!("Created job {}", job.job_id);
        Ok(())
    }

    async fn find(&self, job_id: &str) -> Result<Option<FusionJob>, StoreError> {
        job_repo::find_by_id(&self.db, job_id)?
            .map(job_from_row)
            .transpose()
    }

    async fn update(&self, job_id: &str, update: JobUpdate) -> Result<FusionJob, StoreError> {
        let row = job_repo::find_by_id(&self.db, job_id)?
            .ok_or_else(|| StoreError::NotFound(job_id.to_string()))?;
        let expected_status = row.status.clone();
        let mut job = job_from_row(row)?;
        job.apply(&update, Utc::now())?;

        let updated_at = job.updated_at.to_rfc3339();
        let written = if update.transition == Transition::Begin {
            job_repo::begin(&self.db, job_id, &updated_at)?
        } else {
            job_repo::update_if_status(&self.db, &row_from_job(&job)?, &expected_status)?
        };

        if !written {
            log::warn!(
                "Job {} changed concurrently while applying {:?}",
                job_id,
                update.transition
            );
            return Err(StoreError::InvalidTransition {
                job_id: job_id.to_string(),
                from: expected_status,
                to: job.status.to_string(),
            });
        }

        log::debug!(
            "Job {} -> {} ({}%)",
            job_id,
            job.status,
            job.progress
        );
        Ok(job)
    }
}

fn row_from_job(job: &FusionJob) -> Result<JobRow, StoreError> {
    let corrupt = |e: serde_json::Error| StoreError::Corrupt {
        job_id: job.job_id.clone(),
        reason: e.to_string(),
    };

    let candidates = if job.candidates.is_empty() {
        None
    } else {
        Some(serde_json::to_string(&job.candidates).map_err(corrupt)?)
    };
    let explainability = job
        .explainability
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(corrupt)?;

    Ok(JobRow {
        id: job.job_id.clone(),
        status: job.status.as_str().to_string(),
        progress: job.progress,
        category: job.category.as_str().to_string(),
        reference_model: job.inputs.reference_model.clone(),
        fabric_top: job.inputs.fabric_top.clone(),
        fabric_bottom: job.inputs.fabric_bottom.clone(),
        mode: job.mode.as_str().to_string(),
        strength: f64::from(job.strength),
        user_consent: job.user_consent,
        result_url: job.result_url.clone(),
        candidates,
        explainability,
        error: job.error.clone(),
        created_at: job.created_at.to_rfc3339(),
        updated_at: job.updated_at.to_rfc3339(),
    })
}

fn job_from_row(row: JobRow) -> Result<FusionJob, StoreError> {
    let id = row.id.clone();
    let corrupt = |reason: String| StoreError::Corrupt {
        job_id: id.clone(),
        reason,
    };

    let status: JobStatus = row.status.parse().map_err(corrupt)?;
    let category: GarmentCategory = row.category.parse().map_err(corrupt)?;
    let mode: ProcessingMode = row.mode.parse().map_err(corrupt)?;
    let candidates = match row.candidates {
        Some(ref json) => serde_json::from_str(json).map_err(|e| corrupt(e.to_string()))?,
        None => Vec::new(),
    };
    let explainability = match row.explainability {
        Some(ref json) => Some(serde_json::from_str(json).map_err(|e| corrupt(e.to_string()))?),
        None => None,
    };

    Ok(FusionJob {
        job_id: row.id,
        status,
        progress: row.progress.min(100),
        category,
        inputs: JobInputs {
            reference_model: row.reference_model,
            fabric_top: row.fabric_top,
            fabric_bottom: row.fabric_bottom,
        },
        mode,
        strength: row.strength as f32,
        user_consent: row.user_consent,
        result_url: row.result_url,
        candidates,
        explainability,
        error: row.error,
        created_at: parse_timestamp(&row.created_at).map_err(corrupt)?,
        updated_at: parse_timestamp(&row.updated_at).map_err(corrupt)?,
    })
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| format!("invalid timestamp '{}': {}", value, e))
}
