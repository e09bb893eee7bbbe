use serde::{Deserialize, Serialize};

use crate::job::{Candidate, Explainability, FusionJob, JobStatus};

/// A file received with a creation request.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub filename: String,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

impl UploadedFile {
    pub fn new(filename: impl Into<String>, content_type: Option<&str>, bytes: Vec<u8>) -> Self {
        Self {
            filename: filename.into(),
            content_type: content_type.map(str::to_string),
            bytes,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CreateJobRequest {
    pub model_image: Option<UploadedFile>,
    pub top_fabric: Option<UploadedFile>,
    pub bottom_fabric: Option<UploadedFile>,
    pub category: String,
    /// Defaults to `hybrid`.
    pub mode: Option<String>,
    /// Defaults to 0.5.
    pub strength: Option<f32>,
    pub user_consent: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CreateJobResponse {
    pub job_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub job_id: String,
    pub status: JobStatus,
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&FusionJob> for StatusResponse {
    fn from(job: &FusionJob) -> Self {
        Self {
            job_id: job.job_id.clone(),
            status: job.status,
            progress: job.progress,
            error: job.error.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum ResultResponse {
    #[serde(rename_all = "camelCase")]
    Ready {
        job_id: String,
        result_url: String,
        candidates: Vec<Candidate>,
        #[serde(skip_serializing_if = "Option::is_none")]
        explainability: Option<Explainability>,
    },
    /// Not completed yet, or failed.
    #[serde(rename_all = "camelCase")]
    Pending {
        status: JobStatus,
        progress: u8,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

impl ResultResponse {
    pub fn status_code(&self) -> u16 {
        match self {
            ResultResponse::Ready { .. } => 200,
            ResultResponse::Pending { .. } => 202,
        }
    }
}

impl From<&FusionJob> for ResultResponse {
    fn from(job: &FusionJob) -> Self {
        match (&job.status, &job.result_url) {
            (JobStatus::Completed, Some(result_url)) => ResultResponse::Ready {
                job_id: job.job_id.clone(),
                result_url: result_url.clone(),
                candidates: job.candidates.clone(),
                explainability: job.explainability.clone(),
            },
            _ => ResultResponse::Pending {
                status: job.status,
                progress: job.progress,
                error: job.error.clone(),
            },
        }
    }
}
