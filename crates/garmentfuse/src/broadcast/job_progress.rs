//! Job progress broadcaster for real-time status streaming.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::job::JobStatus;

/// Phase of a fusion run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FusionPhase {
    Queued,
    Segmenting,
    ExtractingFeatures,
    Generating,
    PostProcessing,
    Persisting,
    Completed,
    Failed,
}

impl std::fmt::Display for FusionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FusionPhase::Queued => write!(f, "Queued"),
            FusionPhase::Segmenting => write!(f, "Segmenting"),
            FusionPhase::ExtractingFeatures => write!(f, "Extracting features"),
            FusionPhase::Generating => write!(f, "Generating"),
            FusionPhase::PostProcessing => write!(f, "Post-processing"),
            FusionPhase::Persisting => write!(f, "Persisting"),
            FusionPhase::Completed => write!(f, "Completed"),
            FusionPhase::Failed => write!(f, "Failed"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobProgressEvent {
    pub job_id: String,
    pub phase: FusionPhase,
    pub status: JobStatus,
    /// Progress after this event, 0-100.
    pub progress: u8,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JobProgressEvent {
    pub fn new(job_id: &str, phase: FusionPhase, progress: u8, message: &str) -> Self {
        let status = match phase {
            FusionPhase::Queued => JobStatus::Pending,
            FusionPhase::Completed => JobStatus::Completed,
            FusionPhase::Failed => JobStatus::Failed,
            _ => JobStatus::Processing,
        };

        Self {
            job_id: job_id.to_string(),
            phase,
            status,
            progress,
            message: message.to_string(),
            timestamp: Utc::now(),
            result_url: None,
            error: None,
        }
    }

    pub fn completed(job_id: &str, result_url: &str) -> Self {
        let mut event = Self::new(job_id, FusionPhase::Completed, 100, "Fusion completed");
        event.result_url = Some(result_url.to_string());
        event
    }

    pub fn failed(job_id: &str, progress: u8, error: &str) -> Self {
        let mut event = Self::new(job_id, FusionPhase::Failed, progress, "Processing failed");
        event.error = Some(error.to_string());
        event
    }
}

#[derive(Clone)]
pub struct JobProgressBroadcaster {
    sender: Arc<broadcast::Sender<JobProgressEvent>>,
}

impl JobProgressBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn send(&self, event: JobProgressEvent) {
        // No active receivers is fine
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobProgressEvent> {
        self.sender.subscribe()
    }

    /// Tracker for one job. Does not emit anything by itself.
    pub fn tracker(&self, job_id: &str) -> JobProgressTracker {
        JobProgressTracker::new(job_id, Arc::clone(&self.sender))
    }

    pub fn sender(&self) -> Arc<broadcast::Sender<JobProgressEvent>> {
        Arc::clone(&self.sender)
    }
}

impl Default for JobProgressBroadcaster {
    fn default() -> Self {
        Self::new(100)
    }
}

/// Sends events for a single job.
pub struct JobProgressTracker {
    job_id: String,
    sender: Arc<broadcast::Sender<JobProgressEvent>>,
}

impl JobProgressTracker {
    pub fn new(job_id: &str, sender: Arc<broadcast::Sender<JobProgressEvent>>) -> Self {
        Self {
            job_id: job_id.to_string(),
            sender,
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn update_phase(&self, phase: FusionPhase, progress: u8, message: &str) {
        let _ = self
            .sender
            .send(JobProgressEvent::new(&self.job_id, phase, progress, message));
    }

    pub fn completed(&self, result_url: &str) {
        let _ = self
            .sender
            .send(JobProgressEvent::completed(&self.job_id, result_url));
    }

    pub fn failed(&self, progress: u8, error: &str) {
        let _ = self
            .sender
            .send(JobProgressEvent::failed(&self.job_id, progress, error));
    }
}
