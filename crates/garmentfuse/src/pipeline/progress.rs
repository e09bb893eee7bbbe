use std::sync::Arc;

use tokio::sync::broadcast;

use crate::broadcast::job_progress::{FusionPhase, JobProgressEvent, JobProgressTracker};

/// Events emitted by the orchestrator during a run.
pub enum ProgressEvent {
    Phase {
        phase: FusionPhase,
        progress: u8,
        message: String,
    },
    Completed {
        result_url: String,
    },
    Failed {
        progress: u8,
        error: String,
    },
}

pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

/// No-op reporter for unit tests and unobserved runs.
pub struct NoopProgress;

impl ProgressReporter for NoopProgress {
    fn report(&self, _event: ProgressEvent) {}
}

/// Bridges pipeline events to the broadcast channel.
pub struct BroadcastProgress {
    tracker: JobProgressTracker,
}

impl BroadcastProgress {
    pub fn new(job_id: &str, sender: Arc<broadcast::Sender<JobProgressEvent>>) -> Self {
        Self {
            tracker: JobProgressTracker::new(job_id, sender),
        }
    }
}

impl ProgressReporter for BroadcastProgress {
    fn report(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::Phase {
                phase,
                progress,
                message,
            } => self.tracker.update_phase(phase, progress, &message),
            ProgressEvent::Completed { result_url } => self.tracker.completed(&result_url),
            ProgressEvent::Failed { progress, error } => self.tracker.failed(progress, &error),
        }
    }
}
