use chrono::{DateTime, Utc};

use crate::error::StoreError;

use super::model::{Candidate, Explainability, FusionJob, JobStatus};

/// The state change a [`JobUpdate`] requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// `pending -> processing`, progress reset to 0.
    Begin,
    /// `processing -> processing`, progress raised.
    Advance,
    /// `processing -> completed`.
    Complete,
    /// `pending | processing -> failed`.
    Fail,
}

impl Transition {
    fn target(&self) -> JobStatus {
        match self {
            Transition::Begin | Transition::Advance => JobStatus::Processing,
            Transition::Complete => JobStatus::Completed,
            Transition::Fail => JobStatus::Failed,
        }
    }

    fn allowed_from(&self, status: JobStatus) -> bool {
        match self {
            Transition::Begin => status == JobStatus::Pending,
            Transition::Advance | Transition::Complete => status == JobStatus::Processing,
            Transition::Fail => matches!(status, JobStatus::Pending | JobStatus::Processing),
        }
    }
}

/// A guarded patch over a job's mutable fields.
#[derive(Debug, Clone)]
pub struct JobUpdate {
    pub transition: Transition,
    pub progress: Option<u8>,
    pub result_url: Option<String>,
    pub candidates: Vec<Candidate>,
    pub explainability: Option<Explainability>,
    pub error: Option<String>,
}

impl JobUpdate {
    fn with(transition: Transition) -> Self {
        Self {
            transition,
            progress: None,
            result_url: None,
            candidates: Vec::new(),
            explainability: None,
            error: None,
        }
    }

    pub fn begin() -> Self {
        let mut update = Self::with(Transition::Begin);
        update.progress = Some(0);
        update
    }

    pub fn advance(progress: u8) -> Self {
        let mut update = Self::with(Transition::Advance);
        update.progress = Some(progress.min(100));
        update
    }

    pub fn complete(result_url: String, candidates: Vec<Candidate>) -> Self {
        let mut update = Self::with(Transition::Complete);
        update.progress = Some(100);
        update.result_url = Some(result_url);
        update.candidates = candidates;
        update
    }

    pub fn fail(error: impl Into<String>) -> Self {
        let mut update = Self::with(Transition::Fail);
        update.error = Some(error.into());
        update
    }

    pub fn with_explainability(mut self, explainability: Explainability) -> Self {
        self.explainability = Some(explainability);
        self
    }
}

impl FusionJob {
    /// Applies `update` after checking the state machine.
    ///
    /// Terminal jobs reject every update. Progress is never lowered.
    pub fn apply(&mut self, update: &JobUpdate, now: DateTime<Utc>) -> Result<(), StoreError> {
        if self.status.is_terminal() {
            return Err(StoreError::Terminal {
                job_id: self.job_id.clone(),
                status: self.status.to_string(),
            });
        }

        let target = update.transition.target();
        if !update.transition.allowed_from(self.status) {
            return Err(StoreError::InvalidTransition {
                job_id: self.job_id.clone(),
                from: self.status.to_string(),
                to: target.to_string(),
            });
        }

        match update.transition {
            Transition::Begin => self.progress = 0,
            Transition::Advance | Transition::Complete => {
                if let Some(progress) = update.progress {
                    self.progress = self.progress.max(progress.min(100));
                }
            }
            Transition::Fail => {}
        }

        match update.transition {
            Transition::Complete => {
                let result_url = update.result_url.clone().ok_or_else(|| {
                    StoreError::InvalidTransition {
                        job_id: self.job_id.clone(),
                        from: self.status.to_string(),
                        to: "completed without result".to_string(),
                    }
                })?;
                self.result_url = Some(result_url);
                self.candidates = update.candidates.clone();
                self.progress = 100;
            }
            Transition::Fail => {
                let message = update
                    .error
                    .clone()
                    .filter(|e| !e.trim().is_empty())
                    .unwrap_or_else(|| "Processing failed".to_string());
                self.error = Some(message);
            }
            Transition::Begin | Transition::Advance => {}
        }

        if let Some(ref explainability) = update.explainability {
            self.explainability = Some(explainability.clone());
        }

        self.status = target;
        self.updated_at = now;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::model::{GarmentCategory, JobInputs, NewJob, ProcessingMode};

    fn pending_job() -> FusionJob {
        FusionJob::new(NewJob {
            category: GarmentCategory::Dress,
            inputs: JobInputs {
                reference_model: "file:///m.png".to_string(),
                fabric_top: Some("file:///t.png".to_string()),
                fabric_bottom: None,
            },
            mode: ProcessingMode::Hybrid,
            strength: 0.5,
            user_consent: true,
        })
    }

    #[test]
    fn test_full_happy_path() {
        let mut job = pending_job();
        job.apply(&JobUpdate::begin(), Utc::now()).unwrap();
        assert_eq!(job.status, JobStatus::Processing);

        job.apply(&JobUpdate::advance(25), Utc::now()).unwrap();
        job.apply(&JobUpdate::advance(50), Utc::now()).unwrap();
        assert_eq!(job.progress, 50);

        let candidate = Candidate {
            url: "file:///r.png".to_string(),
            label: "final".to_string(),
            fallback: false,
        };
        job.apply(
            &JobUpdate::complete("file:///r.png".to_string(), vec![candidate]),
            Utc::now(),
        )
        .unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.progress, 100);
        assert_eq!(job.result_url.as_deref(), Some("file:///r.png"));
        assert!(job.error.is_none());
    }

    #[test]
    fn test_begin_twice_is_rejected() {
        let mut job = pending_job();
        job.apply(&JobUpdate::begin(), Utc::now()).unwrap();
        let err = job.apply(&JobUpdate::begin(), Utc::now()).unwrap_err();
        assert!(matches!(err, StoreError::InvalidTransition { .. }));
    }

    #[test]
    fn test_terminal_jobs_are_immutable() {
        let mut job = pending_job();
        job.apply(&JobUpdate::begin(), Utc::now()).unwrap();
        job.apply(&JobUpdate::fail("boom"), Utc::now()).unwrap();
        assert_eq!(job.status, JobStatus::Failed);

        for update in [
            JobUpdate::begin(),
            JobUpdate::advance(90),
            JobUpdate::fail("again"),
        ] {
            let err = job.apply(&update, Utc::now()).unwrap_err();
            assert!(matches!(err, StoreError::Terminal { .. }));
        }
        assert_eq!(job.error.as_deref(), Some("boom"));
    }

    #[test]
    fn test_progress_never_decreases() {
        let mut job = pending_job();
        job.apply(&JobUpdate::begin(), Utc::now()).unwrap();
        job.apply(&JobUpdate::advance(80), Utc::now()).unwrap();
        job.apply(&JobUpdate::advance(25), Utc::now()).unwrap();
        assert_eq!(job.progress, 80);
    }

    #[test]
    fn test_advance_requires_processing() {
        let mut job = pending_job();
        let err = job.apply(&JobUpdate::advance(10), Utc::now()).unwrap_err();
        assert!(matches!(err, StoreError::InvalidTransition { .. }));
    }

    #[test]
    fn test_fail_keeps_progress_and_defaults_message() {
        let mut job = pending_job();
        job.apply(&JobUpdate::begin(), Utc::now()).unwrap();
        job.apply(&JobUpdate::advance(50), Utc::now()).unwrap();
        job.apply(&JobUpdate::fail("  "), Utc::now()).unwrap();
        assert_eq!(job.progress, 50);
        assert_eq!(job.error.as_deref(), Some("Processing failed"));
        assert!(job.result_url.is_none());
    }

    #[test]
    fn test_pending_job_can_fail_directly() {
        let mut job = pending_job();
        job.apply(&JobUpdate::fail("timed out"), Utc::now()).unwrap();
        assert_eq!(job.status, JobStatus::Failed);
    }
}
