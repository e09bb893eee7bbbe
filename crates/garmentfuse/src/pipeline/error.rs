use thiserror::Error;

use crate::error::StoreError;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Job not found: {0}")]
    JobNotFound(String),

    /// The reference image could not be obtained or the result could not be
    /// persisted. The only error that fails a job. Only `context` is shown;
    /// `detail` is for logs.
    #[error("{context}")]
    FatalIo {
        context: &'static str,
        detail: String,
    },

    #[error("Job store error: {0}")]
    Store(#[from] StoreError),
}

impl PipelineError {
    pub(crate) fn fatal(context: &'static str, detail: impl std::fmt::Display) -> Self {
        PipelineError::FatalIo {
            context,
            detail: crate::sanitize::truncate_message(&detail.to_string(), 160),
        }
    }

    /// Underlying cause of a fatal error, unsuitable for users.
    pub fn detail(&self) -> Option<&str> {
        match self {
            PipelineError::FatalIo { detail, .. } => Some(detail),
            _ => None,
        }
    }
}
