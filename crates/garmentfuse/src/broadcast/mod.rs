//! Fan-out of job progress to any number of subscribers.

pub mod job_progress;

pub use job_progress::{FusionPhase, JobProgressBroadcaster, JobProgressEvent, JobProgressTracker};
