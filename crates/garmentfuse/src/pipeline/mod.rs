pub mod config;
pub mod context;
pub mod error;
pub mod fallback;
pub mod progress;
pub mod runner;

pub use config::PipelineConfig;
pub use context::RunContext;
pub use error::PipelineError;
pub use fallback::{cascade, FailureKind, Outcome, Source, Tier, TierFailure};
pub use progress::{BroadcastProgress, NoopProgress, ProgressEvent, ProgressReporter};
pub use runner::{Orchestrator, RunSummary};
