pub mod model;
pub mod update;

pub use model::{
    Candidate, Explainability, FabricSummary, FusionJob, GarmentCategory, GarmentRegion,
    JobInputs, JobStatus, MaskUrls, NewJob, ProcessingMode, StageReport,
};
pub use update::{JobUpdate, Transition};
