use image::DynamicImage;

use crate::job::{Explainability, FusionJob};
use crate::stages::{FabricFeatures, SegmentationMasks};

pub const FINAL_PASS_STAGE: &str = "final_pass";

/// State accumulated across the stages of one run.
pub struct RunContext {
    // Input, as stored after the Begin transition
    pub job: FusionJob,

    // Reference image, set before any stage runs
    pub reference_bytes: Vec<u8>,
    pub reference: Option<DynamicImage>,

    pub masks: SegmentationMasks,

    // Structural edge map; None when extraction fell back to the source image
    pub edge_map: Option<String>,

    pub fabrics: Vec<FabricFeatures>,

    // Generation output (PNG) and the tier label it came from
    pub generated: Option<Vec<u8>>,
    pub generation_source: Option<String>,
    pub generation_degraded: bool,

    // Output of the full-image final pass (PNG), when it succeeded
    pub refined: Option<Vec<u8>>,

    // Post-processed result (PNG)
    pub final_png: Option<Vec<u8>>,

    pub explainability: Explainability,

    // Reported reached progress
    pub progress: u8,
}

impl RunContext {
    pub fn new(job: FusionJob) -> Self {
        Self {
            job,
            reference_bytes: Vec::new(),
            reference: None,
            masks: SegmentationMasks::default(),
            edge_map: None,
            fabrics: Vec::new(),
            generated: None,
            generation_source: None,
            generation_degraded: false,
            refined: None,
            final_png: None,
            explainability: Explainability::default(),
            progress: 0,
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job.job_id
    }

    /// Whether any stage behind the final result fell back or defaulted.
    /// The final pass only adds a candidate, so it does not count.
    pub fn is_degraded(&self) -> bool {
        self.explainability
            .stages
            .iter()
            .filter(|stage| stage.stage != FINAL_PASS_STAGE)
            .any(|stage| stage.source != "primary")
    }
}
