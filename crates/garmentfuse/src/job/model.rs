use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a fusion job.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    /// Returns true for `completed` and `failed`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(format!("unknown job status '{}'", other)),
        }
    }
}

/// Garment category requested for a job.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum GarmentCategory {
    Lehenga,
    Blouse,
    Gown,
    Saree,
    Salwar,
    Dress,
    Top,
    Skirt,
    Other,
}

impl GarmentCategory {
    pub const ALL: [GarmentCategory; 9] = [
        GarmentCategory::Lehenga,
        GarmentCategory::Blouse,
        GarmentCategory::Gown,
        GarmentCategory::Saree,
        GarmentCategory::Salwar,
        GarmentCategory::Dress,
        GarmentCategory::Top,
        GarmentCategory::Skirt,
        GarmentCategory::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            GarmentCategory::Lehenga => "lehenga",
            GarmentCategory::Blouse => "blouse",
            GarmentCategory::Gown => "gown",
            GarmentCategory::Saree => "saree",
            GarmentCategory::Salwar => "salwar",
            GarmentCategory::Dress => "dress",
            GarmentCategory::Top => "top",
            GarmentCategory::Skirt => "skirt",
            GarmentCategory::Other => "other",
        }
    }
}

impl fmt::Display for GarmentCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GarmentCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        GarmentCategory::ALL
            .iter()
            .copied()
            .find(|c| c.as_str() == normalized)
            .ok_or_else(|| format!("unknown garment category '{}'", s))
    }
}

/// Selects the prompt used for ML generation.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingMode {
    /// Preserve the garment silhouette first.
    Silhouette,
    /// Prioritise matching the fabric texture.
    Texture,
    #[default]
    Hybrid,
}

impl ProcessingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingMode::Silhouette => "silhouette",
            ProcessingMode::Texture => "texture",
            ProcessingMode::Hybrid => "hybrid",
        }
    }
}

impl FromStr for ProcessingMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "silhouette" => Ok(ProcessingMode::Silhouette),
            "texture" => Ok(ProcessingMode::Texture),
            "hybrid" => Ok(ProcessingMode::Hybrid),
            other => Err(format!("unknown processing mode '{}'", other)),
        }
    }
}

/// Garment region a fabric is applied to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum GarmentRegion {
    Top,
    Bottom,
}

impl GarmentRegion {
    pub fn as_str(&self) -> &'static str {
        match self {
            GarmentRegion::Top => "top",
            GarmentRegion::Bottom => "bottom",
        }
    }
}

impl fmt::Display for GarmentRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Blob URLs for the job's source images.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JobInputs {
    /// Model/mannequin photo.
    pub reference_model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fabric_top: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fabric_bottom: Option<String>,
}

impl JobInputs {
    /// Present fabrics, top first.
    pub fn fabrics(&self) -> Vec<(GarmentRegion, &str)> {
        let mut fabrics = Vec::with_capacity(2);
        if let Some(ref url) = self.fabric_top {
            fabrics.push((GarmentRegion::Top, url.as_str()));
        }
        if let Some(ref url) = self.fabric_bottom {
            fabrics.push((GarmentRegion::Bottom, url.as_str()));
        }
        fabrics
    }
}

/// An alternative (or the primary) result image.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    pub url: String,
    pub label: String,
    /// True when the image came from a non-ML fallback path.
    #[serde(default)]
    pub fallback: bool,
}

/// Per-fabric features surfaced for transparency.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FabricSummary {
    pub region: GarmentRegion,
    pub colors: Vec<String>,
    pub dominant_color: String,
    pub texture: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub motif_examples: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MaskUrls {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bottom: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full: Option<String>,
}

/// Which tier of a stage's fallback chain produced its output.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StageReport {
    pub stage: String,
    /// `primary`, the fallback tier name, or `default`.
    pub source: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<String>,
}

/// Auxiliary data recorded while processing a job.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Explainability {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fabrics: Vec<FabricSummary>,
    #[serde(default)]
    pub masks: MaskUrls,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub edge_map_url: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stages: Vec<StageReport>,
}

/// The persisted unit of work.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FusionJob {
    pub job_id: String,
    pub status: JobStatus,
    pub progress: u8,
    pub category: GarmentCategory,
    pub inputs: JobInputs,
    pub mode: ProcessingMode,
    pub strength: f32,
    pub user_consent: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_url: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub candidates: Vec<Candidate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explainability: Option<Explainability>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Parameters accepted when creating a job.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub category: GarmentCategory,
    pub inputs: JobInputs,
    pub mode: ProcessingMode,
    pub strength: f32,
    pub user_consent: bool,
}

impl FusionJob {
    /// Creates a `pending` job with a fresh id. Strength is clamped to [0, 1].
    pub fn new(params: NewJob) -> Self {
        let now = Utc::now();
        let strength = if params.strength.is_finite() {
            params.strength.clamp(0.0, 1.0)
        } else {
            0.5
        };
        Self {
            job_id: uuid::Uuid::new_v4().to_string(),
            status: JobStatus::Pending,
            progress: 0,
            category: params.category,
            inputs: params.inputs,
            mode: params.mode,
            strength,
            user_consent: params.user_consent,
            result_url: None,
            candidates: Vec::new(),
            explainability: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.status.is_terminal()
    }
}
