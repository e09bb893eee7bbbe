use std::sync::Arc;

use chrono::Utc;
use log::{error, info};

use super::error::ApiError;
use super::types::{CreateJobRequest, CreateJobResponse, ResultResponse, StatusResponse, UploadedFile};
use crate::blob::{BlobSource, BlobStore, UploadOptions};
use crate::error::StoreError;
use crate::job::{FusionJob, GarmentCategory, JobInputs, JobUpdate, NewJob, ProcessingMode};
use crate::store::JobStore;
use crate::worker::Dispatcher;

/// Accepted upload extensions.
const ALLOWED_EXTENSIONS: [&str; 4] = ["jpeg", "jpg", "png", "webp"];
/// Accepted upload MIME types.
const ALLOWED_MIME_TYPES: [&str; 3] = ["image/jpeg", "image/png", "image/webp"];
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;
const DEFAULT_STRENGTH: f32 = 0.5;

/// Job creation and queries, independent of any HTTP framework.
pub struct FusionApi {
    store: Arc<dyn JobStore>,
    blobs: Arc<dyn BlobStore>,
    dispatcher: Arc<Dispatcher>,
    max_upload_bytes: usize,
}

impl FusionApi {
    pub fn new(
        store: Arc<dyn JobStore>,
        blobs: Arc<dyn BlobStore>,
        dispatcher: Arc<Dispatcher>,
    ) -> Self {
        Self {
            store,
            blobs,
            dispatcher,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
        }
    }

    pub fn with_max_upload_bytes(mut self, max_upload_bytes: usize) -> Self {
        self.max_upload_bytes = max_upload_bytes;
        self
    }

    /// Validates the request, stores the uploads, records a pending job and
    /// schedules it. Returns before any processing happens.
    pub async fn create_job(&self, request: CreateJobRequest) -> Result<CreateJobResponse, ApiError> {
        let model = request
            .model_image
            .as_ref()
            .ok_or_else(|| ApiError::validation("modelImage is required"))?;
        if request.top_fabric.is_none() && request.bottom_fabric.is_none() {
            return Err(ApiError::validation(
                "At least one fabric image (topFabric or bottomFabric) is required",
            ));
        }

        self.validate_file("modelImage", model)?;
        if let Some(ref top) = request.top_fabric {
            self.validate_file("topFabric", top)?;
        }
        if let Some(ref bottom) = request.bottom_fabric {
            self.validate_file("bottomFabric", bottom)?;
        }

        let category: GarmentCategory = request
            .category
            .parse()
            .map_err(|_| ApiError::validation("Valid category is required"))?;
        let mode = match request.mode.as_deref() {
            Some(mode) => mode
                .parse::<ProcessingMode>()
                .map_err(|_| ApiError::validation("Invalid processing mode"))?,
            None => ProcessingMode::default(),
        };
        let strength = request.strength.unwrap_or(DEFAULT_STRENGTH);
        if !(0.0..=1.0).contains(&strength) {
            return Err(ApiError::validation("strength must be between 0 and 1"));
        }

        let folder = format!(
            "fusion/uploads/{}-{}",
            Utc::now().timestamp_millis(),
            &uuid::Uuid::new_v4().simple().to_string()[..8]
        );
        let reference_model = self.store_upload(&folder, "model", model).await?;
        let fabric_top = match request.top_fabric {
            Some(ref file) => Some(self.store_upload(&folder, "top", file).await?),
            None => None,
        };
        let fabric_bottom = match request.bottom_fabric {
            Some(ref file) => Some(self.store_upload(&folder, "bottom", file).await?),
            None => None,
        };

        let job = FusionJob::new(NewJob {
            category,
            inputs: JobInputs {
                reference_model,
                fabric_top,
                fabric_bottom,
            },
            mode,
            strength,
            user_consent: request.user_consent,
        });
        let job_id = job.job_id.clone();
        self.store.create(job).await?;

        if let Err(e) = self.dispatcher.dispatch(&job_id) {
            error!("Could not schedule job {}: {}", job_id, e);
            self.mark_unscheduled(&job_id).await;
            return Err(ApiError::Internal("Job could not be scheduled".to_string()));
        }

        info!("Created fusion job {} ({})", job_id, category);
        Ok(CreateJobResponse { job_id })
    }

    pub async fn status(&self, job_id: &str) -> Result<StatusResponse, ApiError> {
        let job = self.store.get(job_id).await?;
        Ok(StatusResponse::from(&job))
    }

    /// `Ready` once completed; `Pending` (202) with the current status
    /// otherwise, including for failed jobs.
    pub async fn result(&self, job_id: &str) -> Result<ResultResponse, ApiError> {
        let job = self.store.get(job_id).await?;
        Ok(ResultResponse::from(&job))
    }

    async fn mark_unscheduled(&self, job_id: &str) {
        match self
            .store
            .update(job_id, JobUpdate::fail("dispatch failed"))
            .await
        {
            Ok(_) | Err(StoreError::Terminal { .. }) | Err(StoreError::NotFound(_)) => {}
            Err(e) => error!("Could not mark job {} failed: {}", job_id, e),
        }
    }

    fn validate_file(&self, field: &str, file: &UploadedFile) -> Result<(), ApiError> {
        if file.bytes.is_empty() {
            return Err(ApiError::validation(format!("{} is empty", field)));
        }
        if file.bytes.len() > self.max_upload_bytes {
            return Err(ApiError::validation(format!(
                "{} exceeds the {} byte upload limit",
                field, self.max_upload_bytes
            )));
        }
        if !is_allowed_image(file) {
            return Err(ApiError::validation(format!(
                "Only image files (PNG, JPG, JPEG, WEBP) are allowed for {}",
                field
            )));
        }
        Ok(())
    }

    async fn store_upload(
        &self,
        folder: &str,
        destination_id: &str,
        file: &UploadedFile,
    ) -> Result<String, ApiError> {
        self.blobs
            .upload(
                BlobSource::Bytes(file.bytes.clone()),
                destination_id,
                &UploadOptions::image(folder),
            )
            .await
            .map(|blob| blob.url)
            .map_err(|e| {
                error!("Upload of {} failed: {}", destination_id, e);
                ApiError::Internal("Upload failed".to_string())
            })
    }
}

/// True when either the extension or the declared content type is an
/// accepted image type.
fn is_allowed_image(file: &UploadedFile) -> bool {
    let extension_ok = std::path::Path::new(&file.filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            let ext = ext.to_ascii_lowercase();
            ALLOWED_EXTENSIONS.contains(&ext.as_str())
                && mime_guess::from_ext(&ext)
                    .first()
                    .is_some_and(|mime| ALLOWED_MIME_TYPES.contains(&mime.essence_str()))
        })
        .unwrap_or(false);

    let content_type_ok = file
        .content_type
        .as_deref()
        .map(|ct| {
            let essence = ct.split(';').next().unwrap_or(ct).trim().to_ascii_lowercase();
            ALLOWED_MIME_TYPES.contains(&essence.as_str()) || essence == "image/jpg"
        })
        .unwrap_or(false);

    extension_ok || content_type_ok
}
