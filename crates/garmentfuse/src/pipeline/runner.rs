use std::sync::Arc;

use image::DynamicImage;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::blob::{BlobSource, BlobStore, UploadOptions};
use crate::broadcast::job_progress::{FusionPhase, JobProgressBroadcaster};
use crate::error::StoreError;
use crate::imaging::{decode, encode_png};
use crate::inference::InferenceClient;
use crate::job::{Candidate, GarmentRegion, JobStatus, JobUpdate, StageReport};
use crate::sanitize;
use crate::stages::postprocess::BlendMode;
use crate::stages::{
    EdgeStage, FeatureStage, GenerationRequest, GenerationStage, PostProcessStage,
    SegmentationStage, StageContext, UpscaleStage,
};
use crate::store::JobStore;

use super::config::PipelineConfig;
use super::context::{RunContext, FINAL_PASS_STAGE};
use super::error::PipelineError;
use super::fallback::{recover, Source};
use super::progress::{BroadcastProgress, NoopProgress, ProgressEvent, ProgressReporter};

#[derive(Debug, Clone, PartialEq)]
pub enum RunSummary {
    Completed {
        job_id: String,
        result_url: String,
        /// True when any stage fell back or defaulted.
        degraded: bool,
    },
    Failed {
        job_id: String,
        error: String,
    },
    /// The job was not pending, so nothing ran.
    Skipped { job_id: String, status: JobStatus },
}

/// Drives a job through the stages and is the only writer of its status,
/// progress and result during a run.
pub struct Orchestrator {
    store: Arc<dyn JobStore>,
    stages: StageContext,
    config: PipelineConfig,
    segmentation: SegmentationStage,
    edges: EdgeStage,
    features: FeatureStage,
    generation: GenerationStage,
    postprocess: PostProcessStage,
    upscale: Option<UpscaleStage>,
    progress: Option<JobProgressBroadcaster>,
}

/// Chooses inline decoding or a fetch for a stored mask or edge reference.
fn blob_source(reference: &str) -> BlobSource {
    if reference.contains("://") {
        BlobSource::Url(reference.to_string())
    } else {
        BlobSource::Base64(reference.to_string())
    }
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn JobStore>,
        blobs: Arc<dyn BlobStore>,
        inference: Arc<dyn InferenceClient>,
        config: PipelineConfig,
    ) -> Self {
        let models = &config.models;
        let segmentation =
            SegmentationStage::new(&models.segmentation, config.scale_prompts_to_image);
        let edges = EdgeStage::new(&models.edge_canny, &models.edge_hed);
        let features = FeatureStage::new(&config.texture_label);
        let generation = GenerationStage::new(&models.generation);
        let postprocess =
            PostProcessStage::new(config.feather_radius, config.harmonize_nudge, config.denoise);
        let upscale = config
            .upscale_factor
            .map(|factor| UpscaleStage::new(&models.upscaler, factor));

        Self {
            store,
            stages: StageContext {
                inference,
                blobs,
                policy: config.policy,
            },
            config,
            segmentation,
            edges,
            features,
            generation,
            postprocess,
            upscale,
            progress: None,
        }
    }

    /// Emits progress events for every run to `broadcaster`.
    pub fn with_progress(mut self, broadcaster: JobProgressBroadcaster) -> Self {
        self.progress = Some(broadcaster);
        self
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    pub fn progress(&self) -> Option<&JobProgressBroadcaster> {
        self.progress.as_ref()
    }

    /// Runs the job with the configured progress reporter.
    pub async fn run(&self, job_id: &str) -> Result<RunSummary, PipelineError> {
        match &self.progress {
            Some(broadcaster) => {
                let reporter = BroadcastProgress::new(job_id, broadcaster.sender());
                self.run_with(job_id, &reporter).await
            }
            None => self.run_with(job_id, &NoopProgress).await,
        }
    }

    pub async fn run_with(
        &self,
        job_id: &str,
        progress: &dyn ProgressReporter,
    ) -> Result<RunSummary, PipelineError> {
        let existing = self
            .store
            .find(job_id)
            .await?
            .ok_or_else(|| PipelineError::JobNotFound(job_id.to_string()))?;

        let job = match self.store.update(job_id, JobUpdate::begin()).await {
            Ok(job) => job,
            Err(StoreError::InvalidTransition { .. }) | Err(StoreError::Terminal { .. }) => {
                info!(job_id, status = %existing.status, "Job is not pending, skipping run");
                return Ok(RunSummary::Skipped {
                    job_id: job_id.to_string(),
                    status: existing.status,
                });
            }
            Err(e) => return Err(e.into()),
        };

        let span = info_span!("pipeline",
            job_id = %job.job_id,
            category = %job.category,
            mode = job.mode.as_str(),
        );

        let mut ctx = RunContext::new(job);
        self.execute(&mut ctx, progress).instrument(span).await
    }

    async fn execute(
        &self,
        ctx: &mut RunContext,
        progress: &dyn ProgressReporter,
    ) -> Result<RunSummary, PipelineError> {
        progress.report(ProgressEvent::Phase {
            phase: FusionPhase::Segmenting,
            progress: 0,
            message: "Fusion started".to_string(),
        });

        match self.process(ctx, progress).await {
            Ok((result_url, candidates)) => {
                let update = JobUpdate::complete(result_url.clone(), candidates)
                    .with_explainability(ctx.explainability.clone());
                self.store.update(ctx.job_id(), update).await?;

                let degraded = ctx.is_degraded();
                info!(degraded, "Fusion completed");
                progress.report(ProgressEvent::Completed {
                    result_url: result_url.clone(),
                });
                Ok(RunSummary::Completed {
                    job_id: ctx.job_id().to_string(),
                    result_url,
                    degraded,
                })
            }
            Err(e) => self.record_failure(ctx, progress, e).await,
        }
    }

    async fn record_failure(
        &self,
        ctx: &RunContext,
        progress: &dyn ProgressReporter,
        error: PipelineError,
    ) -> Result<RunSummary, PipelineError> {
        let message = error.to_string();
        warn!(error = %message, detail = error.detail().unwrap_or(""), "Fusion failed");

        match self
            .store
            .update(ctx.job_id(), JobUpdate::fail(message.clone()))
            .await
        {
            Ok(_) => {
                progress.report(ProgressEvent::Failed {
                    progress: ctx.progress,
                    error: message.clone(),
                });
                Ok(RunSummary::Failed {
                    job_id: ctx.job_id().to_string(),
                    error: message,
                })
            }
            Err(store_error) => {
                warn!(error = %store_error, "Could not record job failure");
                match error {
                    PipelineError::Store(_) => Err(error),
                    _ => Err(store_error.into()),
                }
            }
        }
    }

    async fn process(
        &self,
        ctx: &mut RunContext,
        progress: &dyn ProgressReporter,
    ) -> Result<(String, Vec<Candidate>), PipelineError> {
        self.step_fetch_reference(ctx)
            .instrument(info_span!("fetch_reference"))
            .await?;

        self.step_segment(ctx)
            .instrument(info_span!("segmentation"))
            .await;
        self.advance(ctx, progress, FusionPhase::Segmenting, 25, "Segmentation finished")
            .await?;

        self.step_edges(ctx).instrument(info_span!("edges")).await;
        self.step_features(ctx)
            .instrument(info_span!("features"))
            .await;
        self.advance(
            ctx,
            progress,
            FusionPhase::ExtractingFeatures,
            50,
            "Fabric features extracted",
        )
        .await?;

        self.step_generate(ctx)
            .instrument(info_span!("generation"))
            .await?;
        self.advance(ctx, progress, FusionPhase::Generating, 80, "Generation finished")
            .await?;

        self.step_final_pass(ctx)
            .instrument(info_span!("final_pass"))
            .await;
        self.advance(ctx, progress, FusionPhase::Generating, 86, "Final pass finished")
            .await?;

        self.step_postprocess(ctx)
            .instrument(info_span!("postprocess"))
            .await?;
        self.advance(
            ctx,
            progress,
            FusionPhase::PostProcessing,
            95,
            "Post-processing finished",
        )
        .await?;

        progress.report(ProgressEvent::Phase {
            phase: FusionPhase::Persisting,
            progress: 95,
            message: "Persisting result".to_string(),
        });
        self.step_persist(ctx).instrument(info_span!("persist")).await
    }

    async fn advance(
        &self,
        ctx: &mut RunContext,
        progress: &dyn ProgressReporter,
        phase: FusionPhase,
        value: u8,
        message: &str,
    ) -> Result<(), PipelineError> {
        let update = JobUpdate::advance(value).with_explainability(ctx.explainability.clone());
        let stored = self.store.update(ctx.job_id(), update).await?;
        ctx.progress = stored.progress;
        progress.report(ProgressEvent::Phase {
            phase,
            progress: stored.progress,
            message: message.to_string(),
        });
        Ok(())
    }

    fn reference(ctx: &RunContext) -> Result<&DynamicImage, PipelineError> {
        ctx.reference
            .as_ref()
            .ok_or_else(|| PipelineError::fatal("reference image unavailable", "not loaded"))
    }

    async fn upload_best_effort(
        &self,
        source: BlobSource,
        folder: String,
        destination_id: &str,
    ) -> Option<String> {
        match self
            .stages
            .blobs
            .upload(source, destination_id, &UploadOptions::image(folder))
            .await
        {
            Ok(blob) => Some(blob.url),
            Err(e) => {
                warn!(destination_id, error = %e, "Explainability upload failed");
                None
            }
        }
    }

    async fn step_fetch_reference(&self, ctx: &mut RunContext) -> Result<(), PipelineError> {
        let url = ctx.job.inputs.reference_model.clone();
        let bytes = self
            .stages
            .blobs
            .fetch(&url)
            .await
            .map_err(|e| PipelineError::fatal("reference image unavailable", e))?;

        let to_decode = bytes.clone();
        let image = tokio::task::spawn_blocking(move || decode(&to_decode))
            .await
            .map_err(|e| PipelineError::fatal("reference image unreadable", e))?
            .map_err(|e| PipelineError::fatal("reference image unreadable", e))?;

        debug!(
            url = %sanitize::redact_url(&url),
            width = image.width(),
            height = image.height(),
            "Reference image loaded"
        );
        ctx.reference_bytes = bytes;
        ctx.reference = Some(image);
        Ok(())
    }

    async fn step_segment(&self, ctx: &mut RunContext) {
        let dims = ctx
            .reference
            .as_ref()
            .map(|image| (image.width(), image.height()))
            .unwrap_or((0, 0));
        let outcome = self
            .segmentation
            .segment(&self.stages, &ctx.job.inputs.reference_model, dims)
            .await;
        ctx.explainability.stages.push(outcome.report("segmentation"));

        let folder = format!("fusion/{}/masks", ctx.job_id());
        for (name, mask) in outcome.value.named() {
            let url = self
                .upload_best_effort(blob_source(mask), folder.clone(), name)
                .await;
            match name {
                "top" => ctx.explainability.masks.top = url,
                "bottom" => ctx.explainability.masks.bottom = url,
                _ => ctx.explainability.masks.full = url,
            }
        }
        ctx.masks = outcome.value;
    }

    async fn step_edges(&self, ctx: &mut RunContext) {
        let outcome = self
            .edges
            .extract_edges(
                &self.stages,
                &ctx.job.inputs.reference_model,
                self.config.edge_type,
            )
            .await;
        ctx.explainability.stages.push(outcome.report("edges"));

        if outcome.source == Source::Default {
            ctx.edge_map = None;
            return;
        }
        ctx.explainability.edge_map_url = self
            .upload_best_effort(
                blob_source(&outcome.value),
                format!("fusion/{}/edge", ctx.job_id()),
                "edge",
            )
            .await;
        ctx.edge_map = Some(outcome.value);
    }

    async fn step_features(&self, ctx: &mut RunContext) {
        let fabrics: Vec<(GarmentRegion, String)> = ctx
            .job
            .inputs
            .fabrics()
            .into_iter()
            .map(|(region, url)| (region, url.to_string()))
            .collect();

        for (region, url) in fabrics {
            let outcome = self
                .features
                .extract_palette_and_patches(&self.stages, &url, region)
                .await;
            ctx.explainability
                .stages
                .push(outcome.report(&format!("features:{}", region)));

            let mut motif_urls = Vec::new();
            if self.config.upload_motif_patches {
                let folder = format!("fusion/{}/motifs/{}", ctx.job_id(), region);
                for (i, patch) in outcome.value.patches.iter().enumerate() {
                    if let Some(url) = self
                        .upload_best_effort(
                            BlobSource::Bytes(patch.clone()),
                            folder.clone(),
                            &format!("patch-{}", i),
                        )
                        .await
                    {
                        motif_urls.push(url);
                    }
                }
            }

            ctx.explainability
                .fabrics
                .push(outcome.value.summary(motif_urls));
            ctx.fabrics.push(outcome.value);
        }
    }

    async fn step_generate(&self, ctx: &mut RunContext) -> Result<(), PipelineError> {
        let reference = Self::reference(ctx)?;
        let request = GenerationRequest {
            reference,
            reference_bytes: &ctx.reference_bytes,
            reference_url: &ctx.job.inputs.reference_model,
            masks: &ctx.masks,
            edge_map: ctx.edge_map.as_deref(),
            fabrics: &ctx.fabrics,
            category: ctx.job.category,
            mode: ctx.job.mode,
            strength: ctx.job.strength,
        };
        let outcome = self.generation.generate(&self.stages, &request).await;

        let report = outcome.report("generation");
        ctx.generation_degraded = outcome.source.is_degraded();
        ctx.generation_source = Some(outcome.source.to_string());
        ctx.generated = Some(outcome.value);
        ctx.explainability.stages.push(report);
        Ok(())
    }

    async fn step_final_pass(&self, ctx: &mut RunContext) {
        let Some(generated) = ctx.generated.as_deref() else {
            return;
        };
        let outcome = self
            .generation
            .final_pass(&self.stages, generated, ctx.edge_map.as_deref(), &ctx.fabrics)
            .await;
        ctx.explainability.stages.push(outcome.report(FINAL_PASS_STAGE));
        ctx.refined = outcome.value;
    }

    async fn step_postprocess(&self, ctx: &mut RunContext) -> Result<(), PipelineError> {
        let reference = Self::reference(ctx)?.clone();
        let generated = ctx
            .generated
            .clone()
            .unwrap_or_else(|| ctx.reference_bytes.clone());

        let has_top = ctx.job.inputs.fabric_top.is_some();
        let has_bottom = ctx.job.inputs.fabric_bottom.is_some();
        let mask = match ctx.masks.for_fabrics(has_top, has_bottom) {
            Some(mask_ref) => match self.stages.resolve_image(mask_ref).await {
                Ok(bytes) => Some(bytes),
                Err(e) => {
                    warn!(error = %e, "Region mask unusable");
                    None
                }
            },
            None => None,
        };

        let stage = self.postprocess.clone();
        let (mut image, mode) = tokio::task::spawn_blocking(move || {
            let overlay = recover("decode generation", decode(&generated), reference.clone());
            stage.run(&reference, &overlay, mask.as_deref())
        })
        .await
        .map_err(|e| PipelineError::fatal("post-processing failed", e))?;

        ctx.explainability.stages.push(StageReport {
            stage: "postprocess".to_string(),
            source: match mode {
                BlendMode::Masked => Source::Primary,
                BlendMode::Flat => Source::Fallback("flat"),
            }
            .to_string(),
            failures: Vec::new(),
        });

        if let Some(upscale) = &self.upscale {
            let outcome = upscale.upscale(&self.stages, image).await;
            ctx.explainability.stages.push(outcome.report("upscale"));
            image = outcome.value;
        }

        let png = tokio::task::spawn_blocking(move || encode_png(&image))
            .await
            .map_err(|e| PipelineError::fatal("post-processing failed", e))?
            .map_err(|e| PipelineError::fatal("result encoding failed", e))?;
        ctx.final_png = Some(png);
        Ok(())
    }

    async fn step_persist(
        &self,
        ctx: &mut RunContext,
    ) -> Result<(String, Vec<Candidate>), PipelineError> {
        let final_png = ctx
            .final_png
            .take()
            .ok_or_else(|| PipelineError::fatal("result upload failed", "no result produced"))?;
        let folder = format!("fusion/{}", ctx.job_id());

        let stored = self
            .stages
            .blobs
            .upload(
                BlobSource::Bytes(final_png),
                "final",
                &UploadOptions::image(folder.clone()),
            )
            .await
            .map_err(|e| PipelineError::fatal("result upload failed", e))?;

        let mut candidates = vec![Candidate {
            url: stored.url.clone(),
            label: "final".to_string(),
            fallback: ctx.is_degraded(),
        }];

        if let Some(generated) = ctx.generated.clone() {
            if let Some(url) = self
                .upload_best_effort(
                    BlobSource::Bytes(generated),
                    format!("{}/candidates", folder),
                    "generated",
                )
                .await
            {
                candidates.push(Candidate {
                    url,
                    label: format!(
                        "generation ({})",
                        ctx.generation_source.as_deref().unwrap_or("default")
                    ),
                    fallback: ctx.generation_degraded,
                });
            }
        }

        if let Some(refined) = ctx.refined.take() {
            if let Some(url) = self
                .upload_best_effort(
                    BlobSource::Bytes(refined),
                    format!("{}/candidates", folder),
                    "final-hybrid",
                )
                .await
            {
                candidates.push(Candidate {
                    url,
                    label: "final-hybrid".to_string(),
                    fallback: false,
                });
            }
        }

        debug!(url = %sanitize::redact_url(&stored.url), "Result persisted");
        Ok((stored.url, candidates))
    }
}
