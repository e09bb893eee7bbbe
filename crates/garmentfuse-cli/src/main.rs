//! garmentfuse CLI: submit fusion jobs and inspect them.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use log::{debug, info, warn};
use thiserror::Error;
use tokio::sync::broadcast::error::RecvError;

use garmentfuse::api::{ApiError, CreateJobRequest, FusionApi, UploadedFile};
use garmentfuse::blob::FilesystemBlobStore;
use garmentfuse::broadcast::{FusionPhase, JobProgressBroadcaster};
use garmentfuse::config::{default_config_path, load_config, FusionConfig};
use garmentfuse::db::{Database, DatabaseError};
use garmentfuse::inference::HttpInferenceClient;
use garmentfuse::pipeline::{Orchestrator, PipelineConfig};
use garmentfuse::secrets::expand_home;
use garmentfuse::store::SqliteJobStore;
use garmentfuse::telemetry::{self, LogFormat, TelemetryError};
use garmentfuse::worker::Dispatcher;
use garmentfuse::{BlobError, ConfigError, FusionError, StoreError};

#[derive(Parser)]
#[command(name = "garmentfuse")]
#[command(about = "Apply fabric swatches to model photos")]
#[command(version)]
struct Cli {
    /// Config file (defaults to the platform config directory).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[arg(long, global = true, value_enum, default_value_t = LogFormatArg::Pretty)]
    log_format: LogFormatArg,

    /// Default log filter when RUST_LOG is unset.
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit a job and wait for it to finish.
    Run {
        /// Model or mannequin photo.
        #[arg(long)]
        model: PathBuf,

        /// Fabric for the top region.
        #[arg(long)]
        top: Option<PathBuf>,

        /// Fabric for the bottom region.
        #[arg(long)]
        bottom: Option<PathBuf>,

        #[arg(long)]
        category: String,

        /// silhouette, texture or hybrid.
        #[arg(long)]
        mode: Option<String>,

        /// Fusion strength in [0, 1].
        #[arg(long)]
        strength: Option<f32>,

        /// Record the user's consent to processing.
        #[arg(long)]
        consent: bool,
    },

    /// Print a job's status.
    Status { job_id: String },

    /// Print a job's result, or its status while unfinished.
    Result { job_id: String },

    /// List recent jobs.
    List {
        #[arg(long, default_value = "20")]
        limit: u32,
    },

    /// Validate the config file and print a summary.
    CheckConfig,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormatArg {
    Pretty,
    Json,
}

impl From<LogFormatArg> for LogFormat {
    fn from(arg: LogFormatArg) -> Self {
        match arg {
            LogFormatArg::Pretty => LogFormat::Pretty,
            LogFormatArg::Json => LogFormat::Json,
        }
    }
}

#[derive(Error, Debug)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Fusion(#[from] FusionError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Blob store error: {0}")]
    Blob(#[from] BlobError),

    #[error("Job store error: {0}")]
    Store(#[from] StoreError),

    #[error("{} ({})", .0, .0.status_code())]
    Api(#[from] ApiError),

    #[error("Failed to read '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to encode output: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Logging setup failed: {0}")]
    Telemetry(#[from] TelemetryError),

    #[error("Job {0} failed")]
    JobFailed(String),
}

/// Wired components for one CLI invocation.
struct App {
    api: FusionApi,
    progress: JobProgressBroadcaster,
    dispatcher: Arc<Dispatcher>,
}

fn load(path: Option<&Path>) -> Result<FusionConfig, CliError> {
    match path {
        Some(path) => Ok(load_config(path)?),
        None => {
            let default = default_config_path();
            if default.exists() {
                Ok(load_config(&default)?)
            } else {
                debug!("No config at {}, using defaults", default.display());
                Ok(FusionConfig::default())
            }
        }
    }
}

fn open_store(config: &FusionConfig) -> Result<Arc<SqliteJobStore>, CliError> {
    let db = Database::open(Path::new(&expand_home(&config.database.path)))?;
    Ok(Arc::new(SqliteJobStore::new(db)))
}

fn build_app(config: &FusionConfig) -> Result<App, CliError> {
    let store = open_store(config)?;
    let blobs = Arc::new(
        FilesystemBlobStore::from_config(&config.storage)?
            .with_max_fetch_bytes(config.pipeline.max_upload_bytes),
    );
    let inference = Arc::new(HttpInferenceClient::from_config(&config.inference)?);
    if !inference.is_configured() {
        warn!("Inference service not configured; every stage will use its fallback");
    }

    let progress = JobProgressBroadcaster::default();
    let orchestrator = Orchestrator::new(
        store.clone(),
        blobs.clone(),
        inference,
        PipelineConfig::from_config(config),
    )
    .with_progress(progress.clone());
    let dispatcher = Arc::new(Dispatcher::new(
        Arc::new(orchestrator),
        config.pipeline.max_concurrent_jobs,
        Duration::from_secs(config.pipeline.job_timeout_secs),
    ));
    let api = FusionApi::new(store, blobs, dispatcher.clone())
        .with_max_upload_bytes(config.pipeline.max_upload_bytes);

    Ok(App {
        api,
        progress,
        dispatcher,
    })
}

async fn read_upload(path: &Path) -> Result<UploadedFile, CliError> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| CliError::ReadFile {
            path: path.to_path_buf(),
            source: e,
        })?;
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let content_type = mime_guess::from_path(path).first().map(|m| m.to_string());
    Ok(UploadedFile::new(filename, content_type.as_deref(), bytes))
}

async fn read_optional(path: Option<&Path>) -> Result<Option<UploadedFile>, CliError> {
    match path {
        Some(path) => Ok(Some(read_upload(path).await?)),
        None => Ok(None),
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<(), CliError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run_job(app: &App, request: CreateJobRequest) -> Result<(), CliError> {
    let mut events = app.progress.subscribe();
    let created = app.api.create_job(request).await?;
    info!("Submitted job {}", created.job_id);

    loop {
        match events.recv().await {
            Ok(event) if event.job_id == created.job_id => {
                eprintln!("[{:>3}%] {}: {}", event.progress, event.phase, event.message);
                if matches!(event.phase, FusionPhase::Completed | FusionPhase::Failed) {
                    break;
                }
            }
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => debug!("Skipped {} progress events", skipped),
            Err(RecvError::Closed) => break,
        }
    }
    app.dispatcher.drain().await;

    let status = app.api.status(&created.job_id).await?;
    if let Some(ref error) = status.error {
        print_json(&status)?;
        warn!("Job {} failed: {}", created.job_id, error);
        return Err(CliError::JobFailed(created.job_id));
    }
    print_json(&app.api.result(&created.job_id).await?)
}

async fn execute(cli: Cli) -> Result<(), CliError> {
    let config = load(cli.config.as_deref())?;

    match cli.command {
        Commands::Run {
            model,
            top,
            bottom,
            category,
            mode,
            strength,
            consent,
        } => {
            let app = build_app(&config)?;
            let request = CreateJobRequest {
                model_image: Some(read_upload(&model).await?),
                top_fabric: read_optional(top.as_deref()).await?,
                bottom_fabric: read_optional(bottom.as_deref()).await?,
                category,
                mode,
                strength,
                user_consent: consent,
            };
            run_job(&app, request).await
        }
        Commands::Status { job_id } => {
            let app = build_app(&config)?;
            print_json(&app.api.status(&job_id).await?)
        }
        Commands::Result { job_id } => {
            let app = build_app(&config)?;
            print_json(&app.api.result(&job_id).await?)
        }
        Commands::List { limit } => {
            let store = open_store(&config)?;
            for job in store.recent(limit)? {
                println!(
                    "{}  {:<10} {:>3}%  {:<8} {}",
                    job.job_id,
                    job.status.as_str(),
                    job.progress,
                    job.category.as_str(),
                    job.created_at.to_rfc3339()
                );
            }
            Ok(())
        }
        Commands::CheckConfig => {
            println!("Config OK (version {})", config.version);
            println!(
                "  inference: {}",
                if config.inference.base_url.is_empty() {
                    "not configured (fallbacks only)"
                } else {
                    config.inference.base_url.as_str()
                }
            );
            println!("  blob root: {}", expand_home(&config.storage.blob_root));
            println!("  database:  {}", expand_home(&config.database.path));
            println!(
                "  workers:   {} (job timeout {} s)",
                config.pipeline.max_concurrent_jobs, config.pipeline.job_timeout_secs
            );
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = telemetry::init(&cli.log_level, cli.log_format.into()) {
        eprintln!("Error: {}", CliError::from(e));
        return ExitCode::FAILURE;
    }

    match execute(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
