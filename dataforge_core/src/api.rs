//! The `DataForge` engine facade
//!
//! Wires the registry, ingestion service, stage library, job controller and
//! progress hub together behind one handle. Everything here is a thin
//! delegation; the components own their invariants.
//!
//! ```no_run
//! use dataforge_core::{DataForge, EngineConfig, JobRequest, StageConfig, StageKind};
//!
//! # async fn demo() -> dataforge_core::Result<()> {
//! let forge = DataForge::builder(EngineConfig::default()).build()?;
//! let dataset = forge
//!     .ingest_bytes("notes.csv", b"id,text\n1,hello\n".to_vec(), None, None)
//!     .await?;
//! let job = forge
//!     .submit_job(JobRequest::new(
//!         dataset.id,
//!         vec![StageConfig::new(StageKind::Deduplication)],
//!     ))
//!     .await?;
//! let finished = forge.wait_for_job(job).await?;
//! println!("{}", finished.status);
//! forge.shutdown().await;
//! # Ok(())
//! # }
//! ```

use crate::config::EngineConfig;
use crate::error::Result;
use crate::format::DatasetFormat;
use crate::id::{DatasetId, JobId, UploadId};
use crate::ingest::{IngestionService, UploadProgress};
use crate::jobs::{ControllerSettings, Job, JobController, JobRequest};
use crate::pipeline::{JobResult, PipelineExecutor};
use crate::progress::{FeedKey, FeedStatus, ProgressEvent, ProgressHub, Subscription};
use crate::registry::{Dataset, DatasetRegistry, DatasetStatus};
use crate::source::{ConnectRequest, SourceFetcher};
use crate::stages::{QualityModel, SimilarityModel, StageRegistry, StageSchema};
use crate::stats::DatasetStats;
use crate::storage::{ArtifactStore, FileSystemStore};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Bounded sample of a ready dataset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetPreview {
    pub dataset_id: DatasetId,
    pub columns: Vec<String>,
    pub rows: Vec<serde_json::Map<String, serde_json::Value>>,
    /// Rows in the full dataset
    pub total_rows: usize,
}

/// Builder for [`DataForge`]
pub struct DataForgeBuilder {
    config: EngineConfig,
    stages: Option<Arc<StageRegistry>>,
    store: Option<Arc<dyn ArtifactStore>>,
    fetchers: Vec<Arc<dyn SourceFetcher>>,
    similarity: Option<Arc<dyn SimilarityModel>>,
    quality: Option<Arc<dyn QualityModel>>,
}

impl DataForgeBuilder {
    /// Use a custom stage library instead of the built-in one
    pub fn with_stage_registry(mut self, stages: Arc<StageRegistry>) -> Self {
        self.stages = Some(stages);
        self
    }

    /// Store artifacts somewhere other than `data_dir/artifacts`
    pub fn with_store(mut self, store: Arc<dyn ArtifactStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_fetcher(mut self, fetcher: Arc<dyn SourceFetcher>) -> Self {
        self.fetchers.push(fetcher);
        self
    }

    pub fn with_similarity_model(mut self, model: Arc<dyn SimilarityModel>) -> Self {
        self.similarity = Some(model);
        self
    }

    /// Model used by the quality scorer's `ai` and `both` methods
    pub fn with_quality_model(mut self, model: Arc<dyn QualityModel>) -> Self {
        self.quality = Some(model);
        self
    }

    /// Validate the configuration and start the engine
    ///
    /// Must be called from within a Tokio runtime.
    pub fn build(self) -> Result<DataForge> {
        self.config.validate()?;
        let config = self.config;

        let datasets = Arc::new(DatasetRegistry::new());
        let hub = Arc::new(ProgressHub::new(config.progress_buffer));
        let stages = self
            .stages
            .unwrap_or_else(|| Arc::new(StageRegistry::builtin()));
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(FileSystemStore::new(config.data_dir.join("artifacts"))));
        log::debug!("Artifacts go to {}", store.describe());

        let ingestion = Arc::new(IngestionService::new(&config, Arc::clone(&datasets), Arc::clone(&hub)));
        for fetcher in self.fetchers {
            ingestion.register_fetcher(fetcher);
        }

        let mut executor = PipelineExecutor::new()
            .with_stage_timeout(config.stage_timeout())
            .with_quality_model(self.quality)
            .with_storage_retry(
                config.storage_retry_attempts,
                Duration::from_millis(config.storage_retry_backoff_ms),
            );
        if let Some(model) = self.similarity {
            executor = executor.with_similarity_model(model);
        }

        let jobs = JobController::start(
            ControllerSettings {
                worker_count: config.worker_count,
                queue_capacity: config.queue_capacity,
                output_format: config.output_format,
            },
            Arc::clone(&datasets),
            Arc::clone(&stages),
            executor,
            Arc::clone(&hub),
            store,
        );

        let shutdown = CancellationToken::new();
        let reaper = tokio::spawn(Arc::clone(&ingestion).run_reaper(
            Duration::from_secs(config.reaper_interval_secs.max(1)),
            shutdown.clone(),
        ));

        log::info!("DataForge engine started with {} workers", config.worker_count);
        Ok(DataForge {
            config,
            datasets,
            ingestion,
            stages,
            jobs,
            hub,
            shutdown,
            reaper: std::sync::Mutex::new(Some(reaper)),
        })
    }
}

/// Handle to a running engine
pub struct DataForge {
    config: EngineConfig,
    datasets: Arc<DatasetRegistry>,
    ingestion: Arc<IngestionService>,
    stages: Arc<StageRegistry>,
    jobs: JobController,
    hub: Arc<ProgressHub>,
    shutdown: CancellationToken,
    reaper: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl DataForge {
    pub fn builder(config: EngineConfig) -> DataForgeBuilder {
        DataForgeBuilder {
            config,
            stages: None,
            store: None,
            fetchers: Vec::new(),
            similarity: None,
            quality: None,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // Datasets

    /// Ingest a complete payload
    pub async fn ingest_bytes(
        &self,
        filename: &str,
        bytes: Vec<u8>,
        name: Option<&str>,
        hint: Option<DatasetFormat>,
    ) -> Result<Dataset> {
        self.ingestion.ingest(filename, bytes, name, hint).await
    }

    /// Ingest a payload as a new version of `parent`
    pub async fn reingest(&self, parent: DatasetId, filename: &str, bytes: Vec<u8>) -> Result<Dataset> {
        self.ingestion.reingest(parent, filename, bytes).await
    }

    pub fn begin_upload(
        &self,
        filename: &str,
        total_chunks: usize,
        declared_size: Option<u64>,
        name: Option<&str>,
    ) -> Result<UploadId> {
        self.ingestion
            .begin_upload(filename, total_chunks, declared_size, name)
    }

    pub async fn put_chunk(
        &self,
        upload_id: UploadId,
        index: usize,
        bytes: Vec<u8>,
        checksum: Option<u32>,
    ) -> Result<UploadProgress> {
        self.ingestion
            .put_chunk(upload_id, index, bytes, checksum)
            .await
    }

    pub async fn connect(&self, request: ConnectRequest) -> Result<Dataset> {
        self.ingestion.connect(request).await
    }

    pub fn dataset(&self, id: DatasetId) -> Result<Dataset> {
        self.datasets.get(id)
    }

    pub fn datasets(&self) -> Vec<Dataset> {
        self.datasets.list()
    }

    /// Every version in the lineage of `id`
    pub fn dataset_versions(&self, id: DatasetId) -> Vec<Dataset> {
        self.datasets.versions(id)
    }

    /// First `preview_rows` rows of a ready dataset
    pub fn preview(&self, id: DatasetId) -> Result<DatasetPreview> {
        let table = self.datasets.table(id)?;
        let head = table.head(self.config.preview_rows);
        Ok(DatasetPreview {
            dataset_id: id,
            columns: head.columns().to_vec(),
            rows: head.to_json_records(),
            total_rows: table.row_count(),
        })
    }

    pub fn stats(&self, id: DatasetId) -> Result<Arc<DatasetStats>> {
        self.datasets.stats(id)
    }

    /// Progress feed of a dataset's ingestion
    ///
    /// A dataset whose ingestion already finished yields a single terminal
    /// event describing its current state.
    pub fn subscribe_dataset(&self, id: DatasetId) -> Result<Subscription> {
        let key = FeedKey::Dataset(id);
        if let Some(subscription) = self.hub.subscribe(key) {
            return Ok(subscription);
        }
        let dataset = self.datasets.get(id)?;
        let (status, progress, message) = match dataset.status {
            DatasetStatus::Pending => (FeedStatus::Pending, 0, "Waiting for data".to_string()),
            DatasetStatus::Processing => (FeedStatus::Processing, 0, "Processing".to_string()),
            DatasetStatus::Ready => (
                FeedStatus::Ready,
                100,
                format!(
                    "Dataset ready: {} rows x {} columns",
                    dataset.row_count.unwrap_or(0),
                    dataset.column_count.unwrap_or(0)
                ),
            ),
            DatasetStatus::Failed => (
                FeedStatus::Failed,
                0,
                dataset.error_message.unwrap_or_default(),
            ),
        };
        Ok(Subscription::finished(ProgressEvent::new(key, status, progress, message)))
    }

    /// Drop idle upload sessions now instead of waiting for the reaper
    pub fn reap_idle_uploads(&self) -> usize {
        self.ingestion.reap_idle().len()
    }

    // Stages

    /// Stage identifiers with their option schemas
    pub fn describe_stages(&self) -> Vec<StageSchema> {
        self.stages.describe()
    }

    // Jobs

    pub async fn submit_job(&self, request: JobRequest) -> Result<JobId> {
        self.jobs.submit(request).await
    }

    pub fn job(&self, id: JobId) -> Result<Job> {
        self.jobs.get(id)
    }

    pub fn jobs(&self) -> Vec<Job> {
        self.jobs.list()
    }

    pub fn job_result(&self, id: JobId) -> Result<JobResult> {
        self.jobs.result(id)
    }

    pub fn cancel_job(&self, id: JobId) -> Result<Job> {
        self.jobs.cancel(id)
    }

    /// Wait until a job reaches a terminal status
    pub async fn wait_for_job(&self, id: JobId) -> Result<Job> {
        self.jobs.wait(id).await
    }

    /// Progress feed of a job; finished jobs yield their terminal event
    pub fn subscribe_job(&self, id: JobId) -> Result<Subscription> {
        let key = FeedKey::Job(id);
        if let Some(subscription) = self.hub.subscribe(key) {
            return Ok(subscription);
        }
        let job = self.jobs.get(id)?;
        let message = job
            .error_message
            .clone()
            .unwrap_or_else(|| format!("Job {}", job.status));
        Ok(Subscription::finished(ProgressEvent::new(
            key,
            job.status.feed_status(),
            job.progress,
            message,
        )))
    }

    /// Stop the reaper, cancel outstanding jobs and wait for workers
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let reaper = self
            .reaper
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take();
        if let Some(handle) = reaper {
            if let Err(e) = handle.await {
                log::warn!("Upload reaper ended abnormally: {e}");
            }
        }
        self.jobs.shutdown().await;
        log::info!("DataForge engine stopped");
    }
}
