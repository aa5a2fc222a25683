//! Ingestion path: bytes in, ready dataset out
//!
//! Every entrypoint (single-shot payload, chunked upload, remote connector)
//! ends in the same processing sequence:
//!
//! | progress | step        |
//! |---------:|-------------|
//! | 5        | received    |
//! | 15       | detect      |
//! | 30       | parse       |
//! | 60       | stats       |
//! | 85       | language    |
//! | 95       | register    |
//! | 100      | ready       |
//!
//! A dataset is registered when its first bytes arrive. Any failure after
//! that point moves it to `failed` with a classified message and closes its
//! progress feed; the error is also returned to the caller.

use crate::config::EngineConfig;
use crate::error::{Error, IngestionError, InternalError, Result};
use crate::format::{DatasetFormat, detect};
use crate::id::{DatasetId, UploadId};
use crate::progress::{FeedKey, FeedStatus, ProgressEvent, ProgressHub, ProgressProvider, ProgressUpdate};
use crate::registry::{Dataset, DatasetRegistry, SourceDescriptor, SourceKind, StatusUpdate};
use crate::source::{ConnectRequest, SourceFetcher};
use crate::stages::dominant_language;
use crate::stats::DatasetStats;
use crate::upload::{ChunkAssembler, ChunkReceipt, ReapedUpload};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Receipt for one chunk plus the dataset it feeds
#[derive(Debug, Clone)]
pub struct UploadProgress {
    pub receipt: ChunkReceipt,
    pub dataset_id: DatasetId,
    /// The processed dataset, once the final chunk arrived
    pub dataset: Option<Dataset>,
}

struct PendingUpload {
    name: String,
    filename: String,
    dataset: Option<DatasetId>,
}

/// Reports ingestion steps onto a dataset's progress feed
struct DatasetProgress {
    hub: Arc<ProgressHub>,
    dataset: DatasetId,
    status: FeedStatus,
}

impl ProgressProvider for DatasetProgress {
    fn report(&self, update: ProgressUpdate) {
        let percent = update.percent().unwrap_or(0);
        let mut event = ProgressEvent::new(
            FeedKey::Dataset(self.dataset),
            self.status,
            percent,
            update.message(),
        );
        if let ProgressUpdate::Step { step, .. } = &update {
            event = event.with_step(step.clone());
        }
        self.hub.publish(event);
    }

    fn create_child(&self, _name: &str) -> Box<dyn ProgressProvider> {
        Box::new(DatasetProgress {
            hub: Arc::clone(&self.hub),
            dataset: self.dataset,
            status: self.status,
        })
    }

    fn complete(&self) {}
}

fn step(percent: u8, step: &str, message: impl Into<String>) -> ProgressUpdate {
    ProgressUpdate::Step {
        percent,
        step: step.to_string(),
        message: message.into(),
    }
}

/// Owns upload sessions and drives datasets to `ready`
pub struct IngestionService {
    registry: Arc<DatasetRegistry>,
    hub: Arc<ProgressHub>,
    assembler: ChunkAssembler,
    uploads: Mutex<HashMap<UploadId, PendingUpload>>,
    fetchers: RwLock<HashMap<SourceKind, Arc<dyn SourceFetcher>>>,
}

impl IngestionService {
    pub fn new(config: &EngineConfig, registry: Arc<DatasetRegistry>, hub: Arc<ProgressHub>) -> Self {
        Self {
            registry,
            hub,
            assembler: ChunkAssembler::new(config.spill_threshold_bytes, config.upload_idle_timeout()),
            uploads: Mutex::new(HashMap::new()),
            fetchers: RwLock::new(HashMap::new()),
        }
    }

    fn uploads(&self) -> MutexGuard<'_, HashMap<UploadId, PendingUpload>> {
        self.uploads.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Register a connector for the source kinds it serves
    pub fn register_fetcher(&self, fetcher: Arc<dyn SourceFetcher>) {
        let mut fetchers = self.fetchers.write().unwrap_or_else(|p| p.into_inner());
        for kind in fetcher.kinds() {
            fetchers.insert(kind, Arc::clone(&fetcher));
        }
    }

    fn progress(&self, dataset: DatasetId, status: FeedStatus) -> DatasetProgress {
        DatasetProgress {
            hub: Arc::clone(&self.hub),
            dataset,
            status,
        }
    }

    /// Ingest a complete payload
    pub async fn ingest(
        &self,
        filename: &str,
        bytes: Vec<u8>,
        name: Option<&str>,
        hint: Option<DatasetFormat>,
    ) -> Result<Dataset> {
        let dataset = self
            .registry
            .create(name.unwrap_or(filename), SourceDescriptor::upload(filename));
        self.progress(dataset.id, FeedStatus::Pending)
            .report(step(5, "received", format!("Received {} bytes", bytes.len())));
        self.process(dataset.id, filename, bytes, hint).await
    }

    /// Ingest a payload as a new version of an existing dataset
    pub async fn reingest(&self, parent: DatasetId, filename: &str, bytes: Vec<u8>) -> Result<Dataset> {
        let dataset = self.registry.create_version(parent)?;
        self.progress(dataset.id, FeedStatus::Pending)
            .report(step(5, "received", format!("Received {} bytes", bytes.len())));
        self.process(dataset.id, filename, bytes, None).await
    }

    /// Fetch from a remote source and ingest the result
    ///
    /// Nothing is registered until the fetch succeeds.
    pub async fn connect(&self, request: ConnectRequest) -> Result<Dataset> {
        let fetcher = {
            let fetchers = self.fetchers.read().unwrap_or_else(|p| p.into_inner());
            fetchers
                .get(&request.kind)
                .cloned()
                .ok_or_else(|| IngestionError::unsupported_source(request.kind.as_str()))?
        };
        log::info!("Fetching {} source {}", request.kind, request.location);
        let payload = fetcher.fetch(&request).await?;

        let name = request.name.clone().unwrap_or_else(|| payload.filename.clone());
        let dataset = self.registry.create(&name, request.descriptor());
        self.progress(dataset.id, FeedStatus::Pending).report(step(
            5,
            "received",
            format!("Fetched {} bytes from {}", payload.bytes.len(), request.kind),
        ));
        let hint = request.format_hint.or(payload.format_hint);
        self.process(dataset.id, &payload.filename, payload.bytes, hint)
            .await
    }

    /// Open a chunked upload
    pub fn begin_upload(
        &self,
        filename: &str,
        total_chunks: usize,
        declared_size: Option<u64>,
        name: Option<&str>,
    ) -> Result<UploadId> {
        let id = self.assembler.begin(filename, total_chunks, declared_size)?;
        self.uploads().insert(
            id,
            PendingUpload {
                name: name.unwrap_or(filename).to_string(),
                filename: filename.to_string(),
                dataset: None,
            },
        );
        Ok(id)
    }

    /// Accept one chunk; the chunk that completes the upload also processes it
    pub async fn put_chunk(
        &self,
        upload_id: UploadId,
        index: usize,
        bytes: Vec<u8>,
        checksum: Option<u32>,
    ) -> Result<UploadProgress> {
        let outcome = match self.assembler.put(upload_id, index, bytes, checksum).await {
            Ok(outcome) => outcome,
            Err(e) => {
                if matches!(e, Error::Ingestion(IngestionError::SizeMismatch { .. })) {
                    // the session is gone; its dataset can never complete
                    if let Some(pending) = self.uploads().remove(&upload_id) {
                        if let Some(dataset) = pending.dataset {
                            self.fail(dataset, &e);
                        }
                    }
                }
                return Err(e);
            }
        };

        let dataset_id = self.dataset_for_upload(upload_id)?;
        let receipt = outcome.receipt;
        let Some(assembled) = outcome.assembled else {
            self.progress(dataset_id, FeedStatus::Pending).report(step(
                receipt.percent() / 20,
                "upload",
                format!(
                    "Received chunk {}/{}",
                    receipt.received_count, receipt.total_chunks
                ),
            ));
            return Ok(UploadProgress {
                receipt,
                dataset_id,
                dataset: None,
            });
        };

        self.uploads().remove(&upload_id);
        self.progress(dataset_id, FeedStatus::Pending).report(step(
            5,
            "received",
            format!("Assembled {} bytes from {} chunks", assembled.bytes.len(), receipt.total_chunks),
        ));
        let dataset = self
            .process(dataset_id, &assembled.filename, assembled.bytes, None)
            .await?;
        Ok(UploadProgress {
            receipt,
            dataset_id,
            dataset: Some(dataset),
        })
    }

    /// Dataset fed by an upload, registering it on the first accepted chunk
    fn dataset_for_upload(&self, upload_id: UploadId) -> Result<DatasetId> {
        let mut uploads = self.uploads();
        let pending = uploads
            .get_mut(&upload_id)
            .ok_or_else(|| IngestionError::unknown_upload(upload_id))?;
        if let Some(id) = pending.dataset {
            return Ok(id);
        }
        let dataset = self
            .registry
            .create(&pending.name, SourceDescriptor::upload(&pending.filename));
        pending.dataset = Some(dataset.id);
        log::debug!("Upload {upload_id} feeds dataset {}", dataset.id);
        Ok(dataset.id)
    }

    /// Number of uploads still waiting for chunks
    pub fn active_uploads(&self) -> usize {
        self.assembler.active_sessions()
    }

    /// Drop idle upload sessions and fail their datasets
    pub fn reap_idle(&self) -> Vec<ReapedUpload> {
        self.reap(self.assembler.reap_idle())
    }

    /// Drop sessions idle longer than `max_idle`
    pub fn reap_idle_older_than(&self, max_idle: Duration) -> Vec<ReapedUpload> {
        self.reap(self.assembler.reap_idle_older_than(max_idle))
    }

    fn reap(&self, reaped: Vec<ReapedUpload>) -> Vec<ReapedUpload> {
        for upload in &reaped {
            let pending = self.uploads().remove(&upload.upload_id);
            if let Some(dataset) = pending.and_then(|p| p.dataset) {
                let error = Error::from(IngestionError::invalid_upload(format!(
                    "upload abandoned after {}s without new chunks",
                    upload.idle_for.as_secs()
                )));
                self.fail(dataset, &error);
            }
        }
        reaped
    }

    /// Periodically reap idle uploads until `shutdown` fires
    pub async fn run_reaper(self: Arc<Self>, every: Duration, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let reaped = self.reap_idle();
                    if !reaped.is_empty() {
                        log::info!("Reaped {} idle uploads", reaped.len());
                    }
                }
            }
        }
        log::debug!("Upload reaper stopped");
    }

    async fn process(
        &self,
        id: DatasetId,
        filename: &str,
        bytes: Vec<u8>,
        hint: Option<DatasetFormat>,
    ) -> Result<Dataset> {
        match self.decode(id, filename, bytes, hint).await {
            Ok(dataset) => Ok(dataset),
            Err(e) => {
                self.fail(id, &e);
                Err(e)
            }
        }
    }

    async fn decode(
        &self,
        id: DatasetId,
        filename: &str,
        bytes: Vec<u8>,
        hint: Option<DatasetFormat>,
    ) -> Result<Dataset> {
        let progress = self.progress(id, FeedStatus::Processing);
        self.registry.update_status(
            id,
            StatusUpdate::Processing {
                format: hint,
                size_bytes: bytes.len() as u64,
            },
        )?;
        progress.report(step(15, "detect", "Detecting format"));

        let name = filename.to_string();
        let detected = tokio::task::spawn_blocking(move || detect(&bytes, &name, hint))
            .await
            .map_err(|e| InternalError::worker_unavailable(format!("format detection task failed: {e}")))??;
        progress.report(step(
            30,
            "parse",
            format!(
                "Parsed {} rows as {} ({:?})",
                detected.row_count(),
                detected.format,
                detected.evidence
            ),
        ));
        for warning in &detected.warnings {
            log::warn!("Dataset {id}: {warning}");
        }

        progress.report(step(60, "stats", "Computing column statistics"));
        let table = detected.table;
        let (table, mut stats) = tokio::task::spawn_blocking(move || {
            let stats = DatasetStats::compute(&table);
            (table, stats)
        })
        .await
        .map_err(|e| InternalError::worker_unavailable(format!("statistics task failed: {e}")))?;

        progress.report(step(85, "language", "Detecting dominant language"));
        stats.detected_language = dominant_language(&table);

        progress.report(step(95, "register", "Registering dataset"));
        let dataset = self.registry.update_status(
            id,
            StatusUpdate::Ready {
                format: detected.format,
                table,
                stats,
                warnings: detected.warnings,
            },
        )?;

        let rows = dataset.row_count.unwrap_or(0);
        let columns = dataset.column_count.unwrap_or(0);
        log::info!("Dataset {id} ready: {rows} rows x {columns} columns");
        self.hub.publish(
            ProgressEvent::new(
                FeedKey::Dataset(id),
                FeedStatus::Ready,
                100,
                format!("Dataset ready: {rows} rows x {columns} columns"),
            )
            .with_step("ready"),
        );
        Ok(dataset)
    }

    /// Move a dataset to `failed` and close its feed
    fn fail(&self, id: DatasetId, error: &Error) {
        let message = error.describe();
        log::error!("Dataset {id} failed: {message}");
        if let Err(e) = self
            .registry
            .update_status(id, StatusUpdate::Failed { message: message.clone() })
        {
            log::warn!("Could not mark dataset {id} failed: {e}");
        }
        self.hub.publish(
            ProgressEvent::new(FeedKey::Dataset(id), FeedStatus::Failed, 0, message).with_step("failed"),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::DatasetStatus;
    use crate::source::FetchedPayload;
    use async_trait::async_trait;

    fn service() -> IngestionService {
        IngestionService::new(
            &EngineConfig::test(),
            Arc::new(DatasetRegistry::new()),
            Arc::new(ProgressHub::new(64)),
        )
    }

    #[tokio::test]
    async fn test_ingest_csv_reaches_ready() {
        let service = service();
        let dataset = service
            .ingest("data.csv", b"id,text\n1,the cat is on the table\n".to_vec(), None, None)
            .await
            .unwrap();
        assert_eq!(dataset.status, DatasetStatus::Ready);
        assert_eq!(dataset.format, Some(DatasetFormat::Csv));
        assert_eq!(dataset.row_count, Some(1));
        assert_eq!(dataset.name, "data.csv");
        assert!(!service.hub.is_open(FeedKey::Dataset(dataset.id)));
    }

    #[tokio::test]
    async fn test_undetectable_payload_fails_dataset() {
        let service = service();
        let err = service
            .ingest("blob", vec![0, 159, 146, 150, 0, 1, 2, 3, 0, 0], None, None)
            .await
            .unwrap_err();
        assert!(err.is_user_error());

        let datasets = service.registry.list();
        assert_eq!(datasets.len(), 1);
        assert_eq!(datasets[0].status, DatasetStatus::Failed);
        assert!(datasets[0].error_message.as_deref().unwrap().starts_with("invalid input"));
        assert_eq!(datasets[0].row_count, None);
    }

    #[tokio::test]
    async fn test_chunked_upload_creates_dataset_on_first_chunk() {
        let service = service();
        let payload = b"a,b\n1,2\n3,4\n".to_vec();
        let upload = service
            .begin_upload("split.csv", 2, Some(payload.len() as u64), Some("split"))
            .unwrap();
        assert!(service.registry.list().is_empty());

        let first = service
            .put_chunk(upload, 1, payload[6..].to_vec(), None)
            .await
            .unwrap();
        assert!(first.dataset.is_none());
        assert_eq!(
            service.registry.get(first.dataset_id).unwrap().status,
            DatasetStatus::Pending
        );

        let last = service
            .put_chunk(upload, 0, payload[..6].to_vec(), None)
            .await
            .unwrap();
        let dataset = last.dataset.unwrap();
        assert_eq!(dataset.id, first.dataset_id);
        assert_eq!(dataset.name, "split");
        assert_eq!(dataset.row_count, Some(2));
        assert_eq!(service.active_uploads(), 0);
    }

    #[tokio::test]
    async fn test_reaped_upload_fails_dataset() {
        let service = service();
        let upload = service.begin_upload("slow.csv", 3, None, None).unwrap();
        let progress = service
            .put_chunk(upload, 0, b"a,b\n".to_vec(), None)
            .await
            .unwrap();

        let reaped = service.reap_idle_older_than(Duration::ZERO);
        assert_eq!(reaped.len(), 1);
        let dataset = service.registry.get(progress.dataset_id).unwrap();
        assert_eq!(dataset.status, DatasetStatus::Failed);
        assert!(
            service
                .put_chunk(upload, 1, b"1,2\n".to_vec(), None)
                .await
                .is_err()
        );
    }

    struct StaticFetcher;

    #[async_trait]
    impl SourceFetcher for StaticFetcher {
        fn kinds(&self) -> Vec<SourceKind> {
            vec![SourceKind::Url]
        }

        async fn fetch(&self, _request: &ConnectRequest) -> Result<FetchedPayload> {
            Ok(FetchedPayload {
                filename: "remote.jsonl".into(),
                bytes: b"{\"text\": \"hello\"}\n{\"text\": \"world\"}\n".to_vec(),
                format_hint: None,
            })
        }
    }

    #[tokio::test]
    async fn test_connect_uses_registered_fetcher() {
        let service = service();
        let err = service
            .connect(ConnectRequest::new(SourceKind::S3, "s3://bucket/key"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Ingestion(IngestionError::UnsupportedSource { .. })
        ));
        assert!(service.registry.list().is_empty());

        service.register_fetcher(Arc::new(StaticFetcher));
        let dataset = service
            .connect(ConnectRequest::new(SourceKind::Url, "https://example.com/remote.jsonl"))
            .await
            .unwrap();
        assert_eq!(dataset.format, Some(DatasetFormat::Jsonl));
        assert_eq!(dataset.source.kind, SourceKind::Url);
        assert_eq!(dataset.row_count, Some(2));
    }
}
