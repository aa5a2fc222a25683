//! Job controller: queue, bounded worker pool and progress relay
//!
//! Submissions are validated synchronously, recorded as `queued` and sent
//! down a bounded channel. A dispatcher task pulls job ids off the channel
//! and runs each one on its own task once a worker permit is free, so at
//! most `worker_count` pipelines execute at the same time.
//!
//! The `queued -> running` transition happens under the job table's write
//! lock and only from `queued`, so a job is picked up at most once even if
//! its id were delivered twice.

use super::{Job, JobRequest, JobStatus};
use crate::error::{Error, InternalError, Result, ValidationError};
use crate::export::ExportFormat;
use crate::id::JobId;
use crate::pipeline::{JobResult, PipelineExecutor, RunOutcome};
use crate::progress::{FeedKey, ProgressEvent, ProgressHub, ProgressProvider, ProgressUpdate};
use crate::registry::{DatasetRegistry, DatasetStatus};
use crate::stages::{PlannedStage, StageRegistry};
use crate::storage::ArtifactStore;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::{Semaphore, mpsc, watch};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Sizing and defaults for a [`JobController`]
#[derive(Debug, Clone, Copy)]
pub struct ControllerSettings {
    pub worker_count: usize,
    pub queue_capacity: usize,
    pub output_format: ExportFormat,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            worker_count: 2,
            queue_capacity: 256,
            output_format: ExportFormat::Jsonl,
        }
    }
}

struct JobEntry {
    seq: u64,
    job: Job,
    plan: Vec<PlannedStage>,
    cancel: CancellationToken,
    status: watch::Sender<JobStatus>,
}

#[derive(Default)]
struct JobTable {
    next_seq: u64,
    entries: HashMap<JobId, JobEntry>,
}

struct Shared {
    jobs: RwLock<JobTable>,
    datasets: Arc<DatasetRegistry>,
    stages: Arc<StageRegistry>,
    executor: PipelineExecutor,
    hub: Arc<ProgressHub>,
    store: Arc<dyn ArtifactStore>,
    default_format: ExportFormat,
}

/// Owns job lifecycle and dispatches execution to workers
pub struct JobController {
    shared: Arc<Shared>,
    queue: mpsc::Sender<JobId>,
    tracker: TaskTracker,
    shutdown: CancellationToken,
}

impl JobController {
    /// Create a controller and start its dispatcher
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(
        settings: ControllerSettings,
        datasets: Arc<DatasetRegistry>,
        stages: Arc<StageRegistry>,
        executor: PipelineExecutor,
        hub: Arc<ProgressHub>,
        store: Arc<dyn ArtifactStore>,
    ) -> Self {
        let shared = Arc::new(Shared {
            jobs: RwLock::new(JobTable::default()),
            datasets,
            stages,
            executor,
            hub,
            store,
            default_format: settings.output_format,
        });
        let (queue, receiver) = mpsc::channel(settings.queue_capacity.max(1));
        let tracker = TaskTracker::new();
        let shutdown = CancellationToken::new();
        let workers = Arc::new(Semaphore::new(settings.worker_count.max(1)));

        tracker.spawn(dispatch(
            Arc::clone(&shared),
            receiver,
            workers,
            tracker.clone(),
            shutdown.clone(),
        ));
        log::debug!("Job controller started with {} workers", settings.worker_count);

        Self {
            shared,
            queue,
            tracker,
            shutdown,
        }
    }

    /// Validate and enqueue a pipeline run
    ///
    /// Unknown datasets, datasets that are not ready and invalid stage
    /// configurations are rejected here; no job is created for them.
    pub async fn submit(&self, request: JobRequest) -> Result<JobId> {
        let dataset_id = request.dataset_id;
        let dataset = self.shared.datasets.get(dataset_id).map_err(|_| {
            ValidationError::invalid_parameter(
                "dataset_id",
                &format!("dataset '{dataset_id}' does not exist"),
            )
        })?;
        if dataset.status != DatasetStatus::Ready {
            return Err(ValidationError::dataset_not_ready(dataset_id, dataset.status).into());
        }
        let plan = self.shared.stages.plan(&request.stages)?;

        let id = JobId::new();
        let job = Job {
            id,
            dataset_id,
            stages: request.stages,
            output_format: request.output_format.unwrap_or(self.shared.default_format),
            status: JobStatus::Queued,
            progress: 0,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            error_message: None,
            failure_kind: None,
            failed_stage: None,
            result: None,
        };
        {
            let mut jobs = self.shared.write();
            let seq = jobs.next_seq;
            jobs.next_seq += 1;
            let (status, _) = watch::channel(JobStatus::Queued);
            jobs.entries.insert(
                id,
                JobEntry {
                    seq,
                    job,
                    plan,
                    cancel: CancellationToken::new(),
                    status,
                },
            );
        }
        self.shared.hub.publish(ProgressEvent::new(
            FeedKey::Job(id),
            JobStatus::Queued.feed_status(),
            0,
            "Job queued",
        ));

        if self.queue.send(id).await.is_err() {
            self.shared.write().entries.remove(&id);
            self.shared.hub.publish(ProgressEvent::new(
                FeedKey::Job(id),
                JobStatus::Failed.feed_status(),
                0,
                "Job queue is closed",
            ));
            return Err(InternalError::worker_unavailable("job queue is closed").into());
        }
        log::info!("Job {id} queued for dataset {dataset_id}");
        Ok(id)
    }

    /// Snapshot of one job
    pub fn get(&self, id: JobId) -> Result<Job> {
        self.shared
            .read()
            .entries
            .get(&id)
            .map(|e| e.job.clone())
            .ok_or_else(|| InternalError::not_found("Job", id).into())
    }

    /// All jobs in submission order
    pub fn list(&self) -> Vec<Job> {
        let jobs = self.shared.read();
        let mut entries: Vec<&JobEntry> = jobs.entries.values().collect();
        entries.sort_by_key(|e| e.seq);
        entries.into_iter().map(|e| e.job.clone()).collect()
    }

    /// Result of a terminal job
    ///
    /// Failed jobs return the stage results produced before the failure.
    pub fn result(&self, id: JobId) -> Result<JobResult> {
        let job = self.get(id)?;
        job.result.ok_or_else(|| {
            ValidationError::invalid_parameter(
                "job_id",
                &format!("job '{id}' has no result yet (status: {})", job.status),
            )
            .into()
        })
    }

    /// Request cancellation
    ///
    /// A queued job is cancelled immediately. A running job stops before its
    /// next stage. Cancelling a terminal job changes nothing.
    pub fn cancel(&self, id: JobId) -> Result<Job> {
        let (job, event) = {
            let mut jobs = self.shared.write();
            let entry = jobs
                .entries
                .get_mut(&id)
                .ok_or_else(|| InternalError::not_found("Job", id))?;
            match entry.job.status {
                JobStatus::Queued => {
                    let event = entry.finish(JobStatus::Cancelled, None, Some("Cancelled before start".into()));
                    (entry.job.clone(), Some(event))
                }
                JobStatus::Running => {
                    entry.cancel.cancel();
                    log::info!("Cancellation requested for running job {id}");
                    (entry.job.clone(), None)
                }
                _ => (entry.job.clone(), None),
            }
        };
        if let Some(event) = event {
            log::info!("Job {id} cancelled while queued");
            self.shared.hub.publish(event);
        }
        Ok(job)
    }

    /// Wait until a job reaches a terminal status
    pub async fn wait(&self, id: JobId) -> Result<Job> {
        let mut status = {
            let jobs = self.shared.read();
            jobs.entries
                .get(&id)
                .map(|e| e.status.subscribe())
                .ok_or_else(|| InternalError::not_found("Job", id))?
        };
        status
            .wait_for(JobStatus::is_terminal)
            .await
            .map_err(|_| InternalError::worker_unavailable("job controller shut down"))?;
        self.get(id)
    }

    /// Stop accepting work and wait for running jobs
    ///
    /// Running jobs are cancelled at their next stage boundary; queued jobs
    /// are cancelled without running.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let events: Vec<ProgressEvent> = {
            let mut jobs = self.shared.write();
            jobs.entries
                .values_mut()
                .filter_map(|entry| match entry.job.status {
                    JobStatus::Queued => Some(entry.finish(
                        JobStatus::Cancelled,
                        None,
                        Some("Engine shut down before the job started".into()),
                    )),
                    JobStatus::Running => {
                        entry.cancel.cancel();
                        None
                    }
                    _ => None,
                })
                .collect()
        };
        for event in events {
            self.shared.hub.publish(event);
        }
        self.tracker.close();
        self.tracker.wait().await;
        log::debug!("Job controller stopped");
    }
}

impl JobEntry {
    /// Move to a terminal status and build the closing feed event
    fn finish(&mut self, status: JobStatus, result: Option<JobResult>, message: Option<String>) -> ProgressEvent {
        let job = &mut self.job;
        job.status = status;
        job.completed_at = Some(Utc::now());
        if status == JobStatus::Completed {
            job.progress = 100;
        }
        if let Some(result) = result {
            job.failed_stage = result.failed_stage.clone();
            job.result = Some(result);
        }
        if status != JobStatus::Completed {
            job.error_message = message.clone();
        }
        self.status.send_replace(status);

        let text = message.unwrap_or_else(|| format!("Job {status}"));
        ProgressEvent::new(FeedKey::Job(job.id), status.feed_status(), job.progress, text)
    }
}

impl Shared {
    fn read(&self) -> RwLockReadGuard<'_, JobTable> {
        self.jobs.read().unwrap_or_else(|p| p.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, JobTable> {
        self.jobs.write().unwrap_or_else(|p| p.into_inner())
    }

    /// Claim a queued job for execution
    fn claim(&self, id: JobId) -> Option<(Job, Vec<PlannedStage>, CancellationToken)> {
        let mut jobs = self.write();
        let entry = jobs.entries.get_mut(&id)?;
        if entry.job.status != JobStatus::Queued {
            return None;
        }
        entry.job.status = JobStatus::Running;
        entry.job.started_at = Some(Utc::now());
        entry.status.send_replace(JobStatus::Running);
        Some((entry.job.clone(), entry.plan.clone(), entry.cancel.clone()))
    }

    /// Raise a running job's progress, never lowering it
    fn advance(&self, id: JobId, percent: u8) -> u8 {
        let mut jobs = self.write();
        match jobs.entries.get_mut(&id) {
            Some(entry) if entry.job.status == JobStatus::Running => {
                entry.job.progress = entry.job.progress.max(percent);
                entry.job.progress
            }
            Some(entry) => entry.job.progress,
            None => percent,
        }
    }

    fn complete(&self, id: JobId, status: JobStatus, result: JobResult, error: Option<&Error>) {
        let event = {
            let mut jobs = self.write();
            let Some(entry) = jobs.entries.get_mut(&id) else {
                return;
            };
            if entry.job.status.is_terminal() {
                return;
            }
            let message = match (status, error) {
                (_, Some(error)) => Some(error.describe()),
                (JobStatus::Cancelled, None) => Some("Cancelled".to_string()),
                _ => None,
            };
            entry.job.failure_kind = error.map(Error::failure_kind);
            entry.finish(status, Some(result), message)
        };
        self.hub.publish(event);
    }

    async fn execute(self: Arc<Self>, id: JobId) {
        let Some((job, plan, cancel)) = self.claim(id) else {
            log::debug!("Job {id} is no longer queued; skipping");
            return;
        };
        log::info!("Job {id} started ({} stages)", plan.len());
        self.hub.publish(ProgressEvent::new(
            FeedKey::Job(id),
            JobStatus::Running.feed_status(),
            0,
            "Job started",
        ));

        let table = match self.datasets.table(job.dataset_id) {
            Ok(table) => table,
            Err(e) => {
                log::error!("Job {id} could not load dataset {}: {e}", job.dataset_id);
                self.complete(id, JobStatus::Failed, JobResult::start(0), Some(&e));
                return;
            }
        };

        let progress = Arc::new(JobProgress {
            shared: Arc::clone(&self),
            job: id,
            percent: AtomicU8::new(0),
        });
        let run = self.executor.run(&table, &plan, progress, &cancel).await;
        let mut result = run.result;

        match run.outcome {
            RunOutcome::Completed => {
                let Some(output) = run.table else {
                    let e = Error::from(InternalError::assertion("completed run without a table"));
                    self.complete(id, JobStatus::Failed, result, Some(&e));
                    return;
                };
                let prefix = format!("jobs/{id}");
                let persisted = self
                    .executor
                    .persist(self.store.as_ref(), &prefix, &output, job.output_format, &mut result)
                    .await;
                match persisted {
                    Ok(()) => {
                        log::info!(
                            "Job {id} completed: {} -> {} rows",
                            result.total_rows_before,
                            result.total_rows_after
                        );
                        self.complete(id, JobStatus::Completed, result, None);
                    }
                    Err(e) => {
                        log::error!("Job {id} could not store its artifacts: {e}");
                        self.complete(id, JobStatus::Failed, result, Some(&e));
                    }
                }
            }
            RunOutcome::Failed { stage, error, .. } => {
                log::error!("Job {id} failed in stage {stage}: {error}");
                self.complete(id, JobStatus::Failed, result, Some(&Error::from(error)));
            }
            RunOutcome::Cancelled { position } => {
                log::info!("Job {id} cancelled before stage {}", position + 1);
                self.complete(id, JobStatus::Cancelled, result, None);
            }
        }
    }
}

async fn dispatch(
    shared: Arc<Shared>,
    mut queue: mpsc::Receiver<JobId>,
    workers: Arc<Semaphore>,
    tracker: TaskTracker,
    shutdown: CancellationToken,
) {
    loop {
        let id = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            next = queue.recv() => match next {
                Some(id) => id,
                None => break,
            },
        };
        let permit = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            permit = Arc::clone(&workers).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };
        let shared = Arc::clone(&shared);
        tracker.spawn(async move {
            let _permit = permit;
            shared.execute(id).await;
        });
    }
    log::debug!("Job dispatcher stopped");
}

/// Relays executor progress to the job record and its feed
///
/// Percentages are capped at 99 while running; only completion reports 100.
struct JobProgress {
    shared: Arc<Shared>,
    job: JobId,
    percent: AtomicU8,
}

impl ProgressProvider for JobProgress {
    fn report(&self, update: ProgressUpdate) {
        let percent = match update.percent() {
            Some(p) => {
                let p = p.min(99);
                self.percent.fetch_max(p, Ordering::SeqCst).max(p)
            }
            None => self.percent.load(Ordering::SeqCst),
        };
        let progress = self.shared.advance(self.job, percent);
        let mut event = ProgressEvent::new(
            FeedKey::Job(self.job),
            JobStatus::Running.feed_status(),
            progress,
            update.message(),
        );
        if let ProgressUpdate::StageStarted { stage, .. }
        | ProgressUpdate::StageProgress { stage, .. }
        | ProgressUpdate::StageFinished { stage, .. } = &update
        {
            event = event.with_step(stage.clone());
        }
        self.shared.hub.publish(event);
    }

    fn create_child(&self, _name: &str) -> Box<dyn ProgressProvider> {
        Box::new(JobProgress {
            shared: Arc::clone(&self.shared),
            job: self.job,
            percent: AtomicU8::new(self.percent.load(Ordering::SeqCst)),
        })
    }

    fn complete(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::DatasetFormat;
    use crate::registry::{SourceDescriptor, StatusUpdate};
    use crate::stages::{StageConfig, StageKind};
    use crate::stats::DatasetStats;
    use crate::storage::MemoryStore;
    use crate::table::{Table, Value};
    use crate::progress::FeedStatus;

    struct Fixture {
        datasets: Arc<DatasetRegistry>,
        hub: Arc<ProgressHub>,
        store: Arc<MemoryStore>,
        controller: JobController,
    }

    fn fixture(workers: usize) -> Fixture {
        let datasets = Arc::new(DatasetRegistry::new());
        let hub = Arc::new(ProgressHub::new(64));
        let store = Arc::new(MemoryStore::new());
        let controller = JobController::start(
            ControllerSettings {
                worker_count: workers,
                ..Default::default()
            },
            Arc::clone(&datasets),
            Arc::new(StageRegistry::builtin()),
            PipelineExecutor::new(),
            Arc::clone(&hub),
            store.clone(),
        );
        Fixture {
            datasets,
            hub,
            store,
            controller,
        }
    }

    fn ready_dataset(datasets: &DatasetRegistry, rows: i64) -> crate::id::DatasetId {
        let dataset = datasets.create("sample", SourceDescriptor::upload("sample.csv"));
        let mut table = Table::new(["id", "text"]);
        for i in 0..rows {
            table.push_row(vec![Value::Int(i % 5), format!("text {}", i % 5).into()]);
        }
        datasets
            .update_status(
                dataset.id,
                StatusUpdate::Processing {
                    format: Some(DatasetFormat::Csv),
                    size_bytes: 10,
                },
            )
            .unwrap();
        let stats = DatasetStats::compute(&table);
        datasets
            .update_status(
                dataset.id,
                StatusUpdate::Ready {
                    format: DatasetFormat::Csv,
                    table,
                    stats,
                    warnings: Vec::new(),
                },
            )
            .unwrap();
        dataset.id
    }

    #[tokio::test]
    async fn test_job_runs_to_completion() {
        let f = fixture(1);
        let dataset = ready_dataset(&f.datasets, 10);
        let id = f
            .controller
            .submit(JobRequest::new(dataset, vec![StageConfig::new(StageKind::Deduplication)]))
            .await
            .unwrap();

        let job = f.controller.wait(id).await.unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.progress, 100);
        let result = f.controller.result(id).unwrap();
        assert_eq!(result.total_rows_after, 5);
        assert_eq!(result.artifacts.len(), 2);
        assert_eq!(f.store.keys().await.len(), 2);
        assert!(!f.hub.is_open(FeedKey::Job(id)));
    }

    #[tokio::test]
    async fn test_unknown_dataset_is_rejected() {
        let f = fixture(1);
        let err = f
            .controller
            .submit(JobRequest::new(crate::id::DatasetId::new(), Vec::new()))
            .await
            .unwrap_err();
        assert!(err.is_user_error());
        assert!(f.controller.list().is_empty());
    }

    #[tokio::test]
    async fn test_pending_dataset_is_not_ready() {
        let f = fixture(1);
        let dataset = f.datasets.create("pending", SourceDescriptor::upload("p.csv"));
        let err = f
            .controller
            .submit(JobRequest::new(dataset.id, Vec::new()))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Validation(ValidationError::DatasetNotReady { .. })
        ));
    }

    #[tokio::test]
    async fn test_cancel_queued_job() {
        let f = fixture(1);
        let dataset = ready_dataset(&f.datasets, 3);
        // with the dispatcher stopped the job stays queued
        f.controller.shutdown.cancel();
        let id = f
            .controller
            .submit(JobRequest::new(dataset, Vec::new()))
            .await
            .unwrap();
        let job = f.controller.cancel(id).unwrap();
        assert_eq!(job.status, JobStatus::Cancelled);
        assert!(job.error_message.is_some());

        let again = f.controller.cancel(id).unwrap();
        assert_eq!(again.status, JobStatus::Cancelled);
        assert_eq!(f.controller.wait(id).await.unwrap().status, JobStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_feed_events_are_monotonic() {
        let f = fixture(2);
        let dataset = ready_dataset(&f.datasets, 20);
        let id = f
            .controller
            .submit(JobRequest::new(
                dataset,
                vec![
                    StageConfig::new(StageKind::Deduplication),
                    StageConfig::new(StageKind::NoiseRemoval),
                ],
            ))
            .await
            .unwrap();
        let subscription = f.hub.subscribe(FeedKey::Job(id));
        let job = f.controller.wait(id).await.unwrap();
        assert_eq!(job.status, JobStatus::Completed);

        if let Some(subscription) = subscription {
            let events = subscription.collect().await;
            let last = events.last().unwrap();
            assert_eq!(last.status, FeedStatus::Completed);
            assert_eq!(last.progress, 100);
            assert!(events.windows(2).all(|w| w[0].progress <= w[1].progress));
        }
    }
}
