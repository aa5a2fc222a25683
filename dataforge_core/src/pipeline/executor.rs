//! Sequential stage executor

use super::{Artifact, JobResult, PipelineRun, RESULT_ARTIFACT, RunOutcome};
use crate::error::{Result, StageError};
use crate::export::{ExportFormat, export};
use crate::progress::{ProgressProvider, ProgressUpdate};
use crate::stages::{
    BagOfWordsModel, PlannedStage, QualityModel, SimilarityModel, StageContext, StageOutput,
    StageResult,
};
use crate::storage::{ArtifactStore, put_with_retry};
use crate::table::Table;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Runs validated stage plans against a table
///
/// Stage apply functions are CPU-bound and run on the blocking pool, one at
/// a time. A stage that returns an error, panics or exceeds the stage
/// timeout aborts the run; earlier stage results are kept.
pub struct PipelineExecutor {
    stage_timeout: Option<Duration>,
    similarity: Arc<dyn SimilarityModel>,
    quality: Option<Arc<dyn QualityModel>>,
    retry_attempts: u32,
    retry_backoff: Duration,
}

impl Default for PipelineExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineExecutor {
    pub fn new() -> Self {
        Self {
            stage_timeout: None,
            similarity: Arc::new(BagOfWordsModel::default()),
            quality: None,
            retry_attempts: 3,
            retry_backoff: Duration::from_millis(100),
        }
    }

    /// Bound the wall-clock time of each stage
    pub fn with_stage_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.stage_timeout = timeout;
        self
    }

    /// Model used by semantic deduplication
    pub fn with_similarity_model(mut self, model: Arc<dyn SimilarityModel>) -> Self {
        self.similarity = model;
        self
    }

    /// Model used by AI quality scoring; `None` falls back to heuristics
    pub fn with_quality_model(mut self, model: Option<Arc<dyn QualityModel>>) -> Self {
        self.quality = model;
        self
    }

    /// Retry policy for artifact writes
    pub fn with_storage_retry(mut self, attempts: u32, backoff: Duration) -> Self {
        self.retry_attempts = attempts;
        self.retry_backoff = backoff;
        self
    }

    /// Run a plan against a copy of `table`
    ///
    /// Cancellation is checked before every stage and once more after the
    /// last one; a stage already running is allowed to finish.
    pub async fn run(
        &self,
        table: &Table,
        plan: &[PlannedStage],
        progress: Arc<dyn ProgressProvider>,
        cancel: &CancellationToken,
    ) -> PipelineRun {
        let started = Instant::now();
        let total = plan.len();
        let mut working = table.clone();
        let mut result = JobResult::start(working.row_count());

        for stage in plan {
            if cancel.is_cancelled() {
                log::info!("Pipeline cancelled before stage {} of {total}", stage.position + 1);
                result.duration_seconds = started.elapsed().as_secs_f64();
                return PipelineRun {
                    outcome: RunOutcome::Cancelled {
                        position: stage.position,
                    },
                    result,
                    table: None,
                };
            }

            let id = stage.kind.id();
            let rows = working.row_count();
            progress.report(ProgressUpdate::StageStarted {
                position: stage.position,
                total,
                stage: id.to_string(),
            });

            if !stage.enabled {
                log::debug!("Skipping disabled stage {id} at position {}", stage.position);
                result.record(StageResult::skipped(id, stage.position, rows));
                progress.report(ProgressUpdate::StageFinished {
                    position: stage.position,
                    total,
                    stage: id.to_string(),
                    rows_after: rows,
                    skipped: true,
                });
                continue;
            }

            let stage_cancel = cancel.child_token();
            let ctx = StageContext::new(stage.kind, stage.position, total, Arc::clone(&progress))
                .with_cancellation(stage_cancel.clone())
                .with_similarity_model(Arc::clone(&self.similarity))
                .with_quality_model(self.quality.clone());

            let stage_started = Instant::now();
            match self.apply(stage, working, ctx, &stage_cancel).await {
                Ok(output) => {
                    let elapsed = stage_started.elapsed().as_millis() as u64;
                    let stage_result = StageResult::completed(id, stage.position, rows, &output, elapsed);
                    log::debug!("Stage {id}: {}", stage_result.summary());
                    for warning in &output.warnings {
                        log::warn!("Stage {id}: {warning}");
                    }
                    progress.report(ProgressUpdate::StageFinished {
                        position: stage.position,
                        total,
                        stage: id.to_string(),
                        rows_after: stage_result.rows_after,
                        skipped: false,
                    });
                    result.record(stage_result);
                    working = output.table;
                }
                Err(error) => {
                    let elapsed = stage_started.elapsed().as_millis() as u64;
                    log::error!("Stage {id} failed at position {}: {error}", stage.position);
                    result.record(StageResult::failed(id, stage.position, rows, &error, elapsed));
                    result.duration_seconds = started.elapsed().as_secs_f64();
                    return PipelineRun {
                        outcome: RunOutcome::Failed {
                            position: stage.position,
                            stage: id.to_string(),
                            error,
                        },
                        result,
                        table: None,
                    };
                }
            }
        }

        result.duration_seconds = started.elapsed().as_secs_f64();
        if cancel.is_cancelled() {
            log::info!("Pipeline cancelled after its last stage");
            return PipelineRun {
                outcome: RunOutcome::Cancelled { position: total },
                result,
                table: None,
            };
        }

        result.output_columns = working.columns().to_vec();
        log::info!(
            "Pipeline finished: {} stages, {} -> {} rows in {:.2}s",
            total,
            result.total_rows_before,
            result.total_rows_after,
            result.duration_seconds
        );
        PipelineRun {
            outcome: RunOutcome::Completed,
            result,
            table: Some(working),
        }
    }

    async fn apply(
        &self,
        stage: &PlannedStage,
        table: Table,
        ctx: StageContext,
        stage_cancel: &CancellationToken,
    ) -> std::result::Result<StageOutput, StageError> {
        let id = stage.kind.id();
        let apply = stage.descriptor.apply;
        let options = stage.options.clone();
        let handle = tokio::task::spawn_blocking(move || apply(table, &options, &ctx));

        let joined = match self.stage_timeout {
            Some(limit) => match tokio::time::timeout(limit, handle).await {
                Ok(joined) => joined,
                Err(_) => {
                    // the blocking task cannot be aborted; silence it instead
                    stage_cancel.cancel();
                    return Err(StageError::timeout(id, limit.as_secs()));
                }
            },
            None => handle.await,
        };
        joined.map_err(|e| {
            let reason = if e.is_panic() {
                "stage panicked"
            } else {
                "stage task was aborted"
            };
            StageError::failed(id, reason)
        })?
    }

    /// Write the transformed table and the run summary under `prefix`
    ///
    /// Adds an [`Artifact`] for each written file to `result`.
    pub async fn persist(
        &self,
        store: &dyn ArtifactStore,
        prefix: &str,
        table: &Table,
        format: ExportFormat,
        result: &mut JobResult,
    ) -> Result<()> {
        let name = format!("output.{}", format.extension());
        let bytes = export(table, format)?;
        let size_bytes = bytes.len() as u64;
        let reference = self.store(store, &format!("{prefix}/{name}"), bytes).await?;
        result.artifacts.push(Artifact {
            name,
            reference,
            content_type: format.content_type().to_string(),
            size_bytes,
        });

        let summary = serde_json::to_vec_pretty(&*result)?;
        let size_bytes = summary.len() as u64;
        let reference = self
            .store(store, &format!("{prefix}/{RESULT_ARTIFACT}"), summary)
            .await?;
        result.artifacts.push(Artifact {
            name: RESULT_ARTIFACT.to_string(),
            reference,
            content_type: "application/json".to_string(),
            size_bytes,
        });
        Ok(())
    }

    async fn store(&self, store: &dyn ArtifactStore, key: &str, bytes: Vec<u8>) -> Result<String> {
        put_with_retry(store, key, bytes, self.retry_attempts, self.retry_backoff).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::RecordingProvider;
    use crate::stages::{StageConfig, StageKind, StageOptions, StageRegistry};
    use crate::storage::MemoryStore;
    use crate::table::Value;

    fn table_with_duplicates() -> Table {
        let mut table = Table::new(["id", "text"]);
        for i in 0..10 {
            table.push_row(vec![Value::Int(i % 8), format!("row {}", i % 8).into()]);
        }
        table
    }

    fn plan(registry: &StageRegistry, configs: &[StageConfig]) -> Vec<PlannedStage> {
        registry.plan(configs).unwrap()
    }

    fn boom(_: Table, _: &StageOptions, ctx: &StageContext) -> std::result::Result<StageOutput, StageError> {
        Err(StageError::failed(ctx.stage(), "boom"))
    }

    fn panics(_: Table, _: &StageOptions, _: &StageContext) -> std::result::Result<StageOutput, StageError> {
        panic!("stage bug")
    }

    fn slow(table: Table, _: &StageOptions, _: &StageContext) -> std::result::Result<StageOutput, StageError> {
        std::thread::sleep(Duration::from_millis(300));
        Ok(StageOutput::new(table))
    }

    #[tokio::test]
    async fn test_empty_plan_keeps_rows() {
        let run = PipelineExecutor::new()
            .run(&table_with_duplicates(), &[], Arc::new(RecordingProvider::new()), &CancellationToken::new())
            .await;
        assert!(run.outcome.is_completed());
        assert_eq!(run.result.total_rows_before, 10);
        assert_eq!(run.result.total_rows_after, 10);
        assert_eq!(run.result.total_rows_removed, 0);
    }

    #[tokio::test]
    async fn test_dedup_then_skipped_stage() {
        let registry = StageRegistry::builtin();
        let stages = plan(
            &registry,
            &[
                StageConfig::new(StageKind::Deduplication),
                StageConfig::new(StageKind::PiiScrubbing).with_enabled(false),
            ],
        );
        let progress = Arc::new(RecordingProvider::new());
        let run = PipelineExecutor::new()
            .run(&table_with_duplicates(), &stages, progress.clone(), &CancellationToken::new())
            .await;

        assert!(run.outcome.is_completed());
        assert_eq!(run.result.total_rows_after, 8);
        assert_eq!(run.result.stages[0].rows_removed, 2);
        let skipped = &run.result.stages[1];
        assert!(skipped.skipped);
        assert_eq!((skipped.rows_before, skipped.rows_after, skipped.rows_removed), (8, 8, 0));
        assert_eq!(run.table.unwrap().row_count(), 8);

        let percents: Vec<u8> = progress.updates().iter().filter_map(|u| u.percent()).collect();
        assert!(percents.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(percents.last(), Some(&100));
    }

    #[tokio::test]
    async fn test_failure_keeps_partial_results() {
        let registry = StageRegistry::builtin();
        let pii = registry.get(StageKind::PiiScrubbing).unwrap();
        registry.register(pii.with_apply(boom));
        let stages = plan(
            &registry,
            &[
                StageConfig::new(StageKind::Deduplication),
                StageConfig::new(StageKind::PiiScrubbing),
                StageConfig::new(StageKind::QualityScorer),
            ],
        );
        let run = PipelineExecutor::new()
            .run(&table_with_duplicates(), &stages, Arc::new(RecordingProvider::new()), &CancellationToken::new())
            .await;

        match run.outcome {
            RunOutcome::Failed { position, ref stage, .. } => {
                assert_eq!(position, 1);
                assert_eq!(stage, "pii_scrubbing");
            }
            other => panic!("expected failure, got {other:?}"),
        }
        assert_eq!(run.result.stages.len(), 2);
        assert!(run.result.stages[1].failed);
        assert_eq!(run.result.failed_stage.as_deref(), Some("pii_scrubbing"));
        assert!(run.table.is_none());
    }

    #[tokio::test]
    async fn test_panicking_stage_is_a_stage_failure() {
        let registry = StageRegistry::builtin();
        let noise = registry.get(StageKind::NoiseRemoval).unwrap();
        registry.register(noise.with_apply(panics));
        let stages = plan(&registry, &[StageConfig::new(StageKind::NoiseRemoval)]);
        let run = PipelineExecutor::new()
            .run(&table_with_duplicates(), &stages, Arc::new(RecordingProvider::new()), &CancellationToken::new())
            .await;
        match run.outcome {
            RunOutcome::Failed { error, .. } => assert!(error.to_string().contains("panicked")),
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_stage_timeout() {
        let registry = StageRegistry::builtin();
        let noise = registry.get(StageKind::NoiseRemoval).unwrap();
        registry.register(noise.with_apply(slow));
        let stages = plan(&registry, &[StageConfig::new(StageKind::NoiseRemoval)]);
        let run = PipelineExecutor::new()
            .with_stage_timeout(Some(Duration::from_millis(20)))
            .run(&table_with_duplicates(), &stages, Arc::new(RecordingProvider::new()), &CancellationToken::new())
            .await;
        assert!(matches!(
            run.outcome,
            RunOutcome::Failed {
                error: StageError::Timeout { .. },
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_cancelled_before_first_stage() {
        let stages = plan(&StageRegistry::builtin(), &[StageConfig::new(StageKind::Deduplication)]);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let run = PipelineExecutor::new()
            .run(&table_with_duplicates(), &stages, Arc::new(RecordingProvider::new()), &cancel)
            .await;
        assert!(matches!(run.outcome, RunOutcome::Cancelled { position: 0 }));
        assert!(run.result.stages.is_empty());
    }

    #[tokio::test]
    async fn test_persist_writes_output_and_summary() {
        let store = MemoryStore::new();
        let executor = PipelineExecutor::new();
        let mut run = executor
            .run(&table_with_duplicates(), &[], Arc::new(RecordingProvider::new()), &CancellationToken::new())
            .await;
        let table = run.table.take().unwrap();
        executor
            .persist(&store, "jobs/j1", &table, ExportFormat::Csv, &mut run.result)
            .await
            .unwrap();

        assert_eq!(store.keys().await, ["jobs/j1/output.csv", "jobs/j1/result.json"]);
        let names: Vec<_> = run.result.artifacts.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, ["output.csv", "result.json"]);
    }
}
