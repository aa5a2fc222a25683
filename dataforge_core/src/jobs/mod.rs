//! Pipeline jobs: records, requests and the controller that runs them
//!
//! A job moves `queued -> running -> {completed | failed | cancelled}`; a
//! queued job may also be cancelled before a worker picks it up. Progress
//! only ever increases and is exactly 100 once a job completes.

use crate::error::FailureKind;
use crate::export::ExportFormat;
use crate::id::{DatasetId, JobId};
use crate::pipeline::JobResult;
use crate::progress::FeedStatus;
use crate::stages::StageConfig;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

mod controller;

pub use controller::{ControllerSettings, JobController};

/// Lifecycle status of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Status as carried on the job's progress feed
    pub fn feed_status(&self) -> FeedStatus {
        match self {
            Self::Queued => FeedStatus::Queued,
            Self::Running => FeedStatus::Running,
            Self::Completed => FeedStatus::Completed,
            Self::Failed => FeedStatus::Failed,
            Self::Cancelled => FeedStatus::Cancelled,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Job record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub dataset_id: DatasetId,
    pub stages: Vec<StageConfig>,
    pub output_format: ExportFormat,
    pub status: JobStatus,
    /// 0-100, never decreasing
    pub progress: u8,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Set for failed and cancelled jobs
    pub error_message: Option<String>,
    pub failure_kind: Option<FailureKind>,
    /// Stage that aborted the pipeline
    pub failed_stage: Option<String>,
    /// Present once the job is terminal, including partial results of failed runs
    pub result: Option<JobResult>,
}

/// A pipeline submission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRequest {
    pub dataset_id: DatasetId,
    pub stages: Vec<StageConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_format: Option<ExportFormat>,
}

impl JobRequest {
    pub fn new(dataset_id: DatasetId, stages: Vec<StageConfig>) -> Self {
        Self {
            dataset_id,
            stages,
            output_format: None,
        }
    }

    /// Choose the artifact encoding instead of the engine default
    pub fn with_output_format(mut self, format: ExportFormat) -> Self {
        self.output_format = Some(format);
        self
    }
}
