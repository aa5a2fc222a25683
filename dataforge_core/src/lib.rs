//! DataForge Core Library
//!
//! Ingests raw datasets (single-shot, chunked or from remote sources),
//! detects their format, and runs ordered cleaning pipelines over them as
//! asynchronous jobs with live progress feeds.

pub mod api;
pub mod config;
pub mod error;
pub mod export;
pub mod format;
pub mod id;
pub mod ingest;
pub mod jobs;
pub mod pipeline;
pub mod progress;
pub mod registry;
pub mod source;
pub mod stages;
pub mod stats;
pub mod storage;
pub mod table;
pub mod text;
pub mod upload;

// Re-export main types
pub use api::{DataForge, DataForgeBuilder, DatasetPreview};
pub use config::{AgentSettings, EngineConfig};
pub use error::{Error, FailureKind, Result};
pub use export::ExportFormat;
pub use format::DatasetFormat;
pub use id::{DatasetId, JobId, UploadId};
pub use ingest::UploadProgress;
pub use jobs::{Job, JobRequest, JobStatus};
pub use pipeline::{Artifact, JobResult};
pub use progress::{FeedKey, FeedStatus, ProgressEvent, ProgressProvider, ProgressUpdate, Subscription};
pub use registry::{Dataset, DatasetStatus, SourceKind};
pub use source::{ConnectRequest, FetchedPayload, SourceFetcher};
pub use stages::{StageConfig, StageKind, StageResult};
pub use stats::DatasetStats;
pub use table::{Table, Value};
pub use upload::{ChunkReceipt, plan_chunks};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
