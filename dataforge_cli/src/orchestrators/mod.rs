//! Command orchestrators
//!
//! Each orchestrator drives one command against the engine facade and owns
//! its progress rendering.

pub mod ingest_orchestrator;
pub mod pipeline_orchestrator;

pub use ingest_orchestrator::{IngestOptions, IngestOrchestrator};
pub use pipeline_orchestrator::{PipelineFile, PipelineOrchestrator, build_stage_configs};
