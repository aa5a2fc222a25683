//! Engine and agent configuration.
//!
//! Both objects are passed explicitly to the components that need them; nothing
//! in the engine reads process-wide settings.

use crate::error::{Result, ValidationError};
use crate::export::ExportFormat;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default chunk threshold used when clients split uploads (100 MiB)
pub const DEFAULT_CHUNK_THRESHOLD: u64 = 100 * 1024 * 1024;

/// Default in-memory buffer size before an upload spills to disk (256 MiB)
pub const DEFAULT_SPILL_THRESHOLD: u64 = 256 * 1024 * 1024;

/// Configuration for the ingestion and pipeline engine
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Number of pipeline workers running jobs concurrently
    pub worker_count: usize,
    /// Capacity of the queued-job channel
    pub queue_capacity: usize,
    /// Seconds an upload session may sit idle before it is reaped
    pub upload_idle_timeout_secs: u64,
    /// Seconds between reaper sweeps
    pub reaper_interval_secs: u64,
    /// Chunk size recommended to clients splitting large files
    pub chunk_threshold_bytes: u64,
    /// Buffered bytes per upload session before spilling to a temp file
    pub spill_threshold_bytes: u64,
    /// Events buffered per progress subscriber before lagging ones drop events
    pub progress_buffer: usize,
    /// Optional per-stage execution budget
    pub stage_timeout_secs: Option<u64>,
    /// Attempts for transient artifact storage failures
    pub storage_retry_attempts: u32,
    /// Initial backoff between storage attempts, doubled each retry
    pub storage_retry_backoff_ms: u64,
    /// Rows returned by dataset previews
    pub preview_rows: usize,
    /// Artifact format written when a job does not choose one
    pub output_format: ExportFormat,
    /// Root directory for artifacts
    pub data_dir: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            worker_count: 2,
            queue_capacity: 256,
            upload_idle_timeout_secs: 900,
            reaper_interval_secs: 30,
            chunk_threshold_bytes: DEFAULT_CHUNK_THRESHOLD,
            spill_threshold_bytes: DEFAULT_SPILL_THRESHOLD,
            progress_buffer: 64,
            stage_timeout_secs: None,
            storage_retry_attempts: 3,
            storage_retry_backoff_ms: 100,
            preview_rows: 50,
            output_format: ExportFormat::Jsonl,
            data_dir: default_data_dir(),
        }
    }
}

impl EngineConfig {
    /// Create a configuration suited to tests: small buffers, fast reaping
    pub fn test() -> Self {
        Self {
            worker_count: 2,
            queue_capacity: 16,
            upload_idle_timeout_secs: 60,
            reaper_interval_secs: 1,
            chunk_threshold_bytes: 1024,
            spill_threshold_bytes: 4096,
            progress_buffer: 16,
            stage_timeout_secs: None,
            storage_retry_attempts: 2,
            storage_retry_backoff_ms: 1,
            preview_rows: 10,
            output_format: ExportFormat::Jsonl,
            data_dir: std::env::temp_dir().join("dataforge-test"),
        }
    }

    /// Set the worker count
    pub fn with_worker_count(mut self, count: usize) -> Self {
        self.worker_count = count;
        self
    }

    /// Set the upload idle timeout
    pub fn with_upload_idle_timeout(mut self, timeout: Duration) -> Self {
        self.upload_idle_timeout_secs = timeout.as_secs();
        self
    }

    /// Set the per-stage timeout
    pub fn with_stage_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.stage_timeout_secs = timeout.map(|t| t.as_secs());
        self
    }

    /// Set the spill threshold
    pub fn with_spill_threshold(mut self, bytes: u64) -> Self {
        self.spill_threshold_bytes = bytes;
        self
    }

    /// Set the artifact directory
    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = dir.into();
        self
    }

    /// Idle timeout as a duration
    pub fn upload_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.upload_idle_timeout_secs)
    }

    /// Stage timeout as a duration
    pub fn stage_timeout(&self) -> Option<Duration> {
        self.stage_timeout_secs.map(Duration::from_secs)
    }

    /// Validate value ranges
    pub fn validate(&self) -> Result<()> {
        if self.worker_count == 0 {
            return Err(ValidationError::invalid_parameter(
                "worker_count",
                "must be at least 1",
            )
            .into());
        }
        if self.queue_capacity == 0 {
            return Err(ValidationError::invalid_parameter(
                "queue_capacity",
                "must be at least 1",
            )
            .into());
        }
        if self.upload_idle_timeout_secs == 0 {
            return Err(ValidationError::invalid_parameter(
                "upload_idle_timeout_secs",
                "must be positive",
            )
            .into());
        }
        if self.reaper_interval_secs == 0 {
            return Err(ValidationError::invalid_parameter(
                "reaper_interval_secs",
                "must be positive",
            )
            .into());
        }
        if self.chunk_threshold_bytes == 0 {
            return Err(ValidationError::invalid_parameter(
                "chunk_threshold_bytes",
                "must be positive",
            )
            .into());
        }
        if self.progress_buffer == 0 {
            return Err(ValidationError::invalid_parameter(
                "progress_buffer",
                "must be at least 1",
            )
            .into());
        }
        if self.stage_timeout_secs == Some(0) {
            return Err(ValidationError::invalid_parameter(
                "stage_timeout_secs",
                "must be positive when set",
            )
            .into());
        }
        if self.preview_rows == 0 {
            return Err(ValidationError::invalid_parameter(
                "preview_rows",
                "must be at least 1",
            )
            .into());
        }
        Ok(())
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("dataforge"))
        .unwrap_or_else(|| PathBuf::from(".dataforge"))
}

/// LLM providers understood by the agent collaborator
pub const AGENT_PROVIDERS: &[&str] = &["openai", "anthropic", "ollama", "groq", "mistral"];

const OLLAMA_DEFAULT_URL: &str = "http://localhost:11434";

/// Workspace-wide LLM settings consumed by the pipeline-suggestion agent
///
/// The engine never reads these itself. They are loaded, validated and
/// persisted explicitly by whoever hosts the agent.
#[derive(Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AgentSettings {
    pub provider: String,
    pub model: String,
    pub base_url: Option<String>,
    pub api_key: Option<String>,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gpt-4o-mini".to_string(),
            base_url: None,
            api_key: None,
        }
    }
}

impl std::fmt::Debug for AgentSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentSettings")
            .field("provider", &self.provider)
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("has_key", &self.has_key())
            .finish()
    }
}

impl AgentSettings {
    /// Load settings from a JSON file, falling back to defaults when absent
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)?;
        let settings: Self = serde_json::from_str(&raw)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Persist settings as JSON, creating parent directories
    pub fn save(&self, path: &Path) -> Result<()> {
        self.validate()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Check the provider is known and has what it needs to connect
    pub fn validate(&self) -> Result<()> {
        if !AGENT_PROVIDERS.contains(&self.provider.as_str()) {
            return Err(ValidationError::invalid_parameter(
                "provider",
                &format!("must be one of {}", AGENT_PROVIDERS.join(", ")),
            )
            .into());
        }
        if self.model.trim().is_empty() {
            return Err(ValidationError::invalid_parameter("model", "must not be empty").into());
        }
        if self.provider != "ollama" && !self.has_key() {
            return Err(ValidationError::invalid_parameter(
                "api_key",
                &format!("provider '{}' requires an API key", self.provider),
            )
            .into());
        }
        Ok(())
    }

    /// Whether an API key is configured
    pub fn has_key(&self) -> bool {
        self.api_key.as_deref().is_some_and(|k| !k.trim().is_empty())
    }

    /// Endpoint to use, applying the local default for ollama
    pub fn effective_base_url(&self) -> Option<String> {
        match (&self.base_url, self.provider.as_str()) {
            (Some(url), _) => Some(url.clone()),
            (None, "ollama") => Some(OLLAMA_DEFAULT_URL.to_string()),
            _ => None,
        }
    }

    /// Provider-qualified model route
    pub fn model_route(&self) -> String {
        let prefix = format!("{}/", self.provider);
        match self.provider.as_str() {
            "openai" | "anthropic" => self.model.clone(),
            _ if self.model.starts_with(&prefix) => self.model.clone(),
            _ => format!("{prefix}{}", self.model),
        }
    }
}
