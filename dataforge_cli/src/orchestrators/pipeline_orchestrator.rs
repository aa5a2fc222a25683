//! Run command orchestrator
//!
//! Builds a pipeline from `--stage`/`--option` flags or a pipeline file,
//! submits it as a job and follows the job's progress feed until it ends.
//! Ctrl-C cancels the job instead of killing the process mid-write.

use crate::error::CliError;
use crate::progress::{FeedRenderer, render_feed};
use anyhow::{Context, Result};
use dataforge_core::stages::{ConfigField, FieldKind, OptionValue, StageSchema};
use dataforge_core::{DataForge, DatasetId, ExportFormat, Job, JobRequest, StageConfig};
use log::{debug, warn};
use serde::Deserialize;
use std::path::Path;

/// Contents of a `--pipeline` file
///
/// Either a bare list of stage entries or an object that may also choose
/// the artifact format.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum PipelineFile {
    Stages(Vec<StageConfig>),
    Request {
        stages: Vec<StageConfig>,
        #[serde(default)]
        output_format: Option<ExportFormat>,
    },
}

impl PipelineFile {
    /// Read and parse a pipeline file
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| CliError::from_io_error(e, &path.display().to_string()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("Invalid pipeline file {}", path.display()))
    }

    pub fn into_parts(self) -> (Vec<StageConfig>, Option<ExportFormat>) {
        match self {
            Self::Stages(stages) => (stages, None),
            Self::Request {
                stages,
                output_format,
            } => (stages, output_format),
        }
    }
}

/// Build stage entries from `--stage` ids and `stage.option=value` pairs
///
/// Option values are typed with the stage's declared schema; validation of
/// the result is left to the engine.
pub fn build_stage_configs(
    stages: &[String],
    options: &[String],
    schemas: &[StageSchema],
) -> Result<Vec<StageConfig>> {
    let mut configs: Vec<StageConfig> = stages
        .iter()
        .map(|id| StageConfig {
            stage: id.trim().to_string(),
            enabled: true,
            config: Default::default(),
        })
        .collect();

    for raw in options {
        let (target, value) = raw.split_once('=').ok_or_else(|| {
            CliError::misuse(&format!("Option '{raw}' must look like stage.option=value"))
        })?;
        let (stage, option) = target.split_once('.').ok_or_else(|| {
            CliError::misuse(&format!("Option '{raw}' must name its stage: stage.option=value"))
        })?;

        let field = schemas
            .iter()
            .find(|s| s.id == stage)
            .and_then(|s| s.fields.iter().find(|f| f.name == option));
        let value = parse_option_value(field, value);

        let mut applied = false;
        for config in configs.iter_mut().filter(|c| c.stage == stage) {
            config.config.insert(option.to_string(), value.clone());
            applied = true;
        }
        if !applied {
            return Err(CliError::misuse(&format!(
                "Option '{raw}' refers to stage '{stage}', which is not in the pipeline"
            ))
            .into());
        }
    }

    Ok(configs)
}

/// Type a raw command-line value according to the option's schema
pub fn parse_option_value(field: Option<&ConfigField>, raw: &str) -> OptionValue {
    let split = |s: &str| -> OptionValue {
        OptionValue::List(
            s.split(',')
                .map(str::trim)
                .filter(|item| !item.is_empty())
                .map(str::to_string)
                .collect(),
        )
    };

    match field.map(|f| &f.kind) {
        Some(FieldKind::Boolean) => raw
            .parse::<bool>()
            .map(OptionValue::Bool)
            .unwrap_or_else(|_| OptionValue::Text(raw.to_string())),
        Some(FieldKind::Number { .. }) => raw
            .parse::<f64>()
            .map(OptionValue::Number)
            .unwrap_or_else(|_| OptionValue::Text(raw.to_string())),
        Some(FieldKind::Text) | Some(FieldKind::Choice { .. }) => OptionValue::Text(raw.to_string()),
        Some(FieldKind::List) => split(raw),
        Some(FieldKind::ListOrAll { all }) if raw == *all => OptionValue::Text(raw.to_string()),
        Some(FieldKind::ListOrAll { .. }) => split(raw),
        // unknown option; the engine reports it by name
        None => OptionValue::Text(raw.to_string()),
    }
}

/// Orchestrator for the run command
pub struct PipelineOrchestrator<'a> {
    forge: &'a DataForge,
    show_progress: bool,
}

impl<'a> PipelineOrchestrator<'a> {
    pub fn new(forge: &'a DataForge, show_progress: bool) -> Self {
        Self {
            forge,
            show_progress,
        }
    }

    /// Submit a pipeline over `dataset` and wait for the job to finish
    pub async fn run(
        &self,
        dataset: DatasetId,
        stages: Vec<StageConfig>,
        output_format: Option<ExportFormat>,
    ) -> Result<Job> {
        let mut request = JobRequest::new(dataset, stages);
        if let Some(format) = output_format {
            request = request.with_output_format(format);
        }

        let id = self.forge.submit_job(request).await?;
        debug!("Submitted job {id} for dataset {dataset}");

        let events = self.forge.subscribe_job(id)?;
        let renderer = FeedRenderer::new("pipeline", self.show_progress);
        let mut feed = tokio::spawn(render_feed(events, renderer));

        tokio::select! {
            biased;
            _ = tokio::signal::ctrl_c() => {
                warn!("Interrupted, cancelling job {id}");
                self.forge.cancel_job(id)?;
                let _ = feed.await;
            }
            _ = &mut feed => {}
        }

        Ok(self.forge.wait_for_job(id).await?)
    }
}
