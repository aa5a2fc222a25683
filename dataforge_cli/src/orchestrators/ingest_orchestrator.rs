//! Ingest command orchestrator
//!
//! Reads a local file into the engine. Files above the configured chunk
//! threshold are streamed through an upload session, one checksummed chunk
//! at a time, while the dataset's progress feed is rendered.

use crate::error::CliError;
use crate::progress::{FeedRenderer, chunk_bar, render_feed, show_status};
use anyhow::{Context, Result};
use dataforge_core::upload::ChunkSpan;
use dataforge_core::{
    DataForge, Dataset, DatasetFormat, DatasetStats, ProgressEvent, plan_chunks,
};
use log::debug;
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::task::JoinHandle;

/// Options for ingesting one file
#[derive(Debug, Clone, Default)]
pub struct IngestOptions {
    /// Display name; defaults to the file name
    pub name: Option<String>,
    /// Format to use instead of detection
    pub format: Option<DatasetFormat>,
    pub show_progress: bool,
}

/// Orchestrator for the ingest command
pub struct IngestOrchestrator<'a> {
    forge: &'a DataForge,
}

impl<'a> IngestOrchestrator<'a> {
    pub fn new(forge: &'a DataForge) -> Self {
        Self { forge }
    }

    /// Ingest `path`, returning the ready dataset and its statistics
    pub async fn ingest_file(
        &self,
        path: &Path,
        options: &IngestOptions,
    ) -> Result<(Dataset, Option<Arc<DatasetStats>>)> {
        let metadata = tokio::fs::metadata(path)
            .await
            .map_err(|e| CliError::from_io_error(e, &path.display().to_string()))?;
        if !metadata.is_file() {
            return Err(CliError::filesystem(&format!(
                "Not a regular file: {}",
                path.display()
            ))
            .into());
        }
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("dataset")
            .to_string();

        let threshold = self.forge.config().chunk_threshold_bytes;
        let spans = plan_chunks(metadata.len(), threshold);
        debug!(
            "Ingesting {} ({} bytes) in {} chunk(s) of at most {threshold} bytes",
            path.display(),
            metadata.len(),
            spans.len()
        );

        // uploads carry no format hint, so hinted files go in whole
        let dataset = if spans.len() > 1 && options.format.is_none() {
            self.upload_chunked(path, &filename, metadata.len(), &spans, options)
                .await?
        } else {
            self.ingest_whole(path, &filename, options).await?
        };

        let stats = self.forge.stats(dataset.id).ok();
        Ok((dataset, stats))
    }

    async fn ingest_whole(
        &self,
        path: &Path,
        filename: &str,
        options: &IngestOptions,
    ) -> Result<Dataset> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| CliError::from_io_error(e, &path.display().to_string()))?;
        if options.show_progress {
            show_status(&format!("Ingesting {filename}"));
        }

        let dataset = self
            .forge
            .ingest_bytes(filename, bytes, options.name.as_deref(), options.format)
            .await?;

        // the feed has closed by now; replay its final state
        if options.show_progress {
            let events = self.forge.subscribe_dataset(dataset.id)?;
            render_feed(events, FeedRenderer::new(filename, true)).await;
        }

        Ok(dataset)
    }

    async fn upload_chunked(
        &self,
        path: &Path,
        filename: &str,
        size: u64,
        spans: &[ChunkSpan],
        options: &IngestOptions,
    ) -> Result<Dataset> {
        let upload = self.forge.begin_upload(
            filename,
            spans.len(),
            Some(size),
            options.name.as_deref(),
        )?;
        let mut file = tokio::fs::File::open(path)
            .await
            .map_err(|e| CliError::from_io_error(e, &path.display().to_string()))?;

        let bar = chunk_bar(spans.len(), options.show_progress);
        let mut feed: Option<JoinHandle<Option<ProgressEvent>>> = None;
        let mut dataset = None;

        for span in spans {
            let chunk = read_span(&mut file, span)
                .await
                .with_context(|| format!("Failed to read chunk {} of {}", span.index, path.display()))?;
            let checksum = crc32fast::hash(&chunk);

            let progress = match self
                .forge
                .put_chunk(upload, span.index, chunk, Some(checksum))
                .await
            {
                Ok(progress) => progress,
                Err(e) => {
                    bar.abandon();
                    if let Some(feed) = feed.take() {
                        let _ = feed.await;
                    }
                    return Err(e.into());
                }
            };
            bar.inc(1);

            if feed.is_none() {
                let events = self.forge.subscribe_dataset(progress.dataset_id)?;
                let renderer = FeedRenderer::new(filename, options.show_progress);
                feed = Some(tokio::spawn(render_feed(events, renderer)));
            }
            if progress.dataset.is_some() {
                dataset = progress.dataset;
            }
        }
        bar.finish_and_clear();

        if let Some(feed) = feed {
            let _ = feed.await;
        }
        dataset.ok_or_else(|| anyhow::anyhow!("Upload of {} did not complete", path.display()))
    }
}

async fn read_span(file: &mut tokio::fs::File, span: &ChunkSpan) -> std::io::Result<Vec<u8>> {
    file.seek(std::io::SeekFrom::Start(span.offset)).await?;
    let mut chunk = vec![0u8; span.len as usize];
    file.read_exact(&mut chunk).await?;
    Ok(chunk)
}
