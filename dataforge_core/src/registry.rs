//! Dataset registry: metadata and lifecycle for every ingested dataset
//!
//! Status moves `pending -> processing -> {ready | failed}` (a pending
//! dataset may also fail directly, e.g. when its upload is abandoned).
//! Nothing leaves `ready` or `failed`; re-ingesting creates a new version
//! whose `parent` points at the previous one.
//!
//! Each status change replaces the record, table and stats together under
//! one write lock, so readers never see `ready` without its row counts.

use crate::error::{IngestionError, InternalError, Result, ValidationError};
use crate::format::DatasetFormat;
use crate::id::DatasetId;
use crate::stats::DatasetStats;
use crate::table::Table;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Lifecycle status of a dataset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatasetStatus {
    Pending,
    Processing,
    Ready,
    Failed,
}

impl DatasetStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Ready => "ready",
            Self::Failed => "failed",
        }
    }

    /// Ready and failed datasets never change again
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Ready | Self::Failed)
    }

    fn can_transition_to(&self, next: DatasetStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Processing)
                | (Self::Pending, Self::Failed)
                | (Self::Processing, Self::Ready)
                | (Self::Processing, Self::Failed)
        )
    }
}

impl fmt::Display for DatasetStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a dataset's bytes came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Upload,
    S3,
    Url,
    HuggingFace,
    GDrive,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Upload => "upload",
            Self::S3 => "s3",
            Self::Url => "url",
            Self::HuggingFace => "huggingface",
            Self::GDrive => "gdrive",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SourceKind {
    type Err = IngestionError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "upload" | "file_upload" => Ok(Self::Upload),
            "s3" => Ok(Self::S3),
            "url" => Ok(Self::Url),
            "huggingface" | "hf" => Ok(Self::HuggingFace),
            "gdrive" | "google_drive" => Ok(Self::GDrive),
            other => Err(IngestionError::unsupported_source(other)),
        }
    }
}

/// Source descriptor recorded with each dataset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceDescriptor {
    pub kind: SourceKind,
    /// Filename, URL, bucket key or repository id
    pub location: Option<String>,
}

impl SourceDescriptor {
    pub fn upload(filename: &str) -> Self {
        Self {
            kind: SourceKind::Upload,
            location: Some(filename.to_string()),
        }
    }
}

/// Dataset metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    pub id: DatasetId,
    pub name: String,
    pub format: Option<DatasetFormat>,
    /// Set only once the dataset is ready
    pub row_count: Option<usize>,
    /// Set only once the dataset is ready
    pub column_count: Option<usize>,
    pub size_bytes: u64,
    pub status: DatasetStatus,
    /// Set if and only if the dataset failed
    pub error_message: Option<String>,
    pub source: SourceDescriptor,
    pub version: u32,
    pub parent: Option<DatasetId>,
    /// Non-fatal decode issues
    pub warnings: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A status change plus the fields that travel with it
#[derive(Debug)]
pub enum StatusUpdate {
    Processing {
        format: Option<DatasetFormat>,
        size_bytes: u64,
    },
    Ready {
        format: DatasetFormat,
        table: Table,
        stats: DatasetStats,
        warnings: Vec<String>,
    },
    Failed {
        message: String,
    },
}

impl StatusUpdate {
    fn target(&self) -> DatasetStatus {
        match self {
            Self::Processing { .. } => DatasetStatus::Processing,
            Self::Ready { .. } => DatasetStatus::Ready,
            Self::Failed { .. } => DatasetStatus::Failed,
        }
    }
}

struct Entry {
    seq: u64,
    record: Dataset,
    table: Option<Arc<Table>>,
    stats: Option<Arc<DatasetStats>>,
}

#[derive(Default)]
struct Inner {
    next_seq: u64,
    entries: HashMap<DatasetId, Entry>,
}

/// In-process dataset registry
#[derive(Default)]
pub struct DatasetRegistry {
    inner: RwLock<Inner>,
}

impl DatasetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(|p| p.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(|p| p.into_inner())
    }

    /// Register a new pending dataset
    pub fn create(&self, name: &str, source: SourceDescriptor) -> Dataset {
        self.insert(name, source, 1, None)
    }

    /// Register a new version of an existing dataset for re-ingestion
    ///
    /// Fails while any version of the same lineage is still ingesting.
    pub fn create_version(&self, parent: DatasetId) -> Result<Dataset> {
        let (name, source, version) = {
            let inner = self.read();
            let entry = inner
                .entries
                .get(&parent)
                .ok_or_else(|| InternalError::not_found("Dataset", parent))?;
            let root = lineage_root(&inner, parent);
            let busy = inner.entries.values().any(|e| {
                !e.record.status.is_terminal() && lineage_root(&inner, e.record.id) == root
            });
            if busy {
                return Err(IngestionError::in_flight(parent).into());
            }
            let latest = inner
                .entries
                .values()
                .filter(|e| lineage_root(&inner, e.record.id) == root)
                .map(|e| e.record.version)
                .max()
                .unwrap_or(entry.record.version);
            (
                entry.record.name.clone(),
                entry.record.source.clone(),
                latest + 1,
            )
        };
        Ok(self.insert(&name, source, version, Some(parent)))
    }

    fn insert(
        &self,
        name: &str,
        source: SourceDescriptor,
        version: u32,
        parent: Option<DatasetId>,
    ) -> Dataset {
        let now = Utc::now();
        let record = Dataset {
            id: DatasetId::new(),
            name: name.to_string(),
            format: None,
            row_count: None,
            column_count: None,
            size_bytes: 0,
            status: DatasetStatus::Pending,
            error_message: None,
            source,
            version,
            parent,
            warnings: Vec::new(),
            created_at: now,
            updated_at: now,
        };

        let mut inner = self.write();
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.entries.insert(
            record.id,
            Entry {
                seq,
                record: record.clone(),
                table: None,
                stats: None,
            },
        );
        log::debug!("Registered dataset {} ('{}' v{version})", record.id, record.name);
        record
    }

    /// Apply a status change
    ///
    /// A second attempt to move a dataset into `processing` reports
    /// [`IngestionError::IngestionInFlight`]; any other illegal transition is
    /// an internal error.
    pub fn update_status(&self, id: DatasetId, update: StatusUpdate) -> Result<Dataset> {
        let mut inner = self.write();
        let entry = inner
            .entries
            .get_mut(&id)
            .ok_or_else(|| InternalError::not_found("Dataset", id))?;

        let current = entry.record.status;
        let target = update.target();
        if !current.can_transition_to(target) {
            if target == DatasetStatus::Processing && current == DatasetStatus::Processing {
                return Err(IngestionError::in_flight(id).into());
            }
            return Err(InternalError::assertion(format!(
                "dataset {id} cannot move from {current} to {target}"
            ))
            .into());
        }

        let record = &mut entry.record;
        record.status = target;
        record.updated_at = Utc::now();
        match update {
            StatusUpdate::Processing { format, size_bytes } => {
                record.format = format.or(record.format);
                record.size_bytes = size_bytes;
            }
            StatusUpdate::Ready {
                format,
                table,
                stats,
                warnings,
            } => {
                record.format = Some(format);
                record.row_count = Some(table.row_count());
                record.column_count = Some(table.column_count());
                record.warnings = warnings;
                record.error_message = None;
                entry.table = Some(Arc::new(table));
                entry.stats = Some(Arc::new(stats));
            }
            StatusUpdate::Failed { message } => {
                record.row_count = None;
                record.column_count = None;
                record.error_message = Some(message);
                entry.table = None;
                entry.stats = None;
            }
        }

        log::info!("Dataset {id} is now {target}");
        Ok(entry.record.clone())
    }

    /// Snapshot of one dataset
    pub fn get(&self, id: DatasetId) -> Result<Dataset> {
        self.read()
            .entries
            .get(&id)
            .map(|e| e.record.clone())
            .ok_or_else(|| InternalError::not_found("Dataset", id).into())
    }

    /// All datasets in creation order
    pub fn list(&self) -> Vec<Dataset> {
        let inner = self.read();
        let mut entries: Vec<&Entry> = inner.entries.values().collect();
        entries.sort_by_key(|e| e.seq);
        entries.into_iter().map(|e| e.record.clone()).collect()
    }

    /// The materialized table of a ready dataset
    pub fn table(&self, id: DatasetId) -> Result<Arc<Table>> {
        let inner = self.read();
        let entry = inner
            .entries
            .get(&id)
            .ok_or_else(|| InternalError::not_found("Dataset", id))?;
        match (&entry.table, entry.record.status) {
            (Some(table), DatasetStatus::Ready) => Ok(Arc::clone(table)),
            (_, status) => Err(ValidationError::dataset_not_ready(id, status).into()),
        }
    }

    /// Column statistics of a ready dataset
    pub fn stats(&self, id: DatasetId) -> Result<Arc<DatasetStats>> {
        let inner = self.read();
        let entry = inner
            .entries
            .get(&id)
            .ok_or_else(|| InternalError::not_found("Dataset", id))?;
        match (&entry.stats, entry.record.status) {
            (Some(stats), DatasetStatus::Ready) => Ok(Arc::clone(stats)),
            (_, status) => Err(ValidationError::dataset_not_ready(id, status).into()),
        }
    }

    /// Datasets derived from `id` by re-ingestion, oldest first
    pub fn versions(&self, id: DatasetId) -> Vec<Dataset> {
        let inner = self.read();
        let root = lineage_root(&inner, id);
        let mut lineage: Vec<&Entry> = inner
            .entries
            .values()
            .filter(|e| lineage_root(&inner, e.record.id) == root)
            .collect();
        lineage.sort_by_key(|e| e.record.version);
        lineage.into_iter().map(|e| e.record.clone()).collect()
    }
}

fn lineage_root(inner: &Inner, mut id: DatasetId) -> DatasetId {
    while let Some(parent) = inner.entries.get(&id).and_then(|e| e.record.parent) {
        id = parent;
    }
    id
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::table::Value;

    fn ready_update() -> StatusUpdate {
        let mut table = Table::new(["a"]);
        table.push_row(vec![Value::Int(1)]);
        let stats = DatasetStats::compute(&table);
        StatusUpdate::Ready {
            format: DatasetFormat::Csv,
            table,
            stats,
            warnings: vec![],
        }
    }

    fn processing() -> StatusUpdate {
        StatusUpdate::Processing {
            format: None,
            size_bytes: 4,
        }
    }

    #[test]
    fn test_lifecycle_to_ready() {
        let registry = DatasetRegistry::new();
        let ds = registry.create("data", SourceDescriptor::upload("data.csv"));
        assert_eq!(ds.status, DatasetStatus::Pending);
        assert!(ds.row_count.is_none());

        registry.update_status(ds.id, processing()).unwrap();
        let ready = registry.update_status(ds.id, ready_update()).unwrap();

        assert_eq!(ready.status, DatasetStatus::Ready);
        assert_eq!(ready.row_count, Some(1));
        assert_eq!(ready.column_count, Some(1));
        assert!(ready.error_message.is_none());
        assert_eq!(registry.table(ds.id).unwrap().row_count(), 1);
    }

    #[test]
    fn test_failed_carries_message_only() {
        let registry = DatasetRegistry::new();
        let ds = registry.create("data", SourceDescriptor::upload("data.csv"));
        let failed = registry
            .update_status(
                ds.id,
                StatusUpdate::Failed {
                    message: "bad".to_string(),
                },
            )
            .unwrap();
        assert_eq!(failed.error_message.as_deref(), Some("bad"));
        assert!(failed.row_count.is_none());
        assert!(registry.table(ds.id).is_err());
    }

    #[test]
    fn test_no_transition_out_of_ready() {
        let registry = DatasetRegistry::new();
        let ds = registry.create("data", SourceDescriptor::upload("data.csv"));
        registry.update_status(ds.id, processing()).unwrap();
        registry.update_status(ds.id, ready_update()).unwrap();

        let err = registry
            .update_status(
                ds.id,
                StatusUpdate::Failed {
                    message: "late".to_string(),
                },
            )
            .unwrap_err();
        assert!(matches!(err, Error::Internal(InternalError::Assertion { .. })));
        assert_eq!(registry.get(ds.id).unwrap().status, DatasetStatus::Ready);
    }

    #[test]
    fn test_second_ingestion_rejected() {
        let registry = DatasetRegistry::new();
        let ds = registry.create("data", SourceDescriptor::upload("data.csv"));
        registry.update_status(ds.id, processing()).unwrap();
        let err = registry.update_status(ds.id, processing()).unwrap_err();
        assert!(matches!(
            err,
            Error::Ingestion(IngestionError::IngestionInFlight { .. })
        ));
    }

    #[test]
    fn test_reingestion_creates_version() {
        let registry = DatasetRegistry::new();
        let ds = registry.create("data", SourceDescriptor::upload("data.csv"));

        assert!(registry.create_version(ds.id).is_err());

        registry.update_status(ds.id, processing()).unwrap();
        registry.update_status(ds.id, ready_update()).unwrap();

        let v2 = registry.create_version(ds.id).unwrap();
        assert_eq!(v2.version, 2);
        assert_eq!(v2.parent, Some(ds.id));
        assert_eq!(registry.versions(ds.id).len(), 2);
        assert!(registry.create_version(ds.id).is_err());
    }

    #[test]
    fn test_list_in_creation_order() {
        let registry = DatasetRegistry::new();
        let a = registry.create("a", SourceDescriptor::upload("a.csv"));
        let b = registry.create("b", SourceDescriptor::upload("b.csv"));
        let ids: Vec<_> = registry.list().into_iter().map(|d| d.id).collect();
        assert_eq!(ids, vec![a.id, b.id]);
    }

    #[test]
    fn test_source_kind_parsing() {
        assert_eq!("hf".parse::<SourceKind>().unwrap(), SourceKind::HuggingFace);
        assert!("ftp".parse::<SourceKind>().is_err());
    }
}
