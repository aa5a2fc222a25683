//! Chunked upload assembly
//!
//! A large file is split by the client into `total_chunks` ordered byte
//! ranges. Chunks may arrive in any order, concurrently, or more than once;
//! the assembler merges them under a per-session lock and hands back the
//! complete payload exactly once, when every index in `[0, total_chunks)`
//! has been received.
//!
//! Sessions buffer in memory until `spill_threshold` bytes, after which new
//! chunks are written to a per-session temporary directory. Idle sessions
//! are dropped by [`ChunkAssembler::reap_idle`], which also removes their
//! spill files.

use crate::error::{IngestionError, InternalError, Result};
use crate::id::UploadId;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tempfile::TempDir;

/// One byte range of a file split for chunked upload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkSpan {
    pub index: usize,
    pub offset: u64,
    pub len: u64,
}

/// Split a file of `size` bytes into spans of at most `threshold` bytes
///
/// A zero-byte file produces no spans.
pub fn plan_chunks(size: u64, threshold: u64) -> Vec<ChunkSpan> {
    let threshold = threshold.max(1);
    let count = size.div_ceil(threshold);
    (0..count)
        .map(|i| {
            let offset = i * threshold;
            ChunkSpan {
                index: i as usize,
                offset,
                len: threshold.min(size - offset),
            }
        })
        .collect()
}

/// Borrow the chunks of an in-memory payload according to [`plan_chunks`]
pub fn split_chunks(bytes: &[u8], threshold: u64) -> Vec<&[u8]> {
    plan_chunks(bytes.len() as u64, threshold)
        .into_iter()
        .map(|span| &bytes[span.offset as usize..(span.offset + span.len) as usize])
        .collect()
}

/// Acknowledgement returned for every accepted chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkReceipt {
    pub upload_id: UploadId,
    pub received_count: usize,
    pub total_chunks: usize,
    pub complete: bool,
}

impl ChunkReceipt {
    /// Upload progress derived from the received set, 0-100
    pub fn percent(&self) -> u8 {
        if self.total_chunks == 0 {
            return 0;
        }
        ((self.received_count * 100) / self.total_chunks) as u8
    }
}

/// A fully reassembled upload
#[derive(Debug)]
pub struct AssembledUpload {
    pub upload_id: UploadId,
    pub filename: String,
    pub bytes: Vec<u8>,
}

/// Result of submitting a chunk
#[derive(Debug)]
pub struct ChunkOutcome {
    pub receipt: ChunkReceipt,
    /// Present only on the submission that completed the upload
    pub assembled: Option<AssembledUpload>,
}

/// Session metadata visible to callers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadInfo {
    pub upload_id: UploadId,
    pub filename: String,
    pub total_chunks: usize,
    pub received_count: usize,
    pub buffered_bytes: u64,
    pub spilled: bool,
}

/// Session dropped by the idle reaper
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReapedUpload {
    pub upload_id: UploadId,
    pub filename: String,
    pub idle_for: Duration,
}

#[derive(Debug)]
enum ChunkData {
    Memory(Vec<u8>),
    Spilled { path: PathBuf, len: u64 },
}

impl ChunkData {
    fn len(&self) -> u64 {
        match self {
            Self::Memory(bytes) => bytes.len() as u64,
            Self::Spilled { len, .. } => *len,
        }
    }
}

#[derive(Debug)]
struct UploadSession {
    id: UploadId,
    filename: String,
    total_chunks: usize,
    declared_size: Option<u64>,
    chunks: BTreeMap<usize, ChunkData>,
    memory_bytes: u64,
    spill_dir: Option<TempDir>,
    last_activity: Instant,
    finished: bool,
    /// Set by the reaper; a `put` that was waiting on the lock must not land here
    reaped: bool,
}

impl UploadSession {
    fn receipt(&self) -> ChunkReceipt {
        ChunkReceipt {
            upload_id: self.id,
            received_count: self.chunks.len(),
            total_chunks: self.total_chunks,
            complete: self.finished || self.chunks.len() == self.total_chunks,
        }
    }

    fn total_len(&self) -> u64 {
        self.chunks.values().map(ChunkData::len).sum()
    }
}

/// Reassembles chunked uploads
pub struct ChunkAssembler {
    sessions: Mutex<HashMap<UploadId, Arc<tokio::sync::Mutex<UploadSession>>>>,
    spill_threshold: u64,
    idle_timeout: Duration,
}

impl ChunkAssembler {
    /// Create an assembler with the given spill threshold and idle timeout
    pub fn new(spill_threshold: u64, idle_timeout: Duration) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            spill_threshold,
            idle_timeout,
        }
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<UploadId, Arc<tokio::sync::Mutex<UploadSession>>>> {
        self.sessions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Open a new upload session
    pub fn begin(
        &self,
        filename: &str,
        total_chunks: usize,
        declared_size: Option<u64>,
    ) -> Result<UploadId> {
        if filename.trim().is_empty() {
            return Err(IngestionError::invalid_upload("filename must not be empty").into());
        }
        if total_chunks == 0 {
            return Err(IngestionError::invalid_upload("total_chunks must be at least 1").into());
        }

        let id = UploadId::new();
        let session = UploadSession {
            id,
            filename: filename.to_string(),
            total_chunks,
            declared_size,
            chunks: BTreeMap::new(),
            memory_bytes: 0,
            spill_dir: None,
            last_activity: Instant::now(),
            finished: false,
            reaped: false,
        };
        self.sessions()
            .insert(id, Arc::new(tokio::sync::Mutex::new(session)));
        log::debug!("Opened upload {id} for '{filename}' with {total_chunks} chunks");
        Ok(id)
    }

    /// Submit one chunk
    ///
    /// Re-submitting an index overwrites the earlier bytes and does not
    /// change `received_count`. When `checksum` is given it must equal the
    /// CRC32 of `bytes`.
    pub async fn put(
        &self,
        upload_id: UploadId,
        index: usize,
        bytes: Vec<u8>,
        checksum: Option<u32>,
    ) -> Result<ChunkOutcome> {
        let session = self
            .sessions()
            .get(&upload_id)
            .cloned()
            .ok_or_else(|| IngestionError::unknown_upload(upload_id))?;
        self.put_session(upload_id, session, index, bytes, checksum)
            .await
    }

    async fn put_session(
        &self,
        upload_id: UploadId,
        session: Arc<tokio::sync::Mutex<UploadSession>>,
        index: usize,
        bytes: Vec<u8>,
        checksum: Option<u32>,
    ) -> Result<ChunkOutcome> {
        let mut session = session.lock().await;
        if session.reaped {
            return Err(IngestionError::unknown_upload(upload_id).into());
        }
        if session.finished {
            // a late duplicate of an already-assembled upload
            return Ok(ChunkOutcome {
                receipt: session.receipt(),
                assembled: None,
            });
        }
        if index >= session.total_chunks {
            return Err(IngestionError::chunk_out_of_range(index, session.total_chunks).into());
        }
        if let Some(expected) = checksum {
            let actual = crc32fast::hash(&bytes);
            if actual != expected {
                return Err(IngestionError::ChecksumMismatch {
                    index,
                    expected,
                    actual,
                }
                .into());
            }
        }

        session.last_activity = Instant::now();
        let released = match session.chunks.get(&index) {
            Some(ChunkData::Memory(previous)) => previous.len() as u64,
            _ => 0,
        };
        session.memory_bytes -= released;

        let len = bytes.len() as u64;
        let data = if session.memory_bytes + len > self.spill_threshold {
            self.spill(&mut *session, index, bytes).await?
        } else {
            session.memory_bytes += len;
            ChunkData::Memory(bytes)
        };
        session.chunks.insert(index, data);

        let receipt = session.receipt();
        log::debug!(
            "Upload {upload_id}: chunk {index} accepted ({}/{})",
            receipt.received_count,
            receipt.total_chunks
        );
        if !receipt.complete {
            return Ok(ChunkOutcome {
                receipt,
                assembled: None,
            });
        }

        session.finished = true;
        self.sessions().remove(&upload_id);
        let assembled = Self::assemble(&mut *session).await?;
        Ok(ChunkOutcome {
            receipt,
            assembled: Some(assembled),
        })
    }

    async fn spill(&self, session: &mut UploadSession, index: usize, bytes: Vec<u8>) -> Result<ChunkData> {
        if session.spill_dir.is_none() {
            let dir = tempfile::Builder::new()
                .prefix("dataforge-upload-")
                .tempdir()?;
            log::debug!("Upload {} spilling to {}", session.id, dir.path().display());
            session.spill_dir = Some(dir);
        }
        let dir = session
            .spill_dir
            .as_ref()
            .ok_or_else(|| InternalError::assertion("spill directory missing after creation"))?;
        let path = dir.path().join(format!("chunk_{index:05}"));
        let len = bytes.len() as u64;
        tokio::fs::write(&path, bytes).await?;
        Ok(ChunkData::Spilled { path, len })
    }

    async fn assemble(session: &mut UploadSession) -> Result<AssembledUpload> {
        let total = session.total_len();
        if let Some(declared) = session.declared_size {
            if declared != total {
                return Err(IngestionError::size_mismatch(declared, total).into());
            }
        }

        let mut bytes = Vec::with_capacity(total as usize);
        for (_, chunk) in std::mem::take(&mut session.chunks) {
            match chunk {
                ChunkData::Memory(data) => bytes.extend_from_slice(&data),
                ChunkData::Spilled { path, .. } => {
                    bytes.extend_from_slice(&tokio::fs::read(&path).await?);
                }
            }
        }
        session.memory_bytes = 0;
        // dropping the TempDir removes spill files
        session.spill_dir = None;

        log::info!(
            "Upload {} assembled: '{}' ({} bytes)",
            session.id,
            session.filename,
            bytes.len()
        );
        Ok(AssembledUpload {
            upload_id: session.id,
            filename: session.filename.clone(),
            bytes,
        })
    }

    /// Inspect a live session
    pub fn info(&self, upload_id: UploadId) -> Option<UploadInfo> {
        let session = self.sessions().get(&upload_id).cloned()?;
        let session = session.try_lock().ok()?;
        Some(UploadInfo {
            upload_id,
            filename: session.filename.clone(),
            total_chunks: session.total_chunks,
            received_count: session.chunks.len(),
            buffered_bytes: session.total_len(),
            spilled: session.spill_dir.is_some(),
        })
    }

    /// Number of live sessions
    pub fn active_sessions(&self) -> usize {
        self.sessions().len()
    }

    /// Drop sessions idle longer than the configured timeout
    pub fn reap_idle(&self) -> Vec<ReapedUpload> {
        self.reap_idle_older_than(self.idle_timeout)
    }

    /// Drop sessions idle longer than `max_idle`
    ///
    /// Sessions currently locked by an in-progress chunk are never reaped.
    pub fn reap_idle_older_than(&self, max_idle: Duration) -> Vec<ReapedUpload> {
        let mut sessions = self.sessions();
        let mut reaped = Vec::new();
        sessions.retain(|id, session| {
            let Ok(mut guard) = session.try_lock() else {
                return true;
            };
            let idle_for = guard.last_activity.elapsed();
            if idle_for < max_idle {
                return true;
            }
            log::warn!(
                "Reaping upload {id} for '{}' after {}s idle ({}/{} chunks)",
                guard.filename,
                idle_for.as_secs(),
                guard.chunks.len(),
                guard.total_chunks
            );
            guard.reaped = true;
            reaped.push(ReapedUpload {
                upload_id: *id,
                filename: guard.filename.clone(),
                idle_for,
            });
            false
        });
        reaped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    fn assembler() -> ChunkAssembler {
        ChunkAssembler::new(1024 * 1024, Duration::from_secs(60))
    }

    #[test]
    fn test_plan_chunks_rounds_up() {
        let mb = 1_000_000u64;
        let spans = plan_chunks(250 * mb, 100 * mb);
        assert_eq!(spans.len(), 3);
        assert_eq!(spans[2].offset, 200 * mb);
        assert_eq!(spans[2].len, 50 * mb);
        assert!(plan_chunks(0, 10).is_empty());
        assert_eq!(plan_chunks(10, 10).len(), 1);
    }

    #[test]
    fn test_split_chunks() {
        let chunks = split_chunks(b"abcdefg", 3);
        assert_eq!(chunks, vec![&b"abc"[..], &b"def"[..], &b"g"[..]]);
    }

    #[test]
    fn test_begin_rejects_zero_chunks() {
        let err = assembler().begin("a.csv", 0, None).unwrap_err();
        assert!(matches!(
            err,
            Error::Ingestion(IngestionError::InvalidUpload { .. })
        ));
    }

    #[tokio::test]
    async fn test_out_of_order_assembly() {
        let assembler = assembler();
        let id = assembler.begin("a.txt", 3, Some(6)).unwrap();

        let r = assembler.put(id, 2, b"ef".to_vec(), None).await.unwrap();
        assert!(!r.receipt.complete);
        assembler.put(id, 0, b"ab".to_vec(), None).await.unwrap();
        let done = assembler.put(id, 1, b"cd".to_vec(), None).await.unwrap();

        assert!(done.receipt.complete);
        assert_eq!(done.assembled.unwrap().bytes, b"abcdef");
        assert_eq!(assembler.active_sessions(), 0);
    }

    #[tokio::test]
    async fn test_duplicate_chunk_is_idempotent() {
        let assembler = assembler();
        let id = assembler.begin("a.txt", 2, None).unwrap();

        let first = assembler.put(id, 0, b"ab".to_vec(), None).await.unwrap();
        let again = assembler.put(id, 0, b"ab".to_vec(), None).await.unwrap();
        assert_eq!(first.receipt.received_count, 1);
        assert_eq!(again.receipt.received_count, 1);
        assert_eq!(assembler.info(id).unwrap().buffered_bytes, 2);
    }

    #[tokio::test]
    async fn test_index_out_of_range() {
        let assembler = assembler();
        let id = assembler.begin("a.txt", 2, None).unwrap();
        let err = assembler.put(id, 2, vec![1], None).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Ingestion(IngestionError::ChunkOutOfRange { index: 2, total: 2 })
        ));
    }

    #[tokio::test]
    async fn test_checksum_mismatch() {
        let assembler = assembler();
        let id = assembler.begin("a.txt", 1, None).unwrap();
        let err = assembler.put(id, 0, b"data".to_vec(), Some(1)).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Ingestion(IngestionError::ChecksumMismatch { .. })
        ));

        let ok = assembler
            .put(id, 0, b"data".to_vec(), Some(crc32fast::hash(b"data")))
            .await
            .unwrap();
        assert!(ok.receipt.complete);
    }

    #[tokio::test]
    async fn test_declared_size_mismatch() {
        let assembler = assembler();
        let id = assembler.begin("a.txt", 1, Some(10)).unwrap();
        let err = assembler.put(id, 0, b"short".to_vec(), None).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Ingestion(IngestionError::SizeMismatch {
                declared: 10,
                received: 5
            })
        ));
    }

    #[tokio::test]
    async fn test_spill_to_disk() {
        let assembler = ChunkAssembler::new(4, Duration::from_secs(60));
        let id = assembler.begin("a.txt", 3, None).unwrap();
        assembler.put(id, 0, b"abc".to_vec(), None).await.unwrap();
        assembler.put(id, 1, b"def".to_vec(), None).await.unwrap();
        assert!(assembler.info(id).unwrap().spilled);

        let done = assembler.put(id, 2, b"gh".to_vec(), None).await.unwrap();
        assert_eq!(done.assembled.unwrap().bytes, b"abcdefgh");
    }

    #[tokio::test]
    async fn test_unknown_upload() {
        let err = assembler()
            .put(UploadId::new(), 0, vec![], None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Ingestion(IngestionError::UnknownUpload { .. })
        ));
    }

    #[tokio::test]
    async fn test_reaper_drops_idle_sessions() {
        let assembler = assembler();
        let id = assembler.begin("a.txt", 2, None).unwrap();
        assembler.put(id, 0, b"x".to_vec(), None).await.unwrap();

        assert!(assembler.reap_idle().is_empty());
        let reaped = assembler.reap_idle_older_than(Duration::ZERO);
        assert_eq!(reaped.len(), 1);
        assert_eq!(reaped[0].upload_id, id);

        let err = assembler.put(id, 1, b"y".to_vec(), None).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Ingestion(IngestionError::UnknownUpload { .. })
        ));
    }

    #[tokio::test]
    async fn test_chunk_waiting_on_reaped_session_is_rejected() {
        let assembler = assembler();
        let id = assembler.begin("a.txt", 2, None).unwrap();
        let stale = assembler.sessions().get(&id).cloned().unwrap();

        assert_eq!(assembler.reap_idle_older_than(Duration::ZERO).len(), 1);
        let err = assembler
            .put_session(id, stale.clone(), 0, b"x".to_vec(), None)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            Error::Ingestion(IngestionError::UnknownUpload { .. })
        ));
        assert!(stale.lock().await.chunks.is_empty());
    }
}
