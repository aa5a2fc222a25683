//! Ingestion related error types

use thiserror::Error;

/// Errors raised while receiving, assembling or decoding a dataset
#[derive(Error, Debug)]
pub enum IngestionError {
    /// Content could not be classified as any known structure
    #[error("Could not detect format of '{filename}': {reason}")]
    Undetected { filename: String, reason: String },

    /// Format was recognized but cannot be decoded into a table
    #[error("Unsupported format '{format}': {reason}")]
    UnsupportedFormat { format: String, reason: String },

    /// Content claimed a format but failed to parse
    #[error("Malformed {format} content: {message}")]
    Malformed { format: String, message: String },

    /// Payload carried no bytes
    #[error("Empty payload for '{filename}'")]
    EmptyPayload { filename: String },

    /// Declared size does not match what was received
    #[error("Size mismatch: declared {declared} bytes but received {received} bytes")]
    SizeMismatch { declared: u64, received: u64 },

    /// Chunk checksum did not match its bytes
    #[error("Checksum mismatch for chunk {index}: expected {expected:08x}, got {actual:08x}")]
    ChecksumMismatch {
        index: usize,
        expected: u32,
        actual: u32,
    },

    /// Chunk index outside the declared range
    #[error("Chunk index {index} out of range for upload with {total} chunks")]
    ChunkOutOfRange { index: usize, total: usize },

    /// Upload id unknown or reaped after idling
    #[error("Unknown or expired upload '{upload_id}', restart the upload")]
    UnknownUpload { upload_id: String },

    /// Upload parameters rejected at session creation
    #[error("Invalid upload: {reason}")]
    InvalidUpload { reason: String },

    /// Source kind not served by any connector
    #[error("Unsupported source kind '{kind}'")]
    UnsupportedSource { kind: String },

    /// Connector failed to produce bytes
    #[error("Fetch from {source_kind} failed: {message}")]
    Fetch {
        source_kind: String,
        message: String,
    },

    /// Another ingestion already targets this dataset
    #[error("Dataset '{dataset_id}' already has an ingestion in flight")]
    IngestionInFlight { dataset_id: String },
}

impl IngestionError {
    /// Create an undetected format error
    pub fn undetected(filename: &str, reason: &str) -> Self {
        Self::Undetected {
            filename: filename.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Create an unsupported format error
    pub fn unsupported_format(format: &str, reason: &str) -> Self {
        Self::UnsupportedFormat {
            format: format.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Create a malformed content error
    pub fn malformed(format: &str, message: &str) -> Self {
        Self::Malformed {
            format: format.to_string(),
            message: message.to_string(),
        }
    }

    /// Create an empty payload error
    pub fn empty_payload(filename: &str) -> Self {
        Self::EmptyPayload {
            filename: filename.to_string(),
        }
    }

    /// Create a size mismatch error
    pub fn size_mismatch(declared: u64, received: u64) -> Self {
        Self::SizeMismatch { declared, received }
    }

    /// Create a chunk index out of range error
    pub fn chunk_out_of_range(index: usize, total: usize) -> Self {
        Self::ChunkOutOfRange { index, total }
    }

    /// Create an unknown upload error
    pub fn unknown_upload(upload_id: impl ToString) -> Self {
        Self::UnknownUpload {
            upload_id: upload_id.to_string(),
        }
    }

    /// Create an invalid upload error
    pub fn invalid_upload(reason: impl Into<String>) -> Self {
        Self::InvalidUpload {
            reason: reason.into(),
        }
    }

    /// Create an unsupported source error
    pub fn unsupported_source(kind: &str) -> Self {
        Self::UnsupportedSource {
            kind: kind.to_string(),
        }
    }

    /// Create a connector fetch error
    pub fn fetch(source_kind: &str, message: impl Into<String>) -> Self {
        Self::Fetch {
            source_kind: source_kind.to_string(),
            message: message.into(),
        }
    }

    /// Create an ingestion in flight error
    pub fn in_flight(dataset_id: impl ToString) -> Self {
        Self::IngestionInFlight {
            dataset_id: dataset_id.to_string(),
        }
    }
}
