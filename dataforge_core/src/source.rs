//! Remote source connectors
//!
//! The engine treats every remote source the same way: a fetcher turns a
//! [`ConnectRequest`] into bytes plus an optional format hint, and the
//! bytes then follow the single-shot ingestion path. How a fetcher talks to
//! S3, an HTTP server or a dataset hub is its own business.

use crate::error::Result;
use crate::format::DatasetFormat;
use crate::registry::{SourceDescriptor, SourceKind};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Declarative request to ingest from a remote source
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectRequest {
    pub kind: SourceKind,
    /// Bucket key, URL or repository id
    pub location: String,
    /// Connector-specific secrets and identifiers; never logged
    #[serde(default)]
    pub credentials: BTreeMap<String, String>,
    /// Display name; defaults to the fetched filename
    #[serde(default)]
    pub name: Option<String>,
    /// Format declared by the caller, outranking the filename extension
    #[serde(default)]
    pub format_hint: Option<DatasetFormat>,
}

impl ConnectRequest {
    pub fn new(kind: SourceKind, location: impl Into<String>) -> Self {
        Self {
            kind,
            location: location.into(),
            credentials: BTreeMap::new(),
            name: None,
            format_hint: None,
        }
    }

    pub fn with_credential(mut self, key: &str, value: impl Into<String>) -> Self {
        self.credentials.insert(key.to_string(), value.into());
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_format_hint(mut self, format: DatasetFormat) -> Self {
        self.format_hint = Some(format);
        self
    }

    /// Descriptor recorded on the resulting dataset
    pub fn descriptor(&self) -> SourceDescriptor {
        SourceDescriptor {
            kind: self.kind,
            location: Some(self.location.clone()),
        }
    }
}

impl fmt::Debug for ConnectRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let keys: Vec<&str> = self.credentials.keys().map(String::as_str).collect();
        f.debug_struct("ConnectRequest")
            .field("kind", &self.kind)
            .field("location", &self.location)
            .field("credentials", &keys)
            .field("name", &self.name)
            .field("format_hint", &self.format_hint)
            .finish()
    }
}

/// Bytes produced by a fetcher
#[derive(Debug, Clone)]
pub struct FetchedPayload {
    /// Name used for extension-based detection and as the default dataset name
    pub filename: String,
    pub bytes: Vec<u8>,
    /// Format the remote side declared, if any
    pub format_hint: Option<DatasetFormat>,
}

/// Fetches the bytes behind a [`ConnectRequest`]
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    /// Source kinds this fetcher serves
    fn kinds(&self) -> Vec<SourceKind>;

    /// Download the payload
    ///
    /// Failures should be reported as [`crate::error::IngestionError::Fetch`].
    async fn fetch(&self, request: &ConnectRequest) -> Result<FetchedPayload>;
}

/// Filename to use when a location does not end in one
pub fn filename_from_location(location: &str) -> String {
    let trimmed = location
        .split(['?', '#'])
        .next()
        .unwrap_or(location)
        .trim_end_matches('/');
    trimmed
        .rsplit('/')
        .next()
        .filter(|name| !name.is_empty())
        .unwrap_or("dataset")
        .to_string()
}
