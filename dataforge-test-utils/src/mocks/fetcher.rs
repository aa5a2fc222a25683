//! Mock source fetcher

use async_trait::async_trait;
use dataforge_core::error::IngestionError;
use dataforge_core::source::filename_from_location;
use dataforge_core::{ConnectRequest, DatasetFormat, FetchedPayload, Result, SourceFetcher, SourceKind};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Configuration for mock behavior
#[derive(Debug, Clone)]
enum Behavior {
    Payload {
        bytes: Vec<u8>,
        format_hint: Option<DatasetFormat>,
    },
    Fail(String),
}

/// Fetcher returning canned payloads
///
/// # Examples
///
/// ```rust,no_run
/// use dataforge_core::SourceKind;
/// use dataforge_test_utils::MockFetcher;
///
/// let fetcher = MockFetcher::new(&[SourceKind::S3])
///     .with_payload(b"a,b\n1,2\n".to_vec());
/// assert!(fetcher.requests().is_empty());
/// ```
pub struct MockFetcher {
    kinds: Vec<SourceKind>,
    behavior: Behavior,
    delay: Duration,
    requests: Arc<Mutex<Vec<ConnectRequest>>>,
}

impl MockFetcher {
    /// Serve `kinds` with an empty CSV until configured otherwise
    pub fn new(kinds: &[SourceKind]) -> Self {
        Self {
            kinds: kinds.to_vec(),
            behavior: Behavior::Payload {
                bytes: b"value\n".to_vec(),
                format_hint: None,
            },
            delay: Duration::ZERO,
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Return these bytes for every request
    pub fn with_payload(mut self, bytes: Vec<u8>) -> Self {
        self.behavior = Behavior::Payload {
            bytes,
            format_hint: None,
        };
        self
    }

    /// Return these bytes with a declared format
    pub fn with_hinted_payload(mut self, bytes: Vec<u8>, format: DatasetFormat) -> Self {
        self.behavior = Behavior::Payload {
            bytes,
            format_hint: Some(format),
        };
        self
    }

    /// Fail every request with a fetch error
    pub fn failing(mut self, message: &str) -> Self {
        self.behavior = Behavior::Fail(message.to_string());
        self
    }

    /// Sleep before answering
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Requests seen so far
    pub fn requests(&self) -> Vec<ConnectRequest> {
        self.requests
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }
}

#[async_trait]
impl SourceFetcher for MockFetcher {
    fn kinds(&self) -> Vec<SourceKind> {
        self.kinds.clone()
    }

    async fn fetch(&self, request: &ConnectRequest) -> Result<FetchedPayload> {
        self.requests
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(request.clone());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        match &self.behavior {
            Behavior::Payload { bytes, format_hint } => Ok(FetchedPayload {
                filename: filename_from_location(&request.location),
                bytes: bytes.clone(),
                format_hint: *format_hint,
            }),
            Behavior::Fail(message) => {
                Err(IngestionError::fetch(request.kind.as_str(), message.clone()).into())
            }
        }
    }
}
