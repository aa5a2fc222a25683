//! Progress reporting and the live progress feed
//!
//! Producers (the ingestion path and the pipeline executor) report through
//! the [`ProgressProvider`] trait without knowing who is listening. The
//! [`ProgressHub`] turns those reports into a per-job or per-dataset
//! broadcast feed that any number of observers may attach to.
//!
//! Publishing never blocks: each subscriber has a bounded buffer and a
//! subscriber that falls behind skips the events it missed. A subscriber
//! attaching mid-stream first receives the latest known event. A terminal
//! event closes the channel for that key, and later events for a closed key
//! are dropped.

use crate::id::{DatasetId, JobId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::{Mutex, MutexGuard};
use tokio::sync::broadcast;

/// Core trait for progress reporting
///
/// This trait abstracts away the progress reporting mechanism so the
/// executor can report without depending on channels or UI concerns.
/// Implementations must not block.
pub trait ProgressProvider: Send + Sync {
    /// Report a progress update
    fn report(&self, update: ProgressUpdate);

    /// Create a child provider for nested operations
    fn create_child(&self, name: &str) -> Box<dyn ProgressProvider>;

    /// Signal that the operation is complete
    fn complete(&self);
}

/// Unified progress update type
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressUpdate {
    /// A stage is about to run (or be skipped)
    StageStarted {
        position: usize,
        total: usize,
        stage: String,
    },

    /// Sub-progress reported from inside a long-running stage
    StageProgress {
        position: usize,
        total: usize,
        stage: String,
        fraction: f64,
    },

    /// A stage finished
    StageFinished {
        position: usize,
        total: usize,
        stage: String,
        rows_after: usize,
        skipped: bool,
    },

    /// A named step of a multi-step operation reached a percentage
    Step {
        percent: u8,
        step: String,
        message: String,
    },

    /// Generic status message
    Status { message: String },
}

impl ProgressUpdate {
    /// Overall percentage implied by this update, when it implies one
    ///
    /// Stage updates scale `completed / total` to 0-100.
    pub fn percent(&self) -> Option<u8> {
        let scaled = |done: f64, total: usize| -> u8 {
            if total == 0 {
                100
            } else {
                ((done / total as f64) * 100.0).clamp(0.0, 100.0) as u8
            }
        };
        match self {
            Self::StageStarted {
                position, total, ..
            } => Some(scaled(*position as f64, *total)),
            Self::StageProgress {
                position,
                total,
                fraction,
                ..
            } => Some(scaled(*position as f64 + fraction.clamp(0.0, 1.0), *total)),
            Self::StageFinished {
                position, total, ..
            } => Some(scaled((*position + 1) as f64, *total)),
            Self::Step { percent, .. } => Some((*percent).min(100)),
            Self::Status { .. } => None,
        }
    }

    /// Human-readable description
    pub fn message(&self) -> String {
        match self {
            Self::StageStarted {
                position,
                total,
                stage,
            } => format!("Running {stage} ({}/{total})", position + 1),
            Self::StageProgress { stage, fraction, .. } => {
                format!("{stage}: {:.0}%", fraction.clamp(0.0, 1.0) * 100.0)
            }
            Self::StageFinished {
                stage,
                rows_after,
                skipped: true,
                ..
            } => format!("Skipped {stage} ({rows_after} rows)"),
            Self::StageFinished {
                stage, rows_after, ..
            } => format!("Finished {stage} ({rows_after} rows)"),
            Self::Step { message, .. } | Self::Status { message } => message.clone(),
        }
    }
}

/// Null implementation for when no progress is needed
pub struct NullProvider;

impl ProgressProvider for NullProvider {
    fn report(&self, _update: ProgressUpdate) {
        // No-op: discard all progress updates
    }

    fn create_child(&self, _name: &str) -> Box<dyn ProgressProvider> {
        Box::new(NullProvider)
    }

    fn complete(&self) {
        // No-op
    }
}

/// Helper functions for creating providers
impl dyn ProgressProvider {
    /// Create a null provider (useful for tests and when progress isn't needed)
    pub fn null() -> Box<dyn ProgressProvider> {
        Box::new(NullProvider)
    }
}

/// Provider that records every update, for tests and diagnostics
#[derive(Default)]
pub struct RecordingProvider {
    updates: std::sync::Arc<Mutex<Vec<ProgressUpdate>>>,
}

impl RecordingProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Updates received so far, in order
    pub fn updates(&self) -> Vec<ProgressUpdate> {
        self.updates
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }
}

impl ProgressProvider for RecordingProvider {
    fn report(&self, update: ProgressUpdate) {
        self.updates
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(update);
    }

    fn create_child(&self, _name: &str) -> Box<dyn ProgressProvider> {
        Box::new(RecordingProvider {
            updates: std::sync::Arc::clone(&self.updates),
        })
    }

    fn complete(&self) {}
}

/// What a progress feed is about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum FeedKey {
    Dataset(DatasetId),
    Job(JobId),
}

impl fmt::Display for FeedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dataset(id) => write!(f, "ingestion:{id}"),
            Self::Job(id) => write!(f, "job:{id}"),
        }
    }
}

/// Status carried by feed events, covering both datasets and jobs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedStatus {
    Pending,
    Processing,
    Ready,
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl FeedStatus {
    /// Final statuses close the feed
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Ready | Self::Completed | Self::Failed | Self::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Ready => "ready",
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for FeedStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One event on a progress feed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub key: FeedKey,
    pub status: FeedStatus,
    pub progress: u8,
    pub message: String,
    /// Short machine-readable step name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<String>,
    /// Position in this key's feed, starting at 0
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
}

impl ProgressEvent {
    pub fn new(key: FeedKey, status: FeedStatus, progress: u8, message: impl Into<String>) -> Self {
        Self {
            key,
            status,
            progress: progress.min(100),
            message: message.into(),
            step: None,
            seq: 0,
            timestamp: Utc::now(),
        }
    }

    pub fn with_step(mut self, step: impl Into<String>) -> Self {
        self.step = Some(step.into());
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

struct Channel {
    sender: broadcast::Sender<ProgressEvent>,
    latest: ProgressEvent,
    next_seq: u64,
}

/// Remembered closed keys, oldest forgotten first
const CLOSED_KEYS_KEPT: usize = 4096;

#[derive(Default)]
struct Feeds {
    open: HashMap<FeedKey, Channel>,
    closed: HashSet<FeedKey>,
    closed_order: VecDeque<FeedKey>,
}

impl Feeds {
    fn close(&mut self, key: FeedKey) {
        self.open.remove(&key);
        if self.closed.insert(key) {
            self.closed_order.push_back(key);
        }
        while self.closed_order.len() > CLOSED_KEYS_KEPT {
            if let Some(oldest) = self.closed_order.pop_front() {
                self.closed.remove(&oldest);
            }
        }
    }
}

/// In-process publish/subscribe registry keyed by job or dataset id
pub struct ProgressHub {
    feeds: Mutex<Feeds>,
    buffer: usize,
}

impl ProgressHub {
    /// Create a hub whose subscribers buffer up to `buffer` events each
    pub fn new(buffer: usize) -> Self {
        Self {
            feeds: Mutex::new(Feeds::default()),
            buffer: buffer.max(1),
        }
    }

    fn feeds(&self) -> MutexGuard<'_, Feeds> {
        self.feeds.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Publish an event, opening the feed if needed
    ///
    /// A terminal event is delivered and then the feed is torn down. Events
    /// for a key whose feed already closed are dropped.
    pub fn publish(&self, mut event: ProgressEvent) {
        let mut feeds = self.feeds();
        let key = event.key;
        if feeds.closed.contains(&key) {
            log::debug!(
                "Dropped {} event for closed progress feed {key}",
                event.status
            );
            return;
        }

        let buffer = self.buffer;
        let channel = feeds.open.entry(key).or_insert_with(|| {
            let (sender, _) = broadcast::channel(buffer);
            Channel {
                sender,
                latest: event.clone(),
                next_seq: 0,
            }
        });

        event.seq = channel.next_seq;
        channel.next_seq += 1;
        channel.latest = event.clone();
        let terminal = event.is_terminal();
        // no receivers is fine
        let _ = channel.sender.send(event);

        if terminal {
            feeds.close(key);
            log::debug!("Closed progress feed {key}");
        }
    }

    /// Attach to a live feed
    ///
    /// Returns `None` when no feed is open for the key (never opened, or
    /// already finished).
    pub fn subscribe(&self, key: FeedKey) -> Option<Subscription> {
        let feeds = self.feeds();
        let channel = feeds.open.get(&key)?;
        Some(Subscription {
            pending: Some(channel.latest.clone()),
            receiver: Some(channel.sender.subscribe()),
        })
    }

    /// Latest event of a live feed
    pub fn latest(&self, key: FeedKey) -> Option<ProgressEvent> {
        self.feeds().open.get(&key).map(|c| c.latest.clone())
    }

    /// Whether a feed is open for the key
    pub fn is_open(&self, key: FeedKey) -> bool {
        self.feeds().open.contains_key(&key)
    }

    /// Number of open feeds
    pub fn open_feeds(&self) -> usize {
        self.feeds().open.len()
    }

    /// Number of observers attached to a feed
    pub fn subscriber_count(&self, key: FeedKey) -> usize {
        self.feeds()
            .open
            .get(&key)
            .map(|c| c.sender.receiver_count())
            .unwrap_or(0)
    }
}

/// An observer's view of one feed
///
/// Dropping the subscription detaches the observer.
pub struct Subscription {
    pending: Option<ProgressEvent>,
    receiver: Option<broadcast::Receiver<ProgressEvent>>,
}

impl Subscription {
    /// A subscription to a feed that already ended with `event`
    pub fn finished(event: ProgressEvent) -> Self {
        Self {
            pending: Some(event),
            receiver: None,
        }
    }

    /// Next event, or `None` once the terminal event has been delivered
    pub async fn next(&mut self) -> Option<ProgressEvent> {
        if let Some(event) = self.pending.take() {
            if event.is_terminal() {
                self.receiver = None;
            }
            return Some(event);
        }

        let receiver = self.receiver.as_mut()?;
        loop {
            match receiver.recv().await {
                Ok(event) => {
                    if event.is_terminal() {
                        self.receiver = None;
                    }
                    return Some(event);
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    log::debug!("Progress subscriber lagged, skipped {skipped} events");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    self.receiver = None;
                    return None;
                }
            }
        }
    }

    /// Drain the feed to its end
    pub async fn collect(mut self) -> Vec<ProgressEvent> {
        let mut events = Vec::new();
        while let Some(event) = self.next().await {
            events.push(event);
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job_event(key: FeedKey, status: FeedStatus, progress: u8) -> ProgressEvent {
        ProgressEvent::new(key, status, progress, format!("{status} {progress}"))
    }

    #[test]
    fn test_stage_percentages() {
        let started = ProgressUpdate::StageStarted {
            position: 1,
            total: 4,
            stage: "pii_scrubbing".to_string(),
        };
        assert_eq!(started.percent(), Some(25));

        let finished = ProgressUpdate::StageFinished {
            position: 3,
            total: 4,
            stage: "quality_scorer".to_string(),
            rows_after: 10,
            skipped: false,
        };
        assert_eq!(finished.percent(), Some(100));

        let partial = ProgressUpdate::StageProgress {
            position: 0,
            total: 2,
            stage: "deduplication".to_string(),
            fraction: 0.5,
        };
        assert_eq!(partial.percent(), Some(25));
    }

    #[test]
    fn test_null_provider() {
        let provider = <dyn ProgressProvider>::null();
        provider.report(ProgressUpdate::Status {
            message: "ignored".to_string(),
        });
        provider.create_child("child").complete();
    }

    #[test]
    fn test_recording_provider_shares_with_children() {
        let provider = RecordingProvider::new();
        let child = provider.create_child("child");
        child.report(ProgressUpdate::Status {
            message: "from child".to_string(),
        });
        assert_eq!(provider.updates().len(), 1);
    }

    #[tokio::test]
    async fn test_subscriber_receives_in_order_then_terminal() {
        let hub = ProgressHub::new(16);
        let key = FeedKey::Job(JobId::new());
        hub.publish(job_event(key, FeedStatus::Queued, 0));

        let sub = hub.subscribe(key).unwrap();
        hub.publish(job_event(key, FeedStatus::Running, 50));
        hub.publish(job_event(key, FeedStatus::Completed, 100));

        let events = sub.collect().await;
        let statuses: Vec<_> = events.iter().map(|e| e.status).collect();
        assert_eq!(
            statuses,
            vec![FeedStatus::Queued, FeedStatus::Running, FeedStatus::Completed]
        );
        let seqs: Vec<_> = events.iter().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![0, 1, 2]);
        assert!(!hub.is_open(key));
    }

    #[tokio::test]
    async fn test_late_subscriber_gets_latest_first() {
        let hub = ProgressHub::new(16);
        let key = FeedKey::Dataset(DatasetId::new());
        hub.publish(job_event(key, FeedStatus::Processing, 10));
        hub.publish(job_event(key, FeedStatus::Processing, 60));

        let mut sub = hub.subscribe(key).unwrap();
        let first = sub.next().await.unwrap();
        assert_eq!(first.progress, 60);
    }

    #[tokio::test]
    async fn test_finished_subscription_yields_once() {
        let key = FeedKey::Job(JobId::new());
        let mut sub = Subscription::finished(job_event(key, FeedStatus::Failed, 40));
        assert_eq!(sub.next().await.unwrap().status, FeedStatus::Failed);
        assert!(sub.next().await.is_none());
    }

    #[tokio::test]
    async fn test_slow_subscriber_never_blocks_publisher() {
        let hub = ProgressHub::new(2);
        let key = FeedKey::Job(JobId::new());
        hub.publish(job_event(key, FeedStatus::Running, 0));
        let sub = hub.subscribe(key).unwrap();

        for p in 1..50 {
            hub.publish(job_event(key, FeedStatus::Running, p));
        }
        hub.publish(job_event(key, FeedStatus::Completed, 100));

        let events = sub.collect().await;
        assert_eq!(events.last().unwrap().status, FeedStatus::Completed);
        assert!(events.len() < 52);
    }

    #[test]
    fn test_events_after_terminal_do_not_reopen_feed() {
        let hub = ProgressHub::new(4);
        let key = FeedKey::Job(JobId::new());
        hub.publish(job_event(key, FeedStatus::Running, 40));
        hub.publish(job_event(key, FeedStatus::Failed, 40));

        hub.publish(job_event(key, FeedStatus::Running, 100));
        hub.publish(job_event(key, FeedStatus::Completed, 100));

        assert!(!hub.is_open(key));
        assert!(hub.subscribe(key).is_none());
        assert!(hub.latest(key).is_none());
        assert_eq!(hub.open_feeds(), 0);
    }

    #[test]
    fn test_closed_keys_are_bounded() {
        let hub = ProgressHub::new(1);
        let first = FeedKey::Job(JobId::new());
        hub.publish(job_event(first, FeedStatus::Completed, 100));
        for _ in 0..CLOSED_KEYS_KEPT {
            hub.publish(job_event(FeedKey::Job(JobId::new()), FeedStatus::Completed, 100));
        }

        let feeds = hub.feeds();
        assert_eq!(feeds.closed.len(), CLOSED_KEYS_KEPT);
        assert!(!feeds.closed.contains(&first));
    }

    #[test]
    fn test_subscribe_without_feed() {
        let hub = ProgressHub::new(4);
        assert!(hub.subscribe(FeedKey::Job(JobId::new())).is_none());
    }

    #[test]
    fn test_detach_does_not_affect_feed() {
        let hub = ProgressHub::new(4);
        let key = FeedKey::Job(JobId::new());
        hub.publish(job_event(key, FeedStatus::Running, 5));
        let sub = hub.subscribe(key).unwrap();
        assert_eq!(hub.subscriber_count(key), 1);
        drop(sub);
        assert_eq!(hub.subscriber_count(key), 0);
        hub.publish(job_event(key, FeedStatus::Running, 10));
        assert_eq!(hub.latest(key).unwrap().progress, 10);
    }
}
