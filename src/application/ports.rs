use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{InboundEvent, Notification, PriorityLabel};

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("classifier error: {0}")]
    Classifier(String),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("dispatch error: {0}")]
    Dispatch(String),
    #[error("queue error: {0}")]
    Queue(String),
    #[error("malformed payload: {0}")]
    Payload(String),
    #[error("invalid config: {0}")]
    Config(String),
}

impl AppError {
    /// Whether redelivering the message could succeed.
    pub fn is_retriable(&self) -> bool {
        match self {
            AppError::Classifier(_)
            | AppError::Storage(_)
            | AppError::Dispatch(_)
            | AppError::Queue(_) => true,
            AppError::Payload(_) | AppError::Config(_) => false,
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;

/// One event's contribution to a scope window, applied atomically by
/// [`SharedStore::record_once`].
#[derive(Clone, Debug)]
pub struct Contribution<'a> {
    pub marker_key: &'a str,
    pub marker_ttl: Duration,
    pub counter_key: &'a str,
    pub delta: u64,
    pub batch_key: &'a str,
    pub entry: String,
}

/// A list element together with its store-assigned id.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ListEntry {
    pub id: u64,
    pub entry: String,
}

/// The shared key-value store every worker talks to. All cross-worker
/// state goes through these primitives; each call is one atomic round-trip.
#[async_trait]
pub trait SharedStore: Send + Sync {
    /// Add `delta` to a counter (created at 0) and return the new value.
    async fn incr_by(&self, key: &str, delta: u64) -> AppResult<u64>;
    async fn get_counter(&self, key: &str) -> AppResult<u64>;
    async fn set_counter(&self, key: &str, value: u64) -> AppResult<()>;

    /// Create `key` only if absent (or expired), expiring after `ttl`.
    /// Returns true for the single caller that created it.
    async fn set_if_absent(&self, key: &str, ttl: Duration) -> AppResult<bool>;
    async fn exists(&self, key: &str) -> AppResult<bool>;
    /// Drop an expiring key whether or not it is still live.
    async fn delete(&self, key: &str) -> AppResult<()>;
    /// Forget every expired key, returning how many went.
    async fn purge_expired(&self) -> AppResult<u64>;

    /// If the marker is absent: set it, append the entry to the batch and
    /// add the delta to the counter, returning the new total. Returns
    /// `None` without touching anything when the marker already exists.
    async fn record_once(&self, contribution: &Contribution<'_>) -> AppResult<Option<u64>>;

    async fn push_back(&self, list_key: &str, entry: String) -> AppResult<()>;
    async fn list_len(&self, list_key: &str) -> AppResult<u64>;
    /// Oldest-first view of a list; entries stay in place.
    async fn list_entries(&self, list_key: &str, limit: usize) -> AppResult<Vec<ListEntry>>;
    /// Returns false when the entry is already gone.
    async fn remove_entry(&self, list_key: &str, id: u64) -> AppResult<bool>;
    async fn replace_entry(&self, list_key: &str, id: u64, entry: String) -> AppResult<bool>;
    /// Read and reset a counter together with its batch list.
    async fn take_window(&self, counter_key: &str, list_key: &str)
    -> AppResult<(u64, Vec<String>)>;

    /// Release connections. Further calls may fail.
    async fn close(&self) {}
}

/// Maps an event to a priority label.
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, event: &InboundEvent) -> AppResult<PriorityLabel>;
}

/// Deliver a batched notification to operators.
#[async_trait]
pub trait DispatchSink: Send + Sync {
    async fn dispatch(&self, notification: &Notification) -> AppResult<()>;
}

/// A single message handed out by a [`MessageSource`], settled exactly once.
#[async_trait]
pub trait Delivery: Send + Sync {
    fn payload(&self) -> &[u8];
    /// 1 for the first delivery, incremented on every redelivery.
    fn attempt(&self) -> u32;
    async fn ack(&self) -> AppResult<()>;
    async fn nack(&self, requeue: bool) -> AppResult<()>;
    /// Route the message to the dead-letter destination and drop it.
    async fn dead_letter(&self, reason: &str) -> AppResult<()>;
}

/// A durable queue with manual acknowledgement.
#[async_trait]
pub trait MessageSource: Send {
    /// Next delivery, or `None` once the source is closed and drained.
    async fn next(&mut self) -> AppResult<Option<Box<dyn Delivery>>>;
}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Clone, Copy, Debug)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}
