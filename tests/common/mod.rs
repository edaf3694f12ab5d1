#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use inboxpulse::application::usecases::{HandleEventUseCase, RelayOutboxUseCase};
use inboxpulse::application::{
    Accumulator, AppError, AppResult, Classifier, Clock, Contribution, DebounceGate,
    DispatchSink, FixedClock, GateSettings, ListEntry, Outbox, SharedStore, TtlMutex,
};
use inboxpulse::domain::{InboundEvent, KeySpace, Notification, PriorityLabel, ScopeMode};
use inboxpulse::infrastructure::classifiers::FixedClassifier;
use inboxpulse::infrastructure::memory_store::InMemorySharedStore;

#[derive(Clone, Default)]
pub struct RecordingSink {
    sent: Arc<Mutex<Vec<Notification>>>,
    failing: Arc<AtomicBool>,
}

impl RecordingSink {
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl DispatchSink for RecordingSink {
    async fn dispatch(&self, notification: &Notification) -> AppResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(AppError::Dispatch("sink down".into()));
        }
        self.sent.lock().unwrap().push(notification.clone());
        Ok(())
    }
}

/// Fails the first `failures` calls, then answers `label`.
pub struct FlakyClassifier {
    label: PriorityLabel,
    failures: AtomicU32,
}

impl FlakyClassifier {
    pub fn new(label: PriorityLabel, failures: u32) -> Self {
        Self {
            label,
            failures: AtomicU32::new(failures),
        }
    }
}

#[async_trait]
impl Classifier for FlakyClassifier {
    async fn classify(&self, _event: &InboundEvent) -> AppResult<PriorityLabel> {
        let left = self.failures.load(Ordering::SeqCst);
        if left > 0 {
            self.failures.store(left - 1, Ordering::SeqCst);
            return Err(AppError::Classifier("model unavailable".into()));
        }
        Ok(self.label)
    }
}

/// Answers `label` for the first `ok_calls` calls, then reports the model
/// as down. Counts every call.
pub struct CountingClassifier {
    label: PriorityLabel,
    ok_calls: u32,
    calls: AtomicU32,
}

impl CountingClassifier {
    pub fn new(label: PriorityLabel, ok_calls: u32) -> Self {
        Self {
            label,
            ok_calls,
            calls: AtomicU32::new(0),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Classifier for CountingClassifier {
    async fn classify(&self, _event: &InboundEvent) -> AppResult<PriorityLabel> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if n > self.ok_calls {
            return Err(AppError::Classifier("model unavailable".into()));
        }
        Ok(self.label)
    }
}

/// In-memory store whose first `failures` window drains fail.
pub struct FailingDrainStore {
    inner: InMemorySharedStore,
    failures: AtomicU32,
}

impl FailingDrainStore {
    pub fn new(inner: InMemorySharedStore, failures: u32) -> Self {
        Self {
            inner,
            failures: AtomicU32::new(failures),
        }
    }
}

#[async_trait]
impl SharedStore for FailingDrainStore {
    async fn incr_by(&self, key: &str, delta: u64) -> AppResult<u64> {
        self.inner.incr_by(key, delta).await
    }
    async fn get_counter(&self, key: &str) -> AppResult<u64> {
        self.inner.get_counter(key).await
    }
    async fn set_counter(&self, key: &str, value: u64) -> AppResult<()> {
        self.inner.set_counter(key, value).await
    }
    async fn set_if_absent(&self, key: &str, ttl: Duration) -> AppResult<bool> {
        self.inner.set_if_absent(key, ttl).await
    }
    async fn exists(&self, key: &str) -> AppResult<bool> {
        self.inner.exists(key).await
    }
    async fn delete(&self, key: &str) -> AppResult<()> {
        self.inner.delete(key).await
    }
    async fn purge_expired(&self) -> AppResult<u64> {
        self.inner.purge_expired().await
    }
    async fn record_once(&self, c: &Contribution<'_>) -> AppResult<Option<u64>> {
        self.inner.record_once(c).await
    }
    async fn push_back(&self, list_key: &str, entry: String) -> AppResult<()> {
        self.inner.push_back(list_key, entry).await
    }
    async fn list_len(&self, list_key: &str) -> AppResult<u64> {
        self.inner.list_len(list_key).await
    }
    async fn list_entries(&self, list_key: &str, limit: usize) -> AppResult<Vec<ListEntry>> {
        self.inner.list_entries(list_key, limit).await
    }
    async fn remove_entry(&self, list_key: &str, id: u64) -> AppResult<bool> {
        self.inner.remove_entry(list_key, id).await
    }
    async fn replace_entry(&self, list_key: &str, id: u64, entry: String) -> AppResult<bool> {
        self.inner.replace_entry(list_key, id, entry).await
    }
    async fn take_window(&self, counter_key: &str, list_key: &str) -> AppResult<(u64, Vec<String>)> {
        let left = self.failures.load(Ordering::SeqCst);
        if left > 0 {
            self.failures.store(left - 1, Ordering::SeqCst);
            return Err(AppError::Storage("connection reset".into()));
        }
        self.inner.take_window(counter_key, list_key).await
    }
}

pub fn now() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2025-07-01T12:00:00Z")
        .unwrap()
        .with_timezone(&Utc)
}

pub fn event(id: &str, scope: &str) -> InboundEvent {
    InboundEvent {
        id: id.to_string(),
        scope_id: scope.to_string(),
        sender: Some("ops@example.com".into()),
        recipients: vec!["me@example.com".into()],
        subject: Some(format!("mail {id}")),
        sent_at: Some(now().to_rfc3339()),
        has_attachments: false,
    }
}

pub fn payload(e: &InboundEvent) -> Vec<u8> {
    serde_json::to_vec(e).unwrap()
}

pub struct Harness {
    pub store: InMemorySharedStore,
    pub shared: Arc<dyn SharedStore>,
    pub sink: RecordingSink,
    pub keys: KeySpace,
    pub accumulator: Accumulator,
    pub outbox: Outbox,
    pub gate: Arc<DebounceGate>,
    pub handler: Arc<HandleEventUseCase>,
}

pub fn harness(threshold: u64) -> Harness {
    harness_with(
        threshold,
        Duration::from_secs(60),
        Arc::new(FixedClassifier::new(PriorityLabel::High)),
    )
}

pub fn harness_with(threshold: u64, window: Duration, classifier: Arc<dyn Classifier>) -> Harness {
    let store = InMemorySharedStore::new();
    let shared: Arc<dyn SharedStore> = Arc::new(store.clone());
    harness_over(threshold, window, classifier, store, shared)
}

/// `shared` is what the pipeline talks to; `store` is the in-memory state
/// underneath it, kept for direct inspection.
pub fn harness_over(
    threshold: u64,
    window: Duration,
    classifier: Arc<dyn Classifier>,
    store: InMemorySharedStore,
    shared: Arc<dyn SharedStore>,
) -> Harness {
    let sink = RecordingSink::default();
    let keys = KeySpace::new("test");
    let clock: Arc<dyn Clock> = Arc::new(FixedClock(now()));

    let accumulator = Accumulator::new(shared.clone(), keys.clone(), Duration::from_secs(3600));
    let outbox = Outbox::new(shared.clone(), keys.outbox());
    let gate = Arc::new(DebounceGate::new(
        accumulator.clone(),
        TtlMutex::new(shared.clone()),
        Arc::new(sink.clone()),
        outbox.clone(),
        clock.clone(),
        GateSettings {
            threshold,
            window,
            dispatch_timeout: Duration::from_secs(5),
        },
    ));
    let handler = Arc::new(HandleEventUseCase {
        classifier,
        accumulator: accumulator.clone(),
        gate: gate.clone(),
        scope_mode: ScopeMode::PerIdentity,
        clock,
    });

    Harness {
        store,
        shared,
        sink,
        keys,
        accumulator,
        outbox,
        gate,
        handler,
    }
}

pub fn relay(h: &Harness, sink: Arc<dyn DispatchSink>, max_attempts: u32) -> RelayOutboxUseCase {
    RelayOutboxUseCase {
        outbox: h.outbox.clone(),
        sink,
        store: h.shared.clone(),
        lease_key: h.keys.relay_lease(),
        max_attempts,
        dispatch_timeout: Duration::from_secs(5),
    }
}
