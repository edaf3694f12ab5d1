use std::sync::Arc;
use std::time::Duration;

use crate::application::{AppError, AppResult, Contribution, SharedStore};
use crate::domain::{InboundEvent, KeySpace, ScopeId};

/// Result of recording one event against its scope.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Recorded {
    Counted { total: u64 },
    /// The event id was already recorded inside the processed-id TTL.
    Duplicate,
}

/// Counter and batch drained by a dispatch winner.
#[derive(Clone, Debug, Default)]
pub struct Window {
    pub score: u64,
    pub events: Vec<InboundEvent>,
}

/// Per-scope score totals kept in the shared store. There is no local
/// state: every operation is a single atomic store call.
#[derive(Clone)]
pub struct Accumulator {
    store: Arc<dyn SharedStore>,
    keys: KeySpace,
    processed_ttl: Duration,
}

impl Accumulator {
    pub fn new(store: Arc<dyn SharedStore>, keys: KeySpace, processed_ttl: Duration) -> Self {
        Self {
            store,
            keys,
            processed_ttl,
        }
    }

    pub fn keys(&self) -> &KeySpace {
        &self.keys
    }

    pub async fn add_and_get(&self, scope: &ScopeId, delta: u64) -> AppResult<u64> {
        self.store.incr_by(&self.keys.counter(scope), delta).await
    }

    pub async fn get(&self, scope: &ScopeId) -> AppResult<u64> {
        self.store.get_counter(&self.keys.counter(scope)).await
    }

    pub async fn reset_to_zero(&self, scope: &ScopeId) -> AppResult<()> {
        self.store.set_counter(&self.keys.counter(scope), 0).await?;
        tracing::info!(scope = %scope, "counter reset");
        Ok(())
    }

    /// Whether the event id is still marked as processed.
    pub async fn is_recorded(&self, event: &InboundEvent) -> AppResult<bool> {
        self.store.exists(&self.keys.processed(&event.id)).await
    }

    /// Add an event's score and append it to the scope's pending batch,
    /// at most once per event id.
    pub async fn record(
        &self,
        scope: &ScopeId,
        event: &InboundEvent,
        delta: u64,
    ) -> AppResult<Recorded> {
        let entry = serde_json::to_string(event).map_err(|e| AppError::Storage(e.to_string()))?;
        let marker_key = self.keys.processed(&event.id);
        let counter_key = self.keys.counter(scope);
        let batch_key = self.keys.batch(scope);
        let contribution = Contribution {
            marker_key: &marker_key,
            marker_ttl: self.processed_ttl,
            counter_key: &counter_key,
            delta,
            batch_key: &batch_key,
            entry,
        };

        Ok(match self.store.record_once(&contribution).await? {
            Some(total) => Recorded::Counted { total },
            None => Recorded::Duplicate,
        })
    }

    pub async fn pending(&self, scope: &ScopeId) -> AppResult<u64> {
        self.store.list_len(&self.keys.batch(scope)).await
    }

    /// Reset the counter and take the pending batch in one atomic step.
    pub async fn drain_window(&self, scope: &ScopeId) -> AppResult<Window> {
        let (score, entries) = self
            .store
            .take_window(&self.keys.counter(scope), &self.keys.batch(scope))
            .await?;

        let mut events = Vec::with_capacity(entries.len());
        for raw in entries {
            match serde_json::from_str::<InboundEvent>(&raw) {
                Ok(e) => events.push(e),
                Err(e) => {
                    tracing::warn!(scope = %scope, error = %e, "skipping unreadable batch entry")
                }
            }
        }
        Ok(Window { score, events })
    }
}
