use std::sync::Arc;
use std::time::Duration;

use crate::application::{
    Accumulator, AppError, AppResult, Clock, DispatchSink, Outbox, SharedStore,
};
use crate::domain::{Notification, ScopeId};

/// Distributed mutex built on conditional-create-with-TTL. A key is held by
/// whoever created it until it expires or the holder releases it.
#[derive(Clone)]
pub struct TtlMutex {
    store: Arc<dyn SharedStore>,
}

impl TtlMutex {
    pub fn new(store: Arc<dyn SharedStore>) -> Self {
        Self { store }
    }

    pub async fn try_acquire(&self, key: &str, ttl: Duration) -> AppResult<bool> {
        self.store.set_if_absent(key, ttl).await
    }

    pub async fn is_held(&self, key: &str) -> AppResult<bool> {
        self.store.exists(key).await
    }

    pub async fn release(&self, key: &str) -> AppResult<()> {
        self.store.delete(key).await
    }
}

#[derive(Clone, Debug)]
pub struct GateSettings {
    pub threshold: u64,
    pub window: Duration,
    pub dispatch_timeout: Duration,
}

#[derive(Clone, Debug, PartialEq)]
pub enum GateOutcome {
    BelowThreshold,
    /// Another worker holds the lock for this window.
    Suppressed,
    Dispatched(Notification),
    /// Won the lock but the sink failed; handed to the outbox.
    Deferred(Notification),
}

/// Lets at most one worker per scope per window turn a threshold crossing
/// into a dispatch.
pub struct DebounceGate {
    accumulator: Accumulator,
    mutex: TtlMutex,
    sink: Arc<dyn DispatchSink>,
    outbox: Outbox,
    clock: Arc<dyn Clock>,
    settings: GateSettings,
}

impl DebounceGate {
    pub fn new(
        accumulator: Accumulator,
        mutex: TtlMutex,
        sink: Arc<dyn DispatchSink>,
        outbox: Outbox,
        clock: Arc<dyn Clock>,
        settings: GateSettings,
    ) -> Self {
        Self {
            accumulator,
            mutex,
            sink,
            outbox,
            clock,
            settings,
        }
    }

    pub fn threshold(&self) -> u64 {
        self.settings.threshold
    }

    pub async fn is_locked(&self, scope: &ScopeId) -> AppResult<bool> {
        self.mutex.is_held(&self.accumulator.keys().lock(scope)).await
    }

    /// Called with the total returned by the accumulator after adding.
    pub async fn observe(&self, scope: &ScopeId, total: u64) -> AppResult<GateOutcome> {
        if total < self.settings.threshold {
            return Ok(GateOutcome::BelowThreshold);
        }

        let lock_key = self.accumulator.keys().lock(scope);
        if !self.mutex.try_acquire(&lock_key, self.settings.window).await? {
            tracing::debug!(scope = %scope, total, "threshold crossed inside debounce window");
            return Ok(GateOutcome::Suppressed);
        }

        // Lock held from here on: nobody else dispatches this window.
        let window = match self.accumulator.drain_window(scope).await {
            Ok(window) => window,
            Err(e) => {
                // Nothing was drained; let the redelivered message win again.
                if let Err(release_err) = self.mutex.release(&lock_key).await {
                    tracing::error!(
                        scope = %scope,
                        error = %release_err,
                        "could not release debounce lock after failed drain"
                    );
                }
                return Err(e);
            }
        };
        let notification = Notification {
            scope: scope.clone(),
            final_score: window.score,
            events: window.events,
            triggered_at: self.clock.now(),
        };

        match self.dispatch_bounded(&notification).await {
            Ok(()) => {
                tracing::info!(
                    scope = %scope,
                    score = notification.final_score,
                    events = notification.events.len(),
                    "notification dispatched"
                );
                Ok(GateOutcome::Dispatched(notification))
            }
            Err(e) => {
                tracing::warn!(scope = %scope, error = %e, "dispatch failed, handing off to outbox");
                if let Err(store_err) = self.outbox.enqueue(&notification).await {
                    tracing::error!(
                        scope = %scope,
                        error = %store_err,
                        notification = ?notification,
                        "outbox handoff failed"
                    );
                    return Err(store_err);
                }
                Ok(GateOutcome::Deferred(notification))
            }
        }
    }

    async fn dispatch_bounded(&self, notification: &Notification) -> AppResult<()> {
        match tokio::time::timeout(
            self.settings.dispatch_timeout,
            self.sink.dispatch(notification),
        )
        .await
        {
            Ok(res) => res,
            Err(_) => Err(AppError::Dispatch(format!(
                "sink did not answer within {:?}",
                self.settings.dispatch_timeout
            ))),
        }
    }
}
