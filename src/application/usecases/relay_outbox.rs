use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::application::{
    AppError, AppResult, DispatchSink, Outbox, PendingDispatch, SharedStore, TtlMutex,
};

/// Entries looked at per relay pass.
const RELAY_BATCH: usize = 32;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RelayReport {
    pub delivered: u32,
    pub retried: u32,
    pub abandoned: u32,
}

/// Retries notifications parked in the outbox, independently of the
/// debounce lock that produced them. An entry leaves the store only after
/// its dispatch succeeded or it ran out of attempts. Each tick also purges
/// expired keys from the store.
pub struct RelayOutboxUseCase {
    pub outbox: Outbox,
    pub sink: Arc<dyn DispatchSink>,
    pub store: Arc<dyn SharedStore>,
    pub lease_key: String,
    pub max_attempts: u32,
    pub dispatch_timeout: Duration,
}

impl RelayOutboxUseCase {
    fn lease_ttl(&self) -> Duration {
        self.dispatch_timeout * (RELAY_BATCH as u32 + 1)
    }

    pub async fn execute(&self) -> AppResult<RelayReport> {
        let lease = TtlMutex::new(self.store.clone());
        if !lease.try_acquire(&self.lease_key, self.lease_ttl()).await? {
            tracing::debug!("another instance is relaying the outbox");
            return Ok(RelayReport::default());
        }

        let result = self.relay_pending().await;

        if let Err(e) = lease.release(&self.lease_key).await {
            tracing::warn!(error = %e, "could not release outbox relay lease");
        }
        result
    }

    async fn relay_pending(&self) -> AppResult<RelayReport> {
        let mut report = RelayReport::default();

        for PendingDispatch { id, mut entry } in self.outbox.peek(RELAY_BATCH).await? {
            let sent = match tokio::time::timeout(
                self.dispatch_timeout,
                self.sink.dispatch(&entry.notification),
            )
            .await
            {
                Ok(res) => res,
                Err(_) => Err(AppError::Dispatch("sink timed out".into())),
            };

            match sent {
                Ok(()) => {
                    tracing::info!(
                        notification = %entry.notification.summary(),
                        attempts = entry.attempts + 1,
                        "outboxed notification delivered"
                    );
                    report.delivered += 1;
                    if let Err(e) = self.outbox.ack(id).await {
                        // stays parked and will be sent again next pass
                        tracing::warn!(entry_id = id, error = %e, "could not ack delivered outbox entry");
                    }
                }
                Err(e) => {
                    entry.attempts += 1;
                    if entry.attempts >= self.max_attempts {
                        tracing::error!(
                            notification = ?entry.notification,
                            attempts = entry.attempts,
                            error = %e,
                            "abandoning notification after repeated dispatch failures"
                        );
                        report.abandoned += 1;
                        if let Err(store_err) = self.outbox.ack(id).await {
                            tracing::warn!(entry_id = id, error = %store_err, "could not drop abandoned outbox entry");
                        }
                        continue;
                    }

                    tracing::warn!(
                        notification = %entry.notification.summary(),
                        attempts = entry.attempts,
                        error = %e,
                        "dispatch retry failed"
                    );
                    report.retried += 1;
                    if let Err(store_err) = self.outbox.reschedule(id, &entry).await {
                        // attempt count is not bumped but the entry is still there
                        tracing::warn!(entry_id = id, error = %store_err, "could not update outbox entry");
                    }
                }
            }
        }

        Ok(report)
    }

    pub async fn run(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                _ = shutdown.wait_for(|stop| *stop) => break,
                _ = ticker.tick() => {}
            }
            match self.execute().await {
                Ok(r) if r != RelayReport::default() => tracing::info!(?r, "outbox relay pass"),
                Ok(_) => {}
                Err(e) => tracing::error!("outbox relay failed: {e}"),
            }
            match self.store.purge_expired().await {
                Ok(0) => {}
                Ok(n) => tracing::debug!(purged = n, "expired keys purged"),
                Err(e) => tracing::warn!("expired key purge failed: {e}"),
            }
        }
        tracing::info!("outbox relay stopped");
    }
}
