use std::sync::Arc;

use tokio::sync::{Semaphore, watch};
use tokio::task::JoinSet;

use crate::application::usecases::HandleEventUseCase;
use crate::application::{AppError, AppResult, Delivery, MessageSource};
use crate::domain::InboundEvent;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Settlement {
    Acked,
    Requeued,
    DeadLettered,
    /// Settling failed; the broker will redeliver on its own.
    Unsettled,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct IntakeStats {
    pub acked: u64,
    pub requeued: u64,
    pub dead_lettered: u64,
    pub unsettled: u64,
}

impl IntakeStats {
    fn count(&mut self, settlement: Settlement) {
        match settlement {
            Settlement::Acked => self.acked += 1,
            Settlement::Requeued => self.requeued += 1,
            Settlement::DeadLettered => self.dead_lettered += 1,
            Settlement::Unsettled => self.unsettled += 1,
        }
    }
}

/// Pulls deliveries and runs each through the event pipeline with at most
/// `prefetch` handlers in flight.
pub struct IntakeLoop {
    pub handler: Arc<HandleEventUseCase>,
    pub prefetch: usize,
    pub max_deliveries: u32,
}

impl IntakeLoop {
    /// Runs until the source is drained or `shutdown` flips to true. On
    /// shutdown no new deliveries are pulled; in-flight handlers finish.
    pub async fn run(
        &self,
        source: &mut dyn MessageSource,
        mut shutdown: watch::Receiver<bool>,
    ) -> AppResult<IntakeStats> {
        let permits = Arc::new(Semaphore::new(self.prefetch.max(1)));
        let mut handlers: JoinSet<Settlement> = JoinSet::new();
        let mut stats = IntakeStats::default();

        tracing::info!(prefetch = self.prefetch, "intake loop started");

        loop {
            let permit = tokio::select! {
                biased;
                _ = shutdown.wait_for(|stop| *stop) => break,
                permit = permits.clone().acquire_owned() => {
                    permit.map_err(|e| AppError::Queue(e.to_string()))?
                }
            };

            let delivery = tokio::select! {
                biased;
                _ = shutdown.wait_for(|stop| *stop) => break,
                next = source.next() => match next? {
                    Some(d) => d,
                    None => break,
                },
            };

            while let Some(done) = handlers.try_join_next() {
                record(&mut stats, done);
            }

            let handler = self.handler.clone();
            let max_deliveries = self.max_deliveries;
            handlers.spawn(async move {
                let _permit = permit;
                handle_delivery(&handler, delivery.as_ref(), max_deliveries).await
            });
        }

        tracing::info!(in_flight = handlers.len(), "intake loop stopping, draining handlers");
        while let Some(done) = handlers.join_next().await {
            record(&mut stats, done);
        }
        tracing::info!(?stats, "intake loop stopped");
        Ok(stats)
    }
}

fn record(stats: &mut IntakeStats, done: Result<Settlement, tokio::task::JoinError>) {
    match done {
        Ok(settlement) => stats.count(settlement),
        Err(e) => {
            tracing::error!(error = %e, "event handler panicked");
            stats.count(Settlement::Unsettled);
        }
    }
}

/// Decide the fate of one delivery: ack on success, requeue retriable
/// failures until `max_deliveries`, dead-letter everything else.
pub async fn handle_delivery(
    handler: &HandleEventUseCase,
    delivery: &dyn Delivery,
    max_deliveries: u32,
) -> Settlement {
    let attempt = delivery.attempt();

    let event = match InboundEvent::from_payload(delivery.payload()) {
        Ok(e) => e,
        Err(e) => {
            tracing::warn!(attempt, error = %e, "malformed payload, dead-lettering");
            return dead_letter(delivery, &AppError::Payload(e.to_string())).await;
        }
    };

    match handler.execute(&event).await {
        Ok(_) => match delivery.ack().await {
            Ok(()) => Settlement::Acked,
            Err(e) => {
                tracing::error!(event_id = %event.id, error = %e, "ack failed");
                Settlement::Unsettled
            }
        },
        Err(e) if e.is_retriable() && attempt < max_deliveries => {
            tracing::warn!(event_id = %event.id, attempt, error = %e, "retriable failure, requeueing");
            match delivery.nack(true).await {
                Ok(()) => Settlement::Requeued,
                Err(nack_err) => {
                    tracing::error!(event_id = %event.id, error = %nack_err, "nack failed");
                    Settlement::Unsettled
                }
            }
        }
        Err(e) => {
            tracing::warn!(event_id = %event.id, attempt, error = %e, "giving up on event");
            dead_letter(delivery, &e).await
        }
    }
}

async fn dead_letter(delivery: &dyn Delivery, reason: &AppError) -> Settlement {
    match delivery.dead_letter(&reason.to_string()).await {
        Ok(()) => Settlement::DeadLettered,
        Err(e) => {
            tracing::error!(error = %e, "dead-lettering failed");
            Settlement::Unsettled
        }
    }
}
