use std::sync::Arc;

use crate::application::{
    Accumulator, AppResult, Classifier, Clock, DebounceGate, GateOutcome, Recorded,
};
use crate::domain::{InboundEvent, PriorityLabel, ScopeId, ScopeMode, score};

#[derive(Clone, Debug, PartialEq)]
pub struct EventReport {
    pub scope: ScopeId,
    /// `None` when a duplicate skipped classification.
    pub priority: Option<PriorityLabel>,
    /// Score this delivery added; 0 for a duplicate.
    pub score: u64,
    /// Scope total seen right after this event was applied.
    pub total: u64,
    pub duplicate: bool,
    pub gate: GateOutcome,
}

/// classify -> score -> record -> gate, for one event.
pub struct HandleEventUseCase {
    pub classifier: Arc<dyn Classifier>,
    pub accumulator: Accumulator,
    pub gate: Arc<DebounceGate>,
    pub scope_mode: ScopeMode,
    pub clock: Arc<dyn Clock>,
}

impl HandleEventUseCase {
    pub async fn execute(&self, event: &InboundEvent) -> AppResult<EventReport> {
        let scope = self.scope_mode.scope_of(event);

        // Redelivered after a partial failure: the score is already in, only
        // the gate may still need to run. No classifier call for it.
        if self.accumulator.is_recorded(event).await? {
            return self.recheck_gate(event, scope, None).await;
        }

        let priority = self.classifier.classify(event).await?;
        let score = score(priority, event.sent_at.as_deref(), self.clock.now());

        let total = match self.accumulator.record(&scope, event, score).await? {
            Recorded::Counted { total } => total,
            // a concurrent delivery of the same id got in first
            Recorded::Duplicate => return self.recheck_gate(event, scope, Some(priority)).await,
        };

        tracing::debug!(
            event_id = %event.id,
            scope = %scope,
            %priority,
            score,
            total,
            "event accumulated"
        );

        let gate = self.gate.observe(&scope, total).await?;

        Ok(EventReport {
            scope,
            priority: Some(priority),
            score,
            total,
            duplicate: false,
            gate,
        })
    }

    async fn recheck_gate(
        &self,
        event: &InboundEvent,
        scope: ScopeId,
        priority: Option<PriorityLabel>,
    ) -> AppResult<EventReport> {
        let total = self.accumulator.get(&scope).await?;
        tracing::info!(event_id = %event.id, scope = %scope, total, "duplicate delivery, not re-scoring");
        let gate = self.gate.observe(&scope, total).await?;
        Ok(EventReport {
            scope,
            priority,
            score: 0,
            total,
            duplicate: true,
            gate,
        })
    }
}
