use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{InboundEvent, ScopeId};

/// A batched alert for one scope, handed to the dispatch sinks.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub scope: ScopeId,
    pub final_score: u64,
    pub events: Vec<InboundEvent>, // arrival order
    pub triggered_at: DateTime<Utc>,
}

impl Notification {
    pub fn summary(&self) -> String {
        format!(
            "scope={} score={} events={}",
            self.scope,
            self.final_score,
            self.events.len()
        )
    }
}
