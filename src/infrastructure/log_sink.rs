use async_trait::async_trait;

use crate::application::{AppResult, DispatchSink};
use crate::domain::Notification;

/// Writes each notification as a log banner.
pub struct LogDispatchSink;

impl LogDispatchSink {
    pub fn new() -> Self {
        Self
    }
}

impl Default for LogDispatchSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DispatchSink for LogDispatchSink {
    async fn dispatch(&self, notification: &Notification) -> AppResult<()> {
        let subjects: Vec<&str> = notification
            .events
            .iter()
            .map(|e| e.subject_or_empty())
            .collect();
        tracing::info!(
            target: "inboxpulse::alert",
            scope = %notification.scope,
            score = notification.final_score,
            events = notification.events.len(),
            triggered_at = %notification.triggered_at.to_rfc3339(),
            ?subjects,
            "ALERT: priority threshold reached"
        );
        Ok(())
    }
}
