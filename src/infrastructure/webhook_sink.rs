use async_trait::async_trait;
use serde::Serialize;

use crate::application::{AppError, AppResult, DispatchSink};
use crate::domain::Notification;

/// POSTs each notification as JSON to a chat/alerting webhook.
pub struct WebhookDispatchSink {
    client: reqwest::Client,
    webhook: String,
}

impl WebhookDispatchSink {
    pub fn new(webhook: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            webhook,
        }
    }
}

#[derive(Debug, Serialize)]
struct WebhookBody<'a> {
    text: String,
    notification: &'a Notification,
}

#[async_trait]
impl DispatchSink for WebhookDispatchSink {
    async fn dispatch(&self, notification: &Notification) -> AppResult<()> {
        let payload = WebhookBody {
            text: format_alert_text(notification),
            notification,
        };

        self.client
            .post(&self.webhook)
            .json(&payload)
            .send()
            .await
            .map_err(|e| AppError::Dispatch(e.to_string()))?
            .error_for_status()
            .map_err(|e| AppError::Dispatch(e.to_string()))?;

        Ok(())
    }
}

pub fn format_alert_text(notification: &Notification) -> String {
    let mut lines = vec![];

    lines.push(format!("Priority mail alert for {}", notification.scope));
    lines.push(format!(
        "Score {} from {} message(s)",
        notification.final_score,
        notification.events.len()
    ));

    for e in notification.events.iter().take(10) {
        let from = e.sender.as_deref().unwrap_or("(unknown sender)");
        lines.push(format!("- {} | {}", from, e.subject_or_empty()));
    }
    if notification.events.len() > 10 {
        lines.push(format!("... and {} more", notification.events.len() - 10));
    }

    lines.push(format!("Triggered at {}", notification.triggered_at.to_rfc3339()));
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{InboundEvent, ScopeId};

    #[test]
    fn alert_text_lists_senders_and_truncates() {
        let events: Vec<InboundEvent> = (0..12)
            .map(|i| InboundEvent {
                id: format!("e{i}"),
                scope_id: "alice".into(),
                sender: Some(format!("s{i}@example.com")),
                recipients: vec![],
                subject: Some(format!("subject {i}")),
                sent_at: None,
                has_attachments: false,
            })
            .collect();
        let n = Notification {
            scope: ScopeId::new("alice"),
            final_score: 60,
            events,
            triggered_at: chrono::Utc::now(),
        };
        let text = format_alert_text(&n);
        assert!(text.contains("Score 60 from 12 message(s)"));
        assert!(text.contains("- s0@example.com | subject 0"));
        assert!(text.contains("... and 2 more"));
        assert!(!text.contains("subject 11"));
    }
}
