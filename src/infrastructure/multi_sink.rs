use async_trait::async_trait;

use crate::application::{AppError, AppResult, DispatchSink};
use crate::domain::Notification;

/// Sends every notification to each named channel in turn. The call fails
/// if any channel failed; the error names every channel that did.
#[derive(Default)]
pub struct MultiDispatchSink {
    channels: Vec<(String, Box<dyn DispatchSink>)>,
}

impl MultiDispatchSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, name: impl Into<String>, sink: Box<dyn DispatchSink>) {
        self.channels.push((name.into(), sink));
    }

    pub fn channel_names(&self) -> Vec<&str> {
        self.channels.iter().map(|(n, _)| n.as_str()).collect()
    }
}

#[async_trait]
impl DispatchSink for MultiDispatchSink {
    async fn dispatch(&self, notification: &Notification) -> AppResult<()> {
        let mut failures = Vec::new();

        for (name, sink) in &self.channels {
            if let Err(e) = sink.dispatch(notification).await {
                tracing::warn!(scope = %notification.scope, channel = %name, error = %e, "dispatch channel failed");
                failures.push(format!("{name}: {e}"));
            }
        }

        if failures.is_empty() {
            return Ok(());
        }
        Err(AppError::Dispatch(format!(
            "{} of {} channels failed ({})",
            failures.len(),
            self.channels.len(),
            failures.join("; ")
        )))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use chrono::Utc;

    use super::*;
    use crate::domain::ScopeId;

    struct Channel {
        calls: Arc<AtomicUsize>,
        fail: bool,
    }

    #[async_trait]
    impl DispatchSink for Channel {
        async fn dispatch(&self, _n: &Notification) -> AppResult<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(AppError::Dispatch("connection refused".into()))
            } else {
                Ok(())
            }
        }
    }

    fn notification() -> Notification {
        Notification {
            scope: ScopeId::new("alice"),
            final_score: 12,
            events: vec![],
            triggered_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn failing_channel_is_named_and_others_still_run() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut sink = MultiDispatchSink::new();
        sink.add("webhook", Box::new(Channel { calls: calls.clone(), fail: true }));
        sink.add("log", Box::new(Channel { calls: calls.clone(), fail: false }));

        let err = sink.dispatch(&notification()).await.unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        let msg = err.to_string();
        assert!(msg.contains("1 of 2 channels failed"), "{msg}");
        assert!(msg.contains("webhook: dispatch error: connection refused"), "{msg}");
        assert!(!msg.contains("log:"), "{msg}");
        assert_eq!(sink.channel_names(), vec!["webhook", "log"]);
    }

    #[tokio::test]
    async fn all_channels_ok() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut sink = MultiDispatchSink::new();
        sink.add("log", Box::new(Channel { calls: calls.clone(), fail: false }));
        assert!(sink.dispatch(&notification()).await.is_ok());
    }
}
