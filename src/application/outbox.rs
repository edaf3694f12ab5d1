use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::application::{AppError, AppResult, SharedStore};
use crate::domain::Notification;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OutboxEntry {
    pub notification: Notification,
    pub attempts: u32, // failed deliveries so far
}

#[derive(Clone, Debug, PartialEq)]
pub struct PendingDispatch {
    pub id: u64,
    pub entry: OutboxEntry,
}

/// Durable handoff for notifications whose inline dispatch failed. Lives in
/// the shared store so any instance's relay can pick the entries up.
#[derive(Clone)]
pub struct Outbox {
    store: Arc<dyn SharedStore>,
    key: String,
}

impl Outbox {
    pub fn new(store: Arc<dyn SharedStore>, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
        }
    }

    pub async fn enqueue(&self, notification: &Notification) -> AppResult<()> {
        let entry = OutboxEntry {
            notification: notification.clone(),
            attempts: 1,
        };
        let raw = serde_json::to_string(&entry).map_err(|e| AppError::Storage(e.to_string()))?;
        self.store.push_back(&self.key, raw).await
    }

    /// Oldest entries first. They stay in the store until acked, so a relay
    /// that dies mid-pass loses nothing.
    pub async fn peek(&self, limit: usize) -> AppResult<Vec<PendingDispatch>> {
        let mut pending = Vec::new();
        for raw in self.store.list_entries(&self.key, limit).await? {
            match serde_json::from_str(&raw.entry) {
                Ok(entry) => pending.push(PendingDispatch { id: raw.id, entry }),
                Err(e) => {
                    tracing::error!(error = %e, entry = %raw.entry, "dropping unreadable outbox entry");
                    self.store.remove_entry(&self.key, raw.id).await?;
                }
            }
        }
        Ok(pending)
    }

    /// Remove a delivered (or abandoned) entry.
    pub async fn ack(&self, id: u64) -> AppResult<bool> {
        self.store.remove_entry(&self.key, id).await
    }

    /// Store a bumped attempt count in place, keeping the entry's position.
    pub async fn reschedule(&self, id: u64, entry: &OutboxEntry) -> AppResult<bool> {
        let raw = serde_json::to_string(entry).map_err(|e| AppError::Storage(e.to_string()))?;
        self.store.replace_entry(&self.key, id, raw).await
    }

    pub async fn len(&self) -> AppResult<u64> {
        self.store.list_len(&self.key).await
    }
}
