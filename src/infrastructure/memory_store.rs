use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::application::{AppError, AppResult, Contribution, ListEntry, SharedStore};

/// Process-local [`SharedStore`]. Correct for a single instance and as a
/// test fake; expiry follows tokio's clock so paused-time tests work.
#[derive(Clone, Default)]
pub struct InMemorySharedStore {
    inner: Arc<Mutex<Inner>>,
    unavailable: Arc<AtomicBool>,
}

/// Expired keys are swept on write at most this often.
const SWEEP_EVERY: Duration = Duration::from_secs(60);

#[derive(Default)]
struct Inner {
    counters: HashMap<String, u64>,
    expiring: HashMap<String, Instant>,
    lists: HashMap<String, VecDeque<ListEntry>>,
    next_entry_id: u64,
    last_sweep: Option<Instant>,
}

impl Inner {
    fn is_live(&self, key: &str, now: Instant) -> bool {
        self.expiring.get(key).is_some_and(|deadline| *deadline > now)
    }

    fn sweep(&mut self, now: Instant) -> u64 {
        let before = self.expiring.len();
        self.expiring.retain(|_, deadline| *deadline > now);
        self.last_sweep = Some(now);
        (before - self.expiring.len()) as u64
    }

    fn maybe_sweep(&mut self, now: Instant) {
        let due = self
            .last_sweep
            .is_none_or(|last| now.duration_since(last) >= SWEEP_EVERY);
        if due {
            self.sweep(now);
        }
    }

    fn append(&mut self, list_key: &str, entry: String) {
        self.next_entry_id += 1;
        let id = self.next_entry_id;
        self.lists
            .entry(list_key.to_string())
            .or_default()
            .push_back(ListEntry { id, entry });
    }

    fn find_entry(&mut self, list_key: &str, id: u64) -> Option<(&mut VecDeque<ListEntry>, usize)> {
        let list = self.lists.get_mut(list_key)?;
        let pos = list.iter().position(|e| e.id == id)?;
        Some((list, pos))
    }
}

impl InMemorySharedStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail as if the store were unreachable.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn lock(&self) -> AppResult<MutexGuard<'_, Inner>> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(AppError::Storage("store unavailable".into()));
        }
        self.inner
            .lock()
            .map_err(|_| AppError::Storage("lock poisoned".into()))
    }
}

#[async_trait]
impl SharedStore for InMemorySharedStore {
    async fn incr_by(&self, key: &str, delta: u64) -> AppResult<u64> {
        let mut inner = self.lock()?;
        let value = inner.counters.entry(key.to_string()).or_insert(0);
        *value = value.saturating_add(delta);
        Ok(*value)
    }

    async fn get_counter(&self, key: &str) -> AppResult<u64> {
        let inner = self.lock()?;
        Ok(inner.counters.get(key).copied().unwrap_or(0))
    }

    async fn set_counter(&self, key: &str, value: u64) -> AppResult<()> {
        let mut inner = self.lock()?;
        inner.counters.insert(key.to_string(), value);
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, ttl: Duration) -> AppResult<bool> {
        let now = Instant::now();
        let mut inner = self.lock()?;
        inner.maybe_sweep(now);
        if inner.is_live(key, now) {
            return Ok(false);
        }
        inner.expiring.insert(key.to_string(), now + ttl);
        Ok(true)
    }

    async fn exists(&self, key: &str) -> AppResult<bool> {
        let inner = self.lock()?;
        Ok(inner.is_live(key, Instant::now()))
    }

    async fn delete(&self, key: &str) -> AppResult<()> {
        let mut inner = self.lock()?;
        inner.expiring.remove(key);
        Ok(())
    }

    async fn purge_expired(&self) -> AppResult<u64> {
        let mut inner = self.lock()?;
        Ok(inner.sweep(Instant::now()))
    }

    async fn record_once(&self, c: &Contribution<'_>) -> AppResult<Option<u64>> {
        let now = Instant::now();
        let mut inner = self.lock()?;
        inner.maybe_sweep(now);
        if inner.is_live(c.marker_key, now) {
            return Ok(None);
        }
        inner
            .expiring
            .insert(c.marker_key.to_string(), now + c.marker_ttl);
        inner.append(c.batch_key, c.entry.clone());
        let value = inner.counters.entry(c.counter_key.to_string()).or_insert(0);
        *value = value.saturating_add(c.delta);
        Ok(Some(*value))
    }

    async fn push_back(&self, list_key: &str, entry: String) -> AppResult<()> {
        let mut inner = self.lock()?;
        inner.append(list_key, entry);
        Ok(())
    }

    async fn list_len(&self, list_key: &str) -> AppResult<u64> {
        let inner = self.lock()?;
        Ok(inner.lists.get(list_key).map_or(0, |l| l.len() as u64))
    }

    async fn list_entries(&self, list_key: &str, limit: usize) -> AppResult<Vec<ListEntry>> {
        let inner = self.lock()?;
        Ok(inner
            .lists
            .get(list_key)
            .map(|l| l.iter().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn remove_entry(&self, list_key: &str, id: u64) -> AppResult<bool> {
        let mut inner = self.lock()?;
        Ok(match inner.find_entry(list_key, id) {
            Some((list, pos)) => list.remove(pos).is_some(),
            None => false,
        })
    }

    async fn replace_entry(&self, list_key: &str, id: u64, entry: String) -> AppResult<bool> {
        let mut inner = self.lock()?;
        Ok(match inner.find_entry(list_key, id) {
            Some((list, pos)) => {
                list[pos].entry = entry;
                true
            }
            None => false,
        })
    }

    async fn take_window(
        &self,
        counter_key: &str,
        list_key: &str,
    ) -> AppResult<(u64, Vec<String>)> {
        let mut inner = self.lock()?;
        let score = inner
            .counters
            .insert(counter_key.to_string(), 0)
            .unwrap_or(0);
        let entries = inner
            .lists
            .remove(list_key)
            .map(|l| l.into_iter().map(|e| e.entry).collect())
            .unwrap_or_default();
        Ok((score, entries))
    }
}
