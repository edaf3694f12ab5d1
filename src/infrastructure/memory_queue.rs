use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::application::{AppError, AppResult, Delivery, MessageSource};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeadLetter {
    pub payload: Vec<u8>,
    pub reason: String,
    pub attempt: u32,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub acked: u64,
    pub requeued: u64,
    pub dead_letters: Vec<DeadLetter>,
}

struct Message {
    payload: Vec<u8>,
    attempt: u32,
}

#[derive(Default)]
struct State {
    ready: VecDeque<Message>,
    in_flight: usize,
    closed: bool,
    stats: QueueStats,
}

#[derive(Default)]
struct Shared {
    state: Mutex<State>,
    changed: Notify,
}

impl Shared {
    fn lock(&self) -> AppResult<MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| AppError::Queue("lock poisoned".into()))
    }
}

/// In-process queue with manual ack and redelivery, used for stdin-fed runs
/// and as the broker fake in tests. A nacked-with-requeue message goes to
/// the back of the queue with its attempt count bumped.
#[derive(Clone, Default)]
pub struct InMemoryQueue {
    shared: Arc<Shared>,
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, payload: impl Into<Vec<u8>>) -> AppResult<()> {
        let mut state = self.shared.lock()?;
        if state.closed {
            return Err(AppError::Queue("queue is closed".into()));
        }
        state.ready.push_back(Message {
            payload: payload.into(),
            attempt: 1,
        });
        drop(state);
        self.shared.changed.notify_waiters();
        Ok(())
    }

    /// No more publishes. Consumers see the end once everything is settled.
    pub fn close(&self) {
        if let Ok(mut state) = self.shared.lock() {
            state.closed = true;
        }
        self.shared.changed.notify_waiters();
    }

    pub fn stats(&self) -> QueueStats {
        self.shared
            .lock()
            .map(|s| s.stats.clone())
            .unwrap_or_default()
    }

    pub fn consumer(&self) -> InMemoryConsumer {
        InMemoryConsumer {
            shared: self.shared.clone(),
        }
    }
}

pub struct InMemoryConsumer {
    shared: Arc<Shared>,
}

#[async_trait]
impl MessageSource for InMemoryConsumer {
    async fn next(&mut self) -> AppResult<Option<Box<dyn Delivery>>> {
        loop {
            let changed = self.shared.changed.notified();
            {
                let mut state = self.shared.lock()?;
                if let Some(message) = state.ready.pop_front() {
                    state.in_flight += 1;
                    return Ok(Some(Box::new(InMemoryDelivery {
                        shared: self.shared.clone(),
                        payload: message.payload,
                        attempt: message.attempt,
                        settled: AtomicBool::new(false),
                    })));
                }
                if state.closed && state.in_flight == 0 {
                    return Ok(None);
                }
            }
            changed.await;
        }
    }
}

struct InMemoryDelivery {
    shared: Arc<Shared>,
    payload: Vec<u8>,
    attempt: u32,
    settled: AtomicBool,
}

enum Fate {
    Ack,
    Requeue,
    Drop,
    DeadLetter(String),
}

impl InMemoryDelivery {
    fn settle(&self, fate: Fate) -> AppResult<()> {
        if self.settled.swap(true, Ordering::SeqCst) {
            return Err(AppError::Queue("delivery already settled".into()));
        }
        let mut state = self.shared.lock()?;
        state.in_flight = state.in_flight.saturating_sub(1);
        match fate {
            Fate::Ack => state.stats.acked += 1,
            Fate::Requeue => {
                state.stats.requeued += 1;
                state.ready.push_back(Message {
                    payload: self.payload.clone(),
                    attempt: self.attempt + 1,
                });
            }
            Fate::Drop => {}
            Fate::DeadLetter(reason) => state.stats.dead_letters.push(DeadLetter {
                payload: self.payload.clone(),
                reason,
                attempt: self.attempt,
            }),
        }
        drop(state);
        self.shared.changed.notify_waiters();
        Ok(())
    }
}

impl Drop for InMemoryDelivery {
    // Like a broker dropping a consumer: unsettled messages come back.
    fn drop(&mut self) {
        if !self.settled.load(Ordering::SeqCst) {
            let _ = self.settle(Fate::Requeue);
        }
    }
}

#[async_trait]
impl Delivery for InMemoryDelivery {
    fn payload(&self) -> &[u8] {
        &self.payload
    }

    fn attempt(&self) -> u32 {
        self.attempt
    }

    async fn ack(&self) -> AppResult<()> {
        self.settle(Fate::Ack)
    }

    async fn nack(&self, requeue: bool) -> AppResult<()> {
        self.settle(if requeue { Fate::Requeue } else { Fate::Drop })
    }

    async fn dead_letter(&self, reason: &str) -> AppResult<()> {
        self.settle(Fate::DeadLetter(reason.to_string()))
    }
}
