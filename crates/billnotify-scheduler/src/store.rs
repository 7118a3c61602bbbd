//! Durable list store behind the notification queue.
//!
//! Lists are pushed at the head and popped from the tail, so an uncontended
//! list behaves FIFO and re-pushed tasks land behind everything already waiting.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use billnotify_core::error::{BillNotifyError, Result};
use tokio::sync::Notify;

/// Named-list operations the queue needs from its backing store.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Connectivity probe.
    async fn ping(&self) -> Result<()>;

    async fn push(&self, queue: &str, payload: &str) -> Result<()>;

    /// Pop the oldest payload, waiting up to `timeout`. `None` on timeout.
    async fn blocking_pop(&self, queue: &str, timeout: Duration) -> Result<Option<String>>;

    async fn len(&self, queue: &str) -> Result<usize>;
}

/// Process-local store for tests and single-process runs without Redis.
///
/// Payloads do not survive a restart.
#[derive(Debug, Default)]
pub struct MemoryQueueStore {
    lists: Mutex<HashMap<String, VecDeque<String>>>,
    notify: Notify,
    unreachable: AtomicBool,
}

impl MemoryQueueStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an outage: every operation fails until restored.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    fn check(&self) -> Result<()> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(BillNotifyError::Queue("memory store marked unreachable".into()));
        }
        Ok(())
    }

    fn try_pop(&self, queue: &str) -> Option<String> {
        let mut lists = self.lists.lock().unwrap_or_else(|p| p.into_inner());
        lists.get_mut(queue)?.pop_back()
    }

    /// Snapshot of a list, oldest first.
    pub fn contents(&self, queue: &str) -> Vec<String> {
        let lists = self.lists.lock().unwrap_or_else(|p| p.into_inner());
        lists
            .get(queue)
            .map(|list| list.iter().rev().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl QueueStore for MemoryQueueStore {
    async fn ping(&self) -> Result<()> {
        self.check()
    }

    async fn push(&self, queue: &str, payload: &str) -> Result<()> {
        self.check()?;
        {
            let mut lists = self.lists.lock().unwrap_or_else(|p| p.into_inner());
            lists.entry(queue.to_string()).or_default().push_front(payload.to_string());
        }
        self.notify.notify_waiters();
        Ok(())
    }

    async fn blocking_pop(&self, queue: &str, timeout: Duration) -> Result<Option<String>> {
        self.check()?;
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(payload) = self.try_pop(queue) {
                return Ok(Some(payload));
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn len(&self, queue: &str) -> Result<usize> {
        self.check()?;
        let lists = self.lists.lock().unwrap_or_else(|p| p.into_inner());
        Ok(lists.get(queue).map_or(0, VecDeque::len))
    }
}
