//! Notification queue: task (de)serialization on top of a [`QueueStore`].
//!
//! A queue whose store failed the startup probe stays disabled for the
//! lifetime of the process; callers fall back to direct sends.

use std::sync::Arc;
use std::time::Duration;

use billnotify_core::config::QueueConfig;
use billnotify_core::error::{BillNotifyError, Result};
use serde::Serialize;

use crate::store::QueueStore;
use crate::tasks::QueueTask;

/// Snapshot reported by `billnotify stats` and the housekeeping loop.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct QueueStats {
    pub queue: String,
    pub enabled: bool,
    pub pending: usize,
    pub rate_per_sec: u32,
    pub burst: u32,
    pub dead_letter_pending: Option<usize>,
}

pub struct NotificationQueue {
    store: Option<Arc<dyn QueueStore>>,
    name: String,
    dead_letter_queue: Option<String>,
    rate_per_sec: u32,
    burst: u32,
}

impl NotificationQueue {
    /// Probe `store`; an unreachable store yields a disabled queue.
    pub async fn connect(store: Arc<dyn QueueStore>, config: &QueueConfig) -> Self {
        match store.ping().await {
            Ok(()) => {
                tracing::info!("📦 Queue '{}' connected", config.name);
                Self::build(Some(store), config)
            }
            Err(e) => {
                tracing::warn!("⚠️ Queue unavailable ({e}); notifications will be sent directly");
                Self::build(None, config)
            }
        }
    }

    /// A queue that rejects every operation.
    pub fn disabled(config: &QueueConfig) -> Self {
        Self::build(None, config)
    }

    fn build(store: Option<Arc<dyn QueueStore>>, config: &QueueConfig) -> Self {
        Self {
            store,
            name: config.name.clone(),
            dead_letter_queue: config.dead_letter_queue.clone(),
            rate_per_sec: config.rate_per_sec,
            burst: config.burst,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.store.is_some()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn store(&self) -> Result<&Arc<dyn QueueStore>> {
        self.store
            .as_ref()
            .ok_or_else(|| BillNotifyError::QueueUnavailable(format!("queue '{}' is disabled", self.name)))
    }

    /// Serialize and push `task` onto the tail of the queue.
    pub async fn enqueue(&self, task: &QueueTask) -> Result<()> {
        let payload = task.to_payload()?;
        self.store()?.push(&self.name, &payload).await?;
        tracing::debug!("📥 Enqueued {} ({})", task.id, task.kind);
        Ok(())
    }

    /// Put a task back behind everything already waiting.
    pub async fn requeue(&self, task: &QueueTask) -> Result<()> {
        let payload = task.to_payload()?;
        self.store()?.push(&self.name, &payload).await
    }

    /// Next task, or `None` when nothing arrived within `timeout`.
    pub async fn pop(&self, timeout: Duration) -> Result<Option<QueueTask>> {
        match self.store()?.blocking_pop(&self.name, timeout).await? {
            Some(payload) => Ok(Some(QueueTask::from_payload(&payload)?)),
            None => Ok(None),
        }
    }

    pub async fn depth(&self) -> Result<usize> {
        self.store()?.len(&self.name).await
    }

    pub async fn stats(&self) -> Result<QueueStats> {
        let store = self.store()?;
        let pending = store.len(&self.name).await?;
        let dead_letter_pending = match &self.dead_letter_queue {
            Some(dlq) => Some(store.len(dlq).await?),
            None => None,
        };
        Ok(QueueStats {
            queue: self.name.clone(),
            enabled: true,
            pending,
            rate_per_sec: self.rate_per_sec,
            burst: self.burst,
            dead_letter_pending,
        })
    }

    /// Retire a task that exhausted its attempts.
    ///
    /// Always logged at error level; also parked on the dead-letter list
    /// when one is configured.
    pub async fn dead_letter(&self, task: &QueueTask, reason: &str) -> Result<()> {
        tracing::error!(
            "❌ Task {} ({} for record {}) discarded after {} attempts: {}",
            task.id,
            task.kind,
            task.record.id,
            task.attempts,
            reason
        );
        if let (Some(dlq), Some(store)) = (&self.dead_letter_queue, &self.store) {
            store.push(dlq, &task.to_payload()?).await?;
        }
        Ok(())
    }
}
