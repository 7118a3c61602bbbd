//! Worker pool — drains the notification queue under a shared rate limit.
//!
//! Each worker loops: take a token, blocking-pop a task, put it back if it is
//! not yet eligible, otherwise dispatch it. Failed dispatches are re-queued
//! with quadratic backoff until the retry budget runs out.

use std::sync::Arc;
use std::time::Duration;

use billnotify_core::clock::Clock;
use billnotify_core::config::QueueConfig;
use billnotify_core::error::{BillNotifyError, Result};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::calendar::BusinessCalendar;
use crate::dispatch::Dispatcher;
use crate::queue::NotificationQueue;
use crate::rate_limit::RateLimiter;
use crate::tasks::{QueueTask, RetryPolicy};

/// Longest a worker idles after putting back a not-yet-eligible task.
const MAX_DEFER_SLEEP: Duration = Duration::from_secs(1);
/// Pause after a store error before polling again.
const ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// What one worker cycle did.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkOutcome {
    /// Pop timed out with nothing to do.
    Idle,
    /// Task was not yet eligible and went back on the queue.
    Deferred { task_id: String, wait: Duration },
    Delivered { task_id: String },
    Retried { task_id: String, attempts: u32, delay: Duration },
    DeadLettered { task_id: String, attempts: u32 },
    /// Payload could not be decoded and was dropped.
    Discarded,
}

pub struct WorkerPool {
    queue: Arc<NotificationQueue>,
    limiter: Arc<dyn RateLimiter>,
    dispatcher: Dispatcher,
    calendar: Arc<BusinessCalendar>,
    clock: Arc<dyn Clock>,
    retry: RetryPolicy,
    workers: usize,
    pop_timeout: Duration,
    housekeeping_interval: Duration,
}

impl WorkerPool {
    pub fn new(
        queue: Arc<NotificationQueue>,
        limiter: Arc<dyn RateLimiter>,
        dispatcher: Dispatcher,
        calendar: Arc<BusinessCalendar>,
        clock: Arc<dyn Clock>,
        config: &QueueConfig,
    ) -> Self {
        Self {
            queue,
            limiter,
            dispatcher,
            calendar,
            clock,
            retry: RetryPolicy::new(
                i64::try_from(config.base_retry_secs)
                    .ok()
                    .and_then(chrono::Duration::try_seconds)
                    .unwrap_or(chrono::Duration::MAX),
                config.max_attempts,
            ),
            workers: config.workers,
            pop_timeout: Duration::from_secs(config.pop_timeout_secs),
            housekeeping_interval: Duration::from_secs(config.housekeeping_interval_secs.max(1)),
        }
    }

    /// Run one worker cycle.
    pub async fn process_next(&self, worker_id: usize) -> Result<WorkOutcome> {
        self.limiter.acquire().await;

        let task = match self.queue.pop(self.pop_timeout).await {
            Ok(Some(task)) => task,
            Ok(None) => return Ok(WorkOutcome::Idle),
            Err(BillNotifyError::Serialization(e)) => {
                tracing::error!("❌ Worker {worker_id}: undecodable task dropped: {e}");
                return Ok(WorkOutcome::Discarded);
            }
            Err(e) => return Err(e),
        };

        let now = self.clock.now();
        if !task.is_eligible(now) {
            if let Err(e) = self.queue.requeue(&task).await {
                return Err(lost(worker_id, &task, e));
            }
            let wait = (task.next_eligible_at - now).to_std().unwrap_or_default();
            return Ok(WorkOutcome::Deferred { task_id: task.id, wait });
        }

        tracing::info!(
            "⚙️ Worker {worker_id} processing {} {} (attempt {}/{})",
            task.kind,
            task.id,
            task.attempts + 1,
            self.retry.max_attempts
        );

        let today = self.calendar.local_date(now);
        match self.dispatcher.dispatch(&task, today).await {
            Ok(_) => {
                tracing::info!("✅ Worker {worker_id}: {} delivered", task.id);
                Ok(WorkOutcome::Delivered { task_id: task.id })
            }
            Err(e) => self.handle_failure(worker_id, task, now, e).await,
        }
    }

    async fn handle_failure(
        &self,
        worker_id: usize,
        task: QueueTask,
        now: chrono::DateTime<chrono::Utc>,
        error: BillNotifyError,
    ) -> Result<WorkOutcome> {
        let attempts = task.attempts + 1;

        if self.retry.should_retry(attempts) {
            let delay = self.retry.delay_for(attempts);
            let retry = task.retried(now, delay);
            if let Err(e) = self.queue.requeue(&retry).await {
                return Err(lost(worker_id, &retry, e));
            }
            let delay = delay.to_std().unwrap_or_default();
            tracing::warn!(
                "🔄 Worker {worker_id}: {} failed ({error}); retry {attempts} in {}s",
                task.id,
                delay.as_secs()
            );
            return Ok(WorkOutcome::Retried { task_id: task.id, attempts, delay });
        }

        let exhausted = QueueTask { attempts, ..task };
        let reason = BillNotifyError::RetriesExhausted { task_id: exhausted.id.clone(), attempts };
        self.queue.dead_letter(&exhausted, &format!("{reason}: {error}")).await?;
        Ok(WorkOutcome::DeadLettered { task_id: exhausted.id, attempts })
    }

    async fn run_worker(self: Arc<Self>, worker_id: usize, stop: watch::Receiver<bool>) {
        tracing::info!("👷 Worker {worker_id} started");
        while !*stop.borrow() {
            match self.process_next(worker_id).await {
                Ok(WorkOutcome::Deferred { wait, .. }) => {
                    tokio::time::sleep(wait.min(MAX_DEFER_SLEEP)).await;
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!("⚠️ Worker {worker_id}: {e}");
                    tokio::time::sleep(ERROR_BACKOFF).await;
                }
            }
        }
        tracing::info!("👷 Worker {worker_id} stopped");
    }

    async fn run_housekeeping(self: Arc<Self>, mut stop: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.housekeeping_interval);
        interval.tick().await;
        // Like the workers, keep going once the handle is dropped.
        let mut detached = false;
        loop {
            tokio::select! {
                _ = interval.tick() => match self.queue.depth().await {
                    Ok(0) => {}
                    Ok(pending) => tracing::info!("📊 Queue '{}': {pending} pending", self.queue.name()),
                    Err(e) => tracing::warn!("⚠️ Queue depth unavailable: {e}"),
                },
                changed = stop.changed(), if !detached => {
                    if changed.is_err() {
                        detached = true;
                    } else if *stop.borrow() {
                        break;
                    }
                }
            }
        }
    }

    /// Start the workers and the housekeeping loop.
    ///
    /// A disabled queue starts nothing; the scheduler sends directly instead.
    pub fn spawn(self: Arc<Self>) -> WorkerPoolHandle {
        let (stop_tx, stop_rx) = watch::channel(false);
        let mut handles = Vec::new();

        if !self.queue.is_enabled() {
            tracing::warn!("⚠️ Queue disabled; worker pool not started");
            return WorkerPoolHandle { stop: stop_tx, handles };
        }

        tracing::info!("🚀 Starting {} workers on '{}'", self.workers, self.queue.name());
        for worker_id in 1..=self.workers {
            handles.push(tokio::spawn(self.clone().run_worker(worker_id, stop_rx.clone())));
        }
        handles.push(tokio::spawn(self.clone().run_housekeeping(stop_rx)));

        WorkerPoolHandle { stop: stop_tx, handles }
    }
}

/// Log a task that left the queue but could not be pushed back.
fn lost(worker_id: usize, task: &QueueTask, error: BillNotifyError) -> BillNotifyError {
    tracing::error!(
        "❌ Worker {worker_id}: {} task {} for record {} lost, requeue failed: {error}",
        task.kind,
        task.id,
        task.record.id
    );
    BillNotifyError::Queue(format!("task {} lost on requeue: {error}", task.id))
}

/// Running pool; dropping it detaches the workers and housekeeping, which
/// keep running.
pub struct WorkerPoolHandle {
    stop: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPoolHandle {
    pub fn worker_count(&self) -> usize {
        self.handles.len().saturating_sub(1)
    }

    /// Ask workers to stop after their current cycle and wait for them.
    pub async fn shutdown(self) {
        let _ = self.stop.send(true);
        for handle in self.handles {
            if let Err(e) = handle.await {
                tracing::warn!("⚠️ Worker task ended abnormally: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::testing::ScriptedSender;
    use crate::rate_limit::Unlimited;
    use crate::store::{MemoryQueueStore, QueueStore};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use billnotify_core::clock::ManualClock;
    use billnotify_core::traits::ChannelSender;
    use billnotify_core::types::{BillingRecord, Customer, NotificationKind, RecordStatus};
    use chrono::{NaiveDate, TimeZone, Utc};

    struct Fixture {
        pool: Arc<WorkerPool>,
        queue: Arc<NotificationQueue>,
        clock: Arc<ManualClock>,
    }

    async fn fixture(sender: Arc<ScriptedSender>, config: QueueConfig) -> Fixture {
        let store = Arc::new(MemoryQueueStore::new());
        let queue = Arc::new(NotificationQueue::connect(store, &config).await);
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap()));
        let channels: Vec<Arc<dyn ChannelSender>> = vec![sender];
        let pool = Arc::new(WorkerPool::new(
            queue.clone(),
            Arc::new(Unlimited),
            Dispatcher::new(channels),
            Arc::new(BusinessCalendar::brazil_default()),
            clock.clone(),
            &config,
        ));
        Fixture { pool, queue, clock }
    }

    fn config() -> QueueConfig {
        QueueConfig { pop_timeout_secs: 0, ..QueueConfig::default() }
    }

    fn task(clock: &ManualClock) -> QueueTask {
        let record = BillingRecord {
            id: 11,
            tenant_id: "acme".into(),
            customer: Customer { id: 3, name: "Lucia".into(), email: Some("l@example.com".into()), phone: None },
            amount_cents: 8_000,
            description: "Assinatura".into(),
            due_date: NaiveDate::from_ymd_opt(2026, 3, 13).unwrap(),
            status: RecordStatus::Pending,
            reminder_sent: true,
            due_sent: false,
            whatsapp_instance: None,
        };
        QueueTask::new(NotificationKind::Reminder, record, clock.now())
    }

    #[tokio::test]
    async fn test_idle_on_empty_queue() {
        let f = fixture(ScriptedSender::ok("email"), config()).await;
        assert_eq!(f.pool.process_next(1).await.unwrap(), WorkOutcome::Idle);
    }

    #[tokio::test]
    async fn test_success_drops_task() {
        let sender = ScriptedSender::ok("email");
        let f = fixture(sender.clone(), config()).await;
        f.queue.enqueue(&task(&f.clock)).await.unwrap();

        assert!(matches!(f.pool.process_next(1).await.unwrap(), WorkOutcome::Delivered { .. }));
        assert_eq!(sender.sent_count(), 1);
        assert_eq!(f.queue.depth().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_fail_twice_then_deliver_once() {
        let sender = ScriptedSender::scripted("email", &[false, false, true]);
        let f = fixture(sender.clone(), config()).await;
        f.queue.enqueue(&task(&f.clock)).await.unwrap();

        match f.pool.process_next(1).await.unwrap() {
            WorkOutcome::Retried { attempts, delay, .. } => {
                assert_eq!(attempts, 1);
                assert_eq!(delay, Duration::from_secs(300));
            }
            other => panic!("unexpected {other:?}"),
        }

        // Not yet eligible: goes back untouched.
        assert!(matches!(f.pool.process_next(1).await.unwrap(), WorkOutcome::Deferred { .. }));
        assert_eq!(sender.attempt_count(), 1);

        f.clock.advance(chrono::Duration::minutes(5));
        match f.pool.process_next(1).await.unwrap() {
            WorkOutcome::Retried { attempts, delay, .. } => {
                assert_eq!(attempts, 2);
                assert_eq!(delay, Duration::from_secs(1_200));
            }
            other => panic!("unexpected {other:?}"),
        }

        f.clock.advance(chrono::Duration::minutes(20));
        assert!(matches!(f.pool.process_next(1).await.unwrap(), WorkOutcome::Delivered { .. }));
        assert_eq!(sender.sent_count(), 1);
        assert_eq!(f.queue.depth().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_exhausted_task_not_requeued() {
        let sender = ScriptedSender::always_failing("email");
        let f = fixture(sender.clone(), config()).await;
        let queued = task(&f.clock);
        f.queue.enqueue(&queued).await.unwrap();

        for _ in 0..2 {
            assert!(matches!(f.pool.process_next(1).await.unwrap(), WorkOutcome::Retried { .. }));
            f.clock.advance(chrono::Duration::hours(1));
        }
        assert_eq!(
            f.pool.process_next(1).await.unwrap(),
            WorkOutcome::DeadLettered { task_id: queued.id.clone(), attempts: 3 }
        );
        assert_eq!(f.queue.depth().await.unwrap(), 0);
        assert_eq!(sender.sent_count(), 0);
        assert_eq!(sender.attempt_count(), 3);
        assert_eq!(f.pool.process_next(1).await.unwrap(), WorkOutcome::Idle);
    }

    #[tokio::test]
    async fn test_dead_letter_list_receives_exhausted_task() {
        let sender = ScriptedSender::always_failing("email");
        let config = QueueConfig { max_attempts: 1, dead_letter_queue: Some("dlq".into()), ..config() };
        let f = fixture(sender, config).await;
        f.queue.enqueue(&task(&f.clock)).await.unwrap();

        assert!(matches!(f.pool.process_next(1).await.unwrap(), WorkOutcome::DeadLettered { attempts: 1, .. }));
        assert_eq!(f.queue.stats().await.unwrap().dead_letter_pending, Some(1));
    }

    #[tokio::test]
    async fn test_undecodable_payload_discarded() {
        let store = Arc::new(MemoryQueueStore::new());
        let config = config();
        store.push(&config.name, "{broken").await.unwrap();
        let queue = Arc::new(NotificationQueue::connect(store, &config).await);
        let pool = WorkerPool::new(
            queue,
            Arc::new(Unlimited),
            Dispatcher::new(vec![]),
            Arc::new(BusinessCalendar::brazil_default()),
            Arc::new(ManualClock::new(Utc::now())),
            &config,
        );
        assert_eq!(pool.process_next(1).await.unwrap(), WorkOutcome::Discarded);
    }

    #[tokio::test]
    async fn test_spawn_and_shutdown() {
        let sender = ScriptedSender::ok("email");
        let f = fixture(sender.clone(), QueueConfig { workers: 3, pop_timeout_secs: 1, ..config() }).await;
        f.queue.enqueue(&task(&f.clock)).await.unwrap();

        let handle = f.pool.clone().spawn();
        assert_eq!(handle.worker_count(), 3);
        for _ in 0..100 {
            if sender.sent_count() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        handle.shutdown().await;
        assert_eq!(sender.sent_count(), 1);
    }

    /// Store that pops normally but can be told to reject pushes.
    #[derive(Default)]
    struct RejectingPushes {
        inner: MemoryQueueStore,
        reject: AtomicBool,
    }

    #[async_trait]
    impl QueueStore for RejectingPushes {
        async fn ping(&self) -> Result<()> {
            self.inner.ping().await
        }
        async fn push(&self, queue: &str, payload: &str) -> Result<()> {
            if self.reject.load(Ordering::SeqCst) {
                return Err(BillNotifyError::Queue("push rejected".into()));
            }
            self.inner.push(queue, payload).await
        }
        async fn blocking_pop(&self, queue: &str, timeout: Duration) -> Result<Option<String>> {
            self.inner.blocking_pop(queue, timeout).await
        }
        async fn len(&self, queue: &str) -> Result<usize> {
            self.inner.len(queue).await
        }
    }

    #[tokio::test]
    async fn test_failed_requeue_reports_lost_task() {
        let config = config();
        let store = Arc::new(RejectingPushes::default());
        let queue = Arc::new(NotificationQueue::connect(store.clone(), &config).await);
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap()));
        let channels: Vec<Arc<dyn ChannelSender>> = vec![ScriptedSender::always_failing("email")];
        let pool = WorkerPool::new(
            queue.clone(),
            Arc::new(Unlimited),
            Dispatcher::new(channels),
            Arc::new(BusinessCalendar::brazil_default()),
            clock.clone(),
            &config,
        );

        // Retry path
        let retried = task(&clock);
        queue.enqueue(&retried).await.unwrap();
        store.reject.store(true, Ordering::SeqCst);
        let err = pool.process_next(1).await.unwrap_err();
        assert!(matches!(&err, BillNotifyError::Queue(msg) if msg.contains(&retried.id)), "{err}");

        // Deferred path
        store.reject.store(false, Ordering::SeqCst);
        let waiting = task(&clock).retried(clock.now(), chrono::Duration::minutes(5));
        queue.enqueue(&waiting).await.unwrap();
        store.reject.store(true, Ordering::SeqCst);
        let err = pool.process_next(1).await.unwrap_err();
        assert!(matches!(&err, BillNotifyError::Queue(msg) if msg.contains(&waiting.id)), "{err}");
        assert_eq!(queue.depth().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_huge_base_retry_does_not_panic() {
        let sender = ScriptedSender::always_failing("email");
        let f = fixture(sender, QueueConfig { base_retry_secs: 100_000_000_000_000_000, ..config() }).await;
        f.queue.enqueue(&task(&f.clock)).await.unwrap();

        assert!(matches!(f.pool.process_next(1).await.unwrap(), WorkOutcome::Retried { attempts: 1, .. }));
        assert!(matches!(f.pool.process_next(1).await.unwrap(), WorkOutcome::Deferred { .. }));
    }

    #[tokio::test]
    async fn test_dropped_handle_leaves_workers_running() {
        let sender = ScriptedSender::ok("email");
        let f = fixture(sender.clone(), QueueConfig { workers: 1, pop_timeout_secs: 1, ..config() }).await;
        drop(f.pool.clone().spawn());

        f.queue.enqueue(&task(&f.clock)).await.unwrap();
        for _ in 0..200 {
            if sender.sent_count() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(sender.sent_count(), 1);
    }

    #[tokio::test]
    async fn test_disabled_queue_spawns_nothing() {
        let config = config();
        let pool = Arc::new(WorkerPool::new(
            Arc::new(NotificationQueue::disabled(&config)),
            Arc::new(Unlimited),
            Dispatcher::new(vec![]),
            Arc::new(BusinessCalendar::brazil_default()),
            Arc::new(ManualClock::new(Utc::now())),
            &config,
        ));
        let handle = pool.spawn();
        assert_eq!(handle.worker_count(), 0);
        handle.shutdown().await;
    }
}
