//! # BillNotify Scheduler
//!
//! Business-hours aware notification pipeline for billing records.
//!
//! ## Architecture
//! ```text
//! Scheduler (tokio interval, injected clock)
//!   ├── reminders     daily 09:00  → records due in N days
//!   ├── due-today     daily 09:00  → records due today
//!   ├── catch-up      hourly       → both of the above, only while open
//!   └── mark-overdue  daily 23:00  → PENDING → OVERDUE
//!         │
//!         ├── BusinessCalendar gate (hours, weekdays, holidays)
//!         ├── claim flag (atomic set-if-unset)
//!         └── NotificationQueue ──(disabled / push failed)──→ direct send
//!
//! Worker pool (N tokio tasks)
//!   ├── TokenBucket.acquire()           shared across workers
//!   ├── BRPOP with timeout
//!   ├── not eligible yet → push back
//!   └── Dispatcher → WhatsApp / e-mail
//!         └── failure → attempts² × base delay, then dead-letter
//! ```

pub mod calendar;
pub mod dispatch;
pub mod engine;
pub mod message;
pub mod persistence;
pub mod queue;
pub mod rate_limit;
pub mod redis_store;
pub mod store;
pub mod tasks;
pub mod triggers;
pub mod worker;

pub use calendar::BusinessCalendar;
pub use dispatch::{DispatchReport, Dispatcher};
pub use engine::{BatchReport, Scheduler, SchedulerHandle};
pub use persistence::{NewBillingRecord, SqliteBillingStore};
pub use queue::{NotificationQueue, QueueStats};
pub use rate_limit::{RateLimiter, TokenBucket, Unlimited};
pub use redis_store::RedisQueueStore;
pub use store::{MemoryQueueStore, QueueStore};
pub use tasks::{QueueTask, RetryPolicy};
pub use triggers::{Cadence, Job, Trigger, default_triggers};
pub use worker::{WorkOutcome, WorkerPool, WorkerPoolHandle};
