//! Scheduler engine — fires the periodic jobs and turns due billing records
//! into queue tasks.
//! Uses tokio::interval for ticking; trigger times come from the injected clock.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use billnotify_core::clock::Clock;
use billnotify_core::config::Config;
use billnotify_core::error::Result;
use billnotify_core::traits::BillingSource;
use billnotify_core::types::{BillingRecord, NotificationKind, RecordStatus};
use chrono::{DateTime, NaiveDate, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::calendar::BusinessCalendar;
use crate::dispatch::Dispatcher;
use crate::queue::NotificationQueue;
use crate::tasks::QueueTask;
use crate::triggers::{Job, Trigger, default_triggers};

/// Counters for one run of a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchReport {
    pub job: Job,
    /// The job did nothing because the calendar was closed.
    pub skipped_closed: bool,
    pub scanned: usize,
    pub enqueued: usize,
    pub sent_direct: usize,
    /// Records whose flag another run had already set.
    pub already_claimed: usize,
    pub updated: usize,
    pub failed: usize,
}

impl BatchReport {
    fn new(job: Job) -> Self {
        Self {
            job,
            skipped_closed: false,
            scanned: 0,
            enqueued: 0,
            sent_direct: 0,
            already_claimed: 0,
            updated: 0,
            failed: 0,
        }
    }
}

/// The scheduler — owns the triggers and runs their jobs.
pub struct Scheduler {
    calendar: Arc<BusinessCalendar>,
    source: Arc<dyn BillingSource>,
    queue: Arc<NotificationQueue>,
    dispatcher: Dispatcher,
    clock: Arc<dyn Clock>,
    triggers: Vec<Trigger>,
    next_fire: Mutex<Vec<DateTime<Utc>>>,
    reminder_window_days: u32,
    tick_interval: Duration,
}

impl Scheduler {
    pub fn new(
        calendar: Arc<BusinessCalendar>,
        source: Arc<dyn BillingSource>,
        queue: Arc<NotificationQueue>,
        dispatcher: Dispatcher,
        clock: Arc<dyn Clock>,
        config: &Config,
    ) -> Result<Self> {
        let triggers = default_triggers(config)?;
        let now = clock.now();
        let next_fire = triggers
            .iter()
            .map(|t| t.next_fire_after(now, calendar.timezone()))
            .collect();

        Ok(Self {
            calendar,
            source,
            queue,
            dispatcher,
            clock,
            triggers,
            next_fire: Mutex::new(next_fire),
            reminder_window_days: config.scheduler.reminder_window_days,
            tick_interval: Duration::from_secs(config.scheduler.tick_interval_secs.max(1)),
        })
    }

    /// Upcoming fire time of every trigger.
    pub fn upcoming(&self) -> Vec<(Job, DateTime<Utc>)> {
        let next = self.next_fire.lock().unwrap_or_else(|p| p.into_inner());
        self.triggers.iter().map(|t| t.job).zip(next.iter().copied()).collect()
    }

    pub async fn enqueue_reminders(&self) -> Result<BatchReport> {
        self.enqueue_batch(Job::Reminders, NotificationKind::Reminder).await
    }

    pub async fn enqueue_due_today(&self) -> Result<BatchReport> {
        self.enqueue_batch(Job::DueToday, NotificationKind::DueToday).await
    }

    /// Re-run both enqueue jobs; a no-op outside business hours.
    ///
    /// The two batches are independent: a failed scan abandons only its own
    /// batch. An error is returned only when both fail.
    pub async fn catch_up_pending(&self) -> Result<Vec<BatchReport>> {
        if !self.calendar.is_open(self.clock.now()) {
            tracing::debug!("Catch-up skipped: outside business hours");
            return Ok(Vec::new());
        }

        let mut reports = Vec::new();
        let mut last_error = None;
        for result in [self.enqueue_reminders().await, self.enqueue_due_today().await] {
            match result {
                Ok(report) => reports.push(report),
                Err(e) => {
                    tracing::error!("❌ Catch-up batch failed: {e}");
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(e) if reports.is_empty() => Err(e),
            _ => Ok(reports),
        }
    }

    /// Move pending records past their due date to OVERDUE.
    pub async fn mark_overdue(&self) -> Result<BatchReport> {
        let mut report = BatchReport::new(Job::MarkOverdue);
        let today = self.calendar.local_date(self.clock.now());
        let records = self.source.overdue_candidates(today).await?;
        report.scanned = records.len();

        for record in &records {
            match self.source.update_status(record.id, RecordStatus::Overdue).await {
                Ok(()) => report.updated += 1,
                Err(e) => {
                    tracing::warn!("⚠️ Could not mark record {} overdue: {e}", record.id);
                    report.failed += 1;
                }
            }
        }

        if report.updated > 0 {
            tracing::info!("📅 {} records marked overdue", report.updated);
        }
        Ok(report)
    }

    /// Run one job's body once, regardless of its trigger time.
    pub async fn run_trigger(&self, job: Job) -> Result<Vec<BatchReport>> {
        match job {
            Job::Reminders => Ok(vec![self.enqueue_reminders().await?]),
            Job::DueToday => Ok(vec![self.enqueue_due_today().await?]),
            Job::CatchUp => self.catch_up_pending().await,
            Job::MarkOverdue => Ok(vec![self.mark_overdue().await?]),
        }
    }

    /// Fire every trigger whose time has come. Job errors are logged; the
    /// job runs again at its next fire time.
    pub async fn tick(&self) -> Vec<BatchReport> {
        let now = self.clock.now();
        let due: Vec<Job> = {
            let mut next = self.next_fire.lock().unwrap_or_else(|p| p.into_inner());
            self.triggers
                .iter()
                .zip(next.iter_mut())
                .filter(|(_, at)| now >= **at)
                .map(|(trigger, at)| {
                    *at = trigger.next_fire_after(now, self.calendar.timezone());
                    trigger.job
                })
                .collect()
        };

        let mut reports = Vec::new();
        for job in due {
            tracing::info!("🔔 Trigger fired: {}", job.as_str());
            match self.run_trigger(job).await {
                Ok(mut batch) => reports.append(&mut batch),
                Err(e) => tracing::error!("❌ Job {} failed: {e}", job.as_str()),
            }
        }
        reports
    }

    async fn enqueue_batch(&self, job: Job, kind: NotificationKind) -> Result<BatchReport> {
        let mut report = BatchReport::new(job);
        let now = self.clock.now();

        if !self.calendar.is_open(now) {
            tracing::info!(
                "⏸️ Outside business hours; {} deferred until {}",
                kind,
                self.calendar.describe_next_open(now)
            );
            report.skipped_closed = true;
            return Ok(report);
        }

        let today = self.calendar.local_date(now);
        let records = match kind {
            NotificationKind::Reminder => {
                self.source.records_due_for_reminder(today, self.reminder_window_days).await?
            }
            NotificationKind::DueToday => self.source.records_due_today(today).await?,
        };
        report.scanned = records.len();

        if records.is_empty() {
            tracing::info!("📭 No records need a {} notification", kind);
            return Ok(report);
        }
        tracing::info!("📬 Processing {} {} notifications", records.len(), kind);

        for record in records {
            self.handle_record(kind, record, now, today, &mut report).await;
        }

        if report.enqueued > 0 {
            tracing::info!("✅ {} {} notifications enqueued", report.enqueued, kind);
        }
        Ok(report)
    }

    /// Claim the record's flag, then enqueue it or send it directly.
    ///
    /// The flag stays set whatever happens after the claim, so a record is
    /// messaged at most once per kind.
    async fn handle_record(
        &self,
        kind: NotificationKind,
        record: BillingRecord,
        now: DateTime<Utc>,
        today: NaiveDate,
        report: &mut BatchReport,
    ) {
        if record.flag(kind) {
            report.already_claimed += 1;
            return;
        }
        match self.source.set_notification_flag(record.id, kind).await {
            Ok(true) => {}
            Ok(false) => {
                report.already_claimed += 1;
                return;
            }
            Err(e) => {
                tracing::warn!("⚠️ Could not flag record {} for {}: {e}", record.id, kind);
                report.failed += 1;
                return;
            }
        }

        if self.queue.is_enabled() {
            let task = QueueTask::new(kind, record, now);
            match self.queue.enqueue(&task).await {
                Ok(()) => report.enqueued += 1,
                Err(e) => {
                    tracing::warn!("❌ Enqueue of record {} failed: {e}. Sending directly...", task.record.id);
                    self.send_direct(kind, &task.record, today, report).await;
                }
            }
        } else {
            self.send_direct(kind, &record, today, report).await;
        }
    }

    async fn send_direct(&self, kind: NotificationKind, record: &BillingRecord, today: NaiveDate, report: &mut BatchReport) {
        match self.dispatcher.send_direct(kind, record, today).await {
            Ok(_) => report.sent_direct += 1,
            Err(e) => {
                tracing::error!("❌ Direct {} for record {} failed: {e}", kind, record.id);
                report.failed += 1;
            }
        }
    }

    /// Spawn the tick loop as a background tokio task.
    pub fn spawn(self: Arc<Self>) -> SchedulerHandle {
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let tick_interval = self.tick_interval;

        let handle = tokio::spawn(async move {
            tracing::info!("⏰ Scheduler started (check every {}s)", tick_interval.as_secs());
            let mut interval = tokio::time::interval(tick_interval);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        self.tick().await;
                    }
                    changed = stop_rx.changed() => {
                        if changed.is_err() || *stop_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            tracing::info!("🛑 Scheduler stopped");
        });

        SchedulerHandle { stop: stop_tx, handle }
    }
}

/// Running scheduler loop.
pub struct SchedulerHandle {
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Stop future firings. A job already running finishes first.
    pub async fn stop(self) {
        let _ = self.stop.send(true);
        if let Err(e) = self.handle.await {
            tracing::warn!("⚠️ Scheduler task ended abnormally: {e}");
        }
    }
}
