//! Queue task definitions — the payload workers pull off the durable queue.

use billnotify_core::error::Result;
use billnotify_core::types::{BillingRecord, NotificationKind};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// A notification waiting to be delivered.
///
/// Tasks are values: a retry produces a new task through [`QueueTask::retried`]
/// instead of mutating the one that failed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueueTask {
    /// Unique task ID, `{kind}_{record}_{uuid}`.
    pub id: String,
    /// Which message to send.
    pub kind: NotificationKind,
    /// Record and customer contact data as of enqueue time.
    pub record: BillingRecord,
    /// Failed delivery attempts so far.
    #[serde(default)]
    pub attempts: u32,
    /// Workers must not process the task before this instant.
    pub next_eligible_at: DateTime<Utc>,
    pub enqueued_at: DateTime<Utc>,
}

impl QueueTask {
    /// A fresh task, eligible immediately.
    pub fn new(kind: NotificationKind, record: BillingRecord, now: DateTime<Utc>) -> Self {
        Self {
            id: format!("{}_{}_{}", kind.as_str(), record.id, uuid::Uuid::new_v4().simple()),
            kind,
            record,
            attempts: 0,
            next_eligible_at: now,
            enqueued_at: now,
        }
    }

    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        now >= self.next_eligible_at
    }

    /// Copy of this task with one more failed attempt, eligible at `now + delay`.
    ///
    /// A delay past the representable range saturates at the latest instant.
    pub fn retried(&self, now: DateTime<Utc>, delay: Duration) -> Self {
        Self {
            attempts: self.attempts.saturating_add(1),
            next_eligible_at: now.checked_add_signed(delay).unwrap_or(DateTime::<Utc>::MAX_UTC),
            ..self.clone()
        }
    }

    pub fn to_payload(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_payload(payload: &str) -> Result<Self> {
        Ok(serde_json::from_str(payload)?)
    }
}

/// Quadratic backoff with a bounded number of attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base: Duration,
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { base: Duration::minutes(5), max_attempts: 3 }
    }
}

impl RetryPolicy {
    pub fn new(base: Duration, max_attempts: u32) -> Self {
        Self { base, max_attempts }
    }

    /// Delay before the next try once `attempts` failures have happened:
    /// `attempts² × base`.
    pub fn delay_for(&self, attempts: u32) -> Duration {
        let factor = i32::try_from(attempts.saturating_mul(attempts)).unwrap_or(i32::MAX);
        self.base.checked_mul(factor).unwrap_or(Duration::MAX)
    }

    /// Whether a task with `attempts` failures gets another try.
    pub fn should_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use billnotify_core::types::{Customer, RecordStatus};
    use chrono::{NaiveDate, TimeZone};

    fn record() -> BillingRecord {
        BillingRecord {
            id: 42,
            tenant_id: "acme".into(),
            customer: Customer {
                id: 7,
                name: "Maria".into(),
                email: Some("maria@example.com".into()),
                phone: Some("11987654321".into()),
            },
            amount_cents: 15_000,
            description: "Mensalidade".into(),
            due_date: NaiveDate::from_ymd_opt(2026, 3, 13).unwrap(),
            status: RecordStatus::Pending,
            reminder_sent: false,
            due_sent: false,
            whatsapp_instance: Some("acme-main".into()),
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_new_task_is_eligible() {
        let task = QueueTask::new(NotificationKind::Reminder, record(), now());
        assert_eq!(task.attempts, 0);
        assert!(task.is_eligible(now()));
        assert!(task.id.starts_with("reminder_42_"));
    }

    #[test]
    fn test_retried_saturates_huge_delay() {
        let task = QueueTask::new(NotificationKind::Reminder, record(), now());
        let policy = RetryPolicy::new(Duration::days(365 * 1_000), 3);
        let retry = task.retried(now(), policy.delay_for(u32::MAX));
        assert_eq!(retry.next_eligible_at, DateTime::<Utc>::MAX_UTC);
        assert!(!retry.is_eligible(now()));
    }

    #[test]
    fn test_retried_is_new_value() {
        let task = QueueTask::new(NotificationKind::DueToday, record(), now());
        let retry = task.retried(now(), Duration::minutes(5));
        assert_eq!(task.attempts, 0);
        assert_eq!(retry.attempts, 1);
        assert_eq!(retry.id, task.id);
        assert!(!retry.is_eligible(now()));
        assert!(retry.is_eligible(now() + Duration::minutes(5)));
    }

    #[test]
    fn test_payload_keeps_kind_and_record() {
        let task = QueueTask::new(NotificationKind::DueToday, record(), now());
        let payload = task.to_payload().unwrap();
        assert!(payload.contains("\"due-today\""));
        let back = QueueTask::from_payload(&payload).unwrap();
        assert_eq!(back, task);
        assert!(QueueTask::from_payload("{not json").is_err());
    }

    #[test]
    fn test_quadratic_backoff() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::minutes(5));
        assert_eq!(policy.delay_for(2), Duration::minutes(20));
        assert_eq!(policy.delay_for(3), Duration::minutes(45));
    }

    #[test]
    fn test_retry_bound() {
        let policy = RetryPolicy::new(Duration::seconds(1), 3);
        assert!(policy.should_retry(1));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
    }
}
