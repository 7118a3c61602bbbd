//! Collaborator interfaces consumed by the scheduler and worker pool.

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::error::Result;
use crate::types::{BillingRecord, Destination, NotificationKind, OutgoingMessage, RecordId, RecordStatus};

/// Query/update access to billing records.
///
/// All date arguments are calendar-local dates supplied by the caller, so the
/// store never has to guess a timezone.
#[async_trait]
pub trait BillingSource: Send + Sync {
    /// Pending records due exactly `window_days` after `today` whose reminder
    /// flag is unset.
    async fn records_due_for_reminder(&self, today: NaiveDate, window_days: u32) -> Result<Vec<BillingRecord>>;

    /// Pending records due on `today` whose due-today flag is unset.
    async fn records_due_today(&self, today: NaiveDate) -> Result<Vec<BillingRecord>>;

    /// Pending records whose due date is before `today`.
    async fn overdue_candidates(&self, today: NaiveDate) -> Result<Vec<BillingRecord>>;

    /// Atomically set the flag for `kind` if it is unset.
    ///
    /// Returns `true` when this call flipped the flag, `false` when it was
    /// already set. Flags are never reset.
    async fn set_notification_flag(&self, id: RecordId, kind: NotificationKind) -> Result<bool>;

    async fn update_status(&self, id: RecordId, status: RecordStatus) -> Result<()>;
}

/// A single outbound message channel (chat, e-mail).
#[async_trait]
pub trait ChannelSender: Send + Sync {
    /// Channel name used in logs, e.g. `whatsapp`, `email`.
    fn name(&self) -> &str;

    /// Resolve the record's address on this channel, if it has one.
    fn destination(&self, record: &BillingRecord) -> Option<Destination>;

    /// Whether the given sending instance is currently connected.
    async fn connectivity_state(&self, _instance: &str) -> bool {
        true
    }

    /// Deliver `message`; returns the provider's message id.
    async fn send(&self, destination: &Destination, message: &OutgoingMessage) -> Result<String>;
}
