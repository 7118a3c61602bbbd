//! Billing-record snapshot types shared by the scheduler, queue and channels.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Primary key of a billing record.
pub type RecordId = i64;

/// Lifecycle status of a billing record.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecordStatus {
    Pending,
    Paid,
    Overdue,
    Cancelled,
}

impl RecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordStatus::Pending => "PENDING",
            RecordStatus::Paid => "PAID",
            RecordStatus::Overdue => "OVERDUE",
            RecordStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(RecordStatus::Pending),
            "PAID" => Some(RecordStatus::Paid),
            "OVERDUE" => Some(RecordStatus::Overdue),
            "CANCELLED" => Some(RecordStatus::Cancelled),
            _ => None,
        }
    }
}

impl fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which customer notification a task carries.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum NotificationKind {
    /// Sent a configured number of days before the due date.
    #[serde(rename = "reminder")]
    Reminder,
    /// Sent on the due date itself.
    #[serde(rename = "due-today")]
    DueToday,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::Reminder => "reminder",
            NotificationKind::DueToday => "due-today",
        }
    }

    /// Column holding the "already sent" flag for this kind.
    pub fn flag_column(&self) -> &'static str {
        match self {
            NotificationKind::Reminder => "reminder_sent",
            NotificationKind::DueToday => "due_sent",
        }
    }
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Customer contact data captured with the record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Customer {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
}

/// Snapshot of a billing record plus the contact data needed to notify.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BillingRecord {
    pub id: RecordId,
    /// Owning account (tenant) of the record.
    pub tenant_id: String,
    pub customer: Customer,
    /// Amount in cents.
    pub amount_cents: i64,
    pub description: String,
    pub due_date: NaiveDate,
    pub status: RecordStatus,
    #[serde(default)]
    pub reminder_sent: bool,
    #[serde(default)]
    pub due_sent: bool,
    /// Chat instance the tenant sends WhatsApp messages through.
    #[serde(default)]
    pub whatsapp_instance: Option<String>,
}

impl BillingRecord {
    /// Whether the notification flag for `kind` is already set.
    pub fn flag(&self, kind: NotificationKind) -> bool {
        match kind {
            NotificationKind::Reminder => self.reminder_sent,
            NotificationKind::DueToday => self.due_sent,
        }
    }

    /// Whole days from `today` until the due date (negative once past due).
    pub fn days_until_due(&self, today: NaiveDate) -> i64 {
        (self.due_date - today).num_days()
    }

    pub fn is_overdue(&self, today: NaiveDate) -> bool {
        self.status == RecordStatus::Pending && self.due_date < today
    }

    /// Amount formatted as `R$ 1234.56`.
    pub fn formatted_amount(&self) -> String {
        let sign = if self.amount_cents < 0 { "-" } else { "" };
        let cents = self.amount_cents.unsigned_abs();
        format!("R$ {sign}{}.{:02}", cents / 100, cents % 100)
    }
}

/// Where a channel should deliver a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    /// Channel address: phone number, e-mail address.
    pub address: String,
    /// Sending instance reference (e.g. a WhatsApp instance name).
    pub instance: Option<String>,
}

/// A rendered message ready for a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub subject: String,
    pub body: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> BillingRecord {
        BillingRecord {
            id: 7,
            tenant_id: "acme".into(),
            customer: Customer {
                id: 1,
                name: "Maria".into(),
                email: Some("maria@example.com".into()),
                phone: Some("(11) 98765-4321".into()),
            },
            amount_cents: 15_005,
            description: "Mensalidade".into(),
            due_date: NaiveDate::from_ymd_opt(2026, 3, 10).unwrap(),
            status: RecordStatus::Pending,
            reminder_sent: false,
            due_sent: true,
            whatsapp_instance: None,
        }
    }

    #[test]
    fn test_kind_serde_names() {
        assert_eq!(serde_json::to_string(&NotificationKind::Reminder).unwrap(), "\"reminder\"");
        assert_eq!(serde_json::to_string(&NotificationKind::DueToday).unwrap(), "\"due-today\"");
    }

    #[test]
    fn test_flags_and_days() {
        let r = record();
        assert!(!r.flag(NotificationKind::Reminder));
        assert!(r.flag(NotificationKind::DueToday));
        let today = NaiveDate::from_ymd_opt(2026, 3, 7).unwrap();
        assert_eq!(r.days_until_due(today), 3);
        assert!(!r.is_overdue(today));
        assert!(r.is_overdue(NaiveDate::from_ymd_opt(2026, 3, 11).unwrap()));
    }

    #[test]
    fn test_status_roundtrip_and_amount() {
        for s in [RecordStatus::Pending, RecordStatus::Paid, RecordStatus::Overdue, RecordStatus::Cancelled] {
            assert_eq!(RecordStatus::parse(s.as_str()), Some(s));
        }
        assert_eq!(RecordStatus::parse("PENDENTE"), None);
        assert_eq!(record().formatted_amount(), "R$ 150.05");
    }
}
