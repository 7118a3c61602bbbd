//! Notification dispatch — fans a message out to every configured channel.
//!
//! A dispatch succeeds when at least one channel accepts the message. Channels
//! without an address for the record, or whose sending instance is not
//! connected, are skipped.

use std::sync::Arc;

use billnotify_core::error::{BillNotifyError, Result};
use billnotify_core::traits::ChannelSender;
use billnotify_core::types::{BillingRecord, NotificationKind};
use chrono::NaiveDate;

use crate::message;
use crate::tasks::QueueTask;

/// Per-channel outcome of one dispatch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// `(channel, provider message id)`
    pub delivered: Vec<(String, String)>,
    /// `(channel, error)`
    pub failed: Vec<(String, String)>,
    pub skipped: Vec<String>,
}

impl DispatchReport {
    pub fn is_success(&self) -> bool {
        !self.delivered.is_empty()
    }
}

#[derive(Clone)]
pub struct Dispatcher {
    channels: Vec<Arc<dyn ChannelSender>>,
}

impl Dispatcher {
    pub fn new(channels: Vec<Arc<dyn ChannelSender>>) -> Self {
        Self { channels }
    }

    pub fn channel_names(&self) -> Vec<&str> {
        self.channels.iter().map(|c| c.name()).collect()
    }

    /// Deliver a dequeued task.
    pub async fn dispatch(&self, task: &QueueTask, today: NaiveDate) -> Result<DispatchReport> {
        self.send(task.kind, &task.record, today).await
    }

    /// Synchronous fallback used when the queue is unavailable.
    pub async fn send_direct(
        &self,
        kind: NotificationKind,
        record: &BillingRecord,
        today: NaiveDate,
    ) -> Result<DispatchReport> {
        tracing::info!("📨 Direct send: {} for record {}", kind, record.id);
        self.send(kind, record, today).await
    }

    async fn send(&self, kind: NotificationKind, record: &BillingRecord, today: NaiveDate) -> Result<DispatchReport> {
        let outgoing = message::compose(kind, record, today);
        let mut report = DispatchReport::default();

        for channel in &self.channels {
            let name = channel.name().to_string();
            let Some(destination) = channel.destination(record) else {
                report.skipped.push(name);
                continue;
            };
            if let Some(instance) = destination.instance.as_deref()
                && !channel.connectivity_state(instance).await
            {
                tracing::debug!("{name} instance '{instance}' not connected, skipping");
                report.skipped.push(name);
                continue;
            }

            match channel.send(&destination, &outgoing).await {
                Ok(message_id) => {
                    tracing::info!("✅ {} {} sent to {} ({})", name, kind, record.customer.name, message_id);
                    report.delivered.push((name, message_id));
                }
                Err(e) => {
                    tracing::warn!("⚠️ {} {} to {} failed: {}", name, kind, record.customer.name, e);
                    report.failed.push((name, e.to_string()));
                }
            }
        }

        if report.is_success() {
            Ok(report)
        } else if report.failed.is_empty() {
            Err(BillNotifyError::Channel(format!(
                "no reachable channel for record {} (skipped: {})",
                record.id,
                report.skipped.join(", ")
            )))
        } else {
            let reasons: Vec<String> = report.failed.iter().map(|(c, e)| format!("{c}: {e}")).collect();
            Err(BillNotifyError::Channel(reasons.join("; ")))
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::ScriptedSender;
    use super::*;
    use billnotify_core::types::{Customer, RecordStatus};

    fn record(instance: Option<&str>) -> BillingRecord {
        BillingRecord {
            id: 5,
            tenant_id: "acme".into(),
            customer: Customer { id: 8, name: "Paulo".into(), email: None, phone: None },
            amount_cents: 1_000,
            description: "Serviço".into(),
            due_date: NaiveDate::from_ymd_opt(2026, 3, 13).unwrap(),
            status: RecordStatus::Pending,
            reminder_sent: false,
            due_sent: false,
            whatsapp_instance: instance.map(String::from),
        }
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 10).unwrap()
    }

    #[tokio::test]
    async fn test_one_channel_success_is_enough() {
        let ok = ScriptedSender::ok("email");
        let bad = ScriptedSender::always_failing("whatsapp");
        let channels: Vec<Arc<dyn ChannelSender>> = vec![bad.clone(), ok.clone()];
        let dispatcher = Dispatcher::new(channels);

        let report = dispatcher.send_direct(NotificationKind::Reminder, &record(None), today()).await.unwrap();
        assert_eq!(report.delivered.len(), 1);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(ok.sent_count(), 1);
        assert!(ok.sent.lock().unwrap()[0].1.body.contains("Paulo"));
    }

    #[tokio::test]
    async fn test_all_failed_is_error() {
        let dispatcher = Dispatcher::new(vec![ScriptedSender::always_failing("email") as Arc<dyn ChannelSender>]);
        let err = dispatcher.send_direct(NotificationKind::DueToday, &record(None), today()).await.unwrap_err();
        assert!(matches!(err, BillNotifyError::Channel(_)));
    }

    #[tokio::test]
    async fn test_disconnected_instance_skipped() {
        let chat = ScriptedSender::disconnected("whatsapp");
        let email = ScriptedSender::ok("email");
        let channels: Vec<Arc<dyn ChannelSender>> = vec![chat.clone(), email.clone()];
        let dispatcher = Dispatcher::new(channels);

        let report = dispatcher.send_direct(NotificationKind::Reminder, &record(Some("acme-main")), today()).await.unwrap();
        assert_eq!(report.skipped, vec!["whatsapp".to_string()]);
        assert_eq!(chat.attempt_count(), 0);
        assert_eq!(email.sent_count(), 1);
    }

    #[tokio::test]
    async fn test_no_channels_is_error() {
        let dispatcher = Dispatcher::new(vec![]);
        assert!(dispatcher.send_direct(NotificationKind::Reminder, &record(None), today()).await.is_err());
    }
}
