//! Fixed customer-facing texts for each notification kind.

use billnotify_core::types::{BillingRecord, NotificationKind, OutgoingMessage};
use chrono::NaiveDate;

const SIGNATURE: &str = "Atenciosamente,\nEquipe de Cobrança";

/// Build the message for `record`. `today` is the calendar-local date.
pub fn compose(kind: NotificationKind, record: &BillingRecord, today: NaiveDate) -> OutgoingMessage {
    let due = record.due_date.format("%d/%m/%Y");
    match kind {
        NotificationKind::Reminder => {
            let days = record.days_until_due(today).max(0);
            let when = match days {
                0 => "hoje".to_string(),
                1 => "em 1 dia".to_string(),
                n => format!("em {n} dias"),
            };
            OutgoingMessage {
                subject: format!("Lembrete: cobrança vence {when}"),
                body: format!(
                    "🔔 *Lembrete de Cobrança*\n\n\
                     Olá, {}!\n\n\
                     Sua cobrança vence {when}:\n\
                     💰 Valor: {}\n\
                     📝 Descrição: {}\n\
                     📅 Vencimento: {due}\n\n\
                     {SIGNATURE}",
                    record.customer.name,
                    record.formatted_amount(),
                    record.description,
                ),
            }
        }
        NotificationKind::DueToday => OutgoingMessage {
            subject: "Sua cobrança vence hoje".to_string(),
            body: format!(
                "⚠️ *Cobrança Vence Hoje*\n\n\
                 Olá, {}!\n\n\
                 Sua cobrança vence HOJE:\n\
                 💰 Valor: {}\n\
                 📝 Descrição: {}\n\n\
                 {SIGNATURE}",
                record.customer.name,
                record.formatted_amount(),
                record.description,
            ),
        },
    }
}
