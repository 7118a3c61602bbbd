//! E-mail channel: SMTP delivery via async lettre.

use async_trait::async_trait;
use billnotify_core::config::EmailConfig;
use billnotify_core::error::{BillNotifyError, Result};
use billnotify_core::traits::ChannelSender;
use billnotify_core::types::{BillingRecord, Destination, OutgoingMessage};
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

/// SMTP e-mail sender.
pub struct EmailSender {
    from: Mailbox,
    mailer: AsyncSmtpTransport<Tokio1Executor>,
}

impl EmailSender {
    pub fn new(config: &EmailConfig) -> Result<Self> {
        if config.smtp_host.is_empty() {
            return Err(BillNotifyError::Config("email.smtp_host not configured".into()));
        }
        let from: Mailbox = config
            .from
            .parse()
            .map_err(|e| BillNotifyError::Config(format!("Invalid email.from: {e}")))?;

        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_host)
            .map_err(|e| BillNotifyError::Config(format!("SMTP relay: {e}")))?
            .port(config.smtp_port);
        if !config.username.is_empty() {
            builder = builder.credentials(Credentials::new(config.username.clone(), config.password.clone()));
        }

        Ok(Self { from, mailer: builder.build() })
    }

    /// Build the MIME message and the id it will be sent under.
    fn build_message(from: &Mailbox, to: &str, message: &OutgoingMessage) -> Result<(Message, String)> {
        let to_mailbox: Mailbox = to
            .parse()
            .map_err(|e| BillNotifyError::Channel(format!("Invalid to: {e}")))?;
        let message_id = format!("<{}@billnotify>", uuid::Uuid::new_v4());

        let email = Message::builder()
            .from(from.clone())
            .to(to_mailbox)
            .subject(message.subject.as_str())
            .message_id(Some(message_id.clone()))
            .header(ContentType::TEXT_PLAIN)
            .body(message.body.clone())
            .map_err(|e| BillNotifyError::Channel(format!("Build email: {e}")))?;

        Ok((email, message_id))
    }
}

#[async_trait]
impl ChannelSender for EmailSender {
    fn name(&self) -> &str {
        "email"
    }

    fn destination(&self, record: &BillingRecord) -> Option<Destination> {
        let email = record.customer.email.as_deref()?.trim();
        if email.is_empty() {
            return None;
        }
        Some(Destination { address: email.to_string(), instance: None })
    }

    async fn send(&self, destination: &Destination, message: &OutgoingMessage) -> Result<String> {
        let (email, message_id) = Self::build_message(&self.from, &destination.address, message)?;

        self.mailer
            .send(email)
            .await
            .map_err(|e| BillNotifyError::Channel(format!("SMTP send: {e}")))?;

        tracing::info!("📤 Email sent to: {}", destination.address);
        Ok(message_id)
    }
}
