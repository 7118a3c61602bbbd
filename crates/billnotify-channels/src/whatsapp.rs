//! WhatsApp channel through an Evolution API gateway.
//!
//! Each tenant owns a named instance on the gateway. Messages go out through
//! `POST /message/sendText/{instance}`; connectivity is read from
//! `GET /instance/connectionState/{instance}`.

use async_trait::async_trait;
use billnotify_core::config::WhatsAppConfig;
use billnotify_core::error::{BillNotifyError, Result};
use billnotify_core::traits::ChannelSender;
use billnotify_core::types::{BillingRecord, Destination, OutgoingMessage};
use serde::Deserialize;
use std::time::Duration;

use crate::phone;

#[derive(Debug, Deserialize)]
struct SendTextResponse {
    key: MessageKey,
}

#[derive(Debug, Deserialize)]
struct MessageKey {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ConnectionStateResponse {
    instance: InstanceState,
}

#[derive(Debug, Deserialize)]
struct InstanceState {
    state: String,
}

/// WhatsApp sender backed by the Evolution API.
pub struct WhatsAppSender {
    config: WhatsAppConfig,
    client: reqwest::Client,
}

impl WhatsAppSender {
    pub fn new(config: WhatsAppConfig) -> Result<Self> {
        if config.api_key.is_empty() {
            return Err(BillNotifyError::Config("WhatsApp api_key not configured".into()));
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| BillNotifyError::Http(format!("WhatsApp client: {e}")))?;
        Ok(Self { config, client })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn send_text_body(number: &str, text: &str) -> serde_json::Value {
        serde_json::json!({
            "number": number,
            "text": text,
        })
    }
}

#[async_trait]
impl ChannelSender for WhatsAppSender {
    fn name(&self) -> &str {
        "whatsapp"
    }

    fn destination(&self, record: &BillingRecord) -> Option<Destination> {
        let instance = record.whatsapp_instance.clone()?;
        let number = phone::normalize_br(record.customer.phone.as_deref()?)?;
        Some(Destination { address: number, instance: Some(instance) })
    }

    async fn connectivity_state(&self, instance: &str) -> bool {
        let response = self
            .client
            .get(self.url(&format!("instance/connectionState/{instance}")))
            .header("apikey", &self.config.api_key)
            .send()
            .await;

        match response {
            Ok(resp) if resp.status().is_success() => match resp.json::<ConnectionStateResponse>().await {
                Ok(body) => body.instance.state == "open",
                Err(e) => {
                    tracing::warn!("⚠️ WhatsApp state for '{instance}' unreadable: {e}");
                    false
                }
            },
            Ok(resp) => {
                tracing::warn!("⚠️ WhatsApp state for '{instance}' returned {}", resp.status());
                false
            }
            Err(e) => {
                tracing::warn!("⚠️ WhatsApp state for '{instance}' failed: {e}");
                false
            }
        }
    }

    async fn send(&self, destination: &Destination, message: &OutgoingMessage) -> Result<String> {
        let instance = destination
            .instance
            .as_deref()
            .ok_or_else(|| BillNotifyError::Channel("WhatsApp destination has no instance".into()))?;

        let response = self
            .client
            .post(self.url(&format!("message/sendText/{instance}")))
            .header("apikey", &self.config.api_key)
            .json(&Self::send_text_body(&destination.address, &message.body))
            .send()
            .await
            .map_err(|e| BillNotifyError::Channel(format!("WhatsApp request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(BillNotifyError::Channel(format!("WhatsApp API error {status}: {error_text}")));
        }

        let result: SendTextResponse = response
            .json()
            .await
            .map_err(|e| BillNotifyError::Channel(format!("Invalid WhatsApp response: {e}")))?;

        tracing::debug!("WhatsApp message sent: {} → {}", result.key.id, destination.address);
        Ok(result.key.id)
    }
}
