//! Delivery channels for alerts

use std::time::Duration;

use async_trait::async_trait;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use super::model::AlertPayload;

/// A single outbound transport
#[async_trait]
pub trait AlertChannel: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &str;

    async fn send(&self, payload: &AlertPayload) -> Result<(), NotifierError>;
}

/// Delivery capability used by the runner. Never fails: errors mean "not delivered".
#[async_trait]
pub trait AlertSender: Send + Sync {
    async fn send(&self, payload: &AlertPayload) -> bool;
}

/// Chat webhook channel posting header/section/context blocks
pub struct WebhookChannel {
    client: reqwest::Client,
    url: String,
}

impl WebhookChannel {
    pub fn new(url: impl Into<String>) -> Result<Self, NotifierError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| NotifierError::Webhook(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    fn render(payload: &AlertPayload) -> serde_json::Value {
        let text = [payload.body.clone(), payload.links.join("\n")]
            .into_iter()
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join("\n\n");

        let mut blocks = vec![
            serde_json::json!({
                "type": "header",
                "text": {"type": "plain_text", "text": payload.title, "emoji": true},
            }),
            serde_json::json!({
                "type": "section",
                "text": {"type": "mrkdwn", "text": text},
            }),
        ];
        if !payload.tags.is_empty() {
            let tags = payload
                .tags
                .iter()
                .map(|tag| format!("`{}`", tag))
                .collect::<Vec<_>>()
                .join(" ");
            blocks.push(serde_json::json!({
                "type": "context",
                "elements": [{"type": "mrkdwn", "text": tags}],
            }));
        }

        serde_json::json!({
            "text": format!("{}\n{}", payload.title, text),
            "blocks": blocks,
        })
    }
}

#[async_trait]
impl AlertChannel for WebhookChannel {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn send(&self, payload: &AlertPayload) -> Result<(), NotifierError> {
        let response = self
            .client
            .post(&self.url)
            .json(&Self::render(payload))
            .send()
            .await
            .map_err(|e| NotifierError::Webhook(format!("Failed to send webhook: {}", e)))?;

        if !response.status().is_success() {
            return Err(NotifierError::Webhook(format!(
                "Webhook returned status {}",
                response.status()
            )));
        }

        tracing::debug!(alert_id = %payload.alert_id, "Webhook notification sent");
        Ok(())
    }
}

/// SMTP settings for the email channel
#[derive(Debug, Clone)]
pub struct EmailConfig {
    pub smtp_host: String,
    pub smtp_port: u16,
    pub username: String,
    pub password: String,
    pub from: String,
    pub recipients: Vec<String>,
}

/// Email channel over implicit-TLS SMTP
pub struct EmailChannel {
    config: EmailConfig,
}

impl EmailChannel {
    pub fn new(config: EmailConfig) -> Self {
        Self { config }
    }

    fn build_message(&self, payload: &AlertPayload) -> Result<Message, NotifierError> {
        let from: Mailbox = self
            .config
            .from
            .parse()
            .map_err(|e| NotifierError::Email(format!("Invalid from address: {}", e)))?;

        let mut builder = Message::builder()
            .from(from)
            .subject(format!("[watchpost] {}: {}", payload.level, payload.title));
        for recipient in &self.config.recipients {
            let to: Mailbox = recipient
                .parse()
                .map_err(|e| NotifierError::Email(format!("Invalid recipient {}: {}", recipient, e)))?;
            builder = builder.to(to);
        }

        let mut body = payload.body.clone();
        if !payload.links.is_empty() {
            body.push_str("\n\n");
            body.push_str(&payload.links.join("\n"));
        }

        builder
            .body(body)
            .map_err(|e| NotifierError::Email(format!("Failed to build email message: {}", e)))
    }
}

#[async_trait]
impl AlertChannel for EmailChannel {
    fn name(&self) -> &str {
        "email"
    }

    async fn send(&self, payload: &AlertPayload) -> Result<(), NotifierError> {
        let message = self.build_message(payload)?;

        let credentials = Credentials::new(self.config.username.clone(), self.config.password.clone());
        let mailer: AsyncSmtpTransport<Tokio1Executor> =
            AsyncSmtpTransport::<Tokio1Executor>::relay(&self.config.smtp_host)
                .map_err(|e| NotifierError::Email(format!("Failed to create SMTP transport: {}", e)))?
                .port(self.config.smtp_port)
                .credentials(credentials)
                .timeout(Some(Duration::from_secs(15)))
                .build();

        mailer
            .send(message)
            .await
            .map_err(|e| NotifierError::Email(format!("Failed to send email via SMTP: {}", e)))?;

        tracing::debug!(
            alert_id = %payload.alert_id,
            recipients = self.config.recipients.len(),
            "Email notification sent"
        );
        Ok(())
    }
}

/// Primary channel first, fallback channel second, each tried once
pub struct FallbackSender {
    primary: Box<dyn AlertChannel>,
    fallback: Option<Box<dyn AlertChannel>>,
}

impl FallbackSender {
    pub fn new(primary: Box<dyn AlertChannel>, fallback: Option<Box<dyn AlertChannel>>) -> Self {
        Self { primary, fallback }
    }
}

#[async_trait]
impl AlertSender for FallbackSender {
    async fn send(&self, payload: &AlertPayload) -> bool {
        match self.primary.send(payload).await {
            Ok(()) => return true,
            Err(e) => tracing::warn!(
                alert_id = %payload.alert_id,
                channel = self.primary.name(),
                error = %e,
                "Alert channel failed"
            ),
        }

        let Some(fallback) = &self.fallback else {
            return false;
        };

        match fallback.send(payload).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(
                    alert_id = %payload.alert_id,
                    channel = fallback.name(),
                    error = %e,
                    "Fallback channel failed"
                );
                false
            }
        }
    }
}

/// Notifier errors
#[derive(Debug, thiserror::Error)]
pub enum NotifierError {
    #[error("Webhook error: {0}")]
    Webhook(String),

    #[error("Email error: {0}")]
    Email(String),
}
