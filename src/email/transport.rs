//! Mail transports.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

use crate::email::error::{MailError, MailResult};

const RESEND_ENDPOINT: &str = "https://api.resend.com/emails";

/// A fully rendered message ready for delivery.
#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingEmail {
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
    pub html: String,
    pub attachments: Vec<ResolvedAttachment>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedAttachment {
    pub filename: String,
    pub content: Vec<u8>,
}

#[async_trait]
pub trait MailTransport: Send + Sync {
    /// Deliver one message and return the provider's message id.
    async fn deliver(&self, email: &OutgoingEmail) -> MailResult<String>;
}

/// Sends through the Resend HTTP API.
pub struct ResendTransport {
    client: Client,
    api_key: SecretString,
    endpoint: String,
}

impl ResendTransport {
    pub fn new(api_key: SecretString, timeout: Duration) -> MailResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| MailError::Network(e.to_string()))?;
        Ok(Self {
            client,
            api_key,
            endpoint: RESEND_ENDPOINT.to_string(),
        })
    }

    /// Point at another endpoint (tests).
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

#[derive(Debug, Serialize)]
struct ResendPayload<'a> {
    from: &'a str,
    to: &'a [String],
    subject: &'a str,
    html: &'a str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    attachments: Vec<ResendAttachment<'a>>,
}

#[derive(Debug, Serialize)]
struct ResendAttachment<'a> {
    filename: &'a str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ResendResponse {
    id: String,
}

impl<'a> ResendPayload<'a> {
    fn from_email(email: &'a OutgoingEmail) -> Self {
        Self {
            from: &email.from,
            to: &email.to,
            subject: &email.subject,
            html: &email.html,
            attachments: email
                .attachments
                .iter()
                .map(|a| ResendAttachment {
                    filename: &a.filename,
                    content: STANDARD.encode(&a.content),
                })
                .collect(),
        }
    }
}

#[async_trait]
impl MailTransport for ResendTransport {
    async fn deliver(&self, email: &OutgoingEmail) -> MailResult<String> {
        if email.to.is_empty() {
            return Err(MailError::NoRecipient);
        }
        debug!(to = ?email.to, subject = %email.subject, "Sending email via Resend");

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(self.api_key.expose_secret())
            .json(&ResendPayload::from_email(email))
            .send()
            .await
            .map_err(|e| MailError::Network(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            let body: ResendResponse = response
                .json()
                .await
                .map_err(|e| MailError::Network(e.to_string()))?;
            Ok(body.id)
        } else if status.as_u16() == 429 {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok())
                .unwrap_or(60);
            Err(MailError::RateLimited(retry_after))
        } else {
            let message = response.text().await.unwrap_or_default();
            Err(MailError::Provider {
                status: status.as_u16(),
                message,
            })
        }
    }
}

/// Logs messages instead of sending them; used when no mail API key is set.
#[derive(Debug, Default, Clone)]
pub struct LogTransport;

#[async_trait]
impl MailTransport for LogTransport {
    async fn deliver(&self, email: &OutgoingEmail) -> MailResult<String> {
        if email.to.is_empty() {
            return Err(MailError::NoRecipient);
        }
        info!(
            to = ?email.to,
            subject = %email.subject,
            attachments = email.attachments.len(),
            "Mail API key not configured; email logged and dropped"
        );
        Ok(format!("log-{}", uuid::Uuid::new_v4().simple()))
    }
}
