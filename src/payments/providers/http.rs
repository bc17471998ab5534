//! HTTP plumbing shared by the processor adapters.

use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;
use tracing::{error, warn};

use crate::payments::error::{ProviderError, ProviderResult};

pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
const MAX_RETRIES: u32 = 3;
const BACKOFF_BASE_MS: u64 = 250;

/// A processor's HTTP client plus its retry policy.
#[derive(Debug, Clone)]
pub struct ProviderHttp {
    provider: &'static str,
    client: Client,
    max_retries: u32,
}

impl ProviderHttp {
    pub fn new(provider: &'static str, timeout: Duration) -> ProviderResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::transport(provider, format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            provider,
            client,
            max_retries: MAX_RETRIES,
        })
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Sends a request exactly once. Charges and refunds go through here.
    pub async fn send_once<T: DeserializeOwned>(&self, request: RequestBuilder) -> ProviderResult<T> {
        let response = request.send().await.map_err(|e| {
            error!(provider = self.provider, error = %e, "Processor request failed");
            ProviderError::transport(self.provider, e.to_string())
        })?;
        self.read(response).await
    }

    /// Sends an idempotent request, retrying transport failures and server
    /// errors with exponential backoff.
    pub async fn send_with_retry<T: DeserializeOwned>(&self, request: RequestBuilder) -> ProviderResult<T> {
        let mut last_error = None;
        for attempt in 0..=self.max_retries {
            let Some(req) = request.try_clone() else {
                return Err(ProviderError::transport(self.provider, "Failed to clone request"));
            };

            match req.send().await {
                Ok(response) => match self.read(response).await {
                    Ok(value) => return Ok(value),
                    Err(e) if e.retryable && attempt < self.max_retries => {
                        let backoff = backoff(attempt);
                        warn!(
                            provider = self.provider,
                            status = ?e.status,
                            attempt = attempt + 1,
                            "Processor error, retrying after {:?}", backoff
                        );
                        tokio::time::sleep(backoff).await;
                        last_error = Some(e);
                    }
                    Err(e) => return Err(e),
                },
                Err(e) => {
                    let e = ProviderError::transport(self.provider, e.to_string());
                    if attempt < self.max_retries {
                        let backoff = backoff(attempt);
                        warn!(
                            provider = self.provider,
                            attempt = attempt + 1,
                            error = %e.message,
                            "Request error, retrying after {:?}", backoff
                        );
                        tokio::time::sleep(backoff).await;
                    }
                    last_error = Some(e);
                }
            }
        }

        let last = last_error
            .map(|e| e.message)
            .unwrap_or_else(|| "Unknown error".to_string());
        Err(ProviderError::transport(
            self.provider,
            format!("Request failed after {} retries: {}", self.max_retries, last),
        ))
    }

    async fn read<T: DeserializeOwned>(&self, response: reqwest::Response) -> ProviderResult<T> {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        if status.is_success() {
            return serde_json::from_str::<T>(&body).map_err(|e| {
                error!(provider = self.provider, error = %e, "Failed to parse processor response");
                ProviderError::invalid_response(self.provider, e.to_string())
            });
        }

        let err = classify_failure(self.provider, status, &body);
        error!(
            provider = self.provider,
            status = status.as_u16(),
            retryable = err.retryable,
            declined = err.declined,
            message = %err.message,
            "Processor returned an error"
        );
        Err(err)
    }
}

fn backoff(attempt: u32) -> Duration {
    Duration::from_millis(BACKOFF_BASE_MS * 2_u64.pow(attempt))
}

/// Builds a `ProviderError` from a non-2xx body, recognising the error shapes
/// of Square (`errors[]`), Stripe (`error{}`), Clover and PayPal.
pub fn classify_failure(provider: &str, status: StatusCode, body: &str) -> ProviderError {
    let parsed: Value = serde_json::from_str(body).unwrap_or(Value::Null);
    let (message, card_error) = extract_error(&parsed);
    let message = message.unwrap_or_else(|| format!("HTTP {}: {}", status, body));

    let err = ProviderError::http(provider, status.as_u16(), message);
    if card_error {
        err.mark_declined()
    } else {
        err
    }
}

fn extract_error(body: &Value) -> (Option<String>, bool) {
    // Square
    if let Some(first) = body.get("errors").and_then(|e| e.as_array()).and_then(|a| a.first()) {
        let code = first.get("code").and_then(Value::as_str).unwrap_or_default();
        let category = first.get("category").and_then(Value::as_str).unwrap_or_default();
        let detail = first.get("detail").and_then(Value::as_str).unwrap_or(code);
        let card = category == "PAYMENT_METHOD_ERROR" || code.contains("DECLINED") || code.contains("CVV");
        return (Some(format!("{}: {}", code, detail)), card);
    }

    // Stripe, Clover
    if let Some(error) = body.get("error").filter(|e| e.is_object()) {
        let message = error.get("message").and_then(Value::as_str).map(str::to_string);
        let kind = error.get("type").and_then(Value::as_str).unwrap_or_default();
        let code = error.get("code").and_then(Value::as_str).unwrap_or_default();
        let card = kind == "card_error" || code.contains("declined");
        return (message, card);
    }

    // PayPal
    if let Some(details) = body.get("details").and_then(|d| d.as_array()) {
        let issue = details
            .first()
            .and_then(|d| d.get("issue"))
            .and_then(Value::as_str)
            .unwrap_or_default();
        let description = details
            .first()
            .and_then(|d| d.get("description"))
            .and_then(Value::as_str)
            .or_else(|| body.get("message").and_then(Value::as_str));
        let card = issue.contains("DECLINED") || issue == "TRANSACTION_REFUSED";
        return (description.map(|d| format!("{}: {}", issue, d)), card);
    }

    let message = body
        .get("message")
        .and_then(Value::as_str)
        .map(str::to_string);
    (message, false)
}

/// `application/x-www-form-urlencoded` body from ordered pairs.
pub fn form_body<'a>(pairs: impl IntoIterator<Item = (&'a str, String)>) -> String {
    let mut serializer = url::form_urlencoded::Serializer::new(String::new());
    for (key, value) in pairs {
        serializer.append_pair(key, &value);
    }
    serializer.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_square_decline_is_classified() {
        let body = r#"{"errors":[{"category":"PAYMENT_METHOD_ERROR","code":"GENERIC_DECLINE","detail":"Card declined."}]}"#;
        let err = classify_failure("square", StatusCode::BAD_REQUEST, body);
        assert!(err.declined);
        assert!(!err.retryable);
        assert_eq!(err.message, "GENERIC_DECLINE: Card declined.");
    }

    #[test]
    fn test_stripe_card_error_is_declined() {
        let body = r#"{"error":{"type":"card_error","code":"card_declined","message":"Your card was declined."}}"#;
        let err = classify_failure("stripe", StatusCode::PAYMENT_REQUIRED, body);
        assert!(err.declined);
        assert_eq!(err.message, "Your card was declined.");
    }

    #[test]
    fn test_server_error_is_retryable() {
        let err = classify_failure("clover", StatusCode::BAD_GATEWAY, "upstream");
        assert!(err.retryable);
        assert!(!err.declined);
        assert_eq!(err.message, "HTTP 502 Bad Gateway: upstream");
    }

    #[test]
    fn test_paypal_instrument_declined() {
        let body = r#"{"name":"UNPROCESSABLE_ENTITY","message":"The requested action could not be performed","details":[{"issue":"INSTRUMENT_DECLINED","description":"The instrument presented was declined."}]}"#;
        let err = classify_failure("paypal", StatusCode::UNPROCESSABLE_ENTITY, body);
        assert!(err.declined);
    }

    #[test]
    fn test_form_body_encoding() {
        let body = form_body([
            ("amount", "5000".to_string()),
            ("expand[]", "latest_charge".to_string()),
            ("description", "Tryout payment for 1 player(s)".to_string()),
        ]);
        assert_eq!(
            body,
            "amount=5000&expand%5B%5D=latest_charge&description=Tryout+payment+for+1+player%28s%29"
        );
    }
}
