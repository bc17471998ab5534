//! PayPal provider implementation
//!
//! A charge creates an order with `intent=CAPTURE` and captures it; the
//! capture id is what the rest of the system knows as the external payment id.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use super::http::{form_body, ProviderHttp};
use crate::models::{CardDetails, Environment, PayPalCredentials, ProviderKind};
use crate::payments::allocation::to_major;
use crate::payments::error::{ProviderError, ProviderResult};
use crate::payments::traits::PaymentProvider;
use crate::payments::types::{
    ChargeRequest, ChargeResult, ChargeStatus, PaymentDetails, RefundRequest, RefundResult,
};

/// Tokens are refreshed this long before PayPal says they expire.
const TOKEN_REFRESH_MARGIN_SECS: i64 = 60;

pub struct PayPalProvider {
    client_id: String,
    client_secret: SecretString,
    base_url: String,
    http: ProviderHttp,
    access_token: RwLock<Option<PayPalToken>>,
}

#[derive(Debug, Clone)]
struct PayPalToken {
    token: String,
    expires_at: DateTime<Utc>,
}

impl PayPalProvider {
    pub fn new(
        credentials: &PayPalCredentials,
        environment: Environment,
        timeout: Duration,
    ) -> ProviderResult<Self> {
        let base_url = match environment {
            Environment::Sandbox => "https://api-m.sandbox.paypal.com",
            Environment::Production => "https://api-m.paypal.com",
        };
        Ok(Self {
            client_id: credentials.client_id.clone(),
            client_secret: SecretString::new(credentials.client_secret.clone().into()),
            base_url: base_url.to_string(),
            http: ProviderHttp::new("paypal", timeout)?,
            access_token: RwLock::new(None),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Cached OAuth token, refreshed shortly before expiry.
    async fn token(&self) -> ProviderResult<String> {
        {
            let cached = self.access_token.read().await;
            if let Some(t) = cached.as_ref() {
                if t.expires_at > Utc::now() {
                    return Ok(t.token.clone());
                }
            }
        }

        let mut slot = self.access_token.write().await;
        if let Some(t) = slot.as_ref() {
            if t.expires_at > Utc::now() {
                return Ok(t.token.clone());
            }
        }

        debug!("Requesting PayPal access token");
        let credentials = STANDARD.encode(format!(
            "{}:{}",
            self.client_id,
            self.client_secret.expose_secret()
        ));
        let request = self
            .http
            .client()
            .post(format!("{}/v1/oauth2/token", self.base_url))
            .header(reqwest::header::AUTHORIZATION, format!("Basic {}", credentials))
            .header(reqwest::header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(form_body([("grant_type", "client_credentials".to_string())]));
        let response: PayPalTokenResponse = self.http.send_with_retry(request).await?;

        let lifetime = (response.expires_in - TOKEN_REFRESH_MARGIN_SECS).max(0);
        *slot = Some(PayPalToken {
            token: response.access_token.clone(),
            expires_at: Utc::now() + chrono::Duration::seconds(lifetime),
        });
        Ok(response.access_token)
    }

    async fn request(&self, method: reqwest::Method, path: &str) -> ProviderResult<reqwest::RequestBuilder> {
        let token = self.token().await?;
        Ok(self
            .http
            .client()
            .request(method, format!("{}{}", self.base_url, path))
            .bearer_auth(token)
            .header("PayPal-Request-Id", Uuid::new_v4().to_string()))
    }
}

/// The client SDK's card fields hand us a one-time token.
fn card_source(source_id: &str) -> serde_json::Value {
    serde_json::json!({
        "card": { "single_use_token": source_id },
    })
}

fn amount_value(minor: i64) -> String {
    to_major(minor).to_string()
}

fn parse_minor(value: &str) -> Option<i64> {
    value
        .parse::<rust_decimal::Decimal>()
        .ok()
        .map(crate::payments::allocation::to_minor)
}

#[async_trait]
impl PaymentProvider for PayPalProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::PayPal
    }

    async fn charge(&self, request: ChargeRequest) -> ProviderResult<ChargeResult> {
        info!(
            amount = request.minor_amount,
            currency = %request.currency,
            reference = %request.customer_reference_id,
            "Creating PayPal order"
        );

        let order_payload = serde_json::json!({
            "intent": "CAPTURE",
            "purchase_units": [{
                "reference_id": request.customer_reference_id,
                "description": request.note,
                "amount": {
                    "currency_code": request.currency,
                    "value": amount_value(request.minor_amount),
                },
            }],
            "payment_source": card_source(&request.source_id),
        });
        let order: PayPalOrder = self
            .http
            .send_once(
                self.request(reqwest::Method::POST, "/v2/checkout/orders")
                    .await?
                    .json(&order_payload),
            )
            .await?;

        // Card orders are usually captured at creation.
        let captured = if order.first_capture().is_some() {
            info!(order_id = %order.id, status = %order.status, "PayPal order created and captured");
            order
        } else {
            info!(order_id = %order.id, status = %order.status, "PayPal order created, capturing");
            self.http
                .send_once::<PayPalOrder>(
                    self.request(
                        reqwest::Method::POST,
                        &format!("/v2/checkout/orders/{}/capture", order.id),
                    )
                    .await?
                    .header(reqwest::header::CONTENT_TYPE, "application/json")
                    .body("{}"),
                )
                .await?
        };
        let order_id = captured.id.clone();

        let capture = captured.first_capture().ok_or_else(|| {
            ProviderError::invalid_response("paypal", format!("order {} has no capture", order_id))
        })?;

        let status = ChargeStatus::parse(&capture.status);
        info!(capture_id = %capture.id, status = %capture.status, "PayPal order captured");

        let mut result = ChargeResult::new(capture.id.clone(), status);
        result.order_id = Some(order_id);
        result.card = captured.card();
        if status == ChargeStatus::Failed {
            result.failure_message = Some(format!("PayPal capture {}", capture.status));
        }
        Ok(result)
    }

    async fn refund(&self, request: RefundRequest) -> ProviderResult<RefundResult> {
        info!(
            capture_id = %request.external_payment_id,
            amount = request.minor_amount,
            "Refunding PayPal capture"
        );

        let mut payload = serde_json::json!({
            "amount": {
                "currency_code": request.currency,
                "value": amount_value(request.minor_amount),
            },
        });
        if let Some(reason) = request.reason {
            payload["note_to_payer"] = serde_json::Value::String(reason);
        }

        let refund: PayPalRefund = self
            .http
            .send_once(
                self.request(
                    reqwest::Method::POST,
                    &format!("/v2/payments/captures/{}/refund", request.external_payment_id),
                )
                .await?
                .json(&payload),
            )
            .await?;

        Ok(RefundResult {
            refund_id: refund.id,
            status: refund.status,
            minor_amount: request.minor_amount,
        })
    }

    async fn fetch(&self, external_payment_id: &str) -> ProviderResult<PaymentDetails> {
        let capture: PayPalCapture = self
            .http
            .send_with_retry(
                self.request(
                    reqwest::Method::GET,
                    &format!("/v2/payments/captures/{}", external_payment_id),
                )
                .await?,
            )
            .await?;
        Ok(PaymentDetails {
            external_payment_id: capture.id.clone(),
            status: ChargeStatus::parse(&capture.status),
            raw_status: capture.status.clone(),
            minor_amount: capture.amount.as_ref().and_then(|a| parse_minor(&a.value)),
            currency: capture.amount.as_ref().map(|a| a.currency_code.clone()),
            card: CardDetails::default(),
            receipt_url: None,
            order_id: None,
        })
    }
}

#[derive(Debug, Deserialize)]
struct PayPalTokenResponse {
    access_token: String,
    expires_in: i64,
}

#[derive(Debug, Deserialize)]
struct PayPalOrder {
    id: String,
    status: String,
    #[serde(default)]
    purchase_units: Vec<PayPalPurchaseUnit>,
    #[serde(default)]
    payment_source: Option<PayPalPaymentSource>,
}

impl PayPalOrder {
    fn first_capture(&self) -> Option<&PayPalCapture> {
        self.purchase_units
            .iter()
            .filter_map(|u| u.payments.as_ref())
            .flat_map(|p| p.captures.iter())
            .next()
    }

    fn card(&self) -> CardDetails {
        self.payment_source
            .as_ref()
            .and_then(|s| s.card.as_ref())
            .map(|c| CardDetails {
                last4: c.last_digits.clone(),
                brand: c.brand.clone(),
                exp_month: None,
                exp_year: None,
            })
            .unwrap_or_default()
    }
}

#[derive(Debug, Deserialize)]
struct PayPalPurchaseUnit {
    #[serde(default)]
    payments: Option<PayPalPayments>,
}

#[derive(Debug, Deserialize)]
struct PayPalPayments {
    #[serde(default)]
    captures: Vec<PayPalCapture>,
}

#[derive(Debug, Deserialize)]
struct PayPalCapture {
    id: String,
    status: String,
    #[serde(default)]
    amount: Option<PayPalAmount>,
}

#[derive(Debug, Deserialize)]
struct PayPalAmount {
    currency_code: String,
    value: String,
}

#[derive(Debug, Deserialize)]
struct PayPalPaymentSource {
    #[serde(default)]
    card: Option<PayPalCard>,
}

#[derive(Debug, Deserialize)]
struct PayPalCard {
    #[serde(default)]
    last_digits: Option<String>,
    #[serde(default)]
    brand: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PayPalRefund {
    id: String,
    status: String,
}
