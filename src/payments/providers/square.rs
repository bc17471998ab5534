//! Square payment provider implementation
//!
//! Charges go through `POST /v2/payments` with `autocomplete=true` and a fresh
//! idempotency key for every attempt.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use sha2::Sha256;
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

use super::http::ProviderHttp;
use crate::models::{CardDetails, Environment, ProviderKind, SquareCredentials};
use crate::payments::error::ProviderResult;
use crate::payments::traits::PaymentProvider;
use crate::payments::types::{
    ChargeRequest, ChargeResult, ChargeStatus, CustomerRequest, PaymentDetails, RefundRequest,
    RefundResult,
};

const SQUARE_VERSION: &str = "2024-01-18";
const REFERENCE_ID_MAX: usize = 40;

pub struct SquareProvider {
    access_token: SecretString,
    location_id: String,
    webhook_signature_key: Option<SecretString>,
    webhook_url: Option<String>,
    base_url: String,
    http: ProviderHttp,
}

impl SquareProvider {
    pub fn new(
        credentials: &SquareCredentials,
        environment: Environment,
        timeout: Duration,
    ) -> ProviderResult<Self> {
        let base_url = match environment {
            Environment::Sandbox => "https://connect.squareupsandbox.com",
            Environment::Production => "https://connect.squareup.com",
        };
        Ok(Self {
            access_token: SecretString::new(credentials.access_token.clone().into()),
            location_id: credentials.location_id.clone(),
            webhook_signature_key: credentials
                .webhook_signature_key
                .clone()
                .map(|k| SecretString::new(k.into())),
            webhook_url: credentials.webhook_url.clone(),
            base_url: base_url.to_string(),
            http: ProviderHttp::new("square", timeout)?,
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.http
            .client()
            .request(method, format!("{}{}", self.base_url, path))
            .bearer_auth(self.access_token.expose_secret())
            .header("Square-Version", SQUARE_VERSION)
    }
}

/// Square limits `reference_id` to 40 characters.
fn reference_id(reference: &str) -> String {
    reference.chars().take(REFERENCE_ID_MAX).collect()
}

#[async_trait]
impl PaymentProvider for SquareProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Square
    }

    async fn charge(&self, request: ChargeRequest) -> ProviderResult<ChargeResult> {
        info!(
            amount = request.minor_amount,
            currency = %request.currency,
            reference = %request.customer_reference_id,
            "Creating Square payment"
        );

        let mut payload = serde_json::json!({
            "idempotency_key": Uuid::new_v4().to_string(),
            "source_id": request.source_id,
            "amount_money": {
                "amount": request.minor_amount,
                "currency": request.currency,
            },
            "location_id": self.location_id,
            "autocomplete": true,
            "reference_id": reference_id(&request.customer_reference_id),
            "note": request.note,
            "buyer_email_address": request.buyer_email,
        });
        if let Some(customer_id) = request.customer_id {
            payload["customer_id"] = serde_json::Value::String(customer_id);
        }

        let response: SquarePaymentEnvelope = self
            .http
            .send_once(self.request(reqwest::Method::POST, "/v2/payments").json(&payload))
            .await?;
        let payment = response.payment;

        info!(
            payment_id = %payment.id,
            status = %payment.status,
            "Square payment created"
        );

        let mut result = ChargeResult::new(payment.id.clone(), ChargeStatus::parse(&payment.status));
        result.order_id = payment.order_id.clone();
        result.location_id = payment.location_id.clone().or_else(|| Some(self.location_id.clone()));
        result.receipt_url = payment.receipt_url.clone();
        result.card = payment.card();
        if result.status == ChargeStatus::Failed {
            result.failure_message = Some(format!("Square payment {}", payment.status));
        }
        Ok(result)
    }

    async fn refund(&self, request: RefundRequest) -> ProviderResult<RefundResult> {
        info!(
            payment_id = %request.external_payment_id,
            amount = request.minor_amount,
            "Refunding Square payment"
        );

        let mut payload = serde_json::json!({
            "idempotency_key": Uuid::new_v4().to_string(),
            "payment_id": request.external_payment_id,
            "amount_money": {
                "amount": request.minor_amount,
                "currency": request.currency,
            },
        });
        if let Some(reason) = request.reason {
            payload["reason"] = serde_json::Value::String(reason);
        }

        let response: SquareRefundEnvelope = self
            .http
            .send_once(self.request(reqwest::Method::POST, "/v2/refunds").json(&payload))
            .await?;

        Ok(RefundResult {
            refund_id: response.refund.id,
            status: response.refund.status,
            minor_amount: response
                .refund
                .amount_money
                .map(|m| m.amount)
                .unwrap_or(request.minor_amount),
        })
    }

    async fn fetch(&self, external_payment_id: &str) -> ProviderResult<PaymentDetails> {
        let response: SquarePaymentEnvelope = self
            .http
            .send_with_retry(self.request(
                reqwest::Method::GET,
                &format!("/v2/payments/{}", external_payment_id),
            ))
            .await?;
        let payment = response.payment;
        Ok(PaymentDetails {
            external_payment_id: payment.id.clone(),
            status: ChargeStatus::parse(&payment.status),
            raw_status: payment.status.clone(),
            minor_amount: payment.amount_money.as_ref().map(|m| m.amount),
            currency: payment.amount_money.as_ref().map(|m| m.currency.clone()),
            card: payment.card(),
            receipt_url: payment.receipt_url.clone(),
            order_id: payment.order_id.clone(),
        })
    }

    async fn create_customer(&self, request: CustomerRequest) -> ProviderResult<Option<String>> {
        let payload = serde_json::json!({
            "idempotency_key": Uuid::new_v4().to_string(),
            "given_name": request.given_name,
            "family_name": request.family_name,
            "email_address": request.email,
            "phone_number": request.phone,
            "reference_id": reference_id(&request.reference_id),
        });

        let response: SquareCustomerEnvelope = self
            .http
            .send_once(self.request(reqwest::Method::POST, "/v2/customers").json(&payload))
            .await?;

        info!(customer_id = %response.customer.id, "Square customer created");
        Ok(Some(response.customer.id))
    }

    /// `signature` is base64(HMAC-SHA256(key, notification_url + body)).
    fn verify_webhook(&self, payload: &[u8], signature: &str) -> bool {
        let (Some(key), Some(url)) = (&self.webhook_signature_key, &self.webhook_url) else {
            return false;
        };
        let Ok(expected) = STANDARD.decode(signature.trim()) else {
            return false;
        };
        notification_mac(key.expose_secret(), url, payload)
            .is_some_and(|mac| mac.verify_slice(&expected).is_ok())
    }
}

fn notification_mac(signature_key: &str, notification_url: &str, body: &[u8]) -> Option<Hmac<Sha256>> {
    let mut mac = Hmac::<Sha256>::new_from_slice(signature_key.as_bytes()).ok()?;
    mac.update(notification_url.as_bytes());
    mac.update(body);
    Some(mac)
}

/// Computes the header value Square would send for `body`.
pub fn square_signature(signature_key: &str, notification_url: &str, body: &[u8]) -> String {
    notification_mac(signature_key, notification_url, body)
        .map(|mac| STANDARD.encode(mac.finalize().into_bytes()))
        .unwrap_or_default()
}

#[derive(Debug, Deserialize)]
struct SquarePaymentEnvelope {
    payment: SquarePayment,
}

#[derive(Debug, Deserialize)]
struct SquarePayment {
    id: String,
    status: String,
    #[serde(default)]
    order_id: Option<String>,
    #[serde(default)]
    location_id: Option<String>,
    #[serde(default)]
    receipt_url: Option<String>,
    #[serde(default)]
    amount_money: Option<SquareMoney>,
    #[serde(default)]
    card_details: Option<SquareCardDetails>,
}

impl SquarePayment {
    fn card(&self) -> CardDetails {
        self.card_details
            .as_ref()
            .and_then(|d| d.card.as_ref())
            .map(|c| CardDetails {
                last4: c.last_4.clone(),
                brand: c.card_brand.clone(),
                exp_month: c.exp_month,
                exp_year: c.exp_year,
            })
            .unwrap_or_default()
    }
}

#[derive(Debug, Deserialize)]
struct SquareMoney {
    amount: i64,
    currency: String,
}

#[derive(Debug, Deserialize)]
struct SquareCardDetails {
    #[serde(default)]
    card: Option<SquareCard>,
}

#[derive(Debug, Deserialize)]
struct SquareCard {
    #[serde(default)]
    card_brand: Option<String>,
    #[serde(default)]
    last_4: Option<String>,
    #[serde(default)]
    exp_month: Option<u32>,
    #[serde(default)]
    exp_year: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct SquareRefundEnvelope {
    refund: SquareRefund,
}

#[derive(Debug, Deserialize)]
struct SquareRefund {
    id: String,
    status: String,
    #[serde(default)]
    amount_money: Option<SquareMoney>,
}

#[derive(Debug, Deserialize)]
struct SquareCustomerEnvelope {
    customer: SquareCustomer,
}

#[derive(Debug, Deserialize)]
struct SquareCustomer {
    id: String,
}
