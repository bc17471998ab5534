//! Clover ecommerce provider implementation
//!
//! A charge is two calls sharing one bearer token: create an order, then a
//! charge bound to that order.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

use super::http::ProviderHttp;
use crate::models::{CardDetails, CloverCredentials, Environment, ProviderKind};
use crate::payments::error::ProviderResult;
use crate::payments::traits::PaymentProvider;
use crate::payments::types::{
    ChargeRequest, ChargeResult, ChargeStatus, PaymentDetails, RefundRequest, RefundResult,
};

pub struct CloverProvider {
    access_token: SecretString,
    merchant_id: String,
    webhook_secret: Option<SecretString>,
    base_url: String,
    http: ProviderHttp,
}

impl CloverProvider {
    pub fn new(
        credentials: &CloverCredentials,
        environment: Environment,
        timeout: Duration,
    ) -> ProviderResult<Self> {
        let base_url = match environment {
            Environment::Sandbox => "https://scl-sandbox.dev.clover.com",
            Environment::Production => "https://scl.clover.com",
        };
        Ok(Self {
            access_token: SecretString::new(credentials.access_token.clone().into()),
            merchant_id: credentials.merchant_id.clone(),
            webhook_secret: credentials
                .webhook_secret
                .clone()
                .map(|s| SecretString::new(s.into())),
            base_url: base_url.to_string(),
            http: ProviderHttp::new("clover", timeout)?,
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
            .header("Idempotency-Key", Uuid::new_v4().to_string())
    }
}

/// Clover reports `paid`/`captured` flags beside its status string.
fn charge_status(charge: &CloverCharge) -> ChargeStatus {
    match (charge.paid, charge.captured, charge.status.as_deref()) {
        (_, _, Some(s)) if s.eq_ignore_ascii_case("failed") => ChargeStatus::Failed,
        (Some(true), Some(false), _) => ChargeStatus::Authorized,
        (Some(true), _, _) => ChargeStatus::Paid,
        (Some(false), _, _) => ChargeStatus::Failed,
        (None, _, Some(s)) if s.eq_ignore_ascii_case("succeeded") => ChargeStatus::Paid,
        (None, _, Some(s)) => ChargeStatus::parse(s),
        (None, _, None) => ChargeStatus::Pending,
    }
}

#[async_trait]
impl PaymentProvider for CloverProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Clover
    }

    async fn charge(&self, request: ChargeRequest) -> ProviderResult<ChargeResult> {
        info!(
            amount = request.minor_amount,
            merchant_id = %self.merchant_id,
            reference = %request.customer_reference_id,
            "Creating Clover order"
        );

        let order_payload = serde_json::json!({
            "currency": request.currency.to_lowercase(),
            "email": request.buyer_email,
            "items": [{
                "type": "sku",
                "amount": request.minor_amount,
                "currency": request.currency.to_lowercase(),
                "description": request.note,
                "quantity": 1,
            }],
            "metadata": { "reference": request.customer_reference_id },
        });
        let order: CloverOrder = self
            .http
            .send_once(self.request(reqwest::Method::POST, "/v1/orders").json(&order_payload))
            .await?;

        info!(order_id = %order.id, "Clover order created, charging");

        let charge_payload = serde_json::json!({
            "amount": request.minor_amount,
            "currency": request.currency.to_lowercase(),
            "source": request.source_id,
            "description": request.note,
            "receipt_email": request.buyer_email,
            "ecomind": "ecom",
            "metadata": {
                "order_id": order.id,
                "reference": request.customer_reference_id,
            },
        });
        let charge: CloverCharge = self
            .http
            .send_once(self.request(reqwest::Method::POST, "/v1/charges").json(&charge_payload))
            .await?;

        let status = charge_status(&charge);
        info!(charge_id = %charge.id, status = ?status, "Clover charge created");

        let mut result = ChargeResult::new(charge.id.clone(), status);
        result.order_id = charge.order.clone().or(Some(order.id));
        result.merchant_id = Some(self.merchant_id.clone());
        result.receipt_url = charge.receipt_url.clone();
        result.card = charge.card();
        if status == ChargeStatus::Failed {
            result.failure_message = charge
                .failure_message
                .clone()
                .or_else(|| Some("Clover declined the charge".to_string()));
        }
        Ok(result)
    }

    async fn refund(&self, request: RefundRequest) -> ProviderResult<RefundResult> {
        info!(
            charge_id = %request.external_payment_id,
            amount = request.minor_amount,
            "Refunding Clover charge"
        );

        let mut payload = serde_json::json!({
            "charge": request.external_payment_id,
            "amount": request.minor_amount,
        });
        if let Some(reason) = request.reason {
            payload["reason"] = serde_json::Value::String(reason);
        }

        let refund: CloverRefund = self
            .http
            .send_once(self.request(reqwest::Method::POST, "/v1/refunds").json(&payload))
            .await?;

        Ok(RefundResult {
            refund_id: refund.id,
            status: refund.status.unwrap_or_else(|| "COMPLETED".to_string()),
            minor_amount: refund.amount.unwrap_or(request.minor_amount),
        })
    }

    async fn fetch(&self, external_payment_id: &str) -> ProviderResult<PaymentDetails> {
        let charge: CloverCharge = self
            .http
            .send_with_retry(self.request(
                reqwest::Method::GET,
                &format!("/v1/charges/{}", external_payment_id),
            ))
            .await?;
        let status = charge_status(&charge);
        Ok(PaymentDetails {
            external_payment_id: charge.id.clone(),
            status,
            raw_status: charge.status.clone().unwrap_or_else(|| format!("{:?}", status)),
            minor_amount: charge.amount,
            currency: charge.currency.clone(),
            card: charge.card(),
            receipt_url: charge.receipt_url.clone(),
            order_id: charge.order.clone(),
        })
    }

    /// Clover sends the shared secret verbatim in `x-clover-auth`.
    fn verify_webhook(&self, _payload: &[u8], signature: &str) -> bool {
        let Some(secret) = &self.webhook_secret else {
            return false;
        };
        let expected = secret.expose_secret().as_bytes();
        let provided = signature.trim().as_bytes();
        expected.len() == provided.len()
            && expected
                .iter()
                .zip(provided.iter())
                .fold(0, |acc, (a, b)| acc | (a ^ b))
                == 0
    }
}

#[derive(Debug, Deserialize)]
struct CloverOrder {
    id: String,
}

#[derive(Debug, Deserialize)]
struct CloverCharge {
    id: String,
    #[serde(default)]
    amount: Option<i64>,
    #[serde(default)]
    currency: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    paid: Option<bool>,
    #[serde(default)]
    captured: Option<bool>,
    #[serde(default)]
    order: Option<String>,
    #[serde(default)]
    receipt_url: Option<String>,
    #[serde(default)]
    failure_message: Option<String>,
    #[serde(default)]
    source: Option<CloverSource>,
}

impl CloverCharge {
    fn card(&self) -> CardDetails {
        self.source
            .as_ref()
            .map(|s| CardDetails {
                last4: s.last4.clone(),
                brand: s.brand.clone(),
                exp_month: s.exp_month.as_deref().and_then(|m| m.parse().ok()),
                exp_year: s.exp_year.as_deref().and_then(|y| y.parse().ok()),
            })
            .unwrap_or_default()
    }
}

#[derive(Debug, Deserialize)]
struct CloverSource {
    #[serde(default)]
    brand: Option<String>,
    #[serde(default)]
    last4: Option<String>,
    #[serde(default)]
    exp_month: Option<String>,
    #[serde(default)]
    exp_year: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CloverRefund {
    id: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    amount: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn charge(json: &str) -> CloverCharge {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_charge_status_mapping() {
        assert_eq!(
            charge_status(&charge(r#"{"id":"c1","paid":true,"captured":true,"status":"succeeded"}"#)),
            ChargeStatus::Paid
        );
        assert_eq!(
            charge_status(&charge(r#"{"id":"c2","paid":true,"captured":false}"#)),
            ChargeStatus::Authorized
        );
        assert_eq!(
            charge_status(&charge(r#"{"id":"c3","paid":false,"status":"failed"}"#)),
            ChargeStatus::Failed
        );
    }

    #[test]
    fn test_card_from_source() {
        let c = charge(
            r#"{"id":"c1","order":"ORD1","source":{"brand":"MC","last4":"4444","exp_month":"09","exp_year":"2029"}}"#,
        );
        let card = c.card();
        assert_eq!(card.last4.as_deref(), Some("4444"));
        assert_eq!(card.exp_month, Some(9));
        assert_eq!(c.order.as_deref(), Some("ORD1"));
    }

    #[test]
    fn test_webhook_secret_comparison() {
        let credentials = CloverCredentials {
            access_token: "tok".into(),
            merchant_id: "MID".into(),
            public_key: None,
            webhook_secret: Some("shh".into()),
        };
        let p = CloverProvider::new(&credentials, Environment::Sandbox, Duration::from_secs(5)).unwrap();
        assert!(p.verify_webhook(b"{}", "shh"));
        assert!(!p.verify_webhook(b"{}", "shh2"));
        assert!(!p.verify_webhook(b"{}", ""));
    }

    fn provider(server: &MockServer) -> CloverProvider {
        let credentials = CloverCredentials {
            access_token: "cl-token".into(),
            merchant_id: "MID".into(),
            public_key: None,
            webhook_secret: None,
        };
        CloverProvider::new(&credentials, Environment::Sandbox, Duration::from_secs(5))
            .unwrap()
            .with_base_url(server.uri())
    }

    fn charge_request() -> ChargeRequest {
        ChargeRequest {
            source_id: "clv_tok".into(),
            minor_amount: 5000,
            currency: "USD".into(),
            customer_reference_id: "parent:abc".into(),
            note: "Tryout payment for 1 player(s)".into(),
            buyer_email: "pat@example.com".into(),
            customer_id: None,
        }
    }

    async fn mount_order(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/v1/orders"))
            .and(header("Authorization", "Bearer cl-token"))
            .and(body_partial_json(json!({"currency": "usd", "email": "pat@example.com"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "ORD1"})))
            .expect(1)
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_order_then_charge_carries_order_id() {
        let server = MockServer::start().await;
        mount_order(&server).await;
        Mock::given(method("POST"))
            .and(path("/v1/charges"))
            .and(body_partial_json(json!({
                "amount": 5000,
                "source": "clv_tok",
                "metadata": {"order_id": "ORD1"}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "CH1",
                "amount": 5000,
                "paid": true,
                "captured": true,
                "status": "succeeded",
                "source": {"brand": "VISA", "last4": "4242", "exp_month": "09", "exp_year": "2029"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let result = provider(&server).charge(charge_request()).await.unwrap();
        assert_eq!(result.external_payment_id, "CH1");
        assert_eq!(result.status, ChargeStatus::Paid);
        assert_eq!(result.order_id.as_deref(), Some("ORD1"));
        assert_eq!(result.merchant_id.as_deref(), Some("MID"));
        assert_eq!(result.card.last4.as_deref(), Some("4242"));
    }

    #[tokio::test]
    async fn test_declined_charge() {
        let server = MockServer::start().await;
        mount_order(&server).await;
        Mock::given(method("POST"))
            .and(path("/v1/charges"))
            .respond_with(ResponseTemplate::new(402).set_body_json(json!({
                "error": {"type": "card_error", "code": "card_declined", "message": "Card was declined"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let err = provider(&server).charge(charge_request()).await.unwrap_err();
        assert!(err.declined);
        assert!(!err.retryable);
        assert_eq!(err.message, "Card was declined");
    }

    #[tokio::test]
    async fn test_unpaid_charge_is_failed_result() {
        let server = MockServer::start().await;
        mount_order(&server).await;
        Mock::given(method("POST"))
            .and(path("/v1/charges"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "CH2",
                "paid": false,
                "status": "failed",
                "failure_message": "insufficient funds"
            })))
            .mount(&server)
            .await;

        let result = provider(&server).charge(charge_request()).await.unwrap();
        assert_eq!(result.status, ChargeStatus::Failed);
        assert_eq!(result.failure_message.as_deref(), Some("insufficient funds"));
    }

    #[tokio::test]
    async fn test_refund_success_and_server_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/refunds"))
            .and(body_partial_json(json!({"charge": "CH1", "amount": 2000})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "RF1",
                "status": "succeeded",
                "amount": 2000
            })))
            .expect(1)
            .mount(&server)
            .await;

        let p = provider(&server);
        let refund = p
            .refund(RefundRequest {
                external_payment_id: "CH1".into(),
                minor_amount: 2000,
                currency: "USD".into(),
                reason: None,
            })
            .await
            .unwrap();
        assert_eq!(refund.refund_id, "RF1");
        assert_eq!(refund.minor_amount, 2000);

        server.reset().await;
        Mock::given(method("POST"))
            .and(path("/v1/refunds"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .expect(1)
            .mount(&server)
            .await;
        let err = p
            .refund(RefundRequest {
                external_payment_id: "CH1".into(),
                minor_amount: 2000,
                currency: "USD".into(),
                reason: None,
            })
            .await
            .unwrap_err();
        assert!(err.retryable);
        assert_eq!(err.status, Some(500));
    }
}
