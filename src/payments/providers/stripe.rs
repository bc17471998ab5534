//! Stripe provider implementation over the PaymentIntents API.

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use sha2::Sha256;
use std::collections::HashMap;
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

use super::http::{form_body, ProviderHttp};
use crate::models::{CardDetails, ProviderKind, StripeCredentials};
use crate::payments::error::ProviderResult;
use crate::payments::traits::PaymentProvider;
use crate::payments::types::{
    ChargeRequest, ChargeResult, ChargeStatus, CustomerRequest, PaymentDetails, RefundRequest,
    RefundResult,
};

const STRIPE_API: &str = "https://api.stripe.com/v1";

pub struct StripeProvider {
    secret_key: SecretString,
    webhook_secret: Option<SecretString>,
    base_url: String,
    http: ProviderHttp,
}

impl StripeProvider {
    /// Stripe has no separate sandbox host; test keys select test mode.
    pub fn new(credentials: &StripeCredentials, timeout: Duration) -> ProviderResult<Self> {
        Ok(Self {
            secret_key: SecretString::new(credentials.secret_key.clone().into()),
            webhook_secret: credentials
                .webhook_secret
                .clone()
                .map(|s| SecretString::new(s.into())),
            base_url: STRIPE_API.to_string(),
            http: ProviderHttp::new("stripe", timeout)?,
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn post_form(&self, path: &str, body: String) -> reqwest::RequestBuilder {
        self.http
            .client()
            .post(format!("{}{}", self.base_url, path))
            .bearer_auth(self.secret_key.expose_secret())
            .header("Idempotency-Key", Uuid::new_v4().to_string())
            .header(reqwest::header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(body)
    }

    fn get(&self, path: &str) -> reqwest::RequestBuilder {
        self.http
            .client()
            .get(format!("{}{}", self.base_url, path))
            .bearer_auth(self.secret_key.expose_secret())
    }
}

fn intent_params(request: &ChargeRequest) -> Vec<(&'static str, String)> {
    let mut params = vec![
        ("amount", request.minor_amount.to_string()),
        ("currency", request.currency.to_lowercase()),
        ("payment_method", request.source_id.clone()),
        ("payment_method_types[]", "card".to_string()),
        ("confirmation_method", "automatic".to_string()),
        ("confirm", "true".to_string()),
        ("description", request.note.clone()),
        ("receipt_email", request.buyer_email.clone()),
        ("metadata[reference_id]", request.customer_reference_id.clone()),
        ("expand[]", "latest_charge".to_string()),
    ];
    if let Some(customer) = &request.customer_id {
        params.push(("customer", customer.clone()));
    }
    params
}

#[async_trait]
impl PaymentProvider for StripeProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Stripe
    }

    async fn charge(&self, request: ChargeRequest) -> ProviderResult<ChargeResult> {
        info!(
            amount = request.minor_amount,
            currency = %request.currency,
            reference = %request.customer_reference_id,
            "Creating Stripe payment intent"
        );

        let body = form_body(intent_params(&request));
        let intent: StripeIntent = self
            .http
            .send_once(self.post_form("/payment_intents", body))
            .await?;

        let status = ChargeStatus::parse(&intent.status);
        info!(intent_id = %intent.id, status = %intent.status, "Stripe payment intent confirmed");

        let mut result = ChargeResult::new(intent.id.clone(), status);
        result.receipt_url = intent.receipt_url();
        result.card = intent.card();
        if status == ChargeStatus::Failed || intent.last_payment_error.is_some() {
            result.status = ChargeStatus::Failed;
            result.failure_message = intent
                .last_payment_error
                .as_ref()
                .and_then(|e| e.message.clone())
                .or_else(|| Some(format!("Stripe payment intent {}", intent.status)));
        }
        Ok(result)
    }

    async fn refund(&self, request: RefundRequest) -> ProviderResult<RefundResult> {
        info!(
            intent_id = %request.external_payment_id,
            amount = request.minor_amount,
            "Refunding Stripe payment intent"
        );

        let mut params = vec![
            ("payment_intent", request.external_payment_id.clone()),
            ("amount", request.minor_amount.to_string()),
            ("reason", "requested_by_customer".to_string()),
        ];
        if let Some(reason) = &request.reason {
            params.push(("metadata[note]", reason.clone()));
        }

        let refund: StripeRefund = self
            .http
            .send_once(self.post_form("/refunds", form_body(params)))
            .await?;

        Ok(RefundResult {
            refund_id: refund.id,
            status: refund.status.to_uppercase(),
            minor_amount: refund.amount,
        })
    }

    async fn fetch(&self, external_payment_id: &str) -> ProviderResult<PaymentDetails> {
        let path = format!(
            "/payment_intents/{}?{}",
            external_payment_id,
            form_body([("expand[]", "latest_charge".to_string())])
        );
        let intent: StripeIntent = self.http.send_with_retry(self.get(&path)).await?;
        Ok(PaymentDetails {
            external_payment_id: intent.id.clone(),
            status: ChargeStatus::parse(&intent.status),
            raw_status: intent.status.clone(),
            minor_amount: Some(intent.amount),
            currency: Some(intent.currency.to_uppercase()),
            card: intent.card(),
            receipt_url: intent.receipt_url(),
            order_id: None,
        })
    }

    async fn create_customer(&self, request: CustomerRequest) -> ProviderResult<Option<String>> {
        let name = match &request.family_name {
            Some(family) => format!("{} {}", request.given_name, family),
            None => request.given_name.clone(),
        };
        let body = form_body([
            ("email", request.email.clone()),
            ("name", name),
            ("metadata[reference_id]", request.reference_id.clone()),
        ]);
        let customer: StripeCustomer = self.http.send_once(self.post_form("/customers", body)).await?;
        Ok(Some(customer.id))
    }

    /// `Stripe-Signature: t=<ts>,v1=<hex hmac of "<ts>.<body>">`
    fn verify_webhook(&self, payload: &[u8], signature: &str) -> bool {
        let Some(secret) = &self.webhook_secret else {
            return false;
        };
        let parts: HashMap<&str, &str> = signature
            .split(',')
            .filter_map(|part| part.trim().split_once('='))
            .collect();
        let (Some(timestamp), Some(expected)) = (parts.get("t"), parts.get("v1")) else {
            return false;
        };
        let Ok(expected) = hex::decode(expected) else {
            return false;
        };
        let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(secret.expose_secret().as_bytes()) else {
            return false;
        };
        mac.update(timestamp.as_bytes());
        mac.update(b".");
        mac.update(payload);
        mac.verify_slice(&expected).is_ok()
    }
}

#[derive(Debug, Deserialize)]
struct StripeIntent {
    id: String,
    status: String,
    amount: i64,
    currency: String,
    #[serde(default)]
    latest_charge: Option<StripeLatestCharge>,
    #[serde(default)]
    last_payment_error: Option<StripePaymentError>,
}

/// `latest_charge` is an id unless expanded.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum StripeLatestCharge {
    Expanded(Box<StripeCharge>),
    Id(String),
}

#[derive(Debug, Deserialize)]
struct StripeCharge {
    #[serde(default)]
    receipt_url: Option<String>,
    #[serde(default)]
    payment_method_details: Option<StripeMethodDetails>,
}

#[derive(Debug, Deserialize)]
struct StripeMethodDetails {
    #[serde(default)]
    card: Option<StripeCard>,
}

#[derive(Debug, Deserialize)]
struct StripeCard {
    #[serde(default)]
    brand: Option<String>,
    #[serde(default)]
    last4: Option<String>,
    #[serde(default)]
    exp_month: Option<u32>,
    #[serde(default)]
    exp_year: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct StripePaymentError {
    #[serde(default)]
    message: Option<String>,
}

impl StripeIntent {
    fn charge(&self) -> Option<&StripeCharge> {
        match &self.latest_charge {
            Some(StripeLatestCharge::Expanded(charge)) => Some(charge.as_ref()),
            _ => None,
        }
    }

    fn receipt_url(&self) -> Option<String> {
        self.charge().and_then(|c| c.receipt_url.clone())
    }

    fn card(&self) -> CardDetails {
        self.charge()
            .and_then(|c| c.payment_method_details.as_ref())
            .and_then(|d| d.card.as_ref())
            .map(|c| CardDetails {
                last4: c.last4.clone(),
                brand: c.brand.clone(),
                exp_month: c.exp_month,
                exp_year: c.exp_year,
            })
            .unwrap_or_default()
    }
}

#[derive(Debug, Deserialize)]
struct StripeRefund {
    id: String,
    status: String,
    amount: i64,
}

#[derive(Debug, Deserialize)]
struct StripeCustomer {
    id: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_intent_params_confirm_automatically() {
        let request = ChargeRequest {
            source_id: "pm_card_visa".into(),
            minor_amount: 5000,
            currency: "USD".into(),
            customer_reference_id: "parent:abc".into(),
            note: "Tryout payment for 1 player(s)".into(),
            buyer_email: "p@example.com".into(),
            customer_id: None,
        };
        let params = intent_params(&request);
        assert!(params.contains(&("confirmation_method", "automatic".to_string())));
        assert!(params.contains(&("confirm", "true".to_string())));
        assert!(params.contains(&("currency", "usd".to_string())));
        assert!(!params.iter().any(|(k, _)| *k == "customer"));
    }

    #[test]
    fn test_succeeded_intent_maps_to_completed() {
        let json = r#"{"id":"pi_1","status":"succeeded","amount":5000,"currency":"usd",
            "latest_charge":{"receipt_url":"https://pay.stripe.com/receipts/x",
            "payment_method_details":{"card":{"brand":"visa","last4":"4242","exp_month":4,"exp_year":2031}}}}"#;
        let intent: StripeIntent = serde_json::from_str(json).unwrap();
        assert_eq!(ChargeStatus::parse(&intent.status), ChargeStatus::Completed);
        assert_eq!(intent.card().last4.as_deref(), Some("4242"));
        assert!(intent.receipt_url().is_some());

        let unexpanded: StripeIntent = serde_json::from_str(
            r#"{"id":"pi_2","status":"processing","amount":1,"currency":"usd","latest_charge":"ch_1"}"#,
        )
        .unwrap();
        assert!(unexpanded.receipt_url().is_none());
    }

    #[test]
    fn test_webhook_signature() {
        let credentials = StripeCredentials {
            secret_key: "sk_test".into(),
            publishable_key: None,
            webhook_secret: Some("whsec_test".into()),
        };
        let provider = StripeProvider::new(&credentials, Duration::from_secs(5)).unwrap();
        let payload = br#"{"type":"payment_intent.succeeded"}"#;

        let mut mac = Hmac::<Sha256>::new_from_slice(b"whsec_test").unwrap();
        mac.update(b"1700000000.");
        mac.update(payload);
        let sig = hex::encode(mac.finalize().into_bytes());

        assert!(provider.verify_webhook(payload, &format!("t=1700000000,v1={}", sig)));
        assert!(!provider.verify_webhook(payload, &format!("t=1700000001,v1={}", sig)));
        assert!(!provider.verify_webhook(payload, "garbage"));
    }

    fn provider(server: &MockServer) -> StripeProvider {
        let credentials = StripeCredentials {
            secret_key: "sk_test_123".into(),
            publishable_key: None,
            webhook_secret: None,
        };
        StripeProvider::new(&credentials, Duration::from_secs(5))
            .unwrap()
            .with_base_url(server.uri())
    }

    fn charge_request() -> ChargeRequest {
        ChargeRequest {
            source_id: "pm_card_visa".into(),
            minor_amount: 5000,
            currency: "USD".into(),
            customer_reference_id: "parent:abc".into(),
            note: "Tryout payment for 1 player(s)".into(),
            buyer_email: "pat@example.com".into(),
            customer_id: Some("cus_9".into()),
        }
    }

    #[tokio::test]
    async fn test_succeeded_intent_charge_is_completed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/payment_intents"))
            .and(header("Authorization", "Bearer sk_test_123"))
            .and(header("Content-Type", "application/x-www-form-urlencoded"))
            .and(body_string_contains("amount=5000"))
            .and(body_string_contains("payment_method=pm_card_visa"))
            .and(body_string_contains("customer=cus_9"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "pi_1",
                "status": "succeeded",
                "amount": 5000,
                "currency": "usd",
                "latest_charge": {
                    "receipt_url": "https://pay.stripe.com/receipts/x",
                    "payment_method_details": {
                        "card": {"brand": "visa", "last4": "4242", "exp_month": 4, "exp_year": 2031}
                    }
                }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let result = provider(&server).charge(charge_request()).await.unwrap();
        assert_eq!(result.external_payment_id, "pi_1");
        assert_eq!(result.status, ChargeStatus::Completed);
        assert_eq!(result.card.brand.as_deref(), Some("visa"));
        assert_eq!(result.card.exp_year, Some(2031));
        assert_eq!(
            result.receipt_url.as_deref(),
            Some("https://pay.stripe.com/receipts/x")
        );
        assert!(result.failure_message.is_none());
    }

    #[tokio::test]
    async fn test_card_error_is_a_decline() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/payment_intents"))
            .respond_with(ResponseTemplate::new(402).set_body_json(json!({
                "error": {
                    "type": "card_error",
                    "code": "card_declined",
                    "message": "Your card was declined."
                }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let err = provider(&server).charge(charge_request()).await.unwrap_err();
        assert!(err.declined);
        assert!(!err.retryable);
        assert_eq!(err.status, Some(402));
        assert_eq!(err.message, "Your card was declined.");
    }

    #[tokio::test]
    async fn test_rate_limited_charge_is_retryable_but_not_resent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/payment_intents"))
            .respond_with(ResponseTemplate::new(429).set_body_json(json!({
                "error": {"type": "rate_limit_error", "message": "Too many requests"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let err = provider(&server).charge(charge_request()).await.unwrap_err();
        assert!(err.retryable);
        assert!(!err.declined);
    }

    #[tokio::test]
    async fn test_refund_succeeded_and_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/refunds"))
            .and(body_string_contains("payment_intent=pi_1"))
            .and(body_string_contains("amount=1500"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "re_1",
                "status": "succeeded",
                "amount": 1500
            })))
            .expect(1)
            .mount(&server)
            .await;

        let p = provider(&server);
        let request = RefundRequest {
            external_payment_id: "pi_1".into(),
            minor_amount: 1500,
            currency: "USD".into(),
            reason: Some("sibling discount".into()),
        };
        let refund = p.refund(request.clone()).await.unwrap();
        assert_eq!(refund.refund_id, "re_1");
        assert_eq!(refund.status, "SUCCEEDED");
        assert_eq!(refund.minor_amount, 1500);

        server.reset().await;
        Mock::given(method("POST"))
            .and(path("/refunds"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": {
                    "type": "invalid_request_error",
                    "code": "charge_already_refunded",
                    "message": "Charge pi_1 has already been refunded."
                }
            })))
            .mount(&server)
            .await;
        let err = p.refund(request).await.unwrap_err();
        assert!(!err.retryable);
        assert!(!err.declined);
        assert_eq!(err.message, "Charge pi_1 has already been refunded.");
    }
}
