//! Refunds and processor webhooks against payments taken through the
//! orchestrator.

mod common;

use rust_decimal::Decimal;
use std::str::FromStr;

use common::{player_request, spring_line, Harness};
use courtside_backend::database::Store;
use courtside_backend::models::{PaymentConfiguration, PaymentRecordStatus};
use courtside_backend::payments::providers::square::square_signature;
use courtside_backend::payments::{Flow, RefundCommand, WebhookOutcome};
use uuid::Uuid;

const SIGNATURE_KEY: &str = "sq-signature-key";
const WEBHOOK_URL: &str = "https://api.example.com/payments/square/webhook";

fn square_config(partial_refunds: bool) -> PaymentConfiguration {
    let mut config = PaymentConfiguration::square("sq-token", "L1");
    config.settings.enable_partial_refunds = partial_refunds;
    if let Some(square) = config.square.as_mut() {
        square.webhook_signature_key = Some(SIGNATURE_KEY.to_string());
        square.webhook_url = Some(WEBHOOK_URL.to_string());
    }
    config
}

/// Takes one 50.00 tryout payment and returns its internal id.
async fn paid(h: &Harness) -> Uuid {
    let parent = h.parent("pat@example.com");
    let player = h.player(&parent, "Quinn Lee");
    h.state
        .orchestrator
        .process(parent.id, player_request(Flow::Tryout, vec![spring_line(player.id)], 5000, "cnon:ok-1"))
        .await
        .unwrap()
        .internal_payment_id
}

fn refund(payment_id: Uuid, amount: Option<i64>) -> RefundCommand {
    RefundCommand {
        payment_id,
        amount,
        reason: Some("requested by parent".to_string()),
    }
}

#[tokio::test]
async fn test_partial_then_full_refund() {
    let h = Harness::new(square_config(true));
    let payment_id = paid(&h).await;

    let first = h.state.refunds.refund(refund(payment_id, Some(2000))).await.unwrap();
    assert_eq!(first.amount, Decimal::from_str("20.00").unwrap());
    assert_eq!(first.remaining, Decimal::from_str("30.00").unwrap());
    assert_eq!(first.status, PaymentRecordStatus::Completed);

    let rest = h.state.refunds.refund(refund(payment_id, None)).await.unwrap();
    assert_eq!(rest.amount, Decimal::from_str("30.00").unwrap());
    assert_eq!(rest.status, PaymentRecordStatus::Refunded);

    let stored = h.store.find_payment(payment_id).await.unwrap().unwrap();
    assert_eq!(stored.refunded_amount, stored.amount);
    assert_eq!(stored.refunds.len(), 2);
    assert_eq!(h.provider.refunds()[0].minor_amount, 2000);

    let err = h.state.refunds.refund(refund(payment_id, None)).await.unwrap_err();
    assert_eq!(err.status_code(), 400);
    assert_eq!(h.provider.refunds().len(), 2);
}

#[tokio::test]
async fn test_refund_never_exceeds_charge() {
    let h = Harness::new(square_config(true));
    let payment_id = paid(&h).await;

    h.state.refunds.refund(refund(payment_id, Some(3000))).await.unwrap();
    let err = h.state.refunds.refund(refund(payment_id, Some(3000))).await.unwrap_err();
    assert_eq!(err.status_code(), 400);

    let stored = h.store.find_payment(payment_id).await.unwrap().unwrap();
    assert_eq!(stored.refunded_amount, Decimal::from_str("30.00").unwrap());
    assert_eq!(h.provider.refunds().len(), 1);
}

#[tokio::test]
async fn test_refunds_disabled() {
    let mut config = square_config(false);
    config.settings.enable_refunds = false;
    let h = Harness::new(config);
    let payment_id = paid(&h).await;

    let err = h.state.refunds.refund(refund(payment_id, None)).await.unwrap_err();
    assert_eq!(err.error_code(), "ConfigError");
    assert!(h.provider.refunds().is_empty());
}

fn signed(body: &str) -> String {
    square_signature(SIGNATURE_KEY, WEBHOOK_URL, body.as_bytes())
}

#[tokio::test]
async fn test_square_refund_webhook_is_idempotent() {
    let h = Harness::new(square_config(false));
    let payment_id = paid(&h).await;
    let external = h.store.find_payment(payment_id).await.unwrap().unwrap().payment_id;

    let body = format!(
        r#"{{"type":"refund.updated","data":{{"object":{{"refund":{{"id":"rf_1","status":"COMPLETED","payment_id":"{}","location_id":"L1","amount_money":{{"amount":1500,"currency":"USD"}}}}}}}}}}"#,
        external
    );

    let outcome = h
        .state
        .webhooks
        .handle_square(Some(&signed(&body)), body.as_bytes())
        .await
        .unwrap();
    assert_eq!(
        outcome,
        WebhookOutcome::Applied {
            payment_id,
            status: PaymentRecordStatus::Completed,
        }
    );

    let replay = h
        .state
        .webhooks
        .handle_square(Some(&signed(&body)), body.as_bytes())
        .await
        .unwrap();
    assert!(matches!(replay, WebhookOutcome::Ignored { .. }));

    let stored = h.store.find_payment(payment_id).await.unwrap().unwrap();
    assert_eq!(stored.refunded_amount, Decimal::from_str("15.00").unwrap());
    assert_eq!(stored.refunds.len(), 1);
}

#[tokio::test]
async fn test_square_webhook_rejections() {
    let h = Harness::new(square_config(false));
    paid(&h).await;

    let body = r#"{"type":"payment.updated","data":{"object":{"payment":{"id":"pay_1","status":"FAILED","location_id":"L9"}}}}"#;
    let err = h
        .state
        .webhooks
        .handle_square(Some("bogus"), body.as_bytes())
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 401);

    let err = h
        .state
        .webhooks
        .handle_square(None, body.as_bytes())
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 401);

    let err = h
        .state
        .webhooks
        .handle_square(Some(&signed(body)), body.as_bytes())
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 403);

    let unknown = r#"{"type":"payment.updated","data":{"object":{"payment":{"id":"pay_999","status":"COMPLETED","location_id":"L1"}}}}"#;
    let outcome = h
        .state
        .webhooks
        .handle_square(Some(&signed(unknown)), unknown.as_bytes())
        .await
        .unwrap();
    assert!(matches!(outcome, WebhookOutcome::Ignored { .. }));
}

fn clover_config() -> PaymentConfiguration {
    let mut config = PaymentConfiguration::clover("cl-token", "M1");
    if let Some(clover) = config.clover.as_mut() {
        clover.webhook_secret = Some("clover-secret".to_string());
    }
    config
}

#[tokio::test]
async fn test_clover_status_webhooks() {
    let h = Harness::new(clover_config());
    let payment_id = paid(&h).await;
    let external = h.store.find_payment(payment_id).await.unwrap().unwrap().payment_id;

    let failed = format!(
        r#"{{"type":"payment_failed","merchantId":"M1","data":{{"paymentId":"{}"}}}}"#,
        external
    );
    let outcome = h
        .state
        .webhooks
        .handle_clover(Some("clover-secret"), failed.as_bytes())
        .await
        .unwrap();
    assert!(matches!(
        outcome,
        WebhookOutcome::Applied {
            status: PaymentRecordStatus::Failed,
            ..
        }
    ));

    let recovered = failed.replace("payment_failed", "payment_paid");
    h.state
        .webhooks
        .handle_clover(Some("clover-secret"), recovered.as_bytes())
        .await
        .unwrap();
    let stored = h.store.find_payment(payment_id).await.unwrap().unwrap();
    assert_eq!(stored.status, PaymentRecordStatus::Completed);

    let err = h
        .state
        .webhooks
        .handle_clover(Some("wrong"), failed.as_bytes())
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 401);

    let other_merchant = failed.replace("M1", "M2");
    let err = h
        .state
        .webhooks
        .handle_clover(Some("clover-secret"), other_merchant.as_bytes())
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 403);
}

const STRIPE_SECRET: &str = "whsec_test";

fn stripe_config() -> PaymentConfiguration {
    let mut config = PaymentConfiguration::stripe("sk_test_1");
    if let Some(stripe) = config.stripe.as_mut() {
        stripe.webhook_secret = Some(STRIPE_SECRET.to_string());
    }
    config
}

/// `Stripe-Signature` header for `body` at a fixed timestamp.
fn stripe_signed(body: &str) -> String {
    use hmac::{Hmac, Mac};
    let mut mac = Hmac::<sha2::Sha256>::new_from_slice(STRIPE_SECRET.as_bytes()).unwrap();
    mac.update(b"1767225600.");
    mac.update(body.as_bytes());
    format!("t=1767225600,v1={}", hex::encode(mac.finalize().into_bytes()))
}

#[tokio::test]
async fn test_stripe_webhooks_are_verified_by_the_adapter() {
    let h = Harness::new(stripe_config());
    let payment_id = paid(&h).await;
    let external = h.store.find_payment(payment_id).await.unwrap().unwrap().payment_id;

    let refund = format!(
        r#"{{"type":"refund.created","data":{{"object":{{"id":"re_1","payment_intent":"{}","amount":1500,"status":"succeeded"}}}}}}"#,
        external
    );
    let outcome = h
        .state
        .webhooks
        .handle_stripe(Some(&stripe_signed(&refund)), refund.as_bytes())
        .await
        .unwrap();
    assert!(matches!(outcome, WebhookOutcome::Applied { .. }));

    let replay = h
        .state
        .webhooks
        .handle_stripe(Some(&stripe_signed(&refund)), refund.as_bytes())
        .await
        .unwrap();
    assert!(matches!(replay, WebhookOutcome::Ignored { .. }));

    let stored = h.store.find_payment(payment_id).await.unwrap().unwrap();
    assert_eq!(stored.refunds.len(), 1);
    assert_eq!(stored.refunded_amount, Decimal::from_str("15.00").unwrap());

    let tampered = refund.replace("1500", "5000");
    let err = h
        .state
        .webhooks
        .handle_stripe(Some(&stripe_signed(&refund)), tampered.as_bytes())
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 401);

    let err = h
        .state
        .webhooks
        .handle_stripe(None, refund.as_bytes())
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 401);
}
