//! Inbound processor webhooks.
//!
//! Each processor's payload is authenticated by its adapter, checked against
//! the configured location or merchant, and normalised to a [`WebhookEvent`]
//! that is applied to the stored Payment. Events for payments we do not know are acknowledged
//! and ignored; replayed refunds are no-ops.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::database::store::{Store, StoreTx};
use crate::error::{AppError, AppResult};
use crate::models::{PaymentRecordStatus, ProviderKind, RefundEntry};
use crate::payments::allocation::{to_major, to_minor};
use crate::payments::registry::{ProviderRegistry, ResolvedProvider};

pub const SQUARE_SIGNATURE_HEADER: &str = "x-square-hmacsha256-signature";
pub const CLOVER_AUTH_HEADER: &str = "x-clover-auth";
pub const STRIPE_SIGNATURE_HEADER: &str = "stripe-signature";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookEventKind {
    Paid,
    Failed,
    Refunded,
}

/// A processor notification reduced to what reconciliation needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookEvent {
    pub kind: WebhookEventKind,
    pub external_payment_id: String,
    pub refund_id: Option<String>,
    /// Minor units, when the processor sent one.
    pub amount: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "camelCase")]
pub enum WebhookOutcome {
    #[serde(rename_all = "camelCase")]
    Applied {
        payment_id: Uuid,
        status: PaymentRecordStatus,
    },
    #[serde(rename_all = "camelCase")]
    Ignored { reason: String },
}

impl WebhookOutcome {
    fn ignored(reason: impl Into<String>) -> Self {
        Self::Ignored {
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct SquareNotification {
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    data: Option<SquareData>,
}

#[derive(Debug, Deserialize)]
struct SquareData {
    #[serde(default)]
    object: Option<SquareObject>,
}

#[derive(Debug, Deserialize)]
struct SquareObject {
    #[serde(default)]
    payment: Option<SquarePaymentObject>,
    #[serde(default)]
    refund: Option<SquareRefundObject>,
}

#[derive(Debug, Deserialize)]
struct SquarePaymentObject {
    id: String,
    status: String,
    #[serde(default)]
    location_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SquareRefundObject {
    id: String,
    status: String,
    payment_id: String,
    #[serde(default)]
    location_id: Option<String>,
    #[serde(default)]
    amount_money: Option<SquareMoney>,
}

#[derive(Debug, Deserialize)]
struct SquareMoney {
    amount: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CloverNotification {
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    merchant_id: Option<String>,
    data: CloverData,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CloverData {
    payment_id: String,
    #[serde(default)]
    refund_id: Option<String>,
    #[serde(default)]
    amount: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct StripeNotification {
    #[serde(rename = "type")]
    event_type: String,
    data: StripeData,
}

#[derive(Debug, Deserialize)]
struct StripeData {
    object: StripeObject,
}

/// A PaymentIntent or a Refund; only the fields reconciliation reads.
#[derive(Debug, Deserialize)]
struct StripeObject {
    id: String,
    #[serde(default)]
    payment_intent: Option<String>,
    #[serde(default)]
    amount: Option<i64>,
    #[serde(default)]
    status: Option<String>,
}

/// Checks the signature header with the adapter built from the stored
/// configuration.
fn authenticate(resolved: &ResolvedProvider, signature: Option<&str>, body: &[u8]) -> AppResult<()> {
    let authentic = signature.is_some_and(|sig| resolved.adapter.verify_webhook(body, sig));
    if !authentic {
        warn!(provider = %resolved.kind(), "Webhook rejected: bad or missing signature");
        return Err(AppError::unauthorized("Invalid webhook signature"));
    }
    Ok(())
}

fn malformed(err: serde_json::Error) -> AppError {
    AppError::validation("body", format!("malformed webhook payload: {}", err))
}

/// Normalises a Square notification. `None` means the event type is not one
/// reconciliation cares about.
fn square_event(notification: SquareNotification) -> AppResult<Option<(WebhookEvent, Option<String>)>> {
    let object = notification.data.and_then(|d| d.object);
    match notification.event_type.as_str() {
        "payment.created" | "payment.updated" => {
            let payment = object
                .and_then(|o| o.payment)
                .ok_or_else(|| AppError::validation("data.object.payment", "is required"))?;
            let kind = match payment.status.to_ascii_uppercase().as_str() {
                "COMPLETED" => WebhookEventKind::Paid,
                "FAILED" | "CANCELED" => WebhookEventKind::Failed,
                _ => return Ok(None),
            };
            Ok(Some((
                WebhookEvent {
                    kind,
                    external_payment_id: payment.id,
                    refund_id: None,
                    amount: None,
                },
                payment.location_id,
            )))
        }
        "refund.created" | "refund.updated" => {
            let refund = object
                .and_then(|o| o.refund)
                .ok_or_else(|| AppError::validation("data.object.refund", "is required"))?;
            if !refund.status.eq_ignore_ascii_case("COMPLETED") {
                return Ok(None);
            }
            Ok(Some((
                WebhookEvent {
                    kind: WebhookEventKind::Refunded,
                    external_payment_id: refund.payment_id,
                    refund_id: Some(refund.id),
                    amount: refund.amount_money.map(|m| m.amount),
                },
                refund.location_id,
            )))
        }
        _ => Ok(None),
    }
}

fn clover_event(notification: CloverNotification) -> Option<WebhookEvent> {
    let kind = match notification.event_type.as_str() {
        "payment_paid" => WebhookEventKind::Paid,
        "payment_failed" => WebhookEventKind::Failed,
        "payment_refunded" => WebhookEventKind::Refunded,
        _ => return None,
    };
    Some(WebhookEvent {
        kind,
        external_payment_id: notification.data.payment_id,
        refund_id: notification.data.refund_id,
        amount: notification.data.amount,
    })
}

fn stripe_event(notification: StripeNotification) -> Option<WebhookEvent> {
    let object = notification.data.object;
    match notification.event_type.as_str() {
        "payment_intent.succeeded" | "payment_intent.payment_failed" => {
            let kind = if notification.event_type.ends_with("succeeded") {
                WebhookEventKind::Paid
            } else {
                WebhookEventKind::Failed
            };
            Some(WebhookEvent {
                kind,
                external_payment_id: object.id,
                refund_id: None,
                amount: None,
            })
        }
        "refund.created" | "refund.updated" | "charge.refund.updated" => {
            if !object.status.as_deref().is_some_and(|s| s.eq_ignore_ascii_case("succeeded")) {
                return None;
            }
            Some(WebhookEvent {
                kind: WebhookEventKind::Refunded,
                external_payment_id: object.payment_intent?,
                refund_id: Some(object.id),
                amount: object.amount,
            })
        }
        _ => None,
    }
}

pub struct WebhookService<S: Store> {
    store: Arc<S>,
    registry: Arc<ProviderRegistry<S>>,
}

impl<S: Store> WebhookService<S> {
    pub fn new(store: Arc<S>, registry: Arc<ProviderRegistry<S>>) -> Self {
        Self { store, registry }
    }

    /// Handles `POST /payments/square/webhook`.
    pub async fn handle_square(&self, signature: Option<&str>, body: &[u8]) -> AppResult<WebhookOutcome> {
        let resolved = self.registry.for_payment_system(ProviderKind::Square).await?;
        authenticate(&resolved, signature, body)?;

        let notification: SquareNotification = serde_json::from_slice(body).map_err(malformed)?;
        let event_type = notification.event_type.clone();
        let Some((event, location_id)) = square_event(notification)? else {
            info!(event_type = %event_type, "Square webhook ignored");
            return Ok(WebhookOutcome::ignored(format!("unhandled event {}", event_type)));
        };

        if let (Some(received), Some(configured)) = (location_id.as_deref(), resolved.configuration.account_id()) {
            if received != configured {
                warn!(location_id = %received, "Square webhook for an unknown location");
                return Err(AppError::forbidden("Unknown location"));
            }
        }

        self.apply(ProviderKind::Square, event).await
    }

    /// Handles `POST /payments/clover/webhook`.
    pub async fn handle_clover(&self, auth: Option<&str>, body: &[u8]) -> AppResult<WebhookOutcome> {
        let resolved = self.registry.for_payment_system(ProviderKind::Clover).await?;
        authenticate(&resolved, auth, body)?;

        let notification: CloverNotification = serde_json::from_slice(body).map_err(malformed)?;
        if let (Some(received), Some(configured)) =
            (notification.merchant_id.as_deref(), resolved.configuration.account_id())
        {
            if received != configured {
                warn!(merchant_id = %received, "Clover webhook for an unknown merchant");
                return Err(AppError::forbidden("Unknown merchant"));
            }
        }

        let event_type = notification.event_type.clone();
        match clover_event(notification) {
            Some(event) => self.apply(ProviderKind::Clover, event).await,
            None => {
                info!(event_type = %event_type, "Clover webhook ignored");
                Ok(WebhookOutcome::ignored(format!("unhandled event {}", event_type)))
            }
        }
    }

    /// Handles `POST /payments/stripe/webhook`.
    pub async fn handle_stripe(&self, signature: Option<&str>, body: &[u8]) -> AppResult<WebhookOutcome> {
        let resolved = self.registry.for_payment_system(ProviderKind::Stripe).await?;
        authenticate(&resolved, signature, body)?;

        let notification: StripeNotification = serde_json::from_slice(body).map_err(malformed)?;
        let event_type = notification.event_type.clone();
        match stripe_event(notification) {
            Some(event) => self.apply(ProviderKind::Stripe, event).await,
            None => {
                info!(event_type = %event_type, "Stripe webhook ignored");
                Ok(WebhookOutcome::ignored(format!("unhandled event {}", event_type)))
            }
        }
    }

    /// Applies a normalised event to the stored Payment.
    pub async fn apply(&self, provider: ProviderKind, event: WebhookEvent) -> AppResult<WebhookOutcome> {
        let mut tx = self.store.begin().await?;
        let Some(mut payment) = tx.find_payment_by_external(&event.external_payment_id).await? else {
            info!(
                provider = %provider,
                external_payment_id = %event.external_payment_id,
                "Webhook for unknown payment ignored"
            );
            return Ok(WebhookOutcome::ignored("unknown payment"));
        };

        let changed = match event.kind {
            WebhookEventKind::Paid => {
                if payment.status == PaymentRecordStatus::Failed {
                    payment.status = PaymentRecordStatus::Completed;
                    true
                } else {
                    false
                }
            }
            WebhookEventKind::Failed => {
                if payment.status == PaymentRecordStatus::Completed && payment.refunds.is_empty() {
                    payment.status = PaymentRecordStatus::Failed;
                    true
                } else {
                    false
                }
            }
            WebhookEventKind::Refunded => {
                let refund_id = event
                    .refund_id
                    .clone()
                    .unwrap_or_else(|| format!("{}:webhook", event.external_payment_id));
                let remaining = to_minor(payment.remaining_refundable());
                if payment.has_refund(&refund_id) || remaining == 0 {
                    false
                } else {
                    let amount = event.amount.filter(|a| *a > 0).unwrap_or(remaining).min(remaining);
                    payment.record_refund(RefundEntry {
                        refund_id,
                        amount: to_major(amount),
                        reason: Some("processor notification".to_string()),
                        status: "COMPLETED".to_string(),
                        processed_at: Utc::now(),
                    });
                    true
                }
            }
        };

        if !changed {
            return Ok(WebhookOutcome::ignored("already applied"));
        }

        tx.update_payment(&payment).await?;
        tx.commit().await?;
        info!(
            provider = %provider,
            payment_id = %payment.id,
            external_payment_id = %payment.payment_id,
            status = ?payment.status,
            "Payment reconciled from webhook"
        );
        Ok(WebhookOutcome::Applied {
            payment_id: payment.id,
            status: payment.status,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_square_payment_event_mapping() {
        let body = r#"{"type":"payment.updated","data":{"object":{"payment":{"id":"pay_1","status":"COMPLETED","location_id":"L1"}}}}"#;
        let notification: SquareNotification = serde_json::from_str(body).unwrap();
        let (event, location) = square_event(notification).unwrap().unwrap();
        assert_eq!(event.kind, WebhookEventKind::Paid);
        assert_eq!(event.external_payment_id, "pay_1");
        assert_eq!(location.as_deref(), Some("L1"));
    }

    #[test]
    fn test_square_refund_event_mapping() {
        let body = r#"{"type":"refund.updated","data":{"object":{"refund":{"id":"rf_1","status":"COMPLETED","payment_id":"pay_1","amount_money":{"amount":1500,"currency":"USD"}}}}}"#;
        let notification: SquareNotification = serde_json::from_str(body).unwrap();
        let (event, _) = square_event(notification).unwrap().unwrap();
        assert_eq!(event.kind, WebhookEventKind::Refunded);
        assert_eq!(event.refund_id.as_deref(), Some("rf_1"));
        assert_eq!(event.amount, Some(1500));
    }

    #[test]
    fn test_square_pending_refund_is_skipped() {
        let body = r#"{"type":"refund.created","data":{"object":{"refund":{"id":"rf_1","status":"PENDING","payment_id":"pay_1"}}}}"#;
        let notification: SquareNotification = serde_json::from_str(body).unwrap();
        assert!(square_event(notification).unwrap().is_none());
    }

    #[test]
    fn test_clover_event_mapping() {
        let body = r#"{"type":"payment_failed","merchantId":"M1","data":{"paymentId":"ch_1"}}"#;
        let notification: CloverNotification = serde_json::from_str(body).unwrap();
        let event = clover_event(notification).unwrap();
        assert_eq!(event.kind, WebhookEventKind::Failed);
        assert_eq!(event.external_payment_id, "ch_1");

        let other = r#"{"type":"order_created","data":{"paymentId":"ch_1"}}"#;
        assert!(clover_event(serde_json::from_str(other).unwrap()).is_none());
    }

    #[test]
    fn test_stripe_event_mapping() {
        let body = r#"{"type":"payment_intent.payment_failed","data":{"object":{"id":"pi_1","status":"requires_payment_method"}}}"#;
        let event = stripe_event(serde_json::from_str(body).unwrap()).unwrap();
        assert_eq!(event.kind, WebhookEventKind::Failed);
        assert_eq!(event.external_payment_id, "pi_1");

        let body = r#"{"type":"refund.created","data":{"object":{"id":"re_1","payment_intent":"pi_1","amount":1500,"status":"succeeded"}}}"#;
        let event = stripe_event(serde_json::from_str(body).unwrap()).unwrap();
        assert_eq!(event.kind, WebhookEventKind::Refunded);
        assert_eq!(event.refund_id.as_deref(), Some("re_1"));
        assert_eq!(event.amount, Some(1500));

        let pending = r#"{"type":"refund.created","data":{"object":{"id":"re_2","payment_intent":"pi_1","status":"pending"}}}"#;
        assert!(stripe_event(serde_json::from_str(pending).unwrap()).is_none());
    }

    #[test]
    fn test_outcome_shape() {
        let json = serde_json::to_value(WebhookOutcome::ignored("unknown payment")).unwrap();
        assert_eq!(json["result"], "ignored");
        assert_eq!(json["reason"], "unknown payment");
    }
}
