//! Refunds against stored payments.
//!
//! The processor is called first; the refund is then recorded on the locked
//! Payment row. Player, team and registration statuses are left alone.

use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

use crate::database::store::{Store, StoreTx};
use crate::error::{AppError, AppErrorKind, AppResult};
use crate::models::{PaymentRecordStatus, RefundEntry};
use crate::payments::allocation::{to_major, to_minor};
use crate::payments::registry::{Operation, ProviderRegistry};
use crate::payments::types::RefundRequest;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefundCommand {
    pub payment_id: Uuid,
    /// Minor units; the whole remaining balance when absent.
    #[serde(default)]
    pub amount: Option<i64>,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefundOutcome {
    pub payment_id: Uuid,
    pub refund_id: String,
    pub refund_status: String,
    /// Major units refunded by this call.
    pub amount: Decimal,
    pub refunded_amount: Decimal,
    pub remaining: Decimal,
    pub status: PaymentRecordStatus,
}

pub struct RefundService<S: Store> {
    store: Arc<S>,
    registry: Arc<ProviderRegistry<S>>,
}

impl<S: Store> RefundService<S> {
    pub fn new(store: Arc<S>, registry: Arc<ProviderRegistry<S>>) -> Self {
        Self { store, registry }
    }

    pub async fn refund(&self, command: RefundCommand) -> AppResult<RefundOutcome> {
        let payment = self
            .store
            .find_payment(command.payment_id)
            .await?
            .ok_or_else(|| AppError::not_found("Payment", command.payment_id))?;

        let charged = to_minor(payment.amount);
        let requested = command
            .amount
            .unwrap_or_else(|| to_minor(payment.remaining_refundable()));
        if requested <= 0 {
            return Err(AppError::validation("amount", "must be greater than zero"));
        }

        let provider = self.registry.for_payment_system(payment.payment_system).await?;
        ProviderRegistry::<S>::validate(
            &provider.configuration,
            Operation::Refund {
                partial: requested < charged,
            },
        )?;

        let mut tx = self.store.begin().await?;
        let mut payment = tx
            .find_payment(command.payment_id)
            .await?
            .ok_or_else(|| AppError::not_found("Payment", command.payment_id))?;

        if payment.status == PaymentRecordStatus::Failed {
            return Err(AppError::validation("paymentId", "a failed payment cannot be refunded"));
        }
        let remaining = to_minor(payment.remaining_refundable());
        if requested > remaining {
            return Err(AppError::validation(
                "amount",
                format!(
                    "exceeds the refundable balance of {}",
                    to_major(remaining)
                ),
            ));
        }

        info!(
            payment_id = %payment.id,
            external_payment_id = %payment.payment_id,
            provider = %payment.payment_system,
            amount_minor = requested,
            "Requesting refund"
        );
        let result = provider
            .adapter
            .refund(RefundRequest {
                external_payment_id: payment.payment_id.clone(),
                minor_amount: requested,
                currency: payment.currency.clone(),
                reason: command.reason.clone(),
            })
            .await
            .map_err(|e| {
                error!(
                    payment_id = %payment.id,
                    provider = %e.provider,
                    status = ?e.status,
                    retryable = e.retryable,
                    error = %e.message,
                    "Refund failed"
                );
                e
            })?;

        let refunded_minor = if result.minor_amount > 0 {
            result.minor_amount.min(remaining)
        } else {
            requested
        };
        payment.record_refund(RefundEntry {
            refund_id: result.refund_id.clone(),
            amount: to_major(refunded_minor),
            reason: command.reason,
            status: result.status.clone(),
            processed_at: Utc::now(),
        });
        tx.update_payment(&payment).await?;

        if let Err(e) = tx.commit().await {
            error!(
                payment_id = %payment.id,
                external_payment_id = %payment.payment_id,
                refund_id = %result.refund_id,
                amount_minor = refunded_minor,
                error = %e,
                "Refund issued but could not be recorded; reconcile manually"
            );
            return Err(AppError::new(AppErrorKind::TransactionAborted {
                message: e.to_string(),
            }));
        }

        info!(
            payment_id = %payment.id,
            refund_id = %result.refund_id,
            refunded = %payment.refunded_amount,
            status = ?payment.status,
            "Refund recorded"
        );

        Ok(RefundOutcome {
            payment_id: payment.id,
            refund_id: result.refund_id,
            refund_status: result.status,
            amount: to_major(refunded_minor),
            refunded_amount: payment.refunded_amount,
            remaining: payment.remaining_refundable(),
            status: payment.status,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::MemoryStore;
    use crate::models::{CardDetails, Parent, Payment, PaymentConfiguration, PaymentType, ProviderKind};
    use crate::payments::providers::DefaultProviderFactory;

    fn payment(parent_id: Uuid, external: &str, minor: i64) -> Payment {
        Payment {
            id: Uuid::new_v4(),
            parent_id,
            player_ids: vec![Uuid::new_v4()],
            team_ids: vec![],
            payment_id: external.into(),
            payment_system: ProviderKind::Square,
            order_id: None,
            location_id: Some("L1".into()),
            merchant_id: None,
            buyer_email: "pat@example.com".into(),
            card: CardDetails::default(),
            amount: to_major(minor),
            currency: "USD".into(),
            status: PaymentRecordStatus::Completed,
            processed_at: Utc::now(),
            receipt_url: None,
            payment_type: PaymentType::Tryout,
            configuration_id: None,
            metadata: serde_json::Value::Null,
            refunds: vec![],
            refund_status: None,
            refunded_amount: Decimal::ZERO,
        }
    }

    fn service(config: PaymentConfiguration) -> (RefundService<MemoryStore>, MemoryStore) {
        let store = MemoryStore::new();
        store.seed_configuration(config);
        let store_arc = Arc::new(store.clone());
        let registry = Arc::new(ProviderRegistry::new(
            store_arc.clone(),
            Arc::new(DefaultProviderFactory::default()),
        ));
        (RefundService::new(store_arc, registry), store)
    }

    #[tokio::test]
    async fn test_unknown_payment_is_not_found() {
        let mut config = PaymentConfiguration::square("tok", "L1");
        config.test_mode = true;
        let (service, _) = service(config);
        let err = service
            .refund(RefundCommand {
                payment_id: Uuid::new_v4(),
                amount: None,
                reason: None,
            })
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 404);
    }

    #[tokio::test]
    async fn test_partial_refund_requires_setting() {
        let mut config = PaymentConfiguration::square("tok", "L1");
        config.test_mode = true;
        let (service, store) = service(config);
        let parent = Parent::new("pat@example.com", "Pat Lee");
        let stored = payment(parent.id, "sim_1", 5000);
        store.seed_parent(parent);
        store.seed_payment(stored.clone());

        let err = service
            .refund(RefundCommand {
                payment_id: stored.id,
                amount: Some(1000),
                reason: None,
            })
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "ConfigError");
    }

    #[tokio::test]
    async fn test_amount_above_balance_is_rejected() {
        let mut config = PaymentConfiguration::square("tok", "L1");
        config.test_mode = true;
        let (service, store) = service(config);
        let parent = Parent::new("pat@example.com", "Pat Lee");
        let stored = payment(parent.id, "sim_1", 5000);
        store.seed_parent(parent);
        store.seed_payment(stored.clone());

        let err = service
            .refund(RefundCommand {
                payment_id: stored.id,
                amount: Some(6000),
                reason: None,
            })
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 400);
    }
}
