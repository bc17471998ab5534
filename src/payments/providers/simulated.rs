//! In-process processor used when a sandbox configuration sets `testMode`.
//!
//! It behaves like a card processor from the caller's point of view: source
//! ids are single use, sources whose id starts with `declined` come back as a
//! failed charge, and refunds are checked against what was captured.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use tracing::info;
use uuid::Uuid;

use crate::models::{CardDetails, ProviderKind};
use crate::payments::error::{ProviderError, ProviderResult};
use crate::payments::traits::PaymentProvider;
use crate::payments::types::{
    ChargeRequest, ChargeResult, ChargeStatus, CustomerRequest, PaymentDetails, RefundRequest,
    RefundResult,
};

const DECLINED_PREFIX: &str = "declined";

#[derive(Debug, Clone)]
struct SimulatedCharge {
    minor_amount: i64,
    refunded_minor: i64,
    currency: String,
    status: ChargeStatus,
}

#[derive(Debug, Default)]
struct Ledger {
    used_sources: HashSet<String>,
    charges: HashMap<String, SimulatedCharge>,
}

/// Test-mode adapter. Reports itself as the configured processor kind.
pub struct SimulatedProvider {
    kind: ProviderKind,
    ledger: Mutex<Ledger>,
    verifier: Option<Box<dyn PaymentProvider>>,
}

impl SimulatedProvider {
    pub fn new(kind: ProviderKind) -> Self {
        Self {
            kind,
            ledger: Mutex::new(Ledger::default()),
            verifier: None,
        }
    }

    /// Adapter whose `verify_webhook` decides for this one. Without it every
    /// webhook is rejected.
    pub fn with_webhook_verifier(mut self, verifier: Option<Box<dyn PaymentProvider>>) -> Self {
        self.verifier = verifier;
        self
    }

    fn ledger(&self) -> ProviderResult<std::sync::MutexGuard<'_, Ledger>> {
        self.ledger
            .lock()
            .map_err(|_| ProviderError::transport(self.kind.as_str(), "simulated ledger poisoned"))
    }
}

fn simulated_card() -> CardDetails {
    CardDetails {
        last4: Some("1111".to_string()),
        brand: Some("VISA".to_string()),
        exp_month: Some(12),
        exp_year: Some(2030),
    }
}

#[async_trait]
impl PaymentProvider for SimulatedProvider {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    async fn charge(&self, request: ChargeRequest) -> ProviderResult<ChargeResult> {
        let mut ledger = self.ledger()?;
        if !ledger.used_sources.insert(request.source_id.clone()) {
            return Err(ProviderError::declined(
                self.kind.as_str(),
                Some(400),
                "Source id has already been used",
            ));
        }

        let id = format!("sim_{}", Uuid::new_v4().simple());
        let status = if request.source_id.starts_with(DECLINED_PREFIX) {
            ChargeStatus::Failed
        } else {
            ChargeStatus::Completed
        };
        ledger.charges.insert(
            id.clone(),
            SimulatedCharge {
                minor_amount: request.minor_amount,
                refunded_minor: 0,
                currency: request.currency.clone(),
                status,
            },
        );

        info!(
            provider = %self.kind,
            payment_id = %id,
            amount = request.minor_amount,
            status = ?status,
            "Simulated charge"
        );

        let mut result = ChargeResult::new(id, status);
        result.card = simulated_card();
        if status == ChargeStatus::Failed {
            result.failure_message = Some("Card declined".to_string());
        }
        Ok(result)
    }

    async fn refund(&self, request: RefundRequest) -> ProviderResult<RefundResult> {
        let mut ledger = self.ledger()?;
        let charge = ledger
            .charges
            .get_mut(&request.external_payment_id)
            .ok_or_else(|| {
                ProviderError::http(
                    self.kind.as_str(),
                    404,
                    format!("payment {} not found", request.external_payment_id),
                )
            })?;
        if !charge.status.is_success() {
            return Err(ProviderError::http(
                self.kind.as_str(),
                400,
                "payment was not captured",
            ));
        }
        if charge.refunded_minor + request.minor_amount > charge.minor_amount {
            return Err(ProviderError::http(
                self.kind.as_str(),
                400,
                "refund exceeds captured amount",
            ));
        }
        charge.refunded_minor += request.minor_amount;

        Ok(RefundResult {
            refund_id: format!("simr_{}", Uuid::new_v4().simple()),
            status: "COMPLETED".to_string(),
            minor_amount: request.minor_amount,
        })
    }

    async fn fetch(&self, external_payment_id: &str) -> ProviderResult<PaymentDetails> {
        let ledger = self.ledger()?;
        let charge = ledger.charges.get(external_payment_id).ok_or_else(|| {
            ProviderError::http(
                self.kind.as_str(),
                404,
                format!("payment {} not found", external_payment_id),
            )
        })?;
        Ok(PaymentDetails {
            external_payment_id: external_payment_id.to_string(),
            status: charge.status,
            raw_status: format!("{:?}", charge.status).to_uppercase(),
            minor_amount: Some(charge.minor_amount),
            currency: Some(charge.currency.clone()),
            card: simulated_card(),
            receipt_url: None,
            order_id: None,
        })
    }

    async fn create_customer(&self, request: CustomerRequest) -> ProviderResult<Option<String>> {
        if self.kind != ProviderKind::Square {
            return Ok(None);
        }
        Ok(Some(format!("simcus_{}", request.reference_id)))
    }

    fn verify_webhook(&self, payload: &[u8], signature: &str) -> bool {
        self.verifier
            .as_ref()
            .is_some_and(|v| v.verify_webhook(payload, signature))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(source: &str, amount: i64) -> ChargeRequest {
        ChargeRequest {
            source_id: source.to_string(),
            minor_amount: amount,
            currency: "USD".to_string(),
            customer_reference_id: "parent:abc".to_string(),
            note: "Tryout payment for 1 player(s)".to_string(),
            buyer_email: "p@example.com".to_string(),
            customer_id: None,
        }
    }

    #[tokio::test]
    async fn test_approves_then_rejects_reused_source() {
        let provider = SimulatedProvider::new(ProviderKind::Square);
        let first = provider.charge(request("cnon:ok", 5000)).await.unwrap();
        assert_eq!(first.status, ChargeStatus::Completed);
        assert!(first.external_payment_id.starts_with("sim_"));

        let err = provider.charge(request("cnon:ok", 5000)).await.unwrap_err();
        assert!(err.declined);
    }

    #[tokio::test]
    async fn test_declined_source_fails() {
        let provider = SimulatedProvider::new(ProviderKind::Stripe);
        let result = provider.charge(request("declined-card", 5000)).await.unwrap();
        assert_eq!(result.status, ChargeStatus::Failed);
        assert!(result.failure_message.is_some());
    }

    #[tokio::test]
    async fn test_refunds_never_exceed_capture() {
        let provider = SimulatedProvider::new(ProviderKind::Clover);
        let charge = provider.charge(request("tok", 1000)).await.unwrap();
        let refund = |amount| RefundRequest {
            external_payment_id: charge.external_payment_id.clone(),
            minor_amount: amount,
            currency: "USD".to_string(),
            reason: None,
        };
        provider.refund(refund(600)).await.unwrap();
        assert!(provider.refund(refund(600)).await.is_err());
        provider.refund(refund(400)).await.unwrap();

        let details = provider.fetch(&charge.external_payment_id).await.unwrap();
        assert_eq!(details.minor_amount, Some(1000));
    }
}
