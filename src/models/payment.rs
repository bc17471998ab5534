use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::common::{CardDetails, PaymentType, ProviderKind};

/// Lifecycle of a stored charge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentRecordStatus {
    Completed,
    Failed,
    Refunded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefundStatus {
    Refunded,
}

/// One refund applied against a payment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefundEntry {
    pub refund_id: String,
    pub amount: Decimal,
    #[serde(default)]
    pub reason: Option<String>,
    pub status: String,
    pub processed_at: DateTime<Utc>,
}

/// Append-only record of a charge. Only the refund path and webhook
/// reconciliation mutate an existing row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Payment {
    pub id: Uuid,
    pub parent_id: Uuid,
    #[serde(default)]
    pub player_ids: Vec<Uuid>,
    #[serde(default)]
    pub team_ids: Vec<Uuid>,
    /// Identifier returned by the processor.
    pub payment_id: String,
    pub payment_system: ProviderKind,
    #[serde(default)]
    pub order_id: Option<String>,
    #[serde(default)]
    pub location_id: Option<String>,
    #[serde(default)]
    pub merchant_id: Option<String>,
    pub buyer_email: String,
    #[serde(default)]
    pub card: CardDetails,
    /// Major units, two fractional digits.
    pub amount: Decimal,
    pub currency: String,
    pub status: PaymentRecordStatus,
    pub processed_at: DateTime<Utc>,
    #[serde(default)]
    pub receipt_url: Option<String>,
    pub payment_type: PaymentType,
    #[serde(default)]
    pub configuration_id: Option<Uuid>,
    #[serde(default)]
    pub metadata: serde_json::Value,
    #[serde(default)]
    pub refunds: Vec<RefundEntry>,
    #[serde(default)]
    pub refund_status: Option<RefundStatus>,
    #[serde(default)]
    pub refunded_amount: Decimal,
}

impl Payment {
    pub fn remaining_refundable(&self) -> Decimal {
        (self.amount - self.refunded_amount).max(Decimal::ZERO)
    }

    pub fn has_refund(&self, refund_id: &str) -> bool {
        self.refunds.iter().any(|r| r.refund_id == refund_id)
    }

    /// Records a refund; a refund that exhausts the charge flips the status.
    pub fn record_refund(&mut self, entry: RefundEntry) {
        self.refunded_amount += entry.amount;
        self.refunds.push(entry);
        self.refund_status = Some(RefundStatus::Refunded);
        if self.refunded_amount >= self.amount {
            self.status = PaymentRecordStatus::Refunded;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payment(amount: Decimal) -> Payment {
        Payment {
            id: Uuid::new_v4(),
            parent_id: Uuid::new_v4(),
            player_ids: vec![],
            team_ids: vec![],
            payment_id: "ext".into(),
            payment_system: ProviderKind::Square,
            order_id: None,
            location_id: None,
            merchant_id: None,
            buyer_email: "a@example.com".into(),
            card: CardDetails::default(),
            amount,
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

    fn refund(id: &str, amount: Decimal) -> RefundEntry {
        RefundEntry {
            refund_id: id.into(),
            amount,
            reason: None,
            status: "COMPLETED".into(),
            processed_at: Utc::now(),
        }
    }

    #[test]
    fn test_partial_then_full_refund() {
        let mut p = payment(Decimal::new(5000, 2));
        p.record_refund(refund("r1", Decimal::new(2000, 2)));
        assert_eq!(p.status, PaymentRecordStatus::Completed);
        assert_eq!(p.remaining_refundable(), Decimal::new(3000, 2));
        assert_eq!(p.refund_status, Some(RefundStatus::Refunded));

        p.record_refund(refund("r2", Decimal::new(3000, 2)));
        assert_eq!(p.status, PaymentRecordStatus::Refunded);
        assert_eq!(p.remaining_refundable(), Decimal::ZERO);
        assert!(p.has_refund("r1"));
    }
}
