//! Request and response types shared by every card processor adapter.
//!
//! Amounts crossing this boundary are always integer minor units.

use serde::{Deserialize, Serialize};

use crate::models::CardDetails;

/// A card charge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChargeRequest {
    /// Opaque token produced by the processor's client SDK.
    pub source_id: String,
    /// Amount in minor units (cents)
    pub minor_amount: i64,
    pub currency: String,
    /// Our reference for the charge, e.g. `parent:<id>`
    pub customer_reference_id: String,
    pub note: String,
    pub buyer_email: String,
    /// Processor-side customer id, when one is on file
    pub customer_id: Option<String>,
}

/// Normalised processor status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChargeStatus {
    Completed,
    Paid,
    Authorized,
    Pending,
    Failed,
}

impl ChargeStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Completed | Self::Paid | Self::Authorized)
    }

    /// Maps the processor status strings the adapters see.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "COMPLETED" | "SUCCEEDED" | "CAPTURED" | "APPROVED" => Self::Completed,
            "PAID" => Self::Paid,
            "AUTHORIZED" | "REQUIRES_CAPTURE" => Self::Authorized,
            "FAILED" | "CANCELED" | "CANCELLED" | "DECLINED" | "VOIDED" => Self::Failed,
            _ => Self::Pending,
        }
    }
}

/// What a processor returned for a charge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChargeResult {
    pub external_payment_id: String,
    pub status: ChargeStatus,
    pub order_id: Option<String>,
    pub location_id: Option<String>,
    pub merchant_id: Option<String>,
    pub receipt_url: Option<String>,
    pub card: CardDetails,
    /// Processor message for a failed charge
    pub failure_message: Option<String>,
}

impl ChargeResult {
    pub fn new(external_payment_id: impl Into<String>, status: ChargeStatus) -> Self {
        Self {
            external_payment_id: external_payment_id.into(),
            status,
            order_id: None,
            location_id: None,
            merchant_id: None,
            receipt_url: None,
            card: CardDetails::default(),
            failure_message: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefundRequest {
    pub external_payment_id: String,
    pub minor_amount: i64,
    pub currency: String,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefundResult {
    pub refund_id: String,
    /// Processor status string, e.g. `COMPLETED` or `PENDING`
    pub status: String,
    pub minor_amount: i64,
}

/// Processor-side view of a charge, as returned by `fetch`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentDetails {
    pub external_payment_id: String,
    pub status: ChargeStatus,
    pub raw_status: String,
    pub minor_amount: Option<i64>,
    pub currency: Option<String>,
    pub card: CardDetails,
    pub receipt_url: Option<String>,
    pub order_id: Option<String>,
}

/// Data used to create a processor-side customer record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomerRequest {
    pub email: String,
    pub given_name: String,
    pub family_name: Option<String>,
    pub phone: Option<String>,
    pub reference_id: String,
}
