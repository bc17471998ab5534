//! Payment provider trait definitions
//!
//! Defines the common interface every card processor adapter implements.

use async_trait::async_trait;

use crate::models::ProviderKind;
use crate::payments::error::ProviderResult;
use crate::payments::types::{
    ChargeRequest, ChargeResult, CustomerRequest, PaymentDetails, RefundRequest, RefundResult,
};

/// Trait for card processor adapters
///
/// Square, Clover, Stripe and PayPal implement this trait so the orchestrator
/// can charge, refund and look up payments without knowing which processor
/// is active.
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    /// Processor this adapter speaks to
    fn kind(&self) -> ProviderKind;

    /// Charge a card source
    ///
    /// Implementations must not retry: a charge that may have reached the
    /// processor is never re-sent.
    ///
    /// # Arguments
    /// * `request` - Source token, minor-unit amount, currency and references
    ///
    /// # Returns
    /// * `ChargeResult` - External id, normalised status and card metadata
    async fn charge(&self, request: ChargeRequest) -> ProviderResult<ChargeResult>;

    /// Refund all or part of a captured charge
    async fn refund(&self, request: RefundRequest) -> ProviderResult<RefundResult>;

    /// Look up the processor's current view of a charge
    async fn fetch(&self, external_payment_id: &str) -> ProviderResult<PaymentDetails>;

    /// Create a processor-side customer record
    ///
    /// Returns `None` for processors that do not keep customers.
    async fn create_customer(&self, _request: CustomerRequest) -> ProviderResult<Option<String>> {
        Ok(None)
    }

    /// Validate webhook signature
    ///
    /// # Arguments
    /// * `payload` - Raw webhook payload body
    /// * `signature` - Signature from webhook header
    ///
    /// # Returns
    /// * `bool` - True if signature is valid, false otherwise
    fn verify_webhook(&self, _payload: &[u8], _signature: &str) -> bool {
        false
    }
}
