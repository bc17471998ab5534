//! Payment provider implementations
//!
//! Concrete implementations of the PaymentProvider trait for each card
//! processor, plus [`ProviderAdapter`], the tagged variant the registry hands
//! out.

pub mod clover;
pub mod http;
pub mod paypal;
pub mod simulated;
pub mod square;
pub mod stripe;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

pub use clover::CloverProvider;
pub use paypal::PayPalProvider;
pub use simulated::SimulatedProvider;
pub use square::SquareProvider;
pub use stripe::StripeProvider;

use crate::models::{PaymentConfiguration, ProviderKind};
use crate::payments::error::{ConfigError, ProviderResult};
use crate::payments::traits::PaymentProvider;
use crate::payments::types::{
    ChargeRequest, ChargeResult, CustomerRequest, PaymentDetails, RefundRequest, RefundResult,
};

/// One constructed processor adapter.
pub enum ProviderAdapter {
    Square(SquareProvider),
    Clover(CloverProvider),
    Stripe(StripeProvider),
    PayPal(PayPalProvider),
    Simulated(SimulatedProvider),
}

impl ProviderAdapter {
    /// Builds the adapter a configuration describes. Secrets are read once here.
    ///
    /// `testMode` selects the simulated adapter, and is refused outside sandbox.
    pub fn from_configuration(
        config: &PaymentConfiguration,
        timeout: Duration,
    ) -> Result<Self, ConfigError> {
        let kind = config.payment_system;
        if config.test_mode {
            if config.is_production() {
                return Err(ConfigError::new(
                    kind.as_str(),
                    "testMode",
                    "test mode cannot be enabled for a production configuration",
                ));
            }
            // Webhooks are still checked with the processor's own rules when
            // its credentials are present.
            let verifier = Self::processor(config, timeout)
                .ok()
                .map(|adapter| Box::new(adapter) as Box<dyn PaymentProvider>);
            return Ok(Self::Simulated(
                SimulatedProvider::new(kind).with_webhook_verifier(verifier),
            ));
        }

        Self::processor(config, timeout)
    }

    fn processor(config: &PaymentConfiguration, timeout: Duration) -> Result<Self, ConfigError> {
        let kind = config.payment_system;
        let built = match kind {
            ProviderKind::Square => {
                let credentials = config
                    .square
                    .as_ref()
                    .ok_or_else(|| ConfigError::missing_field("square", "accessToken"))?;
                SquareProvider::new(credentials, config.environment, timeout).map(Self::Square)
            }
            ProviderKind::Clover => {
                let credentials = config
                    .clover
                    .as_ref()
                    .ok_or_else(|| ConfigError::missing_field("clover", "accessToken"))?;
                CloverProvider::new(credentials, config.environment, timeout).map(Self::Clover)
            }
            ProviderKind::Stripe => {
                let credentials = config
                    .stripe
                    .as_ref()
                    .ok_or_else(|| ConfigError::missing_field("stripe", "secretKey"))?;
                StripeProvider::new(credentials, timeout).map(Self::Stripe)
            }
            ProviderKind::PayPal => {
                let credentials = config
                    .paypal
                    .as_ref()
                    .ok_or_else(|| ConfigError::missing_field("paypal", "clientId"))?;
                PayPalProvider::new(credentials, config.environment, timeout).map(Self::PayPal)
            }
        };
        built.map_err(|e| ConfigError::new(kind.as_str(), "httpClient", e.message))
    }

    pub fn is_simulated(&self) -> bool {
        matches!(self, Self::Simulated(_))
    }
}

#[async_trait]
impl PaymentProvider for ProviderAdapter {
    fn kind(&self) -> ProviderKind {
        match self {
            Self::Square(p) => p.kind(),
            Self::Clover(p) => p.kind(),
            Self::Stripe(p) => p.kind(),
            Self::PayPal(p) => p.kind(),
            Self::Simulated(p) => p.kind(),
        }
    }

    async fn charge(&self, request: ChargeRequest) -> ProviderResult<ChargeResult> {
        match self {
            Self::Square(p) => p.charge(request).await,
            Self::Clover(p) => p.charge(request).await,
            Self::Stripe(p) => p.charge(request).await,
            Self::PayPal(p) => p.charge(request).await,
            Self::Simulated(p) => p.charge(request).await,
        }
    }

    async fn refund(&self, request: RefundRequest) -> ProviderResult<RefundResult> {
        match self {
            Self::Square(p) => p.refund(request).await,
            Self::Clover(p) => p.refund(request).await,
            Self::Stripe(p) => p.refund(request).await,
            Self::PayPal(p) => p.refund(request).await,
            Self::Simulated(p) => p.refund(request).await,
        }
    }

    async fn fetch(&self, external_payment_id: &str) -> ProviderResult<PaymentDetails> {
        match self {
            Self::Square(p) => p.fetch(external_payment_id).await,
            Self::Clover(p) => p.fetch(external_payment_id).await,
            Self::Stripe(p) => p.fetch(external_payment_id).await,
            Self::PayPal(p) => p.fetch(external_payment_id).await,
            Self::Simulated(p) => p.fetch(external_payment_id).await,
        }
    }

    async fn create_customer(&self, request: CustomerRequest) -> ProviderResult<Option<String>> {
        match self {
            Self::Square(p) => p.create_customer(request).await,
            Self::Clover(p) => p.create_customer(request).await,
            Self::Stripe(p) => p.create_customer(request).await,
            Self::PayPal(p) => p.create_customer(request).await,
            Self::Simulated(p) => p.create_customer(request).await,
        }
    }

    fn verify_webhook(&self, payload: &[u8], signature: &str) -> bool {
        match self {
            Self::Square(p) => p.verify_webhook(payload, signature),
            Self::Clover(p) => p.verify_webhook(payload, signature),
            Self::Stripe(p) => p.verify_webhook(payload, signature),
            Self::PayPal(p) => p.verify_webhook(payload, signature),
            Self::Simulated(p) => p.verify_webhook(payload, signature),
        }
    }
}

/// Builds adapters for the registry.
pub trait ProviderFactory: Send + Sync {
    fn build(&self, config: &PaymentConfiguration) -> Result<Arc<dyn PaymentProvider>, ConfigError>;
}

/// Builds a [`ProviderAdapter`] with a fixed HTTP timeout.
#[derive(Debug, Clone)]
pub struct DefaultProviderFactory {
    timeout: Duration,
}

impl DefaultProviderFactory {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for DefaultProviderFactory {
    fn default() -> Self {
        Self::new(Duration::from_secs(http::DEFAULT_TIMEOUT_SECS))
    }
}

impl ProviderFactory for DefaultProviderFactory {
    fn build(&self, config: &PaymentConfiguration) -> Result<Arc<dyn PaymentProvider>, ConfigError> {
        let adapter = ProviderAdapter::from_configuration(config, self.timeout)?;
        Ok(Arc::new(adapter))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Environment;

    #[test]
    fn test_test_mode_selects_simulated_in_sandbox() {
        let mut config = PaymentConfiguration::square("tok", "LOC");
        config.test_mode = true;
        let adapter = ProviderAdapter::from_configuration(&config, Duration::from_secs(5)).unwrap();
        assert!(adapter.is_simulated());
        assert_eq!(adapter.kind(), ProviderKind::Square);
    }

    #[test]
    fn test_test_mode_refused_in_production() {
        let mut config = PaymentConfiguration::stripe("sk_live");
        config.test_mode = true;
        config.environment = Environment::Production;
        let err = ProviderAdapter::from_configuration(&config, Duration::from_secs(5))
            .err()
            .unwrap();
        assert_eq!(err.field, "testMode");
    }

    #[test]
    fn test_builds_real_adapter_per_kind() {
        let config = PaymentConfiguration::clover("tok", "MID");
        let adapter = ProviderAdapter::from_configuration(&config, Duration::from_secs(5)).unwrap();
        assert!(matches!(adapter, ProviderAdapter::Clover(_)));

        let config = PaymentConfiguration::paypal("id", "secret");
        let adapter = ProviderAdapter::from_configuration(&config, Duration::from_secs(5)).unwrap();
        assert_eq!(adapter.kind(), ProviderKind::PayPal);
    }

    #[test]
    fn test_simulated_adapter_verifies_with_processor_rules() {
        let mut config = PaymentConfiguration::clover("tok", "MID");
        config.test_mode = true;
        if let Some(clover) = config.clover.as_mut() {
            clover.webhook_secret = Some("shh".into());
        }
        let adapter = ProviderAdapter::from_configuration(&config, Duration::from_secs(5)).unwrap();
        assert!(adapter.is_simulated());
        assert!(adapter.verify_webhook(b"{}", "shh"));
        assert!(!adapter.verify_webhook(b"{}", "nope"));

        // Without credentials nothing verifies.
        let mut bare = PaymentConfiguration::stripe("");
        bare.stripe = None;
        bare.test_mode = true;
        let adapter = ProviderAdapter::from_configuration(&bare, Duration::from_secs(5)).unwrap();
        assert!(!adapter.verify_webhook(b"{}", "t=1,v1=00"));
    }
}
