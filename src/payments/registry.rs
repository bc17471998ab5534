//! Provider registry
//!
//! Resolves the active [`PaymentConfiguration`], validates it and hands out a
//! constructed adapter. Adapters are cached per key until an admin clears or
//! switches the active provider; the cache is recomputable from the
//! configuration rows, so losing it on restart is harmless.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::database::store::{Store, StoreTx};
use crate::error::{AppError, AppResult};
use crate::models::{PaymentConfiguration, ProviderKind};
use crate::payments::error::ConfigError;
use crate::payments::providers::ProviderFactory;
use crate::payments::traits::PaymentProvider;

/// What a resolved configuration is about to be used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Charge,
    Refund { partial: bool },
}

/// An adapter together with the configuration it was built from.
#[derive(Clone)]
pub struct ResolvedProvider {
    pub adapter: Arc<dyn PaymentProvider>,
    pub configuration: Arc<PaymentConfiguration>,
}

impl ResolvedProvider {
    pub fn kind(&self) -> ProviderKind {
        self.configuration.payment_system
    }
}

const DEFAULT_KEY: &str = "default";

fn active_key(kind: ProviderKind) -> String {
    kind.as_str().to_string()
}

fn system_key(kind: ProviderKind) -> String {
    format!("system:{}", kind.as_str())
}

pub struct ProviderRegistry<S> {
    store: Arc<S>,
    factory: Arc<dyn ProviderFactory>,
    cache: RwLock<HashMap<String, ResolvedProvider>>,
}

impl<S: Store> ProviderRegistry<S> {
    pub fn new(store: Arc<S>, factory: Arc<dyn ProviderFactory>) -> Self {
        Self {
            store,
            factory,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Adapter for the active configuration of `kind`, or for the single
    /// active configuration when `kind` is `None`.
    ///
    /// Several active rows are resolved by preferring `isDefault`, then the
    /// most recent `updatedAt`.
    pub async fn get_service(&self, kind: Option<ProviderKind>) -> AppResult<ResolvedProvider> {
        let key = kind.map(active_key).unwrap_or_else(|| DEFAULT_KEY.to_string());
        if let Some(hit) = self.cache.read().await.get(&key) {
            return Ok(hit.clone());
        }

        let configurations = self.store.payment_configurations().await?;
        let configuration = select_active(&configurations, kind).ok_or_else(|| {
            let provider = kind.map(|k| k.as_str()).unwrap_or("none");
            ConfigError::new(provider, "isActive", "No active payment configuration")
        })?;

        let resolved = self.build(configuration.clone(), Operation::Charge)?;
        self.cache.write().await.insert(key, resolved.clone());
        Ok(resolved)
    }

    /// Adapter for payments already made through `kind`.
    ///
    /// Prefers the active configuration of that kind and falls back to the
    /// most recently updated one, so a payment taken before a switch can
    /// still be verified and refunded.
    pub async fn for_payment_system(&self, kind: ProviderKind) -> AppResult<ResolvedProvider> {
        let key = system_key(kind);
        if let Some(hit) = self.cache.read().await.get(&key) {
            return Ok(hit.clone());
        }

        let configurations = self.store.payment_configurations().await?;
        let configuration = select_active(&configurations, Some(kind))
            .or_else(|| {
                configurations
                    .iter()
                    .filter(|c| c.payment_system == kind)
                    .max_by_key(|c| c.updated_at)
            })
            .ok_or_else(|| {
                ConfigError::new(
                    kind.as_str(),
                    "paymentSystem",
                    "No payment configuration for this payment system",
                )
            })?;

        let resolved = self.build(configuration.clone(), Operation::Charge)?;
        self.cache.write().await.insert(key, resolved.clone());
        Ok(resolved)
    }

    /// Drop cached adapters for `kind`, or all of them.
    pub async fn clear(&self, kind: Option<ProviderKind>) {
        let mut cache = self.cache.write().await;
        match kind {
            Some(kind) => {
                cache.remove(&active_key(kind));
                cache.remove(&system_key(kind));
                cache.remove(DEFAULT_KEY);
            }
            None => cache.clear(),
        }
        info!(provider = ?kind.map(|k| k.as_str()), "Payment provider cache cleared");
    }

    /// Make the newest configuration of `kind` the active default and
    /// deactivate every other one, in one transaction.
    pub async fn switch(&self, kind: ProviderKind) -> AppResult<ResolvedProvider> {
        let mut tx = self.store.begin().await?;
        let configurations = tx.payment_configurations().await?;

        let mut target = configurations
            .iter()
            .filter(|c| c.payment_system == kind)
            .max_by_key(|c| c.updated_at)
            .cloned()
            .ok_or_else(|| AppError::not_found("PaymentConfiguration", kind))?;

        Self::validate(&target, Operation::Charge)?;

        let now = Utc::now();
        // Deactivate first: at most one active row per payment system.
        for other in configurations.iter().filter(|c| c.id != target.id) {
            if other.is_active || other.is_default {
                let mut other = other.clone();
                other.is_active = false;
                other.is_default = false;
                other.updated_at = now;
                tx.save_configuration(&other).await?;
            }
        }

        target.is_active = true;
        target.is_default = true;
        target.updated_at = now;
        tx.save_configuration(&target).await?;
        tx.commit().await?;

        self.clear(None).await;
        info!(provider = %kind, configuration_id = %target.id, "Switched active payment provider");
        self.get_service(Some(kind)).await
    }

    /// Asserts that `configuration` can serve `operation`.
    pub fn validate(configuration: &PaymentConfiguration, operation: Operation) -> Result<(), ConfigError> {
        let kind = configuration.payment_system;
        let provider = kind.as_str();
        let require = |field: &str, value: Option<&str>| -> Result<(), ConfigError> {
            match value {
                Some(v) if !v.trim().is_empty() => Ok(()),
                _ => Err(ConfigError::missing_field(provider, field)),
            }
        };

        match kind {
            ProviderKind::Square => {
                let creds = configuration.square.as_ref();
                require("accessToken", creds.map(|c| c.access_token.as_str()))?;
                require("locationId", creds.map(|c| c.location_id.as_str()))?;
            }
            ProviderKind::Clover => {
                let creds = configuration.clover.as_ref();
                require("accessToken", creds.map(|c| c.access_token.as_str()))?;
                require("merchantId", creds.map(|c| c.merchant_id.as_str()))?;
            }
            ProviderKind::Stripe => {
                let creds = configuration.stripe.as_ref();
                require("secretKey", creds.map(|c| c.secret_key.as_str()))?;
            }
            ProviderKind::PayPal => {
                let creds = configuration.paypal.as_ref();
                require("clientId", creds.map(|c| c.client_id.as_str()))?;
                require("clientSecret", creds.map(|c| c.client_secret.as_str()))?;
            }
        }

        if let Operation::Refund { partial } = operation {
            if !configuration.settings.enable_refunds {
                return Err(ConfigError::new(provider, "enableRefunds", "Refunds are disabled"));
            }
            if partial && !configuration.settings.enable_partial_refunds {
                return Err(ConfigError::new(
                    provider,
                    "enablePartialRefunds",
                    "Partial refunds are disabled",
                ));
            }
        }
        Ok(())
    }

    fn build(&self, configuration: PaymentConfiguration, operation: Operation) -> AppResult<ResolvedProvider> {
        Self::validate(&configuration, operation).map_err(|e| {
            warn!(provider = %e.provider, field = %e.field, "Payment configuration incomplete");
            e
        })?;
        let adapter = self.factory.build(&configuration)?;
        debug!(provider = %configuration.payment_system, "Constructed payment adapter");
        Ok(ResolvedProvider {
            adapter,
            configuration: Arc::new(configuration),
        })
    }
}

fn select_active(
    configurations: &[PaymentConfiguration],
    kind: Option<ProviderKind>,
) -> Option<&PaymentConfiguration> {
    configurations
        .iter()
        .filter(|c| c.is_active)
        .filter(|c| kind.map_or(true, |k| c.payment_system == k))
        .max_by_key(|c| (c.is_default, c.updated_at))
}
