use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::common::ProviderKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Sandbox,
    Production,
}

/// Processor settings row. One configuration is active at a time; secrets are
/// only exposed through [`PaymentConfiguration::redacted`] on read paths.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentConfiguration {
    pub id: Uuid,
    pub payment_system: ProviderKind,
    pub is_active: bool,
    #[serde(default)]
    pub is_default: bool,
    #[serde(default)]
    pub environment: Environment,
    /// Routes charges to the simulated adapter. Only honoured in sandbox.
    #[serde(default)]
    pub test_mode: bool,
    #[serde(default)]
    pub square: Option<SquareCredentials>,
    #[serde(default)]
    pub clover: Option<CloverCredentials>,
    #[serde(default)]
    pub stripe: Option<StripeCredentials>,
    #[serde(default)]
    pub paypal: Option<PayPalCredentials>,
    #[serde(default)]
    pub settings: PaymentSettings,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SquareCredentials {
    #[serde(default)]
    pub access_token: String,
    #[serde(default)]
    pub location_id: String,
    #[serde(default)]
    pub application_id: Option<String>,
    #[serde(default)]
    pub webhook_signature_key: Option<String>,
    #[serde(default)]
    pub webhook_url: Option<String>,
}

#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloverCredentials {
    #[serde(default)]
    pub access_token: String,
    #[serde(default)]
    pub merchant_id: String,
    #[serde(default)]
    pub public_key: Option<String>,
    #[serde(default)]
    pub webhook_secret: Option<String>,
}

#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StripeCredentials {
    #[serde(default)]
    pub secret_key: String,
    #[serde(default)]
    pub publishable_key: Option<String>,
    #[serde(default)]
    pub webhook_secret: Option<String>,
}

#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayPalCredentials {
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    #[serde(default)]
    pub webhook_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentSettings {
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default)]
    pub tax_rate: Decimal,
    #[serde(default)]
    pub default_description: Option<String>,
    #[serde(default = "default_true")]
    pub enable_refunds: bool,
    #[serde(default)]
    pub enable_partial_refunds: bool,
}

fn default_currency() -> String {
    "USD".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for PaymentSettings {
    fn default() -> Self {
        Self {
            currency: default_currency(),
            tax_rate: Decimal::ZERO,
            default_description: None,
            enable_refunds: true,
            enable_partial_refunds: false,
        }
    }
}

impl PaymentConfiguration {
    fn base(kind: ProviderKind) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            payment_system: kind,
            is_active: true,
            is_default: true,
            environment: Environment::Sandbox,
            test_mode: false,
            square: None,
            clover: None,
            stripe: None,
            paypal: None,
            settings: PaymentSettings::default(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn square(access_token: impl Into<String>, location_id: impl Into<String>) -> Self {
        let mut config = Self::base(ProviderKind::Square);
        config.square = Some(SquareCredentials {
            access_token: access_token.into(),
            location_id: location_id.into(),
            ..Default::default()
        });
        config
    }

    pub fn clover(access_token: impl Into<String>, merchant_id: impl Into<String>) -> Self {
        let mut config = Self::base(ProviderKind::Clover);
        config.clover = Some(CloverCredentials {
            access_token: access_token.into(),
            merchant_id: merchant_id.into(),
            ..Default::default()
        });
        config
    }

    pub fn stripe(secret_key: impl Into<String>) -> Self {
        let mut config = Self::base(ProviderKind::Stripe);
        config.stripe = Some(StripeCredentials {
            secret_key: secret_key.into(),
            ..Default::default()
        });
        config
    }

    pub fn paypal(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        let mut config = Self::base(ProviderKind::PayPal);
        config.paypal = Some(PayPalCredentials {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            ..Default::default()
        });
        config
    }

    pub fn currency(&self) -> &str {
        let currency = self.settings.currency.trim();
        if currency.is_empty() {
            "USD"
        } else {
            currency
        }
    }

    pub fn is_production(&self) -> bool {
        self.environment == Environment::Production
    }

    /// Location (Square) or merchant (Clover) this configuration charges into.
    pub fn account_id(&self) -> Option<&str> {
        match self.payment_system {
            ProviderKind::Square => self.square.as_ref().map(|s| s.location_id.as_str()),
            ProviderKind::Clover => self.clover.as_ref().map(|c| c.merchant_id.as_str()),
            _ => None,
        }
    }

    /// Read-side view with every secret masked.
    pub fn redacted(&self) -> serde_json::Value {
        let mask = |s: &str| -> String {
            if s.is_empty() {
                String::new()
            } else {
                let tail: String = s.chars().rev().take(4).collect::<Vec<_>>().into_iter().rev().collect();
                format!("****{}", tail)
            }
        };
        serde_json::json!({
            "id": self.id,
            "paymentSystem": self.payment_system,
            "isActive": self.is_active,
            "isDefault": self.is_default,
            "environment": self.environment,
            "testMode": self.test_mode,
            "square": self.square.as_ref().map(|s| serde_json::json!({
                "accessToken": mask(&s.access_token),
                "locationId": s.location_id,
                "applicationId": s.application_id,
            })),
            "clover": self.clover.as_ref().map(|c| serde_json::json!({
                "accessToken": mask(&c.access_token),
                "merchantId": c.merchant_id,
            })),
            "stripe": self.stripe.as_ref().map(|s| serde_json::json!({
                "secretKey": mask(&s.secret_key),
                "publishableKey": s.publishable_key,
            })),
            "paypal": self.paypal.as_ref().map(|p| serde_json::json!({
                "clientId": p.client_id,
                "clientSecret": mask(&p.client_secret),
            })),
            "settings": self.settings,
            "updatedAt": self.updated_at,
        })
    }
}

impl fmt::Debug for PaymentConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PaymentConfiguration")
            .field("id", &self.id)
            .field("payment_system", &self.payment_system)
            .field("is_active", &self.is_active)
            .field("is_default", &self.is_default)
            .field("environment", &self.environment)
            .field("test_mode", &self.test_mode)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

macro_rules! redacted_debug {
    ($ty:ident, $($field:ident),*) => {
        impl fmt::Debug for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.debug_struct(stringify!($ty))
                    $(.field(stringify!($field), &self.$field))*
                    .finish_non_exhaustive()
            }
        }
    };
}

redacted_debug!(SquareCredentials, location_id, application_id);
redacted_debug!(CloverCredentials, merchant_id);
redacted_debug!(StripeCredentials, publishable_key);
redacted_debug!(PayPalCredentials, client_id);

/// Persisted email template, looked up by title.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailTemplate {
    pub id: Uuid,
    pub title: String,
    pub subject: String,
    pub content: String,
    #[serde(default)]
    pub variables: Vec<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default = "default_true")]
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl EmailTemplate {
    pub fn new(
        title: impl Into<String>,
        subject: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            title: title.into(),
            subject: subject.into(),
            content: content.into(),
            variables: Vec::new(),
            category: None,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }
}
