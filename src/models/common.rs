//! Enumerations and small value types shared by the documents.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Payment state of a registration, a `seasons[]` element or a team tournament entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    #[default]
    Pending,
    Paid,
    Failed,
    Refunded,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Paid => "paid",
            Self::Failed => "failed",
            Self::Refunded => "refunded",
        }
    }

    /// Allowed transitions of the registration payment state machine.
    ///
    /// `failed -> pending` re-opens an entry for a fresh attempt; there is no
    /// direct `failed -> paid`.
    pub fn can_transition(self, to: PaymentStatus) -> bool {
        use PaymentStatus::*;
        matches!(
            (self, to),
            (Pending, Paid) | (Pending, Failed) | (Paid, Refunded) | (Failed, Pending)
        ) || self == to
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Card processors the portal can charge through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Square,
    Clover,
    Stripe,
    #[serde(rename = "paypal")]
    PayPal,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 4] = [Self::Square, Self::Clover, Self::Stripe, Self::PayPal];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Square => "square",
            Self::Clover => "clover",
            Self::Stripe => "stripe",
            Self::PayPal => "paypal",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "square" => Ok(Self::Square),
            "clover" => Ok(Self::Clover),
            "stripe" => Ok(Self::Stripe),
            "paypal" => Ok(Self::PayPal),
            other => Err(format!("unknown payment system '{}'", other)),
        }
    }
}

/// Competition level of a team.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TeamLevel {
    Gold,
    Silver,
}

impl fmt::Display for TeamLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Gold => f.write_str("Gold"),
            Self::Silver => f.write_str("Silver"),
        }
    }
}

/// What a Payment row paid for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentType {
    Tryout,
    Training,
    Tournament,
    General,
}

/// Card metadata echoed by a processor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardDetails {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last4: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brand: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp_month: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp_year: Option<u32>,
}

/// A registrable enrolment: `(season, year, tryoutId)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Program {
    pub season: String,
    pub year: i32,
    #[serde(default)]
    pub tryout_id: Option<String>,
}

impl Program {
    pub fn new(season: impl Into<String>, year: i32, tryout_id: Option<String>) -> Self {
        Self {
            season: season.into(),
            year,
            tryout_id: tryout_id.filter(|t| !t.trim().is_empty()),
        }
    }

    /// Season names compare case-insensitively; tryout ids compare exactly,
    /// so an entry without one only matches a program without one.
    pub fn matches(&self, season: &str, year: i32, tryout_id: Option<&str>) -> bool {
        self.same_season(season, year) && self.tryout_id.as_deref() == tryout_id
    }

    /// `(season ci, year)` equality, ignoring the tryout id.
    pub fn same_season(&self, season: &str, year: i32) -> bool {
        self.year == year && self.season.trim().eq_ignore_ascii_case(season.trim())
    }
}

/// Payment fields copied onto every paid row a charge touches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentStamp {
    pub payment_id: String,
    pub amount_paid: rust_decimal::Decimal,
    pub card: CardDetails,
    pub payment_date: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_machine() {
        use PaymentStatus::*;
        assert!(Pending.can_transition(Paid));
        assert!(Pending.can_transition(Failed));
        assert!(Paid.can_transition(Refunded));
        assert!(Failed.can_transition(Pending));
        assert!(Paid.can_transition(Paid));
        assert!(!Failed.can_transition(Paid));
        assert!(!Refunded.can_transition(Paid));
        assert!(!Paid.can_transition(Pending));
    }

    #[test]
    fn test_program_matching() {
        let query = Program::new("Spring Tryout", 2025, Some("spring2025".into()));
        assert!(query.matches("spring tryout", 2025, Some("spring2025")));
        assert!(!query.matches("spring tryout", 2025, None));
        assert!(!query.matches("spring tryout", 2024, Some("spring2025")));

        let loose = Program::new("Spring Tryout", 2025, None);
        assert!(!loose.matches("SPRING TRYOUT", 2025, Some("spring2025")));
        assert!(loose.matches("Spring Tryout", 2025, None));
        assert!(loose.same_season("SPRING TRYOUT ", 2025));
    }

    #[test]
    fn test_provider_kind_parse() {
        assert_eq!("PayPal".parse::<ProviderKind>(), Ok(ProviderKind::PayPal));
        assert_eq!(
            serde_json::to_string(&ProviderKind::PayPal).unwrap(),
            "\"paypal\""
        );
        assert!("venmo".parse::<ProviderKind>().is_err());
    }
}
