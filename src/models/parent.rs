use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::common::ProviderKind;

/// Account holder: a parent, guardian or coach.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Parent {
    pub id: Uuid,
    pub email: String,
    #[serde(default, skip_serializing)]
    pub password_hash: String,
    pub full_name: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default = "default_role")]
    pub role: String,
    #[serde(default)]
    pub is_coach: bool,
    #[serde(default)]
    pub aau_number: Option<String>,
    #[serde(default)]
    pub email_verified: bool,
    #[serde(default)]
    pub additional_guardians: Vec<Guardian>,
    #[serde(default)]
    pub square_customer_id: Option<String>,
    #[serde(default)]
    pub clover_customer_id: Option<String>,
    #[serde(default)]
    pub stripe_customer_id: Option<String>,
    #[serde(default)]
    pub paypal_payer_id: Option<String>,
    #[serde(default)]
    pub payment_complete: bool,
    /// Materialised index of owned players; `Player::parent_id` is authoritative.
    #[serde(default)]
    pub players: Vec<Uuid>,
    #[serde(default)]
    pub payments: Vec<Uuid>,
    #[serde(default)]
    pub communication_preferences: CommunicationPreferences,
    #[serde(default)]
    pub avatar: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn default_role() -> String {
    "user".to_string()
}

impl Parent {
    pub fn new(email: impl Into<String>, full_name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            email: email.into().trim().to_lowercase(),
            password_hash: String::new(),
            full_name: full_name.into(),
            phone: None,
            address: None,
            role: default_role(),
            is_coach: false,
            aau_number: None,
            email_verified: false,
            additional_guardians: Vec::new(),
            square_customer_id: None,
            clover_customer_id: None,
            stripe_customer_id: None,
            paypal_payer_id: None,
            payment_complete: false,
            players: Vec::new(),
            payments: Vec::new(),
            communication_preferences: CommunicationPreferences::default(),
            avatar: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role.eq_ignore_ascii_case("admin")
    }

    pub fn first_name(&self) -> &str {
        self.full_name.split_whitespace().next().unwrap_or("")
    }

    pub fn customer_id(&self, kind: ProviderKind) -> Option<&str> {
        match kind {
            ProviderKind::Square => self.square_customer_id.as_deref(),
            ProviderKind::Clover => self.clover_customer_id.as_deref(),
            ProviderKind::Stripe => self.stripe_customer_id.as_deref(),
            ProviderKind::PayPal => self.paypal_payer_id.as_deref(),
        }
    }

    /// Keeps the `players[]` index in step with a newly owned player.
    pub fn index_player(&mut self, player_id: Uuid) {
        if !self.players.contains(&player_id) {
            self.players.push(player_id);
        }
    }

    pub fn index_payment(&mut self, payment_id: Uuid) {
        if !self.payments.contains(&payment_id) {
            self.payments.push(payment_id);
        }
    }

    /// Every address that should receive mail for this account.
    pub fn recipients(&self) -> Vec<String> {
        let mut out = vec![self.email.clone()];
        for guardian in &self.additional_guardians {
            if let Some(email) = guardian.email.as_deref() {
                if !email.is_empty() && !out.iter().any(|e| e.eq_ignore_ascii_case(email)) {
                    out.push(email.to_lowercase());
                }
            }
        }
        out
    }
}

/// Additional guardian embedded on a parent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Guardian {
    pub full_name: String,
    #[serde(default)]
    pub relationship: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub is_coach: bool,
    #[serde(default)]
    pub aau_number: Option<String>,
}

/// Opt-in switches for each category of mail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PreferenceKey {
    EmailNotifications,
    NewsUpdates,
    OffersPromotions,
    MarketingEmails,
    TransactionalEmails,
    BroadcastEmails,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommunicationPreferences {
    pub email_notifications: bool,
    pub news_updates: bool,
    pub offers_promotions: bool,
    pub marketing_emails: bool,
    pub transactional_emails: bool,
    pub broadcast_emails: bool,
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
}

impl Default for CommunicationPreferences {
    fn default() -> Self {
        Self {
            email_notifications: true,
            news_updates: true,
            offers_promotions: true,
            marketing_emails: true,
            transactional_emails: true,
            broadcast_emails: true,
            last_updated: None,
        }
    }
}

impl CommunicationPreferences {
    pub fn allows(&self, key: PreferenceKey) -> bool {
        match key {
            PreferenceKey::EmailNotifications => self.email_notifications,
            PreferenceKey::NewsUpdates => self.news_updates,
            PreferenceKey::OffersPromotions => self.offers_promotions,
            PreferenceKey::MarketingEmails => self.marketing_emails,
            PreferenceKey::TransactionalEmails => self.transactional_emails,
            PreferenceKey::BroadcastEmails => self.broadcast_emails,
        }
    }

    pub fn set(&mut self, key: PreferenceKey, value: bool) {
        let slot = match key {
            PreferenceKey::EmailNotifications => &mut self.email_notifications,
            PreferenceKey::NewsUpdates => &mut self.news_updates,
            PreferenceKey::OffersPromotions => &mut self.offers_promotions,
            PreferenceKey::MarketingEmails => &mut self.marketing_emails,
            PreferenceKey::TransactionalEmails => &mut self.transactional_emails,
            PreferenceKey::BroadcastEmails => &mut self.broadcast_emails,
        };
        *slot = value;
        self.last_updated = Some(Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_parent_normalises_email() {
        let parent = Parent::new("  Coach@Example.COM ", "Dana Reyes");
        assert_eq!(parent.email, "coach@example.com");
        assert_eq!(parent.first_name(), "Dana");
        assert!(parent.communication_preferences.transactional_emails);
    }

    #[test]
    fn test_recipients_include_guardians_once() {
        let mut parent = Parent::new("a@example.com", "A Parent");
        parent.additional_guardians.push(Guardian {
            full_name: "B".into(),
            relationship: None,
            email: Some("B@example.com".into()),
            phone: None,
            is_coach: false,
            aau_number: None,
        });
        parent.additional_guardians.push(Guardian {
            full_name: "Dup".into(),
            relationship: None,
            email: Some("A@EXAMPLE.COM".into()),
            phone: None,
            is_coach: false,
            aau_number: None,
        });
        assert_eq!(parent.recipients(), vec!["a@example.com", "b@example.com"]);
    }

    #[test]
    fn test_preference_toggle() {
        let mut prefs = CommunicationPreferences::default();
        prefs.set(PreferenceKey::TransactionalEmails, false);
        assert!(!prefs.allows(PreferenceKey::TransactionalEmails));
        assert!(prefs.allows(PreferenceKey::NewsUpdates));
        assert!(prefs.last_updated.is_some());
    }

    #[test]
    fn test_password_hash_never_serialized() {
        let mut parent = Parent::new("a@example.com", "A Parent");
        parent.password_hash = "secret".into();
        let json = serde_json::to_value(&parent).unwrap();
        assert!(json.get("passwordHash").is_none());
    }
}
