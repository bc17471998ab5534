use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::common::{PaymentStamp, PaymentStatus, Program, TeamLevel};
use super::player::PlayerSeason;

/// What a registration row is keyed on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum RegistrationKey {
    #[serde(rename_all = "camelCase")]
    Player {
        player_id: Uuid,
        parent_id: Uuid,
        program: Program,
    },
    #[serde(rename_all = "camelCase")]
    Team {
        team_id: Uuid,
        parent_id: Uuid,
        tournament: String,
        year: i32,
    },
}

impl RegistrationKey {
    pub fn parent_id(&self) -> Uuid {
        match self {
            Self::Player { parent_id, .. } | Self::Team { parent_id, .. } => *parent_id,
        }
    }

    /// Canonical string stored in the `(parent_id, program_key)` unique index.
    pub fn program_key(&self) -> String {
        match self {
            Self::Player {
                player_id, program, ..
            } => format!(
                "player:{}:{}:{}:{}",
                player_id,
                program.season.trim().to_lowercase(),
                program.year,
                program.tryout_id.as_deref().unwrap_or("-")
            ),
            Self::Team {
                team_id,
                tournament,
                year,
                ..
            } => format!(
                "team:{}:{}:{}",
                team_id,
                tournament.trim().to_lowercase(),
                year
            ),
        }
    }
}

/// First-class per-(player, program) or per-(team, tournament) row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Registration {
    pub id: Uuid,
    pub parent_id: Uuid,
    #[serde(default)]
    pub player_id: Option<Uuid>,
    #[serde(default)]
    pub team_id: Option<Uuid>,
    pub season: String,
    pub year: i32,
    #[serde(default)]
    pub tryout_id: Option<String>,
    #[serde(default)]
    pub tournament: Option<String>,
    #[serde(default)]
    pub level_of_competition: Option<TeamLevel>,
    pub payment_status: PaymentStatus,
    pub payment_complete: bool,
    #[serde(default)]
    pub payment_id: Option<String>,
    #[serde(default)]
    pub amount_paid: Option<Decimal>,
    #[serde(default)]
    pub card_last4: Option<String>,
    #[serde(default)]
    pub card_brand: Option<String>,
    #[serde(default)]
    pub payment_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub registration_complete: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Field values written by an upsert.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RegistrationPatch {
    pub payment_status: PaymentStatus,
    pub payment: Option<PaymentStamp>,
    pub level_of_competition: Option<TeamLevel>,
}

impl RegistrationPatch {
    pub fn pending() -> Self {
        Self::default()
    }

    pub fn paid(stamp: PaymentStamp) -> Self {
        Self {
            payment_status: PaymentStatus::Paid,
            payment: Some(stamp),
            level_of_competition: None,
        }
    }

    pub fn with_level(mut self, level: TeamLevel) -> Self {
        self.level_of_competition = Some(level);
        self
    }

    /// The patch that keeps a registration in step with a `seasons[]` entry.
    pub fn mirroring(season: &PlayerSeason) -> Self {
        let payment = match (&season.payment_id, season.amount_paid, season.payment_date) {
            (Some(id), Some(amount), Some(date)) => Some(PaymentStamp {
                payment_id: id.clone(),
                amount_paid: amount,
                card: season.card(),
                payment_date: date,
            }),
            _ => None,
        };
        Self {
            payment_status: season.payment_status,
            payment,
            level_of_competition: None,
        }
    }
}

impl Registration {
    pub fn new(key: &RegistrationKey) -> Self {
        let now = Utc::now();
        let (player_id, team_id, season, year, tryout_id, tournament) = match key {
            RegistrationKey::Player {
                player_id, program, ..
            } => (
                Some(*player_id),
                None,
                program.season.trim().to_string(),
                program.year,
                program.tryout_id.clone(),
                None,
            ),
            RegistrationKey::Team {
                team_id,
                tournament,
                year,
                ..
            } => (
                None,
                Some(*team_id),
                tournament.trim().to_string(),
                *year,
                None,
                Some(tournament.trim().to_string()),
            ),
        };
        Self {
            id: Uuid::new_v4(),
            parent_id: key.parent_id(),
            player_id,
            team_id,
            season,
            year,
            tryout_id,
            tournament,
            level_of_competition: None,
            payment_status: PaymentStatus::Pending,
            payment_complete: false,
            payment_id: None,
            amount_paid: None,
            card_last4: None,
            card_brand: None,
            payment_date: None,
            registration_complete: false,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn key(&self) -> RegistrationKey {
        match (self.player_id, self.team_id) {
            (_, Some(team_id)) => RegistrationKey::Team {
                team_id,
                parent_id: self.parent_id,
                tournament: self.tournament.clone().unwrap_or_else(|| self.season.clone()),
                year: self.year,
            },
            (player_id, None) => RegistrationKey::Player {
                player_id: player_id.unwrap_or_default(),
                parent_id: self.parent_id,
                program: Program::new(self.season.clone(), self.year, self.tryout_id.clone()),
            },
        }
    }

    pub fn program_key(&self) -> String {
        self.key().program_key()
    }

    pub fn is_paid(&self) -> bool {
        self.payment_status == PaymentStatus::Paid && self.payment_complete
    }

    /// Applies a patch; payment fields are cleared when the patch carries none.
    pub fn apply(&mut self, patch: &RegistrationPatch) {
        self.payment_status = patch.payment_status;
        self.payment_complete = patch.payment_status == PaymentStatus::Paid;
        self.registration_complete = self.payment_complete;
        match &patch.payment {
            Some(stamp) => {
                self.payment_id = Some(stamp.payment_id.clone());
                self.amount_paid = Some(stamp.amount_paid);
                self.card_last4 = stamp.card.last4.clone();
                self.card_brand = stamp.card.brand.clone();
                self.payment_date = Some(stamp.payment_date);
            }
            None if patch.payment_status == PaymentStatus::Pending => {
                self.payment_id = None;
                self.amount_paid = None;
                self.card_last4 = None;
                self.card_brand = None;
                self.payment_date = None;
            }
            None => {}
        }
        if let Some(level) = patch.level_of_competition {
            self.level_of_competition = Some(level);
        }
        self.updated_at = Utc::now();
    }

    /// Whether this row agrees with a `seasons[]` entry on every mirrored field.
    pub fn agrees_with(&self, season: &PlayerSeason) -> bool {
        self.payment_status == season.payment_status
            && self.payment_complete == season.payment_complete
            && self.payment_id == season.payment_id
            && self.card_last4 == season.card_last4
            && self.card_brand == season.card_brand
    }

    /// Whether this row belongs to the given program or tournament.
    pub fn in_program(&self, program: &ProgramRef) -> bool {
        match program {
            ProgramRef::Season(p) => {
                self.player_id.is_some()
                    && p.matches(&self.season, self.year, self.tryout_id.as_deref())
            }
            ProgramRef::Tournament { name, year } => {
                self.team_id.is_some()
                    && self.year == *year
                    && self
                        .tournament
                        .as_deref()
                        .is_some_and(|t| t.trim().eq_ignore_ascii_case(name.trim()))
            }
        }
    }
}

/// The "current program" a payment was made for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgramRef {
    Season(Program),
    Tournament { name: String, year: i32 },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::common::CardDetails;

    #[test]
    fn test_program_key_normalises_season_case() {
        let player_id = Uuid::new_v4();
        let parent_id = Uuid::new_v4();
        let a = RegistrationKey::Player {
            player_id,
            parent_id,
            program: Program::new("Spring Tryout", 2025, Some("spring2025".into())),
        };
        let b = RegistrationKey::Player {
            player_id,
            parent_id,
            program: Program::new(" spring tryout ", 2025, Some("spring2025".into())),
        };
        assert_eq!(a.program_key(), b.program_key());
        assert!(a.program_key().starts_with("player:"));
    }

    #[test]
    fn test_team_registration_round_trips_key() {
        let key = RegistrationKey::Team {
            team_id: Uuid::new_v4(),
            parent_id: Uuid::new_v4(),
            tournament: "Winter Classic".into(),
            year: 2026,
        };
        let reg = Registration::new(&key);
        assert_eq!(reg.key(), key);
        assert!(reg.in_program(&ProgramRef::Tournament {
            name: "winter classic".into(),
            year: 2026
        }));
    }

    #[test]
    fn test_apply_paid_then_mirror_check() {
        let program = Program::new("Summer Training", 2025, None);
        let key = RegistrationKey::Player {
            player_id: Uuid::new_v4(),
            parent_id: Uuid::new_v4(),
            program: program.clone(),
        };
        let stamp = PaymentStamp {
            payment_id: "pay_1".into(),
            amount_paid: Decimal::new(2500, 2),
            card: CardDetails {
                last4: Some("4242".into()),
                brand: Some("visa".into()),
                exp_month: Some(12),
                exp_year: Some(2030),
            },
            payment_date: Utc::now(),
        };
        let season = PlayerSeason::paid(&program, &stamp);
        let mut reg = Registration::new(&key);
        reg.apply(&RegistrationPatch::mirroring(&season));
        assert!(reg.is_paid());
        assert!(reg.registration_complete);
        assert!(reg.agrees_with(&season));
    }
}
