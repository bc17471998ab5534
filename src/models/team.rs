use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::common::{PaymentStamp, PaymentStatus, TeamLevel};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Team {
    pub id: Uuid,
    pub name: String,
    pub grade: String,
    pub sex: String,
    pub level: TeamLevel,
    pub coach_ids: Vec<Uuid>,
    #[serde(default)]
    pub payment_status: PaymentStatus,
    #[serde(default)]
    pub payment_complete: bool,
    #[serde(default)]
    pub tournaments: Vec<TeamTournament>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One tournament entry embedded on a team.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamTournament {
    pub tournament: String,
    pub year: i32,
    pub level_of_competition: TeamLevel,
    pub payment_status: PaymentStatus,
    pub payment_complete: bool,
    #[serde(default)]
    pub amount_paid: Option<Decimal>,
    #[serde(default)]
    pub payment_id: Option<String>,
    #[serde(default)]
    pub card_last4: Option<String>,
    #[serde(default)]
    pub card_brand: Option<String>,
    #[serde(default)]
    pub payment_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub registration_id: Option<Uuid>,
    pub registration_date: DateTime<Utc>,
}

/// An existing `(tournament, year)` entry was registered at another level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LevelConflict {
    pub existing: TeamLevel,
    pub requested: TeamLevel,
}

impl TeamTournament {
    pub fn pending(tournament: &str, year: i32, level: TeamLevel) -> Self {
        Self {
            tournament: tournament.trim().to_string(),
            year,
            level_of_competition: level,
            payment_status: PaymentStatus::Pending,
            payment_complete: false,
            amount_paid: None,
            payment_id: None,
            card_last4: None,
            card_brand: None,
            payment_date: None,
            registration_id: None,
            registration_date: Utc::now(),
        }
    }

    pub fn paid(tournament: &str, year: i32, level: TeamLevel, stamp: &PaymentStamp) -> Self {
        let mut entry = Self::pending(tournament, year, level);
        entry.payment_status = PaymentStatus::Paid;
        entry.payment_complete = true;
        entry.amount_paid = Some(stamp.amount_paid);
        entry.payment_id = Some(stamp.payment_id.clone());
        entry.card_last4 = stamp.card.last4.clone();
        entry.card_brand = stamp.card.brand.clone();
        entry.payment_date = Some(stamp.payment_date);
        entry
    }

    pub fn with_registration(mut self, registration_id: Uuid) -> Self {
        self.registration_id = Some(registration_id);
        self
    }

    pub fn matches(&self, tournament: &str, year: i32) -> bool {
        self.year == year && self.tournament.trim().eq_ignore_ascii_case(tournament.trim())
    }
}

impl Team {
    pub fn new(
        name: impl Into<String>,
        grade: impl Into<String>,
        sex: impl Into<String>,
        level: TeamLevel,
        coach_id: Uuid,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into().trim().to_string(),
            grade: grade.into().trim().to_string(),
            sex: sex.into().trim().to_string(),
            level,
            coach_ids: vec![coach_id],
            payment_status: PaymentStatus::Pending,
            payment_complete: false,
            tournaments: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_coached_by(&self, parent_id: Uuid) -> bool {
        self.coach_ids.contains(&parent_id)
    }

    /// Short id used in processor reference ids.
    pub fn id_suffix(&self) -> String {
        id_suffix(self.id)
    }

    pub fn find_tournament(&self, tournament: &str, year: i32) -> Option<&TeamTournament> {
        self.tournaments.iter().find(|t| t.matches(tournament, year))
    }

    /// Fails when an entry for the same `(tournament, year)` holds a different level.
    pub fn check_level(
        &self,
        tournament: &str,
        year: i32,
        requested: TeamLevel,
    ) -> Result<(), LevelConflict> {
        match self.find_tournament(tournament, year) {
            Some(existing) if existing.level_of_competition != requested => Err(LevelConflict {
                existing: existing.level_of_competition,
                requested,
            }),
            _ => Ok(()),
        }
    }

    /// Replaces the `(tournament, year)` entry, keeping its registration date,
    /// or appends it. Nothing changes when the level conflicts.
    pub fn upsert_tournament(&mut self, mut entry: TeamTournament) -> Result<(), LevelConflict> {
        self.check_level(&entry.tournament, entry.year, entry.level_of_competition)?;
        let position = self
            .tournaments
            .iter()
            .position(|t| t.matches(&entry.tournament, entry.year));
        match position {
            Some(index) => {
                let existing = &self.tournaments[index];
                entry.registration_date = existing.registration_date;
                if entry.registration_id.is_none() {
                    entry.registration_id = existing.registration_id;
                }
                self.tournaments[index] = entry;
            }
            None => self.tournaments.push(entry),
        }
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Adds a coach; returns false when already present.
    pub fn ensure_coach(&mut self, parent_id: Uuid) -> bool {
        if self.is_coached_by(parent_id) {
            return false;
        }
        self.coach_ids.push(parent_id);
        self.updated_at = Utc::now();
        true
    }

    pub fn mark_paid(&mut self) {
        self.payment_status = PaymentStatus::Paid;
        self.payment_complete = true;
        self.updated_at = Utc::now();
    }
}

pub(crate) fn id_suffix(id: Uuid) -> String {
    let simple = id.simple().to_string();
    simple[simple.len() - 8..].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn team(level: TeamLevel) -> Team {
        Team::new("Lakeside Hawks", "7th", "Boys", level, Uuid::new_v4())
    }

    #[test]
    fn test_level_mismatch_leaves_team_untouched() {
        let mut t = team(TeamLevel::Gold);
        t.upsert_tournament(TeamTournament::pending("Winter Classic", 2026, TeamLevel::Gold))
            .unwrap();
        let before = t.clone();

        let err = t
            .upsert_tournament(TeamTournament::pending(
                "winter classic",
                2026,
                TeamLevel::Silver,
            ))
            .unwrap_err();
        assert_eq!(err.existing, TeamLevel::Gold);
        assert_eq!(err.requested, TeamLevel::Silver);
        assert_eq!(t, before);
    }

    #[test]
    fn test_upsert_tournament_replaces_same_pair() {
        let mut t = team(TeamLevel::Silver);
        t.upsert_tournament(TeamTournament::pending("Winter Classic", 2026, TeamLevel::Silver))
            .unwrap();
        let reg_id = Uuid::new_v4();
        t.upsert_tournament(
            TeamTournament::pending("Winter Classic", 2026, TeamLevel::Silver)
                .with_registration(reg_id),
        )
        .unwrap();
        t.upsert_tournament(TeamTournament::pending("Winter Classic", 2027, TeamLevel::Silver))
            .unwrap();

        assert_eq!(t.tournaments.len(), 2);
        assert_eq!(t.tournaments[0].registration_id, Some(reg_id));
    }

    #[test]
    fn test_ensure_coach_appends_once() {
        let mut t = team(TeamLevel::Gold);
        let coach = Uuid::new_v4();
        assert!(t.ensure_coach(coach));
        assert!(!t.ensure_coach(coach));
        assert_eq!(t.coach_ids.len(), 2);
    }

    #[test]
    fn test_id_suffix_length() {
        assert_eq!(team(TeamLevel::Gold).id_suffix().len(), 8);
    }
}
