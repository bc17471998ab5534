use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::common::{CardDetails, PaymentStamp, PaymentStatus, Program};

/// A registered child, owned by exactly one parent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Player {
    pub id: Uuid,
    pub parent_id: Uuid,
    pub full_name: String,
    pub gender: String,
    pub dob: NaiveDate,
    #[serde(default)]
    pub school_name: Option<String>,
    #[serde(default)]
    pub grade: Option<String>,
    #[serde(default)]
    pub is_grade_overridden: bool,
    #[serde(default)]
    pub aau_number: Option<String>,
    #[serde(default)]
    pub season: Option<String>,
    #[serde(default)]
    pub registration_year: Option<i32>,
    #[serde(default)]
    pub payment_status: PaymentStatus,
    #[serde(default)]
    pub payment_complete: bool,
    #[serde(default)]
    pub seasons: Vec<PlayerSeason>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One program enrolment embedded on a player.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerSeason {
    pub season: String,
    pub year: i32,
    #[serde(default)]
    pub tryout_id: Option<String>,
    pub registration_date: DateTime<Utc>,
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
}

/// Fields that identify a player for duplicate detection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerIdentity {
    pub full_name: String,
    pub dob: NaiveDate,
    pub gender: String,
}

impl PlayerIdentity {
    /// Value stored in the unique identity index beside `parent_id`.
    pub fn normalized_name(&self) -> String {
        normalize_name(&self.full_name)
    }

    pub fn matches(&self, player: &Player) -> bool {
        normalize_name(&player.full_name) == self.normalized_name()
            && player.dob == self.dob
            && player.gender.trim().eq_ignore_ascii_case(self.gender.trim())
    }
}

pub(crate) fn normalize_name(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

impl PlayerSeason {
    pub fn pending(program: &Program) -> Self {
        Self {
            season: program.season.trim().to_string(),
            year: program.year,
            tryout_id: program.tryout_id.clone(),
            registration_date: Utc::now(),
            payment_status: PaymentStatus::Pending,
            payment_complete: false,
            payment_id: None,
            amount_paid: None,
            card_last4: None,
            card_brand: None,
            payment_date: None,
        }
    }

    pub fn paid(program: &Program, stamp: &PaymentStamp) -> Self {
        let mut entry = Self::pending(program);
        entry.apply_payment(stamp);
        entry
    }

    pub fn program(&self) -> Program {
        Program::new(self.season.clone(), self.year, self.tryout_id.clone())
    }

    pub fn matches(&self, program: &Program) -> bool {
        program.matches(&self.season, self.year, self.tryout_id.as_deref())
    }

    pub fn apply_payment(&mut self, stamp: &PaymentStamp) {
        self.payment_status = PaymentStatus::Paid;
        self.payment_complete = true;
        self.payment_id = Some(stamp.payment_id.clone());
        self.amount_paid = Some(stamp.amount_paid);
        self.card_last4 = stamp.card.last4.clone();
        self.card_brand = stamp.card.brand.clone();
        self.payment_date = Some(stamp.payment_date);
    }

    pub fn card(&self) -> CardDetails {
        CardDetails {
            last4: self.card_last4.clone(),
            brand: self.card_brand.clone(),
            exp_month: None,
            exp_year: None,
        }
    }
}

impl Player {
    pub fn new(
        parent_id: Uuid,
        full_name: impl Into<String>,
        gender: impl Into<String>,
        dob: NaiveDate,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            parent_id,
            full_name: full_name.into().trim().to_string(),
            gender: gender.into().trim().to_string(),
            dob,
            school_name: None,
            grade: None,
            is_grade_overridden: false,
            aau_number: None,
            season: None,
            registration_year: None,
            payment_status: PaymentStatus::Pending,
            payment_complete: false,
            seasons: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn identity(&self) -> PlayerIdentity {
        PlayerIdentity {
            full_name: self.full_name.clone(),
            dob: self.dob,
            gender: self.gender.clone(),
        }
    }

    pub fn find_season(&self, program: &Program) -> Option<&PlayerSeason> {
        self.seasons.iter().find(|s| s.matches(program))
    }

    pub fn find_season_mut(&mut self, program: &Program) -> Option<&mut PlayerSeason> {
        self.seasons.iter_mut().find(|s| s.matches(program))
    }

    /// Fills in a missing tryout id from the player's own entries.
    ///
    /// A program that names a tryout, or that has an exact entry without one,
    /// comes back unchanged. Otherwise the entry for the same season and year
    /// is adopted: an unpaid one first, then the most recently registered.
    pub fn resolve_program(&self, program: &Program) -> Program {
        if program.tryout_id.is_some() || self.find_season(program).is_some() {
            return program.clone();
        }
        self.seasons
            .iter()
            .filter(|s| program.same_season(&s.season, s.year))
            .max_by_key(|s| (!s.payment_complete, s.registration_date))
            .map(|s| Program::new(program.season.clone(), program.year, s.tryout_id.clone()))
            .unwrap_or_else(|| program.clone())
    }

    /// Replaces the entry matching `(season ci, year, tryoutId)` keeping its
    /// original `registrationDate`, or appends a new one. Returns whether the
    /// document changed; an identical upsert leaves the player untouched.
    pub fn upsert_season(&mut self, mut entry: PlayerSeason) -> bool {
        let program = entry.program();
        let before = self.clone();

        match self.find_season_mut(&program) {
            Some(existing) => {
                entry.registration_date = existing.registration_date;
                *existing = entry;
            }
            None => self.seasons.push(entry),
        }
        self.refresh_mirror();

        let changed = *self != before;
        if changed {
            self.updated_at = Utc::now();
        }
        changed
    }

    /// Entry with the greatest `registrationDate`; later position wins ties.
    pub fn latest_season(&self) -> Option<&PlayerSeason> {
        self.seasons
            .iter()
            .enumerate()
            .max_by(|(ia, a), (ib, b)| {
                a.registration_date
                    .cmp(&b.registration_date)
                    .then(ia.cmp(ib))
            })
            .map(|(_, s)| s)
    }

    /// Copies the latest season onto the top-level denormalised fields.
    pub fn refresh_mirror(&mut self) {
        let latest = self.latest_season().map(|s| {
            (
                s.season.clone(),
                s.year,
                s.payment_status,
                s.payment_complete,
            )
        });
        if let Some((season, year, status, complete)) = latest {
            self.season = Some(season);
            self.registration_year = Some(year);
            self.payment_status = status;
            self.payment_complete = complete;
        }
    }
}
