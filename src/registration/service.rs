//! Entry points that create players, teams and `pending` registrations
//! ahead of payment.

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::database::store::{Store, StoreTx};
use crate::error::{AppError, AppErrorKind, AppResult, FieldError};
use crate::models::{
    Parent, Player, PlayerIdentity, PlayerSeason, Program, Registration,
    RegistrationKey, RegistrationPatch, Team, TeamLevel, TeamTournament,
};
use crate::registration::store;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewPlayer {
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
}

impl NewPlayer {
    pub fn identity(&self) -> PlayerIdentity {
        PlayerIdentity {
            full_name: self.full_name.clone(),
            dob: self.dob,
            gender: self.gender.clone(),
        }
    }

    fn errors(&self, prefix: &str) -> Vec<FieldError> {
        let mut errors = Vec::new();
        if self.full_name.trim().is_empty() {
            errors.push(FieldError::new(format!("{}fullName", prefix), "is required"));
        }
        if self.gender.trim().is_empty() {
            errors.push(FieldError::new(format!("{}gender", prefix), "is required"));
        }
        if self.dob > Utc::now().date_naive() {
            errors.push(FieldError::new(format!("{}dob", prefix), "cannot be in the future"));
        }
        errors
    }

    fn into_player(self, parent_id: Uuid) -> Player {
        let mut player = Player::new(parent_id, self.full_name, self.gender, self.dob);
        player.school_name = self.school_name.filter(|s| !s.trim().is_empty());
        player.grade = self.grade.filter(|g| !g.trim().is_empty());
        player.is_grade_overridden = self.is_grade_overridden;
        player.aau_number = self.aau_number.filter(|a| !a.trim().is_empty());
        player
    }
}

/// One team named in a tournament registration: an existing team by id, or
/// a team found or created by name, grade and sex.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamEntry {
    #[serde(default)]
    pub team_id: Option<Uuid>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub grade: String,
    #[serde(default)]
    pub sex: String,
    pub level: TeamLevel,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerRegistration {
    pub player: Player,
    pub registration: Option<Registration>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamRegistration {
    pub team: Team,
    pub registration: Registration,
}

pub(crate) fn program_errors(program: &Program, prefix: &str) -> Vec<FieldError> {
    let mut errors = Vec::new();
    if program.season.trim().is_empty() {
        errors.push(FieldError::new(format!("{}season", prefix), "is required"));
    }
    if program.year <= 0 {
        errors.push(FieldError::new(format!("{}year", prefix), "must be a positive year"));
    }
    errors
}

pub(crate) fn tournament_errors(tournament: &str, year: i32) -> Vec<FieldError> {
    let mut errors = Vec::new();
    if tournament.trim().is_empty() {
        errors.push(FieldError::new("tournament", "is required"));
    }
    if year <= 0 {
        errors.push(FieldError::new("year", "must be a positive year"));
    }
    errors
}

pub(crate) fn reject(errors: Vec<FieldError>) -> AppResult<()> {
    if errors.is_empty() {
        Ok(())
    } else {
        Err(AppError::new(AppErrorKind::Validation(errors)))
    }
}

pub struct RegistrationService<S> {
    store: Arc<S>,
}

impl<S: Store> RegistrationService<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Registers one player under `parent_id`, optionally enrolling it in
    /// `program` as `pending`.
    pub async fn register_player(
        &self,
        parent_id: Uuid,
        player: NewPlayer,
        program: Option<Program>,
    ) -> AppResult<PlayerRegistration> {
        let mut errors = player.errors("");
        if let Some(program) = &program {
            errors.extend(program_errors(program, ""));
        }
        reject(errors)?;

        let mut tx = self.store.begin().await?;
        let mut parent = load_parent(&mut tx, parent_id).await?;
        let registered = add_player(&mut tx, &mut parent, player, program.as_ref()).await?;
        tx.save_parent(&parent).await?;
        tx.commit().await?;

        info!(parent_id = %parent_id, player_id = %registered.player.id, "Player registered");
        Ok(registered)
    }

    /// Registers a batch of players for one program in a single transaction.
    pub async fn register_camp(
        &self,
        parent_id: Uuid,
        players: Vec<NewPlayer>,
        program: Program,
    ) -> AppResult<Vec<PlayerRegistration>> {
        let mut errors = program_errors(&program, "");
        if players.is_empty() {
            errors.push(FieldError::new("players", "at least one player is required"));
        }
        for (i, player) in players.iter().enumerate() {
            errors.extend(player.errors(&format!("players[{}].", i)));
        }
        reject(errors)?;

        for (i, player) in players.iter().enumerate() {
            let identity = player.identity();
            if players[..i].iter().any(|other| same_identity(&other.identity(), &identity)) {
                return Err(AppError::duplicate(format!(
                    "{} appears more than once in this registration",
                    player.full_name.trim()
                )));
            }
        }

        let mut tx = self.store.begin().await?;
        let mut parent = load_parent(&mut tx, parent_id).await?;
        let mut registered = Vec::with_capacity(players.len());
        for player in players {
            registered.push(add_player(&mut tx, &mut parent, player, Some(&program)).await?);
        }
        tx.save_parent(&parent).await?;
        tx.commit().await?;

        info!(
            parent_id = %parent_id,
            players = registered.len(),
            season = %program.season,
            year = program.year,
            "Camp registration saved"
        );
        Ok(registered)
    }

    /// Writes a `pending` tournament entry and Registration for each team,
    /// creating teams that do not exist yet with the caller as coach.
    pub async fn register_tournament_teams(
        &self,
        parent_id: Uuid,
        tournament: &str,
        year: i32,
        teams: Vec<TeamEntry>,
    ) -> AppResult<Vec<TeamRegistration>> {
        let mut errors = tournament_errors(tournament, year);
        if teams.is_empty() {
            errors.push(FieldError::new("teams", "at least one team is required"));
        }
        for (i, entry) in teams.iter().enumerate() {
            if entry.team_id.is_none() {
                for (field, value) in [("name", &entry.name), ("grade", &entry.grade), ("sex", &entry.sex)] {
                    if value.trim().is_empty() {
                        errors.push(FieldError::new(format!("teams[{}].{}", i, field), "is required"));
                    }
                }
            }
        }
        reject(errors)?;

        let mut tx = self.store.begin().await?;
        let mut parent = load_parent(&mut tx, parent_id).await?;
        let mut seen = Vec::new();
        let mut registered = Vec::with_capacity(teams.len());

        for entry in teams {
            let mut team = find_or_create_team(&mut tx, &entry, parent_id).await?;
            if seen.contains(&team.id) {
                return Err(AppError::duplicate(format!(
                    "Team {} appears more than once in this registration",
                    team.name
                )));
            }
            seen.push(team.id);

            if entry.level != team.level {
                return Err(AppErrorKind::LevelMismatch {
                    existing: team.level,
                    requested: entry.level,
                }
                .into());
            }
            team.check_level(tournament, year, team.level)?;
            if team
                .find_tournament(tournament, year)
                .is_some_and(|t| t.payment_complete)
            {
                return Err(AppError::duplicate(format!(
                    "{} is already registered and paid for {} {}",
                    team.name, tournament, year
                )));
            }

            let key = RegistrationKey::Team {
                team_id: team.id,
                parent_id,
                tournament: tournament.trim().to_string(),
                year,
            };
            if tx.find_registration(&key).await?.is_some_and(|r| r.is_paid()) {
                return Err(AppError::duplicate(format!(
                    "{} is already registered for {} {}",
                    team.name, tournament, year
                )));
            }

            store::ensure_coach(&mut tx, &mut team, parent_id).await?;
            let registration = store::upsert_registration(
                &mut tx,
                &key,
                &RegistrationPatch::pending().with_level(team.level),
            )
            .await?;
            let pending_entry =
                TeamTournament::pending(tournament, year, team.level).with_registration(registration.id);
            store::add_or_update_team_tournament(&mut tx, &mut team, pending_entry).await?;

            registered.push(TeamRegistration { team, registration });
        }

        if !parent.is_coach {
            parent.is_coach = true;
            parent.updated_at = Utc::now();
            tx.save_parent(&parent).await?;
        }
        tx.commit().await?;

        info!(
            parent_id = %parent_id,
            tournament = %tournament,
            year,
            teams = registered.len(),
            "Tournament teams registered"
        );
        Ok(registered)
    }
}

fn same_identity(a: &PlayerIdentity, b: &PlayerIdentity) -> bool {
    a.normalized_name() == b.normalized_name()
        && a.dob == b.dob
        && a.gender.trim().eq_ignore_ascii_case(b.gender.trim())
}

pub(crate) async fn load_parent<T: StoreTx>(tx: &mut T, parent_id: Uuid) -> AppResult<Parent> {
    tx.find_parent(parent_id)
        .await?
        .ok_or_else(|| AppError::not_found("Parent", parent_id))
}

async fn add_player<T: StoreTx>(
    tx: &mut T,
    parent: &mut Parent,
    input: NewPlayer,
    program: Option<&Program>,
) -> AppResult<PlayerRegistration> {
    store::assert_no_duplicate_player(tx, parent.id, &input.identity()).await?;

    let mut player = input.into_player(parent.id);
    tx.save_player(&player).await?;

    let registration = match program {
        Some(program) => {
            let entry = PlayerSeason::pending(program);
            Some(store::upsert_player_season(tx, &mut player, entry).await?)
        }
        None => None,
    };

    parent.index_player(player.id);
    Ok(PlayerRegistration {
        player,
        registration,
    })
}

async fn find_or_create_team<T: StoreTx>(
    tx: &mut T,
    entry: &TeamEntry,
    parent_id: Uuid,
) -> AppResult<Team> {
    if let Some(team_id) = entry.team_id {
        return tx
            .find_team(team_id)
            .await?
            .ok_or_else(|| AppError::not_found("Team", team_id));
    }

    match tx
        .find_team_by_identity(&entry.name, &entry.grade, &entry.sex)
        .await?
    {
        Some(team) => Ok(team),
        None => {
            let team = Team::new(&entry.name, &entry.grade, &entry.sex, entry.level, parent_id);
            tx.save_team(&team).await?;
            Ok(team)
        }
    }
}
