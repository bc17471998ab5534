//! Write-side operations over players, teams and registrations.
//!
//! Every function runs inside the caller's [`StoreTx`]; nothing here commits.
//! Together they keep each `seasons[]` / `tournaments[]` element and its
//! [`Registration`] row in agreement.

use tracing::debug;
use uuid::Uuid;

use crate::database::store::StoreTx;
use crate::error::{AppError, AppResult};
use crate::models::{
    Parent, PaymentStatus, Player, PlayerIdentity, PlayerSeason, Program, ProgramRef,
    Registration, RegistrationKey, RegistrationPatch, Team, TeamTournament,
};

/// Fails with `DuplicateRegistration` when the parent already has a player
/// with the same name, date of birth and gender.
pub async fn assert_no_duplicate_player<T: StoreTx>(
    tx: &mut T,
    parent_id: Uuid,
    identity: &PlayerIdentity,
) -> AppResult<()> {
    let players = tx.players_for_parent(parent_id).await?;
    if players.iter().any(|p| identity.matches(p)) {
        return Err(AppError::duplicate(
            "A player with this name and date of birth is already registered",
        )
        .with_context(format!("parent {}", parent_id)));
    }
    Ok(())
}

/// Checks `player` against `program` before a new enrolment or payment.
///
/// A paid entry (or a paid Registration row) is a duplicate. Otherwise the
/// status of the existing entry, if any, is returned so the caller can
/// upgrade a `pending` one or re-open a `failed` one.
pub async fn assert_no_duplicate_season<T: StoreTx>(
    tx: &mut T,
    player: &Player,
    program: &Program,
) -> AppResult<Option<PaymentStatus>> {
    let key = RegistrationKey::Player {
        player_id: player.id,
        parent_id: player.parent_id,
        program: program.clone(),
    };
    let registration = tx.find_registration(&key).await?;
    let entry = player.find_season(program);

    let paid = entry.is_some_and(|s| s.payment_complete)
        || registration.as_ref().is_some_and(Registration::is_paid);
    if paid {
        return Err(AppError::duplicate(format!(
            "{} is already registered for {} {}",
            player.full_name, program.season, program.year
        )));
    }

    Ok(entry
        .map(|s| s.payment_status)
        .or_else(|| registration.map(|r| r.payment_status)))
}

/// Replaces or appends the matching `seasons[]` entry, saves the player and
/// brings its Registration row into agreement. Returns that row.
pub async fn upsert_player_season<T: StoreTx>(
    tx: &mut T,
    player: &mut Player,
    entry: PlayerSeason,
) -> AppResult<Registration> {
    let program = entry.program();
    if let Some(existing) = player.find_season(&program) {
        if !existing.payment_status.can_transition(entry.payment_status) {
            return Err(AppError::invalid_transition(
                existing.payment_status,
                entry.payment_status,
            ));
        }
    }

    if player.upsert_season(entry) {
        tx.save_player(player).await?;
    }

    let season = player
        .find_season(&program)
        .cloned()
        .ok_or_else(|| AppError::internal("season entry vanished after upsert"))?;
    let key = RegistrationKey::Player {
        player_id: player.id,
        parent_id: player.parent_id,
        program: season.program(),
    };
    upsert_registration(tx, &key, &RegistrationPatch::mirroring(&season)).await
}

/// Creates or updates the Registration row for `key`.
pub async fn upsert_registration<T: StoreTx>(
    tx: &mut T,
    key: &RegistrationKey,
    patch: &RegistrationPatch,
) -> AppResult<Registration> {
    let (mut registration, is_new) = match tx.find_registration(key).await? {
        Some(existing) => (existing, false),
        None => (Registration::new(key), true),
    };

    if !registration.payment_status.can_transition(patch.payment_status) {
        return Err(AppError::invalid_transition(
            registration.payment_status,
            patch.payment_status,
        ));
    }

    let before = registration.clone();
    registration.apply(patch);
    if is_new || !same_payload(&before, &registration) {
        tx.save_registration(&registration).await?;
        debug!(registration_id = %registration.id, status = %registration.payment_status, "Registration saved");
    }
    Ok(registration)
}

fn same_payload(a: &Registration, b: &Registration) -> bool {
    let mut b = b.clone();
    b.updated_at = a.updated_at;
    *a == b
}

/// Replaces or appends the team's `(tournament, year)` entry and saves the
/// team. A level conflict leaves the team untouched.
pub async fn add_or_update_team_tournament<T: StoreTx>(
    tx: &mut T,
    team: &mut Team,
    entry: TeamTournament,
) -> AppResult<()> {
    if let Some(existing) = team.find_tournament(&entry.tournament, entry.year) {
        if !existing.payment_status.can_transition(entry.payment_status) {
            return Err(AppError::invalid_transition(
                existing.payment_status,
                entry.payment_status,
            ));
        }
    }
    team.upsert_tournament(entry)?;
    tx.save_team(team).await?;
    Ok(())
}

/// Adds `parent_id` to the team's coaches if absent.
pub async fn ensure_coach<T: StoreTx>(tx: &mut T, team: &mut Team, parent_id: Uuid) -> AppResult<bool> {
    let added = team.ensure_coach(parent_id);
    if added {
        tx.save_team(team).await?;
    }
    Ok(added)
}

/// Recomputes `parent.paymentComplete` from the Registration rows of the
/// programs in `current`, and saves the parent.
///
/// The aggregate is true only when at least one such row exists and every
/// one of them is paid.
pub async fn aggregate_parent_payment<T: StoreTx>(
    tx: &mut T,
    parent: &mut Parent,
    current: &[ProgramRef],
) -> AppResult<bool> {
    let registrations = tx.registrations_for_parent(parent.id).await?;
    let complete = all_paid(&registrations, current);
    parent.payment_complete = complete;
    parent.updated_at = chrono::Utc::now();
    tx.save_parent(parent).await?;
    Ok(complete)
}

fn all_paid(registrations: &[Registration], current: &[ProgramRef]) -> bool {
    let mut relevant = registrations
        .iter()
        .filter(|r| current.iter().any(|p| r.in_program(p)))
        .peekable();
    relevant.peek().is_some() && relevant.all(Registration::is_paid)
}
