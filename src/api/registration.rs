//! Player, camp and tournament-team registration handlers.

use axum::extract::State;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::api::payments::success;
use crate::api::{ApiJson, AppState, AuthParent};
use crate::database::store::Store;
use crate::error::AppResult;
use crate::models::Program;
use crate::registration::{NewPlayer, TeamEntry};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerBody {
    #[serde(flatten)]
    pub player: NewPlayer,
    #[serde(default)]
    pub season: Option<String>,
    #[serde(default)]
    pub registration_year: Option<i32>,
    #[serde(default)]
    pub tryout_id: Option<String>,
}

impl PlayerBody {
    /// A program only when a season was named.
    fn program(&self) -> Option<Program> {
        let season = self.season.as_deref().map(str::trim).filter(|s| !s.is_empty())?;
        Some(Program::new(
            season,
            self.registration_year.unwrap_or(0),
            self.tryout_id.clone(),
        ))
    }
}

pub async fn register_player<S: Store>(
    State(state): State<AppState<S>>,
    AuthParent(parent): AuthParent,
    ApiJson(body): ApiJson<PlayerBody>,
) -> AppResult<Json<Value>> {
    let program = body.program();
    let registered = state
        .registrations
        .register_player(parent.id, body.player, program)
        .await?;
    success(registered)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CampBody {
    pub players: Vec<NewPlayer>,
    pub season: String,
    pub year: i32,
    #[serde(default)]
    pub tryout_id: Option<String>,
}

pub async fn register_camp<S: Store>(
    State(state): State<AppState<S>>,
    AuthParent(parent): AuthParent,
    ApiJson(body): ApiJson<CampBody>,
) -> AppResult<Json<Value>> {
    let program = Program::new(body.season.trim(), body.year, body.tryout_id);
    let registered = state
        .registrations
        .register_camp(parent.id, body.players, program)
        .await?;
    success(json!({ "players": registered }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamBody {
    pub tournament: String,
    pub year: i32,
    pub team: TeamEntry,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamsBody {
    pub tournament: String,
    pub year: i32,
    pub teams: Vec<TeamEntry>,
}

pub async fn register_tournament_team<S: Store>(
    State(state): State<AppState<S>>,
    AuthParent(parent): AuthParent,
    ApiJson(body): ApiJson<TeamBody>,
) -> AppResult<Json<Value>> {
    let mut registered = state
        .registrations
        .register_tournament_teams(parent.id, &body.tournament, body.year, vec![body.team])
        .await?;
    let registered = registered.pop();
    success(json!({ "registration": registered }))
}

pub async fn register_tournament_teams<S: Store>(
    State(state): State<AppState<S>>,
    AuthParent(parent): AuthParent,
    ApiJson(body): ApiJson<TeamsBody>,
) -> AppResult<Json<Value>> {
    let registered = state
        .registrations
        .register_tournament_teams(parent.id, &body.tournament, body.year, body.teams)
        .await?;
    success(json!({ "registrations": registered }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_player_body_flattens_player_fields() {
        let body: PlayerBody = serde_json::from_value(json!({
            "fullName": "Jordan Lee",
            "gender": "Male",
            "dob": "2013-04-02",
            "grade": "6",
            "season": "Spring Tryout",
            "registrationYear": 2025,
            "tryoutId": "spring2025",
        }))
        .unwrap();
        assert_eq!(body.player.full_name, "Jordan Lee");
        let program = body.program().unwrap();
        assert_eq!(program.season, "Spring Tryout");
        assert_eq!(program.year, 2025);
    }

    #[test]
    fn test_no_season_means_no_program() {
        let body: PlayerBody = serde_json::from_value(json!({
            "fullName": "Jordan Lee",
            "gender": "Male",
            "dob": "2013-04-02",
            "season": " ",
        }))
        .unwrap();
        assert!(body.program().is_none());
    }
}
