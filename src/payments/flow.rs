//! Payment flows and the validated request the orchestrator runs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use uuid::Uuid;

use crate::error::{AppResult, FieldError};
use crate::models::{team, PaymentType, Program, ProgramRef, ProviderKind, TeamLevel};
use crate::registration::service::{program_errors, reject, tournament_errors};

/// The five ways a charge can be taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Flow {
    Tryout,
    Training,
    TournamentTeam,
    TournamentTeams,
    General,
}

impl Flow {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tryout => "tryout",
            Self::Training => "training",
            Self::TournamentTeam => "tournament-team",
            Self::TournamentTeams => "tournament-teams",
            Self::General => "general",
        }
    }

    pub fn is_team_flow(&self) -> bool {
        matches!(self, Self::TournamentTeam | Self::TournamentTeams)
    }

    pub fn payment_type(&self) -> PaymentType {
        match self {
            Self::Tryout => PaymentType::Tryout,
            Self::Training => PaymentType::Training,
            Self::TournamentTeam | Self::TournamentTeams => PaymentType::Tournament,
            Self::General => PaymentType::General,
        }
    }

    /// Title of the confirmation email template.
    pub fn email_template(&self) -> &'static str {
        match self {
            Self::Tryout => "tryout receipt",
            Self::Training => "training receipt",
            Self::TournamentTeam | Self::TournamentTeams => "tournament receipt",
            Self::General => "generic receipt",
        }
    }

    /// Reference id sent to the processor with the charge.
    pub fn reference_id(&self, parent_id: Uuid, items: &LineItems, at: DateTime<Utc>) -> String {
        match (self, items) {
            (Self::Training, _) => format!("training:{}:{}", parent_id, at.timestamp_millis()),
            (Self::TournamentTeam, LineItems::Teams { team_ids, year, .. }) => {
                let team_id = team_ids.first().copied().unwrap_or(parent_id);
                format!("t:{}:{}", team::id_suffix(team_id), year)
            }
            (Self::TournamentTeams, LineItems::Teams { year, .. }) => {
                format!("t:{}:{}", team::id_suffix(parent_id), year)
            }
            _ => format!("parent:{}", parent_id),
        }
    }

    /// Human-readable note sent to the processor. `team_name` is used by the
    /// single-team flow.
    pub fn note(&self, items: &LineItems, team_name: Option<&str>) -> String {
        let count = items.len();
        match (self, items) {
            (Self::Tryout, _) => format!("Tryout payment for {} player(s)", count),
            (Self::Training, _) => format!("Training payment for {} player(s)", count),
            (Self::General, _) => format!("Payment for {} player(s)", count),
            (Self::TournamentTeam, LineItems::Teams { tournament, year, .. }) => format!(
                "Tournament reg: {} {} – Team {}",
                tournament.trim(),
                year,
                team_name.unwrap_or("")
            ),
            (_, LineItems::Teams { tournament, year, .. }) => format!(
                "Tournament reg: {} {} – {} team(s)",
                tournament.trim(),
                year,
                count
            ),
            (_, LineItems::Players(_)) => format!("Payment for {} player(s)", count),
        }
    }
}

impl fmt::Display for Flow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One player being paid for, with the program it is enrolled in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerLine {
    pub player_id: Uuid,
    pub season: String,
    pub year: i32,
    #[serde(default)]
    pub tryout_id: Option<String>,
}

impl PlayerLine {
    pub fn program(&self) -> Program {
        Program::new(self.season.trim(), self.year, self.tryout_id.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineItems {
    Players(Vec<PlayerLine>),
    Teams {
        tournament: String,
        year: i32,
        /// Level the client expects; checked against each team's own level.
        level: Option<TeamLevel>,
        team_ids: Vec<Uuid>,
    },
}

impl LineItems {
    pub fn len(&self) -> usize {
        match self {
            Self::Players(lines) => lines.len(),
            Self::Teams { team_ids, .. } => team_ids.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Programs this payment covers, for the parent aggregate.
    pub fn programs(&self) -> Vec<ProgramRef> {
        match self {
            Self::Players(lines) => {
                let mut programs: Vec<ProgramRef> = Vec::new();
                for line in lines {
                    let program = ProgramRef::Season(line.program());
                    if !programs.contains(&program) {
                        programs.push(program);
                    }
                }
                programs
            }
            Self::Teams {
                tournament, year, ..
            } => vec![ProgramRef::Tournament {
                name: tournament.trim().to_string(),
                year: *year,
            }],
        }
    }
}

/// A charge request after the HTTP layer has picked the flow.
#[derive(Debug, Clone)]
pub struct PaymentRequest {
    pub flow: Flow,
    pub provider: Option<ProviderKind>,
    pub minor_amount: i64,
    pub source_token: Option<String>,
    pub source_id: Option<String>,
    pub buyer_email: Option<String>,
    pub items: LineItems,
}

impl PaymentRequest {
    /// The card source to charge: the token, else the source id.
    pub fn source(&self) -> Option<&str> {
        [self.source_token.as_deref(), self.source_id.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .find(|s| !s.is_empty())
    }

    /// Rejects malformed requests before anything touches the store or the
    /// processor.
    pub fn validate(&self) -> AppResult<()> {
        let mut errors = Vec::new();
        if self.minor_amount <= 0 {
            errors.push(FieldError::new("amount", "must be greater than zero"));
        }
        if self.source().is_none() {
            errors.push(FieldError::new("sourceToken", "sourceToken or sourceId is required"));
        }

        match (&self.items, self.flow.is_team_flow()) {
            (LineItems::Players(lines), false) => {
                if lines.is_empty() {
                    errors.push(FieldError::new("players", "at least one player is required"));
                }
                let mut seen = HashSet::new();
                for (i, line) in lines.iter().enumerate() {
                    let program = line.program();
                    errors.extend(program_errors(&program, &format!("players[{}].", i)));
                    let key = (
                        line.player_id,
                        program.season.to_lowercase(),
                        program.year,
                        program.tryout_id.clone(),
                    );
                    if !seen.insert(key) {
                        errors.push(FieldError::new(format!("players[{}]", i), "duplicate line item"));
                    }
                }
            }
            (
                LineItems::Teams {
                    tournament,
                    year,
                    team_ids,
                    ..
                },
                true,
            ) => {
                errors.extend(tournament_errors(tournament, *year));
                if team_ids.is_empty() {
                    errors.push(FieldError::new("teamIds", "at least one team is required"));
                }
                if self.flow == Flow::TournamentTeam && team_ids.len() > 1 {
                    errors.push(FieldError::new("teamIds", "exactly one team is required"));
                }
                let mut seen = HashSet::new();
                for (i, id) in team_ids.iter().enumerate() {
                    if !seen.insert(*id) {
                        errors.push(FieldError::new(format!("teamIds[{}]", i), "duplicate line item"));
                    }
                }
            }
            _ => errors.push(FieldError::new(
                "items",
                format!("line items do not match the {} flow", self.flow),
            )),
        }

        reject(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppErrorKind;

    fn line(player_id: Uuid) -> PlayerLine {
        PlayerLine {
            player_id,
            season: "Spring Tryout".into(),
            year: 2025,
            tryout_id: Some("spring2025".into()),
        }
    }

    fn request(items: LineItems, flow: Flow) -> PaymentRequest {
        PaymentRequest {
            flow,
            provider: None,
            minor_amount: 5000,
            source_token: Some("cnon:card-nonce-ok".into()),
            source_id: None,
            buyer_email: None,
            items,
        }
    }

    fn fields(err: crate::error::AppError) -> Vec<String> {
        match err.kind {
            AppErrorKind::Validation(fields) => fields.into_iter().map(|f| f.field).collect(),
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_source_is_rejected() {
        let mut req = request(LineItems::Players(vec![line(Uuid::new_v4())]), Flow::Tryout);
        req.source_token = Some("  ".into());
        assert_eq!(fields(req.validate().unwrap_err()), vec!["sourceToken"]);

        req.source_id = Some("src_1".into());
        assert_eq!(req.source(), Some("src_1"));
        assert!(req.validate().is_ok());
    }

    #[test]
    fn test_duplicate_lines_and_bad_program() {
        let player = Uuid::new_v4();
        let mut bad = line(Uuid::new_v4());
        bad.season = " ".into();
        bad.year = 0;
        let req = request(
            LineItems::Players(vec![line(player), line(player), bad]),
            Flow::General,
        );
        let f = fields(req.validate().unwrap_err());
        assert!(f.contains(&"players[1]".to_string()));
        assert!(f.contains(&"players[2].season".to_string()));
        assert!(f.contains(&"players[2].year".to_string()));
    }

    #[test]
    fn test_single_team_flow_needs_exactly_one_team() {
        let items = LineItems::Teams {
            tournament: "Winter Classic".into(),
            year: 2026,
            level: None,
            team_ids: vec![Uuid::new_v4(), Uuid::new_v4()],
        };
        let f = fields(request(items.clone(), Flow::TournamentTeam).validate().unwrap_err());
        assert_eq!(f, vec!["teamIds"]);
        assert!(request(items, Flow::TournamentTeams).validate().is_ok());
    }

    #[test]
    fn test_items_must_match_flow() {
        let req = request(LineItems::Players(vec![line(Uuid::new_v4())]), Flow::TournamentTeams);
        assert_eq!(fields(req.validate().unwrap_err()), vec!["items"]);
    }

    #[test]
    fn test_reference_ids_and_notes() {
        let parent = Uuid::new_v4();
        let team = Uuid::new_v4();
        let teams = LineItems::Teams {
            tournament: "Winter Classic".into(),
            year: 2026,
            level: None,
            team_ids: vec![team],
        };
        let players = LineItems::Players(vec![line(Uuid::new_v4()), line(Uuid::new_v4())]);
        let now = Utc::now();

        assert_eq!(Flow::Tryout.reference_id(parent, &players, now), format!("parent:{}", parent));
        assert!(Flow::Training
            .reference_id(parent, &players, now)
            .starts_with(&format!("training:{}:", parent)));
        assert_eq!(
            Flow::TournamentTeam.reference_id(parent, &teams, now),
            format!("t:{}:2026", team::id_suffix(team))
        );
        assert_eq!(
            Flow::TournamentTeams.reference_id(parent, &teams, now),
            format!("t:{}:2026", team::id_suffix(parent))
        );

        assert_eq!(Flow::Tryout.note(&players, None), "Tryout payment for 2 player(s)");
        assert_eq!(
            Flow::TournamentTeam.note(&teams, Some("Hawks")),
            "Tournament reg: Winter Classic 2026 – Team Hawks"
        );
        assert_eq!(
            Flow::TournamentTeams.note(&teams, None),
            "Tournament reg: Winter Classic 2026 – 1 team(s)"
        );
    }

    #[test]
    fn test_programs_are_deduplicated() {
        let items = LineItems::Players(vec![line(Uuid::new_v4()), line(Uuid::new_v4())]);
        assert_eq!(items.programs().len(), 1);
    }
}
