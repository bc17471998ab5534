//! Pending registrations created ahead of payment, then paid.

mod common;

use chrono::NaiveDate;

use common::{spring_line, Harness};
use courtside_backend::database::Store;
use courtside_backend::models::{PaymentStatus, Program, TeamLevel};
use courtside_backend::payments::{Flow, LineItems, PaymentRequest};
use courtside_backend::registration::{NewPlayer, TeamEntry};

fn new_player(name: &str) -> NewPlayer {
    NewPlayer {
        full_name: name.to_string(),
        gender: "Female".to_string(),
        dob: NaiveDate::from_ymd_opt(2013, 4, 2).unwrap(),
        school_name: Some("Lincoln Middle".to_string()),
        grade: Some("6".to_string()),
        is_grade_overridden: false,
        aau_number: None,
    }
}

fn spring() -> Program {
    Program::new("Spring Tryout", 2025, Some("spring2025".to_string()))
}

fn new_team(name: &str, level: TeamLevel) -> TeamEntry {
    TeamEntry {
        team_id: None,
        name: name.to_string(),
        grade: "7th".to_string(),
        sex: "Boys".to_string(),
        level,
    }
}

#[tokio::test]
async fn test_registered_player_is_pending_then_paid() {
    let h = Harness::square();
    let parent = h.parent("pat@example.com");

    let registered = h
        .state
        .registrations
        .register_player(parent.id, new_player("Quinn Lee"), Some(spring()))
        .await
        .unwrap();
    let player_id = registered.player.id;
    let registration = registered.registration.unwrap();
    assert_eq!(registration.payment_status, PaymentStatus::Pending);

    let stored_parent = h.store.find_parent(parent.id).await.unwrap().unwrap();
    assert_eq!(stored_parent.players, vec![player_id]);

    let player = h.store.find_player(player_id).await.unwrap().unwrap();
    assert_eq!(player.find_season(&spring()).unwrap().payment_status, PaymentStatus::Pending);

    h.state
        .orchestrator
        .process(
            parent.id,
            common::player_request(Flow::Tryout, vec![spring_line(player_id)], 5000, "cnon:ok-1"),
        )
        .await
        .unwrap();

    let player = h.store.find_player(player_id).await.unwrap().unwrap();
    let season = player.find_season(&spring()).unwrap();
    assert_eq!(season.payment_status, PaymentStatus::Paid);
    assert_eq!(player.seasons.len(), 1);

    let registrations = h.store.all_registrations();
    assert_eq!(registrations.len(), 1);
    assert_eq!(registrations[0].id, registration.id);
    assert!(registrations[0].agrees_with(season));
}

#[tokio::test]
async fn test_duplicate_player_is_rejected() {
    let h = Harness::square();
    let parent = h.parent("pat@example.com");

    h.state
        .registrations
        .register_player(parent.id, new_player("Quinn Lee"), None)
        .await
        .unwrap();
    let err = h
        .state
        .registrations
        .register_player(parent.id, new_player("  quinn lee "), None)
        .await
        .unwrap_err();
    assert!(err.is_duplicate());
    assert_eq!(h.store.players_for_parent(parent.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_camp_batch_is_all_or_nothing() {
    let h = Harness::square();
    let parent = h.parent("pat@example.com");

    let err = h
        .state
        .registrations
        .register_camp(
            parent.id,
            vec![new_player("Quinn Lee"), new_player("Riley Lee"), new_player("QUINN LEE")],
            spring(),
        )
        .await
        .unwrap_err();
    assert!(err.is_duplicate());
    assert!(h.store.players_for_parent(parent.id).await.unwrap().is_empty());
    assert!(h.store.all_registrations().is_empty());

    let registered = h
        .state
        .registrations
        .register_camp(parent.id, vec![new_player("Quinn Lee"), new_player("Riley Lee")], spring())
        .await
        .unwrap();
    assert_eq!(registered.len(), 2);
    assert_eq!(h.store.all_registrations().len(), 2);
}

#[tokio::test]
async fn test_camp_requires_a_program_and_players() {
    let h = Harness::square();
    let parent = h.parent("pat@example.com");

    let err = h
        .state
        .registrations
        .register_camp(parent.id, Vec::new(), Program::new(" ", 0, None))
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "ValidationError");
}

#[tokio::test]
async fn test_tournament_team_registration_then_payment() {
    let h = Harness::square();
    let coach = h.parent("coach@example.com");

    let registered = h
        .state
        .registrations
        .register_tournament_teams(coach.id, "Winter Classic", 2026, vec![new_team("Hawks", TeamLevel::Gold)])
        .await
        .unwrap();
    let team = registered[0].team.clone();
    assert!(team.is_coached_by(coach.id));
    let entry = team.find_tournament("Winter Classic", 2026).unwrap();
    assert_eq!(entry.payment_status, PaymentStatus::Pending);
    assert_eq!(entry.registration_id, Some(registered[0].registration.id));

    let coach_doc = h.store.find_parent(coach.id).await.unwrap().unwrap();
    assert!(coach_doc.is_coach);

    let request = PaymentRequest {
        flow: Flow::TournamentTeam,
        provider: None,
        minor_amount: 42500,
        source_token: Some("cnon:ok-1".to_string()),
        source_id: None,
        buyer_email: None,
        items: LineItems::Teams {
            tournament: "Winter Classic".to_string(),
            year: 2026,
            level: Some(TeamLevel::Gold),
            team_ids: vec![team.id],
        },
    };
    h.state.orchestrator.process(coach.id, request).await.unwrap();

    let charge = &h.provider.charges()[0];
    assert!(charge.note.ends_with("Team Hawks"));

    let paid = h.store.find_team(team.id).await.unwrap().unwrap();
    assert!(paid.find_tournament("Winter Classic", 2026).unwrap().payment_complete);
    let registrations = h.store.all_registrations();
    assert_eq!(registrations.len(), 1);
    assert!(registrations[0].payment_complete);

    let again = TeamEntry {
        team_id: Some(team.id),
        ..new_team("", TeamLevel::Gold)
    };
    let err = h
        .state
        .registrations
        .register_tournament_teams(coach.id, "winter classic", 2026, vec![again])
        .await
        .unwrap_err();
    assert!(err.is_duplicate());
}

#[tokio::test]
async fn test_team_level_mismatch_is_not_written() {
    let h = Harness::square();
    let coach = h.parent("coach@example.com");
    let team = h.team(&coach, "Hawks", TeamLevel::Gold);

    let entry = TeamEntry {
        team_id: Some(team.id),
        ..new_team("", TeamLevel::Silver)
    };
    let err = h
        .state
        .registrations
        .register_tournament_teams(coach.id, "Winter Classic", 2026, vec![entry])
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "LevelMismatch");
    assert!(h.store.all_registrations().is_empty());
    assert_eq!(h.store.find_team(team.id).await.unwrap().unwrap(), team);
}
