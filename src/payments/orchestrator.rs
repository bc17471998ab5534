//! Payment orchestrator
//!
//! Runs one card payment end to end: ownership and duplicate checks, the
//! processor charge, the Payment row and the paid fan-out over players, teams
//! and registrations. Every write shares one store transaction; the
//! confirmation email goes out only after it commits.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::database::store::{Store, StoreTx};
use crate::email::{EmailContext, EmailDispatcher, EmailType, PaymentSummary};
use crate::error::{AppError, AppErrorKind, AppResult};
use crate::models::{
    Parent, Payment, PaymentRecordStatus, PaymentStamp, PaymentStatus, Player, PlayerSeason,
    ProviderKind, RegistrationKey, RegistrationPatch, Team, TeamLevel, TeamTournament,
};
use crate::payments::allocation::Allocation;
use crate::payments::error::ProviderError;
use crate::payments::flow::{Flow, LineItems, PaymentRequest};
use crate::payments::registry::{Operation, ProviderRegistry, ResolvedProvider};
use crate::payments::types::{ChargeRequest, ChargeResult, CustomerRequest, PaymentDetails};
use crate::registration::store;

/// What a successful payment returns to the caller.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentOutcome {
    pub internal_payment_id: Uuid,
    pub external_payment_id: String,
    pub payment_system: ProviderKind,
    pub receipt_url: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub players: Vec<Player>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub teams: Vec<Team>,
    /// Major units.
    pub amount: Decimal,
    pub currency: String,
    pub email_queued: bool,
}

/// Stored payment next to the processor's current view of it.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentVerification {
    pub payment: Payment,
    pub processor: PaymentDetails,
    /// Whether the processor still reports the charge as captured.
    pub verified: bool,
}

/// Line items loaded and checked inside the transaction.
enum Prepared {
    Players {
        players: Vec<Player>,
        /// Index into `players` for each request line.
        lines: Vec<usize>,
    },
    Teams(Vec<Team>),
}

/// Serialises payments of the same parent within this process, so a second
/// request sees the first one's commit before it reaches the processor.
#[derive(Default)]
struct ParentLocks {
    locks: Mutex<HashMap<Uuid, Arc<tokio::sync::Mutex<()>>>>,
}

impl ParentLocks {
    fn get(&self, parent_id: Uuid) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        locks.entry(parent_id).or_default().clone()
    }
}

pub struct PaymentOrchestrator<S: Store> {
    store: Arc<S>,
    registry: Arc<ProviderRegistry<S>>,
    mailer: Option<Arc<EmailDispatcher>>,
    locks: ParentLocks,
}

impl<S: Store> PaymentOrchestrator<S> {
    pub fn new(store: Arc<S>, registry: Arc<ProviderRegistry<S>>) -> Self {
        Self {
            store,
            registry,
            mailer: None,
            locks: ParentLocks::default(),
        }
    }

    pub fn with_mailer(mut self, mailer: Arc<EmailDispatcher>) -> Self {
        self.mailer = Some(mailer);
        self
    }

    pub fn registry(&self) -> &Arc<ProviderRegistry<S>> {
        &self.registry
    }

    /// Charges the caller and marks every line item paid.
    pub async fn process(&self, caller: Uuid, mut request: PaymentRequest) -> AppResult<PaymentOutcome> {
        request.validate()?;
        let allocation = Allocation::split(request.minor_amount, request.items.len())?;

        let provider = self.registry.get_service(request.provider).await?;
        ProviderRegistry::<S>::validate(&provider.configuration, Operation::Charge)?;

        let lock = self.locks.get(caller);
        let _guard = lock.lock().await;

        if provider.kind() == ProviderKind::Square {
            self.ensure_square_customer(&provider, caller).await?;
        }

        let mut tx = self.store.begin().await?;
        let mut parent = tx
            .find_parent(caller)
            .await?
            .ok_or_else(|| AppError::unauthorized("Account not found"))?;

        let mut prepared = prepare(&mut tx, &parent, &mut request.items).await?;

        let charge = self
            .charge(&provider, &parent, &request, &prepared)
            .await?;

        let now = Utc::now();
        let currency = provider.configuration.currency().to_string();
        let payment = build_payment(&parent, &request, &provider, &charge, &allocation, &currency, now);
        tx.insert_payment(&payment).await?;
        parent.index_payment(payment.id);

        match (&mut prepared, &request.items) {
            (Prepared::Players { players, lines }, LineItems::Players(items)) => {
                for (i, line) in items.iter().enumerate() {
                    let paid = paid_stamp(&charge, &allocation, i, now);
                    let entry = PlayerSeason::paid(&line.program(), &paid);
                    store::upsert_player_season(&mut tx, &mut players[lines[i]], entry).await?;
                }
            }
            (Prepared::Teams(teams), LineItems::Teams { tournament, year, .. }) => {
                for (i, team) in teams.iter_mut().enumerate() {
                    let paid = paid_stamp(&charge, &allocation, i, now);
                    let key = team_key(team.id, parent.id, tournament, *year);
                    let registration = store::upsert_registration(
                        &mut tx,
                        &key,
                        &RegistrationPatch::paid(paid.clone()).with_level(team.level),
                    )
                    .await?;
                    team.ensure_coach(parent.id);
                    team.mark_paid();
                    let entry = TeamTournament::paid(tournament, *year, team.level, &paid)
                        .with_registration(registration.id);
                    store::add_or_update_team_tournament(&mut tx, team, entry).await?;
                }
            }
            _ => return Err(AppError::internal("line items changed shape during payment")),
        }

        let programs = request.items.programs();
        store::aggregate_parent_payment(&mut tx, &mut parent, &programs).await?;

        if let Err(e) = tx.commit().await {
            error!(
                parent_id = %parent.id,
                flow = %request.flow,
                provider = %provider.kind(),
                external_payment_id = %charge.external_payment_id,
                payment_id = %payment.id,
                amount = %payment.amount,
                error = %e,
                "Charge succeeded but the payment could not be recorded; reconcile manually"
            );
            return Err(self.commit_failure(caller, &request.items, &charge, e.into()).await);
        }

        info!(
            parent_id = %parent.id,
            flow = %request.flow,
            provider = %provider.kind(),
            payment_id = %payment.id,
            external_payment_id = %payment.payment_id,
            amount = %payment.amount,
            "Payment recorded"
        );

        let email_queued = self.queue_receipt(&parent, &request, &prepared, &payment);
        let (players, teams) = match prepared {
            Prepared::Players { players, .. } => (players, Vec::new()),
            Prepared::Teams(teams) => (Vec::new(), teams),
        };

        Ok(PaymentOutcome {
            internal_payment_id: payment.id,
            external_payment_id: payment.payment_id,
            payment_system: payment.payment_system,
            receipt_url: payment.receipt_url,
            players,
            teams,
            amount: payment.amount,
            currency: payment.currency,
            email_queued,
        })
    }

    /// Creates the caller's Square customer when it has none and saves the
    /// id in its own transaction, so a declined charge does not lose it.
    /// Processor and store failures are logged and the payment goes ahead.
    async fn ensure_square_customer(&self, provider: &ResolvedProvider, caller: Uuid) -> AppResult<()> {
        let parent = self
            .store
            .find_parent(caller)
            .await?
            .ok_or_else(|| AppError::unauthorized("Account not found"))?;
        if parent.square_customer_id.is_some() {
            return Ok(());
        }

        let Some(customer_id) = create_square_customer(provider, &parent).await else {
            return Ok(());
        };
        if let Err(e) = self.save_square_customer(caller, customer_id).await {
            warn!(parent_id = %caller, error = %e, "Could not save Square customer id");
        }
        Ok(())
    }

    async fn save_square_customer(&self, parent_id: Uuid, customer_id: String) -> AppResult<()> {
        let mut tx = self.store.begin().await?;
        let Some(mut parent) = tx.find_parent(parent_id).await? else {
            return Ok(());
        };
        if parent.square_customer_id.is_none() {
            parent.square_customer_id = Some(customer_id);
            parent.updated_at = Utc::now();
            tx.save_parent(&parent).await?;
            tx.commit().await?;
        }
        Ok(())
    }

    async fn charge(
        &self,
        provider: &ResolvedProvider,
        parent: &Parent,
        request: &PaymentRequest,
        prepared: &Prepared,
    ) -> AppResult<ChargeResult> {
        let source_id = request
            .source()
            .ok_or_else(|| AppError::validation("sourceToken", "sourceToken or sourceId is required"))?
            .to_string();
        let team_name = match prepared {
            Prepared::Teams(teams) if request.flow == Flow::TournamentTeam => {
                teams.first().map(|t| t.name.as_str())
            }
            _ => None,
        };
        let buyer_email = request
            .buyer_email
            .as_deref()
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .unwrap_or(&parent.email)
            .to_string();

        let charge = ChargeRequest {
            source_id,
            minor_amount: request.minor_amount,
            currency: provider.configuration.currency().to_string(),
            customer_reference_id: request.flow.reference_id(parent.id, &request.items, Utc::now()),
            note: request.flow.note(&request.items, team_name),
            buyer_email,
            customer_id: parent.customer_id(provider.kind()).map(str::to_string),
        };

        info!(
            parent_id = %parent.id,
            flow = %request.flow,
            provider = %provider.kind(),
            amount_minor = request.minor_amount,
            "Charging card"
        );

        let result = match provider.adapter.charge(charge).await {
            Ok(result) => result,
            Err(e) => {
                error!(
                    parent_id = %parent.id,
                    provider = %e.provider,
                    status = ?e.status,
                    retryable = e.retryable,
                    error = %e.message,
                    "Charge failed"
                );
                return Err(e.into());
            }
        };

        if !result.status.is_success() {
            let message = result
                .failure_message
                .clone()
                .unwrap_or_else(|| "The card was declined".to_string());
            error!(
                parent_id = %parent.id,
                provider = %provider.kind(),
                external_payment_id = %result.external_payment_id,
                status = ?result.status,
                "Charge declined"
            );
            return Err(ProviderError::declined(provider.kind().as_str(), None, message).into());
        }

        info!(
            parent_id = %parent.id,
            provider = %provider.kind(),
            external_payment_id = %result.external_payment_id,
            status = ?result.status,
            "Charge approved"
        );
        Ok(result)
    }

    /// Decides what a failed commit means to the caller. If the line items
    /// are paid now, a concurrent request won and this one is a duplicate.
    async fn commit_failure(
        &self,
        caller: Uuid,
        items: &LineItems,
        charge: &ChargeResult,
        cause: AppError,
    ) -> AppError {
        match self.items_paid(caller, items).await {
            Ok(true) => AppError::duplicate("These registrations were paid by another request")
                .with_context(format!("unrecorded charge {}", charge.external_payment_id)),
            Ok(false) => AppError::new(AppErrorKind::TransactionAborted {
                message: cause.to_string(),
            })
            .with_context(format!("unrecorded charge {}", charge.external_payment_id)),
            Err(lookup) => {
                warn!(parent_id = %caller, error = %lookup, "Could not re-read state after failed commit");
                AppError::new(AppErrorKind::TransactionAborted {
                    message: cause.to_string(),
                })
            }
        }
    }

    async fn items_paid(&self, caller: Uuid, items: &LineItems) -> AppResult<bool> {
        let paid: HashSet<String> = self
            .store
            .registrations_for_parent(caller)
            .await?
            .into_iter()
            .filter(|r| r.is_paid())
            .map(|r| r.program_key())
            .collect();

        let keys: Vec<RegistrationKey> = match items {
            LineItems::Players(lines) => lines
                .iter()
                .map(|line| RegistrationKey::Player {
                    player_id: line.player_id,
                    parent_id: caller,
                    program: line.program(),
                })
                .collect(),
            LineItems::Teams {
                tournament,
                year,
                team_ids,
                ..
            } => team_ids
                .iter()
                .map(|id| team_key(*id, caller, tournament, *year))
                .collect(),
        };
        Ok(!keys.is_empty() && keys.iter().all(|k| paid.contains(&k.program_key())))
    }

    fn queue_receipt(
        &self,
        parent: &Parent,
        request: &PaymentRequest,
        prepared: &Prepared,
        payment: &Payment,
    ) -> bool {
        let Some(mailer) = &self.mailer else {
            return false;
        };

        let mut context = EmailContext::for_parent(parent.id);
        context.payment = Some(PaymentSummary {
            amount: payment.amount,
            currency: payment.currency.clone(),
            receipt_url: payment.receipt_url.clone(),
        });
        match (prepared, &request.items) {
            (Prepared::Players { players, .. }, _) if players.len() == 1 => {
                context.player_id = players.first().map(|p| p.id);
            }
            (Prepared::Teams(teams), LineItems::Teams { tournament, year, .. }) => {
                if teams.len() == 1 {
                    context.team_id = teams.first().map(|t| t.id);
                }
                context.tournament = Some(json!({
                    "name": tournament.trim(),
                    "year": year,
                    "teamCount": teams.len(),
                }));
            }
            _ => {}
        }

        mailer.spawn_template(request.flow.email_template(), context, EmailType::Transactional);
        true
    }

    /// The stored payment, for its owner or an admin.
    pub async fn details(&self, payment_id: Uuid, caller: &Parent) -> AppResult<Payment> {
        let payment = self
            .store
            .find_payment(payment_id)
            .await?
            .ok_or_else(|| AppError::not_found("Payment", payment_id))?;
        if payment.parent_id != caller.id && !caller.is_admin() {
            return Err(AppError::forbidden("This payment belongs to another account"));
        }
        Ok(payment)
    }

    /// Re-fetches the processor's view of a stored payment.
    pub async fn verify(&self, payment_id: Uuid, caller: &Parent) -> AppResult<PaymentVerification> {
        let payment = self.details(payment_id, caller).await?;
        let provider = self.registry.for_payment_system(payment.payment_system).await?;
        let processor = provider.adapter.fetch(&payment.payment_id).await?;
        let verified = processor.status.is_success() && payment.status == PaymentRecordStatus::Completed;
        info!(
            payment_id = %payment.id,
            external_payment_id = %payment.payment_id,
            processor_status = %processor.raw_status,
            verified,
            "Payment verified against processor"
        );
        Ok(PaymentVerification {
            payment,
            processor,
            verified,
        })
    }
}

fn team_key(team_id: Uuid, parent_id: Uuid, tournament: &str, year: i32) -> RegistrationKey {
    RegistrationKey::Team {
        team_id,
        parent_id,
        tournament: tournament.trim().to_string(),
        year,
    }
}

fn paid_stamp(charge: &ChargeResult, allocation: &Allocation, index: usize, now: DateTime<Utc>) -> PaymentStamp {
    PaymentStamp {
        payment_id: charge.external_payment_id.clone(),
        amount_paid: allocation.share_major(index),
        card: charge.card.clone(),
        payment_date: now,
    }
}

/// Loads every line item, checks ownership, duplicates and levels, and
/// re-opens failed entries. Nothing here calls the processor.
///
/// A player line without a tryout id takes the one of the stored entry it
/// pays for, so the rest of the payment works on the resolved program.
async fn prepare<T: StoreTx>(tx: &mut T, parent: &Parent, items: &mut LineItems) -> AppResult<Prepared> {
    match items {
        LineItems::Players(lines) => {
            let mut players: Vec<Player> = Vec::new();
            let mut slots = Vec::with_capacity(lines.len());
            let mut seen = HashSet::new();
            for line in lines.iter_mut() {
                let slot = match players.iter().position(|p| p.id == line.player_id) {
                    Some(slot) => slot,
                    None => {
                        let player = tx
                            .find_player(line.player_id)
                            .await?
                            .ok_or_else(|| AppError::not_found("Player", line.player_id))?;
                        if player.parent_id != parent.id {
                            return Err(AppError::forbidden(format!(
                                "Player {} does not belong to this account",
                                line.player_id
                            )));
                        }
                        players.push(player);
                        players.len() - 1
                    }
                };

                let player = &mut players[slot];
                let program = player.resolve_program(&line.program());
                line.tryout_id = program.tryout_id.clone();
                let key = RegistrationKey::Player {
                    player_id: player.id,
                    parent_id: parent.id,
                    program: program.clone(),
                };
                if !seen.insert(key.program_key()) {
                    return Err(AppError::validation(
                        "players",
                        format!("duplicate line item for player {}", player.id),
                    ));
                }

                let existing = store::assert_no_duplicate_season(tx, player, &program).await?;
                if existing == Some(PaymentStatus::Failed) {
                    store::upsert_player_season(tx, player, PlayerSeason::pending(&program)).await?;
                }
                slots.push(slot);
            }
            Ok(Prepared::Players {
                players,
                lines: slots,
            })
        }
        LineItems::Teams {
            tournament,
            year,
            level,
            team_ids,
        } => {
            let (tournament, year, level): (&str, &i32, &Option<TeamLevel>) = (tournament, year, level);
            let mut teams = Vec::with_capacity(team_ids.len());
            for team_id in team_ids.iter() {
                let mut team = tx
                    .find_team(*team_id)
                    .await?
                    .ok_or_else(|| AppError::not_found("Team", team_id))?;
                if !team.is_coached_by(parent.id) {
                    return Err(AppError::forbidden(format!(
                        "You are not a coach of team {}",
                        team.name
                    )));
                }
                if let Some(requested) = level {
                    if *requested != team.level {
                        return Err(AppErrorKind::LevelMismatch {
                            existing: team.level,
                            requested: *requested,
                        }
                        .into());
                    }
                }
                team.check_level(tournament, *year, team.level)?;

                let key = team_key(team.id, parent.id, tournament, *year);
                let registration = tx.find_registration(&key).await?;
                if registration.as_ref().is_some_and(|r| r.is_paid()) {
                    return Err(AppError::duplicate(format!(
                        "{} is already registered for {} {}",
                        team.name,
                        tournament.trim(),
                        year
                    )));
                }
                if registration.is_some_and(|r| r.payment_status == PaymentStatus::Failed) {
                    store::upsert_registration(
                        tx,
                        &key,
                        &RegistrationPatch::pending().with_level(team.level),
                    )
                    .await?;
                }
                if team
                    .find_tournament(tournament, *year)
                    .is_some_and(|t| t.payment_status == PaymentStatus::Failed)
                {
                    let reopened = TeamTournament::pending(tournament, *year, team.level);
                    store::add_or_update_team_tournament(tx, &mut team, reopened).await?;
                }
                teams.push(team);
            }
            Ok(Prepared::Teams(teams))
        }
    }
}

async fn create_square_customer(provider: &ResolvedProvider, parent: &Parent) -> Option<String> {
    let mut names = parent.full_name.split_whitespace();
    let given_name = names.next().unwrap_or_default().to_string();
    let family_name = names.collect::<Vec<_>>().join(" ");
    let request = CustomerRequest {
        email: parent.email.clone(),
        given_name,
        family_name: (!family_name.is_empty()).then_some(family_name),
        phone: parent.phone.clone(),
        reference_id: format!("parent:{}", parent.id),
    };

    match provider.adapter.create_customer(request).await {
        Ok(Some(customer_id)) => {
            info!(parent_id = %parent.id, "Created Square customer");
            Some(customer_id)
        }
        Ok(None) => None,
        Err(e) => {
            warn!(parent_id = %parent.id, error = %e, "Square customer creation failed; continuing without it");
            None
        }
    }
}

fn build_payment(
    parent: &Parent,
    request: &PaymentRequest,
    provider: &ResolvedProvider,
    charge: &ChargeResult,
    allocation: &Allocation,
    currency: &str,
    now: chrono::DateTime<Utc>,
) -> Payment {
    let (player_ids, team_ids, items) = match &request.items {
        LineItems::Players(lines) => {
            let mut ids: Vec<Uuid> = Vec::new();
            for line in lines {
                if !ids.contains(&line.player_id) {
                    ids.push(line.player_id);
                }
            }
            (ids, Vec::new(), serde_json::to_value(lines).unwrap_or_default())
        }
        LineItems::Teams {
            tournament,
            year,
            team_ids,
            ..
        } => (
            Vec::new(),
            team_ids.clone(),
            json!({"tournament": tournament.trim(), "year": year}),
        ),
    };

    Payment {
        id: Uuid::new_v4(),
        parent_id: parent.id,
        player_ids,
        team_ids,
        payment_id: charge.external_payment_id.clone(),
        payment_system: provider.kind(),
        order_id: charge.order_id.clone(),
        location_id: charge.location_id.clone(),
        merchant_id: charge.merchant_id.clone(),
        buyer_email: request
            .buyer_email
            .clone()
            .filter(|e| !e.trim().is_empty())
            .unwrap_or_else(|| parent.email.clone()),
        card: charge.card.clone(),
        amount: allocation.total_major(),
        currency: currency.to_string(),
        status: PaymentRecordStatus::Completed,
        processed_at: now,
        receipt_url: charge.receipt_url.clone(),
        payment_type: request.flow.payment_type(),
        configuration_id: Some(provider.configuration.id),
        metadata: json!({
            "flow": request.flow.as_str(),
            "items": items,
            "shares": allocation.shares,
            "processorStatus": charge.status,
        }),
        refunds: Vec::new(),
        refund_status: None,
        refunded_amount: Decimal::ZERO,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::MemoryStore;
    use crate::models::{PaymentConfiguration, Program};
    use crate::payments::flow::PlayerLine;
    use crate::payments::providers::DefaultProviderFactory;
    use chrono::NaiveDate;

    fn setup() -> (PaymentOrchestrator<MemoryStore>, MemoryStore, Parent, Player) {
        let store = MemoryStore::new();
        let parent = Parent::new("pat@example.com", "Pat Lee");
        let player = Player::new(
            parent.id,
            "Quinn Lee",
            "Female",
            NaiveDate::from_ymd_opt(2013, 4, 2).unwrap(),
        );
        let mut config = PaymentConfiguration::square("sq-token", "L1");
        config.test_mode = true;
        store.seed_parent(parent.clone());
        store.seed_player(player.clone());
        store.seed_configuration(config);

        let store_arc = Arc::new(store.clone());
        let registry = Arc::new(ProviderRegistry::new(
            store_arc.clone(),
            Arc::new(DefaultProviderFactory::default()),
        ));
        (PaymentOrchestrator::new(store_arc, registry), store, parent, player)
    }

    fn tryout(player_id: Uuid, token: &str) -> PaymentRequest {
        PaymentRequest {
            flow: Flow::Tryout,
            provider: None,
            minor_amount: 5000,
            source_token: Some(token.to_string()),
            source_id: None,
            buyer_email: None,
            items: LineItems::Players(vec![PlayerLine {
                player_id,
                season: "Spring Tryout".into(),
                year: 2025,
                tryout_id: Some("spring2025".into()),
            }]),
        }
    }

    #[tokio::test]
    async fn test_tryout_payment_marks_everything_paid() {
        let (orchestrator, store, parent, player) = setup();
        let outcome = orchestrator
            .process(parent.id, tryout(player.id, "cnon:ok-1"))
            .await
            .unwrap();

        assert_eq!(outcome.amount, Decimal::new(5000, 2));
        assert_eq!(outcome.players.len(), 1);
        assert!(!outcome.email_queued);

        let stored = store.find_player(player.id).await.unwrap().unwrap();
        let program = Program::new("Spring Tryout", 2025, Some("spring2025".into()));
        assert!(stored.find_season(&program).unwrap().payment_complete);
        assert!(stored.payment_complete);

        let parent = store.find_parent(parent.id).await.unwrap().unwrap();
        assert!(parent.payment_complete);
        assert_eq!(parent.payments, vec![outcome.internal_payment_id]);
    }

    #[tokio::test]
    async fn test_second_payment_for_same_program_is_duplicate() {
        let (orchestrator, store, parent, player) = setup();
        orchestrator
            .process(parent.id, tryout(player.id, "cnon:ok-1"))
            .await
            .unwrap();
        let err = orchestrator
            .process(parent.id, tryout(player.id, "cnon:ok-2"))
            .await
            .unwrap_err();
        assert!(err.is_duplicate());
        assert_eq!(store.all_payments().len(), 1);
    }

    #[tokio::test]
    async fn test_other_parents_player_is_forbidden() {
        let (orchestrator, store, _, player) = setup();
        let stranger = Parent::new("other@example.com", "Other Parent");
        store.seed_parent(stranger.clone());

        let err = orchestrator
            .process(stranger.id, tryout(player.id, "cnon:ok-1"))
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 403);
        assert!(store.all_payments().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_caller_is_unauthorized() {
        let (orchestrator, _, _, player) = setup();
        let err = orchestrator
            .process(Uuid::new_v4(), tryout(player.id, "cnon:ok-1"))
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 401);
    }

    #[tokio::test]
    async fn test_details_owner_only() {
        let (orchestrator, store, parent, player) = setup();
        let outcome = orchestrator
            .process(parent.id, tryout(player.id, "cnon:ok-1"))
            .await
            .unwrap();

        let owner = store.find_parent(parent.id).await.unwrap().unwrap();
        let payment = orchestrator.details(outcome.internal_payment_id, &owner).await.unwrap();
        assert_eq!(payment.payment_id, outcome.external_payment_id);

        let stranger = Parent::new("x@example.com", "X Y");
        let err = orchestrator
            .details(outcome.internal_payment_id, &stranger)
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 403);

        let mut admin = Parent::new("admin@example.com", "Ada Min");
        admin.role = "admin".into();
        assert!(orchestrator.details(outcome.internal_payment_id, &admin).await.is_ok());
    }

    #[tokio::test]
    async fn test_square_customer_survives_declined_charge() {
        let (orchestrator, store, parent, player) = setup();
        let err = orchestrator
            .process(parent.id, tryout(player.id, "declined-card"))
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "PaymentRefused");
        assert!(store.all_payments().is_empty());

        let stored = store.find_parent(parent.id).await.unwrap().unwrap();
        let customer_id = stored.square_customer_id.clone().unwrap();
        assert_eq!(customer_id, format!("simcus_parent:{}", parent.id));

        // The next attempt reuses the saved id.
        orchestrator
            .process(parent.id, tryout(player.id, "cnon:ok-1"))
            .await
            .unwrap();
        let stored = store.find_parent(parent.id).await.unwrap().unwrap();
        assert_eq!(stored.square_customer_id, Some(customer_id));
    }

    #[tokio::test]
    async fn test_parent_locks_are_reused_and_pruned() {
        let locks = ParentLocks::default();
        let id = Uuid::new_v4();
        let a = locks.get(id);
        let b = locks.get(id);
        assert!(Arc::ptr_eq(&a, &b));
        drop(a);
        drop(b);
        let _ = locks.get(Uuid::new_v4());
        assert_eq!(locks.locks.lock().unwrap().len(), 1);
    }
}
