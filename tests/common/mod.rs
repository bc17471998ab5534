//! Shared fixtures: a scripted processor, a recording mail transport and a
//! fully wired `AppState` over `MemoryStore`.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{Duration, NaiveDate};
use secrecy::SecretString;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use courtside_backend::api::{AppState, ServiceSettings};
use courtside_backend::auth::JwtService;
use courtside_backend::database::MemoryStore;
use courtside_backend::email::{MailResult, MailTransport, OutgoingEmail};
use courtside_backend::models::{
    CardDetails, Parent, PaymentConfiguration, Player, ProviderKind, Team, TeamLevel,
};
use courtside_backend::payments::providers::ProviderAdapter;
use courtside_backend::payments::types::{
    ChargeRequest, ChargeResult, ChargeStatus, CustomerRequest, PaymentDetails, RefundRequest,
    RefundResult,
};
use courtside_backend::payments::{
    ConfigError, Flow, LineItems, PaymentProvider, PaymentRequest, PlayerLine, ProviderError,
    ProviderFactory, ProviderResult,
};

pub const JWT_SECRET: &str = "integration-secret";

/// Approves every source except `declined*`; a reused source is refused the
/// way a real processor refuses a spent nonce.
pub struct ScriptedProvider {
    kind: ProviderKind,
    charges: Mutex<Vec<ChargeRequest>>,
    refunds: Mutex<Vec<RefundRequest>>,
    used_sources: Mutex<HashSet<String>>,
    customers: Mutex<Vec<CustomerRequest>>,
}

impl ScriptedProvider {
    pub fn new(kind: ProviderKind) -> Self {
        Self {
            kind,
            charges: Mutex::new(Vec::new()),
            refunds: Mutex::new(Vec::new()),
            used_sources: Mutex::new(HashSet::new()),
            customers: Mutex::new(Vec::new()),
        }
    }

    pub fn charges(&self) -> Vec<ChargeRequest> {
        self.charges.lock().unwrap().clone()
    }

    pub fn refunds(&self) -> Vec<RefundRequest> {
        self.refunds.lock().unwrap().clone()
    }

    pub fn customers(&self) -> Vec<CustomerRequest> {
        self.customers.lock().unwrap().clone()
    }
}

#[async_trait]
impl PaymentProvider for ScriptedProvider {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    async fn charge(&self, request: ChargeRequest) -> ProviderResult<ChargeResult> {
        let n = {
            let mut charges = self.charges.lock().unwrap();
            charges.push(request.clone());
            charges.len()
        };

        if !self.used_sources.lock().unwrap().insert(request.source_id.clone()) {
            return Err(ProviderError::declined(
                self.kind.as_str(),
                Some(400),
                "Card nonce already used",
            ));
        }

        if request.source_id.starts_with("declined") {
            let mut result = ChargeResult::new(format!("pay_{}", n), ChargeStatus::Failed);
            result.failure_message = Some("CARD_DECLINED".to_string());
            return Ok(result);
        }

        let mut result = ChargeResult::new(format!("pay_{}", n), ChargeStatus::Completed);
        result.location_id = Some("L1".to_string());
        result.receipt_url = Some(format!("https://receipts.example.com/pay_{}", n));
        result.card = CardDetails {
            brand: Some("VISA".to_string()),
            last4: Some("1111".to_string()),
            ..CardDetails::default()
        };
        Ok(result)
    }

    async fn refund(&self, request: RefundRequest) -> ProviderResult<RefundResult> {
        let n = {
            let mut refunds = self.refunds.lock().unwrap();
            refunds.push(request.clone());
            refunds.len()
        };
        Ok(RefundResult {
            refund_id: format!("ref_{}", n),
            status: "COMPLETED".to_string(),
            minor_amount: request.minor_amount,
        })
    }

    async fn create_customer(&self, request: CustomerRequest) -> ProviderResult<Option<String>> {
        if self.kind != ProviderKind::Square {
            return Ok(None);
        }
        let mut customers = self.customers.lock().unwrap();
        customers.push(request);
        Ok(Some(format!("cust_{}", customers.len())))
    }

    async fn fetch(&self, external_payment_id: &str) -> ProviderResult<PaymentDetails> {
        Ok(PaymentDetails {
            external_payment_id: external_payment_id.to_string(),
            status: ChargeStatus::Completed,
            raw_status: "COMPLETED".to_string(),
            minor_amount: None,
            currency: Some("USD".to_string()),
            card: CardDetails::default(),
            receipt_url: None,
            order_id: None,
        })
    }
}

/// The shared script, with webhook signatures checked by the real adapter
/// for the configuration it was built from.
pub struct ScriptedAdapter {
    script: Arc<ScriptedProvider>,
    verifier: Option<ProviderAdapter>,
}

#[async_trait]
impl PaymentProvider for ScriptedAdapter {
    fn kind(&self) -> ProviderKind {
        self.script.kind()
    }

    async fn charge(&self, request: ChargeRequest) -> ProviderResult<ChargeResult> {
        self.script.charge(request).await
    }

    async fn refund(&self, request: RefundRequest) -> ProviderResult<RefundResult> {
        self.script.refund(request).await
    }

    async fn fetch(&self, external_payment_id: &str) -> ProviderResult<PaymentDetails> {
        self.script.fetch(external_payment_id).await
    }

    async fn create_customer(&self, request: CustomerRequest) -> ProviderResult<Option<String>> {
        self.script.create_customer(request).await
    }

    fn verify_webhook(&self, payload: &[u8], signature: &str) -> bool {
        self.verifier
            .as_ref()
            .is_some_and(|v| v.verify_webhook(payload, signature))
    }
}

pub struct ScriptedFactory(pub Arc<ScriptedProvider>);

impl ProviderFactory for ScriptedFactory {
    fn build(&self, config: &PaymentConfiguration) -> Result<Arc<dyn PaymentProvider>, ConfigError> {
        let verifier = ProviderAdapter::from_configuration(config, StdDuration::from_secs(5)).ok();
        Ok(Arc::new(ScriptedAdapter {
            script: self.0.clone(),
            verifier,
        }))
    }
}

#[derive(Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<OutgoingEmail>>,
}

impl RecordingTransport {
    pub fn sent(&self) -> Vec<OutgoingEmail> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl MailTransport for RecordingTransport {
    async fn deliver(&self, email: &OutgoingEmail) -> MailResult<String> {
        let mut sent = self.sent.lock().unwrap();
        sent.push(email.clone());
        Ok(format!("msg_{}", sent.len()))
    }
}

pub struct Harness {
    pub store: MemoryStore,
    pub provider: Arc<ScriptedProvider>,
    pub mail: Arc<RecordingTransport>,
    pub state: AppState<MemoryStore>,
}

impl Harness {
    pub fn new(config: PaymentConfiguration) -> Self {
        let store = MemoryStore::new();
        let provider = Arc::new(ScriptedProvider::new(config.payment_system));
        store.seed_configuration(config);
        let mail = Arc::new(RecordingTransport::default());

        let state = AppState::new(
            Arc::new(store.clone()),
            Arc::new(ScriptedFactory(provider.clone())),
            mail.clone(),
            JwtService::new(&SecretString::from(JWT_SECRET.to_string()), 7),
            ServiceSettings {
                environment: "development".to_string(),
                email_from: "Courtside <noreply@courtside.test>".to_string(),
                frontend_url: "https://club.example.com".to_string(),
                attachment_root: PathBuf::from("./public"),
                temp_token_ttl: Duration::minutes(60),
            },
        );

        Self {
            store,
            provider,
            mail,
            state,
        }
    }

    pub fn square() -> Self {
        Self::new(PaymentConfiguration::square("sq-token", "L1"))
    }

    pub fn parent(&self, email: &str) -> Parent {
        let parent = Parent::new(email, "Pat Lee");
        self.store.seed_parent(parent.clone());
        parent
    }

    pub fn player(&self, parent: &Parent, name: &str) -> Player {
        let player = Player::new(
            parent.id,
            name,
            "Female",
            NaiveDate::from_ymd_opt(2013, 4, 2).unwrap(),
        );
        self.store.seed_player(player.clone());
        player
    }

    pub fn team(&self, coach: &Parent, name: &str, level: TeamLevel) -> Team {
        let team = Team::new(name, "7th", "Boys", level, coach.id);
        self.store.seed_team(team.clone());
        team
    }

    pub fn token_for(&self, parent: &Parent) -> String {
        self.state.jwt.issue_for(parent).unwrap()
    }

    /// Waits for spawned email tasks to deliver `count` messages.
    pub async fn wait_for_mail(&self, count: usize) -> Vec<OutgoingEmail> {
        for _ in 0..100 {
            let sent = self.mail.sent();
            if sent.len() >= count {
                return sent;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        self.mail.sent()
    }
}

pub fn spring_line(player_id: uuid::Uuid) -> PlayerLine {
    PlayerLine {
        player_id,
        season: "Spring Tryout".to_string(),
        year: 2025,
        tryout_id: Some("spring2025".to_string()),
    }
}

pub fn player_request(flow: Flow, lines: Vec<PlayerLine>, minor_amount: i64, source: &str) -> PaymentRequest {
    PaymentRequest {
        flow,
        provider: None,
        minor_amount,
        source_token: Some(source.to_string()),
        source_id: None,
        buyer_email: None,
        items: LineItems::Players(lines),
    }
}

pub fn teams_request(team_ids: Vec<uuid::Uuid>, minor_amount: i64, source: &str) -> PaymentRequest {
    PaymentRequest {
        flow: Flow::TournamentTeams,
        provider: None,
        minor_amount,
        source_token: Some(source.to_string()),
        source_id: None,
        buyer_email: None,
        items: LineItems::Teams {
            tournament: "Winter Classic".to_string(),
            year: 2026,
            level: None,
            team_ids,
        },
    }
}
