//! `/payments/*` handlers.

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::api::{ApiJson, AppState, AuthParent, RequireAdmin};
use crate::database::store::Store;
use crate::error::{AppError, AppResult};
use crate::models::{ProviderKind, TeamLevel};
use crate::payments::webhook::{CLOVER_AUTH_HEADER, SQUARE_SIGNATURE_HEADER, STRIPE_SIGNATURE_HEADER};
use crate::payments::{Flow, LineItems, PaymentRequest, PlayerLine, RefundCommand};

/// `{success: true}` merged with the fields of `value`.
pub(crate) fn success<T: Serialize>(value: T) -> AppResult<Json<Value>> {
    let value = serde_json::to_value(value).map_err(|e| AppError::internal(e.to_string()))?;
    let body = match value {
        Value::Object(mut fields) => {
            fields.insert("success".into(), Value::Bool(true));
            Value::Object(fields)
        }
        other => json!({ "success": true, "data": other }),
    };
    Ok(Json(body))
}

/// One player line; missing program fields fall back to the top-level ones.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerLineBody {
    pub player_id: Uuid,
    #[serde(default)]
    pub season: Option<String>,
    #[serde(default)]
    pub year: Option<i32>,
    #[serde(default)]
    pub tryout_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentBody {
    #[serde(default)]
    pub flow: Option<Flow>,
    #[serde(default, alias = "provider")]
    pub payment_system: Option<ProviderKind>,
    /// Minor units.
    #[serde(default)]
    pub amount: i64,
    #[serde(default)]
    pub source_token: Option<String>,
    #[serde(default)]
    pub source_id: Option<String>,
    #[serde(default)]
    pub buyer_email: Option<String>,
    #[serde(default)]
    pub players: Vec<PlayerLineBody>,
    #[serde(default)]
    pub season: Option<String>,
    #[serde(default)]
    pub year: Option<i32>,
    #[serde(default)]
    pub tryout_id: Option<String>,
    #[serde(default)]
    pub tournament: Option<String>,
    #[serde(default)]
    pub level: Option<TeamLevel>,
    #[serde(default)]
    pub team_id: Option<Uuid>,
    #[serde(default)]
    pub team_ids: Vec<Uuid>,
}

impl PaymentBody {
    fn default_flow(&self) -> Flow {
        match self.flow {
            Some(flow) => flow,
            None if self.team_id.is_some() || !self.team_ids.is_empty() => Flow::TournamentTeams,
            None => Flow::General,
        }
    }

    pub fn into_request(self, flow: Flow) -> PaymentRequest {
        let items = if flow.is_team_flow() {
            let mut team_ids = Vec::with_capacity(self.team_ids.len() + 1);
            team_ids.extend(self.team_id);
            team_ids.extend(self.team_ids.iter().copied().filter(|id| Some(*id) != self.team_id));
            LineItems::Teams {
                tournament: self.tournament.clone().unwrap_or_default(),
                year: self.year.unwrap_or(0),
                level: self.level,
                team_ids,
            }
        } else {
            LineItems::Players(
                self.players
                    .iter()
                    .map(|line| PlayerLine {
                        player_id: line.player_id,
                        season: line.season.clone().or_else(|| self.season.clone()).unwrap_or_default(),
                        year: line.year.or(self.year).unwrap_or(0),
                        tryout_id: line.tryout_id.clone().or_else(|| self.tryout_id.clone()),
                    })
                    .collect(),
            )
        };

        PaymentRequest {
            flow,
            provider: self.payment_system,
            minor_amount: self.amount,
            source_token: self.source_token,
            source_id: self.source_id,
            buyer_email: self.buyer_email,
            items,
        }
    }
}

async fn charge<S: Store>(state: &AppState<S>, parent_id: Uuid, request: PaymentRequest) -> AppResult<Json<Value>> {
    let outcome = state.orchestrator.process(parent_id, request).await?;
    success(outcome)
}

pub async fn process<S: Store>(
    State(state): State<AppState<S>>,
    AuthParent(parent): AuthParent,
    ApiJson(body): ApiJson<PaymentBody>,
) -> AppResult<Json<Value>> {
    let flow = body.default_flow();
    charge(&state, parent.id, body.into_request(flow)).await
}

pub async fn tryout<S: Store>(
    State(state): State<AppState<S>>,
    AuthParent(parent): AuthParent,
    ApiJson(body): ApiJson<PaymentBody>,
) -> AppResult<Json<Value>> {
    charge(&state, parent.id, body.into_request(Flow::Tryout)).await
}

pub async fn training<S: Store>(
    State(state): State<AppState<S>>,
    AuthParent(parent): AuthParent,
    ApiJson(body): ApiJson<PaymentBody>,
) -> AppResult<Json<Value>> {
    charge(&state, parent.id, body.into_request(Flow::Training)).await
}

pub async fn tournament_team<S: Store>(
    State(state): State<AppState<S>>,
    AuthParent(parent): AuthParent,
    ApiJson(body): ApiJson<PaymentBody>,
) -> AppResult<Json<Value>> {
    charge(&state, parent.id, body.into_request(Flow::TournamentTeam)).await
}

pub async fn tournament_teams<S: Store>(
    State(state): State<AppState<S>>,
    AuthParent(parent): AuthParent,
    ApiJson(body): ApiJson<PaymentBody>,
) -> AppResult<Json<Value>> {
    charge(&state, parent.id, body.into_request(Flow::TournamentTeams)).await
}

/// Same as `/payments/process`, always through Clover.
pub async fn clover_process<S: Store>(
    State(state): State<AppState<S>>,
    AuthParent(parent): AuthParent,
    ApiJson(mut body): ApiJson<PaymentBody>,
) -> AppResult<Json<Value>> {
    body.payment_system = Some(ProviderKind::Clover);
    let flow = body.default_flow();
    charge(&state, parent.id, body.into_request(flow)).await
}

pub async fn refund<S: Store>(
    State(state): State<AppState<S>>,
    RequireAdmin(admin): RequireAdmin,
    ApiJson(command): ApiJson<RefundCommand>,
) -> AppResult<Json<Value>> {
    tracing::info!(admin_id = %admin.id, payment_id = %command.payment_id, "Refund requested");
    let outcome = state.refunds.refund(command).await?;
    success(outcome)
}

fn payment_id(raw: &str) -> AppResult<Uuid> {
    Uuid::parse_str(raw.trim()).map_err(|_| AppError::validation("paymentId", "must be a UUID"))
}

pub async fn verify<S: Store>(
    State(state): State<AppState<S>>,
    AuthParent(parent): AuthParent,
    Path(raw): Path<String>,
) -> AppResult<Json<Value>> {
    let verification = state.orchestrator.verify(payment_id(&raw)?, &parent).await?;
    success(verification)
}

pub async fn details<S: Store>(
    State(state): State<AppState<S>>,
    AuthParent(parent): AuthParent,
    Path(raw): Path<String>,
) -> AppResult<Json<Value>> {
    let payment = state.orchestrator.details(payment_id(&raw)?, &parent).await?;
    success(json!({ "payment": payment }))
}

pub async fn system<S: Store>(
    State(state): State<AppState<S>>,
    AuthParent(_): AuthParent,
) -> AppResult<Json<Value>> {
    let provider = state.registry.get_service(None).await?;
    success(json!({
        "paymentSystem": provider.kind(),
        "configuration": provider.configuration.redacted(),
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwitchBody {
    #[serde(alias = "provider")]
    pub payment_system: ProviderKind,
}

pub async fn switch<S: Store>(
    State(state): State<AppState<S>>,
    RequireAdmin(admin): RequireAdmin,
    ApiJson(body): ApiJson<SwitchBody>,
) -> AppResult<Json<Value>> {
    let provider = state.registry.switch(body.payment_system).await?;
    tracing::info!(admin_id = %admin.id, provider = %provider.kind(), "Payment system switched");
    success(json!({
        "paymentSystem": provider.kind(),
        "configuration": provider.configuration.redacted(),
    }))
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

pub async fn square_webhook<S: Store>(
    State(state): State<AppState<S>>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Json<Value>> {
    let outcome = state
        .webhooks
        .handle_square(header(&headers, SQUARE_SIGNATURE_HEADER), &body)
        .await?;
    success(outcome)
}

pub async fn clover_webhook<S: Store>(
    State(state): State<AppState<S>>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Json<Value>> {
    let outcome = state
        .webhooks
        .handle_clover(header(&headers, CLOVER_AUTH_HEADER), &body)
        .await?;
    success(outcome)
}

pub async fn stripe_webhook<S: Store>(
    State(state): State<AppState<S>>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Json<Value>> {
    let outcome = state
        .webhooks
        .handle_stripe(header(&headers, STRIPE_SIGNATURE_HEADER), &body)
        .await?;
    success(outcome)
}
