use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};

use crate::api::AppState;
use crate::database::store::Store;
use crate::models::ProviderKind;

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub environment: String,
    pub database: bool,
    pub payment_system: Option<ProviderKind>,
}

pub async fn health_check<S: Store>(State(state): State<AppState<S>>) -> Json<HealthResponse> {
    let version = env!("CARGO_PKG_VERSION").to_string();

    let database = match state.store.ping().await {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(error = %e, "Health check: store unreachable");
            false
        }
    };

    let payment_system = state
        .registry
        .get_service(None)
        .await
        .ok()
        .map(|provider| provider.kind());

    let response = HealthResponse {
        status: if database { "healthy" } else { "degraded" }.to_string(),
        version,
        environment: state.environment.clone(),
        database,
        payment_system,
    };

    Json(response)
}
