//! Admin email broadcast.

use axum::extract::State;
use axum::Json;
use serde::Deserialize;
use serde_json::Value;
use tracing::info;
use uuid::Uuid;

use crate::api::payments::success;
use crate::api::{ApiJson, AppState, RequireAdmin};
use crate::database::store::Store;
use crate::email::EmailType;
use crate::error::{AppError, AppResult};

fn default_email_type() -> EmailType {
    EmailType::Broadcast
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastBody {
    pub parent_ids: Vec<Uuid>,
    /// Title of a stored or built-in template
    pub template: String,
    #[serde(default = "default_email_type")]
    pub email_type: EmailType,
}

/// Sends a template to each listed parent. Parents who opted out of the
/// email type are counted as skipped.
pub async fn send_to_parents<S: Store>(
    State(state): State<AppState<S>>,
    RequireAdmin(admin): RequireAdmin,
    ApiJson(body): ApiJson<BroadcastBody>,
) -> AppResult<Json<Value>> {
    if body.parent_ids.is_empty() {
        return Err(AppError::validation("parentIds", "must not be empty"));
    }
    if body.template.trim().is_empty() {
        return Err(AppError::validation("template", "is required"));
    }

    info!(
        admin_id = %admin.id,
        template = %body.template,
        recipients = body.parent_ids.len(),
        "Email broadcast requested"
    );
    let report = state
        .mailer
        .send_to_parents(&body.parent_ids, body.template.trim(), body.email_type)
        .await;
    success(report)
}
