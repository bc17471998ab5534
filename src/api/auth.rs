//! Email verification endpoints. Login and password flows live elsewhere.

use axum::extract::State;
use axum::Json;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use crate::api::payments::success;
use crate::api::{ApiJson, AppState, AuthParent};
use crate::database::store::{Store, StoreTx};
use crate::email::{EmailContext, EmailType};
use crate::error::{AppError, AppResult};

pub const VERIFICATION_TEMPLATE: &str = "email verification";

pub async fn resend_verification_email<S: Store>(
    State(state): State<AppState<S>>,
    AuthParent(parent): AuthParent,
) -> AppResult<Json<Value>> {
    if parent.email_verified {
        return success(json!({ "message": "Email is already verified" }));
    }

    let token = state.temp_tokens.issue(&parent.email, Some(parent.id));
    let context = EmailContext {
        verification_token: Some(token),
        ..EmailContext::for_parent(parent.id)
    };
    state
        .mailer
        .spawn_template(VERIFICATION_TEMPLATE, context, EmailType::Transactional);

    info!(parent_id = %parent.id, "Verification email queued");
    success(json!({ "message": "Verification email sent" }))
}

#[derive(Debug, Deserialize)]
pub struct VerifyEmailBody {
    pub token: String,
}

pub async fn verify_email<S: Store>(
    State(state): State<AppState<S>>,
    ApiJson(body): ApiJson<VerifyEmailBody>,
) -> AppResult<Json<Value>> {
    let entry = state
        .temp_tokens
        .consume(&body.token)
        .ok_or_else(|| AppError::validation("token", "is invalid or has expired"))?;

    let parent_id = match entry.parent_id {
        Some(id) => id,
        None => {
            state
                .store
                .find_parent_by_email(&entry.email)
                .await?
                .ok_or_else(|| AppError::not_found("Parent", &entry.email))?
                .id
        }
    };

    let mut tx = state.store.begin().await?;
    let mut parent = tx
        .find_parent(parent_id)
        .await?
        .ok_or_else(|| AppError::not_found("Parent", parent_id))?;
    if !parent.email_verified {
        parent.email_verified = true;
        parent.updated_at = Utc::now();
        tx.save_parent(&parent).await?;
    }
    tx.commit().await?;

    info!(parent_id = %parent.id, "Email verified");
    success(json!({ "emailVerified": true, "parentId": parent.id }))
}
