//! Request extractors: bearer auth and JSON bodies with uniform errors.

use axum::async_trait;
use axum::extract::{FromRequest, FromRequestParts, Request};
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::Json;
use serde::de::DeserializeOwned;

use crate::api::AppState;
use crate::database::store::Store;
use crate::error::AppError;
use crate::models::Parent;

/// The parent named by a valid bearer token.
#[derive(Debug, Clone)]
pub struct AuthParent(pub Parent);

/// An authenticated parent with the admin role.
#[derive(Debug, Clone)]
pub struct RequireAdmin(pub Parent);

fn bearer(parts: &Parts) -> Option<&str> {
    let value = parts.headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

#[async_trait]
impl<S: Store> FromRequestParts<AppState<S>> for AuthParent {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState<S>) -> Result<Self, Self::Rejection> {
        let token = bearer(parts).ok_or_else(|| AppError::unauthorized("Missing bearer token"))?;
        let claims = state.jwt.verify(token)?;
        let parent = state
            .store
            .find_parent(claims.id)
            .await?
            .ok_or_else(|| AppError::unauthorized("Account no longer exists"))?;
        Ok(AuthParent(parent))
    }
}

#[async_trait]
impl<S: Store> FromRequestParts<AppState<S>> for RequireAdmin {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState<S>) -> Result<Self, Self::Rejection> {
        let AuthParent(parent) = AuthParent::from_request_parts(parts, state).await?;
        if !parent.is_admin() {
            return Err(AppError::forbidden("Admin access required"));
        }
        Ok(RequireAdmin(parent))
    }
}

/// `Json` whose rejection is a 400 in the standard error body.
#[derive(Debug, Clone)]
pub struct ApiJson<T>(pub T);

#[async_trait]
impl<T, St> FromRequest<St> for ApiJson<T>
where
    T: DeserializeOwned,
    St: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &St) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(ApiJson(value)),
            Err(rejection) => Err(AppError::validation("body", rejection.body_text())),
        }
    }
}
