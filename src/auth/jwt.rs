//! HS256 session tokens for parents, coaches and admins.

use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::Parent;

pub const DEFAULT_EXPIRY_DAYS: i64 = 7;

#[derive(Debug, Error)]
pub enum JwtError {
    #[error("Failed to encode token: {0}")]
    Encoding(#[from] jsonwebtoken::errors::Error),

    #[error("Invalid token: {0}")]
    InvalidToken(String),

    #[error("Token has expired")]
    TokenExpired,

    #[error("Invalid token signature")]
    InvalidSignature,
}

impl From<JwtError> for AppError {
    fn from(err: JwtError) -> Self {
        AppError::unauthorized(err.to_string())
    }
}

/// Token payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Claims {
    pub id: Uuid,
    pub role: String,
    pub email: String,
    #[serde(default)]
    pub players: Vec<Uuid>,
    #[serde(default)]
    pub is_coach: bool,
    pub iat: i64,
    pub exp: i64,
}

impl Claims {
    pub fn for_parent(parent: &Parent, lifetime: Duration) -> Self {
        let now = Utc::now();
        Self {
            id: parent.id,
            role: parent.role.clone(),
            email: parent.email.clone(),
            players: parent.players.clone(),
            is_coach: parent.is_coach,
            iat: now.timestamp(),
            exp: (now + lifetime).timestamp(),
        }
    }
}

pub struct JwtService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    lifetime: Duration,
}

impl JwtService {
    pub fn new(secret: &SecretString, expiry_days: i64) -> Self {
        let bytes = secret.expose_secret().as_bytes();
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        Self {
            encoding_key: EncodingKey::from_secret(bytes),
            decoding_key: DecodingKey::from_secret(bytes),
            validation,
            lifetime: Duration::days(expiry_days),
        }
    }

    pub fn lifetime(&self) -> Duration {
        self.lifetime
    }

    pub fn issue(&self, claims: &Claims) -> Result<String, JwtError> {
        Ok(encode(&Header::new(Algorithm::HS256), claims, &self.encoding_key)?)
    }

    /// Issues a token for `parent` valid for the configured lifetime.
    pub fn issue_for(&self, parent: &Parent) -> Result<String, JwtError> {
        self.issue(&Claims::for_parent(parent, self.lifetime))
    }

    pub fn verify(&self, token: &str) -> Result<Claims, JwtError> {
        decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => JwtError::TokenExpired,
                jsonwebtoken::errors::ErrorKind::InvalidSignature => JwtError::InvalidSignature,
                _ => JwtError::InvalidToken(e.to_string()),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service(secret: &str) -> JwtService {
        JwtService::new(&SecretString::from(secret.to_string()), DEFAULT_EXPIRY_DAYS)
    }

    #[test]
    fn test_issue_and_verify() {
        let jwt = service("test-secret");
        let mut parent = Parent::new("coach@example.com", "Sam Ortiz");
        parent.is_coach = true;
        parent.players.push(Uuid::new_v4());

        let token = jwt.issue_for(&parent).unwrap();
        let claims = jwt.verify(&token).unwrap();
        assert_eq!(claims.id, parent.id);
        assert_eq!(claims.email, "coach@example.com");
        assert_eq!(claims.role, "user");
        assert!(claims.is_coach);
        assert_eq!(claims.players, parent.players);
        assert_eq!(claims.exp - claims.iat, 7 * 24 * 3600);
    }

    #[test]
    fn test_payload_uses_camel_case() {
        let parent = Parent::new("pat@example.com", "Pat Lee");
        let value = serde_json::to_value(Claims::for_parent(&parent, Duration::days(1))).unwrap();
        assert!(value.get("isCoach").is_some());
        assert!(value.get("players").is_some());
    }

    #[test]
    fn test_wrong_secret_is_rejected() {
        let parent = Parent::new("pat@example.com", "Pat Lee");
        let token = service("one").issue_for(&parent).unwrap();
        assert!(matches!(service("two").verify(&token), Err(JwtError::InvalidSignature)));
    }

    #[test]
    fn test_expired_token_is_rejected() {
        let jwt = service("test-secret");
        let parent = Parent::new("pat@example.com", "Pat Lee");
        let mut claims = Claims::for_parent(&parent, Duration::days(1));
        claims.exp = Utc::now().timestamp() - 10;
        let token = jwt.issue(&claims).unwrap();
        assert!(matches!(jwt.verify(&token), Err(JwtError::TokenExpired)));
    }

    #[test]
    fn test_garbage_maps_to_unauthorized() {
        let err: AppError = service("s").verify("not-a-token").unwrap_err().into();
        assert_eq!(err.status_code(), 401);
    }
}
