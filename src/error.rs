//! Application error type shared by the registration, payment and HTTP layers.

use serde::Serialize;
use std::fmt;
use thiserror::Error;

use crate::database::error::DatabaseError;
use crate::models::{LevelConflict, PaymentStatus, TeamLevel};
use crate::payments::error::{ConfigError, ProviderError};

pub type AppResult<T> = Result<T, AppError>;

/// One rejected input field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum AppErrorKind {
    #[error("Validation failed: {}", join_fields(.0))]
    Validation(Vec<FieldError>),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{entity} '{id}' not found")]
    NotFound { entity: String, id: String },

    #[error("{0}")]
    DuplicateRegistration(String),

    #[error("Team is already registered at {existing} level for this tournament; requested {requested}")]
    LevelMismatch {
        existing: TeamLevel,
        requested: TeamLevel,
    },

    #[error(transparent)]
    Config(ConfigError),

    #[error(transparent)]
    Provider(ProviderError),

    /// The processor accepted the charge but the database commit failed.
    #[error("Payment was processed but could not be recorded: {message}")]
    TransactionAborted { message: String },

    #[error("Cannot move payment status from {from} to {to}")]
    InvalidTransition {
        from: PaymentStatus,
        to: PaymentStatus,
    },

    #[error(transparent)]
    Database(DatabaseError),

    #[error("{0}")]
    Internal(String),
}

fn join_fields(fields: &[FieldError]) -> String {
    fields
        .iter()
        .map(|f| format!("{}: {}", f.field, f.message))
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug, Clone)]
pub struct AppError {
    pub kind: AppErrorKind,
    pub context: Option<String>,
}

impl AppError {
    pub fn new(kind: AppErrorKind) -> Self {
        Self {
            kind,
            context: None,
        }
    }

    pub fn with_context<S: Into<String>>(mut self, context: S) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(AppErrorKind::Validation(vec![FieldError::new(field, message)]))
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(AppErrorKind::Unauthorized(message.into()))
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(AppErrorKind::Forbidden(message.into()))
    }

    pub fn not_found(entity: impl Into<String>, id: impl ToString) -> Self {
        Self::new(AppErrorKind::NotFound {
            entity: entity.into(),
            id: id.to_string(),
        })
    }

    pub fn duplicate(message: impl Into<String>) -> Self {
        Self::new(AppErrorKind::DuplicateRegistration(message.into()))
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(AppErrorKind::Internal(message.into()))
    }

    pub fn invalid_transition(from: PaymentStatus, to: PaymentStatus) -> Self {
        Self::new(AppErrorKind::InvalidTransition { from, to })
    }

    pub fn status_code(&self) -> u16 {
        match &self.kind {
            AppErrorKind::Validation(_) | AppErrorKind::LevelMismatch { .. } => 400,
            AppErrorKind::Unauthorized(_) => 401,
            AppErrorKind::Forbidden(_) => 403,
            AppErrorKind::NotFound { .. } => 404,
            AppErrorKind::DuplicateRegistration(_) | AppErrorKind::InvalidTransition { .. } => 409,
            AppErrorKind::Provider(e) if e.declined => 400,
            AppErrorKind::Provider(_) => 502,
            AppErrorKind::Config(_)
            | AppErrorKind::TransactionAborted { .. }
            | AppErrorKind::Database(_)
            | AppErrorKind::Internal(_) => 500,
        }
    }

    /// Stable error code placed in the `error` field of responses.
    pub fn error_code(&self) -> &'static str {
        match &self.kind {
            AppErrorKind::Validation(_) => "ValidationError",
            AppErrorKind::Unauthorized(_) => "Unauthorized",
            AppErrorKind::Forbidden(_) => "Forbidden",
            AppErrorKind::NotFound { .. } => "NotFound",
            AppErrorKind::DuplicateRegistration(_) => "DuplicateRegistration",
            AppErrorKind::LevelMismatch { .. } => "LevelMismatch",
            AppErrorKind::Config(_) => "ConfigError",
            AppErrorKind::Provider(e) if e.declined => "PaymentRefused",
            AppErrorKind::Provider(_) => "ProviderError",
            AppErrorKind::TransactionAborted { .. } => "TransactionAborted",
            AppErrorKind::InvalidTransition { .. } => "InvalidTransition",
            AppErrorKind::Database(_) => "DatabaseError",
            AppErrorKind::Internal(_) => "InternalError",
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self.kind, AppErrorKind::DuplicateRegistration(_))
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.context {
            Some(context) => write!(f, "{} ({})", self.kind, context),
            None => write!(f, "{}", self.kind),
        }
    }
}

impl std::error::Error for AppError {}

impl From<AppErrorKind> for AppError {
    fn from(kind: AppErrorKind) -> Self {
        Self::new(kind)
    }
}

impl From<DatabaseError> for AppError {
    fn from(err: DatabaseError) -> Self {
        if err.is_duplicate_registration() {
            return Self::duplicate("This registration already exists")
                .with_context(err.to_string());
        }
        Self::new(AppErrorKind::Database(err))
    }
}

impl From<ProviderError> for AppError {
    fn from(err: ProviderError) -> Self {
        Self::new(AppErrorKind::Provider(err))
    }
}

impl From<ConfigError> for AppError {
    fn from(err: ConfigError) -> Self {
        Self::new(AppErrorKind::Config(err))
    }
}

impl From<LevelConflict> for AppError {
    fn from(conflict: LevelConflict) -> Self {
        Self::new(AppErrorKind::LevelMismatch {
            existing: conflict.existing,
            requested: conflict.requested,
        })
    }
}
