//! Mail error types.

use thiserror::Error;

use crate::database::error::DatabaseError;

pub type MailResult<T> = std::result::Result<T, MailError>;

/// Failure to build or deliver one email. Never surfaces in a payment result.
#[derive(Debug, Error)]
pub enum MailError {
    #[error("No recipient for email")]
    NoRecipient,

    #[error("Template not found: {0}")]
    TemplateNotFound(String),

    #[error("Attachment error: {0}")]
    Attachment(String),

    #[error("Mail provider error {status}: {message}")]
    Provider { status: u16, message: String },

    #[error("Rate limited, retry after {0} seconds")]
    RateLimited(u64),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Context lookup failed: {0}")]
    Lookup(#[from] DatabaseError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl MailError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network(_) | Self::RateLimited(_))
    }
}
