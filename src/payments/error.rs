use thiserror::Error;

/// Result type for calls into a card processor.
pub type ProviderResult<T> = Result<T, ProviderError>;

/// A processor returned a non-success answer or could not be reached.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{provider} error{}: {message}", http_suffix(.status))]
pub struct ProviderError {
    pub provider: String,
    pub status: Option<u16>,
    pub message: String,
    pub retryable: bool,
    /// The customer's card or account refused the charge.
    pub declined: bool,
}

fn http_suffix(status: &Option<u16>) -> String {
    match status {
        Some(code) => format!(" (HTTP {})", code),
        None => String::new(),
    }
}

impl ProviderError {
    pub fn declined(provider: impl Into<String>, status: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            status,
            message: message.into(),
            retryable: false,
            declined: true,
        }
    }

    /// Maps an HTTP failure. 5xx and 429 are retryable; 402 counts as a decline.
    pub fn http(provider: impl Into<String>, status: u16, message: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            status: Some(status),
            message: message.into(),
            retryable: status >= 500 || status == 429,
            declined: status == 402,
        }
    }

    pub fn transport(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            status: None,
            message: message.into(),
            retryable: true,
            declined: false,
        }
    }

    pub fn invalid_response(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            status: None,
            message: format!("Invalid response format: {}", message.into()),
            retryable: false,
            declined: false,
        }
    }

    pub fn mark_declined(mut self) -> Self {
        self.declined = true;
        self.retryable = false;
        self
    }
}

/// The payment configuration cannot be used for the requested operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{provider} configuration invalid ({field}): {message}")]
pub struct ConfigError {
    pub provider: String,
    pub field: String,
    pub message: String,
}

impl ConfigError {
    pub fn missing_field(provider: impl Into<String>, field: impl Into<String>) -> Self {
        let field = field.into();
        Self {
            provider: provider.into(),
            message: format!("required field '{}' is missing", field),
            field,
        }
    }

    pub fn new(provider: impl Into<String>, field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            field: field.into(),
            message: message.into(),
        }
    }
}
