//! Adapter error types.

use thiserror::Error;

/// Errors raised while talking to an infrastructure platform.
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("{provider} API returned {status}: {body}")]
    Http {
        provider: &'static str,
        status: u16,
        body: String,
    },

    #[error("{provider} request failed: {message}")]
    Transport {
        provider: &'static str,
        message: String,
    },

    #[error("{provider} adapter is not configured: {}", .errors.join("; "))]
    NotConfigured {
        provider: &'static str,
        errors: Vec<String>,
    },

    #[error("unexpected {provider} response: {message}")]
    Decode {
        provider: &'static str,
        message: String,
    },
}

impl AdapterError {
    /// Transport failures, 5xx, and rate limiting are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            AdapterError::Transport { .. } => true,
            AdapterError::Http { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, AdapterError::Http { status: 404, .. })
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            AdapterError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}

pub type AdapterResult<T> = Result<T, AdapterError>;
