//! Error types for the remote API client.

use thiserror::Error;

use studydeck_core::errors::{RemoteError, RemoteErrorKind};

/// Result type alias for remote API calls.
pub type Result<T> = std::result::Result<T, RemoteClientError>;

/// Errors that can occur while talking to the studydeck API.
#[derive(Debug, Error)]
pub enum RemoteClientError {
    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// API error response from the service
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// Invalid request (missing required data, etc.)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Missing or malformed access token
    #[error("Authentication error: {0}")]
    Auth(String),
}

impl RemoteClientError {
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::Auth(message.into())
    }

    /// HTTP status if this is an API error.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<RemoteClientError> for RemoteError {
    fn from(err: RemoteClientError) -> Self {
        let message = err.to_string();
        match err {
            RemoteClientError::Api { status, message } => RemoteError::from_status(status, message),
            RemoteClientError::Http(inner) if inner.is_timeout() => RemoteError::timeout(message),
            RemoteClientError::Http(inner) if inner.is_connect() || inner.is_request() || inner.is_body() => {
                RemoteError::network(message)
            }
            RemoteClientError::Http(inner) => match inner.status() {
                Some(status) => RemoteError::from_status(status.as_u16(), message),
                None => RemoteError::unknown(message),
            },
            RemoteClientError::Json(_) => RemoteError::unknown(message),
            RemoteClientError::InvalidRequest(_) => RemoteError::new(RemoteErrorKind::Validation, message),
            RemoteClientError::Auth(_) => RemoteError::unauthorized(message),
        }
    }
}
