//! Error types for the studydeck core.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::entity::EntityKind;
use crate::sync::{SyncPhase, SyncRetryClass};

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Result type alias for remote service calls.
pub type RemoteResult<T> = std::result::Result<T, RemoteError>;

/// Errors surfaced by repositories and the sync coordinator.
#[derive(Debug, Error)]
pub enum Error {
    /// The referenced entity does not exist in the authoritative store.
    #[error("{kind} '{id}' not found")]
    NotFound { kind: EntityKind, id: String },

    /// Input rejected before anything was written.
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// Remote service failure (only surfaced from sync passes and cloud-only mode).
    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),

    /// Local storage engine failure.
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("A sync is already in progress")]
    SyncInProgress,

    #[error("Sync was cancelled")]
    SyncCancelled,

    /// A sync pass aborted in `phase`; earlier phases were kept.
    #[error("Sync failed during {phase}: {source}")]
    SyncFailed {
        phase: SyncPhase,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    pub fn not_found(kind: EntityKind, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage(message.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// The remote failure at the root of this error, if any.
    pub fn remote_cause(&self) -> Option<&RemoteError> {
        match self {
            Self::Remote(err) => Some(err),
            Self::SyncFailed { source, .. } => source.remote_cause(),
            _ => None,
        }
    }

    /// Message suitable for showing to the user after a failed "sync now".
    pub fn user_message(&self) -> String {
        match self.remote_cause().map(RemoteError::failure_class) {
            Some(RemoteFailureClass::Transient) => {
                "Could not reach server; your changes are saved locally.".to_string()
            }
            Some(RemoteFailureClass::Auth) => {
                "Your session has expired. Sign in again to sync; your changes are saved locally."
                    .to_string()
            }
            Some(RemoteFailureClass::Unknown) => {
                "Sync failed on the server; your changes are saved locally.".to_string()
            }
            None => match self {
                Self::SyncInProgress => "A sync is already running.".to_string(),
                Self::SyncCancelled => "Sync was cancelled; your changes are saved locally.".to_string(),
                other => other.to_string(),
            },
        }
    }
}

/// Input validation failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("'{0}' must not be empty")]
    EmptyField(&'static str),

    #[error("group '{0}' does not exist")]
    UnknownGroup(String),

    #[error("'{field}' {message}")]
    OutOfRange {
        field: &'static str,
        message: String,
    },

    #[error("id '{0}' is already in use")]
    DuplicateId(String),

    /// Local-only entities cannot be written while the local cache is off.
    #[error("'{0}' is local-only and needs the local cache")]
    LocalOnly(String),
}

/// Remote failure category as reported by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteErrorKind {
    /// Connection refused, DNS failure, reset connection.
    Network,
    Timeout,
    Unauthorized,
    /// Malformed request rejected by the service.
    Validation,
    NotFound,
    /// Primary key already exists.
    Conflict,
    /// 5xx, 429 and other transient server conditions.
    Server,
    Unknown,
}

impl RemoteErrorKind {
    /// Map an HTTP status code to a failure kind.
    pub fn from_status(status: u16) -> Self {
        match status {
            401 | 403 => Self::Unauthorized,
            404 => Self::NotFound,
            400 | 422 => Self::Validation,
            409 => Self::Conflict,
            408 => Self::Timeout,
            423 | 425 | 429 => Self::Server,
            500..=599 => Self::Server,
            _ => Self::Unknown,
        }
    }
}

/// Coarse classification used when logging swallowed mirror failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteFailureClass {
    Transient,
    Auth,
    Unknown,
}

impl std::fmt::Display for RemoteFailureClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transient => write!(f, "network"),
            Self::Auth => write!(f, "auth"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// Structured error returned by a [`crate::remote::RemoteService`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct RemoteError {
    pub kind: RemoteErrorKind,
    pub status: Option<u16>,
    pub message: String,
}

impl RemoteError {
    pub fn new(kind: RemoteErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            status: None,
            message: message.into(),
        }
    }

    /// Create an error from an HTTP status and response message.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        Self {
            kind: RemoteErrorKind::from_status(status),
            status: Some(status),
            message: message.into(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::Network, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::Timeout, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::Unauthorized, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::NotFound, message)
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::Unknown, message)
    }

    /// Classify error for retry policy.
    pub fn retry_class(&self) -> SyncRetryClass {
        match self.kind {
            RemoteErrorKind::Network | RemoteErrorKind::Timeout | RemoteErrorKind::Server => {
                SyncRetryClass::Retryable
            }
            RemoteErrorKind::Unauthorized => SyncRetryClass::ReauthRequired,
            RemoteErrorKind::Validation
            | RemoteErrorKind::NotFound
            | RemoteErrorKind::Conflict
            | RemoteErrorKind::Unknown => SyncRetryClass::Permanent,
        }
    }

    pub fn failure_class(&self) -> RemoteFailureClass {
        match self.retry_class() {
            SyncRetryClass::Retryable => RemoteFailureClass::Transient,
            SyncRetryClass::ReauthRequired => RemoteFailureClass::Auth,
            SyncRetryClass::Permanent => RemoteFailureClass::Unknown,
        }
    }
}

impl From<serde_json::Error> for RemoteError {
    fn from(err: serde_json::Error) -> Self {
        Self::unknown(format!("payload encoding failed: {}", err))
    }
}
