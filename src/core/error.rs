use std::fmt;
use thiserror::Error;

/// Mutation kinds that can fail and be reported back to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MutationKind {
    Create,
    Update,
    Delete,
}

impl MutationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MutationKind::Create => "create",
            MutationKind::Update => "update",
            MutationKind::Delete => "delete",
        }
    }
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SyncError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Request rejected with status {status}: {message}")]
    Rejected { status: u16, message: String },

    #[error("Malformed response: {0}")]
    Malformed(String),

    #[error("Subscription error: {0}")]
    Subscription(String),

    #[error("Failed to {action} {entity}: {message}")]
    MutationFailed {
        entity: &'static str,
        action: MutationKind,
        message: String,
    },

    #[error("{entity} '{id}' not found")]
    NotFound { entity: &'static str, id: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Lock error: {0}")]
    LockError(String),
}

impl SyncError {
    /// True for the failures a remote call can produce: transport, rejection
    /// and malformed response.
    pub fn is_remote_failure(&self) -> bool {
        matches!(
            self,
            SyncError::Transport(_) | SyncError::Rejected { .. } | SyncError::Malformed(_)
        )
    }

    /// Human-readable message without the variant prefix.
    pub fn message(&self) -> String {
        match self {
            SyncError::Transport(msg)
            | SyncError::Malformed(msg)
            | SyncError::Subscription(msg)
            | SyncError::Config(msg)
            | SyncError::Cache(msg)
            | SyncError::LockError(msg) => msg.clone(),
            SyncError::Rejected { message, .. } | SyncError::MutationFailed { message, .. } => {
                message.clone()
            }
            SyncError::NotFound { .. } => self.to_string(),
        }
    }

    /// Collapses any remote failure into the single mutation error shape
    /// surfaced to callers.
    pub fn into_mutation_failure(self, entity: &'static str, action: MutationKind) -> SyncError {
        match self {
            already @ SyncError::MutationFailed { .. } => already,
            other => SyncError::MutationFailed {
                entity,
                action,
                message: other.message(),
            },
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;

impl<T> From<std::sync::PoisonError<T>> for SyncError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::LockError(err.to_string())
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        Self::Malformed(err.to_string())
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Malformed(err.to_string())
        } else {
            Self::Transport(err.to_string())
        }
    }
}
