use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::domain::ids::MessageId;
use crate::threshold::HighlightAction;

/// Failure reported by the chat platform port.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApiError {
    #[error("resource not found: {0}")]
    NotFound(String),
    #[error("missing permission: {0}")]
    Forbidden(String),
    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("platform returned status {status}: {message}")]
    Http { status: u16, message: String },
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("could not decode platform response: {0}")]
    Decode(String),
}

impl ApiError {
    pub fn is_permission_denied(&self) -> bool {
        matches!(self, Self::Forbidden(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

#[derive(Debug, Error)]
pub enum StoreLoadError {
    #[error("highlight store file `{0}` does not exist")]
    Missing(PathBuf),
    #[error("could not read highlight store `{path}`: {source}")]
    Read { path: PathBuf, source: std::io::Error },
    #[error("highlight store `{path}` is corrupt: {source}")]
    Corrupt { path: PathBuf, source: serde_json::Error },
    #[error(transparent)]
    Initialize(#[from] PersistenceError),
}

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("could not serialize highlight store: {0}")]
    Serialize(#[source] serde_json::Error),
    #[error("could not write highlight store `{path}`: {source}")]
    Write { path: PathBuf, source: std::io::Error },
    #[error("highlight store write task did not complete: {0}")]
    Task(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FetchTarget {
    Message,
    Member,
}

impl fmt::Display for FetchTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Message => f.write_str("message"),
            Self::Member => f.write_str("member"),
        }
    }
}

/// Why a single reaction event could not be fully synchronized. None of these stop the
/// engine; the next event for the same message re-evaluates from live state.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("could not fetch {target} `{id}`: {source}")]
    Fetch { target: FetchTarget, id: String, source: ApiError },
    #[error("highlight {action} for source message `{message_id}` was rejected: {source}")]
    Publish { action: HighlightAction, message_id: MessageId, source: ApiError },
    #[error("highlight {action} for source message `{message_id}` applied but not persisted: {source}")]
    Persistence { action: HighlightAction, message_id: MessageId, source: PersistenceError },
}

impl SyncError {
    pub fn is_permission_denied(&self) -> bool {
        match self {
            Self::Fetch { source, .. } | Self::Publish { source, .. } => {
                source.is_permission_denied()
            }
            Self::Persistence { .. } => false,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Fetch { .. } => "fetch",
            Self::Publish { .. } => "publish",
            Self::Persistence { .. } => "persistence",
        }
    }
}
