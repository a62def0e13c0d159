use std::path::PathBuf;
use thiserror::Error;

/// Failures at the subscription store boundary. These always reach the caller.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("failed to access subscription store {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("subscription store {path:?} is not valid JSON: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to serialize subscriptions: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("subscription registry lock poisoned")]
    Poisoned,

    #[error("blocking storage task failed: {0}")]
    Task(String),
}

/// A single watcher could not be notified. Never escapes the dispatcher.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("recipient unreachable: {0}")]
    Unreachable(String),

    #[error("recipient not found")]
    NotFound,

    #[error("transport failure: {0}")]
    Transport(String),
}

impl DeliveryError {
    pub fn reason_code(&self) -> &'static str {
        match self {
            Self::Unreachable(_) => "unreachable",
            Self::NotFound => "not_found",
            Self::Transport(_) => "transport",
        }
    }
}

/// Live metadata could not be resolved; callers fall back to a placeholder.
#[derive(Debug, Error)]
pub enum LookupError {
    #[error("member {0} not found")]
    Member(u64),

    #[error("channel {0} not found")]
    Channel(u64),

    #[error("guild {0} not found")]
    Guild(u64),
}

impl LookupError {
    pub fn placeholder(&self) -> &'static str {
        match self {
            Self::Member(_) => "unknown member",
            Self::Channel(_) => "unknown channel",
            Self::Guild(_) => "unknown server",
        }
    }
}
