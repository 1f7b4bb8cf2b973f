//! Error taxonomy for the push client.
//!
//! Every failure path either retries with backoff or degrades to "skip and
//! log"; nothing here is fatal to the process.

use std::time::Duration;

/// Failures of the stream transport itself.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("Stream connection failed: {0}")]
    Open(String),

    #[error("Stream read error: {0}")]
    Read(String),

    #[error("Failed to send frame: {0}")]
    Send(String),

    #[error("Stream closed by server{}", .0.as_deref().map(|r| format!(" ({r})")).unwrap_or_default())]
    Closed(Option<String>),

    #[error("Stream ended unexpectedly")]
    Ended,
}

/// Why a `connect` call did not end in an open transport.
///
/// `Clone` because a single in-flight connect result is shared between every
/// caller that joined it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("Stream connection timed out after {} seconds", .0.as_secs())]
    Timeout(Duration),

    #[error("Connection was torn down before it opened")]
    Cancelled,
}

impl ConnectError {
    /// Failures that should feed the reconnect loop.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Timeout(_))
    }
}

/// An inbound frame that could not be decoded as a push message.
#[derive(Debug, thiserror::Error)]
#[error("Malformed push message: {reason} (payload: {payload})")]
pub struct MalformedMessage {
    pub reason: String,
    pub payload: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HandlerError {
    #[error("Handler {action} failed: {reason}")]
    Failed { action: String, reason: String },

    #[error("Handler {action} panicked: {reason}")]
    Panicked { action: String, reason: String },
}

impl HandlerError {
    pub fn failed(action: &str, reason: impl Into<String>) -> Self {
        Self::Failed {
            action: action.to_string(),
            reason: reason.into(),
        }
    }
}

/// Catch-up REST failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    #[error("Gotify configuration incomplete: {0}")]
    InvalidConfig(String),

    #[error("Client token rejected or expired (HTTP {0})")]
    Unauthorized(u16),

    #[error("Gotify server address is wrong (HTTP 404)")]
    NotFound,

    #[error("Gotify server error (HTTP {0}), try again later")]
    Server(u16),

    #[error("Recent message request failed with HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("Recent message request timed out after {} seconds", .0.as_secs())]
    Timeout(Duration),

    #[error("Failed to fetch recent messages: {0}")]
    Network(String),

    #[error("Failed to decode recent messages: {0}")]
    Decode(String),
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Failed to read {what}: {source}")]
    Read {
        what: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write {what}: {source}")]
    Write {
        what: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {what}: {source}")]
    Parse {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to serialize {what}: {source}")]
    Serialize {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0}")]
    Invalid(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// A backlog sync aborted for this trigger; it retries on the next connect.
#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("Failed to load configuration: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("Failed to update processed ledger: {0}")]
    Ledger(#[from] StorageError),
}

/// Tab opener failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OpenError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Failed to launch URL opener: {0}")]
    Launch(String),
}
