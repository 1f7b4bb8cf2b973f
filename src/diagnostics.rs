use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;

use crate::{core::truncate_message, model::ConnectionState};

/// Mutable runtime record owned by the connection controller.
#[derive(Debug, Clone, Default)]
pub struct RuntimeDiagnostics {
    pub connection_state: ConnectionState,
    pub config_valid: bool,
    pub last_connected_at: Option<DateTime<Utc>>,
    pub last_stream_event_at: Option<DateTime<Utc>>,
    pub last_message_id: Option<i64>,
    pub last_error: Option<String>,
    pub backoff_ms: u64,
    pub reconnect_attempts: u32,
}

impl RuntimeDiagnostics {
    pub fn record_error(&mut self, error: &impl ToString) {
        self.last_error = Some(truncate_message(&error.to_string(), 300));
    }

    pub fn snapshot(&self, now: DateTime<Utc>) -> StatusInfo {
        StatusInfo {
            state: self.connection_state,
            config_valid: self.config_valid,
            last_connected: self
                .last_connected_at
                .map(|at| at.to_rfc3339_opts(SecondsFormat::Millis, true)),
            last_error: self.last_error.clone(),
            reconnect_attempts: self.reconnect_attempts,
            backoff_ms: self.backoff_ms,
            last_message_id: self.last_message_id,
            stale_for_seconds: self
                .last_stream_event_at
                .map(|at| (now - at).num_seconds().max(0) as u64),
        }
    }
}

/// Read-only status projection handed to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusInfo {
    pub state: ConnectionState,
    pub config_valid: bool,
    /// RFC 3339.
    pub last_connected: Option<String>,
    pub last_error: Option<String>,
    pub reconnect_attempts: u32,
    /// Delay of the most recently scheduled reconnect.
    pub backoff_ms: u64,
    pub last_message_id: Option<i64>,
    pub stale_for_seconds: Option<u64>,
}
