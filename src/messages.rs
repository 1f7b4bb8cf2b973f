//! Gotify message decoding and the catch-up REST client.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;

use crate::{
    consts::{HISTORY_REQUEST_TIMEOUT_SECS, MAX_FETCH_HISTORY_LIMIT},
    core::truncate_message,
    error::{FetchError, MalformedMessage},
    model::PushMessage,
    settings::{normalize_base_url, Config},
};

/// `{messages, paging}`; paging is unused since one page is all we ask for.
#[derive(Debug, Deserialize)]
struct MessageListWire {
    messages: Vec<PushMessage>,
}

/// Source of recent messages for backlog reconciliation.
#[async_trait]
pub trait HistoryClient: Send + Sync {
    /// Newest first, as the server returns them.
    async fn fetch_recent(
        &self,
        config: &Config,
        limit: u32,
    ) -> Result<Vec<PushMessage>, FetchError>;
}

pub struct GotifyRestClient {
    client: reqwest::Client,
    timeout: Duration,
}

impl GotifyRestClient {
    pub fn new() -> Result<Self, FetchError> {
        Self::with_timeout(Duration::from_secs(HISTORY_REQUEST_TIMEOUT_SECS))
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| FetchError::Network(format!("Failed to build HTTP client: {error}")))?;
        Ok(Self { client, timeout })
    }

    fn endpoint(config: &Config, limit: u32) -> Result<reqwest::Url, FetchError> {
        let base_url = normalize_base_url(&config.base_url)
            .map_err(|error| FetchError::InvalidConfig(error.to_string()))?;
        let token = config.token.trim();
        if token.is_empty() {
            return Err(FetchError::InvalidConfig("client token is missing".to_string()));
        }

        let mut url = reqwest::Url::parse(&format!("{base_url}/message"))
            .map_err(|error| FetchError::InvalidConfig(format!("Invalid server URL: {error}")))?;
        url.query_pairs_mut()
            .append_pair("limit", &limit.clamp(1, MAX_FETCH_HISTORY_LIMIT).to_string())
            .append_pair("token", token);
        Ok(url)
    }

    fn request_error(&self, error: reqwest::Error) -> FetchError {
        if error.is_timeout() {
            FetchError::Timeout(self.timeout)
        } else {
            FetchError::Network(error.to_string())
        }
    }
}

#[async_trait]
impl HistoryClient for GotifyRestClient {
    async fn fetch_recent(
        &self,
        config: &Config,
        limit: u32,
    ) -> Result<Vec<PushMessage>, FetchError> {
        let url = Self::endpoint(config, limit)?;
        tracing::debug!(limit, "fetching recent messages");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|error| self.request_error(error))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|error| self.request_error(error))?;
        if !status.is_success() {
            return Err(status_error(status, &body));
        }

        let list = serde_json::from_str::<MessageListWire>(&body)
            .map_err(|error| FetchError::Decode(error.to_string()))?;
        tracing::debug!(count = list.messages.len(), "fetched recent messages");
        Ok(list.messages)
    }
}

/// Maps a non-success response onto the user-facing error taxonomy.
pub fn status_error(status: StatusCode, body: &str) -> FetchError {
    match status.as_u16() {
        code @ (401 | 403) => FetchError::Unauthorized(code),
        404 => FetchError::NotFound,
        code @ (500 | 502 | 503 | 504) => FetchError::Server(code),
        code => {
            let detail = serde_json::from_str::<serde_json::Value>(body)
                .ok()
                .and_then(|value| {
                    ["error", "message"].iter().find_map(|key| {
                        value
                            .get(key)
                            .and_then(|field| field.as_str())
                            .filter(|text| !text.trim().is_empty())
                            .map(str::to_string)
                    })
                });
            FetchError::Http {
                status: code,
                message: detail.unwrap_or_else(|| {
                    status.canonical_reason().unwrap_or("Unknown status").to_string()
                }),
            }
        }
    }
}

/// Decodes one stream text frame.
pub fn parse_stream_message(text: &str) -> Result<PushMessage, MalformedMessage> {
    serde_json::from_str::<PushMessage>(text).map_err(|error| MalformedMessage {
        reason: error.to_string(),
        payload: truncate_message(text, 140),
    })
}
