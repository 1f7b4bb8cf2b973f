//! Request/response operations for the surrounding application.

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::{sync::Arc, time::Duration};

use crate::{
    consts::STREAM_CONNECT_TIMEOUT_SECS,
    diagnostics::StatusInfo,
    error::ConnectError,
    settings::{build_stream_ws_url, Config, ConfigStore},
    stream::ConnectionController,
    transport::Connector,
};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ControlResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ControlResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
        }
    }
}

impl ControlResponse<()> {
    pub fn done() -> Self {
        Self {
            success: true,
            data: None,
            error: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TestResult {
    pub connected: bool,
}

/// `{"type": "testConnection", "data": {...}}` and friends.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum ControlRequest {
    GetConfig,
    GetStatus,
    TestConnection(Config),
    Reconnect,
    Disconnect,
}

pub struct ControlSurface {
    controller: ConnectionController,
    config_store: Arc<dyn ConfigStore>,
    connector: Arc<dyn Connector>,
    test_timeout: Duration,
}

impl ControlSurface {
    pub fn new(
        controller: ConnectionController,
        config_store: Arc<dyn ConfigStore>,
        connector: Arc<dyn Connector>,
    ) -> Self {
        Self {
            controller,
            config_store,
            connector,
            test_timeout: Duration::from_secs(STREAM_CONNECT_TIMEOUT_SECS),
        }
    }

    pub fn get_status(&self) -> ControlResponse<StatusInfo> {
        ControlResponse::ok(self.controller.status())
    }

    pub async fn get_config(&self) -> ControlResponse<Config> {
        match self.config_store.load().await {
            Ok(config) => ControlResponse::ok((*config).clone()),
            Err(error) => ControlResponse::failed(format!("Failed to load configuration: {error}")),
        }
    }

    /// Opens a throwaway stream with `config`; the live connection is not
    /// touched.
    pub async fn test_connection(&self, config: Config) -> ControlResponse<TestResult> {
        let config = config.normalized();
        let ws_url = match config
            .validate()
            .and_then(|()| build_stream_ws_url(&config.base_url, &config.token))
        {
            Ok(url) => url,
            Err(error) => {
                return ControlResponse::failed(
                    ConnectError::InvalidConfig(error.to_string()).to_string(),
                )
            }
        };

        match tokio::time::timeout(self.test_timeout, self.connector.open(&ws_url)).await {
            Ok(Ok(mut transport)) => {
                transport.close().await;
                tracing::info!("test connection succeeded");
                ControlResponse::ok(TestResult { connected: true })
            }
            Ok(Err(error)) => {
                tracing::info!(%error, "test connection failed");
                ControlResponse::failed(ConnectError::from(error).to_string())
            }
            Err(_) => {
                tracing::info!("test connection timed out");
                ControlResponse::failed(ConnectError::Timeout(self.test_timeout).to_string())
            }
        }
    }

    pub async fn reconnect(&self) -> ControlResponse<()> {
        let config = match self.config_store.load().await {
            Ok(config) => config,
            Err(error) => {
                return ControlResponse::failed(format!("Failed to load configuration: {error}"))
            }
        };
        if let Err(error) = config.validate() {
            return ControlResponse::failed(format!("Invalid configuration: {error}"));
        }

        tracing::info!("reconnect requested");
        self.controller.disconnect().await;
        match self.controller.connect(config).await {
            Ok(()) => ControlResponse::done(),
            Err(error) => ControlResponse::failed(error.to_string()),
        }
    }

    pub async fn disconnect(&self) -> ControlResponse<()> {
        self.controller.disconnect().await;
        ControlResponse::done()
    }

    /// JSON dispatcher over the typed operations.
    pub async fn handle(&self, request: ControlRequest) -> serde_json::Value {
        match request {
            ControlRequest::GetConfig => to_json(self.get_config().await),
            ControlRequest::GetStatus => to_json(self.get_status()),
            ControlRequest::TestConnection(config) => to_json(self.test_connection(config).await),
            ControlRequest::Reconnect => to_json(self.reconnect().await),
            ControlRequest::Disconnect => to_json(self.disconnect().await),
        }
    }

    /// Like [`handle`](Self::handle), for raw request text.
    pub async fn handle_json(&self, request: &str) -> serde_json::Value {
        match serde_json::from_str::<ControlRequest>(request) {
            Ok(request) => self.handle(request).await,
            Err(error) => to_json(ControlResponse::<()>::failed(format!(
                "Unknown request: {error}"
            ))),
        }
    }
}

fn to_json<T: Serialize>(response: ControlResponse<T>) -> serde_json::Value {
    serde_json::to_value(&response).unwrap_or_else(|error| {
        json!({"success": false, "error": format!("Failed to encode response: {error}")})
    })
}
