//! The stream transport seam.
//!
//! [`ConnectionController`](crate::stream::ConnectionController) only talks to
//! [`Connector`] and [`Transport`]; [`WsConnector`] is the production
//! implementation on top of tokio-tungstenite.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{client::IntoClientRequest, Message},
    MaybeTlsStream, WebSocketStream,
};

use crate::{core::redact_ws_url, error::TransportError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Ping(Vec<u8>),
    Pong(Vec<u8>),
    Close(Option<String>),
    /// Binary or raw frames; they only count as activity.
    Other,
}

#[async_trait]
pub trait Transport: Send {
    /// `None` once the peer has gone away.
    async fn recv(&mut self) -> Option<Result<Frame, TransportError>>;

    async fn send(&mut self, frame: Frame) -> Result<(), TransportError>;

    async fn close(&mut self);
}

#[async_trait]
pub trait Connector: Send + Sync {
    async fn open(&self, url: &str) -> Result<Box<dyn Transport>, TransportError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn open(&self, url: &str) -> Result<Box<dyn Transport>, TransportError> {
        tracing::debug!(url = %redact_ws_url(url), "ws connect");
        let request = url
            .into_client_request()
            .map_err(|error| TransportError::Open(format!("invalid websocket request: {error}")))?;
        let (stream, _) = connect_async(request)
            .await
            .map_err(|error| TransportError::Open(error.to_string()))?;
        tracing::debug!("ws connected");
        Ok(Box::new(WsTransport { stream }))
    }
}

pub struct WsTransport {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl Transport for WsTransport {
    async fn recv(&mut self) -> Option<Result<Frame, TransportError>> {
        let incoming = self.stream.next().await?;
        Some(
            incoming
                .map(|message| match message {
                    Message::Text(text) => Frame::Text(text.to_string()),
                    Message::Ping(payload) => Frame::Ping(payload.to_vec()),
                    Message::Pong(payload) => Frame::Pong(payload.to_vec()),
                    Message::Close(frame) => Frame::Close(
                        frame
                            .map(|frame| frame.reason.to_string())
                            .filter(|reason| !reason.is_empty()),
                    ),
                    Message::Binary(_) | Message::Frame(_) => Frame::Other,
                })
                .map_err(|error| TransportError::Read(error.to_string())),
        )
    }

    async fn send(&mut self, frame: Frame) -> Result<(), TransportError> {
        let message = match frame {
            Frame::Text(text) => Message::Text(text.into()),
            Frame::Ping(payload) => Message::Ping(payload.into()),
            Frame::Pong(payload) => Message::Pong(payload.into()),
            Frame::Close(_) => Message::Close(None),
            Frame::Other => return Ok(()),
        };
        self.stream
            .send(message)
            .await
            .map_err(|error| TransportError::Send(error.to_string()))
    }

    async fn close(&mut self) {
        if let Err(error) = self.stream.close(None).await {
            tracing::debug!(%error, "ws close returned an error");
        }
    }
}
