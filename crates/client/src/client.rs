//! WebSocket connector for the transcription server's event stream.
//!
//! [`Connector`] opens a [`Transport`] to an endpoint; the channel only
//! talks to these traits so reconnection can be exercised without a
//! network. [`WsConnector`] is the production implementation over
//! `tokio-tungstenite`.

use async_trait::async_trait;
use futures::StreamExt;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

/// Opens connections to an event endpoint.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self, endpoint: &str) -> Result<Box<dyn Transport>, ClientError>;
}

/// One open connection delivering text frames.
#[async_trait]
pub trait Transport: Send {
    /// Wait for the next text frame.
    ///
    /// Returns `None` once the connection is gone, whether the server
    /// closed it or a transport error occurred; errors are logged here
    /// and never surface separately.
    async fn next_text(&mut self) -> Option<String>;

    /// Close the connection from our side.
    async fn close(&mut self);
}

/// Production connector over `tokio-tungstenite`.
#[derive(Debug, Default, Clone)]
pub struct WsConnector;

impl WsConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for WsConnector {
    /// Connect to the WebSocket endpoint.
    ///
    /// Each connection gets a fresh UUID so log lines from successive
    /// reconnects can be told apart.
    async fn connect(&self, endpoint: &str) -> Result<Box<dyn Transport>, ClientError> {
        let connection_id = uuid::Uuid::new_v4().to_string();

        let (ws_stream, _response) = connect_async(endpoint).await.map_err(|e| {
            ClientError::Connection(format!("Failed to connect to {endpoint}: {e}"))
        })?;

        tracing::info!(
            connection_id = %connection_id,
            "Connected to event stream at {endpoint}",
        );

        Ok(Box::new(WsTransport {
            connection_id,
            ws_stream,
        }))
    }
}

/// A live WebSocket connection.
pub struct WsTransport {
    connection_id: String,
    ws_stream: WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>,
}

#[async_trait]
impl Transport for WsTransport {
    async fn next_text(&mut self) -> Option<String> {
        while let Some(msg_result) = self.ws_stream.next().await {
            match msg_result {
                Ok(Message::Text(text)) => return Some(text),
                Ok(Message::Binary(_)) => {
                    tracing::trace!(connection_id = %self.connection_id, "Ignoring binary frame");
                }
                Ok(Message::Ping(_) | Message::Pong(_)) => {
                    // Handled automatically by tungstenite.
                }
                Ok(Message::Close(frame)) => {
                    tracing::info!(connection_id = %self.connection_id, ?frame, "Server closed event stream");
                    return None;
                }
                Ok(Message::Frame(_)) => {}
                Err(e) => {
                    tracing::warn!(connection_id = %self.connection_id, error = %e, "WebSocket receive error");
                    return None;
                }
            }
        }
        tracing::info!(connection_id = %self.connection_id, "Event stream exhausted");
        None
    }

    async fn close(&mut self) {
        if let Err(e) = self.ws_stream.close(None).await {
            tracing::debug!(connection_id = %self.connection_id, error = %e, "Error while closing event stream");
        }
    }
}

/// Errors that can occur when working with the WebSocket client.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Failed to establish the WebSocket connection.
    #[error("Connection error: {0}")]
    Connection(String),

    /// A protocol-level error on an already-established connection.
    #[error("Protocol error: {0}")]
    Protocol(String),
}
