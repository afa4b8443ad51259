//! Agent stream transport
//!
//! The admission handshake only needs to receive text messages, send text
//! messages and close. `HandshakeStream` captures that, and `WsStream` provides
//! it over a WebSocket connection.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::tungstenite::protocol::{Role, WebSocketConfig};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::WebSocketStream;
use tracing::debug;

use super::EcaId;

/// Largest message or frame accepted from an agent
pub const MAX_AGENT_MESSAGE_SIZE: usize = 64 * 1024;

/// Transport errors
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    #[error("Binary frame is not valid UTF-8")]
    InvalidUtf8,

    #[error("Message exceeds {max} bytes")]
    MessageTooLarge { max: usize },
}

impl TransportError {
    /// The peer sent something unusable, as opposed to the connection failing
    pub fn is_malformed(&self) -> bool {
        matches!(self, TransportError::InvalidUtf8 | TransportError::MessageTooLarge { .. })
    }
}

fn from_ws_error(err: tungstenite::Error) -> TransportError {
    match err {
        tungstenite::Error::Capacity(_) => TransportError::MessageTooLarge {
            max: MAX_AGENT_MESSAGE_SIZE,
        },
        other => TransportError::WebSocket(other),
    }
}

/// Size limits for agent connections
pub fn agent_ws_config() -> WebSocketConfig {
    let mut config = WebSocketConfig::default();
    config.max_message_size = Some(MAX_AGENT_MESSAGE_SIZE);
    config.max_frame_size = Some(MAX_AGENT_MESSAGE_SIZE);
    config
}

/// A bidirectional stream of text messages
#[async_trait]
pub trait HandshakeStream: Send {
    /// Receive the next text message. `None` means the peer closed.
    async fn recv_text(&mut self) -> Result<Option<String>, TransportError>;

    /// Send a text message
    async fn send_text(&mut self, text: String) -> Result<(), TransportError>;

    /// Close the stream
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// `HandshakeStream` over a WebSocket
pub struct WsStream<S> {
    inner: WebSocketStream<S>,
}

impl<S> WsStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Wrap an established WebSocket
    pub fn new(inner: WebSocketStream<S>) -> Self {
        Self { inner }
    }

    /// Wrap a socket whose HTTP upgrade has already completed (server side)
    pub async fn from_upgraded(io: S) -> Self {
        Self::new(WebSocketStream::from_raw_socket(io, Role::Server, Some(agent_ws_config())).await)
    }
}

#[async_trait]
impl<S> HandshakeStream for WsStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn recv_text(&mut self) -> Result<Option<String>, TransportError> {
        while let Some(message) = self.inner.next().await {
            match message.map_err(from_ws_error)? {
                Message::Text(text) => return Ok(Some(text)),
                Message::Binary(data) => {
                    return String::from_utf8(data)
                        .map(Some)
                        .map_err(|_| TransportError::InvalidUtf8)
                }
                Message::Close(_) => return Ok(None),
                // Control frames are answered by tungstenite itself
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => continue,
            }
        }
        Ok(None)
    }

    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        self.inner.send(Message::Text(text)).await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        match self.inner.close(None).await {
            Ok(())
            | Err(tungstenite::Error::ConnectionClosed)
            | Err(tungstenite::Error::AlreadyClosed) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Hold an admitted agent's stream until the peer goes away.
///
/// Nothing is spoken after admission yet; incoming messages are drained and
/// logged so the connection stays healthy.
pub async fn serve_admitted<S: HandshakeStream>(mut stream: S, id: EcaId) {
    loop {
        match stream.recv_text().await {
            Ok(Some(text)) => debug!("ECA {} sent {} bytes", id, text.len()),
            Ok(None) => {
                debug!("ECA {} closed its stream", id);
                break;
            }
            Err(e) => {
                debug!("ECA {} stream error: {}", id, e);
                break;
            }
        }
    }
    let _ = stream.close().await;
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn ws_pair() -> (WsStream<tokio::io::DuplexStream>, WebSocketStream<tokio::io::DuplexStream>) {
        let (server_io, client_io) = tokio::io::duplex(4096);
        let server = WsStream::from_upgraded(server_io).await;
        let client = WebSocketStream::from_raw_socket(client_io, Role::Client, None).await;
        (server, client)
    }

    #[tokio::test]
    async fn test_text_frames_are_messages() {
        let (mut server, mut client) = ws_pair().await;

        client.send(Message::Text("{\"id\":\"x\"}".to_string())).await.unwrap();
        assert_eq!(server.recv_text().await.unwrap(), Some("{\"id\":\"x\"}".to_string()));

        server.send_text("hello".to_string()).await.unwrap();
        assert_eq!(client.next().await.unwrap().unwrap(), Message::Text("hello".to_string()));
    }

    #[tokio::test]
    async fn test_ping_skipped_and_binary_decoded() {
        let (mut server, mut client) = ws_pair().await;

        client.send(Message::Ping(vec![1, 2, 3])).await.unwrap();
        client.send(Message::Binary(b"{}".to_vec())).await.unwrap();
        assert_eq!(server.recv_text().await.unwrap(), Some("{}".to_string()));
    }

    #[tokio::test]
    async fn test_invalid_utf8_binary() {
        let (mut server, mut client) = ws_pair().await;

        client.send(Message::Binary(vec![0xff, 0xfe])).await.unwrap();
        assert!(matches!(server.recv_text().await, Err(TransportError::InvalidUtf8)));
    }

    #[tokio::test]
    async fn test_oversized_message_is_malformed() {
        let (mut server, mut client) = ws_pair().await;

        // The server stops reading at the frame header, so the send never completes
        tokio::spawn(async move {
            let _ = client.send(Message::Text("x".repeat(MAX_AGENT_MESSAGE_SIZE + 1))).await;
        });

        let err = server.recv_text().await.unwrap_err();
        assert!(matches!(err, TransportError::MessageTooLarge { .. }));
        assert!(err.is_malformed());
    }

    #[test]
    fn test_transport_failures_are_not_malformed() {
        let err = TransportError::WebSocket(tungstenite::Error::ConnectionClosed);
        assert!(!err.is_malformed());
        assert!(TransportError::InvalidUtf8.is_malformed());
    }

    #[tokio::test]
    async fn test_peer_close_ends_stream() {
        let (mut server, mut client) = ws_pair().await;

        client.close(None).await.unwrap();
        assert_eq!(server.recv_text().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_dropped_peer_ends_stream() {
        let (mut server, client) = ws_pair().await;

        drop(client);
        let result = server.recv_text().await;
        assert!(matches!(result, Ok(None) | Err(_)));
    }
}
