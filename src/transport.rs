//! Duplex frame transport used once a connection already exists.
//!
//! Mirrors the connection layer's use of `tokio_tungstenite` for a
//! WebSocket-style duplex stream, generalized into one trait so both a
//! coordinator (`accept`) and a participant (`connect`) drive sessions
//! through the same interface.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("transport closed")]
    Closed,
    #[error("transport operation timed out")]
    Timeout,
    #[error("write failed: {0}")]
    Write(String),
    #[error("connect failed: {0}")]
    Connect(String),
}

/// An ordered, reliable, bidirectional byte-stream with message framing.
/// The crate assumes frame boundaries are preserved by the implementation,
/// as a WebSocket connection does.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&mut self, bytes: Vec<u8>) -> Result<(), TransportError>;
    async fn recv(&mut self) -> Result<Vec<u8>, TransportError>;
    async fn close(&mut self) -> Result<(), TransportError>;
}

pub const WRITE_DEADLINE: Duration = Duration::from_secs(10);
pub const IDLE_READ_DEADLINE: Duration = Duration::from_secs(5 * 60);
pub const PING_REPLY_DEADLINE: Duration = Duration::from_secs(30);

/// A [`Transport`] backed by a `tokio-tungstenite` WebSocket stream, usable
/// whether the underlying TCP connection was obtained by accepting or by
/// dialing out.
pub struct WebSocketTransport {
    inner: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl WebSocketTransport {
    pub fn new(inner: WebSocketStream<MaybeTlsStream<TcpStream>>) -> Self {
        Self { inner }
    }

    /// Dials `url` (`ws://host:port`) and wraps the resulting stream.
    pub async fn connect(url: &str) -> Result<Self, TransportError> {
        let (stream, _response) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        Ok(Self { inner: stream })
    }

    /// Completes the WebSocket upgrade over an already-accepted TCP
    /// connection, the coordinator-side counterpart to [`Self::connect`].
    pub async fn accept(stream: TcpStream) -> Result<Self, TransportError> {
        let inner = tokio_tungstenite::accept_async(MaybeTlsStream::Plain(stream))
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        Ok(Self { inner })
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn send(&mut self, bytes: Vec<u8>) -> Result<(), TransportError> {
        tokio::time::timeout(WRITE_DEADLINE, self.inner.send(WsMessage::Binary(bytes.into())))
            .await
            .map_err(|_| TransportError::Timeout)?
            .map_err(|e| TransportError::Write(e.to_string()))
    }

    async fn recv(&mut self) -> Result<Vec<u8>, TransportError> {
        loop {
            let Ok(next) = tokio::time::timeout(IDLE_READ_DEADLINE, self.inner.next()).await
            else {
                // Idle for IDLE_READ_DEADLINE with nothing read. Rather than
                // tearing the session down outright, confirm the peer is
                // actually gone: ping it and give it PING_REPLY_DEADLINE to
                // answer before giving up.
                self.inner
                    .send(WsMessage::Ping(Vec::new().into()))
                    .await
                    .map_err(|e| TransportError::Write(e.to_string()))?;
                return match tokio::time::timeout(PING_REPLY_DEADLINE, self.inner.next()).await {
                    Ok(Some(Ok(WsMessage::Pong(_)))) => {
                        // Peer answered; the connection is alive, just quiet.
                        // Recurse to keep waiting for an actual frame.
                        Box::pin(self.recv()).await
                    }
                    Ok(Some(Ok(WsMessage::Binary(bytes)))) => Ok(bytes.to_vec()),
                    Ok(Some(Ok(WsMessage::Text(text)))) => Ok(text.into_bytes()),
                    Ok(Some(Ok(_))) => Box::pin(self.recv()).await,
                    Ok(Some(Err(e))) => Err(TransportError::Write(e.to_string())),
                    Ok(None) => Err(TransportError::Closed),
                    Err(_) => Err(TransportError::Timeout),
                };
            };
            match next {
                Some(Ok(WsMessage::Binary(bytes))) => return Ok(bytes.to_vec()),
                Some(Ok(WsMessage::Text(text))) => return Ok(text.into_bytes()),
                Some(Ok(WsMessage::Close(_))) | None => return Err(TransportError::Closed),
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(TransportError::Write(e.to_string())),
            }
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.inner
            .close(None)
            .await
            .map_err(|e| TransportError::Write(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::MockTransport;

    #[tokio::test]
    async fn mock_transport_send_and_recv() {
        let mut transport = MockTransport::new(vec![b"hello".to_vec()]);
        transport.send(b"world".to_vec()).await.unwrap();
        assert_eq!(transport.outbox.lock().await.as_slice(), &[b"world".to_vec()]);
        assert_eq!(transport.recv().await.unwrap(), b"hello");
    }

    #[tokio::test]
    async fn mock_transport_recv_on_empty_is_closed() {
        let mut transport = MockTransport::new(vec![]);
        let err = transport.recv().await.unwrap_err();
        assert!(matches!(err, TransportError::Closed));
    }
}
