//! WebSocket transport backed by `tokio-tungstenite`.
//!
//! [`WebSocketTransport`] carries one JSON event per text frame. Both `ws://`
//! and `wss://` URLs work; TLS goes through
//! [`MaybeTlsStream`](tokio_tungstenite::MaybeTlsStream).
//! [`WebSocketConnector`] dials a fixed URL and is what
//! [`SpyClient::start`](crate::SpyClient::start) takes.
//!
//! # Example
//!
//! ```rust,no_run
//! # async fn example() -> Result<(), who_is_spy_client::SpyError> {
//! use who_is_spy_client::{SpyClient, SpyConfig, WebSocketConnector};
//!
//! let connector = WebSocketConnector::new("ws://localhost:3001/ws")?;
//! let (client, mut events) = SpyClient::start(connector, SpyConfig::default());
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::{debug, info, warn};

use crate::error::SpyError;
use crate::transport::{Connector, Transport};

/// Stream type produced by `connect_async`.
pub type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// A [`Transport`] over one WebSocket connection.
///
/// # Cancel Safety
///
/// [`recv`](Transport::recv) is cancel-safe: a frame is only taken off the
/// stream when it is returned.
#[derive(Debug)]
pub struct WebSocketTransport {
    stream: WsStream,
    closed: bool,
}

impl WebSocketTransport {
    /// Open a WebSocket connection.
    ///
    /// # Errors
    ///
    /// Returns [`SpyError::Connect`] if the handshake fails for any reason.
    pub async fn connect(url: &str) -> Result<Self, SpyError> {
        debug!(%url, "opening WebSocket");
        let (stream, _response) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| SpyError::Connect(format!("{url}: {e}")))?;
        info!(%url, "WebSocket open");
        Ok(Self::from_stream(stream))
    }

    /// Wrap a stream opened elsewhere (custom TLS, headers, proxies).
    pub fn from_stream(stream: WsStream) -> Self {
        Self {
            stream,
            closed: false,
        }
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn send(&mut self, message: String) -> Result<(), SpyError> {
        if self.closed {
            return Err(SpyError::TransportClosed);
        }
        self.stream
            .send(Message::Text(message.into()))
            .await
            .map_err(|e| SpyError::TransportSend(e.to_string()))
    }

    async fn recv(&mut self) -> Option<Result<String, SpyError>> {
        loop {
            let frame = match self.stream.next().await? {
                Ok(frame) => frame,
                Err(e) => return Some(Err(SpyError::TransportReceive(e.to_string()))),
            };

            match frame {
                Message::Text(text) => return Some(Ok(text.to_string())),
                Message::Close(close) => {
                    debug!(?close, "server closed the WebSocket");
                    return None;
                }
                // tungstenite answers pings itself.
                Message::Ping(_) | Message::Pong(_) => {}
                Message::Binary(bytes) => {
                    warn!(len = bytes.len(), "ignoring binary WebSocket frame");
                }
                Message::Frame(_) => {}
            }
        }
    }

    async fn close(&mut self) -> Result<(), SpyError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.stream
            .close(None)
            .await
            .map_err(|e| SpyError::TransportSend(e.to_string()))
    }
}

/// Dials the game server's WebSocket endpoint on every connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebSocketConnector {
    url: String,
}

impl WebSocketConnector {
    /// Create a connector for a `ws://` or `wss://` URL.
    ///
    /// # Errors
    ///
    /// Returns [`SpyError::InvalidUrl`] for any other scheme.
    pub fn new(url: impl Into<String>) -> Result<Self, SpyError> {
        let url = url.into();
        if url.starts_with("ws://") || url.starts_with("wss://") {
            Ok(Self { url })
        } else {
            Err(SpyError::InvalidUrl(url))
        }
    }

    /// Derive the event endpoint from the server's HTTP origin, e.g.
    /// `http://host:3001` becomes `ws://host:3001/ws`.
    ///
    /// # Errors
    ///
    /// Returns [`SpyError::InvalidUrl`] if `origin` is not `http(s)://`.
    pub fn from_http_origin(origin: &str) -> Result<Self, SpyError> {
        let origin = origin.trim_end_matches('/');
        let ws = if let Some(rest) = origin.strip_prefix("https://") {
            format!("wss://{rest}/ws")
        } else if let Some(rest) = origin.strip_prefix("http://") {
            format!("ws://{rest}/ws")
        } else {
            return Err(SpyError::InvalidUrl(origin.to_string()));
        };
        Self::new(ws)
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    type Transport = WebSocketTransport;

    async fn connect(&mut self) -> Result<WebSocketTransport, SpyError> {
        WebSocketTransport::connect(&self.url).await
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    /// Accept one WebSocket connection on a random port and run `handler` on it.
    async fn serve_once<F, Fut>(handler: F) -> String
    where
        F: FnOnce(tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>) -> Fut
            + Send
            + 'static,
        Fut: std::future::Future<Output = ()> + Send,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            handler(ws).await;
        });

        format!("ws://{addr}")
    }

    #[test]
    fn connector_rejects_non_websocket_urls() {
        assert!(matches!(
            WebSocketConnector::new("http://localhost:3001"),
            Err(SpyError::InvalidUrl(_))
        ));
        assert!(WebSocketConnector::new("wss://spy.example.com/ws").is_ok());
    }

    #[test]
    fn connector_derives_url_from_http_origin() {
        let c = WebSocketConnector::from_http_origin("http://localhost:3001/").unwrap();
        assert_eq!(c.url(), "ws://localhost:3001/ws");
        let c = WebSocketConnector::from_http_origin("https://spy.example.com").unwrap();
        assert_eq!(c.url(), "wss://spy.example.com/ws");
        assert!(WebSocketConnector::from_http_origin("ftp://x").is_err());
    }

    #[tokio::test]
    async fn unreachable_server_is_a_connect_error() {
        let mut connector = WebSocketConnector::new("ws://127.0.0.1:1").unwrap();
        let err = connector.connect().await.unwrap_err();
        assert!(matches!(err, SpyError::Connect(_)));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn recv_yields_text_frames_and_skips_binary() {
        let url = serve_once(|mut ws| async move {
            ws.send(Message::Binary(vec![1, 2, 3].into())).await.unwrap();
            ws.send(Message::Text(r#"{"event":"vote-tie"}"#.into()))
                .await
                .unwrap();
            ws.close(None).await.unwrap();
        })
        .await;

        let mut connector = WebSocketConnector::new(url).unwrap();
        let mut transport = connector.connect().await.unwrap();

        assert_eq!(
            transport.recv().await.unwrap().unwrap(),
            r#"{"event":"vote-tie"}"#
        );
        assert!(transport.recv().await.is_none());
    }

    #[tokio::test]
    async fn send_reaches_the_server() {
        let url = serve_once(|mut ws| async move {
            if let Some(Ok(Message::Text(text))) = ws.next().await {
                ws.send(Message::Text(text)).await.unwrap();
            }
            ws.close(None).await.unwrap();
        })
        .await;

        let mut transport = WebSocketTransport::connect(&url).await.unwrap();
        let frame = r#"{"event":"ready-to-vote","data":{"roomId":"R1"}}"#;
        transport.send(frame.to_string()).await.unwrap();
        assert_eq!(transport.recv().await.unwrap().unwrap(), frame);
    }

    #[tokio::test]
    async fn close_is_idempotent_and_blocks_sends() {
        let url = serve_once(|mut ws| async move { while let Some(Ok(_)) = ws.next().await {} }).await;

        let mut transport = WebSocketTransport::connect(&url).await.unwrap();
        transport.close().await.unwrap();
        transport.close().await.unwrap();

        let err = transport.send("late".to_string()).await.unwrap_err();
        assert!(matches!(err, SpyError::TransportClosed));
    }
}
