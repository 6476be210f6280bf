//! Transport abstraction for the Who Is Spy event channel.
//!
//! The [`Transport`] trait defines a bidirectional text message channel
//! between the client and server. Every frame is one JSON document, so each
//! implementation handles framing internally (WebSocket frames,
//! length-prefixed TCP, in-process channels).
//!
//! Because the client reconnects on its own, it does not take a transport
//! directly. It takes a [`Connector`], which produces a fresh connected
//! transport every time the connection manager asks for one.
//!
//! # Implementing a Custom Transport
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use who_is_spy_client::error::SpyError;
//! use who_is_spy_client::transport::{Connector, Transport};
//!
//! struct MyTransport { /* ... */ }
//!
//! #[async_trait]
//! impl Transport for MyTransport {
//!     async fn send(&mut self, message: String) -> Result<(), SpyError> {
//!         // Send the JSON frame over your transport
//!         todo!()
//!     }
//!
//!     async fn recv(&mut self) -> Option<Result<String, SpyError>> {
//!         // Return None when the connection is closed cleanly
//!         todo!()
//!     }
//!
//!     async fn close(&mut self) -> Result<(), SpyError> {
//!         todo!()
//!     }
//! }
//!
//! struct MyConnector;
//!
//! #[async_trait]
//! impl Connector for MyConnector {
//!     type Transport = MyTransport;
//!
//!     async fn connect(&mut self) -> Result<MyTransport, SpyError> {
//!         todo!()
//!     }
//! }
//! ```

use async_trait::async_trait;

use crate::error::SpyError;

/// A bidirectional text message transport carrying JSON event frames.
///
/// Each call to [`send`](Transport::send) transmits one complete frame.
/// Each call to [`recv`](Transport::recv) returns one complete frame.
///
/// # Cancel Safety
///
/// [`recv`](Transport::recv) **MUST** be cancel-safe because it is polled
/// inside `tokio::select!`. If `recv` is cancelled before completion, calling
/// it again must not lose data.
#[async_trait]
pub trait Transport: Send + 'static {
    /// Send a JSON frame to the server.
    ///
    /// # Errors
    ///
    /// Returns [`SpyError::TransportSend`] if the frame could not be sent.
    async fn send(&mut self, message: String) -> Result<(), SpyError>;

    /// Receive the next JSON frame from the server.
    ///
    /// Returns:
    /// - `Some(Ok(text))`: a complete frame was received
    /// - `Some(Err(e))`: a transport error occurred
    /// - `None`: the connection was closed cleanly by the server
    async fn recv(&mut self) -> Option<Result<String, SpyError>>;

    /// Close the transport connection gracefully.
    ///
    /// # Errors
    ///
    /// Returns an error if the close handshake fails. Implementations should
    /// still release resources in that case.
    async fn close(&mut self) -> Result<(), SpyError>;
}

/// Produces connected transports for the connection manager.
///
/// Called once at start-up and again for every reconnection attempt. The
/// manager bounds each call with its connect timeout, so implementations do
/// not need their own.
#[async_trait]
pub trait Connector: Send + 'static {
    /// The transport this connector yields.
    type Transport: Transport;

    /// Open a new connection.
    ///
    /// # Errors
    ///
    /// Any error is treated as a failed attempt and retried per the
    /// reconnection policy.
    async fn connect(&mut self) -> Result<Self::Transport, SpyError>;
}
