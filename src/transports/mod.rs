//! Built-in transports.
//!
//! | Feature                | Transport              | Connector              |
//! |------------------------|------------------------|------------------------|
//! | `transport-websocket`  | [`WebSocketTransport`] | [`WebSocketConnector`] |
//!
//! Anything else (in-process channels for tests, custom TLS setups) plugs in
//! through the [`Transport`](crate::Transport) and
//! [`Connector`](crate::Connector) traits.

#[cfg(feature = "transport-websocket")]
pub mod websocket;

#[cfg(feature = "transport-websocket")]
pub use websocket::{WebSocketConnector, WebSocketTransport};
