//! Error types for the Who Is Spy client.

use thiserror::Error;

/// Errors that can occur when using the Who Is Spy client.
#[derive(Debug, Error)]
pub enum SpyError {
    /// Failed to send a frame through the transport.
    #[error("transport send error: {0}")]
    TransportSend(String),

    /// Failed to receive a frame from the transport.
    #[error("transport receive error: {0}")]
    TransportReceive(String),

    /// The transport connection was closed unexpectedly.
    #[error("transport connection closed")]
    TransportClosed,

    /// A connection attempt through a [`Connector`](crate::Connector) failed.
    #[error("connect error: {0}")]
    Connect(String),

    /// Failed to serialize or deserialize a frame or HTTP body.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Attempted an operation that requires a live connection, but the client is not connected.
    #[error("not connected to server")]
    NotConnected,

    /// Attempted a room operation but the client has no current room.
    #[error("not in a room")]
    NotInRoom,

    /// The HTTP request could not be performed (connection refused, timeout, bad body).
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// The HTTP API answered with a non-success status.
    #[error("api error {status}: {message}")]
    Api {
        /// HTTP status code returned by the server.
        status: u16,
        /// Response body, or the canonical reason when the body is empty.
        message: String,
    },

    /// A required argument was empty after trimming.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// An API base URL could not be parsed or extended.
    #[error("invalid url: {0}")]
    InvalidUrl(String),

    /// An operation timed out.
    #[error("operation timed out")]
    Timeout,

    /// An I/O error occurred (session file, socket setup).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SpyError {
    /// Returns `true` for failures worth retrying: network errors, timeouts and 5xx answers.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(e) => e.is_connect() || e.is_timeout() || e.is_request(),
            Self::Api { status, .. } => *status >= 500,
            Self::Timeout | Self::TransportClosed | Self::Connect(_) => true,
            _ => false,
        }
    }
}

/// A specialized [`Result`] type for Who Is Spy client operations.
pub type Result<T> = std::result::Result<T, SpyError>;
