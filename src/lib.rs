//! # Who Is Spy Client
//!
//! Headless async client for the "Who Is Spy" party game server.
//!
//! Players join rooms, receive secret words, discuss, and vote out the player
//! they believe holds the spy's look-alike word. The server decides every
//! outcome; this crate mirrors what it asserts and gives a front-end
//! everything below the view layer.
//!
//! ## Features
//!
//! - **Phase machine**: [`GameState`] turns inbound events into
//!   `lobby → playing → voting → eliminated | finished` transitions
//! - **Reconnecting client**: [`SpyClient`] reconnects with a fixed, capped
//!   policy and asks the server to restore the stored [`SessionRecord`]
//! - **Transport-agnostic**: implement [`Transport`] and [`Connector`] for any
//!   backend; the default `transport-websocket` feature provides
//!   [`WebSocketConnector`]
//! - **HTTP APIs**: [`api::WordListClient`] and [`api::QuizClient`] with a
//!   bounded retry wrapper
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use who_is_spy_client::{Phase, SpyClient, SpyConfig, SpyEvent, WebSocketConnector};
//!
//! # async fn run() -> Result<(), who_is_spy_client::SpyError> {
//! let connector = WebSocketConnector::new("ws://localhost:3001/ws")?;
//! let (client, mut events) = SpyClient::start(connector, SpyConfig::default());
//!
//! while let Some(event) = events.recv().await {
//!     match event {
//!         SpyEvent::Connected => client.join_room("R1", "Alice").await?,
//!         SpyEvent::WordsDealt { assignment } => println!("your word: {}", assignment.word),
//!         SpyEvent::PhaseChanged { to: Phase::Voting, .. } => { /* pick a target */ }
//!         SpyEvent::Disconnected { .. } => break,
//!         _ => {}
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod client;
pub mod error;
pub mod error_codes;
pub mod event;
pub mod phase;
pub mod protocol;
pub mod session;
pub mod transport;
pub mod transports;

// Re-export primary types for ergonomic imports.
pub use client::{ReconnectPolicy, SpyClient, SpyConfig};
pub use error::SpyError;
pub use error_codes::ErrorCode;
pub use event::SpyEvent;
pub use phase::{GameState, Outcome, Phase, PhaseChange, PunishmentRule};
pub use protocol::{
    Assignment, ClientEvent, Player, PlayerId, Role, Room, RoomId, RoomStatus, ServerEvent,
    VoteTarget,
};
pub use session::{FileSessionStore, MemorySessionStore, SessionRecord, SessionStore};
pub use transport::{Connector, Transport};

#[cfg(feature = "transport-websocket")]
pub use transports::{WebSocketConnector, WebSocketTransport};
