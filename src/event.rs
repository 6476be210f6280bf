//! Events delivered to the consumer of a [`SpyClient`](crate::SpyClient).
//!
//! Server frames are converted one-to-one into [`SpyEvent`] variants. The
//! connection manager adds synthetic events for connection lifecycle and
//! phase transitions.

use crate::error_codes::ErrorCode;
use crate::phase::Phase;
use crate::protocol::{Assignment, PlayerId, RejoinSnapshot, Room, RoomId, RoundSummary, ServerEvent};

/// Everything a front-end needs to react to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpyEvent {
    // ── Synthetic: connection lifecycle ─────────────────────────────
    /// A connection was established (initially or after reconnecting).
    Connected,
    /// The live connection dropped; reconnection will be attempted.
    ConnectionLost { reason: Option<String> },
    /// A reconnection attempt is about to start (1-based).
    Reconnecting { attempt: u32 },
    /// A stored session was found and `rejoin-room` was sent.
    RejoinRequested { room_id: RoomId, player_name: String },
    /// Every reconnection attempt failed; the client stops. `attempts`
    /// counts the connect calls made since the connection was lost, or
    /// since start-up when the first connect failed.
    ReconnectFailed { attempts: u32 },
    /// The client stopped. Always the last event on the channel.
    Disconnected { reason: Option<String> },

    // ── Synthetic: state machine ────────────────────────────────────
    /// The local phase changed.
    PhaseChanged { from: Phase, to: Phase },

    // ── Server events ───────────────────────────────────────────────
    /// The server told us our connection-scoped id.
    Welcome { player_id: PlayerId },
    RoomUpdated { room: Room },
    WordsDealt { assignment: Assignment },
    VisibilityUpdated { visible: bool },
    VoteTie,
    SpyEliminated { eliminated_id: Option<PlayerId> },
    RoundSummary { summary: RoundSummary },
    NextVoteStarted,
    SpyWon,
    RoomExists { message: Option<String> },
    Kicked { message: Option<String> },
    Rejoined { snapshot: Box<RejoinSnapshot> },
    RejoinFailed { message: Option<String> },
    GameReset,
    PunishmentEntered,
    PlayersInPunishment { player_ids: Vec<PlayerId> },
    SpecialWordListError { message: Option<String> },
}

impl SpyEvent {
    /// For failure events, the classification and the text to show.
    ///
    /// Falls back to [`ErrorCode::description`] when the server sent no message.
    pub fn error(&self) -> Option<(ErrorCode, String)> {
        let (code, message) = match self {
            Self::RoomExists { message } => (ErrorCode::RoomExists, message.as_deref()),
            Self::RejoinFailed { message } => (ErrorCode::RejoinFailed, message.as_deref()),
            Self::Kicked { message } => (ErrorCode::KickedFromRoom, message.as_deref()),
            Self::SpecialWordListError { message } => {
                (ErrorCode::SpecialWordList, message.as_deref())
            }
            Self::ReconnectFailed { .. } => (ErrorCode::ReconnectExhausted, None),
            _ => return None,
        };
        let text = message.unwrap_or(code.description()).to_string();
        Some((code, text))
    }
}

impl From<ServerEvent> for SpyEvent {
    fn from(event: ServerEvent) -> Self {
        match event {
            ServerEvent::Welcome { id } => Self::Welcome { player_id: id },
            ServerEvent::RoomUpdated(room) => Self::RoomUpdated { room },
            ServerEvent::DealWords(assignment) => Self::WordsDealt { assignment },
            ServerEvent::VisibilityUpdated { visible } => Self::VisibilityUpdated { visible },
            ServerEvent::VoteTie => Self::VoteTie,
            ServerEvent::SpyEliminated { eliminated_id } => Self::SpyEliminated { eliminated_id },
            ServerEvent::RoundSummary { summary } => Self::RoundSummary { summary },
            ServerEvent::StartNextVote => Self::NextVoteStarted,
            ServerEvent::SpyWin => Self::SpyWon,
            ServerEvent::RoomExists { message } => Self::RoomExists { message },
            ServerEvent::KickedFromRoom { message } => Self::Kicked { message },
            ServerEvent::RejoinSuccess(snapshot) => Self::Rejoined {
                snapshot: Box::new(snapshot),
            },
            ServerEvent::RejoinFailed { message } => Self::RejoinFailed { message },
            ServerEvent::GameReset => Self::GameReset,
            ServerEvent::EnterPunishment => Self::PunishmentEntered,
            ServerEvent::PlayersInPunishment { player_ids } => {
                Self::PlayersInPunishment { player_ids }
            }
            ServerEvent::SpecialWordlistError { message } => Self::SpecialWordListError { message },
        }
    }
}
