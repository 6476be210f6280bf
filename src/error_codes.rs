//! Classification of room-operation failures reported by the server.
//!
//! The server has no structured error codes: failures arrive as dedicated
//! events carrying a free-form message. [`ErrorCode`] names each of those
//! events so a front-end can surface them uniformly.

use std::fmt;

/// Failure kinds the server reports through the event channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// `create-room` used an id that is already taken (`room-exists`).
    RoomExists,
    /// A `rejoin-room` was refused (`rejoin-failed`).
    RejoinFailed,
    /// The host removed the local player (`kicked-from-room`).
    KickedFromRoom,
    /// The chosen word list cannot be used (`special-wordlist-error`).
    SpecialWordList,
    /// Reconnection attempts were exhausted (client-side).
    ReconnectExhausted,
}

impl ErrorCode {
    /// Returns a human-readable description of this error code.
    ///
    /// Used as the alert text when the server sent no message of its own.
    pub fn description(&self) -> &'static str {
        match self {
            Self::RoomExists => "A room with this id already exists. Choose another id or join it.",
            Self::RejoinFailed => {
                "Could not return to the previous room. It may have closed or the name is taken."
            }
            Self::KickedFromRoom => "You were removed from the room by the host.",
            Self::SpecialWordList => "The selected word list cannot be used for this game.",
            Self::ReconnectExhausted => "Lost connection to the game server.",
        }
    }

    /// Wire name of the event that carries this failure, if any.
    pub fn event_name(&self) -> Option<&'static str> {
        match self {
            Self::RoomExists => Some("room-exists"),
            Self::RejoinFailed => Some("rejoin-failed"),
            Self::KickedFromRoom => Some("kicked-from-room"),
            Self::SpecialWordList => Some("special-wordlist-error"),
            Self::ReconnectExhausted => None,
        }
    }

    /// Whether the failure drops the local room membership.
    pub fn ends_membership(&self) -> bool {
        matches!(
            self,
            Self::RejoinFailed | Self::KickedFromRoom | Self::ReconnectExhausted
        )
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::RoomExists => "ROOM_EXISTS",
            Self::RejoinFailed => "REJOIN_FAILED",
            Self::KickedFromRoom => "KICKED_FROM_ROOM",
            Self::SpecialWordList => "SPECIAL_WORDLIST_ERROR",
            Self::ReconnectExhausted => "RECONNECT_EXHAUSTED",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [ErrorCode; 5] = [
        ErrorCode::RoomExists,
        ErrorCode::RejoinFailed,
        ErrorCode::KickedFromRoom,
        ErrorCode::SpecialWordList,
        ErrorCode::ReconnectExhausted,
    ];

    #[test]
    fn every_code_has_a_description() {
        for code in ALL {
            assert!(!code.description().is_empty(), "{code} has no description");
        }
    }

    #[test]
    fn only_membership_losses_end_membership() {
        assert!(!ErrorCode::RoomExists.ends_membership());
        assert!(!ErrorCode::SpecialWordList.ends_membership());
        assert!(ErrorCode::KickedFromRoom.ends_membership());
    }

    #[test]
    fn display_is_screaming_snake_case() {
        assert_eq!(ErrorCode::RoomExists.to_string(), "ROOM_EXISTS");
        assert_eq!(ErrorCode::ReconnectExhausted.event_name(), None);
    }
}
