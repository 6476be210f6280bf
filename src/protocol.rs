//! Wire-compatible protocol types for the Who Is Spy real-time channel.
//!
//! Every frame is a JSON text message of the form
//! `{"event": "<kebab-case-name>", "data": {...}}` with camelCase field names.
//! Events that carry no payload omit `data` entirely.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

// ── Type aliases ────────────────────────────────────────────────────

/// Connection-scoped player identifier assigned by the server.
pub type PlayerId = String;

/// User-chosen room identifier.
pub type RoomId = String;

/// Name of the word list a room uses when none was chosen.
pub const DEFAULT_LIST_NAME: &str = "default";

// ── Enums ───────────────────────────────────────────────────────────

/// Server-side room status.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum RoomStatus {
    /// Players are gathering; no game in progress.
    #[default]
    Waiting,
    /// A game is in progress.
    Playing,
}

/// Secret role dealt to a player at game start.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Civilian,
    Spy,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Civilian => f.write_str("civilian"),
            Self::Spy => f.write_str("spy"),
        }
    }
}

/// Target of a vote: a player id or the literal `"abstain"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VoteTarget {
    Player(PlayerId),
    Abstain,
}

const ABSTAIN: &str = "abstain";

impl VoteTarget {
    /// Builds a target from an optional selection; no selection means abstain.
    pub fn from_selection(selection: Option<PlayerId>) -> Self {
        match selection {
            Some(id) if !id.is_empty() && id != ABSTAIN => Self::Player(id),
            _ => Self::Abstain,
        }
    }

    /// Returns the voted player id, or `None` for an abstention.
    pub fn player_id(&self) -> Option<&str> {
        match self {
            Self::Player(id) => Some(id),
            Self::Abstain => None,
        }
    }
}

impl Serialize for VoteTarget {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Player(id) => serializer.serialize_str(id),
            Self::Abstain => serializer.serialize_str(ABSTAIN),
        }
    }
}

impl<'de> Deserialize<'de> for VoteTarget {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::from_selection(Some(raw)))
    }
}

// ── Structs ─────────────────────────────────────────────────────────

/// A player as listed in a room snapshot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Player {
    pub id: PlayerId,
    pub name: String,
    #[serde(default = "default_alive")]
    pub alive: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_punishment: Option<bool>,
}

fn default_alive() -> bool {
    true
}

impl Player {
    /// Short id suffix used to tell apart players with similar names.
    pub fn short_id(&self) -> &str {
        let start = self
            .id
            .char_indices()
            .rev()
            .nth(3)
            .map_or(0, |(idx, _)| idx);
        self.id.get(start..).unwrap_or(&self.id)
    }
}

/// Server-owned room snapshot. Replaced wholesale on every `room-updated`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    #[serde(default)]
    pub id: RoomId,
    #[serde(default)]
    pub host: Option<PlayerId>,
    #[serde(default = "default_list_name")]
    pub list_name: String,
    #[serde(default)]
    pub status: RoomStatus,
    #[serde(default)]
    pub players: Vec<Player>,
}

fn default_list_name() -> String {
    DEFAULT_LIST_NAME.to_string()
}

impl Default for Room {
    fn default() -> Self {
        Self {
            id: RoomId::new(),
            host: None,
            list_name: default_list_name(),
            status: RoomStatus::Waiting,
            players: Vec::new(),
        }
    }
}

impl Room {
    /// Finds a player by id.
    pub fn player(&self, id: &str) -> Option<&Player> {
        self.players.iter().find(|p| p.id == id)
    }

    /// Finds a player by display name.
    pub fn player_named(&self, name: &str) -> Option<&Player> {
        self.players.iter().find(|p| p.name == name)
    }

    /// Players that can still be voted for.
    pub fn alive_players(&self) -> impl Iterator<Item = &Player> {
        self.players.iter().filter(|p| p.alive)
    }

    /// Returns `true` if `player_id` is the room host.
    pub fn is_host(&self, player_id: &str) -> bool {
        self.host.as_deref() == Some(player_id)
    }
}

/// The local player's secret word and role for the current game.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Assignment {
    pub word: String,
    pub role: Role,
}

/// Per-player reveal entry of a round summary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SummaryEntry {
    pub word: String,
    pub role: Role,
}

/// Mapping of player id to revealed word and role.
pub type RoundSummary = BTreeMap<PlayerId, SummaryEntry>;

/// Payload of `rejoin-success`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RejoinSnapshot {
    pub room: Room,
    #[serde(default)]
    pub game_started: bool,
    #[serde(default)]
    pub voting_started: bool,
    /// Connection-scoped id of the rejoined player, if the server reports it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub player_id: Option<PlayerId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub word: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visible: Option<bool>,
}

impl RejoinSnapshot {
    /// The restored assignment, when the server re-sent word and role.
    pub fn assignment(&self) -> Option<Assignment> {
        match (&self.word, self.role) {
            (Some(word), Some(role)) => Some(Assignment {
                word: word.clone(),
                role,
            }),
            _ => None,
        }
    }
}

// ── Messages ────────────────────────────────────────────────────────

/// Events sent from client to server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum ClientEvent {
    /// Create a room and become its host.
    CreateRoom { room_id: RoomId, name: String },
    /// Join an existing room.
    JoinRoom { room_id: RoomId, name: String },
    /// Leave the room.
    LeaveRoom { room_id: RoomId },
    /// Switch the room's word list (host only).
    ChangeList { room_id: RoomId, list_name: String },
    /// Deal words and start a game (host only).
    StartGame { room_id: RoomId, spy_count: u8 },
    /// Show or hide roles on every client (host only).
    ToggleVisibility { room_id: RoomId, visible: bool },
    /// Cast a vote for the current round.
    SubmitVote {
        room_id: RoomId,
        from_id: PlayerId,
        to_id: VoteTarget,
    },
    /// Return everyone to the lobby (host only).
    ResetGame { room_id: RoomId },
    /// Remove a player from the room (host only).
    KickPlayer { room_id: RoomId, player_id: PlayerId },
    /// Restore a previous membership after reconnecting.
    RejoinRoom {
        player_name: String,
        room_id: RoomId,
        was_host: bool,
    },
    /// The local player answered the punishment quiz.
    PunishmentCompleted { room_id: RoomId },
    /// The local player moved on to voting.
    ReadyToVote { room_id: RoomId },
    /// Ask for a fresh room snapshot.
    CheckRoomStatus { room_id: RoomId },
}

impl ClientEvent {
    /// Wire name of this event.
    pub fn name(&self) -> &'static str {
        match self {
            Self::CreateRoom { .. } => "create-room",
            Self::JoinRoom { .. } => "join-room",
            Self::LeaveRoom { .. } => "leave-room",
            Self::ChangeList { .. } => "change-list",
            Self::StartGame { .. } => "start-game",
            Self::ToggleVisibility { .. } => "toggle-visibility",
            Self::SubmitVote { .. } => "submit-vote",
            Self::ResetGame { .. } => "reset-game",
            Self::KickPlayer { .. } => "kick-player",
            Self::RejoinRoom { .. } => "rejoin-room",
            Self::PunishmentCompleted { .. } => "punishment-completed",
            Self::ReadyToVote { .. } => "ready-to-vote",
            Self::CheckRoomStatus { .. } => "check-room-status",
        }
    }
}

/// Events sent from server to client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum ServerEvent {
    /// Connection handshake carrying the connection-scoped player id.
    Welcome { id: PlayerId },
    /// Full room snapshot.
    RoomUpdated(Room),
    /// The local player's word and role for a new game.
    DealWords(Assignment),
    /// Host toggled role visibility.
    VisibilityUpdated { visible: bool },
    /// Tie or abstention majority; vote again.
    VoteTie,
    /// The spy was voted out; civilians win.
    SpyEliminated {
        #[serde(default)]
        eliminated_id: Option<PlayerId>,
    },
    /// Reveal sent to the eliminated player.
    RoundSummary { summary: RoundSummary },
    /// A civilian was eliminated; next voting round.
    StartNextVote,
    /// The spy survived; spy wins.
    SpyWin,
    /// `create-room` failed because the id is taken.
    RoomExists {
        #[serde(default)]
        message: Option<String>,
    },
    /// The host removed the local player.
    KickedFromRoom {
        #[serde(default)]
        message: Option<String>,
    },
    /// A `rejoin-room` succeeded.
    RejoinSuccess(RejoinSnapshot),
    /// A `rejoin-room` failed (room gone, name taken).
    RejoinFailed {
        #[serde(default)]
        message: Option<String>,
    },
    /// Host reset the game.
    GameReset,
    /// The local player must answer the punishment quiz.
    EnterPunishment,
    /// Players currently answering the punishment quiz.
    PlayersInPunishment {
        #[serde(default)]
        player_ids: Vec<PlayerId>,
    },
    /// The selected word list cannot be used.
    SpecialWordlistError {
        #[serde(default)]
        message: Option<String>,
    },
}

impl ServerEvent {
    /// Wire name of this event.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Welcome { .. } => "welcome",
            Self::RoomUpdated(_) => "room-updated",
            Self::DealWords(_) => "deal-words",
            Self::VisibilityUpdated { .. } => "visibility-updated",
            Self::VoteTie => "vote-tie",
            Self::SpyEliminated { .. } => "spy-eliminated",
            Self::RoundSummary { .. } => "round-summary",
            Self::StartNextVote => "start-next-vote",
            Self::SpyWin => "spy-win",
            Self::RoomExists { .. } => "room-exists",
            Self::KickedFromRoom { .. } => "kicked-from-room",
            Self::RejoinSuccess(_) => "rejoin-success",
            Self::RejoinFailed { .. } => "rejoin-failed",
            Self::GameReset => "game-reset",
            Self::EnterPunishment => "enter-punishment",
            Self::PlayersInPunishment { .. } => "players-in-punishment",
            Self::SpecialWordlistError { .. } => "special-wordlist-error",
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;

    #[test]
    fn client_event_uses_event_and_camel_case_fields() {
        let ev = ClientEvent::ChangeList {
            room_id: "R1".into(),
            list_name: "animals".into(),
        };
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "event": "change-list",
                "data": { "roomId": "R1", "listName": "animals" }
            })
        );
        assert_eq!(ev.name(), "change-list");
    }

    #[test]
    fn vote_target_serializes_as_plain_string() {
        let ev = ClientEvent::SubmitVote {
            room_id: "R1".into(),
            from_id: "a".into(),
            to_id: VoteTarget::Abstain,
        };
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["data"]["toId"], "abstain");

        let target: VoteTarget = serde_json::from_str("\"p-42\"").unwrap();
        assert_eq!(target, VoteTarget::Player("p-42".into()));
    }

    #[test]
    fn empty_selection_means_abstain() {
        assert_eq!(VoteTarget::from_selection(None), VoteTarget::Abstain);
        assert_eq!(
            VoteTarget::from_selection(Some(String::new())),
            VoteTarget::Abstain
        );
        assert_eq!(VoteTarget::Abstain.player_id(), None);
    }

    #[test]
    fn dataless_server_events_parse_without_data() {
        let ev: ServerEvent = serde_json::from_str(r#"{"event":"vote-tie"}"#).unwrap();
        assert_eq!(ev, ServerEvent::VoteTie);
        let ev: ServerEvent = serde_json::from_str(r#"{"event":"start-next-vote"}"#).unwrap();
        assert_eq!(ev, ServerEvent::StartNextVote);
    }

    #[test]
    fn room_defaults_fill_missing_fields() {
        let ev: ServerEvent = serde_json::from_str(
            r#"{"event":"room-updated","data":{"host":"h1","players":[{"id":"h1","name":"Alice"}]}}"#,
        )
        .unwrap();
        let ServerEvent::RoomUpdated(room) = ev else {
            panic!("expected room-updated");
        };
        assert_eq!(room.list_name, DEFAULT_LIST_NAME);
        assert_eq!(room.status, RoomStatus::Waiting);
        assert!(room.players[0].alive);
        assert!(room.is_host("h1"));
    }

    #[test]
    fn short_id_takes_last_four_chars() {
        let p = Player {
            id: "abcdef123".into(),
            name: "n".into(),
            alive: true,
            in_punishment: None,
        };
        assert_eq!(p.short_id(), "f123");

        let p = Player {
            id: "ab".into(),
            ..p
        };
        assert_eq!(p.short_id(), "ab");
    }

    #[test]
    fn rejoin_snapshot_restores_assignment_only_when_complete() {
        let snap = RejoinSnapshot {
            room: Room::default(),
            game_started: true,
            voting_started: false,
            player_id: None,
            word: Some("apple".into()),
            role: None,
            visible: None,
        };
        assert!(snap.assignment().is_none());

        let snap = RejoinSnapshot {
            role: Some(Role::Spy),
            ..snap
        };
        assert_eq!(
            snap.assignment(),
            Some(Assignment {
                word: "apple".into(),
                role: Role::Spy
            })
        );
    }
}
