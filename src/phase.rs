//! Client-local mirror of the room/game phase.
//!
//! [`GameState`] is a plain synchronous state machine: feed it inbound
//! [`ServerEvent`]s with [`GameState::apply`] and local intents with the
//! `request_*` methods. It never decides outcomes on its own; every
//! transition is a reaction to something the server asserted or the local
//! user did.
//!
//! ```
//! use who_is_spy_client::phase::{GameState, Phase};
//! use who_is_spy_client::protocol::{Assignment, Role, ServerEvent};
//!
//! let mut state = GameState::new();
//! assert_eq!(state.phase(), Phase::Lobby);
//!
//! state.apply(&ServerEvent::DealWords(Assignment {
//!     word: "apple".into(),
//!     role: Role::Civilian,
//! }));
//! assert_eq!(state.phase(), Phase::Playing);
//! ```

use std::collections::BTreeSet;
use std::fmt;

use tracing::debug;

use crate::protocol::{
    Assignment, PlayerId, RejoinSnapshot, Role, Room, RoomId, RoomStatus, RoundSummary,
    ServerEvent, VoteTarget,
};

/// The client's current view within a room's lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Phase {
    /// Room selection and pre-game gathering.
    #[default]
    Lobby,
    /// Words dealt; discussion in progress.
    Playing,
    /// Choosing whom to eliminate.
    Voting,
    /// The local player has been voted out.
    Eliminated,
    /// The game ended.
    Finished,
    /// Left a running game; waiting for it to finish.
    Waiting,
    /// Answering the punishment quiz.
    Punishment,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Lobby => "lobby",
            Self::Playing => "playing",
            Self::Voting => "voting",
            Self::Eliminated => "eliminated",
            Self::Finished => "finished",
            Self::Waiting => "waiting",
            Self::Punishment => "punishment",
        };
        f.write_str(name)
    }
}

/// A phase transition produced by an event or intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseChange {
    pub from: Phase,
    pub to: Phase,
}

/// Which side won the last game, as asserted by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    CiviliansWin,
    SpyWins,
}

impl Outcome {
    /// The role on the losing side.
    pub fn losing_role(self) -> Role {
        match self {
            Self::CiviliansWin => Role::Spy,
            Self::SpyWins => Role::Civilian,
        }
    }
}

/// Whether game ends route losers through the punishment quiz.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PunishmentRule {
    /// Game end always shows the finished screen.
    #[default]
    Disabled,
    /// Players whose role lost enter the punishment phase.
    LosersPunished,
}

impl PunishmentRule {
    fn applies_to(self, outcome: Outcome, assignment: Option<&Assignment>) -> bool {
        match self {
            Self::Disabled => false,
            Self::LosersPunished => {
                assignment.is_some_and(|a| a.role == outcome.losing_role())
            }
        }
    }
}

/// Local mirror of one room: phase, snapshot and per-game secrets.
#[derive(Debug, Clone, Default)]
pub struct GameState {
    phase: Phase,
    rule: PunishmentRule,
    room: Room,
    room_id: Option<RoomId>,
    local_id: Option<PlayerId>,
    local_name: Option<String>,
    assignment: Option<Assignment>,
    visible: bool,
    summary: Option<RoundSummary>,
    outcome: Option<Outcome>,
    eliminated_id: Option<PlayerId>,
    locally_eliminated: bool,
    punished: BTreeSet<PlayerId>,
    last_vote: Option<VoteTarget>,
}

impl GameState {
    /// A fresh state in [`Phase::Lobby`] with an empty room.
    pub fn new() -> Self {
        Self::default()
    }

    /// A fresh state using the given punishment rule.
    pub fn with_rule(rule: PunishmentRule) -> Self {
        Self {
            rule,
            ..Self::default()
        }
    }

    // ── Accessors ───────────────────────────────────────────────────

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn room(&self) -> &Room {
        &self.room
    }

    /// Room id used for outbound events: the last id the user chose, or the snapshot's.
    pub fn room_id(&self) -> Option<&str> {
        self.room_id.as_deref().or_else(|| {
            (!self.room.id.is_empty()).then_some(self.room.id.as_str())
        })
    }

    pub fn local_id(&self) -> Option<&str> {
        self.local_id.as_deref()
    }

    pub fn local_name(&self) -> Option<&str> {
        self.local_name.as_deref()
    }

    pub fn assignment(&self) -> Option<&Assignment> {
        self.assignment.as_ref()
    }

    /// Whether roles are shown to everyone.
    pub fn roles_visible(&self) -> bool {
        self.visible
    }

    pub fn summary(&self) -> Option<&RoundSummary> {
        self.summary.as_ref()
    }

    pub fn outcome(&self) -> Option<Outcome> {
        self.outcome
    }

    /// Player reported by `spy-eliminated`, if any.
    pub fn eliminated_id(&self) -> Option<&str> {
        self.eliminated_id.as_deref()
    }

    /// Players currently answering the punishment quiz.
    pub fn punished_players(&self) -> &BTreeSet<PlayerId> {
        &self.punished
    }

    /// Target of the last vote submitted in the current voting round.
    pub fn last_vote(&self) -> Option<&VoteTarget> {
        self.last_vote.as_ref()
    }

    /// Returns `true` if the local player hosts the cached room.
    pub fn is_host(&self) -> bool {
        self.local_id
            .as_deref()
            .is_some_and(|id| self.room.is_host(id))
    }

    /// Whether the local player is still in the game.
    ///
    /// An unknown local player counts as alive.
    pub fn is_local_alive(&self) -> bool {
        if self.locally_eliminated {
            return false;
        }
        let me = match (&self.local_id, &self.local_name) {
            (Some(id), _) if self.room.player(id).is_some() => self.room.player(id),
            (_, Some(name)) => self.room.player_named(name),
            _ => None,
        };
        me.is_none_or(|p| p.alive)
    }

    // ── Identity ────────────────────────────────────────────────────

    /// Records the connection-scoped id of the local player.
    pub fn set_local_id(&mut self, id: impl Into<PlayerId>) {
        self.local_id = Some(id.into());
    }

    /// Records the room and display name the user chose.
    pub fn set_identity(&mut self, room_id: impl Into<RoomId>, name: impl Into<String>) {
        self.room_id = Some(room_id.into());
        self.local_name = Some(name.into());
    }

    /// Records a submitted vote. Repeated submissions are not blocked.
    pub fn record_vote(&mut self, target: VoteTarget) {
        self.last_vote = Some(target);
    }

    // ── Inbound events ──────────────────────────────────────────────

    /// Applies an inbound server event, returning the phase change if any.
    pub fn apply(&mut self, event: &ServerEvent) -> Option<PhaseChange> {
        let next = match event {
            ServerEvent::Welcome { id } => {
                self.local_id = Some(id.clone());
                None
            }
            ServerEvent::RoomUpdated(room) => {
                self.room = room.clone();
                if !room.id.is_empty() {
                    self.room_id = Some(room.id.clone());
                }
                match room.status {
                    RoomStatus::Waiting => {
                        self.clear_round();
                        Some(Phase::Lobby)
                    }
                    RoomStatus::Playing => None,
                }
            }
            ServerEvent::DealWords(assignment) => {
                self.clear_round();
                self.assignment = Some(assignment.clone());
                Some(Phase::Playing)
            }
            ServerEvent::VisibilityUpdated { visible } => {
                self.visible = *visible;
                None
            }
            ServerEvent::VoteTie => {
                self.last_vote = None;
                Some(Phase::Voting)
            }
            ServerEvent::StartNextVote => {
                self.last_vote = None;
                if self.is_local_alive() {
                    Some(Phase::Voting)
                } else {
                    Some(Phase::Eliminated)
                }
            }
            ServerEvent::RoundSummary { summary } => {
                self.summary = Some(summary.clone());
                self.locally_eliminated = true;
                Some(Phase::Eliminated)
            }
            ServerEvent::SpyEliminated { eliminated_id } => {
                self.eliminated_id = eliminated_id.clone();
                Some(self.finish(Outcome::CiviliansWin))
            }
            ServerEvent::SpyWin => Some(self.finish(Outcome::SpyWins)),
            ServerEvent::EnterPunishment => Some(Phase::Punishment),
            ServerEvent::PlayersInPunishment { player_ids } => {
                self.punished = player_ids.iter().cloned().collect();
                None
            }
            ServerEvent::KickedFromRoom { .. } | ServerEvent::RejoinFailed { .. } => {
                self.clear_room();
                Some(Phase::Lobby)
            }
            ServerEvent::GameReset => {
                self.clear_round();
                self.assignment = None;
                Some(Phase::Lobby)
            }
            ServerEvent::RejoinSuccess(snapshot) => Some(self.restore(snapshot)),
            ServerEvent::RoomExists { .. } => {
                self.drop_unconfirmed_room();
                None
            }
            ServerEvent::SpecialWordlistError { .. } => None,
        };
        self.transition(next, event.name())
    }

    // ── Local intents ───────────────────────────────────────────────

    /// The local player moves from discussion to voting.
    pub fn request_start_voting(&mut self) -> Option<PhaseChange> {
        if self.phase != Phase::Playing {
            return None;
        }
        self.transition(Some(Phase::Voting), "start-voting")
    }

    /// Host reset: back to the lobby, keeping the room.
    pub fn request_reset(&mut self) -> Option<PhaseChange> {
        self.clear_round();
        self.assignment = None;
        self.transition(Some(Phase::Lobby), "reset")
    }

    /// Punishment quiz answered: back to the lobby.
    pub fn request_complete_punishment(&mut self) -> Option<PhaseChange> {
        if self.phase != Phase::Punishment {
            return None;
        }
        if let Some(id) = &self.local_id {
            self.punished.remove(id);
        }
        self.transition(Some(Phase::Lobby), "punishment-completed")
    }

    /// Leaves the room. A running game parks the client in [`Phase::Waiting`].
    pub fn request_leave(&mut self) -> Option<PhaseChange> {
        if self.room.status == RoomStatus::Playing {
            return self.transition(Some(Phase::Waiting), "leave");
        }
        self.clear_room();
        self.transition(Some(Phase::Lobby), "leave")
    }

    // ── Internals ───────────────────────────────────────────────────

    fn transition(&mut self, next: Option<Phase>, cause: &str) -> Option<PhaseChange> {
        let to = next?;
        let from = self.phase;
        if from == to {
            return None;
        }
        self.phase = to;
        debug!(%from, %to, cause, "phase transition");
        Some(PhaseChange { from, to })
    }

    fn finish(&mut self, outcome: Outcome) -> Phase {
        self.outcome = Some(outcome);
        if self.rule.applies_to(outcome, self.assignment.as_ref()) {
            Phase::Punishment
        } else {
            Phase::Finished
        }
    }

    fn restore(&mut self, snapshot: &RejoinSnapshot) -> Phase {
        self.room = snapshot.room.clone();
        if !snapshot.room.id.is_empty() {
            self.room_id = Some(snapshot.room.id.clone());
        }
        if let Some(id) = &snapshot.player_id {
            self.local_id = Some(id.clone());
        }
        if let Some(visible) = snapshot.visible {
            self.visible = visible;
        }
        self.clear_round();
        if let Some(assignment) = snapshot.assignment() {
            self.assignment = Some(assignment);
        }

        if !snapshot.game_started {
            Phase::Lobby
        } else if !self.is_local_alive() {
            Phase::Eliminated
        } else if snapshot.voting_started {
            Phase::Voting
        } else {
            Phase::Playing
        }
    }

    /// Forgets everything scoped to one game round.
    fn clear_round(&mut self) {
        self.summary = None;
        self.outcome = None;
        self.eliminated_id = None;
        self.locally_eliminated = false;
        self.last_vote = None;
    }

    /// Forgets a chosen room id that no snapshot has confirmed yet.
    fn drop_unconfirmed_room(&mut self) {
        if self
            .room_id
            .as_deref()
            .is_some_and(|id| id != self.room.id)
        {
            debug!(room_id = ?self.room_id, "room was never joined, forgetting it");
            self.room_id = None;
        }
    }

    fn clear_room(&mut self) {
        self.room = Room::default();
        self.room_id = None;
        self.assignment = None;
        self.visible = false;
        self.punished.clear();
        self.clear_round();
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
    use crate::protocol::{Player, SummaryEntry};

    fn player(id: &str, name: &str, alive: bool) -> Player {
        Player {
            id: id.into(),
            name: name.into(),
            alive,
            in_punishment: None,
        }
    }

    fn room(status: RoomStatus, players: Vec<Player>) -> Room {
        Room {
            id: "R1".into(),
            host: players.first().map(|p| p.id.clone()),
            list_name: "default".into(),
            status,
            players,
        }
    }

    fn deal(role: Role) -> ServerEvent {
        ServerEvent::DealWords(Assignment {
            word: "apple".into(),
            role,
        })
    }

    fn playing_state(role: Role) -> GameState {
        let mut s = GameState::new();
        s.apply(&ServerEvent::Welcome { id: "a".into() });
        s.apply(&ServerEvent::RoomUpdated(room(
            RoomStatus::Playing,
            vec![player("a", "Alice", true), player("b", "Bob", true)],
        )));
        s.apply(&deal(role));
        s
    }

    #[test]
    fn initial_phase_is_lobby() {
        assert_eq!(GameState::new().phase(), Phase::Lobby);
    }

    #[test]
    fn room_updated_waiting_returns_to_lobby_and_replaces_snapshot() {
        let mut s = playing_state(Role::Civilian);
        assert_eq!(s.phase(), Phase::Playing);

        let change = s.apply(&ServerEvent::RoomUpdated(room(
            RoomStatus::Waiting,
            vec![player("c", "Carol", true)],
        )));
        assert_eq!(
            change,
            Some(PhaseChange {
                from: Phase::Playing,
                to: Phase::Lobby
            })
        );
        assert_eq!(s.room().players.len(), 1);
        assert_eq!(s.room().players[0].name, "Carol");
    }

    #[test]
    fn room_updated_playing_keeps_phase() {
        let mut s = playing_state(Role::Civilian);
        let change = s.apply(&ServerEvent::RoomUpdated(room(
            RoomStatus::Playing,
            vec![player("a", "Alice", true)],
        )));
        assert!(change.is_none());
        assert_eq!(s.phase(), Phase::Playing);
    }

    #[test]
    fn start_voting_only_from_playing() {
        let mut s = GameState::new();
        assert!(s.request_start_voting().is_none());

        let mut s = playing_state(Role::Spy);
        assert_eq!(
            s.request_start_voting().map(|c| c.to),
            Some(Phase::Voting)
        );
    }

    #[test]
    fn vote_tie_revotes() {
        let mut s = playing_state(Role::Civilian);
        s.request_start_voting();
        s.record_vote(VoteTarget::Player("b".into()));
        s.apply(&ServerEvent::VoteTie);
        assert_eq!(s.phase(), Phase::Voting);
        assert!(s.last_vote().is_none());
    }

    #[test]
    fn start_next_vote_depends_on_local_alive_flag() {
        let mut s = playing_state(Role::Civilian);
        s.apply(&ServerEvent::StartNextVote);
        assert_eq!(s.phase(), Phase::Voting);

        s.apply(&ServerEvent::RoomUpdated(room(
            RoomStatus::Playing,
            vec![player("a", "Alice", false), player("b", "Bob", true)],
        )));
        s.apply(&ServerEvent::StartNextVote);
        assert_eq!(s.phase(), Phase::Eliminated);
    }

    #[test]
    fn alive_check_falls_back_to_name() {
        let mut s = GameState::new();
        s.set_identity("R1", "Alice");
        s.apply(&ServerEvent::RoomUpdated(room(
            RoomStatus::Playing,
            vec![player("zz", "Alice", false)],
        )));
        assert!(!s.is_local_alive());
    }

    #[test]
    fn late_start_next_vote_after_round_summary_stays_eliminated() {
        let mut s = playing_state(Role::Civilian);
        s.request_start_voting();

        let mut summary = RoundSummary::new();
        summary.insert(
            "a".into(),
            SummaryEntry {
                word: "apple".into(),
                role: Role::Civilian,
            },
        );
        s.apply(&ServerEvent::RoundSummary { summary });
        assert_eq!(s.phase(), Phase::Eliminated);
        assert!(s.summary().is_some());

        // Snapshot still says alive: the late event must not resurrect us.
        assert!(s.apply(&ServerEvent::StartNextVote).is_none());
        assert_eq!(s.phase(), Phase::Eliminated);

        // A new deal clears the elimination.
        s.apply(&deal(Role::Civilian));
        assert_eq!(s.phase(), Phase::Playing);
        assert!(s.summary().is_none());
    }

    #[test]
    fn game_end_finishes_without_punishment_rule() {
        let mut s = playing_state(Role::Spy);
        s.apply(&ServerEvent::SpyEliminated {
            eliminated_id: Some("a".into()),
        });
        assert_eq!(s.phase(), Phase::Finished);
        assert_eq!(s.outcome(), Some(Outcome::CiviliansWin));
        assert_eq!(s.eliminated_id(), Some("a"));
    }

    #[test]
    fn losers_enter_punishment_when_rule_enabled() {
        let mut s = GameState::with_rule(PunishmentRule::LosersPunished);
        s.apply(&deal(Role::Civilian));
        s.apply(&ServerEvent::SpyWin);
        assert_eq!(s.phase(), Phase::Punishment);

        let mut s = GameState::with_rule(PunishmentRule::LosersPunished);
        s.apply(&deal(Role::Civilian));
        s.apply(&ServerEvent::SpyEliminated {
            eliminated_id: None,
        });
        assert_eq!(s.phase(), Phase::Finished);
    }

    #[test]
    fn punishment_completion_returns_to_lobby() {
        let mut s = playing_state(Role::Spy);
        s.apply(&ServerEvent::PlayersInPunishment {
            player_ids: vec!["a".into(), "b".into()],
        });
        assert!(s.request_complete_punishment().is_none());

        s.apply(&ServerEvent::EnterPunishment);
        assert_eq!(s.phase(), Phase::Punishment);
        s.request_complete_punishment();
        assert_eq!(s.phase(), Phase::Lobby);
        assert_eq!(s.punished_players().len(), 1);
        assert!(s.punished_players().contains("b"));
    }

    #[test]
    fn kicked_clears_room() {
        let mut s = playing_state(Role::Civilian);
        s.apply(&ServerEvent::KickedFromRoom { message: None });
        assert_eq!(s.phase(), Phase::Lobby);
        assert!(s.room().host.is_none());
        assert!(s.room().players.is_empty());
        assert!(s.assignment().is_none());
        assert!(s.room_id().is_none());
    }

    #[test]
    fn leave_during_game_waits_then_lobby_on_waiting_snapshot() {
        let mut s = playing_state(Role::Civilian);
        s.request_leave();
        assert_eq!(s.phase(), Phase::Waiting);

        s.apply(&ServerEvent::RoomUpdated(room(
            RoomStatus::Playing,
            vec![player("b", "Bob", true)],
        )));
        assert_eq!(s.phase(), Phase::Waiting);

        s.apply(&ServerEvent::RoomUpdated(room(
            RoomStatus::Waiting,
            vec![player("b", "Bob", true)],
        )));
        assert_eq!(s.phase(), Phase::Lobby);
    }

    #[test]
    fn leave_in_lobby_clears_room() {
        let mut s = GameState::new();
        s.apply(&ServerEvent::RoomUpdated(room(
            RoomStatus::Waiting,
            vec![player("a", "Alice", true)],
        )));
        assert!(s.request_leave().is_none());
        assert!(s.room().players.is_empty());
    }

    #[test]
    fn rejoin_reconstructs_phase() {
        let snap = |game_started, voting_started, alive| {
            ServerEvent::RejoinSuccess(RejoinSnapshot {
                room: room(
                    RoomStatus::Playing,
                    vec![player("a", "Alice", alive), player("b", "Bob", true)],
                ),
                game_started,
                voting_started,
                player_id: Some("a".into()),
                word: Some("pear".into()),
                role: Some(Role::Civilian),
                visible: Some(true),
            })
        };

        let mut s = GameState::new();
        s.apply(&snap(true, true, true));
        assert_eq!(s.phase(), Phase::Voting);
        assert_eq!(s.assignment().map(|a| a.word.as_str()), Some("pear"));
        assert!(s.roles_visible());
        assert_eq!(s.local_id(), Some("a"));

        let mut s = GameState::new();
        s.apply(&snap(true, false, true));
        assert_eq!(s.phase(), Phase::Playing);

        let mut s = GameState::new();
        s.apply(&snap(true, true, false));
        assert_eq!(s.phase(), Phase::Eliminated);

        let mut s = GameState::new();
        s.apply(&snap(false, false, true));
        assert_eq!(s.phase(), Phase::Lobby);
    }

    #[test]
    fn finished_returns_to_lobby_on_reset() {
        let mut s = playing_state(Role::Civilian);
        s.apply(&ServerEvent::SpyWin);
        assert_eq!(s.phase(), Phase::Finished);
        s.apply(&ServerEvent::GameReset);
        assert_eq!(s.phase(), Phase::Lobby);
        assert!(s.outcome().is_none());

        let mut s = playing_state(Role::Civilian);
        s.apply(&ServerEvent::SpyWin);
        s.request_reset();
        assert_eq!(s.phase(), Phase::Lobby);
        assert_eq!(s.room().players.len(), 2);
    }

    #[test]
    fn errors_do_not_change_phase() {
        let mut s = playing_state(Role::Civilian);
        assert!(s
            .apply(&ServerEvent::SpecialWordlistError {
                message: Some("bad list".into())
            })
            .is_none());
        assert!(s
            .apply(&ServerEvent::RoomExists { message: None })
            .is_none());
        assert_eq!(s.phase(), Phase::Playing);
    }

    #[test]
    fn room_exists_forgets_a_room_that_was_never_joined() {
        let mut s = GameState::new();
        s.set_identity("R9", "Alice");
        assert_eq!(s.room_id(), Some("R9"));

        s.apply(&ServerEvent::RoomExists { message: None });
        assert_eq!(s.room_id(), None);
        assert_eq!(s.phase(), Phase::Lobby);

        let mut s = playing_state(Role::Civilian);
        s.set_identity("R1", "Alice");
        s.apply(&ServerEvent::RoomExists { message: None });
        assert_eq!(s.room_id(), Some("R1"));
    }

    #[test]
    fn host_detection_uses_local_id() {
        let s = playing_state(Role::Civilian);
        assert!(s.is_host());
        assert_eq!(s.room_id(), Some("R1"));
    }
}
