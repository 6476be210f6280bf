//! Integration tests for `SpyClient`.
//!
//! Scripted connections come from `MockConnector`; tests that need to
//! interleave local intents with server events drive a `LiveConnector`.

mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use who_is_spy_client::{
    ClientEvent, ErrorCode, MemorySessionStore, Phase, PunishmentRule, ReconnectPolicy, Role,
    RoomStatus, SessionRecord, SessionStore, SpyClient, SpyConfig, SpyError, SpyEvent, VoteTarget,
};

use common::{
    bare, deal_words, frame, hang_up, round_summary, room_updated, three_players, welcome,
    LiveConnector, MockConnector, MockHandles, ServerSide,
};

// ════════════════════════════════════════════════════════════════════
// Helpers
// ════════════════════════════════════════════════════════════════════

type Events = tokio::sync::mpsc::Receiver<SpyEvent>;

fn fast_config() -> SpyConfig {
    SpyConfig::default().with_reconnect(
        ReconnectPolicy::default()
            .with_max_attempts(2)
            .with_delay(Duration::from_millis(5)),
    )
}

async fn next_event(events: &mut Events) -> SpyEvent {
    tokio::time::timeout(Duration::from_secs(2), events.recv())
        .await
        .expect("timed out waiting for an event")
        .expect("event channel closed")
}

/// Skip events until one matches.
async fn wait_for(events: &mut Events, pred: impl Fn(&SpyEvent) -> bool) -> SpyEvent {
    loop {
        let event = next_event(events).await;
        if pred(&event) {
            return event;
        }
    }
}

/// Skip events until the phase changes to `to`; returns the previous phase.
async fn wait_phase(events: &mut Events, to: Phase) -> Phase {
    match wait_for(events, |e| matches!(e, SpyEvent::PhaseChanged { to: t, .. } if *t == to)).await
    {
        SpyEvent::PhaseChanged { from, .. } => from,
        other => panic!("expected PhaseChanged, got {other:?}"),
    }
}

/// Start a client on a live connection and wait for `Connected`.
async fn start_live(config: SpyConfig) -> (SpyClient, Events, ServerSide, MockHandles) {
    let (connector, server, handles) = LiveConnector::new();
    let (client, mut events) = SpyClient::start(connector, config);
    assert_eq!(next_event(&mut events).await, SpyEvent::Connected);
    (client, events, server, handles)
}

/// A live client that joined `R1` as Alice (`a`) and has been dealt a word.
async fn start_playing(
    config: SpyConfig,
    role: &str,
) -> (SpyClient, Events, ServerSide, MockHandles) {
    let (client, mut events, server, handles) = start_live(config).await;
    client.join_room("R1", "Alice").await.unwrap();
    server.push(welcome("a"));
    server.push(room_updated("playing", three_players()));
    server.push(deal_words("apple", role));
    wait_phase(&mut events, Phase::Playing).await;
    (client, events, server, handles)
}

// ════════════════════════════════════════════════════════════════════
// Room lifecycle
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn host_creates_room_and_starts_game() {
    let (mut client, mut events, server, handles) = start_live(fast_config()).await;

    client.create_room("R1", "Alice").await.unwrap();
    server.push(welcome("a"));
    server.push(room_updated(
        "waiting",
        json!([{"id": "a", "name": "Alice", "alive": true}]),
    ));
    let ev = wait_for(&mut events, |e| matches!(e, SpyEvent::RoomUpdated { .. })).await;
    let SpyEvent::RoomUpdated { room } = ev else {
        unreachable!()
    };
    assert_eq!(room.status, RoomStatus::Waiting);
    assert_eq!(client.phase().await, Phase::Lobby);
    assert!(client.snapshot().await.is_host());

    client.start_game(1).await.unwrap();
    server.push(room_updated("playing", three_players()));
    server.push(deal_words("apple", "civilian"));

    assert_eq!(wait_phase(&mut events, Phase::Playing).await, Phase::Lobby);
    let assignment = client.assignment().await.unwrap();
    assert_eq!(assignment.word, "apple");
    assert_eq!(assignment.role, Role::Civilian);

    assert_eq!(
        handles.sent_events(),
        vec![
            ClientEvent::CreateRoom {
                room_id: "R1".into(),
                name: "Alice".into()
            },
            ClientEvent::StartGame {
                room_id: "R1".into(),
                spy_count: 1
            },
        ]
    );

    client.shutdown().await;
}

#[tokio::test]
async fn room_snapshots_replace_the_cached_player_list() {
    let (connector, _handles) = MockConnector::single(vec![
        welcome("a"),
        room_updated("waiting", three_players()),
        room_updated("waiting", json!([{"id": "b", "name": "Bob"}])),
    ]);
    let (mut client, mut events) = SpyClient::start(connector, fast_config());

    let mut snapshots = 0;
    while snapshots < 2 {
        if matches!(next_event(&mut events).await, SpyEvent::RoomUpdated { .. }) {
            snapshots += 1;
        }
    }

    let room = client.room().await;
    assert_eq!(room.players.len(), 1);
    assert_eq!(room.players[0].name, "Bob");
    assert!(room.players[0].alive, "alive defaults to true");

    client.shutdown().await;
}

#[tokio::test]
async fn room_exists_is_reported_with_its_error_code() {
    let (mut client, mut events, server, _handles) = start_live(fast_config()).await;

    client.create_room("R1", "Alice").await.unwrap();
    server.push(frame(json!({
        "event": "room-exists",
        "data": {"message": "Room R1 already exists"}
    })));

    let ev = wait_for(&mut events, |e| matches!(e, SpyEvent::RoomExists { .. })).await;
    let (code, text) = ev.error().unwrap();
    assert_eq!(code, ErrorCode::RoomExists);
    assert_eq!(text, "Room R1 already exists");
    assert!(!code.ends_membership());
    assert_eq!(client.phase().await, Phase::Lobby);

    client.shutdown().await;
}

#[tokio::test]
async fn refused_create_leaves_no_identity_behind() {
    let (mut client, mut events, server, handles) = start_live(fast_config()).await;

    client.create_room("R1", "Alice").await.unwrap();
    assert_eq!(
        client.session().unwrap(),
        Some(SessionRecord::new("Alice", "R1", true))
    );
    server.push(welcome("a"));
    server.push(frame(json!({
        "event": "room-exists",
        "data": {"message": "Room R1 already exists"}
    })));
    wait_for(&mut events, |e| matches!(e, SpyEvent::RoomExists { .. })).await;

    assert!(client.session().unwrap().is_none());
    assert!(client.current_room_id().await.is_none());
    assert!(matches!(client.start_game(1).await, Err(SpyError::NotInRoom)));
    assert!(!handles
        .sent_events()
        .iter()
        .any(|e| matches!(e, ClientEvent::StartGame { .. })));

    client.shutdown().await;
}

#[tokio::test]
async fn kicked_player_returns_to_empty_lobby_and_forgets_session() {
    let (mut client, mut events, server, _handles) =
        start_playing(fast_config(), "civilian").await;
    assert!(client.session().unwrap().is_some());

    server.push(frame(json!({
        "event": "kicked-from-room",
        "data": {"message": "bye"}
    })));

    assert_eq!(wait_phase(&mut events, Phase::Lobby).await, Phase::Playing);
    let room = client.room().await;
    assert!(room.host.is_none());
    assert!(room.players.is_empty());
    assert!(client.current_room_id().await.is_none());
    assert!(client.session().unwrap().is_none());

    client.shutdown().await;
}

#[tokio::test]
async fn host_flag_in_session_follows_snapshots() {
    let (mut client, mut events, server, _handles) = start_live(fast_config()).await;

    client.join_room("R1", "Alice").await.unwrap();
    assert!(!client.session().unwrap().unwrap().is_host);

    // The previous host left; the server hands the room to `a`.
    server.push(welcome("a"));
    server.push(room_updated("waiting", three_players()));
    wait_for(&mut events, |e| matches!(e, SpyEvent::RoomUpdated { .. })).await;

    assert!(client.session().unwrap().unwrap().is_host);

    client.shutdown().await;
}

// ════════════════════════════════════════════════════════════════════
// Voting
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn vote_tie_keeps_voting_and_allows_a_second_vote() {
    let (mut client, mut events, server, handles) =
        start_playing(fast_config(), "civilian").await;

    client.start_voting().await.unwrap();
    assert_eq!(wait_phase(&mut events, Phase::Voting).await, Phase::Playing);

    client
        .submit_vote(VoteTarget::Player("b".into()))
        .await
        .unwrap();
    server.push(bare("vote-tie"));
    wait_for(&mut events, |e| matches!(e, SpyEvent::VoteTie)).await;
    assert_eq!(client.phase().await, Phase::Voting);
    assert!(client.snapshot().await.last_vote().is_none());

    client.submit_vote(VoteTarget::Abstain).await.unwrap();
    client.submit_vote(VoteTarget::Abstain).await.unwrap();

    let votes: Vec<_> = handles
        .sent_json()
        .into_iter()
        .filter(|v| v["event"] == "submit-vote")
        .collect();
    assert_eq!(votes.len(), 3, "repeat votes are not blocked locally");
    assert_eq!(
        votes[0]["data"],
        json!({"roomId": "R1", "fromId": "a", "toId": "b"})
    );
    assert_eq!(votes[2]["data"]["toId"], "abstain");

    client.shutdown().await;
}

#[tokio::test]
async fn start_next_vote_depends_on_local_alive_flag() {
    let (mut client, mut events, server, _handles) =
        start_playing(fast_config(), "civilian").await;

    client.start_voting().await.unwrap();
    wait_phase(&mut events, Phase::Voting).await;

    // Bob is out, Alice survives.
    server.push(room_updated(
        "playing",
        json!([
            {"id": "a", "name": "Alice", "alive": true},
            {"id": "b", "name": "Bob", "alive": false}
        ]),
    ));
    server.push(bare("start-next-vote"));
    wait_for(&mut events, |e| matches!(e, SpyEvent::NextVoteStarted)).await;
    assert_eq!(client.phase().await, Phase::Voting);

    // Now Alice is out.
    server.push(room_updated(
        "playing",
        json!([
            {"id": "a", "name": "Alice", "alive": false},
            {"id": "c", "name": "Carol", "alive": true}
        ]),
    ));
    server.push(bare("start-next-vote"));
    assert_eq!(wait_phase(&mut events, Phase::Eliminated).await, Phase::Voting);

    client.shutdown().await;
}

#[tokio::test]
async fn elimination_sticks_when_start_next_vote_arrives_late() {
    let (connector, _handles) = MockConnector::single(vec![
        welcome("a"),
        room_updated("playing", three_players()),
        deal_words("apple", "civilian"),
        round_summary(),
        bare("start-next-vote"),
    ]);
    let (mut client, mut events) = SpyClient::start(connector, fast_config());

    assert_eq!(wait_phase(&mut events, Phase::Eliminated).await, Phase::Playing);
    wait_for(&mut events, |e| matches!(e, SpyEvent::NextVoteStarted)).await;

    let state = client.snapshot().await;
    assert_eq!(state.phase(), Phase::Eliminated);
    assert_eq!(state.summary().unwrap().len(), 2);

    client.shutdown().await;
}

// ════════════════════════════════════════════════════════════════════
// Game end and punishment
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn spy_eliminated_finishes_and_reset_returns_to_lobby() {
    let (mut client, mut events, server, handles) =
        start_playing(fast_config(), "civilian").await;

    server.push(frame(json!({
        "event": "spy-eliminated",
        "data": {"eliminatedId": "b"}
    })));
    assert_eq!(wait_phase(&mut events, Phase::Finished).await, Phase::Playing);
    assert_eq!(client.snapshot().await.eliminated_id(), Some("b"));

    client.reset_game().await.unwrap();
    assert_eq!(wait_phase(&mut events, Phase::Lobby).await, Phase::Finished);
    assert!(client.assignment().await.is_none());
    assert!(handles.sent_events().contains(&ClientEvent::ResetGame {
        room_id: "R1".into()
    }));

    client.shutdown().await;
}

#[tokio::test]
async fn losing_side_enters_punishment_when_enabled() {
    let config = fast_config().with_punishment_rule(PunishmentRule::LosersPunished);
    let (mut client, mut events, server, handles) = start_playing(config, "spy").await;

    server.push(frame(json!({
        "event": "spy-eliminated",
        "data": {"eliminatedId": "a"}
    })));
    assert_eq!(wait_phase(&mut events, Phase::Punishment).await, Phase::Playing);

    server.push(frame(json!({
        "event": "players-in-punishment",
        "data": {"playerIds": ["a"]}
    })));
    wait_for(&mut events, |e| matches!(e, SpyEvent::PlayersInPunishment { .. })).await;
    assert!(client.snapshot().await.punished_players().contains("a"));

    client.punishment_completed().await.unwrap();
    assert_eq!(wait_phase(&mut events, Phase::Lobby).await, Phase::Punishment);
    assert!(client.snapshot().await.punished_players().is_empty());
    assert!(handles
        .sent_events()
        .contains(&ClientEvent::PunishmentCompleted {
            room_id: "R1".into()
        }));

    client.shutdown().await;
}

#[tokio::test]
async fn winning_side_is_not_punished() {
    let config = fast_config().with_punishment_rule(PunishmentRule::LosersPunished);
    let (mut client, mut events, server, _handles) = start_playing(config, "spy").await;

    server.push(bare("spy-win"));
    assert_eq!(wait_phase(&mut events, Phase::Finished).await, Phase::Playing);

    client.shutdown().await;
}

#[tokio::test]
async fn game_reset_from_server_returns_to_lobby() {
    let (mut client, mut events, server, _handles) =
        start_playing(fast_config(), "civilian").await;

    server.push(bare("game-reset"));
    assert_eq!(wait_phase(&mut events, Phase::Lobby).await, Phase::Playing);
    assert_eq!(client.current_room_id().await.as_deref(), Some("R1"));

    client.shutdown().await;
}

// ════════════════════════════════════════════════════════════════════
// Leaving and waiting
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn leaving_a_running_game_waits_until_the_room_is_idle() {
    let (mut client, mut events, server, handles) =
        start_playing(fast_config(), "civilian").await;

    client.leave_room().await.unwrap();
    assert_eq!(wait_phase(&mut events, Phase::Waiting).await, Phase::Playing);
    assert!(client.session().unwrap().is_none());

    client.check_room_status().await.unwrap();
    server.push(room_updated("waiting", three_players()));
    assert_eq!(wait_phase(&mut events, Phase::Lobby).await, Phase::Waiting);

    let sent = handles.sent_events();
    assert!(sent.contains(&ClientEvent::LeaveRoom {
        room_id: "R1".into()
    }));
    assert!(sent.contains(&ClientEvent::CheckRoomStatus {
        room_id: "R1".into()
    }));

    client.shutdown().await;
}

// ════════════════════════════════════════════════════════════════════
// Reconnection and rejoin
// ════════════════════════════════════════════════════════════════════

fn seeded(record: SessionRecord) -> (Arc<MemorySessionStore>, SpyConfig) {
    let store = Arc::new(MemorySessionStore::with_record(record));
    let config = fast_config().with_session_store(store.clone());
    (store, config)
}

#[tokio::test]
async fn rejoin_into_voting_round_restores_state() {
    let (_store, config) = seeded(SessionRecord::new("Alice", "R1", false));
    let (connector, handles) = MockConnector::single(vec![frame(json!({
        "event": "rejoin-success",
        "data": {
            "room": {
                "id": "R1",
                "host": "b",
                "status": "playing",
                "players": [
                    {"id": "a2", "name": "Alice", "alive": true},
                    {"id": "b", "name": "Bob", "alive": true}
                ]
            },
            "gameStarted": true,
            "votingStarted": true,
            "playerId": "a2",
            "word": "apple",
            "role": "civilian"
        }
    }))]);
    let (mut client, mut events) = SpyClient::start(connector, config);

    assert_eq!(next_event(&mut events).await, SpyEvent::Connected);
    assert_eq!(
        next_event(&mut events).await,
        SpyEvent::RejoinRequested {
            room_id: "R1".into(),
            player_name: "Alice".into()
        }
    );
    assert!(matches!(
        next_event(&mut events).await,
        SpyEvent::Rejoined { .. }
    ));
    assert_eq!(wait_phase(&mut events, Phase::Voting).await, Phase::Lobby);

    assert_eq!(client.local_player_id().await.as_deref(), Some("a2"));
    assert_eq!(client.assignment().await.unwrap().word, "apple");
    assert_eq!(
        handles.sent_events(),
        vec![ClientEvent::RejoinRoom {
            player_name: "Alice".into(),
            room_id: "R1".into(),
            was_host: false
        }]
    );

    client.shutdown().await;
}

#[tokio::test]
async fn rejoin_as_dead_player_is_eliminated() {
    let (_store, config) = seeded(SessionRecord::new("Alice", "R1", false));
    let (connector, _handles) = MockConnector::single(vec![frame(json!({
        "event": "rejoin-success",
        "data": {
            "room": {
                "id": "R1",
                "status": "playing",
                "players": [{"id": "a2", "name": "Alice", "alive": false}]
            },
            "gameStarted": true,
            "votingStarted": true,
            "playerId": "a2"
        }
    }))]);
    let (mut client, mut events) = SpyClient::start(connector, config);

    assert_eq!(wait_phase(&mut events, Phase::Eliminated).await, Phase::Lobby);

    client.shutdown().await;
}

#[tokio::test]
async fn rejoin_failed_clears_session_and_room() {
    let (store, config) = seeded(SessionRecord::new("Alice", "R1", true));
    let (connector, _handles) = MockConnector::single(vec![frame(json!({
        "event": "rejoin-failed",
        "data": {"message": "Room no longer exists"}
    }))]);
    let (mut client, mut events) = SpyClient::start(connector, config);

    let ev = wait_for(&mut events, |e| matches!(e, SpyEvent::RejoinFailed { .. })).await;
    let (code, _) = ev.error().unwrap();
    assert!(code.ends_membership());
    assert!(store.load().unwrap().is_none());
    assert!(client.current_room_id().await.is_none());
    assert_eq!(client.phase().await, Phase::Lobby);

    client.shutdown().await;
}

#[tokio::test]
async fn lost_connection_reconnects_and_rejoins_with_stored_identity() {
    let (_store, config) = seeded(SessionRecord::new("Alice", "R1", true));
    let (connector, handles) = MockConnector::new(vec![vec![hang_up()], vec![]]);
    let (mut client, mut events) = SpyClient::start(connector, config);

    wait_for(&mut events, |e| matches!(e, SpyEvent::ConnectionLost { .. })).await;
    assert_eq!(
        next_event(&mut events).await,
        SpyEvent::Reconnecting { attempt: 1 }
    );
    assert_eq!(next_event(&mut events).await, SpyEvent::Connected);
    assert!(matches!(
        next_event(&mut events).await,
        SpyEvent::RejoinRequested { .. }
    ));

    let rejoins = handles
        .sent_events()
        .into_iter()
        .filter(|e| {
            matches!(
                e,
                ClientEvent::RejoinRoom { was_host: true, room_id, .. } if room_id == "R1"
            )
        })
        .count();
    assert_eq!(rejoins, 2, "one rejoin per connection");
    assert!(client.is_connected());

    client.shutdown().await;
}

#[tokio::test]
async fn reconnection_stops_after_configured_attempts() {
    let (connector, handles) = MockConnector::single(vec![hang_up()]);
    let config = fast_config().with_reconnect(
        ReconnectPolicy::default()
            .with_max_attempts(3)
            .with_delay(Duration::from_millis(1)),
    );
    let (mut client, mut events) = SpyClient::start(connector, config);

    let mut seen = Vec::new();
    while let Some(ev) = events.recv().await {
        seen.push(ev);
    }

    let reconnecting = seen
        .iter()
        .filter(|e| matches!(e, SpyEvent::Reconnecting { .. }))
        .count();
    assert_eq!(reconnecting, 3);
    let failed = seen
        .iter()
        .find(|e| matches!(e, SpyEvent::ReconnectFailed { .. }))
        .unwrap();
    assert_eq!(failed, &SpyEvent::ReconnectFailed { attempts: 3 });
    assert_eq!(
        failed.error().map(|(code, _)| code),
        Some(ErrorCode::ReconnectExhausted)
    );
    assert!(matches!(seen.last(), Some(SpyEvent::Disconnected { .. })));
    assert_eq!(handles.attempts(), 4);
    assert!(!client.is_connected());

    client.shutdown().await;
}

#[tokio::test]
async fn unreachable_server_gets_immediate_attempt_plus_retries() {
    let (connector, handles) = MockConnector::new(vec![]);
    let (mut client, mut events) = SpyClient::start(connector, fast_config());

    let first = next_event(&mut events).await;
    assert_eq!(first, SpyEvent::Reconnecting { attempt: 1 });
    // The immediate attempt counts too.
    let failed = wait_for(&mut events, |e| matches!(e, SpyEvent::ReconnectFailed { .. })).await;
    assert_eq!(failed, SpyEvent::ReconnectFailed { attempts: 3 });
    let last = next_event(&mut events).await;
    assert_eq!(
        last,
        SpyEvent::Disconnected {
            reason: Some("reconnection attempts exhausted".into())
        }
    );
    assert_eq!(handles.attempts(), 3);

    client.shutdown().await;
}

// ════════════════════════════════════════════════════════════════════
// Robustness
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn malformed_frames_are_skipped() {
    let (connector, _handles) = MockConnector::single(vec![
        Some(Ok("not json".into())),
        frame(json!({"event": "no-such-event"})),
        welcome("a"),
    ]);
    let (mut client, mut events) = SpyClient::start(connector, fast_config());

    assert_eq!(next_event(&mut events).await, SpyEvent::Connected);
    assert_eq!(
        next_event(&mut events).await,
        SpyEvent::Welcome {
            player_id: "a".into()
        }
    );

    client.shutdown().await;
}

#[tokio::test]
async fn intents_fail_while_disconnected() {
    let (connector, _handles) = MockConnector::new(vec![]);
    let config = fast_config().with_reconnect(
        ReconnectPolicy::disabled().with_delay(Duration::from_millis(1)),
    );
    let (mut client, mut events) = SpyClient::start(connector, config);
    wait_for(&mut events, |e| matches!(e, SpyEvent::Disconnected { .. })).await;

    assert!(matches!(
        client.create_room("R1", "Alice").await,
        Err(SpyError::NotConnected)
    ));
    assert!(client.session().unwrap().is_none());
    // Leaving still works locally.
    client.leave_room().await.unwrap();

    client.shutdown().await;
}

#[tokio::test]
async fn disconnected_is_delivered_with_tiny_event_channel() {
    let (connector, _handles) = MockConnector::single(vec![
        welcome("a"),
        room_updated("waiting", three_players()),
        bare("vote-tie"),
        hang_up(),
    ]);
    let config = SpyConfig::default()
        .with_reconnect(ReconnectPolicy::disabled())
        .with_event_channel_capacity(1);
    let (mut client, mut events) = SpyClient::start(connector, config);

    // Let the loop overrun the channel before draining it.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut last = None;
    while let Some(ev) = events.recv().await {
        last = Some(ev);
    }
    assert!(matches!(last, Some(SpyEvent::Disconnected { .. })));

    client.shutdown().await;
}

#[tokio::test]
async fn dropping_the_client_ends_the_event_stream() {
    let (connector, _handles) = MockConnector::single(vec![]);
    let (client, mut events) = SpyClient::start(connector, fast_config());
    assert_eq!(next_event(&mut events).await, SpyEvent::Connected);

    drop(client);

    let drained = tokio::time::timeout(Duration::from_secs(2), async {
        while events.recv().await.is_some() {}
    })
    .await;
    assert!(drained.is_ok(), "event stream should end after drop");
}
