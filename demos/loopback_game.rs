//! # Loopback Game
//!
//! Plays one full round against an in-process referee, no server needed:
//!
//! 1. A [`Connector`] hands out channel-backed transports
//! 2. The referee answers each intent with the frames a real server sends
//! 3. The local player is dealt the spy word, gets caught and is punished
//! 4. Completing the punishment returns everyone to the lobby
//!
//! ## Running
//!
//! ```sh
//! cargo run --example loopback_game
//! RUST_LOG=debug cargo run --example loopback_game
//! ```

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use who_is_spy_client::{
    Connector, Phase, PunishmentRule, RoomStatus, SpyClient, SpyConfig, SpyError, SpyEvent,
    Transport, VoteTarget,
};

const ROOM: &str = "LOOP";
const LOCAL_ID: &str = "p-local";

// ── In-process transport ────────────────────────────────────────────

struct LoopbackTransport {
    to_referee: mpsc::UnboundedSender<String>,
    from_referee: mpsc::UnboundedReceiver<String>,
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn send(&mut self, message: String) -> Result<(), SpyError> {
        self.to_referee
            .send(message)
            .map_err(|_| SpyError::TransportSend("referee gone".into()))
    }

    async fn recv(&mut self) -> Option<Result<String, SpyError>> {
        self.from_referee.recv().await.map(Ok)
    }

    async fn close(&mut self) -> Result<(), SpyError> {
        self.from_referee.close();
        Ok(())
    }
}

struct LoopbackConnector;

#[async_trait]
impl Connector for LoopbackConnector {
    type Transport = LoopbackTransport;

    async fn connect(&mut self) -> Result<LoopbackTransport, SpyError> {
        let (to_referee, inbox) = mpsc::unbounded_channel();
        let (outbox, from_referee) = mpsc::unbounded_channel();
        tokio::spawn(referee(inbox, outbox));
        Ok(LoopbackTransport {
            to_referee,
            from_referee,
        })
    }
}

// ── Referee ─────────────────────────────────────────────────────────

fn room(status: &str) -> Value {
    json!({
        "event": "room-updated",
        "data": {
            "id": ROOM,
            "host": LOCAL_ID,
            "status": status,
            "players": [
                {"id": LOCAL_ID, "name": "You", "alive": true},
                {"id": "bot-1", "name": "Ada", "alive": true},
                {"id": "bot-2", "name": "Linus", "alive": true}
            ]
        }
    })
}

async fn referee(
    mut inbox: mpsc::UnboundedReceiver<String>,
    outbox: mpsc::UnboundedSender<String>,
) {
    let push = |frame: Value| outbox.send(frame.to_string()).is_ok();
    if !push(json!({"event": "welcome", "data": {"id": LOCAL_ID}})) {
        return;
    }

    while let Some(raw) = inbox.recv().await {
        let Ok(frame) = serde_json::from_str::<Value>(&raw) else {
            continue;
        };
        tracing::debug!("referee <- {frame}");
        let replies = match frame.get("event").and_then(Value::as_str) {
            Some("create-room" | "punishment-completed") => vec![room("waiting")],
            Some("start-game") => vec![
                room("playing"),
                json!({"event": "deal-words", "data": {"word": "pear", "role": "spy"}}),
            ],
            // Both bots see through the spy.
            Some("submit-vote") => vec![
                json!({"event": "spy-eliminated", "data": {"eliminatedId": LOCAL_ID}}),
                json!({"event": "players-in-punishment", "data": {"playerIds": [LOCAL_ID]}}),
            ],
            _ => Vec::new(),
        };
        if !replies.into_iter().all(push) {
            return;
        }
    }
}

// ── Driver ──────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = SpyConfig::default().with_punishment_rule(PunishmentRule::LosersPunished);
    let (mut client, mut events) = SpyClient::start(LoopbackConnector, config);
    let mut round_played = false;

    while let Some(event) = events.recv().await {
        match event {
            SpyEvent::Connected => client.create_room(ROOM, "You").await?,
            SpyEvent::RoomUpdated { room } if !round_played => {
                if room.status == RoomStatus::Waiting {
                    round_played = true;
                    client.start_game(1).await?;
                }
            }
            SpyEvent::WordsDealt { assignment } => {
                tracing::info!("Dealt '{}' as {}", assignment.word, assignment.role);
            }
            SpyEvent::SpyEliminated { eliminated_id } => {
                tracing::info!("Caught: {}", eliminated_id.as_deref().unwrap_or("?"));
            }
            SpyEvent::PhaseChanged { from, to } => {
                tracing::info!("Phase {from} -> {to}");
                match to {
                    Phase::Lobby => break,
                    Phase::Playing => client.start_voting().await?,
                    Phase::Voting => {
                        client
                            .submit_vote(VoteTarget::Player("bot-1".into()))
                            .await?;
                    }
                    Phase::Punishment => client.punishment_completed().await?,
                    _ => {}
                }
            }
            SpyEvent::Disconnected { reason } => {
                tracing::warn!("Disconnected: {}", reason.as_deref().unwrap_or("unknown"));
                break;
            }
            other => tracing::debug!("Event: {other:?}"),
        }
    }

    client.shutdown().await;
    Ok(())
}
