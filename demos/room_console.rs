//! # Room Console
//!
//! A line-oriented Who Is Spy player:
//!
//! 1. Connect to the game server over WebSocket (reconnecting on loss)
//! 2. Create or join a room; the session file lets a restart rejoin it
//! 3. Type commands to play; events are printed as they arrive
//! 4. Answer the punishment quiz when the losing side is punished
//!
//! ## Running
//!
//! ```sh
//! # Start the game server on localhost:3001, then:
//! cargo run --example room_console -- join R1 Alice
//! cargo run --example room_console -- create R1 Alice
//!
//! # Point at another server:
//! WHO_IS_SPY_API_BASE=http://my-server:3001 cargo run --example room_console -- join R1 Bob
//! ```
//!
//! Commands: `start <spies>`, `ready`, `vote <id>|abstain`, `toggle`,
//! `list <name>`, `lists`, `kick <id>`, `reset`, `status`, `answer <n>`,
//! `leave`, `quit`.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use who_is_spy_client::api::{ApiConfig, Question, QuizClient, QuizDraw, WordListClient};
use who_is_spy_client::{
    FileSessionStore, Phase, PunishmentRule, SpyClient, SpyConfig, SpyEvent, VoteTarget,
    WebSocketConnector,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // ── Logging ─────────────────────────────────────────────────────
    // Set `RUST_LOG=debug` to see phase transitions and retries.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // ── Configuration ───────────────────────────────────────────────
    let mut args = std::env::args().skip(1);
    let mode = args.next().unwrap_or_else(|| "join".into());
    let room_id = args.next().unwrap_or_else(|| "R1".into());
    let name = args.next().unwrap_or_else(|| "RustPlayer".into());

    let api = ApiConfig::from_env();
    let connector = WebSocketConnector::from_http_origin(&api.base_url)?;
    let words = WordListClient::new(&api)?;
    let quiz = QuizClient::new(&api)?;
    tracing::info!("Connecting to {}", connector.url());

    let session_path = std::env::temp_dir().join("who-is-spy-session.json");
    let config = SpyConfig::default()
        .with_punishment_rule(PunishmentRule::LosersPunished)
        .with_session_store(Arc::new(FileSessionStore::new(session_path)));

    let (mut client, mut events) = SpyClient::start(connector, config);
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut question: Option<Question> = None;

    // ── Event loop ──────────────────────────────────────────────────
    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else {
                    tracing::info!("Event channel closed, exiting");
                    break;
                };

                if let Some((code, text)) = event.error() {
                    tracing::error!("[{code}] {text}");
                    if code.ends_membership() {
                        tracing::info!("Back in the lobby; use create/join again");
                    }
                    continue;
                }

                match event {
                    SpyEvent::Connected => {
                        if client.session()?.is_none() && client.current_room_id().await.is_none() {
                            if mode == "create" {
                                client.create_room(room_id.clone(), name.clone()).await?;
                            } else {
                                client.join_room(room_id.clone(), name.clone()).await?;
                            }
                        }
                    }
                    SpyEvent::RejoinRequested { room_id, player_name } => {
                        tracing::info!("Rejoining {room_id} as {player_name}");
                    }
                    SpyEvent::RoomUpdated { room } => {
                        let players: Vec<String> = room
                            .players
                            .iter()
                            .map(|p| {
                                let mark = if p.alive { "" } else { " (out)" };
                                format!("{}#{}{mark}", p.name, p.short_id())
                            })
                            .collect();
                        println!(
                            "room {} [{:?}] list={}: {}",
                            room.id,
                            room.status,
                            room.list_name,
                            players.join(", ")
                        );
                    }
                    SpyEvent::WordsDealt { assignment } => {
                        println!("Your word: {}", assignment.word);
                    }
                    SpyEvent::VisibilityUpdated { visible } => {
                        println!("Roles are now {}", if visible { "visible" } else { "hidden" });
                    }
                    SpyEvent::RoundSummary { summary } => {
                        for (player, entry) in summary {
                            println!("  {player}: {} ({})", entry.word, entry.role);
                        }
                    }
                    SpyEvent::VoteTie => println!("Tie! Vote again."),
                    SpyEvent::SpyWon => println!("The spy wins."),
                    SpyEvent::SpyEliminated { .. } => println!("The spy was caught."),
                    SpyEvent::PhaseChanged { from, to } => {
                        tracing::info!("Phase {from} -> {to}");
                        if to == Phase::Punishment {
                            let player = client.local_player_id().await.unwrap_or_default();
                            question = match quiz.question_for_punishment(&player).await {
                                Ok(QuizDraw::Question(q)) => {
                                    println!("Punishment: {}", q.question);
                                    for (letter, option) in q.lettered_options() {
                                        println!("  {letter}. {option}");
                                    }
                                    Some(q)
                                }
                                Ok(QuizDraw::AllCompleted { message }) => {
                                    println!("{}", message.unwrap_or_else(|| "No questions left".into()));
                                    client.punishment_completed().await?;
                                    None
                                }
                                Err(e) => {
                                    tracing::error!("Could not fetch a question: {e}");
                                    None
                                }
                            };
                        }
                    }
                    SpyEvent::Disconnected { reason } => {
                        tracing::warn!("Disconnected: {}", reason.as_deref().unwrap_or("unknown"));
                        break;
                    }
                    other => tracing::debug!("Event: {other:?}"),
                }
            }

            line = stdin.next_line() => {
                let Some(line) = line? else { break };
                let mut parts = line.split_whitespace();
                let result = match (parts.next(), parts.next()) {
                    (Some("start"), spies) => {
                        client.start_game(spies.and_then(|s| s.parse().ok()).unwrap_or(1)).await
                    }
                    (Some("ready"), _) => client.start_voting().await,
                    (Some("vote"), target) => {
                        let target = VoteTarget::from_selection(target.map(str::to_owned));
                        client.submit_vote(target).await
                    }
                    (Some("toggle"), _) => client.toggle_visibility().await,
                    (Some("list"), Some(list)) => client.change_list(list).await,
                    (Some("lists"), _) => {
                        match words.list().await {
                            Ok(names) => println!("word lists: {}", names.join(", ")),
                            Err(e) => tracing::error!("Could not load word lists: {e}"),
                        }
                        Ok(())
                    }
                    (Some("kick"), Some(id)) => client.kick_player(id).await,
                    (Some("reset"), _) => client.reset_game().await,
                    (Some("status"), _) => client.check_room_status().await,
                    (Some("answer"), Some(n)) => {
                        let id = question.as_ref().map(|q| q.id.clone());
                        if let (Some(id), Ok(n)) = (id, n.parse::<usize>()) {
                            let player = client.local_player_id().await;
                            match quiz.submit_answer(&id, n, player.as_deref()).await {
                                Ok(result) if result.is_correct => {
                                    println!("Correct!");
                                    question = None;
                                    client.punishment_completed().await?;
                                }
                                Ok(result) => println!(
                                    "Wrong, the answer was {}. {}",
                                    result.correct_letter().unwrap_or('?'),
                                    result.explanation.unwrap_or_default()
                                ),
                                Err(e) => tracing::error!("Could not submit the answer: {e}"),
                            }
                        }
                        Ok(())
                    }
                    (Some("leave"), _) => client.leave_room().await,
                    (Some("quit"), _) => break,
                    _ => {
                        println!("unknown command: {line}");
                        Ok(())
                    }
                };
                if let Err(e) = result {
                    tracing::warn!("Command failed: {e}");
                }
            }

            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Ctrl+C received, shutting down");
                break;
            }
        }
    }

    // ── Cleanup ─────────────────────────────────────────────────────
    client.shutdown().await;
    Ok(())
}
