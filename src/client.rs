//! Async client and connection manager for the Who Is Spy event channel.
//!
//! [`SpyClient`] is a thin handle that talks to a background connection task
//! over an unbounded MPSC channel. The task connects through a
//! [`Connector`], reconnects with a fixed-delay capped policy, sends
//! `rejoin-room` whenever a stored session exists, and feeds every inbound
//! event through the [`GameState`] phase machine. Events are emitted on a
//! bounded channel returned from [`SpyClient::start`].
//!
//! # Example
//!
//! ```rust,ignore
//! let connector = WebSocketConnector::new("ws://localhost:3001/ws");
//! let (client, mut events) = SpyClient::start(connector, SpyConfig::default());
//!
//! while let Some(event) = events.recv().await {
//!     match event {
//!         SpyEvent::Connected => client.join_room("R1", "Alice").await?,
//!         SpyEvent::PhaseChanged { to: Phase::Playing, .. } => { /* show word */ }
//!         SpyEvent::Disconnected { .. } => break,
//!         _ => {}
//!     }
//! }
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, error, info, warn};

use crate::error::{Result, SpyError};
use crate::event::SpyEvent;
use crate::phase::{GameState, Phase, PhaseChange, PunishmentRule};
use crate::protocol::{
    Assignment, ClientEvent, PlayerId, Room, RoomId, ServerEvent, VoteTarget,
};
use crate::session::{MemorySessionStore, SessionRecord, SessionStore};
use crate::transport::{Connector, Transport};

/// Default capacity of the bounded event channel.
const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 256;

/// Default timeout for the graceful shutdown.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

/// Default number of reconnection attempts after a connection is lost.
const DEFAULT_RECONNECT_ATTEMPTS: u32 = 5;

/// Default fixed delay before each reconnection attempt.
const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Default bound on a single connection attempt.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

// ── Configuration ───────────────────────────────────────────────────

/// Fixed-delay, capped reconnection policy.
///
/// The delay never grows. With the defaults a lost connection is retried
/// five times, one second apart, each attempt bounded by ten seconds.
///
/// ```
/// use who_is_spy_client::client::ReconnectPolicy;
/// use std::time::Duration;
///
/// let policy = ReconnectPolicy::default()
///     .with_max_attempts(3)
///     .with_delay(Duration::from_millis(500));
/// assert_eq!(policy.max_attempts, 3);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Attempts after the first failure. Zero disables reconnection.
    pub max_attempts: u32,
    /// Pause before every attempt.
    pub delay: Duration,
    /// Bound on a single [`Connector::connect`] call.
    pub connect_timeout: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_RECONNECT_ATTEMPTS,
            delay: DEFAULT_RECONNECT_DELAY,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

impl ReconnectPolicy {
    /// A policy that gives up on the first failure.
    pub fn disabled() -> Self {
        Self {
            max_attempts: 0,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    #[must_use]
    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }
}

/// Configuration for a [`SpyClient`].
///
/// Every field has a default; the session store defaults to an in-memory
/// store, so sessions survive reconnects but not restarts.
///
/// # Example
///
/// ```
/// use who_is_spy_client::client::SpyConfig;
/// use who_is_spy_client::phase::PunishmentRule;
/// use std::time::Duration;
///
/// let config = SpyConfig::default()
///     .with_punishment_rule(PunishmentRule::LosersPunished)
///     .with_event_channel_capacity(512)
///     .with_shutdown_timeout(Duration::from_secs(5));
/// assert_eq!(config.event_channel_capacity, 512);
/// ```
#[derive(Debug, Clone)]
pub struct SpyConfig {
    /// Reconnection behavior.
    pub reconnect: ReconnectPolicy,
    /// Whether losing players are sent to the punishment quiz.
    pub punishment_rule: PunishmentRule,
    /// Where the reconnection identity is kept.
    pub session_store: Arc<dyn SessionStore>,
    /// Capacity of the bounded event channel.
    ///
    /// When the consumer cannot keep up, events are dropped (with a warning
    /// logged) to avoid blocking the connection task. The terminal
    /// `Disconnected` event is always delivered.
    ///
    /// Defaults to **256**. Values below 1 are clamped to 1.
    pub event_channel_capacity: usize,
    /// Timeout for the graceful shutdown.
    ///
    /// Defaults to **1 second**. A zero timeout aborts the connection task
    /// immediately.
    pub shutdown_timeout: Duration,
}

impl Default for SpyConfig {
    fn default() -> Self {
        Self {
            reconnect: ReconnectPolicy::default(),
            punishment_rule: PunishmentRule::default(),
            session_store: Arc::new(MemorySessionStore::new()),
            event_channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }
}

impl SpyConfig {
    #[must_use]
    pub fn with_reconnect(mut self, reconnect: ReconnectPolicy) -> Self {
        self.reconnect = reconnect;
        self
    }

    #[must_use]
    pub fn with_punishment_rule(mut self, rule: PunishmentRule) -> Self {
        self.punishment_rule = rule;
        self
    }

    #[must_use]
    pub fn with_session_store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.session_store = store;
        self
    }

    /// Set the capacity of the bounded event channel. Values below 1 are clamped to 1.
    #[must_use]
    pub fn with_event_channel_capacity(mut self, capacity: usize) -> Self {
        self.event_channel_capacity = capacity.max(1);
        self
    }

    #[must_use]
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

// ── Shared state ────────────────────────────────────────────────────

/// State shared between the client handle and the connection task.
struct ClientState {
    connected: AtomicBool,
    game: Mutex<GameState>,
    session: Arc<dyn SessionStore>,
}

impl ClientState {
    fn new(rule: PunishmentRule, session: Arc<dyn SessionStore>) -> Self {
        Self {
            connected: AtomicBool::new(false),
            game: Mutex::new(GameState::with_rule(rule)),
            session,
        }
    }

    /// Clears the stored session, logging instead of failing.
    fn forget_session(&self) {
        if let Err(e) = self.session.clear() {
            warn!("failed to clear session: {e}");
        }
    }

    fn remember_session(&self, record: &SessionRecord) {
        if let Err(e) = self.session.save(record) {
            warn!("failed to save session: {e}");
        }
    }
}

// ── Client handle ───────────────────────────────────────────────────

/// Async client handle for the Who Is Spy game server.
///
/// Created via [`SpyClient::start`], which spawns the background connection
/// task and returns this handle together with an event receiver.
///
/// Intent methods queue a [`ClientEvent`] and return once it is queued; the
/// server's reaction arrives later on the event channel. Methods that act on
/// the current room return [`SpyError::NotInRoom`] when no room is known.
pub struct SpyClient {
    /// Sender half of the command channel to the connection task.
    cmd_tx: mpsc::UnboundedSender<ClientEvent>,
    /// Weak handle on the event channel for locally caused phase changes.
    event_tx: mpsc::WeakSender<SpyEvent>,
    /// Shared state updated by the connection task.
    state: Arc<ClientState>,
    /// Handle to the background connection task.
    task: Option<tokio::task::JoinHandle<()>>,
    /// Oneshot sender to signal the connection task to shut down gracefully.
    shutdown_tx: Option<oneshot::Sender<()>>,
    /// Timeout for the graceful shutdown.
    shutdown_timeout: Duration,
}

impl SpyClient {
    /// Start the connection task and return a handle plus event receiver.
    ///
    /// The task connects immediately. The first event is `Connected` on
    /// success, or `Reconnecting` when the first attempt fails.
    #[must_use = "the event receiver must be used to receive events"]
    pub fn start<C: Connector>(
        connector: C,
        config: SpyConfig,
    ) -> (Self, mpsc::Receiver<SpyEvent>) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<ClientEvent>();
        // Clamp capacity to at least 1 (tokio panics on 0).
        let capacity = config.event_channel_capacity.max(1);
        let (event_tx, event_rx) = mpsc::channel::<SpyEvent>(capacity);
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let state = Arc::new(ClientState::new(
            config.punishment_rule,
            config.session_store,
        ));
        let weak_events = event_tx.downgrade();

        let task = tokio::spawn(connection_loop(
            connector,
            cmd_rx,
            event_tx,
            Arc::clone(&state),
            shutdown_rx,
            config.reconnect,
        ));

        let client = Self {
            cmd_tx,
            event_tx: weak_events,
            state,
            task: Some(task),
            shutdown_tx: Some(shutdown_tx),
            shutdown_timeout: config.shutdown_timeout,
        };

        (client, event_rx)
    }

    // ── Room membership ─────────────────────────────────────────────

    /// Create a room and become its host. The identity is remembered for rejoin.
    ///
    /// # Errors
    ///
    /// Returns [`SpyError::NotConnected`] if no connection is live.
    pub async fn create_room(
        &self,
        room_id: impl Into<RoomId>,
        name: impl Into<String>,
    ) -> Result<()> {
        self.enter_room(room_id.into(), name.into(), true).await
    }

    /// Join an existing room. The identity is remembered for rejoin.
    ///
    /// # Errors
    ///
    /// Returns [`SpyError::NotConnected`] if no connection is live.
    pub async fn join_room(&self, room_id: impl Into<RoomId>, name: impl Into<String>) -> Result<()> {
        self.enter_room(room_id.into(), name.into(), false).await
    }

    /// Leave the current room and forget the stored session.
    ///
    /// Works offline: the local transition always applies, and `leave-room`
    /// is only sent when a connection is live. Leaving a running game parks
    /// the client in [`Phase::Waiting`].
    ///
    /// # Errors
    ///
    /// Returns [`SpyError::NotConnected`] if the connection task has exited
    /// while a room was known.
    pub async fn leave_room(&self) -> Result<()> {
        let (room_id, change) = {
            let mut game = self.state.game.lock().await;
            let room_id = game.room_id().map(str::to_owned);
            (room_id, game.request_leave())
        };
        self.state.forget_session();

        if let Some(room_id) = room_id {
            if self.is_connected() {
                self.send(ClientEvent::LeaveRoom { room_id })?;
            } else {
                debug!(%room_id, "leave applied locally while disconnected");
            }
        }
        self.emit_phase_change(change);
        Ok(())
    }

    /// Ask the server for a fresh room snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`SpyError::NotInRoom`] or [`SpyError::NotConnected`].
    pub async fn check_room_status(&self) -> Result<()> {
        let room_id = self.require_room_id().await?;
        self.send(ClientEvent::CheckRoomStatus { room_id })
    }

    // ── Host controls ───────────────────────────────────────────────

    /// Switch the room to another word list.
    ///
    /// # Errors
    ///
    /// Returns [`SpyError::NotInRoom`] or [`SpyError::NotConnected`].
    pub async fn change_list(&self, list_name: impl Into<String>) -> Result<()> {
        let room_id = self.require_room_id().await?;
        self.send(ClientEvent::ChangeList {
            room_id,
            list_name: list_name.into(),
        })
    }

    /// Deal words and start a game with `spy_count` spies.
    ///
    /// # Errors
    ///
    /// Returns [`SpyError::NotInRoom`] or [`SpyError::NotConnected`].
    pub async fn start_game(&self, spy_count: u8) -> Result<()> {
        let room_id = self.require_room_id().await?;
        self.send(ClientEvent::StartGame { room_id, spy_count })
    }

    /// Flip role visibility for everyone in the room.
    ///
    /// # Errors
    ///
    /// Returns [`SpyError::NotInRoom`] or [`SpyError::NotConnected`].
    pub async fn toggle_visibility(&self) -> Result<()> {
        let (room_id, visible) = {
            let game = self.state.game.lock().await;
            let room_id = game.room_id().map(str::to_owned);
            (room_id, game.roles_visible())
        };
        let room_id = room_id.ok_or(SpyError::NotInRoom)?;
        self.send(ClientEvent::ToggleVisibility {
            room_id,
            visible: !visible,
        })
    }

    /// Remove a player from the room.
    ///
    /// # Errors
    ///
    /// Returns [`SpyError::NotInRoom`] or [`SpyError::NotConnected`].
    pub async fn kick_player(&self, player_id: impl Into<PlayerId>) -> Result<()> {
        let room_id = self.require_room_id().await?;
        self.send(ClientEvent::KickPlayer {
            room_id,
            player_id: player_id.into(),
        })
    }

    /// Return everyone to the lobby. The local phase becomes [`Phase::Lobby`] at once.
    ///
    /// # Errors
    ///
    /// Returns [`SpyError::NotInRoom`] or [`SpyError::NotConnected`].
    pub async fn reset_game(&self) -> Result<()> {
        let room_id = self.require_room_id().await?;
        self.send(ClientEvent::ResetGame { room_id })?;
        let change = self.state.game.lock().await.request_reset();
        self.emit_phase_change(change);
        Ok(())
    }

    // ── Round actions ───────────────────────────────────────────────

    /// Move from discussion to voting.
    ///
    /// # Errors
    ///
    /// Returns [`SpyError::NotInRoom`] or [`SpyError::NotConnected`].
    pub async fn start_voting(&self) -> Result<()> {
        let room_id = self.require_room_id().await?;
        self.send(ClientEvent::ReadyToVote { room_id })?;
        let change = self.state.game.lock().await.request_start_voting();
        self.emit_phase_change(change);
        Ok(())
    }

    /// Vote for a player or abstain.
    ///
    /// A second vote in the same round is sent as well; the server decides
    /// which one counts.
    ///
    /// # Errors
    ///
    /// Returns [`SpyError::NotInRoom`] when the room or the local player id is
    /// unknown, or [`SpyError::NotConnected`].
    pub async fn submit_vote(&self, target: VoteTarget) -> Result<()> {
        let (room_id, from_id) = {
            let game = self.state.game.lock().await;
            (
                game.room_id().map(str::to_owned),
                game.local_id().map(str::to_owned),
            )
        };
        let (Some(room_id), Some(from_id)) = (room_id, from_id) else {
            return Err(SpyError::NotInRoom);
        };
        self.send(ClientEvent::SubmitVote {
            room_id,
            from_id,
            to_id: target.clone(),
        })?;
        self.state.game.lock().await.record_vote(target);
        Ok(())
    }

    /// Report that the punishment quiz was answered; back to the lobby.
    ///
    /// # Errors
    ///
    /// Returns [`SpyError::NotInRoom`] or [`SpyError::NotConnected`].
    pub async fn punishment_completed(&self) -> Result<()> {
        let room_id = self.require_room_id().await?;
        self.send(ClientEvent::PunishmentCompleted { room_id })?;
        let change = self.state.game.lock().await.request_complete_punishment();
        self.emit_phase_change(change);
        Ok(())
    }

    /// Shut down the client, closing the transport and stopping the background task.
    ///
    /// After calling this method, the event receiver will yield `None` once the
    /// connection task exits.
    pub async fn shutdown(&mut self) {
        debug!("SpyClient: shutdown requested");

        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }

        // Await the task with a timeout; abort it if it does not exit in time.
        if let Some(mut task) = self.task.take() {
            match tokio::time::timeout(self.shutdown_timeout, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(join_err)) => {
                    warn!("connection task terminated with join error: {join_err}");
                }
                Err(_) => {
                    warn!("connection task did not exit within timeout; aborting task");
                    task.abort();
                    if let Err(join_err) = task.await {
                        debug!("connection task aborted: {join_err}");
                    }
                }
            }
        }

        self.state.connected.store(false, Ordering::Release);
    }

    // ── State accessors ─────────────────────────────────────────────

    /// Returns `true` while a connection is live.
    pub fn is_connected(&self) -> bool {
        self.state.connected.load(Ordering::Acquire)
    }

    pub async fn phase(&self) -> Phase {
        self.state.game.lock().await.phase()
    }

    /// The most recent room snapshot.
    pub async fn room(&self) -> Room {
        self.state.game.lock().await.room().clone()
    }

    pub async fn assignment(&self) -> Option<Assignment> {
        self.state.game.lock().await.assignment().cloned()
    }

    pub async fn current_room_id(&self) -> Option<RoomId> {
        self.state.game.lock().await.room_id().map(str::to_owned)
    }

    pub async fn local_player_id(&self) -> Option<PlayerId> {
        self.state.game.lock().await.local_id().map(str::to_owned)
    }

    /// A copy of the whole local game state.
    pub async fn snapshot(&self) -> GameState {
        self.state.game.lock().await.clone()
    }

    /// The stored reconnection identity.
    ///
    /// # Errors
    ///
    /// Propagates session store failures.
    pub fn session(&self) -> Result<Option<SessionRecord>> {
        self.state.session.load()
    }

    // ── Internal helpers ────────────────────────────────────────────

    async fn enter_room(&self, room_id: RoomId, name: String, is_host: bool) -> Result<()> {
        let event = if is_host {
            ClientEvent::CreateRoom {
                room_id: room_id.clone(),
                name: name.clone(),
            }
        } else {
            ClientEvent::JoinRoom {
                room_id: room_id.clone(),
                name: name.clone(),
            }
        };
        self.send(event)?;
        self.state
            .remember_session(&SessionRecord::new(name.clone(), room_id.clone(), is_host));
        self.state.game.lock().await.set_identity(room_id, name);
        Ok(())
    }

    async fn require_room_id(&self) -> Result<RoomId> {
        self.current_room_id().await.ok_or(SpyError::NotInRoom)
    }

    /// Queue a `ClientEvent` to the connection task.
    fn send(&self, event: ClientEvent) -> Result<()> {
        if !self.state.connected.load(Ordering::Acquire) {
            return Err(SpyError::NotConnected);
        }
        self.cmd_tx
            .send(event)
            .map_err(|_| SpyError::NotConnected)
    }

    fn emit_phase_change(&self, change: Option<PhaseChange>) {
        let Some(PhaseChange { from, to }) = change else {
            return;
        };
        if let Some(tx) = self.event_tx.upgrade() {
            if tx.try_send(SpyEvent::PhaseChanged { from, to }).is_err() {
                warn!(%from, %to, "event channel unavailable, dropping local phase change");
            }
        }
    }
}

impl std::fmt::Debug for SpyClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpyClient")
            .field("connected", &self.is_connected())
            .field("has_task", &self.task.is_some())
            .finish()
    }
}

impl Drop for SpyClient {
    fn drop(&mut self) {
        // `Drop` cannot await a graceful close; abort the task instead.
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

// ── Connection task ─────────────────────────────────────────────────

/// Why a single connection ended.
enum SessionEnd {
    /// Shutdown was requested or the handle was dropped.
    Stopped,
    /// The connection broke; reconnection may follow.
    Lost(Option<String>),
}

/// Background task: connect, run a session, reconnect per policy.
async fn connection_loop<C: Connector>(
    mut connector: C,
    mut cmd_rx: mpsc::UnboundedReceiver<ClientEvent>,
    event_tx: mpsc::Sender<SpyEvent>,
    state: Arc<ClientState>,
    mut shutdown_rx: oneshot::Receiver<()>,
    policy: ReconnectPolicy,
) {
    debug!("connection loop started");
    let mut reconnecting = false;

    loop {
        let transport = tokio::select! {
            _ = &mut shutdown_rx => {
                debug!("shutdown signal received while connecting");
                emit_disconnected(&event_tx, &state, Some("client shut down".into())).await;
                break;
            }
            transport = establish(&mut connector, &policy, &event_tx, reconnecting) => transport,
        };

        let transport = match transport {
            Ok(transport) => transport,
            Err(attempts) => {
                error!(attempts, "giving up on reconnection");
                emit_event(&event_tx, SpyEvent::ReconnectFailed { attempts }).await;
                emit_disconnected(
                    &event_tx,
                    &state,
                    Some("reconnection attempts exhausted".into()),
                )
                .await;
                break;
            }
        };

        match run_session(transport, &mut cmd_rx, &event_tx, &state, &mut shutdown_rx).await {
            SessionEnd::Stopped => {
                emit_disconnected(&event_tx, &state, Some("client shut down".into())).await;
                break;
            }
            SessionEnd::Lost(reason) => {
                state.connected.store(false, Ordering::Release);
                discard_queued_commands(&mut cmd_rx);
                if policy.max_attempts == 0 {
                    emit_disconnected(&event_tx, &state, reason).await;
                    break;
                }
                warn!(reason = reason.as_deref().unwrap_or("closed"), "connection lost");
                emit_event(&event_tx, SpyEvent::ConnectionLost { reason }).await;
                reconnecting = true;
            }
        }
    }

    debug!("connection loop exited");
}

/// Try to obtain a transport: one immediate attempt on first connect, then
/// up to `max_attempts` delayed attempts. On failure returns how many
/// attempts were made.
async fn establish<C: Connector>(
    connector: &mut C,
    policy: &ReconnectPolicy,
    event_tx: &mpsc::Sender<SpyEvent>,
    reconnecting: bool,
) -> std::result::Result<C::Transport, u32> {
    let first = u32::from(reconnecting);
    let mut made = 0;
    for attempt in first..=policy.max_attempts {
        made += 1;
        if attempt > 0 {
            emit_event(event_tx, SpyEvent::Reconnecting { attempt }).await;
            tokio::time::sleep(policy.delay).await;
        }
        match tokio::time::timeout(policy.connect_timeout, connector.connect()).await {
            Ok(Ok(transport)) => {
                info!(attempt, "connected to game server");
                return Ok(transport);
            }
            Ok(Err(e)) => warn!(attempt, "connect attempt failed: {e}"),
            Err(_) => warn!(attempt, "connect attempt timed out"),
        }
    }
    Err(made)
}

/// Drop intents queued for a connection that no longer exists. Their
/// player id belonged to that connection.
fn discard_queued_commands(cmd_rx: &mut mpsc::UnboundedReceiver<ClientEvent>) {
    while let Ok(event) = cmd_rx.try_recv() {
        warn!(event = event.name(), "discarding intent queued before the connection was lost");
    }
}

/// Drive one live connection until it ends.
async fn run_session(
    mut transport: impl Transport,
    cmd_rx: &mut mpsc::UnboundedReceiver<ClientEvent>,
    event_tx: &mpsc::Sender<SpyEvent>,
    state: &ClientState,
    shutdown_rx: &mut oneshot::Receiver<()>,
) -> SessionEnd {
    state.connected.store(true, Ordering::Release);
    emit_event(event_tx, SpyEvent::Connected).await;

    if let Err(reason) = request_rejoin(&mut transport, event_tx, state).await {
        return SessionEnd::Lost(Some(reason));
    }

    loop {
        tokio::select! {
            // Branch 1: outgoing intent from the client handle
            cmd = cmd_rx.recv() => {
                let Some(event) = cmd else {
                    debug!("command channel closed, shutting down connection");
                    let _ = transport.close().await;
                    return SessionEnd::Stopped;
                };
                debug!(event = event.name(), "sending client event");
                if let Err(reason) = send_frame(&mut transport, &event).await {
                    return SessionEnd::Lost(Some(reason));
                }
            }

            // Branch 2: shutdown signal
            _ = &mut *shutdown_rx => {
                debug!("shutdown signal received");
                let _ = transport.close().await;
                return SessionEnd::Stopped;
            }

            // Branch 3: incoming frame from the server
            incoming = transport.recv() => {
                match incoming {
                    Some(Ok(text)) => match serde_json::from_str::<ServerEvent>(&text) {
                        Ok(event) => handle_server_event(event, event_tx, state).await,
                        Err(e) => warn!("failed to deserialize server event: {e}; raw: {text}"),
                    },
                    Some(Err(e)) => {
                        error!("transport receive error: {e}");
                        return SessionEnd::Lost(Some(format!("transport receive error: {e}")));
                    }
                    None => {
                        debug!("transport closed by server");
                        return SessionEnd::Lost(None);
                    }
                }
            }
        }
    }
}

/// Send `rejoin-room` when a session record is stored.
async fn request_rejoin(
    transport: &mut impl Transport,
    event_tx: &mpsc::Sender<SpyEvent>,
    state: &ClientState,
) -> std::result::Result<(), String> {
    let record = match state.session.load() {
        Ok(Some(record)) => record,
        Ok(None) => return Ok(()),
        Err(e) => {
            warn!("failed to load session, skipping rejoin: {e}");
            return Ok(());
        }
    };

    info!(room_id = %record.room_id, name = %record.name, "attempting to rejoin room");
    state
        .game
        .lock()
        .await
        .set_identity(record.room_id.clone(), record.name.clone());

    let event = ClientEvent::RejoinRoom {
        player_name: record.name.clone(),
        room_id: record.room_id.clone(),
        was_host: record.is_host,
    };
    send_frame(transport, &event).await?;
    emit_event(
        event_tx,
        SpyEvent::RejoinRequested {
            room_id: record.room_id,
            player_name: record.name,
        },
    )
    .await;
    Ok(())
}

/// Serialize and send one frame; the error string becomes the loss reason.
async fn send_frame(
    transport: &mut impl Transport,
    event: &ClientEvent,
) -> std::result::Result<(), String> {
    let json = match serde_json::to_string(event) {
        Ok(json) => json,
        Err(e) => {
            // Serialization errors are programming bugs; don't kill the connection.
            error!("failed to serialize ClientEvent: {e}");
            return Ok(());
        }
    };
    transport.send(json).await.map_err(|e| {
        error!("transport send error: {e}");
        format!("transport send error: {e}")
    })
}

/// Apply an inbound event to shared state and forward it to the consumer.
async fn handle_server_event(
    event: ServerEvent,
    event_tx: &mpsc::Sender<SpyEvent>,
    state: &ClientState,
) {
    let change = {
        let mut game = state.game.lock().await;
        let change = game.apply(&event);
        sync_session(state, &game, &event);
        change
    };

    emit_event(event_tx, SpyEvent::from(event)).await;
    if let Some(PhaseChange { from, to }) = change {
        emit_event(event_tx, SpyEvent::PhaseChanged { from, to }).await;
    }
}

/// Keep the stored session in line with what the server asserted.
fn sync_session(state: &ClientState, game: &GameState, event: &ServerEvent) {
    match event {
        ServerEvent::RejoinFailed { .. } | ServerEvent::KickedFromRoom { .. } => {
            debug!(event = event.name(), "clearing stored session");
            state.forget_session();
        }
        ServerEvent::RoomExists { .. } => {
            if let Ok(Some(record)) = state.session.load() {
                if game.room_id() != Some(record.room_id.as_str()) {
                    debug!(
                        room_id = %record.room_id,
                        "room was never joined, clearing stored session"
                    );
                    state.forget_session();
                }
            }
        }
        ServerEvent::RoomUpdated(_) | ServerEvent::RejoinSuccess(_) => {
            if game.local_id().is_none() {
                return;
            }
            if let Ok(Some(mut record)) = state.session.load() {
                let is_host = game.is_host();
                if record.is_host != is_host {
                    record.is_host = is_host;
                    state.remember_session(&record);
                }
            }
        }
        _ => {}
    }
}

/// Emit an event to the event channel. If the channel is full, log a warning
/// and drop the event to avoid blocking the connection task.
async fn emit_event(event_tx: &mpsc::Sender<SpyEvent>, event: SpyEvent) {
    match event_tx.try_send(event) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(dropped)) => {
            warn!(
                "event channel full, dropping event: {:?}",
                std::mem::discriminant(&dropped)
            );
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            debug!("event channel closed, receiver dropped");
        }
    }
}

/// Emit the terminal [`Disconnected`](SpyEvent::Disconnected) event.
///
/// Uses `send().await` because it is always the last event on the channel
/// and must never be dropped.
async fn emit_disconnected(
    event_tx: &mpsc::Sender<SpyEvent>,
    state: &ClientState,
    reason: Option<String>,
) {
    state.connected.store(false, Ordering::Release);
    let event = SpyEvent::Disconnected { reason };
    if event_tx.send(event).await.is_err() {
        debug!("event channel closed, receiver dropped");
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex as StdMutex;

    // ── Mock transport ──────────────────────────────────────────────

    /// A mock transport that records sent frames and replays scripted responses.
    struct MockTransport {
        incoming: VecDeque<Option<std::result::Result<String, SpyError>>>,
        sent: Arc<StdMutex<Vec<String>>>,
        closed: Arc<AtomicBool>,
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn send(&mut self, message: String) -> std::result::Result<(), SpyError> {
            self.sent.lock().unwrap().push(message);
            Ok(())
        }

        async fn recv(&mut self) -> Option<std::result::Result<String, SpyError>> {
            if let Some(item) = self.incoming.pop_front() {
                item
            } else {
                // Script exhausted; hang until shutdown.
                std::future::pending().await
            }
        }

        async fn close(&mut self) -> std::result::Result<(), SpyError> {
            self.closed.store(true, Ordering::Relaxed);
            Ok(())
        }
    }

    /// Hands out one scripted transport per connect call; fails once exhausted.
    struct MockConnector {
        scripts: VecDeque<Vec<Option<std::result::Result<String, SpyError>>>>,
        sent: Arc<StdMutex<Vec<String>>>,
        closed: Arc<AtomicBool>,
        attempts: Arc<AtomicUsize>,
    }

    impl MockConnector {
        fn new(
            scripts: Vec<Vec<Option<std::result::Result<String, SpyError>>>>,
        ) -> (Self, Arc<StdMutex<Vec<String>>>, Arc<AtomicBool>, Arc<AtomicUsize>) {
            let sent = Arc::new(StdMutex::new(Vec::new()));
            let closed = Arc::new(AtomicBool::new(false));
            let attempts = Arc::new(AtomicUsize::new(0));
            let connector = Self {
                scripts: VecDeque::from(scripts),
                sent: Arc::clone(&sent),
                closed: Arc::clone(&closed),
                attempts: Arc::clone(&attempts),
            };
            (connector, sent, closed, attempts)
        }
    }

    #[async_trait]
    impl Connector for MockConnector {
        type Transport = MockTransport;

        async fn connect(&mut self) -> std::result::Result<MockTransport, SpyError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            let script = self
                .scripts
                .pop_front()
                .ok_or_else(|| SpyError::Connect("connection refused".into()))?;
            Ok(MockTransport {
                incoming: VecDeque::from(script),
                sent: Arc::clone(&self.sent),
                closed: Arc::clone(&self.closed),
            })
        }
    }

    // ── Helpers ─────────────────────────────────────────────────────

    fn frame(event: &ServerEvent) -> Option<std::result::Result<String, SpyError>> {
        Some(Ok(serde_json::to_string(event).unwrap()))
    }

    fn welcome(id: &str) -> Option<std::result::Result<String, SpyError>> {
        frame(&ServerEvent::Welcome { id: id.into() })
    }

    fn fast_config() -> SpyConfig {
        SpyConfig::default().with_reconnect(
            ReconnectPolicy::default()
                .with_max_attempts(2)
                .with_delay(Duration::from_millis(5)),
        )
    }

    fn sent_events(sent: &Arc<StdMutex<Vec<String>>>) -> Vec<ClientEvent> {
        sent.lock()
            .unwrap()
            .iter()
            .map(|s| serde_json::from_str(s).unwrap())
            .collect()
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    // ── Tests ───────────────────────────────────────────────────────

    #[tokio::test]
    async fn connected_is_first_event() {
        let (connector, _sent, _closed, _attempts) = MockConnector::new(vec![vec![]]);
        let (mut client, mut events) = SpyClient::start(connector, fast_config());

        let first = events.recv().await.unwrap();
        assert!(
            matches!(first, SpyEvent::Connected),
            "expected Connected as first event, got {first:?}"
        );
        assert!(client.is_connected());

        client.shutdown().await;
    }

    #[tokio::test]
    async fn create_room_sends_event_and_saves_session() {
        let (connector, sent, _closed, _attempts) = MockConnector::new(vec![vec![]]);
        let (mut client, mut events) = SpyClient::start(connector, fast_config());
        let _ = events.recv().await; // Connected

        client.create_room("R1", "Alice").await.unwrap();
        settle().await;

        assert_eq!(
            sent_events(&sent),
            vec![ClientEvent::CreateRoom {
                room_id: "R1".into(),
                name: "Alice".into()
            }]
        );
        let record = client.session().unwrap().unwrap();
        assert_eq!(record, SessionRecord::new("Alice", "R1", true));
        assert_eq!(client.current_room_id().await.as_deref(), Some("R1"));

        client.shutdown().await;
    }

    #[tokio::test]
    async fn room_scoped_intents_require_a_room() {
        let (connector, _sent, _closed, _attempts) = MockConnector::new(vec![vec![]]);
        let (mut client, mut events) = SpyClient::start(connector, fast_config());
        let _ = events.recv().await; // Connected

        assert!(matches!(
            client.start_game(1).await,
            Err(SpyError::NotInRoom)
        ));
        assert!(matches!(
            client.submit_vote(VoteTarget::Abstain).await,
            Err(SpyError::NotInRoom)
        ));

        client.shutdown().await;
    }

    #[tokio::test]
    async fn deal_words_moves_to_playing_and_emits_phase_change() {
        let deal = ServerEvent::DealWords(Assignment {
            word: "apple".into(),
            role: crate::protocol::Role::Civilian,
        });
        let (connector, _sent, _closed, _attempts) =
            MockConnector::new(vec![vec![welcome("a"), frame(&deal)]]);
        let (mut client, mut events) = SpyClient::start(connector, fast_config());

        let _ = events.recv().await; // Connected
        let _ = events.recv().await; // Welcome
        let ev = events.recv().await.unwrap();
        assert!(matches!(ev, SpyEvent::WordsDealt { .. }));
        let ev = events.recv().await.unwrap();
        assert_eq!(
            ev,
            SpyEvent::PhaseChanged {
                from: Phase::Lobby,
                to: Phase::Playing
            }
        );
        assert_eq!(client.phase().await, Phase::Playing);
        assert_eq!(client.local_player_id().await.as_deref(), Some("a"));

        client.shutdown().await;
    }

    #[tokio::test]
    async fn start_voting_sends_ready_and_transitions_locally() {
        let deal = ServerEvent::DealWords(Assignment {
            word: "apple".into(),
            role: crate::protocol::Role::Spy,
        });
        let (connector, sent, _closed, _attempts) =
            MockConnector::new(vec![vec![welcome("a"), frame(&deal)]]);
        let (mut client, mut events) = SpyClient::start(connector, fast_config());
        let _ = events.recv().await; // Connected

        client.join_room("R1", "Alice").await.unwrap();
        for _ in 0..3 {
            let _ = events.recv().await; // Welcome, WordsDealt, PhaseChanged
        }

        client.start_voting().await.unwrap();
        let ev = events.recv().await.unwrap();
        assert_eq!(
            ev,
            SpyEvent::PhaseChanged {
                from: Phase::Playing,
                to: Phase::Voting
            }
        );

        client
            .submit_vote(VoteTarget::Player("b".into()))
            .await
            .unwrap();
        client.submit_vote(VoteTarget::Abstain).await.unwrap();
        settle().await;

        let sent = sent_events(&sent);
        assert!(sent.contains(&ClientEvent::ReadyToVote {
            room_id: "R1".into()
        }));
        let votes = sent
            .iter()
            .filter(|e| matches!(e, ClientEvent::SubmitVote { .. }))
            .count();
        assert_eq!(votes, 2, "second vote must not be blocked locally");
        assert_eq!(
            client.snapshot().await.last_vote(),
            Some(&VoteTarget::Abstain)
        );

        client.shutdown().await;
    }

    #[tokio::test]
    async fn not_connected_error_after_shutdown() {
        let (connector, _sent, _closed, _attempts) = MockConnector::new(vec![vec![]]);
        let (mut client, mut events) = SpyClient::start(connector, fast_config());
        let _ = events.recv().await; // Connected

        client.shutdown().await;

        let result = client.join_room("R1", "Alice").await;
        assert!(matches!(result, Err(SpyError::NotConnected)));
    }

    #[tokio::test]
    async fn shutdown_emits_disconnected_and_closes_transport() {
        let (connector, _sent, closed, _attempts) = MockConnector::new(vec![vec![]]);
        let (mut client, mut events) = SpyClient::start(connector, fast_config());
        let _ = events.recv().await; // Connected

        client.shutdown().await;

        let event = events.recv().await.unwrap();
        assert_eq!(
            event,
            SpyEvent::Disconnected {
                reason: Some("client shut down".into())
            }
        );
        assert!(closed.load(Ordering::Relaxed));
    }

    #[tokio::test]
    async fn reconnect_sends_rejoin_with_stored_identity() {
        let store = Arc::new(MemorySessionStore::with_record(SessionRecord::new(
            "Alice", "R1", false,
        )));
        let (connector, sent, _closed, attempts) =
            MockConnector::new(vec![vec![None], vec![]]);
        let config = fast_config().with_session_store(store);
        let (mut client, mut events) = SpyClient::start(connector, config);

        assert_eq!(events.recv().await.unwrap(), SpyEvent::Connected);
        assert!(matches!(
            events.recv().await.unwrap(),
            SpyEvent::RejoinRequested { .. }
        ));
        assert!(matches!(
            events.recv().await.unwrap(),
            SpyEvent::ConnectionLost { reason: None }
        ));
        assert_eq!(
            events.recv().await.unwrap(),
            SpyEvent::Reconnecting { attempt: 1 }
        );
        assert_eq!(events.recv().await.unwrap(), SpyEvent::Connected);
        assert_eq!(
            events.recv().await.unwrap(),
            SpyEvent::RejoinRequested {
                room_id: "R1".into(),
                player_name: "Alice".into()
            }
        );
        assert_eq!(attempts.load(Ordering::SeqCst), 2);

        let sent = sent_events(&sent);
        assert_eq!(
            sent.last(),
            Some(&ClientEvent::RejoinRoom {
                player_name: "Alice".into(),
                room_id: "R1".into(),
                was_host: false
            })
        );

        client.shutdown().await;
    }

    #[test]
    fn intents_queued_for_a_lost_connection_are_discarded() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        tx.send(ClientEvent::SubmitVote {
            room_id: "R1".into(),
            from_id: "old-conn".into(),
            to_id: VoteTarget::Abstain,
        })
        .unwrap();
        tx.send(ClientEvent::ReadyToVote {
            room_id: "R1".into(),
        })
        .unwrap();

        discard_queued_commands(&mut rx);
        assert!(matches!(
            rx.try_recv(),
            Err(mpsc::error::TryRecvError::Empty)
        ));

        // The channel stays usable for the next connection.
        tx.send(ClientEvent::CheckRoomStatus {
            room_id: "R1".into(),
        })
        .unwrap();
        assert!(rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn reconnection_gives_up_after_max_attempts() {
        let (connector, _sent, _closed, attempts) = MockConnector::new(vec![vec![None]]);
        let (mut client, mut events) = SpyClient::start(connector, fast_config());

        let mut seen = Vec::new();
        while let Some(ev) = events.recv().await {
            seen.push(ev);
        }

        assert_eq!(seen.first(), Some(&SpyEvent::Connected));
        assert!(seen.contains(&SpyEvent::Reconnecting { attempt: 2 }));
        assert!(!seen.contains(&SpyEvent::Reconnecting { attempt: 3 }));
        assert!(seen.contains(&SpyEvent::ReconnectFailed { attempts: 2 }));
        assert!(matches!(seen.last(), Some(SpyEvent::Disconnected { .. })));
        // One successful connect plus two failed retries.
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert!(!client.is_connected());

        client.shutdown().await;
    }

    #[tokio::test]
    async fn disabled_reconnect_disconnects_on_loss() {
        let (connector, _sent, _closed, attempts) = MockConnector::new(vec![vec![Some(Err(
            SpyError::TransportReceive("boom".into()),
        ))]]);
        let config = SpyConfig::default().with_reconnect(ReconnectPolicy::disabled());
        let (mut client, mut events) = SpyClient::start(connector, config);

        let _ = events.recv().await; // Connected
        let event = events.recv().await.unwrap();
        let SpyEvent::Disconnected { reason } = event else {
            panic!("expected Disconnected, got {event:?}");
        };
        assert!(reason.unwrap().contains("boom"));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);

        client.shutdown().await;
    }

    #[tokio::test]
    async fn rejoin_failed_clears_session() {
        let store = Arc::new(MemorySessionStore::with_record(SessionRecord::new(
            "Alice", "R1", true,
        )));
        let failed = ServerEvent::RejoinFailed {
            message: Some("room gone".into()),
        };
        let (connector, sent, _closed, _attempts) = MockConnector::new(vec![vec![frame(&failed)]]);
        let config = fast_config().with_session_store(store.clone());
        let (mut client, mut events) = SpyClient::start(connector, config);

        assert_eq!(events.recv().await.unwrap(), SpyEvent::Connected);
        assert!(matches!(
            events.recv().await.unwrap(),
            SpyEvent::RejoinRequested { .. }
        ));
        let ev = events.recv().await.unwrap();
        assert_eq!(ev.error().map(|(code, _)| code), Some(crate::ErrorCode::RejoinFailed));

        assert!(store.load().unwrap().is_none());
        assert!(matches!(
            sent_events(&sent).first(),
            Some(ClientEvent::RejoinRoom { was_host: true, .. })
        ));

        client.shutdown().await;
    }

    #[tokio::test]
    async fn leave_room_offline_still_applies_locally() {
        let (connector, _sent, _closed, _attempts) = MockConnector::new(vec![vec![]]);
        let (mut client, mut events) = SpyClient::start(connector, fast_config());
        let _ = events.recv().await; // Connected

        client.join_room("R1", "Alice").await.unwrap();
        client.shutdown().await;

        client.leave_room().await.unwrap();
        assert!(client.session().unwrap().is_none());
        assert!(client.current_room_id().await.is_none());
        assert_eq!(client.phase().await, Phase::Lobby);
    }

    #[tokio::test]
    async fn config_defaults() {
        let config = SpyConfig::default();
        assert_eq!(config.reconnect.max_attempts, 5);
        assert_eq!(config.reconnect.delay, Duration::from_secs(1));
        assert_eq!(config.reconnect.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.punishment_rule, PunishmentRule::Disabled);
        assert_eq!(config.event_channel_capacity, 256);
        assert_eq!(config.shutdown_timeout, Duration::from_secs(1));
    }

    #[tokio::test]
    async fn event_channel_capacity_is_clamped_to_one() {
        let config = SpyConfig::default().with_event_channel_capacity(0);
        assert_eq!(config.event_channel_capacity, 1);
    }

    #[tokio::test]
    async fn debug_impl_for_client() {
        let (connector, _sent, _closed, _attempts) = MockConnector::new(vec![vec![]]);
        let (mut client, mut events) = SpyClient::start(connector, fast_config());
        let _ = events.recv().await; // Connected

        let debug_str = format!("{client:?}");
        assert!(debug_str.contains("SpyClient"));
        assert!(debug_str.contains("connected"));

        client.shutdown().await;
    }
}
