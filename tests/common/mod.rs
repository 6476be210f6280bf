#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing,
    dead_code
)]
//! Shared test utilities for the Who Is Spy client integration tests.
//!
//! Provides a scripted [`MockTransport`], a [`MockConnector`] handing out one
//! transport per connection, and helpers that build raw server frames the
//! way the game server writes them.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use serde_json::{json, Value};
use who_is_spy_client::{ClientEvent, Connector, SpyError, Transport};

/// One scripted `recv()` result.
pub type Frame = Option<Result<String, SpyError>>;

// ── MockTransport ───────────────────────────────────────────────────

/// A scripted transport. `recv()` replays frames in order, then hangs.
pub struct MockTransport {
    incoming: VecDeque<Frame>,
    sent: Arc<StdMutex<Vec<String>>>,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&mut self, message: String) -> Result<(), SpyError> {
        self.sent.lock().unwrap().push(message);
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<String, SpyError>> {
        if let Some(item) = self.incoming.pop_front() {
            item
        } else {
            // Script exhausted; keep the connection open until shutdown.
            std::future::pending().await
        }
    }

    async fn close(&mut self) -> Result<(), SpyError> {
        self.closed.store(true, Ordering::Relaxed);
        Ok(())
    }
}

// ── MockConnector ───────────────────────────────────────────────────

/// Hands out one scripted [`MockTransport`] per successful connect.
///
/// Once the scripts run out every further attempt fails with
/// [`SpyError::Connect`]. All transports share the same `sent` log.
pub struct MockConnector {
    scripts: VecDeque<Vec<Frame>>,
    handles: MockHandles,
}

/// Inspection handles shared with the connector.
#[derive(Clone)]
pub struct MockHandles {
    pub sent: Arc<StdMutex<Vec<String>>>,
    pub closed: Arc<AtomicBool>,
    pub attempts: Arc<AtomicUsize>,
}

impl MockHandles {
    /// Every frame the client sent, decoded.
    pub fn sent_events(&self) -> Vec<ClientEvent> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|raw| serde_json::from_str(raw).expect("client sent an undecodable frame"))
            .collect()
    }

    /// Every frame the client sent, as raw JSON values.
    pub fn sent_json(&self) -> Vec<Value> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|raw| serde_json::from_str(raw).unwrap())
            .collect()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }
}

impl MockConnector {
    pub fn new(scripts: Vec<Vec<Frame>>) -> (Self, MockHandles) {
        let handles = MockHandles {
            sent: Arc::new(StdMutex::new(Vec::new())),
            closed: Arc::new(AtomicBool::new(false)),
            attempts: Arc::new(AtomicUsize::new(0)),
        };
        let connector = Self {
            scripts: VecDeque::from(scripts),
            handles: handles.clone(),
        };
        (connector, handles)
    }

    /// A connector with a single connection that plays `frames`.
    pub fn single(frames: Vec<Frame>) -> (Self, MockHandles) {
        Self::new(vec![frames])
    }
}

#[async_trait]
impl Connector for MockConnector {
    type Transport = MockTransport;

    async fn connect(&mut self) -> Result<MockTransport, SpyError> {
        self.handles.attempts.fetch_add(1, Ordering::SeqCst);
        let script = self
            .scripts
            .pop_front()
            .ok_or_else(|| SpyError::Connect("connection refused".into()))?;
        Ok(MockTransport {
            incoming: VecDeque::from(script),
            sent: Arc::clone(&self.handles.sent),
            closed: Arc::clone(&self.handles.closed),
        })
    }
}

// ── Frame helpers ───────────────────────────────────────────────────

/// A frame carrying `value` as the server would write it.
pub fn frame(value: Value) -> Frame {
    Some(Ok(value.to_string()))
}

/// The server closed the connection.
pub fn hang_up() -> Frame {
    None
}

pub fn welcome(id: &str) -> Frame {
    frame(json!({"event": "welcome", "data": {"id": id}}))
}

/// `room-updated` for room `R1` hosted by player `a`.
pub fn room_updated(status: &str, players: Value) -> Frame {
    frame(json!({
        "event": "room-updated",
        "data": {
            "id": "R1",
            "host": "a",
            "listName": "default",
            "status": status,
            "players": players
        }
    }))
}

pub fn deal_words(word: &str, role: &str) -> Frame {
    frame(json!({"event": "deal-words", "data": {"word": word, "role": role}}))
}

/// A dataless event such as `vote-tie` or `game-reset`.
pub fn bare(event: &str) -> Frame {
    frame(json!({ "event": event }))
}

pub fn round_summary() -> Frame {
    frame(json!({
        "event": "round-summary",
        "data": {
            "summary": {
                "a": {"word": "apple", "role": "civilian"},
                "b": {"word": "pear", "role": "spy"}
            }
        }
    }))
}

/// Three players: `a` (Alice, host), `b` (Bob) and `c` (Carol).
pub fn three_players() -> Value {
    json!([
        {"id": "a", "name": "Alice", "alive": true},
        {"id": "b", "name": "Bob", "alive": true},
        {"id": "c", "name": "Carol", "alive": true}
    ])
}

// ── LiveConnector ───────────────────────────────────────────────────

/// A single connection whose server side is driven by the test.
///
/// Frames pushed through the returned [`ServerSide`] arrive in `recv()`;
/// dropping it hangs up. Further connects fail.
pub struct LiveConnector {
    inbound: Option<tokio::sync::mpsc::UnboundedReceiver<String>>,
    handles: MockHandles,
}

/// Test end of a [`LiveConnector`].
pub struct ServerSide {
    tx: tokio::sync::mpsc::UnboundedSender<String>,
}

impl ServerSide {
    pub fn push(&self, frame: Frame) {
        let text = frame.expect("push takes data frames").expect("push takes Ok frames");
        self.tx.send(text).expect("client transport dropped");
    }
}

pub struct LiveTransport {
    inbound: tokio::sync::mpsc::UnboundedReceiver<String>,
    sent: Arc<StdMutex<Vec<String>>>,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl Transport for LiveTransport {
    async fn send(&mut self, message: String) -> Result<(), SpyError> {
        self.sent.lock().unwrap().push(message);
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<String, SpyError>> {
        self.inbound.recv().await.map(Ok)
    }

    async fn close(&mut self) -> Result<(), SpyError> {
        self.closed.store(true, Ordering::Relaxed);
        Ok(())
    }
}

impl LiveConnector {
    pub fn new() -> (Self, ServerSide, MockHandles) {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let handles = MockHandles {
            sent: Arc::new(StdMutex::new(Vec::new())),
            closed: Arc::new(AtomicBool::new(false)),
            attempts: Arc::new(AtomicUsize::new(0)),
        };
        let connector = Self {
            inbound: Some(rx),
            handles: handles.clone(),
        };
        (connector, ServerSide { tx }, handles)
    }
}

#[async_trait]
impl Connector for LiveConnector {
    type Transport = LiveTransport;

    async fn connect(&mut self) -> Result<LiveTransport, SpyError> {
        self.handles.attempts.fetch_add(1, Ordering::SeqCst);
        let inbound = self
            .inbound
            .take()
            .ok_or_else(|| SpyError::Connect("connection refused".into()))?;
        Ok(LiveTransport {
            inbound,
            sent: Arc::clone(&self.handles.sent),
            closed: Arc::clone(&self.handles.closed),
        })
    }
}
