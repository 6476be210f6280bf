//! Persisted reconnection identity.
//!
//! A [`SessionRecord`] remembers which room the user was in and under what
//! name, so that a fresh connection can ask the server to restore the
//! membership. The record is the only durable client state.
//!
//! Stores are handed to the client through
//! [`SpyConfig::with_session_store`](crate::client::SpyConfig::with_session_store).

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::Result;
use crate::protocol::RoomId;

/// Identity needed to rejoin a room after reconnecting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    #[serde(rename = "whoisspy_player_name")]
    pub name: String,
    #[serde(rename = "whoisspy_room_id")]
    pub room_id: RoomId,
    #[serde(rename = "whoisspy_is_host", default)]
    pub is_host: bool,
}

impl SessionRecord {
    pub fn new(name: impl Into<String>, room_id: impl Into<RoomId>, is_host: bool) -> Self {
        Self {
            name: name.into(),
            room_id: room_id.into(),
            is_host,
        }
    }

    /// A record is usable only when both name and room are known.
    pub fn is_complete(&self) -> bool {
        !self.name.is_empty() && !self.room_id.is_empty()
    }
}

/// Storage for the reconnection identity.
///
/// Implementations are called from the connection task, so they must be
/// quick; file-backed stores touch a few dozen bytes.
pub trait SessionStore: Send + Sync + fmt::Debug {
    /// Returns the stored record, if a complete one exists.
    fn load(&self) -> Result<Option<SessionRecord>>;

    /// Replaces the stored record.
    fn save(&self, record: &SessionRecord) -> Result<()>;

    /// Removes the stored record.
    fn clear(&self) -> Result<()>;
}

/// Process-local store; forgets everything on exit.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    record: Mutex<Option<SessionRecord>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store pre-seeded with a record, as if left over from an earlier run.
    pub fn with_record(record: SessionRecord) -> Self {
        Self {
            record: Mutex::new(Some(record)),
        }
    }
}

impl SessionStore for MemorySessionStore {
    fn load(&self) -> Result<Option<SessionRecord>> {
        let guard = self.record.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(guard.clone().filter(SessionRecord::is_complete))
    }

    fn save(&self, record: &SessionRecord) -> Result<()> {
        *self.record.lock().unwrap_or_else(PoisonError::into_inner) = Some(record.clone());
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        *self.record.lock().unwrap_or_else(PoisonError::into_inner) = None;
        Ok(())
    }
}

/// JSON-file store surviving restarts.
#[derive(Debug, Clone)]
pub struct FileSessionStore {
    path: PathBuf,
}

impl FileSessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SessionStore for FileSessionStore {
    fn load(&self) -> Result<Option<SessionRecord>> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        match serde_json::from_str::<SessionRecord>(&raw) {
            Ok(record) if record.is_complete() => Ok(Some(record)),
            Ok(_) => Ok(None),
            Err(e) => {
                warn!(path = %self.path.display(), "ignoring unreadable session file: {e}");
                Ok(None)
            }
        }
    }

    fn save(&self, record: &SessionRecord) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_string_pretty(record)?;
        std::fs::write(&self.path, json)?;
        debug!(path = %self.path.display(), room_id = %record.room_id, "session saved");
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn memory_store_round_trip_and_clear() {
        let store = MemorySessionStore::new();
        assert!(store.load().unwrap().is_none());

        let record = SessionRecord::new("Alice", "R1", true);
        store.save(&record).unwrap();
        assert_eq!(store.load().unwrap(), Some(record));

        store.clear().unwrap();
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn incomplete_record_is_not_restored() {
        let store = MemorySessionStore::with_record(SessionRecord::new("Alice", "", false));
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn file_store_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("session.json");

        FileSessionStore::new(&path)
            .save(&SessionRecord::new("Bob", "R9", false))
            .unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("whoisspy_room_id"));

        let loaded = FileSessionStore::new(&path).load().unwrap().unwrap();
        assert_eq!(loaded.name, "Bob");
        assert!(!loaded.is_host);
    }

    #[test]
    fn file_store_missing_or_garbage_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSessionStore::new(dir.path().join("session.json"));
        assert!(store.load().unwrap().is_none());
        store.clear().unwrap();

        std::fs::write(store.path(), "not json").unwrap();
        assert!(store.load().unwrap().is_none());
    }
}
