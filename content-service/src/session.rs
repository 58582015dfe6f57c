//! Session status store and activity history.
//!
//! The web tier polls a per-session key/value store for the request status
//! and report file. Status transitions are also appended to a durable
//! history shared by all sessions.

use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// File name of the history database inside the history directory
pub const HISTORY_DB_NAME: &str = "service-history.db";

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Failed to persist session store: {0}")]
    Persist(#[from] tempfile::PersistError),
}

/// Key/value state scoped to one session
pub trait SessionStore: Send {
    fn set(&mut self, key: &str, value: Value) -> Result<(), SessionError>;
    fn get(&self, key: &str) -> Option<Value>;
    fn update_all(&mut self, values: Map<String, Value>) -> Result<(), SessionError>;
}

/// Append-only log of session status transitions
pub trait ActivityHistory: Send {
    fn add(&mut self, session_id: &str, status_op: &str) -> Result<(), SessionError>;
}

/// JSON file store at `<session_path>/<prefix>-session-store.json`
#[derive(Debug)]
pub struct FileSessionStore {
    path: PathBuf,
    data: Map<String, Value>,
}

impl FileSessionStore {
    /// Open the store, loading any existing content
    pub fn open(session_path: &Path, prefix: &str) -> Result<Self, SessionError> {
        std::fs::create_dir_all(session_path)?;
        let path = session_path.join(format!("{}-session-store.json", prefix));

        let data = if path.exists() {
            serde_json::from_str(&std::fs::read_to_string(&path)?)?
        } else {
            Map::new()
        };

        Ok(Self { path, data })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn save(&self) -> Result<(), SessionError> {
        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        serde_json::to_writer_pretty(&mut tmp, &self.data)?;
        tmp.flush()?;
        tmp.persist(&self.path)?;
        debug!("Saved session store {:?}", self.path);
        Ok(())
    }
}

impl SessionStore for FileSessionStore {
    fn set(&mut self, key: &str, value: Value) -> Result<(), SessionError> {
        self.data.insert(key.to_string(), value);
        self.save()
    }

    fn get(&self, key: &str) -> Option<Value> {
        self.data.get(key).cloned()
    }

    fn update_all(&mut self, values: Map<String, Value>) -> Result<(), SessionError> {
        self.data.extend(values);
        self.save()
    }
}

/// One recorded status transition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: String,
    pub session_id: String,
    pub status_op: String,
    pub recorded_at: String,
}

/// SQLite backed activity history
pub struct ServiceHistory {
    conn: Connection,
}

impl ServiceHistory {
    /// Open or create the history database inside `history_path`
    pub fn open(history_path: &Path) -> Result<Self, SessionError> {
        std::fs::create_dir_all(history_path)?;
        let conn = Connection::open(history_path.join(HISTORY_DB_NAME))?;
        let history = Self { conn };
        history.init_schema()?;
        Ok(history)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self, SessionError> {
        let conn = Connection::open_in_memory()?;
        let history = Self { conn };
        history.init_schema()?;
        Ok(history)
    }

    fn init_schema(&self) -> Result<(), SessionError> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS session_history (
                id TEXT PRIMARY KEY,
                session_id TEXT NOT NULL,
                status_op TEXT NOT NULL,
                recorded_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_session_history_session ON session_history(session_id);
            "#,
        )?;
        Ok(())
    }

    /// Entries for a session, oldest first
    pub fn entries(&self, session_id: &str) -> Result<Vec<HistoryEntry>, SessionError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, session_id, status_op, recorded_at
             FROM session_history WHERE session_id = ?1 ORDER BY rowid",
        )?;

        let entries = stmt
            .query_map(params![session_id], |row| {
                Ok(HistoryEntry {
                    id: row.get(0)?,
                    session_id: row.get(1)?,
                    status_op: row.get(2)?,
                    recorded_at: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(entries)
    }
}

impl ActivityHistory for ServiceHistory {
    fn add(&mut self, session_id: &str, status_op: &str) -> Result<(), SessionError> {
        self.conn.execute(
            "INSERT INTO session_history (id, session_id, status_op, recorded_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                uuid::Uuid::new_v4().to_string(),
                session_id,
                status_op,
                chrono::Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }
}
