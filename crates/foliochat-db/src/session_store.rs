use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use foliochat_common::{Error, Result, SessionId};
use foliochat_facts::SessionState;
use rusqlite::{Connection, OptionalExtension, params};
use tracing::{info, warn};

use crate::store::SessionStateStore;

/// Summary row for a persisted session.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredSession {
    pub session_id: String,
    pub turn_count: u64,
    pub updated_at: String,
}

/// SQLite-backed session state, one JSON document per conversation.
pub struct SqliteSessionStore {
    conn: Mutex<Connection>,
}

impl SqliteSessionStore {
    pub fn open(db_path: &Path) -> Result<Self> {
        info!("opening session store at {}", db_path.display());
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(db_path)
            .map_err(|e| Error::Database(format!("failed to open database: {e}")))?;

        conn.execute_batch("PRAGMA journal_mode=WAL;")
            .map_err(|e| Error::Database(format!("failed to set pragmas: {e}")))?;

        let store = Self {
            conn: Mutex::new(conn),
        };
        store.run_migrations()?;
        Ok(store)
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::Database(format!("failed to open in-memory database: {e}")))?;

        let store = Self {
            conn: Mutex::new(conn),
        };
        store.run_migrations()?;
        Ok(store)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::Database("session store lock poisoned".into()))
    }

    fn run_migrations(&self) -> Result<()> {
        self.conn()?
            .execute_batch(
                "CREATE TABLE IF NOT EXISTS session_states (
                    session_id TEXT PRIMARY KEY,
                    state TEXT NOT NULL,
                    turn_count INTEGER NOT NULL DEFAULT 0,
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
                );",
            )
            .map_err(|e| Error::Database(format!("migration failed: {e}")))?;
        Ok(())
    }

    /// Load the stored state for a session.
    ///
    /// A row whose JSON no longer parses is logged and treated as absent so the
    /// conversation starts over instead of failing every turn.
    pub fn load_state(&self, session_id: &str) -> Result<Option<SessionState>> {
        let raw: Option<String> = self
            .conn()?
            .query_row(
                "SELECT state FROM session_states WHERE session_id = ?1",
                params![session_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| Error::Database(format!("failed to load session state: {e}")))?;

        let Some(raw) = raw else {
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(state) => Ok(Some(state)),
            Err(e) => {
                warn!(session_id, error = %e, "discarding unreadable session state");
                Ok(None)
            }
        }
    }

    /// Create or replace the stored state for a session.
    pub fn save_state(&self, session_id: &str, state: &SessionState) -> Result<()> {
        let raw = serde_json::to_string(state)?;
        self.conn()?
            .execute(
                "INSERT INTO session_states (session_id, state, turn_count)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(session_id) DO UPDATE SET
                   state = excluded.state,
                   turn_count = excluded.turn_count,
                   updated_at = datetime('now')",
                params![session_id, raw, state.metadata.turn_count as i64],
            )
            .map_err(|e| Error::Database(format!("failed to save session state: {e}")))?;
        Ok(())
    }

    /// Most recently updated sessions first.
    pub fn list_sessions(&self, limit: usize) -> Result<Vec<StoredSession>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT session_id, turn_count, updated_at
                 FROM session_states
                 ORDER BY updated_at DESC, rowid DESC
                 LIMIT ?1",
            )
            .map_err(|e| Error::Database(format!("failed to prepare session query: {e}")))?;

        let rows = stmt
            .query_map(params![limit as i64], |row| {
                Ok(StoredSession {
                    session_id: row.get(0)?,
                    turn_count: row.get::<_, i64>(1)?.max(0) as u64,
                    updated_at: row.get(2)?,
                })
            })
            .map_err(|e| Error::Database(format!("failed to list sessions: {e}")))?;

        let mut sessions = Vec::new();
        for row in rows {
            sessions.push(
                row.map_err(|e| Error::Database(format!("failed to read session row: {e}")))?,
            );
        }
        Ok(sessions)
    }
}

#[async_trait]
impl SessionStateStore for SqliteSessionStore {
    async fn load(&self, session_id: &SessionId) -> Result<Option<SessionState>> {
        self.load_state(session_id.as_str())
    }

    async fn save(&self, session_id: &SessionId, state: &SessionState) -> Result<()> {
        self.save_state(session_id.as_str(), state)
    }
}
