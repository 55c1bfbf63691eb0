//! Checkpoint storage backends.
//!
//! A backend stores opaque state snapshots as append-only rows per
//! conversation key. It knows nothing about users, ownership or what is
//! inside a snapshot; all of that lives in the store layer. Two backends
//! ship here: SQLite for durability and an in-memory map for tests and
//! short-lived embedders.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard};

use rusqlite::{params, Connection, OptionalExtension};
use thiserror::Error;

// ─── Rows ────────────────────────────────────────────────────────────────────

/// One stored checkpoint, as the backend sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointRow {
    pub checkpoint_id: String,
    /// RFC 3339 timestamp.
    pub created_at: String,
    /// Per-conversation sequence number, starting at 1.
    pub version: u64,
    /// Opaque snapshot payload.
    pub state_json: String,
}

/// Backend failures.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("checkpoint backend error: {reason}")]
    Failure { reason: String },
}

impl From<rusqlite::Error> for BackendError {
    fn from(e: rusqlite::Error) -> Self {
        BackendError::Failure {
            reason: e.to_string(),
        }
    }
}

// ─── Trait ───────────────────────────────────────────────────────────────────

/// Append-only checkpoint storage keyed by conversation.
pub trait CheckpointBackend: Send + Sync {
    /// Append a new tip row for the key.
    fn append(&self, key: &str, row: CheckpointRow) -> Result<(), BackendError>;

    /// The newest row for the key.
    fn tip(&self, key: &str) -> Result<Option<CheckpointRow>, BackendError>;

    /// Every row for the key, oldest first.
    fn rows(&self, key: &str) -> Result<Vec<CheckpointRow>, BackendError>;

    /// One historical row by checkpoint id.
    fn row_by_id(
        &self,
        key: &str,
        checkpoint_id: &str,
    ) -> Result<Option<CheckpointRow>, BackendError>;

    /// Overwrite the snapshot of one row. Returns false when no such row.
    fn replace_state(
        &self,
        key: &str,
        checkpoint_id: &str,
        state_json: &str,
    ) -> Result<bool, BackendError>;

    /// Primary key listing, served from the maintained key index.
    fn index_keys(&self) -> Result<Vec<String>, BackendError>;

    /// Fallback key listing, scanning the stored rows themselves.
    fn scan_keys(&self) -> Result<Vec<String>, BackendError>;
}

// ─── SQLite Backend ──────────────────────────────────────────────────────────

/// Durable backend over `rusqlite`.
pub struct SqliteBackend {
    conn: Mutex<Connection>,
}

impl SqliteBackend {
    /// Open (or create) the checkpoint database at the given path.
    ///
    /// Pass `":memory:"` for an in-memory database (tests).
    pub fn open(path: &str) -> Result<Self, BackendError> {
        let conn = Connection::open(path)?;

        // WAL keeps concurrent readers cheap while a turn checkpoints.
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;

        let backend = Self {
            conn: Mutex::new(conn),
        };
        backend.create_tables()?;
        Ok(backend)
    }

    fn create_tables(&self) -> Result<(), BackendError> {
        self.conn().execute_batch(
            "
            CREATE TABLE IF NOT EXISTS checkpoints (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                conversation_key TEXT NOT NULL,
                checkpoint_id TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT (datetime('now')),
                version INTEGER NOT NULL,
                state TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_checkpoints_key
                ON checkpoints(conversation_key, id);

            CREATE UNIQUE INDEX IF NOT EXISTS idx_checkpoints_ckpt
                ON checkpoints(conversation_key, checkpoint_id);

            CREATE TABLE IF NOT EXISTS conversation_keys (
                key TEXT PRIMARY KEY,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            );
            ",
        )?;
        Ok(())
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl CheckpointBackend for SqliteBackend {
    fn append(&self, key: &str, row: CheckpointRow) -> Result<(), BackendError> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO checkpoints (conversation_key, checkpoint_id, created_at, version, state)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                key,
                row.checkpoint_id,
                row.created_at,
                row.version as i64,
                row.state_json
            ],
        )?;
        conn.execute(
            "INSERT OR IGNORE INTO conversation_keys (key) VALUES (?1)",
            params![key],
        )?;
        Ok(())
    }

    fn tip(&self, key: &str) -> Result<Option<CheckpointRow>, BackendError> {
        let result = self
            .conn()
            .query_row(
                "SELECT checkpoint_id, created_at, version, state
                 FROM checkpoints WHERE conversation_key = ?1
                 ORDER BY id DESC LIMIT 1",
                params![key],
                map_row,
            )
            .optional()?;
        Ok(result)
    }

    fn rows(&self, key: &str) -> Result<Vec<CheckpointRow>, BackendError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT checkpoint_id, created_at, version, state
             FROM checkpoints WHERE conversation_key = ?1
             ORDER BY id ASC",
        )?;
        let rows = stmt
            .query_map(params![key], map_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn row_by_id(
        &self,
        key: &str,
        checkpoint_id: &str,
    ) -> Result<Option<CheckpointRow>, BackendError> {
        let result = self
            .conn()
            .query_row(
                "SELECT checkpoint_id, created_at, version, state
                 FROM checkpoints WHERE conversation_key = ?1 AND checkpoint_id = ?2",
                params![key, checkpoint_id],
                map_row,
            )
            .optional()?;
        Ok(result)
    }

    fn replace_state(
        &self,
        key: &str,
        checkpoint_id: &str,
        state_json: &str,
    ) -> Result<bool, BackendError> {
        let changed = self.conn().execute(
            "UPDATE checkpoints SET state = ?3
             WHERE conversation_key = ?1 AND checkpoint_id = ?2",
            params![key, checkpoint_id, state_json],
        )?;
        Ok(changed > 0)
    }

    fn index_keys(&self) -> Result<Vec<String>, BackendError> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT key FROM conversation_keys ORDER BY key")?;
        let keys = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(keys)
    }

    fn scan_keys(&self) -> Result<Vec<String>, BackendError> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare("SELECT DISTINCT conversation_key FROM checkpoints ORDER BY conversation_key")?;
        let keys = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(keys)
    }
}

fn map_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<CheckpointRow> {
    Ok(CheckpointRow {
        checkpoint_id: row.get(0)?,
        created_at: row.get(1)?,
        version: row.get::<_, i64>(2)? as u64,
        state_json: row.get(3)?,
    })
}

// ─── Memory Backend ──────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct MemoryInner {
    rows: HashMap<String, Vec<CheckpointRow>>,
    index: BTreeSet<String>,
}

/// In-process backend over plain maps.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    inner: Mutex<MemoryInner>,
    maintain_index: bool,
}

impl MemoryBackend {
    pub fn new() -> Self {
        MemoryBackend {
            inner: Mutex::default(),
            maintain_index: true,
        }
    }

    /// A flavor that never populates the key index, mimicking storage with
    /// no native listing. Key discovery then rides on the fallback scan.
    pub fn without_index() -> Self {
        MemoryBackend {
            inner: Mutex::default(),
            maintain_index: false,
        }
    }

    fn inner(&self) -> MutexGuard<'_, MemoryInner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl CheckpointBackend for MemoryBackend {
    fn append(&self, key: &str, row: CheckpointRow) -> Result<(), BackendError> {
        let mut inner = self.inner();
        inner.rows.entry(key.to_string()).or_default().push(row);
        if self.maintain_index {
            inner.index.insert(key.to_string());
        }
        Ok(())
    }

    fn tip(&self, key: &str) -> Result<Option<CheckpointRow>, BackendError> {
        Ok(self
            .inner()
            .rows
            .get(key)
            .and_then(|rows| rows.last())
            .cloned())
    }

    fn rows(&self, key: &str) -> Result<Vec<CheckpointRow>, BackendError> {
        Ok(self.inner().rows.get(key).cloned().unwrap_or_default())
    }

    fn row_by_id(
        &self,
        key: &str,
        checkpoint_id: &str,
    ) -> Result<Option<CheckpointRow>, BackendError> {
        Ok(self
            .inner()
            .rows
            .get(key)
            .and_then(|rows| rows.iter().find(|r| r.checkpoint_id == checkpoint_id))
            .cloned())
    }

    fn replace_state(
        &self,
        key: &str,
        checkpoint_id: &str,
        state_json: &str,
    ) -> Result<bool, BackendError> {
        let mut inner = self.inner();
        if let Some(row) = inner
            .rows
            .get_mut(key)
            .and_then(|rows| rows.iter_mut().find(|r| r.checkpoint_id == checkpoint_id))
        {
            row.state_json = state_json.to_string();
            return Ok(true);
        }
        Ok(false)
    }

    fn index_keys(&self) -> Result<Vec<String>, BackendError> {
        Ok(self.inner().index.iter().cloned().collect())
    }

    fn scan_keys(&self) -> Result<Vec<String>, BackendError> {
        let mut keys: Vec<String> = self.inner().rows.keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
