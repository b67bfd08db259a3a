//! Embedded SQLite persistence for sessions, cards and prompt versions.
//!
//! One [`Store`] wraps a single `rusqlite::Connection` behind a mutex. Every
//! write is short and local, so background generation tasks call it directly
//! from async code; batches commit one transaction each, which is what makes
//! partial progress survive a later batch's failure.
//!
//! Foreign keys cascade session → card → {image, rejection}. A partial unique
//! index allows at most one active prompt version per type.

mod cards;
mod prompts;
mod sessions;

pub use prompts::NewSuggestion;

use crate::error::ForgeError;
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row};
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

/// Ordered schema migrations. Index + 1 is the schema version.
const MIGRATIONS: &[&str] = &[r#"
CREATE TABLE prompt_versions (
    id                   INTEGER PRIMARY KEY AUTOINCREMENT,
    prompt_type          TEXT    NOT NULL,
    version              INTEGER NOT NULL,
    system_prompt        TEXT    NOT NULL,
    user_prompt_template TEXT    NOT NULL,
    is_active            INTEGER NOT NULL DEFAULT 0,
    parent_version_id    INTEGER REFERENCES prompt_versions(id),
    cards_generated      INTEGER NOT NULL DEFAULT 0,
    cards_approved       INTEGER NOT NULL DEFAULT 0,
    cards_rejected       INTEGER NOT NULL DEFAULT 0,
    approval_rate        REAL,
    created_at           TEXT    NOT NULL,
    UNIQUE (prompt_type, version)
);
CREATE UNIQUE INDEX idx_prompt_versions_one_active
    ON prompt_versions (prompt_type) WHERE is_active = 1;

CREATE TABLE sessions (
    id                INTEGER PRIMARY KEY AUTOINCREMENT,
    filename          TEXT    NOT NULL,
    source_kind       TEXT    NOT NULL,
    source_path       TEXT    NOT NULL,
    provider          TEXT    NOT NULL,
    status            TEXT    NOT NULL,
    total_batches     INTEGER NOT NULL DEFAULT 0,
    batches_completed INTEGER NOT NULL DEFAULT 0,
    metadata          TEXT    NOT NULL DEFAULT '{}',
    prompt_version_id INTEGER REFERENCES prompt_versions(id),
    created_at        TEXT    NOT NULL,
    completed_at      TEXT,
    CHECK (batches_completed <= total_batches)
);
CREATE INDEX idx_sessions_status ON sessions (status);

CREATE TABLE cards (
    id             INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id     INTEGER NOT NULL REFERENCES sessions(id) ON DELETE CASCADE,
    front          TEXT    NOT NULL,
    back           TEXT    NOT NULL,
    tags           TEXT    NOT NULL DEFAULT '[]',
    status         TEXT    NOT NULL,
    original_front TEXT,
    original_back  TEXT,
    chunk_index    INTEGER NOT NULL,
    created_at     TEXT    NOT NULL,
    reviewed_at    TEXT
);
CREATE INDEX idx_cards_session ON cards (session_id, status);

CREATE TABLE card_images (
    id                INTEGER PRIMARY KEY AUTOINCREMENT,
    card_id           INTEGER NOT NULL REFERENCES cards(id) ON DELETE CASCADE,
    session_id        INTEGER NOT NULL REFERENCES sessions(id) ON DELETE CASCADE,
    original_filename TEXT    NOT NULL,
    stored_filename   TEXT    NOT NULL,
    media_type        TEXT    NOT NULL,
    byte_size         INTEGER NOT NULL
);
CREATE INDEX idx_card_images_card ON card_images (card_id);

CREATE TABLE card_rejections (
    id             INTEGER PRIMARY KEY AUTOINCREMENT,
    card_id        INTEGER NOT NULL REFERENCES cards(id) ON DELETE CASCADE,
    reason         TEXT    NOT NULL,
    rejection_type TEXT    NOT NULL,
    auto_corrected INTEGER NOT NULL DEFAULT 0,
    created_at     TEXT    NOT NULL
);
CREATE INDEX idx_card_rejections_card ON card_rejections (card_id, created_at);

CREATE TABLE prompt_suggestions (
    id                             INTEGER PRIMARY KEY AUTOINCREMENT,
    prompt_version_id              INTEGER NOT NULL REFERENCES prompt_versions(id),
    session_id                     INTEGER NOT NULL REFERENCES sessions(id) ON DELETE CASCADE,
    suggested_system_prompt        TEXT    NOT NULL,
    suggested_user_prompt_template TEXT    NOT NULL,
    reasoning                      TEXT    NOT NULL,
    patterns                       TEXT    NOT NULL DEFAULT '{}',
    status                         TEXT    NOT NULL,
    created_at                     TEXT    NOT NULL,
    reviewed_at                    TEXT
);
"#];

/// Handle to the embedded database. Cheap to clone.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store").finish_non_exhaustive()
    }
}

impl Store {
    /// Open (or create) the database file and bring its schema up to date.
    pub fn open(path: &Path) -> Result<Self, ForgeError> {
        info!("Opening card store at {}", path.display());
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ForgeError::io(parent, e))?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "PRAGMA foreign_keys = ON;
             PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA busy_timeout = 5000;",
        )?;
        Self::initialize(conn)
    }

    /// Private in-memory database, used by tests and dry runs.
    pub fn open_in_memory() -> Result<Self, ForgeError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Self::initialize(conn)
    }

    fn initialize(mut conn: Connection) -> Result<Self, ForgeError> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS schema_version (
                version    INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )",
            [],
        )?;
        let current: i64 = conn
            .query_row("SELECT MAX(version) FROM schema_version", [], |row| {
                row.get::<_, Option<i64>>(0)
            })
            .optional()?
            .flatten()
            .unwrap_or(0);

        for (idx, sql) in MIGRATIONS.iter().enumerate() {
            let version = idx as i64 + 1;
            if version <= current {
                continue;
            }
            let tx = conn.transaction()?;
            tx.execute_batch(sql)?;
            tx.execute("INSERT INTO schema_version (version) VALUES (?1)", [version])?;
            tx.commit()?;
            debug!("Applied schema migration {}", version);
        }

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` with exclusive access to the connection.
    pub(crate) fn with_conn<T>(
        &self,
        f: impl FnOnce(&mut Connection) -> Result<T, ForgeError>,
    ) -> Result<T, ForgeError> {
        let mut guard = self
            .conn
            .lock()
            .map_err(|_| ForgeError::Internal("card store lock poisoned".into()))?;
        f(&mut guard)
    }
}

/// Decode a JSON TEXT column.
pub(crate) fn json_column<T: DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let text: String = row.get(idx)?;
    serde_json::from_str(&text)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// Decode a non-negative INTEGER column into `usize`.
pub(crate) fn count_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<usize> {
    let n: i64 = row.get(idx)?;
    Ok(n.max(0) as usize)
}
