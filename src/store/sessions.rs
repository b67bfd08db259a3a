//! Session CRUD operations.

use super::{count_column, json_column, Store};
use crate::error::ForgeError;
use crate::model::{
    NewSession, Session, SessionMetadata, SessionStats, SessionStatus,
};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::PathBuf;
use tracing::warn;

const SESSION_COLUMNS: &str = "id, filename, source_kind, source_path, provider, status, \
     total_batches, batches_completed, metadata, prompt_version_id, created_at, completed_at";

fn session_from_row(row: &Row<'_>) -> rusqlite::Result<Session> {
    let path: String = row.get(3)?;
    Ok(Session {
        id: row.get(0)?,
        filename: row.get(1)?,
        source_kind: row.get(2)?,
        source_path: PathBuf::from(path),
        provider: row.get(4)?,
        status: row.get(5)?,
        total_batches: count_column(row, 6)?,
        batches_completed: count_column(row, 7)?,
        metadata: json_column(row, 8)?,
        prompt_version_id: row.get(9)?,
        created_at: row.get(10)?,
        completed_at: row.get(11)?,
    })
}

pub(crate) fn load_session(conn: &Connection, id: i64) -> rusqlite::Result<Option<Session>> {
    conn.query_row(
        &format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?1"),
        params![id],
        session_from_row,
    )
    .optional()
}

impl Store {
    /// Register a new session in PENDING state.
    pub fn create_session(&self, new: &NewSession) -> Result<Session, ForgeError> {
        let metadata = serde_json::to_string(&new.metadata)?;
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO sessions (filename, source_kind, source_path, provider, status,
                                       metadata, prompt_version_id, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    new.filename,
                    new.source_kind,
                    new.source_path.to_string_lossy(),
                    new.provider,
                    SessionStatus::Pending,
                    metadata,
                    new.prompt_version_id,
                    Utc::now(),
                ],
            )?;
            let id = conn.last_insert_rowid();
            load_session(conn, id)?.ok_or(ForgeError::NotFound {
                entity: "Session",
                id,
            })
        })
    }

    pub fn get_session(&self, id: i64) -> Result<Option<Session>, ForgeError> {
        self.with_conn(|conn| Ok(load_session(conn, id)?))
    }

    /// Like [`Store::get_session`] but a missing row is an error.
    pub fn require_session(&self, id: i64) -> Result<Session, ForgeError> {
        self.get_session(id)?.ok_or(ForgeError::NotFound {
            entity: "Session",
            id,
        })
    }

    /// All sessions, newest first.
    pub fn list_sessions(&self) -> Result<Vec<Session>, ForgeError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SESSION_COLUMNS} FROM sessions ORDER BY created_at DESC, id DESC"
            ))?;
            let rows = stmt.query_map([], session_from_row)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }

    /// Move a session into PROCESSING for a run of `total_batches` batches.
    ///
    /// Only succeeds if the session is currently in one of `from`; the check
    /// and the update happen under one lock so two runs cannot both start.
    pub fn begin_run(
        &self,
        id: i64,
        from: &[SessionStatus],
        total_batches: usize,
    ) -> Result<Session, ForgeError> {
        self.with_conn(|conn| {
            let session = load_session(conn, id)?.ok_or(ForgeError::NotFound {
                entity: "Session",
                id,
            })?;
            if !from.contains(&session.status) {
                return Err(ForgeError::InvalidTransition {
                    entity: "session",
                    state: session.status.to_string(),
                    action: "start generation",
                });
            }
            conn.execute(
                "UPDATE sessions
                 SET status = ?2, total_batches = ?3, batches_completed = 0, completed_at = NULL
                 WHERE id = ?1",
                params![id, SessionStatus::Processing, total_batches as i64],
            )?;
            load_session(conn, id)?.ok_or(ForgeError::NotFound {
                entity: "Session",
                id,
            })
        })
    }

    /// Correct the batch count once the run's batches are known.
    pub fn set_total_batches(&self, id: i64, total_batches: usize) -> Result<(), ForgeError> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE sessions SET total_batches = ?2, batches_completed = 0 WHERE id = ?1",
                params![id, total_batches as i64],
            )?;
            Ok(())
        })
    }

    pub fn update_metadata(&self, id: i64, metadata: &SessionMetadata) -> Result<(), ForgeError> {
        let json = serde_json::to_string(metadata)?;
        self.with_conn(|conn| {
            let n = conn.execute(
                "UPDATE sessions SET metadata = ?2 WHERE id = ?1",
                params![id, json],
            )?;
            if n == 0 {
                return Err(ForgeError::NotFound {
                    entity: "Session",
                    id,
                });
            }
            Ok(())
        })
    }

    /// Record the terminal outcome of a run.
    pub fn finish_run(
        &self,
        id: i64,
        status: SessionStatus,
        metadata: &SessionMetadata,
        completed_at: DateTime<Utc>,
    ) -> Result<(), ForgeError> {
        let json = serde_json::to_string(metadata)?;
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE sessions SET status = ?2, metadata = ?3, completed_at = ?4 WHERE id = ?1",
                params![id, status, json, completed_at],
            )?;
            Ok(())
        })
    }

    /// Plain status change guarded by the expected current status.
    pub fn transition_session(
        &self,
        id: i64,
        from: SessionStatus,
        to: SessionStatus,
        action: &'static str,
    ) -> Result<Session, ForgeError> {
        self.with_conn(|conn| {
            let session = load_session(conn, id)?.ok_or(ForgeError::NotFound {
                entity: "Session",
                id,
            })?;
            if session.status != from {
                return Err(ForgeError::InvalidTransition {
                    entity: "session",
                    state: session.status.to_string(),
                    action,
                });
            }
            conn.execute(
                "UPDATE sessions SET status = ?2 WHERE id = ?1",
                params![id, to],
            )?;
            load_session(conn, id)?.ok_or(ForgeError::NotFound {
                entity: "Session",
                id,
            })
        })
    }

    /// Delete a session; cards, images, rejections and suggestions cascade.
    pub fn delete_session(&self, id: i64) -> Result<bool, ForgeError> {
        self.with_conn(|conn| {
            Ok(conn.execute("DELETE FROM sessions WHERE id = ?1", params![id])? > 0)
        })
    }

    /// Force every PROCESSING session to FAILED.
    ///
    /// Run once at startup, before any background work is accepted: nothing
    /// can legitimately be processing yet. Returns the number of sessions
    /// recovered.
    pub fn recover_stuck_sessions(&self) -> Result<usize, ForgeError> {
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            let stuck: Vec<Session> = {
                let mut stmt = tx.prepare(&format!(
                    "SELECT {SESSION_COLUMNS} FROM sessions WHERE status = ?1"
                ))?;
                let rows = stmt.query_map(params![SessionStatus::Processing], session_from_row)?;
                rows.collect::<rusqlite::Result<Vec<_>>>()?
            };

            let now = Utc::now();
            for session in &stuck {
                let mut metadata = session.metadata.clone();
                metadata.error = Some(
                    "Processing was interrupted by a restart; generation did not complete"
                        .to_string(),
                );
                tx.execute(
                    "UPDATE sessions SET status = ?2, metadata = ?3, completed_at = ?4
                     WHERE id = ?1",
                    params![
                        session.id,
                        SessionStatus::Failed,
                        serde_json::to_string(&metadata)?,
                        now
                    ],
                )?;
                warn!(session_id = session.id, "Recovered session stuck in processing");
            }
            tx.commit()?;
            Ok(stuck.len())
        })
    }

    pub fn session_stats(&self, id: i64) -> Result<SessionStats, ForgeError> {
        self.with_conn(|conn| {
            let mut stats = SessionStats::default();
            let mut stmt =
                conn.prepare("SELECT status, COUNT(*) FROM cards WHERE session_id = ?1 GROUP BY status")?;
            let rows = stmt.query_map(params![id], |row| {
                Ok((row.get::<_, String>(0)?, count_column(row, 1)?))
            })?;
            for row in rows {
                let (status, n) = row?;
                match status.as_str() {
                    "pending" => stats.pending = n,
                    "approved" => stats.approved = n,
                    "rejected" => stats.rejected = n,
                    "edited" => stats.edited = n,
                    _ => {}
                }
                stats.total += n;
            }
            stats.images = conn.query_row(
                "SELECT COUNT(*) FROM card_images WHERE session_id = ?1",
                params![id],
                |row| count_column(row, 0),
            )?;
            let metadata: Option<SessionMetadata> = conn
                .query_row("SELECT metadata FROM sessions WHERE id = ?1", params![id], |row| {
                    json_column(row, 0)
                })
                .optional()?;
            if let Some(metadata) = metadata {
                stats.last_error = metadata.error.or_else(|| metadata.errors.last().cloned());
            }
            Ok(stats)
        })
    }
}
