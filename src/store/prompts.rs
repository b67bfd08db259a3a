//! Prompt version and prompt suggestion operations.

use super::{json_column, Store};
use crate::error::ForgeError;
use crate::model::{
    PromptSuggestion, PromptType, PromptVersion, RejectionPatterns, SuggestionStatus,
};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::info;

const VERSION_COLUMNS: &str = "id, prompt_type, version, system_prompt, user_prompt_template, \
     is_active, parent_version_id, cards_generated, cards_approved, cards_rejected, \
     approval_rate, created_at";

const SUGGESTION_COLUMNS: &str = "id, prompt_version_id, session_id, suggested_system_prompt, \
     suggested_user_prompt_template, reasoning, patterns, status, created_at, reviewed_at";

fn version_from_row(row: &Row<'_>) -> rusqlite::Result<PromptVersion> {
    let version: i64 = row.get(2)?;
    let generated: i64 = row.get(7)?;
    let approved: i64 = row.get(8)?;
    let rejected: i64 = row.get(9)?;
    Ok(PromptVersion {
        id: row.get(0)?,
        prompt_type: row.get(1)?,
        version: version.max(0) as u32,
        system_prompt: row.get(3)?,
        user_prompt_template: row.get(4)?,
        is_active: row.get(5)?,
        parent_version_id: row.get(6)?,
        cards_generated: generated.max(0) as u64,
        cards_approved: approved.max(0) as u64,
        cards_rejected: rejected.max(0) as u64,
        approval_rate: row.get(10)?,
        created_at: row.get(11)?,
    })
}

fn suggestion_from_row(row: &Row<'_>) -> rusqlite::Result<PromptSuggestion> {
    Ok(PromptSuggestion {
        id: row.get(0)?,
        prompt_version_id: row.get(1)?,
        session_id: row.get(2)?,
        suggested_system_prompt: row.get(3)?,
        suggested_user_prompt_template: row.get(4)?,
        reasoning: row.get(5)?,
        patterns: json_column(row, 6)?,
        status: row.get(7)?,
        created_at: row.get(8)?,
        reviewed_at: row.get(9)?,
    })
}

fn load_version(conn: &Connection, id: i64) -> rusqlite::Result<Option<PromptVersion>> {
    conn.query_row(
        &format!("SELECT {VERSION_COLUMNS} FROM prompt_versions WHERE id = ?1"),
        params![id],
        version_from_row,
    )
    .optional()
}

fn load_suggestion(conn: &Connection, id: i64) -> rusqlite::Result<Option<PromptSuggestion>> {
    conn.query_row(
        &format!("SELECT {SUGGESTION_COLUMNS} FROM prompt_suggestions WHERE id = ?1"),
        params![id],
        suggestion_from_row,
    )
    .optional()
}

/// Input for [`Store::create_suggestion`].
#[derive(Debug, Clone)]
pub struct NewSuggestion {
    pub prompt_version_id: i64,
    pub session_id: i64,
    pub suggested_system_prompt: String,
    pub suggested_user_prompt_template: String,
    pub reasoning: String,
    pub patterns: RejectionPatterns,
}

impl Store {
    /// Insert version 1 of each prompt type that has no versions yet.
    ///
    /// Returns how many versions were created.
    pub fn seed_prompts(
        &self,
        defaults: &[(PromptType, &str, &str)],
    ) -> Result<usize, ForgeError> {
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            let mut created = 0;
            for (prompt_type, system, user) in defaults {
                let existing: i64 = tx.query_row(
                    "SELECT COUNT(*) FROM prompt_versions WHERE prompt_type = ?1",
                    params![prompt_type],
                    |row| row.get(0),
                )?;
                if existing > 0 {
                    continue;
                }
                tx.execute(
                    "INSERT INTO prompt_versions
                        (prompt_type, version, system_prompt, user_prompt_template, is_active, created_at)
                     VALUES (?1, 1, ?2, ?3, 1, ?4)",
                    params![prompt_type, system, user, Utc::now()],
                )?;
                info!(prompt_type = %prompt_type, "Seeded initial prompt version");
                created += 1;
            }
            tx.commit()?;
            Ok(created)
        })
    }

    pub fn active_prompt(&self, prompt_type: PromptType) -> Result<Option<PromptVersion>, ForgeError> {
        self.with_conn(|conn| {
            Ok(conn
                .query_row(
                    &format!(
                        "SELECT {VERSION_COLUMNS} FROM prompt_versions
                         WHERE prompt_type = ?1 AND is_active = 1"
                    ),
                    params![prompt_type],
                    version_from_row,
                )
                .optional()?)
        })
    }

    pub fn get_prompt_version(&self, id: i64) -> Result<Option<PromptVersion>, ForgeError> {
        self.with_conn(|conn| Ok(load_version(conn, id)?))
    }

    /// Every version of a type, newest first.
    pub fn prompt_history(&self, prompt_type: PromptType) -> Result<Vec<PromptVersion>, ForgeError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {VERSION_COLUMNS} FROM prompt_versions
                 WHERE prompt_type = ?1 ORDER BY version DESC"
            ))?;
            let rows = stmt.query_map(params![prompt_type], version_from_row)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }

    /// Add to a version's running counters and recompute its approval rate.
    pub fn add_prompt_metrics(
        &self,
        id: i64,
        generated: usize,
        approved: usize,
        rejected: usize,
    ) -> Result<(), ForgeError> {
        self.with_conn(|conn| {
            let n = conn.execute(
                "UPDATE prompt_versions
                 SET cards_generated = cards_generated + ?2,
                     cards_approved  = cards_approved + ?3,
                     cards_rejected  = cards_rejected + ?4,
                     approval_rate   = CASE
                         WHEN cards_approved + ?3 + cards_rejected + ?4 > 0
                         THEN CAST(cards_approved + ?3 AS REAL)
                              / (cards_approved + ?3 + cards_rejected + ?4)
                         ELSE approval_rate END
                 WHERE id = ?1",
                params![id, generated as i64, approved as i64, rejected as i64],
            )?;
            if n == 0 {
                return Err(ForgeError::NotFound {
                    entity: "Prompt version",
                    id,
                });
            }
            Ok(())
        })
    }

    pub fn create_suggestion(&self, new: &NewSuggestion) -> Result<PromptSuggestion, ForgeError> {
        let patterns = serde_json::to_string(&new.patterns)?;
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO prompt_suggestions
                    (prompt_version_id, session_id, suggested_system_prompt,
                     suggested_user_prompt_template, reasoning, patterns, status, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    new.prompt_version_id,
                    new.session_id,
                    new.suggested_system_prompt,
                    new.suggested_user_prompt_template,
                    new.reasoning,
                    patterns,
                    SuggestionStatus::Pending,
                    Utc::now(),
                ],
            )?;
            let id = conn.last_insert_rowid();
            load_suggestion(conn, id)?.ok_or(ForgeError::NotFound {
                entity: "Suggestion",
                id,
            })
        })
    }

    pub fn get_suggestion(&self, id: i64) -> Result<Option<PromptSuggestion>, ForgeError> {
        self.with_conn(|conn| Ok(load_suggestion(conn, id)?))
    }

    pub fn pending_suggestions(&self) -> Result<Vec<PromptSuggestion>, ForgeError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SUGGESTION_COLUMNS} FROM prompt_suggestions
                 WHERE status = ?1 ORDER BY created_at DESC, id DESC"
            ))?;
            let rows = stmt.query_map(params![SuggestionStatus::Pending], suggestion_from_row)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }

    /// Turn a pending suggestion into the new active version of its type.
    ///
    /// In one transaction: the new version gets `max(version) + 1`, every
    /// other version of the type is deactivated, and the suggestion is marked
    /// approved.
    pub fn approve_suggestion(&self, suggestion_id: i64) -> Result<PromptVersion, ForgeError> {
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            let suggestion = load_suggestion(&tx, suggestion_id)?.ok_or(ForgeError::NotFound {
                entity: "Suggestion",
                id: suggestion_id,
            })?;
            if suggestion.status != SuggestionStatus::Pending {
                return Err(ForgeError::InvalidTransition {
                    entity: "suggestion",
                    state: suggestion.status.to_string(),
                    action: "approve",
                });
            }
            let parent = load_version(&tx, suggestion.prompt_version_id)?.ok_or(
                ForgeError::NotFound {
                    entity: "Prompt version",
                    id: suggestion.prompt_version_id,
                },
            )?;

            let next: i64 = tx.query_row(
                "SELECT COALESCE(MAX(version), 0) + 1 FROM prompt_versions WHERE prompt_type = ?1",
                params![parent.prompt_type],
                |row| row.get(0),
            )?;
            tx.execute(
                "UPDATE prompt_versions SET is_active = 0 WHERE prompt_type = ?1",
                params![parent.prompt_type],
            )?;
            let now = Utc::now();
            tx.execute(
                "INSERT INTO prompt_versions
                    (prompt_type, version, system_prompt, user_prompt_template, is_active,
                     parent_version_id, created_at)
                 VALUES (?1, ?2, ?3, ?4, 1, ?5, ?6)",
                params![
                    parent.prompt_type,
                    next,
                    suggestion.suggested_system_prompt,
                    suggestion.suggested_user_prompt_template,
                    parent.id,
                    now,
                ],
            )?;
            let version_id = tx.last_insert_rowid();
            tx.execute(
                "UPDATE prompt_suggestions SET status = ?2, reviewed_at = ?3 WHERE id = ?1",
                params![suggestion_id, SuggestionStatus::Approved, now],
            )?;
            let created = load_version(&tx, version_id)?.ok_or(ForgeError::NotFound {
                entity: "Prompt version",
                id: version_id,
            })?;
            tx.commit()?;
            Ok(created)
        })
    }

    pub fn reject_suggestion(&self, suggestion_id: i64) -> Result<PromptSuggestion, ForgeError> {
        self.with_conn(|conn| {
            let suggestion = load_suggestion(conn, suggestion_id)?.ok_or(ForgeError::NotFound {
                entity: "Suggestion",
                id: suggestion_id,
            })?;
            if suggestion.status != SuggestionStatus::Pending {
                return Err(ForgeError::InvalidTransition {
                    entity: "suggestion",
                    state: suggestion.status.to_string(),
                    action: "reject",
                });
            }
            conn.execute(
                "UPDATE prompt_suggestions SET status = ?2, reviewed_at = ?3 WHERE id = ?1",
                params![suggestion_id, SuggestionStatus::Rejected, Utc::now()],
            )?;
            load_suggestion(conn, suggestion_id)?.ok_or(ForgeError::NotFound {
                entity: "Suggestion",
                id: suggestion_id,
            })
        })
    }
}
