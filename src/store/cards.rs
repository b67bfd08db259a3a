//! Card, card image and rejection operations.

use super::{count_column, json_column, Store};
use crate::error::ForgeError;
use crate::model::{Card, CardImage, CardRejection, CardStatus, NewCard, RejectionType};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};

const CARD_COLUMNS: &str = "id, session_id, front, back, tags, status, original_front, \
     original_back, chunk_index, created_at, reviewed_at";

const REJECTION_COLUMNS: &str = "id, card_id, reason, rejection_type, auto_corrected, created_at";

fn card_from_row(row: &Row<'_>) -> rusqlite::Result<Card> {
    Ok(Card {
        id: row.get(0)?,
        session_id: row.get(1)?,
        front: row.get(2)?,
        back: row.get(3)?,
        tags: json_column(row, 4)?,
        status: row.get(5)?,
        original_front: row.get(6)?,
        original_back: row.get(7)?,
        chunk_index: count_column(row, 8)?,
        created_at: row.get(9)?,
        reviewed_at: row.get(10)?,
    })
}

fn rejection_from_row(row: &Row<'_>) -> rusqlite::Result<CardRejection> {
    Ok(CardRejection {
        id: row.get(0)?,
        card_id: row.get(1)?,
        reason: row.get(2)?,
        rejection_type: row.get(3)?,
        auto_corrected: row.get(4)?,
        created_at: row.get(5)?,
    })
}

fn image_from_row(row: &Row<'_>) -> rusqlite::Result<CardImage> {
    let size: i64 = row.get(6)?;
    Ok(CardImage {
        id: row.get(0)?,
        card_id: row.get(1)?,
        session_id: row.get(2)?,
        original_filename: row.get(3)?,
        stored_filename: row.get(4)?,
        media_type: row.get(5)?,
        byte_size: size.max(0) as u64,
    })
}

fn load_card(conn: &Connection, id: i64) -> rusqlite::Result<Option<Card>> {
    conn.query_row(
        &format!("SELECT {CARD_COLUMNS} FROM cards WHERE id = ?1"),
        params![id],
        card_from_row,
    )
    .optional()
}

fn require(conn: &Connection, id: i64) -> Result<Card, ForgeError> {
    load_card(conn, id)?.ok_or(ForgeError::NotFound { entity: "Card", id })
}

impl Store {
    /// Write one batch's cards and their images, then bump the session's
    /// completed-batch counter, all in a single transaction.
    ///
    /// Returns the new card ids in insertion order.
    pub fn persist_batch(
        &self,
        session_id: i64,
        chunk_index: usize,
        cards: &[NewCard],
        batches_completed: usize,
    ) -> Result<Vec<i64>, ForgeError> {
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            let now = Utc::now();
            let mut ids = Vec::with_capacity(cards.len());
            for card in cards {
                tx.execute(
                    "INSERT INTO cards (session_id, front, back, tags, status, chunk_index, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    params![
                        session_id,
                        card.front,
                        card.back,
                        serde_json::to_string(&card.tags)?,
                        CardStatus::Pending,
                        chunk_index as i64,
                        now,
                    ],
                )?;
                let card_id = tx.last_insert_rowid();
                for image in &card.images {
                    tx.execute(
                        "INSERT INTO card_images (card_id, session_id, original_filename,
                                                  stored_filename, media_type, byte_size)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                        params![
                            card_id,
                            session_id,
                            image.original_filename,
                            image.stored_filename,
                            image.media_type,
                            image.byte_size as i64,
                        ],
                    )?;
                }
                ids.push(card_id);
            }
            tx.execute(
                "UPDATE sessions SET batches_completed = MIN(?2, total_batches) WHERE id = ?1",
                params![session_id, batches_completed as i64],
            )?;
            tx.commit()?;
            Ok(ids)
        })
    }

    /// Advance the completed-batch counter without writing cards.
    pub fn mark_batch_done(&self, session_id: i64, batches_completed: usize) -> Result<(), ForgeError> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE sessions SET batches_completed = MIN(?2, total_batches) WHERE id = ?1",
                params![session_id, batches_completed as i64],
            )?;
            Ok(())
        })
    }

    pub fn get_card(&self, id: i64) -> Result<Option<Card>, ForgeError> {
        self.with_conn(|conn| Ok(load_card(conn, id)?))
    }

    pub fn require_card(&self, id: i64) -> Result<Card, ForgeError> {
        self.with_conn(|conn| require(conn, id))
    }

    /// Cards of a session in generation order, optionally filtered by status.
    pub fn list_cards(
        &self,
        session_id: i64,
        status: Option<CardStatus>,
    ) -> Result<Vec<Card>, ForgeError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {CARD_COLUMNS} FROM cards
                 WHERE session_id = ?1 AND (?2 IS NULL OR status = ?2)
                 ORDER BY chunk_index, id"
            ))?;
            let rows = stmt.query_map(params![session_id, status], card_from_row)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }

    /// The most recent `cap` approved, pending or edited cards, oldest first.
    pub fn covered_cards(&self, session_id: i64, cap: usize) -> Result<Vec<Card>, ForgeError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {CARD_COLUMNS} FROM cards
                 WHERE session_id = ?1 AND status != ?2
                 ORDER BY created_at DESC, id DESC
                 LIMIT ?3"
            ))?;
            let rows = stmt.query_map(
                params![session_id, CardStatus::Rejected, cap as i64],
                card_from_row,
            )?;
            let mut cards = rows.collect::<rusqlite::Result<Vec<_>>>()?;
            cards.reverse();
            Ok(cards)
        })
    }

    /// Highest chunk index used so far, if the session has any cards.
    pub fn max_chunk_index(&self, session_id: i64) -> Result<Option<usize>, ForgeError> {
        self.with_conn(|conn| {
            let max: Option<i64> = conn.query_row(
                "SELECT MAX(chunk_index) FROM cards WHERE session_id = ?1",
                params![session_id],
                |row| row.get(0),
            )?;
            Ok(max.map(|m| m.max(0) as usize))
        })
    }

    pub fn count_cards(&self, session_id: i64) -> Result<usize, ForgeError> {
        self.with_conn(|conn| {
            Ok(conn.query_row(
                "SELECT COUNT(*) FROM cards WHERE session_id = ?1",
                params![session_id],
                |row| count_column(row, 0),
            )?)
        })
    }

    pub fn card_images(&self, card_id: i64) -> Result<Vec<CardImage>, ForgeError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, card_id, session_id, original_filename, stored_filename,
                        media_type, byte_size
                 FROM card_images WHERE card_id = ?1 ORDER BY id",
            )?;
            let rows = stmt.query_map(params![card_id], image_from_row)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }

    /// Set a card's status and stamp its review time.
    pub fn set_card_status(&self, id: i64, status: CardStatus) -> Result<Card, ForgeError> {
        self.with_conn(|conn| {
            let n = conn.execute(
                "UPDATE cards SET status = ?2, reviewed_at = ?3 WHERE id = ?1",
                params![id, status, Utc::now()],
            )?;
            if n == 0 {
                return Err(ForgeError::NotFound { entity: "Card", id });
            }
            require(conn, id)
        })
    }

    /// Mark a card rejected and append the audit record.
    pub fn reject_card(
        &self,
        id: i64,
        reason: &str,
        rejection_type: RejectionType,
    ) -> Result<CardRejection, ForgeError> {
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            let now = Utc::now();
            let n = tx.execute(
                "UPDATE cards SET status = ?2, reviewed_at = ?3 WHERE id = ?1",
                params![id, CardStatus::Rejected, now],
            )?;
            if n == 0 {
                return Err(ForgeError::NotFound { entity: "Card", id });
            }
            tx.execute(
                "INSERT INTO card_rejections (card_id, reason, rejection_type, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![id, reason, rejection_type, now],
            )?;
            let rejection_id = tx.last_insert_rowid();
            let rejection = tx.query_row(
                &format!("SELECT {REJECTION_COLUMNS} FROM card_rejections WHERE id = ?1"),
                params![rejection_id],
                rejection_from_row,
            )?;
            tx.commit()?;
            Ok(rejection)
        })
    }

    /// Replace a card's content, snapshotting the pristine text the first
    /// time only. `tags: None` leaves tags untouched.
    pub fn edit_card(
        &self,
        id: i64,
        front: &str,
        back: &str,
        tags: Option<&[String]>,
        status: CardStatus,
    ) -> Result<Card, ForgeError> {
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            let card = require(&tx, id)?;
            let tags_json = match tags {
                Some(t) => serde_json::to_string(t)?,
                None => serde_json::to_string(&card.tags)?,
            };
            tx.execute(
                "UPDATE cards
                 SET front = ?2, back = ?3, tags = ?4, status = ?5, reviewed_at = ?6,
                     original_front = COALESCE(original_front, ?7),
                     original_back  = COALESCE(original_back, ?8)
                 WHERE id = ?1",
                params![
                    id,
                    front,
                    back,
                    tags_json,
                    status,
                    Utc::now(),
                    card.front,
                    card.back
                ],
            )?;
            let updated = require(&tx, id)?;
            tx.commit()?;
            Ok(updated)
        })
    }

    /// Apply a model correction: new content, pending status, snapshot kept,
    /// triggering rejection flagged. One transaction.
    pub fn apply_correction(
        &self,
        card_id: i64,
        rejection_id: i64,
        front: &str,
        back: &str,
    ) -> Result<Card, ForgeError> {
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            let card = require(&tx, card_id)?;
            tx.execute(
                "UPDATE cards
                 SET front = ?2, back = ?3, status = ?4, reviewed_at = ?5,
                     original_front = COALESCE(original_front, ?6),
                     original_back  = COALESCE(original_back, ?7)
                 WHERE id = ?1",
                params![
                    card_id,
                    front,
                    back,
                    CardStatus::Pending,
                    Utc::now(),
                    card.front,
                    card.back
                ],
            )?;
            tx.execute(
                "UPDATE card_rejections SET auto_corrected = 1 WHERE id = ?1 AND card_id = ?2",
                params![rejection_id, card_id],
            )?;
            let updated = require(&tx, card_id)?;
            tx.commit()?;
            Ok(updated)
        })
    }

    /// The rejection with the newest timestamp (ties broken by id).
    pub fn latest_rejection(&self, card_id: i64) -> Result<Option<CardRejection>, ForgeError> {
        self.with_conn(|conn| {
            Ok(conn
                .query_row(
                    &format!(
                        "SELECT {REJECTION_COLUMNS} FROM card_rejections
                         WHERE card_id = ?1 ORDER BY created_at DESC, id DESC LIMIT 1"
                    ),
                    params![card_id],
                    rejection_from_row,
                )
                .optional()?)
        })
    }

    /// Latest rejection of every currently rejected card in a session.
    pub fn session_rejections(&self, session_id: i64) -> Result<Vec<CardRejection>, ForgeError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT r.id, r.card_id, r.reason, r.rejection_type, r.auto_corrected, r.created_at
                 FROM card_rejections r
                 JOIN cards c ON c.id = r.card_id
                 WHERE c.session_id = ?1 AND c.status = ?2
                   AND r.id = (SELECT r2.id FROM card_rejections r2
                               WHERE r2.card_id = r.card_id
                               ORDER BY r2.created_at DESC, r2.id DESC LIMIT 1)
                 ORDER BY r.id",
            )?;
            let rows = stmt.query_map(params![session_id, CardStatus::Rejected], rejection_from_row)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }
}
