//! Persisted records: sessions, cards, images, rejections and prompt versions.
//!
//! These are plain data carriers. State transitions live in the modules that
//! own them ([`crate::generate`] for sessions, [`crate::review`] for cards,
//! [`crate::evolution`] for prompt versions); the store only reads and writes.

use crate::config::PageSelection;
use chrono::{DateTime, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Lower-case string enums stored as TEXT columns.
macro_rules! text_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(format!("unknown {}: '{}'", stringify!($name), other)),
                }
            }
        }

        impl ToSql for $name {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.as_str()))
            }
        }

        impl FromSql for $name {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                let text = value.as_str()?;
                text.parse()
                    .map_err(|e: String| FromSqlError::Other(e.into()))
            }
        }
    };
}

// ── Sessions ─────────────────────────────────────────────────────────────

/// Lifecycle of a document-to-cards run.
///
/// ```text
/// PENDING ─▶ PROCESSING ─▶ READY ─▶ FINALIZED
///                │  ▲        │
///                ▼  └────────┘ (continuation)
///              FAILED
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Pending,
    Processing,
    Ready,
    Failed,
    Finalized,
}

text_enum!(SessionStatus {
    Pending => "pending",
    Processing => "processing",
    Ready => "ready",
    Failed => "failed",
    Finalized => "finalized",
});

impl SessionStatus {
    /// Whether initial generation may start from this state.
    ///
    /// FAILED sessions may be retried.
    pub fn can_start_generation(self) -> bool {
        matches!(self, SessionStatus::Pending | SessionStatus::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Pdf,
    Markdown,
}

text_enum!(SourceKind {
    Pdf => "pdf",
    Markdown => "markdown",
});

/// The free-form JSON bag attached to a session.
///
/// Known keys are typed; anything else round-trips through `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionMetadata {
    /// Page or chapter selection requested at registration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selection: Option<PageSelection>,
    /// Resolved 0-indexed pages used by the last run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_pages: Option<Vec<usize>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_count: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Send the PDF itself to the model rather than extracted text.
    #[serde(default)]
    pub use_native_document: bool,
    /// Directory Markdown image references are resolved against.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_dir: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_strategy: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extracted_image_count: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cards_generated: Option<usize>,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub continue_generation_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_continue_new_cards: Option<usize>,
    /// Every batch error of the last run, in order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
    /// Human-readable failure summary. Always set when the session is FAILED.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

fn is_zero(n: &usize) -> bool {
    *n == 0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: i64,
    /// Original file name as uploaded, used to derive the deck tag.
    pub filename: String,
    pub source_kind: SourceKind,
    /// Stable path to the document bytes.
    pub source_path: PathBuf,
    /// Provider chosen at registration ("anthropic", "openai", ...).
    pub provider: String,
    pub status: SessionStatus,
    pub total_batches: usize,
    pub batches_completed: usize,
    pub metadata: SessionMetadata,
    pub prompt_version_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Session {
    /// Deck tag: card tag and stored-image filename prefix.
    pub fn deck_tag(&self) -> String {
        deck_tag(&self.filename)
    }

    /// Prefix for every image file this session writes.
    ///
    /// Includes the session id so two uploads of the same file never
    /// collide in the shared image directory.
    pub fn image_prefix(&self) -> String {
        format!("{}_{}", self.deck_tag(), self.id)
    }
}

/// Sanitise a document name into a deck identifier.
///
/// The extension is dropped, every run of characters outside
/// `[A-Za-z0-9_-]` becomes one underscore, and the result is trimmed.
pub fn deck_tag(filename: &str) -> String {
    let stem = std::path::Path::new(filename)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(filename);

    let mut out = String::with_capacity(stem.len());
    let mut last_underscore = false;
    for c in stem.chars() {
        if c.is_ascii_alphanumeric() || c == '-' {
            out.push(c);
            last_underscore = false;
        } else if !last_underscore {
            out.push('_');
            last_underscore = true;
        }
    }
    let trimmed = out.trim_matches('_');
    if trimmed.is_empty() {
        "deck".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Input for [`crate::store::Store::create_session`].
#[derive(Debug, Clone)]
pub struct NewSession {
    pub filename: String,
    pub source_kind: SourceKind,
    pub source_path: PathBuf,
    pub provider: String,
    pub metadata: SessionMetadata,
    pub prompt_version_id: Option<i64>,
}

/// Card counts for one session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStats {
    pub total: usize,
    pub pending: usize,
    pub approved: usize,
    pub rejected: usize,
    pub edited: usize,
    pub images: usize,
    /// Failure summary, or the last batch error of the latest run.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

// ── Cards ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CardStatus {
    Pending,
    Approved,
    Rejected,
    Edited,
}

text_enum!(CardStatus {
    Pending => "pending",
    Approved => "approved",
    Rejected => "rejected",
    Edited => "edited",
});

impl CardStatus {
    /// Cards that count as coverage for continuation runs.
    pub fn is_covered(self) -> bool {
        !matches!(self, CardStatus::Rejected)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Card {
    pub id: i64,
    pub session_id: i64,
    pub front: String,
    pub back: String,
    pub tags: Vec<String>,
    pub status: CardStatus,
    /// Write-once snapshot taken on the first edit or auto-correct.
    pub original_front: Option<String>,
    pub original_back: Option<String>,
    pub chunk_index: usize,
    pub created_at: DateTime<Utc>,
    pub reviewed_at: Option<DateTime<Utc>>,
}

impl Card {
    pub fn has_snapshot(&self) -> bool {
        self.original_front.is_some()
    }
}

/// A card about to be written, with the images it references.
#[derive(Debug, Clone, PartialEq)]
pub struct NewCard {
    pub front: String,
    pub back: String,
    pub tags: Vec<String>,
    pub images: Vec<NewCardImage>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CardImage {
    pub id: i64,
    pub card_id: i64,
    pub session_id: i64,
    /// Filename as the model referenced it.
    pub original_filename: String,
    /// Namespaced filename inside the image directory.
    pub stored_filename: String,
    pub media_type: String,
    pub byte_size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewCardImage {
    pub original_filename: String,
    pub stored_filename: String,
    pub media_type: String,
    pub byte_size: u64,
}

// ── Rejections ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionType {
    Unclear,
    Incorrect,
    TooComplex,
    Duplicate,
    Other,
}

text_enum!(RejectionType {
    Unclear => "unclear",
    Incorrect => "incorrect",
    TooComplex => "too_complex",
    Duplicate => "duplicate",
    Other => "other",
});

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CardRejection {
    pub id: i64,
    pub card_id: i64,
    pub reason: String,
    pub rejection_type: RejectionType,
    pub auto_corrected: bool,
    pub created_at: DateTime<Utc>,
}

// ── Prompt versions ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptType {
    Generation,
    Validation,
}

text_enum!(PromptType {
    Generation => "generation",
    Validation => "validation",
});

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptVersion {
    pub id: i64,
    pub prompt_type: PromptType,
    pub version: u32,
    pub system_prompt: String,
    pub user_prompt_template: String,
    pub is_active: bool,
    pub parent_version_id: Option<i64>,
    pub cards_generated: u64,
    pub cards_approved: u64,
    pub cards_rejected: u64,
    pub approval_rate: Option<f64>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SuggestionStatus {
    Pending,
    Approved,
    Rejected,
}

text_enum!(SuggestionStatus {
    Pending => "pending",
    Approved => "approved",
    Rejected => "rejected",
});

/// Rejection statistics for one session, stored with a suggestion.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RejectionPatterns {
    pub total_rejections: usize,
    pub type_distribution: std::collections::BTreeMap<String, usize>,
    pub sample_reasons: std::collections::BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptSuggestion {
    pub id: i64,
    pub prompt_version_id: i64,
    pub session_id: i64,
    pub suggested_system_prompt: String,
    pub suggested_user_prompt_template: String,
    pub reasoning: String,
    pub patterns: RejectionPatterns,
    pub status: SuggestionStatus,
    pub created_at: DateTime<Utc>,
    pub reviewed_at: Option<DateTime<Utc>>,
}
