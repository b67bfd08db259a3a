//! Error types for the edgequake-cards library.
//!
//! Three error types reflect three distinct failure modes:
//!
//! * [`ForgeError`]: **Fatal** for the operation at hand. An unknown card id,
//!   a corrupt PDF, a provider that is not configured. Returned as
//!   `Err(ForgeError)` from every public entry point.
//!
//! * [`BatchError`]: **Non-fatal**. One batch of a generation run failed
//!   but the others are fine. Collected on the session so partial success
//!   survives a single bad batch.
//!
//! * [`ProviderError`]: the typed classification of what went wrong on the
//!   wire. The model client decides whether to back off and retry by
//!   asking [`ProviderError::is_retryable`], never by inspecting message text.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the edgequake-cards library.
#[derive(Debug, Error)]
pub enum ForgeError {
    // ── Lookup errors ─────────────────────────────────────────────────────
    /// A session, card, prompt version or suggestion id does not exist.
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    /// The requested action is not allowed from the record's current state.
    #[error("Cannot {action} while {entity} is {state}")]
    InvalidTransition {
        entity: &'static str,
        state: String,
        action: &'static str,
    },

    /// Auto-correct was requested for a card that was never rejected.
    #[error("Card {card_id} has no rejection history")]
    NoRejectionHistory { card_id: i64 },

    // ── Input errors ──────────────────────────────────────────────────────
    /// Source document was not found at the given path.
    #[error("Document not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// The file exists but is not a document this crate can ingest.
    #[error("Unsupported document '{path}': {reason}")]
    InvalidDocument { path: PathBuf, reason: String },

    /// Selected pages or chapters resolve to nothing.
    #[error("Selection is empty (document has {total} pages)")]
    EmptySelection { total: usize },

    // ── PDF errors ────────────────────────────────────────────────────────
    /// PDF header/trailer/xref is corrupt and cannot be parsed.
    #[error("PDF '{path}' is corrupt: {detail}")]
    CorruptPdf { path: PathBuf, detail: String },

    /// pdfium failed on a specific page.
    #[error("PDF operation failed on page {page}: {detail}")]
    PdfPageFailed { page: usize, detail: String },

    // ── LLM errors ────────────────────────────────────────────────────────
    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// The resolved provider lacks a capability this source requires.
    #[error("Provider '{provider}' cannot {capability}")]
    CapabilityMissing {
        provider: String,
        capability: &'static str,
    },

    /// The provider call failed after the rate-limit retry loop gave up.
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// The model never produced JSON matching the expected shape.
    #[error("Model returned invalid output after {attempts} attempts: {detail}")]
    InvalidModelOutput { attempts: u32, detail: String },

    // ── Storage errors ────────────────────────────────────────────────────
    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ForgeError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ForgeError::Io {
            path: path.into(),
            source,
        }
    }

    /// Lookup failures are recoverable validation errors for the caller.
    pub fn is_not_found(&self) -> bool {
        matches!(self, ForgeError::NotFound { .. })
    }
}

impl From<serde_json::Error> for ForgeError {
    fn from(e: serde_json::Error) -> Self {
        ForgeError::Internal(format!("JSON encoding failed: {e}"))
    }
}

/// Typed outcome of one failed provider round-trip.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    /// HTTP 429 or the provider's own rate-limit signal.
    ///
    /// `retry_after_secs` carries the server-specified delay when present.
    #[error("Rate limit exceeded for provider '{provider}'")]
    RateLimited {
        provider: String,
        retry_after_secs: Option<u64>,
    },

    /// The provider reports it is temporarily overloaded (HTTP 529/503).
    #[error("Provider '{provider}' is overloaded")]
    Overloaded { provider: String },

    /// The call exceeded the configured per-call timeout.
    #[error("API call timed out after {secs}s")]
    Timeout { secs: u64 },

    /// 401/403: retrying will not help.
    #[error("Authentication error from provider '{provider}': {detail}")]
    Auth { provider: String, detail: String },

    /// Any other non-success response.
    #[error("LLM API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// Connection refused, DNS failure, truncated body.
    #[error("Transport error: {0}")]
    Transport(String),
}

impl ProviderError {
    /// Whether the rate-limit loop should back off and try again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProviderError::RateLimited { .. } | ProviderError::Overloaded { .. }
        )
    }

    /// Server-requested delay, if any.
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            ProviderError::RateLimited {
                retry_after_secs, ..
            } => *retry_after_secs,
            _ => None,
        }
    }
}

/// A non-fatal error for a single generation batch.
///
/// Accumulated on the session while the remaining batches continue. The
/// session only fails when every batch errored and no card was produced.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize, PartialEq)]
pub enum BatchError {
    /// Reading pages, images or text for the batch failed.
    #[error("Batch {batch}: preparing content failed: {detail}")]
    PrepareFailed { batch: usize, detail: String },

    /// The model call failed after retries.
    #[error("Batch {batch}: generation failed: {detail}")]
    GenerationFailed { batch: usize, detail: String },

    /// Cards came back but could not be written.
    #[error("Batch {batch}: persisting cards failed: {detail}")]
    PersistFailed { batch: usize, detail: String },
}

impl BatchError {
    pub fn batch(&self) -> usize {
        match self {
            BatchError::PrepareFailed { batch, .. }
            | BatchError::GenerationFailed { batch, .. }
            | BatchError::PersistFailed { batch, .. } => *batch,
        }
    }
}

/// Human-readable summary stored in session metadata when a run fails.
///
/// A single error is kept verbatim; several collapse into a count.
pub fn summarize_errors(errors: &[BatchError]) -> Option<String> {
    match errors {
        [] => None,
        [only] => Some(only.to_string()),
        many => Some(format!("{} errors occurred", many.len())),
    }
}
