//! Configuration types for flashcard generation.
//!
//! All behaviour is controlled through [`ForgeConfig`], built via its
//! [`ForgeConfigBuilder`]. Paths, size limits and provider settings live in
//! one explicitly constructed value that is handed to the store, the
//! orchestrator and the review workflow at startup. Nothing reads ambient
//! globals, so tests can point a config at a temp directory and a fake
//! provider.

use crate::error::ForgeError;
use crate::llm::ModelProvider;
use crate::pipeline::pdf::Chapter;
use crate::progress::GenerationProgressCallback;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Name of the SQLite database file inside [`ForgeConfig::data_dir`].
pub const DATABASE_FILE: &str = "cards.db";

/// Configuration for the whole flashcard pipeline.
///
/// # Example
/// ```rust
/// use edgequake_cards::ForgeConfig;
///
/// let config = ForgeConfig::builder()
///     .data_dir("/tmp/cards")
///     .batch_size(8)
///     .batch_overlap(2)
///     .provider_name("anthropic")
///     .build()
///     .unwrap();
/// assert_eq!(config.batch_size, 8);
/// ```
#[derive(Clone)]
pub struct ForgeConfig {
    /// Directory holding the database file. Default: `./data`.
    pub data_dir: PathBuf,

    /// Shared directory for stored card images. Default: `./data/images`.
    ///
    /// Several sessions write here concurrently; every stored filename is
    /// prefixed with the session's deck tag and id.
    pub image_dir: PathBuf,

    /// Shared directory for exports. Default: `./data/exports`.
    pub export_dir: PathBuf,

    /// Pages per native-document batch. Default: 10.
    ///
    /// Keeps each call far below the provider's page ceiling while giving
    /// reviewers small windows of cards to check.
    pub batch_size: usize,

    /// Pages repeated between consecutive batches. Default: 1. Must be < `batch_size`.
    pub batch_overlap: usize,

    /// Character ceiling for text and Markdown chunks. Default: 3000.
    pub chunk_chars: usize,

    /// Images smaller than this in BOTH dimensions are dropped. Default: 50 px.
    pub min_image_size: u32,

    /// Existing cards listed in a continuation prompt. Default: 100.
    pub existing_cards_cap: usize,

    /// LLM provider name (e.g. "anthropic", "openai", "ollama").
    /// If None along with `provider`, resolved from the environment.
    pub provider_name: Option<String>,

    /// LLM model identifier. If None, uses provider default.
    pub model: Option<String>,

    /// Pre-constructed provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn ModelProvider>>,

    /// Sampling temperature. Default: 0.3.
    pub temperature: f32,

    /// Maximum output tokens per call. Default: 4096.
    ///
    /// A ten-page batch can yield forty cards; 1 000 tokens truncates the
    /// JSON array mid-object.
    pub max_tokens: usize,

    /// Round-trips allowed before malformed JSON becomes a terminal error. Default: 3.
    pub max_json_attempts: u32,

    /// Extra attempts after a rate-limit or overload response. Default: 5.
    pub max_rate_limit_retries: u32,

    /// Initial backoff in milliseconds, doubled per attempt. Default: 1000.
    pub retry_backoff_ms: u64,

    /// Ceiling for a single backoff sleep. Default: 60 000 ms.
    pub max_backoff_ms: u64,

    /// Per-call timeout in seconds. Default: 300.
    ///
    /// Large structured generations over a ten-page document routinely take
    /// more than a minute.
    pub api_timeout_secs: u64,

    /// Progress callback for batch events. Default: None.
    pub progress_callback: Option<Arc<dyn GenerationProgressCallback>>,
}

impl Default for ForgeConfig {
    fn default() -> Self {
        let data_dir = PathBuf::from("data");
        Self {
            image_dir: data_dir.join("images"),
            export_dir: data_dir.join("exports"),
            data_dir,
            batch_size: 10,
            batch_overlap: 1,
            chunk_chars: 3000,
            min_image_size: 50,
            existing_cards_cap: 100,
            provider_name: None,
            model: None,
            provider: None,
            temperature: 0.3,
            max_tokens: 4096,
            max_json_attempts: 3,
            max_rate_limit_retries: 5,
            retry_backoff_ms: 1000,
            max_backoff_ms: 60_000,
            api_timeout_secs: 300,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ForgeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ForgeConfig")
            .field("data_dir", &self.data_dir)
            .field("image_dir", &self.image_dir)
            .field("export_dir", &self.export_dir)
            .field("batch_size", &self.batch_size)
            .field("batch_overlap", &self.batch_overlap)
            .field("chunk_chars", &self.chunk_chars)
            .field("min_image_size", &self.min_image_size)
            .field("provider_name", &self.provider_name)
            .field("model", &self.model)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn ModelProvider>"))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("max_json_attempts", &self.max_json_attempts)
            .field("max_rate_limit_retries", &self.max_rate_limit_retries)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn GenerationProgressCallback>"),
            )
            .finish()
    }
}

impl ForgeConfig {
    /// Create a new builder for `ForgeConfig`.
    pub fn builder() -> ForgeConfigBuilder {
        ForgeConfigBuilder {
            config: Self::default(),
        }
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(DATABASE_FILE)
    }

    /// Label stored in session metadata, e.g. `10_pages_1_overlap`.
    pub fn batch_strategy(&self) -> String {
        format!("{}_pages_{}_overlap", self.batch_size, self.batch_overlap)
    }

    /// Create the data, image and export directories if missing.
    pub fn ensure_dirs(&self) -> Result<(), ForgeError> {
        for dir in [&self.data_dir, &self.image_dir, &self.export_dir] {
            std::fs::create_dir_all(dir).map_err(|e| ForgeError::io(dir.as_path(), e))?;
        }
        Ok(())
    }
}

/// Builder for [`ForgeConfig`].
#[derive(Debug)]
pub struct ForgeConfigBuilder {
    config: ForgeConfig,
}

impl ForgeConfigBuilder {
    /// Set the data directory. Image and export directories follow it
    /// unless set explicitly afterwards.
    pub fn data_dir(mut self, dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref().to_path_buf();
        self.config.image_dir = dir.join("images");
        self.config.export_dir = dir.join("exports");
        self.config.data_dir = dir;
        self
    }

    pub fn image_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.image_dir = dir.into();
        self
    }

    pub fn export_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.export_dir = dir.into();
        self
    }

    pub fn batch_size(mut self, n: usize) -> Self {
        self.config.batch_size = n.max(1);
        self
    }

    pub fn batch_overlap(mut self, n: usize) -> Self {
        self.config.batch_overlap = n;
        self
    }

    pub fn chunk_chars(mut self, n: usize) -> Self {
        self.config.chunk_chars = n.max(200);
        self
    }

    pub fn min_image_size(mut self, px: u32) -> Self {
        self.config.min_image_size = px;
        self
    }

    pub fn existing_cards_cap(mut self, n: usize) -> Self {
        self.config.existing_cards_cap = n;
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn ModelProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn max_json_attempts(mut self, n: u32) -> Self {
        self.config.max_json_attempts = n.max(1);
        self
    }

    pub fn max_rate_limit_retries(mut self, n: u32) -> Self {
        self.config.max_rate_limit_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn max_backoff_ms(mut self, ms: u64) -> Self {
        self.config.max_backoff_ms = ms;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs.max(1);
        self
    }

    pub fn progress_callback(mut self, cb: Arc<dyn GenerationProgressCallback>) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ForgeConfig, ForgeError> {
        let c = &self.config;
        if c.batch_overlap >= c.batch_size {
            return Err(ForgeError::InvalidConfig(format!(
                "batch overlap ({}) must be smaller than batch size ({})",
                c.batch_overlap, c.batch_size
            )));
        }
        if c.max_backoff_ms < c.retry_backoff_ms {
            return Err(ForgeError::InvalidConfig(format!(
                "max backoff ({}ms) is below the initial backoff ({}ms)",
                c.max_backoff_ms, c.retry_backoff_ms
            )));
        }
        Ok(self.config)
    }
}

// ── Page selection ───────────────────────────────────────────────────────

/// Specifies which pages of a PDF feed generation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PageSelection {
    /// All pages (default).
    #[default]
    All,
    /// A contiguous range of pages (1-indexed, inclusive).
    Range(usize, usize),
    /// Specific pages (1-indexed, deduplicated).
    Set(Vec<usize>),
    /// Outline chapters (1-indexed), expanded to their page ranges.
    Chapters(Vec<usize>),
}

impl PageSelection {
    /// Expand the selection into a sorted, deduplicated list of 0-indexed
    /// page numbers. Out-of-range pages and unknown chapters are dropped.
    pub fn to_indices(&self, total_pages: usize, chapters: &[Chapter]) -> Vec<usize> {
        let mut indices: Vec<usize> = match self {
            PageSelection::All => (0..total_pages).collect(),
            PageSelection::Range(start, end) => {
                let s = (*start).max(1) - 1;
                let e = (*end).min(total_pages);
                (s..e).collect()
            }
            PageSelection::Set(pages) => pages
                .iter()
                .filter(|&&p| p >= 1 && p <= total_pages)
                .map(|p| p - 1)
                .collect(),
            PageSelection::Chapters(numbers) => numbers
                .iter()
                .filter_map(|n| n.checked_sub(1).and_then(|i| chapters.get(i)))
                .flat_map(|ch| ch.start_page.saturating_sub(1)..ch.end_page.min(total_pages))
                .collect(),
        };
        indices.sort_unstable();
        indices.dedup();
        indices
    }
}
