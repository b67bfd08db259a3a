//! # edgequake-cards
//!
//! Turn PDF and Markdown documents into spaced-repetition flashcards with
//! LLMs, review them, and let the reviews improve the generation prompt.
//!
//! ## Why this crate?
//!
//! Asking a model for "flashcards from this book" in one shot produces a
//! wall of duplicated, over-broad questions and silently drops whatever does
//! not fit the context window. This crate walks the document in small,
//! overlapping page batches (or heading sections for Markdown), tells the
//! model which pages it has already seen, keeps diagrams attached to the
//! cards that reference them, and records every human rejection so the next
//! prompt version learns from it.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF / Markdown
//!  │
//!  ├─ 1. Register  validate source, pick native-document or text path
//!  ├─ 2. Plan      page batches (size 10, overlap 1) or text/heading chunks
//!  ├─ 3. Images    extract, filter, store under a per-session prefix
//!  ├─ 4. Generate  prompt → model → JSON cards, one batch at a time
//!  ├─ 5. Persist   cards + image links committed per batch
//!  ├─ 6. Review    approve / reject / edit / auto-correct
//!  └─ 7. Evolve    rejection patterns → suggested prompt version
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_cards::{App, ForgeConfig, PageSelection};
//! use std::path::Path;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected from ANTHROPIC_API_KEY / OPENAI_API_KEY / ...
//!     let app = App::open(ForgeConfig::builder().data_dir("data").build()?)?;
//!     let session = app
//!         .generator()
//!         .register_pdf(Path::new("biology.pdf"), PageSelection::All, None)
//!         .await?;
//!     app.start_generation(session.id)?.wait().await?;
//!
//!     for card in app.store().list_cards(session.id, None)? {
//!         println!("Q: {}\nA: {}\n", card.front, card.back);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `cards` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! edgequake-cards = { version = "0.1", default-features = false }
//! ```
//!
//! ## Providers
//!
//! | Provider | Native PDF | Images | Notes |
//! |----------|-----------|--------|-------|
//! | `anthropic` | yes | yes | Sends page subsets as documents; best for diagrams and tables |
//! | `openai`, `gemini`, `mistral`, `ollama`, ... | no | yes | Extracted text per chunk; Markdown with images supported |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod app;
pub mod config;
pub mod error;
pub mod evolution;
pub mod generate;
pub mod llm;
pub mod model;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod review;
pub mod store;
pub mod tasks;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use app::App;
pub use config::{ForgeConfig, ForgeConfigBuilder, PageSelection};
pub use error::{BatchError, ForgeError, ProviderError};
pub use evolution::PromptEvolutionAdvisor;
pub use generate::Generator;
pub use llm::{AnthropicProvider, Attachment, CompletionRequest, EdgequakeProvider, ModelClient, ModelProvider};
pub use model::{
    Card, CardImage, CardRejection, CardStatus, PromptSuggestion, PromptType, PromptVersion,
    RejectionType, Session, SessionMetadata, SessionStats, SessionStatus, SourceKind,
};
pub use pipeline::pdf::{Chapter, PdfEngine, PdfInfo, PdfiumEngine};
pub use progress::{GenerationProgressCallback, NoopProgressCallback, ProgressCallback};
pub use review::{BatchOutcome, ImprovedCard, ReviewWorkflow};
pub use store::Store;
pub use tasks::{Job, JobHandle, TaskQueue};
