//! Pipeline stages that turn a document into model-ready work units.
//!
//! Each submodule implements exactly one step. Keeping stages separate makes
//! each independently testable and keeps pdfium, filesystem and text
//! handling out of the orchestrator.
//!
//! ## Data Flow
//!
//! ```text
//!                    ┌─▶ pdf ──▶ images ─┐
//! input ─▶ (PDF) ────┤                   ├─▶ batch ─▶ encode ─▶ model
//!                    └─▶ pdf ──▶ chunk ──┘
//!       ─▶ (Markdown) ─▶ markdown ─▶ images ─────────▶ encode ─▶ model
//! ```
//!
//! 1. [`input`]:     validate the path and decide PDF vs Markdown
//! 2. [`pdf`]:       pdfium access in `spawn_blocking`: metadata, outline,
//!    text, embedded images, page subsets
//! 3. [`images`]:    filter and name extracted images, store them under a
//!    session prefix, reconcile `[IMAGE: …]` references
//! 4. [`markdown`]:  catalog `![alt](path)` references, split on headings
//! 5. [`chunk`]:     text cleanup and size-bounded chunks for providers
//!    without native document ingestion
//! 6. [`batch`]:     overlapping page windows for native ingestion
//! 7. [`encode`]:    base64-wrap documents and images for the request body

pub mod batch;
pub mod chunk;
pub mod encode;
pub mod images;
pub mod input;
pub mod markdown;
pub mod pdf;
