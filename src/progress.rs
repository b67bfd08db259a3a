//! Progress-callback trait for per-batch generation events.
//!
//! Inject an [`Arc<dyn GenerationProgressCallback>`] via
//! [`crate::config::ForgeConfigBuilder::progress_callback`] to receive events
//! as the orchestrator works through a session's batches.
//!
//! Generation runs as a detached background task, so a callback is the
//! least invasive way to surface progress: the host forwards events to a
//! terminal progress bar, a channel or a log without the library knowing
//! how it communicates.
//!
//! # Example
//!
//! ```rust
//! use edgequake_cards::{ForgeConfig, GenerationProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CardCounter {
//!     cards: AtomicUsize,
//! }
//!
//! impl GenerationProgressCallback for CardCounter {
//!     fn on_batch_complete(&self, _session: i64, _batch: usize, _total: usize, cards: usize) {
//!         self.cards.fetch_add(cards, Ordering::SeqCst);
//!     }
//! }
//!
//! let counter = Arc::new(CardCounter { cards: AtomicUsize::new(0) });
//! let config = ForgeConfig::builder()
//!     .progress_callback(counter as Arc<dyn GenerationProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the orchestrator as it processes each batch.
///
/// Batches within one session run strictly in order, but callbacks from
/// different sessions may interleave on different threads. All methods have
/// default no-op implementations.
pub trait GenerationProgressCallback: Send + Sync {
    /// Called once the batches of a run are known.
    fn on_generation_start(&self, session_id: i64, total_batches: usize) {
        let _ = (session_id, total_batches);
    }

    /// Called just before the model request for a batch is sent.
    ///
    /// # Arguments
    /// * `batch`: 1-indexed batch ordinal within this run
    fn on_batch_start(&self, session_id: i64, batch: usize, total_batches: usize) {
        let _ = (session_id, batch, total_batches);
    }

    /// Called when a batch's cards have been committed.
    fn on_batch_complete(&self, session_id: i64, batch: usize, total_batches: usize, cards: usize) {
        let _ = (session_id, batch, total_batches, cards);
    }

    /// Called when a batch fails. The run continues with the next batch.
    fn on_batch_error(&self, session_id: i64, batch: usize, total_batches: usize, error: &str) {
        let _ = (session_id, batch, total_batches, error);
    }

    /// Called once after every batch has been attempted.
    ///
    /// # Arguments
    /// * `new_cards`: cards created by this run, not the session total
    fn on_generation_complete(&self, session_id: i64, total_batches: usize, new_cards: usize) {
        let _ = (session_id, total_batches, new_cards);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl GenerationProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ForgeConfig`].
pub type ProgressCallback = Arc<dyn GenerationProgressCallback>;
