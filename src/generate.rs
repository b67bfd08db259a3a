//! Generation orchestration: session registration, initial runs and
//! continuation runs.
//!
//! ## Three work-unit paths
//!
//! | Source   | Provider capability | Unit                 | Attachments          |
//! |----------|---------------------|----------------------|----------------------|
//! | PDF      | native documents    | overlapping page batch | page subset + images |
//! | PDF      | anything else       | text chunk           | none                 |
//! | Markdown | images required     | heading section      | referenced images    |
//!
//! Every path runs the same loop: assemble a prompt, call the model, attach
//! deck tag and stored images to each returned card and commit the batch.
//! Units run strictly in order because the context/new classification of a
//! page batch depends on the batches before it.
//!
//! ## Failure model
//!
//! A failed unit becomes a [`BatchError`] and the loop moves on. A run only
//! ends FAILED when the session has no cards at all and at least one unit
//! failed. Errors that stop a run before its first unit (missing document,
//! empty selection, provider not configured) still drive the session to a
//! terminal state, so nothing is left in PROCESSING.

use crate::config::{ForgeConfig, PageSelection};
use crate::error::{summarize_errors, BatchError, ForgeError};
use crate::llm::{resolve_provider, Attachment, ModelClient};
use crate::model::{
    Card, NewCard, NewSession, Session, SessionMetadata, SessionStatus, SourceKind,
};
use crate::pipeline::batch::{classify_pages, create_batches};
use crate::pipeline::chunk::{chunk_text, clean_text};
use crate::pipeline::encode::{document_attachment, image_attachment};
use crate::pipeline::images::{
    card_references, images_for_pages, media_type_for, select_images, store_extracted,
    store_files, ExtractedImage, ImageCatalog,
};
use crate::pipeline::input::resolve_source;
use crate::pipeline::markdown::{chunk_markdown, load_markdown, MarkdownChunk};
use crate::pipeline::pdf::{PdfEngine, PdfInfo, PdfiumEngine};
use crate::progress::{GenerationProgressCallback, NoopProgressCallback};
use crate::prompts::{BatchPosition, BatchSpec, ImageManifest, PromptAssembler};
use crate::store::Store;
use chrono::Utc;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Model output for generation and continuation.
///
/// Unknown fields (a `tags` array in particular) are ignored; every card is
/// tagged with the deck tag only.
#[derive(Debug, Deserialize)]
struct GeneratedCards {
    cards: Vec<GeneratedCard>,
}

#[derive(Debug, Deserialize)]
struct GeneratedCard {
    front: String,
    back: String,
    #[serde(default)]
    images: Vec<String>,
}

/// Units of work for one run, prepared before the first model call.
enum Plan {
    Native {
        batches: Vec<Vec<usize>>,
        images: Vec<ExtractedImage>,
        catalog: ImageCatalog,
    },
    Text {
        chunks: Vec<String>,
    },
    Markdown {
        chunks: Vec<MarkdownChunk>,
        catalog: ImageCatalog,
    },
}

impl Plan {
    fn len(&self) -> usize {
        match self {
            Plan::Native { batches, .. } => batches.len(),
            Plan::Text { chunks } => chunks.len(),
            Plan::Markdown { chunks, .. } => chunks.len(),
        }
    }

    fn image_count(&self) -> usize {
        match self {
            Plan::Native { catalog, .. } | Plan::Markdown { catalog, .. } => catalog.len(),
            Plan::Text { .. } => 0,
        }
    }

}

/// Model cards for one unit, with the images that unit listed.
struct UnitOutput {
    cards: Vec<GeneratedCard>,
    catalog: ImageCatalog,
}

/// Continuation inputs.
struct Continuation {
    existing: Vec<Card>,
    focus: Option<String>,
}

/// What a finished loop produced.
#[derive(Debug, Default)]
struct RunOutcome {
    new_cards: usize,
    total_units: usize,
    errors: Vec<BatchError>,
    image_count: usize,
    selected_pages: Option<Vec<usize>>,
    page_count: Option<usize>,
    title: Option<String>,
}

/// Drives sessions through generation.
///
/// Cheap to clone; clones share the store and configuration, so one
/// `Generator` can be handed to every background task.
#[derive(Clone)]
pub struct Generator {
    store: Store,
    config: Arc<ForgeConfig>,
    pdf: Arc<dyn PdfEngine>,
}

impl std::fmt::Debug for Generator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Generator")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Generator {
    /// A generator backed by pdfium.
    pub fn new(store: Store, config: Arc<ForgeConfig>) -> Self {
        Self {
            store,
            config,
            pdf: Arc::new(PdfiumEngine),
        }
    }

    /// Replace the PDF backend (tests, alternative renderers).
    pub fn with_pdf_engine(mut self, engine: Arc<dyn PdfEngine>) -> Self {
        self.pdf = engine;
        self
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn config(&self) -> &ForgeConfig {
        &self.config
    }

    fn progress(&self) -> Arc<dyn GenerationProgressCallback> {
        self.config
            .progress_callback
            .clone()
            .unwrap_or_else(|| Arc::new(NoopProgressCallback))
    }

    // ── Registration ─────────────────────────────────────────────────────

    /// Page count, document metadata and outline chapters.
    pub async fn inspect_pdf(&self, path: &Path) -> Result<PdfInfo, ForgeError> {
        let source = resolve_source(path)?;
        if source.kind != SourceKind::Pdf {
            return Err(ForgeError::InvalidDocument {
                path: source.path,
                reason: "only PDF documents can be inspected".to_string(),
            });
        }
        self.pdf.inspect(&source.path).await
    }

    /// Register a PDF as a PENDING session.
    ///
    /// The provider is resolved now so the session records whether its runs
    /// will send the document natively or as extracted text.
    pub async fn register_pdf(
        &self,
        path: &Path,
        selection: PageSelection,
        provider: Option<&str>,
    ) -> Result<Session, ForgeError> {
        let source = resolve_source(path)?;
        if source.kind != SourceKind::Pdf {
            return Err(ForgeError::InvalidDocument {
                path: source.path,
                reason: "expected a PDF document".to_string(),
            });
        }
        let info = self.pdf.inspect(&source.path).await?;
        if selection.to_indices(info.page_count, &info.chapters).is_empty() {
            return Err(ForgeError::EmptySelection {
                total: info.page_count,
            });
        }
        let model = resolve_provider(&self.config, provider)?;

        let metadata = SessionMetadata {
            selection: Some(selection),
            page_count: Some(info.page_count),
            title: info.title.clone(),
            use_native_document: model.supports_native_document(),
            ..Default::default()
        };
        let session = self.store.create_session(&NewSession {
            filename: source.filename,
            source_kind: SourceKind::Pdf,
            source_path: source.path,
            provider: model.name().to_string(),
            metadata,
            prompt_version_id: self.active_generation_prompt()?,
        })?;
        info!(
            session_id = session.id,
            native = session.metadata.use_native_document,
            "Registered PDF '{}' ({} pages)",
            session.filename,
            info.page_count
        );
        Ok(session)
    }

    /// Register a Markdown document and its image bundle as a PENDING session.
    ///
    /// Markdown runs always attach images, so the provider must accept them.
    pub async fn register_markdown(
        &self,
        path: &Path,
        base_dir: Option<&Path>,
        provider: Option<&str>,
    ) -> Result<Session, ForgeError> {
        let source = resolve_source(path)?;
        if source.kind != SourceKind::Markdown {
            return Err(ForgeError::InvalidDocument {
                path: source.path,
                reason: "expected a Markdown document".to_string(),
            });
        }
        let model = resolve_provider(&self.config, provider)?;
        if !model.supports_images() {
            return Err(ForgeError::CapabilityMissing {
                provider: model.name().to_string(),
                capability: "accept image attachments",
            });
        }

        let doc = load_markdown(&source.path, base_dir).await?;
        let missing = doc.images.iter().filter(|i| !i.exists).count();
        if missing > 0 {
            warn!("{} image reference(s) in '{}' do not resolve", missing, source.filename);
        }

        let metadata = SessionMetadata {
            title: doc.title.clone(),
            base_dir: Some(doc.base_dir.clone()),
            ..Default::default()
        };
        let session = self.store.create_session(&NewSession {
            filename: source.filename,
            source_kind: SourceKind::Markdown,
            source_path: source.path,
            provider: model.name().to_string(),
            metadata,
            prompt_version_id: self.active_generation_prompt()?,
        })?;
        info!(
            session_id = session.id,
            "Registered Markdown '{}' ({} images)",
            session.filename,
            doc.images.len()
        );
        Ok(session)
    }

    fn active_generation_prompt(&self) -> Result<Option<i64>, ForgeError> {
        Ok(self
            .store
            .active_prompt(crate::model::PromptType::Generation)?
            .map(|v| v.id))
    }

    // ── Runs ─────────────────────────────────────────────────────────────

    /// Generate the first set of cards for a PENDING (or FAILED) session.
    ///
    /// Returns the session in its terminal state. `Err` is only returned
    /// when the run could not start (unknown id, wrong state) or the final
    /// status could not be written.
    pub async fn run_initial_generation(&self, session_id: i64) -> Result<Session, ForgeError> {
        let session = self.store.begin_run(
            session_id,
            &[SessionStatus::Pending, SessionStatus::Failed],
            0,
        )?;
        info!(session_id, "Starting initial generation for '{}'", session.filename);

        match self.execute(&session, None, None).await {
            Ok(outcome) => self.complete_initial(&session, outcome)?,
            Err(e) => {
                error!(session_id, "Generation aborted: {}", e);
                let mut metadata = session.metadata.clone();
                metadata.errors = vec![e.to_string()];
                metadata.error = Some(e.to_string());
                self.store
                    .finish_run(session_id, SessionStatus::Failed, &metadata, Utc::now())?;
            }
        }
        self.store.require_session(session_id)
    }

    /// Generate additional cards for a READY session without repeating the
    /// ones it already has.
    ///
    /// `pages` narrows the PDF page set for this pass only. The session
    /// always returns to READY, even if no unit succeeded.
    pub async fn run_continuation(
        &self,
        session_id: i64,
        focus: Option<&str>,
        pages: Option<PageSelection>,
    ) -> Result<Session, ForgeError> {
        let session = self
            .store
            .begin_run(session_id, &[SessionStatus::Ready], 0)?;
        let existing = self
            .store
            .covered_cards(session_id, self.config.existing_cards_cap)?;
        info!(
            session_id,
            existing = existing.len(),
            "Starting continuation for '{}'",
            session.filename
        );

        let continuation = Continuation {
            existing,
            focus: focus.map(str::to_string),
        };
        let outcome = match self.execute(&session, Some(&continuation), pages).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(session_id, "Continuation aborted: {}", e);
                RunOutcome {
                    errors: vec![BatchError::PrepareFailed {
                        batch: 0,
                        detail: e.to_string(),
                    }],
                    ..Default::default()
                }
            }
        };
        self.complete_continuation(&session, outcome)?;
        self.store.require_session(session_id)
    }

    /// READY → FINALIZED, rolling review counts into the linked prompt.
    pub fn finalize_session(&self, session_id: i64) -> Result<Session, ForgeError> {
        let session = self.store.transition_session(
            session_id,
            SessionStatus::Ready,
            SessionStatus::Finalized,
            "finalize",
        )?;
        let stats = self.store.session_stats(session_id)?;
        if let Some(version_id) = session.prompt_version_id {
            self.store
                .add_prompt_metrics(version_id, 0, stats.approved, stats.rejected)?;
        }
        info!(
            session_id,
            approved = stats.approved,
            rejected = stats.rejected,
            "Session finalized"
        );
        Ok(session)
    }

    fn complete_initial(&self, session: &Session, outcome: RunOutcome) -> Result<(), ForgeError> {
        let total_cards = self.store.count_cards(session.id)?;
        let mut metadata = session.metadata.clone();
        apply_outcome(&mut metadata, &outcome, &self.config);
        metadata.cards_generated = Some(total_cards);

        let status = if total_cards == 0 && !outcome.errors.is_empty() {
            metadata.error = summarize_errors(&outcome.errors);
            SessionStatus::Failed
        } else {
            metadata.error = None;
            SessionStatus::Ready
        };
        self.store
            .finish_run(session.id, status, &metadata, Utc::now())?;
        self.record_generated(session, outcome.new_cards);
        info!(
            session_id = session.id,
            batches = outcome.total_units,
            cards = outcome.new_cards,
            errors = outcome.errors.len(),
            "Generation finished: {}",
            status
        );
        Ok(())
    }

    fn complete_continuation(&self, session: &Session, outcome: RunOutcome) -> Result<(), ForgeError> {
        let total_cards = self.store.count_cards(session.id)?;
        let mut metadata = session.metadata.clone();
        apply_outcome(&mut metadata, &outcome, &self.config);
        metadata.cards_generated = Some(total_cards);
        metadata.continue_generation_count += 1;
        metadata.last_continue_new_cards = Some(outcome.new_cards);
        self.store
            .finish_run(session.id, SessionStatus::Ready, &metadata, Utc::now())?;
        self.record_generated(session, outcome.new_cards);
        info!(
            session_id = session.id,
            batches = outcome.total_units,
            cards = outcome.new_cards,
            errors = outcome.errors.len(),
            "Continuation finished"
        );
        Ok(())
    }

    fn record_generated(&self, session: &Session, new_cards: usize) {
        let Some(version_id) = session.prompt_version_id else {
            return;
        };
        if new_cards == 0 {
            return;
        }
        if let Err(e) = self.store.add_prompt_metrics(version_id, new_cards, 0, 0) {
            warn!(version_id, "Could not update prompt metrics: {}", e);
        }
    }

    // ── The loop ─────────────────────────────────────────────────────────

    fn assembler(&self, session: &Session) -> Result<PromptAssembler, ForgeError> {
        if let Some(id) = session.prompt_version_id {
            if let Some(version) = self.store.get_prompt_version(id)? {
                return Ok(PromptAssembler::from_version(&version));
            }
        }
        Ok(PromptAssembler::default())
    }

    async fn execute(
        &self,
        session: &Session,
        continuation: Option<&Continuation>,
        pages: Option<PageSelection>,
    ) -> Result<RunOutcome, ForgeError> {
        let provider = resolve_provider(&self.config, Some(&session.provider))?;
        let client = ModelClient::new(provider, &self.config);
        let assembler = self.assembler(session)?;

        let mut outcome = RunOutcome::default();
        let plan = match session.source_kind {
            SourceKind::Pdf => self.plan_pdf(session, &client, pages, &mut outcome).await?,
            SourceKind::Markdown => self.plan_markdown(session, &client, &mut outcome).await?,
        };
        outcome.total_units = plan.len();
        outcome.image_count = plan.image_count();

        let total = plan.len();
        let offset = self
            .store
            .max_chunk_index(session.id)?
            .map(|m| m + 1)
            .unwrap_or(0);
        self.store.set_total_batches(session.id, total)?;

        let progress = self.progress();
        progress.on_generation_start(session.id, total);
        let deck_tag = session.deck_tag();
        let mut seen = BTreeSet::new();

        for idx in 0..total {
            let ordinal = idx + 1;
            progress.on_batch_start(session.id, ordinal, total);

            let result = match self
                .generate_unit(&plan, idx, &mut seen, &client, &assembler, continuation, &session.source_path)
                .await
            {
                Ok(unit) => {
                    let new_cards = to_new_cards(unit.cards, &deck_tag, &unit.catalog);
                    self.store
                        .persist_batch(session.id, offset + idx, &new_cards, ordinal)
                        .map(|ids| ids.len())
                        .map_err(|e| BatchError::PersistFailed {
                            batch: ordinal,
                            detail: e.to_string(),
                        })
                }
                Err(e) => Err(e),
            };

            match result {
                Ok(count) => {
                    debug!(session_id = session.id, batch = ordinal, cards = count, "Batch committed");
                    outcome.new_cards += count;
                    progress.on_batch_complete(session.id, ordinal, total, count);
                }
                Err(e) => {
                    warn!(session_id = session.id, batch = ordinal, "{}", e);
                    if let Err(mark) = self.store.mark_batch_done(session.id, ordinal) {
                        warn!(session_id = session.id, "Could not record batch progress: {}", mark);
                    }
                    progress.on_batch_error(session.id, ordinal, total, &e.to_string());
                    outcome.errors.push(e);
                }
            }
        }

        progress.on_generation_complete(session.id, total, outcome.new_cards);
        Ok(outcome)
    }

    async fn plan_pdf(
        &self,
        session: &Session,
        client: &ModelClient,
        pages: Option<PageSelection>,
        outcome: &mut RunOutcome,
    ) -> Result<Plan, ForgeError> {
        let path = &session.source_path;
        let info = self.pdf.inspect(path).await?;
        let selection = pages
            .or_else(|| session.metadata.selection.clone())
            .unwrap_or_default();
        let indices = selection.to_indices(info.page_count, &info.chapters);
        if indices.is_empty() {
            return Err(ForgeError::EmptySelection {
                total: info.page_count,
            });
        }
        outcome.page_count = Some(info.page_count);
        outcome.title = info.title.clone();
        outcome.selected_pages = Some(indices.clone());

        if session.metadata.use_native_document && client.supports_native_document() {
            let raw = self.pdf.page_images(path, &indices).await?;
            let images = select_images(raw, self.config.min_image_size);
            let catalog = store_extracted(&images, &self.config.image_dir, &session.image_prefix())?;
            let batches = create_batches(&indices, self.config.batch_size, self.config.batch_overlap);
            info!(
                session_id = session.id,
                pages = indices.len(),
                batches = batches.len(),
                images = images.len(),
                "Native document plan"
            );
            return Ok(Plan::Native {
                batches,
                images,
                catalog,
            });
        }

        let texts = self.pdf.page_text(path, &indices).await?;
        let joined = texts
            .into_iter()
            .map(|(_, text)| text)
            .collect::<Vec<_>>()
            .join("\n\n");
        let chunks = chunk_text(&clean_text(&joined), self.config.chunk_chars);
        if chunks.is_empty() {
            return Err(ForgeError::InvalidDocument {
                path: path.clone(),
                reason: "no extractable text on the selected pages".to_string(),
            });
        }
        info!(
            session_id = session.id,
            pages = indices.len(),
            chunks = chunks.len(),
            "Text extraction plan"
        );
        Ok(Plan::Text { chunks })
    }

    async fn plan_markdown(
        &self,
        session: &Session,
        client: &ModelClient,
        outcome: &mut RunOutcome,
    ) -> Result<Plan, ForgeError> {
        if !client.supports_images() {
            return Err(ForgeError::CapabilityMissing {
                provider: client.provider_name().to_string(),
                capability: "accept image attachments",
            });
        }
        let doc = load_markdown(&session.source_path, session.metadata.base_dir.as_deref()).await?;
        let catalog = store_files(
            doc.existing_images()
                .map(|img| (img.relative_path.as_str(), img.absolute_path.as_path())),
            &self.config.image_dir,
            &session.image_prefix(),
        )?;
        let chunks = chunk_markdown(&doc, self.config.chunk_chars);
        if chunks.is_empty() {
            return Err(ForgeError::InvalidDocument {
                path: session.source_path.clone(),
                reason: "document has no content".to_string(),
            });
        }
        outcome.title = doc.title.clone();
        info!(
            session_id = session.id,
            chunks = chunks.len(),
            images = catalog.len(),
            "Markdown plan"
        );
        Ok(Plan::Markdown { chunks, catalog })
    }

    #[allow(clippy::too_many_arguments)]
    async fn generate_unit(
        &self,
        plan: &Plan,
        idx: usize,
        seen: &mut BTreeSet<usize>,
        client: &ModelClient,
        assembler: &PromptAssembler,
        continuation: Option<&Continuation>,
        path: &Path,
    ) -> Result<UnitOutput, BatchError> {
        let ordinal = idx + 1;
        let total = plan.len();
        let generation_failed = |e: ForgeError| BatchError::GenerationFailed {
            batch: ordinal,
            detail: e.to_string(),
        };
        let prepare_failed = |e: ForgeError| BatchError::PrepareFailed {
            batch: ordinal,
            detail: e.to_string(),
        };

        let build = |spec: &BatchSpec<'_>| match continuation {
            Some(c) => assembler.continuation(&c.existing, c.focus.as_deref(), spec),
            None => assembler.initial(spec),
        };

        let (response, unit_catalog): (GeneratedCards, ImageCatalog) = match plan {
            Plan::Native {
                batches,
                images,
                catalog,
            } => {
                let batch = &batches[idx];
                let (new_pages, context_pages) = classify_pages(batch, seen);
                let batch_images = images_for_pages(images, batch);

                let manifest = if batch_images.is_empty() {
                    ImageManifest::None
                } else {
                    ImageManifest::PdfBatch(
                        batch
                            .iter()
                            .enumerate()
                            .map(|(pos, page)| {
                                let names = batch_images
                                    .iter()
                                    .filter(|img| img.page_index == *page)
                                    .map(|img| img.filename.clone())
                                    .collect();
                                (pos + 1, names)
                            })
                            .collect(),
                    )
                };
                let attachments: Vec<Attachment> = batch_images
                    .iter()
                    .map(|img| image_attachment(&img.filename, &img.data, img.media_type()))
                    .collect();

                let subset = self.pdf.subset(path, batch).await.map_err(prepare_failed)?;
                let prompt = build(&BatchSpec {
                    position: BatchPosition::Pages {
                        batch: idx,
                        total,
                        pages: batch.clone(),
                        new_pages,
                        context_pages,
                    },
                    images: manifest,
                    content: None,
                });
                let response = client
                    .complete_structured_with_document(&prompt, document_attachment(&subset), attachments)
                    .await
                    .map_err(generation_failed)?;
                let listed = catalog.restricted_to(batch_images.iter().map(|img| img.filename.as_str()));
                (response, listed)
            }
            Plan::Text { chunks } => {
                let prompt = build(&BatchSpec {
                    position: BatchPosition::Chunk { index: idx, total },
                    images: ImageManifest::None,
                    content: Some(chunks[idx].as_str()),
                });
                let response = client
                    .complete_structured(&prompt)
                    .await
                    .map_err(generation_failed)?;
                (response, ImageCatalog::new())
            }
            Plan::Markdown { chunks, catalog } => {
                let chunk = &chunks[idx];
                let mut names = Vec::new();
                let mut attachments = Vec::new();
                for img in chunk.images.iter().filter(|i| i.exists) {
                    if catalog.resolve(&img.relative_path).is_none() {
                        continue;
                    }
                    let bytes = tokio::fs::read(&img.absolute_path)
                        .await
                        .map_err(|e| prepare_failed(ForgeError::io(&img.absolute_path, e)))?;
                    attachments.push(image_attachment(
                        &img.relative_path,
                        &bytes,
                        media_type_for(&img.relative_path),
                    ));
                    names.push(img.relative_path.clone());
                }
                let manifest = if names.is_empty() {
                    ImageManifest::None
                } else {
                    ImageManifest::Markdown(names.clone())
                };
                let prompt = build(&BatchSpec {
                    position: BatchPosition::Chunk { index: idx, total },
                    images: manifest,
                    content: Some(chunk.content.as_str()),
                });
                let response = client
                    .complete_structured_with_images(&prompt, attachments)
                    .await
                    .map_err(generation_failed)?;
                let listed = catalog.restricted_to(names.iter().map(String::as_str));
                (response, listed)
            }
        };

        Ok(UnitOutput {
            cards: response.cards,
            catalog: unit_catalog,
        })
    }
}

/// Attach the deck tag and resolved images to model cards, dropping blanks.
///
/// `catalog` holds only the images listed for the card's own unit.
fn to_new_cards(cards: Vec<GeneratedCard>, deck_tag: &str, catalog: &ImageCatalog) -> Vec<NewCard> {
    cards
        .into_iter()
        .filter(|c| {
            let keep = !c.front.trim().is_empty() && !c.back.trim().is_empty();
            if !keep {
                debug!("Dropping card with empty side");
            }
            keep
        })
        .map(|c| {
            let images = if catalog.is_empty() {
                Vec::new()
            } else {
                let refs = card_references(&c.front, &c.back, &c.images);
                catalog.card_images(refs.iter().map(String::as_str))
            };
            NewCard {
                front: c.front.trim().to_string(),
                back: c.back.trim().to_string(),
                tags: vec![deck_tag.to_string()],
                images,
            }
        })
        .collect()
}

fn apply_outcome(metadata: &mut SessionMetadata, outcome: &RunOutcome, config: &ForgeConfig) {
    metadata.errors = outcome.errors.iter().map(|e| e.to_string()).collect();
    metadata.extracted_image_count = Some(outcome.image_count);
    if outcome.selected_pages.is_some() {
        metadata.selected_pages = outcome.selected_pages.clone();
        metadata.batch_strategy = Some(config.batch_strategy());
    }
    if outcome.page_count.is_some() {
        metadata.page_count = outcome.page_count;
    }
    if metadata.title.is_none() {
        metadata.title = outcome.title.clone();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::NewCardImage;
    use crate::pipeline::images::StoredImage;

    fn generated(front: &str, back: &str, images: &[&str]) -> GeneratedCard {
        GeneratedCard {
            front: front.into(),
            back: back.into(),
            images: images.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_model_tags_are_ignored() {
        let parsed: GeneratedCards = serde_json::from_str(
            r#"{"cards": [{"front": "Q", "back": "A", "tags": ["model-tag"]}]}"#,
        )
        .unwrap();
        let cards = to_new_cards(parsed.cards, "biology", &ImageCatalog::new());
        assert_eq!(cards[0].tags, vec!["biology".to_string()]);
    }

    #[test]
    fn test_missing_cards_key_is_malformed() {
        assert!(serde_json::from_str::<GeneratedCards>(r#"{"flashcards": []}"#).is_err());
    }

    #[test]
    fn test_blank_cards_are_dropped() {
        let cards = to_new_cards(
            vec![generated("  ", "A", &[]), generated("Q", "A", &[])],
            "deck",
            &ImageCatalog::new(),
        );
        assert_eq!(cards.len(), 1);
    }

    #[test]
    fn test_images_resolved_from_markers_and_declared_list() {
        let mut catalog = ImageCatalog::new();
        for name in ["page1_img0.png", "page2_img0.png"] {
            catalog.insert(StoredImage {
                original: name.into(),
                stored: format!("deck_1_{name}"),
                media_type: "image/png".into(),
                byte_size: 10,
            });
        }
        let cards = to_new_cards(
            vec![generated(
                "What does this show? [IMAGE: page1_img0.png]",
                "A cell",
                &["page2_img0.png", "unknown.png"],
            )],
            "deck",
            &catalog,
        );
        let stored: Vec<&str> = cards[0]
            .images
            .iter()
            .map(|i: &NewCardImage| i.stored_filename.as_str())
            .collect();
        assert_eq!(stored, vec!["deck_1_page2_img0.png", "deck_1_page1_img0.png"]);
    }

    #[test]
    fn test_outcome_records_pages_and_strategy() {
        let config = ForgeConfig::default();
        let mut metadata = SessionMetadata::default();
        let outcome = RunOutcome {
            errors: vec![BatchError::GenerationFailed {
                batch: 2,
                detail: "boom".into(),
            }],
            selected_pages: Some(vec![0, 1, 2]),
            page_count: Some(3),
            title: Some("Cells".into()),
            ..Default::default()
        };
        apply_outcome(&mut metadata, &outcome, &config);
        assert_eq!(metadata.batch_strategy.as_deref(), Some("10_pages_1_overlap"));
        assert_eq!(metadata.selected_pages, Some(vec![0, 1, 2]));
        assert_eq!(metadata.errors, vec!["Batch 2: generation failed: boom".to_string()]);
        assert_eq!(metadata.title.as_deref(), Some("Cells"));
    }
}
