//! Integration tests for the generation pipeline and review flows.
//!
//! Everything runs against an in-memory store with a fake model provider
//! and a fake PDF engine, so no network access or pdfium library is needed.

use async_trait::async_trait;
use base64::Engine;
use edgequake_cards::model::{NewSession, RejectionPatterns};
use edgequake_cards::pipeline::images::RawImage;
use edgequake_cards::store::NewSuggestion;
use edgequake_cards::{
    App, Attachment, CardStatus, Chapter, CompletionRequest, ForgeConfig, ForgeError,
    ModelProvider, PageSelection, PdfEngine, PdfInfo, PromptType, ProviderError, RejectionType,
    SessionMetadata, SessionStatus, SourceKind, Store,
};
use image::{DynamicImage, Rgba, RgbaImage};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

// ── Fakes ────────────────────────────────────────────────────────────────────

struct FakeProvider {
    native_document: bool,
    images: bool,
    replies: Mutex<VecDeque<Result<String, ProviderError>>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl FakeProvider {
    fn native(replies: Vec<Result<String, ProviderError>>) -> Arc<Self> {
        Arc::new(Self {
            native_document: true,
            images: true,
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    fn vision(replies: Vec<Result<String, ProviderError>>) -> Arc<Self> {
        Arc::new(Self {
            native_document: false,
            images: true,
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    fn text_only(replies: Vec<Result<String, ProviderError>>) -> Arc<Self> {
        Arc::new(Self {
            native_document: false,
            images: false,
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    fn push(&self, reply: Result<String, ProviderError>) {
        self.replies.lock().unwrap().push_back(reply);
    }

    fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ModelProvider for FakeProvider {
    fn name(&self) -> &str {
        "fake"
    }

    fn supports_native_document(&self) -> bool {
        self.native_document
    }

    fn supports_images(&self) -> bool {
        self.images
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String, ProviderError> {
        self.requests.lock().unwrap().push(request.clone());
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(server_error()))
    }
}

/// A PDF of `pages` pages with solid-colour images on selected pages.
struct FakePdf {
    pages: usize,
    /// `(0-based page, width, height)`
    images: Vec<(usize, u32, u32)>,
    chapters: Vec<Chapter>,
}

impl FakePdf {
    fn new(pages: usize) -> Arc<Self> {
        Arc::new(Self {
            pages,
            images: Vec::new(),
            chapters: Vec::new(),
        })
    }
}

#[async_trait]
impl PdfEngine for FakePdf {
    async fn inspect(&self, _path: &Path) -> Result<PdfInfo, ForgeError> {
        Ok(PdfInfo {
            page_count: self.pages,
            title: Some("Cell Biology".into()),
            chapters: self.chapters.clone(),
            ..Default::default()
        })
    }

    async fn page_images(&self, _path: &Path, pages: &[usize]) -> Result<Vec<RawImage>, ForgeError> {
        Ok(self
            .images
            .iter()
            .enumerate()
            .filter(|(_, (page, _, _))| pages.contains(page))
            .map(|(order, &(page, w, h))| RawImage {
                page_index: page,
                object_order: order,
                image: DynamicImage::ImageRgba8(RgbaImage::from_pixel(w, h, Rgba([10, 120, 200, 255]))),
            })
            .collect())
    }

    async fn page_text(&self, _path: &Path, pages: &[usize]) -> Result<Vec<(usize, String)>, ForgeError> {
        Ok(pages
            .iter()
            .map(|&p| (p, format!("Page {} text about mitochondria.", p + 1)))
            .collect())
    }

    async fn subset(&self, _path: &Path, pages: &[usize]) -> Result<Vec<u8>, ForgeError> {
        Ok(format!("%PDF-1.4 subset of {} pages", pages.len()).into_bytes())
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

fn server_error() -> ProviderError {
    ProviderError::Api {
        status: 500,
        message: "internal error".into(),
    }
}

fn cards_json(fronts: &[&str]) -> Result<String, ProviderError> {
    let cards: Vec<serde_json::Value> = fronts
        .iter()
        .map(|f| serde_json::json!({ "front": f, "back": format!("Answer to {f}") }))
        .collect();
    Ok(serde_json::json!({ "cards": cards }).to_string())
}

struct Harness {
    _dir: TempDir,
    root: PathBuf,
    app: App,
    store: Store,
}

fn harness(provider: Arc<FakeProvider>, pdf: Arc<FakePdf>) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().to_path_buf();
    let config = ForgeConfig::builder()
        .data_dir(root.join("data"))
        .provider(provider as Arc<dyn ModelProvider>)
        .build()
        .unwrap();
    config.ensure_dirs().unwrap();
    let store = Store::open_in_memory().unwrap();
    let app = App::with_store(config, store.clone(), Some(pdf as Arc<dyn PdfEngine>)).unwrap();
    Harness {
        _dir: dir,
        root,
        app,
        store,
    }
}

fn write_pdf(root: &Path, name: &str) -> PathBuf {
    let path = root.join(name);
    std::fs::write(&path, b"%PDF-1.4\n% fake document\n").unwrap();
    path
}

// ── Initial generation ───────────────────────────────────────────────────────

#[tokio::test]
async fn partial_success_keeps_session_ready() {
    // 12 pages, batch size 10, overlap 1: two batches.
    let provider = FakeProvider::native(vec![cards_json(&["Q1", "Q2", "Q3"]), Err(server_error())]);
    let h = harness(provider.clone(), FakePdf::new(12));
    let pdf = write_pdf(&h.root, "biology.pdf");

    let session = h
        .app
        .generator()
        .register_pdf(&pdf, PageSelection::All, None)
        .await
        .unwrap();
    assert_eq!(session.status, SessionStatus::Pending);
    assert!(session.metadata.use_native_document);

    h.app.start_generation(session.id).unwrap().wait().await.unwrap();

    let session = h.store.require_session(session.id).unwrap();
    assert_eq!(session.status, SessionStatus::Ready);
    assert_eq!(session.total_batches, 2);
    assert_eq!(session.batches_completed, 2);
    assert!(session.completed_at.is_some());
    assert_eq!(session.metadata.errors.len(), 1);
    assert!(session.metadata.errors[0].starts_with("Batch 2"));
    assert!(session.metadata.error.is_none());
    assert_eq!(session.metadata.cards_generated, Some(3));
    assert_eq!(session.metadata.batch_strategy.as_deref(), Some("10_pages_1_overlap"));

    let cards = h.store.list_cards(session.id, None).unwrap();
    assert_eq!(cards.len(), 3);
    assert!(cards.iter().all(|c| c.status == CardStatus::Pending));
    assert!(cards.iter().all(|c| c.tags == vec!["biology".to_string()]));
    assert!(cards.iter().all(|c| c.chunk_index == 0));

    // Every batch went out as a native document.
    let requests = provider.requests();
    assert_eq!(requests.len(), 2);
    assert!(requests.iter().all(|r| r.attachments[0].is_document()));
}

#[tokio::test]
async fn every_batch_failing_marks_session_failed() {
    let provider = FakeProvider::native(vec![Err(server_error()), Err(server_error())]);
    let h = harness(provider, FakePdf::new(12));
    let pdf = write_pdf(&h.root, "biology.pdf");

    let session = h
        .app
        .generator()
        .register_pdf(&pdf, PageSelection::All, None)
        .await
        .unwrap();
    h.app.start_generation(session.id).unwrap().wait().await.unwrap();

    let session = h.store.require_session(session.id).unwrap();
    assert_eq!(session.status, SessionStatus::Failed);
    assert!(!session.metadata.error.as_deref().unwrap_or("").is_empty());
    assert_eq!(session.metadata.errors.len(), 2);
    assert_eq!(h.store.count_cards(session.id).unwrap(), 0);
    let stats = h.store.session_stats(session.id).unwrap();
    assert_eq!(stats.last_error, session.metadata.error);
}

#[tokio::test]
async fn failed_session_can_be_retried() {
    let provider = FakeProvider::native(vec![Err(server_error())]);
    let h = harness(provider.clone(), FakePdf::new(3));
    let pdf = write_pdf(&h.root, "biology.pdf");
    let session = h
        .app
        .generator()
        .register_pdf(&pdf, PageSelection::All, None)
        .await
        .unwrap();

    let failed = h.app.generator().run_initial_generation(session.id).await.unwrap();
    assert_eq!(failed.status, SessionStatus::Failed);

    provider.push(cards_json(&["Q1"]));
    let ready = h.app.generator().run_initial_generation(session.id).await.unwrap();
    assert_eq!(ready.status, SessionStatus::Ready);
    assert!(ready.metadata.error.is_none());
    assert_eq!(h.store.count_cards(session.id).unwrap(), 1);

    // READY sessions cannot be regenerated from scratch.
    let err = h.app.generator().run_initial_generation(session.id).await.unwrap_err();
    assert!(matches!(err, ForgeError::InvalidTransition { .. }));
}

#[tokio::test]
async fn chapter_selection_limits_pages() {
    let provider = FakeProvider::native(vec![cards_json(&["Q1"])]);
    let pdf_engine = Arc::new(FakePdf {
        pages: 30,
        images: Vec::new(),
        chapters: vec![
            Chapter {
                title: "Intro".into(),
                start_page: 1,
                end_page: 4,
            },
            Chapter {
                title: "Membranes".into(),
                start_page: 5,
                end_page: 30,
            },
        ],
    });
    let h = harness(provider, pdf_engine);
    let pdf = write_pdf(&h.root, "biology.pdf");
    let session = h
        .app
        .generator()
        .register_pdf(&pdf, PageSelection::Chapters(vec![1]), None)
        .await
        .unwrap();
    let session = h.app.generator().run_initial_generation(session.id).await.unwrap();

    assert_eq!(session.status, SessionStatus::Ready);
    assert_eq!(session.metadata.selected_pages, Some(vec![0, 1, 2, 3]));
    assert_eq!(session.total_batches, 1);
}

#[tokio::test]
async fn empty_selection_is_rejected_at_registration() {
    let h = harness(FakeProvider::native(vec![]), FakePdf::new(5));
    let pdf = write_pdf(&h.root, "biology.pdf");
    let err = h
        .app
        .generator()
        .register_pdf(&pdf, PageSelection::Range(20, 30), None)
        .await
        .unwrap_err();
    assert!(matches!(err, ForgeError::EmptySelection { total: 5 }));
}

#[tokio::test]
async fn text_only_provider_gets_extracted_text() {
    let provider = FakeProvider::text_only(vec![cards_json(&["What do mitochondria do?"])]);
    let h = harness(provider.clone(), FakePdf::new(3));
    let pdf = write_pdf(&h.root, "biology.pdf");
    let session = h
        .app
        .generator()
        .register_pdf(&pdf, PageSelection::All, None)
        .await
        .unwrap();
    assert!(!session.metadata.use_native_document);

    let session = h.app.generator().run_initial_generation(session.id).await.unwrap();
    assert_eq!(session.status, SessionStatus::Ready);

    let request = &provider.requests()[0];
    assert!(request.attachments.is_empty());
    assert!(request.user.contains("Page 1 text about mitochondria."));
    assert!(request.user.contains("Page 3 text about mitochondria."));
}

// ── Images ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn pdf_image_reference_links_stored_file() {
    let provider = FakeProvider::native(vec![Ok(serde_json::json!({
        "cards": [
            {"front": "What does this figure show? [IMAGE: page1_img0.png]", "back": "A mitochondrion"},
            {"front": "No image here", "back": "Plain"}
        ]
    })
    .to_string())]);
    let pdf_engine = Arc::new(FakePdf {
        pages: 2,
        // One real figure and one decorative bullet below the size filter.
        images: vec![(0, 120, 80), (1, 8, 8)],
        chapters: Vec::new(),
    });
    let h = harness(provider.clone(), pdf_engine);
    let pdf = write_pdf(&h.root, "biology.pdf");
    let session = h
        .app
        .generator()
        .register_pdf(&pdf, PageSelection::All, None)
        .await
        .unwrap();
    let session = h.app.generator().run_initial_generation(session.id).await.unwrap();
    assert_eq!(session.metadata.extracted_image_count, Some(1));

    let cards = h.store.list_cards(session.id, None).unwrap();
    let with_image = cards.iter().find(|c| c.front.contains("figure")).unwrap();
    let images = h.store.card_images(with_image.id).unwrap();
    assert_eq!(images.len(), 1);
    assert_eq!(images[0].original_filename, "page1_img0.png");
    assert_eq!(
        images[0].stored_filename,
        format!("{}_page1_img0.png", session.image_prefix())
    );
    assert_eq!(images[0].media_type, "image/png");
    assert!(h
        .app
        .config()
        .image_dir
        .join(&images[0].stored_filename)
        .exists());

    let plain = cards.iter().find(|c| c.front == "No image here").unwrap();
    assert!(h.store.card_images(plain.id).unwrap().is_empty());

    // The model saw the document plus the one kept image, by name.
    let request = &provider.requests()[0];
    assert_eq!(request.attachments.len(), 2);
    assert!(matches!(
        &request.attachments[1],
        Attachment::Image { name, .. } if name == "page1_img0.png"
    ));
    assert!(request.user.contains("page1_img0.png"));
}

#[tokio::test]
async fn batch_note_counts_pages_within_the_attached_subset() {
    // 12 pages: batch 1 is pages 1-10, batch 2 is pages 10-12.
    let provider = FakeProvider::native(vec![cards_json(&["Q1"]), cards_json(&["Q2"])]);
    let h = harness(provider.clone(), FakePdf::new(12));
    let pdf = write_pdf(&h.root, "biology.pdf");
    let session = h
        .app
        .generator()
        .register_pdf(&pdf, PageSelection::All, None)
        .await
        .unwrap();
    h.app.generator().run_initial_generation(session.id).await.unwrap();

    let requests = provider.requests();
    assert!(!requests[0].user.contains("BATCH CONTEXT"));

    let second = &requests[1];
    let Attachment::Document { data, .. } = &second.attachments[0] else {
        panic!("expected a document attachment");
    };
    let subset = base64::engine::general_purpose::STANDARD.decode(data).unwrap();
    assert_eq!(subset, b"%PDF-1.4 subset of 3 pages");
    assert!(second
        .user
        .contains("Pages 1 (document page 10) were covered by the previous batch"));
    assert!(second
        .user
        .contains("Write cards for pages 2 (document page 11), 3 (document page 12) (new content)"));
}

#[tokio::test]
async fn cards_only_link_images_listed_for_their_batch() {
    let figure = "What does the figure show? [IMAGE: page12_img0.png]";
    let provider = FakeProvider::native(vec![
        // Batch 1 never saw page 12, so its reference must not be linked.
        Ok(serde_json::json!({"cards": [{"front": figure, "back": "Early guess"}]}).to_string()),
        Ok(serde_json::json!({"cards": [{"front": figure, "back": "A ribosome"}]}).to_string()),
    ]);
    let pdf_engine = Arc::new(FakePdf {
        pages: 12,
        images: vec![(11, 120, 80)],
        chapters: Vec::new(),
    });
    let h = harness(provider.clone(), pdf_engine);
    let pdf = write_pdf(&h.root, "biology.pdf");
    let session = h
        .app
        .generator()
        .register_pdf(&pdf, PageSelection::All, None)
        .await
        .unwrap();
    h.app.generator().run_initial_generation(session.id).await.unwrap();

    let requests = provider.requests();
    assert!(!requests[0].user.contains("## IMAGES"));
    assert!(requests[1].user.contains("page12_img0.png"));

    let cards = h.store.list_cards(session.id, None).unwrap();
    let early = cards.iter().find(|c| c.back == "Early guess").unwrap();
    assert!(h.store.card_images(early.id).unwrap().is_empty());
    let late = cards.iter().find(|c| c.back == "A ribosome").unwrap();
    let images = h.store.card_images(late.id).unwrap();
    assert_eq!(images.len(), 1);
    assert_eq!(
        images[0].stored_filename,
        format!("{}_page12_img0.png", session.image_prefix())
    );
}

#[tokio::test]
async fn markdown_image_round_trip() {
    let provider = FakeProvider::vision(vec![Ok(serde_json::json!({
        "cards": [{"front": "What does the diagram show? [IMAGE: diagram.png]", "back": "The Krebs cycle"}]
    })
    .to_string())]);
    let h = harness(provider.clone(), FakePdf::new(1));
    let notes = h.root.join("notes");
    std::fs::create_dir_all(&notes).unwrap();
    std::fs::write(notes.join("diagram.png"), b"\x89PNG\r\n\x1a\nfake").unwrap();
    let md = notes.join("week 3.md");
    std::fs::write(
        &md,
        "# Metabolism\n\nThe Krebs cycle runs in the matrix.\n\n![cycle](diagram.png)\n",
    )
    .unwrap();

    let session = h.app.generator().register_markdown(&md, None, None).await.unwrap();
    assert_eq!(session.source_kind, SourceKind::Markdown);
    assert_eq!(session.metadata.title.as_deref(), Some("Metabolism"));

    h.app.start_generation(session.id).unwrap().wait().await.unwrap();
    let session = h.store.require_session(session.id).unwrap();
    assert_eq!(session.status, SessionStatus::Ready);

    let cards = h.store.list_cards(session.id, None).unwrap();
    assert_eq!(cards.len(), 1);
    assert_eq!(cards[0].tags, vec!["week_3".to_string()]);
    let images = h.store.card_images(cards[0].id).unwrap();
    assert_eq!(images.len(), 1);
    assert_eq!(images[0].original_filename, "diagram.png");
    assert_eq!(images[0].stored_filename, format!("week_3_{}_diagram.png", session.id));

    let request = &provider.requests()[0];
    assert_eq!(request.attachments.len(), 1);
    assert!(request.user.contains("Krebs cycle runs in the matrix"));
}

#[tokio::test]
async fn markdown_needs_an_image_capable_provider() {
    let h = harness(FakeProvider::text_only(vec![]), FakePdf::new(1));
    let md = h.root.join("notes.md");
    std::fs::write(&md, "# Notes\n\nText.\n").unwrap();
    let err = h.app.generator().register_markdown(&md, None, None).await.unwrap_err();
    assert!(matches!(err, ForgeError::CapabilityMissing { .. }));
}

// ── Continuation ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn continuation_appends_after_existing_cards() {
    let provider = FakeProvider::native(vec![cards_json(&["What is ATP?", "Q2"])]);
    let h = harness(provider.clone(), FakePdf::new(4));
    let pdf = write_pdf(&h.root, "biology.pdf");
    let session = h
        .app
        .generator()
        .register_pdf(&pdf, PageSelection::All, None)
        .await
        .unwrap();
    h.app.start_generation(session.id).unwrap().wait().await.unwrap();

    let first = h.store.list_cards(session.id, None).unwrap();
    h.app
        .review()
        .reject(first[1].id, "duplicate of another deck", RejectionType::Duplicate)
        .unwrap();

    provider.push(cards_json(&["What is NADH?"]));
    h.app
        .continue_generation(session.id, Some("electron transport".into()), None)
        .unwrap()
        .wait()
        .await
        .unwrap();

    let session = h.store.require_session(session.id).unwrap();
    assert_eq!(session.status, SessionStatus::Ready);
    assert_eq!(session.metadata.continue_generation_count, 1);
    assert_eq!(session.metadata.last_continue_new_cards, Some(1));

    let cards = h.store.list_cards(session.id, None).unwrap();
    assert_eq!(cards.len(), 3);
    let added = cards.iter().find(|c| c.front == "What is NADH?").unwrap();
    assert_eq!(added.chunk_index, 1);

    // Covered cards are listed, rejected ones are not.
    let request = provider.requests().pop().unwrap();
    assert!(request.user.contains("What is ATP?"));
    assert!(!request.user.contains("Q2"));
    assert!(request.user.contains("electron transport"));
}

#[tokio::test]
async fn failed_continuation_returns_to_ready() {
    let provider = FakeProvider::native(vec![cards_json(&["Q1"])]);
    let h = harness(provider.clone(), FakePdf::new(4));
    let pdf = write_pdf(&h.root, "biology.pdf");
    let session = h
        .app
        .generator()
        .register_pdf(&pdf, PageSelection::All, None)
        .await
        .unwrap();
    h.app.generator().run_initial_generation(session.id).await.unwrap();

    provider.push(Err(server_error()));
    let session = h
        .app
        .generator()
        .run_continuation(session.id, None, None)
        .await
        .unwrap();

    assert_eq!(session.status, SessionStatus::Ready);
    assert_eq!(session.metadata.continue_generation_count, 1);
    assert_eq!(session.metadata.last_continue_new_cards, Some(0));
    assert_eq!(session.metadata.errors.len(), 1);
    assert_eq!(h.store.count_cards(session.id).unwrap(), 1);
}

#[tokio::test]
async fn continuation_requires_ready_session() {
    let h = harness(FakeProvider::native(vec![]), FakePdf::new(4));
    let pdf = write_pdf(&h.root, "biology.pdf");
    let session = h
        .app
        .generator()
        .register_pdf(&pdf, PageSelection::All, None)
        .await
        .unwrap();
    let err = h
        .app
        .generator()
        .run_continuation(session.id, None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, ForgeError::InvalidTransition { .. }));
    assert_eq!(
        h.store.require_session(session.id).unwrap().status,
        SessionStatus::Pending
    );
}

// ── Startup ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn startup_fails_sessions_left_processing() {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open_in_memory().unwrap();
    let session = store
        .create_session(&NewSession {
            filename: "biology.pdf".into(),
            source_kind: SourceKind::Pdf,
            source_path: dir.path().join("biology.pdf"),
            provider: "fake".into(),
            metadata: SessionMetadata::default(),
            prompt_version_id: None,
        })
        .unwrap();
    store
        .begin_run(session.id, &[SessionStatus::Pending], 3)
        .unwrap();

    let config = ForgeConfig::builder()
        .data_dir(dir.path().join("data"))
        .provider(FakeProvider::native(vec![]) as Arc<dyn ModelProvider>)
        .build()
        .unwrap();
    let app = App::with_store(config, store.clone(), Some(FakePdf::new(1) as Arc<dyn PdfEngine>)).unwrap();

    let recovered = app.store().require_session(session.id).unwrap();
    assert_eq!(recovered.status, SessionStatus::Failed);
    assert!(recovered.metadata.error.is_some());

    // Built-in prompts are seeded once, and only once.
    assert_eq!(store.prompt_history(PromptType::Generation).unwrap().len(), 1);
    assert_eq!(store.prompt_history(PromptType::Validation).unwrap().len(), 1);
    app.shutdown().await;
}

// ── Review ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn batch_review_reports_missing_ids() {
    let provider = FakeProvider::native(vec![cards_json(&["Q1", "Q2", "Q3"])]);
    let h = harness(provider, FakePdf::new(2));
    let pdf = write_pdf(&h.root, "biology.pdf");
    let session = h
        .app
        .generator()
        .register_pdf(&pdf, PageSelection::All, None)
        .await
        .unwrap();
    h.app.generator().run_initial_generation(session.id).await.unwrap();
    let ids: Vec<i64> = h
        .store
        .list_cards(session.id, None)
        .unwrap()
        .iter()
        .map(|c| c.id)
        .collect();

    let approved = h.app.review().batch_approve(&[ids[0], ids[1], 424242]);
    assert_eq!((approved.processed, approved.failed), (2, 1));

    let rejected = h
        .app
        .review()
        .batch_reject(&[ids[2], 777], "off topic", RejectionType::Other);
    assert_eq!((rejected.processed, rejected.failed), (1, 1));

    let stats = h.store.session_stats(session.id).unwrap();
    assert_eq!(stats.approved, 2);
    assert_eq!(stats.rejected, 1);
    assert_eq!(stats.pending, 0);
    assert!(stats.last_error.is_none());
}

#[tokio::test]
async fn finalize_rolls_metrics_and_suggests_prompt() {
    let provider = FakeProvider::native(vec![cards_json(&["Q1", "Q2"])]);
    let h = harness(provider.clone(), FakePdf::new(2));
    let pdf = write_pdf(&h.root, "biology.pdf");
    let session = h
        .app
        .generator()
        .register_pdf(&pdf, PageSelection::All, None)
        .await
        .unwrap();
    h.app.generator().run_initial_generation(session.id).await.unwrap();
    let cards = h.store.list_cards(session.id, None).unwrap();
    h.app.review().approve(cards[0].id).unwrap();
    h.app
        .review()
        .reject(cards[1].id, "asks two things at once", RejectionType::TooComplex)
        .unwrap();

    provider.push(Ok(serde_json::json!({
        "reasoning": "Cards bundled several facts",
        "suggested_system_prompt": "One fact per card.",
        "suggested_user_prompt_template": "Write atomic cards."
    })
    .to_string()));

    let (finalized, evolve) = h.app.finalize(session.id).unwrap();
    assert_eq!(finalized.status, SessionStatus::Finalized);
    evolve.wait().await.unwrap();

    let version = h
        .store
        .active_prompt(PromptType::Generation)
        .unwrap()
        .unwrap();
    assert_eq!(version.cards_generated, 2);
    assert_eq!(version.cards_approved, 1);
    assert_eq!(version.cards_rejected, 1);
    assert_eq!(version.approval_rate, Some(0.5));

    let pending = h.app.advisor().pending_suggestions().unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].session_id, session.id);
    assert_eq!(pending[0].patterns.type_distribution["too_complex"], 1);

    // Finalized sessions are closed for further generation.
    assert!(h.app.finalize(session.id).is_err());
}

#[tokio::test]
async fn approving_suggestions_keeps_one_active_version() {
    let h = harness(FakeProvider::native(vec![]), FakePdf::new(1));
    let pdf = write_pdf(&h.root, "biology.pdf");
    let session = h
        .app
        .generator()
        .register_pdf(&pdf, PageSelection::All, None)
        .await
        .unwrap();

    for round in 0..2 {
        let base = h
            .store
            .active_prompt(PromptType::Generation)
            .unwrap()
            .unwrap();
        let suggestion = h
            .store
            .create_suggestion(&NewSuggestion {
                prompt_version_id: base.id,
                session_id: session.id,
                suggested_system_prompt: format!("system v{}", round + 2),
                suggested_user_prompt_template: format!("user v{}", round + 2),
                reasoning: "tighter cards".into(),
                patterns: RejectionPatterns::default(),
            })
            .unwrap();
        let activated = h.app.advisor().approve_suggestion(suggestion.id).unwrap();
        assert_eq!(activated.version, base.version + 1);
        assert_eq!(activated.parent_version_id, Some(base.id));
    }

    let history = h.app.advisor().prompt_history(PromptType::Generation).unwrap();
    assert_eq!(history.len(), 3);
    assert_eq!(history.iter().filter(|v| v.is_active).count(), 1);
    let active = h
        .store
        .active_prompt(PromptType::Generation)
        .unwrap()
        .unwrap();
    assert_eq!(active.version, 3);
    assert_eq!(active.system_prompt, "system v3");

    // The validation prompt is untouched.
    let validation = h.app.advisor().prompt_history(PromptType::Validation).unwrap();
    assert_eq!(validation.iter().filter(|v| v.is_active).count(), 1);
}
