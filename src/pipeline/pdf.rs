//! PDF access via pdfium: metadata, outline chapters, text, embedded images
//! and page subsets.
//!
//! ## Why spawn_blocking?
//!
//! `pdfium-render` wraps the pdfium C++ library, which keeps thread-local
//! state and does CPU-heavy work. Every call runs inside
//! `tokio::task::spawn_blocking` so generation tasks never stall the
//! runtime's worker threads.
//!
//! ## Why a trait?
//!
//! The orchestrator only needs five questions answered about a PDF.
//! [`PdfEngine`] captures those, so tests can drive the whole pipeline with
//! an in-memory fake and no native library.

use crate::error::ForgeError;
use crate::pipeline::images::RawImage;
use async_trait::async_trait;
use pdfium_render::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// One outline entry expanded to a page range (1-indexed, inclusive).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chapter {
    pub title: String,
    pub start_page: usize,
    pub end_page: usize,
}

/// Summary of a PDF shown before a session is created.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PdfInfo {
    pub page_count: usize,
    pub title: Option<String>,
    pub author: Option<String>,
    pub subject: Option<String>,
    pub file_size: u64,
    pub chapters: Vec<Chapter>,
}

/// The PDF operations generation depends on. Page indices are 0-based.
#[async_trait]
pub trait PdfEngine: Send + Sync {
    async fn inspect(&self, path: &Path) -> Result<PdfInfo, ForgeError>;

    /// Decoded raster images on `pages`, in page then object order.
    async fn page_images(&self, path: &Path, pages: &[usize]) -> Result<Vec<RawImage>, ForgeError>;

    /// Plain text of each page in `pages`.
    async fn page_text(&self, path: &Path, pages: &[usize]) -> Result<Vec<(usize, String)>, ForgeError>;

    /// A new PDF holding just `pages`, in order.
    async fn subset(&self, path: &Path, pages: &[usize]) -> Result<Vec<u8>, ForgeError>;
}

/// Turn `(title, first page index)` outline entries into chapters.
///
/// Each chapter ends one page before the next starts; the last runs to the
/// end of the document. Entries pointing at the same page keep the first
/// title.
pub fn chapters_from_outline(mut entries: Vec<(String, usize)>, page_count: usize) -> Vec<Chapter> {
    entries.retain(|(_, idx)| *idx < page_count);
    entries.sort_by_key(|(_, idx)| *idx);
    entries.dedup_by_key(|(_, idx)| *idx);

    let starts: Vec<usize> = entries.iter().map(|(_, idx)| idx + 1).collect();
    entries
        .into_iter()
        .enumerate()
        .map(|(i, (title, idx))| Chapter {
            title: title.trim().to_string(),
            start_page: idx + 1,
            end_page: starts.get(i + 1).map(|next| next - 1).unwrap_or(page_count),
        })
        .collect()
}

/// [`PdfEngine`] backed by the pdfium shared library.
#[derive(Debug, Default, Clone, Copy)]
pub struct PdfiumEngine;

impl PdfiumEngine {
    async fn blocking<T, F>(path: &Path, what: &'static str, f: F) -> Result<T, ForgeError>
    where
        T: Send + 'static,
        F: FnOnce(&Pdfium, &PdfDocument<'_>, &Path) -> Result<T, ForgeError> + Send + 'static,
    {
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || {
            let pdfium = Pdfium::default();
            let document = open(&pdfium, &path)?;
            f(&pdfium, &document, &path)
        })
        .await
        .map_err(|e| ForgeError::Internal(format!("{what} task panicked: {e}")))?
    }
}

fn open<'a>(pdfium: &'a Pdfium, path: &Path) -> Result<PdfDocument<'a>, ForgeError> {
    pdfium
        .load_pdf_from_file(path, None)
        .map_err(|e| ForgeError::CorruptPdf {
            path: path.to_path_buf(),
            detail: format!("{:?}", e),
        })
}

fn page_error(idx: usize, e: PdfiumError) -> ForgeError {
    ForgeError::PdfPageFailed {
        page: idx + 1,
        detail: format!("{:?}", e),
    }
}

#[async_trait]
impl PdfEngine for PdfiumEngine {
    async fn inspect(&self, path: &Path) -> Result<PdfInfo, ForgeError> {
        let file_size = tokio::fs::metadata(path)
            .await
            .map_err(|e| ForgeError::io(path, e))?
            .len();

        let mut info = Self::blocking(path, "Inspect", |_, document, _| {
            let metadata = document.metadata();
            let get_meta = |tag: PdfDocumentMetadataTagType| -> Option<String> {
                metadata.get(tag).and_then(|t| {
                    let v = t.value().trim().to_string();
                    if v.is_empty() {
                        None
                    } else {
                        Some(v)
                    }
                })
            };

            let page_count = document.pages().len() as usize;
            let outline: Vec<(String, usize)> = document
                .bookmarks()
                .iter()
                .filter_map(|bookmark| {
                    let title = bookmark.title()?;
                    let idx = bookmark.destination()?.page_index().ok()?;
                    Some((title, idx as usize))
                })
                .collect();

            Ok(PdfInfo {
                page_count,
                title: get_meta(PdfDocumentMetadataTagType::Title),
                author: get_meta(PdfDocumentMetadataTagType::Author),
                subject: get_meta(PdfDocumentMetadataTagType::Subject),
                file_size: 0,
                chapters: chapters_from_outline(outline, page_count),
            })
        })
        .await?;

        info.file_size = file_size;
        info!(
            "PDF {}: {} pages, {} chapters",
            path.display(),
            info.page_count,
            info.chapters.len()
        );
        Ok(info)
    }

    async fn page_images(&self, path: &Path, pages: &[usize]) -> Result<Vec<RawImage>, ForgeError> {
        let pages = pages.to_vec();
        Self::blocking(path, "Image extraction", move |_, document, _| {
            let doc_pages = document.pages();
            let total = doc_pages.len() as usize;
            let mut images = Vec::new();

            for idx in pages.into_iter().filter(|&i| i < total) {
                let page = doc_pages.get(idx as u16).map_err(|e| page_error(idx, e))?;
                for (order, object) in page.objects().iter().enumerate() {
                    let Some(image_object) = object.as_image_object() else {
                        continue;
                    };
                    match image_object.get_raw_image() {
                        Ok(image) => images.push(RawImage {
                            page_index: idx,
                            object_order: order,
                            image,
                        }),
                        // A corrupt stream costs one image, never the page.
                        Err(e) => debug!("Page {}: skipping unreadable image: {:?}", idx + 1, e),
                    }
                }
            }
            Ok(images)
        })
        .await
    }

    async fn page_text(&self, path: &Path, pages: &[usize]) -> Result<Vec<(usize, String)>, ForgeError> {
        let pages = pages.to_vec();
        Self::blocking(path, "Text extraction", move |_, document, _| {
            let doc_pages = document.pages();
            let total = doc_pages.len() as usize;
            let mut out = Vec::with_capacity(pages.len());
            for idx in pages.into_iter().filter(|&i| i < total) {
                let page = doc_pages.get(idx as u16).map_err(|e| page_error(idx, e))?;
                let text = page.text().map_err(|e| page_error(idx, e))?.all();
                out.push((idx, text));
            }
            Ok(out)
        })
        .await
    }

    async fn subset(&self, path: &Path, pages: &[usize]) -> Result<Vec<u8>, ForgeError> {
        let pages = pages.to_vec();
        Self::blocking(path, "Page subset", move |pdfium, document, source| {
            let mut out = pdfium.create_new_pdf().map_err(|e| ForgeError::CorruptPdf {
                path: PathBuf::from(source),
                detail: format!("{:?}", e),
            })?;
            for (dest, idx) in pages.iter().enumerate() {
                out.pages_mut()
                    .copy_page_from_document(document, *idx as u16, dest as u16)
                    .map_err(|e| page_error(*idx, e))?;
            }
            let bytes = out.save_to_bytes().map_err(|e| ForgeError::CorruptPdf {
                path: PathBuf::from(source),
                detail: format!("{:?}", e),
            })?;
            debug!("Built {}-page subset ({} bytes)", pages.len(), bytes.len());
            Ok(bytes)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chapters_end_before_next_start() {
        let outline = vec![
            ("Intro".to_string(), 0),
            ("Methods".to_string(), 4),
            ("Results".to_string(), 9),
        ];
        let chapters = chapters_from_outline(outline, 12);
        assert_eq!(
            chapters,
            vec![
                Chapter { title: "Intro".into(), start_page: 1, end_page: 4 },
                Chapter { title: "Methods".into(), start_page: 5, end_page: 9 },
                Chapter { title: "Results".into(), start_page: 10, end_page: 12 },
            ]
        );
    }

    #[test]
    fn outline_is_sorted_deduped_and_bounded() {
        let outline = vec![
            ("B".to_string(), 3),
            ("A".to_string(), 0),
            ("A again".to_string(), 0),
            ("Beyond".to_string(), 40),
        ];
        let chapters = chapters_from_outline(outline, 5);
        assert_eq!(chapters.len(), 2);
        assert_eq!(chapters[0].title, "A");
        assert_eq!(chapters[0].end_page, 3);
        assert_eq!(chapters[1].end_page, 5);
    }

    #[test]
    fn empty_outline_has_no_chapters() {
        assert!(chapters_from_outline(vec![], 10).is_empty());
    }

    /// Requires a pdfium library and a sample PDF (`E2E_ENABLED=1`).
    #[tokio::test]
    async fn pdfium_inspects_sample_document() {
        if std::env::var("E2E_ENABLED").is_err() {
            return;
        }
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("test_cases/sample.pdf");
        let info = PdfiumEngine.inspect(&path).await.unwrap();
        assert!(info.page_count > 0);
        let bytes = PdfiumEngine.subset(&path, &[0]).await.unwrap();
        assert!(bytes.starts_with(b"%PDF"));
    }
}
