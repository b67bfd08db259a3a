//! Markdown source: image catalog and section chunking.
//!
//! A Markdown bundle is a `.md` file plus the images it references with
//! `![alt](relative/path)`. This module never invents content. It only
//! resolves the references against the bundle's base directory, records
//! which exist, and splits the text so each chunk carries exactly the images
//! referenced inside it.

use crate::error::ForgeError;
use crate::pipeline::chunk::{char_len, split_hard};
use once_cell::sync::Lazy;
use percent_encoding::percent_decode_str;
use regex::Regex;
use std::path::{Path, PathBuf};
use tracing::info;

static RE_IMAGE: Lazy<Regex> = Lazy::new(|| Regex::new(r"!\[([^\]]*)\]\(([^)]+)\)").unwrap());
static RE_TITLE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^#\s+(.+)$").unwrap());
static RE_SECTION: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^#{1,2}\s").unwrap());

#[derive(Debug, Clone, PartialEq)]
pub struct MarkdownImage {
    pub alt_text: String,
    /// Reference as written, percent-decoded.
    pub relative_path: String,
    pub absolute_path: PathBuf,
    pub exists: bool,
}

#[derive(Debug, Clone)]
pub struct MarkdownDocument {
    pub content: String,
    /// First level-1 heading.
    pub title: Option<String>,
    /// Unique references in order of first appearance.
    pub images: Vec<MarkdownImage>,
    pub base_dir: PathBuf,
}

impl MarkdownDocument {
    /// References that resolved to a file on disk.
    pub fn existing_images(&self) -> impl Iterator<Item = &MarkdownImage> {
        self.images.iter().filter(|img| img.exists)
    }
}

/// One generation unit with the images referenced inside its text.
#[derive(Debug, Clone)]
pub struct MarkdownChunk {
    pub content: String,
    pub images: Vec<MarkdownImage>,
}

/// Read and parse a Markdown file. Images resolve against `base_dir`, or
/// the file's own directory when none is given.
pub async fn load_markdown(path: &Path, base_dir: Option<&Path>) -> Result<MarkdownDocument, ForgeError> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| ForgeError::io(path, e))?;
    let base = base_dir
        .map(Path::to_path_buf)
        .or_else(|| path.parent().map(Path::to_path_buf))
        .unwrap_or_default();
    let doc = parse_markdown(content, &base);
    info!(
        "Parsed markdown {}: title={:?}, images={} ({} exist)",
        path.display(),
        doc.title,
        doc.images.len(),
        doc.existing_images().count()
    );
    Ok(doc)
}

pub fn parse_markdown(content: String, base_dir: &Path) -> MarkdownDocument {
    let title = RE_TITLE
        .captures(&content)
        .map(|c| c[1].trim().to_string());

    let mut images: Vec<MarkdownImage> = Vec::new();
    for (alt_text, relative_path) in image_refs(&content) {
        if images.iter().any(|i| i.relative_path == relative_path) {
            continue;
        }
        let absolute_path = base_dir.join(&relative_path);
        let exists = absolute_path.is_file();
        images.push(MarkdownImage {
            alt_text,
            relative_path,
            absolute_path,
            exists,
        });
    }

    MarkdownDocument {
        content,
        title,
        images,
        base_dir: base_dir.to_path_buf(),
    }
}

fn image_refs(text: &str) -> Vec<(String, String)> {
    RE_IMAGE
        .captures_iter(text)
        .map(|c| {
            let path = c[2].trim();
            // `![x](a.png "title")`
            let path = path.split_once(" \"").map(|(p, _)| p).unwrap_or(path);
            (
                c[1].to_string(),
                percent_decode_str(path).decode_utf8_lossy().into_owned(),
            )
        })
        .collect()
}

/// Split the document at level-1/2 headings, packing sections up to
/// `max_chars`. An oversize section falls back to paragraph packing, and an
/// oversize paragraph to a hard cut, so no chunk exceeds the ceiling.
pub fn chunk_markdown(doc: &MarkdownDocument, max_chars: usize) -> Vec<MarkdownChunk> {
    let max_chars = max_chars.max(1);
    let mut texts: Vec<String> = Vec::new();
    let mut current = String::new();

    for section in split_sections(&doc.content) {
        if char_len(&current) + char_len(section) <= max_chars {
            current.push_str(section);
            continue;
        }
        if !current.trim().is_empty() {
            texts.push(std::mem::take(&mut current));
        }
        current.clear();

        if char_len(section) <= max_chars {
            current.push_str(section);
            continue;
        }
        for para in section.split("\n\n").filter(|p| !p.trim().is_empty()) {
            for piece in split_hard(para, max_chars.saturating_sub(2).max(1)) {
                if char_len(&current) + char_len(&piece) + 2 > max_chars && !current.trim().is_empty() {
                    texts.push(std::mem::take(&mut current));
                }
                current.push_str(&piece);
                current.push_str("\n\n");
            }
        }
    }
    if !current.trim().is_empty() {
        texts.push(current);
    }

    texts
        .into_iter()
        .map(|content| {
            let mut images: Vec<MarkdownImage> = Vec::new();
            for (_, rel) in image_refs(&content) {
                let found = doc
                    .existing_images()
                    .find(|img| img.relative_path == rel);
                if let Some(img) = found {
                    if !images.iter().any(|i| i.relative_path == img.relative_path) {
                        images.push(img.clone());
                    }
                }
            }
            MarkdownChunk { content, images }
        })
        .collect()
}

/// Sections start at each `# ` or `## ` line; text before the first heading
/// is its own section.
fn split_sections(content: &str) -> Vec<&str> {
    let mut starts: Vec<usize> = RE_SECTION.find_iter(content).map(|m| m.start()).collect();
    if starts.first() != Some(&0) {
        starts.insert(0, 0);
    }
    starts.push(content.len());
    starts
        .windows(2)
        .map(|w| &content[w[0]..w[1]])
        .filter(|s| !s.is_empty())
        .collect()
}
