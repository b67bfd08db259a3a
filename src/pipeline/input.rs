//! Input resolution: decide what kind of document a path holds.
//!
//! ## Why check magic bytes?
//!
//! A file named `.pdf` may be an HTML error page saved by a browser. We
//! validate the PDF magic bytes (`%PDF`) before a session is created so the
//! caller gets a meaningful error up front, rather than a pdfium failure in
//! a background task minutes later. Markdown is recognised by extension.

use crate::error::ForgeError;
use crate::model::SourceKind;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::debug;

const MARKDOWN_EXTENSIONS: &[&str] = &["md", "markdown", "mdown", "mkd"];

/// A validated source document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDocument {
    /// Absolute path, stable for the session's lifetime.
    pub path: PathBuf,
    pub kind: SourceKind,
    /// File name as given, used to derive the deck tag.
    pub filename: String,
}

/// Resolve a local path to a PDF or Markdown document.
pub fn resolve_source(path: &Path) -> Result<SourceDocument, ForgeError> {
    if !path.exists() {
        return Err(ForgeError::FileNotFound {
            path: path.to_path_buf(),
        });
    }
    let path = path
        .canonicalize()
        .map_err(|e| ForgeError::io(path, e))?;

    let mut magic = [0u8; 4];
    let mut f = std::fs::File::open(&path).map_err(|e| ForgeError::io(&path, e))?;
    let read = f.read(&mut magic).map_err(|e| ForgeError::io(&path, e))?;

    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document".to_string());

    let kind = if read == 4 && &magic == b"%PDF" {
        SourceKind::Pdf
    } else if is_markdown(&path) {
        SourceKind::Markdown
    } else if has_extension(&path, "pdf") {
        return Err(ForgeError::InvalidDocument {
            path,
            reason: format!("missing %PDF header (found {:?})", &magic[..read]),
        });
    } else {
        return Err(ForgeError::InvalidDocument {
            path,
            reason: "expected a PDF or a Markdown file".to_string(),
        });
    };

    debug!("Resolved {} source: {}", kind, path.display());
    Ok(SourceDocument { path, kind, filename })
}

fn has_extension(path: &Path, ext: &str) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(ext))
}

pub fn is_markdown(path: &Path) -> bool {
    MARKDOWN_EXTENSIONS.iter().any(|ext| has_extension(path, ext))
}
