//! Text cleanup and size-bounded chunking for the text-extraction path.
//!
//! Providers without native document ingestion get the PDF as plain text
//! inlined into the prompt. pdfium's text layer is noisy: CRLF line endings,
//! bare page numbers, zero-width characters, long runs of blank lines. The
//! cleanup rules below are cheap and deterministic, and each is testable on
//! its own.
//!
//! Chunking prefers paragraph boundaries. A paragraph longer than the
//! ceiling is cut at the last whitespace before the limit, so no chunk ever
//! exceeds `max_chars` characters.

use once_cell::sync::Lazy;
use regex::Regex;

/// Apply all cleanup rules to raw page text, in order:
///
/// 1. Normalise line endings (CRLF → LF)
/// 2. Strip invisible Unicode (zero-width spaces, BOM, soft hyphens)
/// 3. Trim trailing whitespace per line
/// 4. Drop lines that are only a page number
/// 5. Collapse 3+ consecutive newlines down to one blank line
pub fn clean_text(input: &str) -> String {
    let s = normalise_line_endings(input);
    let s = remove_invisible_chars(&s);
    let s = trim_trailing_whitespace(&s);
    let s = drop_page_numbers(&s);
    collapse_blank_lines(&s).trim().to_string()
}

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

fn remove_invisible_chars(input: &str) -> String {
    input
        .chars()
        .filter(|c| {
            !matches!(
                *c,
                '\u{200B}' | '\u{200C}' | '\u{200D}' | '\u{FEFF}' | '\u{00AD}' | '\u{2060}'
            )
        })
        .collect()
}

fn trim_trailing_whitespace(input: &str) -> String {
    input
        .lines()
        .map(|l| l.trim_end())
        .collect::<Vec<_>>()
        .join("\n")
}

static RE_PAGE_NUMBER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(?:[Pp]age\s+)?\d{1,4}(?:\s*/\s*\d{1,4})?\s*$").unwrap());

fn drop_page_numbers(input: &str) -> String {
    input
        .lines()
        .filter(|l| !RE_PAGE_NUMBER.is_match(l))
        .collect::<Vec<_>>()
        .join("\n")
}

static RE_BLANK_LINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());

fn collapse_blank_lines(input: &str) -> String {
    RE_BLANK_LINES.replace_all(input, "\n\n").into_owned()
}

/// Split cleaned text into chunks of at most `max_chars` characters,
/// packing whole paragraphs where possible.
pub fn chunk_text(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut chunks = Vec::new();
    let mut current = String::new();

    for paragraph in text.split("\n\n").map(str::trim).filter(|p| !p.is_empty()) {
        for piece in split_hard(paragraph, max_chars) {
            let needed = if current.is_empty() {
                char_len(&piece)
            } else {
                char_len(&current) + 2 + char_len(&piece)
            };
            if needed > max_chars && !current.is_empty() {
                chunks.push(std::mem::take(&mut current));
            }
            if !current.is_empty() {
                current.push_str("\n\n");
            }
            current.push_str(&piece);
        }
    }
    if !current.trim().is_empty() {
        chunks.push(current);
    }
    chunks
}

/// Cut `text` into pieces no longer than `max_chars` characters, breaking at
/// the last whitespace before the limit when there is one.
pub fn split_hard(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    if char_len(text) <= max_chars {
        return vec![text.to_string()];
    }

    let mut pieces = Vec::new();
    let mut rest = text;
    while char_len(rest) > max_chars {
        // Byte offset of the first char past the ceiling.
        let limit = rest
            .char_indices()
            .nth(max_chars)
            .map(|(i, _)| i)
            .unwrap_or(rest.len());
        let cut = rest[..limit]
            .rfind(char::is_whitespace)
            .filter(|&i| i > 0)
            .unwrap_or(limit);
        let (head, tail) = rest.split_at(cut);
        let head = head.trim_end();
        if !head.is_empty() {
            pieces.push(head.to_string());
        }
        rest = tail.trim_start();
    }
    if !rest.is_empty() {
        pieces.push(rest.to_string());
    }
    pieces
}

pub(crate) fn char_len(s: &str) -> usize {
    s.chars().count()
}
