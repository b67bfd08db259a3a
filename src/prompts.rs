//! Prompt assembly for generation, continuation, validation, auto-correction
//! and prompt evolution.
//!
//! Centralising every prompt here serves two purposes:
//!
//! 1. **Single source of truth**: the built-in templates below seed
//!    version 1 of each prompt type. After that the *active*
//!    [`PromptVersion`] supplies the generation system/user text, and the
//!    assembler layers the per-batch sections (image manifest, batch
//!    context, existing cards) on top.
//!
//! 2. **Testability**: [`PromptAssembler`] is pure. Unit tests inspect the
//!    exact text a batch would send without a model or a database.
//!
//! Every assembled prompt carries the JSON shape the model must return;
//! [`crate::llm::ModelClient`] appends it as a formatting contract.

use crate::model::{Card, CardRejection, PromptType, PromptVersion, RejectionPatterns};
use serde_json::{json, Value};

// ── Built-in templates ───────────────────────────────────────────────────

/// System prompt for card generation (seeded as generation v1).
pub const GENERATION_SYSTEM: &str = r#"You are an expert educational content designer who writes spaced-repetition flashcards.
You follow the minimum information principle: every card tests exactly one fact, in clear and unambiguous wording.
Always answer with valid JSON and nothing else."#;

/// User prompt for card generation (seeded as generation v1).
pub const GENERATION_USER: &str = r#"Read the document and write flashcards for the knowledge worth keeping long-term.

## WHAT TO LOOK FOR
- Definitions, terms and concepts
- Formulas, equations and relationships
- Causes and their effects
- Contrasts between similar concepts
- Steps of a process or procedure
- Principles, rules and laws
- Worked examples and applications

## RULES FOR WRITING CARDS
1. Only write cards for ideas the document actually explains.
2. Put foundational definitions before the details that build on them.
3. One atomic fact per card. Split "What are the three kinds of X?" into three cards.
4. Never ask for a set or an ordered list. Ask for one member or one step at a time.
5. Fill-in-the-blank questions work well: "The process of X is called ___".
6. Keep the front short and specific, and the back to one or two sentences.
7. Distinguish look-alike concepts with a bracketed context cue: "[In genetics] What does DNA stand for?".
8. Add a concrete example to the answer when it helps recall.
9. Keep dates for historical or time-sensitive facts, and sources when the document cites them.
10. Spend more cards on core ideas than on trivia.

## CARD KINDS
- Definition: "What is [term]?"
- Concept: "What does [concept] do?"
- Relationship: "How does X affect Y?"
- Application: "When would you use X?"
- Comparison: "What distinguishes X from Y?"
- Process step: "What comes after X in Y?"
- Reverse: "What is the term for [definition]?"

Do NOT produce tags. Tags are assigned automatically."#;

/// Image section for PDF batches. `{image_list}` is replaced per batch.
pub const PDF_IMAGE_SECTION: &str = r#"## IMAGES
Images extracted from these pages are attached above, in this order:
{image_list}

Reference an image by writing [IMAGE: filename] in the front or the back, using the filename exactly as listed.
Put the image on the front to test recognition ("What does this diagram show? [IMAGE: page3_img0.png]"),
or on the back when it illustrates the answer. Only reference images from the list above.
List every filename a card uses in that card's "images" array (an empty array when it uses none)."#;

/// Image section for Markdown chunks. `{image_list}` is replaced per chunk.
pub const MARKDOWN_IMAGE_SECTION: &str = r#"## IMAGES
This section of the document references the following attached images:
{image_list}

Reference an image by writing [IMAGE: filename] in the front or the back. Put it on the front to test
recognition of a diagram, or on the back when it supports the answer.
List every filename a card uses in that card's "images" array (an empty array when it uses none)."#;

/// Continuation system prompt.
pub const CONTINUATION_SYSTEM: &str = r#"You are an expert educational content designer. You look for GAPS in an existing set of flashcards
and write cards only for the missing concepts. You never duplicate what is already covered.
Always answer with valid JSON and nothing else."#;

/// Continuation user prompt. `{existing_cards}` and `{focus_areas}` are replaced.
pub const CONTINUATION_USER: &str = r#"Read the document and write ADDITIONAL flashcards for concepts that are still MISSING.

## EXISTING CARDS (DO NOT DUPLICATE)
These cards already exist. Do not write a card that tests the same idea, even with different wording:

{existing_cards}

## TASK
1. Read the document carefully.
2. Find definitions, relationships, details, examples and edge cases the existing cards do not cover.
3. Write new cards for those gaps only.

{focus_areas}

If nothing is missing, return an empty "cards" array.
Keep to one atomic fact per card, and never ask for sets or enumerations.
Do NOT produce tags. Tags are assigned automatically."#;

/// Validation system prompt (seeded as validation v1).
pub const VALIDATION_SYSTEM: &str = r#"You are an expert in educational psychology and spaced repetition.
You review flashcards and rewrite the ones that would be hard to learn.
Return only valid JSON with the improved cards."#;

/// Validation user prompt. `{cards_json}` is replaced.
pub const VALIDATION_USER: &str = r#"Review these flashcards:

{cards_json}

For each card check that:
1. The question is clear and specific.
2. The answer is concise but complete.
3. The card tests one important, atomic fact.
4. It does not ask for a set or an enumeration.
5. Similar concepts cannot be confused.

Rewrite the cards that fail any check, keeping the same "id". Return only the improved cards."#;

const BATCH_CONTEXT: &str = r#"

## BATCH CONTEXT
- This is batch {batch_num} of {total_batches}
- The attached document holds only this batch's pages; page numbers below count from its first page
- Pages {context_pages} were covered by the previous batch and are included only for continuity
- Write cards for pages {new_pages} (new content)
- Do NOT write cards for concepts that appear only on the context pages"#;

const CHUNK_CONTEXT: &str = r#"

## BATCH CONTEXT
- This is chunk {chunk_num} of {total_chunks}
- Write cards for THIS section only"#;

const AUTO_CORRECT_SYSTEM: &str = r#"You are an expert at writing educational flashcards. You improve a single card using the
reviewer's feedback, focusing on clarity, accuracy and effectiveness.
Return only valid JSON."#;

const EVOLUTION_SYSTEM: &str = r#"You are an expert in prompt engineering and educational content design.
You study how reviewers judged a batch of generated flashcards and propose concrete improvements to the prompts
that generated them. Rejection patterns and the edits reviewers made reveal what they actually want.
Return only valid JSON."#;

/// Built-in prompt texts used to seed version 1 of each type.
pub fn default_prompt_seeds() -> [(PromptType, &'static str, &'static str); 2] {
    [
        (PromptType::Generation, GENERATION_SYSTEM, GENERATION_USER),
        (PromptType::Validation, VALIDATION_SYSTEM, VALIDATION_USER),
    ]
}

// ── Output schemas ───────────────────────────────────────────────────────

/// `{"cards": [{"front", "back", "images"?}]}`
pub fn cards_schema(with_images: bool) -> Value {
    if with_images {
        json!({"cards": [{
            "front": "Question text (may include [IMAGE: filename.png])",
            "back": "Answer text (may include [IMAGE: filename.png])",
            "images": ["filename.png"]
        }]})
    } else {
        json!({"cards": [{
            "front": "Question text goes here",
            "back": "Answer text goes here"
        }]})
    }
}

pub fn correction_schema() -> Value {
    json!({"front": "improved question", "back": "improved answer"})
}

pub fn validation_schema() -> Value {
    json!({"improved_cards": [{"id": 1, "front": "Improved question", "back": "Improved answer"}]})
}

pub fn evolution_schema() -> Value {
    json!({
        "reasoning": "explanation of the issues found and the changes made",
        "suggested_system_prompt": "the improved system prompt",
        "suggested_user_prompt_template": "the improved user prompt template"
    })
}

// ── Assembly ─────────────────────────────────────────────────────────────

/// A ready-to-send prompt and the JSON shape expected back.
#[derive(Debug, Clone, PartialEq)]
pub struct AssembledPrompt {
    pub system: String,
    pub user: String,
    pub schema: Value,
}

/// Which images accompany a batch.
#[derive(Debug, Clone, PartialEq)]
pub enum ImageManifest {
    None,
    /// Filenames grouped by 1-based page position inside the batch.
    PdfBatch(Vec<(usize, Vec<String>)>),
    /// Filenames referenced by a Markdown chunk.
    Markdown(Vec<String>),
}

impl ImageManifest {
    pub fn has_images(&self) -> bool {
        match self {
            ImageManifest::None => false,
            ImageManifest::PdfBatch(groups) => groups.iter().any(|(_, names)| !names.is_empty()),
            ImageManifest::Markdown(names) => !names.is_empty(),
        }
    }

    fn section(&self) -> Option<String> {
        match self {
            ImageManifest::None => None,
            ImageManifest::PdfBatch(groups) => {
                let list = if self.has_images() {
                    groups
                        .iter()
                        .filter(|(_, names)| !names.is_empty())
                        .map(|(pos, names)| format!("- Page {} of this batch: {}", pos, names.join(", ")))
                        .collect::<Vec<_>>()
                        .join("\n")
                } else {
                    "(no images on these pages)".to_string()
                };
                Some(PDF_IMAGE_SECTION.replace("{image_list}", &list))
            }
            ImageManifest::Markdown(names) => {
                let list = if names.is_empty() {
                    "(no images in this section)".to_string()
                } else {
                    names.iter().map(|n| format!("- {n}")).collect::<Vec<_>>().join("\n")
                };
                Some(MARKDOWN_IMAGE_SECTION.replace("{image_list}", &list))
            }
        }
    }
}

/// Where a work unit sits in its run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchPosition {
    /// A page batch. `pages` are the 0-based document pages in the order
    /// they appear in the attached sub-document; `new_pages` and
    /// `context_pages` partition them. The note shows each page by its
    /// 1-based position in the attachment, with the document page alongside.
    Pages {
        batch: usize,
        total: usize,
        pages: Vec<usize>,
        new_pages: Vec<usize>,
        context_pages: Vec<usize>,
    },
    /// A text or Markdown chunk, 0-based.
    Chunk { index: usize, total: usize },
}

impl BatchPosition {
    fn note(&self) -> Option<String> {
        match self {
            BatchPosition::Pages {
                batch,
                total,
                pages,
                new_pages,
                context_pages,
            } => {
                if new_pages.is_empty() || context_pages.is_empty() {
                    return None;
                }
                Some(
                    BATCH_CONTEXT
                        .replace("{batch_num}", &(batch + 1).to_string())
                        .replace("{total_batches}", &total.to_string())
                        .replace("{context_pages}", &page_list(pages, context_pages))
                        .replace("{new_pages}", &page_list(pages, new_pages)),
                )
            }
            BatchPosition::Chunk { index, total } if *total > 1 => Some(
                CHUNK_CONTEXT
                    .replace("{chunk_num}", &(index + 1).to_string())
                    .replace("{total_chunks}", &total.to_string()),
            ),
            BatchPosition::Chunk { .. } => None,
        }
    }
}

/// `2 (document page 11), 3 (document page 12)` for the wanted pages, by
/// position within `batch`.
fn page_list(batch: &[usize], wanted: &[usize]) -> String {
    batch
        .iter()
        .enumerate()
        .filter(|(_, page)| wanted.contains(page))
        .map(|(pos, page)| format!("{} (document page {})", pos + 1, page + 1))
        .collect::<Vec<_>>()
        .join(", ")
}

/// One unit of generation input as the assembler sees it.
#[derive(Debug, Clone)]
pub struct BatchSpec<'a> {
    pub position: BatchPosition,
    pub images: ImageManifest,
    /// Inline text, or `None` when the document itself is attached.
    pub content: Option<&'a str>,
}

/// Builds generation prompts on top of a base system/user pair.
#[derive(Debug, Clone)]
pub struct PromptAssembler {
    base_system: String,
    base_user: String,
}

impl Default for PromptAssembler {
    fn default() -> Self {
        Self::new(GENERATION_SYSTEM, GENERATION_USER)
    }
}

impl PromptAssembler {
    pub fn new(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            base_system: system.into(),
            base_user: user.into(),
        }
    }

    /// Use a stored prompt version as the base.
    pub fn from_version(version: &PromptVersion) -> Self {
        Self::new(&version.system_prompt, &version.user_prompt_template)
    }

    /// Initial generation, with or without an image manifest.
    pub fn initial(&self, spec: &BatchSpec<'_>) -> AssembledPrompt {
        self.build(self.base_system.clone(), self.base_user.clone(), spec)
    }

    /// Gap-filling generation that must not repeat `existing` cards.
    ///
    /// The caller bounds `existing`; every card passed is listed.
    pub fn continuation(&self, existing: &[Card], focus: Option<&str>, spec: &BatchSpec<'_>) -> AssembledPrompt {
        let existing_cards = if existing.is_empty() {
            "(no cards yet)".to_string()
        } else {
            existing
                .iter()
                .map(|c| format!("- Q: {}\n  A: {}", c.front, c.back))
                .collect::<Vec<_>>()
                .join("\n")
        };
        let focus_areas = focus
            .map(str::trim)
            .filter(|f| !f.is_empty())
            .map(|f| format!("## USER GUIDANCE\n{f}"))
            .unwrap_or_default();
        let user = CONTINUATION_USER
            .replace("{existing_cards}", &existing_cards)
            .replace("{focus_areas}", &focus_areas);
        self.build(CONTINUATION_SYSTEM.to_string(), user, spec)
    }

    fn build(&self, system: String, base_user: String, spec: &BatchSpec<'_>) -> AssembledPrompt {
        let mut user = match spec.images.section() {
            Some(section) => format!("{section}\n\n{base_user}"),
            None => base_user,
        };
        if let Some(note) = spec.position.note() {
            user.push_str(&note);
        }
        if let Some(content) = spec.content {
            user.push_str("\n\n## DOCUMENT CONTENT\n");
            user.push_str(content);
        }
        AssembledPrompt {
            system,
            user,
            schema: cards_schema(spec.images.has_images()),
        }
    }
}

/// Validation pass over existing cards, using the active validation prompt.
pub fn validation_prompt(version: Option<&PromptVersion>, cards: &[Card]) -> AssembledPrompt {
    let (system, user) = match version {
        Some(v) => (v.system_prompt.as_str(), v.user_prompt_template.as_str()),
        None => (VALIDATION_SYSTEM, VALIDATION_USER),
    };
    let listed: Vec<Value> = cards
        .iter()
        .map(|c| json!({"id": c.id, "front": c.front, "back": c.back}))
        .collect();
    let cards_json = serde_json::to_string_pretty(&listed).unwrap_or_else(|_| "[]".to_string());
    AssembledPrompt {
        system: system.to_string(),
        user: user.replace("{cards_json}", &cards_json),
        schema: validation_schema(),
    }
}

/// Correction of a rejected card, keyed off its latest rejection.
pub fn correction_prompt(card: &Card, rejection: &CardRejection) -> AssembledPrompt {
    let user = format!(
        "A reviewer rejected the following flashcard. Improve it so that it addresses their feedback.\n\n\
         ## Card\nQuestion: {}\nAnswer: {}\n\n\
         ## Rejection\nType: {}\nFeedback: {}\n\n\
         Keep the question clear, specific and unambiguous, and the answer concise but complete. \
         Keep any [IMAGE: ...] references that are still relevant.",
        card.front, card.back, rejection.rejection_type, rejection.reason
    );
    AssembledPrompt {
        system: AUTO_CORRECT_SYSTEM.to_string(),
        user,
        schema: correction_schema(),
    }
}

/// Evidence gathered from a finished session for the evolution advisor.
#[derive(Debug, Clone)]
pub struct EvolutionEvidence<'a> {
    pub patterns: &'a RejectionPatterns,
    pub approved: &'a [Card],
    pub rejected: &'a [Card],
    pub edited: &'a [Card],
}

/// Ask for a replacement generation prompt given a session's outcomes.
pub fn evolution_prompt(current: &PromptVersion, evidence: &EvolutionEvidence<'_>) -> AssembledPrompt {
    let qa = |cards: &[Card]| -> String {
        if cards.is_empty() {
            return "None".to_string();
        }
        cards
            .iter()
            .map(|c| format!("Q: {}\nA: {}", c.front, c.back))
            .collect::<Vec<_>>()
            .join("\n\n")
    };
    let edited = if evidence.edited.is_empty() {
        "None".to_string()
    } else {
        evidence
            .edited
            .iter()
            .map(|c| {
                format!(
                    "Original Q: {}\nOriginal A: {}\nEdited Q: {}\nEdited A: {}",
                    c.original_front.as_deref().unwrap_or(&c.front),
                    c.original_back.as_deref().unwrap_or(&c.back),
                    c.front,
                    c.back
                )
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    };
    let patterns = serde_json::to_string_pretty(evidence.patterns).unwrap_or_else(|_| "{}".to_string());

    let user = format!(
        "Analyse these flashcard generation results and improve the generation prompt.\n\n\
         ## Current system prompt\n{}\n\n\
         ## Current user prompt template\n{}\n\n\
         ## Rejection patterns\n{}\n\n\
         ## APPROVED cards (good)\n{}\n\n\
         ## REJECTED cards (poor)\n{}\n\n\
         ## EDITED cards (what reviewers corrected)\n{}\n\n\
         Explain the issues you see, then give an improved system prompt and an improved user prompt \
         template that address them. Keep everything the current prompts do well.",
        current.system_prompt,
        current.user_prompt_template,
        patterns,
        qa(evidence.approved),
        qa(evidence.rejected),
        edited
    );
    AssembledPrompt {
        system: EVOLUTION_SYSTEM.to_string(),
        user,
        schema: evolution_schema(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CardStatus, RejectionType};
    use chrono::Utc;

    fn card(id: i64, front: &str, back: &str) -> Card {
        Card {
            id,
            session_id: 1,
            front: front.into(),
            back: back.into(),
            tags: vec!["deck".into()],
            status: CardStatus::Pending,
            original_front: None,
            original_back: None,
            chunk_index: 0,
            created_at: Utc::now(),
            reviewed_at: None,
        }
    }

    fn spec(position: BatchPosition, images: ImageManifest) -> BatchSpec<'static> {
        BatchSpec {
            position,
            images,
            content: None,
        }
    }

    #[test]
    fn test_plain_initial_prompt() {
        let p = PromptAssembler::default().initial(&spec(
            BatchPosition::Pages { batch: 0, total: 1, pages: vec![0, 1], new_pages: vec![0, 1], context_pages: vec![] },
            ImageManifest::None,
        ));
        assert_eq!(p.system, GENERATION_SYSTEM);
        assert_eq!(p.user, GENERATION_USER);
        assert!(p.schema["cards"][0].get("images").is_none());
    }

    #[test]
    fn test_pdf_manifest_groups_by_batch_position() {
        let manifest = ImageManifest::PdfBatch(vec![
            (1, vec!["page10_img0.png".into()]),
            (2, vec![]),
            (3, vec!["page12_img0.png".into(), "page12_img1.png".into()]),
        ]);
        let p = PromptAssembler::default().initial(&spec(
            BatchPosition::Pages {
                batch: 1,
                total: 3,
                pages: vec![9, 10, 11],
                new_pages: vec![10, 11],
                context_pages: vec![9],
            },
            manifest,
        ));
        assert!(p.user.starts_with("## IMAGES"));
        assert!(p.user.contains("- Page 1 of this batch: page10_img0.png"));
        assert!(p.user.contains("- Page 3 of this batch: page12_img0.png, page12_img1.png"));
        assert!(!p.user.contains("Page 2 of this batch"));
        assert_eq!(p.schema["cards"][0]["images"][0], "filename.png");
    }

    #[test]
    fn test_pdf_manifest_without_images_on_batch() {
        let p = PromptAssembler::default().initial(&spec(
            BatchPosition::Pages { batch: 0, total: 2, pages: vec![0], new_pages: vec![0], context_pages: vec![] },
            ImageManifest::PdfBatch(vec![(1, vec![])]),
        ));
        assert!(p.user.contains("(no images on these pages)"));
        assert!(p.schema["cards"][0].get("images").is_none());
    }

    #[test]
    fn test_batch_context_counts_pages_within_the_attachment() {
        let p = PromptAssembler::default().initial(&spec(
            BatchPosition::Pages {
                batch: 1,
                total: 3,
                pages: vec![9, 10, 11],
                new_pages: vec![10, 11],
                context_pages: vec![9],
            },
            ImageManifest::None,
        ));
        assert!(p.user.contains("This is batch 2 of 3"));
        assert!(p.user.contains("Pages 1 (document page 10) were covered"));
        assert!(p.user.contains(
            "Write cards for pages 2 (document page 11), 3 (document page 12) (new content)"
        ));
    }

    #[test]
    fn test_no_context_note_when_batch_is_all_new() {
        let p = PromptAssembler::default().initial(&spec(
            BatchPosition::Pages { batch: 0, total: 3, pages: vec![0, 1], new_pages: vec![0, 1], context_pages: vec![] },
            ImageManifest::None,
        ));
        assert!(!p.user.contains("BATCH CONTEXT"));
    }

    #[test]
    fn test_chunk_note_and_inline_content() {
        let p = PromptAssembler::default().initial(&BatchSpec {
            position: BatchPosition::Chunk { index: 1, total: 4 },
            images: ImageManifest::Markdown(vec!["img/a.png".into()]),
            content: Some("# Cells\nMitochondria..."),
        });
        assert!(p.user.contains("This is chunk 2 of 4"));
        assert!(p.user.contains("- img/a.png"));
        assert!(p.user.ends_with("## DOCUMENT CONTENT\n# Cells\nMitochondria..."));
    }

    #[test]
    fn test_continuation_lists_existing_cards_and_focus() {
        let existing = vec![card(1, "What is ATP?", "Energy currency"), card(2, "Q2", "A2")];
        let p = PromptAssembler::default().continuation(
            &existing,
            Some("  membrane transport "),
            &spec(BatchPosition::Chunk { index: 0, total: 1 }, ImageManifest::None),
        );
        assert_eq!(p.system, CONTINUATION_SYSTEM);
        assert!(p.user.contains("- Q: What is ATP?\n  A: Energy currency"));
        assert!(p.user.contains("## USER GUIDANCE\nmembrane transport"));
        assert!(p.user.contains("empty \"cards\" array"));
    }

    #[test]
    fn test_continuation_without_focus() {
        let p = PromptAssembler::default().continuation(
            &[],
            None,
            &spec(BatchPosition::Chunk { index: 0, total: 1 }, ImageManifest::None),
        );
        assert!(p.user.contains("(no cards yet)"));
        assert!(!p.user.contains("USER GUIDANCE"));
        assert!(!p.user.contains("{focus_areas}"));
    }

    #[test]
    fn test_correction_embeds_rejection() {
        let rejection = CardRejection {
            id: 1,
            card_id: 1,
            reason: "answer is wrong".into(),
            rejection_type: RejectionType::Incorrect,
            auto_corrected: false,
            created_at: Utc::now(),
        };
        let p = correction_prompt(&card(1, "Q", "A"), &rejection);
        assert!(p.user.contains("Type: incorrect"));
        assert!(p.user.contains("Feedback: answer is wrong"));
        assert_eq!(p.schema, correction_schema());
    }

    #[test]
    fn test_validation_prompt_lists_ids() {
        let p = validation_prompt(None, &[card(7, "Q", "A")]);
        assert!(p.user.contains("\"id\": 7"));
        assert!(!p.user.contains("{cards_json}"));
    }

    #[test]
    fn test_evolution_shows_edits_as_pairs() {
        let mut edited = card(3, "New Q", "New A");
        edited.original_front = Some("Old Q".into());
        edited.original_back = Some("Old A".into());
        let patterns = RejectionPatterns::default();
        let version = PromptVersion {
            id: 1,
            prompt_type: PromptType::Generation,
            version: 1,
            system_prompt: "SYS".into(),
            user_prompt_template: "USR".into(),
            is_active: true,
            parent_version_id: None,
            cards_generated: 0,
            cards_approved: 0,
            cards_rejected: 0,
            approval_rate: None,
            created_at: Utc::now(),
        };
        let p = evolution_prompt(
            &version,
            &EvolutionEvidence {
                patterns: &patterns,
                approved: &[],
                rejected: &[],
                edited: std::slice::from_ref(&edited),
            },
        );
        assert!(p.user.contains("Original Q: Old Q\nOriginal A: Old A\nEdited Q: New Q"));
        assert!(p.user.contains("## APPROVED cards (good)\nNone"));
        assert!(p.user.contains("## Current system prompt\nSYS"));
    }
}
