//! Attachment encoding: raw bytes → base64 payloads for the model API.
//!
//! Provider APIs (Anthropic, OpenAI, Gemini) accept documents and images as
//! base64 strings embedded in the JSON request body. Encoding happens once
//! per batch, here, so providers only ever see ready-to-send attachments.

use crate::llm::Attachment;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use tracing::debug;

pub fn encode_base64(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Wrap a PDF sub-document for native ingestion.
pub fn document_attachment(pdf: &[u8]) -> Attachment {
    let data = encode_base64(pdf);
    debug!("Encoded document → {} bytes base64", data.len());
    Attachment::Document {
        data,
        media_type: "application/pdf".to_string(),
    }
}

/// Wrap an image the model should see alongside the prompt.
pub fn image_attachment(name: &str, bytes: &[u8], media_type: &str) -> Attachment {
    Attachment::Image {
        name: name.to_string(),
        data: encode_base64(bytes),
        media_type: media_type.to_string(),
    }
}

/// Convert an image attachment into the chat client's image payload.
///
/// `detail: "high"` keeps fine print and small labels legible to
/// GPT-4-class models; diagrams on flashcards are often dense.
pub fn to_image_data(data: &str, media_type: &str) -> ImageData {
    ImageData::new(data.to_string(), media_type).with_detail("high")
}
