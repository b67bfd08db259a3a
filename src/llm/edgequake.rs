//! Adapter from `edgequake-llm` chat providers to [`ModelProvider`].
//!
//! Covers OpenAI, Gemini, Mistral, Ollama, Azure and the rest of the
//! providers the factory knows about. These accept images next to the
//! prompt but not raw PDF bytes, so documents reach them as extracted text.

use super::{Attachment, CompletionRequest, ModelProvider};
use crate::error::ProviderError;
use crate::pipeline::encode::to_image_data;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider};
use std::sync::Arc;
use tracing::debug;

/// A factory-built chat provider with image support.
pub struct EdgequakeProvider {
    name: String,
    inner: Arc<dyn LLMProvider>,
}

impl EdgequakeProvider {
    pub fn new(name: &str, inner: Arc<dyn LLMProvider>) -> Self {
        Self {
            name: name.to_string(),
            inner,
        }
    }
}

impl std::fmt::Debug for EdgequakeProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EdgequakeProvider")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// System message plus one user message carrying every image.
fn build_messages(request: &CompletionRequest) -> Result<Vec<ChatMessage>, ProviderError> {
    let mut images: Vec<ImageData> = Vec::new();
    let mut labels = Vec::new();
    for att in &request.attachments {
        match att {
            Attachment::Document { .. } => {
                return Err(ProviderError::Api {
                    status: 400,
                    message: "document attachments are not supported by this provider".to_string(),
                })
            }
            Attachment::Image { name, data, media_type } => {
                labels.push(name.as_str());
                images.push(to_image_data(data, media_type));
            }
        }
    }

    let mut messages = vec![ChatMessage::system(request.system.as_str())];
    if images.is_empty() {
        messages.push(ChatMessage::user(request.user.as_str()));
    } else {
        // Images arrive in attachment order; name them so the model can
        // echo the filenames back in its references.
        let text = format!("Attached images, in order: {}\n\n{}", labels.join(", "), request.user);
        messages.push(ChatMessage::user_with_images(text, images));
    }
    Ok(messages)
}

/// Map an `edgequake-llm` error onto the retry classification.
///
/// The crate surfaces HTTP failures as formatted messages, so the status
/// hints are read from the text.
pub(crate) fn classify_error(provider: &str, message: &str) -> ProviderError {
    let lower = message.to_ascii_lowercase();
    if lower.contains("rate limit") || lower.contains("429") || lower.contains("too many requests") {
        ProviderError::RateLimited {
            provider: provider.to_string(),
            retry_after_secs: None,
        }
    } else if lower.contains("overloaded") || lower.contains("503") || lower.contains("529") {
        ProviderError::Overloaded {
            provider: provider.to_string(),
        }
    } else if lower.contains("401")
        || lower.contains("403")
        || lower.contains("unauthorized")
        || lower.contains("api key")
    {
        ProviderError::Auth {
            provider: provider.to_string(),
            detail: message.to_string(),
        }
    } else if lower.contains("connection") || lower.contains("dns") || lower.contains("network") {
        ProviderError::Transport(message.to_string())
    } else {
        ProviderError::Api {
            status: 0,
            message: message.to_string(),
        }
    }
}

#[async_trait]
impl ModelProvider for EdgequakeProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn supports_native_document(&self) -> bool {
        false
    }

    fn supports_images(&self) -> bool {
        true
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String, ProviderError> {
        let messages = build_messages(request)?;
        let options = CompletionOptions {
            temperature: Some(request.temperature),
            max_tokens: Some(request.max_tokens),
            ..Default::default()
        };

        match self.inner.chat(&messages, Some(&options)).await {
            Ok(response) => {
                debug!(
                    "{}: {} input tokens, {} output tokens",
                    self.name, response.prompt_tokens, response.completion_tokens
                );
                Ok(response.content)
            }
            Err(e) => Err(classify_error(&self.name, &e.to_string())),
        }
    }
}
