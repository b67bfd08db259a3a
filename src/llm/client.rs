//! Structured-output model client.
//!
//! ## Two independent retry loops
//!
//! A single call may need both:
//!
//! * **Rate-limit loop** (inner): a [`ProviderError`] whose
//!   [`is_retryable`](ProviderError::is_retryable) is true triggers an
//!   exponential backoff, `min(retry_backoff_ms * 2^attempt, max_backoff_ms)`,
//!   or the server's `retry-after` when one was sent. Bounded by
//!   `max_rate_limit_retries`. Any other provider error surfaces at once.
//!
//! * **JSON loop** (outer): a response that does not parse into the expected
//!   shape is retried up to `max_json_attempts` round-trips. Each retry
//!   appends a sharper admonition to the system prompt, so the model sees
//!   escalating pressure rather than the same prompt again.
//!
//! Every round-trip runs under `tokio::time::timeout(api_timeout_secs)`.
//! A timeout is a [`ProviderError::Timeout`] and is not retried.

use crate::config::ForgeConfig;
use crate::error::{ForgeError, ProviderError};
use crate::llm::{Attachment, CompletionRequest, ModelProvider};
use crate::prompts::AssembledPrompt;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, warn};

/// Appended to the system prompt on the 2nd, 3rd, ... JSON attempt.
const JSON_ADMONITIONS: &[&str] = &[
    "YOUR PREVIOUS RESPONSE WAS NOT VALID JSON. Return ONLY the JSON object, \
     with no Markdown fences and no commentary before or after it.",
    "YOUR RESPONSE WAS AGAIN INVALID. The first character of your reply must be '{' \
     and the last must be '}'. Escape every double quote and newline inside string \
     values. Include every required field.",
    "FINAL ATTEMPT. Output a single JSON object matching the schema exactly. \
     Nothing else.",
];

/// Outcome of parsing one raw response.
#[derive(Debug)]
enum Attempt<T> {
    Parsed(T),
    Malformed { detail: String },
}

/// Provider wrapper that enforces the JSON contract and retry policy.
#[derive(Clone)]
pub struct ModelClient {
    provider: Arc<dyn ModelProvider>,
    temperature: f32,
    max_tokens: usize,
    max_json_attempts: u32,
    max_rate_limit_retries: u32,
    retry_backoff_ms: u64,
    max_backoff_ms: u64,
    api_timeout_secs: u64,
}

impl std::fmt::Debug for ModelClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelClient")
            .field("provider", &self.provider.name())
            .field("max_json_attempts", &self.max_json_attempts)
            .field("max_rate_limit_retries", &self.max_rate_limit_retries)
            .finish_non_exhaustive()
    }
}

impl ModelClient {
    pub fn new(provider: Arc<dyn ModelProvider>, config: &ForgeConfig) -> Self {
        Self {
            provider,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            max_json_attempts: config.max_json_attempts.max(1),
            max_rate_limit_retries: config.max_rate_limit_retries,
            retry_backoff_ms: config.retry_backoff_ms,
            max_backoff_ms: config.max_backoff_ms,
            api_timeout_secs: config.api_timeout_secs,
        }
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    pub fn supports_native_document(&self) -> bool {
        self.provider.supports_native_document()
    }

    pub fn supports_images(&self) -> bool {
        self.provider.supports_images()
    }

    /// Text-only structured completion.
    pub async fn complete_structured<T: DeserializeOwned>(
        &self,
        prompt: &AssembledPrompt,
    ) -> Result<T, ForgeError> {
        self.run(prompt, Vec::new()).await
    }

    /// Structured completion over a native document plus optional images.
    pub async fn complete_structured_with_document<T: DeserializeOwned>(
        &self,
        prompt: &AssembledPrompt,
        document: Attachment,
        images: Vec<Attachment>,
    ) -> Result<T, ForgeError> {
        if !self.supports_native_document() {
            return Err(ForgeError::CapabilityMissing {
                provider: self.provider_name().to_string(),
                capability: "ingest native documents",
            });
        }
        let mut attachments = Vec::with_capacity(images.len() + 1);
        attachments.push(document);
        attachments.extend(images);
        self.run(prompt, attachments).await
    }

    /// Structured completion with standalone images.
    pub async fn complete_structured_with_images<T: DeserializeOwned>(
        &self,
        prompt: &AssembledPrompt,
        images: Vec<Attachment>,
    ) -> Result<T, ForgeError> {
        if !images.is_empty() && !self.supports_images() {
            return Err(ForgeError::CapabilityMissing {
                provider: self.provider_name().to_string(),
                capability: "accept image attachments",
            });
        }
        self.run(prompt, images).await
    }

    async fn run<T: DeserializeOwned>(
        &self,
        prompt: &AssembledPrompt,
        attachments: Vec<Attachment>,
    ) -> Result<T, ForgeError> {
        let mut request = CompletionRequest {
            system: with_format_contract(&prompt.system, &prompt.schema),
            user: format!(
                "{}\n\nRemember to respond with only a valid JSON object according to the specified format.",
                prompt.user
            ),
            attachments,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        let mut last_detail = String::new();
        for attempt in 1..=self.max_json_attempts {
            if attempt > 1 {
                let idx = (attempt as usize - 2).min(JSON_ADMONITIONS.len() - 1);
                request.system.push_str("\n\n");
                request.system.push_str(JSON_ADMONITIONS[idx]);
            }

            let raw = self.send(&request).await?;
            match parse_attempt::<T>(&raw) {
                Attempt::Parsed(value) => {
                    debug!(attempt, "Structured response parsed");
                    return Ok(value);
                }
                Attempt::Malformed { detail } => {
                    warn!(
                        "Invalid JSON from {} (attempt {}/{}): {}",
                        self.provider_name(),
                        attempt,
                        self.max_json_attempts,
                        detail
                    );
                    last_detail = detail;
                }
            }
        }

        Err(ForgeError::InvalidModelOutput {
            attempts: self.max_json_attempts,
            detail: last_detail,
        })
    }

    /// One logical call: the rate-limit loop around single round-trips.
    async fn send(&self, request: &CompletionRequest) -> Result<String, ProviderError> {
        let mut attempt: u32 = 0;
        loop {
            let result = match timeout(
                Duration::from_secs(self.api_timeout_secs),
                self.provider.complete(request),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(ProviderError::Timeout {
                    secs: self.api_timeout_secs,
                }),
            };

            match result {
                Ok(text) => return Ok(text),
                Err(e) if e.is_retryable() && attempt < self.max_rate_limit_retries => {
                    let delay = self.backoff_delay(attempt, e.retry_after_secs());
                    warn!(
                        "{} (retry {}/{} in {}ms)",
                        e,
                        attempt + 1,
                        self.max_rate_limit_retries,
                        delay.as_millis()
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn backoff_delay(&self, attempt: u32, retry_after_secs: Option<u64>) -> Duration {
        let ms = match retry_after_secs {
            Some(secs) => secs.saturating_mul(1000),
            None => self
                .retry_backoff_ms
                .saturating_mul(1u64 << attempt.min(32)),
        };
        Duration::from_millis(ms.min(self.max_backoff_ms))
    }
}

fn with_format_contract(system: &str, schema: &serde_json::Value) -> String {
    let format = serde_json::to_string_pretty(schema).unwrap_or_else(|_| schema.to_string());
    format!(
        "{system}\n\nYou must respond with a valid JSON object using the following format:\n\
         {format}\n\nDo not include any text outside of the JSON object."
    )
}

static RE_FENCES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```[A-Za-z]*\s*\n?(.*?)\n?```\s*$").unwrap());

/// Remove a surrounding Markdown code fence, if any.
pub(crate) fn strip_code_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    match RE_FENCES.captures(trimmed).and_then(|c| c.get(1)) {
        Some(inner) => inner.as_str().trim(),
        None => trimmed,
    }
}

fn parse_attempt<T: DeserializeOwned>(raw: &str) -> Attempt<T> {
    let body = strip_code_fences(raw);
    let first_err = match serde_json::from_str::<T>(body) {
        Ok(value) => return Attempt::Parsed(value),
        Err(e) => e,
    };

    // Prose around the object: retry on the outermost braces.
    if let (Some(start), Some(end)) = (body.find('{'), body.rfind('}')) {
        if start < end && (start > 0 || end + 1 < body.len()) {
            if let Ok(value) = serde_json::from_str::<T>(&body[start..=end]) {
                return Attempt::Parsed(value);
            }
        }
    }

    let preview: String = body.chars().take(120).collect();
    Attempt::Malformed {
        detail: format!("{first_err} (response began: {preview:?})"),
    }
}
