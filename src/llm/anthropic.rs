//! Anthropic Messages API client with native PDF ingestion.
//!
//! One request per [`ModelProvider::complete`] call. Non-success responses
//! are classified into [`ProviderError`] so the model client can decide
//! whether to back off; this module never retries on its own.

use super::{Attachment, CompletionRequest, ModelProvider};
use crate::error::{ForgeError, ProviderError};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, RETRY_AFTER};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use tracing::{debug, warn};

/// Base URL for the Anthropic Messages API.
const API_BASE_URL: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";

/// Model used when the caller does not name one.
pub const DEFAULT_ANTHROPIC_MODEL: &str = "claude-sonnet-4-20250514";

const PROVIDER: &str = "anthropic";

// ── Wire types ───────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct MessageRequest<'a> {
    model: &'a str,
    max_tokens: usize,
    temperature: f32,
    system: &'a str,
    messages: Vec<RequestMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct RequestMessage<'a> {
    role: &'static str,
    content: Vec<ContentBlock<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock<'a> {
    Text { text: Cow<'a, str> },
    Image { source: Base64Source<'a> },
    Document { source: Base64Source<'a> },
}

#[derive(Debug, Serialize)]
struct Base64Source<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    media_type: &'a str,
    data: &'a str,
}

impl<'a> Base64Source<'a> {
    fn new(media_type: &'a str, data: &'a str) -> Self {
        Self {
            kind: "base64",
            media_type,
            data,
        }
    }
}

#[derive(Debug, Deserialize)]
struct MessageResponse {
    #[serde(default)]
    content: Vec<ResponseBlock>,
}

#[derive(Debug, Deserialize)]
struct ResponseBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    #[serde(rename = "type")]
    kind: String,
    message: String,
}

// ── Client ───────────────────────────────────────────────────────────────

/// HTTP client for the Anthropic Messages API.
#[derive(Debug, Clone)]
pub struct AnthropicProvider {
    client: reqwest::Client,
    model: String,
    base_url: String,
}

impl AnthropicProvider {
    /// Creates a client authenticated with `api_key`.
    pub fn new(api_key: &str, model: impl Into<String>) -> Result<Self, ForgeError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-api-key",
            HeaderValue::from_str(api_key)
                .map_err(|e| ForgeError::InvalidConfig(format!("invalid API key header value: {e}")))?,
        );
        headers.insert("anthropic-version", HeaderValue::from_static(API_VERSION));
        headers.insert("content-type", HeaderValue::from_static("application/json"));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .map_err(|e| ForgeError::Internal(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            model: model.into(),
            base_url: API_BASE_URL.to_string(),
        })
    }

    /// Reads `ANTHROPIC_API_KEY` from the environment.
    pub fn from_env(model: Option<&str>) -> Result<Self, ForgeError> {
        let key = std::env::var("ANTHROPIC_API_KEY")
            .ok()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| ForgeError::ProviderNotConfigured {
                provider: PROVIDER.to_string(),
                hint: "Set ANTHROPIC_API_KEY to use the Anthropic provider.".to_string(),
            })?;
        Self::new(&key, model.unwrap_or(DEFAULT_ANTHROPIC_MODEL))
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Overrides the endpoint (wiremock, proxies).
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    fn build_request<'a>(&'a self, request: &'a CompletionRequest) -> MessageRequest<'a> {
        let mut content = Vec::with_capacity(request.attachments.len() * 2 + 1);
        // Document first, then each image behind its name, then the instructions.
        for att in request.attachments.iter().filter(|a| a.is_document()) {
            if let Attachment::Document { data, media_type } = att {
                content.push(ContentBlock::Document {
                    source: Base64Source::new(media_type, data),
                });
            }
        }
        for att in &request.attachments {
            if let Attachment::Image {
                name,
                data,
                media_type,
            } = att
            {
                content.push(ContentBlock::Text {
                    text: Cow::Owned(format!("Image: {name}")),
                });
                content.push(ContentBlock::Image {
                    source: Base64Source::new(media_type, data),
                });
            }
        }
        content.push(ContentBlock::Text {
            text: Cow::Borrowed(&request.user),
        });

        MessageRequest {
            model: &self.model,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            system: &request.system,
            messages: vec![RequestMessage {
                role: "user",
                content,
            }],
        }
    }
}

#[async_trait]
impl ModelProvider for AnthropicProvider {
    fn name(&self) -> &str {
        PROVIDER
    }

    fn supports_native_document(&self) -> bool {
        true
    }

    fn supports_images(&self) -> bool {
        true
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String, ProviderError> {
        let body = self.build_request(request);
        let response = self
            .client
            .post(&self.base_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Timeout { secs: 0 }
                } else {
                    ProviderError::Transport(format!("HTTP request failed: {e}"))
                }
            })?;

        let status = response.status();
        debug!(status = %status, model = %self.model, "anthropic response received");

        if status.is_success() {
            let parsed: MessageResponse = response
                .json()
                .await
                .map_err(|e| ProviderError::Transport(format!("failed to parse API response: {e}")))?;
            let text: String = parsed
                .content
                .into_iter()
                .filter(|b| b.kind == "text")
                .filter_map(|b| b.text)
                .collect::<Vec<_>>()
                .join("");
            return Ok(text);
        }

        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok());
        let body = response.text().await.unwrap_or_default();
        let err = classify_status(status, retry_after, &body);
        warn!(status = %status, "anthropic request failed: {}", err);
        Err(err)
    }
}

fn classify_status(status: StatusCode, retry_after: Option<u64>, body: &str) -> ProviderError {
    let message = match serde_json::from_str::<ApiErrorResponse>(body) {
        Ok(api) => format!("{}: {}", api.error.kind, api.error.message),
        Err(_) => body.to_string(),
    };
    match status.as_u16() {
        429 => ProviderError::RateLimited {
            provider: PROVIDER.to_string(),
            retry_after_secs: retry_after,
        },
        503 | 529 => ProviderError::Overloaded {
            provider: PROVIDER.to_string(),
        },
        401 | 403 => ProviderError::Auth {
            provider: PROVIDER.to_string(),
            detail: message,
        },
        code => ProviderError::Api { status: code, message },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider(server: &MockServer) -> AnthropicProvider {
        AnthropicProvider::new("test-key", "claude-test")
            .unwrap()
            .with_base_url(server.uri())
    }

    fn request(attachments: Vec<Attachment>) -> CompletionRequest {
        CompletionRequest {
            system: "sys".into(),
            user: "make cards".into(),
            attachments,
            temperature: 0.3,
            max_tokens: 1024,
        }
    }

    #[tokio::test]
    async fn sends_document_then_named_images_then_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("x-api-key", "test-key"))
            .and(header("anthropic-version", API_VERSION))
            .and(body_partial_json(json!({
                "model": "claude-test",
                "system": "sys",
                "messages": [{
                    "role": "user",
                    "content": [
                        {"type": "document", "source": {"type": "base64", "media_type": "application/pdf", "data": "JVBERg=="}},
                        {"type": "text", "text": "Image: page1_img0.png"},
                        {"type": "image", "source": {"type": "base64", "media_type": "image/png", "data": "iVBO"}},
                        {"type": "text", "text": "make cards"}
                    ]
                }]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "content": [
                    {"type": "text", "text": "{\"cards\": "},
                    {"type": "text", "text": "[]}"}
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        // Image listed before the document to check ordering is enforced.
        let reply = provider(&server)
            .complete(&request(vec![
                Attachment::Image {
                    name: "page1_img0.png".into(),
                    data: "iVBO".into(),
                    media_type: "image/png".into(),
                },
                Attachment::Document {
                    data: "JVBERg==".into(),
                    media_type: "application/pdf".into(),
                },
            ]))
            .await
            .unwrap();
        assert_eq!(reply, "{\"cards\": []}");
    }

    #[tokio::test]
    async fn rate_limit_carries_retry_after() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "7"))
            .mount(&server)
            .await;

        let err = provider(&server).complete(&request(vec![])).await.unwrap_err();
        assert_eq!(
            err,
            ProviderError::RateLimited {
                provider: "anthropic".into(),
                retry_after_secs: Some(7)
            }
        );
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn overloaded_is_retryable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(529).set_body_json(json!({
                "type": "error",
                "error": {"type": "overloaded_error", "message": "Overloaded"}
            })))
            .mount(&server)
            .await;

        let err = provider(&server).complete(&request(vec![])).await.unwrap_err();
        assert!(matches!(err, ProviderError::Overloaded { .. }));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn unauthorized_is_not_retryable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({
                "type": "error",
                "error": {"type": "authentication_error", "message": "invalid x-api-key"}
            })))
            .mount(&server)
            .await;

        let err = provider(&server).complete(&request(vec![])).await.unwrap_err();
        match err {
            ProviderError::Auth { detail, .. } => assert!(detail.contains("invalid x-api-key")),
            other => panic!("expected auth error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn bad_request_keeps_api_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "type": "error",
                "error": {"type": "invalid_request_error", "message": "PDF too large"}
            })))
            .mount(&server)
            .await;

        let err = provider(&server).complete(&request(vec![])).await.unwrap_err();
        assert_eq!(
            err,
            ProviderError::Api {
                status: 400,
                message: "invalid_request_error: PDF too large".into()
            }
        );
        assert!(!err.is_retryable());
    }
}
