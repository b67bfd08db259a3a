//! Model access: provider capability trait, structured-output client and
//! provider resolution.
//!
//! ## Two provider families
//!
//! | Provider            | Native PDF | Images | Backed by            |
//! |---------------------|------------|--------|----------------------|
//! | [`AnthropicProvider`] | yes      | yes    | reqwest, Messages API |
//! | [`EdgequakeProvider`] | no       | yes    | `edgequake-llm`       |
//!
//! The orchestrator never branches on a provider name. It asks
//! [`ModelProvider::supports_native_document`] and
//! [`ModelProvider::supports_images`] and picks its code path from the
//! answers.

pub mod anthropic;
pub mod client;
pub mod edgequake;

pub use anthropic::AnthropicProvider;
pub use client::ModelClient;
pub use edgequake::EdgequakeProvider;

use crate::config::ForgeConfig;
use crate::error::{ForgeError, ProviderError};
use async_trait::async_trait;
use edgequake_llm::ProviderFactory;
use std::sync::Arc;
use tracing::info;

/// Default model for edgequake-llm providers when none is configured.
pub const DEFAULT_EDGEQUAKE_MODEL: &str = "gpt-4.1-nano";

/// Binary payload sent alongside the prompt, already base64-encoded.
#[derive(Debug, Clone, PartialEq)]
pub enum Attachment {
    /// A (sub-)document for native ingestion.
    Document { data: String, media_type: String },
    /// A standalone image. `name` is the filename the model should echo.
    Image {
        name: String,
        data: String,
        media_type: String,
    },
}

impl Attachment {
    pub fn is_document(&self) -> bool {
        matches!(self, Attachment::Document { .. })
    }
}

/// One provider round-trip.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub system: String,
    pub user: String,
    pub attachments: Vec<Attachment>,
    pub temperature: f32,
    pub max_tokens: usize,
}

/// A chat model with declared capabilities.
///
/// Implementations perform exactly one request per call and classify
/// failures into [`ProviderError`]; retrying is [`ModelClient`]'s job.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Accepts raw PDF bytes as an attachment.
    fn supports_native_document(&self) -> bool;

    /// Accepts image attachments.
    fn supports_images(&self) -> bool;

    /// Send the request and return the model's raw text.
    async fn complete(&self, request: &CompletionRequest) -> Result<String, ProviderError>;
}

/// Resolve the provider for a run, from most-specific to least-specific:
///
/// 1. **Pre-built provider** (`config.provider`), used as-is.
/// 2. **Named provider**: the session's stored choice, else
///    `config.provider_name`. `"anthropic"` gets the native-document
///    client; every other name goes through
///    [`ProviderFactory::create_llm_provider`].
/// 3. **Environment pair** (`EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`).
/// 4. **API keys**: `ANTHROPIC_API_KEY` first, since it unlocks native
///    document ingestion, then `OPENAI_API_KEY`.
/// 5. **Full auto-detection** (`ProviderFactory::from_env`).
pub fn resolve_provider(
    config: &ForgeConfig,
    named: Option<&str>,
) -> Result<Arc<dyn ModelProvider>, ForgeError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    let named = named
        .filter(|n| !n.is_empty() && *n != "auto")
        .or(config.provider_name.as_deref());
    if let Some(name) = named {
        return create_named(name, config.model.as_deref());
    }

    if let (Ok(prov), Ok(model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            return create_named(&prov, Some(&model));
        }
    }

    if env_key_present("ANTHROPIC_API_KEY") {
        return create_named("anthropic", config.model.as_deref());
    }
    if env_key_present("OPENAI_API_KEY") {
        return create_named("openai", config.model.as_deref());
    }

    let (llm, _embedding) = ProviderFactory::from_env().map_err(|e| ForgeError::ProviderNotConfigured {
        provider: "auto".to_string(),
        hint: format!(
            "No LLM provider could be auto-detected from environment.\n\
            Set ANTHROPIC_API_KEY, OPENAI_API_KEY, or configure a provider.\n\
            Error: {}",
            e
        ),
    })?;
    info!("Auto-detected LLM provider from environment");
    Ok(Arc::new(EdgequakeProvider::new("auto", llm)))
}

fn env_key_present(var: &str) -> bool {
    std::env::var(var).map(|v| !v.is_empty()).unwrap_or(false)
}

fn create_named(name: &str, model: Option<&str>) -> Result<Arc<dyn ModelProvider>, ForgeError> {
    if name.eq_ignore_ascii_case("anthropic") {
        let provider = AnthropicProvider::from_env(model)?;
        info!("Using Anthropic provider ({})", provider.model());
        return Ok(Arc::new(provider));
    }

    let model = model.unwrap_or(DEFAULT_EDGEQUAKE_MODEL);
    let llm = ProviderFactory::create_llm_provider(name, model).map_err(|e| {
        ForgeError::ProviderNotConfigured {
            provider: name.to_string(),
            hint: format!("{e}"),
        }
    })?;
    info!("Using {} provider ({})", name, model);
    Ok(Arc::new(EdgequakeProvider::new(name, llm)))
}
