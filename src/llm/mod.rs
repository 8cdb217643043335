//! Text-generation services.
//!
//! `OpenAiCompatProvider` speaks the `/chat/completions` wire format, which
//! covers OpenAI itself and any self-hosted model behind a compatible API.
//! The spam check and reply generation sit on top of the `LlmProvider` trait
//! so the pipeline never sees HTTP.

pub mod provider;
pub mod services;

pub use provider::{
    ChatMessage, CompletionRequest, CompletionResponse, LlmProvider, OpenAiCompatProvider, Role,
    SseAccumulator,
};
pub use services::{
    LlmResponder, LlmSpamClassifier, ResponseGenerator, SPAM_CHECK_PROMPT, SpamClassifier,
};

use std::sync::Arc;

use crate::config::LlmConfig;
use crate::error::LlmError;

/// Create an LLM provider from configuration.
pub fn create_provider(config: &LlmConfig) -> Result<Arc<dyn LlmProvider>, LlmError> {
    let provider = OpenAiCompatProvider::new(config)?;
    tracing::info!(
        "Using {} (model: {}, streaming: {})",
        config.base_url,
        config.model,
        config.stream
    );
    Ok(Arc::new(provider))
}
