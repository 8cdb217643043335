//! Spam classification and reply generation on top of an `LlmProvider`.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::error::LlmError;
use crate::llm::provider::{ChatMessage, CompletionRequest, LlmProvider};
use crate::pipeline::types::{InboundEmail, SpamVerdict};

/// System prompt for the one-word spam check.
pub const SPAM_CHECK_PROMPT: &str = "Analyze the email and respond with only one word: \
'SPAM' if it is spam/advertisement, or 'NORMAL' if it is a regular email";

/// Temperature for the spam check (deterministic-ish).
const SPAM_CHECK_TEMPERATURE: f32 = 0.1;

/// Decides whether a message is spam.
#[async_trait]
pub trait SpamClassifier: Send + Sync {
    async fn classify(&self, email: &InboundEmail) -> Result<SpamVerdict, LlmError>;
}

/// Produces reply text for a message.
#[async_trait]
pub trait ResponseGenerator: Send + Sync {
    /// The returned text may itself carry the spam signal; the caller checks.
    async fn generate(&self, email: &InboundEmail) -> Result<String, LlmError>;
}

/// Spam check backed by a one-word LLM answer.
pub struct LlmSpamClassifier {
    llm: Arc<dyn LlmProvider>,
}

impl LlmSpamClassifier {
    pub fn new(llm: Arc<dyn LlmProvider>) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl SpamClassifier for LlmSpamClassifier {
    async fn classify(&self, email: &InboundEmail) -> Result<SpamVerdict, LlmError> {
        info!(sender = %email.sender, "Checking for spam");

        let request = CompletionRequest::new(vec![
            ChatMessage::system(SPAM_CHECK_PROMPT),
            ChatMessage::user(email.prompt()),
        ])
        .with_temperature(SPAM_CHECK_TEMPERATURE);

        let response = self.llm.complete(request).await?;
        let verdict = SpamVerdict::from_label(&response.content);
        debug!(
            sender = %email.sender,
            label = %response.content.trim(),
            spam = verdict.is_spam(),
            "Spam check result"
        );
        Ok(verdict)
    }
}

/// Reply generation driven by the configured system prompt.
pub struct LlmResponder {
    llm: Arc<dyn LlmProvider>,
    system_prompt: String,
}

impl LlmResponder {
    pub fn new(llm: Arc<dyn LlmProvider>, system_prompt: impl Into<String>) -> Self {
        Self {
            llm,
            system_prompt: system_prompt.into(),
        }
    }
}

#[async_trait]
impl ResponseGenerator for LlmResponder {
    async fn generate(&self, email: &InboundEmail) -> Result<String, LlmError> {
        info!(sender = %email.sender, "Running response generation");

        let request = CompletionRequest::new(vec![
            ChatMessage::system(self.system_prompt.clone()),
            ChatMessage::user(email.prompt()),
        ]);

        let response = self.llm.complete(request).await?;
        if response.content.trim().is_empty() {
            return Err(LlmError::EmptyResponse {
                provider: self.llm.model_name().to_string(),
            });
        }
        Ok(response.content)
    }
}
