//! Answer generation over a language model

use crate::context::PromptContext;
use crate::llm::{LlmRequest, LlmService, SystemContent};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

/// Appended to the instructions when a previous reply was rejected
pub const STRICT_INSTRUCTION: &str = "Your previous reply was rejected. Reply in at most five sentences. \
Use only the facts given above, and if an order status is given, repeat it word for word.";

const MAX_REPLY_TOKENS: u32 = 600;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedReply {
    pub text: String,
    /// False when the model stopped early (length cut-off, filter)
    pub finished: bool,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GenerationError {
    #[error("Answer generation unavailable: {0}")]
    Unavailable(String),
    #[error("Answer generation timed out")]
    Timeout,
}

#[async_trait]
pub trait AnswerGenerator: Send + Sync {
    async fn generate(
        &self,
        prompt: &PromptContext,
        strict: bool,
    ) -> Result<GeneratedReply, GenerationError>;
}

#[async_trait]
impl<T: AnswerGenerator + ?Sized> AnswerGenerator for Arc<T> {
    async fn generate(
        &self,
        prompt: &PromptContext,
        strict: bool,
    ) -> Result<GeneratedReply, GenerationError> {
        (**self).generate(prompt, strict).await
    }
}

pub struct LlmAnswerGenerator {
    llm: Arc<dyn LlmService>,
}

impl LlmAnswerGenerator {
    pub fn new(llm: Arc<dyn LlmService>) -> Self {
        Self { llm }
    }

    fn build_request(prompt: &PromptContext, strict: bool) -> LlmRequest {
        let mut system = vec![SystemContent::cached(&prompt.system)];
        if strict {
            system.push(SystemContent::new(STRICT_INSTRUCTION));
        }
        LlmRequest {
            max_tokens: Some(MAX_REPLY_TOKENS),
            temperature: Some(0.0),
            ..LlmRequest::single_turn(system, &prompt.body)
        }
    }
}

#[async_trait]
impl AnswerGenerator for LlmAnswerGenerator {
    async fn generate(
        &self,
        prompt: &PromptContext,
        strict: bool,
    ) -> Result<GeneratedReply, GenerationError> {
        let request = Self::build_request(prompt, strict);
        let response = self
            .llm
            .complete(&request)
            .await
            .map_err(|e| GenerationError::Unavailable(e.message))?;

        Ok(GeneratedReply {
            text: response.text.trim().to_string(),
            finished: response.end_turn,
        })
    }
}
