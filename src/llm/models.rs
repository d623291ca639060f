//! Centralized model definitions for all LLM providers

use super::anthropic::AnthropicModel;
use super::openai::OpenAIModel;
use super::{AnthropicService, LlmService, OpenAIService};
use std::sync::Arc;

/// LLM provider enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Provider {
    Anthropic,
    OpenAI,
}

impl Provider {
    pub fn display_name(self) -> &'static str {
        match self {
            Provider::Anthropic => "Anthropic",
            Provider::OpenAI => "OpenAI",
        }
    }

    pub fn api_key_env_var(self) -> &'static str {
        match self {
            Provider::Anthropic => "ANTHROPIC_API_KEY",
            Provider::OpenAI => "OPENAI_API_KEY",
        }
    }
}

/// Model definition with metadata
#[derive(Debug, Clone)]
pub struct ModelDef {
    /// User-facing model ID (e.g., "gpt-4o-mini")
    pub id: &'static str,
    pub provider: Provider,
    pub description: &'static str,
    /// Factory function to create the service
    pub factory: fn(&str, Option<&str>) -> Result<Arc<dyn LlmService>, String>,
}

fn openai(model: OpenAIModel, api_key: &str, gateway: Option<&str>) -> Result<Arc<dyn LlmService>, String> {
    if api_key.is_empty() {
        return Err(format!("{} requires OPENAI_API_KEY or gateway", model.model_id()));
    }
    Ok(Arc::new(OpenAIService::new(api_key.to_string(), model, gateway)?))
}

fn anthropic(
    model: AnthropicModel,
    api_key: &str,
    gateway: Option<&str>,
) -> Result<Arc<dyn LlmService>, String> {
    if api_key.is_empty() {
        return Err(format!("{} requires ANTHROPIC_API_KEY or gateway", model.model_id()));
    }
    Ok(Arc::new(AnthropicService::new(api_key.to_string(), model, gateway)?))
}

/// Get all available model definitions
pub fn all_models() -> &'static [ModelDef] {
    &[
        ModelDef {
            id: "gpt-4o-mini",
            provider: Provider::OpenAI,
            description: "GPT-4o mini (fast, inexpensive; default)",
            factory: |key, gw| openai(OpenAIModel::GPT4oMini, key, gw),
        },
        ModelDef {
            id: "gpt-4o",
            provider: Provider::OpenAI,
            description: "GPT-4o",
            factory: |key, gw| openai(OpenAIModel::GPT4o, key, gw),
        },
        ModelDef {
            id: "gpt-4.1-mini",
            provider: Provider::OpenAI,
            description: "GPT-4.1 mini",
            factory: |key, gw| openai(OpenAIModel::GPT41Mini, key, gw),
        },
        ModelDef {
            id: "claude-3.5-haiku",
            provider: Provider::Anthropic,
            description: "Claude 3.5 Haiku (fast)",
            factory: |key, gw| anthropic(AnthropicModel::Claude35Haiku, key, gw),
        },
        ModelDef {
            id: "claude-4-sonnet",
            provider: Provider::Anthropic,
            description: "Claude Sonnet 4",
            factory: |key, gw| anthropic(AnthropicModel::Claude4Sonnet, key, gw),
        },
    ]
}
