//! Environment configuration

use crate::llm::{LlmConfig, DEFAULT_EMBEDDING_MODEL};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Smallest prompt budget that still leaves room for instructions, the
/// question and a tool result.
pub const MIN_PROMPT_BUDGET_CHARS: usize = 1024;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("RETRIEVAL_K must be at least 1")]
    ZeroRetrievalK,
    #[error("PROMPT_BUDGET_CHARS must be at least {MIN_PROMPT_BUDGET_CHARS}, got {0}")]
    PromptBudgetTooSmall(usize),
    #[error("{0} must be greater than zero")]
    ZeroTimeout(&'static str),
    #[error("MIN_RELEVANCE must be within [-1, 1]")]
    RelevanceOutOfRange,
}

/// Timeouts applied to every external call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// Per retrieval or order-lookup call
    pub branch: Duration,
    /// Per answer-generation call
    pub generation: Duration,
    /// Whole orchestration run
    pub total: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            branch: Duration::from_millis(4_000),
            generation: Duration::from_millis(20_000),
            total: Duration::from_millis(30_000),
        }
    }
}

/// Knobs the orchestrator reads on every run
#[derive(Debug, Clone, PartialEq)]
pub struct OrchestratorConfig {
    pub retrieval_k: usize,
    pub min_relevance: f32,
    pub prompt_budget_chars: usize,
    pub history_budget_chars: usize,
    pub max_reply_chars: usize,
    pub timeouts: Timeouts,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            retrieval_k: 3,
            min_relevance: 0.2,
            prompt_budget_chars: 12_000,
            history_budget_chars: 8_000,
            max_reply_chars: 2_000,
            timeouts: Timeouts::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub llm: LlmConfig,
    pub embedding_model: String,
    pub kb_index_path: PathBuf,
    pub order_api_base_url: String,
    pub port: u16,
    pub orchestrator: OrchestratorConfig,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = OrchestratorConfig::default();
        let number = |key: &'static str, default_ms: u64| {
            Duration::from_millis(parse_or(&lookup, key, default_ms))
        };

        let orchestrator = OrchestratorConfig {
            retrieval_k: parse_or(&lookup, "RETRIEVAL_K", defaults.retrieval_k),
            min_relevance: parse_or(&lookup, "MIN_RELEVANCE", defaults.min_relevance),
            prompt_budget_chars: parse_or(
                &lookup,
                "PROMPT_BUDGET_CHARS",
                defaults.prompt_budget_chars,
            ),
            history_budget_chars: parse_or(
                &lookup,
                "HISTORY_BUDGET_CHARS",
                defaults.history_budget_chars,
            ),
            max_reply_chars: parse_or(&lookup, "MAX_REPLY_CHARS", defaults.max_reply_chars),
            timeouts: Timeouts {
                branch: number("BRANCH_TIMEOUT_MS", 4_000),
                generation: number("GENERATION_TIMEOUT_MS", 20_000),
                total: number("TOTAL_BUDGET_MS", 30_000),
            },
        };
        orchestrator.validate()?;

        Ok(Self {
            llm: LlmConfig {
                openai_api_key: lookup("OPENAI_API_KEY"),
                anthropic_api_key: lookup("ANTHROPIC_API_KEY"),
                gateway: lookup("LLM_GATEWAY"),
                model: lookup("LLM_MODEL"),
            },
            embedding_model: lookup("EMBEDDING_MODEL")
                .unwrap_or_else(|| DEFAULT_EMBEDDING_MODEL.to_string()),
            kb_index_path: lookup("KB_INDEX_PATH")
                .map_or_else(|| PathBuf::from("./kb_index.sqlite3"), PathBuf::from),
            order_api_base_url: lookup("ORDER_API_BASE_URL")
                .unwrap_or_else(|| "http://localhost:8001".to_string()),
            port: parse_or(&lookup, "PORT", 8000),
            orchestrator,
        })
    }
}

impl OrchestratorConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.retrieval_k == 0 {
            return Err(ConfigError::ZeroRetrievalK);
        }
        if self.prompt_budget_chars < MIN_PROMPT_BUDGET_CHARS {
            return Err(ConfigError::PromptBudgetTooSmall(self.prompt_budget_chars));
        }
        if !(-1.0..=1.0).contains(&self.min_relevance) {
            return Err(ConfigError::RelevanceOutOfRange);
        }
        for (name, value) in [
            ("BRANCH_TIMEOUT_MS", self.timeouts.branch),
            ("GENERATION_TIMEOUT_MS", self.timeouts.generation),
            ("TOTAL_BUDGET_MS", self.timeouts.total),
        ] {
            if value.is_zero() {
                return Err(ConfigError::ZeroTimeout(name));
            }
        }
        Ok(())
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T
where
    T: FromStr + std::fmt::Display,
{
    match lookup(key) {
        None => default,
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %raw, default = %default, "Invalid number, using default");
            default
        }),
    }
}
