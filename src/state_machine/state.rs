//! Orchestration run state types

use crate::classifier::Route;
use crate::context::OrderFact;
use crate::retriever::RetrievedPassage;
use serde::{Deserialize, Serialize};

/// Generation calls allowed per run, counting the one retry
pub const MAX_GENERATION_ATTEMPTS: u32 = 2;

/// Sent when a run cannot produce any grounded reply
pub const FALLBACK_REPLY: &str = "I'm sorry, something went wrong while handling your request. \
Please try again in a moment.";

/// Sent when the model keeps producing replies that fail validation
pub const APOLOGY_REPLY: &str = "I'm sorry, I couldn't put together a reliable answer to that. \
Could you rephrase your question, or contact our support team?";

/// Partial failures recorded during a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunFailure {
    RetrievalUnavailable,
    ToolUnavailable,
    ToolTimeout,
    GenerationUnavailable,
    TotalBudgetExceeded,
    InvalidReply,
    Internal,
}

/// Whatever the data-gathering branches produced once both settled
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Gathered {
    pub passages: Vec<RetrievedPassage>,
    pub fact: Option<OrderFact>,
    pub failures: Vec<RunFailure>,
}

/// Read-only run configuration visible to transitions
#[derive(Debug, Clone)]
pub struct RunContext {
    pub max_reply_chars: usize,
    pub max_generation_attempts: u32,
}

impl RunContext {
    pub fn new(max_reply_chars: usize) -> Self {
        Self {
            max_reply_chars,
            max_generation_attempts: MAX_GENERATION_ATTEMPTS,
        }
    }
}

/// Run state. `Done` and `Error` are terminal.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum RunState {
    #[default]
    Start,
    Classifying,
    /// Retrieval and/or order lookup in flight
    Gathering { route: Route },
    Composing { gathered: Gathered },
    Generating {
        attempt: u32,
        strict: bool,
        gathered: Gathered,
    },
    Done {
        reply: String,
        failures: Vec<RunFailure>,
    },
    Error {
        reply: String,
        failures: Vec<RunFailure>,
    },
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Done { .. } | RunState::Error { .. })
    }

    /// Partial failures already carried by the state
    pub fn recorded_failures(&self) -> Vec<RunFailure> {
        match self {
            RunState::Composing { gathered } | RunState::Generating { gathered, .. } => {
                gathered.failures.clone()
            }
            RunState::Done { failures, .. } | RunState::Error { failures, .. } => failures.clone(),
            RunState::Start | RunState::Classifying | RunState::Gathering { .. } => Vec::new(),
        }
    }

    /// Stage label used in logs
    pub fn stage(&self) -> &'static str {
        match self {
            RunState::Start => "START",
            RunState::Classifying => "CLASSIFY",
            RunState::Gathering { route } => match route {
                Route::DirectAnswer => "DIRECT_ANSWER",
                Route::RetrieveKb => "RETRIEVE_KB",
                Route::CallTool(_) => "CALL_TOOL",
                Route::RetrieveKbAndCallTool(_) => "RETRIEVE_KB_AND_CALL_TOOL",
            },
            RunState::Composing { .. } => "COMPOSE",
            RunState::Generating { .. } => "GENERATE",
            RunState::Done { .. } => "DONE",
            RunState::Error { .. } => "ERROR",
        }
    }
}
