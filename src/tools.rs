//! Data-gathering tools
//!
//! The orchestrator never dispatches on tool names at runtime: the set of
//! tools is the closed `ToolInput` enum, and `ToolBox::invoke` is the single
//! entry point that applies the timeout and retry policy.

use crate::orders::{LookupDetail, OrderLookup, OrderLookupError, OrderLookupOutcome};
use crate::retriever::{KnowledgeRetriever, RetrievalError, RetrievedPassage};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

/// Input for the knowledge retrieval tool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnowledgeRetrievalInput {
    pub query: String,
    pub k: usize,
}

/// Input for the order lookup tool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLookupInput {
    pub order_id: String,
    pub detail: LookupDetail,
}

/// Strongly typed tool input
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "_tool", rename_all = "snake_case")]
pub enum ToolInput {
    KnowledgeRetrieval(KnowledgeRetrievalInput),
    OrderLookup(OrderLookupInput),
}

impl ToolInput {
    pub fn tool_name(&self) -> &'static str {
        match self {
            ToolInput::KnowledgeRetrieval(_) => "knowledge_retrieval",
            ToolInput::OrderLookup(_) => "order_lookup",
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            ToolInput::KnowledgeRetrieval(input) => serde_json::to_value(input).unwrap_or(Value::Null),
            ToolInput::OrderLookup(input) => serde_json::to_value(input).unwrap_or(Value::Null),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutput {
    Passages(Vec<RetrievedPassage>),
    Order(OrderLookupOutcome),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ToolError {
    #[error("Knowledge retrieval unavailable: {0}")]
    RetrievalUnavailable(String),
    #[error("Tool timed out")]
    ToolTimeout,
    #[error("Tool unavailable: {0}")]
    ToolUnavailable(String),
}

/// Record of one tool call, including any retry it needed
#[derive(Debug, Clone, PartialEq)]
pub struct ToolInvocation {
    pub tool_name: String,
    pub arguments: Value,
    pub result: Result<ToolOutput, ToolError>,
    pub latency: Duration,
    pub attempts: u32,
}

impl ToolInvocation {
    pub fn passages(&self) -> Option<&[RetrievedPassage]> {
        match &self.result {
            Ok(ToolOutput::Passages(p)) => Some(p),
            _ => None,
        }
    }

    pub fn order_outcome(&self) -> Option<&OrderLookupOutcome> {
        match &self.result {
            Ok(ToolOutput::Order(o)) => Some(o),
            _ => None,
        }
    }
}

/// The capability interface over both data-gathering backends
pub struct ToolBox<R, O> {
    retriever: R,
    orders: O,
    timeout: Duration,
}

impl<R: KnowledgeRetriever, O: OrderLookup> ToolBox<R, O> {
    pub fn new(retriever: R, orders: O, timeout: Duration) -> Self {
        Self {
            retriever,
            orders,
            timeout,
        }
    }

    /// Run one tool to completion. Never fails: errors are captured in the
    /// returned invocation. The timeout covers the retry as well.
    pub async fn invoke(&self, input: ToolInput) -> ToolInvocation {
        let start = Instant::now();
        let tool_name = input.tool_name();
        let arguments = input.to_value();
        let mut attempts = 0;

        let run = async {
            match &input {
                ToolInput::KnowledgeRetrieval(args) => {
                    attempts = 1;
                    self.retriever
                        .search(&args.query, args.k)
                        .await
                        .map(ToolOutput::Passages)
                        .map_err(retrieval_error)
                }
                ToolInput::OrderLookup(args) => {
                    attempts = 1;
                    let mut result = self.orders.lookup(&args.order_id, args.detail).await;
                    if matches!(&result, Err(e) if e.is_transient()) {
                        tracing::info!(order_id = %args.order_id, "Transient order lookup failure, retrying once");
                        attempts = 2;
                        result = self.orders.lookup(&args.order_id, args.detail).await;
                    }
                    result.map(ToolOutput::Order).map_err(order_error)
                }
            }
        };

        let result = match tokio::time::timeout(self.timeout, run).await {
            Ok(result) => result,
            Err(_) => Err(match input {
                ToolInput::KnowledgeRetrieval(_) => {
                    ToolError::RetrievalUnavailable("search timed out".to_string())
                }
                ToolInput::OrderLookup(_) => ToolError::ToolTimeout,
            }),
        };

        let latency = start.elapsed();
        match &result {
            Ok(_) => tracing::info!(
                tool = tool_name,
                latency_ms = %latency.as_millis(),
                attempts,
                "Tool invocation succeeded"
            ),
            Err(e) => tracing::warn!(
                tool = tool_name,
                latency_ms = %latency.as_millis(),
                attempts,
                error = %e,
                "Tool invocation failed"
            ),
        }

        ToolInvocation {
            tool_name: tool_name.to_string(),
            arguments,
            result,
            latency,
            attempts,
        }
    }
}

fn retrieval_error(e: RetrievalError) -> ToolError {
    ToolError::RetrievalUnavailable(e.to_string())
}

fn order_error(e: OrderLookupError) -> ToolError {
    match e {
        OrderLookupError::Timeout => ToolError::ToolTimeout,
        OrderLookupError::Unavailable { message, .. } => ToolError::ToolUnavailable(message),
    }
}
