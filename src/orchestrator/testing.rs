//! Mock implementations for testing
//!
//! These mocks stand in for the model, the knowledge base and the order
//! service so orchestration can be exercised without real I/O.

use crate::context::PromptContext;
use crate::generator::{AnswerGenerator, GeneratedReply, GenerationError};
use crate::llm::{LlmError, LlmRequest, LlmResponse, LlmService};
use crate::orders::{
    LookupDetail, OrderLookup, OrderLookupError, OrderLookupOutcome, OrderStatus,
};
use crate::retriever::{KnowledgeRetriever, RetrievalError, RetrievedPassage};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

// ============================================================================
// Mock LLM Service
// ============================================================================

/// Mock LLM service that returns queued responses
pub struct MockLlmService {
    responses: Mutex<VecDeque<Result<LlmResponse, LlmError>>>,
    model_id: String,
    requests: Mutex<Vec<LlmRequest>>,
}

impl MockLlmService {
    pub fn new(model_id: impl Into<String>) -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            model_id: model_id.into(),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn queue_response(&self, response: LlmResponse) {
        self.responses.lock().unwrap().push_back(Ok(response));
    }

    pub fn queue_error(&self, error: LlmError) {
        self.responses.lock().unwrap().push_back(Err(error));
    }

    pub fn recorded_requests(&self) -> Vec<LlmRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl LlmService for MockLlmService {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        self.requests.lock().unwrap().push(request.clone());
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(LlmError::network("No mock response queued")))
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}

// ============================================================================
// Mock Answer Generator
// ============================================================================

/// Generator returning queued replies. An empty queue means the model is down.
pub struct MockGenerator {
    replies: Mutex<VecDeque<Result<GeneratedReply, GenerationError>>>,
    prompts: Mutex<Vec<(PromptContext, bool)>>,
    delay: Option<Duration>,
}

impl MockGenerator {
    pub fn new() -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            prompts: Mutex::new(Vec::new()),
            delay: None,
        }
    }

    /// Sleep before answering every call
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn queue_reply(&self, text: impl Into<String>) {
        self.replies.lock().unwrap().push_back(Ok(GeneratedReply {
            text: text.into(),
            finished: true,
        }));
    }

    pub fn queue_error(&self, error: GenerationError) {
        self.replies.lock().unwrap().push_back(Err(error));
    }

    /// Prompts seen so far, with the strict flag of each call
    pub fn recorded_prompts(&self) -> Vec<(PromptContext, bool)> {
        self.prompts.lock().unwrap().clone()
    }
}

impl Default for MockGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AnswerGenerator for MockGenerator {
    async fn generate(
        &self,
        prompt: &PromptContext,
        strict: bool,
    ) -> Result<GeneratedReply, GenerationError> {
        self.prompts.lock().unwrap().push((prompt.clone(), strict));
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(GenerationError::Unavailable("No mock reply queued".into())))
    }
}

// ============================================================================
// Mock Knowledge Retriever
// ============================================================================

pub struct MockRetriever {
    result: Result<Vec<RetrievedPassage>, RetrievalError>,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl MockRetriever {
    pub fn new(passages: Vec<RetrievedPassage>) -> Self {
        Self {
            result: Ok(passages),
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    pub fn failing() -> Self {
        Self {
            result: Err(RetrievalError::Unavailable("index offline".into())),
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl KnowledgeRetriever for MockRetriever {
    async fn search(&self, _query: &str, k: usize) -> Result<Vec<RetrievedPassage>, RetrievalError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if k == 0 {
            return Err(RetrievalError::InvalidK);
        }
        self.result
            .clone()
            .map(|passages| passages.into_iter().take(k).collect())
    }
}

// ============================================================================
// Mock Order Lookup
// ============================================================================

#[derive(Clone)]
enum OrderBehavior {
    /// Found when the id matches, not found otherwise
    Known { order_id: String, status: String },
    NotFound,
    Unavailable { transient: bool },
}

/// Order service returning queued results first, then a fixed behavior
pub struct MockOrderLookup {
    queued: Mutex<VecDeque<Result<OrderLookupOutcome, OrderLookupError>>>,
    fallback: OrderBehavior,
    delay: Option<Duration>,
    calls: Mutex<Vec<(String, LookupDetail)>>,
}

impl MockOrderLookup {
    fn with_behavior(fallback: OrderBehavior) -> Self {
        Self {
            queued: Mutex::new(VecDeque::new()),
            fallback,
            delay: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn found(order_id: impl Into<String>, status: impl Into<String>) -> Self {
        Self::with_behavior(OrderBehavior::Known {
            order_id: order_id.into(),
            status: status.into(),
        })
    }

    pub fn not_found() -> Self {
        Self::with_behavior(OrderBehavior::NotFound)
    }

    pub fn unavailable(transient: bool) -> Self {
        Self::with_behavior(OrderBehavior::Unavailable { transient })
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Result for the next call, ahead of the fixed behavior
    pub fn queue(&self, result: Result<OrderLookupOutcome, OrderLookupError>) {
        self.queued.lock().unwrap().push_back(result);
    }

    pub fn recorded_calls(&self) -> Vec<(String, LookupDetail)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl OrderLookup for MockOrderLookup {
    async fn lookup(
        &self,
        order_id: &str,
        detail: LookupDetail,
    ) -> Result<OrderLookupOutcome, OrderLookupError> {
        self.calls
            .lock()
            .unwrap()
            .push((order_id.to_string(), detail));
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(result) = self.queued.lock().unwrap().pop_front() {
            return result;
        }

        let not_found = OrderLookupOutcome::NotFound {
            order_id: order_id.to_string(),
        };
        match &self.fallback {
            OrderBehavior::Known {
                order_id: known,
                status,
            } if known == order_id => Ok(OrderLookupOutcome::Found(OrderStatus {
                order_id: order_id.to_string(),
                status: Some(status.clone()),
                tracking_number: None,
                carrier: None,
                detail,
            })),
            OrderBehavior::Known { .. } | OrderBehavior::NotFound => Ok(not_found),
            OrderBehavior::Unavailable { transient } => Err(OrderLookupError::unavailable(
                *transient,
                "order service returned 503",
            )),
        }
    }
}
