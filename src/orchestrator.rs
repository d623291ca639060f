//! Orchestration executor
//!
//! Drives the pure state machine for one query: performs the effects it
//! asks for, applies per-call timeouts and the total budget, and always
//! returns a structured `OrchestrationResult`.

#[cfg(test)]
pub mod testing;

use crate::classifier::{IntentClassifier, Route};
use crate::config::OrchestratorConfig;
use crate::context::{assemble, OrderFact, PromptContext, SUPPORT_INSTRUCTIONS};
use crate::conversation::{ConversationError, ConversationId, ConversationState};
use crate::generator::{AnswerGenerator, GenerationError};
use crate::orders::OrderLookup;
use crate::retriever::KnowledgeRetriever;
use crate::state_machine::{
    transition, Effect, Event, Gathered, RunContext, RunFailure, RunState, FALLBACK_REPLY,
};
use crate::tools::{
    KnowledgeRetrievalInput, OrderLookupInput, ToolBox, ToolError, ToolInput, ToolInvocation,
    ToolOutput,
};
use async_trait::async_trait;
use futures::future::OptionFuture;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::time::Instant;
use tracing::Instrument;

/// Terminal stage a run ended in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FinalStage {
    Done,
    Error,
}

#[derive(Debug, Clone)]
pub struct OrchestrationResult {
    pub reply_text: String,
    /// History including this exchange; unchanged when the run failed
    pub conversation: ConversationState,
    pub used_sources: Vec<String>,
    pub tool_calls: Vec<ToolInvocation>,
    /// Some branch or the generator failed and the reply says so or falls back
    pub degraded: bool,
    pub final_stage: FinalStage,
    pub failures: Vec<RunFailure>,
}

/// The inbound operation, as seen by the HTTP layer
#[async_trait]
pub trait QueryHandler: Send + Sync {
    async fn handle_query(
        &self,
        query: &str,
        conversation_id: Option<ConversationId>,
        prior: Option<ConversationState>,
    ) -> OrchestrationResult;
}

pub struct Orchestrator<R, O, G> {
    classifier: Arc<dyn IntentClassifier>,
    tools: ToolBox<R, O>,
    generator: G,
    config: OrchestratorConfig,
}

/// Executor-side data for one run
struct Run<'a> {
    query: &'a str,
    history: &'a ConversationState,
    prompt: Option<PromptContext>,
    tool_calls: Vec<ToolInvocation>,
    used_sources: Vec<String>,
    /// Filled as each branch finishes, so a budget cut mid-gather still
    /// sees the branches that settled
    settled: Mutex<Settled>,
}

#[derive(Default)]
struct Settled {
    retrieval: Option<ToolInvocation>,
    lookup: Option<ToolInvocation>,
}

impl Run<'_> {
    fn take_settled(&mut self) -> Settled {
        std::mem::take(self.settled.get_mut().unwrap_or_else(PoisonError::into_inner))
    }
}

fn record_exchange(
    conversation: &mut ConversationState,
    query: &str,
    reply: &str,
) -> Result<(), ConversationError> {
    conversation.push_user(query)?;
    conversation.push_assistant(reply)
}

fn lock(settled: &Mutex<Settled>) -> MutexGuard<'_, Settled> {
    settled.lock().unwrap_or_else(PoisonError::into_inner)
}

struct RunOutcome {
    state: RunState,
    tool_calls: Vec<ToolInvocation>,
    used_sources: Vec<String>,
}

impl<R, O, G> Orchestrator<R, O, G>
where
    R: KnowledgeRetriever,
    O: OrderLookup,
    G: AnswerGenerator,
{
    pub fn new(
        classifier: Arc<dyn IntentClassifier>,
        retriever: R,
        orders: O,
        generator: G,
        config: OrchestratorConfig,
    ) -> Self {
        let tools = ToolBox::new(retriever, orders, config.timeouts.branch);
        Self {
            classifier,
            tools,
            generator,
            config,
        }
    }

    pub async fn handle_query(
        &self,
        query: &str,
        conversation_id: Option<ConversationId>,
        prior: Option<ConversationState>,
    ) -> OrchestrationResult {
        let mut conversation = match (prior, conversation_id) {
            (Some(prior), Some(id)) if prior.id() != &id => {
                tracing::warn!(supplied = %id, history = %prior.id(), "Conversation id mismatch, keeping history id");
                prior
            }
            (Some(prior), _) => prior,
            (None, id) => ConversationState::new(id.unwrap_or_else(ConversationId::mint)),
        };

        let span = tracing::info_span!("orchestration", conv_id = %conversation.id());
        let RunOutcome {
            state,
            tool_calls,
            used_sources,
        } = self.run(query, &conversation).instrument(span).await;

        let (reply_text, failures, final_stage) = match state {
            RunState::Done { reply, mut failures } => {
                let mut extended = conversation.clone();
                match record_exchange(&mut extended, query, &reply) {
                    Ok(()) => {
                        conversation = extended;
                        let dropped = conversation.enforce_budget(self.config.history_budget_chars);
                        if dropped > 0 {
                            tracing::debug!(dropped, "Trimmed oldest turns from history");
                        }
                        (reply, failures, FinalStage::Done)
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Could not append exchange to history");
                        failures.push(RunFailure::Internal);
                        (FALLBACK_REPLY.to_string(), failures, FinalStage::Error)
                    }
                }
            }
            RunState::Error { reply, failures } => (reply, failures, FinalStage::Error),
            other => {
                tracing::error!(stage = other.stage(), "Run stopped in a non-terminal state");
                (FALLBACK_REPLY.to_string(), vec![RunFailure::Internal], FinalStage::Error)
            }
        };

        OrchestrationResult {
            reply_text,
            conversation,
            used_sources,
            tool_calls,
            degraded: !failures.is_empty(),
            final_stage,
            failures,
        }
    }

    async fn run(&self, query: &str, history: &ConversationState) -> RunOutcome {
        let start = Instant::now();
        let ctx = RunContext::new(self.config.max_reply_chars);
        let mut state = RunState::Start;
        let mut run = Run {
            query,
            history,
            prompt: None,
            tool_calls: Vec::new(),
            used_sources: Vec::new(),
            settled: Mutex::default(),
        };

        tracing::info!(query_chars = query.chars().count(), turns = history.len(), "Orchestration started");

        let driven = tokio::time::timeout(
            self.config.timeouts.total,
            self.drive(&ctx, &mut state, &mut run),
        )
        .await;

        if driven.is_err() {
            tracing::warn!(stage = state.stage(), "Total budget exceeded");
            let settled = match &state {
                RunState::Gathering { route } => {
                    let partial = self.settle(route, run.take_settled(), &mut run.tool_calls);
                    partial.failures
                }
                _ => Vec::new(),
            };
            match transition(&state, &ctx, Event::BudgetExceeded { settled }) {
                Ok(result) => state = result.new_state,
                Err(e) => tracing::error!(error = %e, "Budget transition rejected"),
            }
        }

        tracing::info!(
            stage = state.stage(),
            duration_ms = %start.elapsed().as_millis(),
            tool_calls = run.tool_calls.len(),
            sources = run.used_sources.len(),
            "Orchestration finished"
        );
        RunOutcome {
            state,
            tool_calls: run.tool_calls,
            used_sources: run.used_sources,
        }
    }

    async fn drive(&self, ctx: &RunContext, state: &mut RunState, run: &mut Run<'_>) {
        let mut pending = VecDeque::from([Event::QueryReceived]);

        while let Some(event) = pending.pop_front() {
            let result = match transition(state, ctx, event) {
                Ok(result) => result,
                Err(e) => {
                    tracing::error!(error = %e, "Invalid transition");
                    match transition(state, ctx, Event::Internal { message: e.to_string() }) {
                        Ok(result) => result,
                        Err(_) => return,
                    }
                }
            };

            tracing::debug!(stage = result.new_state.stage(), "Transitioned");
            *state = result.new_state;

            for effect in result.effects {
                if let Some(next) = self.execute_effect(effect, run).await {
                    pending.push_back(next);
                }
            }
        }
    }

    async fn execute_effect(&self, effect: Effect, run: &mut Run<'_>) -> Option<Event> {
        match effect {
            Effect::Classify => {
                let route = self.classifier.classify(run.query, run.history).await;
                tracing::info!(route = route.name(), "Route selected");
                Some(Event::Classified { route })
            }

            Effect::RunBranches { route } => {
                let gathered = self.gather(&route, run).await;
                Some(Event::BranchesSettled { gathered })
            }

            Effect::Compose { passages, fact } => {
                let prompt = assemble(
                    SUPPORT_INSTRUCTIONS,
                    run.history.turns(),
                    run.query,
                    &passages,
                    fact.as_ref(),
                    self.config.prompt_budget_chars,
                );
                tracing::debug!(prompt_chars = prompt.len(), sources = ?prompt.sources, "Prompt composed");
                run.used_sources.clone_from(&prompt.sources);
                run.prompt = Some(prompt);
                Some(Event::Composed)
            }

            Effect::Generate { strict } => {
                let Some(prompt) = run.prompt.as_ref() else {
                    return Some(Event::Internal {
                        message: "generate requested before compose".to_string(),
                    });
                };
                let generated = tokio::time::timeout(
                    self.config.timeouts.generation,
                    self.generator.generate(prompt, strict),
                )
                .await;
                Some(match generated {
                    Ok(Ok(reply)) => Event::ReplyGenerated { reply },
                    Ok(Err(error)) => {
                        tracing::warn!(error = %error, strict, "Generation failed");
                        Event::GenerationFailed { error }
                    }
                    Err(_) => {
                        tracing::warn!(strict, "Generation timed out");
                        Event::GenerationFailed {
                            error: GenerationError::Timeout,
                        }
                    }
                })
            }

            Effect::Finish => None,
        }
    }

    /// Run the selected branches concurrently. Each branch has its own
    /// timeout inside `ToolBox::invoke`, so one slow branch never cancels
    /// the other.
    async fn gather(&self, route: &Route, run: &mut Run<'_>) -> Gathered {
        let query = run.query;
        let settled = &run.settled;

        let retrieval = route.retrieves().then(|| async move {
            let invocation = self
                .tools
                .invoke(ToolInput::KnowledgeRetrieval(KnowledgeRetrievalInput {
                    query: query.to_string(),
                    k: self.config.retrieval_k,
                }))
                .await;
            lock(settled).retrieval = Some(invocation);
        });
        let lookup = route.order_ref().map(|order| async move {
            let invocation = self
                .tools
                .invoke(ToolInput::OrderLookup(OrderLookupInput {
                    order_id: order.order_id.clone(),
                    detail: order.detail,
                }))
                .await;
            lock(settled).lookup = Some(invocation);
        });

        tokio::join!(OptionFuture::from(retrieval), OptionFuture::from(lookup));

        let settled = run.take_settled();
        self.settle(route, settled, &mut run.tool_calls)
    }

    /// Turn settled branch results into gathered data, logging each
    /// invocation in `tool_calls` (retrieval first)
    fn settle(
        &self,
        route: &Route,
        settled: Settled,
        tool_calls: &mut Vec<ToolInvocation>,
    ) -> Gathered {
        let mut gathered = Gathered::default();

        if let Some(invocation) = settled.retrieval {
            match invocation.passages() {
                Some(passages) => {
                    gathered.passages = passages
                        .iter()
                        .filter(|p| p.relevance_score >= self.config.min_relevance)
                        .cloned()
                        .collect();
                    if gathered.passages.len() < passages.len() {
                        tracing::debug!(
                            kept = gathered.passages.len(),
                            returned = passages.len(),
                            "Dropped low-relevance passages"
                        );
                    }
                }
                None => gathered.failures.push(RunFailure::RetrievalUnavailable),
            }
            tool_calls.push(invocation);
        }

        if let (Some(invocation), Some(order)) = (settled.lookup, route.order_ref()) {
            let order_id = order.order_id.clone();
            gathered.fact = Some(match &invocation.result {
                Ok(ToolOutput::Order(outcome)) => OrderFact::from_outcome(outcome),
                Err(ToolError::ToolTimeout) => {
                    gathered.failures.push(RunFailure::ToolTimeout);
                    OrderFact::TimedOut { order_id }
                }
                Ok(ToolOutput::Passages(_))
                | Err(ToolError::ToolUnavailable(_) | ToolError::RetrievalUnavailable(_)) => {
                    gathered.failures.push(RunFailure::ToolUnavailable);
                    OrderFact::Unavailable { order_id }
                }
            });
            tool_calls.push(invocation);
        }

        gathered
    }
}

#[async_trait]
impl<R, O, G> QueryHandler for Orchestrator<R, O, G>
where
    R: KnowledgeRetriever,
    O: OrderLookup,
    G: AnswerGenerator,
{
    async fn handle_query(
        &self,
        query: &str,
        conversation_id: Option<ConversationId>,
        prior: Option<ConversationState>,
    ) -> OrchestrationResult {
        Orchestrator::handle_query(self, query, conversation_id, prior).await
    }
}
