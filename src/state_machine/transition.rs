//! Pure state transition function
//!
//! Given the same state, context and event, `transition` always produces
//! the same result and performs no I/O. Validation of a generated reply
//! happens here as well, since it only inspects data.

use super::state::{
    Gathered, RunContext, RunFailure, RunState, APOLOGY_REPLY, FALLBACK_REPLY,
};
use super::{Effect, Event};
use crate::classifier::Route;
use crate::context::OrderFact;
use crate::generator::GeneratedReply;
use thiserror::Error;

/// Result of a state transition
#[derive(Debug)]
pub struct TransitionResult {
    pub new_state: RunState,
    pub effects: Vec<Effect>,
}

impl TransitionResult {
    pub fn new(state: RunState) -> Self {
        Self {
            new_state: state,
            effects: vec![],
        }
    }

    pub fn with_effect(mut self, effect: Effect) -> Self {
        self.effects.push(effect);
        self
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("Invalid transition: {0}")]
    InvalidTransition(String),
}

/// Why a generated reply was rejected
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    Empty,
    Unfinished,
    TooLong { chars: usize },
    /// The order status or tracking number the reply must repeat
    MissingFact { expected: String },
}

pub fn transition(
    state: &RunState,
    ctx: &RunContext,
    event: Event,
) -> Result<TransitionResult, TransitionError> {
    match (state, event) {
        // Budget exhaustion wins over everything that is still running
        (s, Event::BudgetExceeded { settled }) if !s.is_terminal() => {
            let mut failures = s.recorded_failures();
            for failure in settled {
                if !failures.contains(&failure) {
                    failures.push(failure);
                }
            }
            Ok(fail(failures, RunFailure::TotalBudgetExceeded))
        }

        (s, Event::Internal { .. }) if !s.is_terminal() => {
            Ok(fail(s.recorded_failures(), RunFailure::Internal))
        }

        (RunState::Start, Event::QueryReceived) => {
            Ok(TransitionResult::new(RunState::Classifying).with_effect(Effect::Classify))
        }

        // A social message needs no grounding
        (RunState::Classifying, Event::Classified { route: Route::DirectAnswer }) => {
            Ok(compose(Gathered::default()))
        }

        (RunState::Classifying, Event::Classified { route }) => {
            Ok(TransitionResult::new(RunState::Gathering {
                route: route.clone(),
            })
            .with_effect(Effect::RunBranches { route }))
        }

        (RunState::Gathering { .. }, Event::BranchesSettled { gathered }) => Ok(compose(gathered)),

        (RunState::Composing { gathered }, Event::Composed) => Ok(TransitionResult::new(
            RunState::Generating {
                attempt: 1,
                strict: false,
                gathered: gathered.clone(),
            },
        )
        .with_effect(Effect::Generate { strict: false })),

        (
            RunState::Generating {
                attempt,
                strict,
                gathered,
            },
            Event::GenerationFailed { .. },
        ) => {
            if *attempt < ctx.max_generation_attempts {
                return Ok(retry(*attempt, *strict, gathered));
            }
            let mut failures = gathered.failures.clone();
            failures.push(RunFailure::GenerationUnavailable);
            Ok(match &gathered.fact {
                Some(fact) => done(fact_reply(fact), failures),
                None => fail(failures, RunFailure::GenerationUnavailable),
            })
        }

        (RunState::Generating { attempt, gathered, .. }, Event::ReplyGenerated { reply }) => {
            match validate_reply(&reply, gathered.fact.as_ref(), ctx.max_reply_chars) {
                Ok(text) => Ok(done(text, gathered.failures.clone())),
                Err(violation) if *attempt < ctx.max_generation_attempts => {
                    tracing::info!(?violation, attempt, "Reply rejected, regenerating");
                    Ok(retry(*attempt, true, gathered))
                }
                Err(violation) => {
                    tracing::warn!(?violation, "Reply rejected after final attempt");
                    let mut failures = gathered.failures.clone();
                    failures.push(RunFailure::InvalidReply);
                    let text = gathered
                        .fact
                        .as_ref()
                        .map_or_else(|| APOLOGY_REPLY.to_string(), fact_reply);
                    Ok(done(text, failures))
                }
            }
        }

        (state, event) => Err(TransitionError::InvalidTransition(format!(
            "{} does not accept {}",
            state.stage(),
            event.name()
        ))),
    }
}

fn compose(gathered: Gathered) -> TransitionResult {
    let effect = Effect::Compose {
        passages: gathered.passages.clone(),
        fact: gathered.fact.clone(),
    };
    TransitionResult::new(RunState::Composing { gathered }).with_effect(effect)
}

fn retry(attempt: u32, strict: bool, gathered: &Gathered) -> TransitionResult {
    TransitionResult::new(RunState::Generating {
        attempt: attempt + 1,
        strict,
        gathered: gathered.clone(),
    })
    .with_effect(Effect::Generate { strict })
}

fn done(reply: String, failures: Vec<RunFailure>) -> TransitionResult {
    TransitionResult::new(RunState::Done { reply, failures }).with_effect(Effect::Finish)
}

fn fail(mut failures: Vec<RunFailure>, cause: RunFailure) -> TransitionResult {
    if !failures.contains(&cause) {
        failures.push(cause);
    }
    TransitionResult::new(RunState::Error {
        reply: FALLBACK_REPLY.to_string(),
        failures,
    })
    .with_effect(Effect::Finish)
}

/// Deterministic reply built only from the order fact
pub fn fact_reply(fact: &OrderFact) -> String {
    match fact {
        OrderFact::Found(status) => status.summary(),
        other => other.disclosure().unwrap_or_else(|| FALLBACK_REPLY.to_string()),
    }
}

/// Check a generated reply and return the text to send.
///
/// Negative or failed lookups get their disclosure sentence prefixed when
/// the model did not already say it.
pub fn validate_reply(
    reply: &GeneratedReply,
    fact: Option<&OrderFact>,
    max_chars: usize,
) -> Result<String, Violation> {
    let text = reply.text.trim();
    if text.is_empty() {
        return Err(Violation::Empty);
    }
    if !reply.finished {
        return Err(Violation::Unfinished);
    }
    if let Some(expected) = fact.and_then(OrderFact::required_mention) {
        if !text.to_lowercase().contains(&expected.to_lowercase()) {
            return Err(Violation::MissingFact {
                expected: expected.to_string(),
            });
        }
    }

    let text = match fact.and_then(OrderFact::disclosure) {
        Some(disclosure) if !text.contains(&disclosure) => format!("{disclosure} {text}"),
        _ => text.to_string(),
    };

    let chars = text.chars().count();
    if chars > max_chars {
        return Err(Violation::TooLong { chars });
    }
    Ok(text)
}
