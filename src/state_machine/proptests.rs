//! Property-based tests for the run state machine

use super::state::*;
use super::transition::*;
use super::*;
use crate::classifier::{OrderRef, Route};
use crate::context::OrderFact;
use crate::generator::{GeneratedReply, GenerationError};
use crate::orders::{LookupDetail, OrderStatus};
use proptest::prelude::*;

fn ctx() -> RunContext {
    RunContext::new(500)
}

// ============================================================================
// Arbitrary Generators
// ============================================================================

fn arb_route() -> impl Strategy<Value = Route> {
    let order = ("ORD[0-9]{3}", any::<bool>()).prop_map(|(order_id, tracking)| OrderRef {
        order_id,
        detail: if tracking {
            LookupDetail::Tracking
        } else {
            LookupDetail::Status
        },
    });
    prop_oneof![
        Just(Route::DirectAnswer),
        Just(Route::RetrieveKb),
        order.clone().prop_map(Route::CallTool),
        order.prop_map(Route::RetrieveKbAndCallTool),
    ]
}

fn arb_fact() -> impl Strategy<Value = Option<OrderFact>> {
    prop_oneof![
        Just(None),
        ("ORD[0-9]{3}", "[A-Z][a-z]{3,10}").prop_map(|(order_id, status)| Some(OrderFact::Found(
            OrderStatus {
                order_id,
                status: Some(status),
                tracking_number: None,
                carrier: None,
                detail: LookupDetail::Status,
            }
        ))),
        "ORD[0-9]{3}".prop_map(|order_id| Some(OrderFact::NotFound { order_id })),
        "ORD[0-9]{3}".prop_map(|order_id| Some(OrderFact::Unavailable { order_id })),
    ]
}

/// What the generator does on each call
fn arb_generation() -> impl Strategy<Value = Event> {
    prop_oneof![
        "[a-zA-Z ]{0,80}".prop_map(|text| Event::ReplyGenerated {
            reply: GeneratedReply {
                text,
                finished: true
            }
        }),
        "[a-zA-Z ]{600,700}".prop_map(|text| Event::ReplyGenerated {
            reply: GeneratedReply {
                text,
                finished: true
            }
        }),
        Just(Event::GenerationFailed {
            error: GenerationError::Unavailable("down".into())
        }),
        Just(Event::GenerationFailed {
            error: GenerationError::Timeout
        }),
    ]
}

fn arb_live_state() -> impl Strategy<Value = RunState> {
    prop_oneof![
        Just(RunState::Start),
        Just(RunState::Classifying),
        arb_route().prop_map(|route| RunState::Gathering { route }),
        Just(RunState::Composing {
            gathered: Gathered::default()
        }),
        (1u32..=2).prop_map(|attempt| RunState::Generating {
            attempt,
            strict: false,
            gathered: Gathered::default()
        }),
    ]
}

/// Drive a full run, answering every effect with the scripted outcomes
fn drive(route: Route, fact: Option<OrderFact>, generations: Vec<Event>) -> (RunState, usize) {
    let ctx = ctx();
    let mut state = RunState::Start;
    let mut pending = vec![Event::QueryReceived];
    let mut generations = generations.into_iter();
    let mut generate_calls = 0;

    while let Some(event) = pending.pop() {
        let result = transition(&state, &ctx, event).expect("valid transition");
        state = result.new_state;
        for effect in result.effects {
            match effect {
                Effect::Classify => pending.push(Event::Classified {
                    route: route.clone(),
                }),
                Effect::RunBranches { .. } => pending.push(Event::BranchesSettled {
                    gathered: Gathered {
                        passages: vec![],
                        fact: fact.clone(),
                        failures: vec![],
                    },
                }),
                Effect::Compose { .. } => pending.push(Event::Composed),
                Effect::Generate { .. } => {
                    generate_calls += 1;
                    pending.push(generations.next().unwrap_or(Event::GenerationFailed {
                        error: GenerationError::Timeout,
                    }));
                }
                Effect::Finish => {}
            }
        }
    }
    (state, generate_calls)
}

proptest! {
    #[test]
    fn prop_every_run_terminates_within_attempt_limit(
        route in arb_route(),
        fact in arb_fact(),
        generations in prop::collection::vec(arb_generation(), 0..4),
    ) {
        let (state, calls) = drive(route, fact, generations);
        prop_assert!(state.is_terminal());
        prop_assert!(calls >= 1);
        prop_assert!(calls <= MAX_GENERATION_ATTEMPTS as usize);
    }

    #[test]
    fn prop_done_reply_is_nonempty_and_bounded(
        route in arb_route(),
        fact in arb_fact(),
        generations in prop::collection::vec(arb_generation(), 0..4),
    ) {
        let (state, _) = drive(route, fact, generations);
        match state {
            RunState::Done { reply, .. } | RunState::Error { reply, .. } => {
                prop_assert!(!reply.trim().is_empty());
                prop_assert!(reply.chars().count() <= ctx().max_reply_chars);
            }
            other => prop_assert!(false, "non-terminal end state {:?}", other),
        }
    }

    #[test]
    fn prop_negative_lookups_always_disclosed(
        order_id in "ORD[0-9]{3}",
        unavailable in any::<bool>(),
        generations in prop::collection::vec(arb_generation(), 0..4),
    ) {
        let fact = if unavailable {
            OrderFact::Unavailable { order_id: order_id.clone() }
        } else {
            OrderFact::NotFound { order_id: order_id.clone() }
        };
        let disclosure = fact.disclosure().unwrap();
        let route = Route::CallTool(OrderRef { order_id, detail: LookupDetail::Status });
        let (state, _) = drive(route, Some(fact), generations);
        let RunState::Done { reply, .. } = state else {
            return Err(TestCaseError::fail("lookup facts always allow a reply"));
        };
        prop_assert!(reply.contains(&disclosure));
    }

    #[test]
    fn prop_budget_exceeded_always_errors(state in arb_live_state()) {
        let result = transition(&state, &ctx(), Event::BudgetExceeded { settled: vec![] }).unwrap();
        let is_budget_error = matches!(
            &result.new_state,
            RunState::Error { failures, .. } if failures.contains(&RunFailure::TotalBudgetExceeded)
        );
        prop_assert!(is_budget_error);
        prop_assert_eq!(result.effects, vec![Effect::Finish]);
    }

    #[test]
    fn prop_terminal_states_accept_nothing(
        event in arb_generation(),
        error in any::<bool>(),
    ) {
        let state = if error {
            RunState::Error { reply: FALLBACK_REPLY.into(), failures: vec![] }
        } else {
            RunState::Done { reply: "ok".into(), failures: vec![] }
        };
        prop_assert!(transition(&state, &ctx(), event).is_err());
        let budget_exceeded = Event::BudgetExceeded { settled: vec![] };
        prop_assert!(transition(&state, &ctx(), budget_exceeded).is_err());
    }
}
