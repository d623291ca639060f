//! Orchestration state machine
//!
//! Elm-style: `transition` is pure and returns the effects the executor in
//! `orchestrator` must carry out. The executor feeds results back as events
//! until a terminal state is reached.

mod effect;
mod event;
mod state;
mod transition;

#[cfg(test)]
mod proptests;

pub use effect::Effect;
pub use event::Event;
pub use state::{Gathered, RunContext, RunFailure, RunState, FALLBACK_REPLY};
pub use transition::transition;

#[cfg(test)]
pub use state::APOLOGY_REPLY;
