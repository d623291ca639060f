//! Events fed back into the run state machine

use crate::classifier::Route;
use crate::generator::{GenerationError, GeneratedReply};
use crate::state_machine::state::{Gathered, RunFailure};

#[derive(Debug, Clone)]
pub enum Event {
    QueryReceived,
    Classified { route: Route },
    BranchesSettled { gathered: Gathered },
    /// The prompt was assembled and stored by the executor
    Composed,
    ReplyGenerated { reply: GeneratedReply },
    GenerationFailed { error: GenerationError },
    /// Total wall-clock budget ran out. Carries the failures of branches
    /// that settled before the cut.
    BudgetExceeded { settled: Vec<RunFailure> },
    /// The executor hit something it cannot recover from
    Internal { message: String },
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::QueryReceived => "QueryReceived",
            Event::Classified { .. } => "Classified",
            Event::BranchesSettled { .. } => "BranchesSettled",
            Event::Composed => "Composed",
            Event::ReplyGenerated { .. } => "ReplyGenerated",
            Event::GenerationFailed { .. } => "GenerationFailed",
            Event::BudgetExceeded { .. } => "BudgetExceeded",
            Event::Internal { .. } => "Internal",
        }
    }
}
