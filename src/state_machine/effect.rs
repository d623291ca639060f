//! Effects produced by state transitions

use crate::classifier::Route;
use crate::context::OrderFact;
use crate::retriever::RetrievedPassage;

/// Work the executor performs after a transition
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Run the intent classifier
    Classify,
    /// Start the selected branches concurrently and wait for both to settle
    RunBranches { route: Route },
    /// Assemble the bounded prompt
    Compose {
        passages: Vec<RetrievedPassage>,
        fact: Option<OrderFact>,
    },
    /// Call the answer generator with the stored prompt
    Generate { strict: bool },
    /// Stop driving; the state is terminal
    Finish,
}
