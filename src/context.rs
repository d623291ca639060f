//! Prompt context assembly
//!
//! `assemble` is a pure function: identical inputs give an identical
//! prompt. Sizes are measured in characters.
//!
//! Layout of the body, in order:
//! 1. conversation history, oldest to newest
//! 2. the current question
//! 3. knowledge passages, most relevant first
//! 4. the order lookup result
//!
//! When the budget is tight, history goes first (oldest turn first), then
//! passages (least relevant first). The order lookup result is never cut.

use crate::config::MIN_PROMPT_BUDGET_CHARS;
use crate::conversation::ConversationTurn;
use crate::orders::{LookupDetail, OrderLookupOutcome, OrderStatus};
use crate::retriever::RetrievedPassage;

pub const SUPPORT_INSTRUCTIONS: &str = "You are a customer support assistant for an online store. \
Answer the customer's question using only the knowledge base passages and order lookup result provided. \
If the order lookup result gives a status, state that status exactly as written. \
If the provided material does not contain the answer, say you could not find that information; never invent order details, dates or policies. \
Keep the reply short, friendly and in plain text.";

const HISTORY_HEADER: &str = "Conversation so far:\n";
const QUESTION_HEADER: &str = "Customer question:\n";
const PASSAGES_HEADER: &str = "Knowledge base passages (most relevant first):\n";
const FACT_HEADER: &str = "Order lookup result:\n";

/// Cap on each free-text field of an order fact
const FACT_FIELD_CHARS: usize = 120;
const ORDER_ID_CHARS: usize = 64;

/// What the order branch established
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderFact {
    Found(OrderStatus),
    NotFound { order_id: String },
    Unavailable { order_id: String },
    TimedOut { order_id: String },
}

impl OrderFact {
    pub fn from_outcome(outcome: &OrderLookupOutcome) -> Self {
        match outcome {
            OrderLookupOutcome::Found(status) => OrderFact::Found(status.clone()),
            OrderLookupOutcome::NotFound { order_id } => OrderFact::NotFound {
                order_id: order_id.clone(),
            },
        }
    }

    pub fn order_id(&self) -> &str {
        match self {
            OrderFact::Found(status) => &status.order_id,
            OrderFact::NotFound { order_id }
            | OrderFact::Unavailable { order_id }
            | OrderFact::TimedOut { order_id } => order_id,
        }
    }

    /// Value a reply must repeat for a found order
    pub fn required_mention(&self) -> Option<&str> {
        match self {
            OrderFact::Found(status) => status.required_mention(),
            _ => None,
        }
    }

    /// Sentence the reply must contain for negative or failed lookups
    pub fn disclosure(&self) -> Option<String> {
        let id = truncate_chars(self.order_id(), ORDER_ID_CHARS);
        match self {
            OrderFact::Found(_) => None,
            OrderFact::NotFound { .. } => Some(format!("I couldn't find an order with ID {id}.")),
            OrderFact::Unavailable { .. } | OrderFact::TimedOut { .. } => Some(format!(
                "I couldn't check order {id} right now. Please try again in a few minutes."
            )),
        }
    }

    /// Compact rendering for the prompt. Bounded in length by construction.
    pub fn render(&self) -> String {
        let id = truncate_chars(self.order_id(), ORDER_ID_CHARS);
        match self {
            OrderFact::Found(status) => {
                let state = status.status.as_deref().map_or_else(
                    || "unknown".to_string(),
                    |s| truncate_chars(s, FACT_FIELD_CHARS),
                );
                match status.detail {
                    LookupDetail::Status => format!("Order {id} was found. Status: {state}."),
                    LookupDetail::Tracking => {
                        let tracking = status.tracking_number.as_deref().map_or_else(
                            || "not yet available".to_string(),
                            |n| truncate_chars(n, FACT_FIELD_CHARS),
                        );
                        let carrier = status.carrier.as_deref().map_or_else(
                            || "unknown".to_string(),
                            |c| truncate_chars(c, FACT_FIELD_CHARS),
                        );
                        format!(
                            "Order {id} was found. Shipment status: {state}. Tracking number: {tracking}. Carrier: {carrier}."
                        )
                    }
                }
            }
            OrderFact::NotFound { .. } => {
                format!("No order exists with ID {id}. Tell the customer the order was not found.")
            }
            OrderFact::Unavailable { .. } => format!(
                "The order service could not be reached for order {id}. Do not guess its status; say you couldn't check it right now."
            ),
            OrderFact::TimedOut { .. } => format!(
                "The order service did not answer in time for order {id}. Do not guess its status; say you couldn't check it right now."
            ),
        }
    }
}

/// A bounded prompt ready for the answer generator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptContext {
    pub system: String,
    pub body: String,
    /// Sources of the passages that made it into `body`
    pub sources: Vec<String>,
}

impl PromptContext {
    pub fn len(&self) -> usize {
        char_len(&self.system) + char_len(&self.body)
    }

    pub fn is_empty(&self) -> bool {
        self.system.is_empty() && self.body.is_empty()
    }
}

/// Build the prompt for one generation call.
///
/// `budget` is raised to `MIN_PROMPT_BUDGET_CHARS` if smaller; the result
/// never exceeds the effective budget.
pub fn assemble(
    instructions: &str,
    history: &[ConversationTurn],
    query: &str,
    passages: &[RetrievedPassage],
    fact: Option<&OrderFact>,
    budget: usize,
) -> PromptContext {
    let budget = budget.max(MIN_PROMPT_BUDGET_CHARS);

    let fact_section = fact
        .map(|f| format!("{FACT_HEADER}{}\n", f.render()))
        .unwrap_or_default();
    let mut remaining = budget.saturating_sub(char_len(&fact_section));

    let system = truncate_chars(instructions.trim(), remaining / 2);
    remaining -= char_len(&system);

    let question_room = remaining.saturating_sub(char_len(QUESTION_HEADER) + 2);
    let question_section = format!(
        "{QUESTION_HEADER}{}\n\n",
        truncate_chars(query.trim(), question_room)
    );
    remaining = remaining.saturating_sub(char_len(&question_section));

    let (passage_section, sources) = passage_section(passages, remaining);
    remaining -= char_len(&passage_section);

    let history_section = history_section(history, remaining);

    PromptContext {
        system,
        body: format!("{history_section}{question_section}{passage_section}{fact_section}"),
        sources,
    }
}

fn passage_section(passages: &[RetrievedPassage], room: usize) -> (String, Vec<String>) {
    let overhead = char_len(PASSAGES_HEADER) + 1;
    if passages.is_empty() || room <= overhead {
        return (String::new(), Vec::new());
    }

    let mut ranked: Vec<&RetrievedPassage> = passages.iter().collect();
    ranked.sort_by(|a, b| b.relevance_score.total_cmp(&a.relevance_score));

    let mut avail = room - overhead;
    let mut lines = String::new();
    let mut sources = Vec::new();
    for (rank, passage) in ranked.into_iter().enumerate() {
        let line = format!("[{}] {}\n", passage.source_id, passage.text.trim());
        let len = char_len(&line);
        if len <= avail {
            avail -= len;
            lines.push_str(&line);
            sources.push(passage.source_id.clone());
            continue;
        }
        // The best passage is shortened rather than dropped
        if rank == 0 {
            let prefix = format!("[{}] ", passage.source_id);
            let text_room = avail.saturating_sub(char_len(&prefix) + 1);
            if text_room > 0 {
                lines.push_str(&format!(
                    "{prefix}{}\n",
                    truncate_chars(passage.text.trim(), text_room)
                ));
                sources.push(passage.source_id.clone());
            }
        }
        break;
    }

    if lines.is_empty() {
        return (String::new(), Vec::new());
    }
    (format!("{PASSAGES_HEADER}{lines}\n"), sources)
}

fn history_section(history: &[ConversationTurn], room: usize) -> String {
    let overhead = char_len(HISTORY_HEADER) + 1;
    if history.is_empty() || room <= overhead {
        return String::new();
    }

    let mut avail = room - overhead;
    let mut kept = Vec::new();
    for turn in history.iter().rev() {
        let line = format!("{}: {}\n", turn.role.label(), turn.content);
        let len = char_len(&line);
        if len > avail {
            break;
        }
        avail -= len;
        kept.push(line);
    }

    if kept.is_empty() {
        return String::new();
    }
    kept.reverse();
    format!("{HISTORY_HEADER}{}\n", kept.concat())
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// First `max` characters of `s`
pub fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::Role;
    use chrono::{TimeZone, Utc};
    use proptest::prelude::*;

    fn turn(i: i64, role: Role, content: &str) -> ConversationTurn {
        ConversationTurn {
            role,
            content: content.to_string(),
            timestamp: Utc.timestamp_opt(1_700_000_000 + i, 0).unwrap(),
        }
    }

    fn passage(source: &str, text: &str, score: f32) -> RetrievedPassage {
        RetrievedPassage {
            text: text.to_string(),
            source_id: source.to_string(),
            relevance_score: score,
        }
    }

    fn shipped() -> OrderFact {
        OrderFact::Found(OrderStatus {
            order_id: "ORD123".into(),
            status: Some("Shipped".into()),
            tracking_number: None,
            carrier: None,
            detail: LookupDetail::Status,
        })
    }

    #[test]
    fn test_sections_in_order() {
        let history = vec![
            turn(1, Role::User, "first question"),
            turn(2, Role::Assistant, "first answer"),
        ];
        let passages = vec![passage("low.md", "low", 0.3), passage("high.md", "high", 0.9)];
        let ctx = assemble(
            SUPPORT_INSTRUCTIONS,
            &history,
            "Where is ORD123?",
            &passages,
            Some(&shipped()),
            12_000,
        );

        let body = &ctx.body;
        let pos = |needle: &str| body.find(needle).unwrap();
        assert!(pos("Customer: first question") < pos("Assistant: first answer"));
        assert!(pos("Assistant: first answer") < pos("Where is ORD123?"));
        assert!(pos("Where is ORD123?") < pos("[high.md]"));
        assert!(pos("[high.md]") < pos("[low.md]"));
        assert!(pos("[low.md]") < pos("Status: Shipped."));
        assert_eq!(ctx.sources, vec!["high.md", "low.md"]);
        assert_eq!(ctx.system, SUPPORT_INSTRUCTIONS);
    }

    #[test]
    fn test_oldest_history_dropped_before_passages() {
        let history: Vec<_> = (0..40)
            .map(|i| turn(i, Role::User, &format!("turn-{i:02} {}", "x".repeat(80))))
            .collect();
        let passages = vec![passage("policy.md", &"p".repeat(300), 0.8)];
        let ctx = assemble("Be brief.", &history, "q", &passages, None, 2_000);

        assert!(ctx.len() <= 2_000);
        assert_eq!(ctx.sources, vec!["policy.md"]);
        assert!(ctx.body.contains("turn-39"));
        assert!(!ctx.body.contains("turn-00"));
    }

    #[test]
    fn test_lowest_passages_dropped_when_history_gone() {
        let passages: Vec<_> = (0..10)
            .map(|i| passage(&format!("doc-{i}"), &"t".repeat(400), 1.0 - f32::from(u8::try_from(i).unwrap()) * 0.05))
            .collect();
        let ctx = assemble("Be brief.", &[], "q", &passages, None, 1_500);

        assert!(ctx.len() <= 1_500);
        assert!(!ctx.sources.is_empty());
        assert_eq!(ctx.sources[0], "doc-0");
        assert!(ctx.sources.len() < 10);
    }

    #[test]
    fn test_top_passage_trimmed_not_dropped() {
        let passages = vec![passage("huge.md", &"h".repeat(50_000), 0.9)];
        let ctx = assemble("Be brief.", &[], "q", &passages, None, 1_024);
        assert_eq!(ctx.sources, vec!["huge.md"]);
        assert!(ctx.len() <= 1_024);
    }

    #[test]
    fn test_fact_survives_oversized_inputs() {
        let history: Vec<_> = (0..100)
            .map(|i| turn(i, Role::Assistant, &"y".repeat(500)))
            .collect();
        let passages = vec![passage("big.md", &"z".repeat(20_000), 0.9)];
        let fact = shipped();
        let ctx = assemble(
            SUPPORT_INSTRUCTIONS,
            &history,
            &"question ".repeat(2_000),
            &passages,
            Some(&fact),
            1_024,
        );
        assert!(ctx.len() <= 1_024);
        assert!(ctx.body.ends_with(&format!("{FACT_HEADER}{}\n", fact.render())));
    }

    #[test]
    fn test_disclosures() {
        let missing = OrderFact::NotFound {
            order_id: "ORD999".into(),
        };
        let down = OrderFact::Unavailable {
            order_id: "ORD1".into(),
        };
        assert_eq!(
            missing.disclosure().as_deref(),
            Some("I couldn't find an order with ID ORD999.")
        );
        assert!(down.disclosure().unwrap().starts_with("I couldn't check order ORD1 right now."));
        assert_ne!(missing.disclosure(), down.disclosure());
        assert_eq!(shipped().disclosure(), None);
    }

    #[test]
    fn test_assembly_is_deterministic() {
        let history = vec![turn(1, Role::User, "hello")];
        let passages = vec![passage("a", "same", 0.5), passage("b", "same", 0.5)];
        let first = assemble("i", &history, "q", &passages, None, 4_000);
        let second = assemble("i", &history, "q", &passages, None, 4_000);
        assert_eq!(first, second);
        assert_eq!(first.sources, vec!["a", "b"]);
    }

    fn arb_fact() -> impl Strategy<Value = Option<OrderFact>> {
        prop_oneof![
            Just(None),
            ("[A-Z0-9]{1,200}", ".{0,500}").prop_map(|(order_id, status)| Some(OrderFact::Found(
                OrderStatus {
                    order_id,
                    status: Some(status),
                    tracking_number: Some("T".repeat(300)),
                    carrier: Some("C".repeat(300)),
                    detail: LookupDetail::Tracking,
                }
            ))),
            "[A-Z0-9]{1,200}".prop_map(|order_id| Some(OrderFact::TimedOut { order_id })),
        ]
    }

    proptest! {
        #[test]
        fn prop_never_exceeds_budget(
            history in prop::collection::vec(".{0,2000}", 0..30),
            passages in prop::collection::vec((".{0,3000}", 0.0f32..1.0), 0..8),
            query in ".{0,5000}",
            instructions in ".{0,3000}",
            fact in arb_fact(),
            budget in 1_024usize..16_000,
        ) {
            let turns: Vec<_> = history
                .iter()
                .enumerate()
                .map(|(i, text)| turn(i64::try_from(i).unwrap(), Role::User, text))
                .collect();
            let passages: Vec<_> = passages
                .iter()
                .enumerate()
                .map(|(i, (text, score))| passage(&format!("s{i}"), text, *score))
                .collect();

            let ctx = assemble(&instructions, &turns, &query, &passages, fact.as_ref(), budget);
            prop_assert!(ctx.len() <= budget, "{} > {}", ctx.len(), budget);
            if let Some(fact) = &fact {
                prop_assert!(ctx.body.contains(&fact.render()));
            }
        }
    }
}
