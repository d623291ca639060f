//! Intent classification
//!
//! Decides which data-gathering branches a query needs. The policy sits
//! behind `IntentClassifier` so a model-based classifier can replace the
//! keyword rules without touching the orchestrator.

use crate::conversation::ConversationState;
use crate::orders::LookupDetail;
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// How many earlier user turns are searched for an order reference
const HISTORY_LOOKBACK: usize = 3;

/// Shortest free-form order id accepted after the word "order"
const MIN_ORDER_ID_LEN: usize = 3;

const SOCIAL_MESSAGES: &[&str] = &[
    "hi",
    "hello",
    "hey",
    "hi there",
    "hello there",
    "bye",
    "goodbye",
    "thanks bye",
    "thanks",
    "thank you",
];

/// An order the query is about
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRef {
    pub order_id: String,
    pub detail: LookupDetail,
}

/// Branches selected for one query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "route", rename_all = "snake_case")]
pub enum Route {
    DirectAnswer,
    RetrieveKb,
    CallTool(OrderRef),
    RetrieveKbAndCallTool(OrderRef),
}

impl Route {
    pub fn retrieves(&self) -> bool {
        matches!(self, Route::RetrieveKb | Route::RetrieveKbAndCallTool(_))
    }

    pub fn order_ref(&self) -> Option<&OrderRef> {
        match self {
            Route::CallTool(order) | Route::RetrieveKbAndCallTool(order) => Some(order),
            Route::DirectAnswer | Route::RetrieveKb => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Route::DirectAnswer => "direct_answer",
            Route::RetrieveKb => "retrieve_kb",
            Route::CallTool(_) => "call_tool",
            Route::RetrieveKbAndCallTool(_) => "retrieve_kb_and_call_tool",
        }
    }
}

#[async_trait]
pub trait IntentClassifier: Send + Sync {
    /// Must be deterministic for identical inputs
    async fn classify(&self, query: &str, history: &ConversationState) -> Route;
}

/// Pattern-based policy
pub struct KeywordClassifier {
    order_patterns: Vec<Regex>,
    knowledge_topics: Regex,
    tracking_words: Regex,
    anaphora: Regex,
}

impl KeywordClassifier {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            order_patterns: vec![
                Regex::new(r"(?i)\b(ORD[-_]?\d{2,})\b")?,
                Regex::new(
                    r"(?i)\border\s*(?:number|no\.?|id|#)?\s*[:#]?\s*([A-Z0-9][A-Z0-9-]*\d[A-Z0-9-]*)\b",
                )?,
                Regex::new(r"#(\d{3,})\b")?,
            ],
            knowledge_topics: Regex::new(
                r"(?i)\b(returns?|returning|refunds?|exchanges?|polic(?:y|ies)|shipping|ship|deliver(?:y|ies)|warrant(?:y|ies)|payments?|pay|cancel(?:lation)?|faq|hours|contact|international|discounts?|coupons?|promo(?:tion)?s?|sizes?|sizing|damaged|defective|guarantee)\b",
            )?,
            tracking_words: Regex::new(
                r"(?i)\b(track|tracking|carrier|courier|where\s+is|where's|when\s+will|in\s+transit)\b",
            )?,
            anaphora: Regex::new(
                r"(?i)\b(my\s+order|the\s+order|that\s+order|this\s+order|it|its|status|track|tracking|where\s+is|where's)\b",
            )?,
        })
    }

    /// First order reference found in `text`, normalised
    pub fn extract_order_reference(&self, text: &str) -> Option<String> {
        self.order_patterns.iter().enumerate().find_map(|(i, pattern)| {
            let raw = pattern.captures(text)?.get(1)?.as_str().trim_end_matches('-');
            match i {
                0 => Some(raw.to_ascii_uppercase()),
                _ if raw.chars().count() >= MIN_ORDER_ID_LEN => Some(raw.to_string()),
                _ => None,
            }
        })
    }

    fn is_social(query: &str) -> bool {
        let normalized: String = query
            .trim()
            .trim_end_matches(|c: char| c.is_ascii_punctuation())
            .trim_end()
            .to_lowercase();
        SOCIAL_MESSAGES.contains(&normalized.as_str())
    }

    fn detail_for(&self, query: &str) -> LookupDetail {
        if self.tracking_words.is_match(query) {
            LookupDetail::Tracking
        } else {
            LookupDetail::Status
        }
    }

    fn order_from_history(&self, query: &str, history: &ConversationState) -> Option<String> {
        if !self.anaphora.is_match(query) {
            return None;
        }
        history
            .recent_user_messages(HISTORY_LOOKBACK)
            .find_map(|message| self.extract_order_reference(message))
    }

    pub fn route(&self, query: &str, history: &ConversationState) -> Route {
        let order_id = self
            .extract_order_reference(query)
            .or_else(|| self.order_from_history(query, history));

        if order_id.is_none() && Self::is_social(query) {
            return Route::DirectAnswer;
        }

        let wants_knowledge = self.knowledge_topics.is_match(query);
        match order_id {
            Some(order_id) => {
                let order = OrderRef {
                    order_id,
                    detail: self.detail_for(query),
                };
                if wants_knowledge {
                    Route::RetrieveKbAndCallTool(order)
                } else {
                    Route::CallTool(order)
                }
            }
            // Never leave a support query ungrounded
            None => Route::RetrieveKb,
        }
    }
}

#[async_trait]
impl IntentClassifier for KeywordClassifier {
    async fn classify(&self, query: &str, history: &ConversationState) -> Route {
        let route = self.route(query, history);
        tracing::debug!(route = route.name(), "Query classified");
        route
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::ConversationId;
    use proptest::prelude::*;

    fn classifier() -> KeywordClassifier {
        KeywordClassifier::new().unwrap()
    }

    fn empty() -> ConversationState {
        ConversationState::new(ConversationId::mint())
    }

    fn call_tool(order_id: &str, detail: LookupDetail) -> Route {
        Route::CallTool(OrderRef {
            order_id: order_id.to_string(),
            detail,
        })
    }

    #[test]
    fn test_order_status_query_calls_tool() {
        assert_eq!(
            classifier().route("What is the status of order ORD123?", &empty()),
            call_tool("ORD123", LookupDetail::Status)
        );
    }

    #[test]
    fn test_policy_query_retrieves() {
        assert_eq!(
            classifier().route("How do I return an item?", &empty()),
            Route::RetrieveKb
        );
    }

    #[test]
    fn test_both_signals_select_both_branches() {
        let route = classifier().route("Can I get a refund for order ORD555?", &empty());
        assert_eq!(
            route,
            Route::RetrieveKbAndCallTool(OrderRef {
                order_id: "ORD555".into(),
                detail: LookupDetail::Status
            })
        );
        assert!(route.retrieves());
    }

    #[test]
    fn test_unknown_topic_defaults_to_retrieval() {
        assert_eq!(classifier().route("Do you sell gift cards?", &empty()), Route::RetrieveKb);
    }

    #[test]
    fn test_greetings_answer_directly() {
        for greeting in ["hi", "Hello!", "  hey ", "thanks bye", "Goodbye."] {
            assert_eq!(classifier().route(greeting, &empty()), Route::DirectAnswer, "{greeting}");
        }
        assert_eq!(classifier().route("hi, where is ORD12?", &empty()).name(), "call_tool");
    }

    #[test]
    fn test_tracking_words_select_tracking_detail() {
        assert_eq!(
            classifier().route("Where is my package for ORD123?", &empty()),
            call_tool("ORD123", LookupDetail::Tracking)
        );
    }

    #[test]
    fn test_reference_formats() {
        let c = classifier();
        assert_eq!(c.extract_order_reference("status of ord-77 please").as_deref(), Some("ORD-77"));
        assert_eq!(c.extract_order_reference("order number 98765").as_deref(), Some("98765"));
        assert_eq!(c.extract_order_reference("order #A1B2C").as_deref(), Some("A1B2C"));
        assert_eq!(c.extract_order_reference("it was #4521").as_deref(), Some("4521"));
        assert_eq!(c.extract_order_reference("order status please"), None);
        assert_eq!(c.extract_order_reference("I ordered 2 shirts"), None);
        assert_eq!(c.extract_order_reference("order 12"), None);
    }

    #[test]
    fn test_order_carried_over_from_history() {
        let mut history = empty();
        history.push_user("What's the status of order ORD123?").unwrap();
        history.push_assistant("The status for order ORD123 is: Shipped.").unwrap();

        assert_eq!(
            classifier().route("Where is it now?", &history),
            call_tool("ORD123", LookupDetail::Tracking)
        );
        // No anaphora, no carry-over
        assert_eq!(classifier().route("Do you ship to Canada?", &history), Route::RetrieveKb);
    }

    #[tokio::test]
    async fn test_classify_matches_route() {
        let c = classifier();
        let history = empty();
        assert_eq!(
            c.classify("order ORD42 status", &history).await,
            c.route("order ORD42 status", &history)
        );
    }

    proptest! {
        #[test]
        fn prop_order_reference_always_calls_tool(
            prefix in "[a-z ?,]{0,30}",
            digits in "[0-9]{2,8}",
            suffix in "[a-z ?.]{0,30}",
        ) {
            let query = format!("{prefix} ORD{digits} {suffix}");
            let c = classifier();
            let route = c.route(&query, &empty());
            let order = route.order_ref();
            prop_assert!(order.is_some());
            prop_assert_eq!(order.map(|o| o.order_id.clone()), Some(format!("ORD{digits}")));
            // Deterministic for identical input
            prop_assert_eq!(route, c.route(&query, &empty()));
        }
    }
}
