//! Conversation history
//!
//! A `ConversationState` is an explicit value: it is built at request entry
//! from caller-supplied turns, extended by the orchestrator, and handed back.
//! Nothing here is shared between runs.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Who authored a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn label(self) -> &'static str {
        match self {
            Role::User => "Customer",
            Role::Assistant => "Assistant",
            Role::Tool => "Tool",
        }
    }
}

/// One message in a conversation. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl ConversationTurn {
    /// Characters this turn contributes to the serialized history
    pub fn size(&self) -> usize {
        self.role.label().len() + 2 + self.content.chars().count() + 1
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConversationError {
    #[error("turn {index} is not newer than the turn before it")]
    OutOfOrder { index: usize },
    #[error("conversation id must not be empty")]
    EmptyId,
    #[error("turn {index} is dated too late to be followed by another turn")]
    TimestampOutOfRange { index: usize },
}

/// Gap between two turns appended within the same clock tick
fn turn_step() -> Duration {
    Duration::microseconds(1)
}

/// Opaque conversation identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(String);

impl ConversationId {
    pub fn mint() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn parse(raw: impl Into<String>) -> Result<Self, ConversationError> {
        let raw = raw.into();
        if raw.trim().is_empty() {
            return Err(ConversationError::EmptyId);
        }
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Ordered, append-only conversation history.
///
/// Turns are strictly time-ordered. `enforce_budget` drops the oldest turns
/// so the serialized history never exceeds a character budget.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationState {
    id: ConversationId,
    turns: Vec<ConversationTurn>,
}

impl ConversationState {
    pub fn new(id: ConversationId) -> Self {
        Self { id, turns: Vec::new() }
    }

    /// Rebuild a state from caller-supplied turns, rejecting any ordering
    /// violation and any history that leaves no room for one more exchange
    pub fn from_turns(
        id: ConversationId,
        turns: Vec<ConversationTurn>,
    ) -> Result<Self, ConversationError> {
        for (index, pair) in turns.windows(2).enumerate() {
            if pair[1].timestamp <= pair[0].timestamp {
                return Err(ConversationError::OutOfOrder { index: index + 1 });
            }
        }
        if let Some(last) = turns.last() {
            let room = last
                .timestamp
                .checked_add_signed(turn_step())
                .and_then(|t| t.checked_add_signed(turn_step()));
            if room.is_none() {
                return Err(ConversationError::TimestampOutOfRange {
                    index: turns.len() - 1,
                });
            }
        }
        Ok(Self { id, turns })
    }

    pub fn id(&self) -> &ConversationId {
        &self.id
    }

    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn push_user(&mut self, content: impl Into<String>) -> Result<(), ConversationError> {
        self.push(Role::User, content.into(), Utc::now())
    }

    pub fn push_assistant(&mut self, content: impl Into<String>) -> Result<(), ConversationError> {
        self.push(Role::Assistant, content.into(), Utc::now())
    }

    /// Append a turn, nudging the timestamp forward if the clock has not
    /// advanced past the last turn. Fails when the last turn sits at the
    /// end of the representable range.
    pub fn push(
        &mut self,
        role: Role,
        content: String,
        now: DateTime<Utc>,
    ) -> Result<(), ConversationError> {
        let timestamp = match self.turns.last() {
            Some(last) if now <= last.timestamp => last
                .timestamp
                .checked_add_signed(turn_step())
                .ok_or(ConversationError::TimestampOutOfRange {
                    index: self.turns.len() - 1,
                })?,
            _ => now,
        };
        self.turns.push(ConversationTurn {
            role,
            content,
            timestamp,
        });
        Ok(())
    }

    pub fn serialized_len(&self) -> usize {
        self.turns.iter().map(ConversationTurn::size).sum()
    }

    /// Drop oldest turns until the history fits `max_chars`. Returns how many
    /// turns were dropped.
    pub fn enforce_budget(&mut self, max_chars: usize) -> usize {
        let mut total = self.serialized_len();
        let mut drop = 0;
        while total > max_chars && drop < self.turns.len() {
            total -= self.turns[drop].size();
            drop += 1;
        }
        if drop > 0 {
            self.turns.drain(..drop);
        }
        drop
    }

    /// Most recent user messages, newest first
    pub fn recent_user_messages(&self, limit: usize) -> impl Iterator<Item = &str> {
        self.turns
            .iter()
            .rev()
            .filter(|t| t.role == Role::User)
            .take(limit)
            .map(|t| t.content.as_str())
    }
}
