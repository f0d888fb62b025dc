//! Conversation history types consumed and produced by context assembly.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::message::{Message, Role};

/// One completed user/assistant exchange from prior history.
///
/// An exchange is atomic for budgeting: both turns are charged together and
/// included or excluded together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Exchange {
    /// What the user said.
    pub user: String,
    /// What the assistant answered.
    pub assistant: String,
    /// When the user turn happened. `None` means the source kept no
    /// timestamps; the assembler then synthesizes them.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl Exchange {
    pub fn new(user: impl Into<String>, assistant: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            assistant: assistant.into(),
            created_at: None,
        }
    }

    pub fn at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = Some(created_at);
        self
    }
}

/// A single historical turn as emitted by the assembler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryTurn {
    pub role: Role,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

impl HistoryTurn {
    /// Convert into a message carrying its timestamp as metadata.
    pub fn to_message(&self) -> Message {
        let msg = match self.role {
            Role::Assistant => Message::assistant(self.text.clone()),
            Role::System => Message::system(self.text.clone()),
            Role::User => Message::user(self.text.clone()),
        };
        msg.at(self.created_at)
    }
}

/// Which end of the history survives when the budget runs out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Retention {
    /// Walk oldest to newest; newer exchanges are dropped once the cap is hit.
    #[default]
    OldestFirst,
    /// Walk newest to oldest; older exchanges are dropped once the cap is hit.
    NewestFirst,
}

/// Output of context assembly: accepted turns in chronological order and
/// the tokens they were charged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BoundedContext {
    pub turns: Vec<HistoryTurn>,
    pub total_tokens: usize,
    /// The cap the total was checked against (`budget * safety_factor`).
    pub limit: usize,
}

impl BoundedContext {
    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Number of complete exchanges included.
    pub fn pair_count(&self) -> usize {
        self.turns.len() / 2
    }

    pub fn to_messages(&self) -> Vec<Message> {
        self.turns.iter().map(HistoryTurn::to_message).collect()
    }
}
