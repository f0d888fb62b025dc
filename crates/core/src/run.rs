//! Remote run model: a multi-step task executed by an external model.
//!
//! ```text
//! created --(start)--> queued --> in_progress --> completed
//!                                            \--> failed | cancelled | expired
//! ```
//!
//! Terminal states have no outgoing transitions. A [`RemoteRun`] only moves
//! forward as the remote system reports new statuses.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ProviderError, RunError};
use crate::message::{Message, Role};

/// Status of a remote run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Created,
    Queued,
    InProgress,
    Completed,
    Failed,
    Cancelled,
    Expired,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Queued => "queued",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Expired => "expired",
        }
    }

    /// Map a provider's wire status onto the run model.
    ///
    /// Intermediate vendor states (`requires_action`, `cancelling`) still
    /// have a transition ahead of them and count as in progress;
    /// `incomplete` is a dead end and counts as failed. Unknown strings
    /// yield `None`.
    pub fn from_wire(status: &str) -> Option<Self> {
        let status = match status {
            "created" => Self::Created,
            "queued" => Self::Queued,
            "in_progress" | "requires_action" | "cancelling" => Self::InProgress,
            "completed" => Self::Completed,
            "failed" | "incomplete" => Self::Failed,
            "cancelled" => Self::Cancelled,
            "expired" => Self::Expired,
            _ => return None,
        };
        Some(status)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Cancelled | Self::Expired
        )
    }

    fn stage(&self) -> u8 {
        match self {
            Self::Created => 0,
            Self::Queued => 1,
            Self::InProgress => 2,
            Self::Completed | Self::Failed | Self::Cancelled | Self::Expired => 3,
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A run owned by one orchestration call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteRun {
    pub thread_id: String,
    pub run_id: String,
    pub status: RunStatus,
}

impl RemoteRun {
    pub fn new(thread_id: impl Into<String>, run_id: impl Into<String>, status: RunStatus) -> Self {
        Self {
            thread_id: thread_id.into(),
            run_id: run_id.into(),
            status,
        }
    }

    /// Record a freshly polled status.
    ///
    /// Re-observing the current non-terminal status is allowed. Moving
    /// backwards, or moving at all once terminal, is rejected.
    pub fn advance(&mut self, next: RunStatus) -> Result<(), RunError> {
        if self.status.is_terminal() || next.stage() < self.status.stage() {
            return Err(RunError::IllegalTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// A message as stored in a remote thread.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadMessage {
    pub id: String,
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// Transport for the remote run protocol.
///
/// The protocol contract is append-then-run: all input messages are added to
/// the thread before the run is created.
#[async_trait]
pub trait RunTransport: Send + Sync {
    fn name(&self) -> &str;

    /// Create an empty thread and return its id.
    async fn create_thread(&self) -> Result<String, ProviderError>;

    /// Append a message, preserving role and content. Returns the stored message.
    async fn append_message(
        &self,
        thread_id: &str,
        message: &Message,
    ) -> Result<ThreadMessage, ProviderError>;

    /// Start a run of `worker_id` over the thread.
    async fn create_run(&self, thread_id: &str, worker_id: &str) -> Result<RemoteRun, ProviderError>;

    async fn get_run_status(&self, thread_id: &str, run_id: &str) -> Result<RunStatus, ProviderError>;

    /// All messages in the thread, oldest first.
    async fn list_messages(&self, thread_id: &str) -> Result<Vec<ThreadMessage>, ProviderError>;

    /// Ask the remote side to cancel a run.
    ///
    /// Default implementation reports that cancellation is unsupported.
    async fn cancel_run(&self, _thread_id: &str, _run_id: &str) -> Result<RunStatus, ProviderError> {
        Err(ProviderError::NotConfigured(format!(
            "Transport '{}' does not support run cancellation",
            self.name()
        )))
    }
}
