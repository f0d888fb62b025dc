//! Shared scripted collaborators for pipeline tests.

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use ctxprompt_core::error::ProviderError;
use ctxprompt_core::message::{Message, Role};
use ctxprompt_core::provider::{CompletionOptions, CompletionProvider, EmbeddingProvider};
use ctxprompt_core::run::{RemoteRun, RunStatus, RunTransport, ThreadMessage};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

/// Embeds known texts to fixed vectors; anything else maps to `fallback`.
pub struct MockEmbedder {
    table: HashMap<String, Vec<f32>>,
    fallback: Vec<f32>,
    calls: Mutex<Vec<String>>,
}

impl MockEmbedder {
    pub fn new(fallback: Vec<f32>) -> Self {
        Self {
            table: HashMap::new(),
            fallback,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with(mut self, text: &str, vector: Vec<f32>) -> Self {
        self.table.insert(text.to_string(), vector);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbedder {
    fn name(&self) -> &str {
        "mock_embedder"
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        self.calls.lock().unwrap().push(text.to_string());
        Ok(self.table.get(text).cloned().unwrap_or_else(|| self.fallback.clone()))
    }
}

/// An embedder that never answers. Used to prove cancellation wins.
pub struct StalledEmbedder;

#[async_trait]
impl EmbeddingProvider for StalledEmbedder {
    fn name(&self) -> &str {
        "stalled_embedder"
    }

    async fn embed(&self, _text: &str) -> Result<Vec<f32>, ProviderError> {
        std::future::pending().await
    }
}

/// A completion provider that returns scripted replies in order and records
/// every message list it was sent.
pub struct SequentialMockProvider {
    responses: Mutex<VecDeque<String>>,
    received: Mutex<Vec<Vec<Message>>>,
}

impl SequentialMockProvider {
    pub fn new(responses: Vec<&str>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().map(String::from).collect()),
            received: Mutex::new(Vec::new()),
        }
    }

    pub fn single_text(text: &str) -> Self {
        Self::new(vec![text])
    }

    pub fn received(&self) -> Vec<Vec<Message>> {
        self.received.lock().unwrap().clone()
    }
}

#[async_trait]
impl CompletionProvider for SequentialMockProvider {
    fn name(&self) -> &str {
        "sequential_mock"
    }

    async fn complete(
        &self,
        messages: &[Message],
        _options: &CompletionOptions,
    ) -> Result<String, ProviderError> {
        self.received.lock().unwrap().push(messages.to_vec());
        let next = self.responses.lock().unwrap().pop_front();
        match next {
            Some(text) => Ok(text),
            None => panic!("SequentialMockProvider: no more responses"),
        }
    }
}

/// Fixed clock base for thread message timestamps.
pub fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()
}

/// An in-memory run transport driven by a status script.
///
/// - Appended messages get ids `msg_0`, `msg_1`, ... one second apart.
/// - Each status poll pops the next scripted status; once the script is
///   exhausted the run stays `in_progress`.
/// - When the run is observed `completed`, the scripted replies are added to
///   the thread as assistant messages stamped with the last input's second.
pub struct ScriptedTransport {
    statuses: Mutex<VecDeque<RunStatus>>,
    replies: Vec<String>,
    thread: Mutex<Vec<ThreadMessage>>,
    polls: Mutex<usize>,
    cancels: Mutex<Vec<String>>,
    supports_cancel: bool,
}

impl ScriptedTransport {
    pub fn new(statuses: Vec<RunStatus>, replies: Vec<&str>) -> Self {
        Self {
            statuses: Mutex::new(statuses.into()),
            replies: replies.into_iter().map(String::from).collect(),
            thread: Mutex::new(Vec::new()),
            polls: Mutex::new(0),
            cancels: Mutex::new(Vec::new()),
            supports_cancel: true,
        }
    }

    /// A run that completes after `polls` in-progress observations.
    pub fn completing(polls: usize, reply: &str) -> Self {
        let mut statuses = vec![RunStatus::InProgress; polls];
        statuses.push(RunStatus::Completed);
        Self::new(statuses, vec![reply])
    }

    pub fn without_cancel(mut self) -> Self {
        self.supports_cancel = false;
        self
    }

    pub fn polls(&self) -> usize {
        *self.polls.lock().unwrap()
    }

    pub fn cancels(&self) -> Vec<String> {
        self.cancels.lock().unwrap().clone()
    }

    pub fn thread(&self) -> Vec<ThreadMessage> {
        self.thread.lock().unwrap().clone()
    }

    /// Seed the thread with an assistant message stamped at `at`.
    pub fn push_assistant(&self, id: &str, content: &str, at: DateTime<Utc>) {
        self.thread.lock().unwrap().push(ThreadMessage {
            id: id.to_string(),
            role: Role::Assistant,
            content: content.to_string(),
            created_at: at,
        });
    }
}

#[async_trait]
impl RunTransport for ScriptedTransport {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn create_thread(&self) -> Result<String, ProviderError> {
        Ok("thread_test".into())
    }

    async fn append_message(
        &self,
        _thread_id: &str,
        message: &Message,
    ) -> Result<ThreadMessage, ProviderError> {
        let mut thread = self.thread.lock().unwrap();
        let n = thread.len();
        let stored = ThreadMessage {
            id: format!("msg_{n}"),
            role: message.role,
            content: message.content.clone(),
            created_at: epoch() + TimeDelta::seconds(n as i64),
        };
        thread.push(stored.clone());
        Ok(stored)
    }

    async fn create_run(&self, thread_id: &str, _worker_id: &str) -> Result<RemoteRun, ProviderError> {
        Ok(RemoteRun::new(thread_id, "run_test", RunStatus::Queued))
    }

    async fn get_run_status(&self, _thread_id: &str, _run_id: &str) -> Result<RunStatus, ProviderError> {
        *self.polls.lock().unwrap() += 1;
        let status = self
            .statuses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(RunStatus::InProgress);

        if status == RunStatus::Completed {
            let mut thread = self.thread.lock().unwrap();
            let stamp = thread.last().map_or(epoch(), |m| m.created_at);
            for (i, reply) in self.replies.iter().enumerate() {
                thread.push(ThreadMessage {
                    id: format!("reply_{i}"),
                    role: Role::Assistant,
                    content: reply.clone(),
                    created_at: stamp,
                });
            }
        }
        Ok(status)
    }

    async fn list_messages(&self, _thread_id: &str) -> Result<Vec<ThreadMessage>, ProviderError> {
        Ok(self.thread())
    }

    async fn cancel_run(&self, _thread_id: &str, run_id: &str) -> Result<RunStatus, ProviderError> {
        if !self.supports_cancel {
            return Err(ProviderError::NotConfigured("no cancel".into()));
        }
        self.cancels.lock().unwrap().push(run_id.to_string());
        Ok(RunStatus::Cancelled)
    }
}
