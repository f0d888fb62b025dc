//! Retriever: the composition root of the pipeline.
//!
//! # Flow
//!
//! 1. Validate the query and the assembly policy (no I/O yet)
//! 2. Embed the query
//! 3. Fetch the top-K similar items from the store
//! 4. Bound the conversation history by the token budget
//! 5. Send history + retrieved items + query to the executor
//! 6. Parse and normalize the reply into a [`Classification`]
//!
//! Steps 2, 3, and 5 race the caller's [`CancelSignal`].

use ctxprompt_core::cancel::CancelSignal;
use ctxprompt_core::embedding::{Embedding, Metadata, ScoredEmbedding, TEXT_KEY};
use ctxprompt_core::error::{Error, ValidationError};
use ctxprompt_core::history::{BoundedContext, Exchange};
use ctxprompt_core::message::Message;
use ctxprompt_core::provider::{CompletionOptions, CompletionProvider, EmbeddingProvider};
use ctxprompt_core::store::SimilarityStore;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::classification::{Classification, NormalizationPolicy};
use crate::context::ContextAssembler;
use crate::orchestrator::RunOrchestrator;

/// How the final prompt reaches the model.
pub enum Executor {
    /// Single-shot chat completion. Retrieved items travel as system messages.
    Classic {
        provider: Arc<dyn CompletionProvider>,
        options: CompletionOptions,
    },
    /// Thread + run. Retrieved items travel as user messages, since threads
    /// accept no system role.
    AssistantRun {
        orchestrator: RunOrchestrator,
        timeout: Duration,
    },
}

impl Executor {
    fn kind(&self) -> &'static str {
        match self {
            Self::Classic { .. } => "classic",
            Self::AssistantRun { .. } => "assistant_run",
        }
    }

    fn context_message(&self, text: &str) -> Message {
        match self {
            Self::Classic { .. } => Message::system(text),
            Self::AssistantRun { .. } => Message::user(text),
        }
    }
}

/// Result of [`Retriever::answer`].
#[derive(Debug, Clone)]
pub struct Answer {
    pub classification: Classification,
    /// The reply as the model sent it.
    pub raw: String,
    pub retrieved: Vec<ScoredEmbedding>,
    pub context: BoundedContext,
}

pub struct Retriever {
    embedder: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn SimilarityStore>,
    assembler: ContextAssembler,
    executor: Executor,
    normalization: NormalizationPolicy,
}

impl Retriever {
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        store: Arc<dyn SimilarityStore>,
        assembler: ContextAssembler,
        executor: Executor,
    ) -> Self {
        Self {
            embedder,
            store,
            assembler,
            executor,
            normalization: NormalizationPolicy::default(),
        }
    }

    pub fn with_normalization(mut self, policy: NormalizationPolicy) -> Self {
        self.normalization = policy;
        self
    }

    pub fn store(&self) -> &Arc<dyn SimilarityStore> {
        &self.store
    }

    pub fn mode(&self) -> &'static str {
        self.executor.kind()
    }

    /// Answer `query` with retrieved context and bounded history, and parse
    /// the reply as a classification.
    pub async fn answer(
        &self,
        query: &str,
        history: &[Exchange],
        k: usize,
        cancel: &CancelSignal,
    ) -> Result<Answer, Error> {
        require_text(query)?;
        self.assembler.validate()?;

        let retrieved = self.retrieve(query, k, cancel).await?;
        let context = self.assembler.build(history)?;

        let mut messages = context.to_messages();
        messages.extend(retrieved.iter().map(|item| self.executor.context_message(item.embedding.text())));
        messages.push(Message::user(query));

        debug!(
            mode = self.executor.kind(),
            history_pairs = context.pair_count(),
            history_tokens = context.total_tokens,
            retrieved = retrieved.len(),
            "Composed prompt"
        );

        let raw = self.execute(&messages, cancel).await?;
        let classification = self.normalization.parse(&raw)?;

        info!(
            score = classification.score,
            topic = %classification.topic,
            category = %classification.category,
            "Answer classified"
        );

        Ok(Answer {
            classification,
            raw,
            retrieved,
            context,
        })
    }

    /// Embed `text` and store it. The id defaults to the text itself, and the
    /// text is kept under the `"text"` metadata key.
    pub async fn add_context(
        &self,
        text: &str,
        id: Option<String>,
        mut metadata: Metadata,
        cancel: &CancelSignal,
    ) -> Result<String, Error> {
        require_text(text)?;

        let vector = guarded(cancel, self.embedder.embed(text)).await??;
        if vector.is_empty() {
            return Err(ValidationError::EmptyVector.into());
        }

        let id = id.unwrap_or_else(|| text.to_string());
        metadata.insert(TEXT_KEY.to_string(), text.into());
        let embedding = Embedding {
            id: id.clone(),
            vector,
            metadata,
        };
        guarded(cancel, self.store.add(embedding)).await??;

        debug!(id = %id, store = self.store.kind(), "Added context");
        Ok(id)
    }

    /// Top-K stored items most similar to `query`.
    pub async fn similar_context(
        &self,
        query: &str,
        k: usize,
        cancel: &CancelSignal,
    ) -> Result<Vec<ScoredEmbedding>, Error> {
        require_text(query)?;
        self.retrieve(query, k, cancel).await
    }

    /// Send `prompt` with retrieved items as context and return the raw reply.
    pub async fn query(&self, prompt: &str, k: usize, cancel: &CancelSignal) -> Result<String, Error> {
        require_text(prompt)?;

        let retrieved = self.retrieve(prompt, k, cancel).await?;
        let mut messages: Vec<Message> = retrieved
            .iter()
            .map(|item| self.executor.context_message(item.embedding.text()))
            .collect();
        messages.push(Message::user(prompt));

        self.execute(&messages, cancel).await
    }

    /// Drop every stored item.
    pub async fn clear_context(&self) -> Result<(), Error> {
        self.store.clear().await?;
        info!(store = self.store.kind(), "Cleared context store");
        Ok(())
    }

    async fn retrieve(
        &self,
        query: &str,
        k: usize,
        cancel: &CancelSignal,
    ) -> Result<Vec<ScoredEmbedding>, Error> {
        if k == 0 {
            return Ok(Vec::new());
        }

        let vector = guarded(cancel, self.embedder.embed(query)).await??;
        let retrieved = guarded(cancel, self.store.search(&vector, k)).await??;
        debug!(k, returned = retrieved.len(), store = self.store.kind(), "Retrieved context");
        Ok(retrieved)
    }

    async fn execute(&self, messages: &[Message], cancel: &CancelSignal) -> Result<String, Error> {
        match &self.executor {
            Executor::Classic { provider, options } => {
                Ok(guarded(cancel, provider.complete(messages, options)).await??)
            }
            Executor::AssistantRun {
                orchestrator,
                timeout,
            } => orchestrator.run(messages, *timeout, cancel).await,
        }
    }
}

fn require_text(text: &str) -> Result<(), ValidationError> {
    if text.trim().is_empty() {
        Err(ValidationError::EmptyInput)
    } else {
        Ok(())
    }
}

async fn guarded<F: Future>(cancel: &CancelSignal, fut: F) -> Result<F::Output, Error> {
    cancel.guard(fut).await.ok_or(Error::Cancelled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{AssemblerConfig, HeuristicTokenCounter};
    use crate::orchestrator::RunPolicy;
    use crate::test_helpers::{MockEmbedder, ScriptedTransport, SequentialMockProvider, StalledEmbedder};
    use ctxprompt_core::cancel::cancel_pair;
    use ctxprompt_core::message::Role;
    use ctxprompt_core::run::RunStatus;
    use ctxprompt_store::InMemoryStore;

    fn embedder() -> Arc<MockEmbedder> {
        Arc::new(
            MockEmbedder::new(vec![0.0, 0.0, 1.0])
                .with("rust is fast", vec![1.0, 0.0, 0.0])
                .with("python is slow", vec![0.0, 1.0, 0.0])
                .with("is rust quick?", vec![0.9, 0.1, 0.0]),
        )
    }

    fn classic(
        embedder: Arc<dyn EmbeddingProvider>,
        provider: Arc<SequentialMockProvider>,
    ) -> Retriever {
        Retriever::new(
            embedder,
            Arc::new(InMemoryStore::new()),
            ContextAssembler::default(),
            Executor::Classic {
                provider,
                options: CompletionOptions::default(),
            },
        )
    }

    async fn seed(retriever: &Retriever) {
        retriever
            .add_context("rust is fast", None, Metadata::new(), &CancelSignal::never())
            .await
            .unwrap();
        retriever
            .add_context("python is slow", None, Metadata::new(), &CancelSignal::never())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn classic_answer_composes_prompt_in_order() {
        let provider = Arc::new(SequentialMockProvider::single_text(
            "```json\n{\"score\": 140, \"topic\": \"perf\", \"brand\": \"toobad_bot\"}\n```",
        ));
        let retriever = classic(embedder(), provider.clone());
        seed(&retriever).await;

        let history = vec![Exchange::new("hello", "hi there")];
        let answer = retriever
            .answer("is rust quick?", &history, 1, &CancelSignal::never())
            .await
            .unwrap();

        assert_eq!(answer.classification.score, 100);
        assert_eq!(answer.classification.category, "bad_chain");
        assert_eq!(answer.retrieved.len(), 1);
        assert_eq!(answer.retrieved[0].embedding.id, "rust is fast");

        let sent = &provider.received()[0];
        let shape: Vec<_> = sent.iter().map(|m| (m.role, m.content.as_str())).collect();
        assert_eq!(
            shape,
            vec![
                (Role::User, "hello"),
                (Role::Assistant, "hi there"),
                (Role::System, "rust is fast"),
                (Role::User, "is rust quick?"),
            ]
        );
    }

    #[tokio::test]
    async fn empty_query_rejected_before_io() {
        let embedder = embedder();
        let provider = Arc::new(SequentialMockProvider::new(vec![]));
        let retriever = classic(embedder.clone(), provider);

        let err = retriever
            .answer("   ", &[], 3, &CancelSignal::never())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(ValidationError::EmptyInput)));
        assert!(embedder.calls().is_empty());
    }

    #[tokio::test]
    async fn invalid_budget_rejected_before_io() {
        let embedder = embedder();
        let retriever = Retriever::new(
            embedder.clone(),
            Arc::new(InMemoryStore::new()),
            ContextAssembler::new(
                AssemblerConfig {
                    budget: 0,
                    ..AssemblerConfig::default()
                },
                Arc::new(HeuristicTokenCounter),
            ),
            Executor::Classic {
                provider: Arc::new(SequentialMockProvider::new(vec![])),
                options: CompletionOptions::default(),
            },
        );

        let err = retriever
            .answer("is rust quick?", &[], 3, &CancelSignal::never())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(ValidationError::InvalidBudget(_))));
        assert!(embedder.calls().is_empty());
    }

    #[tokio::test]
    async fn run_mode_sends_context_as_user_messages() {
        let transport = Arc::new(ScriptedTransport::completing(
            0,
            "{\"score\": 42, \"topic\": \"speed\", \"category\": \"lang\"}",
        ));
        let retriever = Retriever::new(
            embedder(),
            Arc::new(InMemoryStore::new()),
            ContextAssembler::default(),
            Executor::AssistantRun {
                orchestrator: RunOrchestrator::new(
                    transport.clone(),
                    "asst_1",
                    RunPolicy {
                        poll_interval: Duration::from_millis(1),
                        ..RunPolicy::default()
                    },
                ),
                timeout: Duration::from_secs(5),
            },
        );
        seed(&retriever).await;

        let answer = retriever
            .answer("is rust quick?", &[], 2, &CancelSignal::never())
            .await
            .unwrap();
        assert_eq!(answer.classification.score, 42);
        assert_eq!(answer.classification.topic, "speed");
        assert_eq!(retriever.mode(), "assistant_run");

        let thread = transport.thread();
        let inputs: Vec<_> = thread
            .iter()
            .filter(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .collect();
        assert_eq!(inputs, vec!["rust is fast", "python is slow", "is rust quick?"]);
    }

    #[tokio::test]
    async fn run_failure_surfaces_terminal_status() {
        let transport = Arc::new(ScriptedTransport::new(vec![RunStatus::Expired], vec![]));
        let retriever = Retriever::new(
            embedder(),
            Arc::new(InMemoryStore::new()),
            ContextAssembler::default(),
            Executor::AssistantRun {
                orchestrator: RunOrchestrator::new(
                    transport,
                    "asst_1",
                    RunPolicy {
                        poll_interval: Duration::from_millis(1),
                        ..RunPolicy::default()
                    },
                ),
                timeout: Duration::from_secs(5),
            },
        );

        let err = retriever
            .answer("anything", &[], 0, &CancelSignal::never())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Run(ctxprompt_core::RunError::TerminatedAbnormally {
                status: RunStatus::Expired
            })
        ));
    }

    #[tokio::test]
    async fn malformed_reply_is_parse_error() {
        let provider = Arc::new(SequentialMockProvider::single_text("**I cannot do that**"));
        let retriever = classic(embedder(), provider);
        let err = retriever
            .answer("is rust quick?", &[], 1, &CancelSignal::never())
            .await
            .unwrap_err();
        match err {
            Error::Parse { raw, .. } => assert_eq!(raw, "I cannot do that"),
            other => panic!("expected parse error, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_before_search() {
        let provider = Arc::new(SequentialMockProvider::new(vec![]));
        let retriever = Arc::new(classic(Arc::new(StalledEmbedder), provider));
        let (handle, signal) = cancel_pair();

        let task = {
            let retriever = retriever.clone();
            tokio::spawn(async move { retriever.similar_context("anything", 5, &signal).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.cancel();

        let err = task.await.unwrap().unwrap_err();
        assert!(matches!(err, Error::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_add_before_store() {
        let provider = Arc::new(SequentialMockProvider::new(vec![]));
        let retriever = Arc::new(classic(Arc::new(StalledEmbedder), provider));
        let (handle, signal) = cancel_pair();

        let task = {
            let retriever = retriever.clone();
            tokio::spawn(async move {
                retriever
                    .add_context("never stored", None, Metadata::new(), &signal)
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.cancel();

        let err = task.await.unwrap().unwrap_err();
        assert!(matches!(err, Error::Cancelled));
        assert_eq!(retriever.store().count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn prompter_operations() {
        let provider = Arc::new(SequentialMockProvider::single_text("raw reply"));
        let retriever = classic(embedder(), provider.clone());

        let id = retriever
            .add_context(
                "rust is fast",
                Some("doc-1".into()),
                Metadata::new(),
                &CancelSignal::never(),
            )
            .await
            .unwrap();
        assert_eq!(id, "doc-1");
        seed(&retriever).await;
        assert_eq!(retriever.store().count().await.unwrap(), 3);

        let similar = retriever
            .similar_context("is rust quick?", 2, &CancelSignal::never())
            .await
            .unwrap();
        assert_eq!(similar[0].embedding.text(), "rust is fast");

        let reply = retriever
            .query("is rust quick?", 1, &CancelSignal::never())
            .await
            .unwrap();
        assert_eq!(reply, "raw reply");
        let sent = &provider.received()[0];
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].role, Role::System);

        retriever.clear_context().await.unwrap();
        assert_eq!(retriever.store().count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn add_context_rejects_empty_text() {
        let retriever = classic(embedder(), Arc::new(SequentialMockProvider::new(vec![])));
        let err = retriever
            .add_context("", None, Metadata::new(), &CancelSignal::never())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(ValidationError::EmptyInput)));
    }
}
