//! Remote run orchestration: thread → messages → run → poll → result.
//!
//! # Flow
//!
//! 1. `start`: create a thread, append every input message in order, then
//!    start a run of the configured assistant over it.
//! 2. `await_result`: sleep one poll interval, fetch the run status, repeat
//!    until a terminal status or the deadline.
//! 3. On `completed`, list the thread and return the newest assistant
//!    message that is not one of our inputs and is not older than the last
//!    input.
//!
//! Every suspension point races the caller's [`CancelSignal`] and the
//! deadline. A run that outlives the deadline is left running unless
//! [`RunPolicy::cancel_on_timeout`] is set.

use chrono::{DateTime, Utc};
use ctxprompt_config::RunConfig;
use ctxprompt_core::cancel::CancelSignal;
use ctxprompt_core::error::{Error, ProviderError, RunError, ValidationError};
use ctxprompt_core::message::{Message, Role};
use ctxprompt_core::run::{RemoteRun, RunStatus, RunTransport, ThreadMessage};
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Polling behaviour.
#[derive(Debug, Clone)]
pub struct RunPolicy {
    pub poll_interval: Duration,
    /// Ask the provider to cancel a run that outlived its deadline.
    pub cancel_on_timeout: bool,
}

impl Default for RunPolicy {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            cancel_on_timeout: false,
        }
    }
}

impl From<&RunConfig> for RunPolicy {
    fn from(config: &RunConfig) -> Self {
        Self {
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            cancel_on_timeout: config.cancel_on_timeout,
        }
    }
}

/// A started run and what we appended to its thread.
#[derive(Debug, Clone)]
pub struct RunHandle {
    run: RemoteRun,
    appended: HashSet<String>,
    /// Remote timestamp of the last appended input.
    marker: Option<DateTime<Utc>>,
}

impl RunHandle {
    pub fn thread_id(&self) -> &str {
        &self.run.thread_id
    }

    pub fn run_id(&self) -> &str {
        &self.run.run_id
    }

    pub fn status(&self) -> RunStatus {
        self.run.status
    }
}

/// Drives one assistant over remote threads.
pub struct RunOrchestrator {
    transport: Arc<dyn RunTransport>,
    assistant_id: String,
    policy: RunPolicy,
}

impl RunOrchestrator {
    pub fn new(
        transport: Arc<dyn RunTransport>,
        assistant_id: impl Into<String>,
        policy: RunPolicy,
    ) -> Self {
        Self {
            transport,
            assistant_id: assistant_id.into(),
            policy,
        }
    }

    pub fn assistant_id(&self) -> &str {
        &self.assistant_id
    }

    /// Start a run and wait for its answer within one shared `timeout`.
    pub async fn run(
        &self,
        messages: &[Message],
        timeout: Duration,
        cancel: &CancelSignal,
    ) -> Result<String, Error> {
        let started = Instant::now();
        let handle = self.start(messages, timeout, cancel).await?;
        let remaining = timeout.saturating_sub(started.elapsed());
        self.await_result(handle, remaining, cancel).await
    }

    /// Create a thread, append `messages` in order, and start the run.
    pub async fn start(
        &self,
        messages: &[Message],
        timeout: Duration,
        cancel: &CancelSignal,
    ) -> Result<RunHandle, Error> {
        if messages.is_empty() {
            return Err(ValidationError::EmptyInput.into());
        }

        let clock = Deadline::new(timeout);

        let thread_id = clock
            .bound(self.transport.create_thread(), cancel, "", "")
            .await?;

        let mut appended = HashSet::with_capacity(messages.len());
        let mut marker = None;
        for message in messages {
            let stored = clock
                .bound(
                    self.transport.append_message(&thread_id, message),
                    cancel,
                    &thread_id,
                    "",
                )
                .await?;
            marker = Some(stored.created_at);
            appended.insert(stored.id);
        }

        let run = clock
            .bound(
                self.transport.create_run(&thread_id, &self.assistant_id),
                cancel,
                &thread_id,
                "",
            )
            .await?;

        info!(
            thread_id = %run.thread_id,
            run_id = %run.run_id,
            messages = messages.len(),
            transport = self.transport.name(),
            "Started remote run"
        );

        Ok(RunHandle {
            run,
            appended,
            marker,
        })
    }

    /// Poll until the run is terminal, then extract the assistant's answer.
    pub async fn await_result(
        &self,
        handle: RunHandle,
        timeout: Duration,
        cancel: &CancelSignal,
    ) -> Result<String, Error> {
        let clock = Deadline::new(timeout);
        let RunHandle {
            mut run,
            appended,
            marker,
        } = handle;

        while !run.is_terminal() {
            let now = Instant::now();
            if now >= clock.at {
                return Err(self.timed_out(&run, &clock, cancel).await);
            }

            let wake = clock.clamp(now.checked_add(self.policy.poll_interval));
            if cancel.guard(tokio::time::sleep_until(wake)).await.is_none() {
                debug!(run_id = %run.run_id, "Run polling cancelled");
                return Err(Error::Cancelled);
            }
            if wake >= clock.at {
                return Err(self.timed_out(&run, &clock, cancel).await);
            }

            let status = clock
                .bound(
                    self.transport.get_run_status(&run.thread_id, &run.run_id),
                    cancel,
                    &run.thread_id,
                    &run.run_id,
                )
                .await?;
            run.advance(status)?;
            debug!(thread_id = %run.thread_id, run_id = %run.run_id, status = %status, "Polled run");
        }

        if run.status != RunStatus::Completed {
            warn!(
                thread_id = %run.thread_id,
                run_id = %run.run_id,
                status = %run.status,
                "Run terminated abnormally"
            );
            return Err(RunError::TerminatedAbnormally { status: run.status }.into());
        }

        let messages = clock
            .bound(
                self.transport.list_messages(&run.thread_id),
                cancel,
                &run.thread_id,
                &run.run_id,
            )
            .await?;

        let answer = select_answer(&messages, &appended, marker).ok_or_else(|| {
            RunError::NoAssistantResponse {
                thread_id: run.thread_id.clone(),
            }
        })?;

        info!(
            thread_id = %run.thread_id,
            run_id = %run.run_id,
            waited_ms = clock.waited_ms(),
            "Run completed"
        );
        Ok(answer.content.clone())
    }

    async fn timed_out(&self, run: &RemoteRun, clock: &Deadline, cancel: &CancelSignal) -> Error {
        warn!(
            thread_id = %run.thread_id,
            run_id = %run.run_id,
            status = %run.status,
            waited_ms = clock.waited_ms(),
            "Run did not finish before the deadline"
        );

        if self.policy.cancel_on_timeout {
            match cancel
                .guard(self.transport.cancel_run(&run.thread_id, &run.run_id))
                .await
            {
                Some(Ok(status)) => {
                    debug!(run_id = %run.run_id, status = %status, "Requested remote cancellation")
                }
                Some(Err(e)) => warn!(run_id = %run.run_id, error = %e, "Remote cancellation failed"),
                None => {}
            }
        }

        RunError::Timeout {
            thread_id: run.thread_id.clone(),
            run_id: run.run_id.clone(),
            waited_ms: clock.waited_ms(),
        }
        .into()
    }
}

/// Newest assistant message that is not one of our inputs and is not older
/// than the last input. Ties go to the later-listed message.
fn select_answer<'a>(
    messages: &'a [ThreadMessage],
    appended: &HashSet<String>,
    marker: Option<DateTime<Utc>>,
) -> Option<&'a ThreadMessage> {
    messages
        .iter()
        .filter(|m| m.role == Role::Assistant)
        .filter(|m| !appended.contains(&m.id))
        .filter(|m| marker.is_none_or(|t| m.created_at >= t))
        .max_by_key(|m| m.created_at)
}

/// Stand-in deadline for timeouts too long to represent (about 30 years).
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// One deadline shared by every step of a phase.
struct Deadline {
    started: Instant,
    at: Instant,
}

impl Deadline {
    fn new(timeout: Duration) -> Self {
        let started = Instant::now();
        let at = started
            .checked_add(timeout)
            .or_else(|| started.checked_add(FAR_FUTURE))
            .unwrap_or(started);
        Self { started, at }
    }

    /// An instant no later than the deadline. `None` means past representable time.
    fn clamp(&self, instant: Option<Instant>) -> Instant {
        instant.map_or(self.at, |t| t.min(self.at))
    }

    fn waited_ms(&self) -> u64 {
        u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    /// Run one remote call, bounded by the deadline and the cancel signal.
    async fn bound<T>(
        &self,
        call: impl Future<Output = Result<T, ProviderError>>,
        cancel: &CancelSignal,
        thread_id: &str,
        run_id: &str,
    ) -> Result<T, Error> {
        match cancel.guard(tokio::time::timeout_at(self.at, call)).await {
            None => Err(Error::Cancelled),
            Some(Err(_elapsed)) => Err(RunError::Timeout {
                thread_id: thread_id.to_string(),
                run_id: run_id.to_string(),
                waited_ms: self.waited_ms(),
            }
            .into()),
            Some(Ok(result)) => result.map_err(|e| RunError::Transport(e).into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{ScriptedTransport, epoch};
    use chrono::TimeDelta;
    use ctxprompt_core::cancel::cancel_pair;

    fn orchestrator(transport: Arc<ScriptedTransport>, policy: RunPolicy) -> RunOrchestrator {
        RunOrchestrator::new(transport, "asst_test", policy)
    }

    fn inputs() -> Vec<Message> {
        vec![
            Message::user("earlier question"),
            Message::assistant("earlier answer"),
            Message::user("classify this"),
        ]
    }

    #[tokio::test(start_paused = true)]
    async fn completed_run_returns_reply() {
        let transport = Arc::new(ScriptedTransport::completing(2, "{\"score\": 7}"));
        let orch = orchestrator(transport.clone(), RunPolicy::default());

        let answer = orch
            .run(&inputs(), Duration::from_secs(60), &CancelSignal::never())
            .await
            .unwrap();

        assert_eq!(answer, "{\"score\": 7}");
        assert_eq!(transport.polls(), 3);
        // Inputs were appended in order, before the run started.
        let thread = transport.thread();
        assert_eq!(thread[0].content, "earlier question");
        assert_eq!(thread[1].role, Role::Assistant);
        assert_eq!(thread[2].content, "classify this");
    }

    #[tokio::test(start_paused = true)]
    async fn failed_run_is_not_a_timeout() {
        let transport = Arc::new(ScriptedTransport::new(
            vec![RunStatus::Queued, RunStatus::InProgress, RunStatus::Failed],
            vec![],
        ));
        let orch = orchestrator(transport.clone(), RunPolicy::default());

        let err = orch
            .run(&inputs(), Duration::from_secs(60), &CancelSignal::never())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            Error::Run(RunError::TerminatedAbnormally {
                status: RunStatus::Failed
            })
        ));
        assert_eq!(transport.polls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn every_abnormal_terminal_status_ends_polling() {
        for terminal in [RunStatus::Failed, RunStatus::Cancelled, RunStatus::Expired] {
            let transport = Arc::new(ScriptedTransport::new(vec![terminal], vec![]));
            let orch = orchestrator(transport, RunPolicy::default());
            let err = orch
                .run(&inputs(), Duration::from_secs(10), &CancelSignal::never())
                .await
                .unwrap_err();
            match err {
                Error::Run(RunError::TerminatedAbnormally { status }) => assert_eq!(status, terminal),
                other => panic!("expected abnormal termination, got {other:?}"),
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn stuck_run_times_out_without_cancelling() {
        let transport = Arc::new(ScriptedTransport::new(vec![], vec![]));
        let orch = orchestrator(transport.clone(), RunPolicy::default());

        let err = orch
            .run(&inputs(), Duration::from_secs(5), &CancelSignal::never())
            .await
            .unwrap_err();

        match err {
            Error::Run(RunError::Timeout {
                thread_id, run_id, ..
            }) => {
                assert_eq!(thread_id, "thread_test");
                assert_eq!(run_id, "run_test");
            }
            other => panic!("expected timeout, got {other:?}"),
        }
        assert!(transport.cancels().is_empty());
        // One-second ticks inside a five-second window.
        assert_eq!(transport.polls(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_can_cancel_remote_run() {
        let transport = Arc::new(ScriptedTransport::new(vec![], vec![]));
        let policy = RunPolicy {
            cancel_on_timeout: true,
            ..RunPolicy::default()
        };
        let orch = orchestrator(transport.clone(), policy);

        let err = orch
            .run(&inputs(), Duration::from_secs(3), &CancelSignal::never())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Run(RunError::Timeout { .. })));
        assert_eq!(transport.cancels(), vec!["run_test".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_remote_cancel_still_reports_timeout() {
        let transport = Arc::new(ScriptedTransport::new(vec![], vec![]).without_cancel());
        let policy = RunPolicy {
            cancel_on_timeout: true,
            ..RunPolicy::default()
        };
        let err = orchestrator(transport, policy)
            .run(&inputs(), Duration::from_secs(2), &CancelSignal::never())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Run(RunError::Timeout { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_signal_aborts_polling_promptly() {
        let transport = Arc::new(ScriptedTransport::new(vec![], vec![]));
        let orch = Arc::new(orchestrator(transport.clone(), RunPolicy::default()));
        let (handle, signal) = cancel_pair();

        let task = {
            let orch = orch.clone();
            tokio::spawn(async move {
                orch.run(&inputs(), Duration::from_secs(3600), &signal).await
            })
        };

        tokio::time::sleep(Duration::from_millis(2500)).await;
        handle.cancel();
        let err = task.await.unwrap().unwrap_err();

        assert!(matches!(err, Error::Cancelled));
        assert_eq!(transport.polls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn unbounded_timeout_still_polls() {
        let transport = Arc::new(ScriptedTransport::completing(1, "{\"score\": 3}"));
        let orch = orchestrator(transport.clone(), RunPolicy::default());

        let answer = orch
            .run(&inputs(), Duration::MAX, &CancelSignal::never())
            .await
            .unwrap();
        assert_eq!(answer, "{\"score\": 3}");
        assert_eq!(transport.polls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn oversized_poll_interval_waits_for_deadline() {
        let transport = Arc::new(ScriptedTransport::new(vec![], vec![]));
        let policy = RunPolicy {
            poll_interval: Duration::MAX,
            ..RunPolicy::default()
        };

        let err = orchestrator(transport.clone(), policy)
            .run(&inputs(), Duration::from_secs(3), &CancelSignal::never())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Run(RunError::Timeout { .. })));
        assert_eq!(transport.polls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn already_cancelled_signal_skips_remote_calls() {
        let transport = Arc::new(ScriptedTransport::completing(0, "x"));
        let orch = orchestrator(transport.clone(), RunPolicy::default());
        let (handle, signal) = cancel_pair();
        handle.cancel();

        let err = orch
            .run(&inputs(), Duration::from_secs(10), &signal)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
        assert!(transport.thread().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn completed_without_reply_is_no_assistant_response() {
        let transport = Arc::new(ScriptedTransport::new(vec![RunStatus::Completed], vec![]));
        let orch = orchestrator(transport, RunPolicy::default());
        let err = orch
            .run(&inputs(), Duration::from_secs(10), &CancelSignal::never())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Run(RunError::NoAssistantResponse { .. })));
    }

    #[tokio::test]
    async fn empty_input_rejected_before_any_call() {
        let transport = Arc::new(ScriptedTransport::completing(0, "x"));
        let orch = orchestrator(transport.clone(), RunPolicy::default());
        let err = orch
            .start(&[], Duration::from_secs(1), &CancelSignal::never())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(ValidationError::EmptyInput)));
        assert!(transport.thread().is_empty());
    }

    #[test]
    fn answer_selection_skips_inputs_and_stale_replies() {
        let t = epoch();
        let msg = |id: &str, role: Role, secs: i64| ThreadMessage {
            id: id.into(),
            role,
            content: id.into(),
            created_at: t + TimeDelta::seconds(secs),
        };
        let thread = vec![
            msg("stale", Role::Assistant, 0),
            msg("input_q", Role::User, 5),
            msg("input_a", Role::Assistant, 6),
            msg("same_second", Role::Assistant, 6),
            msg("user_after", Role::User, 9),
        ];
        let appended: HashSet<String> = ["input_q", "input_a"].map(String::from).into();
        let marker = Some(t + TimeDelta::seconds(6));

        let picked = select_answer(&thread, &appended, marker).unwrap();
        assert_eq!(picked.id, "same_second");

        let nothing = select_answer(&thread[..3], &appended, marker);
        assert!(nothing.is_none());
    }

    #[test]
    fn policy_from_config() {
        let config = RunConfig {
            poll_interval_ms: 250,
            timeout_secs: 9,
            cancel_on_timeout: true,
        };
        let policy = RunPolicy::from(&config);
        assert_eq!(policy.poll_interval, Duration::from_millis(250));
        assert!(policy.cancel_on_timeout);
    }
}
