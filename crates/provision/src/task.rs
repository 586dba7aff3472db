//! Per-host provisioning task.

use crate::backend::BuildBackend;
use crate::cancel::CancelToken;
use crate::error::Error;
use crate::observer::ProvisionObserver;
use crate::poller::{PollOutcome, StatusPoller};
use crate::types::{BuildStatus, Host, OutcomeState, PollConfig, TaskOutcome, TaskState};
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Instant;

/// Everything a worker needs to run tasks, shared by all workers.
pub struct TaskContext {
    pub backend: Arc<dyn BuildBackend>,
    pub poll: PollConfig,
    /// Set on graceful shutdown: tasks not yet started are aborted
    pub drain: CancelToken,
    /// Set on escalation: running tasks abort at their next poll iteration
    pub abort: CancelToken,
    pub observer: Arc<dyn ProvisionObserver>,
}

/// Timing and attempt count of a task, readable after the task itself is
/// gone (a panic consumes it).
#[derive(Debug, Default)]
pub(crate) struct TaskProgress {
    started_at: OnceLock<DateTime<Utc>>,
    started: OnceLock<Instant>,
    poll_attempts: AtomicU32,
}

impl TaskProgress {
    fn mark_started(&self) {
        let _ = self.started_at.set(Utc::now());
        let _ = self.started.set(Instant::now());
    }

    /// Outcome record with whatever this task got through.
    pub(crate) fn outcome(&self, host: &Host, state: OutcomeState, error: Option<String>) -> TaskOutcome {
        TaskOutcome {
            host: host.name.clone(),
            state,
            error,
            poll_attempts: self.poll_attempts.load(Ordering::Relaxed),
            started_at: self.started_at.get().copied(),
            elapsed: self.started.get().map(Instant::elapsed).unwrap_or_default(),
        }
    }
}

/// Lifecycle of provisioning one host.
///
/// Owned by exactly one worker while it runs; consumed into a
/// [`TaskOutcome`] when it reaches a terminal state.
#[derive(Debug)]
pub struct ProvisionTask {
    host: Arc<Host>,
    state: TaskState,
    progress: Arc<TaskProgress>,
    last_error: Option<Error>,
}

impl ProvisionTask {
    pub fn new(host: Arc<Host>) -> Self {
        Self {
            host,
            state: TaskState::Queued,
            progress: Arc::default(),
            last_error: None,
        }
    }

    pub fn host(&self) -> &Arc<Host> {
        &self.host
    }

    pub(crate) fn progress(&self) -> Arc<TaskProgress> {
        Arc::clone(&self.progress)
    }

    /// Run the task to a terminal state.
    ///
    /// Blocking; executed by a single worker. Cancellation is observed
    /// before the build is started, after it returns, and between polls.
    pub fn run(mut self, ctx: &TaskContext) -> TaskOutcome {
        if ctx.drain.is_cancelled() || ctx.abort.is_cancelled() {
            return self.finish(ctx, TaskState::Aborted, Some("shutdown requested before start"));
        }

        self.progress.mark_started();
        self.transition(ctx, TaskState::Building);

        if let Err(e) = ctx.backend.start_build(&self.host) {
            log::warn!("{}: could not start build: {}", self.host, e);
            self.last_error = Some(e);
            return self.finish(ctx, TaskState::Failed, None);
        }

        // The build request already went out; only its result is discarded.
        if ctx.abort.is_cancelled() {
            return self.finish(ctx, TaskState::Aborted, Some("aborted after build was requested"));
        }

        self.transition(ctx, TaskState::Polling);
        let outcome = StatusPoller::new(
            ctx.backend.as_ref(),
            &ctx.poll,
            &ctx.abort,
            ctx.observer.as_ref(),
        )
        .with_counter(&self.progress.poll_attempts)
        .await_terminal(&self.host);

        match outcome {
            PollOutcome::Terminal {
                status: BuildStatus::Success,
                ..
            } => {
                log::info!("{} built successfully", self.host);
                self.finish(ctx, TaskState::Succeeded, None)
            }
            PollOutcome::Terminal { .. } => {
                self.last_error = Some(Error::BuildFailed {
                    host: self.host.name.clone(),
                });
                self.finish(ctx, TaskState::Failed, None)
            }
            PollOutcome::TimedOut {
                attempts,
                last_error,
            } => {
                self.last_error = Some(Error::PollTimeout {
                    host: self.host.name.clone(),
                    attempts,
                    last_error: last_error.map(|e| e.to_string()),
                });
                self.finish(ctx, TaskState::Failed, None)
            }
            PollOutcome::Failed { error, .. } => {
                self.last_error = Some(error);
                self.finish(ctx, TaskState::Failed, None)
            }
            PollOutcome::Cancelled { .. } => {
                self.finish(ctx, TaskState::Aborted, Some("aborted while waiting for build"))
            }
        }
    }

    fn transition(&mut self, ctx: &TaskContext, next: TaskState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "invalid task transition {} -> {}",
            self.state,
            next
        );
        self.state = next;
        ctx.observer.on_task_state(&self.host, next);
    }

    fn finish(mut self, ctx: &TaskContext, terminal: TaskState, reason: Option<&str>) -> TaskOutcome {
        self.transition(ctx, terminal);

        let state = match terminal {
            TaskState::Succeeded => OutcomeState::Succeeded,
            TaskState::Aborted => OutcomeState::Aborted,
            _ => OutcomeState::Failed,
        };
        let error = self
            .last_error
            .as_ref()
            .map(ToString::to_string)
            .or_else(|| reason.map(str::to_string));

        let outcome = self.progress.outcome(&self.host, state, error);
        ctx.observer.on_task_complete(&outcome);
        outcome
    }
}
