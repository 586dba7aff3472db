//! Progress observation hooks.
//!
//! The provisioning engine never prints. Callers that want progress bars or
//! summaries implement [`ProvisionObserver`]; every method has a no-op
//! default so implementations only override what they display.

use crate::error::Error;
use crate::shutdown::ShutdownState;
use crate::types::{BuildStatus, Host, TaskOutcome, TaskState};

/// Receives progress updates from workers and the command runner.
///
/// Called concurrently from worker threads, hence `Send + Sync` and `&self`.
pub trait ProvisionObserver: Send + Sync {
    /// Called once before any task is submitted.
    fn on_dispatch_start(&self, _hosts: usize, _workers: usize) {}

    /// Called on every task state transition.
    fn on_task_state(&self, _host: &Host, _state: TaskState) {}

    /// Called after each status query.
    fn on_poll(&self, _host: &Host, _attempt: u32, _status: Result<BuildStatus, &Error>) {}

    /// Called when a task reaches a terminal state.
    fn on_task_complete(&self, _outcome: &TaskOutcome) {}

    /// Called when the shutdown coordinator changes state.
    fn on_shutdown(&self, _state: ShutdownState) {}

    /// Called before the configuration phase starts.
    fn on_config_start(&self, _hosts: usize) {}

    /// Called after each configuration-management run.
    fn on_config_complete(&self, _host: &Host, _result: Result<(), &Error>) {}
}

/// No-op observer.
pub struct NoProgress;

impl ProvisionObserver for NoProgress {}
