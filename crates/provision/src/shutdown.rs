//! Two-stage interrupt escalation.
//!
//! `Idle -> GracefulShutdown -> (ImmediateAbort | Completed)`
//!
//! The first interrupt asks for a graceful shutdown: no new work, let
//! in-flight work finish. A second interrupt while still waiting means
//! return immediately and accept that in-flight builds are left in an
//! unknown state. The coordinator only counts interrupts; it never
//! buffers more than the first/second distinction.

use serde::Serialize;

/// Warning shown when the run is abandoned on a second interrupt.
pub const DATA_LOSS_WARNING: &str = "Two interrupts received - exiting immediately. \
     Some hosts may not have finished building and no cleanup will be attempted.";

/// Coordinator state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ShutdownState {
    /// No interrupt received
    Idle,
    /// First interrupt received; draining
    GracefulShutdown,
    /// Second interrupt received; caller returns at once
    ImmediateAbort,
    /// All work finished before a second interrupt
    Completed,
}

/// What the caller should do after an interrupt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Escalation {
    /// Stop submitting work, keep waiting for in-flight work
    BeginGraceful,
    /// Stop waiting and return a failure
    AbortImmediately,
    /// Work already finished or aborted; nothing to do
    Ignore,
}

/// Counts interrupts and decides how to escalate.
#[derive(Debug)]
pub struct ShutdownCoordinator {
    state: ShutdownState,
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self {
            state: ShutdownState::Idle,
        }
    }

    pub fn state(&self) -> ShutdownState {
        self.state
    }

    /// Record an interrupt.
    pub fn on_interrupt(&mut self) -> Escalation {
        match self.state {
            ShutdownState::Idle => {
                self.state = ShutdownState::GracefulShutdown;
                Escalation::BeginGraceful
            }
            ShutdownState::GracefulShutdown => {
                self.state = ShutdownState::ImmediateAbort;
                Escalation::AbortImmediately
            }
            ShutdownState::ImmediateAbort | ShutdownState::Completed => Escalation::Ignore,
        }
    }

    /// Record that all work finished.
    ///
    /// No effect once an immediate abort was decided.
    pub fn on_completed(&mut self) {
        if self.state != ShutdownState::ImmediateAbort {
            self.state = ShutdownState::Completed;
        }
    }
}
