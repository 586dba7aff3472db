//! Provision - concurrent host provisioning engine.
//!
//! Builds a list of hosts through a [`BuildBackend`] on a bounded pool of
//! worker threads, polls each build until it finishes, then applies a
//! configuration-management run list to the hosts that built.
//!
//! # Example
//!
//! ```no_run
//! use provision::{CommandRunner, Host, PhysicalBackend, RunOptions};
//! use std::sync::Arc;
//!
//! let runner = CommandRunner::new(Arc::new(PhysicalBackend), RunOptions::default());
//! let _interrupts = runner.interrupt_handle();
//! // hand the handle to a signal handler, then:
//! let report = runner
//!     .run(vec![Host::new("web01"), Host::new("web02")])
//!     .expect("invalid host list");
//! std::process::exit(report.exit_code());
//! ```
//!
//! # Shutdown
//!
//! The first [`InterruptHandle::interrupt`] stops new builds and waits for
//! running ones; the second returns immediately with an aborted
//! [`RunReport`].

pub mod backend;
pub mod cancel;
pub mod dispatcher;
pub mod error;
pub mod observer;
pub mod poller;
pub mod pool;
pub mod runner;
pub mod shutdown;
pub mod task;
pub mod types;

pub use backend::{
    BuildBackend, ChefApplier, ChefSettings, ConfigApplier, ForemanCredentials, HammerBackend,
    PhysicalBackend, VirtualBuildSettings,
};
pub use cancel::CancelToken;
pub use dispatcher::{DispatchHandle, DispatchOptions, Dispatcher};
pub use error::{Error, ErrorCategory, Result};
pub use observer::{NoProgress, ProvisionObserver};
pub use runner::{CommandRunner, InterruptHandle, RunOptions, RunReport};
pub use shutdown::{DATA_LOSS_WARNING, ShutdownCoordinator, ShutdownState};
pub use types::{
    BuildStatus, ConfigReport, DispatchResult, Host, OutcomeState, PollConfig, TaskOutcome,
    TaskState,
};
