//! Dispatcher - turns a host list into pool tasks and aggregates outcomes.

use crate::backend::BuildBackend;
use crate::cancel::CancelToken;
use crate::error::Result;
use crate::observer::{NoProgress, ProvisionObserver};
use crate::pool::WorkerPool;
use crate::task::{ProvisionTask, TaskContext};
use crate::types::{DispatchResult, Host, OutcomeState, PollConfig, TaskOutcome};
use std::sync::Arc;
use std::sync::mpsc;

/// Options for dispatching.
#[derive(Debug, Clone)]
pub struct DispatchOptions {
    /// Number of concurrent workers
    pub workers: usize,
    /// Queue slots between the dispatcher and workers
    pub queue_capacity: usize,
    /// Status polling policy
    pub poll: PollConfig,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_capacity: 4,
            poll: PollConfig::default(),
        }
    }
}

/// Cross-thread control over a running dispatch.
#[derive(Debug, Clone, Default)]
pub struct DispatchHandle {
    drain: CancelToken,
    abort: CancelToken,
}

impl DispatchHandle {
    /// Stop submitting; tasks not yet started are aborted, running tasks finish.
    pub fn drain(&self) {
        self.drain.cancel();
    }

    /// Drain, and make running tasks abort at their next poll iteration.
    pub fn abort(&self) {
        self.drain.cancel();
        self.abort.cancel();
    }

    pub fn is_draining(&self) -> bool {
        self.drain.is_cancelled()
    }

    pub fn is_aborted(&self) -> bool {
        self.abort.is_cancelled()
    }
}

/// Submits one task per host to a worker pool and collects the results.
pub struct Dispatcher {
    backend: Arc<dyn BuildBackend>,
    options: DispatchOptions,
    observer: Arc<dyn ProvisionObserver>,
    handle: DispatchHandle,
}

impl Dispatcher {
    pub fn new(backend: Arc<dyn BuildBackend>, options: DispatchOptions) -> Self {
        Self {
            backend,
            options,
            observer: Arc::new(NoProgress),
            handle: DispatchHandle::default(),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn ProvisionObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Handle for draining or aborting from another thread.
    pub fn handle(&self) -> DispatchHandle {
        self.handle.clone()
    }

    /// Provision every host and wait for all outcomes.
    ///
    /// Produces exactly one outcome per host. Hosts not submitted because
    /// of a drain are recorded as aborted; any aborted host marks the
    /// result incomplete.
    pub fn dispatch(&self, hosts: &[Host]) -> Result<DispatchResult> {
        self.options.poll.validate()?;

        let ctx = Arc::new(TaskContext {
            backend: Arc::clone(&self.backend),
            poll: self.options.poll.clone(),
            drain: self.handle.drain.clone(),
            abort: self.handle.abort.clone(),
            observer: Arc::clone(&self.observer),
        });

        let workers = self.options.workers.min(hosts.len()).max(1);
        let capacity = self.options.queue_capacity.max(1);
        let (tx, rx) = mpsc::channel();
        let pool = WorkerPool::start(workers, capacity, ctx, tx)?;

        log::info!(
            "dispatching {} hosts to {} workers via {} backend",
            hosts.len(),
            pool.size(),
            self.backend.name()
        );
        self.observer.on_dispatch_start(hosts.len(), pool.size());

        let mut outcomes: Vec<TaskOutcome> = Vec::with_capacity(hosts.len());
        let mut submitted = 0usize;

        for host in hosts {
            if self.handle.is_draining() {
                let outcome = TaskOutcome::aborted(host, "shutdown requested before dispatch");
                self.observer.on_task_complete(&outcome);
                outcomes.push(outcome);
                continue;
            }

            let task = ProvisionTask::new(Arc::new(host.clone()));
            match pool.submit(task) {
                Ok(()) => submitted += 1,
                Err(e) => {
                    let outcome = TaskOutcome::failed(host, e.to_string());
                    self.observer.on_task_complete(&outcome);
                    outcomes.push(outcome);
                }
            }
        }

        pool.stop();
        outcomes.extend(rx.iter().take(submitted));

        let complete = outcomes.iter().all(|o| o.state != OutcomeState::Aborted);
        let result = DispatchResult::from_outcomes(outcomes, complete);

        log::info!(
            "dispatch finished: {} succeeded, {} failed, {} aborted",
            result.succeeded.len(),
            result.failed.len(),
            result.aborted.len()
        );

        Ok(result)
    }
}
