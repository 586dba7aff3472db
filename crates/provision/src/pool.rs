//! Fixed-size worker pool draining a bounded task queue.

use crate::error::{Error, Result};
use crate::task::{ProvisionTask, TaskContext};
use crate::types::{OutcomeState, TaskOutcome};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, Sender, SyncSender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

/// Bounded pool of worker threads executing [`ProvisionTask`]s.
///
/// Each finished task produces exactly one [`TaskOutcome`] on the outcome
/// channel, including tasks that panic.
pub struct WorkerPool {
    queue: Option<SyncSender<ProvisionTask>>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spin up `workers` threads sharing a queue of `capacity` slots.
    pub fn start(
        workers: usize,
        capacity: usize,
        ctx: Arc<TaskContext>,
        outcomes: Sender<TaskOutcome>,
    ) -> Result<Self> {
        if workers == 0 {
            return Err(Error::config("worker pool needs at least one worker"));
        }

        let (queue, rx) = mpsc::sync_channel::<ProvisionTask>(capacity);
        let rx = Arc::new(Mutex::new(rx));

        let mut handles = Vec::with_capacity(workers);
        for id in 0..workers {
            let rx = Arc::clone(&rx);
            let ctx = Arc::clone(&ctx);
            let outcomes = outcomes.clone();

            let handle = thread::Builder::new()
                .name(format!("provision-worker-{id}"))
                .spawn(move || worker_loop(&rx, &ctx, &outcomes))?;
            handles.push(handle);
        }

        log::debug!("started {workers} workers (queue capacity {capacity})");

        Ok(Self {
            queue: Some(queue),
            workers: handles,
        })
    }

    /// Enqueue a task, blocking while the queue is full.
    pub fn submit(&self, task: ProvisionTask) -> Result<()> {
        let queue = self
            .queue
            .as_ref()
            .ok_or_else(|| Error::config("worker pool already stopped"))?;

        queue.send(task).map_err(|e| Error::TaskPanicked {
            host: e.0.host().name.clone(),
            message: "no worker left to accept the task".to_string(),
        })
    }

    /// Close the queue and wait for workers to drain it and exit.
    ///
    /// Tasks already queued or running are finished, never abandoned.
    pub fn stop(mut self) {
        self.queue.take();
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                log::error!("worker thread exited abnormally");
            }
        }
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }
}

fn worker_loop(
    rx: &Mutex<Receiver<ProvisionTask>>,
    ctx: &TaskContext,
    outcomes: &Sender<TaskOutcome>,
) {
    loop {
        // Hold the lock only while receiving, not while running the task.
        let next = rx.lock().unwrap_or_else(PoisonError::into_inner).recv();
        let Ok(task) = next else {
            return;
        };

        let host = Arc::clone(task.host());
        let progress = task.progress();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| task.run(ctx))).unwrap_or_else(|payload| {
            let message = panic_message(payload.as_ref());
            log::error!("task for {host} panicked: {message}");
            let err = Error::TaskPanicked {
                host: host.name.clone(),
                message,
            };
            let outcome = progress.outcome(&host, OutcomeState::Failed, Some(err.to_string()));
            ctx.observer.on_task_complete(&outcome);
            outcome
        });

        if outcomes.send(outcome).is_err() {
            // Collector is gone; keep draining so senders never block forever.
            log::debug!("outcome receiver dropped");
        }
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BuildBackend;
    use crate::cancel::CancelToken;
    use crate::observer::NoProgress;
    use crate::types::{BuildStatus, Host, OutcomeState, PollConfig};
    use std::sync::Condvar;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    /// Tracks how many builds run at once. Hosts named "boom" panic in
    /// `start_build`, "late-boom" panics while polling.
    #[derive(Default)]
    struct Instrumented {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    impl BuildBackend for Instrumented {
        fn name(&self) -> &'static str {
            "instrumented"
        }

        fn start_build(&self, host: &Host) -> crate::Result<()> {
            if host.name == "boom" {
                panic!("backend exploded");
            }
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(15));
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        }

        fn poll_status(&self, host: &Host) -> crate::Result<BuildStatus> {
            if host.name == "late-boom" {
                panic!("status parser exploded");
            }
            Ok(BuildStatus::Success)
        }
    }

    fn context(backend: Arc<dyn BuildBackend>) -> Arc<TaskContext> {
        Arc::new(TaskContext {
            backend,
            poll: PollConfig::new(Duration::from_millis(1), 3),
            drain: CancelToken::new(),
            abort: CancelToken::new(),
            observer: Arc::new(NoProgress),
        })
    }

    fn run_all(workers: usize, names: &[&str], backend: Arc<Instrumented>) -> Vec<TaskOutcome> {
        let (tx, rx) = mpsc::channel();
        let pool = WorkerPool::start(workers, workers, context(backend), tx).unwrap();
        for name in names {
            pool.submit(ProvisionTask::new(Arc::new(Host::new(*name))))
                .unwrap();
        }
        pool.stop();
        rx.iter().collect()
    }

    #[test]
    fn test_concurrency_never_exceeds_worker_count() {
        let backend = Arc::new(Instrumented::default());
        let names: Vec<String> = (0..12).map(|i| format!("host{i:02}")).collect();
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();

        let outcomes = run_all(3, &refs, Arc::clone(&backend));

        assert_eq!(outcomes.len(), 12);
        assert!(backend.peak.load(Ordering::SeqCst) <= 3);
        assert!(backend.peak.load(Ordering::SeqCst) >= 1);
    }

    #[test]
    fn test_panicking_task_fails_alone() {
        let backend = Arc::new(Instrumented::default());

        let outcomes = run_all(2, &["a", "boom", "b", "c"], backend);

        assert_eq!(outcomes.len(), 4);
        let boom = outcomes.iter().find(|o| o.host == "boom").unwrap();
        assert_eq!(boom.state, OutcomeState::Failed);
        assert!(boom.error.as_ref().unwrap().contains("backend exploded"));
        let succeeded = outcomes
            .iter()
            .filter(|o| o.state == OutcomeState::Succeeded)
            .count();
        assert_eq!(succeeded, 3);
    }

    #[test]
    fn test_zero_workers_rejected() {
        let (tx, _rx) = mpsc::channel();
        let backend = Arc::new(Instrumented::default());
        assert!(WorkerPool::start(0, 1, context(backend), tx).is_err());
    }

    #[test]
    fn test_stop_finishes_queued_tasks() {
        let backend = Arc::new(Instrumented::default());

        let outcomes = run_all(1, &["a", "b", "c"], backend);

        assert_eq!(outcomes.len(), 3);
        assert!(outcomes.iter().all(TaskOutcome::is_success));
    }

    #[test]
    fn test_panic_while_polling_keeps_progress() {
        let backend = Arc::new(Instrumented::default());

        let outcomes = run_all(1, &["late-boom"], backend);

        let outcome = &outcomes[0];
        assert_eq!(outcome.state, OutcomeState::Failed);
        assert!(outcome.error.as_ref().unwrap().contains("status parser exploded"));
        assert!(outcome.started_at.is_some());
        assert_eq!(outcome.poll_attempts, 1);
        assert!(outcome.elapsed >= Duration::from_millis(15));
    }

    /// Builds block until the test opens the gate.
    struct Gated {
        open: Mutex<bool>,
        cvar: Condvar,
    }

    impl BuildBackend for Gated {
        fn name(&self) -> &'static str {
            "gated"
        }

        fn start_build(&self, _host: &Host) -> crate::Result<()> {
            let mut open = self.open.lock().unwrap();
            while !*open {
                open = self.cvar.wait(open).unwrap();
            }
            Ok(())
        }

        fn poll_status(&self, _host: &Host) -> crate::Result<BuildStatus> {
            Ok(BuildStatus::Success)
        }
    }

    #[test]
    fn test_submit_blocks_while_queue_is_full() {
        let gate = Arc::new(Gated {
            open: Mutex::new(false),
            cvar: Condvar::new(),
        });
        let (tx, rx) = mpsc::channel();
        let pool = WorkerPool::start(1, 1, context(gate.clone()), tx).unwrap();

        // One task occupies the worker, one fills the single queue slot.
        pool.submit(ProvisionTask::new(Arc::new(Host::new("a")))).unwrap();
        thread::sleep(Duration::from_millis(50));
        pool.submit(ProvisionTask::new(Arc::new(Host::new("b")))).unwrap();

        let submitted = Arc::new(AtomicBool::new(false));
        let pool = Arc::new(pool);
        let submitter = {
            let pool = Arc::clone(&pool);
            let submitted = Arc::clone(&submitted);
            thread::spawn(move || {
                pool.submit(ProvisionTask::new(Arc::new(Host::new("c")))).unwrap();
                submitted.store(true, Ordering::SeqCst);
            })
        };

        thread::sleep(Duration::from_millis(100));
        assert!(!submitted.load(Ordering::SeqCst), "submit returned with a full queue");

        *gate.open.lock().unwrap() = true;
        gate.cvar.notify_all();
        submitter.join().unwrap();
        assert!(submitted.load(Ordering::SeqCst));

        let Ok(pool) = Arc::try_unwrap(pool) else {
            panic!("pool still shared");
        };
        pool.stop();
        assert_eq!(rx.iter().count(), 3);
    }
}
