//! Command runner - one provisioning command from host list to report.
//!
//! The runner owns a single event channel. The dispatch thread, the
//! configuration phase and interrupt signals all report through it, so the
//! runner's control thread reacts to whichever comes first: a finished
//! phase, or an interrupt that escalates the shutdown.

use crate::backend::{BuildBackend, ConfigApplier};
use crate::dispatcher::{DispatchHandle, DispatchOptions, Dispatcher};
use crate::error::{Error, Result};
use crate::observer::{NoProgress, ProvisionObserver};
use crate::pool::panic_message;
use crate::shutdown::{DATA_LOSS_WARNING, Escalation, ShutdownCoordinator, ShutdownState};
use crate::types::{ConfigReport, DispatchResult, Host};
use rayon::prelude::*;
use serde::Serialize;
use std::collections::HashSet;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

/// Options for a provisioning run.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub dispatch: DispatchOptions,
    /// After the first interrupt, abort in-flight builds once this elapses.
    /// `None` waits for them indefinitely.
    pub shutdown_grace: Option<Duration>,
    /// Configuration-management run list applied to built hosts
    pub run_list: Vec<String>,
}

enum RunEvent {
    Interrupt,
    Dispatched(Result<DispatchResult>),
    Configured(ConfigReport),
    Crashed(String),
}

/// Delivers interrupts to a running [`CommandRunner`].
///
/// Safe to call from a signal handler thread.
#[derive(Clone)]
pub struct InterruptHandle {
    tx: Sender<RunEvent>,
}

impl InterruptHandle {
    pub fn interrupt(&self) {
        // The runner may already have returned.
        let _ = self.tx.send(RunEvent::Interrupt);
    }
}

/// Final report of a provisioning run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub backend: &'static str,
    /// `None` when the run was abandoned before dispatch finished
    pub dispatch: Option<DispatchResult>,
    /// `None` when the backend has no configuration phase or it never ran
    pub config: Option<ConfigReport>,
    pub shutdown: ShutdownState,
}

impl RunReport {
    pub fn is_aborted(&self) -> bool {
        self.shutdown == ShutdownState::ImmediateAbort
    }

    /// Warning to show when the run was abandoned.
    pub fn data_loss_warning(&self) -> Option<&'static str> {
        self.is_aborted().then_some(DATA_LOSS_WARNING)
    }

    /// Process exit code: 0 only if every host built and configured.
    pub fn exit_code(&self) -> i32 {
        let built = self.dispatch.as_ref().is_some_and(DispatchResult::is_success);
        let configured = self.config.as_ref().is_none_or(ConfigReport::is_success);
        if !self.is_aborted() && built && configured {
            0
        } else {
            1
        }
    }
}

enum Waited {
    Event(RunEvent),
    Abandoned,
}

/// Runs dispatch and configuration phases under interrupt coordination.
pub struct CommandRunner {
    backend: Arc<dyn BuildBackend>,
    applier: Option<Arc<dyn ConfigApplier>>,
    options: RunOptions,
    observer: Arc<dyn ProvisionObserver>,
    events_tx: Sender<RunEvent>,
    events: Receiver<RunEvent>,
}

impl CommandRunner {
    pub fn new(backend: Arc<dyn BuildBackend>, options: RunOptions) -> Self {
        let (events_tx, events) = mpsc::channel();
        Self {
            backend,
            applier: None,
            options,
            observer: Arc::new(NoProgress),
            events_tx,
            events,
        }
    }

    /// Configure built hosts with `applier` after dispatch.
    pub fn with_applier(mut self, applier: Arc<dyn ConfigApplier>) -> Self {
        self.applier = Some(applier);
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn ProvisionObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn interrupt_handle(&self) -> InterruptHandle {
        InterruptHandle {
            tx: self.events_tx.clone(),
        }
    }

    /// Provision `hosts` and configure the ones that built.
    ///
    /// Returns early with an aborted report on a second interrupt. Threads
    /// still running at that point are told to abort and left to finish
    /// on their own.
    pub fn run(self, hosts: Vec<Host>) -> Result<RunReport> {
        validate_hosts(&hosts)?;
        self.options.dispatch.poll.validate()?;

        let mut coordinator = ShutdownCoordinator::new();
        let dispatcher = Dispatcher::new(Arc::clone(&self.backend), self.options.dispatch.clone())
            .with_observer(Arc::clone(&self.observer));
        let handle = dispatcher.handle();

        spawn_phase("provision-dispatch", self.events_tx.clone(), move || {
            RunEvent::Dispatched(dispatcher.dispatch(&hosts))
        })?;

        let dispatched = match self.wait(&mut coordinator, Some(&handle)) {
            Waited::Abandoned => return Ok(self.abandoned(None)),
            Waited::Event(RunEvent::Dispatched(result)) => result?,
            Waited::Event(RunEvent::Crashed(message)) => return Err(Error::Internal(message)),
            Waited::Event(_) => {
                return Err(Error::Internal("unexpected event during dispatch".to_string()));
            }
        };

        let config = match self.configure(&dispatched, &mut coordinator)? {
            Some(Waited::Abandoned) => return Ok(self.abandoned(Some(dispatched))),
            Some(Waited::Event(RunEvent::Configured(report))) => Some(report),
            Some(Waited::Event(RunEvent::Crashed(message))) => {
                log::error!("configuration phase crashed: {message}");
                Some(ConfigReport {
                    failed: dispatched
                        .succeeded
                        .iter()
                        .map(|h| (h.clone(), format!("configuration phase crashed: {message}")))
                        .collect(),
                    ..ConfigReport::default()
                })
            }
            Some(Waited::Event(_)) => {
                return Err(Error::Internal("unexpected event during configuration".to_string()));
            }
            None if self.applier.is_some() => Some(ConfigReport::skipped()),
            None => None,
        };

        coordinator.on_completed();
        self.observer.on_shutdown(coordinator.state());

        Ok(RunReport {
            backend: self.backend.name(),
            dispatch: Some(dispatched),
            config,
            shutdown: coordinator.state(),
        })
    }

    /// Start the configuration phase and wait for it.
    ///
    /// Returns `None` when there is nothing to configure.
    fn configure(
        &self,
        dispatched: &DispatchResult,
        coordinator: &mut ShutdownCoordinator,
    ) -> Result<Option<Waited>> {
        let Some(applier) = &self.applier else {
            return Ok(None);
        };
        if self.options.run_list.is_empty() {
            log::info!("no run list configured; skipping configuration");
            return Ok(None);
        }
        if dispatched.succeeded.is_empty() {
            return Ok(Some(Waited::Event(RunEvent::Configured(ConfigReport::default()))));
        }

        let hosts: Vec<Host> = dispatched.succeeded.iter().map(Host::new).collect();
        let applier = Arc::clone(applier);
        let observer = Arc::clone(&self.observer);
        let run_list = self.options.run_list.clone();
        let jobs = self.options.dispatch.workers.max(1);

        log::info!("configuring {} hosts with run list {}", hosts.len(), run_list.join(","));
        self.observer.on_config_start(hosts.len());

        spawn_phase("provision-config", self.events_tx.clone(), move || {
            RunEvent::Configured(apply_all(
                applier.as_ref(),
                &hosts,
                &run_list,
                jobs,
                observer.as_ref(),
            ))
        })?;

        Ok(Some(self.wait(coordinator, None)))
    }

    /// Block until a phase reports, handling interrupts meanwhile.
    fn wait(&self, coordinator: &mut ShutdownCoordinator, dispatch: Option<&DispatchHandle>) -> Waited {
        let mut grace_deadline: Option<Instant> = None;

        loop {
            let received = match grace_deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        log::warn!("shutdown grace period elapsed; aborting in-flight builds");
                        if let Some(handle) = dispatch {
                            handle.abort();
                        }
                        grace_deadline = None;
                        continue;
                    }
                    match self.events.recv_timeout(deadline - now) {
                        Ok(event) => Some(event),
                        Err(RecvTimeoutError::Timeout) => continue,
                        Err(RecvTimeoutError::Disconnected) => None,
                    }
                }
                None => self.events.recv().ok(),
            };

            // We hold a sender ourselves, so this only happens if that changes.
            let Some(event) = received else {
                return Waited::Event(RunEvent::Crashed("event channel closed".to_string()));
            };

            if !matches!(event, RunEvent::Interrupt) {
                return Waited::Event(event);
            }

            match coordinator.on_interrupt() {
                Escalation::BeginGraceful => {
                    log::info!("Interrupt received. Gracefully shutting down...");
                    if let Some(handle) = dispatch {
                        handle.drain();
                    }
                    // A grace period past the end of time is no grace period.
                    grace_deadline = self
                        .options
                        .shutdown_grace
                        .and_then(|g| Instant::now().checked_add(g));
                    self.observer.on_shutdown(coordinator.state());
                }
                Escalation::AbortImmediately => {
                    log::info!("second interrupt received; abandoning in-flight work");
                    if let Some(handle) = dispatch {
                        handle.abort();
                    }
                    self.observer.on_shutdown(coordinator.state());
                    return Waited::Abandoned;
                }
                Escalation::Ignore => {}
            }
        }
    }

    fn abandoned(&self, dispatch: Option<DispatchResult>) -> RunReport {
        RunReport {
            backend: self.backend.name(),
            dispatch,
            config: None,
            shutdown: ShutdownState::ImmediateAbort,
        }
    }
}

fn validate_hosts(hosts: &[Host]) -> Result<()> {
    if hosts.is_empty() {
        return Err(Error::config("no hosts to provision"));
    }

    let mut seen = HashSet::with_capacity(hosts.len());
    for host in hosts {
        if host.name.trim().is_empty() {
            return Err(Error::config("host names must not be empty"));
        }
        if !seen.insert(host.name.as_str()) {
            return Err(Error::config(format!("host {host} listed more than once")));
        }
    }
    Ok(())
}

/// Run `phase` on a named thread; a panic is reported as a crash event.
fn spawn_phase<F>(name: &str, tx: Sender<RunEvent>, phase: F) -> Result<()>
where
    F: FnOnce() -> RunEvent + Send + 'static,
{
    thread::Builder::new().name(name.to_string()).spawn(move || {
        let event = panic::catch_unwind(AssertUnwindSafe(phase))
            .unwrap_or_else(|payload| RunEvent::Crashed(panic_message(payload.as_ref())));
        // Receiver is gone if the run was abandoned.
        let _ = tx.send(event);
    })?;
    Ok(())
}

/// Apply `run_list` to every host on a pool of `jobs` threads.
fn apply_all(
    applier: &dyn ConfigApplier,
    hosts: &[Host],
    run_list: &[String],
    jobs: usize,
    observer: &dyn ProvisionObserver,
) -> ConfigReport {
    let report = Mutex::new(ConfigReport::default());

    let apply = |host: &Host| {
        let result = applier.apply_config(host, run_list);
        observer.on_config_complete(host, result.as_ref().map(|_| ()));

        let mut report = report.lock().unwrap_or_else(PoisonError::into_inner);
        match result {
            Ok(()) => {
                log::info!("{host}: configured");
                report.configured.push(host.name.clone());
            }
            Err(e) => {
                log::warn!("{host}: configuration failed: {e}");
                report.failed.push((host.name.clone(), e.to_string()));
            }
        }
    };

    match rayon::ThreadPoolBuilder::new().num_threads(jobs).build() {
        Ok(pool) => pool.install(|| hosts.par_iter().for_each(apply)),
        Err(e) => {
            log::warn!("could not create configuration pool ({e}); configuring sequentially");
            hosts.iter().for_each(apply);
        }
    }

    let mut report = report.into_inner().unwrap_or_else(PoisonError::into_inner);
    report.sort();
    report
}
