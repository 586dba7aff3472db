//! Build status polling with a fixed retry interval.
//!
//! The poller queries the backend until the build reaches a terminal
//! status, the attempt bound or deadline is exhausted, or the abort token
//! is cancelled. Retryable query errors (transport failures, unreadable
//! status) count as failed attempts and are retried. Any other error ends
//! polling at once, since asking again cannot fix it.

use crate::backend::BuildBackend;
use crate::cancel::CancelToken;
use crate::error::Error;
use crate::observer::ProvisionObserver;
use crate::types::{BuildStatus, Host, PollConfig};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

/// How a polling loop ended.
#[derive(Debug)]
pub enum PollOutcome {
    /// Backend reported a terminal status
    Terminal {
        status: BuildStatus,
        attempts: u32,
    },
    /// Bound exhausted without a terminal status
    TimedOut {
        attempts: u32,
        last_error: Option<Error>,
    },
    /// Query failed with an error that retrying will not fix
    Failed { attempts: u32, error: Error },
    /// Abort token observed between attempts
    Cancelled { attempts: u32 },
}

impl PollOutcome {
    /// Number of status queries made.
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Terminal { attempts, .. }
            | Self::TimedOut { attempts, .. }
            | Self::Failed { attempts, .. }
            | Self::Cancelled { attempts } => *attempts,
        }
    }
}

/// Retry loop around [`BuildBackend::poll_status`] for one host.
pub struct StatusPoller<'a> {
    backend: &'a dyn BuildBackend,
    config: &'a PollConfig,
    abort: &'a CancelToken,
    observer: &'a dyn ProvisionObserver,
    counter: Option<&'a AtomicU32>,
}

impl<'a> StatusPoller<'a> {
    pub fn new(
        backend: &'a dyn BuildBackend,
        config: &'a PollConfig,
        abort: &'a CancelToken,
        observer: &'a dyn ProvisionObserver,
    ) -> Self {
        Self {
            backend,
            config,
            abort,
            observer,
            counter: None,
        }
    }

    /// Mirror the attempt count into `counter` before every query.
    pub fn with_counter(mut self, counter: &'a AtomicU32) -> Self {
        self.counter = Some(counter);
        self
    }

    /// Poll until the build for `host` is terminal.
    ///
    /// Cancellation is checked at the top of every iteration; a query that
    /// is already running always completes first.
    pub fn await_terminal(&self, host: &Host) -> PollOutcome {
        let started = Instant::now();
        let mut attempts: u32 = 0;
        let mut last_error: Option<Error> = None;

        loop {
            if self.abort.is_cancelled() {
                return PollOutcome::Cancelled { attempts };
            }

            attempts += 1;
            if let Some(counter) = self.counter {
                counter.store(attempts, Ordering::Relaxed);
            }
            match self.backend.poll_status(host) {
                Ok(status) => {
                    self.observer.on_poll(host, attempts, Ok(status));
                    if status.is_terminal() {
                        return PollOutcome::Terminal { status, attempts };
                    }
                    log::debug!("{host}: build pending (attempt {attempts})");
                    last_error = None;
                }
                Err(e) if !e.is_retryable() => {
                    self.observer.on_poll(host, attempts, Err(&e));
                    log::warn!("{host}: status query failed permanently: {e}");
                    return PollOutcome::Failed { attempts, error: e };
                }
                Err(e) => {
                    self.observer.on_poll(host, attempts, Err(&e));
                    log::debug!("{host}: status query failed (attempt {attempts}): {e}");
                    last_error = Some(e);
                }
            }

            if self.exhausted(attempts, started) {
                log::warn!("{host}: gave up after {attempts} status checks");
                return PollOutcome::TimedOut {
                    attempts,
                    last_error,
                };
            }

            // Wakes early on abort; the next iteration reports it.
            self.abort.wait_timeout(self.next_wait(started));
        }
    }

    /// The poll interval, cut short so the last sleep ends at the deadline.
    fn next_wait(&self, started: Instant) -> Duration {
        match self.config.deadline {
            Some(deadline) => self
                .config
                .interval
                .min(deadline.saturating_sub(started.elapsed())),
            None => self.config.interval,
        }
    }

    fn exhausted(&self, attempts: u32, started: Instant) -> bool {
        let over_attempts = self.config.max_attempts.is_some_and(|max| attempts >= max);
        let over_deadline = self
            .config
            .deadline
            .is_some_and(|deadline| started.elapsed() >= deadline);
        over_attempts || over_deadline
    }
}
