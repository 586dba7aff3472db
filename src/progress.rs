//! Progress bar for provisioning runs.

use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use provision::{
    BuildStatus, Error, Host, OutcomeState, ProvisionObserver, ShutdownState, TaskOutcome,
    TaskState,
};
use std::time::Duration;

/// Renders engine events on a single progress bar.
///
/// Used for both phases: the bar is reset when configuration starts.
pub struct ProvisionProgress {
    pb: ProgressBar,
}

impl ProvisionProgress {
    pub fn new() -> Self {
        let pb = ProgressBar::new(0);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=>-"),
        );
        pb.enable_steady_tick(Duration::from_millis(120));
        Self { pb }
    }

    /// A bar that draws nothing, for `--quiet` and `--json`.
    pub fn hidden() -> Self {
        Self {
            pb: ProgressBar::hidden(),
        }
    }

    pub fn finish(&self) {
        self.pb.finish_and_clear();
    }

    fn line(&self, text: String) {
        if !self.pb.is_hidden() {
            self.pb.suspend(|| println!("{text}"));
        }
    }
}

impl ProvisionObserver for ProvisionProgress {
    fn on_dispatch_start(&self, hosts: usize, workers: usize) {
        self.pb.set_length(hosts as u64);
        self.pb.set_message(format!("building with {workers} workers"));
    }

    fn on_task_state(&self, host: &Host, state: TaskState) {
        if matches!(state, TaskState::Building | TaskState::Polling) {
            self.pb.set_message(format!("{host} {state}"));
        }
    }

    fn on_poll(&self, host: &Host, attempt: u32, status: Result<BuildStatus, &Error>) {
        match status {
            Ok(BuildStatus::Pending) => {
                self.pb.set_message(format!("{host} pending (check {attempt})"));
            }
            Err(e) => self.line(format!("  {} {} check {}: {}", "⚠".yellow(), host, attempt, e)),
            Ok(_) => {}
        }
    }

    fn on_task_complete(&self, outcome: &TaskOutcome) {
        self.pb.inc(1);
        let text = match outcome.state {
            OutcomeState::Succeeded => format!("  {} {} built", "✓".green(), outcome.host),
            OutcomeState::Failed => format!(
                "  {} {} ({})",
                "✗".red(),
                outcome.host,
                outcome.error.as_deref().unwrap_or("failed")
            ),
            OutcomeState::Aborted => format!("  {} {} aborted", "○".dimmed(), outcome.host),
        };
        self.line(text);
    }

    fn on_shutdown(&self, state: ShutdownState) {
        if state == ShutdownState::GracefulShutdown {
            self.line(format!(
                "{} Interrupt received. Gracefully shutting down... (interrupt again to exit immediately)",
                "⚠".yellow()
            ));
            self.pb.set_message("waiting for running builds");
        }
    }

    fn on_config_start(&self, hosts: usize) {
        self.pb.set_position(0);
        self.pb.set_length(hosts as u64);
        self.pb.set_message("configuring");
    }

    fn on_config_complete(&self, host: &Host, result: Result<(), &Error>) {
        self.pb.inc(1);
        match result {
            Ok(()) => self.line(format!("  {} {} configured", "✓".green(), host)),
            Err(e) => self.line(format!("  {} {} ({})", "✗".red(), host, e)),
        }
    }
}
