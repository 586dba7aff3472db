//! Core types for provisioning.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

// ============================================================================
// Host
// ============================================================================

/// One physical or virtual machine to be provisioned.
///
/// Immutable once handed to the dispatcher; tasks share it behind an `Arc`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Host {
    /// Host identifier (usually the FQDN)
    pub name: String,
}

impl Host {
    /// Create a host from its identifier.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

// ============================================================================
// Build status and task lifecycle
// ============================================================================

/// Build status as reported by the build backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BuildStatus {
    /// Build still running
    Pending,
    /// Build finished and the host is up
    Success,
    /// Build finished unsuccessfully
    Failure,
}

impl BuildStatus {
    /// Whether polling can stop.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// Lifecycle state of a provisioning task.
///
/// `Queued -> Building -> Polling -> {Succeeded | Failed}`, with `Aborted`
/// reachable from any non-terminal state through cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskState {
    Queued,
    Building,
    Polling,
    Succeeded,
    Failed,
    Aborted,
}

impl TaskState {
    /// Whether this state is terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Aborted)
    }

    /// Whether the state machine allows moving from `self` to `next`.
    pub fn can_transition_to(&self, next: TaskState) -> bool {
        use TaskState::{Aborted, Building, Failed, Polling, Queued, Succeeded};

        match (self, next) {
            (Queued, Building) => true,
            (Building, Polling | Failed) => true,
            (Polling, Succeeded | Failed) => true,
            (Queued | Building | Polling, Aborted) => true,
            _ => false,
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Queued => "queued",
            Self::Building => "building",
            Self::Polling => "polling",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Aborted => "aborted",
        };
        f.write_str(s)
    }
}

/// Terminal state recorded in a [`TaskOutcome`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeState {
    Succeeded,
    Failed,
    Aborted,
}

// ============================================================================
// Outcomes
// ============================================================================

/// Immutable record of how one host's task ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskOutcome {
    /// Host identifier
    pub host: String,
    /// How the task ended
    pub state: OutcomeState,
    /// Error detail for failed or aborted tasks
    pub error: Option<String>,
    /// Number of status queries made
    pub poll_attempts: u32,
    /// When a worker picked the task up (None if it never started)
    pub started_at: Option<DateTime<Utc>>,
    /// Wall time spent executing
    #[serde(with = "duration_secs")]
    pub elapsed: Duration,
}

impl TaskOutcome {
    /// Outcome for a host that was never started.
    pub fn aborted(host: &Host, reason: impl Into<String>) -> Self {
        Self {
            host: host.name.clone(),
            state: OutcomeState::Aborted,
            error: Some(reason.into()),
            poll_attempts: 0,
            started_at: None,
            elapsed: Duration::ZERO,
        }
    }

    /// Outcome for a host that failed before producing any task state.
    pub fn failed(host: &Host, error: impl Into<String>) -> Self {
        Self {
            host: host.name.clone(),
            state: OutcomeState::Failed,
            error: Some(error.into()),
            poll_attempts: 0,
            started_at: None,
            elapsed: Duration::ZERO,
        }
    }

    /// Check if the host built successfully.
    pub fn is_success(&self) -> bool {
        self.state == OutcomeState::Succeeded
    }
}

/// Aggregate of every outcome for one dispatch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchResult {
    /// Hosts that built successfully, sorted
    pub succeeded: Vec<String>,
    /// Failed outcomes, sorted by host
    pub failed: Vec<TaskOutcome>,
    /// Aborted outcomes, sorted by host
    pub aborted: Vec<TaskOutcome>,
    /// False when the dispatch was drained or aborted before finishing
    pub complete: bool,
}

impl DispatchResult {
    /// Aggregate outcomes; completion order does not matter.
    pub fn from_outcomes(outcomes: impl IntoIterator<Item = TaskOutcome>, complete: bool) -> Self {
        let mut result = Self {
            complete,
            ..Default::default()
        };

        for outcome in outcomes {
            result.add(outcome);
        }

        result.succeeded.sort();
        result.failed.sort_by(|a, b| a.host.cmp(&b.host));
        result.aborted.sort_by(|a, b| a.host.cmp(&b.host));
        result
    }

    fn add(&mut self, outcome: TaskOutcome) {
        match outcome.state {
            OutcomeState::Succeeded => self.succeeded.push(outcome.host),
            OutcomeState::Failed => self.failed.push(outcome),
            OutcomeState::Aborted => self.aborted.push(outcome),
        }
    }

    /// Total number of hosts accounted for.
    pub fn total(&self) -> usize {
        self.succeeded.len() + self.failed.len() + self.aborted.len()
    }

    /// Check if every host built.
    pub fn is_success(&self) -> bool {
        self.complete && self.failed.is_empty() && self.aborted.is_empty()
    }
}

/// Result of the configuration-management phase.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigReport {
    /// Hosts configured successfully, sorted
    pub configured: Vec<String>,
    /// `(host, error)` pairs for failed runs, sorted by host
    pub failed: Vec<(String, String)>,
    /// Set when no run list was given and the phase did nothing
    pub skipped: bool,
}

impl ConfigReport {
    /// Report for a phase that was not run.
    pub fn skipped() -> Self {
        Self {
            skipped: true,
            ..Default::default()
        }
    }

    /// Check if every configured host succeeded.
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    pub(crate) fn sort(&mut self) {
        self.configured.sort();
        self.failed.sort();
    }
}

// ============================================================================
// Tunables
// ============================================================================

/// Retry policy for build status polling.
///
/// At least one of `max_attempts` or `deadline` must be set so polling
/// always terminates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollConfig {
    /// Time to wait between status queries
    pub interval: Duration,
    /// Maximum number of status queries
    pub max_attempts: Option<u32>,
    /// Maximum wall time spent polling
    pub deadline: Option<Duration>,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            max_attempts: Some(120), // one hour at the default interval
            deadline: None,
        }
    }
}

impl PollConfig {
    /// Create a poll config bounded by attempt count.
    pub fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts: Some(max_attempts),
            deadline: None,
        }
    }

    /// Create a poll config bounded only by wall time.
    pub fn with_deadline(interval: Duration, deadline: Duration) -> Self {
        Self {
            interval,
            max_attempts: None,
            deadline: Some(deadline),
        }
    }

    /// Reject configurations that could poll forever.
    pub fn validate(&self) -> crate::Result<()> {
        match (self.max_attempts, self.deadline) {
            (None, None) => Err(crate::Error::config(
                "polling needs either a maximum attempt count or a deadline",
            )),
            (Some(0), _) => Err(crate::Error::config("max attempts must be at least 1")),
            _ => Ok(()),
        }
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Ok(Duration::from_secs_f64(secs.max(0.0)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(host: &str, state: OutcomeState) -> TaskOutcome {
        TaskOutcome {
            host: host.to_string(),
            state,
            error: None,
            poll_attempts: 1,
            started_at: None,
            elapsed: Duration::ZERO,
        }
    }

    #[test]
    fn test_task_state_transitions() {
        use TaskState::*;

        assert!(Queued.can_transition_to(Building));
        assert!(Building.can_transition_to(Polling));
        assert!(Building.can_transition_to(Failed));
        assert!(Polling.can_transition_to(Succeeded));
        assert!(Polling.can_transition_to(Failed));

        for state in [Queued, Building, Polling] {
            assert!(state.can_transition_to(Aborted));
        }

        assert!(!Queued.can_transition_to(Polling));
        assert!(!Queued.can_transition_to(Succeeded));
        assert!(!Building.can_transition_to(Succeeded));
        for terminal in [Succeeded, Failed, Aborted] {
            assert!(terminal.is_terminal());
            assert!(!terminal.can_transition_to(Aborted));
            assert!(!terminal.can_transition_to(Building));
        }
    }

    #[test]
    fn test_dispatch_result_sorted_regardless_of_completion_order() {
        let outcomes = vec![
            outcome("c", OutcomeState::Failed),
            outcome("b", OutcomeState::Succeeded),
            outcome("e", OutcomeState::Aborted),
            outcome("a", OutcomeState::Succeeded),
            outcome("d", OutcomeState::Failed),
        ];

        let result = DispatchResult::from_outcomes(outcomes, true);

        assert_eq!(result.succeeded, vec!["a", "b"]);
        let failed: Vec<_> = result.failed.iter().map(|o| o.host.as_str()).collect();
        assert_eq!(failed, vec!["c", "d"]);
        assert_eq!(result.aborted.len(), 1);
        assert_eq!(result.total(), 5);
        assert!(!result.is_success());
    }

    #[test]
    fn test_dispatch_result_incomplete_is_not_success() {
        let result = DispatchResult::from_outcomes(vec![outcome("a", OutcomeState::Succeeded)], false);
        assert!(!result.is_success());

        let result = DispatchResult::from_outcomes(vec![outcome("a", OutcomeState::Succeeded)], true);
        assert!(result.is_success());
    }

    #[test]
    fn test_poll_config_validate() {
        assert!(PollConfig::default().validate().is_ok());
        assert!(
            PollConfig::with_deadline(Duration::from_secs(1), Duration::from_secs(10))
                .validate()
                .is_ok()
        );

        let unbounded = PollConfig {
            interval: Duration::from_secs(1),
            max_attempts: None,
            deadline: None,
        };
        assert!(unbounded.validate().is_err());
        assert!(PollConfig::new(Duration::from_secs(1), 0).validate().is_err());
    }

    #[test]
    fn test_outcome_serializes_elapsed_as_seconds() {
        let mut o = outcome("a", OutcomeState::Failed);
        o.elapsed = Duration::from_millis(1500);
        let json = serde_json::to_value(&o).unwrap();
        assert_eq!(json["elapsed"], 1.5);
        assert_eq!(json["state"], "failed");
    }
}
