//! Backend traits for building and configuring hosts.
//!
//! The traits abstract the external systems, allowing us to:
//! - Build virtual machines through Foreman's `hammer` CLI
//! - Keep physical provisioning as an explicit stub until it exists
//! - Configure built hosts through Chef's `knife`
//! - Swap in fakes for testing

use crate::error::{Error, Result};
use crate::types::{BuildStatus, Host};
use std::process::{Command, Output};

pub mod chef;
pub mod hammer;
pub mod physical;

pub use chef::{ChefApplier, ChefSettings};
pub use hammer::{ForemanCredentials, HammerBackend, VirtualBuildSettings};
pub use physical::PhysicalBackend;

/// Capability interface for starting builds and reading their status.
///
/// Implementations are shared across worker threads and must not hold
/// per-host mutable state.
pub trait BuildBackend: Send + Sync {
    /// Short backend name for logs and summaries.
    fn name(&self) -> &'static str;

    /// Ask the backend to start building `host`.
    ///
    /// Returns once the build request is accepted; the build itself runs
    /// asynchronously on the backend.
    fn start_build(&self, host: &Host) -> Result<()>;

    /// Query the current build status of `host`.
    fn poll_status(&self, host: &Host) -> Result<BuildStatus>;
}

/// Capability interface for configuration-management runs.
pub trait ConfigApplier: Send + Sync {
    /// Apply `run_list` to a built host.
    fn apply_config(&self, host: &Host, run_list: &[String]) -> Result<()>;
}

/// Locate an executable on PATH.
pub(crate) fn find_tool(tool: &str) -> Result<String> {
    which::which(tool)
        .map(|p| p.to_string_lossy().into_owned())
        .map_err(|_| Error::ToolNotFound {
            tool: tool.to_string(),
        })
}

/// Run a command and capture its output.
pub(crate) fn run_tool(program: &str, args: &[String]) -> Result<Output> {
    log::trace!("running {} {}", program, redact_args(args).join(" "));

    Command::new(program)
        .args(args)
        .output()
        .map_err(|e| Error::CommandFailed {
            message: format!("failed to execute {program}"),
            stderr: e.to_string(),
        })
}

/// Run a command and return stdout, or an error carrying stderr.
pub(crate) fn run_tool_checked(program: &str, args: &[String], what: &str) -> Result<String> {
    let output = run_tool(program, args)?;

    if !output.status.success() {
        return Err(Error::CommandFailed {
            message: what.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

/// Hide values following password-like flags before logging.
fn redact_args(args: &[String]) -> Vec<String> {
    let mut redacted = Vec::with_capacity(args.len());
    let mut hide_next = false;

    for arg in args {
        if hide_next {
            redacted.push("********".to_string());
            hide_next = false;
            continue;
        }
        hide_next = matches!(arg.as_str(), "-p" | "--password");
        redacted.push(arg.clone());
    }

    redacted
}
