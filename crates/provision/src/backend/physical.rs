//! Physical provisioning backend.
//!
//! Bare-metal builds are not wired up to any backend yet. Every operation
//! reports [`Error::NotImplemented`] so a physical run fails loudly instead
//! of pretending hosts were built.

use crate::backend::BuildBackend;
use crate::error::{Error, Result};
use crate::types::{BuildStatus, Host};

/// Stub backend for physical hosts.
#[derive(Debug, Default, Clone, Copy)]
pub struct PhysicalBackend;

impl BuildBackend for PhysicalBackend {
    fn name(&self) -> &'static str {
        "physical"
    }

    fn start_build(&self, _host: &Host) -> Result<()> {
        Err(Error::NotImplemented {
            operation: "physical provisioning".to_string(),
        })
    }

    fn poll_status(&self, _host: &Host) -> Result<BuildStatus> {
        Err(Error::NotImplemented {
            operation: "physical build status".to_string(),
        })
    }
}
