//! Configuration-management applier using Chef's `knife`.

use crate::backend::{ConfigApplier, find_tool, run_tool_checked};
use crate::error::{Error, Result};
use crate::types::Host;
use serde::{Deserialize, Serialize};

/// Chef server connection settings (from the configspec).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChefSettings {
    /// Chef server URL, including the organization path
    pub server: String,
    /// API client name
    pub client_name: String,
    /// Path to the client's private key
    pub client_key: String,
}

/// Applier that sets each node's run list with `knife node run_list set`.
pub struct ChefApplier {
    knife_path: String,
    settings: ChefSettings,
}

impl ChefApplier {
    /// Create a new ChefApplier.
    ///
    /// Returns an error if `knife` is not installed.
    pub fn new(settings: ChefSettings) -> Result<Self> {
        let knife_path = find_tool("knife")?;
        Ok(Self::with_path(knife_path, settings))
    }

    pub fn with_path(knife_path: impl Into<String>, settings: ChefSettings) -> Self {
        Self {
            knife_path: knife_path.into(),
            settings,
        }
    }

    pub(crate) fn run_list_args(&self, host: &Host, run_list: &[String]) -> Vec<String> {
        vec![
            "node".to_string(),
            "run_list".to_string(),
            "set".to_string(),
            host.name.clone(),
            run_list.join(","),
            "--server-url".to_string(),
            self.settings.server.clone(),
            "--user".to_string(),
            self.settings.client_name.clone(),
            "--key".to_string(),
            self.settings.client_key.clone(),
        ]
    }
}

impl ConfigApplier for ChefApplier {
    fn apply_config(&self, host: &Host, run_list: &[String]) -> Result<()> {
        if run_list.is_empty() {
            return Ok(());
        }

        run_tool_checked(
            &self.knife_path,
            &self.run_list_args(host, run_list),
            "knife node run_list set",
        )
        .map_err(|e| Error::ConfigApply {
            host: host.name.clone(),
            message: e.to_string(),
        })?;

        log::info!("{} run list set to {}", host, run_list.join(","));
        Ok(())
    }
}
