//! Virtual machine backend using Foreman's `hammer` CLI.

use crate::backend::{BuildBackend, find_tool, run_tool_checked};
use crate::error::{Error, Result};
use crate::types::{BuildStatus, Host};
use serde::{Deserialize, Serialize};

/// Foreman server address and login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForemanCredentials {
    pub server: String,
    pub username: String,
    pub password: String,
}

/// How a class of virtual hosts is built (from the buildspec).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VirtualBuildSettings {
    pub hostgroup: String,
    pub compute_resource: String,
    #[serde(default)]
    pub compute_profile: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub organization: Option<String>,
    /// Appended to short host names that carry no domain
    #[serde(default)]
    pub domain: Option<String>,
}

/// Backend that executes real `hammer` commands.
pub struct HammerBackend {
    /// Path to the hammer executable
    hammer_path: String,
    credentials: ForemanCredentials,
    settings: VirtualBuildSettings,
}

impl HammerBackend {
    /// Create a new HammerBackend.
    ///
    /// Returns an error if `hammer` is not installed.
    pub fn new(credentials: ForemanCredentials, settings: VirtualBuildSettings) -> Result<Self> {
        let hammer_path = find_tool("hammer")?;
        Ok(Self::with_path(hammer_path, credentials, settings))
    }

    /// Create a backend around an explicit executable path.
    pub fn with_path(
        hammer_path: impl Into<String>,
        credentials: ForemanCredentials,
        settings: VirtualBuildSettings,
    ) -> Self {
        Self {
            hammer_path: hammer_path.into(),
            credentials,
            settings,
        }
    }

    fn fqdn(&self, host: &Host) -> String {
        match &self.settings.domain {
            Some(domain) if !host.name.contains('.') => format!("{}.{}", host.name, domain),
            _ => host.name.clone(),
        }
    }

    fn base_args(&self) -> Vec<String> {
        vec![
            "-s".to_string(),
            self.credentials.server.clone(),
            "-u".to_string(),
            self.credentials.username.clone(),
            "-p".to_string(),
            self.credentials.password.clone(),
        ]
    }

    /// Arguments for `hammer host create`.
    pub(crate) fn create_args(&self, host: &Host) -> Vec<String> {
        let fqdn = self.fqdn(host);
        let mut args = self.base_args();
        args.extend(
            [
                "host",
                "create",
                "--name",
                fqdn.as_str(),
                "--hostgroup",
                self.settings.hostgroup.as_str(),
                "--compute-resource",
                self.settings.compute_resource.as_str(),
            ]
            .map(String::from),
        );

        let optional = [
            ("--compute-profile", &self.settings.compute_profile),
            ("--location", &self.settings.location),
            ("--organization", &self.settings.organization),
        ];
        for (flag, value) in optional {
            if let Some(value) = value {
                args.push(flag.to_string());
                args.push(value.clone());
            }
        }

        args.extend(["--build", "true", "--managed", "true"].map(String::from));
        args
    }

    /// Arguments for `hammer host info` with JSON output.
    pub(crate) fn info_args(&self, host: &Host) -> Vec<String> {
        let mut args = self.base_args();
        args.extend(["--output", "json", "host", "info", "--name"].map(String::from));
        args.push(self.fqdn(host));
        args
    }
}

impl BuildBackend for HammerBackend {
    fn name(&self) -> &'static str {
        "foreman"
    }

    fn start_build(&self, host: &Host) -> Result<()> {
        run_tool_checked(
            &self.hammer_path,
            &self.create_args(host),
            &format!("hammer host create failed for {host}"),
        )?;
        log::info!("build requested for {}", host);
        Ok(())
    }

    fn poll_status(&self, host: &Host) -> Result<BuildStatus> {
        let stdout = run_tool_checked(&self.hammer_path, &self.info_args(host), "hammer host info")
            .map_err(|e| Error::Transport {
                message: e.to_string(),
            })?;

        let raw = extract_build_status(&stdout)?;
        parse_build_status(host, &raw)
    }
}

/// Pull the "Build Status" text out of `hammer --output json host info`.
///
/// Foreman nests it under "Status" in recent versions and puts it at the
/// top level in older ones.
pub(crate) fn extract_build_status(json: &str) -> Result<String> {
    let value: serde_json::Value = serde_json::from_str(json)?;

    let status = value
        .get("Status")
        .and_then(|s| s.get("Build Status"))
        .or_else(|| value.get("Build Status"))
        .or_else(|| value.get("Build status"))
        .and_then(|s| s.as_str());

    status.map(str::to_string).ok_or_else(|| Error::Transport {
        message: "host info has no build status field".to_string(),
    })
}

/// Map Foreman's build status text onto [`BuildStatus`].
pub(crate) fn parse_build_status(host: &Host, raw: &str) -> Result<BuildStatus> {
    let lower = raw.trim().to_lowercase();

    if lower.contains("pending") {
        Ok(BuildStatus::Pending)
    } else if lower == "installed" || lower == "built" {
        Ok(BuildStatus::Success)
    } else if lower.contains("error") || lower.contains("expired") || lower.contains("fail") {
        Ok(BuildStatus::Failure)
    } else {
        Err(Error::UnexpectedStatus {
            host: host.name.clone(),
            status: raw.to_string(),
        })
    }
}
