//! The overseer configspec: credentials and run tuning.
//!
//! ```toml
//! [foreman]
//! server = "https://foreman.example.com"
//! username = "admin"
//! password = "changeme"
//!
//! [chef]
//! server = "https://chef.example.com/organizations/ops"
//! client_name = "overseer"
//! client_key = "~/.chef/overseer.pem"
//!
//! [provision]
//! jobs = 8
//! poll_interval_secs = 30
//! ```

use crate::paths;
use anyhow::{Context, Result, bail};
use provision::{ChefSettings, ForemanCredentials};
use serde::Deserialize;
use std::fs;
use std::path::Path;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Configspec {
    pub foreman: ForemanCredentials,

    /// Without a `[chef]` section built hosts are not configured
    #[serde(default)]
    pub chef: Option<ChefSettings>,

    #[serde(default)]
    pub provision: ProvisionTuning,
}

/// Defaults for the provision commands; CLI flags override them.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProvisionTuning {
    pub jobs: Option<usize>,
    pub poll_interval_secs: Option<u64>,
    pub max_attempts: Option<u32>,
    pub shutdown_grace_secs: Option<u64>,
}

impl Configspec {
    /// Load and validate the configspec at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Could not read configspec: {}", path.display()))?;
        let mut spec: Self = toml::from_str(&content)
            .with_context(|| format!("Invalid TOML in configspec: {}", path.display()))?;

        if let Some(chef) = &mut spec.chef {
            chef.client_key = paths::expand(&chef.client_key)
                .to_string_lossy()
                .into_owned();
        }

        spec.validate()
            .with_context(|| format!("Invalid configspec: {}", path.display()))?;
        Ok(spec)
    }

    pub fn validate(&self) -> Result<()> {
        if self.foreman.server.trim().is_empty() {
            bail!("foreman.server must not be empty");
        }
        if self.foreman.username.trim().is_empty() {
            bail!("foreman.username must not be empty");
        }
        if let Some(chef) = &self.chef {
            if chef.server.trim().is_empty() || chef.client_name.trim().is_empty() {
                bail!("chef.server and chef.client_name must not be empty");
            }
        }
        if self.provision.jobs == Some(0) {
            bail!("provision.jobs must be at least 1");
        }
        if self.provision.max_attempts == Some(0) {
            bail!("provision.max_attempts must be at least 1");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_spec(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    const FULL: &str = r#"
[foreman]
server = "https://foreman.example.com"
username = "admin"
password = "secret"

[chef]
server = "https://chef.example.com/organizations/ops"
client_name = "overseer"
client_key = "~/.chef/overseer.pem"

[provision]
jobs = 8
max_attempts = 60
"#;

    #[test]
    fn test_load_full_configspec() {
        let file = write_spec(FULL);

        let spec = Configspec::load(file.path()).unwrap();

        assert_eq!(spec.foreman.username, "admin");
        let chef = spec.chef.unwrap();
        assert_eq!(chef.client_name, "overseer");
        assert!(!chef.client_key.starts_with('~'));
        assert!(chef.client_key.ends_with(".chef/overseer.pem"));
        assert_eq!(spec.provision.jobs, Some(8));
        assert_eq!(spec.provision.max_attempts, Some(60));
        assert_eq!(spec.provision.poll_interval_secs, None);
    }

    #[test]
    fn test_chef_and_tuning_are_optional() {
        let file = write_spec(
            r#"
[foreman]
server = "https://foreman.example.com"
username = "admin"
password = "secret"
"#,
        );

        let spec = Configspec::load(file.path()).unwrap();

        assert!(spec.chef.is_none());
        assert!(spec.provision.jobs.is_none());
    }

    #[test]
    fn test_missing_foreman_section_is_rejected() {
        let file = write_spec("[provision]\njobs = 2\n");

        let err = Configspec::load(file.path()).unwrap_err();
        assert!(format!("{err:#}").contains("Invalid TOML"));
    }

    #[test]
    fn test_zero_jobs_is_rejected() {
        let file = write_spec(&FULL.replace("jobs = 8", "jobs = 0"));

        let err = Configspec::load(file.path()).unwrap_err();
        assert!(format!("{err:#}").contains("provision.jobs"));
    }

    #[test]
    fn test_missing_file_names_the_path() {
        let err = Configspec::load(Path::new("/nonexistent/overseer.conf")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/overseer.conf"));
    }
}
