use anyhow::{Context, Result, bail};
use provision::{Host, VirtualBuildSettings};
use regex::Regex;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use walkdir::WalkDir;

// ============================================================================
// Buildspec - how a class of hosts is built
// ============================================================================

/// A named build recipe, e.g. `indy.prod.kafka`.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Buildspec {
    #[serde(rename = "virtual")]
    pub virtual_build: VirtualBuildSettings,

    #[serde(default)]
    pub chef: ChefRunList,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChefRunList {
    /// Roles and recipes, e.g. `role[kafka]`
    #[serde(default)]
    pub run_list: Vec<String>,
}

impl Buildspec {
    /// Find the buildspec called `name` anywhere under `dir`.
    ///
    /// The file stem is the name, so `prod/indy.prod.kafka.toml` is found as
    /// `indy.prod.kafka`.
    pub fn find(dir: &Path, name: &str) -> Result<Self> {
        let path = Self::locate(dir, name)?;
        Self::load(&path)
    }

    fn locate(dir: &Path, name: &str) -> Result<PathBuf> {
        if !dir.is_dir() {
            bail!("Buildspec directory not found: {}", dir.display());
        }

        let mut matches = WalkDir::new(dir)
            .follow_links(true)
            .into_iter()
            .filter_map(std::result::Result::ok)
            .filter(|e| e.file_type().is_file())
            .filter(|e| e.path().extension().is_some_and(|ext| ext == "toml"))
            .filter(|e| e.path().file_stem().is_some_and(|stem| stem == name))
            .map(walkdir::DirEntry::into_path);

        let found = matches
            .next()
            .with_context(|| format!("No buildspec named '{}' in {}", name, dir.display()))?;
        if let Some(other) = matches.next() {
            bail!(
                "Buildspec '{}' is ambiguous: {} and {}",
                name,
                found.display(),
                other.display()
            );
        }

        log::debug!("Using buildspec {}", found.display());
        Ok(found)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Could not read buildspec: {}", path.display()))?;
        let spec: Self = toml::from_str(&content)
            .with_context(|| format!("Invalid TOML in buildspec: {}", path.display()))?;
        spec.validate()
            .with_context(|| format!("Invalid buildspec: {}", path.display()))?;
        Ok(spec)
    }

    pub fn validate(&self) -> Result<()> {
        if self.virtual_build.hostgroup.trim().is_empty() {
            bail!("virtual.hostgroup must not be empty");
        }
        if self.virtual_build.compute_resource.trim().is_empty() {
            bail!("virtual.compute_resource must not be empty");
        }
        if let Some(item) = self.chef.run_list.iter().find(|i| i.trim().is_empty()) {
            bail!("chef.run_list contains an empty entry: {item:?}");
        }
        Ok(())
    }
}

// ============================================================================
// Hostspec - which hosts to build
// ============================================================================

static HOSTNAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?i)[a-z0-9]([a-z0-9-]{0,61}[a-z0-9])?(\.[a-z0-9]([a-z0-9-]{0,61}[a-z0-9])?)*$")
        .expect("Valid regex")
});

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Hostspec {
    pub hosts: Vec<String>,
}

impl Hostspec {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Couldn't find your hostspec: {}", path.display()))?;
        let spec: Self = toml::from_str(&content)
            .with_context(|| format!("Invalid TOML in hostspec: {}", path.display()))?;
        spec.validate()
            .with_context(|| format!("Invalid hostspec: {}", path.display()))?;
        Ok(spec)
    }

    pub fn validate(&self) -> Result<()> {
        validate_hosts(&self.hosts)
    }

    pub fn to_hosts(&self) -> Vec<Host> {
        self.hosts.iter().map(Host::new).collect()
    }
}

/// Check a host list: non-empty, valid RFC 1123 names, no duplicates.
pub fn validate_hosts(hosts: &[String]) -> Result<()> {
    if hosts.is_empty() {
        bail!("no hosts listed");
    }

    let mut seen = HashSet::new();
    for host in hosts {
        if host.len() > 253 || !HOSTNAME.is_match(host) {
            bail!("'{host}' is not a valid hostname");
        }
        if !seen.insert(host.to_ascii_lowercase()) {
            bail!("'{host}' is listed more than once");
        }
    }
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const KAFKA: &str = r#"
[virtual]
hostgroup = "prod/kafka"
compute_resource = "vsphere-indy"
compute_profile = "large"
domain = "indy.example.com"

[chef]
run_list = ["role[base]", "role[kafka]"]
"#;

    #[test]
    fn test_find_buildspec_by_stem_in_subdirectory() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("prod")).unwrap();
        fs::write(dir.path().join("prod").join("indy.prod.kafka.toml"), KAFKA).unwrap();
        fs::write(dir.path().join("indy.prod.web.toml"), KAFKA).unwrap();

        let spec = Buildspec::find(dir.path(), "indy.prod.kafka").unwrap();

        assert_eq!(spec.virtual_build.hostgroup, "prod/kafka");
        assert_eq!(spec.virtual_build.compute_profile.as_deref(), Some("large"));
        assert_eq!(spec.virtual_build.location, None);
        assert_eq!(spec.chef.run_list, vec!["role[base]", "role[kafka]"]);
    }

    #[test]
    fn test_unknown_buildspec_is_an_error() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("indy.prod.web.toml"), KAFKA).unwrap();

        let err = Buildspec::find(dir.path(), "indy.prod.kafka").unwrap_err();
        assert!(err.to_string().contains("No buildspec named 'indy.prod.kafka'"));
    }

    #[test]
    fn test_ambiguous_buildspec_is_an_error() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("a")).unwrap();
        fs::create_dir_all(dir.path().join("b")).unwrap();
        fs::write(dir.path().join("a").join("kafka.toml"), KAFKA).unwrap();
        fs::write(dir.path().join("b").join("kafka.toml"), KAFKA).unwrap();

        let err = Buildspec::find(dir.path(), "kafka").unwrap_err();
        assert!(err.to_string().contains("ambiguous"));
    }

    #[test]
    fn test_buildspec_without_chef_section() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bare.toml");
        fs::write(&path, "[virtual]\nhostgroup = \"base\"\ncompute_resource = \"kvm\"\n").unwrap();

        let spec = Buildspec::load(&path).unwrap();
        assert!(spec.chef.run_list.is_empty());
    }

    #[test]
    fn test_buildspec_requires_hostgroup() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.toml");
        fs::write(&path, "[virtual]\nhostgroup = \"\"\ncompute_resource = \"kvm\"\n").unwrap();

        let err = Buildspec::load(&path).unwrap_err();
        assert!(format!("{err:#}").contains("hostgroup"));
    }

    #[test]
    fn test_load_hostspec() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("hostspec");
        fs::write(&path, "hosts = [\"kafka01\", \"kafka02.indy.example.com\"]\n").unwrap();

        let spec = Hostspec::load(&path).unwrap();
        let hosts = spec.to_hosts();

        assert_eq!(hosts.len(), 2);
        assert_eq!(hosts[1].name, "kafka02.indy.example.com");
    }

    #[test]
    fn test_missing_hostspec_message() {
        let err = Hostspec::load(Path::new("/nonexistent/hostspec")).unwrap_err();
        assert!(err.to_string().contains("Couldn't find your hostspec"));
    }

    #[test]
    fn test_validate_hosts() {
        let ok = |hosts: &[&str]| {
            validate_hosts(&hosts.iter().map(|h| (*h).to_string()).collect::<Vec<_>>())
        };

        assert!(ok(&["web01", "db-2.example.com"]).is_ok());
        assert!(ok(&[]).is_err());
        assert!(ok(&["-leading"]).is_err());
        assert!(ok(&["trailing-"]).is_err());
        assert!(ok(&["under_score"]).is_err());
        assert!(ok(&["two..dots"]).is_err());
        assert!(ok(&["web01", "WEB01"]).is_err());
    }
}
