//! Path resolution for overseer's spec files
//!
//! # Environment Variables
//!
//! - `OVERSEER_CONFIG` - Override the configspec path (read by the CLI)
//! - `OVERSEER_BUILDSPEC_DIR` - Override the buildspec directory
//!
//! # Defaults
//!
//! - configspec: `~/.overseer/overseer.conf`
//! - buildspecs: `/etc/overseer/buildspecs`

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Environment variable for buildspec directory override
pub const ENV_BUILDSPEC_DIR: &str = "OVERSEER_BUILDSPEC_DIR";

/// System-wide buildspec directory
pub const DEFAULT_BUILDSPEC_DIR: &str = "/etc/overseer/buildspecs";

/// Get the configspec path
///
/// An explicit path wins; otherwise `~/.overseer/overseer.conf`.
pub fn config_file(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        let path = expand(&path.to_string_lossy());
        log::debug!("Using configspec: {}", path.display());
        return Ok(path);
    }

    let home = dirs::home_dir().context("Could not determine home directory")?;
    let path = home.join(".overseer").join("overseer.conf");
    log::debug!("Using default configspec: {}", path.display());
    Ok(path)
}

/// Get the buildspec directory
///
/// Priority:
/// 1. `OVERSEER_BUILDSPEC_DIR` env var
/// 2. `/etc/overseer/buildspecs`
pub fn buildspec_dir() -> PathBuf {
    if let Ok(dir) = std::env::var(ENV_BUILDSPEC_DIR) {
        let path = expand(&dir);
        log::debug!(
            "Using buildspec dir from {}: {}",
            ENV_BUILDSPEC_DIR,
            path.display()
        );
        return path;
    }

    PathBuf::from(DEFAULT_BUILDSPEC_DIR)
}

/// Expand ~ and environment variables in a path string.
pub fn expand(path: &str) -> PathBuf {
    let expanded = shellexpand::full(path).unwrap_or(std::borrow::Cow::Borrowed(path));
    PathBuf::from(expanded.as_ref())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    /// Helper to run a test with temporary env var
    fn with_env_var<F, R>(key: &str, value: &str, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let original = env::var(key).ok();
        // SAFETY: Tests run in isolation and don't read env vars concurrently
        unsafe { env::set_var(key, value) };
        let result = f();
        match original {
            // SAFETY: Tests run in isolation
            Some(v) => unsafe { env::set_var(key, v) },
            None => unsafe { env::remove_var(key) },
        }
        result
    }

    #[test]
    fn test_config_file_default() {
        let home = dirs::home_dir().unwrap();
        assert_eq!(
            config_file(None).unwrap(),
            home.join(".overseer").join("overseer.conf")
        );
    }

    #[test]
    fn test_config_file_explicit_with_tilde() {
        let home = dirs::home_dir().unwrap();
        let result = config_file(Some(Path::new("~/alt/overseer.conf"))).unwrap();
        assert_eq!(result, home.join("alt").join("overseer.conf"));
    }

    #[test]
    fn test_buildspec_dir_env_override() {
        with_env_var(ENV_BUILDSPEC_DIR, "/srv/buildspecs", || {
            assert_eq!(buildspec_dir(), PathBuf::from("/srv/buildspecs"));
        });
    }

    #[test]
    fn test_expand_absolute() {
        assert_eq!(expand("/absolute/path"), PathBuf::from("/absolute/path"));
    }

    #[test]
    fn test_expand_unknown_env_var_unchanged() {
        let result = expand("/path/$NONEXISTENT_OVERSEER_VAR/file");
        assert_eq!(result, PathBuf::from("/path/$NONEXISTENT_OVERSEER_VAR/file"));
    }
}
