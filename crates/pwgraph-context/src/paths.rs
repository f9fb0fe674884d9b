//! Config file discovery (spec §6 "Environment variables the core
//! honors": `PIPEWIRE_CONFIG_DIR`, `PIPEWIRE_CONFIG_NAME`,
//! `PIPEWIRE_CONFIG_PREFIX`, `XDG_CONFIG_HOME`): `dirs`-backed,
//! platform-specific directory resolution.

use std::path::PathBuf;

const ENV_CONFIG_DIR: &str = "PWGRAPH_CONFIG_DIR";
const ENV_CONFIG_NAME: &str = "PWGRAPH_CONFIG_NAME";
const ENV_CONFIG_PREFIX: &str = "PWGRAPH_CONFIG_PREFIX";
const APP_NAME: &str = "pwgraph";
const DEFAULT_CONFIG_NAME: &str = "pwgraph.conf";

/// The user's configuration directory, honoring `XDG_CONFIG_HOME` before
/// falling back to the platform default via `dirs`.
#[must_use]
pub fn user_config_dir() -> PathBuf {
    std::env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| dirs::config_dir())
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Candidate config file paths, checked in precedence order: an explicit
/// `PWGRAPH_CONFIG_DIR` override, the user config dir, `/etc`, then
/// `/usr/share`. `name` overrides `PWGRAPH_CONFIG_NAME`, which overrides
/// the built-in default file name.
#[must_use]
pub fn config_search_path(name: Option<&str>) -> Vec<PathBuf> {
    let file_name = name
        .map(str::to_string)
        .or_else(|| std::env::var(ENV_CONFIG_NAME).ok())
        .unwrap_or_else(|| DEFAULT_CONFIG_NAME.to_string());
    let prefix = std::env::var(ENV_CONFIG_PREFIX).unwrap_or_else(|_| APP_NAME.to_string());

    let mut paths = Vec::new();
    if let Ok(dir) = std::env::var(ENV_CONFIG_DIR) {
        paths.push(PathBuf::from(dir).join(&file_name));
    }
    paths.push(user_config_dir().join(&prefix).join(&file_name));
    paths.push(PathBuf::from("/etc").join(&prefix).join(&file_name));
    paths.push(PathBuf::from("/usr/share").join(&prefix).join(&file_name));
    paths
}

/// Find the first existing config file along [`config_search_path`].
#[must_use]
pub fn find_config(name: Option<&str>) -> Option<PathBuf> {
    config_search_path(name).into_iter().find(|p| p.is_file())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_path_includes_explicit_dir_override() {
        // SAFETY: single-threaded test, no other thread reads env vars
        // concurrently with this temporary override.
        unsafe { std::env::set_var(ENV_CONFIG_DIR, "/tmp/pwgraph-test-config") };
        let paths = config_search_path(Some("custom.conf"));
        assert_eq!(paths[0], PathBuf::from("/tmp/pwgraph-test-config/custom.conf"));
        unsafe { std::env::remove_var(ENV_CONFIG_DIR) };
    }

    #[test]
    fn find_config_returns_none_when_nothing_exists() {
        // SAFETY: see above.
        unsafe { std::env::set_var(ENV_CONFIG_DIR, "/tmp/pwgraph-definitely-missing-xyz") };
        assert!(find_config(Some("does-not-exist.conf")).is_none());
        unsafe { std::env::remove_var(ENV_CONFIG_DIR) };
    }
}
