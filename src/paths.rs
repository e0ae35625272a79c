//! Centralized path resolution for kubedeploy
//!
//! # Environment Variables
//!
//! - `KUBEDEPLOY_LOCK_DIR` - Override the rollout lock directory
//!   (default `/kube-deploy/locks`, shared by everyone deploying from this host)
//! - `DOCKER_CONFIG` - Docker client config directory (default `~/.docker`)
//! - `VAULT_ADDR` - Vault server handed to the templating tool, if set

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Environment variable for lock directory override
pub const ENV_LOCK_DIR: &str = "KUBEDEPLOY_LOCK_DIR";

/// Environment variable docker itself uses for its config directory
pub const ENV_DOCKER_CONFIG: &str = "DOCKER_CONFIG";

/// Environment variable naming the Vault server for secret templating
pub const ENV_VAULT_ADDR: &str = "VAULT_ADDR";

/// Default lock root
pub const DEFAULT_LOCK_DIR: &str = "/kube-deploy/locks";

/// Directory (under the working directory) holding rendered manifests
pub const TEMPLATE_DIR_NAME: &str = ".kubedeploy-temp";

/// Get the lock directory path
///
/// Priority:
/// 1. `KUBEDEPLOY_LOCK_DIR` env var
/// 2. `/kube-deploy/locks`
pub fn lock_dir() -> PathBuf {
    if let Ok(dir) = std::env::var(ENV_LOCK_DIR) {
        let path = expand(&dir);
        log::debug!("Using lock dir from {}: {}", ENV_LOCK_DIR, path.display());
        return path;
    }
    PathBuf::from(DEFAULT_LOCK_DIR)
}

/// Get the docker credential file (`config.json`)
///
/// Priority:
/// 1. `DOCKER_CONFIG` env var
/// 2. `~/.docker`
pub fn docker_config_file() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var(ENV_DOCKER_CONFIG) {
        return Ok(expand(&dir).join("config.json"));
    }
    let home = dirs::home_dir()
        .context("Could not determine home directory; please set $HOME")?;
    Ok(home.join(".docker").join("config.json"))
}

/// Vault address, if one is configured
pub fn vault_addr() -> Option<String> {
    std::env::var(ENV_VAULT_ADDR).ok().filter(|v| !v.trim().is_empty())
}

/// Directory rendered manifests are written to
pub fn template_dir(workdir: &Path) -> PathBuf {
    workdir.join(TEMPLATE_DIR_NAME)
}

/// Expand ~ and environment variables in a path string.
pub fn expand(path: &str) -> PathBuf {
    let expanded = shellexpand::full(path).unwrap_or(std::borrow::Cow::Borrowed(path));
    PathBuf::from(expanded.as_ref())
}
