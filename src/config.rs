//! `deploy.yaml` schema and loading.

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Name of the per-repository config file
pub const CONFIG_FILE: &str = "deploy.yaml";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployConfig {
    #[serde(default)]
    pub docker_repository: DockerRepository,
    pub application: Application,
    /// Overrides the composed image reference
    #[serde(default)]
    pub image_full_path: Option<String>,
    #[serde(default)]
    pub tests: Vec<TestSet>,
    #[serde(default)]
    pub rollout: RolloutSettings,
    #[serde(default)]
    pub build: BuildSettings,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DockerRepository {
    #[serde(default)]
    pub development_repository_name: String,
    #[serde(default)]
    pub production_repository_name: String,
    /// Empty means Docker Hub
    #[serde(default)]
    pub registry_root: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Application {
    /// Take name and version from `package.json`
    #[serde(default, rename = "packageJSON")]
    pub package_json: bool,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default = "default_kubernetes_path")]
    pub path_to_kubernetes_files: String,
    #[serde(default)]
    pub kubernetes_template: KubernetesTemplate,
}

fn default_kubernetes_path() -> String {
    "kubernetes".to_string()
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KubernetesTemplate {
    /// `KEY=VALUE` entries for every branch
    #[serde(default)]
    pub global_variables: Vec<String>,
    /// Comma-separated branch heading => `KEY=VALUE` entries
    #[serde(default)]
    pub branch_variables: BTreeMap<String, Vec<String>>,
}

/// Where a test set's commands execute.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TestMode {
    /// Start the image, run commands on this machine
    OnHost,
    /// Run commands on this machine without starting the image
    HostOnly,
    /// `docker exec` into the started container
    InTestContainer,
    /// Sibling container sharing the started container's network
    InExternalContainer,
    /// Not specified; behaves like `in-external-container`
    #[default]
    #[serde(other)]
    Unspecified,
}

impl TestMode {
    pub fn starts_container(self) -> bool {
        self != TestMode::HostOnly
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestSet {
    pub name: String,
    #[serde(default, rename = "type")]
    pub mode: TestMode,
    /// Extra `docker run` arguments, placed before the image
    #[serde(default)]
    pub docker_args: String,
    /// Command override, placed after the image
    #[serde(default)]
    pub docker_command: String,
    #[serde(default)]
    pub commands: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RolloutSettings {
    pub first_hold_seconds: u64,
    pub second_hold_seconds: u64,
    pub retire_hold_seconds: u64,
    pub rollback_hold_seconds: u64,
    /// Attempts for a conflicting deployment update
    pub conflict_retries: u32,
}

impl Default for RolloutSettings {
    fn default() -> Self {
        Self {
            first_hold_seconds: 60,
            second_hold_seconds: 300,
            retire_hold_seconds: 300,
            rollback_hold_seconds: 60,
            conflict_retries: 5,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BuildSettings {
    /// Image used for `in-external-container` test commands
    pub test_command_image: String,
    /// Pause after starting a test container before its first command
    pub container_warmup_seconds: u64,
}

impl Default for BuildSettings {
    fn default() -> Self {
        Self {
            test_command_image: "curlimages/curl:latest".to_string(),
            container_warmup_seconds: 2,
        }
    }
}

#[derive(Deserialize)]
struct PackageJson {
    name: String,
    version: String,
}

impl DeployConfig {
    /// Load `deploy.yaml`, resolving `packageJSON` against the config's directory.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed reading repo config file: {}", path.display()))?;
        let mut config = Self::parse(&content)
            .with_context(|| format!("Failed parsing YAML repo config file: {}", path.display()))?;

        if config.application.package_json {
            let dir = path.parent().unwrap_or_else(|| Path::new("."));
            let (name, version) = read_package_json(&dir.join("package.json"))?;
            config.application.name = name;
            config.application.version = version;
        }

        config.validate()?;
        log::debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    fn validate(&self) -> Result<()> {
        if self.application.name.trim().is_empty() {
            bail!("application.name is empty");
        }
        if self.application.version.trim().is_empty() {
            bail!("application.version is empty");
        }
        Ok(())
    }
}

fn read_package_json(path: &Path) -> Result<(String, String)> {
    let content = fs::read_to_string(path).with_context(|| {
        format!(
            "Config specifies to read from package.json, but reading {} failed",
            path.display()
        )
    })?;
    let pkg: PackageJson = serde_json::from_str(&content).with_context(|| {
        format!(
            "Config specifies to read from package.json, but parsing {} failed",
            path.display()
        )
    })?;
    Ok((pkg.name, pkg.version))
}

/// Split a `KEY=VALUE` entry. The value may itself contain `=`.
pub fn parse_assignment(entry: &str) -> Result<(String, String)> {
    match entry.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => bail!("template variable `{entry}` is not of the form KEY=VALUE"),
    }
}
