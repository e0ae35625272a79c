//! Registry helpers: login check, image existence checks, tag listing and
//! the connectivity check.

use crate::release::Release;
use crate::runner::{CommandRunner, Invocation};
use crate::ui;
use anyhow::{Context, Result, bail};
use serde::Deserialize;
use serde_json::Value;
use std::fs;
use std::path::Path;

/// Whether `config.json` holds credentials for the registry.
///
/// Docker Hub is assumed when `registry_root` is empty.
pub fn is_logged_in(config_file: &Path, registry_root: &str) -> Result<bool> {
    let content = fs::read_to_string(config_file).with_context(|| {
        format!(
            "There was a problem reading your docker config file {}, so I don't know if you're logged in",
            config_file.display()
        )
    })?;
    let data: Value = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse {}", config_file.display()))?;

    let remotes = logged_in_remotes(&data);
    log::debug!("docker credentials found for: {remotes:?}");

    let found = if registry_root.is_empty() {
        remotes
            .iter()
            .any(|r| r == "docker" || r.contains("docker.io"))
    } else {
        let with_scheme = format!("https://{registry_root}");
        remotes
            .iter()
            .any(|r| r == registry_root || *r == with_scheme)
    };
    Ok(found)
}

fn logged_in_remotes(data: &Value) -> Vec<String> {
    ["auths", "credHelpers"]
        .iter()
        .filter_map(|key| data.get(key).and_then(Value::as_object))
        .flat_map(|map| map.keys().cloned())
        .collect()
}

/// Quiet check: can the image be pulled from the registry?
pub fn image_exists_remote(runner: &dyn CommandRunner, image: &str) -> Result<bool> {
    Ok(runner.exit_code("docker", &format!("pull {image}"))? == 0)
}

/// Quiet check: is the image present locally?
pub fn image_exists_local(runner: &dyn CommandRunner, image: &str) -> Result<bool> {
    Ok(runner.exit_code("docker", &format!("inspect {image}"))? == 0)
}

/// Fail early when the network is unreachable.
pub fn check_connectivity(runner: &dyn CommandRunner) -> Result<()> {
    let code = runner.exit_code("curl", "-s --connect-timeout 3 https://ifconfig.io")?;
    if code != 0 {
        bail!("Looks like you're not connected to the internet (or maybe it's just too slow)");
    }
    Ok(())
}

/// One entry of `gcloud container images list-tags --format=json`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RegistryTag {
    #[serde(default)]
    pub digest: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub timestamp: TagTimestamp,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TagTimestamp {
    #[serde(default)]
    pub datetime: String,
}

/// List the image's tags. Only Google Container Registry is supported.
pub fn list_tags(runner: &dyn CommandRunner, release: &Release) -> Result<Vec<RegistryTag>> {
    if !release.registry_root.contains("gcr.io") {
        bail!("Sorry, the 'list-tags' feature only works with Google Container Registry");
    }
    let result = runner.run(&Invocation::new(
        "gcloud",
        format!(
            "container images list-tags --format=json {}",
            release.image_repository()
        ),
    ))?;
    if !result.success() {
        bail!("gcloud exited with status {}", result.exit_code);
    }
    parse_tags(&result.output())
}

fn parse_tags(json: &str) -> Result<Vec<RegistryTag>> {
    serde_json::from_str(json).context("Failed to decode the tag list from gcloud")
}

pub fn print_tags(tags: &[RegistryTag]) {
    let rows: Vec<Vec<String>> = tags
        .iter()
        .map(|t| {
            let digest = t.digest.trim_start_matches("sha256:");
            vec![
                t.tags.join(", "),
                t.timestamp.datetime.clone(),
                digest.chars().take(12).collect(),
            ]
        })
        .collect();
    ui::table(&["List of Tags", "Date Tagged", "Digest"], &rows);
}
