//! Manifest templating through `consul-template`.
//!
//! Each file in the template directory is rendered with the release's
//! `KD_*` variables plus the user's global and branch variables, and
//! written to `.kubedeploy-temp/` under the working directory.

use crate::config::parse_assignment;
use crate::context::Context;
use crate::runner::{CommandRunner, Invocation};
use crate::{paths, ui};
use anyhow::{Context as _, Result, bail};
use kubekit::ObjectKind;
use regex::{Captures, Regex};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Branch-variable headings that apply to a namespace.
pub fn branch_aliases(namespace: &str) -> &'static [&'static str] {
    match namespace {
        "production" => &["production"],
        "staging" => &["master", "staging"],
        "development" => &["else", "dev"],
        "acceptance" => &["acceptance"],
        _ => &[],
    }
}

fn heading_matches(heading: &str, aliases: &[&str]) -> bool {
    heading
        .split(',')
        .map(str::trim)
        .any(|branch| aliases.contains(&branch))
}

/// Environment handed to the templating tool, after `${NAME}` substitution.
pub fn template_env(ctx: &Context) -> Result<BTreeMap<String, String>> {
    let release = &ctx.release;
    let template = &ctx.config.application.kubernetes_template;

    let mut raw = BTreeMap::new();
    raw.insert("KD_RELEASE_NAME".to_string(), release.name.clone());
    raw.insert("KD_APP_NAME".to_string(), release.app_label());
    raw.insert("KD_KUBERNETES_NAMESPACE".to_string(), release.namespace.clone());
    raw.insert("KD_GIT_BRANCH".to_string(), release.branch.clone());
    raw.insert("KD_GIT_SHA".to_string(), release.commit.clone());
    raw.insert("KD_IMAGE_FULL_PATH".to_string(), release.image.clone());
    raw.insert("KD_IMAGE_TAG".to_string(), release.tag.clone());

    for entry in &template.global_variables {
        let (key, value) = parse_assignment(entry)?;
        raw.insert(key, value);
    }

    let aliases = branch_aliases(&release.namespace);
    log::debug!("matching branch variable headings against {aliases:?}");
    for (heading, entries) in &template.branch_variables {
        if !heading_matches(heading, aliases) {
            continue;
        }
        for entry in entries {
            let (key, value) = parse_assignment(entry)?;
            raw.insert(key, value);
        }
    }

    let reference = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}")?;
    let mut env = BTreeMap::new();
    for (key, value) in &raw {
        if let Some(missing) = reference
            .captures_iter(value)
            .map(|c| c[1].to_string())
            .find(|name| !raw.contains_key(name))
        {
            bail!("Failed to do a substitution in template variable {key}: `{missing}` is not defined");
        }
        let expanded = reference.replace_all(value, |c: &Captures| raw[&c[1]].clone());
        env.insert(key.clone(), expanded.into_owned());
    }
    Ok(env)
}

/// `consul-template` invocation for one template file.
pub fn consul_template_invocation(
    template: &Path,
    env: &BTreeMap<String, String>,
    namespace: &str,
    vault_addr: Option<&str>,
) -> Invocation {
    let mut vars: Vec<(String, String)> =
        env.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
    let mut args = String::new();
    if let Some(addr) = vault_addr {
        args.push_str(&format!(
            "--vault-renew-token=false --vault-retry=false --vault-addr {addr} "
        ));
        vars.push(("SECRETS_LOCATION".to_string(), namespace.to_string()));
    }
    args.push_str(&format!("-template {} -once -dry", template.display()));
    Invocation::new("consul-template", args).with_env(vars)
}

fn template_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let entries = fs::read_dir(dir)
        .with_context(|| format!("Unable to list kubernetes files in {}", dir.display()))?;
    for entry in entries {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            files.push(entry.path());
        }
    }
    files.sort();
    Ok(files)
}

/// Render every template; returns the rendered file paths in order.
pub fn render(ctx: &Context, runner: &dyn CommandRunner) -> Result<Vec<PathBuf>> {
    let env = template_env(ctx)?;
    if ctx.flags.debug {
        for (key, value) in &env {
            ui::dim(&format!("{key}={value}"));
        }
    }

    let out_dir = ctx.rendered_dir();
    fs::create_dir_all(&out_dir)
        .with_context(|| format!("Failed to create {}", out_dir.display()))?;

    let vault = paths::vault_addr();
    let mut rendered = Vec::new();
    for source in template_files(&ctx.template_source_dir())? {
        let Some(file_name) = source.file_name() else {
            continue;
        };
        ui::info(&format!(
            "Generating YAML from template for {}",
            file_name.to_string_lossy()
        ));

        let invocation =
            consul_template_invocation(&source, &env, &ctx.release.namespace, vault.as_deref());
        let result = runner.run(&invocation)?;
        if !result.success() {
            bail!(
                "consul-template failed on {} (exit status {})",
                source.display(),
                result.exit_code
            );
        }

        // The first line is the dry-run header.
        let body = result.lines.iter().skip(1).cloned().collect::<Vec<_>>().join("\n");
        let target = out_dir.join(file_name);
        fs::write(&target, body)
            .with_context(|| format!("Failed to write {}", target.display()))?;
        rendered.push(target);
    }
    Ok(rendered)
}

/// Remove the rendered directory unless asked to keep it.
pub fn remove_rendered(ctx: &Context) -> Result<()> {
    if ctx.flags.keep_template_files {
        ui::info("Leaving the templated files, like you asked.");
        return Ok(());
    }
    let dir = ctx.rendered_dir();
    if dir.exists() {
        fs::remove_dir_all(&dir).with_context(|| format!("Failed to remove {}", dir.display()))?;
    }
    Ok(())
}

#[derive(Deserialize)]
struct ObjectHeader {
    #[serde(default)]
    kind: String,
    #[serde(default)]
    metadata: HeaderMeta,
}

#[derive(Deserialize, Default)]
struct HeaderMeta {
    #[serde(default)]
    name: String,
}

/// Kind and name of every deletable object in rendered manifests.
///
/// Files may hold several YAML documents. Kinds the teardown doesn't
/// handle are skipped with a warning.
pub fn manifest_objects(files: &[PathBuf]) -> Result<Vec<(ObjectKind, String)>> {
    let mut objects = Vec::new();
    for file in files {
        let content = fs::read_to_string(file)
            .with_context(|| format!("Failed to read {}", file.display()))?;
        for document in serde_yaml::Deserializer::from_str(&content) {
            let value = serde_yaml::Value::deserialize(document)
                .with_context(|| format!("Failed to decode {}", file.display()))?;
            if value.is_null() {
                continue;
            }
            let header: ObjectHeader = serde_yaml::from_value(value)
                .with_context(|| format!("Failed to decode {}", file.display()))?;
            match ObjectKind::from_kind(&header.kind) {
                Some(kind) if !header.metadata.name.is_empty() => {
                    objects.push((kind, header.metadata.name));
                }
                _ => ui::warn(&format!(
                    "Skipping {} object in {}",
                    if header.kind.is_empty() { "unnamed" } else { header.kind.as_str() },
                    file.display()
                )),
            }
        }
    }
    Ok(objects)
}
