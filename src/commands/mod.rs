//! Subcommand handlers. Each takes the startup [`Context`] and a runner.

pub mod deploy;
pub mod info;
pub mod locks;
pub mod template;

use crate::context::Context;
use anyhow::{Context as _, Result};
use kubekit::{Client, RetryConfig};

/// Cluster gateway for the release's namespace.
pub fn cluster(ctx: &Context) -> Result<Client> {
    let retry = RetryConfig {
        max_attempts: ctx.config.rollout.conflict_retries,
        ..RetryConfig::default()
    };
    let client = Client::new(&ctx.release.namespace)
        .with_context(|| format!("Failed to reach cluster for namespace {}", ctx.release.namespace))?;
    Ok(client.with_retry(retry))
}
