//! Canary rollout controller and the operations on live deployments.
//!
//! The controller is single-threaded: one cluster mutation, status wait or
//! operator prompt at a time. State between steps lives on the cluster as
//! deployment labels (see [`labels`]).

pub mod canary;
pub mod labels;
pub mod ops;

use crate::context::Context;
use crate::lock::LockStore;
use crate::prompt::Prompter;
use crate::runner::CommandRunner;
use crate::ui;
use anyhow::{Result, bail};
use chrono::Local;
use kubekit::Client;
use labels::Generations;
use std::path::PathBuf;
use std::time::{Duration, Instant};

/// Operator's answer at a canary point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HoldDecision {
    Continue,
    Bail,
}

pub struct Controller<'a> {
    ctx: &'a Context,
    runner: &'a dyn CommandRunner,
    cluster: &'a Client,
    locks: &'a LockStore,
    prompter: &'a mut dyn Prompter,
    docker_config: PathBuf,
}

impl<'a> Controller<'a> {
    pub fn new(
        ctx: &'a Context,
        runner: &'a dyn CommandRunner,
        cluster: &'a Client,
        locks: &'a LockStore,
        prompter: &'a mut dyn Prompter,
        docker_config: PathBuf,
    ) -> Self {
        Self {
            ctx,
            runner,
            cluster,
            locks,
            prompter,
            docker_config,
        }
    }

    fn generations(&self) -> Generations<'a> {
        Generations::new(self.cluster, &self.ctx.release)
    }

    /// Block until the cluster reports the deployment's rollout settled.
    fn wait_for_rollout(&self, name: &str) -> Result<()> {
        let result = self.runner.stream(
            "kubectl",
            &format!(
                "rollout status --namespace={} deployment/{name}",
                self.ctx.release.namespace
            ),
        )?;
        if !result.success() {
            bail!(
                "Waiting for deployment {name} to settle failed with exit status {}",
                result.exit_code
            );
        }
        Ok(())
    }

    /// Canary point: ask the operator to confirm health.
    ///
    /// Answering yes before `min_seconds` have passed asks once more.
    /// Skipped entirely with `--no-canary` or `--force`.
    fn hold(&mut self, min_seconds: u64, advice: &str) -> Result<HoldDecision> {
        if self.ctx.flags.skip_holds() {
            log::debug!("canary hold skipped");
            return Ok(HoldDecision::Continue);
        }

        ui::info(advice);
        let started = Instant::now();
        let stamp = Local::now().format("%b %e %H:%M:%S");
        if !self
            .prompter
            .confirm(&format!("{stamp}: You are at a canary point. Does everything look healthy?"))?
        {
            return Ok(HoldDecision::Bail);
        }

        if started.elapsed() < Duration::from_secs(min_seconds)
            && !self
                .prompter
                .confirm("Bad behaviour - you're back too quickly. Honestly, are you really sure?")?
        {
            return Ok(HoldDecision::Bail);
        }
        Ok(HoldDecision::Continue)
    }
}
