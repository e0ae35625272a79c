//! Bookkeeping labels and the generations of one app+branch.
//!
//! Release state lives in deployment labels on the cluster. Every read and
//! write of those labels goes through [`Generations`] so that marking a
//! deployment live or as rollback target always keeps the two labels
//! mutually exclusive.

use crate::release::Release;
use crate::ui;
use anyhow::{Result, bail};
use kubekit::{Client, Deployment, LabelSelector, sort_newest_first};

pub const APP_LABEL: &str = "app";
pub const LIVE_LABEL: &str = "kubedeploy-is-live";
pub const ROLLBACK_TARGET_LABEL: &str = "kubedeploy-rollback-target";
/// Pod-template label forcing pods to be recreated on redeploy
pub const RELEASE_TIME_LABEL: &str = "kubedeploy-releasetime";
pub const ROLLING_RESTART_LABEL: &str = "kubedeploy-last-rolling-restart";

/// Where a deployment sits in the live/rollback bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseState {
    Live,
    RollbackTarget,
    /// Neither label; pending or superseded
    Unmarked,
}

impl ReleaseState {
    fn label(self) -> Option<&'static str> {
        match self {
            Self::Live => Some(LIVE_LABEL),
            Self::RollbackTarget => Some(ROLLBACK_TARGET_LABEL),
            Self::Unmarked => None,
        }
    }

    pub fn of(deployment: &Deployment) -> Self {
        if deployment.label(LIVE_LABEL) == Some("true") {
            Self::Live
        } else if deployment.label(ROLLBACK_TARGET_LABEL) == Some("true") {
            Self::RollbackTarget
        } else {
            Self::Unmarked
        }
    }

    /// Set this state's label and clear the other one.
    pub fn apply(self, deployment: &mut Deployment) {
        deployment.remove_label(LIVE_LABEL);
        deployment.remove_label(ROLLBACK_TARGET_LABEL);
        if let Some(label) = self.label() {
            deployment.set_label(label, "true");
        }
    }
}

impl std::fmt::Display for ReleaseState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Live => "live",
            Self::RollbackTarget => "rollback-target",
            Self::Unmarked => "-",
        })
    }
}

pub fn stamp_release_time(deployment: &mut Deployment, unix_seconds: i64) {
    deployment.set_template_label(RELEASE_TIME_LABEL, &unix_seconds.to_string());
}

pub fn stamp_rolling_restart(deployment: &mut Deployment, unix_seconds: i64) {
    deployment.set_template_label(ROLLING_RESTART_LABEL, &unix_seconds.to_string());
}

/// Every generation of one app+branch on the cluster.
pub struct Generations<'a> {
    cluster: &'a Client,
    app: String,
}

impl<'a> Generations<'a> {
    pub fn new(cluster: &'a Client, release: &Release) -> Self {
        Self {
            cluster,
            app: release.app_label(),
        }
    }

    fn selector(&self) -> LabelSelector {
        LabelSelector::new().with(APP_LABEL, &self.app)
    }

    /// All generations, newest first.
    pub fn all(&self) -> Result<Vec<Deployment>> {
        let mut deployments = self.cluster.list_deployments(&self.selector())?;
        sort_newest_first(&mut deployments);
        Ok(deployments)
    }

    /// Generations carrying a state label, newest first.
    ///
    /// Counts by label presence, so a deployment wrongly carrying both
    /// labels shows up under both states.
    pub fn in_state(&self, state: ReleaseState) -> Result<Vec<Deployment>> {
        let mut selector = self.selector();
        if let Some(label) = state.label() {
            selector = selector.with(label, "true");
        }
        let mut deployments = self.cluster.list_deployments(&selector)?;
        match state.label() {
            Some(label) => deployments.retain(|d| d.label(label) == Some("true")),
            None => deployments.retain(|d| ReleaseState::of(d) == ReleaseState::Unmarked),
        }
        sort_newest_first(&mut deployments);
        Ok(deployments)
    }

    /// The one deployment in `state`; refuses and lists candidates otherwise.
    pub fn single(&self, state: ReleaseState) -> Result<Deployment> {
        let mut found = self.in_state(state)?;
        if found.len() != 1 {
            list_candidates(&format!("'{state}' deployments"), &found);
            bail!(
                "Expected exactly one '{state}' deployment for {}, found {}. You should fix that first.",
                self.app,
                found.len()
            );
        }
        Ok(found.remove(0))
    }

    /// Move a deployment to `state`.
    pub fn mark(&self, name: &str, state: ReleaseState) -> Result<Deployment> {
        Ok(self.cluster.update_deployment(name, |d| state.apply(d))?)
    }

    pub fn scale(&self, name: &str, replicas: i32) -> Result<Deployment> {
        Ok(self
            .cluster
            .update_deployment(name, |d| d.set_replicas(replicas))?)
    }
}

pub fn list_candidates(heading: &str, deployments: &[Deployment]) {
    ui::warn(&format!("{heading}: {}", deployments.len()));
    for d in deployments {
        ui::dim(d.name());
    }
}
