use super::labels::{ReleaseState, list_candidates, stamp_rolling_restart};
use super::{Controller, HoldDecision};
use crate::ui;
use anyhow::{Result, bail};
use chrono::Utc;

/// How `rollback` ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RollbackOutcome {
    Completed,
    /// Operator stopped at the hold; the former live deployment still runs
    Stopped,
}

impl<'a> Controller<'a> {
    /// Recreate every pod of the live deployment.
    pub fn rolling_restart(&self) -> Result<()> {
        let live = self.generations().single(ReleaseState::Live)?;
        let now = Utc::now().timestamp();
        self.cluster
            .update_deployment(live.name(), |d| stamp_rolling_restart(d, now))?;
        self.wait_for_rollout(live.name())?;
        ui::success("All pods have been recreated.");
        Ok(())
    }

    /// Swap the live deployment with the rollback target.
    pub fn instant_rollback(&mut self) -> Result<RollbackOutcome> {
        let generations = self.generations();
        let mut live = generations.in_state(ReleaseState::Live)?;
        let mut targets = generations.in_state(ReleaseState::RollbackTarget)?;
        if live.len() != 1 || targets.len() != 1 {
            list_candidates("Live deployments", &live);
            list_candidates("Rollback targets", &targets);
            bail!(
                "Need exactly one live and one rollback-target deployment, found {} and {}. You should fix that first.",
                live.len(),
                targets.len()
            );
        }
        let live = live.remove(0);
        let target = targets.remove(0);
        if live.name() == target.name() {
            bail!(
                "Deployment {} is marked both live and rollback target. You should fix that first.",
                live.name()
            );
        }
        let replicas = live.replicas().max(1);

        ui::info(&format!(
            "Rolling back to {}, pod count {replicas}.",
            target.name()
        ));
        self.cluster.update_deployment(target.name(), |d| {
            d.set_replicas(replicas);
            ReleaseState::Live.apply(d);
        })?;
        self.wait_for_rollout(target.name())?;

        let hold = self.ctx.config.rollout.rollback_hold_seconds;
        if self.hold(
            hold,
            &format!("Wait {hold}s to make sure the old pods came up correctly."),
        )? == HoldDecision::Bail
        {
            ui::warn(&format!(
                "Stopping here. Both {} and {} are labeled live; scale one down and fix the labels by hand.",
                target.name(),
                live.name()
            ));
            return Ok(RollbackOutcome::Stopped);
        }

        self.cluster.update_deployment(live.name(), |d| {
            d.set_replicas(0);
            ReleaseState::RollbackTarget.apply(d);
        })?;
        ui::info("Waiting for the newer pods to scale down to 0.");
        self.wait_for_rollout(live.name())?;

        ui::success(&format!(
            "The deployment has been rolled back to: {}.",
            target.name()
        ));
        Ok(RollbackOutcome::Completed)
    }

    /// Set the live deployment's replica count.
    pub fn scale(&self, replicas: i32) -> Result<()> {
        if replicas < 0 {
            bail!("Replica count must not be negative, got {replicas}");
        }
        let live = self.generations().single(ReleaseState::Live)?;
        ui::info(&format!("Scaling {} to {replicas} replica(s).", live.name()));
        self.generations().scale(live.name(), replicas)?;
        self.wait_for_rollout(live.name())?;
        ui::success(&format!("Finished scaling to {replicas} replica(s)."));
        Ok(())
    }

    /// Table of every generation of this app+branch.
    pub fn list_deployments(&self) -> Result<()> {
        let rows: Vec<Vec<String>> = self
            .generations()
            .all()?
            .iter()
            .map(|d| {
                vec![
                    d.name().to_string(),
                    d.replicas().to_string(),
                    d.metadata
                        .creation_timestamp
                        .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
                        .unwrap_or_default(),
                    ReleaseState::of(d).to_string(),
                ]
            })
            .collect();
        ui::table(&["Active Deployments", "Replicas", "Date Created", "State"], &rows);
        Ok(())
    }
}
