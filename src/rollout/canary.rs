use super::labels::{Generations, ReleaseState, stamp_release_time};
use super::{Controller, HoldDecision};
use crate::build::{Pipeline, PushOutcome};
use crate::lock::LockOutcome;
use crate::{docker, template, ui};
use anyhow::{Context as _, Result};
use chrono::Utc;
use kubekit::Deployment;

/// How `start-rollout` ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RolloutOutcome {
    /// New release is live; older generations pruned
    Completed,
    /// Operator declined at a canary point; previous state restored
    BailedOut,
    /// The image had to be built first and the operator declined the push
    NotPushed,
}

/// The generation being replaced, as it was before the rollout started.
struct Previous {
    name: String,
    replicas: i32,
}

impl<'a> Controller<'a> {
    /// Build if needed, then walk the new release through the canary points.
    pub fn start_rollout(&mut self) -> Result<RolloutOutcome> {
        let ctx = self.ctx;
        let release = &ctx.release;

        if !docker::image_exists_remote(self.runner, &release.image)? {
            ui::info(&format!(
                "{} is not in the registry yet, so let's build it first.",
                release.image
            ));
            let mut pipeline =
                Pipeline::new(ctx, self.runner, &mut *self.prompter, self.docker_config.clone());
            if pipeline.make_and_push()? == PushOutcome::Declined {
                return Ok(RolloutOutcome::NotPushed);
            }
        }

        let lock = self.locks.lock_before_rollout(&release.app, ctx.flags.force)?;

        let generations = self.generations();
        let earlier = generations.all()?;
        if earlier.iter().any(|d| d.name() == release.name) {
            ui::info("There is an existing deployment by this name, so it will be updated in place.");
        }
        let previous = earlier
            .iter()
            .find(|d| d.name() != release.name)
            .map(|d| Previous {
                name: d.name().to_string(),
                replicas: d.replicas(),
            });
        let started = Utc::now();

        ui::header(&format!("Rolling out {}", release.name));
        self.apply_manifests()?;

        let desired = self.cluster.require_deployment(&release.name)?.replicas();
        log::info!("{} wants {desired} replica(s)", release.name);

        ui::step(1, 3, "Scaling to first canary point: 1 pod");
        self.cluster.update_deployment(&release.name, |d| {
            stamp_release_time(d, started.timestamp());
            d.set_replicas(1);
        })?;
        self.wait_for_rollout(&release.name)?;
        let first = ctx.config.rollout.first_hold_seconds;
        if self.hold(
            first,
            &format!("Wait at least {first}s to make sure the new pod started okay and is getting some traffic."),
        )? == HoldDecision::Bail
        {
            return self.bail_out(previous.as_ref(), lock);
        }

        if desired > 1 {
            ui::step(2, 3, &format!("Scaling to next canary point: {desired} pod(s)"));
            generations.scale(&release.name, desired)?;
            self.wait_for_rollout(&release.name)?;
            let second = ctx.config.rollout.second_hold_seconds;
            if self.hold(
                second,
                &format!("Now watch the monitors for {second}s and let everything simmer."),
            )? == HoldDecision::Bail
            {
                return self.bail_out(previous.as_ref(), lock);
            }
        }

        if let Some(prev) = &previous {
            ui::step(3, 3, &format!("Scaling down old deployment {}", prev.name));
            generations.scale(&prev.name, 0)?;
            self.wait_for_rollout(&prev.name)?;
            let retire = ctx.config.rollout.retire_hold_seconds;
            if self.hold(
                retire,
                &format!("Watch the monitors again for {retire}s; only the new pods are serving now."),
            )? == HoldDecision::Bail
            {
                return self.bail_out(previous.as_ref(), lock);
            }
        }

        self.finalize(&generations, previous.as_ref(), &earlier)?;
        template::remove_rendered(ctx)?;
        self.locks.release(&release.app, lock)?;
        ui::success(&format!("{} is live", release.name));
        Ok(RolloutOutcome::Completed)
    }

    /// Render and apply every manifest. Any failure aborts after removing
    /// the rendered files.
    fn apply_manifests(&self) -> Result<()> {
        let applied = template::render(self.ctx, self.runner).and_then(|files| {
            for file in &files {
                ui::info(&format!("Applying {}", file.display()));
                self.cluster
                    .apply_manifest(file)
                    .with_context(|| format!("Failed to apply {}", file.display()))?;
            }
            Ok(())
        });
        if applied.is_err() {
            template::remove_rendered(self.ctx)?;
        }
        applied
    }

    /// Hand "live" to the new release and prune everything but the last two
    /// generations.
    fn finalize(
        &self,
        generations: &Generations<'_>,
        previous: Option<&Previous>,
        earlier: &[Deployment],
    ) -> Result<()> {
        let name = &self.ctx.release.name;
        ui::info(&format!("Tagging {name} as live."));
        generations.mark(name, ReleaseState::Live)?;

        match previous {
            Some(prev) => {
                ui::info(&format!(
                    "Tagging {} as rollback target. You can roll back to it in one command with `kubedeploy rollback`.",
                    prev.name
                ));
                generations.mark(&prev.name, ReleaseState::RollbackTarget)?;
            }
            None => ui::info(
                "Since there are no previous deployments, no rollback target will be assigned.",
            ),
        }

        let keep_previous = previous.map(|p| p.name.as_str());
        for old in earlier {
            if old.name() == name || Some(old.name()) == keep_previous {
                continue;
            }
            ui::info(&format!("Cleaning up older deployment: {}", old.name()));
            self.cluster.delete_deployment(old.name())?;
        }
        Ok(())
    }

    /// Restore the previous generation and remove the new one.
    fn bail_out(&self, previous: Option<&Previous>, lock: LockOutcome) -> Result<RolloutOutcome> {
        let name = &self.ctx.release.name;
        ui::warn("Bailing out of the rollout.");

        match previous {
            Some(prev) => {
                ui::info(&format!(
                    "Restoring {} to {} replica(s) and deleting {name}.",
                    prev.name, prev.replicas
                ));
                self.cluster.update_deployment(&prev.name, |d| {
                    d.set_replicas(prev.replicas);
                    ReleaseState::Live.apply(d);
                })?;
                self.cluster.delete_deployment(name)?;
                self.wait_for_rollout(&prev.name)?;
            }
            None => ui::warn(&format!(
                "There is no previous deployment to go back to, so {name} is left as it is. Clean it up or fix forward by hand."
            )),
        }

        template::remove_rendered(self.ctx)?;
        self.locks.release(&self.ctx.release.app, lock)?;
        Ok(RolloutOutcome::BailedOut)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use crate::lock::LockStore;
    use crate::rollout::labels::{APP_LABEL, LIVE_LABEL, RELEASE_TIME_LABEL, ROLLBACK_TARGET_LABEL};
    use crate::testing::{FakeRunner, ScriptedPrompter, fixture_context};
    use chrono::Duration;
    use kubekit::Client;
    use kubekit::backend::memory::MemoryBackend;
    use std::fs;
    use std::sync::Arc;
    use tempfile::TempDir;

    struct Harness {
        dir: TempDir,
        ctx: Context,
        backend: Arc<MemoryBackend>,
        client: Client,
        locks: LockStore,
    }

    fn harness(replicas: i32) -> Harness {
        let dir = TempDir::new().unwrap();
        let ctx = fixture_context(dir.path(), "master");
        let manifest = serde_json::json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": {"name": ctx.release.name, "labels": {"app": "checkout-master"}},
            "spec": {
                "replicas": replicas,
                "template": {"metadata": {"labels": {"app": "checkout-master"}}}
            }
        });
        fs::write(
            ctx.template_source_dir().join("deployment.json"),
            manifest.to_string(),
        )
        .unwrap();

        let backend = Arc::new(MemoryBackend::new());
        let client = Client::with_backend(Box::new(backend.clone()));
        let locks = LockStore::new(dir.path().join("locks"));
        Harness {
            dir,
            ctx,
            backend,
            client,
            locks,
        }
    }

    impl Harness {
        fn seed(&self, name: &str, replicas: i32, state: ReleaseState, hours_ago: i64) {
            let mut d = Deployment::new(name, replicas);
            d.set_label(APP_LABEL, "checkout-master");
            state.apply(&mut d);
            d.metadata.creation_timestamp = Some(Utc::now() - Duration::hours(hours_ago));
            self.backend.insert(d);
        }

        fn rollout(&self, runner: &FakeRunner, answers: &[bool]) -> (RolloutOutcome, ScriptedPrompter) {
            let mut prompter = ScriptedPrompter::new(answers);
            let outcome = Controller::new(
                &self.ctx,
                runner,
                &self.client,
                &self.locks,
                &mut prompter,
                self.dir.path().join("docker.json"),
            )
            .start_rollout()
            .unwrap();
            (outcome, prompter)
        }

        fn in_state(&self, state: ReleaseState) -> Vec<String> {
            self.backend
                .deployment_names()
                .into_iter()
                .filter(|n| ReleaseState::of(&self.backend.deployment(n).unwrap()) == state)
                .collect()
        }
    }

    #[test]
    fn test_full_rollout_keeps_two_generations() {
        let h = harness(4);
        h.seed("checkout-old-2", 3, ReleaseState::Unmarked, 30);
        h.seed("checkout-old-1", 0, ReleaseState::RollbackTarget, 20);
        h.seed("checkout-prev", 3, ReleaseState::Live, 10);
        let runner = FakeRunner::new().rendering_templates();

        let (outcome, prompter) = h.rollout(&runner, &[true, true, true]);
        assert_eq!(outcome, RolloutOutcome::Completed);
        assert_eq!(prompter.asked.len(), 3);

        let new = &h.ctx.release.name;
        assert_eq!(h.in_state(ReleaseState::Live), vec![new.clone()]);
        assert_eq!(h.in_state(ReleaseState::RollbackTarget), vec!["checkout-prev"]);
        let mut names = h.backend.deployment_names();
        names.sort();
        let mut expected = vec!["checkout-prev".to_string(), new.clone()];
        expected.sort();
        assert_eq!(names, expected);

        let stored = h.backend.deployment(new).unwrap();
        assert_eq!(stored.replicas(), 4);
        assert!(stored.template_label(RELEASE_TIME_LABEL).is_some());
        assert_eq!(h.backend.deployment("checkout-prev").unwrap().replicas(), 0);
        assert!(h.locks.read("checkout").unwrap().is_none());
        assert!(!h.ctx.rendered_dir().exists());
    }

    #[test]
    fn test_bail_at_first_hold_restores_previous() {
        let h = harness(4);
        h.seed("checkout-prev", 3, ReleaseState::Live, 10);
        let runner = FakeRunner::new().rendering_templates();

        let (outcome, _) = h.rollout(&runner, &[false]);
        assert_eq!(outcome, RolloutOutcome::BailedOut);

        let prev = h.backend.deployment("checkout-prev").unwrap();
        assert_eq!(prev.replicas(), 3);
        assert_eq!(prev.label(LIVE_LABEL), Some("true"));
        assert!(h.backend.deployment(&h.ctx.release.name).is_none());
        assert!(h.locks.read("checkout").unwrap().is_none());
        assert!(runner
            .calls()
            .contains(&"kubectl rollout status --namespace=staging deployment/checkout-prev".to_string()));
    }

    #[test]
    fn test_bail_after_scale_down_restores_replica_count() {
        let h = harness(2);
        h.seed("checkout-prev", 5, ReleaseState::Live, 10);
        let runner = FakeRunner::new().rendering_templates();

        let (outcome, _) = h.rollout(&runner, &[true, true, false]);
        assert_eq!(outcome, RolloutOutcome::BailedOut);

        let prev = h.backend.deployment("checkout-prev").unwrap();
        assert_eq!(prev.replicas(), 5);
        assert_eq!(ReleaseState::of(&prev), ReleaseState::Live);
        assert_eq!(h.backend.deployment_names(), vec!["checkout-prev"]);
    }

    #[test]
    fn test_first_rollout_scales_one_then_desired() {
        let h = harness(4);
        let runner = FakeRunner::new().rendering_templates();

        let (outcome, prompter) = h.rollout(&runner, &[true, true]);
        assert_eq!(outcome, RolloutOutcome::Completed);
        assert_eq!(prompter.asked.len(), 2);

        let name = &h.ctx.release.name;
        let replaces: Vec<String> = h
            .backend
            .journal()
            .into_iter()
            .filter(|e| e.starts_with("replace"))
            .collect();
        assert_eq!(
            replaces,
            vec![
                format!("replace {name} replicas=1"),
                format!("replace {name} replicas=4"),
                format!("replace {name} replicas=4"),
            ]
        );
        let stored = h.backend.deployment(name).unwrap();
        assert_eq!(stored.label(LIVE_LABEL), Some("true"));
        assert_eq!(stored.label(ROLLBACK_TARGET_LABEL), None);
        assert!(h.in_state(ReleaseState::RollbackTarget).is_empty());
        assert!(!h.locks.root().join("checkout").exists());
    }

    #[test]
    fn test_bail_without_previous_leaves_new_deployment() {
        let h = harness(1);
        let runner = FakeRunner::new().rendering_templates();

        let (outcome, _) = h.rollout(&runner, &[false]);
        assert_eq!(outcome, RolloutOutcome::BailedOut);
        assert!(h.backend.deployment(&h.ctx.release.name).is_some());
        assert!(h.locks.read("checkout").unwrap().is_none());
    }

    #[test]
    fn test_single_replica_skips_second_canary_point() {
        let h = harness(1);
        h.seed("checkout-prev", 2, ReleaseState::Live, 10);
        let runner = FakeRunner::new().rendering_templates();

        let (outcome, prompter) = h.rollout(&runner, &[true, true]);
        assert_eq!(outcome, RolloutOutcome::Completed);
        assert_eq!(prompter.asked.len(), 2);
    }

    #[test]
    fn test_no_canary_never_prompts() {
        let mut h = harness(3);
        h.ctx.flags.no_canary = true;
        h.seed("checkout-prev", 3, ReleaseState::Live, 10);
        let runner = FakeRunner::new().rendering_templates();

        let (outcome, prompter) = h.rollout(&runner, &[]);
        assert_eq!(outcome, RolloutOutcome::Completed);
        assert!(prompter.asked.is_empty());
        assert_eq!(h.in_state(ReleaseState::Live), vec![h.ctx.release.name.clone()]);
    }

    #[test]
    fn test_locked_app_refuses_before_applying() {
        let h = harness(2);
        h.locks.acquire("checkout", "someone else").unwrap();
        let runner = FakeRunner::new().rendering_templates();
        let mut prompter = ScriptedPrompter::new(&[]);

        let result = Controller::new(
            &h.ctx,
            &runner,
            &h.client,
            &h.locks,
            &mut prompter,
            h.dir.path().join("docker.json"),
        )
        .start_rollout();

        assert!(result.is_err());
        assert!(h.backend.journal().is_empty());
        assert_eq!(h.locks.read("checkout").unwrap().unwrap().reason, "someone else");
    }

    #[test]
    fn test_apply_failure_removes_rendered_files_and_keeps_lock() {
        let h = harness(2);
        fs::write(h.ctx.template_source_dir().join("zz-broken.json"), "{not json").unwrap();
        let runner = FakeRunner::new().rendering_templates();
        let mut prompter = ScriptedPrompter::new(&[]);

        let result = Controller::new(
            &h.ctx,
            &runner,
            &h.client,
            &h.locks,
            &mut prompter,
            h.dir.path().join("docker.json"),
        )
        .start_rollout();

        assert!(result.is_err());
        assert!(!h.ctx.rendered_dir().exists());
        assert!(h.locks.read("checkout").unwrap().is_some());
    }

    #[test]
    fn test_missing_image_builds_first_and_declined_push_stops() {
        let h = harness(2);
        fs::write(
            h.dir.path().join("docker.json"),
            r#"{"auths": {"eu.gcr.io": {}}}"#,
        )
        .unwrap();
        let runner = FakeRunner::new()
            .rendering_templates()
            .respond("docker pull", 1, "not found");

        let (outcome, _) = h.rollout(&runner, &[false]);
        assert_eq!(outcome, RolloutOutcome::NotPushed);
        assert_eq!(runner.count("docker build"), 1);
        assert_eq!(runner.count("docker push"), 0);
        assert!(h.locks.read("checkout").unwrap().is_none());
        assert!(h.backend.journal().is_empty());
    }
}
