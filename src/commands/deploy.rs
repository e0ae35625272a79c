use crate::build::{Pipeline, PushOutcome};
use crate::context::Context;
use crate::docker;
use crate::lock::LockStore;
use crate::prompt::Prompter;
use crate::rollout::Controller;
use crate::rollout::canary::RolloutOutcome;
use crate::rollout::ops::RollbackOutcome;
use crate::runner::CommandRunner;
use crate::ui;
use anyhow::{Result, bail};
use kubekit::Client;
use std::path::PathBuf;

/// Shared handles for commands that drive the pipeline or the cluster.
pub struct Session<'a> {
    pub ctx: &'a Context,
    pub runner: &'a dyn CommandRunner,
    pub prompter: &'a mut dyn Prompter,
    pub docker_config: PathBuf,
}

impl<'a> Session<'a> {
    fn pipeline(&mut self) -> Pipeline<'_> {
        Pipeline::new(
            self.ctx,
            self.runner,
            &mut *self.prompter,
            self.docker_config.clone(),
        )
    }

    fn controller<'s>(&'s mut self, cluster: &'s Client, locks: &'s LockStore) -> Controller<'s> {
        Controller::new(
            self.ctx,
            self.runner,
            cluster,
            locks,
            &mut *self.prompter,
            self.docker_config.clone(),
        )
    }
}

/// `build`: build, test and push.
pub fn build(session: &mut Session) -> Result<()> {
    if session.pipeline().make_and_push()? == PushOutcome::Declined {
        log::info!("push declined by operator");
    }
    Ok(())
}

/// `test`: build and test, never push.
pub fn test(session: &mut Session) -> Result<()> {
    session.pipeline().make_and_test()?;
    ui::success("Build and tests finished; nothing was pushed.");
    Ok(())
}

/// `testonly`: run the test sets against the image already built here.
pub fn test_only(session: &mut Session) -> Result<()> {
    let image = &session.ctx.release.short_image;
    if !docker::image_exists_local(session.runner, image)? {
        bail!("{image} has not been built on this machine; run 'kubedeploy build' first");
    }
    session.pipeline().run_tests()
}

pub fn start_rollout(session: &mut Session, cluster: &Client, locks: &LockStore) -> Result<()> {
    match session.controller(cluster, locks).start_rollout()? {
        RolloutOutcome::Completed => {}
        RolloutOutcome::BailedOut => ui::warn("Rollout abandoned at a canary point."),
        RolloutOutcome::NotPushed => ui::info("Nothing rolled out; the image was not pushed."),
    }
    Ok(())
}

pub fn rollback(session: &mut Session, cluster: &Client, locks: &LockStore) -> Result<()> {
    if session.controller(cluster, locks).instant_rollback()? == RollbackOutcome::Stopped {
        log::info!("rollback stopped at the hold");
    }
    Ok(())
}

pub fn scale(session: &mut Session, cluster: &Client, locks: &LockStore, replicas: i32) -> Result<()> {
    session.controller(cluster, locks).scale(replicas)
}

pub fn rolling_restart(session: &mut Session, cluster: &Client, locks: &LockStore) -> Result<()> {
    session.controller(cluster, locks).rolling_restart()
}

pub fn active_deployments(session: &mut Session, cluster: &Client, locks: &LockStore) -> Result<()> {
    session.controller(cluster, locks).list_deployments()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeRunner, ScriptedPrompter, fixture_context};
    use kubekit::backend::memory::MemoryBackend;
    use std::sync::Arc;
    use tempfile::TempDir;

    #[test]
    fn test_testonly_requires_local_image() {
        let dir = TempDir::new().unwrap();
        let ctx = fixture_context(dir.path(), "master");
        let runner = FakeRunner::new().respond("docker inspect", 1, "No such image");
        let mut prompter = ScriptedPrompter::new(&[]);
        let mut session = Session {
            ctx: &ctx,
            runner: &runner,
            prompter: &mut prompter,
            docker_config: dir.path().join("docker.json"),
        };

        let err = test_only(&mut session).unwrap_err();
        assert!(err.to_string().contains("has not been built"));
        assert_eq!(runner.calls(), vec!["docker inspect checkout:1.4.2-master-abc1234"]);
    }

    #[test]
    fn test_testonly_with_local_image_and_no_sets() {
        let dir = TempDir::new().unwrap();
        let ctx = fixture_context(dir.path(), "master");
        let runner = FakeRunner::new();
        let mut prompter = ScriptedPrompter::new(&[]);
        let mut session = Session {
            ctx: &ctx,
            runner: &runner,
            prompter: &mut prompter,
            docker_config: dir.path().join("docker.json"),
        };

        test_only(&mut session).unwrap();
        assert_eq!(runner.count("docker run"), 0);
    }

    #[test]
    fn test_rollback_refusal_is_an_error() {
        let dir = TempDir::new().unwrap();
        let ctx = fixture_context(dir.path(), "master");
        let runner = FakeRunner::new();
        let mut prompter = ScriptedPrompter::new(&[]);
        let cluster = Client::with_backend(Box::new(Arc::new(MemoryBackend::new())));
        let locks = LockStore::new(dir.path().join("locks"));
        let mut session = Session {
            ctx: &ctx,
            runner: &runner,
            prompter: &mut prompter,
            docker_config: dir.path().join("docker.json"),
        };

        assert!(rollback(&mut session, &cluster, &locks).is_err());
        assert!(active_deployments(&mut session, &cluster, &locks).is_ok());
    }
}
