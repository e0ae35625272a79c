//! Build, test and push pipeline.

use crate::config::{TestMode, TestSet};
use crate::context::Context;
use crate::docker;
use crate::prompt::Prompter;
use crate::runner::{CommandRunner, Invocation};
use crate::ui;
use anyhow::{Result, bail};
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

/// How a push step ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Pushed,
    /// The operator chose not to push
    Declined,
}

pub struct Pipeline<'a> {
    ctx: &'a Context,
    runner: &'a dyn CommandRunner,
    prompter: &'a mut dyn Prompter,
    docker_config: PathBuf,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        ctx: &'a Context,
        runner: &'a dyn CommandRunner,
        prompter: &'a mut dyn Prompter,
        docker_config: PathBuf,
    ) -> Self {
        Self {
            ctx,
            runner,
            prompter,
            docker_config,
        }
    }

    /// Build, test, then push (forced or confirmed).
    pub fn make_and_push(&mut self) -> Result<PushOutcome> {
        self.make_and_test()?;
        self.push()
    }

    /// Preconditions, build and every test set.
    pub fn make_and_test(&mut self) -> Result<()> {
        self.check_login()?;
        self.check_workdir()?;
        self.build()?;
        self.run_tests()
    }

    fn check_login(&self) -> Result<()> {
        let root = &self.ctx.release.registry_root;
        if !docker::is_logged_in(&self.docker_config, root)? {
            bail!(
                "You're not logged into the configured docker remote ({}) for this repo. You won't be able to push!",
                if root.is_empty() { "Docker Hub" } else { root.as_str() }
            );
        }
        Ok(())
    }

    fn check_workdir(&self) -> Result<()> {
        if !self.ctx.release.is_production_cluster() || self.workdir_is_clean()? {
            return Ok(());
        }
        if self.ctx.flags.override_dirty_workdir {
            ui::warn("Respecting your wishes to override the dirty working directory and build anyway.");
            return Ok(());
        }
        bail!(
            "You have uncommitted changes in the working tree. Please commit or stash before deploying to production. \
             If you're really, really sure, override this with '--override-dirty-workdir'."
        )
    }

    /// No modified and no untracked files.
    fn workdir_is_clean(&self) -> Result<bool> {
        let modified = self.runner.exit_code("git", "diff-index --quiet HEAD --")? != 0;
        if modified {
            return Ok(false);
        }
        let untracked = self.runner.output("git", "ls-files --others")?;
        Ok(untracked.is_empty())
    }

    fn build(&self) -> Result<()> {
        let release = &self.ctx.release;
        ui::header("Build");
        ui::info(&format!("Building the image with tag: {}", release.short_image));

        let result = self.runner.stream(
            "docker",
            &format!("build -t {} {}", release.short_image, self.ctx.workdir.display()),
        )?;
        if !result.success() {
            bail!("docker build failed with exit status {}", result.exit_code);
        }
        ui::success("Image built");
        Ok(())
    }

    /// Run every test set in declaration order.
    pub fn run_tests(&self) -> Result<()> {
        let sets = &self.ctx.config.tests;
        for (index, set) in sets.iter().enumerate() {
            ui::step(index + 1, sets.len(), &format!("Test set: {}", set.name));
            self.run_test_set(index, set)?;
        }
        if !sets.is_empty() {
            ui::success("All test sets passed");
        }
        Ok(())
    }

    fn container_name(&self, index: usize) -> String {
        format!("kubedeploy-test-{}-{}", self.ctx.release.name, index)
    }

    fn run_test_set(&self, index: usize, set: &TestSet) -> Result<()> {
        let container = if set.mode.starts_container() {
            let name = self.container_name(index);
            if let Err(e) = self.start_container(&name, set) {
                self.teardown(Some(&name))?;
                return Err(e);
            }
            Some(name)
        } else {
            None
        };

        let outcome = self.run_commands(set, container.as_deref());
        self.teardown(container.as_deref())?;
        outcome
    }

    fn start_container(&self, name: &str, set: &TestSet) -> Result<()> {
        let image = self.ctx.release.short_image.as_str();
        ui::info(&format!("Starting docker image: {image}"));

        let args = [
            "run -d --name",
            name,
            set.docker_args.trim(),
            image,
            set.docker_command.trim(),
        ]
        .iter()
        .filter(|part| !part.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join(" ");

        let result = self.runner.stream("docker", &args)?;
        if !result.success() {
            bail!(
                "Test container for '{}' failed to start (exit status {})",
                set.name,
                result.exit_code
            );
        }

        let warmup = self.ctx.config.build.container_warmup_seconds;
        if warmup > 0 {
            thread::sleep(Duration::from_secs(warmup));
        }
        Ok(())
    }

    fn run_commands(&self, set: &TestSet, container: Option<&str>) -> Result<()> {
        if set.mode == TestMode::Unspecified && !set.commands.is_empty() {
            ui::info("No test type given, so the commands run in an external container on the same network.");
        }
        for command in &set.commands {
            ui::info(&format!("Executing test command: {command}"));
            let invocation = self.command_for(set.mode, container, command)?.streamed();
            let result = self.runner.run(&invocation)?;
            if !result.success() {
                bail!(
                    "Test command `{command}` in set '{}' failed with exit status {}",
                    set.name,
                    result.exit_code
                );
            }
        }
        Ok(())
    }

    fn command_for(
        &self,
        mode: TestMode,
        container: Option<&str>,
        command: &str,
    ) -> Result<Invocation> {
        let command = command.trim();
        if let TestMode::OnHost | TestMode::HostOnly = mode {
            let (program, args) = command.split_once(' ').unwrap_or((command, ""));
            return Ok(Invocation::new(program, args.trim()));
        }

        let Some(container) = container else {
            bail!("Test mode {mode:?} needs a running test container");
        };
        Ok(match mode {
            TestMode::InTestContainer => {
                Invocation::new("docker", format!("exec {container} {command}"))
            }
            _ => Invocation::new(
                "docker",
                format!(
                    "run --rm --network container:{container} {} {command}",
                    self.ctx.config.build.test_command_image
                ),
            ),
        })
    }

    /// Stop the container and remove it unless it should be kept.
    fn teardown(&self, container: Option<&str>) -> Result<()> {
        let Some(container) = container else {
            return Ok(());
        };
        ui::info("Stopping test container.");
        self.runner
            .run(&Invocation::new("docker", format!("stop {container}")).quiet())?;
        if self.ctx.flags.keep_test_container {
            ui::info(&format!("Leaving test container {container}, like you asked."));
        } else {
            ui::info("Removing test container.");
            self.runner
                .run(&Invocation::new("docker", format!("rm {container}")).quiet())?;
        }
        Ok(())
    }

    /// Tag with the full registry path and push.
    pub fn push(&mut self) -> Result<PushOutcome> {
        let release = &self.ctx.release;
        let tagged = self
            .runner
            .run(&Invocation::new("docker", format!("tag {} {}", release.short_image, release.image)))?;
        if !tagged.success() {
            bail!("Tagging {} as {} failed", release.short_image, release.image);
        }

        let forced = self.ctx.flags.force_push_image || self.ctx.flags.force;
        if !forced
            && !self
                .prompter
                .confirm("All the tests passed! Would you like to push this to the remote now?")?
        {
            ui::info("Thanks for building!");
            return Ok(PushOutcome::Declined);
        }

        let result = self.runner.stream("docker", &format!("push {}", release.image))?;
        if !result.success() {
            bail!("Pushing {} failed with exit status {}", release.image, result.exit_code);
        }
        ui::success(&format!("Pushed {}", release.image));
        Ok(PushOutcome::Pushed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TestSet;
    use crate::testing::{FakeRunner, ScriptedPrompter, fixture_context};
    use std::fs;
    use tempfile::TempDir;

    struct Fixture {
        dir: TempDir,
        ctx: Context,
        docker_config: PathBuf,
    }

    fn fixture(branch: &str) -> Fixture {
        let dir = TempDir::new().unwrap();
        let ctx = fixture_context(dir.path(), branch);
        let docker_config = dir.path().join("docker-config.json");
        fs::write(&docker_config, r#"{"auths": {"eu.gcr.io": {}}}"#).unwrap();
        Fixture {
            dir,
            ctx,
            docker_config,
        }
    }

    fn set(name: &str, mode: TestMode, commands: &[&str]) -> TestSet {
        TestSet {
            name: name.to_string(),
            mode,
            commands: commands.iter().map(|c| c.to_string()).collect(),
            ..Default::default()
        }
    }

    fn pipeline<'a>(
        f: &'a Fixture,
        runner: &'a FakeRunner,
        prompter: &'a mut ScriptedPrompter,
    ) -> Pipeline<'a> {
        Pipeline::new(&f.ctx, runner, prompter, f.docker_config.clone())
    }

    #[test]
    fn test_host_only_never_starts_container() {
        let mut f = fixture("feature-x");
        f.ctx.config.tests = vec![set("lint", TestMode::HostOnly, &["make lint", "cargo fmt --check"])];
        let runner = FakeRunner::new();
        let mut prompter = ScriptedPrompter::new(&[]);

        pipeline(&f, &runner, &mut prompter).run_tests().unwrap();

        assert_eq!(runner.count("docker"), 0);
        assert_eq!(runner.calls(), vec!["make lint", "cargo fmt --check"]);
        let first = &runner.invocations()[0];
        assert_eq!(first.program, "make");
        assert!(first.stream);
    }

    #[test]
    fn test_external_mode_starts_once_and_tears_down_once_on_failure() {
        let mut f = fixture("feature-x");
        let mut external = set(
            "smoke",
            TestMode::InExternalContainer,
            &["curl -sf http://localhost/health", "curl -sf http://localhost/ready"],
        );
        external.docker_args = "-e MODE=test".to_string();
        f.ctx.config.tests = vec![external];
        let runner = FakeRunner::new().respond("docker run --rm", 22, "connection refused");
        let mut prompter = ScriptedPrompter::new(&[]);

        let err = pipeline(&f, &runner, &mut prompter).run_tests().unwrap_err();
        assert!(err.to_string().contains("failed with exit status 22"));

        let name = format!("kubedeploy-test-{}-0", f.ctx.release.name);
        assert_eq!(
            runner.calls(),
            vec![
                format!("docker run -d --name {name} -e MODE=test {}", f.ctx.release.short_image),
                format!(
                    "docker run --rm --network container:{name} curlimages/curl curl -sf http://localhost/health"
                ),
                format!("docker stop {name}"),
                format!("docker rm {name}"),
            ]
        );
    }

    #[test]
    fn test_unspecified_mode_runs_external() {
        let mut f = fixture("feature-x");
        f.ctx.config.tests = vec![set("legacy", TestMode::Unspecified, &["true"])];
        let runner = FakeRunner::new();
        let mut prompter = ScriptedPrompter::new(&[]);

        pipeline(&f, &runner, &mut prompter).run_tests().unwrap();
        assert_eq!(runner.count("docker run -d"), 1);
        assert_eq!(runner.count("docker run --rm --network container:"), 1);
        assert_eq!(runner.count("docker stop"), 1);
        assert_eq!(runner.count("docker rm"), 1);
    }

    #[test]
    fn test_in_test_container_uses_exec_and_keeps_container() {
        let mut f = fixture("feature-x");
        f.ctx.flags.keep_test_container = true;
        let mut unit = set("unit", TestMode::InTestContainer, &[r#"sh -c "npm test""#]);
        unit.docker_command = "sleep 600".to_string();
        f.ctx.config.tests = vec![unit];
        let runner = FakeRunner::new();
        let mut prompter = ScriptedPrompter::new(&[]);

        pipeline(&f, &runner, &mut prompter).run_tests().unwrap();

        let name = format!("kubedeploy-test-{}-0", f.ctx.release.name);
        assert_eq!(
            runner.calls()[0],
            format!("docker run -d --name {name} {} sleep 600", f.ctx.release.short_image)
        );
        let exec = &runner.invocations()[1];
        assert_eq!(exec.argv(), vec!["exec", name.as_str(), "sh", "-c", "npm test"]);
        assert_eq!(runner.count("docker stop"), 1);
        assert_eq!(runner.count("docker rm"), 0);
    }

    #[test]
    fn test_on_host_starts_container_but_runs_locally() {
        let mut f = fixture("feature-x");
        f.ctx.config.tests = vec![set("e2e", TestMode::OnHost, &["./e2e.sh --fast"])];
        let runner = FakeRunner::new();
        let mut prompter = ScriptedPrompter::new(&[]);

        pipeline(&f, &runner, &mut prompter).run_tests().unwrap();
        assert_eq!(runner.count("docker run -d"), 1);
        assert_eq!(runner.count("./e2e.sh --fast"), 1);
        assert_eq!(runner.count("docker stop"), 1);
    }

    #[test]
    fn test_start_failure_tears_down_and_skips_commands() {
        let mut f = fixture("feature-x");
        f.ctx.config.tests = vec![
            set("smoke", TestMode::InTestContainer, &["ls"]),
            set("later", TestMode::HostOnly, &["make lint"]),
        ];
        let runner = FakeRunner::new().respond("docker run -d", 125, "no such image");
        let mut prompter = ScriptedPrompter::new(&[]);

        assert!(pipeline(&f, &runner, &mut prompter).run_tests().is_err());
        assert_eq!(runner.count("docker exec"), 0);
        assert_eq!(runner.count("docker stop"), 1);
        assert_eq!(runner.count("docker rm"), 1);
        assert_eq!(runner.count("make"), 0);
    }

    #[test]
    fn test_not_logged_in_fails_before_build() {
        let f = fixture("feature-x");
        fs::write(&f.docker_config, r#"{"auths": {"quay.io": {}}}"#).unwrap();
        let runner = FakeRunner::new();
        let mut prompter = ScriptedPrompter::new(&[]);

        assert!(pipeline(&f, &runner, &mut prompter).make_and_test().is_err());
        assert!(runner.calls().is_empty());
    }

    #[test]
    fn test_dirty_tree_refused_for_production_cluster() {
        let f = fixture("master");
        let runner = FakeRunner::new().respond("git ls-files --others", 0, "scratch.txt");
        let mut prompter = ScriptedPrompter::new(&[]);

        let err = pipeline(&f, &runner, &mut prompter).make_and_test().unwrap_err();
        assert!(err.to_string().contains("--override-dirty-workdir"));
        assert_eq!(runner.count("docker build"), 0);
    }

    #[test]
    fn test_dirty_tree_override_builds() {
        let mut f = fixture("master");
        f.ctx.flags.override_dirty_workdir = true;
        let runner = FakeRunner::new().respond("git diff-index", 1, "");
        let mut prompter = ScriptedPrompter::new(&[]);

        pipeline(&f, &runner, &mut prompter).make_and_test().unwrap();
        assert_eq!(
            runner.calls().last().unwrap(),
            &format!(
                "docker build -t {} {}",
                f.ctx.release.short_image,
                f.dir.path().display()
            )
        );
    }

    #[test]
    fn test_development_branch_skips_clean_check() {
        let f = fixture("feature-x");
        let runner = FakeRunner::new();
        let mut prompter = ScriptedPrompter::new(&[]);

        pipeline(&f, &runner, &mut prompter).make_and_test().unwrap();
        assert_eq!(runner.count("git"), 0);
    }

    #[test]
    fn test_build_failure_is_fatal() {
        let mut f = fixture("feature-x");
        f.ctx.config.tests = vec![set("lint", TestMode::HostOnly, &["make lint"])];
        let runner = FakeRunner::new().respond("docker build", 1, "syntax error");
        let mut prompter = ScriptedPrompter::new(&[]);

        assert!(pipeline(&f, &runner, &mut prompter).make_and_test().is_err());
        assert_eq!(runner.count("make"), 0);
    }

    #[test]
    fn test_declined_push_tags_but_does_not_push() {
        let f = fixture("feature-x");
        let runner = FakeRunner::new();
        let mut prompter = ScriptedPrompter::new(&[false]);

        let outcome = pipeline(&f, &runner, &mut prompter).push().unwrap();
        assert_eq!(outcome, PushOutcome::Declined);
        assert_eq!(runner.count("docker tag"), 1);
        assert_eq!(runner.count("docker push"), 0);
        assert_eq!(prompter.asked.len(), 1);
    }

    #[test]
    fn test_forced_push_skips_prompt() {
        let mut f = fixture("feature-x");
        f.ctx.flags.force_push_image = true;
        let runner = FakeRunner::new();
        let mut prompter = ScriptedPrompter::new(&[]);

        let outcome = pipeline(&f, &runner, &mut prompter).make_and_push().unwrap();
        assert_eq!(outcome, PushOutcome::Pushed);
        assert_eq!(
            runner.calls()[runner.calls().len() - 2..],
            [
                format!("docker tag {} {}", f.ctx.release.short_image, f.ctx.release.image),
                format!("docker push {}", f.ctx.release.image),
            ]
        );
        assert!(prompter.asked.is_empty());
    }

    #[test]
    fn test_push_failure_is_fatal() {
        let f = fixture("feature-x");
        let runner = FakeRunner::new().respond("docker push", 1, "denied");
        let mut prompter = ScriptedPrompter::new(&[true]);

        assert!(pipeline(&f, &runner, &mut prompter).push().is_err());
    }
}
