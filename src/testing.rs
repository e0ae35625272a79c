//! Test doubles shared by the unit tests.

use crate::config::DeployConfig;
use crate::context::{Context, Flags};
use crate::prompt::Prompter;
use crate::release::Release;
use crate::runner::{CommandResult, CommandRunner, Invocation, RunnerError};
use anyhow::{Result, bail};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::fs;
use std::path::Path;

type Handler = Box<dyn Fn(&Invocation) -> CommandResult>;

/// Records every invocation and answers from scripted rules.
///
/// Rules match on a prefix of `program args`; the longest matching prefix
/// wins. Unmatched commands succeed with no output.
pub struct FakeRunner {
    rules: Vec<(String, Handler)>,
    calls: RefCell<Vec<Invocation>>,
}

impl FakeRunner {
    pub fn new() -> Self {
        Self {
            rules: Vec::new(),
            calls: RefCell::new(Vec::new()),
        }
    }

    pub fn respond(self, prefix: &str, exit_code: i32, output: &str) -> Self {
        let lines: Vec<String> = output.lines().map(String::from).collect();
        self.respond_with(prefix, move |_| CommandResult {
            lines: lines.clone(),
            exit_code,
        })
    }

    pub fn respond_with<F>(mut self, prefix: &str, handler: F) -> Self
    where
        F: Fn(&Invocation) -> CommandResult + 'static,
    {
        self.rules.push((prefix.to_string(), Box::new(handler)));
        self
    }

    /// Make `consul-template` echo the template file behind a header line.
    pub fn rendering_templates(self) -> Self {
        self.respond_with("consul-template", |invocation| {
            let argv = invocation.argv();
            let content = argv
                .iter()
                .position(|a| a == "-template")
                .and_then(|i| argv.get(i + 1))
                .and_then(|path| fs::read_to_string(path).ok())
                .unwrap_or_default();
            let mut lines = vec!["# dry run".to_string()];
            lines.extend(content.lines().map(String::from));
            CommandResult { lines, exit_code: 0 }
        })
    }

    pub fn invocations(&self) -> Vec<Invocation> {
        self.calls.borrow().clone()
    }

    /// `program args` of every call, in order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().iter().map(Invocation::display).collect()
    }

    /// Number of calls starting with `prefix`.
    pub fn count(&self, prefix: &str) -> usize {
        self.calls()
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }
}

impl CommandRunner for FakeRunner {
    fn run(&self, invocation: &Invocation) -> Result<CommandResult, RunnerError> {
        self.calls.borrow_mut().push(invocation.clone());
        let display = invocation.display();
        let handler = self
            .rules
            .iter()
            .filter(|(prefix, _)| display.starts_with(prefix.as_str()))
            .max_by_key(|(prefix, _)| prefix.len());
        Ok(match handler {
            Some((_, handler)) => handler(invocation),
            None => CommandResult::default(),
        })
    }
}

/// Answers confirmations from a script and records the questions.
pub struct ScriptedPrompter {
    answers: VecDeque<bool>,
    pub asked: Vec<String>,
}

impl ScriptedPrompter {
    pub fn new(answers: &[bool]) -> Self {
        Self {
            answers: answers.iter().copied().collect(),
            asked: Vec::new(),
        }
    }
}

impl Prompter for ScriptedPrompter {
    fn confirm(&mut self, message: &str) -> Result<bool> {
        self.asked.push(message.to_string());
        match self.answers.pop_front() {
            Some(answer) => Ok(answer),
            None => bail!("unexpected prompt: {message}"),
        }
    }
}

const FIXTURE_CONFIG: &str = r#"
dockerRepository:
  developmentRepositoryName: acme-dev
  productionRepositoryName: acme
  registryRoot: eu.gcr.io
application:
  name: checkout
  version: 1.4.2
  pathToKubernetesFiles: kubernetes
rollout:
  firstHoldSeconds: 0
  secondHoldSeconds: 0
  retireHoldSeconds: 0
  rollbackHoldSeconds: 0
build:
  testCommandImage: curlimages/curl
  containerWarmupSeconds: 0
"#;

/// Context for app `checkout` on `branch`, with zero-length holds and an
/// empty template directory under `workdir`.
pub fn fixture_context(workdir: &Path, branch: &str) -> Context {
    let config = DeployConfig::parse(FIXTURE_CONFIG).unwrap();
    let release = Release::derive(&config, branch, "abc1234").unwrap();
    let ctx = Context {
        flags: Flags::default(),
        config,
        release,
        workdir: workdir.to_path_buf(),
    };
    fs::create_dir_all(ctx.template_source_dir()).unwrap();
    ctx
}
