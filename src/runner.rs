//! External command execution.
//!
//! Every external tool (git, docker, consul-template, kubectl rollout status)
//! goes through a [`CommandRunner`]. The system implementation drains stdout
//! and stderr on separate threads into one ordered log, optionally echoing
//! each line to the console while the process runs.

use crate::ui;
use std::io::{BufRead, BufReader, Read};
use std::process::{Command, ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::thread;
use thiserror::Error;

/// One external command to run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    /// Argument string; double-quoted groups stay one argument
    pub args: String,
    /// Echo output to the console while the command runs
    pub stream: bool,
    /// Don't report a nonzero exit; the caller inspects the code
    pub quiet: bool,
    /// Extra environment variables for the child
    pub env: Vec<(String, String)>,
}

impl Invocation {
    pub fn new(program: &str, args: impl Into<String>) -> Self {
        Self {
            program: program.to_string(),
            args: args.into(),
            ..Default::default()
        }
    }

    pub fn streamed(mut self) -> Self {
        self.stream = true;
        self
    }

    pub fn quiet(mut self) -> Self {
        self.quiet = true;
        self
    }

    pub fn with_env(mut self, env: Vec<(String, String)>) -> Self {
        self.env = env;
        self
    }

    /// Tokenized arguments.
    pub fn argv(&self) -> Vec<String> {
        split_args(&self.args)
    }

    /// `program args` for messages.
    pub fn display(&self) -> String {
        if self.args.is_empty() {
            self.program.clone()
        } else {
            format!("{} {}", self.program, self.args)
        }
    }
}

/// Combined output and exit status of a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandResult {
    /// stdout and stderr lines, interleaved in arrival order
    pub lines: Vec<String>,
    pub exit_code: i32,
}

impl CommandResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Combined output joined with newlines.
    pub fn output(&self) -> String {
        self.lines.join("\n")
    }
}

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("could not start `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("lost output of `{command}`: {message}")]
    Output { command: String, message: String },
}

/// Runs external commands.
///
/// A nonzero exit code is not an error: it comes back in the
/// [`CommandResult`] and the caller decides. Only a command that cannot be
/// started at all is an error.
pub trait CommandRunner {
    fn run(&self, invocation: &Invocation) -> Result<CommandResult, RunnerError>;

    /// Run without streaming; returns trimmed combined output.
    fn output(&self, program: &str, args: &str) -> Result<String, RunnerError> {
        Ok(self
            .run(&Invocation::new(program, args))?
            .output()
            .trim()
            .to_string())
    }

    /// Run quietly and return only the exit code.
    fn exit_code(&self, program: &str, args: &str) -> Result<i32, RunnerError> {
        Ok(self.run(&Invocation::new(program, args).quiet())?.exit_code)
    }

    /// Run while echoing output to the console.
    fn stream(&self, program: &str, args: &str) -> Result<CommandResult, RunnerError> {
        self.run(&Invocation::new(program, args).streamed())
    }
}

/// Split an argument string on whitespace, keeping double-quoted groups
/// together. Quote characters are removed.
pub fn split_args(args: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut has_token = false;

    for c in args.chars() {
        match c {
            '"' => {
                in_quotes = !in_quotes;
                has_token = true;
            }
            c if c.is_whitespace() && !in_quotes => {
                if has_token {
                    tokens.push(std::mem::take(&mut current));
                    has_token = false;
                }
            }
            c => {
                current.push(c);
                has_token = true;
            }
        }
    }
    if has_token {
        tokens.push(current);
    }
    tokens
}

/// Runner that starts real processes.
pub struct SystemRunner;

impl SystemRunner {
    fn drain<R>(
        source: R,
        log: Arc<Mutex<Vec<String>>>,
        stream: bool,
    ) -> thread::JoinHandle<std::io::Result<()>>
    where
        R: Read + Send + 'static,
    {
        thread::spawn(move || {
            let mut reader = BufReader::new(source);
            let mut buf = Vec::new();
            loop {
                buf.clear();
                if reader.read_until(b'\n', &mut buf)? == 0 {
                    return Ok(());
                }
                let line = String::from_utf8_lossy(&buf)
                    .trim_end_matches(['\n', '\r'])
                    .to_string();
                if stream {
                    ui::stream_line(&line);
                }
                match log.lock() {
                    Ok(mut lines) => lines.push(line),
                    Err(poisoned) => poisoned.into_inner().push(line),
                }
            }
        })
    }

    fn report_failure(report: &FailureReport) {
        ui::error(&report.headline);
        for line in &report.output {
            ui::stream_line(line);
        }
    }
}

/// What gets printed when a command exits nonzero.
#[derive(Debug, PartialEq)]
pub struct FailureReport {
    pub headline: String,
    /// Captured output to dump; empty when it was already streamed.
    pub output: Vec<String>,
}

/// Report for a finished command, or `None` when it succeeded or the
/// caller asked for quiet.
pub fn failure_report(
    invocation: &Invocation,
    exit_code: i32,
    lines: &[String],
) -> Option<FailureReport> {
    if exit_code == 0 || invocation.quiet {
        return None;
    }
    Some(FailureReport {
        headline: format!(
            "There was an error while running command: `{}`, resulting in: exit status {exit_code}",
            invocation.display()
        ),
        output: if invocation.stream {
            Vec::new()
        } else {
            lines.to_vec()
        },
    })
}

impl CommandRunner for SystemRunner {
    fn run(&self, invocation: &Invocation) -> Result<CommandResult, RunnerError> {
        log::debug!("exec: {}", invocation.display());

        let mut child = Command::new(&invocation.program)
            .args(invocation.argv())
            .envs(invocation.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| {
                ui::error(&format!(
                    "There was an error starting command: `{}`, resulting in the error: {}",
                    invocation.display(),
                    source
                ));
                RunnerError::Spawn {
                    command: invocation.display(),
                    source,
                }
            })?;

        let log = Arc::new(Mutex::new(Vec::new()));
        let mut readers = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            readers.push(Self::drain(stdout, Arc::clone(&log), invocation.stream));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(Self::drain(stderr, Arc::clone(&log), invocation.stream));
        }

        let status = child.wait().map_err(|e| RunnerError::Output {
            command: invocation.display(),
            message: e.to_string(),
        })?;

        for reader in readers {
            let drained = reader.join().map_err(|_| RunnerError::Output {
                command: invocation.display(),
                message: "output reader panicked".to_string(),
            })?;
            drained.map_err(|e| RunnerError::Output {
                command: invocation.display(),
                message: e.to_string(),
            })?;
        }

        let lines = match Arc::try_unwrap(log) {
            Ok(mutex) => mutex.into_inner().unwrap_or_else(|p| p.into_inner()),
            Err(shared) => shared.lock().map(|l| l.clone()).unwrap_or_default(),
        };
        let exit_code = exit_code_of(status);

        if let Some(report) = failure_report(invocation, exit_code, &lines) {
            Self::report_failure(&report);
        }

        Ok(CommandResult { lines, exit_code })
    }
}

/// Exit code from the OS wait status; signals map to `128 + signal`.
fn exit_code_of(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    1
}
