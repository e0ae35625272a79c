//! Operator confirmations.
//!
//! Every interactive gate (push, canary holds, teardown) asks through a
//! [`Prompter`], so unattended runs and tests can answer without a terminal.

use anyhow::{Context, Result};
use dialoguer::Input;

/// Asks the operator a yes/no question.
pub trait Prompter {
    /// `true` only for an explicit `y`/`Y`.
    fn confirm(&mut self, message: &str) -> Result<bool>;
}

/// Reads answers from the terminal.
pub struct TerminalPrompter;

impl Prompter for TerminalPrompter {
    fn confirm(&mut self, message: &str) -> Result<bool> {
        let answer: String = Input::new()
            .with_prompt(prompt_text(message))
            .allow_empty(true)
            .interact_text()
            .context("Failed to read confirmation")?;
        Ok(is_yes(&answer))
    }
}

/// Confirms everything (`--force` paths).
pub struct AutoConfirm;

impl Prompter for AutoConfirm {
    fn confirm(&mut self, message: &str) -> Result<bool> {
        log::debug!("auto-confirmed: {message}");
        Ok(true)
    }
}

/// The question itself goes in the prompt so `--quiet` never hides it.
fn prompt_text(message: &str) -> String {
    format!("{message}\nPress 'y' to proceed, anything else to exit")
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim(), "y" | "Y")
}
