//! Optimistic-concurrency retry for deployment updates.

use crate::error::Result;
use crate::types::RetryConfig;
use std::thread;

/// Run `attempt` until it succeeds, fails with a non-conflict error, or
/// the attempt budget runs out. Sleeps with exponential backoff between
/// conflicting attempts and logs each retry.
///
/// The final conflict is returned as-is once the budget is spent.
pub fn retry_on_conflict<T, F>(config: &RetryConfig, name: &str, mut attempt: F) -> Result<T>
where
    F: FnMut() -> Result<T>,
{
    let budget = config.max_attempts.max(1);
    let mut tries = 0;
    loop {
        tries += 1;
        match attempt() {
            Err(e) if e.is_retryable() && tries < budget => {
                let delay = config.delay_for_attempt(tries - 1);
                log::warn!(
                    "Update of {name} conflicted (attempt {tries}/{budget}), retrying in {}ms",
                    delay.as_millis()
                );
                thread::sleep(delay);
            }
            other => return other,
        }
    }
}
