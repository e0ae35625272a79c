//! File-backed rollout locks.
//!
//! One JSON file per application under the lock root, plus the reserved
//! [`ALL`] lock that blocks every application. A crashed rollout leaves its
//! lock behind on purpose; a human clears it with `unlock`.

use crate::{paths, ui};
use chrono::Local;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Lock name that blocks every application
pub const ALL: &str = "all";

/// Reason written by `start-rollout`
pub const ROLLOUT_REASON: &str = "rollout in progress";

#[derive(Debug, Error)]
pub enum LockError {
    #[error("rollouts for '{name}' are blocked by {} since {}: {}", .record.author, .record.date_started, .record.reason)]
    Locked { name: String, record: LockRecord },

    #[error("there is no lock named '{name}' to remove")]
    NotLocked { name: String },

    #[error("lock file {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("lock file {} is not valid JSON: {source}", .path.display())]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Contents of a lock file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LockRecord {
    pub author: String,
    pub reason: String,
    pub date_started: String,
}

impl LockRecord {
    /// A record owned by the current user, stamped now.
    pub fn new(reason: &str) -> Self {
        Self {
            author: std::env::var("USER").unwrap_or_else(|_| "unknown".to_string()),
            reason: reason.to_string(),
            date_started: Local::now().format("%b %e %H:%M:%S").to_string(),
        }
    }
}

/// Result of trying to enter a rollout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockOutcome {
    /// A new lock was written and must be released afterwards
    Acquired,
    /// Locked, but `--force` let us through without touching the lock
    Bypassed,
}

pub struct LockStore {
    root: PathBuf,
}

impl LockStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Store at the configured lock root.
    pub fn from_env() -> Self {
        Self::new(paths::lock_dir())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// Read a lock, `None` if absent.
    pub fn read(&self, name: &str) -> Result<Option<LockRecord>, LockError> {
        let path = self.path(name);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(LockError::Io { path, source }),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|source| LockError::Corrupt { path, source })
    }

    /// The lock blocking `app`, checking [`ALL`] first.
    pub fn blocking(&self, app: &str) -> Result<Option<(String, LockRecord)>, LockError> {
        for name in [ALL, app] {
            if let Some(record) = self.read(name)? {
                return Ok(Some((name.to_string(), record)));
            }
        }
        Ok(None)
    }

    /// Whether rollouts of `app` are blocked; reports the owner if so.
    pub fn is_locked(&self, app: &str) -> Result<bool, LockError> {
        match self.blocking(app)? {
            Some((name, record)) => {
                report(&name, &record);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Write a new lock. Fails with [`LockError::Locked`] if it already exists.
    pub fn acquire(&self, name: &str, reason: &str) -> Result<(), LockError> {
        fs::create_dir_all(&self.root).map_err(|source| LockError::Io {
            path: self.root.clone(),
            source,
        })?;

        let path = self.path(name);
        let record = LockRecord::new(reason);
        let json = serde_json::to_vec(&record).map_err(|source| LockError::Corrupt {
            path: path.clone(),
            source,
        })?;
        match create_exclusive(&path, &json, |file, bytes| {
            file.write_all(bytes)?;
            file.sync_all()
        }) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                let record = self.read(name)?.unwrap_or_else(|| LockRecord::new("unknown"));
                return Err(LockError::Locked {
                    name: name.to_string(),
                    record,
                });
            }
            Err(source) => return Err(LockError::Io { path, source }),
        }

        log::info!("Wrote lock '{}' for {}", name, record.author);
        ui::success(&format!("Successfully wrote lockfile for '{name}'."));
        Ok(())
    }

    /// Gate for entering a rollout of `app`.
    pub fn lock_before_rollout(&self, app: &str, force: bool) -> Result<LockOutcome, LockError> {
        if let Some((name, record)) = self.blocking(app)? {
            report(&name, &record);
            if force {
                ui::warn("Lockfile exists, but proceeding anyway due to '--force'.");
                return Ok(LockOutcome::Bypassed);
            }
            return Err(LockError::Locked { name, record });
        }
        self.acquire(app, ROLLOUT_REASON)?;
        Ok(LockOutcome::Acquired)
    }

    /// Delete a lock. A missing lock is an error.
    pub fn unlock(&self, name: &str) -> Result<(), LockError> {
        let path = self.path(name);
        match fs::remove_file(&path) {
            Ok(()) => {
                log::info!("Removed lock '{name}'");
                ui::success(&format!("Removed lockfile for '{name}'."));
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(LockError::NotLocked {
                name: name.to_string(),
            }),
            Err(source) => Err(LockError::Io { path, source }),
        }
    }

    /// Release after a rollout, unless the lock was bypassed.
    pub fn release(&self, app: &str, outcome: LockOutcome) -> Result<(), LockError> {
        match outcome {
            LockOutcome::Acquired => self.unlock(app),
            LockOutcome::Bypassed => Ok(()),
        }
    }
}

/// Create `path` only if it doesn't exist and fill it with `bytes`.
/// A failed write removes the file again so no empty lock is left behind.
fn create_exclusive(
    path: &Path,
    bytes: &[u8],
    write: impl FnOnce(&mut File, &[u8]) -> io::Result<()>,
) -> io::Result<()> {
    let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
    if let Err(e) = write(&mut file, bytes) {
        drop(file);
        if let Err(cleanup) = fs::remove_file(path) {
            log::warn!("Could not remove partial lock {}: {cleanup}", path.display());
        }
        return Err(e);
    }
    Ok(())
}

fn report(name: &str, record: &LockRecord) {
    if name == ALL {
        ui::warn("All rollouts are currently blocked.");
    } else {
        ui::warn(&format!("Rollouts for {name} are blocked."));
    }
    ui::kv("Blocked by", &record.author);
    ui::kv("For reason", &record.reason);
    ui::kv("On date", &record.date_started);
}
