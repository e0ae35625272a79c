//! Cluster errors.
//!
//! `kubectl` reports failures as free text on stderr. [`Error::from_kubectl_output`]
//! sorts that text into variants so the update path can tell an optimistic
//! concurrency conflict from a hard failure.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Object changed between read and write; the only retryable category
    Conflict,
    NotFound,
    /// Forbidden or unauthorized
    Permission,
    KubectlNotFound,
    Other,
}

impl ErrorCategory {
    pub fn is_retryable(self) -> bool {
        self == Self::Conflict
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("update conflict on {name}: {message}")]
    Conflict { name: String, message: String },

    #[error("{kind} not found: {name}")]
    NotFound { kind: String, name: String },

    #[error("permission denied: {message}")]
    Permission { message: String },

    #[error("kubectl not found; install it and put it on your PATH")]
    KubectlNotFound,

    #[error("failed to apply manifest {}: {message}", .path.display())]
    Apply { path: PathBuf, message: String },

    /// kubectl ran but failed for a reason not covered above
    #[error("{message}: {stderr}")]
    CommandFailed { message: String, stderr: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed object: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Conflict { .. } => ErrorCategory::Conflict,
            Self::NotFound { .. } => ErrorCategory::NotFound,
            Self::Permission { .. } => ErrorCategory::Permission,
            Self::KubectlNotFound => ErrorCategory::KubectlNotFound,
            Self::Apply { .. } | Self::CommandFailed { .. } | Self::Io(_) | Self::Json(_) => {
                ErrorCategory::Other
            }
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.category().is_retryable()
    }

    /// Classify a failed kubectl call on `kind/name` by its stderr.
    pub fn from_kubectl_output(stderr: &str, kind: &str, name: &str) -> Self {
        let text = stderr.trim();
        let lower = text.to_lowercase();
        let mentions = |needles: &[&str]| needles.iter().any(|n| lower.contains(n));

        if mentions(&["(conflict)", "the object has been modified", "operation cannot be fulfilled"]) {
            Self::Conflict {
                name: name.to_string(),
                message: text.to_string(),
            }
        } else if mentions(&["(notfound)", "not found"]) {
            Self::NotFound {
                kind: kind.to_string(),
                name: name.to_string(),
            }
        } else if mentions(&["forbidden", "unauthorized"]) {
            Self::Permission {
                message: text.to_string(),
            }
        } else {
            Self::CommandFailed {
                message: format!("kubectl failed for {kind}/{name}"),
                stderr: text.to_string(),
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
