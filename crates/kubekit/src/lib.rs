//! # kubekit
//!
//! A small gateway to deployment objects in a Kubernetes namespace.
//!
//! This crate provides:
//! - Typed deployment objects that preserve every server-side field
//! - A [`Backend`](backend::Backend) trait with a `kubectl` implementation
//!   and an in-memory implementation for tests (`testing` feature)
//! - Read-modify-write updates retried on optimistic-concurrency conflicts
//!
//! ## Example
//!
//! ```no_run
//! use kubekit::{Client, LabelSelector};
//!
//! let client = Client::new("staging").expect("kubectl not available");
//!
//! let live = client
//!     .list_deployments(&LabelSelector::new().with("app", "checkout-master"))
//!     .expect("list failed");
//!
//! for d in &live {
//!     client
//!         .update_deployment(d.name(), |d| d.set_replicas(2))
//!         .expect("update failed");
//! }
//! ```

#![warn(clippy::all)]

pub mod backend;
pub mod error;
pub mod retry;
pub mod types;

pub use error::{Error, ErrorCategory, Result};
pub use types::{Deployment, LabelSelector, ObjectKind, RetryConfig, sort_newest_first};

use backend::{Backend, kubectl::KubectlBackend};
use std::path::Path;

/// High-level client for deployment operations.
///
/// Wraps a backend and adds the conflict-retrying update path.
pub struct Client {
    backend: Box<dyn Backend>,
    retry: RetryConfig,
}

impl Client {
    /// Create a client backed by `kubectl`, scoped to `namespace`.
    ///
    /// Returns an error if kubectl is not installed.
    pub fn new(namespace: &str) -> Result<Self> {
        let backend = KubectlBackend::new(namespace)?;
        Ok(Self {
            backend: Box::new(backend),
            retry: RetryConfig::default(),
        })
    }

    /// Create a client with a custom backend (useful for testing).
    pub fn with_backend(backend: Box<dyn Backend>) -> Self {
        Self {
            backend,
            retry: RetryConfig::default(),
        }
    }

    /// Override the conflict retry policy.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Fetch a deployment by name.
    pub fn get_deployment(&self, name: &str) -> Result<Option<Deployment>> {
        self.backend.get_deployment(name)
    }

    /// Fetch a deployment that must exist.
    pub fn require_deployment(&self, name: &str) -> Result<Deployment> {
        self.get_deployment(name)?
            .ok_or_else(|| Error::NotFound {
                kind: "deployment".to_string(),
                name: name.to_string(),
            })
    }

    /// List deployments matching a selector.
    pub fn list_deployments(&self, selector: &LabelSelector) -> Result<Vec<Deployment>> {
        self.backend.list_deployments(selector)
    }

    /// Read-modify-write a deployment.
    ///
    /// Each attempt re-reads the latest version before applying `mutate`, so
    /// a conflicting writer never has its change overwritten. Conflicts are
    /// retried with exponential backoff; exhausting the budget returns the
    /// last conflict.
    pub fn update_deployment<F>(&self, name: &str, mut mutate: F) -> Result<Deployment>
    where
        F: FnMut(&mut Deployment),
    {
        let updated = retry::retry_on_conflict(&self.retry, name, || {
            let mut deployment = self.require_deployment(name)?;
            mutate(&mut deployment);
            self.backend.replace_deployment(&deployment)
        })?;
        log::info!("Updated deployment {}", updated.name());
        Ok(updated)
    }

    /// Delete a deployment.
    pub fn delete_deployment(&self, name: &str) -> Result<()> {
        self.backend.delete_deployment(name)
    }

    /// Delete an auxiliary object (service, secret, ingress).
    pub fn delete_object(&self, kind: ObjectKind, name: &str) -> Result<()> {
        self.backend.delete_object(kind, name)
    }

    /// Apply a rendered manifest file.
    pub fn apply_manifest(&self, path: &Path) -> Result<()> {
        self.backend.apply_manifest(path)
    }
}
