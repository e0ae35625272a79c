//! Backend abstraction for cluster operations.
//!
//! The [`Backend`] trait defines the raw operations against the cluster,
//! allowing for different implementations (real `kubectl`, in-memory for
//! testing). Retry and read-modify-write live in [`crate::Client`].

pub mod kubectl;
#[cfg(any(test, feature = "testing"))]
pub mod memory;

use crate::error::Result;
use crate::types::{Deployment, LabelSelector, ObjectKind};
use std::path::Path;

/// Backend trait for cluster operations.
pub trait Backend: Send + Sync {
    /// Fetch a deployment by name; `None` when it does not exist.
    fn get_deployment(&self, name: &str) -> Result<Option<Deployment>>;

    /// List deployments matching a label selector (no ordering guarantee).
    fn list_deployments(&self, selector: &LabelSelector) -> Result<Vec<Deployment>>;

    /// Replace a deployment. Fails with `Error::Conflict` when the object's
    /// resource version is stale.
    fn replace_deployment(&self, deployment: &Deployment) -> Result<Deployment>;

    /// Delete a deployment and (in the foreground) its pods.
    fn delete_deployment(&self, name: &str) -> Result<()>;

    /// Delete an auxiliary object.
    fn delete_object(&self, kind: ObjectKind, name: &str) -> Result<()>;

    /// Apply a rendered manifest file.
    fn apply_manifest(&self, path: &Path) -> Result<()>;
}

/// Shared backends, so a caller can keep a handle on the backend a
/// [`crate::Client`] owns.
impl<B: Backend + ?Sized> Backend for std::sync::Arc<B> {
    fn get_deployment(&self, name: &str) -> Result<Option<Deployment>> {
        (**self).get_deployment(name)
    }

    fn list_deployments(&self, selector: &LabelSelector) -> Result<Vec<Deployment>> {
        (**self).list_deployments(selector)
    }

    fn replace_deployment(&self, deployment: &Deployment) -> Result<Deployment> {
        (**self).replace_deployment(deployment)
    }

    fn delete_deployment(&self, name: &str) -> Result<()> {
        (**self).delete_deployment(name)
    }

    fn delete_object(&self, kind: ObjectKind, name: &str) -> Result<()> {
        (**self).delete_object(kind, name)
    }

    fn apply_manifest(&self, path: &Path) -> Result<()> {
        (**self).apply_manifest(path)
    }
}
