//! In-memory backend for tests and dry runs.
//!
//! Behaves like a single-namespace API server: replaces are checked against
//! the stored resource version, and applied manifests create or update
//! deployments. Every mutation is journaled so callers can assert on the
//! exact sequence of cluster writes.

use crate::backend::Backend;
use crate::error::{Error, Result};
use crate::types::{Deployment, LabelSelector, ObjectKind};
use chrono::{Duration, Utc};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

#[derive(Default)]
struct State {
    deployments: BTreeMap<String, Deployment>,
    objects: BTreeSet<(String, String)>,
    journal: Vec<String>,
    pending_conflicts: u32,
    next_version: u64,
    applied: u32,
}

/// Backend keeping every object in process memory.
#[derive(Default)]
pub struct MemoryBackend {
    state: Mutex<State>,
}

impl MemoryBackend {
    /// Empty cluster.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Seed a deployment as if it already existed on the server.
    pub fn insert(&self, mut deployment: Deployment) {
        let mut state = self.lock();
        state.next_version += 1;
        deployment.metadata.resource_version = Some(state.next_version.to_string());
        state
            .deployments
            .insert(deployment.name().to_string(), deployment);
    }

    /// Make the next `count` replaces fail with a conflict.
    pub fn fail_next_updates(&self, count: u32) {
        self.lock().pending_conflicts = count;
    }

    /// Current copy of a deployment.
    pub fn deployment(&self, name: &str) -> Option<Deployment> {
        self.lock().deployments.get(name).cloned()
    }

    /// Names of every stored deployment.
    pub fn deployment_names(&self) -> Vec<String> {
        self.lock().deployments.keys().cloned().collect()
    }

    /// Whether a non-deployment object exists.
    pub fn has_object(&self, kind: ObjectKind, name: &str) -> bool {
        self.lock()
            .objects
            .contains(&(kind.as_resource().to_string(), name.to_string()))
    }

    /// Recorded mutations, oldest first.
    pub fn journal(&self) -> Vec<String> {
        self.lock().journal.clone()
    }
}

impl Backend for MemoryBackend {
    fn get_deployment(&self, name: &str) -> Result<Option<Deployment>> {
        Ok(self.lock().deployments.get(name).cloned())
    }

    fn list_deployments(&self, selector: &LabelSelector) -> Result<Vec<Deployment>> {
        Ok(self
            .lock()
            .deployments
            .values()
            .filter(|d| d.matches(selector))
            .cloned()
            .collect())
    }

    fn replace_deployment(&self, deployment: &Deployment) -> Result<Deployment> {
        let mut state = self.lock();
        let name = deployment.name().to_string();

        if state.pending_conflicts > 0 {
            state.pending_conflicts -= 1;
            return Err(Error::Conflict {
                name,
                message: "the object has been modified".to_string(),
            });
        }

        let stored_version = match state.deployments.get(&name) {
            Some(existing) => existing.metadata.resource_version.clone(),
            None => {
                return Err(Error::NotFound {
                    kind: "deployment".to_string(),
                    name,
                });
            }
        };
        if deployment.metadata.resource_version != stored_version {
            return Err(Error::Conflict {
                name,
                message: "the object has been modified".to_string(),
            });
        }

        state.next_version += 1;
        let mut stored = deployment.clone();
        stored.metadata.resource_version = Some(state.next_version.to_string());
        state
            .journal
            .push(format!("replace {} replicas={}", name, stored.replicas()));
        state.deployments.insert(name, stored.clone());
        Ok(stored)
    }

    fn delete_deployment(&self, name: &str) -> Result<()> {
        let mut state = self.lock();
        if state.deployments.remove(name).is_none() {
            return Err(Error::NotFound {
                kind: "deployment".to_string(),
                name: name.to_string(),
            });
        }
        state.journal.push(format!("delete deployment {name}"));
        Ok(())
    }

    fn delete_object(&self, kind: ObjectKind, name: &str) -> Result<()> {
        if kind == ObjectKind::Deployment {
            return self.delete_deployment(name);
        }
        let mut state = self.lock();
        if !state
            .objects
            .remove(&(kind.as_resource().to_string(), name.to_string()))
        {
            return Err(Error::NotFound {
                kind: kind.as_resource().to_string(),
                name: name.to_string(),
            });
        }
        state.journal.push(format!("delete {kind} {name}"));
        Ok(())
    }

    fn apply_manifest(&self, path: &Path) -> Result<()> {
        let content = std::fs::read_to_string(path)?;
        let value: serde_json::Value = serde_json::from_str(&content)?;
        let kind = value["kind"].as_str().unwrap_or_default().to_string();
        let name = value["metadata"]["name"]
            .as_str()
            .unwrap_or_default()
            .to_string();

        let mut state = self.lock();
        state.journal.push(format!("apply {kind} {name}"));

        if kind != "Deployment" {
            state.objects.insert((kind.to_lowercase(), name));
            return Ok(());
        }

        let mut deployment: Deployment = serde_json::from_value(value)?;
        state.next_version += 1;
        state.applied += 1;
        deployment.metadata.resource_version = Some(state.next_version.to_string());
        deployment.metadata.creation_timestamp = match state.deployments.get(&name) {
            Some(existing) => existing.metadata.creation_timestamp,
            // Strictly increasing so "newest" is well defined within one test.
            None => Some(Utc::now() + Duration::milliseconds(i64::from(state.applied))),
        };
        state.deployments.insert(name, deployment);
        Ok(())
    }
}
