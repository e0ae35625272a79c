//! Core types for cluster objects.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Object metadata shared by every cluster object.
///
/// Only the fields the rollout logic reads are typed; everything else the
/// server sent is kept in `extra` so a replace never drops it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    /// Object name
    #[serde(default)]
    pub name: String,
    /// Namespace the object lives in
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// Labels
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    /// Server-side creation time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_timestamp: Option<DateTime<Utc>>,
    /// Optimistic concurrency token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_version: Option<String>,
    /// Unmodelled metadata fields
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Metadata of a pod template (labels only matter here).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TemplateMeta {
    /// Pod labels; changing one forces pods to be recreated
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    /// Unmodelled fields
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Pod template of a deployment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PodTemplate {
    /// Template metadata
    #[serde(default)]
    pub metadata: TemplateMeta,
    /// Unmodelled fields (the pod spec)
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Deployment spec.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeploymentSpec {
    /// Desired replica count; the API server defaults a missing value to 1
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,
    /// Pod template
    #[serde(default)]
    pub template: PodTemplate,
    /// Unmodelled fields
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A replica-counted, label-bearing workload object.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Deployment {
    /// API version (`apps/v1`)
    #[serde(default = "default_api_version")]
    pub api_version: String,
    /// Kind (`Deployment`)
    #[serde(default = "default_kind")]
    pub kind: String,
    /// Metadata
    #[serde(default)]
    pub metadata: ObjectMeta,
    /// Spec
    #[serde(default)]
    pub spec: DeploymentSpec,
    /// Status and any other top-level fields
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_api_version() -> String {
    "apps/v1".to_string()
}

fn default_kind() -> String {
    "Deployment".to_string()
}

impl Deployment {
    /// Create a bare deployment with a name and replica count.
    pub fn new(name: impl Into<String>, replicas: i32) -> Self {
        Self {
            api_version: default_api_version(),
            kind: default_kind(),
            metadata: ObjectMeta {
                name: name.into(),
                ..Default::default()
            },
            spec: DeploymentSpec {
                replicas: Some(replicas),
                ..Default::default()
            },
            extra: Map::new(),
        }
    }

    /// Object name.
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    /// Desired replicas (1 when unset, matching the server default).
    pub fn replicas(&self) -> i32 {
        self.spec.replicas.unwrap_or(1)
    }

    /// Set the desired replica count.
    pub fn set_replicas(&mut self, replicas: i32) {
        self.spec.replicas = Some(replicas);
    }

    /// Read a label.
    pub fn label(&self, key: &str) -> Option<&str> {
        self.metadata.labels.get(key).map(String::as_str)
    }

    /// Set a label (local mutation; persisted by the next update).
    pub fn set_label(&mut self, key: &str, value: &str) {
        self.metadata
            .labels
            .insert(key.to_string(), value.to_string());
    }

    /// Remove a label (local mutation; persisted by the next update).
    pub fn remove_label(&mut self, key: &str) {
        self.metadata.labels.remove(key);
    }

    /// Set a pod template label.
    pub fn set_template_label(&mut self, key: &str, value: &str) {
        self.spec
            .template
            .metadata
            .labels
            .insert(key.to_string(), value.to_string());
    }

    /// Read a pod template label.
    pub fn template_label(&self, key: &str) -> Option<&str> {
        self.spec
            .template
            .metadata
            .labels
            .get(key)
            .map(String::as_str)
    }

    /// Whether every label in the selector is present with the same value.
    pub fn matches(&self, selector: &LabelSelector) -> bool {
        selector
            .iter()
            .all(|(k, v)| self.metadata.labels.get(k) == Some(v))
    }
}

/// Sort deployments newest first by creation time.
pub fn sort_newest_first(deployments: &mut [Deployment]) {
    deployments.sort_by(|a, b| {
        b.metadata
            .creation_timestamp
            .cmp(&a.metadata.creation_timestamp)
    });
}

/// Equality-based label selector (`k=v,k2=v2`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelSelector(BTreeMap<String, String>);

impl LabelSelector {
    /// Empty selector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a `key=value` requirement.
    pub fn with(mut self, key: &str, value: &str) -> Self {
        self.0.insert(key.to_string(), value.to_string());
        self
    }

    /// Iterate requirements.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.0.iter()
    }
}

impl fmt::Display for LabelSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|(k, v)| format!("{k}={v}")).collect();
        write!(f, "{}", parts.join(","))
    }
}

/// Object kinds the teardown path knows how to delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    /// apps/v1 Deployment
    Deployment,
    /// v1 Service
    Service,
    /// v1 Secret
    Secret,
    /// networking Ingress
    Ingress,
}

impl ObjectKind {
    /// Parse the `kind` field of a manifest.
    pub fn from_kind(kind: &str) -> Option<Self> {
        match kind {
            "Deployment" => Some(Self::Deployment),
            "Service" => Some(Self::Service),
            "Secret" => Some(Self::Secret),
            "Ingress" => Some(Self::Ingress),
            _ => None,
        }
    }

    /// Resource name as kubectl expects it.
    pub fn as_resource(&self) -> &'static str {
        match self {
            Self::Deployment => "deployment",
            Self::Service => "service",
            Self::Secret => "secret",
            Self::Ingress => "ingress",
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_resource())
    }
}

/// Retry configuration for conflicting updates.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts
    pub max_attempts: u32,
    /// Base delay between retries
    pub base_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_factor: f64,
    /// Maximum delay between retries
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(10),
            backoff_factor: 2.0,
            max_delay: Duration::from_secs(1),
        }
    }
}

impl RetryConfig {
    /// Calculate the delay for a given attempt number (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay = self.base_delay.as_secs_f64() * self.backoff_factor.powi(attempt as i32);
        let capped = delay.min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(capped)
    }

    /// Create a config that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "apiVersion": "apps/v1",
        "kind": "Deployment",
        "metadata": {
            "name": "checkout-1.2.0-master-abc123",
            "namespace": "staging",
            "labels": {"app": "checkout-master"},
            "creationTimestamp": "2024-03-01T10:00:00Z",
            "resourceVersion": "4711",
            "uid": "0f7c"
        },
        "spec": {
            "replicas": 4,
            "selector": {"matchLabels": {"app": "checkout-master"}},
            "template": {
                "metadata": {"labels": {"app": "checkout-master"}},
                "spec": {"containers": [{"name": "web", "image": "x"}]}
            }
        },
        "status": {"readyReplicas": 4}
    }"#;

    #[test]
    fn test_deployment_parses_typed_fields() {
        let d: Deployment = serde_json::from_str(SAMPLE).unwrap();
        assert_eq!(d.name(), "checkout-1.2.0-master-abc123");
        assert_eq!(d.replicas(), 4);
        assert_eq!(d.label("app"), Some("checkout-master"));
        assert_eq!(d.metadata.resource_version.as_deref(), Some("4711"));
        assert!(d.metadata.creation_timestamp.is_some());
    }

    #[test]
    fn test_deployment_keeps_unknown_fields() {
        let mut d: Deployment = serde_json::from_str(SAMPLE).unwrap();
        d.set_replicas(1);
        d.set_template_label("kubedeploy-releasetime", "1700000000");

        let out = serde_json::to_value(&d).unwrap();
        assert_eq!(out["metadata"]["uid"], "0f7c");
        assert_eq!(out["spec"]["selector"]["matchLabels"]["app"], "checkout-master");
        assert_eq!(out["spec"]["template"]["spec"]["containers"][0]["name"], "web");
        assert_eq!(out["status"]["readyReplicas"], 4);
        assert_eq!(out["spec"]["replicas"], 1);
        assert_eq!(
            out["spec"]["template"]["metadata"]["labels"]["kubedeploy-releasetime"],
            "1700000000"
        );
    }

    #[test]
    fn test_missing_replicas_defaults_to_one() {
        let d: Deployment = serde_json::from_str(r#"{"metadata": {"name": "x"}}"#).unwrap();
        assert_eq!(d.replicas(), 1);
    }

    #[test]
    fn test_label_selector_display_and_match() {
        let sel = LabelSelector::new()
            .with("app", "checkout-master")
            .with("kubedeploy-is-live", "true");
        assert_eq!(sel.to_string(), "app=checkout-master,kubedeploy-is-live=true");

        let mut d = Deployment::new("a", 1);
        d.set_label("app", "checkout-master");
        assert!(!d.matches(&sel));
        d.set_label("kubedeploy-is-live", "true");
        assert!(d.matches(&sel));
    }

    #[test]
    fn test_sort_newest_first() {
        let mut old = Deployment::new("old", 1);
        old.metadata.creation_timestamp = Some("2024-01-01T00:00:00Z".parse().unwrap());
        let mut new = Deployment::new("new", 1);
        new.metadata.creation_timestamp = Some("2024-02-01T00:00:00Z".parse().unwrap());

        let mut list = vec![old, new];
        sort_newest_first(&mut list);
        assert_eq!(list[0].name(), "new");
        assert_eq!(list[1].name(), "old");
    }

    #[test]
    fn test_object_kind_from_manifest_kind() {
        assert_eq!(ObjectKind::from_kind("Service"), Some(ObjectKind::Service));
        assert_eq!(ObjectKind::from_kind("ConfigMap"), None);
        assert_eq!(ObjectKind::Ingress.to_string(), "ingress");
    }

    #[test]
    fn test_retry_delay_backoff_is_capped() {
        let config = RetryConfig {
            base_delay: Duration::from_millis(100),
            ..RetryConfig::default()
        };
        assert_eq!(config.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(config.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(config.delay_for_attempt(4), Duration::from_secs(1));
    }
}
