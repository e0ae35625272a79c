//! Real cluster backend driving the `kubectl` CLI.

use crate::backend::Backend;
use crate::error::{Error, Result};
use crate::types::{Deployment, LabelSelector, ObjectKind};
use serde::Deserialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};

/// Backend that executes real `kubectl` commands in one namespace.
pub struct KubectlBackend {
    /// Path to the kubectl executable
    kubectl_path: PathBuf,
    /// Namespace every call is scoped to
    namespace: String,
}

#[derive(Deserialize)]
struct DeploymentList {
    #[serde(default)]
    items: Vec<Deployment>,
}

impl KubectlBackend {
    /// Create a backend scoped to `namespace`.
    ///
    /// Returns an error if kubectl is not installed.
    pub fn new(namespace: &str) -> Result<Self> {
        let kubectl_path = which::which("kubectl").map_err(|_| Error::KubectlNotFound)?;
        Ok(Self {
            kubectl_path,
            namespace: namespace.to_string(),
        })
    }

    fn command(&self, args: &[&str]) -> Command {
        let mut cmd = Command::new(&self.kubectl_path);
        cmd.arg(format!("--namespace={}", self.namespace)).args(args);
        cmd
    }

    /// Run kubectl and return output.
    fn run_kubectl(&self, args: &[&str]) -> Result<Output> {
        log::debug!("kubectl {}", args.join(" "));
        self.command(args)
            .output()
            .map_err(|e| Error::CommandFailed {
                message: format!("failed to execute kubectl: {e}"),
                stderr: String::new(),
            })
    }

    /// Run kubectl and check for success.
    fn run_kubectl_checked(&self, args: &[&str], kind: &str, name: &str) -> Result<String> {
        let output = self.run_kubectl(args)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::from_kubectl_output(&stderr, kind, name));
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

impl Backend for KubectlBackend {
    fn get_deployment(&self, name: &str) -> Result<Option<Deployment>> {
        match self.run_kubectl_checked(
            &["get", "deployment", name, "-o", "json"],
            "deployment",
            name,
        ) {
            Ok(stdout) => Ok(Some(serde_json::from_str(&stdout)?)),
            Err(Error::NotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn list_deployments(&self, selector: &LabelSelector) -> Result<Vec<Deployment>> {
        let selector = selector.to_string();
        let stdout = self.run_kubectl_checked(
            &["get", "deployments", "-l", &selector, "-o", "json"],
            "deployment",
            &selector,
        )?;
        let list: DeploymentList = serde_json::from_str(&stdout)?;
        Ok(list.items)
    }

    fn replace_deployment(&self, deployment: &Deployment) -> Result<Deployment> {
        let body = serde_json::to_vec(deployment)?;
        let mut child = self
            .command(&["replace", "-f", "-", "-o", "json"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Error::CommandFailed {
                message: format!("failed to execute kubectl: {e}"),
                stderr: String::new(),
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(&body)?;
        }
        let output = child.wait_with_output()?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::from_kubectl_output(
                &stderr,
                "deployment",
                deployment.name(),
            ));
        }
        Ok(serde_json::from_slice(&output.stdout)?)
    }

    fn delete_deployment(&self, name: &str) -> Result<()> {
        self.run_kubectl_checked(
            &["delete", "deployment", name, "--cascade=foreground"],
            "deployment",
            name,
        )?;
        Ok(())
    }

    fn delete_object(&self, kind: ObjectKind, name: &str) -> Result<()> {
        self.run_kubectl_checked(&["delete", kind.as_resource(), name], kind.as_resource(), name)?;
        Ok(())
    }

    fn apply_manifest(&self, path: &Path) -> Result<()> {
        let path_str = path.to_string_lossy();
        let output = self.run_kubectl(&["apply", "-f", &path_str])?;
        if !output.status.success() {
            let mut message = String::from_utf8_lossy(&output.stdout).to_string();
            message.push_str(&String::from_utf8_lossy(&output.stderr));
            return Err(Error::Apply {
                path: path.to_path_buf(),
                message: message.trim().to_string(),
            });
        }
        Ok(())
    }
}
