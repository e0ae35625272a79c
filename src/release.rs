//! Release descriptor: everything derived once per invocation from
//! `deploy.yaml` and the git checkout.

use crate::config::{DeployConfig, DockerRepository};
use crate::runner::{CommandRunner, Invocation};
use anyhow::{Context, Result, bail};
use regex::Regex;

/// Cluster that receives production-repository builds
pub const PRODUCTION_CLUSTER: &str = "production";

/// Where a branch deploys to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchTarget {
    pub repository: String,
    pub cluster: String,
    pub namespace: String,
}

impl BranchTarget {
    pub fn for_branch(branch: &str, repos: &DockerRepository) -> Self {
        let production = |namespace: &str| Self {
            repository: repos.production_repository_name.clone(),
            cluster: PRODUCTION_CLUSTER.to_string(),
            namespace: namespace.to_string(),
        };
        match branch {
            "production" => production("production"),
            "master" => production("staging"),
            "acceptance" => production("acceptance"),
            _ => Self {
                repository: repos.development_repository_name.clone(),
                cluster: "development".to_string(),
                namespace: "development".to_string(),
            },
        }
    }
}

/// One versioned, branch- and commit-scoped deployable unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Release {
    pub app: String,
    pub version: String,
    pub branch: String,
    pub commit: String,
    pub repository: String,
    pub registry_root: String,
    pub cluster: String,
    pub namespace: String,
    /// `<version>-<branch>-<commit>`
    pub tag: String,
    /// `<app>:<tag>`, the local build tag
    pub short_image: String,
    /// Full registry reference
    pub image: String,
    /// Deployment name, `<app>-<tag>`
    pub name: String,
}

impl Release {
    /// Read branch and commit from git, then derive.
    pub fn detect(config: &DeployConfig, runner: &dyn CommandRunner) -> Result<Self> {
        let git = |args: &str, what: &str| -> Result<String> {
            let result = runner
                .run(&Invocation::new("git", args))
                .with_context(|| format!("Failed to read the {what}"))?;
            let value = result.output().trim().to_string();
            if !result.success() || value.is_empty() {
                bail!("Could not determine the {what}; is this a git checkout with commits?");
            }
            Ok(value)
        };
        let branch = git("rev-parse --abbrev-ref HEAD", "current git branch")?;
        let commit = git("rev-parse --verify --short HEAD", "HEAD commit")?;
        Self::derive(config, &branch, &commit)
    }

    pub fn derive(config: &DeployConfig, raw_branch: &str, commit: &str) -> Result<Self> {
        let app = config.application.name.clone();
        let version = config.application.version.clone();
        let branch = sanitize_branch(raw_branch)?;
        let target = BranchTarget::for_branch(&branch, &config.docker_repository);

        let tag = format!("{version}-{branch}-{commit}");
        let registry_root = config.docker_repository.registry_root.clone();
        let image = match config.image_full_path.as_deref() {
            Some(path) if !path.is_empty() => path.to_string(),
            _ if registry_root.is_empty() => format!("{}/{app}:{tag}", target.repository),
            _ => format!("{registry_root}/{}/{app}:{tag}", target.repository),
        };

        Ok(Self {
            short_image: format!("{app}:{tag}"),
            name: format!("{app}-{tag}"),
            app,
            version,
            branch,
            commit: commit.to_string(),
            repository: target.repository,
            registry_root,
            cluster: target.cluster,
            namespace: target.namespace,
            tag,
            image,
        })
    }

    /// Value of the `app` label shared by every generation of this app+branch.
    pub fn app_label(&self) -> String {
        format!("{}-{}", self.app, self.branch)
    }

    pub fn is_production_cluster(&self) -> bool {
        self.cluster == PRODUCTION_CLUSTER
    }

    /// Image path without tag, as registry listings expect it.
    pub fn image_repository(&self) -> String {
        if self.registry_root.is_empty() {
            format!("{}/{}", self.repository, self.app)
        } else {
            format!("{}/{}/{}", self.registry_root, self.repository, self.app)
        }
    }
}

/// Replace everything outside the image-tag alphabet with `-`.
pub fn sanitize_branch(branch: &str) -> Result<String> {
    let invalid = Regex::new(r"[^A-Za-z0-9_.-]")?;
    Ok(invalid.replace_all(branch.trim(), "-").into_owned())
}
