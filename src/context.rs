use crate::config::DeployConfig;
use crate::paths;
use crate::release::Release;
use std::path::PathBuf;

/// Operator switches that change how an invocation behaves.
#[derive(Debug, Clone, Default)]
pub struct Flags {
    /// Build for production even with uncommitted changes
    pub override_dirty_workdir: bool,
    /// Skip sanity prompts, canary holds and the lock check
    pub force: bool,
    /// Push without asking
    pub force_push_image: bool,
    /// Leave test containers behind after stopping them
    pub keep_test_container: bool,
    /// Skip canary holds
    pub no_canary: bool,
    pub test_only: bool,
    pub keep_template_files: bool,
    pub debug: bool,
}

impl Flags {
    pub fn skip_holds(&self) -> bool {
        self.no_canary || self.force
    }
}

/// Everything computed once at startup and shared by reference.
#[derive(Debug, Clone)]
pub struct Context {
    pub flags: Flags,
    pub config: DeployConfig,
    pub release: Release,
    pub workdir: PathBuf,
}

impl Context {
    /// Directory holding the manifest templates.
    pub fn template_source_dir(&self) -> PathBuf {
        self.workdir
            .join(&self.config.application.path_to_kubernetes_files)
    }

    /// Directory rendered manifests go to.
    pub fn rendered_dir(&self) -> PathBuf {
        paths::template_dir(&self.workdir)
    }
}
