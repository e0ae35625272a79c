use crate::context::Flags;
use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "kubedeploy")]
#[command(version)]
#[command(about = "Build, test and canary-roll container releases onto Kubernetes", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Path to the repo config (default: ./deploy.yaml)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(flatten)]
    pub flags: FlagArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Args, Debug, Default)]
pub struct FlagArgs {
    /// Build for the production cluster despite uncommitted changes
    #[arg(long, global = true)]
    pub override_dirty_workdir: bool,

    /// Skip all sanity prompts, canary holds and the lock check
    #[arg(long, global = true)]
    pub force: bool,

    /// Push the image without asking
    #[arg(long, global = true)]
    pub force_push_image: bool,

    /// Stop test containers but don't remove them
    #[arg(long, global = true)]
    pub keep_test_container: bool,

    /// Skip the canary holds
    #[arg(long, global = true)]
    pub no_canary: bool,

    /// Skip the connectivity check and the release summary
    #[arg(long, global = true)]
    pub test_only: bool,

    /// Leave rendered manifests in .kubedeploy-temp
    #[arg(long, global = true)]
    pub keep_kubernetes_template_files: bool,

    /// Print the templating environment and debug logs
    #[arg(long, global = true)]
    pub debug: bool,
}

impl FlagArgs {
    pub fn to_flags(&self) -> Flags {
        Flags {
            override_dirty_workdir: self.override_dirty_workdir,
            force: self.force,
            force_push_image: self.force_push_image,
            keep_test_container: self.keep_test_container,
            no_canary: self.no_canary,
            test_only: self.test_only,
            keep_template_files: self.keep_kubernetes_template_files,
            debug: self.debug,
        }
    }
}

#[derive(Subcommand)]
pub enum Command {
    /// Build, test and push the image
    #[command(visible_alias = "make")]
    Build,

    /// Build and test the image without pushing
    Test,

    /// Run the test sets against an already built image
    Testonly,

    /// Roll the release out through the canary points
    StartRollout,

    /// Set the live deployment's replica count
    Scale {
        /// Desired replicas
        replicas: i32,
    },

    /// Swap the live deployment with the rollback target
    Rollback,

    /// Recreate every pod of the live deployment
    RollingRestart,

    /// List every deployment of this app and branch
    ActiveDeployments,

    /// List image tags in the registry (Google Container Registry only)
    ListTags,

    /// Show whether a rollout is in progress
    Status,

    /// Block rollouts of this app
    Lock(LockArgs),

    /// Remove this app's lock
    Unlock,

    /// Block rollouts of every app
    LockAll(LockArgs),

    /// Remove the lock blocking every app
    UnlockAll,

    /// Print the full image reference
    Name,

    /// Print the target namespace
    Environment,

    /// Print the target cluster
    Cluster,

    /// Print the release name
    Release,

    /// Render the manifests and print their paths
    TemplateOnly,

    /// Delete every object the rendered manifests describe
    Teardown,

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

impl Command {
    /// Whether the command talks to a registry or cluster.
    pub fn needs_network(&self) -> bool {
        !matches!(
            self,
            Command::Status
                | Command::Lock(_)
                | Command::Unlock
                | Command::LockAll(_)
                | Command::UnlockAll
                | Command::Name
                | Command::Environment
                | Command::Cluster
                | Command::Release
                | Command::TemplateOnly
                | Command::Completions { .. }
        )
    }
}

#[derive(Args, Debug)]
pub struct LockArgs {
    /// Why rollouts are blocked
    #[arg(long)]
    pub reason: Option<String>,
}
