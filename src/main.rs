mod build;
mod cli;
mod commands;
mod config;
mod context;
mod docker;
mod lock;
mod paths;
mod prompt;
mod release;
mod rollout;
mod runner;
mod template;
mod ui;

#[cfg(test)]
mod testing;

use anyhow::{Context as _, Result};
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use cli::{Cli, Command};
use commands::deploy::{self, Session};
use commands::info::Query;
use config::DeployConfig;
use context::Context;
use lock::LockStore;
use prompt::{AutoConfirm, Prompter, TerminalPrompter};
use release::Release;
use runner::{CommandRunner, SystemRunner};
use std::io;

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    let log_level = match cli.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    let log_level = if cli.flags.debug {
        log_level.max(log::LevelFilter::Debug)
    } else {
        log_level
    };

    env_logger::Builder::new()
        .filter_level(if cli.quiet {
            log::LevelFilter::Error
        } else {
            log_level
        })
        .format_timestamp(None)
        .init();
    ui::set_quiet(cli.quiet);

    if let Command::Completions { shell } = cli.command {
        let mut cmd = Cli::command();
        generate(shell, &mut cmd, "kubedeploy", &mut io::stdout());
        return Ok(());
    }

    let workdir = std::env::current_dir().context("Failed to read the working directory")?;
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| workdir.join(config::CONFIG_FILE));
    let config = DeployConfig::load(&config_path)?;

    let runner = SystemRunner;
    let release = Release::detect(&config, &runner)?;
    let ctx = Context {
        flags: cli.flags.to_flags(),
        config,
        release,
        workdir,
    };

    if !ctx.flags.test_only && cli.command.needs_network() {
        docker::check_connectivity(&runner)?;
        print_summary(&ctx);
    }

    run(&ctx, &runner, cli.command)
}

fn print_summary(ctx: &Context) {
    let release = &ctx.release;
    ui::header("Release");
    ui::kv("Repository name", &release.app);
    ui::kv("Branch", &release.branch);
    ui::kv("HEAD hash", &release.commit);
    ui::kv("Image", &release.image);
    ui::kv("Namespace", &release.namespace);
    println!();
}

fn run(ctx: &Context, runner: &dyn CommandRunner, command: Command) -> Result<()> {
    let locks = LockStore::from_env();
    let mut prompter: Box<dyn Prompter> = if ctx.flags.force {
        Box::new(AutoConfirm)
    } else {
        Box::new(TerminalPrompter)
    };

    match command {
        Command::Status => commands::locks::status(ctx, &locks),
        Command::Lock(args) => commands::locks::lock(ctx, &locks, args.reason.as_deref()),
        Command::Unlock => commands::locks::unlock(ctx, &locks),
        Command::LockAll(args) => commands::locks::lock_all(&locks, args.reason.as_deref()),
        Command::UnlockAll => commands::locks::unlock_all(&locks),
        Command::Name => commands::info::print(ctx, Query::Name),
        Command::Environment => commands::info::print(ctx, Query::Environment),
        Command::Cluster => commands::info::print(ctx, Query::Cluster),
        Command::Release => commands::info::print(ctx, Query::Release),
        Command::ListTags => commands::info::list_tags(ctx, runner),
        Command::TemplateOnly => commands::template::template_only(ctx, runner),
        Command::Teardown => {
            let cluster = commands::cluster(ctx)?;
            commands::template::teardown(ctx, runner, &cluster, prompter.as_mut())
        }
        Command::Completions { .. } => Ok(()),
        Command::Build => deploy::build(&mut session(ctx, runner, prompter.as_mut())?),
        Command::Test => deploy::test(&mut session(ctx, runner, prompter.as_mut())?),
        Command::Testonly => deploy::test_only(&mut session(ctx, runner, prompter.as_mut())?),
        Command::StartRollout => deploy::start_rollout(
            &mut session(ctx, runner, prompter.as_mut())?,
            &commands::cluster(ctx)?,
            &locks,
        ),
        Command::Scale { replicas } => deploy::scale(
            &mut session(ctx, runner, prompter.as_mut())?,
            &commands::cluster(ctx)?,
            &locks,
            replicas,
        ),
        Command::Rollback => deploy::rollback(
            &mut session(ctx, runner, prompter.as_mut())?,
            &commands::cluster(ctx)?,
            &locks,
        ),
        Command::RollingRestart => deploy::rolling_restart(
            &mut session(ctx, runner, prompter.as_mut())?,
            &commands::cluster(ctx)?,
            &locks,
        ),
        Command::ActiveDeployments => deploy::active_deployments(
            &mut session(ctx, runner, prompter.as_mut())?,
            &commands::cluster(ctx)?,
            &locks,
        ),
    }
}

fn session<'a>(
    ctx: &'a Context,
    runner: &'a dyn CommandRunner,
    prompter: &'a mut dyn Prompter,
) -> Result<Session<'a>> {
    Ok(Session {
        ctx,
        runner,
        prompter,
        docker_config: paths::docker_config_file()?,
    })
}
