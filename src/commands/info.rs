use crate::context::Context;
use crate::docker;
use crate::runner::CommandRunner;
use crate::ui;
use anyhow::Result;

/// Single-value questions about the current release.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Query {
    /// Full image reference
    Name,
    /// Target namespace
    Environment,
    Cluster,
    /// Release name
    Release,
}

fn answer_for(ctx: &Context, query: Query) -> &str {
    let release = &ctx.release;
    match query {
        Query::Name => &release.image,
        Query::Environment => &release.namespace,
        Query::Cluster => &release.cluster,
        Query::Release => &release.name,
    }
}

pub fn print(ctx: &Context, query: Query) -> Result<()> {
    ui::answer(answer_for(ctx, query));
    Ok(())
}

pub fn list_tags(ctx: &Context, runner: &dyn CommandRunner) -> Result<()> {
    let tags = docker::list_tags(runner, &ctx.release)?;
    docker::print_tags(&tags);
    Ok(())
}
