use crate::context::Context;
use crate::prompt::Prompter;
use crate::runner::CommandRunner;
use crate::template;
use crate::ui;
use anyhow::Result;
use kubekit::Client;

/// Render the manifests and print where they went.
pub fn template_only(ctx: &Context, runner: &dyn CommandRunner) -> Result<()> {
    for path in template::render(ctx, runner)? {
        ui::answer(&path.display().to_string());
    }
    Ok(())
}

/// Delete every object the rendered manifests describe.
pub fn teardown(
    ctx: &Context,
    runner: &dyn CommandRunner,
    cluster: &Client,
    prompter: &mut dyn Prompter,
) -> Result<()> {
    let files = template::render(ctx, runner)?;
    let objects = template::manifest_objects(&files)?;
    if objects.is_empty() {
        ui::warn("The manifests describe nothing to delete.");
        return template::remove_rendered(ctx);
    }

    ui::header(&format!("Teardown in {}", ctx.release.namespace));
    for (kind, name) in &objects {
        ui::kv(kind.as_resource(), name);
    }
    if !ctx.flags.force && !prompter.confirm("Delete all of the above?")? {
        ui::info("Nothing deleted.");
        return template::remove_rendered(ctx);
    }

    for (kind, name) in &objects {
        cluster.delete_object(*kind, name)?;
        ui::success(&format!("Deleted {kind} {name}"));
    }
    template::remove_rendered(ctx)
}
