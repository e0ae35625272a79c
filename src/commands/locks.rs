use crate::context::Context;
use crate::lock::{ALL, LockStore};
use crate::ui;
use anyhow::Result;

/// Report whether a rollout of this app+branch is blocked.
pub fn status(ctx: &Context, store: &LockStore) -> Result<()> {
    if !store.is_locked(&ctx.release.app)? {
        ui::info("No rollout in progress for this repo and branch.");
    }
    Ok(())
}

pub fn lock(ctx: &Context, store: &LockStore, reason: Option<&str>) -> Result<()> {
    let app = &ctx.release.app;
    let default_reason = format!("manually blocked rollouts for {app}");
    store.acquire(app, reason.unwrap_or(&default_reason))?;
    ui::success(&format!("Rollouts for {app} are now blocked."));
    Ok(())
}

pub fn unlock(ctx: &Context, store: &LockStore) -> Result<()> {
    Ok(store.unlock(&ctx.release.app)?)
}

pub fn lock_all(store: &LockStore, reason: Option<&str>) -> Result<()> {
    store.acquire(ALL, reason.unwrap_or("manually blocked all rollouts"))?;
    ui::success("All rollouts are now blocked.");
    Ok(())
}

pub fn unlock_all(store: &LockStore) -> Result<()> {
    Ok(store.unlock(ALL)?)
}
