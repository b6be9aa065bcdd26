//! Source tree preparation before any build attempt runs.

use crate::error::{ErrorKind, Result};
use crate::executor::ExecCtx;
use crate::manifest::{self, ManifestFetcher};
use crate::request::BuildRequest;
use crate::toolchain::{BuildToolchain, SyncScope};
use crate::workspace::{self, WorkspacePaths};

/// Bring the work tree to a buildable state: either a fresh `repo` checkout
/// with the device overlay, or (with `skip_sync`) the existing tree with a
/// refreshed overlay and a scoped re-sync of device-specific projects.
pub fn prepare_work_tree(
    ctx: &ExecCtx,
    toolchain: &mut dyn BuildToolchain,
    fetcher: &dyn ManifestFetcher,
    request: &BuildRequest,
    paths: &WorkspacePaths,
    sync_jobs: usize,
) -> Result<()> {
    let rom = request.rom;
    let device = request.device.as_str();

    // Fail before touching the tree when no overlay exists for the pair.
    manifest::require_manifest_url(rom, device)?;

    if request.skip_sync {
        workspace::check_work_tree(&paths.work_dir)
            .inspect_err(|_| ctx.error("Try without the --skip-sync flag"))?;
        ctx.log(&format!(
            "Using existing source at: {}",
            paths.work_dir.display()
        ));
        ctx.log("Updating device manifest...");
        manifest::provision(ctx, fetcher, rom, device, &paths.work_dir)?;

        ctx.log("Syncing device-specific repositories...");
        if let Err(e) = toolchain.repo_sync(ctx, &paths.work_dir, SyncScope::DeviceOnly, sync_jobs)
        {
            ctx.warn(&format!(
                "scoped sync failed, continuing with the existing tree: {e}"
            ));
        }
    } else {
        if paths.work_dir.exists() {
            ctx.log(&format!(
                "Removing existing directory: {}",
                paths.work_dir.display()
            ));
        }
        if ctx.dry_run {
            ctx.log(&format!(
                "DRY-RUN: would recreate {}",
                paths.work_dir.display()
            ));
        } else {
            workspace::reset_work_dir(paths)?;
        }

        ctx.log(&format!(
            "Initializing repo from {} ({})...",
            rom.manifest_url, rom.manifest_branch
        ));
        toolchain
            .repo_init(ctx, &paths.work_dir, rom)
            .map_err(|e| e.with_kind(ErrorKind::SyncFailure))?;

        manifest::provision(ctx, fetcher, rom, device, &paths.work_dir)?;

        ctx.log(&format!(
            "Syncing source code with {sync_jobs} parallel jobs (may take a while)..."
        ));
        toolchain
            .repo_sync(ctx, &paths.work_dir, SyncScope::Full, sync_jobs)
            .map_err(|e| e.with_kind(ErrorKind::SyncFailure))?;
    }

    if !ctx.dry_run {
        workspace::check_work_tree(&paths.work_dir)?;
    }
    ctx.log("Environment setup complete");
    Ok(())
}
