use std::time::Instant;

use crate::artifacts::{self, ArtifactSet, ResolveOptions};
use crate::configurator;
use crate::error::{Error, Result};
use crate::executor::{ExecCtx, ExecEvent};
use crate::manifest::ManifestFetcher;
use crate::orchestrator;
use crate::request::{BuildAttempt, BuildRequest, Flavor, Variant};
use crate::source;
use crate::toolchain::BuildToolchain;
use crate::workspace::{self, WorkspacePaths};

#[derive(Debug, Clone)]
pub struct RunSettings {
    pub sync_jobs: usize,
    pub build_jobs: usize,
    pub resolve: ResolveOptions,
}

#[derive(Debug)]
pub struct AttemptOutcome {
    pub attempt: BuildAttempt,
    pub result: Result<ArtifactSet>,
}

#[derive(Debug, Default)]
pub struct RunReport {
    pub outcomes: Vec<AttemptOutcome>,
}

impl RunReport {
    pub fn any_failed(&self) -> bool {
        self.outcomes.iter().any(|o| o.result.is_err())
    }

    pub fn first_failure(&self) -> Option<&AttemptOutcome> {
        self.outcomes.iter().find(|o| o.result.is_err())
    }
}

/// Ordered (flavor, fastboot) pairs for a variant request: each flavor's
/// regular build, followed by its fastboot build when requested.
pub fn plan_attempts(variant: Variant, fastboot: bool) -> Vec<(Flavor, bool)> {
    let mut out = Vec::new();
    for flavor in variant.flavors() {
        out.push((flavor, false));
        if fastboot {
            out.push((flavor, true));
        }
    }
    out
}

/// Run every planned attempt in order. A failed attempt is recorded and the
/// next one still runs; attempts never overlap since they share one output
/// directory and build environment.
pub fn run(
    ctx: &mut ExecCtx,
    toolchain: &mut dyn BuildToolchain,
    request: &BuildRequest,
    paths: &WorkspacePaths,
    settings: &RunSettings,
) -> RunReport {
    let mut report = RunReport::default();
    for (flavor, fastboot) in plan_attempts(request.variant, request.fastboot) {
        let mut attempt = BuildAttempt {
            rom: request.rom,
            device: request.device.clone(),
            flavor,
            fastboot,
            clean: request.clean,
            output_dir: paths.output_dir(&request.device),
            success: false,
        };
        let id = attempt.id();
        ctx.set_attempt(id.clone());
        ctx.sink.emit(ExecEvent::AttemptStarted { id: id.clone() });

        let start = Instant::now();
        let result = run_attempt(ctx, toolchain, &attempt, paths, settings);
        let elapsed_ms = start.elapsed().as_millis();

        match &result {
            Ok(set) if set.is_empty() => ctx.log("No files published"),
            Ok(set) => ctx.log(&format!("Published {} file(s)", set.published.len())),
            Err(e) => ctx.error(&format!("{} failed: {e}", e.kind().step())),
        }
        attempt.success = result.is_ok();
        ctx.sink.emit(ExecEvent::AttemptFinished {
            id,
            ok: attempt.success,
            error: result.as_ref().err().map(ToString::to_string),
            elapsed_ms,
        });
        ctx.clear_attempt();
        report.outcomes.push(AttemptOutcome { attempt, result });
    }
    report
}

fn run_attempt(
    ctx: &ExecCtx,
    toolchain: &mut dyn BuildToolchain,
    attempt: &BuildAttempt,
    paths: &WorkspacePaths,
    settings: &RunSettings,
) -> Result<ArtifactSet> {
    configurator::configure(
        ctx,
        toolchain,
        &paths.work_dir,
        attempt.rom,
        &attempt.device,
        attempt.flavor,
    )?;
    let output_dir = orchestrator::build(
        ctx,
        toolchain,
        &paths.work_dir,
        attempt,
        settings.build_jobs,
    )?;
    artifacts::resolve(
        ctx,
        &output_dir,
        attempt.rom,
        &attempt.device,
        attempt.flavor,
        attempt.fastboot,
        &paths.release_dir,
        &settings.resolve,
    )
}

/// Prepare the source tree, then run all attempts. Preparation failures
/// abort the whole run; attempt failures are reported in the `RunReport`.
pub fn execute(
    ctx: &mut ExecCtx,
    toolchain: &mut dyn BuildToolchain,
    fetcher: &dyn ManifestFetcher,
    request: &BuildRequest,
    paths: &WorkspacePaths,
    settings: &RunSettings,
) -> Result<RunReport> {
    log_banner(ctx, request, paths);
    if let Err(e) = prepare(ctx, toolchain, fetcher, request, paths, settings) {
        ctx.error(&format!("{} failed: {e}", e.kind().step()));
        ctx.sink.emit(ExecEvent::RunDone {
            ok: false,
            error: Some(e.to_string()),
        });
        return Err(e);
    }

    let report = run(ctx, toolchain, request, paths, settings);
    let ok = !report.any_failed();
    if ok {
        ctx.step("=== All builds complete ===");
        ctx.log(&format!(
            "ROM files are available in: {}",
            paths.release_dir.display()
        ));
    }
    ctx.sink.emit(ExecEvent::RunDone {
        ok,
        error: report.first_failure().map(|o| {
            let msg = o
                .result
                .as_ref()
                .err()
                .map(Error::to_string)
                .unwrap_or_default();
            format!("attempt '{}' failed: {msg}", o.attempt.id())
        }),
    });
    Ok(report)
}

fn prepare(
    ctx: &ExecCtx,
    toolchain: &mut dyn BuildToolchain,
    fetcher: &dyn ManifestFetcher,
    request: &BuildRequest,
    paths: &WorkspacePaths,
    settings: &RunSettings,
) -> Result<()> {
    if !ctx.dry_run {
        workspace::ensure_dir(&paths.release_dir)?;
    }
    source::prepare_work_tree(ctx, toolchain, fetcher, request, paths, settings.sync_jobs)
}

fn log_banner(ctx: &ExecCtx, request: &BuildRequest, paths: &WorkspacePaths) {
    let rom = request.rom;
    ctx.step(&format!(
        "=== Building {} for {} ===",
        rom.display_name, request.device
    ));
    ctx.log(&format!("ROM Directory: {}", paths.work_dir.display()));
    ctx.log(&format!("ROM Variant: {}", request.variant));
    ctx.log(&format!(
        "Build Fastboot: {}",
        if request.fastboot { "Yes" } else { "No" }
    ));
    ctx.log(&format!(
        "Source: {} (branch: {})",
        rom.manifest_url, rom.manifest_branch
    ));
    ctx.log(&format!("Release Directory: {}", paths.release_dir.display()));
}
