use std::path::{Path, PathBuf};

use crate::configurator;
use crate::error::{Error, ErrorKind, Result};
use crate::executor::ExecCtx;
use crate::registry::RomKind;
use crate::request::BuildAttempt;
use crate::toolchain::{BuildTarget, BuildToolchain, CleanStep};

pub const BOOT_IMAGE: &str = "boot.img";
pub const UPDATE_PACKAGE_TARGET: &str = "updatepackage";

/// Pick the build action for an attempt. Fastboot builds re-select the
/// device first since the clean step may have dropped the selection.
pub fn build_target(attempt: &BuildAttempt, jobs: usize) -> BuildTarget {
    match (attempt.rom.kind, attempt.fastboot) {
        (RomKind::Axion, false) => BuildTarget::Brunch {
            device: attempt.device.clone(),
        },
        (RomKind::Axion, true) => BuildTarget::Make {
            target: UPDATE_PACKAGE_TARGET.into(),
            jobs: Some(jobs.max(1)),
        },
        (RomKind::Lmodroid, false) => BuildTarget::Make {
            target: attempt.rom.id.into(),
            jobs: None,
        },
        (RomKind::Lmodroid, true) => BuildTarget::Make {
            target: UPDATE_PACKAGE_TARGET.into(),
            jobs: None,
        },
    }
}

/// Clean, then build once. The attempt succeeds only if the boot image is
/// present in the product output directory afterwards; the toolchain's exit
/// status alone is not trusted either way.
pub fn build(
    ctx: &ExecCtx,
    toolchain: &mut dyn BuildToolchain,
    work_dir: &Path,
    attempt: &BuildAttempt,
    jobs: usize,
) -> Result<PathBuf> {
    let step = if attempt.clean {
        ctx.log("Running clean build...");
        CleanStep::Full
    } else {
        ctx.log("Running incremental build...");
        CleanStep::Installclean
    };
    toolchain
        .clean(ctx, work_dir, step)
        .map_err(|e| Error::new(ErrorKind::BuildFailure, format!("'{step}' failed: {e}")))?;

    if attempt.fastboot {
        ctx.log("Configuring for fastboot build...");
        configurator::configure(
            ctx,
            toolchain,
            work_dir,
            attempt.rom,
            &attempt.device,
            attempt.flavor,
        )?;
    }

    let target = build_target(attempt, jobs);
    ctx.log(&format!(
        "Building {} for {} with variant: {}",
        attempt.rom.display_name, attempt.device, attempt.flavor
    ));
    if let Err(e) = toolchain.build(ctx, work_dir, &target, attempt.fastboot) {
        ctx.warn(&format!("'{target}' reported failure ({e}); checking build outputs"));
    }

    let output_dir = attempt.output_dir.clone();
    if ctx.dry_run {
        ctx.log(&format!(
            "DRY-RUN: skipped output verification in {}",
            output_dir.display()
        ));
        return Ok(output_dir);
    }

    let boot = output_dir.join(BOOT_IMAGE);
    if !boot.is_file() {
        return Err(Error::new(
            ErrorKind::BuildFailure,
            format!("build produced no {}", boot.display()),
        ));
    }
    ctx.log("Build successful!");
    Ok(output_dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry;
    use crate::request::Flavor;

    fn attempt(rom: &str, fastboot: bool) -> BuildAttempt {
        BuildAttempt {
            rom: registry::lookup(rom).expect("rom"),
            device: "pipa".into(),
            flavor: Flavor::Vanilla,
            fastboot,
            clean: true,
            output_dir: PathBuf::from("/src/out/target/product/pipa"),
            success: false,
        }
    }

    #[test]
    fn build_target_matrix() {
        assert_eq!(
            build_target(&attempt("axion", false), 8).to_string(),
            "brunch pipa"
        );
        assert_eq!(
            build_target(&attempt("axion", true), 8).to_string(),
            "m updatepackage -j8"
        );
        assert_eq!(
            build_target(&attempt("lmodroid", false), 8).to_string(),
            "m lmodroid"
        );
        assert_eq!(
            build_target(&attempt("lmodroid", true), 8).to_string(),
            "m updatepackage"
        );
    }
}
