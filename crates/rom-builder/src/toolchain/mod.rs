//! The external AOSP build system, reached through a narrow capability
//! interface so the build logic can be exercised without a source tree.

use std::fmt;
use std::path::Path;

use crate::error::Result;
use crate::executor::ExecCtx;
use crate::registry::RomDefinition;
use crate::request::Flavor;

mod aosp;

pub use aosp::AospToolchain;

/// Projects refreshed by a scoped re-sync of an existing tree.
pub const SCOPED_SYNC_PATHS: [&str; 5] = [
    "device/",
    "vendor/",
    "kernel/",
    "hardware/xiaomi/",
    "hardware/google/",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncScope {
    Full,
    DeviceOnly,
}

/// Device selection commands provided by `build/envsetup.sh` and the ROM's
/// vendor scripts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SetupCommand {
    /// Axion's `axion <device> <gms|va>` helper.
    Axion { device: String, flavor: Flavor },
    Lunch { combo: String },
    Breakfast { device: String },
}

impl fmt::Display for SetupCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SetupCommand::Axion { device, flavor } => {
                let mode = match flavor {
                    Flavor::Gms => "gms",
                    Flavor::Vanilla => "va",
                };
                write!(f, "axion {device} {mode}")
            }
            SetupCommand::Lunch { combo } => write!(f, "lunch {combo}"),
            SetupCommand::Breakfast { device } => write!(f, "breakfast {device}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanStep {
    Full,
    Installclean,
}

impl fmt::Display for CleanStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CleanStep::Full => "m clean",
            CleanStep::Installclean => "m installclean",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildTarget {
    Brunch { device: String },
    Make { target: String, jobs: Option<usize> },
}

impl fmt::Display for BuildTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildTarget::Brunch { device } => write!(f, "brunch {device}"),
            BuildTarget::Make {
                target,
                jobs: Some(j),
            } => write!(f, "m {target} -j{j}"),
            BuildTarget::Make { target, jobs: None } => write!(f, "m {target}"),
        }
    }
}

pub trait BuildToolchain {
    fn repo_init(&mut self, ctx: &ExecCtx, work_dir: &Path, rom: &RomDefinition) -> Result<()>;

    fn repo_sync(
        &mut self,
        ctx: &ExecCtx,
        work_dir: &Path,
        scope: SyncScope,
        jobs: usize,
    ) -> Result<()>;

    fn configure(&mut self, ctx: &ExecCtx, work_dir: &Path, cmd: &SetupCommand) -> Result<()>;

    fn clean(&mut self, ctx: &ExecCtx, work_dir: &Path, step: CleanStep) -> Result<()>;

    fn build(
        &mut self,
        ctx: &ExecCtx,
        work_dir: &Path,
        target: &BuildTarget,
        fastboot: bool,
    ) -> Result<()>;
}
