use std::path::Path;
use std::process::Command;

use crate::error::{ErrorKind, Result};
use crate::executor::ExecCtx;
use crate::registry::RomDefinition;
use crate::toolchain::{
    BuildTarget, BuildToolchain, CleanStep, SCOPED_SYNC_PATHS, SetupCommand, SyncScope,
};

/// Drives `repo` directly and the envsetup shell functions through `bash`.
///
/// `lunch`, `breakfast`, `brunch` and `m` only exist inside a shell that
/// sourced `build/envsetup.sh`, and their device selection lives in that
/// shell's environment. Every invocation therefore starts a fresh shell
/// and replays the last successful selection before the requested step.
#[derive(Debug, Default)]
pub struct AospToolchain {
    git_lfs: bool,
    selection: Option<SetupCommand>,
}

impl AospToolchain {
    pub fn new(git_lfs: bool) -> Self {
        Self {
            git_lfs,
            selection: None,
        }
    }

    fn envsetup_shell(&self, work_dir: &Path, steps: &[String], fastboot: Option<bool>) -> Command {
        let mut script = String::from("set -e\nsource build/envsetup.sh\n");
        for step in steps {
            script.push_str(step);
            script.push('\n');
        }
        let mut cmd = Command::new("bash");
        cmd.arg("-c").arg(script).current_dir(work_dir);
        if let Some(fb) = fastboot {
            cmd.env("BUILD_FASTBOOT", if fb { "true" } else { "false" });
        }
        cmd
    }

    fn with_selection(&self, step: String) -> Vec<String> {
        let mut steps: Vec<String> = self.selection.iter().map(ToString::to_string).collect();
        steps.push(step);
        steps
    }
}

impl BuildToolchain for AospToolchain {
    fn repo_init(&mut self, ctx: &ExecCtx, work_dir: &Path, rom: &RomDefinition) -> Result<()> {
        let mut cmd = Command::new("repo");
        cmd.arg("init")
            .arg("-u")
            .arg(rom.manifest_url)
            .arg("-b")
            .arg(rom.manifest_branch)
            .current_dir(work_dir);
        if self.git_lfs {
            cmd.arg("--git-lfs");
        }
        ctx.run_cmd(cmd).map_err(|e| e.with_kind(ErrorKind::SyncFailure))
    }

    fn repo_sync(
        &mut self,
        ctx: &ExecCtx,
        work_dir: &Path,
        scope: SyncScope,
        jobs: usize,
    ) -> Result<()> {
        let mut cmd = Command::new("repo");
        cmd.arg("sync")
            .arg("-c")
            .arg(format!("-j{jobs}"))
            .args(["--force-sync", "--no-clone-bundle", "--no-tags"])
            .current_dir(work_dir);
        if scope == SyncScope::DeviceOnly {
            cmd.arg("-f").args(SCOPED_SYNC_PATHS);
        }
        ctx.run_cmd(cmd).map_err(|e| e.with_kind(ErrorKind::SyncFailure))
    }

    fn configure(&mut self, ctx: &ExecCtx, work_dir: &Path, setup: &SetupCommand) -> Result<()> {
        let cmd = self.envsetup_shell(work_dir, &[setup.to_string()], None);
        ctx.run_cmd(cmd)
            .map_err(|e| e.with_kind(ErrorKind::ConfigFailure))?;
        self.selection = Some(setup.clone());
        Ok(())
    }

    fn clean(&mut self, ctx: &ExecCtx, work_dir: &Path, step: CleanStep) -> Result<()> {
        let cmd = self.envsetup_shell(work_dir, &self.with_selection(step.to_string()), None);
        ctx.run_cmd(cmd)
            .map_err(|e| e.with_kind(ErrorKind::BuildFailure))
    }

    fn build(
        &mut self,
        ctx: &ExecCtx,
        work_dir: &Path,
        target: &BuildTarget,
        fastboot: bool,
    ) -> Result<()> {
        let cmd = self.envsetup_shell(
            work_dir,
            &self.with_selection(target.to_string()),
            Some(fastboot),
        );
        ctx.run_cmd(cmd)
            .map_err(|e| e.with_kind(ErrorKind::BuildFailure))
    }
}
