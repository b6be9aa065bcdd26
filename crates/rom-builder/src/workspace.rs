use std::fs;
use std::path::{Component, Path, PathBuf};

use serde::Deserialize;

use crate::error::{Error, ErrorKind, Result};
use crate::registry::RomDefinition;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WorkspaceConfig {
    /// Base for source trees and release directories. Defaults to `$HOME`.
    pub root_dir: Option<String>,
    pub release_dir: Option<String>,
    pub log_dir: Option<String>,
}

#[derive(Debug, Clone)]
pub struct WorkspacePaths {
    pub root: PathBuf,
    pub work_dir: PathBuf,
    pub release_dir: PathBuf,
    pub log_dir: PathBuf,
}

impl WorkspacePaths {
    pub fn output_dir(&self, device: &str) -> PathBuf {
        self.work_dir
            .join("out")
            .join("target")
            .join("product")
            .join(device)
    }

    pub fn local_manifests_dir(&self) -> PathBuf {
        local_manifests_dir(&self.work_dir)
    }

    pub fn envsetup_script(&self) -> PathBuf {
        envsetup_script(&self.work_dir)
    }
}

pub fn local_manifests_dir(work_dir: &Path) -> PathBuf {
    work_dir.join(".repo").join("local_manifests")
}

pub fn envsetup_script(work_dir: &Path) -> PathBuf {
    work_dir.join("build").join("envsetup.sh")
}

pub fn resolve(
    cfg: &WorkspaceConfig,
    root_override: Option<&Path>,
    rom: &RomDefinition,
    device: &str,
) -> Result<WorkspacePaths> {
    let root = match (root_override, cfg.root_dir.as_deref()) {
        (Some(p), _) => p.to_path_buf(),
        (None, Some(raw)) => expand_home(raw)?,
        (None, None) => home_dir()?,
    };
    let root = if root.is_absolute() {
        root
    } else {
        std::env::current_dir()
            .map_err(|e| Error::msg(format!("cwd error: {e}")))?
            .join(root)
    };

    let work_dir = resolve_user_dir(&root, Path::new(rom.work_dir))?;
    let release_dir = match cfg.release_dir.as_deref().map(str::trim) {
        Some(raw) if !raw.is_empty() => resolve_user_dir(&root, &expand_home(raw)?)?,
        _ => root.join(format!("{}-{}-releases", rom.id, device)),
    };
    let log_dir = match cfg.log_dir.as_deref().map(str::trim) {
        Some(raw) if !raw.is_empty() => resolve_user_dir(&root, &expand_home(raw)?)?,
        _ => root.join("rom-builder-logs"),
    };

    Ok(WorkspacePaths {
        root,
        work_dir,
        release_dir,
        log_dir,
    })
}

fn home_dir() -> Result<PathBuf> {
    std::env::var_os("HOME")
        .filter(|h| !h.is_empty())
        .map(PathBuf::from)
        .ok_or_else(|| Error::msg("HOME is not set; pass --root or set workspace.root_dir"))
}

fn expand_home(raw: &str) -> Result<PathBuf> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(Error::msg("empty workspace path"));
    }
    if raw == "~" {
        return home_dir();
    }
    if let Some(rest) = raw.strip_prefix("~/") {
        return Ok(home_dir()?.join(rest));
    }
    Ok(PathBuf::from(raw))
}

fn resolve_user_dir(root: &Path, p: &Path) -> Result<PathBuf> {
    if p.as_os_str().is_empty() {
        return Err(Error::msg("empty workspace dir"));
    }
    if p.components().any(|c| matches!(c, Component::ParentDir)) {
        return Err(Error::msg(format!(
            "invalid workspace dir '{}' (contains '..')",
            p.display()
        )));
    }
    Ok(if p.is_absolute() {
        p.to_path_buf()
    } else {
        root.join(p)
    })
}

/// Recreate the source tree directory from scratch.
pub fn reset_work_dir(paths: &WorkspacePaths) -> Result<()> {
    safe_remove_dir_all(&paths.root, &paths.work_dir)?;
    ensure_dir(&paths.work_dir)
}

/// Require the AOSP environment entry script inside `work_dir`.
pub fn check_work_tree(work_dir: &Path) -> Result<()> {
    let envsetup = envsetup_script(work_dir);
    if !envsetup.is_file() {
        return Err(Error::new(
            ErrorKind::InvalidWorkTree,
            format!(
                "{} is not a valid ROM source tree (missing build/envsetup.sh)",
                work_dir.display()
            ),
        ));
    }
    Ok(())
}

pub fn safe_remove_dir_all(root: &Path, dir: &Path) -> Result<()> {
    if !dir.exists() {
        return Ok(());
    }
    let root_can = root.canonicalize().unwrap_or_else(|_| root.to_path_buf());
    let dir_can = dir.canonicalize().unwrap_or_else(|_| dir.to_path_buf());
    if dir_can == root_can || !dir_can.starts_with(&root_can) {
        return Err(Error::msg(format!(
            "refusing to remove '{}' (not inside workspace root '{}')",
            dir_can.display(),
            root_can.display()
        )));
    }
    fs::remove_dir_all(&dir_can)
        .map_err(|e| Error::msg(format!("failed to remove dir {}: {e}", dir_can.display())))
}

pub fn ensure_dir(p: &Path) -> Result<()> {
    fs::create_dir_all(p)
        .map_err(|e| Error::msg(format!("failed to create dir {}: {e}", p.display())))
}
