use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::workspace::WorkspaceConfig;

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BuilderConfig {
    pub defaults: DefaultsConfig,
    pub workspace: WorkspaceConfig,
    pub sync: SyncConfig,
    pub build: BuildConfig,
}

/// Fallbacks for the `--rom`, `--device` and `--variant` flags.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DefaultsConfig {
    pub rom: Option<String>,
    pub device: Option<String>,
    pub variant: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SyncConfig {
    /// 0 = one job per CPU core.
    pub jobs: usize,
    #[serde(default = "default_true")]
    pub git_lfs: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            jobs: 0,
            git_lfs: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BuildConfig {
    /// 0 = one job per CPU core.
    pub jobs: usize,
    #[serde(default = "default_true")]
    pub manual_fastboot_fallback: bool,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            jobs: 0,
            manual_fastboot_fallback: true,
        }
    }
}

pub fn load(path: &Path) -> Result<BuilderConfig> {
    let data = fs::read_to_string(path)
        .map_err(|e| Error::msg(format!("failed to read config {}: {e}", path.display())))?;
    parse(&data).map_err(|e| Error::msg(format!("TOML parse error in {}: {e}", path.display())))
}

pub fn parse(data: &str) -> Result<BuilderConfig> {
    Ok(toml::from_str(data)?)
}

pub fn load_or_default(path: Option<&Path>) -> Result<BuilderConfig> {
    match path {
        Some(p) => load(p),
        None => Ok(BuilderConfig::default()),
    }
}

/// Resolve a configured job count; 0 means all available cores.
pub fn resolve_jobs(jobs: usize) -> usize {
    if jobs == 0 {
        num_cpus::get().max(1)
    } else {
        jobs
    }
}
