//! Device manifest overlays layered onto the ROM's base manifest.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, ErrorKind, Result};
use crate::executor::ExecCtx;
use crate::registry::{RomDefinition, RomKind};
use crate::workspace::{ensure_dir, local_manifests_dir};

const MANIFEST_BASE_URL: &str = "https://raw.githubusercontent.com/ai94iq/local_manifests/main";

pub const DEVICE_MANIFEST_FILE: &str = "device.xml";

/// Overlay manifest location for a (rom, device) pair. lmodroid/raven has no
/// published overlay even though the registry lists raven for lmodroid.
pub fn manifest_url(rom: &RomDefinition, device: &str) -> Option<String> {
    let file = match (rom.kind, device) {
        (RomKind::Axion, "pipa") => "axion-pipa-qpr2.xml",
        (RomKind::Axion, "raven") => "axion-raven-qpr2.xml",
        (RomKind::Lmodroid, "pipa") => "lmov-pipa.xml",
        _ => return None,
    };
    Some(format!("{MANIFEST_BASE_URL}/{file}"))
}

pub fn require_manifest_url(rom: &RomDefinition, device: &str) -> Result<String> {
    manifest_url(rom, device).ok_or_else(|| {
        Error::new(
            ErrorKind::UnsupportedDeviceCombo,
            format!(
                "no device manifest available for {} + {} combination",
                rom.id, device
            ),
        )
    })
}

pub trait ManifestFetcher {
    fn fetch(&self, url: &str) -> Result<Vec<u8>>;
}

pub struct HttpFetcher {
    client: reqwest::blocking::Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| Error::msg(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

impl ManifestFetcher for HttpFetcher {
    fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        tracing::debug!(%url, "fetching device manifest");
        let res = self.client.get(url).send()?;
        if !res.status().is_success() {
            return Err(Error::new(
                ErrorKind::ManifestFetchFailure,
                format!("GET {url} failed with status {}", res.status()),
            ));
        }
        Ok(res.bytes()?.to_vec())
    }
}

/// Replace the local manifest overlay of `work_dir` with the single device
/// manifest for the pair. Any previous overlay content is removed first, so
/// repeated calls converge on the same one-file state.
pub fn provision(
    ctx: &ExecCtx,
    fetcher: &dyn ManifestFetcher,
    rom: &RomDefinition,
    device: &str,
    work_dir: &Path,
) -> Result<PathBuf> {
    let url = require_manifest_url(rom, device)?;
    let dir = local_manifests_dir(work_dir);
    let target = dir.join(DEVICE_MANIFEST_FILE);

    ctx.log(&format!("Adding device manifest for {device}..."));
    if ctx.dry_run {
        ctx.log(&format!("DRY-RUN: would fetch {url} -> {}", target.display()));
        return Ok(target);
    }

    clear_overlay_dir(&dir)?;
    let body = fetcher.fetch(&url).map_err(|e| {
        Error::new(
            ErrorKind::ManifestFetchFailure,
            format!("failed to download device manifest {url}: {e}"),
        )
    })?;
    fs::write(&target, body)
        .map_err(|e| Error::msg(format!("failed to write {}: {e}", target.display())))?;
    ctx.log(&format!("Device manifest written to {}", target.display()));
    Ok(target)
}

fn clear_overlay_dir(dir: &Path) -> Result<()> {
    if dir.exists() {
        fs::remove_dir_all(dir)
            .map_err(|e| Error::msg(format!("failed to clear {}: {e}", dir.display())))?;
    }
    ensure_dir(dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry;

    #[test]
    fn url_table_covers_three_pairs() {
        let axion = registry::lookup("axion").expect("axion");
        let lmo = registry::lookup("lmodroid").expect("lmodroid");
        assert!(
            manifest_url(axion, "pipa")
                .expect("axion/pipa")
                .ends_with("/axion-pipa-qpr2.xml")
        );
        assert!(
            manifest_url(axion, "raven")
                .expect("axion/raven")
                .ends_with("/axion-raven-qpr2.xml")
        );
        assert!(
            manifest_url(lmo, "pipa")
                .expect("lmodroid/pipa")
                .ends_with("/lmov-pipa.xml")
        );
        assert!(manifest_url(lmo, "raven").is_none());
    }

    #[test]
    fn lmodroid_raven_is_unsupported() {
        let lmo = registry::lookup("lmodroid").expect("lmodroid");
        let err = require_manifest_url(lmo, "raven").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedDeviceCombo);
    }
}
