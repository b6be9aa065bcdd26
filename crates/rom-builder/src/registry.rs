//! Static table of the ROMs this tool knows how to build.

use crate::error::{Error, ErrorKind, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RomKind {
    Axion,
    Lmodroid,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RomDefinition {
    pub id: &'static str,
    pub kind: RomKind,
    pub display_name: &'static str,
    /// Directory name of the source tree, relative to the workspace root.
    pub work_dir: &'static str,
    pub manifest_url: &'static str,
    pub manifest_branch: &'static str,
    /// Devices the ROM nominally supports. Whether a device manifest exists
    /// for the pair is decided by the manifest table, not here.
    pub devices: &'static [&'static str],
}

impl RomDefinition {
    pub fn supports_device(&self, device: &str) -> bool {
        self.devices.iter().any(|d| *d == device)
    }

    /// File-name prefix of the flashable packages the ROM's build emits.
    pub fn package_prefix(&self) -> String {
        format!("{}-", self.id)
    }
}

static ROMS: [RomDefinition; 2] = [
    RomDefinition {
        id: "axion",
        kind: RomKind::Axion,
        display_name: "Axion AOSP",
        work_dir: "ax",
        manifest_url: "https://github.com/AxionAOSP/android.git",
        manifest_branch: "lineage-22.2",
        devices: &["pipa", "raven"],
    },
    RomDefinition {
        id: "lmodroid",
        kind: RomKind::Lmodroid,
        display_name: "LMODroid",
        work_dir: "lmo",
        manifest_url: "https://git.libremobileos.com/LMODroid/manifest.git",
        manifest_branch: "fifteen",
        devices: &["pipa", "raven"],
    },
];

pub fn lookup(id: &str) -> Result<&'static RomDefinition> {
    let id = id.trim();
    ROMS.iter().find(|r| r.id == id).ok_or_else(|| {
        Error::new(
            ErrorKind::UnknownRom,
            format!(
                "invalid ROM '{}'; valid options are: {}",
                id,
                known_ids().join(", ")
            ),
        )
    })
}

pub fn known_ids() -> Vec<&'static str> {
    ROMS.iter().map(|r| r.id).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_known_roms() {
        let axion = lookup("axion").expect("axion");
        assert_eq!(axion.kind, RomKind::Axion);
        assert_eq!(axion.work_dir, "ax");
        assert_eq!(axion.manifest_branch, "lineage-22.2");

        let lmo = lookup("lmodroid").expect("lmodroid");
        assert_eq!(lmo.display_name, "LMODroid");
        assert!(lmo.supports_device("raven"));
        assert!(!lmo.supports_device("cheetah"));
    }

    #[test]
    fn unknown_rom_is_rejected() {
        let err = lookup("evolution").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownRom);
        assert!(err.to_string().contains("axion, lmodroid"), "{err}");
    }
}
