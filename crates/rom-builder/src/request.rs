use std::fmt;
use std::path::PathBuf;

use clap::ValueEnum;

use crate::error::{Error, ErrorKind, Result};
use crate::registry::{self, RomDefinition};

/// Variant selector as requested on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Variant {
    Vanilla,
    Gms,
    Both,
}

impl Variant {
    /// Concrete flavors to build, in build order.
    pub fn flavors(self) -> Vec<Flavor> {
        match self {
            Variant::Vanilla => vec![Flavor::Vanilla],
            Variant::Gms => vec![Flavor::Gms],
            Variant::Both => vec![Flavor::Vanilla, Flavor::Gms],
        }
    }

    pub fn parse(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "vanilla" => Ok(Variant::Vanilla),
            "gms" => Ok(Variant::Gms),
            "both" => Ok(Variant::Both),
            other => Err(Error::msg(format!(
                "invalid variant '{other}'; valid options are: vanilla, gms, both"
            ))),
        }
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Variant::Vanilla => "vanilla",
            Variant::Gms => "gms",
            Variant::Both => "both",
        })
    }
}

/// A concrete build flavor. `Variant::Both` never reaches past the sequencer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flavor {
    Vanilla,
    Gms,
}

impl Flavor {
    pub fn as_str(self) -> &'static str {
        match self {
            Flavor::Vanilla => "vanilla",
            Flavor::Gms => "gms",
        }
    }

    pub fn upper(self) -> &'static str {
        match self {
            Flavor::Vanilla => "VANILLA",
            Flavor::Gms => "GMS",
        }
    }
}

impl fmt::Display for Flavor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct BuildRequest {
    pub rom: &'static RomDefinition,
    pub device: String,
    pub variant: Variant,
    pub skip_sync: bool,
    pub clean: bool,
    pub fastboot: bool,
}

impl BuildRequest {
    /// Validates the ROM id and the device against the registry.
    pub fn new(rom_id: &str, device: &str, variant: Variant) -> Result<Self> {
        let rom = registry::lookup(rom_id)?;
        let device = device.trim();
        if !rom.supports_device(device) {
            return Err(Error::new(
                ErrorKind::UnsupportedDeviceCombo,
                format!(
                    "invalid device '{}' for {}; valid options are: {}",
                    device,
                    rom.id,
                    rom.devices.join(", ")
                ),
            ));
        }
        Ok(Self {
            rom,
            device: device.to_string(),
            variant,
            skip_sync: false,
            clean: true,
            fastboot: false,
        })
    }
}

/// One configure + build + publish pass.
#[derive(Debug, Clone)]
pub struct BuildAttempt {
    pub rom: &'static RomDefinition,
    pub device: String,
    pub flavor: Flavor,
    pub fastboot: bool,
    pub clean: bool,
    pub output_dir: PathBuf,
    pub success: bool,
}

impl BuildAttempt {
    pub fn id(&self) -> String {
        let mut id = format!("{}/{}/{}", self.rom.id, self.device, self.flavor);
        if self.fastboot {
            id.push_str("+fastboot");
        }
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn both_expands_vanilla_first() {
        assert_eq!(Variant::Both.flavors(), vec![Flavor::Vanilla, Flavor::Gms]);
        assert_eq!(Variant::Gms.flavors(), vec![Flavor::Gms]);
    }

    #[test]
    fn request_rejects_unknown_device() {
        let err = BuildRequest::new("axion", "cheetah", Variant::Vanilla).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedDeviceCombo);
    }

    #[test]
    fn request_defaults_to_clean_non_fastboot() {
        let req = BuildRequest::new("lmodroid", "pipa", Variant::Vanilla).expect("request");
        assert!(req.clean);
        assert!(!req.fastboot);
        assert!(!req.skip_sync);
        assert_eq!(req.rom.id, "lmodroid");
    }

    #[test]
    fn parse_variant_is_case_insensitive() {
        assert_eq!(Variant::parse("GMS").expect("gms"), Variant::Gms);
        assert!(Variant::parse("pixel").is_err());
    }
}
