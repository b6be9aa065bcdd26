use std::path::Path;

use crate::error::{Error, ErrorKind, Result};
use crate::executor::ExecCtx;
use crate::registry::{RomDefinition, RomKind};
use crate::request::Flavor;
use crate::toolchain::{BuildToolchain, SetupCommand};

/// Select the device and flavor in the build environment. Returns the
/// selection command that took effect.
///
/// Axion has one selection path and any failure is fatal. LMODroid tries
/// `lunch` first and falls back to `breakfast`; either succeeding is enough.
pub fn configure(
    ctx: &ExecCtx,
    toolchain: &mut dyn BuildToolchain,
    work_dir: &Path,
    rom: &RomDefinition,
    device: &str,
    flavor: Flavor,
) -> Result<SetupCommand> {
    ctx.log(&format!(
        "Setting up device: {device} with variant: {flavor}"
    ));
    match rom.kind {
        RomKind::Axion => {
            match flavor {
                Flavor::Gms => ctx.log("Configuring build for GMS support"),
                Flavor::Vanilla => ctx.log("Configuring build for vanilla version (no GMS)"),
            }
            let cmd = SetupCommand::Axion {
                device: device.to_string(),
                flavor,
            };
            toolchain.configure(ctx, work_dir, &cmd).map_err(|e| {
                Error::new(
                    ErrorKind::ConfigFailure,
                    format!("'{cmd}' failed: {e}"),
                )
            })?;
            Ok(cmd)
        }
        RomKind::Lmodroid => {
            let primary = SetupCommand::Lunch {
                combo: format!("lmodroid_{device}-userdebug"),
            };
            let primary_err = match toolchain.configure(ctx, work_dir, &primary) {
                Ok(()) => return Ok(primary),
                Err(e) => e,
            };
            ctx.warn(&format!("'{primary}' failed ({primary_err}); trying breakfast"));

            let fallback = SetupCommand::Breakfast {
                device: device.to_string(),
            };
            toolchain.configure(ctx, work_dir, &fallback).map_err(|e| {
                Error::new(
                    ErrorKind::ConfigFailure,
                    format!("'{primary}' and '{fallback}' both failed: {e}"),
                )
            })?;
            Ok(fallback)
        }
    }
}
