//! Locating build outputs and publishing them into the release directory.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use sha2::{Digest, Sha256};
use walkdir::WalkDir;

use crate::error::{Error, ErrorKind, Result};
use crate::executor::ExecCtx;
use crate::orchestrator::BOOT_IMAGE;
use crate::registry::{RomDefinition, RomKind};
use crate::request::Flavor;
use crate::workspace::ensure_dir;

pub const OPTIONAL_BOOT_IMAGES: [&str; 2] = ["dtbo.img", "vendor_boot.img"];

/// Partition images bundled by the manual fastboot fallback, when present.
pub const FASTBOOT_IMAGES: [&str; 7] = [
    "boot",
    "dtbo",
    "vendor_boot",
    "system",
    "vendor",
    "product",
    "system_ext",
];

pub const FASTBOOT_IMAGES_DIR: &str = "IMAGES";

const UPDATE_GLOB: &str = "*update*.zip";
const IMAGE_GLOB: &str = "*img*.zip";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseNaming {
    /// `YYYYMMDD` stamp used in generated file names.
    pub date: String,
}

impl ReleaseNaming {
    pub fn today() -> Self {
        Self::new(chrono::Local::now().format("%Y%m%d").to_string())
    }

    pub fn new(date: impl Into<String>) -> Self {
        Self { date: date.into() }
    }

    /// LMODroid names carry no flavor.
    pub fn fastboot_package_name(&self, rom: &RomDefinition, device: &str, flavor: Flavor) -> String {
        match rom.kind {
            RomKind::Axion => format!(
                "{}-{}-{}-{}-FASTBOOT.zip",
                rom.id,
                self.date,
                flavor.upper(),
                device
            ),
            RomKind::Lmodroid => format!("{}-{}-{}-FASTBOOT.zip", rom.id, self.date, device),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResolveOptions {
    pub naming: ReleaseNaming,
    pub manual_fastboot_fallback: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    RomPackage,
    BootImage,
    DtboImage,
    VendorBootImage,
    OtaConfig,
    FastbootPackage,
}

#[derive(Debug, Clone)]
pub struct PublishedArtifact {
    pub kind: ArtifactKind,
    pub path: PathBuf,
    pub sha256: String,
}

/// Everything one successful attempt published. Paths point into the
/// release directory.
#[derive(Debug, Clone, Default)]
pub struct ArtifactSet {
    /// ROM packages, newest first.
    pub packages: Vec<PathBuf>,
    pub boot: Option<PathBuf>,
    pub dtbo: Option<PathBuf>,
    pub vendor_boot: Option<PathBuf>,
    pub ota_config: Option<PathBuf>,
    pub fastboot_package: Option<PathBuf>,
    pub published: Vec<PublishedArtifact>,
}

impl ArtifactSet {
    pub fn is_empty(&self) -> bool {
        self.published.is_empty()
    }

    fn record(&mut self, artifact: PublishedArtifact) {
        let path = artifact.path.clone();
        match artifact.kind {
            ArtifactKind::RomPackage => self.packages.push(path),
            ArtifactKind::BootImage => self.boot = Some(path),
            ArtifactKind::DtboImage => self.dtbo = Some(path),
            ArtifactKind::VendorBootImage => self.vendor_boot = Some(path),
            ArtifactKind::OtaConfig => self.ota_config = Some(path),
            ArtifactKind::FastbootPackage => self.fastboot_package = Some(path),
        }
        self.published.push(artifact);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchTier {
    Conventional,
    UpdateGlob,
    ImageGlob,
}

/// Resolve and publish the outputs of a finished build.
#[allow(clippy::too_many_arguments)]
pub fn resolve(
    ctx: &ExecCtx,
    output_dir: &Path,
    rom: &RomDefinition,
    device: &str,
    flavor: Flavor,
    fastboot: bool,
    release_dir: &Path,
    opts: &ResolveOptions,
) -> Result<ArtifactSet> {
    ctx.log(&format!("Copying build files to {}", release_dir.display()));
    if ctx.dry_run {
        ctx.log("DRY-RUN: skipped artifact publishing");
        return Ok(ArtifactSet::default());
    }
    ensure_dir(release_dir)?;

    let mut publisher = Publisher::new(release_dir)?;
    if fastboot {
        stage_fastboot(ctx, &mut publisher, output_dir, rom, device, flavor, opts)?;
    } else {
        stage_standard(ctx, &mut publisher, output_dir, rom, device, flavor)?;
    }
    let set = publisher.commit(ctx)?;
    ctx.log(&format!("Build files copied to: {}", release_dir.display()));
    Ok(set)
}

fn stage_standard(
    ctx: &ExecCtx,
    publisher: &mut Publisher,
    output_dir: &Path,
    rom: &RomDefinition,
    device: &str,
    flavor: Flavor,
) -> Result<()> {
    let packages = find_rom_packages(output_dir, rom)?;
    if packages.is_empty() {
        ctx.warn(&format!(
            "no {}*.zip package found in {}",
            rom.package_prefix(),
            output_dir.display()
        ));
    }
    for pkg in &packages {
        publisher.stage_copy(ArtifactKind::RomPackage, pkg, &file_name(pkg)?)?;
    }

    let boot = output_dir.join(BOOT_IMAGE);
    if !boot.is_file() {
        return Err(Error::new(
            ErrorKind::BuildFailure,
            format!("missing {}", boot.display()),
        ));
    }
    publisher.stage_copy(ArtifactKind::BootImage, &boot, BOOT_IMAGE)?;

    for (name, kind) in OPTIONAL_BOOT_IMAGES
        .iter()
        .zip([ArtifactKind::DtboImage, ArtifactKind::VendorBootImage])
    {
        let img = output_dir.join(name);
        if img.is_file() {
            publisher.stage_copy(kind, &img, name)?;
        }
    }

    if rom.kind == RomKind::Axion {
        let json = output_dir
            .join(flavor.upper())
            .join(format!("{device}.json"));
        if json.is_file() {
            check_ota_json(ctx, &json);
            publisher.stage_copy(
                ArtifactKind::OtaConfig,
                &json,
                &format!("{device}-{flavor}.json"),
            )?;
            ctx.log(&format!("Copied {} OTA config json", flavor.upper()));
        }
    }
    Ok(())
}

fn stage_fastboot(
    ctx: &ExecCtx,
    publisher: &mut Publisher,
    output_dir: &Path,
    rom: &RomDefinition,
    device: &str,
    flavor: Flavor,
    opts: &ResolveOptions,
) -> Result<()> {
    let target_name = opts.naming.fastboot_package_name(rom, device, flavor);

    if let Some((found, tier)) = locate_fastboot_package(output_dir, rom, device)? {
        ctx.log(&format!(
            "Found fastboot package via {tier:?} search: {}",
            found.display()
        ));
        publisher.stage_copy(ArtifactKind::FastbootPackage, &found, &target_name)?;
        ctx.log("Copied fastboot image package");
        return Ok(());
    }

    if !opts.manual_fastboot_fallback {
        return Err(Error::new(
            ErrorKind::ArtifactNotFound,
            format!(
                "no fastboot package found in {} and manual packaging is disabled",
                output_dir.display()
            ),
        ));
    }

    ctx.warn("No fastboot package found; creating one from the built images");
    let archive = publisher.staging_path(&target_name);
    let bundled = build_manual_package(output_dir, publisher.scratch_dir(), &archive)?;
    if !bundled.iter().any(|n| n == BOOT_IMAGE) {
        ctx.warn("manual fastboot package has no boot.img");
    }
    ctx.log(&format!("Bundled images: {}", bundled.join(", ")));
    publisher.add_staged(ArtifactKind::FastbootPackage, &target_name);
    Ok(())
}

pub fn conventional_fastboot_names(rom: &RomDefinition, device: &str) -> Vec<String> {
    match rom.kind {
        RomKind::Axion => vec![
            format!("lineage_{device}-img.zip"),
            format!("axion_{device}-img.zip"),
        ],
        RomKind::Lmodroid => vec![
            format!("lmodroid_{device}-img.zip"),
            format!("lineage_{device}-img.zip"),
        ],
    }
}

/// Search the output directory in priority order: conventional names,
/// then `*update*.zip`, then `*img*.zip`. First hit wins.
pub fn locate_fastboot_package(
    output_dir: &Path,
    rom: &RomDefinition,
    device: &str,
) -> Result<Option<(PathBuf, SearchTier)>> {
    for name in conventional_fastboot_names(rom, device) {
        let p = output_dir.join(name);
        if p.is_file() {
            return Ok(Some((p, SearchTier::Conventional)));
        }
    }
    if !output_dir.is_dir() {
        return Ok(None);
    }

    let candidates = scan_zip_candidates(output_dir)?;
    for (glob, tier) in [
        (UPDATE_GLOB, SearchTier::UpdateGlob),
        (IMAGE_GLOB, SearchTier::ImageGlob),
    ] {
        let pattern = glob_pattern(glob)?;
        if let Some(hit) = candidates
            .iter()
            .find(|p| p.file_name().and_then(|n| n.to_str()).is_some_and(|n| pattern.matches(n)))
        {
            return Ok(Some((hit.clone(), tier)));
        }
    }
    Ok(None)
}

fn scan_zip_candidates(output_dir: &Path) -> Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    for entry in WalkDir::new(output_dir)
        .min_depth(1)
        .max_depth(2)
        .sort_by_file_name()
    {
        let entry = entry?;
        if entry.file_type().is_file() {
            out.push(entry.into_path());
        }
    }
    Ok(out)
}

/// ROM packages directly inside `output_dir`, newest first.
pub fn find_rom_packages(output_dir: &Path, rom: &RomDefinition) -> Result<Vec<PathBuf>> {
    if !output_dir.is_dir() {
        return Ok(Vec::new());
    }
    let pattern = glob_pattern(&format!("{}*.zip", rom.package_prefix()))?;
    let entries = fs::read_dir(output_dir)
        .map_err(|e| Error::msg(format!("failed to read {}: {e}", output_dir.display())))?;

    let mut found = Vec::<(SystemTime, String, PathBuf)>::new();
    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
            continue;
        };
        if !path.is_file() || !pattern.matches(&name) {
            continue;
        }
        let modified = entry
            .metadata()
            .and_then(|m| m.modified())
            .unwrap_or(SystemTime::UNIX_EPOCH);
        found.push((modified, name, path));
    }
    found.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
    Ok(found.into_iter().map(|(_, _, p)| p).collect())
}

/// Copy whichever partition images exist into `IMAGES/` under a scratch
/// directory and zip that tree into `archive`. Missing images are skipped;
/// the archive is written even when none exist. Returns the bundled names.
pub fn build_manual_package(
    output_dir: &Path,
    scratch: &Path,
    archive: &Path,
) -> Result<Vec<String>> {
    let root = scratch.join("manual-fastboot");
    if root.exists() {
        fs::remove_dir_all(&root)?;
    }
    let images_dir = root.join(FASTBOOT_IMAGES_DIR);
    ensure_dir(&images_dir)?;

    let mut bundled = Vec::new();
    for part in FASTBOOT_IMAGES {
        let name = format!("{part}.img");
        let src = output_dir.join(&name);
        if src.is_file() {
            copy_file(&src, &images_dir.join(&name))?;
            bundled.push(name);
        }
    }

    write_zip(&root, archive)?;
    Ok(bundled)
}

fn write_zip(root: &Path, archive: &Path) -> Result<()> {
    let file = fs::File::create(archive)
        .map_err(|e| Error::msg(format!("failed to create {}: {e}", archive.display())))?;
    let mut zw = zip::ZipWriter::new(file);
    let opts = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated)
        .large_file(true);

    for entry in WalkDir::new(root).min_depth(1).sort_by_file_name() {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(root)
            .map_err(|e| Error::msg(format!("strip_prefix failed: {e}")))?;
        let name = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        zw.start_file(name, opts)?;
        let mut src = fs::File::open(entry.path())?;
        io::copy(&mut src, &mut zw)?;
    }
    zw.finish()?;
    Ok(())
}

fn check_ota_json(ctx: &ExecCtx, path: &Path) {
    let parsed = fs::read(path)
        .map_err(|e| e.to_string())
        .and_then(|b| serde_json::from_slice::<serde_json::Value>(&b).map_err(|e| e.to_string()));
    if let Err(e) = parsed {
        ctx.warn(&format!("OTA config {} is not valid JSON: {e}", path.display()));
    }
}

fn glob_pattern(pattern: &str) -> Result<glob::Pattern> {
    glob::Pattern::new(pattern).map_err(|e| Error::msg(format!("invalid glob '{pattern}': {e}")))
}

fn file_name(p: &Path) -> Result<String> {
    p.file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
        .ok_or_else(|| Error::msg(format!("invalid file name: {}", p.display())))
}

fn copy_file(src: &Path, dst: &Path) -> Result<()> {
    tracing::debug!(src = %src.display(), dst = %dst.display(), "copy");
    fs::copy(src, dst).map_err(|e| {
        Error::msg(format!(
            "failed to copy {} -> {}: {e}",
            src.display(),
            dst.display()
        ))
    })?;
    Ok(())
}

fn sha256_file_hex(path: &Path) -> Result<String> {
    let mut f = fs::File::open(path)
        .map_err(|e| Error::msg(format!("failed to open {}: {e}", path.display())))?;
    let mut hasher = Sha256::new();
    io::copy(&mut f, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}

/// Stages files in a hidden directory inside the release directory and
/// moves them into place only on `commit`. Dropping an uncommitted
/// publisher discards everything staged.
struct Publisher {
    release_dir: PathBuf,
    staging: tempfile::TempDir,
    scratch: tempfile::TempDir,
    staged: Vec<(ArtifactKind, String, Option<PathBuf>)>,
}

impl Publisher {
    fn new(release_dir: &Path) -> Result<Self> {
        let mk = |prefix: &str| {
            tempfile::Builder::new()
                .prefix(prefix)
                .tempdir_in(release_dir)
                .map_err(|e| {
                    Error::msg(format!(
                        "failed to create staging dir in {}: {e}",
                        release_dir.display()
                    ))
                })
        };
        Ok(Self {
            release_dir: release_dir.to_path_buf(),
            staging: mk(".publish-")?,
            scratch: mk(".scratch-")?,
            staged: Vec::new(),
        })
    }

    fn staging_path(&self, name: &str) -> PathBuf {
        self.staging.path().join(name)
    }

    fn scratch_dir(&self) -> &Path {
        self.scratch.path()
    }

    fn stage_copy(&mut self, kind: ArtifactKind, src: &Path, name: &str) -> Result<()> {
        copy_file(src, &self.staging_path(name))?;
        self.staged
            .push((kind, name.to_string(), Some(src.to_path_buf())));
        Ok(())
    }

    fn add_staged(&mut self, kind: ArtifactKind, name: &str) {
        self.staged.push((kind, name.to_string(), None));
    }

    /// Hash everything and check every destination before the first move.
    /// If a move still fails, the files already placed are moved back and
    /// any release files they replaced are restored.
    fn commit(self, ctx: &ExecCtx) -> Result<ArtifactSet> {
        let mut ready = Vec::with_capacity(self.staged.len());
        for (kind, name, src) in &self.staged {
            let dest = self.release_dir.join(name);
            if dest.is_dir() {
                return Err(Error::msg(format!(
                    "cannot publish {}: a directory is in the way",
                    dest.display()
                )));
            }
            let staged = self.staging_path(name);
            let sha256 = sha256_file_hex(&staged)?;
            ready.push((*kind, staged, dest, src, sha256));
        }

        let replaced = self.scratch.path().join("replaced");
        ensure_dir(&replaced)?;
        let mut placed = Vec::with_capacity(ready.len());
        for (i, (_, staged, dest, _, _)) in ready.iter().enumerate() {
            match place(staged, dest, replaced.join(i.to_string())) {
                Ok(p) => placed.push(p),
                Err(e) => {
                    roll_back(&placed);
                    return Err(e);
                }
            }
        }

        let mut set = ArtifactSet::default();
        for (kind, _, dest, src, sha256) in ready {
            match src {
                Some(s) => ctx.log(&format!("'{}' -> '{}'", s.display(), dest.display())),
                None => ctx.log(&format!("created '{}'", dest.display())),
            }
            ctx.log(&format!("  sha256 {sha256}"));
            set.record(PublishedArtifact {
                kind,
                path: dest,
                sha256,
            });
        }
        Ok(set)
    }
}

/// A staged file moved into the release directory, with the path the
/// release file it replaced was parked at.
struct Placed {
    staged: PathBuf,
    dest: PathBuf,
    previous: Option<PathBuf>,
}

fn place(staged: &Path, dest: &Path, park: PathBuf) -> Result<Placed> {
    let previous = if dest.symlink_metadata().is_ok() {
        fs::rename(dest, &park).map_err(|e| {
            Error::msg(format!(
                "failed to set aside {}: {e}",
                dest.display()
            ))
        })?;
        Some(park)
    } else {
        None
    };
    if let Err(e) = fs::rename(staged, dest) {
        if let Some(prev) = &previous {
            let _ = fs::rename(prev, dest);
        }
        return Err(Error::msg(format!(
            "failed to move {} -> {}: {e}",
            staged.display(),
            dest.display()
        )));
    }
    Ok(Placed {
        staged: staged.to_path_buf(),
        dest: dest.to_path_buf(),
        previous,
    })
}

fn roll_back(placed: &[Placed]) {
    for p in placed.iter().rev() {
        if let Err(e) = fs::rename(&p.dest, &p.staged) {
            tracing::warn!(path = %p.dest.display(), error = %e, "rollback failed");
            continue;
        }
        if let Some(prev) = &p.previous {
            let _ = fs::rename(prev, &p.dest);
        }
    }
}
