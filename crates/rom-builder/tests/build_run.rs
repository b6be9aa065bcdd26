use std::cell::RefCell;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, mpsc};

use rom_builder::artifacts::{self, ReleaseNaming, ResolveOptions};
use rom_builder::executor::{ChannelSink, ExecCtx, ExecEvent};
use rom_builder::manifest::ManifestFetcher;
use rom_builder::orchestrator;
use rom_builder::registry::{self, RomDefinition};
use rom_builder::request::{BuildAttempt, BuildRequest, Flavor, Variant};
use rom_builder::sequencer::{self, RunSettings};
use rom_builder::toolchain::{BuildTarget, BuildToolchain, CleanStep, SetupCommand, SyncScope};
use rom_builder::workspace::{self, WorkspaceConfig, WorkspacePaths};
use rom_builder::{Error, ErrorKind, Result};

fn ctx_with_events() -> (ExecCtx, mpsc::Receiver<ExecEvent>) {
    let (tx, rx) = mpsc::channel();
    (ExecCtx::new(false, Arc::new(ChannelSink::new(tx))), rx)
}

fn settings() -> RunSettings {
    RunSettings {
        sync_jobs: 4,
        build_jobs: 4,
        resolve: ResolveOptions {
            naming: ReleaseNaming::new("20250101"),
            manual_fastboot_fallback: true,
        },
    }
}

fn touch(p: &Path, body: &[u8]) {
    fs::create_dir_all(p.parent().expect("parent")).expect("mkdir");
    fs::write(p, body).expect("write");
}

fn release_entries(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .expect("read release dir")
        .map(|e| e.expect("entry").file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

struct StaticFetcher;

impl ManifestFetcher for StaticFetcher {
    fn fetch(&self, _url: &str) -> Result<Vec<u8>> {
        Ok(b"<manifest/>".to_vec())
    }
}

/// Stands in for a source tree: records every command and drops the
/// configured outputs into the product directory on each build.
struct FakeTree {
    output_dir: PathBuf,
    calls: RefCell<Vec<String>>,
    regular_outputs: Vec<(&'static str, &'static str)>,
    fastboot_outputs: Vec<(&'static str, &'static str)>,
    failing_setup: Vec<String>,
    /// Builds (by 0-based index) that produce nothing.
    empty_builds: Vec<usize>,
    builds: usize,
}

impl FakeTree {
    fn new(output_dir: PathBuf) -> Self {
        Self {
            output_dir,
            calls: RefCell::new(Vec::new()),
            regular_outputs: vec![("boot.img", "boot")],
            fastboot_outputs: Vec::new(),
            failing_setup: Vec::new(),
            empty_builds: Vec::new(),
            builds: 0,
        }
    }

    fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }
}

impl BuildToolchain for FakeTree {
    fn repo_init(&mut self, _ctx: &ExecCtx, work_dir: &Path, rom: &RomDefinition) -> Result<()> {
        self.calls.borrow_mut().push(format!("repo init {}", rom.id));
        touch(&work_dir.join("build/envsetup.sh"), b"# envsetup\n");
        Ok(())
    }

    fn repo_sync(&mut self, _ctx: &ExecCtx, _work_dir: &Path, scope: SyncScope, _jobs: usize) -> Result<()> {
        self.calls.borrow_mut().push(format!("repo sync {scope:?}"));
        Ok(())
    }

    fn configure(&mut self, _ctx: &ExecCtx, _work_dir: &Path, cmd: &SetupCommand) -> Result<()> {
        let shown = cmd.to_string();
        self.calls.borrow_mut().push(shown.clone());
        if self.failing_setup.contains(&shown) {
            return Err(Error::msg(format!("{shown}: no such product")));
        }
        Ok(())
    }

    fn clean(&mut self, _ctx: &ExecCtx, _work_dir: &Path, step: CleanStep) -> Result<()> {
        self.calls.borrow_mut().push(step.to_string());
        if self.output_dir.exists() {
            fs::remove_dir_all(&self.output_dir).expect("clean out");
        }
        Ok(())
    }

    fn build(&mut self, _ctx: &ExecCtx, _work_dir: &Path, target: &BuildTarget, fastboot: bool) -> Result<()> {
        self.calls.borrow_mut().push(target.to_string());
        let index = self.builds;
        self.builds += 1;
        if self.empty_builds.contains(&index) {
            return Ok(());
        }
        let mut outputs = self.regular_outputs.clone();
        if fastboot {
            outputs.extend(self.fastboot_outputs.iter().copied());
        }
        for (name, body) in outputs {
            touch(&self.output_dir.join(name), body.as_bytes());
        }
        Ok(())
    }
}

fn paths_for(root: &Path, request: &BuildRequest) -> WorkspacePaths {
    workspace::resolve(&WorkspaceConfig::default(), Some(root), request.rom, &request.device)
        .expect("paths")
}

#[test]
fn build_without_boot_image_fails_even_when_the_toolchain_succeeds() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let output_dir = tmp.path().join("out/target/product/pipa");
    let mut tree = FakeTree::new(output_dir.clone());
    tree.regular_outputs = vec![("axion-1.0-pipa.zip", "zip")];

    let attempt = BuildAttempt {
        rom: registry::lookup("axion").expect("axion"),
        device: "pipa".into(),
        flavor: Flavor::Gms,
        fastboot: false,
        clean: false,
        output_dir,
        success: false,
    };
    let (ctx, _rx) = ctx_with_events();
    let err = orchestrator::build(&ctx, &mut tree, tmp.path(), &attempt, 4).unwrap_err();

    assert_eq!(err.kind(), ErrorKind::BuildFailure);
    assert_eq!(tree.calls(), vec!["m installclean", "brunch pipa"]);
}

#[test]
fn both_flavors_with_fastboot_run_four_attempts_in_order() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let mut request = BuildRequest::new("axion", "pipa", Variant::Both).expect("request");
    request.fastboot = true;
    let paths = paths_for(tmp.path(), &request);

    let mut tree = FakeTree::new(paths.output_dir("pipa"));
    tree.fastboot_outputs = vec![
        ("lineage_pipa-img.zip", "conventional"),
        ("pipa-updatepackage.zip", "update"),
    ];
    let (mut ctx, rx) = ctx_with_events();
    let report = sequencer::run(&mut ctx, &mut tree, &request, &paths, &settings());

    let ids: Vec<String> = report.outcomes.iter().map(|o| o.attempt.id()).collect();
    assert_eq!(
        ids,
        vec![
            "axion/pipa/vanilla",
            "axion/pipa/vanilla+fastboot",
            "axion/pipa/gms",
            "axion/pipa/gms+fastboot",
        ]
    );
    assert!(!report.any_failed(), "failure: {:?}", report.first_failure());

    assert_eq!(
        tree.calls(),
        vec![
            "axion pipa va",
            "m clean",
            "brunch pipa",
            "axion pipa va",
            "m clean",
            "axion pipa va",
            "m updatepackage -j4",
            "axion pipa gms",
            "m clean",
            "brunch pipa",
            "axion pipa gms",
            "m clean",
            "axion pipa gms",
            "m updatepackage -j4",
        ]
    );

    let started: Vec<String> = rx
        .try_iter()
        .filter_map(|ev| match ev {
            ExecEvent::AttemptStarted { id } => Some(id),
            _ => None,
        })
        .collect();
    assert_eq!(started, ids);

    for flavor in ["VANILLA", "GMS"] {
        let pkg = paths
            .release_dir
            .join(format!("axion-20250101-{flavor}-pipa-FASTBOOT.zip"));
        assert_eq!(fs::read(&pkg).expect("fastboot package"), b"conventional");
    }
}

#[test]
fn manual_fallback_bundles_only_existing_images() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let out = tmp.path().join("out");
    let release = tmp.path().join("release");
    touch(&out.join("boot.img"), b"boot");
    touch(&out.join("system.img"), b"system");
    touch(&out.join("userdata.img"), b"userdata");

    let (ctx, _rx) = ctx_with_events();
    let rom = registry::lookup("lmodroid").expect("lmodroid");
    let set = artifacts::resolve(
        &ctx,
        &out,
        rom,
        "pipa",
        Flavor::Vanilla,
        true,
        &release,
        &settings().resolve,
    )
    .expect("resolve");

    let pkg = release.join("lmodroid-20250101-pipa-FASTBOOT.zip");
    assert_eq!(set.fastboot_package.as_deref(), Some(pkg.as_path()));
    assert_eq!(release_entries(&release), vec!["lmodroid-20250101-pipa-FASTBOOT.zip"]);

    let mut archive = zip::ZipArchive::new(fs::File::open(&pkg).expect("open zip")).expect("zip");
    let mut names: Vec<String> = archive.file_names().map(str::to_string).collect();
    names.sort();
    assert_eq!(names, vec!["IMAGES/boot.img", "IMAGES/system.img"]);
    let mut boot = String::new();
    std::io::Read::read_to_string(&mut archive.by_name("IMAGES/boot.img").expect("entry"), &mut boot)
        .expect("read entry");
    assert_eq!(boot, "boot");
}

#[test]
fn full_run_publishes_standard_artifacts() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let request = BuildRequest::new("axion", "pipa", Variant::Vanilla).expect("request");
    let paths = paths_for(tmp.path(), &request);

    let mut tree = FakeTree::new(paths.output_dir("pipa"));
    tree.regular_outputs = vec![
        ("boot.img", "boot"),
        ("dtbo.img", "dtbo"),
        ("axion-test-pipa.zip", "rom"),
        ("lineage_pipa-img.zip", "not requested"),
    ];
    let (mut ctx, rx) = ctx_with_events();
    let report = sequencer::execute(&mut ctx, &mut tree, &StaticFetcher, &request, &paths, &settings())
        .expect("execute");

    assert!(!report.any_failed(), "failure: {:?}", report.first_failure());
    assert_eq!(
        tree.calls(),
        vec![
            "repo init axion",
            "repo sync Full",
            "axion pipa va",
            "m clean",
            "brunch pipa",
        ]
    );
    assert_eq!(
        release_entries(&paths.release_dir),
        vec!["axion-test-pipa.zip", "boot.img", "dtbo.img"]
    );

    let set = report.outcomes[0].result.as_ref().expect("artifacts");
    assert_eq!(set.packages, vec![paths.release_dir.join("axion-test-pipa.zip")]);
    assert!(set.fastboot_package.is_none());

    let done = rx.try_iter().find_map(|ev| match ev {
        ExecEvent::RunDone { ok, .. } => Some(ok),
        _ => None,
    });
    assert_eq!(done, Some(true));
}

#[test]
fn lmodroid_falls_back_to_breakfast_and_keeps_going_after_a_failure() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let request = BuildRequest::new("lmodroid", "pipa", Variant::Both).expect("request");
    let paths = paths_for(tmp.path(), &request);

    let mut tree = FakeTree::new(paths.output_dir("pipa"));
    tree.failing_setup = vec!["lunch lmodroid_pipa-userdebug".into()];
    tree.regular_outputs = vec![("boot.img", "boot"), ("lmodroid-6.0-pipa.zip", "rom")];
    tree.empty_builds = vec![0];

    let (mut ctx, _rx) = ctx_with_events();
    let report = sequencer::run(&mut ctx, &mut tree, &request, &paths, &settings());

    assert_eq!(report.outcomes.len(), 2);
    let first = report.outcomes[0].result.as_ref().unwrap_err();
    assert_eq!(first.kind(), ErrorKind::BuildFailure);
    assert!(!report.outcomes[0].attempt.success);
    assert!(report.outcomes[1].result.is_ok());
    assert!(report.outcomes[1].attempt.success);
    assert!(report.any_failed());
    assert_eq!(
        report.first_failure().map(|o| o.attempt.id()),
        Some("lmodroid/pipa/vanilla".to_string())
    );

    assert_eq!(
        tree.calls(),
        vec![
            "lunch lmodroid_pipa-userdebug",
            "breakfast pipa",
            "m clean",
            "m lmodroid",
            "lunch lmodroid_pipa-userdebug",
            "breakfast pipa",
            "m clean",
            "m lmodroid",
        ]
    );
    assert!(paths.release_dir.join("lmodroid-6.0-pipa.zip").is_file());
}

#[test]
fn failed_preparation_aborts_before_any_attempt() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let request = BuildRequest::new("lmodroid", "raven", Variant::Gms).expect("request");
    let paths = paths_for(tmp.path(), &request);

    let mut tree = FakeTree::new(paths.output_dir("raven"));
    let (mut ctx, _rx) = ctx_with_events();
    let err = sequencer::execute(&mut ctx, &mut tree, &StaticFetcher, &request, &paths, &settings())
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::UnsupportedDeviceCombo);
    assert!(tree.calls().is_empty());
    assert!(!paths.work_dir.exists());
}

#[test]
fn dry_run_publishes_nothing_and_reports_success() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let mut request = BuildRequest::new("axion", "raven", Variant::Gms).expect("request");
    request.fastboot = true;
    let paths = paths_for(tmp.path(), &request);

    let mut tree = FakeTree::new(paths.output_dir("raven"));
    let (tx, _rx) = mpsc::channel();
    let mut ctx = ExecCtx::new(true, Arc::new(ChannelSink::new(tx)));
    let report = sequencer::execute(&mut ctx, &mut tree, &StaticFetcher, &request, &paths, &settings())
        .expect("execute");

    assert_eq!(report.outcomes.len(), 2);
    for outcome in &report.outcomes {
        let set = outcome.result.as_ref().expect("dry-run attempt");
        assert!(set.is_empty(), "{} published {:?}", outcome.attempt.id(), set.published);
    }
    assert!(!paths.release_dir.exists());
    assert!(!paths.local_manifests_dir().exists());
}

#[test]
fn lmodroid_fastboot_prefers_conventional_name_and_drops_flavor() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let mut request = BuildRequest::new("lmodroid", "pipa", Variant::Vanilla).expect("request");
    request.fastboot = true;
    let paths = paths_for(tmp.path(), &request);

    let mut tree = FakeTree::new(paths.output_dir("pipa"));
    tree.fastboot_outputs = vec![
        ("lmodroid_pipa-img.zip", "conventional"),
        ("pipa-updatepackage.zip", "update"),
    ];
    let (mut ctx, _rx) = ctx_with_events();
    let report = sequencer::run(&mut ctx, &mut tree, &request, &paths, &settings());

    assert!(!report.any_failed(), "failure: {:?}", report.first_failure());
    assert_eq!(
        tree.calls(),
        vec![
            "lunch lmodroid_pipa-userdebug",
            "m clean",
            "m lmodroid",
            "lunch lmodroid_pipa-userdebug",
            "m clean",
            "lunch lmodroid_pipa-userdebug",
            "m updatepackage",
        ]
    );

    let pkg = paths.release_dir.join("lmodroid-20250101-pipa-FASTBOOT.zip");
    let set = report.outcomes[1].result.as_ref().expect("fastboot artifacts");
    assert_eq!(set.fastboot_package.as_deref(), Some(pkg.as_path()));
    assert_eq!(fs::read(&pkg).expect("fastboot package"), b"conventional");
    assert_eq!(
        release_entries(&paths.release_dir),
        vec!["boot.img", "lmodroid-20250101-pipa-FASTBOOT.zip"]
    );
}
