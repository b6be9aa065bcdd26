use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use clap::error::ErrorKind as ClapErrorKind;
use crossterm::style::Stylize;
use tracing_subscriber::EnvFilter;

use rom_builder::artifacts::{ReleaseNaming, ResolveOptions};
use rom_builder::config::{self, BuilderConfig};
use rom_builder::executor::{ExecCtx, StdoutSink};
use rom_builder::manifest::HttpFetcher;
use rom_builder::request::{BuildRequest, Variant};
use rom_builder::sequencer::{self, RunSettings};
use rom_builder::toolchain::AospToolchain;
use rom_builder::{Result, workspace};

#[derive(Debug, Parser)]
#[command(author, version, about = "Build Android custom ROMs and collect their release artifacts")]
struct Args {
    /// ROM to build: axion or lmodroid [default: axion]
    #[arg(short, long)]
    rom: Option<String>,
    /// Target device: pipa or raven [default: pipa]
    #[arg(short, long)]
    device: Option<String>,
    /// Build variant [default: vanilla]
    #[arg(short, long, value_enum)]
    variant: Option<Variant>,
    /// Reuse the existing source tree; only re-sync device, vendor, kernel and hardware repositories
    #[arg(short, long)]
    skip_sync: bool,
    /// Force a full clean before building (default)
    #[arg(short, long, overrides_with = "no_clean")]
    clean: bool,
    /// Incremental build (`m installclean` instead of `m clean`)
    #[arg(long, overrides_with = "clean")]
    no_clean: bool,
    /// Also build a fastboot flashable package
    #[arg(short, long)]
    fastboot: bool,
    /// Path to a TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,
    /// Base directory for source trees and releases [default: $HOME]
    #[arg(long)]
    root: Option<PathBuf>,
    /// Parallel jobs for sync and build (0 = all CPU cores)
    #[arg(long)]
    jobs: Option<usize>,
    /// Print every external command and copy without executing it
    #[arg(long)]
    dry_run: bool,
}

fn main() -> ExitCode {
    let args = match Args::try_parse() {
        Ok(a) => a,
        Err(e) => {
            let _ = e.print();
            return match e.kind() {
                ClapErrorKind::DisplayHelp | ClapErrorKind::DisplayVersion => ExitCode::SUCCESS,
                _ => ExitCode::from(1),
            };
        }
    };
    init_tracing();

    match run(args) {
        Ok(code) => code,
        Err(e) => {
            eprintln!(
                "{}",
                format!("Error: {} failed: {e}", e.kind().step()).red()
            );
            ExitCode::from(1)
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn build_request(args: &Args, cfg: &BuilderConfig) -> Result<BuildRequest> {
    let rom = args
        .rom
        .clone()
        .or_else(|| cfg.defaults.rom.clone())
        .unwrap_or_else(|| "axion".into());
    let device = args
        .device
        .clone()
        .or_else(|| cfg.defaults.device.clone())
        .unwrap_or_else(|| "pipa".into());
    let variant = match args.variant {
        Some(v) => v,
        None => cfg
            .defaults
            .variant
            .as_deref()
            .map(Variant::parse)
            .transpose()?
            .unwrap_or(Variant::Vanilla),
    };

    let mut request = BuildRequest::new(&rom, &device, variant)?;
    request.skip_sync = args.skip_sync;
    request.clean = args.clean || !args.no_clean;
    request.fastboot = args.fastboot;
    Ok(request)
}

fn run(args: Args) -> Result<ExitCode> {
    let cfg = config::load_or_default(args.config.as_deref())?;
    let request = build_request(&args, &cfg)?;
    let paths = workspace::resolve(
        &cfg.workspace,
        args.root.as_deref(),
        request.rom,
        &request.device,
    )?;

    let settings = RunSettings {
        sync_jobs: config::resolve_jobs(args.jobs.unwrap_or(cfg.sync.jobs)),
        build_jobs: config::resolve_jobs(args.jobs.unwrap_or(cfg.build.jobs)),
        resolve: ResolveOptions {
            naming: ReleaseNaming::today(),
            manual_fastboot_fallback: cfg.build.manual_fastboot_fallback,
        },
    };

    let sink = Arc::new(StdoutSink::with_error_logs(paths.log_dir.clone()));
    let mut ctx = ExecCtx::new(args.dry_run, sink);
    let fetcher = HttpFetcher::new()?;
    let mut toolchain = AospToolchain::new(cfg.sync.git_lfs);

    // Preparation failures are already reported through the sink.
    let Ok(report) = sequencer::execute(
        &mut ctx,
        &mut toolchain,
        &fetcher,
        &request,
        &paths,
        &settings,
    ) else {
        return Ok(ExitCode::from(1));
    };
    Ok(if report.any_failed() {
        ExitCode::from(1)
    } else {
        ExitCode::SUCCESS
    })
}
