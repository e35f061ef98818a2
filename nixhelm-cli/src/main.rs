mod config;

use anyhow::Context;
use camino::Utf8PathBuf;
use chrono::Utc;
use clap::{Parser, Subcommand};
use config::ConfigMerger;
use nixhelm_core::ToolError;
use nixhelm_core::adapters::{NixStore, ProcessRunner, TerminalConfirm};
use nixhelm_core::pipeline::{RebuildOutcome, run_rebuild, run_reclaim, run_update};
use nixhelm_core::settings::{RebuildCommand, RebuildSettings, ReclaimSettings, UpdateSettings};
use nixhelm_domain::{parse_threshold, read_specialisation_marker};
use std::io::IsTerminal;
use std::process::ExitCode;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "nixhelm",
    version,
    about = "Rebuild, diff and activate NixOS configurations; reclaim stale gc-roots."
)]
struct Cli {
    /// Show debug output.
    #[arg(short, long, global = true, default_value_t = false)]
    verbose: bool,

    /// Config file (default: <config dir>/nixhelm/nixhelm.toml).
    #[arg(long, global = true, env = "NIXHELM_CONFIG")]
    config: Option<Utf8PathBuf>,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Build and activate the configuration now, without changing the boot default.
    #[command(visible_alias = "test")]
    RebuildTest(RebuildArgs),
    /// Build the configuration and make it the boot default, without activating it.
    #[command(visible_alias = "boot")]
    RebuildBoot(RebuildArgs),
    /// Build, activate now and make the configuration the boot default.
    #[command(visible_alias = "switch")]
    RebuildSwitch(RebuildArgs),
    /// Update the pinned inputs of a unit (or every unit below a directory).
    Update(UpdateArgs),
    /// Remove gc-roots whose targets are older than a given age.
    ReclaimPins(ReclaimArgs),
}

#[derive(Debug, Parser)]
struct RebuildArgs {
    /// Project directory, flake.nix or legacy configuration file (default: $FLAKE).
    #[arg(env = "FLAKE")]
    unit: Option<Utf8PathBuf>,

    /// Print the commands that would run without running them.
    #[arg(short = 'n', long, default_value_t = false)]
    dry_run: bool,

    /// Activate this specialisation.
    #[arg(short, long)]
    specialisation: Option<String>,

    /// Do not follow the currently running specialisation.
    #[arg(short = 'S', long, default_value_t = false)]
    no_auto_specialisation: bool,

    /// Ask for confirmation before activating.
    #[arg(short, long, default_value_t = false)]
    ask: bool,

    /// Build the configuration of this host (default: this machine's hostname).
    #[arg(short = 'H', long)]
    hostname: Option<String>,
}

#[derive(Debug, Parser)]
struct UpdateArgs {
    /// Unit or directory to update (default: $FLAKE, then the current directory).
    #[arg(env = "FLAKE")]
    path: Option<Utf8PathBuf>,

    /// Update every unit found below PATH.
    #[arg(short, long, default_value_t = false)]
    recursive: bool,

    /// Print the commands that would run without running them.
    #[arg(short = 'n', long, default_value_t = false)]
    dry_run: bool,
}

#[derive(Debug, Parser)]
struct ReclaimArgs {
    /// Directory whose gc-roots are considered (default: home directory).
    #[arg(long)]
    root: Option<Utf8PathBuf>,

    /// Remove roots older than this, e.g. "30 days ago", "2w", "2024-01-31" (default: now).
    #[arg(long)]
    age: Option<String>,

    /// Print the roots that would be removed without removing them.
    #[arg(short = 'n', long, default_value_t = false)]
    dry_run: bool,

    /// Number of parallel store queries (default: one per CPU).
    #[arg(short, long)]
    jobs: Option<usize>,
}

fn main() -> ExitCode {
    if let Err(e) = real_main() {
        error!("{:?}", e);
        let code = e.downcast_ref::<ToolError>().map_or(1, ToolError::exit_code);
        return ExitCode::from(code);
    }
    ExitCode::from(0)
}

fn real_main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let file_config =
        config::load_or_default(cli.config.as_deref()).context("load nixhelm.toml config")?;
    let merger = ConfigMerger::new(file_config);

    match cli.cmd {
        Command::RebuildTest(args) => cmd_rebuild(RebuildCommand::Test, args, &merger),
        Command::RebuildBoot(args) => cmd_rebuild(RebuildCommand::Boot, args, &merger),
        Command::RebuildSwitch(args) => cmd_rebuild(RebuildCommand::Switch, args, &merger),
        Command::Update(args) => cmd_update(args, &merger),
        Command::ReclaimPins(args) => cmd_reclaim(args, &merger),
    }
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .with_target(false)
        .without_time()
        .init();
}

fn is_root() -> bool {
    nix::unistd::Uid::effective().is_root()
}

fn cmd_rebuild(
    command: RebuildCommand,
    args: RebuildArgs,
    merger: &ConfigMerger,
) -> anyhow::Result<()> {
    let merged = merger.merge_rebuild_args(args.unit, args.hostname, args.ask);
    let unit = merged.unit.context(
        "no configuration unit given; pass UNIT, set $FLAKE or rebuild.flake in nixhelm.toml",
    )?;
    let hostname = match merged.hostname {
        Some(name) => name,
        None => hostname::get()
            .context("read machine hostname")?
            .into_string()
            .map_err(|name| anyhow::anyhow!("hostname {:?} is not valid UTF-8", name))?,
    };

    let paths = merger.paths();
    let running_specialisation = if args.no_auto_specialisation {
        None
    } else {
        read_specialisation_marker(&paths.specialisation_marker)?
    };
    debug!(
        "rebuild-{}: unit={}, hostname={}, running specialisation={:?}",
        command.as_str(),
        unit,
        hostname,
        running_specialisation
    );

    let mut settings = RebuildSettings::new(command, unit, hostname);
    settings.specialisation = args.specialisation;
    settings.auto_specialisation = !args.no_auto_specialisation;
    settings.running_specialisation = running_specialisation;
    settings.ask = merged.ask;
    settings.dry_run = args.dry_run;
    settings.paths = paths;
    settings.programs = merger.programs(is_root());

    let runner = ProcessRunner::new(args.dry_run);
    match run_rebuild(&settings, &runner, &TerminalConfirm)? {
        RebuildOutcome::Completed if args.dry_run => info!("dry-run complete; nothing was run"),
        RebuildOutcome::Completed => info!("rebuild-{} complete", command.as_str()),
        RebuildOutcome::Declined => {}
    }
    Ok(())
}

fn cmd_update(args: UpdateArgs, merger: &ConfigMerger) -> anyhow::Result<()> {
    let path = args
        .path
        .or_else(|| merger.flake())
        .unwrap_or_else(|| Utf8PathBuf::from("."));

    let mut settings = UpdateSettings::new(path);
    settings.recursive = args.recursive;
    settings.dry_run = args.dry_run;
    settings.programs = merger.programs(is_root());

    let report = run_update(&settings, &ProcessRunner::new(args.dry_run))?;
    info!(
        "{} updated, {} skipped, {} failed",
        report.updated.len(),
        report.skipped.len(),
        report.failed.len()
    );
    if !report.failed.is_empty() {
        anyhow::bail!("{} unit(s) failed to update", report.failed.len());
    }
    Ok(())
}

fn cmd_reclaim(args: ReclaimArgs, merger: &ConfigMerger) -> anyhow::Result<()> {
    let merged = merger.merge_reclaim_args(args.root, args.age, args.jobs);
    let root = match merged.root {
        Some(root) => root,
        None => dirs::home_dir()
            .context("no home directory; pass --root")
            .and_then(|home| {
                Utf8PathBuf::from_path_buf(home)
                    .map_err(|p| anyhow::anyhow!("non utf-8 home directory {}", p.display()))
            })?,
    };
    let root = root
        .canonicalize_utf8()
        .with_context(|| format!("resolve {}", root))?;
    let threshold = parse_threshold(&merged.age, Utc::now())?;
    debug!("reclaim-pins: root={}, threshold={}", root, threshold);

    let programs = merger.programs(is_root());
    let store = NixStore::new(programs.nix, programs.nix_store);
    let mut settings = ReclaimSettings::new(root, threshold);
    settings.dry_run = args.dry_run;
    settings.jobs = merged.jobs;

    let report = run_reclaim(&settings, &store)?;
    let verb = if args.dry_run { "would remove" } else { "removed" };
    info!(
        "{} {} of {} gc-roots",
        verb,
        report.removed.len(),
        report.scanned
    );
    if !report.failed.is_empty() {
        anyhow::bail!("{} gc-root(s) could not be removed", report.failed.len());
    }
    Ok(())
}
