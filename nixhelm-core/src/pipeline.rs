use crate::command::{self, CommandError, CommandSpec};
use crate::error::ToolError;
use crate::ports::{CommandRunner, Confirm};
use crate::settings::{RebuildSettings, ReclaimSettings, UpdateSettings};
use anyhow::Context;
use camino::Utf8PathBuf;
use nixhelm_domain::{
    BuildProfile, ConfigReference, PinScanner, ResolveError, StoreView, UnitKind,
    discover_units, select_expired, select_specialisation,
};
use tracing::{debug, info, warn};

/// Prefix of the per-invocation directory holding the build result link.
const OUT_DIR_PREFIX: &str = "nixhelm-os-";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebuildOutcome {
    /// Every step of the requested command ran (or was printed, in dry-run).
    Completed,
    /// The operator declined at the confirmation prompt; nothing was activated.
    Declined,
}

/// Build a configuration, show what changes, and activate it.
///
/// Steps run strictly in order: build, specialisation check, diff, confirmation, then
/// `test` activation (test/switch) and boot-default registration (boot/switch). Any failing
/// step except the diff stops the run before the next one starts.
pub fn run_rebuild(
    settings: &RebuildSettings,
    runner: &dyn CommandRunner,
    confirm: &dyn Confirm,
) -> Result<RebuildOutcome, ToolError> {
    let reference = ConfigReference::resolve(&settings.unit)?;
    let target = select_specialisation(
        settings.specialisation.as_deref(),
        settings.running_specialisation.as_deref(),
        settings.auto_specialisation,
    );
    debug!(unit = %reference.path(), kind = ?reference.kind(), ?target, "rebuild plan");

    let out_dir = tempfile::Builder::new()
        .prefix(OUT_DIR_PREFIX)
        .tempdir()
        .context("create build output directory")?;
    let out_link = Utf8PathBuf::from_path_buf(out_dir.path().join("result"))
        .map_err(|p| anyhow::anyhow!("non utf-8 output path {}", p.display()))?;

    let builder = if reference.is_project() {
        &settings.programs.nix
    } else {
        &settings.programs.nix_build
    };
    runner.run(
        &CommandSpec::new(builder)
            .args(reference.build_args(&settings.hostname, &out_link))
            .message(format!("Building configuration for {}", settings.hostname)),
    )?;

    let new_profile = if settings.dry_run {
        if let Some(name) = &target {
            warn!("dry-run: specialisation '{name}' is not checked against an unbuilt profile");
        }
        BuildProfile::planned(out_link.clone(), target.as_deref())
    } else {
        BuildProfile::open(out_link.clone(), target.as_deref())?
    };
    let old_profile = BuildProfile::running(&settings.paths.current_system, target.as_deref());

    let diff = CommandSpec::new(&settings.programs.diff)
        .args([
            "diff",
            old_profile.activation_root().as_str(),
            new_profile.activation_root().as_str(),
        ])
        .message("Comparing with the running system");
    match runner.run(&diff) {
        Ok(()) => {}
        Err(e) if e.is_interrupted() => return Err(e.into()),
        Err(e) => warn!("{e}; continuing without a diff"),
    }

    if settings.ask
        && !confirm
            .confirm("Apply the new configuration?")
            .map_err(ToolError::from_anyhow)?
    {
        if !settings.dry_run {
            info!("Configuration not applied");
            return Ok(RebuildOutcome::Declined);
        }
        info!("dry-run: continuing past the declined confirmation");
    }

    let elevate = settings.programs.elevate.as_deref();
    if settings.command.activates_now() {
        runner.run(
            &CommandSpec::new(new_profile.switch_script(true).as_str())
                .arg("test")
                .elevated(elevate)
                .message("Activating configuration"),
        )?;
    }

    if settings.command.sets_boot_default() {
        runner.run(
            &CommandSpec::new(&settings.programs.nix_env)
                .args([
                    "--profile",
                    settings.paths.system_profile.as_str(),
                    "--set",
                    out_link.as_str(),
                ])
                .elevated(elevate)
                .message("Registering system profile"),
        )?;
        runner.run(
            &CommandSpec::new(new_profile.switch_script(false).as_str())
                .arg("boot")
                .elevated(elevate)
                .message("Adding configuration to the bootloader"),
        )?;
    }

    // The result link pins the build until here.
    drop(out_dir);
    Ok(RebuildOutcome::Completed)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReclaimReport {
    /// gc-roots found under the scan root.
    pub scanned: usize,
    /// Links removed (or, in dry-run, that would have been).
    pub removed: Vec<Utf8PathBuf>,
    /// Links that could not be removed, with the reason.
    pub failed: Vec<(Utf8PathBuf, String)>,
}

/// Remove every gc-root below the root whose target registered before the threshold.
///
/// Only the links are removed; their targets stay for the garbage collector. A failed
/// removal is reported and the remaining links are still processed.
pub fn run_reclaim(
    settings: &ReclaimSettings,
    store: &dyn StoreView,
) -> Result<ReclaimReport, ToolError> {
    let records = PinScanner::new(settings.root.clone())
        .with_jobs(settings.jobs)
        .scan(store)
        .map_err(ToolError::from_anyhow)?;
    if command::interrupted() {
        return Err(CommandError::Interrupted {
            command: "store query".to_string(),
        }
        .into());
    }

    let mut report = ReclaimReport {
        scanned: records.len(),
        ..ReclaimReport::default()
    };
    for record in select_expired(&records, settings.threshold) {
        info!(
            "Removing {} -> {} (registered {})",
            record.link_path(),
            record.target_path(),
            record.created_at().format("%Y-%m-%d %H:%M:%S UTC")
        );
        if settings.dry_run {
            report.removed.push(record.link_path().to_path_buf());
            continue;
        }
        match record.remove() {
            Ok(()) => report.removed.push(record.link_path().to_path_buf()),
            Err(e) => {
                warn!("{e:#}");
                report
                    .failed
                    .push((record.link_path().to_path_buf(), format!("{e:#}")));
            }
        }
    }
    Ok(report)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateReport {
    pub updated: Vec<Utf8PathBuf>,
    /// Units left alone: nothing to update, or not resolvable.
    pub skipped: Vec<String>,
    /// Units whose update command failed.
    pub failed: Vec<String>,
}

/// Refresh pinned inputs of one unit, or of every unit below a directory.
///
/// Project units get their lock file refreshed; legacy units are rewritten by the fetch
/// updater, and only when they fetch external sources. In recursive mode failures stay
/// with their unit; an interrupt still stops everything.
pub fn run_update(
    settings: &UpdateSettings,
    runner: &dyn CommandRunner,
) -> Result<UpdateReport, ToolError> {
    let recursive = settings.recursive && settings.path.is_dir();
    let units: Vec<Result<ConfigReference, ResolveError>> = if recursive {
        discover_units(&settings.path)?
    } else {
        vec![Ok(ConfigReference::resolve(&settings.path)?)]
    };

    let mut report = UpdateReport::default();
    for unit in units {
        let reference = match unit {
            Ok(reference) => reference,
            Err(e) => {
                warn!("skipping: {e}");
                report.skipped.push(e.to_string());
                continue;
            }
        };

        let cmd = match reference.kind() {
            UnitKind::Project => CommandSpec::new(&settings.programs.nix)
                .args(["flake", "update", "--flake", reference.path().as_str()])
                .message(format!("Updating inputs of {}", reference.path())),
            UnitKind::Legacy {
                has_external_fetch: true,
            } => CommandSpec::new(&settings.programs.fetch_updater)
                .arg(reference.path().as_str())
                .message(format!("Updating fetched sources in {}", reference.path())),
            UnitKind::Legacy {
                has_external_fetch: false,
            } => {
                debug!(unit = %reference.path(), "no external sources to update");
                report
                    .skipped
                    .push(format!("{}: nothing to update", reference.path()));
                continue;
            }
        };

        match runner.run(&cmd) {
            Ok(()) => report.updated.push(reference.path().to_path_buf()),
            Err(e) if e.is_interrupted() || !recursive => return Err(e.into()),
            Err(e) => {
                warn!("{e}");
                report.failed.push(e.to_string());
            }
        }
    }
    Ok(report)
}
