use camino::Utf8PathBuf;
use chrono::{DateTime, Utc};

/// Which activation steps a rebuild performs after the build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebuildCommand {
    /// Activate now; the boot default is left alone.
    Test,
    /// Make the new profile the boot default without activating it.
    Boot,
    /// Test, then boot.
    Switch,
}

impl RebuildCommand {
    pub fn activates_now(self) -> bool {
        matches!(self, RebuildCommand::Test | RebuildCommand::Switch)
    }

    pub fn sets_boot_default(self) -> bool {
        matches!(self, RebuildCommand::Boot | RebuildCommand::Switch)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RebuildCommand::Test => "test",
            RebuildCommand::Boot => "boot",
            RebuildCommand::Switch => "switch",
        }
    }
}

/// External programs the pipelines invoke.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Programs {
    pub nix: String,
    pub nix_build: String,
    pub nix_env: String,
    pub nix_store: String,
    pub diff: String,
    pub fetch_updater: String,
    /// Prefix for commands that change the running system. `None` runs them directly.
    pub elevate: Option<String>,
}

impl Default for Programs {
    fn default() -> Self {
        Self {
            nix: "nix".to_string(),
            nix_build: "nix-build".to_string(),
            nix_env: "nix-env".to_string(),
            nix_store: "nix-store".to_string(),
            diff: "nvd".to_string(),
            fetch_updater: "update-nix-fetchgit".to_string(),
            elevate: Some("sudo".to_string()),
        }
    }
}

/// Well-known locations on the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemPaths {
    /// Link to the running system profile.
    pub current_system: Utf8PathBuf,
    /// Profile whose generations the bootloader lists.
    pub system_profile: Utf8PathBuf,
    /// File naming the running specialisation, if any.
    pub specialisation_marker: Utf8PathBuf,
}

impl Default for SystemPaths {
    fn default() -> Self {
        Self {
            current_system: Utf8PathBuf::from("/run/current-system"),
            system_profile: Utf8PathBuf::from("/nix/var/nix/profiles/system"),
            specialisation_marker: Utf8PathBuf::from("/etc/specialisation"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RebuildSettings {
    pub command: RebuildCommand,
    /// Project directory, manifest file or legacy configuration file.
    pub unit: Utf8PathBuf,
    pub hostname: String,
    /// Explicitly requested specialisation.
    pub specialisation: Option<String>,
    /// Fall back to the running specialisation when none is requested.
    pub auto_specialisation: bool,
    /// Contents of the specialisation marker, read by the caller.
    pub running_specialisation: Option<String>,
    pub ask: bool,
    pub dry_run: bool,
    pub paths: SystemPaths,
    pub programs: Programs,
}

impl RebuildSettings {
    pub fn new(command: RebuildCommand, unit: Utf8PathBuf, hostname: impl Into<String>) -> Self {
        Self {
            command,
            unit,
            hostname: hostname.into(),
            specialisation: None,
            auto_specialisation: true,
            running_specialisation: None,
            ask: false,
            dry_run: false,
            paths: SystemPaths::default(),
            programs: Programs::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReclaimSettings {
    /// Only links strictly below this directory are considered.
    pub root: Utf8PathBuf,
    /// Links whose target registered strictly before this instant are removed.
    pub threshold: DateTime<Utc>,
    pub dry_run: bool,
    /// Metadata query workers; `None` sizes the pool to the machine.
    pub jobs: Option<usize>,
}

impl ReclaimSettings {
    pub fn new(root: Utf8PathBuf, threshold: DateTime<Utc>) -> Self {
        Self {
            root,
            threshold,
            dry_run: false,
            jobs: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct UpdateSettings {
    pub path: Utf8PathBuf,
    /// Update every unit discovered below `path`.
    pub recursive: bool,
    pub dry_run: bool,
    pub programs: Programs,
}

impl UpdateSettings {
    pub fn new(path: Utf8PathBuf) -> Self {
        Self {
            path,
            recursive: false,
            dry_run: false,
            programs: Programs::default(),
        }
    }
}
