//! Configuration file loading for nixhelm.
//!
//! Discovers and loads `nixhelm.toml` from the user's config directory (or an explicit path).
//! Merges config file settings with CLI arguments (CLI takes precedence).

use anyhow::Context;
use camino::{Utf8Path, Utf8PathBuf};
use fs_err as fs;
use nixhelm_core::settings::{Programs, SystemPaths};
use serde::Deserialize;
use tracing::debug;

/// The config file name to search for.
pub const CONFIG_FILE_NAME: &str = "nixhelm.toml";

/// Top-level configuration from nixhelm.toml.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NixhelmConfig {
    pub rebuild: RebuildConfig,
    pub paths: PathsConfig,
    pub programs: ProgramsConfig,
    pub reclaim: ReclaimConfig,
}

/// Rebuild section of the config.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RebuildConfig {
    /// Unit to rebuild when none is given on the command line.
    pub flake: Option<Utf8PathBuf>,

    /// Host whose configuration is built.
    pub hostname: Option<String>,

    /// Always ask before activating.
    pub ask: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub current_system: Option<Utf8PathBuf>,
    pub system_profile: Option<Utf8PathBuf>,
    pub specialisation_marker: Option<Utf8PathBuf>,
}

/// Programs section of the config. Unset entries use the programs on `PATH`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProgramsConfig {
    pub nix: Option<String>,
    pub nix_build: Option<String>,
    pub nix_env: Option<String>,
    pub nix_store: Option<String>,
    pub diff: Option<String>,
    pub fetch_updater: Option<String>,

    /// Elevation program; an empty string disables elevation.
    pub elevate: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ReclaimConfig {
    /// Directory scanned for gc-roots.
    pub root: Option<Utf8PathBuf>,

    /// Age expression, e.g. "30 days ago".
    pub age: Option<String>,

    /// Metadata query workers.
    pub jobs: Option<usize>,
}

/// Discover the nixhelm.toml config file.
///
/// An explicit path always wins (and must exist when loaded). Otherwise
/// `<config dir>/nixhelm/nixhelm.toml` is used when present.
pub fn discover_config(explicit: Option<&Utf8Path>) -> Option<Utf8PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    let config_path = dirs::config_dir()
        .and_then(|dir| Utf8PathBuf::from_path_buf(dir).ok())?
        .join("nixhelm")
        .join(CONFIG_FILE_NAME);
    if config_path.exists() {
        debug!("found config file at {}", config_path);
        Some(config_path)
    } else {
        debug!("no config file found at {}", config_path);
        None
    }
}

/// Load and parse a nixhelm.toml config file.
pub fn load_config(path: &Utf8Path) -> anyhow::Result<NixhelmConfig> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("read config file {}", path))?;
    parse_config(&contents).with_context(|| format!("parse config file {}", path))
}

/// Parse a config file from a string.
pub fn parse_config(contents: &str) -> anyhow::Result<NixhelmConfig> {
    let config: NixhelmConfig = toml::from_str(contents).context("invalid TOML")?;
    Ok(config)
}

/// Load the discovered config, or return the default if there is none.
pub fn load_or_default(explicit: Option<&Utf8Path>) -> anyhow::Result<NixhelmConfig> {
    match discover_config(explicit) {
        Some(path) => load_config(&path),
        None => Ok(NixhelmConfig::default()),
    }
}

/// Rebuild options after merging CLI arguments over the config file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergedRebuild {
    pub unit: Option<Utf8PathBuf>,
    pub hostname: Option<String>,
    pub ask: bool,
}

/// Reclaim options after merging CLI arguments over the config file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergedReclaim {
    pub root: Option<Utf8PathBuf>,
    /// Empty means "now", i.e. every pin.
    pub age: String,
    pub jobs: Option<usize>,
}

/// Builder for merging config file with CLI arguments.
pub struct ConfigMerger {
    config: NixhelmConfig,
}

impl ConfigMerger {
    pub fn new(config: NixhelmConfig) -> Self {
        Self { config }
    }

    /// Programs with config overrides applied.
    ///
    /// Elevation is dropped entirely when the process already runs as root.
    pub fn programs(&self, is_root: bool) -> Programs {
        let defaults = Programs::default();
        let cfg = &self.config.programs;
        let elevate = if is_root {
            None
        } else {
            match &cfg.elevate {
                Some(e) if e.is_empty() => None,
                Some(e) => Some(e.clone()),
                None => defaults.elevate,
            }
        };
        Programs {
            nix: cfg.nix.clone().unwrap_or(defaults.nix),
            nix_build: cfg.nix_build.clone().unwrap_or(defaults.nix_build),
            nix_env: cfg.nix_env.clone().unwrap_or(defaults.nix_env),
            nix_store: cfg.nix_store.clone().unwrap_or(defaults.nix_store),
            diff: cfg.diff.clone().unwrap_or(defaults.diff),
            fetch_updater: cfg.fetch_updater.clone().unwrap_or(defaults.fetch_updater),
            elevate,
        }
    }

    pub fn paths(&self) -> SystemPaths {
        let defaults = SystemPaths::default();
        let cfg = &self.config.paths;
        SystemPaths {
            current_system: cfg.current_system.clone().unwrap_or(defaults.current_system),
            system_profile: cfg.system_profile.clone().unwrap_or(defaults.system_profile),
            specialisation_marker: cfg
                .specialisation_marker
                .clone()
                .unwrap_or(defaults.specialisation_marker),
        }
    }

    /// Default unit from the config file.
    pub fn flake(&self) -> Option<Utf8PathBuf> {
        self.config.rebuild.flake.clone()
    }

    /// Merge with rebuild command CLI arguments.
    ///
    /// `--ask` turns confirmation on; it cannot turn off `ask = true` from the file.
    pub fn merge_rebuild_args(
        &self,
        cli_unit: Option<Utf8PathBuf>,
        cli_hostname: Option<String>,
        cli_ask: bool,
    ) -> MergedRebuild {
        MergedRebuild {
            unit: cli_unit.or_else(|| self.config.rebuild.flake.clone()),
            hostname: cli_hostname.or_else(|| self.config.rebuild.hostname.clone()),
            ask: cli_ask || self.config.rebuild.ask,
        }
    }

    /// Merge with reclaim-pins command CLI arguments.
    pub fn merge_reclaim_args(
        &self,
        cli_root: Option<Utf8PathBuf>,
        cli_age: Option<String>,
        cli_jobs: Option<usize>,
    ) -> MergedReclaim {
        MergedReclaim {
            root: cli_root.or_else(|| self.config.reclaim.root.clone()),
            age: cli_age
                .or_else(|| self.config.reclaim.age.clone())
                .unwrap_or_default(),
            jobs: cli_jobs.or(self.config.reclaim.jobs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn test_parse_example_config() {
        let contents = r#"
[rebuild]
flake = "/etc/nixos"
hostname = "box"
ask = true

[paths]
current_system = "/run/current-system"
system_profile = "/nix/var/nix/profiles/system"
specialisation_marker = "/etc/specialisation"

[programs]
diff = "nix-diff"
elevate = "doas"

[reclaim]
root = "/home/me"
age = "30 days ago"
jobs = 8
"#;

        let config = parse_config(contents).unwrap();
        assert_eq!(config.rebuild.flake.as_deref(), Some(Utf8Path::new("/etc/nixos")));
        assert_eq!(config.rebuild.hostname.as_deref(), Some("box"));
        assert!(config.rebuild.ask);
        assert_eq!(config.programs.diff.as_deref(), Some("nix-diff"));
        assert_eq!(config.reclaim.age.as_deref(), Some("30 days ago"));
        assert_eq!(config.reclaim.jobs, Some(8));
    }

    #[test]
    fn test_parse_empty_config() {
        let config = parse_config("").unwrap();
        assert!(config.rebuild.flake.is_none());
        assert!(!config.rebuild.ask);
        assert!(config.programs.nix.is_none());
    }

    #[test]
    fn test_parse_rejects_bad_types() {
        assert!(parse_config("[reclaim]\njobs = \"many\"\n").is_err());
    }

    #[test]
    fn test_programs_defaults_and_overrides() {
        let config = parse_config("[programs]\nnix = \"/opt/nix/bin/nix\"\n").unwrap();
        let programs = ConfigMerger::new(config).programs(false);

        assert_eq!(programs.nix, "/opt/nix/bin/nix");
        assert_eq!(programs.nix_build, "nix-build");
        assert_eq!(programs.diff, "nvd");
        assert_eq!(programs.elevate.as_deref(), Some("sudo"));
    }

    #[test]
    fn test_empty_elevate_disables_elevation() {
        let config = parse_config("[programs]\nelevate = \"\"\n").unwrap();
        assert_eq!(ConfigMerger::new(config).programs(false).elevate, None);
    }

    #[test]
    fn test_root_never_elevates() {
        let config = parse_config("[programs]\nelevate = \"doas\"\n").unwrap();
        assert_eq!(ConfigMerger::new(config).programs(true).elevate, None);
    }

    #[test]
    fn test_merge_rebuild_args_cli_wins() {
        let config =
            parse_config("[rebuild]\nflake = \"/etc/nixos\"\nhostname = \"box\"\n").unwrap();
        let merger = ConfigMerger::new(config);

        let merged = merger.merge_rebuild_args(Some("/src/cfg".into()), None, false);
        assert_eq!(
            merged,
            MergedRebuild {
                unit: Some("/src/cfg".into()),
                hostname: Some("box".to_string()),
                ask: false,
            }
        );

        let merged = merger.merge_rebuild_args(None, Some("other".to_string()), true);
        assert_eq!(merged.unit.as_deref(), Some(Utf8Path::new("/etc/nixos")));
        assert_eq!(merged.hostname.as_deref(), Some("other"));
        assert!(merged.ask);
    }

    #[test]
    fn test_merge_reclaim_args_defaults_to_every_pin() {
        let merged =
            ConfigMerger::new(NixhelmConfig::default()).merge_reclaim_args(None, None, None);
        assert_eq!(merged.age, "");
        assert_eq!(merged.root, None);

        let config = parse_config("[reclaim]\nage = \"7d\"\njobs = 2\n").unwrap();
        let merged = ConfigMerger::new(config).merge_reclaim_args(None, Some("1d".into()), None);
        assert_eq!(merged.age, "1d");
        assert_eq!(merged.jobs, Some(2));
    }

    #[test]
    fn test_paths_overrides() {
        let config = parse_config("[paths]\ncurrent_system = \"/tmp/current\"\n").unwrap();
        let paths = ConfigMerger::new(config).paths();
        assert_eq!(paths.current_system, Utf8PathBuf::from("/tmp/current"));
        assert_eq!(paths.system_profile, Utf8PathBuf::from("/nix/var/nix/profiles/system"));
    }

    #[test]
    fn test_load_config_from_explicit_path() {
        let temp = TempDir::new().unwrap();
        let path = Utf8PathBuf::from_path_buf(temp.path().join(CONFIG_FILE_NAME)).unwrap();
        fs::write(&path, "[rebuild]\nhostname = \"box\"\n").unwrap();

        let config = load_or_default(Some(&path)).unwrap();
        assert_eq!(config.rebuild.hostname.as_deref(), Some("box"));
    }

    #[test]
    fn test_missing_explicit_config_is_an_error() {
        let temp = TempDir::new().unwrap();
        let path = Utf8PathBuf::from_path_buf(temp.path().join("absent.toml")).unwrap();
        assert!(load_or_default(Some(&path)).is_err());
    }
}
