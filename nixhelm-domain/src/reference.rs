use anyhow::Context;
use camino::{Utf8Path, Utf8PathBuf};
use fs_err as fs;
use glob::glob;
use std::collections::BTreeSet;
use thiserror::Error;
use tracing::debug;

/// Manifest that marks a directory as a project-style unit.
pub const MANIFEST_FILE: &str = "flake.nix";

/// Lock file a project-style unit must carry next to its manifest.
pub const LOCK_FILE: &str = "flake.lock";

/// Single-file definition looked up when a directory has no manifest.
pub const LEGACY_FILE: &str = "default.nix";

/// Substring that flags a legacy unit as pinning sources fetched from GitHub.
pub const EXTERNAL_FETCH_MARKER: &str = "fetchFromGitHub";

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("{path} does not exist or holds no buildable unit")]
    NotFound { path: Utf8PathBuf },

    #[error("{path} has a flake.nix but no flake.lock; lock the unit first")]
    UninitializedUnit { path: Utf8PathBuf },

    #[error("{0:#}")]
    Io(#[from] anyhow::Error),
}

impl ResolveError {
    /// Whether a multi-unit scan should skip this unit rather than abort.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, ResolveError::UninitializedUnit { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitKind {
    Project,
    Legacy { has_external_fetch: bool },
}

/// A canonical reference to one buildable configuration unit.
///
/// Project units are always identified by their directory; legacy units by their file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigReference {
    path: Utf8PathBuf,
    kind: UnitKind,
}

impl ConfigReference {
    pub fn resolve(input: &Utf8Path) -> Result<Self, ResolveError> {
        let mut path = match input.canonicalize_utf8() {
            Ok(p) => p,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ResolveError::NotFound {
                    path: input.to_path_buf(),
                });
            }
            Err(e) => {
                return Err(anyhow::Error::new(e)
                    .context(format!("canonicalize {}", input))
                    .into());
            }
        };

        if path.file_name() == Some(MANIFEST_FILE)
            && let Some(parent) = path.parent()
        {
            path = parent.to_path_buf();
        }

        if path.is_dir() {
            if path.join(MANIFEST_FILE).is_file() {
                return Self::project(path);
            }
            let legacy = path.join(LEGACY_FILE);
            if legacy.is_file() {
                return Self::legacy(legacy);
            }
            return Err(ResolveError::NotFound { path });
        }

        Self::legacy(path)
    }

    fn project(dir: Utf8PathBuf) -> Result<Self, ResolveError> {
        if !dir.join(LOCK_FILE).is_file() {
            return Err(ResolveError::UninitializedUnit { path: dir });
        }
        debug!(path = %dir, "resolved project unit");
        Ok(Self {
            path: dir,
            kind: UnitKind::Project,
        })
    }

    fn legacy(file: Utf8PathBuf) -> Result<Self, ResolveError> {
        let text = fs::read_to_string(&file).with_context(|| format!("read {}", file))?;
        let has_external_fetch = text.contains(EXTERNAL_FETCH_MARKER);
        debug!(path = %file, has_external_fetch, "resolved legacy unit");
        Ok(Self {
            path: file,
            kind: UnitKind::Legacy { has_external_fetch },
        })
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    pub fn kind(&self) -> UnitKind {
        self.kind
    }

    pub fn is_project(&self) -> bool {
        self.kind == UnitKind::Project
    }

    pub fn has_external_fetch(&self) -> bool {
        matches!(
            self.kind,
            UnitKind::Legacy {
                has_external_fetch: true
            }
        )
    }

    /// Builder arguments producing the system toplevel of `hostname` at `out_link`.
    ///
    /// The program (`nix` or `nix-build`) is chosen by the caller from [`Self::is_project`].
    pub fn build_args(&self, hostname: &str, out_link: &Utf8Path) -> Vec<String> {
        match self.kind {
            UnitKind::Project => vec![
                "build".to_string(),
                "--out-link".to_string(),
                out_link.to_string(),
                format!(
                    "{}#nixosConfigurations.\"{}\".config.system.build.toplevel",
                    self.path, hostname
                ),
            ],
            UnitKind::Legacy { .. } => vec![
                "<nixpkgs/nixos>".to_string(),
                "-A".to_string(),
                "system".to_string(),
                "-I".to_string(),
                format!("nixos-config={}", self.path),
                "--out-link".to_string(),
                out_link.to_string(),
            ],
        }
    }
}

/// Find every unit below `root`.
///
/// Each candidate is resolved independently so one broken unit never hides the rest.
/// Results come back sorted by candidate path, duplicates dropped.
pub fn discover_units(
    root: &Utf8Path,
) -> anyhow::Result<Vec<Result<ConfigReference, ResolveError>>> {
    let pattern = root.join("**").join("*.nix");
    debug!(pattern = %pattern, "scanning for units");

    let mut candidates = BTreeSet::new();
    for entry in glob(pattern.as_str()).context("glob **/*.nix")? {
        let path = entry.map_err(|e| anyhow::anyhow!("glob error: {e}"))?;
        let path = Utf8PathBuf::from_path_buf(path)
            .map_err(|p| anyhow::anyhow!("non utf-8 path {}", p.display()))?;

        // A manifest identifies its directory; the other .nix files next to it belong to it.
        if path.file_name() == Some(MANIFEST_FILE) {
            candidates.insert(path);
            continue;
        }
        let in_project = path
            .ancestors()
            .skip(1)
            .take_while(|a| a.starts_with(root))
            .any(|a| a.join(MANIFEST_FILE).is_file());
        if !in_project {
            candidates.insert(path);
        }
    }

    let mut seen = BTreeSet::new();
    let mut out = Vec::new();
    for candidate in candidates {
        let resolved = ConfigReference::resolve(&candidate);
        if let Ok(reference) = &resolved
            && !seen.insert(reference.path().to_path_buf())
        {
            continue;
        }
        out.push(resolved);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn utf8_root(temp: &TempDir) -> Utf8PathBuf {
        Utf8PathBuf::from_path_buf(temp.path().canonicalize().unwrap()).unwrap()
    }

    fn project(root: &Utf8Path, locked: bool) -> Utf8PathBuf {
        fs::create_dir_all(root).unwrap();
        fs::write(root.join(MANIFEST_FILE), "{ outputs = _: {}; }").unwrap();
        if locked {
            fs::write(root.join(LOCK_FILE), "{}").unwrap();
        }
        root.to_path_buf()
    }

    #[test]
    fn directory_and_manifest_resolve_to_same_reference() {
        let temp = TempDir::new().unwrap();
        let dir = project(&utf8_root(&temp), true);

        let from_dir = ConfigReference::resolve(&dir).unwrap();
        let from_manifest = ConfigReference::resolve(&dir.join(MANIFEST_FILE)).unwrap();

        assert_eq!(from_dir, from_manifest);
        assert_eq!(from_dir.path(), dir);
        assert!(from_dir.is_project());
    }

    #[test]
    fn project_without_lock_is_uninitialized() {
        let temp = TempDir::new().unwrap();
        let dir = project(&utf8_root(&temp), false);

        let err = ConfigReference::resolve(&dir).unwrap_err();
        assert!(matches!(err, ResolveError::UninitializedUnit { .. }));
        assert!(err.is_recoverable());

        let err = ConfigReference::resolve(&dir.join(MANIFEST_FILE)).unwrap_err();
        assert!(matches!(err, ResolveError::UninitializedUnit { .. }));
    }

    #[test]
    fn missing_path_is_not_found() {
        let temp = TempDir::new().unwrap();
        let err = ConfigReference::resolve(&utf8_root(&temp).join("nope")).unwrap_err();
        assert!(matches!(err, ResolveError::NotFound { .. }));
        assert!(!err.is_recoverable());
    }

    #[test]
    fn empty_directory_is_not_found() {
        let temp = TempDir::new().unwrap();
        let err = ConfigReference::resolve(&utf8_root(&temp)).unwrap_err();
        assert!(matches!(err, ResolveError::NotFound { .. }));
    }

    #[test]
    fn directory_with_default_nix_is_legacy() {
        let temp = TempDir::new().unwrap();
        let root = utf8_root(&temp);
        fs::write(
            root.join(LEGACY_FILE),
            "{ pkgs }: pkgs.fetchFromGitHub { owner = \"a\"; repo = \"b\"; }",
        )
        .unwrap();

        let reference = ConfigReference::resolve(&root).unwrap();
        assert_eq!(reference.path(), root.join(LEGACY_FILE));
        assert_eq!(
            reference.kind(),
            UnitKind::Legacy {
                has_external_fetch: true
            }
        );
    }

    #[test]
    fn marker_inside_comment_still_counts() {
        let temp = TempDir::new().unwrap();
        let file = utf8_root(&temp).join("pkg.nix");
        fs::write(&file, "# fetchFromGitHub is not used here\n{ }").unwrap();

        let reference = ConfigReference::resolve(&file).unwrap();
        assert!(reference.has_external_fetch());
    }

    #[test]
    fn plain_legacy_file_has_no_external_fetch() {
        let temp = TempDir::new().unwrap();
        let file = utf8_root(&temp).join("configuration.nix");
        fs::write(&file, "{ ... }: { }").unwrap();

        let reference = ConfigReference::resolve(&file).unwrap();
        assert!(!reference.has_external_fetch());
        assert!(!reference.is_project());
    }

    #[test]
    fn build_args_for_project_target_hostname_toplevel() {
        let temp = TempDir::new().unwrap();
        let dir = project(&utf8_root(&temp), true);
        let reference = ConfigReference::resolve(&dir).unwrap();

        let args = reference.build_args("box", Utf8Path::new("/tmp/x/result"));
        assert_eq!(
            args,
            vec![
                "build".to_string(),
                "--out-link".to_string(),
                "/tmp/x/result".to_string(),
                format!("{dir}#nixosConfigurations.\"box\".config.system.build.toplevel"),
            ]
        );
    }

    #[test]
    fn build_args_for_legacy_use_nixos_config() {
        let temp = TempDir::new().unwrap();
        let file = utf8_root(&temp).join("configuration.nix");
        fs::write(&file, "{ }").unwrap();
        let reference = ConfigReference::resolve(&file).unwrap();

        let args = reference.build_args("box", Utf8Path::new("/tmp/x/result"));
        assert!(args.contains(&format!("nixos-config={file}")));
        assert_eq!(args.last().map(String::as_str), Some("/tmp/x/result"));
    }

    #[test]
    fn discover_isolates_failures_per_unit() {
        let temp = TempDir::new().unwrap();
        let root = utf8_root(&temp);
        project(&root.join("good"), true);
        fs::write(root.join("good").join("module.nix"), "{ }").unwrap();
        project(&root.join("unlocked"), false);
        fs::create_dir_all(root.join("legacy")).unwrap();
        fs::write(root.join("legacy").join("pkg.nix"), "fetchFromGitHub").unwrap();

        let units = discover_units(&root).unwrap();
        assert_eq!(units.len(), 3);

        let ok: Vec<_> = units.iter().filter_map(|u| u.as_ref().ok()).collect();
        assert_eq!(ok.len(), 2);
        assert!(ok.iter().any(|r| r.is_project() && r.path() == root.join("good")));
        assert!(ok.iter().any(|r| r.has_external_fetch()));

        let failed: Vec<_> = units.iter().filter_map(|u| u.as_ref().err()).collect();
        assert_eq!(failed.len(), 1);
        assert!(failed[0].is_recoverable());
    }
}
