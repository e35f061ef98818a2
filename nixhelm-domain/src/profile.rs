use anyhow::Context;
use camino::{Utf8Path, Utf8PathBuf};
use fs_err as fs;
use std::collections::BTreeSet;
use std::io::ErrorKind;
use thiserror::Error;
use tracing::debug;

/// Subfolder of a profile holding one toplevel per specialisation.
pub const SPECIALISATION_DIR: &str = "specialisation";

#[derive(Debug, Error)]
pub enum ProfileError {
    #[error(
        "specialisation '{name}' does not exist in {profile} (available: {available}); \
         pass --specialisation <name> or use rebuild-boot"
    )]
    SpecialisationMismatch {
        name: String,
        profile: Utf8PathBuf,
        available: String,
    },

    #[error("{0:#}")]
    Io(#[from] anyhow::Error),
}

/// One built system profile on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildProfile {
    path: Utf8PathBuf,
    specialisations: BTreeSet<String>,
    active_specialisation: Option<String>,
}

impl BuildProfile {
    /// Open a profile that exists on disk and check `requested` against its specialisations.
    pub fn open(path: Utf8PathBuf, requested: Option<&str>) -> Result<Self, ProfileError> {
        let specialisations = list_specialisations(&path)?;

        if let Some(name) = requested
            && !specialisations.contains(name)
        {
            let available = if specialisations.is_empty() {
                "none".to_string()
            } else {
                specialisations
                    .iter()
                    .cloned()
                    .collect::<Vec<_>>()
                    .join(", ")
            };
            return Err(ProfileError::SpecialisationMismatch {
                name: name.to_string(),
                profile: path,
                available,
            });
        }

        debug!(profile = %path, ?specialisations, ?requested, "opened profile");
        Ok(Self {
            path,
            specialisations,
            active_specialisation: requested.map(str::to_string),
        })
    }

    /// A profile that has not been built yet (dry-run); `requested` cannot be checked.
    pub fn planned(path: Utf8PathBuf, requested: Option<&str>) -> Self {
        Self {
            path,
            specialisations: BTreeSet::new(),
            active_specialisation: requested.map(str::to_string),
        }
    }

    /// Read-only view of the running system behind the stable `link`.
    ///
    /// The link is resolved once, here. `requested` only becomes active when the running
    /// profile actually carries it; a missing or unreadable profile yields an empty view.
    pub fn running(link: &Utf8Path, requested: Option<&str>) -> Self {
        let path = link
            .canonicalize_utf8()
            .unwrap_or_else(|_| link.to_path_buf());
        let specialisations = list_specialisations(&path).unwrap_or_default();
        let active_specialisation = requested
            .filter(|name| specialisations.contains(*name))
            .map(str::to_string);

        Self {
            path,
            specialisations,
            active_specialisation,
        }
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    pub fn specialisations(&self) -> &BTreeSet<String> {
        &self.specialisations
    }

    pub fn active_specialisation(&self) -> Option<&str> {
        self.active_specialisation.as_deref()
    }

    /// `/specialisation/<name>`, or empty without an active specialisation.
    pub fn activation_prefix(&self) -> String {
        match &self.active_specialisation {
            Some(name) => format!("/{SPECIALISATION_DIR}/{name}"),
            None => String::new(),
        }
    }

    /// The profile path qualified by the active specialisation.
    pub fn activation_root(&self) -> Utf8PathBuf {
        match &self.active_specialisation {
            Some(name) => self.path.join(SPECIALISATION_DIR).join(name),
            None => self.path.clone(),
        }
    }

    /// Activation script; `qualified` selects the specialisation-qualified toplevel.
    pub fn switch_script(&self, qualified: bool) -> Utf8PathBuf {
        let root = if qualified {
            self.activation_root()
        } else {
            self.path.clone()
        };
        root.join("bin").join("switch-to-configuration")
    }
}

fn list_specialisations(profile: &Utf8Path) -> anyhow::Result<BTreeSet<String>> {
    let dir = profile.join(SPECIALISATION_DIR);
    let entries = match fs::read_dir(&dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(BTreeSet::new()),
        Err(e) => return Err(anyhow::Error::new(e).context(format!("list {}", dir))),
    };

    let mut out = BTreeSet::new();
    for entry in entries {
        let entry = entry.with_context(|| format!("list {}", dir))?;
        if let Some(name) = entry.file_name().to_str() {
            out.insert(name.to_string());
        }
    }
    Ok(out)
}

/// Pick the specialisation to build and activate.
///
/// An explicit name wins; otherwise the running one when auto-detection is on.
pub fn select_specialisation(
    explicit: Option<&str>,
    running: Option<&str>,
    auto_detect: bool,
) -> Option<String> {
    explicit
        .or(if auto_detect { running } else { None })
        .map(str::to_string)
}

/// Read the running specialisation from its marker file. Absent or blank means none.
pub fn read_specialisation_marker(path: &Utf8Path) -> anyhow::Result<Option<String>> {
    match fs::read_to_string(path) {
        Ok(text) => {
            let name = text.trim();
            Ok((!name.is_empty()).then(|| name.to_string()))
        }
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(anyhow::Error::new(e).context(format!("read {}", path))),
    }
}
