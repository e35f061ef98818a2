use crate::ports::StoreView;
use anyhow::Context;
use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use fs_err as fs;
use rayon::prelude::*;
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::{debug, warn};

/// Marker the root listing prints in place of roots the caller may not see.
pub const REDACTED_MARKER: &str = "{censored}";

/// One `<link> -> <target>` line of the root listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootEntry {
    pub link: Utf8PathBuf,
    pub target: Utf8PathBuf,
}

pub fn parse_root_listing(text: &str) -> Vec<RootEntry> {
    text.lines()
        .filter_map(|line| {
            if line.contains(REDACTED_MARKER) {
                debug!(line, "skipping redacted root");
                return None;
            }
            let (link, target) = line.split_once(" -> ")?;
            Some(RootEntry {
                link: Utf8PathBuf::from(link.trim()),
                target: Utf8PathBuf::from(target.trim()),
            })
        })
        .collect()
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PathInfoDoc {
    List(Vec<PathInfoEntry>),
    Keyed(BTreeMap<String, Option<PathInfoEntry>>),
}

#[derive(Debug, Deserialize)]
struct PathInfoEntry {
    #[serde(default)]
    path: Option<String>,
    #[serde(rename = "registrationTime")]
    registration_time: Option<i64>,
}

/// Registration instant of `target` from store path-info JSON.
///
/// Both the list form (`[{"path": .., "registrationTime": ..}]`) and the form keyed by
/// store path are understood. Only the entry for `target` itself counts.
pub fn parse_registration_time(json: &str, target: &Utf8Path) -> anyhow::Result<DateTime<Utc>> {
    let doc: PathInfoDoc = serde_json::from_str(json).context("parse path-info json")?;
    let entry = match &doc {
        PathInfoDoc::List(items) => items
            .iter()
            .find(|i| i.path.as_deref() == Some(target.as_str())),
        PathInfoDoc::Keyed(map) => map.get(target.as_str()).and_then(Option::as_ref),
    };
    let seconds = entry
        .and_then(|e| e.registration_time)
        .with_context(|| format!("no registration time for {}", target))?;
    DateTime::from_timestamp(seconds, 0)
        .with_context(|| format!("registration time {} out of range", seconds))
}

/// One gc-root: a link outside the store pinning a store path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PinRecord {
    link_path: Utf8PathBuf,
    target_path: Utf8PathBuf,
    created_at: DateTime<Utc>,
}

impl PinRecord {
    pub fn new(
        link_path: Utf8PathBuf,
        target_path: Utf8PathBuf,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            link_path,
            target_path,
            created_at,
        }
    }

    pub fn link_path(&self) -> &Utf8Path {
        &self.link_path
    }

    pub fn target_path(&self) -> &Utf8Path {
        &self.target_path
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Strictly older than `threshold`; a pin registered exactly at it is kept.
    pub fn is_older_than(&self, threshold: DateTime<Utc>) -> bool {
        self.created_at < threshold
    }

    /// Delete the link. The store path stays for the collector.
    pub fn remove(&self) -> anyhow::Result<()> {
        let meta = fs::symlink_metadata(&self.link_path)
            .with_context(|| format!("stat {}", self.link_path))?;
        if !meta.file_type().is_symlink() {
            anyhow::bail!("{} is not a symlink; refusing to remove it", self.link_path);
        }
        fs::remove_file(&self.link_path).with_context(|| format!("remove {}", self.link_path))
    }
}

/// Enumerates the roots whose link lives below one directory.
#[derive(Debug, Clone)]
pub struct PinScanner {
    root: Utf8PathBuf,
    jobs: Option<usize>,
}

impl PinScanner {
    pub fn new(root: Utf8PathBuf) -> Self {
        Self { root, jobs: None }
    }

    /// Bound the metadata worker pool; `None` uses one worker per CPU.
    pub fn with_jobs(mut self, jobs: Option<usize>) -> Self {
        self.jobs = jobs;
        self
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    fn covers(&self, link: &Utf8Path) -> bool {
        link != self.root.as_path() && link.starts_with(&self.root)
    }

    /// Records in listing order. Roots whose metadata cannot be read are reported and skipped.
    pub fn scan(&self, store: &dyn StoreView) -> anyhow::Result<Vec<PinRecord>> {
        let listing = store.list_roots().context("list gc roots")?;
        let entries: Vec<RootEntry> = parse_root_listing(&listing)
            .into_iter()
            .filter(|e| self.covers(&e.link))
            .collect();
        debug!(root = %self.root, roots = entries.len(), "roots under scan root");

        let targets: Vec<&Utf8Path> = entries
            .iter()
            .map(|e| e.target.as_path())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.jobs.unwrap_or(0))
            .build()
            .context("build metadata worker pool")?;
        let times: HashMap<&Utf8Path, anyhow::Result<DateTime<Utc>>> = pool.install(|| {
            targets
                .par_iter()
                .map(|target| (*target, store.registration_time(target)))
                .collect()
        });

        let mut out = Vec::with_capacity(entries.len());
        for entry in &entries {
            match times.get(entry.target.as_path()) {
                Some(Ok(created_at)) => out.push(PinRecord::new(
                    entry.link.clone(),
                    entry.target.clone(),
                    *created_at,
                )),
                Some(Err(e)) => warn!(link = %entry.link, "skipping root: {:#}", e),
                None => warn!(link = %entry.link, "skipping root: no metadata"),
            }
        }
        Ok(out)
    }
}

/// The records strictly older than `threshold`, in input order.
pub fn select_expired(records: &[PinRecord], threshold: DateTime<Utc>) -> Vec<&PinRecord> {
    records
        .iter()
        .filter(|r| r.is_older_than(threshold))
        .collect()
}
