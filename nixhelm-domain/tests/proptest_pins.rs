//! Property-based tests for gc-root scanning and expiry selection.
//!
//! These tests verify that:
//! - Scans never return a link outside the scan root
//! - Expiry is strictly-older-than the threshold
//! - Redacted listing lines never produce records

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use nixhelm_domain::{parse_root_listing, select_expired, PinScanner, StoreView};
use proptest::prelude::*;
use std::collections::HashMap;

struct ListingStore {
    listing: String,
    times: HashMap<String, i64>,
}

impl StoreView for ListingStore {
    fn list_roots(&self) -> anyhow::Result<String> {
        Ok(self.listing.clone())
    }

    fn registration_time(&self, target: &Utf8Path) -> anyhow::Result<DateTime<Utc>> {
        let secs = self
            .times
            .get(target.as_str())
            .copied()
            .ok_or_else(|| anyhow::anyhow!("unknown {target}"))?;
        DateTime::from_timestamp(secs, 0).ok_or_else(|| anyhow::anyhow!("bad time"))
    }
}

/// Strategy for a root: (top-level dir, leaf name, registration time).
fn arb_root() -> impl Strategy<Value = (String, String, i64)> {
    (
        prop::sample::select(vec!["home", "homework", "var", "srv"]),
        prop::string::string_regex(r"[a-z][a-z0-9]{0,6}").unwrap(),
        0i64..1_000,
    )
        .prop_map(|(top, leaf, t)| (top.to_string(), leaf, t))
}

fn store_for(roots: &[(String, String, i64)]) -> ListingStore {
    let mut listing = String::new();
    let mut times = HashMap::new();
    for (i, (top, leaf, t)) in roots.iter().enumerate() {
        let target = format!("/nix/store/{i:04}-{leaf}");
        listing.push_str(&format!("/{top}/{leaf} -> {target}\n"));
        times.insert(target, *t);
    }
    ListingStore { listing, times }
}

proptest! {
    /// Every scanned link has the scan root as a strict ancestor.
    #[test]
    fn scan_stays_under_root(roots in prop::collection::vec(arb_root(), 0..12)) {
        let store = store_for(&roots);
        let root = Utf8PathBuf::from("/home");
        let records = PinScanner::new(root.clone()).with_jobs(Some(3)).scan(&store).unwrap();

        let expected = roots.iter().filter(|(top, _, _)| top == "home").count();
        prop_assert_eq!(records.len(), expected);
        for r in &records {
            prop_assert!(r.link_path().starts_with(&root));
            prop_assert!(r.link_path() != root.as_path());
        }
    }

    /// A record is selected iff it was registered strictly before the threshold.
    #[test]
    fn expiry_is_strict(
        roots in prop::collection::vec(arb_root(), 0..12),
        threshold in 0i64..1_000,
    ) {
        let store = store_for(&roots);
        let records = PinScanner::new("/".into()).scan(&store).unwrap();
        let cutoff = DateTime::from_timestamp(threshold, 0).unwrap();

        let expired = select_expired(&records, cutoff);
        let expected = roots.iter().filter(|(_, _, t)| *t < threshold).count();
        prop_assert_eq!(expired.len(), expected);
        for r in expired {
            prop_assert!(r.created_at() < cutoff);
        }
    }

    /// Lines carrying the redaction marker never parse into entries.
    #[test]
    fn redacted_lines_are_dropped(links in prop::collection::vec("[a-z]{1,8}", 0..8)) {
        let text: String = links
            .iter()
            .map(|l| format!("{{censored}} -> /nix/store/{l}\n/r/{l} -> {{censored}}\n"))
            .collect();
        prop_assert!(parse_root_listing(&text).is_empty());
    }
}

#[test]
fn home_scenario_removes_only_old_pin_under_root() {
    let store = ListingStore {
        listing: "/home/u/a -> /store/X\n/home/u/b -> /store/Y\n/var/other -> /store/Z\n"
            .to_string(),
        times: [
            ("/store/X".to_string(), 100),
            ("/store/Y".to_string(), 200),
            ("/store/Z".to_string(), 50),
        ]
        .into_iter()
        .collect(),
    };
    let records = PinScanner::new("/home/u".into()).scan(&store).unwrap();
    let expired = select_expired(&records, DateTime::from_timestamp(150, 0).unwrap());

    let links: Vec<&str> = expired.iter().map(|r| r.link_path().as_str()).collect();
    assert_eq!(links, vec!["/home/u/a"]);
}
