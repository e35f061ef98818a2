use camino::Utf8Path;
use chrono::{DateTime, Utc};

/// Read-only access to the store's root registry and path metadata.
///
/// Implementations must be shareable across worker threads; metadata lookups fan out.
pub trait StoreView: Sync {
    /// Raw `<link> -> <target>` listing of every registered root, one per line.
    fn list_roots(&self) -> anyhow::Result<String>;

    /// Instant the store registered `target`.
    fn registration_time(&self, target: &Utf8Path) -> anyhow::Result<DateTime<Utc>>;
}
