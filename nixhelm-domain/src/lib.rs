//! Domain logic: configuration units, built system profiles and gc-root records.
//!
//! This crate owns *what* gets built, activated or reclaimed. It does not own *how* external
//! commands run; that's the `nixhelm-core` crate.

mod age;
mod pins;
mod ports;
mod profile;
mod reference;

pub use age::parse_threshold;
pub use pins::{
    parse_registration_time, parse_root_listing, select_expired, PinRecord, PinScanner, RootEntry,
    REDACTED_MARKER,
};
pub use ports::StoreView;
pub use profile::{
    read_specialisation_marker, select_specialisation, BuildProfile, ProfileError,
    SPECIALISATION_DIR,
};
pub use reference::{
    discover_units, ConfigReference, ResolveError, UnitKind, EXTERNAL_FETCH_MARKER, LEGACY_FILE,
    LOCK_FILE, MANIFEST_FILE,
};
