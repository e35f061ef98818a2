//! Embeddable core library for nixhelm.
//!
//! Provides clap-free entry points for rebuilding a NixOS configuration, updating unit
//! inputs and reclaiming stale gc-roots.
//!
//! # Port traits
//!
//! All side effects go through port traits:
//! - [`CommandRunner`](ports::CommandRunner): run (or, in dry-run, print) external commands
//! - [`Confirm`](ports::Confirm): ask the operator before activation
//! - [`StoreView`](nixhelm_domain::StoreView): query the store's root registry and metadata
//!
//! The [`adapters`] module provides the process-backed implementations.
//!
//! # Entry points
//!
//! - [`run_rebuild`](pipeline::run_rebuild): build, diff, confirm and activate
//! - [`run_update`](pipeline::run_update): update one unit or every unit below a directory
//! - [`run_reclaim`](pipeline::run_reclaim): remove gc-roots older than a threshold

pub mod adapters;
pub mod command;
pub mod error;
pub mod pipeline;
pub mod ports;
pub mod settings;

pub use error::ToolError;

// Re-export the domain types embedders need to build settings and read reports.
pub use nixhelm_domain::{ConfigReference, PinRecord, ResolveError, StoreView};
