//! ---
//! upd_section: "00-shared"
//! upd_subsection: "module"
//! upd_type: "source"
//! upd_scope: "code"
//! upd_description: "Shared primitives and utilities for the update runtime."
//! upd_version: "v0.0.0-prealpha"
//! upd_owner: "tbd"
//! ---
//! Shared primitives for the Updraft workspace.
//! This crate exposes configuration loading, tracing setup, and
//! version metadata utilities consumed across the workspace.

pub mod config;
pub mod logging;
pub mod version;

pub use config::{
    AppConfig, AppIdentityConfig, InstanceConfig, LoggingConfig, SkipPersistence, UpdateConfig,
};
pub use logging::{init_tracing, LogFormat};
pub use version::{VersionInfo, VersionSource};
