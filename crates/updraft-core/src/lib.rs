//! ---
//! upd_section: "01-core-functionality"
//! upd_subsection: "module"
//! upd_type: "source"
//! upd_scope: "code"
//! upd_description: "Update lifecycle controller and session state."
//! upd_version: "v0.0.0-prealpha"
//! upd_owner: "tbd"
//! ---
//! Update lifecycle controller.
//!
//! A single tokio task owns the [`UpdateSession`], serialises commands,
//! timer ticks and engine notices through one `select!` loop and publishes
//! ordered events on the bridge.

pub mod controller;
pub mod exit_hook;
pub mod machine;
pub mod metrics;
pub mod session;
pub mod skip_store;

pub use controller::{ControllerHandle, ControllerSettings, UpdateController};
pub use exit_hook::{ExitHook, ExitInstall, ShutdownReport};
pub use machine::{Effect, Input, Policy, Step};
pub use metrics::{new_registry, ControllerMetrics, SharedRegistry};
pub use session::{SessionSnapshot, UpdateSession};
pub use skip_store::{SkipStore, SkipStoreError};
