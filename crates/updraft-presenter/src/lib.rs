//! ---
//! upd_section: "03-presenter"
//! upd_subsection: "module"
//! upd_type: "source"
//! upd_scope: "code"
//! upd_description: "Presenter state derived from controller events."
//! upd_version: "v0.0.0-prealpha"
//! upd_owner: "tbd"
//! ---
//! Presenter side of the update flow.
//!
//! [`reduce`] folds events into a [`DisplayState`]; [`UpdateNotifier`] keeps
//! one attached to a [`updraft_bridge::PresenterPort`] and turns user
//! gestures into commands.

pub mod notifier;
pub mod state;

pub use notifier::UpdateNotifier;
pub use state::{reduce, Dialog, DisplayState};
