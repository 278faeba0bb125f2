//! ---
//! upd_section: "02-bridge"
//! upd_subsection: "module"
//! upd_type: "source"
//! upd_scope: "code"
//! upd_description: "Capability-restricted channel pair between controller and presenters."
//! upd_version: "v0.0.0-prealpha"
//! upd_owner: "tbd"
//! ---
//! User-facing status lines shared by the controller and presenters.

/// Emitted when a check starts.
pub const CHECKING: &str = "Checking for updates...";

/// Emitted when the feed has nothing newer.
pub const UP_TO_DATE: &str = "You're up to date!";

/// A release is on offer.
pub fn available(version: &str) -> String {
    format!("Update {version} available")
}

/// A download was started.
pub fn downloading(version: &str) -> String {
    format!("Update {version} available, downloading...")
}

/// Progress line.
pub fn progress(percent: u8) -> String {
    format!("Downloading {percent}%")
}

/// The artifact is verified.
pub fn ready(version: &str) -> String {
    format!("Update {version} ready to install")
}

/// An install was started.
pub fn installing(version: &str) -> String {
    format!("Installing update {version}...")
}

/// The user declined a release.
pub fn skipped(version: &str) -> String {
    format!("Skipped update to {version}")
}

/// An engine call failed.
pub fn error(message: &str) -> String {
    format!("Update error: {message}")
}
