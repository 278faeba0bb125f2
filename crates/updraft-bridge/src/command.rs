//! ---
//! upd_section: "02-bridge"
//! upd_subsection: "module"
//! upd_type: "source"
//! upd_scope: "code"
//! upd_description: "Capability-restricted channel pair between controller and presenters."
//! upd_version: "v0.0.0-prealpha"
//! upd_owner: "tbd"
//! ---
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

/// Gestures a presenter may forward to the controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum UserCommand {
    /// Look for a newer release.
    Check,
    /// Fetch the offered release.
    Download,
    /// Apply the downloaded release and restart.
    Install,
    /// Decline the offered release.
    Skip {
        /// Version being declined.
        version: String,
    },
}

impl UserCommand {
    /// Short label for logging.
    pub fn name(&self) -> &'static str {
        match self {
            UserCommand::Check => "check",
            UserCommand::Download => "download",
            UserCommand::Install => "install",
            UserCommand::Skip { .. } => "skip",
        }
    }
}

/// What actually travels on the command channel.
#[derive(Debug)]
pub enum Envelope {
    /// Fire-and-forget command.
    Command(UserCommand),
    /// Query for the running version; answered on the enclosed sender.
    AppVersion(oneshot::Sender<String>),
}

/// Outcome of handing a command to the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Accepted by an attached controller.
    Delivered,
    /// No controller was attached; the command was discarded.
    Dropped,
}

impl Dispatch {
    /// Convenience check.
    pub fn is_delivered(self) -> bool {
        matches!(self, Dispatch::Delivered)
    }
}
