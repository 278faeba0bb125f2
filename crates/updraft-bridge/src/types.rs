//! ---
//! upd_section: "02-bridge"
//! upd_subsection: "module"
//! upd_type: "source"
//! upd_scope: "code"
//! upd_description: "Capability-restricted channel pair between controller and presenters."
//! upd_version: "v0.0.0-prealpha"
//! upd_owner: "tbd"
//! ---
use std::fmt;

use serde::{Deserialize, Serialize};

/// Phase of the update state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Nothing in flight.
    #[default]
    Idle,
    /// A feed lookup is running.
    Checking,
    /// A newer release was found and awaits a download decision.
    Available,
    /// The artifact is being transferred.
    Downloading,
    /// The artifact is verified and ready to install.
    Downloaded,
    /// The artifact is being applied. Terminal for the process.
    Installing,
    /// The last engine call failed.
    Failed,
}

impl Phase {
    /// All phases in declaration order.
    pub const ALL: [Phase; 7] = [
        Phase::Idle,
        Phase::Checking,
        Phase::Available,
        Phase::Downloading,
        Phase::Downloaded,
        Phase::Installing,
        Phase::Failed,
    ];

    /// Stable lowercase label used in logs and metric labels.
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::Checking => "checking",
            Phase::Available => "available",
            Phase::Downloading => "downloading",
            Phase::Downloaded => "downloaded",
            Phase::Installing => "installing",
            Phase::Failed => "failed",
        }
    }

    /// True while an engine call owns the session.
    pub fn is_busy(self) -> bool {
        matches!(self, Phase::Checking | Phase::Downloading | Phase::Installing)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Release offered to the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    /// Version identifier of the release.
    pub version: String,
    /// Optional release notes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl Candidate {
    /// Build a candidate without release notes.
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            notes: None,
        }
    }

    /// Attach release notes.
    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }
}

/// Download progress as reported to presenters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    /// Completion in percent, 0..=100.
    pub percent: u8,
    /// Observed transfer rate.
    pub bytes_per_second: u64,
    /// Expected artifact size; zero when unknown.
    pub total_bytes: u64,
    /// Bytes received so far.
    pub transferred_bytes: u64,
}

impl ProgressSnapshot {
    /// Derive the percentage from byte counters.
    ///
    /// An unknown total yields 0% until the transfer completes.
    pub fn from_counts(transferred_bytes: u64, total_bytes: u64, bytes_per_second: u64) -> Self {
        let percent = if total_bytes == 0 {
            0
        } else {
            ((transferred_bytes.saturating_mul(100)) / total_bytes).min(100) as u8
        };
        Self {
            percent,
            bytes_per_second,
            total_bytes,
            transferred_bytes,
        }
    }

    /// Same counters with an explicit percentage, clamped to 100.
    pub fn with_percent(mut self, percent: u8) -> Self {
        self.percent = percent.min(100);
        self
    }
}

/// Error taxonomy shared by engines, controller and presenters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The release feed or artifact host could not be reached.
    FeedUnreachable,
    /// The artifact failed checksum or size verification.
    VerificationFailed,
    /// Applying the artifact failed.
    InstallFailed,
    /// The process lacks rights to replace the installation.
    PermissionDenied,
    /// Updates are disabled for this build.
    Disabled,
    /// Anything else.
    Other,
}

impl ErrorKind {
    /// Stable label used in logs and metric labels.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::FeedUnreachable => "feed_unreachable",
            ErrorKind::VerificationFailed => "verification_failed",
            ErrorKind::InstallFailed => "install_failed",
            ErrorKind::PermissionDenied => "permission_denied",
            ErrorKind::Disabled => "disabled",
            ErrorKind::Other => "other",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error as carried inside events and the failed session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDescriptor {
    /// Classification.
    pub kind: ErrorKind,
    /// Human readable message.
    pub message: String,
}

impl ErrorDescriptor {
    /// Construct a descriptor.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for ErrorDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.kind)
    }
}
