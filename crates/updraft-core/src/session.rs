//! ---
//! upd_section: "01-core-functionality"
//! upd_subsection: "module"
//! upd_type: "source"
//! upd_scope: "code"
//! upd_description: "Update lifecycle controller and session state."
//! upd_version: "v0.0.0-prealpha"
//! upd_owner: "tbd"
//! ---
use std::collections::BTreeSet;

use semver::Version;
use serde::Serialize;
use updraft_bridge::{Candidate, ErrorDescriptor, Phase, ProgressSnapshot};
use updraft_engine::{Artifact, ReleaseInfo};

/// The single mutable record of update progress, owned by the controller task.
#[derive(Debug, Clone)]
pub struct UpdateSession {
    pub(crate) phase: Phase,
    pub(crate) current_version: Version,
    pub(crate) candidate: Option<ReleaseInfo>,
    pub(crate) artifact: Option<Artifact>,
    pub(crate) progress: Option<ProgressSnapshot>,
    pub(crate) last_error: Option<ErrorDescriptor>,
    pub(crate) skipped: BTreeSet<String>,
    pub(crate) check_run: u64,
    pub(crate) download_run: u64,
}

impl UpdateSession {
    /// Fresh session in `Idle`.
    pub fn new(current_version: Version, skipped: BTreeSet<String>) -> Self {
        Self {
            phase: Phase::Idle,
            current_version,
            candidate: None,
            artifact: None,
            progress: None,
            last_error: None,
            skipped,
            check_run: 0,
            download_run: 0,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn current_version(&self) -> &Version {
        &self.current_version
    }

    pub fn candidate(&self) -> Option<&ReleaseInfo> {
        self.candidate.as_ref()
    }

    pub fn artifact(&self) -> Option<&Artifact> {
        self.artifact.as_ref()
    }

    pub fn progress(&self) -> Option<ProgressSnapshot> {
        self.progress
    }

    pub fn last_error(&self) -> Option<&ErrorDescriptor> {
        self.last_error.as_ref()
    }

    pub fn skipped(&self) -> &BTreeSet<String> {
        &self.skipped
    }

    pub fn is_skipped(&self, version: &Version) -> bool {
        self.skipped.contains(&version.to_string())
    }

    /// Read-only copy for observers.
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            phase: self.phase,
            current_version: self.current_version.to_string(),
            candidate: self.candidate.as_ref().map(ReleaseInfo::candidate),
            progress: self.progress,
            last_error: self.last_error.clone(),
            skipped: self.skipped.iter().cloned().collect(),
        }
    }

    /// Move to `phase`, dropping whatever the target phase may not carry.
    pub(crate) fn enter(&mut self, phase: Phase) {
        self.phase = phase;
        if phase != Phase::Downloading {
            self.progress = None;
        }
        if phase != Phase::Failed {
            self.last_error = None;
        }
        match phase {
            Phase::Idle | Phase::Checking | Phase::Failed => {
                self.candidate = None;
                self.artifact = None;
            }
            Phase::Available | Phase::Downloading => {
                self.artifact = None;
            }
            Phase::Downloaded | Phase::Installing => {}
        }
    }
}

/// Snapshot published on the controller's `watch` channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSnapshot {
    pub phase: Phase,
    pub current_version: String,
    pub candidate: Option<Candidate>,
    pub progress: Option<ProgressSnapshot>,
    pub last_error: Option<ErrorDescriptor>,
    pub skipped: Vec<String>,
}
