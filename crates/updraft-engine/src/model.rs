//! ---
//! upd_section: "03-engine"
//! upd_subsection: "module"
//! upd_type: "source"
//! upd_scope: "code"
//! upd_description: "Update engine capability and bundled implementations."
//! upd_version: "v0.0.0-prealpha"
//! upd_owner: "tbd"
//! ---
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use semver::Version;
use serde::Serialize;
use updraft_bridge::{Candidate, ProgressSnapshot};

/// Release found by a check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReleaseInfo {
    /// Release version.
    pub version: Version,
    /// Optional release notes.
    pub notes: Option<String>,
    /// Artifact location as published in the feed.
    pub url: String,
    /// Expected SHA-256 of the artifact, lowercase hex.
    pub sha256: Option<String>,
    /// Expected artifact size in bytes.
    pub size: Option<u64>,
    /// Publication timestamp.
    pub published_at: Option<DateTime<Utc>>,
}

impl ReleaseInfo {
    /// Minimal release with only a version.
    pub fn new(version: Version) -> Self {
        Self {
            version,
            notes: None,
            url: String::new(),
            sha256: None,
            size: None,
            published_at: None,
        }
    }

    /// Attach release notes.
    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    /// Presenter-facing view.
    pub fn candidate(&self) -> Candidate {
        Candidate {
            version: self.version.to_string(),
            notes: self.notes.clone(),
        }
    }
}

/// Downloaded and verified artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Artifact {
    /// Release this artifact belongs to.
    pub version: Version,
    /// Location in the cache directory.
    pub path: PathBuf,
    /// Size on disk.
    pub size: u64,
    /// Computed SHA-256, lowercase hex.
    pub sha256: String,
}

/// When an install is applied relative to the process lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallMode {
    /// Explicit install; the host restarts afterwards.
    RestartNow,
    /// Silent install from the exit hook; no restart.
    OnExit,
}

impl fmt::Display for InstallMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstallMode::RestartNow => f.write_str("restart_now"),
            InstallMode::OnExit => f.write_str("on_exit"),
        }
    }
}

/// Outcome of a successful install.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstallReport {
    /// Installed version.
    pub version: Version,
    /// Binary that now holds the new release.
    pub target: PathBuf,
    /// Mode the install ran in.
    pub mode: InstallMode,
    /// Whether the host should relaunch.
    pub restart_required: bool,
}

/// Callback receiving download progress.
#[derive(Clone)]
pub struct ProgressSink {
    inner: Arc<dyn Fn(ProgressSnapshot) + Send + Sync>,
}

impl ProgressSink {
    /// Wrap a callback.
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn(ProgressSnapshot) + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(callback),
        }
    }

    /// Sink that discards every report.
    pub fn noop() -> Self {
        Self::new(|_| {})
    }

    /// Forward one report.
    pub fn report(&self, snapshot: ProgressSnapshot) {
        (self.inner)(snapshot);
    }
}

impl fmt::Debug for ProgressSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ProgressSink")
    }
}
