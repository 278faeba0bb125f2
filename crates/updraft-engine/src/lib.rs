//! ---
//! upd_section: "03-engine"
//! upd_subsection: "module"
//! upd_type: "source"
//! upd_scope: "code"
//! upd_description: "Update engine capability and bundled implementations."
//! upd_version: "v0.0.0-prealpha"
//! upd_owner: "tbd"
//! ---
#![warn(missing_docs)]
//! The engine is the only component that touches release feeds, artifacts
//! and the installed binary. The controller drives it through
//! [`UpdateEngine`]; presenters never see it.

pub mod disabled;
pub mod error;
pub mod feed;
pub mod model;
pub mod scripted;

use async_trait::async_trait;
use semver::Version;

pub use disabled::{DisabledEngine, DEV_MODE_MESSAGE};
pub use error::EngineError;
pub use feed::{select_release, FeedEngine, FeedEngineSettings, FeedRelease, FeedSource, UpdateFeed};
pub use model::{Artifact, InstallMode, InstallReport, ProgressSink, ReleaseInfo};
pub use scripted::{ScriptedEngine, Stage};

/// Capability the controller uses to find, fetch and apply releases.
///
/// Implementations report failures as [`EngineError`]; none of them may
/// panic on a bad feed or artifact.
#[async_trait]
pub trait UpdateEngine: Send + Sync {
    /// Short name for logging.
    fn name(&self) -> &'static str;

    /// Look for a release newer than `current`.
    async fn check(&self, current: &Version) -> Result<Option<ReleaseInfo>, EngineError>;

    /// Fetch and verify the release artifact, reporting progress on `progress`.
    async fn download(
        &self,
        release: &ReleaseInfo,
        progress: ProgressSink,
    ) -> Result<Artifact, EngineError>;

    /// Apply a verified artifact.
    async fn install(
        &self,
        artifact: &Artifact,
        mode: InstallMode,
    ) -> Result<InstallReport, EngineError>;
}
