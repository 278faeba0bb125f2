//! ---
//! upd_section: "03-engine"
//! upd_subsection: "module"
//! upd_type: "source"
//! upd_scope: "code"
//! upd_description: "Update engine capability and bundled implementations."
//! upd_version: "v0.0.0-prealpha"
//! upd_owner: "tbd"
//! ---
use async_trait::async_trait;
use semver::Version;
use tracing::debug;

use crate::{Artifact, EngineError, InstallMode, InstallReport, ProgressSink, ReleaseInfo, UpdateEngine};

/// Message reported for every call on a development build.
pub const DEV_MODE_MESSAGE: &str = "Cannot check for updates in development mode";

/// Engine injected when updates are switched off.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledEngine;

#[async_trait]
impl UpdateEngine for DisabledEngine {
    fn name(&self) -> &'static str {
        "disabled"
    }

    async fn check(&self, current: &Version) -> Result<Option<ReleaseInfo>, EngineError> {
        debug!(current = %current, "update check rejected; updates disabled");
        Err(EngineError::Disabled(DEV_MODE_MESSAGE.to_owned()))
    }

    async fn download(
        &self,
        _release: &ReleaseInfo,
        _progress: ProgressSink,
    ) -> Result<Artifact, EngineError> {
        Err(EngineError::Disabled(DEV_MODE_MESSAGE.to_owned()))
    }

    async fn install(
        &self,
        _artifact: &Artifact,
        _mode: InstallMode,
    ) -> Result<InstallReport, EngineError> {
        Err(EngineError::Disabled(DEV_MODE_MESSAGE.to_owned()))
    }
}
