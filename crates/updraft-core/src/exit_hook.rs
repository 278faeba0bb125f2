//! ---
//! upd_section: "01-core-functionality"
//! upd_subsection: "module"
//! upd_type: "source"
//! upd_scope: "code"
//! upd_description: "Update lifecycle controller and session state."
//! upd_version: "v0.0.0-prealpha"
//! upd_owner: "tbd"
//! ---
use serde::Serialize;
use tracing::{info, warn};
use updraft_bridge::{status, ErrorDescriptor, EventPayload, Phase};
use updraft_engine::{InstallMode, InstallReport, UpdateEngine};

use crate::machine;
use crate::session::UpdateSession;

/// Install-on-quit. Fires at most once per process.
#[derive(Debug)]
pub struct ExitHook {
    install_on_quit: bool,
    fired: bool,
}

/// What shutdown did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShutdownReport {
    /// Phase the session ended in.
    pub final_phase: Phase,
    /// Result of an install that finished during shutdown: the silent
    /// install, or an explicit one still running when shutdown began.
    pub exit_install: Option<Result<InstallReport, ErrorDescriptor>>,
}

/// Result of [`ExitHook::run`].
#[derive(Debug)]
pub struct ExitInstall {
    pub outcome: Result<InstallReport, ErrorDescriptor>,
    /// Events to publish; the `error` event when the install failed.
    pub events: Vec<(Phase, EventPayload)>,
}

impl ExitHook {
    pub fn new(install_on_quit: bool) -> Self {
        Self {
            install_on_quit,
            fired: false,
        }
    }

    pub fn has_fired(&self) -> bool {
        self.fired
    }

    /// Move a parked `Downloaded` session into `Installing`.
    ///
    /// Returns the status event to publish when the hook armed itself.
    pub fn arm(&mut self, session: &mut UpdateSession) -> Option<(Phase, EventPayload)> {
        if self.fired || !self.install_on_quit || session.phase() != Phase::Downloaded {
            return None;
        }
        let version = session.artifact()?.version.to_string();
        self.fired = true;
        session.enter(Phase::Installing);
        Some((
            Phase::Installing,
            EventPayload::status(status::installing(&version)),
        ))
    }

    /// Run the silent install for an armed session.
    pub async fn run(
        &self,
        session: &mut UpdateSession,
        engine: &dyn UpdateEngine,
    ) -> Option<ExitInstall> {
        if !self.fired || session.phase() != Phase::Installing {
            return None;
        }
        let artifact = session.artifact()?.clone();
        info!(version = %artifact.version, "installing update on exit");
        let outcome = engine
            .install(&artifact, InstallMode::OnExit)
            .await
            .map_err(|err| err.descriptor());
        let mut events = Vec::new();
        if let Err(error) = &outcome {
            warn!(kind = %error.kind, error = %error.message, "install on exit failed");
            events = machine::fail(session, error.clone()).events;
        }
        Some(ExitInstall { outcome, events })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use semver::Version;
    use updraft_bridge::ErrorKind;
    use updraft_engine::{Artifact, ScriptedEngine, Stage};

    use super::*;

    fn downloaded_session() -> UpdateSession {
        let mut session = UpdateSession::new(Version::new(1, 9, 0), BTreeSet::new());
        session.enter(Phase::Downloaded);
        session.artifact = Some(Artifact {
            version: Version::new(2, 0, 0),
            path: "cache/app".into(),
            size: 1,
            sha256: String::new(),
        });
        session
    }

    #[tokio::test]
    async fn fires_once_for_downloaded_session() {
        let engine = ScriptedEngine::new();
        let mut session = downloaded_session();
        let mut hook = ExitHook::new(true);

        assert!(hook.arm(&mut session).is_some());
        assert_eq!(session.phase(), Phase::Installing);
        let done = hook.run(&mut session, &engine).await.expect("hook ran");
        assert!(done.outcome.is_ok());
        assert!(done.events.is_empty());
        assert!(hook.arm(&mut session).is_none());
        assert_eq!(engine.calls(Stage::Install), 1);
        assert_eq!(engine.install_modes(), vec![InstallMode::OnExit]);
    }

    #[tokio::test]
    async fn failed_install_reports_an_error_event() {
        let engine = ScriptedEngine::new();
        engine.push_install_error(ErrorKind::InstallFailed, "target busy");
        let mut session = downloaded_session();
        let mut hook = ExitHook::new(true);

        hook.arm(&mut session).expect("armed");
        let done = hook.run(&mut session, &engine).await.expect("hook ran");
        assert_eq!(session.phase(), Phase::Failed);
        assert_eq!(
            session.last_error().map(|e| e.kind),
            Some(ErrorKind::InstallFailed)
        );
        let error = done.outcome.expect_err("install failed");
        assert_eq!(
            done.events,
            vec![(Phase::Failed, EventPayload::Error(error))]
        );
    }

    #[tokio::test]
    async fn disabled_or_wrong_phase_does_nothing() {
        let engine = ScriptedEngine::new();
        let mut session = downloaded_session();
        let mut hook = ExitHook::new(false);
        assert!(hook.arm(&mut session).is_none());
        assert!(hook.run(&mut session, &engine).await.is_none());

        let mut idle = UpdateSession::new(Version::new(1, 9, 0), BTreeSet::new());
        let mut hook = ExitHook::new(true);
        assert!(hook.arm(&mut idle).is_none());
        assert_eq!(engine.calls(Stage::Install), 0);
    }
}
