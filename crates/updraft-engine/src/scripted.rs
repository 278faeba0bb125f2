//! ---
//! upd_section: "03-engine"
//! upd_subsection: "module"
//! upd_type: "source"
//! upd_scope: "code"
//! upd_description: "Update engine capability and bundled implementations."
//! upd_version: "v0.0.0-prealpha"
//! upd_owner: "tbd"
//! ---
//! Deterministic engine double. Outcomes are queued per stage and consumed
//! in order; an empty queue falls back to a benign default.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use semver::Version;
use updraft_bridge::{ErrorDescriptor, ErrorKind, ProgressSnapshot};

use crate::{Artifact, EngineError, InstallMode, InstallReport, ProgressSink, ReleaseInfo, UpdateEngine};

/// Engine call kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// [`UpdateEngine::check`].
    Check,
    /// [`UpdateEngine::download`].
    Download,
    /// [`UpdateEngine::install`].
    Install,
}

struct DownloadScript {
    progress: Vec<u8>,
    outcome: Result<(), ErrorDescriptor>,
}

#[derive(Default)]
struct Script {
    checks: VecDeque<Result<Option<ReleaseInfo>, ErrorDescriptor>>,
    downloads: VecDeque<DownloadScript>,
    installs: VecDeque<Result<(), ErrorDescriptor>>,
    hang_check: bool,
    hang_download: bool,
    hang_install: bool,
    delay_check: Duration,
    delay_download: Duration,
    delay_install: Duration,
    install_modes: Vec<InstallMode>,
}

/// Scripted [`UpdateEngine`] used by tests and demos.
#[derive(Default)]
pub struct ScriptedEngine {
    script: Mutex<Script>,
    checks: AtomicUsize,
    downloads: AtomicUsize,
    installs: AtomicUsize,
}

impl ScriptedEngine {
    /// Engine with empty queues.
    pub fn new() -> Self {
        Self::default()
    }

    /// Next check finds `version`.
    pub fn push_release(&self, version: &str) -> &Self {
        self.push_check(Ok(Some(ReleaseInfo::new(parse(version)))))
    }

    /// Next check finds `version` with release notes.
    pub fn push_release_with_notes(&self, version: &str, notes: &str) -> &Self {
        self.push_check(Ok(Some(ReleaseInfo::new(parse(version)).with_notes(notes))))
    }

    /// Next check finds nothing.
    pub fn push_no_release(&self) -> &Self {
        self.push_check(Ok(None))
    }

    /// Next check fails.
    pub fn push_check_error(&self, kind: ErrorKind, message: &str) -> &Self {
        self.push_check(Err(ErrorDescriptor::new(kind, message)))
    }

    /// Queue a raw check outcome.
    pub fn push_check(&self, outcome: Result<Option<ReleaseInfo>, ErrorDescriptor>) -> &Self {
        self.script.lock().checks.push_back(outcome);
        self
    }

    /// Next download reports `progress` percentages then succeeds.
    pub fn push_download<I>(&self, progress: I) -> &Self
    where
        I: IntoIterator<Item = u8>,
    {
        self.script.lock().downloads.push_back(DownloadScript {
            progress: progress.into_iter().collect(),
            outcome: Ok(()),
        });
        self
    }

    /// Next download reports `progress` percentages then fails.
    pub fn push_download_error<I>(&self, progress: I, kind: ErrorKind, message: &str) -> &Self
    where
        I: IntoIterator<Item = u8>,
    {
        self.script.lock().downloads.push_back(DownloadScript {
            progress: progress.into_iter().collect(),
            outcome: Err(ErrorDescriptor::new(kind, message)),
        });
        self
    }

    /// Next install fails.
    pub fn push_install_error(&self, kind: ErrorKind, message: &str) -> &Self {
        self.script
            .lock()
            .installs
            .push_back(Err(ErrorDescriptor::new(kind, message)));
        self
    }

    /// Make calls of `stage` never complete. Downloads still report their
    /// scripted progress before stalling.
    pub fn set_hang(&self, stage: Stage, hang: bool) -> &Self {
        let mut script = self.script.lock();
        match stage {
            Stage::Check => script.hang_check = hang,
            Stage::Download => script.hang_download = hang,
            Stage::Install => script.hang_install = hang,
        }
        self
    }

    /// Make calls of `stage` take `delay` before resolving.
    pub fn set_delay(&self, stage: Stage, delay: Duration) -> &Self {
        let mut script = self.script.lock();
        match stage {
            Stage::Check => script.delay_check = delay,
            Stage::Download => script.delay_download = delay,
            Stage::Install => script.delay_install = delay,
        }
        self
    }

    /// Number of calls observed for `stage`.
    pub fn calls(&self, stage: Stage) -> usize {
        match stage {
            Stage::Check => self.checks.load(Ordering::SeqCst),
            Stage::Download => self.downloads.load(Ordering::SeqCst),
            Stage::Install => self.installs.load(Ordering::SeqCst),
        }
    }

    /// Modes passed to every install call so far.
    pub fn install_modes(&self) -> Vec<InstallMode> {
        self.script.lock().install_modes.clone()
    }
}

async fn stall(delay: Duration) {
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
}

fn parse(version: &str) -> Version {
    Version::parse(version).unwrap_or_else(|_| Version::new(0, 0, 0))
}

#[async_trait]
impl UpdateEngine for ScriptedEngine {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn check(&self, _current: &Version) -> Result<Option<ReleaseInfo>, EngineError> {
        self.checks.fetch_add(1, Ordering::SeqCst);
        let (hang, delay, outcome) = {
            let mut script = self.script.lock();
            (script.hang_check, script.delay_check, script.checks.pop_front())
        };
        stall(delay).await;
        if hang {
            futures::future::pending::<()>().await;
        }
        outcome.unwrap_or(Ok(None)).map_err(EngineError::from)
    }

    async fn download(
        &self,
        release: &ReleaseInfo,
        progress: ProgressSink,
    ) -> Result<Artifact, EngineError> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        let (hang, delay, script) = {
            let mut script = self.script.lock();
            (script.hang_download, script.delay_download, script.downloads.pop_front())
        };
        let script = script.unwrap_or(DownloadScript {
            progress: vec![100],
            outcome: Ok(()),
        });
        for percent in &script.progress {
            let transferred = u64::from(*percent) * 1024;
            progress.report(ProgressSnapshot::from_counts(transferred, 100 * 1024, 4096));
            tokio::task::yield_now().await;
        }
        stall(delay).await;
        if hang {
            futures::future::pending::<()>().await;
        }
        script.outcome.map_err(EngineError::from)?;
        Ok(Artifact {
            version: release.version.clone(),
            path: PathBuf::from(format!("scripted/{}", release.version)),
            size: 100 * 1024,
            sha256: String::new(),
        })
    }

    async fn install(
        &self,
        artifact: &Artifact,
        mode: InstallMode,
    ) -> Result<InstallReport, EngineError> {
        self.installs.fetch_add(1, Ordering::SeqCst);
        let (hang, delay, outcome) = {
            let mut script = self.script.lock();
            script.install_modes.push(mode);
            (script.hang_install, script.delay_install, script.installs.pop_front())
        };
        stall(delay).await;
        if hang {
            futures::future::pending::<()>().await;
        }
        outcome.unwrap_or(Ok(())).map_err(EngineError::from)?;
        Ok(InstallReport {
            version: artifact.version.clone(),
            target: artifact.path.clone(),
            mode,
            restart_required: mode == InstallMode::RestartNow,
        })
    }
}
